//! Grid stores for the base and noise resolutions.
//!
//! Each store owns every grid of one resolution exclusively. Optional grids
//! are grouped by feature so they exist all together or not at all.
//!
//! The grids that go into snapshots are described by a static table of
//! `(name, GridRole)` pairs per feature combination, resolved once when the
//! simulation is created.

use glam::Vec3;

use crate::config::FeatureFlags;
use crate::error::SnapshotError;
use crate::flags::FlagGrid;
use crate::grid::{GridDims, MacGrid, ScalarGrid, VecGrid};
use crate::levelset::LevelSet;
use crate::noise::uv::UvGrid;

/// Which grid a persisted name refers to.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum GridRole {
    Density,
    Heat,
    Flame,
    Fuel,
    React,
    /// RGB channel 0..3
    Color(usize),
    /// `u|v|w` face arrays concatenated
    Velocity,
    /// Component of a texture carrier
    Texture { grid: usize, axis: usize },
}

/// A grid set on disk.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum GridSet {
    Data,
    Noise,
}

impl GridSet {
    pub fn dir_name(self) -> &'static str {
        match self {
            GridSet::Data => "data",
            GridSet::Noise => "noise",
        }
    }
}

pub type GridTable = Vec<(&'static str, GridRole)>;

const BASE_CORE: &[(&str, GridRole)] = &[("density", GridRole::Density), ("velocity", GridRole::Velocity)];
const BASE_HEAT: &[(&str, GridRole)] = &[("heat", GridRole::Heat)];
const BASE_FIRE: &[(&str, GridRole)] = &[
    ("flame", GridRole::Flame),
    ("fuel", GridRole::Fuel),
    ("react", GridRole::React),
];
const BASE_COLORS: &[(&str, GridRole)] = &[
    ("color_r", GridRole::Color(0)),
    ("color_g", GridRole::Color(1)),
    ("color_b", GridRole::Color(2)),
];

const NO_GRIDS: &[(&str, GridRole)] = &[];

const NOISE_CORE: &[(&str, GridRole)] = &[
    ("density_noise", GridRole::Density),
    ("texture_u", GridRole::Texture { grid: 0, axis: 0 }),
    ("texture_v", GridRole::Texture { grid: 0, axis: 1 }),
    ("texture_w", GridRole::Texture { grid: 0, axis: 2 }),
    ("texture_u2", GridRole::Texture { grid: 1, axis: 0 }),
    ("texture_v2", GridRole::Texture { grid: 1, axis: 1 }),
    ("texture_w2", GridRole::Texture { grid: 1, axis: 2 }),
];
const NOISE_FIRE: &[(&str, GridRole)] = &[
    ("flame_noise", GridRole::Flame),
    ("fuel_noise", GridRole::Fuel),
    ("react_noise", GridRole::React),
];
const NOISE_COLORS: &[(&str, GridRole)] = &[
    ("color_r_noise", GridRole::Color(0)),
    ("color_g_noise", GridRole::Color(1)),
    ("color_b_noise", GridRole::Color(2)),
];

/// Persisted grids of one set for the given features.
pub fn grid_table(set: GridSet, features: &FeatureFlags) -> GridTable {
    let (core, heat, fire, colors) = match set {
        GridSet::Data => (BASE_CORE, BASE_HEAT, BASE_FIRE, BASE_COLORS),
        GridSet::Noise => (NOISE_CORE, NO_GRIDS, NOISE_FIRE, NOISE_COLORS),
    };
    let mut table: GridTable = core.to_vec();
    if features.heat {
        table.extend_from_slice(heat);
    }
    if features.fire {
        table.extend_from_slice(fire);
    }
    if features.colors {
        table.extend_from_slice(colors);
    }
    table
}

/// Fuel, reaction progress and flame intensity.
#[derive(Clone, Debug, PartialEq)]
pub struct FireGrids {
    pub flame: ScalarGrid,
    pub fuel: ScalarGrid,
    pub react: ScalarGrid,
}

impl FireGrids {
    pub fn new(dims: GridDims) -> Self {
        Self {
            flame: ScalarGrid::new(dims),
            fuel: ScalarGrid::new(dims),
            react: ScalarGrid::new(dims),
        }
    }
}

/// RGB smoke color, stored premultiplied by density.
#[derive(Clone, Debug, PartialEq)]
pub struct ColorGrids {
    pub r: ScalarGrid,
    pub g: ScalarGrid,
    pub b: ScalarGrid,
}

impl ColorGrids {
    pub fn new(dims: GridDims) -> Self {
        Self {
            r: ScalarGrid::new(dims),
            g: ScalarGrid::new(dims),
            b: ScalarGrid::new(dims),
        }
    }

    /// `density * color` in every cell.
    pub fn from_density(density: &ScalarGrid, color: Vec3) -> Self {
        let dims = *density.dims();
        let scaled = |c: f32| ScalarGrid::with_data(dims, density.data().iter().map(|d| d * c).collect());
        Self {
            r: scaled(color.x),
            g: scaled(color.y),
            b: scaled(color.z),
        }
    }

    pub fn channels(&self) -> [&ScalarGrid; 3] {
        [&self.r, &self.g, &self.b]
    }

    pub fn channels_mut(&mut self) -> [&mut ScalarGrid; 3] {
        [&mut self.r, &mut self.g, &mut self.b]
    }

    pub fn get(&self, idx: usize) -> Vec3 {
        Vec3::new(self.r.data()[idx], self.g.data()[idx], self.b.data()[idx])
    }
}

/// Export and import persisted grids by role.
pub trait GridAccess {
    /// Flattened copy of a grid, `None` when the feature is off.
    fn export(&self, role: GridRole) -> Option<Vec<f32>>;

    /// Number of values a role holds.
    fn expected_len(&self, role: GridRole) -> Option<usize>;

    /// Overwrite a grid. Lengths are checked before anything is written.
    fn import(&mut self, name: &str, role: GridRole, data: &[f32]) -> Result<(), SnapshotError>;
}

fn check_len(name: &str, got: usize, expected: usize) -> Result<(), SnapshotError> {
    if got != expected {
        return Err(SnapshotError::ShapeMismatch {
            name: name.to_string(),
            got,
            expected,
        });
    }
    Ok(())
}

fn scalar_role<'a>(
    role: GridRole,
    density: &'a ScalarGrid,
    heat: Option<&'a ScalarGrid>,
    fire: Option<&'a FireGrids>,
    colors: Option<&'a ColorGrids>,
) -> Option<&'a ScalarGrid> {
    match role {
        GridRole::Density => Some(density),
        GridRole::Heat => heat,
        GridRole::Flame => fire.map(|f| &f.flame),
        GridRole::Fuel => fire.map(|f| &f.fuel),
        GridRole::React => fire.map(|f| &f.react),
        GridRole::Color(c) => colors.and_then(|g| g.channels().get(c).copied()),
        GridRole::Velocity | GridRole::Texture { .. } => None,
    }
}

fn scalar_role_mut<'a>(
    role: GridRole,
    density: &'a mut ScalarGrid,
    heat: Option<&'a mut ScalarGrid>,
    fire: Option<&'a mut FireGrids>,
    colors: Option<&'a mut ColorGrids>,
) -> Option<&'a mut ScalarGrid> {
    match role {
        GridRole::Density => Some(density),
        GridRole::Heat => heat,
        GridRole::Flame => fire.map(|f| &mut f.flame),
        GridRole::Fuel => fire.map(|f| &mut f.fuel),
        GridRole::React => fire.map(|f| &mut f.react),
        GridRole::Color(c) => colors.and_then(|g| g.channels_mut().into_iter().nth(c)),
        GridRole::Velocity | GridRole::Texture { .. } => None,
    }
}

/// Everything at base resolution.
#[derive(Clone, Debug)]
pub struct BaseStore {
    dims: GridDims,
    pub vel: MacGrid,
    pub density: ScalarGrid,
    pub heat: Option<ScalarGrid>,
    pub fire: Option<FireGrids>,
    pub colors: Option<ColorGrids>,
    pub pressure: ScalarGrid,
    pub flags: FlagGrid,
    /// Static level sets, joined with the per-frame ones every frame
    pub phi_obs_static: LevelSet,
    pub phi_out_static: LevelSet,
    /// Level sets of the current frame
    pub phi_obs: LevelSet,
    pub phi_out: LevelSet,
    /// Cell-centred obstacle velocity of the current frame
    pub obvel: VecGrid,
    /// Scratch grid reused by the divergence queries
    pub divergence: ScalarGrid,
}

impl BaseStore {
    pub fn new(dims: GridDims, features: &FeatureFlags) -> Self {
        Self {
            dims,
            vel: MacGrid::new(dims),
            density: ScalarGrid::new(dims),
            heat: features.heat.then(|| ScalarGrid::new(dims)),
            fire: features.fire.then(|| FireGrids::new(dims)),
            colors: features.colors.then(|| ColorGrids::new(dims)),
            pressure: ScalarGrid::new(dims),
            flags: FlagGrid::all_fluid(dims),
            phi_obs_static: LevelSet::empty(dims),
            phi_out_static: LevelSet::empty(dims),
            phi_obs: LevelSet::empty(dims),
            phi_out: LevelSet::empty(dims),
            obvel: VecGrid::new(dims),
            divergence: ScalarGrid::new(dims),
        }
    }

    pub fn dims(&self) -> &GridDims {
        &self.dims
    }

    pub fn scalar(&self, role: GridRole) -> Option<&ScalarGrid> {
        scalar_role(
            role,
            &self.density,
            self.heat.as_ref(),
            self.fire.as_ref(),
            self.colors.as_ref(),
        )
    }

    pub fn scalar_mut(&mut self, role: GridRole) -> Option<&mut ScalarGrid> {
        scalar_role_mut(
            role,
            &mut self.density,
            self.heat.as_mut(),
            self.fire.as_mut(),
            self.colors.as_mut(),
        )
    }
}

impl GridAccess for BaseStore {
    fn export(&self, role: GridRole) -> Option<Vec<f32>> {
        match role {
            GridRole::Velocity => {
                let mut out = Vec::with_capacity(self.vel.u.len() + self.vel.v.len() + self.vel.w.len());
                out.extend_from_slice(&self.vel.u);
                out.extend_from_slice(&self.vel.v);
                out.extend_from_slice(&self.vel.w);
                Some(out)
            }
            _ => self.scalar(role).map(|g| g.data().to_vec()),
        }
    }

    fn expected_len(&self, role: GridRole) -> Option<usize> {
        match role {
            GridRole::Velocity => Some(self.dims.u_count() + self.dims.v_count() + self.dims.w_count()),
            _ => self.scalar(role).map(|g| g.data().len()),
        }
    }

    fn import(&mut self, name: &str, role: GridRole, data: &[f32]) -> Result<(), SnapshotError> {
        let expected = self
            .expected_len(role)
            .ok_or_else(|| SnapshotError::UnknownGrid(name.to_string()))?;
        check_len(name, data.len(), expected)?;
        match role {
            GridRole::Velocity => {
                let (u, rest) = data.split_at(self.vel.u.len());
                let (v, w) = rest.split_at(self.vel.v.len());
                self.vel.u.copy_from_slice(u);
                self.vel.v.copy_from_slice(v);
                self.vel.w.copy_from_slice(w);
            }
            _ => {
                if let Some(grid) = self.scalar_mut(role) {
                    grid.data_mut().copy_from_slice(data);
                }
            }
        }
        Ok(())
    }
}

/// Everything at noise resolution plus the base-resolution noise helpers.
#[derive(Clone, Debug)]
pub struct NoiseStore {
    dims: GridDims,
    base_dims: GridDims,
    /// Base velocity interpolated up, then perturbed by the wavelet noise
    pub vel: MacGrid,
    pub density: ScalarGrid,
    pub fire: Option<FireGrids>,
    pub colors: Option<ColorGrids>,
    pub flags: FlagGrid,
    /// Base level sets interpolated once per frame
    pub phi_obs: LevelSet,
    pub phi_out: LevelSet,
    /// Texture carriers at base resolution, allocated on first use
    pub uv: Vec<UvGrid>,
    /// Kinetic energy and wavelet coefficients at base resolution
    pub energy: ScalarGrid,
}

impl NoiseStore {
    pub fn new(dims: GridDims, base_dims: GridDims, features: &FeatureFlags) -> Self {
        Self {
            dims,
            base_dims,
            vel: MacGrid::new(dims),
            density: ScalarGrid::new(dims),
            fire: features.fire.then(|| FireGrids::new(dims)),
            colors: features.colors.then(|| ColorGrids::new(dims)),
            flags: FlagGrid::all_fluid(dims),
            phi_obs: LevelSet::empty(dims),
            phi_out: LevelSet::empty(dims),
            uv: Vec::new(),
            energy: ScalarGrid::new(base_dims),
        }
    }

    pub fn dims(&self) -> &GridDims {
        &self.dims
    }

    pub fn base_dims(&self) -> &GridDims {
        &self.base_dims
    }

    /// Allocate the texture carriers at identity if they do not exist yet.
    pub fn ensure_uv(&mut self, count: usize) {
        if self.uv.len() != count {
            log::debug!("initializing {} uv grids", count);
            self.uv = (0..count).map(|i| UvGrid::new(self.base_dims, i)).collect();
        }
    }

    pub fn scalar(&self, role: GridRole) -> Option<&ScalarGrid> {
        scalar_role(role, &self.density, None, self.fire.as_ref(), self.colors.as_ref())
    }

    pub fn scalar_mut(&mut self, role: GridRole) -> Option<&mut ScalarGrid> {
        scalar_role_mut(role, &mut self.density, None, self.fire.as_mut(), self.colors.as_mut())
    }
}

impl GridAccess for NoiseStore {
    fn export(&self, role: GridRole) -> Option<Vec<f32>> {
        match role {
            GridRole::Texture { grid, axis } => match self.uv.get(grid) {
                Some(uv) => Some(uv.coords().data().iter().map(|c| c[axis]).collect()),
                // Not stepped yet: carriers are at identity
                None => Some(UvGrid::new(self.base_dims, grid).coords().data().iter().map(|c| c[axis]).collect()),
            },
            _ => self.scalar(role).map(|g| g.data().to_vec()),
        }
    }

    fn expected_len(&self, role: GridRole) -> Option<usize> {
        match role {
            GridRole::Texture { .. } => Some(self.base_dims.cell_count()),
            _ => self.scalar(role).map(|g| g.data().len()),
        }
    }

    fn import(&mut self, name: &str, role: GridRole, data: &[f32]) -> Result<(), SnapshotError> {
        let expected = self
            .expected_len(role)
            .ok_or_else(|| SnapshotError::UnknownGrid(name.to_string()))?;
        check_len(name, data.len(), expected)?;
        match role {
            GridRole::Texture { grid, axis } => {
                let count = grid + 1;
                if self.uv.len() < count {
                    let base = self.base_dims;
                    let start = self.uv.len();
                    self.uv.extend((start..count).map(|i| UvGrid::new(base, i)));
                }
                for (c, &value) in self.uv[grid].coords_mut().data_mut().iter_mut().zip(data) {
                    c[axis] = value;
                }
            }
            _ => {
                if let Some(grid) = self.scalar_mut(role) {
                    grid.data_mut().copy_from_slice(data);
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn names(table: &GridTable) -> Vec<&'static str> {
        table.iter().map(|(n, _)| *n).collect()
    }

    #[test]
    fn test_table_follows_features() {
        let plain = FeatureFlags::default();
        assert_eq!(names(&grid_table(GridSet::Data, &plain)), vec!["density", "velocity"]);

        let all = FeatureFlags {
            heat: true,
            colors: true,
            fire: true,
            noise: true,
        };
        let data = names(&grid_table(GridSet::Data, &all));
        assert_eq!(
            data,
            vec!["density", "velocity", "heat", "flame", "fuel", "react", "color_r", "color_g", "color_b"]
        );
        let noise = names(&grid_table(GridSet::Noise, &all));
        assert!(noise.contains(&"texture_w2"));
        assert!(noise.contains(&"react_noise"));
        assert!(!noise.contains(&"heat"), "noise grid carries no heat");
    }

    #[test]
    fn test_optional_grids_exist_iff_feature() {
        let dims = GridDims::new(4, 4, 4, 1.0);
        let store = BaseStore::new(
            dims,
            &FeatureFlags {
                heat: true,
                fire: false,
                colors: true,
                noise: false,
            },
        );
        assert!(store.heat.is_some());
        assert!(store.fire.is_none());
        assert!(store.colors.is_some());
        assert!(store.export(GridRole::Fuel).is_none());
        assert!(store.export(GridRole::Color(2)).is_some());
    }

    #[test]
    fn test_velocity_import_splits_components() {
        let dims = GridDims::new(3, 4, 5, 1.0);
        let mut store = BaseStore::new(dims, &FeatureFlags::default());
        let n = store.expected_len(GridRole::Velocity).unwrap();
        let data: Vec<f32> = (0..n).map(|i| i as f32).collect();
        store.import("velocity", GridRole::Velocity, &data).unwrap();
        assert_eq!(store.vel.u[0], 0.0);
        assert_eq!(store.vel.v[0], dims.u_count() as f32);
        assert_eq!(store.export(GridRole::Velocity).unwrap(), data);
    }

    #[test]
    fn test_import_rejects_wrong_length() {
        let dims = GridDims::new(4, 4, 4, 1.0);
        let mut store = BaseStore::new(dims, &FeatureFlags::default());
        let err = store.import("density", GridRole::Density, &[1.0; 10]).unwrap_err();
        assert!(matches!(err, SnapshotError::ShapeMismatch { expected: 64, got: 10, .. }));
        assert_eq!(store.density.total(), 0.0, "failed import must not write");
    }

    #[test]
    fn test_texture_import_allocates_carriers() {
        let base = GridDims::new(4, 4, 4, 1.0);
        let mut store = NoiseStore::new(base.upsampled(2), base, &FeatureFlags::default());
        assert!(store.uv.is_empty());
        store
            .import("texture_v2", GridRole::Texture { grid: 1, axis: 1 }, &[7.0; 64])
            .unwrap();
        assert_eq!(store.uv.len(), 2);
        assert_eq!(store.uv[1].coords().get(0, 0, 0).y, 7.0);
    }

    #[test]
    fn test_colors_premultiplied_by_density() {
        let dims = GridDims::new(2, 2, 2, 1.0);
        let density = ScalarGrid::filled(dims, 0.5);
        let colors = ColorGrids::from_density(&density, Vec3::new(1.0, 0.5, 0.0));
        assert_eq!(colors.get(3), Vec3::new(0.5, 0.25, 0.0));
    }
}
