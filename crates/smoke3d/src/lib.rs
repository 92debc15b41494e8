//! Adaptive multi-resolution smoke and fire simulation.
//!
//! An Eulerian solver on a staggered MAC grid with two coupled resolutions:
//! the base grid carries the authoritative simulation (advection, buoyancy,
//! combustion, pressure projection), and an optional noise grid synthesizes
//! wavelet turbulence on top of an upsampled copy of it.
//!
//! # Example
//!
//! ```
//! use smoke3d::{Emitter, FrameInputs, SmokeConfig, SmokeSimulation};
//! use glam::Vec3;
//!
//! let mut config = SmokeConfig::cube(16, 1.0);
//! config.features.heat = true;
//! let mut sim = SmokeSimulation::new(config).unwrap();
//!
//! let inputs = FrameInputs {
//!     emitters: vec![Emitter::new(Vec3::new(0.4, 0.0, 0.4), Vec3::new(0.6, 0.2, 0.6)).with_heat(1.0)],
//!     ..Default::default()
//! };
//! let report = sim.advance_frame(&inputs).unwrap();
//! assert_eq!(report.frame, 1);
//! assert!(sim.base().density.total() > 0.0);
//! ```

pub mod advection;
pub mod bake;
pub mod combustion;
pub mod config;
pub mod constants;
pub mod error;
pub mod flags;
pub mod forces;
pub mod grid;
pub mod inflow;
pub mod levelset;
pub mod noise;
pub mod pressure;
pub mod serde_utils;
pub mod snapshot;
pub mod stepper;
pub mod store;

pub use advection::{AdvectionOrder, OpenBounds};
pub use bake::{BakeCursor, BakeOutcome, Baker, CancelToken};
pub use config::{
    CombustionParams, DissolveParams, FeatureFlags, GuidingParams, NoiseParams, Preconditioner,
    PressureParams, SmokeConfig, TimingParams,
};
pub use error::{BakeError, ConfigError, SimError, SnapshotError};
pub use flags::{BoundaryMask, CellType, FlagGrid};
pub use glam::Vec3;
pub use grid::{GridDims, MacGrid, ScalarGrid, VecGrid};
pub use inflow::{Emitter, InflowMode};
pub use levelset::LevelSet;
pub use pressure::SolveStats;
pub use snapshot::{FileSnapshotStore, SnapshotFormat, SnapshotIo};
pub use stepper::{
    FrameInputs, FrameReport, GuideInput, InitialVelocity, SimulationContext, TimingOverride,
};
pub use store::{BaseStore, ColorGrids, FireGrids, GridRole, GridSet, GridTable, NoiseStore};

use crate::noise::NoiseStage;
use store::grid_table;

/// One smoke domain with its base grid, optional noise grid and clocks.
#[derive(Clone, Debug)]
pub struct SmokeSimulation {
    pub(crate) config: SmokeConfig,
    pub(crate) base: BaseStore,
    pub(crate) noise: Option<NoiseStore>,
    pub(crate) noise_stage: Option<NoiseStage>,
    pub(crate) base_ctx: SimulationContext,
    pub(crate) noise_ctx: SimulationContext,
    data_table: GridTable,
    noise_table: GridTable,
}

impl SmokeSimulation {
    /// Validate `config` and allocate every grid it asks for.
    pub fn new(config: SmokeConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        let dims = config.dims();
        let mut base = BaseStore::new(dims, &config.features);
        if let Some(colors) = base.colors.as_mut() {
            *colors = ColorGrids::from_density(&base.density, config.smoke_color);
        }

        let noise = config.noise_dims().map(|noise_dims| {
            let mut store = NoiseStore::new(noise_dims, dims, &config.features);
            if let Some(colors) = store.colors.as_mut() {
                *colors = ColorGrids::from_density(&store.density, config.smoke_color);
            }
            store
        });
        let noise_stage = config.features.noise.then(|| NoiseStage::new(&config.noise));

        log::info!(
            "smoke domain {}x{}x{} (dx = {}), noise {}",
            dims.nx,
            dims.ny,
            dims.nz,
            dims.cell_size,
            match &noise {
                Some(n) => format!("{}x{}x{}", n.dims().nx, n.dims().ny, n.dims().nz),
                None => "off".to_string(),
            }
        );

        Ok(Self {
            data_table: grid_table(GridSet::Data, &config.features),
            noise_table: grid_table(GridSet::Noise, &config.features),
            base_ctx: SimulationContext::new(&config.timing),
            noise_ctx: SimulationContext::new(&config.timing),
            config,
            base,
            noise,
            noise_stage,
        })
    }

    pub fn config(&self) -> &SmokeConfig {
        &self.config
    }

    pub fn dims(&self) -> &GridDims {
        self.base.dims()
    }

    pub fn base(&self) -> &BaseStore {
        &self.base
    }

    pub fn base_mut(&mut self) -> &mut BaseStore {
        &mut self.base
    }

    pub fn noise(&self) -> Option<&NoiseStore> {
        self.noise.as_ref()
    }

    pub fn noise_mut(&mut self) -> Option<&mut NoiseStore> {
        self.noise.as_mut()
    }

    pub fn context(&self) -> &SimulationContext {
        &self.base_ctx
    }

    pub fn noise_context(&self) -> &SimulationContext {
        &self.noise_ctx
    }

    /// Completed base frames.
    pub fn frame(&self) -> u32 {
        self.base_ctx.frame
    }

    /// Move both clocks to the end of `frame`, e.g. after loading its
    /// snapshot to resume a bake.
    pub fn set_frame(&mut self, frame: u32) {
        for ctx in [&mut self.base_ctx, &mut self.noise_ctx] {
            ctx.frame = frame;
            ctx.time = frame as f32 * ctx.frame_length;
        }
    }

    /// Obstacles present in every frame.
    pub fn set_static_obstacles(&mut self, phi: LevelSet) -> Result<(), SimError> {
        check_level_set("phi_obs_static", &phi, self.base.dims())?;
        self.base.phi_obs_static = phi;
        Ok(())
    }

    /// Outflow regions present in every frame.
    pub fn set_static_outflow(&mut self, phi: LevelSet) -> Result<(), SimError> {
        check_level_set("phi_out_static", &phi, self.base.dims())?;
        self.base.phi_out_static = phi;
        Ok(())
    }

    /// Persisted grid names of one set.
    pub fn grid_table(&self, set: GridSet) -> &[(&'static str, GridRole)] {
        match set {
            GridSet::Data => &self.data_table,
            GridSet::Noise => &self.noise_table,
        }
    }

    /// Largest divergence magnitude over fluid cells of the base grid.
    pub fn max_divergence(&mut self) -> f32 {
        pressure::compute_divergence(&self.base.flags, &self.base.vel, &mut self.base.divergence);
        self.base.divergence.max_abs()
    }

    /// Write the current frame of one grid set.
    pub fn save_snapshot(
        &self,
        io: &dyn SnapshotIo,
        set: GridSet,
        format: SnapshotFormat,
    ) -> Result<(), SnapshotError> {
        let frame = self.base_ctx.frame;
        match set {
            GridSet::Data => io.save(set, frame, format, &self.base, &self.data_table),
            GridSet::Noise => match &self.noise {
                Some(noise) => io.save(set, frame, format, noise, &self.noise_table),
                None => Ok(()),
            },
        }
    }

    /// Replace one grid set with its snapshot of `frame`. Nothing changes
    /// when any grid is missing or has the wrong size.
    pub fn load_snapshot(
        &mut self,
        io: &dyn SnapshotIo,
        set: GridSet,
        frame: u32,
        format: SnapshotFormat,
    ) -> Result<(), SnapshotError> {
        match set {
            GridSet::Data => io.load(set, frame, format, &mut self.base, &self.data_table),
            GridSet::Noise => match self.noise.as_mut() {
                Some(noise) => {
                    noise.ensure_uv(constants::NUM_UV_GRIDS);
                    io.load(set, frame, format, noise, &self.noise_table)
                }
                None => Ok(()),
            },
        }
    }
}

fn check_level_set(name: &'static str, phi: &LevelSet, dims: &GridDims) -> Result<(), SimError> {
    let (got, expected) = (phi.values().len(), dims.cell_count());
    if got != expected {
        return Err(SimError::InputShape {
            name,
            got,
            expected,
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_optional_grids_follow_features() {
        let mut config = SmokeConfig::cube(8, 1.0);
        config.features = FeatureFlags {
            heat: true,
            colors: false,
            fire: true,
            noise: true,
        };
        let sim = SmokeSimulation::new(config).unwrap();
        assert!(sim.base().heat.is_some());
        assert!(sim.base().fire.is_some());
        assert!(sim.base().colors.is_none());
        let noise = sim.noise().unwrap();
        assert!(noise.fire.is_some());
        assert!(noise.colors.is_none());
        assert_eq!(noise.dims().nx, 16);
    }

    #[test]
    fn test_invalid_config_is_rejected() {
        let mut config = SmokeConfig::cube(8, 1.0);
        config.cell_size = -1.0;
        assert!(SmokeSimulation::new(config).is_err());
    }

    #[test]
    fn test_static_obstacle_shape_checked() {
        let mut sim = SmokeSimulation::new(SmokeConfig::cube(8, 1.0)).unwrap();
        let wrong = LevelSet::empty(GridDims::new(4, 4, 4, 0.25));
        assert!(matches!(
            sim.set_static_obstacles(wrong),
            Err(SimError::InputShape { name: "phi_obs_static", .. })
        ));
    }

    #[test]
    fn test_set_frame_moves_both_clocks() {
        let mut sim = SmokeSimulation::new(SmokeConfig::cube(8, 1.0)).unwrap();
        sim.set_frame(12);
        assert_eq!(sim.frame(), 12);
        assert_eq!(sim.noise_context().frame, 12);
        assert!((sim.context().time - 0.5).abs() < 1e-5);
    }
}
