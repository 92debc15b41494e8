//! Cell classification and domain boundaries.
//!
//! The flag grid is never patched: `FlagGrid::rebuild` derives it from the
//! domain shell and the current level sets before every substep.

use std::fmt;
use std::str::FromStr;

use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::grid::GridDims;
use crate::levelset::LevelSet;

/// Cell classification driving which operators touch a cell.
#[derive(Clone, Copy, PartialEq, Eq, Debug, Default, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum CellType {
    /// Carries smoke; advected, forced and projected
    Fluid,
    /// Solid collider or closed domain wall
    Obstacle,
    /// Open boundary; zero pressure and values leave the domain
    Outflow,
    /// Not yet classified
    #[default]
    Empty,
}

/// Which of the six domain faces are open.
///
/// Mirrors the per-face border collision toggles: `true` lets smoke leave.
#[derive(Clone, Copy, PartialEq, Eq, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct BoundaryMask {
    pub x_min: bool,
    pub x_max: bool,
    pub y_min: bool,
    pub y_max: bool,
    pub z_min: bool,
    pub z_max: bool,
}

impl BoundaryMask {
    /// Every face closed.
    pub const CLOSED: Self = Self {
        x_min: false,
        x_max: false,
        y_min: false,
        y_max: false,
        z_min: false,
        z_max: false,
    };

    /// Every face open.
    pub const OPEN: Self = Self {
        x_min: true,
        x_max: true,
        y_min: true,
        y_max: true,
        z_min: true,
        z_max: true,
    };

    pub fn any_open(&self) -> bool {
        self.x_min || self.x_max || self.y_min || self.y_max || self.z_min || self.z_max
    }

    /// Whether the face of `axis` (0 = x, 1 = y, 2 = z) on the min or max side is open.
    pub fn is_open(&self, axis: usize, max_side: bool) -> bool {
        match (axis, max_side) {
            (0, false) => self.x_min,
            (0, true) => self.x_max,
            (1, false) => self.y_min,
            (1, true) => self.y_max,
            (2, false) => self.z_min,
            _ => self.z_max,
        }
    }
}

/// Compact form: a lowercase letter opens the min face, uppercase the max
/// face, e.g. `"xXY"` opens both x faces and the top.
impl FromStr for BoundaryMask {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut mask = Self::CLOSED;
        for c in s.chars() {
            match c {
                'x' => mask.x_min = true,
                'X' => mask.x_max = true,
                'y' => mask.y_min = true,
                'Y' => mask.y_max = true,
                'z' => mask.z_min = true,
                'Z' => mask.z_max = true,
                other => return Err(ConfigError::InvalidBoundaryFace(other)),
            }
        }
        Ok(mask)
    }
}

impl fmt::Display for BoundaryMask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let faces = [
            (self.x_min, 'x'),
            (self.x_max, 'X'),
            (self.y_min, 'y'),
            (self.y_max, 'Y'),
            (self.z_min, 'z'),
            (self.z_max, 'Z'),
        ];
        for (open, c) in faces {
            if open {
                write!(f, "{}", c)?;
            }
        }
        Ok(())
    }
}

/// Per-cell classification of one domain.
#[derive(Clone, Debug, PartialEq)]
pub struct FlagGrid {
    dims: GridDims,
    cells: Vec<CellType>,
}

impl FlagGrid {
    /// A grid with every cell Fluid and no walls.
    pub fn all_fluid(dims: GridDims) -> Self {
        Self {
            dims,
            cells: vec![CellType::Fluid; dims.cell_count()],
        }
    }

    /// Classify every cell from the domain shell and level sets.
    ///
    /// Shell cells within `boundary_width` of a face become Obstacle, or
    /// Outflow where the face is open. Inside the level sets, obstacles win
    /// over outflow, and everything left over is Fluid.
    pub fn rebuild(
        dims: GridDims,
        boundary_width: usize,
        open: &BoundaryMask,
        phi_obs: &LevelSet,
        phi_out: &LevelSet,
    ) -> Self {
        let mut cells = vec![CellType::Empty; dims.cell_count()];
        let obs = phi_obs.values();
        let out = phi_out.values();

        cells
            .par_chunks_mut(dims.slab())
            .enumerate()
            .for_each(|(k, slab)| {
                for j in 0..dims.ny {
                    for i in 0..dims.nx {
                        let idx = dims.cell_index(i, j, k);
                        slab[j * dims.nx + i] = if obs[idx] < 0.0 {
                            CellType::Obstacle
                        } else {
                            match shell_face(&dims, boundary_width, open, i, j, k) {
                                Some(true) => CellType::Outflow,
                                Some(false) => CellType::Obstacle,
                                None if out[idx] < 0.0 => CellType::Outflow,
                                None => CellType::Empty,
                            }
                        };
                    }
                }
            });

        for c in cells.iter_mut() {
            if *c == CellType::Empty {
                *c = CellType::Fluid;
            }
        }

        Self { dims, cells }
    }

    pub fn dims(&self) -> &GridDims {
        &self.dims
    }

    pub fn cells(&self) -> &[CellType] {
        &self.cells
    }

    #[inline]
    pub fn at(&self, idx: usize) -> CellType {
        self.cells[idx]
    }

    #[inline]
    pub fn get(&self, i: usize, j: usize, k: usize) -> CellType {
        self.cells[self.dims.cell_index(i, j, k)]
    }

    /// Cell type at signed indices; outside the domain counts as a wall.
    #[inline]
    pub fn get_signed(&self, i: i32, j: i32, k: i32) -> CellType {
        if self.dims.cell_in_bounds(i, j, k) {
            self.get(i as usize, j as usize, k as usize)
        } else {
            CellType::Obstacle
        }
    }

    #[inline]
    pub fn is_fluid(&self, i: usize, j: usize, k: usize) -> bool {
        self.get(i, j, k) == CellType::Fluid
    }

    #[inline]
    pub fn is_fluid_signed(&self, i: i32, j: i32, k: i32) -> bool {
        self.get_signed(i, j, k) == CellType::Fluid
    }

    #[inline]
    pub fn is_obstacle_signed(&self, i: i32, j: i32, k: i32) -> bool {
        self.get_signed(i, j, k) == CellType::Obstacle
    }

    /// True if every in-domain face neighbour is Fluid.
    pub fn fluid_neighborhood(&self, i: usize, j: usize, k: usize) -> bool {
        let (i, j, k) = (i as i32, j as i32, k as i32);
        self.is_fluid_signed(i - 1, j, k)
            && self.is_fluid_signed(i + 1, j, k)
            && self.is_fluid_signed(i, j - 1, k)
            && self.is_fluid_signed(i, j + 1, k)
            && self.is_fluid_signed(i, j, k - 1)
            && self.is_fluid_signed(i, j, k + 1)
    }

    /// Whether any cell holds a pressure reference (Outflow or Empty).
    pub fn has_pressure_reference(&self) -> bool {
        self.cells
            .iter()
            .any(|&c| matches!(c, CellType::Outflow | CellType::Empty))
    }

    pub fn count(&self, kind: CellType) -> usize {
        self.cells.iter().filter(|&&c| c == kind).count()
    }

    /// Copy with obstacles grown by `layers` cells into fluid.
    pub fn dilate_obstacles(&self, layers: usize) -> FlagGrid {
        let dims = self.dims;
        let mut cells = self.cells.clone();
        for _ in 0..layers {
            let prev = cells.clone();
            cells
                .par_chunks_mut(dims.slab())
                .enumerate()
                .for_each(|(k, slab)| {
                    for j in 0..dims.ny {
                        for i in 0..dims.nx {
                            let c = &mut slab[j * dims.nx + i];
                            if *c != CellType::Fluid {
                                continue;
                            }
                            let touches = crate::levelset::neighbors6(&dims, i, j, k)
                                .any(|n| prev[n] == CellType::Obstacle);
                            if touches {
                                *c = CellType::Obstacle;
                            }
                        }
                    }
                });
        }
        FlagGrid { dims, cells }
    }

    /// Raw bytes of the classification, for equality checks and hashing.
    pub fn as_bytes(&self) -> Vec<u8> {
        self.cells.iter().map(|&c| c as u8).collect()
    }
}

/// `Some(open)` if (i, j, k) lies in the boundary shell, `None` for interior
/// cells. A cell on several shell faces is open if any of them is.
fn shell_face(
    dims: &GridDims,
    width: usize,
    open: &BoundaryMask,
    i: usize,
    j: usize,
    k: usize,
) -> Option<bool> {
    let coords = [(i, dims.nx), (j, dims.ny), (k, dims.nz)];
    let mut in_shell = false;
    let mut is_open = false;
    for (axis, &(c, n)) in coords.iter().enumerate() {
        if c < width {
            in_shell = true;
            is_open |= open.is_open(axis, false);
        }
        if c + width >= n {
            in_shell = true;
            is_open |= open.is_open(axis, true);
        }
    }
    in_shell.then_some(is_open)
}
