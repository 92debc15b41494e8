//! Kinetic energy and its high-frequency band.

use rayon::prelude::*;

use crate::constants::{ENERGY_EXTRAPOLATION, OBSTACLE_DILATION};
use crate::flags::{CellType, FlagGrid};
use crate::grid::{GridDims, MacGrid, ScalarGrid};

/// `½|v|²` at fluid cells, zero elsewhere.
pub fn compute_energy(flags: &FlagGrid, vel: &MacGrid, energy: &mut ScalarGrid) {
    let dims = *vel.dims();
    energy
        .data_mut()
        .par_iter_mut()
        .enumerate()
        .for_each(|(idx, e)| {
            *e = if flags.at(idx) == CellType::Fluid {
                let (i, j, k) = dims.cell_coords(idx);
                0.5 * vel.centered(i, j, k).length_squared()
            } else {
                0.0
            };
        });
}

/// Carry energy into the cells next to obstacles so noise does not fade out
/// along walls. Obstacles are first grown into the fluid, then the energy of
/// the remaining fluid is extrapolated into the grown region.
pub fn extrapolate_energy(flags: &FlagGrid, energy: &mut ScalarGrid) {
    let grown = flags.dilate_obstacles(OBSTACLE_DILATION);
    let valid: Vec<bool> = grown.cells().iter().map(|&c| c == CellType::Fluid).collect();
    let region: Vec<bool> = grown.cells().iter().map(|&c| c == CellType::Obstacle).collect();
    energy.extrapolate(&valid, &region, ENERGY_EXTRAPOLATION);
}

/// Half-resolution box average.
fn downsample(fine: &ScalarGrid) -> ScalarGrid {
    let dims = *fine.dims();
    let coarse_dims = GridDims::new(
        dims.nx.div_ceil(2),
        dims.ny.div_ceil(2),
        dims.nz.div_ceil(2),
        dims.cell_size * 2.0,
    );
    let data = (0..coarse_dims.cell_count())
        .into_par_iter()
        .map(|idx| {
            let (ci, cj, ck) = coarse_dims.cell_coords(idx);
            let mut sum = 0.0;
            let mut count = 0;
            for k in 2 * ck..(2 * ck + 2).min(dims.nz) {
                for j in 2 * cj..(2 * cj + 2).min(dims.ny) {
                    for i in 2 * ci..(2 * ci + 2).min(dims.nx) {
                        sum += fine.get(i, j, k);
                        count += 1;
                    }
                }
            }
            sum / count as f32
        })
        .collect();
    ScalarGrid::with_data(coarse_dims, data)
}

/// Replace energy by its wavelet coefficient `sqrt(2·|e - up(down(e))|)`.
pub fn compute_wavelet_coefficients(energy: &mut ScalarGrid) {
    let coarse = downsample(energy);
    let mut smooth = ScalarGrid::new(*energy.dims());
    smooth.interpolate_from(&coarse);
    energy
        .data_mut()
        .par_iter_mut()
        .zip(smooth.data().par_iter())
        .for_each(|(e, &s)| *e = (2.0 * (*e - s).abs()).sqrt());
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::flags::BoundaryMask;
    use crate::levelset::LevelSet;
    use glam::Vec3;

    #[test]
    fn test_energy_of_uniform_flow() {
        let dims = GridDims::new(4, 4, 4, 1.0);
        let flags = FlagGrid::all_fluid(dims);
        let vel = MacGrid::uniform(dims, Vec3::new(3.0, 4.0, 0.0));
        let mut e = ScalarGrid::new(dims);
        compute_energy(&flags, &vel, &mut e);
        assert!((e.get(2, 2, 2) - 12.5).abs() < 1e-5);
    }

    #[test]
    fn test_smooth_field_has_no_detail() {
        let dims = GridDims::new(8, 8, 8, 1.0);
        let mut e = ScalarGrid::filled(dims, 0.7);
        compute_wavelet_coefficients(&mut e);
        assert!(e.max_abs() < 1e-3, "constant energy gave coefficient {}", e.max_abs());
    }

    #[test]
    fn test_checkerboard_is_all_detail() {
        let dims = GridDims::new(8, 8, 8, 1.0);
        let data = (0..dims.cell_count())
            .map(|idx| {
                let (i, j, k) = dims.cell_coords(idx);
                ((i + j + k) % 2) as f32
            })
            .collect();
        let mut e = ScalarGrid::from_vec(dims, data).unwrap();
        compute_wavelet_coefficients(&mut e);
        assert!(e.get(3, 3, 3) > 0.5);
    }

    #[test]
    fn test_energy_reaches_into_walls() {
        let dims = GridDims::new(12, 12, 12, 1.0);
        let empty = LevelSet::empty(dims);
        let flags = FlagGrid::rebuild(dims, 1, &BoundaryMask::CLOSED, &empty, &empty);
        let vel = MacGrid::uniform(dims, Vec3::X);
        let mut e = ScalarGrid::new(dims);
        compute_energy(&flags, &vel, &mut e);
        assert_eq!(e.get(0, 6, 6), 0.0, "wall cells start without energy");
        extrapolate_energy(&flags, &mut e);
        assert!((e.get(0, 6, 6) - 0.5).abs() < 1e-6, "shell got {}", e.get(0, 6, 6));
        assert!((e.get(1, 6, 6) - 0.5).abs() < 1e-6);
    }
}
