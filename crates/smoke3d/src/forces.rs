//! Body forces and velocity boundary conditions.
//!
//! Applied in a fixed order every substep, between advection and the
//! pressure solve. Accelerations are in world units per second squared and
//! are integrated over `dt` here.

use glam::Vec3;
use rayon::prelude::*;

use crate::config::DissolveParams;
use crate::flags::{CellType, FlagGrid};
use crate::grid::{Axis, GridDims, MacGrid, ScalarGrid, VecGrid};
use crate::levelset::LevelSet;

/// Zero a field inside Outflow cells.
pub fn reset_outflow(flags: &FlagGrid, field: &mut ScalarGrid) {
    field
        .data_mut()
        .par_iter_mut()
        .zip(flags.cells().par_iter())
        .for_each(|(value, &cell)| {
            if cell == CellType::Outflow {
                *value = 0.0;
            }
        });
}

/// Add cell-centred accelerations to the faces between two fluid cells.
pub fn add_force_field(flags: &FlagGrid, vel: &mut MacGrid, force: &VecGrid, dt: f32) {
    for axis in Axis::ALL {
        vel.map_component(axis, |i, j, k, old| {
            let (a, b) = axis.face_cells(i, j, k);
            if flags.is_fluid_signed(a.0, a.1, a.2) && flags.is_fluid_signed(b.0, b.1, b.2) {
                let fa = force.get(a.0 as usize, a.1 as usize, a.2 as usize);
                let fb = force.get(b.0 as usize, b.1 as usize, b.2 as usize);
                old + 0.5 * axis.of(fa + fb) * dt
            } else {
                old
            }
        });
    }
}

/// Buoyancy from a scalar field: `dv = -gravity * coefficient * field * dt`.
///
/// Positive coefficients push against gravity.
pub fn add_buoyancy(
    flags: &FlagGrid,
    vel: &mut MacGrid,
    field: &ScalarGrid,
    coefficient: f32,
    gravity: Vec3,
    dt: f32,
) {
    if coefficient == 0.0 {
        return;
    }
    let accel = -gravity * coefficient;
    for axis in Axis::ALL {
        let g = axis.of(accel);
        if g == 0.0 {
            continue;
        }
        vel.map_component(axis, |i, j, k, old| {
            let (a, b) = axis.face_cells(i, j, k);
            if flags.is_fluid_signed(a.0, a.1, a.2) && flags.is_fluid_signed(b.0, b.1, b.2) {
                let fa = field.get(a.0 as usize, a.1 as usize, a.2 as usize);
                let fb = field.get(b.0 as usize, b.1 as usize, b.2 as usize);
                old + 0.5 * (fa + fb) * g * dt
            } else {
                old
            }
        });
    }
}

/// Central difference of a cell-centred field along one axis, one-sided at
/// the domain edge. Returns the derivative per world unit.
fn gradient_along<T>(dims: &GridDims, data: &[T], i: usize, j: usize, k: usize, axis: Axis) -> T
where
    T: crate::grid::CellValue,
{
    let n = [dims.nx, dims.ny, dims.nz][axis.index()];
    let c = [i, j, k];
    let at = |m: usize| {
        let mut q = c;
        q[axis.index()] = m;
        data[dims.cell_index(q[0], q[1], q[2])]
    };
    let lo = c[axis.index()].saturating_sub(1);
    let hi = (c[axis.index()] + 1).min(n - 1);
    if hi == lo {
        return T::default();
    }
    (at(hi) - at(lo)) * (1.0 / ((hi - lo) as f32 * dims.cell_size))
}

/// Vorticity confinement: `f = strength * dx * (N x w)` with `N` the
/// normalized gradient of `|w|`.
pub fn vorticity_confinement(flags: &FlagGrid, vel: &mut MacGrid, strength: f32, dt: f32) {
    if strength == 0.0 {
        return;
    }
    let dims = *vel.dims();
    let centered = vel.to_centered();
    let c = centered.data();

    let curl: Vec<Vec3> = (0..dims.cell_count())
        .into_par_iter()
        .map(|idx| {
            if flags.at(idx) != CellType::Fluid {
                return Vec3::ZERO;
            }
            let (i, j, k) = dims.cell_coords(idx);
            let dx = gradient_along(&dims, c, i, j, k, Axis::X);
            let dy = gradient_along(&dims, c, i, j, k, Axis::Y);
            let dz = gradient_along(&dims, c, i, j, k, Axis::Z);
            Vec3::new(dy.z - dz.y, dz.x - dx.z, dx.y - dy.x)
        })
        .collect();
    let magnitude: Vec<f32> = curl.iter().map(|w| w.length()).collect();

    let force: Vec<Vec3> = (0..dims.cell_count())
        .into_par_iter()
        .map(|idx| {
            if flags.at(idx) != CellType::Fluid {
                return Vec3::ZERO;
            }
            let (i, j, k) = dims.cell_coords(idx);
            let grad = Vec3::new(
                gradient_along(&dims, &magnitude, i, j, k, Axis::X),
                gradient_along(&dims, &magnitude, i, j, k, Axis::Y),
                gradient_along(&dims, &magnitude, i, j, k, Axis::Z),
            );
            let len = grad.length();
            if len < 1e-6 {
                return Vec3::ZERO;
            }
            (grad / len).cross(curl[idx]) * (strength * dims.cell_size)
        })
        .collect();

    add_force_field(flags, vel, &VecGrid::with_data(dims, force), dt);
}

/// Fill the obstacle interior and a thin outer band with obstacle velocity.
///
/// Values on the inner surface band (within one cell of the surface) seed
/// the fill: `inside_layers` layers grow inward, then `outside_layers`
/// layers grow out into the fluid.
pub fn extrapolate_obstacle_velocity(
    phi_obs: &LevelSet,
    obvel: &mut VecGrid,
    inside_layers: usize,
    outside_layers: usize,
) {
    let dx = phi_obs.dims().cell_size;
    let phi = phi_obs.values();
    let inside: Vec<bool> = phi.iter().map(|&d| d < 0.0).collect();
    let band: Vec<bool> = phi.iter().map(|&d| d < 0.0 && d >= -dx).collect();
    let outside: Vec<bool> = inside.iter().map(|&s| !s).collect();

    obvel.extrapolate(&band, &inside, inside_layers);
    obvel.extrapolate(&inside, &outside, outside_layers);
}

/// Average a cell-centred vector field onto faces.
pub fn resample_to_mac(cell: &VecGrid, mac: &mut MacGrid) {
    let dims = *cell.dims();
    for axis in Axis::ALL {
        mac.map_component(axis, |i, j, k, _| {
            let (a, b) = axis.face_cells(i, j, k);
            let mut sum = 0.0;
            let mut count = 0;
            for c in [a, b] {
                if dims.cell_in_bounds(c.0, c.1, c.2) {
                    sum += axis.of(cell.get(c.0 as usize, c.1 as usize, c.2 as usize));
                    count += 1;
                }
            }
            if count > 0 {
                sum / count as f32
            } else {
                0.0
            }
        });
    }
}

/// Overwrite faces of masked cells with the initial velocity.
///
/// A face shared by two masked cells takes their average.
pub fn set_initial_velocity(vel: &mut MacGrid, initial: &VecGrid, mask: &[bool]) {
    let dims = *initial.dims();
    for axis in Axis::ALL {
        vel.map_component(axis, |i, j, k, old| {
            let (a, b) = axis.face_cells(i, j, k);
            let mut sum = 0.0;
            let mut count = 0;
            for c in [a, b] {
                if dims.cell_in_bounds(c.0, c.1, c.2) {
                    let idx = dims.cell_index(c.0 as usize, c.1 as usize, c.2 as usize);
                    if mask[idx] {
                        sum += axis.of(initial.data()[idx]);
                        count += 1;
                    }
                }
            }
            if count > 0 {
                sum / count as f32
            } else {
                old
            }
        });
    }
}

/// Set the normal velocity on faces between fluid and obstacle cells to the
/// obstacle's velocity (zero for static walls).
pub fn set_wall_bcs(flags: &FlagGrid, vel: &mut MacGrid, obvel: Option<&MacGrid>) {
    for axis in Axis::ALL {
        let wall = obvel.map(|o| o.component(axis));
        let size = vel.size(axis);
        vel.map_component(axis, |i, j, k, old| {
            let (a, b) = axis.face_cells(i, j, k);
            let a_type = flags.get_signed(a.0, a.1, a.2);
            let b_type = flags.get_signed(b.0, b.1, b.2);
            let touches_fluid = a_type == CellType::Fluid || b_type == CellType::Fluid;
            let touches_wall = a_type == CellType::Obstacle || b_type == CellType::Obstacle;
            if touches_fluid && touches_wall {
                wall.map_or(0.0, |w| w[(k * size[1] + j) * size[0] + i])
            } else {
                old
            }
        });
    }
}

/// Remove smoke gradually. `fraction` is the part of a frame this substep
/// covers, so the decay rate does not depend on the substep count.
///
/// Colors are rescaled with density so they keep their hue; heat decays the
/// same way as density.
pub fn dissolve(
    flags: &FlagGrid,
    density: &mut ScalarGrid,
    heat: Option<&mut ScalarGrid>,
    colors: &mut [&mut ScalarGrid],
    params: &DissolveParams,
    fraction: f32,
) {
    let speed = params.speed.max(1.0);
    let log_factor = (1.0 - 1.0 / speed).powf(fraction);
    let linear_step = fraction / speed;
    let decay = |value: f32| -> f32 {
        if params.logarithmic {
            value * log_factor
        } else {
            (value.abs() - linear_step).max(0.0) * value.signum()
        }
    };

    let before = density.data().to_vec();
    density
        .data_mut()
        .par_iter_mut()
        .zip(flags.cells().par_iter())
        .for_each(|(d, &cell)| {
            if cell == CellType::Fluid {
                *d = decay(*d).max(0.0);
            }
        });

    if let Some(heat) = heat {
        heat.data_mut()
            .par_iter_mut()
            .zip(flags.cells().par_iter())
            .for_each(|(h, &cell)| {
                if cell == CellType::Fluid {
                    *h = decay(*h);
                }
            });
    }

    let after = density.data();
    for channel in colors.iter_mut() {
        channel
            .data_mut()
            .par_iter_mut()
            .enumerate()
            .for_each(|(idx, c)| {
                if before[idx] > 0.0 {
                    *c *= after[idx] / before[idx];
                }
            });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::flags::BoundaryMask;

    fn closed(dims: GridDims) -> FlagGrid {
        let empty = LevelSet::empty(dims);
        FlagGrid::rebuild(dims, 1, &BoundaryMask::CLOSED, &empty, &empty)
    }

    #[test]
    fn test_buoyancy_lifts_dense_smoke() {
        let dims = GridDims::new(8, 8, 8, 0.1);
        let flags = closed(dims);
        let mut vel = MacGrid::new(dims);
        let mut density = ScalarGrid::new(dims);
        density.set(4, 4, 4, 1.0);
        add_buoyancy(&flags, &mut vel, &density, 1.0, Vec3::new(0.0, -9.81, 0.0), 0.1);

        let above = vel.v[dims.v_index(4, 5, 4)];
        let below = vel.v[dims.v_index(4, 4, 4)];
        assert!(above > 0.0 && below > 0.0, "smoke should rise: {} {}", above, below);
        assert!((above - 0.5 * 9.81 * 0.1).abs() < 1e-5);
        assert!(vel.u.iter().all(|&u| u == 0.0));
    }

    #[test]
    fn test_wall_bcs_zero_normal_velocity() {
        let dims = GridDims::new(6, 6, 6, 1.0);
        let flags = closed(dims);
        let mut vel = MacGrid::uniform(dims, Vec3::ONE);
        set_wall_bcs(&flags, &mut vel, None);
        // Face between shell cell 0 and fluid cell 1
        assert_eq!(vel.u[dims.u_index(1, 3, 3)], 0.0);
        assert_eq!(vel.u[dims.u_index(5, 3, 3)], 0.0);
        // Interior face untouched
        assert_eq!(vel.u[dims.u_index(3, 3, 3)], 1.0);
    }

    #[test]
    fn test_wall_bcs_take_obstacle_velocity() {
        let dims = GridDims::new(6, 6, 6, 1.0);
        let flags = closed(dims);
        let mut vel = MacGrid::new(dims);
        let obvel = MacGrid::uniform(dims, Vec3::new(0.0, 2.0, 0.0));
        set_wall_bcs(&flags, &mut vel, Some(&obvel));
        assert_eq!(vel.v[dims.v_index(3, 1, 3)], 2.0);
        assert_eq!(vel.v[dims.v_index(3, 3, 3)], 0.0);
    }

    #[test]
    fn test_obstacle_velocity_fills_interior_and_one_layer_out() {
        let dims = GridDims::new(12, 12, 12, 1.0);
        let phi = LevelSet::from_box(dims, Vec3::splat(3.0), Vec3::splat(9.0));
        let mut obvel = VecGrid::new(dims);
        // Only the surface band knows the velocity
        for idx in 0..dims.cell_count() {
            let d = phi.values()[idx];
            if d < 0.0 && d >= -1.0 {
                obvel.data_mut()[idx] = Vec3::X;
            }
        }
        extrapolate_obstacle_velocity(&phi, &mut obvel, dims.max_res() / 2, 1);
        assert_eq!(obvel.get(6, 6, 6), Vec3::X, "deep interior filled");
        assert_eq!(obvel.get(2, 6, 6), Vec3::X, "one layer outside filled");
        assert_eq!(obvel.get(1, 6, 6), Vec3::ZERO, "two layers outside untouched");
    }

    #[test]
    fn test_initial_velocity_only_on_masked_faces() {
        let dims = GridDims::new(6, 6, 6, 1.0);
        let mut vel = MacGrid::new(dims);
        let initial = VecGrid::filled(dims, Vec3::new(3.0, 0.0, 0.0));
        let mut mask = vec![false; dims.cell_count()];
        mask[dims.cell_index(2, 2, 2)] = true;
        set_initial_velocity(&mut vel, &initial, &mask);
        assert_eq!(vel.u[dims.u_index(2, 2, 2)], 3.0);
        assert_eq!(vel.u[dims.u_index(3, 2, 2)], 3.0);
        assert_eq!(vel.u[dims.u_index(4, 2, 2)], 0.0);
    }

    #[test]
    fn test_vorticity_confinement_is_noop_without_rotation() {
        let dims = GridDims::new(8, 8, 8, 0.5);
        let flags = closed(dims);
        let mut vel = MacGrid::uniform(dims, Vec3::new(1.0, 0.0, 0.0));
        let before = vel.clone();
        vorticity_confinement(&flags, &mut vel, 2.0, 0.1);
        assert_eq!(vel, before);
    }

    #[test]
    fn test_linear_dissolve_keeps_color_ratio() {
        let dims = GridDims::new(4, 4, 4, 1.0);
        let flags = FlagGrid::all_fluid(dims);
        let mut density = ScalarGrid::filled(dims, 1.0);
        let mut red = ScalarGrid::filled(dims, 0.5);
        let params = DissolveParams {
            enabled: true,
            speed: 4.0,
            logarithmic: false,
        };
        dissolve(&flags, &mut density, None, &mut [&mut red], &params, 1.0);
        assert!((density.get(1, 1, 1) - 0.75).abs() < 1e-6);
        assert!((red.get(1, 1, 1) - 0.375).abs() < 1e-6);
    }

    #[test]
    fn test_log_dissolve_is_substep_independent() {
        let dims = GridDims::new(4, 4, 4, 1.0);
        let flags = FlagGrid::all_fluid(dims);
        let params = DissolveParams {
            enabled: true,
            speed: 5.0,
            logarithmic: true,
        };
        let mut once = ScalarGrid::filled(dims, 1.0);
        dissolve(&flags, &mut once, None, &mut [], &params, 1.0);
        let mut split = ScalarGrid::filled(dims, 1.0);
        for _ in 0..4 {
            dissolve(&flags, &mut split, None, &mut [], &params, 0.25);
        }
        assert!((once.get(0, 0, 0) - 0.8).abs() < 1e-6);
        assert!((once.get(0, 0, 0) - split.get(0, 0, 0)).abs() < 1e-5);
    }
}
