//! Semi-Lagrangian transport of grid fields.
//!
//! Every fluid sample is traced backward through the velocity field over one
//! substep and the source field is interpolated at the departure point.
//! Non-fluid samples keep their value. Each pass writes into a fresh buffer
//! that replaces the field only once the whole pass is done.

use glam::Vec3;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::flags::{BoundaryMask, CellType, FlagGrid};
use crate::grid::{trilinear_bounded, Axis, CellValue, Field, MacGrid};

/// Interpolation order of the back-trace.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AdvectionOrder {
    /// First order; most diffusive, never overshoots
    SemiLagrange,
    /// Second order forward/backward correction, clamped against overshoot
    #[default]
    MacCormack,
}

/// Open domain faces through which values may leave.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct OpenBounds {
    pub mask: BoundaryMask,
    pub width: usize,
}

/// Departure point of a sample at grid-space `p`, clamped to the domain.
#[inline]
fn trace(vel: &MacGrid, p: Vec3, dt_cells: f32) -> Vec3 {
    vel.dims().clamp_position(p - vel.sample(p) * dt_cells)
}

// ========== Cell-centred fields ==========

/// Advect a cell-centred field through `vel` over `dt` seconds.
///
/// With `open` set, values that end up in Outflow cells are cleared.
pub fn advect_field<T: CellValue>(
    flags: &FlagGrid,
    vel: &MacGrid,
    field: &mut Field<T>,
    dt: f32,
    order: AdvectionOrder,
    open: Option<&OpenBounds>,
) {
    let dims = *field.dims();
    let dt_cells = dt / dims.cell_size;

    let fwd = semi_lagrange(flags, vel, field, dt_cells);
    let mut result = match order {
        AdvectionOrder::SemiLagrange => fwd,
        AdvectionOrder::MacCormack => {
            let fwd_field = Field::with_data(dims, fwd);
            let bwd = semi_lagrange(flags, vel, &fwd_field, -dt_cells);
            maccormack_correct(flags, vel, field, fwd_field.data(), &bwd, dt_cells)
        }
    };

    if open.is_some() {
        for (value, &cell) in result.iter_mut().zip(flags.cells()) {
            if cell == CellType::Outflow {
                *value = T::default();
            }
        }
    }
    field.replace_data(result);
}

fn semi_lagrange<T: CellValue>(
    flags: &FlagGrid,
    vel: &MacGrid,
    src: &Field<T>,
    dt_cells: f32,
) -> Vec<T> {
    let dims = *src.dims();
    let mut out = src.data().to_vec();
    out.par_chunks_mut(dims.slab())
        .enumerate()
        .for_each(|(k, slab)| {
            for j in 0..dims.ny {
                for i in 0..dims.nx {
                    if flags.is_fluid(i, j, k) {
                        let p = trace(vel, dims.cell_center(i, j, k), dt_cells);
                        slab[j * dims.nx + i] = src.sample(p);
                    }
                }
            }
        });
    out
}

fn maccormack_correct<T: CellValue>(
    flags: &FlagGrid,
    vel: &MacGrid,
    orig: &Field<T>,
    fwd: &[T],
    bwd: &[T],
    dt_cells: f32,
) -> Vec<T> {
    let dims = *orig.dims();
    let mut out = fwd.to_vec();
    out.par_chunks_mut(dims.slab())
        .enumerate()
        .for_each(|(k, slab)| {
            for j in 0..dims.ny {
                for i in 0..dims.nx {
                    // Near walls the backward trace is unreliable; keep first order
                    if !flags.is_fluid(i, j, k) || !flags.fluid_neighborhood(i, j, k) {
                        continue;
                    }
                    let idx = dims.cell_index(i, j, k);
                    let corrected = fwd[idx] + (orig.data()[idx] - bwd[idx]) * 0.5;
                    let p = trace(vel, dims.cell_center(i, j, k), dt_cells);
                    let (_, lo, hi) = orig.sample_bounded(p);
                    slab[j * dims.nx + i] = corrected.max_of(lo).min_of(hi);
                }
            }
        });
    out
}

// ========== Staggered velocity ==========

#[inline]
fn face_is_fluid(flags: &FlagGrid, axis: Axis, i: usize, j: usize, k: usize) -> bool {
    let (a, b) = axis.face_cells(i, j, k);
    flags.is_fluid_signed(a.0, a.1, a.2) || flags.is_fluid_signed(b.0, b.1, b.2)
}

fn face_has_fluid_neighborhood(flags: &FlagGrid, axis: Axis, i: usize, j: usize, k: usize) -> bool {
    let (a, b) = axis.face_cells(i, j, k);
    let inner = |c: (i32, i32, i32)| {
        flags.is_fluid_signed(c.0, c.1, c.2)
            && flags.fluid_neighborhood(c.0 as usize, c.1 as usize, c.2 as usize)
    };
    inner(a) && inner(b)
}

/// Semi-Lagrangian pass over one velocity component of `src`.
fn semi_lagrange_faces(
    flags: &FlagGrid,
    vel: &MacGrid,
    src: &MacGrid,
    axis: Axis,
    dt_cells: f32,
) -> Vec<f32> {
    let (data, size) = (src.component(axis), src.size(axis));
    let offset = axis.node_offset();
    let mut out = data.to_vec();
    out.par_chunks_mut(size[0] * size[1])
        .enumerate()
        .for_each(|(k, slab)| {
            for j in 0..size[1] {
                for i in 0..size[0] {
                    if !face_is_fluid(flags, axis, i, j, k) {
                        continue;
                    }
                    let p = Vec3::new(i as f32, j as f32, k as f32) + offset;
                    let q = trace(vel, p, dt_cells) - offset;
                    slab[j * size[0] + i] = trilinear_bounded(data, size, q.x, q.y, q.z).0;
                }
            }
        });
    out
}

/// Self-advect the velocity field over `dt` seconds.
///
/// With `open` set, the normal component on open faces is given a zero
/// gradient so flow can leave the domain.
pub fn advect_velocity(
    flags: &FlagGrid,
    vel: &mut MacGrid,
    dt: f32,
    order: AdvectionOrder,
    open: Option<&OpenBounds>,
) {
    let dims = *vel.dims();
    let dt_cells = dt / dims.cell_size;

    let src: &MacGrid = vel;
    let mut fwd = MacGrid::new(dims);
    for axis in Axis::ALL {
        let values = semi_lagrange_faces(flags, src, src, axis, dt_cells);
        *fwd.component_mut(axis) = values;
    }

    let result = match order {
        AdvectionOrder::SemiLagrange => fwd,
        AdvectionOrder::MacCormack => {
            let mut bwd = MacGrid::new(dims);
            for axis in Axis::ALL {
                let values = semi_lagrange_faces(flags, src, &fwd, axis, -dt_cells);
                *bwd.component_mut(axis) = values;
            }
            let mut corrected = MacGrid::new(dims);
            for axis in Axis::ALL {
                let values = maccormack_faces(flags, src, &fwd, &bwd, axis, dt_cells);
                *corrected.component_mut(axis) = values;
            }
            corrected
        }
    };
    vel.copy_from(&result);

    if let Some(open) = open {
        apply_open_velocity(vel, open);
    }
}

fn maccormack_faces(
    flags: &FlagGrid,
    orig: &MacGrid,
    fwd: &MacGrid,
    bwd: &MacGrid,
    axis: Axis,
    dt_cells: f32,
) -> Vec<f32> {
    let (orig_data, size) = (orig.component(axis), orig.size(axis));
    let fwd_data = fwd.component(axis);
    let bwd_data = bwd.component(axis);
    let offset = axis.node_offset();
    let mut out = fwd_data.to_vec();
    out.par_chunks_mut(size[0] * size[1])
        .enumerate()
        .for_each(|(k, slab)| {
            for j in 0..size[1] {
                for i in 0..size[0] {
                    if !face_has_fluid_neighborhood(flags, axis, i, j, k) {
                        continue;
                    }
                    let idx = (k * size[1] + j) * size[0] + i;
                    let corrected = fwd_data[idx] + 0.5 * (orig_data[idx] - bwd_data[idx]);
                    let p = Vec3::new(i as f32, j as f32, k as f32) + offset;
                    let q = trace(orig, p, dt_cells) - offset;
                    let (_, lo, hi) = trilinear_bounded(orig_data, size, q.x, q.y, q.z);
                    slab[j * size[0] + i] = corrected.clamp(lo, hi);
                }
            }
        });
    out
}

/// Copy the first interior normal velocity outward across each open face.
pub fn apply_open_velocity(vel: &mut MacGrid, open: &OpenBounds) {
    let dims = *vel.dims();
    let w = open.width;
    let n = [dims.nx, dims.ny, dims.nz];

    for axis in Axis::ALL {
        let a = axis.index();
        if n[a] <= 2 * w + 1 {
            continue;
        }
        let size = vel.size(axis);
        let data = vel.component_mut(axis);
        let index = |c: [usize; 3]| (c[2] * size[1] + c[1]) * size[0] + c[0];
        let (b1, b2) = ((a + 1) % 3, (a + 2) % 3);

        for s in 0..size[b2] {
            for t in 0..size[b1] {
                let mut c = [0usize; 3];
                c[b1] = t;
                c[b2] = s;
                if open.mask.is_open(a, false) {
                    c[a] = w + 1;
                    let inner = data[index(c)];
                    for face in 0..=w {
                        c[a] = face;
                        data[index(c)] = inner;
                    }
                }
                if open.mask.is_open(a, true) {
                    c[a] = n[a] - w - 1;
                    let inner = data[index(c)];
                    for face in (n[a] - w)..=n[a] {
                        c[a] = face;
                        data[index(c)] = inner;
                    }
                }
            }
        }
    }
}
