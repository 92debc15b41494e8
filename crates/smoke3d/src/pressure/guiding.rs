//! Guided pressure projection.
//!
//! Finds the divergence-free velocity closest to the simulated one whose
//! low-frequency part follows a target velocity:
//!
//! ```text
//! min_x  ½|x - v0|²  +  Σ_f ½ w_f (K x - z)_f²    subject to div(x) = 0
//! ```
//!
//! `K` is a normalized box blur, `z` the target and `w` a per-face weight.
//! Solved with the Chambolle-Pock primal-dual iteration; every primal step
//! is a plain pressure projection.

use rayon::prelude::*;

use super::{project_with, PoissonSystem, SolveStats};
use crate::config::{GuidingParams, PressureParams};
use crate::flags::FlagGrid;
use crate::forces::set_wall_bcs;
use crate::grid::{Axis, MacGrid, ScalarGrid};

/// Weights at or below this switch guiding off for a face.
const WEIGHT_EPSILON: f32 = 1e-6;

/// Velocity the flow is steered toward and how strongly, per cell.
#[derive(Clone, Copy, Debug)]
pub struct GuideTarget<'a> {
    pub velocity: &'a MacGrid,
    pub weight: &'a ScalarGrid,
}

/// Zero-padded box blur of radius `radius` over one face array, divided by
/// `(2r+1)³`. Separable, so it is its own adjoint.
pub(crate) fn box_blur(data: &[f32], size: [usize; 3], radius: usize) -> Vec<f32> {
    if radius == 0 {
        return data.to_vec();
    }
    let mut src = data.to_vec();
    let mut dst = vec![0.0f32; data.len()];
    let strides = [1, size[0], size[0] * size[1]];

    for axis in 0..3 {
        let n = size[axis];
        let stride = strides[axis];
        let src_ref = &src;
        dst.par_iter_mut().enumerate().for_each(|(idx, out)| {
            let c = (idx / stride) % n;
            let lo = c.saturating_sub(radius);
            let hi = (c + radius).min(n - 1);
            let base = idx - c * stride;
            let mut sum = 0.0;
            for m in lo..=hi {
                sum += src_ref[base + m * stride];
            }
            *out = sum;
        });
        std::mem::swap(&mut src, &mut dst);
    }

    let norm = 1.0 / ((2 * radius + 1) as f32).powi(3);
    src.par_iter_mut().for_each(|v| *v *= norm);
    src
}

fn blur_mac(vel: &MacGrid, radius: usize) -> MacGrid {
    let mut out = vel.clone();
    for axis in Axis::ALL {
        let blurred = box_blur(vel.component(axis), vel.size(axis), radius);
        out.component_mut(axis).copy_from_slice(&blurred);
    }
    out
}

fn face_weights(vel: &MacGrid, weight: &ScalarGrid) -> MacGrid {
    let mut out = vel.clone();
    for axis in Axis::ALL {
        let offset = axis.node_offset();
        out.map_component(axis, |i, j, k, _| {
            let p = glam::Vec3::new(i as f32, j as f32, k as f32) + offset;
            weight.sample(p)
        });
    }
    out
}

fn max_abs_mac(vel: &MacGrid) -> f32 {
    Axis::ALL
        .iter()
        .map(|&a| {
            vel.component(a)
                .par_iter()
                .map(|v| v.abs())
                .reduce(|| 0.0, f32::max)
        })
        .fold(0.0, f32::max)
}

/// Guided projection of `vel`.
///
/// Returns the outer iteration statistics; `residual` is the last relative
/// primal change. The result is always the output of a full projection, with
/// obstacle faces pinned to `obvel` (zero when `None`).
pub fn solve_guided(
    flags: &FlagGrid,
    vel: &mut MacGrid,
    pressure: &mut ScalarGrid,
    guide: GuideTarget<'_>,
    obvel: Option<&MacGrid>,
    params: &GuidingParams,
    pressure_params: &PressureParams,
    fixing: bool,
) -> SolveStats {
    let system = PoissonSystem::from_flags(flags, fixing);
    let (tau, sigma, theta) = (params.tau, params.sigma, params.theta);
    let radius = params.blur_radius;

    let v0 = vel.clone();
    let weights = face_weights(vel, guide.weight);
    let target = guide.velocity;

    let mut x = v0.clone();
    let mut x_bar = v0.clone();
    let mut y = MacGrid::new(*vel.dims());

    let mut stats = SolveStats::default();
    for iteration in 1..=params.max_iterations {
        let x_old = x.clone();

        // 1. Dual step: prox of the conjugate of ½ w |u - z|²
        let k_xbar = blur_mac(&x_bar, radius);
        for axis in Axis::ALL {
            let kx = k_xbar.component(axis);
            let z = target.component(axis);
            let w = weights.component(axis);
            y.component_mut(axis)
                .par_iter_mut()
                .enumerate()
                .for_each(|(f, y)| {
                    *y = if w[f] <= WEIGHT_EPSILON {
                        0.0
                    } else {
                        let p = *y + sigma * kx[f];
                        (p - sigma * z[f]) / (1.0 + sigma / w[f])
                    };
                });
        }
        set_wall_bcs(flags, &mut y, None);

        // 2. Primal step: prox of ½|x - v0|² on the divergence-free set
        let kt_y = blur_mac(&y, radius);
        for axis in Axis::ALL {
            let ky = kt_y.component(axis);
            let v = v0.component(axis);
            x.component_mut(axis)
                .par_iter_mut()
                .enumerate()
                .for_each(|(f, x)| {
                    let q = *x - tau * ky[f];
                    *x = (tau * v[f] + q) / (1.0 + tau);
                });
        }
        set_wall_bcs(flags, &mut x, obvel);
        let inner = project_with(&system, &mut x, pressure, params.preconditioner, pressure_params);
        if !inner.converged {
            log::debug!("guided projection {} did not converge", iteration);
        }

        // 3. Extrapolation
        for axis in Axis::ALL {
            let xn = x.component(axis);
            let xo = x_old.component(axis);
            x_bar
                .component_mut(axis)
                .par_iter_mut()
                .enumerate()
                .for_each(|(f, b)| *b = xn[f] + theta * (xn[f] - xo[f]));
        }

        // 4. Stopping test on the primal change
        let mut change = x_old.clone();
        for axis in Axis::ALL {
            let xn = x.component(axis);
            change
                .component_mut(axis)
                .iter_mut()
                .zip(xn)
                .for_each(|(c, &n)| *c = n - *c);
        }
        let delta = max_abs_mac(&change);
        let scale = max_abs_mac(&x);
        stats = SolveStats {
            iterations: iteration,
            residual: (delta / scale.max(f32::MIN_POSITIVE)) as f64,
            converged: delta <= params.eps_abs + params.eps_rel * scale,
        };
        if stats.converged {
            break;
        }
    }

    if stats.iterations == 0 {
        set_wall_bcs(flags, &mut x, obvel);
        stats = project_with(&system, &mut x, pressure, params.preconditioner, pressure_params);
    } else if !stats.converged {
        log::warn!(
            "guided pressure solve stopped after {} iterations, change {:.3e}",
            stats.iterations,
            stats.residual
        );
    }

    vel.copy_from(&x);
    stats
}
