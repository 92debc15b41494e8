//! Wavelet turbulence synthesis on the high-resolution grid.
//!
//! The noise grid does not solve for pressure. Each noise step upsamples the
//! base velocity, adds curl noise weighted by the local high-frequency kinetic
//! energy of the base flow, and transports the high-resolution fields through
//! the result.
//!
//! # Per-step pipeline
//!
//! 1. Interpolate base density and velocity to noise resolution
//! 2. Advect the texture carriers with the base flow and refresh their weights
//! 3. Kinetic energy of the base flow, extrapolated into obstacles
//! 4. Wavelet coefficients of the energy
//! 5. Add one curl-noise octave per carrier, strength falling by the
//!    Kolmogorov factor and frequency doubling per octave
//! 6. `upres` advection substeps of the noise fields

pub mod field;
pub mod uv;
pub mod wavelet;

use rayon::prelude::*;

use crate::advection::{advect_field, AdvectionOrder, OpenBounds};
use crate::config::NoiseParams;
use crate::constants::{KOLMOGOROV_FACTOR, NOISE_BASE_SCALE, NUM_UV_GRIDS, UV_RESET_TIME};
use crate::flags::{CellType, FlagGrid};
use crate::forces::add_force_field;
use crate::grid::{MacGrid, ScalarGrid, VecGrid};
use crate::store::{BaseStore, NoiseStore};

pub use field::NoiseField;
pub use uv::UvGrid;

/// Number of noise octaves for an upsampling factor.
///
/// `round(log2(upres))`, with `upres == 1` treated as 2 so that a noise grid
/// at base resolution still gets one octave.
pub fn octave_count(upres: usize) -> usize {
    let r = if upres <= 1 { 2 } else { upres };
    (r as f32).log2().round() as usize
}

/// Per-substep inputs of a noise step.
#[derive(Clone, Copy, Debug)]
pub struct NoiseStep {
    pub dt: f32,
    /// Noise context time at the start of the step
    pub time: f32,
    pub order: AdvectionOrder,
    pub open: Option<OpenBounds>,
}

#[derive(Clone, Debug)]
pub struct NoiseStage {
    field: NoiseField,
    params: NoiseParams,
    octaves: usize,
}

impl NoiseStage {
    pub fn new(params: &NoiseParams) -> Self {
        Self {
            field: NoiseField::new(params.seed, params.pos_scale, params.time_anim),
            params: params.clone(),
            octaves: octave_count(params.upres),
        }
    }

    pub fn octaves(&self) -> usize {
        self.octaves
    }

    pub fn upres(&self) -> usize {
        self.params.upres
    }

    /// Once per noise frame: level sets at noise resolution and texture
    /// carriers.
    pub fn pre_step(&self, noise: &mut NoiseStore, base: &BaseStore) {
        let dims = *noise.dims();
        noise.phi_obs = base.phi_obs.resampled(dims);
        noise.phi_out = base.phi_out.resampled(dims);
        noise.ensure_uv(NUM_UV_GRIDS);
    }

    /// One noise substep.
    pub fn step(&self, noise: &mut NoiseStore, base: &BaseStore, step: &NoiseStep) {
        // 1. Fresh upsampled copies of the base state
        noise.density.interpolate_from(&base.density);
        noise.vel.interpolate_from(&base.vel);

        // 2. Texture carriers follow the base flow
        for uv in noise.uv.iter_mut() {
            advect_field(&base.flags, &base.vel, uv.coords_mut(), step.dt, step.order, None);
            uv.update_weight(step.time, UV_RESET_TIME, NUM_UV_GRIDS);
        }

        // 3-4. Energy and its detail band at base resolution
        wavelet::compute_energy(&base.flags, &base.vel, &mut noise.energy);
        wavelet::extrapolate_energy(&base.flags, &mut noise.energy);
        wavelet::compute_wavelet_coefficients(&mut noise.energy);

        // 5. Octaves
        let mut strength = self.params.strength;
        let mut scale = NOISE_BASE_SCALE;
        for _ in 0..self.octaves {
            for uv in &noise.uv {
                let perturbation = self.octave(
                    &noise.flags,
                    &noise.energy,
                    uv,
                    strength * uv.weight(),
                    scale,
                    step.time,
                );
                add_force_field(&noise.flags, &mut noise.vel, &perturbation, 1.0);
            }
            strength *= KOLMOGOROV_FACTOR;
            scale *= 2.0;
        }

        // 6. Transport at noise resolution
        let substeps = self.params.upres.max(1);
        let sub_dt = step.dt / substeps as f32;
        let open = step.open.as_ref();
        for _ in 0..substeps {
            if let Some(colors) = noise.colors.as_mut() {
                for channel in colors.channels_mut() {
                    advect_field(&noise.flags, &noise.vel, channel, sub_dt, step.order, open);
                }
            }
            if let Some(fire) = noise.fire.as_mut() {
                advect_field(&noise.flags, &noise.vel, &mut fire.fuel, sub_dt, step.order, open);
                advect_field(&noise.flags, &noise.vel, &mut fire.react, sub_dt, step.order, open);
            }
            advect_field(&noise.flags, &noise.vel, &mut noise.density, sub_dt, step.order, open);
        }
    }

    /// Curl-noise velocity of one octave at noise fluid cells.
    fn octave(
        &self,
        flags: &FlagGrid,
        coefficients: &ScalarGrid,
        uv: &UvGrid,
        strength: f32,
        scale: f32,
        time: f32,
    ) -> VecGrid {
        let dims = *flags.dims();
        let mut out = VecGrid::new(dims);
        if strength == 0.0 {
            return out;
        }
        let to_base = coefficients.dims().cell_size / dims.cell_size;
        out.data_mut()
            .par_iter_mut()
            .enumerate()
            .for_each(|(idx, v)| {
                if flags.at(idx) != CellType::Fluid {
                    return;
                }
                let (i, j, k) = dims.cell_coords(idx);
                let p_base = dims.cell_center(i, j, k) / to_base;
                let weight = coefficients.sample(p_base);
                if weight == 0.0 {
                    return;
                }
                let coord = uv.sample(p_base);
                *v = self.field.curl(coord, scale, time) * (strength * weight);
            });
        out
    }
}
