//! Frame advancement at base and noise resolution.
//!
//! A frame is split into substeps chosen by the CFL condition. The flags are
//! rebuilt from the frame's level sets once, then each base substep burns
//! fuel, moves everything through the velocity field, applies forces and
//! projects. Once
//! the base frame is done the noise grid catches up to the same frame with
//! its own substeps, reading interpolated copies of the base fields.

use crate::advection::{advect_field, advect_velocity, OpenBounds};
use crate::combustion::{process_burn, update_flame};
use crate::config::{SmokeConfig, TimingParams};
use crate::error::{Result, SimError};
use crate::flags::FlagGrid;
use crate::forces::{
    add_buoyancy, add_force_field, dissolve, extrapolate_obstacle_velocity, reset_outflow,
    resample_to_mac, set_initial_velocity, set_wall_bcs, vorticity_confinement,
};
use crate::grid::{GridDims, MacGrid, ScalarGrid, VecGrid};
use crate::inflow::{Emitter, InflowTargets};
use crate::levelset::LevelSet;
use crate::noise::NoiseStep;
use crate::pressure::{solve_guided, solve_pressure, GuideTarget, SolveStats};
use crate::store::{BaseStore, NoiseStore};
use crate::SmokeSimulation;

/// Layers the obstacle velocity is grown out of the obstacle. Inward it
/// fills the whole obstacle (half the largest resolution).
const OBVEL_OUTSIDE_LAYERS: usize = 1;

/// Clock of one resolution.
#[derive(Clone, Debug, PartialEq)]
pub struct SimulationContext {
    /// Completed frames
    pub frame: u32,
    /// Simulated seconds
    pub time: f32,
    /// Length of the last substep
    pub dt: f32,
    /// Seconds per frame after time scaling
    pub frame_length: f32,
    pub cfl: f32,
    /// Substeps taken in the last frame
    pub substeps: usize,
}

impl SimulationContext {
    pub fn new(timing: &TimingParams) -> Self {
        let frame_length = timing.frame_length * timing.time_scale;
        Self {
            frame: 0,
            time: 0.0,
            dt: frame_length,
            frame_length,
            cfl: timing.cfl,
            substeps: 0,
        }
    }
}

/// Per-frame replacements for the configured timing.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct TimingOverride {
    /// Seconds per frame, already time scaled
    pub frame_length: Option<f32>,
    pub cfl: Option<f32>,
}

/// Velocity forced inside a masked region.
#[derive(Clone, Debug)]
pub struct InitialVelocity {
    pub velocity: VecGrid,
    pub mask: Vec<bool>,
}

/// Target flow for the guided pressure solve.
#[derive(Clone, Debug)]
pub struct GuideInput {
    pub velocity: MacGrid,
    /// Per-cell guiding strength; zero leaves the flow free
    pub weight: ScalarGrid,
}

/// Everything the caller feeds into one frame. All grids are at base
/// resolution.
#[derive(Clone, Debug, Default)]
pub struct FrameInputs {
    /// Cell-centred acceleration added every substep
    pub force: Option<VecGrid>,
    /// Moving obstacles, joined with the static obstacle level set
    pub phi_obs: Option<LevelSet>,
    pub phi_out: Option<LevelSet>,
    /// Cell-centred velocity of the moving obstacles
    pub obstacle_velocity: Option<VecGrid>,
    pub initial_velocity: Option<InitialVelocity>,
    pub guide: Option<GuideInput>,
    pub emitters: Vec<Emitter>,
    pub timing: TimingOverride,
}

impl FrameInputs {
    /// Reject grids whose size does not match the base domain and timing
    /// overrides that are not positive and finite.
    pub fn validate(&self, dims: &GridDims) -> Result<()> {
        for (name, value) in [
            ("frame_length", self.timing.frame_length),
            ("cfl", self.timing.cfl),
        ] {
            if let Some(value) = value.filter(|v| !(v.is_finite() && *v > 0.0)) {
                return Err(SimError::InvalidTiming { name, value });
            }
        }

        let cells = dims.cell_count();
        let faces = dims.u_count() + dims.v_count() + dims.w_count();
        let mut checks: Vec<(&'static str, usize, usize)> = Vec::new();
        if let Some(f) = &self.force {
            checks.push(("force", f.data().len(), cells));
        }
        if let Some(phi) = &self.phi_obs {
            checks.push(("phi_obs", phi.values().len(), cells));
        }
        if let Some(phi) = &self.phi_out {
            checks.push(("phi_out", phi.values().len(), cells));
        }
        if let Some(v) = &self.obstacle_velocity {
            checks.push(("obstacle_velocity", v.data().len(), cells));
        }
        if let Some(init) = &self.initial_velocity {
            checks.push(("initial_velocity", init.velocity.data().len(), cells));
            checks.push(("initial_velocity_mask", init.mask.len(), cells));
        }
        if let Some(guide) = &self.guide {
            let v = &guide.velocity;
            checks.push(("guide_velocity", v.u.len() + v.v.len() + v.w.len(), faces));
            checks.push(("guide_weight", guide.weight.data().len(), cells));
        }
        for (name, got, expected) in checks {
            if got != expected {
                return Err(SimError::InputShape {
                    name,
                    got,
                    expected,
                });
            }
        }
        Ok(())
    }
}

/// What happened during one frame.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct FrameReport {
    /// Base frame counter after the frame
    pub frame: u32,
    pub substeps: usize,
    pub noise_substeps: usize,
    /// One entry per base substep
    pub pressure: Vec<SolveStats>,
    /// Length of the last base substep
    pub dt: f32,
}

/// Length of the next substep.
///
/// Without adaptive stepping the whole remaining frame is one substep.
/// Otherwise `cfl · dx / max|v|`, kept between `frame / max_substeps` and
/// `frame / min_substeps` and never past the end of the frame.
pub fn substep_dt(
    timing: &TimingParams,
    frame_length: f32,
    cfl: f32,
    max_speed: f32,
    cell_size: f32,
    remaining: f32,
) -> f32 {
    if !timing.adaptive {
        return remaining;
    }
    let min_dt = frame_length / timing.max_substeps.max(1) as f32;
    let max_dt = frame_length / timing.min_substeps.max(1) as f32;
    let dt = if max_speed > 0.0 {
        (cfl * cell_size / max_speed).clamp(min_dt, max_dt)
    } else {
        max_dt
    };
    // Swallow a sliver at the end of the frame instead of a tiny extra step
    if dt >= remaining - min_dt * 1e-3 {
        remaining
    } else {
        dt
    }
}

fn open_bounds(config: &SmokeConfig) -> Option<OpenBounds> {
    config.open_boundaries.any_open().then_some(OpenBounds {
        mask: config.open_boundaries,
        width: config.boundary_width,
    })
}

impl SmokeSimulation {
    /// Advance the base grid by one frame, then bring the noise grid up to
    /// the same frame.
    pub fn advance_frame(&mut self, inputs: &FrameInputs) -> Result<FrameReport> {
        let mut report = self.advance_base_frame(inputs)?;
        report.noise_substeps = self.advance_noise_frame(inputs)?;
        Ok(report)
    }

    /// Advance only the base grid by one frame.
    pub fn advance_base_frame(&mut self, inputs: &FrameInputs) -> Result<FrameReport> {
        inputs.validate(self.base.dims())?;
        Ok(self.step_base(inputs))
    }

    /// Bring the noise grid up to the current base frame, reading the base
    /// grids as they are now. Returns the number of noise substeps, zero
    /// without noise or before the first base frame.
    pub fn advance_noise_frame(&mut self, inputs: &FrameInputs) -> Result<usize> {
        inputs.validate(self.base.dims())?;
        if self.noise.is_none() || self.base_ctx.frame == 0 {
            return Ok(0);
        }
        Ok(self.step_noise(inputs))
    }

    fn step_base(&mut self, inputs: &FrameInputs) -> FrameReport {
        let config = &self.config;
        let base = &mut self.base;
        let ctx = &mut self.base_ctx;
        let dims = *base.dims();

        ctx.frame_length = inputs.timing.frame_length.unwrap_or_else(|| config.frame_length());
        ctx.cfl = inputs.timing.cfl.unwrap_or(config.timing.cfl);

        // Pre-step: sources and this frame's geometry
        let mut initial = inputs.initial_velocity.clone();
        let emit_velocity = inputs.emitters.iter().any(|e| e.velocity.is_some());
        if emit_velocity && initial.is_none() {
            initial = Some(InitialVelocity {
                velocity: VecGrid::new(dims),
                mask: vec![false; dims.cell_count()],
            });
        }
        for emitter in &inputs.emitters {
            emitter.apply(&mut InflowTargets {
                density: &mut base.density,
                heat: base.heat.as_mut(),
                fire: base.fire.as_mut(),
                colors: base.colors.as_mut(),
                velocity: initial.as_mut().map(|i| (&mut i.velocity, i.mask.as_mut_slice())),
            });
        }

        refresh_geometry(config, base, inputs);

        let obvel_mac = inputs.obstacle_velocity.as_ref().map(|obvel| {
            base.obvel.copy_from(obvel);
            extrapolate_obstacle_velocity(
                &base.phi_obs,
                &mut base.obvel,
                dims.max_res() / 2,
                OBVEL_OUTSIDE_LAYERS,
            );
            let mut mac = MacGrid::new(dims);
            resample_to_mac(&base.obvel, &mut mac);
            mac
        });

        let open = open_bounds(config);
        let mut remaining = ctx.frame_length;
        let mut report = FrameReport::default();
        while remaining > ctx.frame_length * 1e-5 {
            let dt = substep_dt(
                &config.timing,
                ctx.frame_length,
                ctx.cfl,
                base.vel.max_speed(),
                dims.cell_size,
                remaining,
            );

            if let Some(fire) = base.fire.as_mut() {
                process_burn(
                    &base.flags,
                    fire,
                    &mut base.density,
                    base.heat.as_mut(),
                    base.colors.as_mut(),
                    &config.combustion,
                    dt,
                );
            }

            let stats = smoke_step(
                config,
                base,
                &SubstepInputs {
                    dt,
                    fraction: dt / ctx.frame_length,
                    open: open.as_ref(),
                    force: inputs.force.as_ref(),
                    obvel: obvel_mac.as_ref(),
                    initial: initial.as_ref(),
                    guide: inputs.guide.as_ref(),
                },
            );
            report.pressure.push(stats);

            if let Some(fire) = base.fire.as_mut() {
                update_flame(&fire.react, &mut fire.flame);
            }

            ctx.time += dt;
            ctx.dt = dt;
            remaining -= dt;
            report.substeps += 1;
        }

        ctx.frame += 1;
        ctx.substeps = report.substeps;
        log::debug!(
            "base frame {} done in {} substeps (t = {:.4})",
            ctx.frame,
            report.substeps,
            ctx.time
        );
        report.frame = ctx.frame;
        report.dt = ctx.dt;
        report
    }

    fn step_noise(&mut self, inputs: &FrameInputs) -> usize {
        // A noise-only bake loads the base grids from the cache without
        // their geometry
        refresh_geometry(&self.config, &mut self.base, inputs);
        let (Some(noise), Some(stage)) = (self.noise.as_mut(), self.noise_stage.as_ref()) else {
            return 0;
        };
        let config = &self.config;
        let base = &self.base;
        let base_ctx = &self.base_ctx;
        let ctx = &mut self.noise_ctx;
        let dims = *noise.dims();

        // The noise frame starts where the base frame started
        ctx.frame = base_ctx.frame - 1;
        ctx.time = (base_ctx.time - base_ctx.frame_length).max(0.0);
        ctx.frame_length = base_ctx.frame_length;
        ctx.cfl = base_ctx.cfl;

        stage.pre_step(noise, base);
        for emitter in &inputs.emitters {
            apply_noise_emitter(emitter, noise);
        }

        let open = open_bounds(config);
        let end = base_ctx.time;
        let mut substeps = 0;
        while ctx.frame < base_ctx.frame {
            noise.flags = FlagGrid::rebuild(
                dims,
                config.boundary_width,
                &config.open_boundaries,
                &noise.phi_obs,
                &noise.phi_out,
            );

            // Noise follows the base flow, so the base CFL bounds its substeps
            let remaining = (end - ctx.time).max(0.0);
            let dt = substep_dt(
                &config.timing,
                ctx.frame_length,
                ctx.cfl,
                base.vel.max_speed(),
                base.dims().cell_size,
                remaining,
            );

            if let Some(fire) = noise.fire.as_mut() {
                process_burn(
                    &noise.flags,
                    fire,
                    &mut noise.density,
                    None,
                    noise.colors.as_mut(),
                    &config.combustion,
                    dt,
                );
            }

            stage.step(
                noise,
                base,
                &NoiseStep {
                    dt,
                    time: ctx.time,
                    order: config.advection_order,
                    open,
                },
            );

            if let Some(fire) = noise.fire.as_mut() {
                update_flame(&fire.react, &mut fire.flame);
            }

            ctx.time += dt;
            ctx.dt = dt;
            substeps += 1;
            if ctx.time >= end - ctx.frame_length * 1e-5 {
                ctx.time = end;
                ctx.frame += 1;
            }
        }
        ctx.substeps = substeps;
        log::debug!("noise frame {} done in {} substeps", ctx.frame, substeps);
        substeps
    }
}

/// Rebuild this frame's obstacle and outflow level sets and the base flags
/// from the static shapes plus the animated ones in `inputs`.
fn refresh_geometry(config: &SmokeConfig, base: &mut BaseStore, inputs: &FrameInputs) {
    base.phi_obs.copy_from(&base.phi_obs_static);
    base.phi_out.copy_from(&base.phi_out_static);
    if let Some(phi) = &inputs.phi_obs {
        base.phi_obs.join(phi);
    }
    if let Some(phi) = &inputs.phi_out {
        base.phi_out.join(phi);
    }
    base.flags = FlagGrid::rebuild(
        *base.dims(),
        config.boundary_width,
        &config.open_boundaries,
        &base.phi_obs,
        &base.phi_out,
    );
}

fn apply_noise_emitter(emitter: &Emitter, noise: &mut NoiseStore) {
    emitter.apply(&mut InflowTargets {
        density: &mut noise.density,
        heat: None,
        fire: noise.fire.as_mut(),
        colors: noise.colors.as_mut(),
        velocity: None,
    });
}

struct SubstepInputs<'a> {
    dt: f32,
    /// Part of the frame this substep covers
    fraction: f32,
    open: Option<&'a OpenBounds>,
    force: Option<&'a VecGrid>,
    obvel: Option<&'a MacGrid>,
    initial: Option<&'a InitialVelocity>,
    guide: Option<&'a GuideInput>,
}

/// Transport, forces and projection of one base substep.
fn smoke_step(config: &SmokeConfig, base: &mut BaseStore, step: &SubstepInputs<'_>) -> SolveStats {
    let (dt, open, order) = (step.dt, step.open, config.advection_order);

    // 1. Transport every carried field, then the velocity itself
    advect_field(&base.flags, &base.vel, &mut base.density, dt, order, open);
    if let Some(heat) = base.heat.as_mut() {
        advect_field(&base.flags, &base.vel, heat, dt, order, open);
    }
    if let Some(fire) = base.fire.as_mut() {
        advect_field(&base.flags, &base.vel, &mut fire.fuel, dt, order, open);
        advect_field(&base.flags, &base.vel, &mut fire.react, dt, order, open);
    }
    if let Some(colors) = base.colors.as_mut() {
        for channel in colors.channels_mut() {
            advect_field(&base.flags, &base.vel, channel, dt, order, open);
        }
    }
    advect_velocity(&base.flags, &mut base.vel, dt, order, open);

    // 2. Decay and outflow
    if config.dissolve.enabled {
        let mut channels: Vec<&mut ScalarGrid> = match base.colors.as_mut() {
            Some(colors) => colors.channels_mut().into_iter().collect(),
            None => Vec::new(),
        };
        dissolve(
            &base.flags,
            &mut base.density,
            base.heat.as_mut(),
            &mut channels,
            &config.dissolve,
            step.fraction,
        );
    }
    if open.is_some() {
        reset_outflow(&base.flags, &mut base.density);
        if let Some(heat) = base.heat.as_mut() {
            reset_outflow(&base.flags, heat);
        }
        if let Some(fire) = base.fire.as_mut() {
            reset_outflow(&base.flags, &mut fire.fuel);
            reset_outflow(&base.flags, &mut fire.react);
        }
        if let Some(colors) = base.colors.as_mut() {
            for channel in colors.channels_mut() {
                reset_outflow(&base.flags, channel);
            }
        }
    }

    // 3. Forces
    if config.vorticity != 0.0 {
        vorticity_confinement(&base.flags, &mut base.vel, config.vorticity, dt);
    }
    add_buoyancy(
        &base.flags,
        &mut base.vel,
        &base.density,
        config.buoyancy_density,
        config.gravity,
        dt,
    );
    if let Some(heat) = base.heat.as_ref() {
        add_buoyancy(
            &base.flags,
            &mut base.vel,
            heat,
            config.buoyancy_heat,
            config.gravity,
            dt,
        );
    }
    if let Some(force) = step.force {
        add_force_field(&base.flags, &mut base.vel, force, dt);
    }

    // 4. Boundary conditions
    if let Some(init) = step.initial {
        set_initial_velocity(&mut base.vel, &init.velocity, &init.mask);
    }
    set_wall_bcs(&base.flags, &mut base.vel, step.obvel);

    // 5. Projection
    match step.guide.filter(|_| config.guiding.enabled) {
        Some(guide) => solve_guided(
            &base.flags,
            &mut base.vel,
            &mut base.pressure,
            GuideTarget {
                velocity: &guide.velocity,
                weight: &guide.weight,
            },
            step.obvel,
            &config.guiding,
            &config.pressure,
            config.guiding_pressure_fixing(),
        ),
        None => solve_pressure(
            &base.flags,
            &mut base.vel,
            &mut base.pressure,
            &config.pressure,
            config.pressure_fixing(),
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn timing() -> TimingParams {
        TimingParams {
            frame_length: 0.04,
            min_substeps: 1,
            max_substeps: 4,
            ..Default::default()
        }
    }

    #[test]
    fn test_still_flow_takes_one_substep() {
        let t = timing();
        assert_eq!(substep_dt(&t, 0.04, 4.0, 0.0, 0.1, 0.04), 0.04);
    }

    #[test]
    fn test_fast_flow_is_bounded_by_max_substeps() {
        let t = timing();
        let dt = substep_dt(&t, 0.04, 1.0, 1000.0, 0.1, 0.04);
        assert!((dt - 0.01).abs() < 1e-7, "dt = {}", dt);
    }

    #[test]
    fn test_cfl_step_is_used_in_between() {
        let t = timing();
        // cfl * dx / v = 1 * 0.1 / 5 = 0.02
        let dt = substep_dt(&t, 0.04, 1.0, 5.0, 0.1, 0.04);
        assert!((dt - 0.02).abs() < 1e-7, "dt = {}", dt);
        let last = substep_dt(&t, 0.04, 1.0, 5.0, 0.1, 0.015);
        assert_eq!(last, 0.015, "never past the end of the frame");
    }

    #[test]
    fn test_fixed_stepping_takes_whole_frame() {
        let mut t = timing();
        t.adaptive = false;
        assert_eq!(substep_dt(&t, 0.04, 1.0, 1000.0, 0.1, 0.04), 0.04);
    }

    #[test]
    fn test_validate_rejects_wrong_force_size() {
        let dims = GridDims::new(4, 4, 4, 0.25);
        let inputs = FrameInputs {
            force: Some(VecGrid::new(GridDims::new(4, 4, 5, 0.25))),
            ..Default::default()
        };
        match inputs.validate(&dims) {
            Err(SimError::InputShape { name, got, expected }) => {
                assert_eq!(name, "force");
                assert_eq!(got, 80);
                assert_eq!(expected, 64);
            }
            other => panic!("expected InputShape, got {:?}", other),
        }
    }

    #[test]
    fn test_validate_rejects_bad_timing_override() {
        let dims = GridDims::new(4, 4, 4, 0.25);
        let timing = |frame_length, cfl| TimingOverride { frame_length, cfl };
        for (timing, bad) in [
            (timing(Some(-0.04), None), "frame_length"),
            (timing(Some(0.0), None), "frame_length"),
            (timing(None, Some(f32::NAN)), "cfl"),
            (timing(Some(0.04), Some(f32::INFINITY)), "cfl"),
        ] {
            let inputs = FrameInputs {
                timing,
                ..Default::default()
            };
            match inputs.validate(&dims) {
                Err(SimError::InvalidTiming { name, .. }) => assert_eq!(name, bad),
                other => panic!("{:?} passed as {:?}", timing, other),
            }
        }
        let fine = FrameInputs {
            timing: TimingOverride {
                frame_length: Some(0.02),
                cfl: Some(2.0),
            },
            ..Default::default()
        };
        assert!(fine.validate(&dims).is_ok());
    }

    #[test]
    fn test_validate_checks_mask_length() {
        let dims = GridDims::new(4, 4, 4, 0.25);
        let inputs = FrameInputs {
            initial_velocity: Some(InitialVelocity {
                velocity: VecGrid::new(dims),
                mask: vec![true; 3],
            }),
            ..Default::default()
        };
        assert!(matches!(
            inputs.validate(&dims),
            Err(SimError::InputShape { name: "initial_velocity_mask", .. })
        ));
    }
}
