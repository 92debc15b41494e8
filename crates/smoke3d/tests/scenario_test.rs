//! End-to-end simulation scenarios
//!
//! Whole frames through `SmokeSimulation`: mass bookkeeping, ignition,
//! flag determinism, transport invariants and setup validation.

use smoke3d::advection::advect_field;
use smoke3d::{
    AdvectionOrder, BoundaryMask, ConfigError, Emitter, FeatureFlags, FlagGrid, FrameInputs,
    GridDims, LevelSet, MacGrid, ScalarGrid, SimError, SmokeConfig, SmokeSimulation,
    TimingOverride, Vec3,
};

fn cell_box(dims: &GridDims, i: usize, j: usize, k: usize) -> (Vec3, Vec3) {
    let c = dims.cell_center_world(i, j, k);
    let h = Vec3::splat(dims.cell_size * 0.25);
    (c - h, c + h)
}

/// 16³ closed box, one seeded cell, no gravity: density mass is conserved
#[test]
fn test_closed_domain_conserves_mass() {
    let mut config = SmokeConfig::cube(16, 1.0);
    config.gravity = Vec3::ZERO;
    let mut sim = SmokeSimulation::new(config).unwrap();
    let dims = *sim.dims();

    let (min, max) = cell_box(&dims, 8, 8, 8);
    let seed = FrameInputs {
        emitters: vec![Emitter::new(min, max).with_density(1.0)],
        ..Default::default()
    };
    sim.advance_frame(&seed).unwrap();
    let initial = sim.base().density.total();
    assert!((initial - 1.0).abs() < 1e-6, "seeded mass {}", initial);

    let idle = FrameInputs::default();
    for _ in 1..10 {
        sim.advance_frame(&idle).unwrap();
    }
    assert_eq!(sim.frame(), 10);
    let total = sim.base().density.total();
    assert!(
        (total - initial).abs() < 1e-4,
        "mass changed from {} to {}",
        initial,
        total
    );
}

/// Seeded fuel above ignition temperature starts burning in the first substep
#[test]
fn test_fire_ignites_in_seed_region() {
    let mut config = SmokeConfig::cube(16, 1.0);
    config.features = FeatureFlags {
        heat: true,
        fire: true,
        ..Default::default()
    };
    config.timing.adaptive = false;
    config.combustion.ignition_temp = 0.5;
    let mut sim = SmokeSimulation::new(config).unwrap();
    let dims = *sim.dims();

    let seed = Emitter::new(Vec3::splat(0.4), Vec3::splat(0.6))
        .with_density(0.0)
        .with_fuel(1.0)
        .with_heat(1.0);
    let cells = seed.cells(&dims);
    assert!(!cells.is_empty());

    let report = sim
        .advance_frame(&FrameInputs {
            emitters: vec![seed],
            ..Default::default()
        })
        .unwrap();
    assert_eq!(report.substeps, 1);

    let fire = sim.base().fire.as_ref().unwrap();
    for &idx in &cells {
        assert!(fire.react.data()[idx] > 0.0, "no reaction at cell {}", idx);
        assert!(fire.fuel.data()[idx] < 1.0, "fuel not consumed at cell {}", idx);
    }
    for (idx, (&r, &f)) in fire.react.data().iter().zip(fire.flame.data()).enumerate() {
        if r == 0.0 {
            assert_eq!(f, 0.0, "flame without reaction at cell {}", idx);
        }
    }
    assert!(sim.base().density.total() > 0.0, "burning made no smoke");
}

/// Fuel below ignition temperature stays unburnt
#[test]
fn test_cold_fuel_does_not_burn() {
    let mut config = SmokeConfig::cube(8, 1.0);
    config.features.heat = true;
    config.features.fire = true;
    let mut sim = SmokeSimulation::new(config).unwrap();
    let seed = Emitter::new(Vec3::splat(0.4), Vec3::splat(0.6)).with_fuel(1.0);
    sim.advance_frame(&FrameInputs {
        emitters: vec![seed],
        ..Default::default()
    })
    .unwrap();
    let fire = sim.base().fire.as_ref().unwrap();
    assert_eq!(fire.react.max_abs(), 0.0);
    assert_eq!(fire.flame.max_abs(), 0.0);
}

/// Same level sets, same flags, byte for byte
#[test]
fn test_flag_rebuild_is_deterministic() {
    let dims = GridDims::new(20, 16, 12, 0.05);
    let obs = LevelSet::from_sphere(dims, Vec3::new(0.5, 0.4, 0.3), 0.2);
    let out = LevelSet::from_box(dims, Vec3::new(0.0, 0.7, 0.0), Vec3::new(1.0, 0.8, 0.6));
    let open: BoundaryMask = "yY".parse().unwrap();
    let a = FlagGrid::rebuild(dims, 2, &open, &obs, &out);
    let b = FlagGrid::rebuild(dims, 2, &open, &obs, &out);
    assert_eq!(a.as_bytes(), b.as_bytes());
}

/// A uniform field stays uniform under any flow, for both orders
#[test]
fn test_uniform_scalar_is_fixed_point_with_obstacle() {
    let dims = GridDims::new(12, 12, 12, 1.0 / 12.0);
    let obs = LevelSet::from_sphere(dims, Vec3::splat(0.5), 0.2);
    let flags = FlagGrid::rebuild(dims, 1, &BoundaryMask::CLOSED, &obs, &LevelSet::empty(dims));
    let mut vel = MacGrid::new(dims);
    for (n, u) in vel.u.iter_mut().enumerate() {
        *u = (n as f32 * 0.3).sin() * 2.0;
    }
    for (n, v) in vel.v.iter_mut().enumerate() {
        *v = (n as f32 * 0.7).cos();
    }
    for order in [AdvectionOrder::SemiLagrange, AdvectionOrder::MacCormack] {
        let mut field = ScalarGrid::filled(dims, 0.42);
        advect_field(&flags, &vel, &mut field, 0.05, order, None);
        for &value in field.data() {
            assert!((value - 0.42).abs() < 1e-6, "{:?} changed uniform field to {}", order, value);
        }
    }
}

/// Smoke leaving through an open face is removed
#[test]
fn test_open_top_lets_smoke_escape() {
    let mut config = SmokeConfig::cube(12, 1.0);
    config.open_boundaries = "Y".parse().unwrap();
    config.buoyancy_density = 4.0;
    let mut sim = SmokeSimulation::new(config).unwrap();
    let seed = FrameInputs {
        emitters: vec![Emitter::new(Vec3::new(0.3, 0.1, 0.3), Vec3::new(0.7, 0.3, 0.7))],
        ..Default::default()
    };
    sim.advance_frame(&seed).unwrap();
    let seeded = sim.base().density.total();
    for _ in 0..20 {
        sim.advance_frame(&FrameInputs::default()).unwrap();
    }
    let dims = *sim.dims();
    let top = dims.cell_index(6, dims.ny - 1, 6);
    assert_eq!(sim.base().density.data()[top], 0.0, "outflow cell kept smoke");
    assert!(sim.base().density.total() < seeded, "no smoke left the domain");
}

/// Dissolve removes smoke over time
#[test]
fn test_dissolve_fades_smoke() {
    let mut config = SmokeConfig::cube(8, 1.0);
    config.gravity = Vec3::ZERO;
    config.dissolve.enabled = true;
    config.dissolve.speed = 2.0;
    let mut sim = SmokeSimulation::new(config).unwrap();
    let seed = FrameInputs {
        emitters: vec![Emitter::new(Vec3::splat(0.3), Vec3::splat(0.7))],
        ..Default::default()
    };
    sim.advance_frame(&seed).unwrap();
    let after_one = sim.base().density.total();
    assert!(after_one > 0.0);
    sim.advance_frame(&FrameInputs::default()).unwrap();
    assert_eq!(sim.base().density.max_abs(), 0.0, "two frames at speed 2 clear unit density");
}

/// Bad settings fail at setup
#[test]
fn test_invalid_setup_is_rejected() {
    let config: SmokeConfig = serde_yaml::from_str("resolution: [16, 16, 16]\ntiming:\n  min_substeps: 5\n  max_substeps: 2\n").unwrap();
    assert!(matches!(
        SmokeSimulation::new(config),
        Err(ConfigError::InvalidSubsteps { min: 5, max: 2 })
    ));

    let mut config = SmokeConfig::cube(16, 1.0);
    config.features.noise = true;
    config.noise.upres = 16;
    assert!(matches!(
        SmokeSimulation::new(config),
        Err(ConfigError::InvalidUpres { got: 16, .. })
    ));
}

/// Per-frame inputs of the wrong size are rejected before stepping
#[test]
fn test_frame_input_shape_is_checked() {
    let mut sim = SmokeSimulation::new(SmokeConfig::cube(8, 1.0)).unwrap();
    let inputs = FrameInputs {
        phi_obs: Some(LevelSet::empty(GridDims::new(4, 4, 4, 0.25))),
        ..Default::default()
    };
    assert!(sim.advance_frame(&inputs).is_err());
    assert_eq!(sim.frame(), 0, "failed frame must not advance the clock");
}

/// A negative frame length from the host fails the frame instead of stepping
#[test]
fn test_negative_frame_length_is_rejected() {
    let mut sim = SmokeSimulation::new(SmokeConfig::cube(8, 1.0)).unwrap();
    sim.advance_frame(&FrameInputs::default()).unwrap();
    let time = sim.context().time;

    let inputs = FrameInputs {
        timing: TimingOverride {
            frame_length: Some(-1.0),
            cfl: None,
        },
        ..Default::default()
    };
    let err = sim.advance_frame(&inputs).unwrap_err();
    assert!(
        matches!(err, SimError::InvalidTiming { name: "frame_length", .. }),
        "got {:?}",
        err
    );
    assert_eq!(sim.frame(), 1);
    assert_eq!(sim.context().time, time);
}
