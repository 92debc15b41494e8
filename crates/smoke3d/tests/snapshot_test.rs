//! Snapshot cache and bake driver tests
//!
//! Every format restores exactly what was saved, a cancelled bake resumes
//! after the last written frame, and a separate noise bake rebuilds the
//! frame's geometry.

use std::path::PathBuf;

use smoke3d::{
    BakeOutcome, Baker, CancelToken, CellType, Emitter, FeatureFlags, FileSnapshotStore,
    FrameInputs, GridSet, LevelSet, SmokeConfig, SmokeSimulation, SnapshotError, SnapshotFormat,
    Vec3,
};

fn temp_dir(tag: &str) -> PathBuf {
    let dir = std::env::temp_dir().join(format!("smoke3d-{}-{}", tag, std::process::id()));
    let _ = std::fs::remove_dir_all(&dir);
    dir
}

fn full_config() -> SmokeConfig {
    let mut config = SmokeConfig::cube(8, 1.0);
    config.features = FeatureFlags {
        heat: true,
        colors: true,
        fire: true,
        noise: true,
    };
    config.noise.upres = 2;
    config
}

fn source() -> FrameInputs {
    FrameInputs {
        emitters: vec![Emitter::new(Vec3::new(0.3, 0.1, 0.3), Vec3::new(0.7, 0.4, 0.7))
            .with_fuel(1.0)
            .with_heat(2.0)
            .with_color(Vec3::new(0.9, 0.3, 0.1))],
        ..Default::default()
    }
}

/// Save and load through every format gives back identical grids
#[test]
fn test_snapshot_roundtrip_every_format() {
    let mut sim = SmokeSimulation::new(full_config()).unwrap();
    for _ in 0..2 {
        sim.advance_frame(&source()).unwrap();
    }

    for format in [SnapshotFormat::Json, SnapshotFormat::JsonGz, SnapshotFormat::Raw] {
        let store = FileSnapshotStore::new(temp_dir(&format!("roundtrip-{}", format)));
        sim.save_snapshot(&store, GridSet::Data, format).unwrap();
        sim.save_snapshot(&store, GridSet::Noise, format).unwrap();

        let mut restored = SmokeSimulation::new(full_config()).unwrap();
        restored.load_snapshot(&store, GridSet::Data, 2, format).unwrap();
        restored.load_snapshot(&store, GridSet::Noise, 2, format).unwrap();

        let (a, b) = (sim.base(), restored.base());
        assert_eq!(a.vel, b.vel, "{}: velocity differs", format);
        assert_eq!(a.density.data(), b.density.data(), "{}: density differs", format);
        assert_eq!(a.heat, b.heat, "{}: heat differs", format);
        assert_eq!(a.fire, b.fire, "{}: fire grids differ", format);
        assert_eq!(a.colors, b.colors, "{}: colors differ", format);

        let (na, nb) = (sim.noise().unwrap(), restored.noise().unwrap());
        assert_eq!(na.density.data(), nb.density.data(), "{}: noise density differs", format);
        assert_eq!(na.fire, nb.fire, "{}: noise fire differs", format);
        for (ua, ub) in na.uv.iter().zip(&nb.uv) {
            assert_eq!(ua.coords(), ub.coords(), "{}: texture coordinates differ", format);
        }

        std::fs::remove_dir_all(store.root()).ok();
    }
}

/// A snapshot from a different resolution is rejected without changes
#[test]
fn test_load_rejects_other_resolution() {
    let store = FileSnapshotStore::new(temp_dir("shape"));
    let mut small = SmokeSimulation::new(SmokeConfig::cube(8, 1.0)).unwrap();
    small.advance_frame(&source()).unwrap();
    small.save_snapshot(&store, GridSet::Data, SnapshotFormat::Raw).unwrap();

    let mut big = SmokeSimulation::new(SmokeConfig::cube(12, 1.0)).unwrap();
    let err = big
        .load_snapshot(&store, GridSet::Data, 1, SnapshotFormat::Raw)
        .unwrap_err();
    assert!(matches!(err, SnapshotError::ShapeMismatch { .. }), "got {:?}", err);
    assert_eq!(big.base().density.max_abs(), 0.0);

    std::fs::remove_dir_all(store.root()).ok();
}

/// Cancel during frame 3, resume, and finish the range
#[test]
fn test_bake_cancel_and_resume() {
    let store = FileSnapshotStore::new(temp_dir("bake"));
    let cancel = CancelToken::new();
    let baker = Baker::new(store.clone(), SnapshotFormat::Raw).with_cancel_token(cancel.clone());

    let mut config = full_config();
    config.features.noise = false;
    let mut sim = SmokeSimulation::new(config.clone()).unwrap();
    let outcome = baker
        .bake_data(&mut sim, 1, 5, |frame| {
            if frame == 3 {
                cancel.cancel();
            }
            source()
        })
        .unwrap();
    assert_eq!(
        outcome,
        BakeOutcome::Cancelled {
            last_completed_frame: Some(3)
        }
    );
    let table = sim.grid_table(GridSet::Data).to_vec();
    assert!(store.has_frame(GridSet::Data, 3, SnapshotFormat::Raw, &table));
    assert!(!store.has_frame(GridSet::Data, 4, SnapshotFormat::Raw, &table));

    // Fresh simulation, as after a restart
    cancel.reset();
    let mut resumed = SmokeSimulation::new(config).unwrap();
    let outcome = baker.bake_data(&mut resumed, 1, 5, |_| source()).unwrap();
    match outcome {
        BakeOutcome::Completed { frames, .. } => assert_eq!(frames, 2, "only frames 4 and 5 remain"),
        other => panic!("expected completion, got {:?}", other),
    }
    assert_eq!(resumed.frame(), 5);
    assert_eq!(baker.cursor(GridSet::Data).unwrap().last_completed_frame, Some(5));
    assert!(store.has_frame(GridSet::Data, 5, SnapshotFormat::Raw, &table));

    baker.free_data().unwrap();
    assert_eq!(baker.cursor(GridSet::Data).unwrap().last_completed_frame, None);
    assert!(!store.has_frame(GridSet::Data, 1, SnapshotFormat::Raw, &table));
    std::fs::remove_dir_all(store.root()).ok();
}

/// Noise bakes on top of the data cache, frame by frame
#[test]
fn test_noise_bake_reads_data_cache() {
    let store = FileSnapshotStore::new(temp_dir("noise-bake"));
    let baker = Baker::new(store.clone(), SnapshotFormat::JsonGz);
    let mut sim = SmokeSimulation::new(full_config()).unwrap();

    baker.bake_data(&mut sim, 1, 3, |_| source()).unwrap();
    let outcome = baker.bake_noise(&mut sim, 1, 3, |_| source()).unwrap();
    assert!(matches!(outcome, BakeOutcome::Completed { frames: 3, .. }));
    assert_eq!(sim.noise_context().frame, 3);

    let table = sim.grid_table(GridSet::Noise).to_vec();
    for frame in 1..=3 {
        assert!(store.has_frame(GridSet::Noise, frame, SnapshotFormat::JsonGz, &table));
    }

    baker.free_noise().unwrap();
    assert!(!store.set_dir(GridSet::Noise).exists());
    assert!(store.set_dir(GridSet::Data).exists(), "freeing noise kept the data cache");
    std::fs::remove_dir_all(store.root()).ok();
}

/// A noise-only bake in a fresh process sees the same obstacles as the
/// combined data and noise step
#[test]
fn test_noise_bake_rebuilds_obstacles() {
    let with_sphere = || {
        let mut sim = SmokeSimulation::new(full_config()).unwrap();
        let phi = LevelSet::from_sphere(*sim.dims(), Vec3::new(0.5, 0.7, 0.5), 0.2);
        sim.set_static_obstacles(phi).unwrap();
        sim
    };

    let mut combined = with_sphere();
    combined.advance_frame(&source()).unwrap();

    let store = FileSnapshotStore::new(temp_dir("noise-obstacles"));
    let baker = Baker::new(store.clone(), SnapshotFormat::Raw);
    baker.bake_data(&mut with_sphere(), 1, 1, |_| source()).unwrap();
    let mut noise_only = with_sphere();
    baker.bake_noise(&mut noise_only, 1, 1, |_| source()).unwrap();

    let (expected, got) = (combined.noise().unwrap(), noise_only.noise().unwrap());
    assert!(expected.flags.count(CellType::Obstacle) > 0);
    assert_eq!(
        got.flags.count(CellType::Obstacle),
        expected.flags.count(CellType::Obstacle),
        "noise flags lost the obstacle"
    );
    assert_eq!(got.flags.cells(), expected.flags.cells());
    assert_eq!(got.phi_obs.values(), expected.phi_obs.values());
    assert_eq!(noise_only.base().flags.cells(), combined.base().flags.cells());
    std::fs::remove_dir_all(store.root()).ok();
}

/// Noise bake without data fails on the first frame
#[test]
fn test_noise_bake_needs_data() {
    let store = FileSnapshotStore::new(temp_dir("noise-no-data"));
    let baker = Baker::new(store.clone(), SnapshotFormat::Raw);
    let mut sim = SmokeSimulation::new(full_config()).unwrap();
    assert!(baker.bake_noise(&mut sim, 1, 2, |_| FrameInputs::default()).is_err());
    std::fs::remove_dir_all(store.root()).ok();
}
