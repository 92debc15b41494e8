//! Pressure projection tests
//!
//! Divergence after projection for every preconditioner, in closed and open
//! domains, with an obstacle inside, and through the guided solve.

use smoke3d::forces::set_wall_bcs;
use smoke3d::grid::Axis;
use smoke3d::pressure::{compute_divergence, solve_guided, solve_pressure, GuideTarget};
use smoke3d::{
    BoundaryMask, FlagGrid, GridDims, GuidingParams, LevelSet, MacGrid, Preconditioner,
    PressureParams, ScalarGrid, Vec3,
};

const RES: usize = 16;

fn dims() -> GridDims {
    GridDims::new(RES, RES, RES, 1.0 / RES as f32)
}

fn flags(open: &BoundaryMask, with_sphere: bool) -> FlagGrid {
    let dims = dims();
    let obstacle = if with_sphere {
        LevelSet::from_sphere(dims, Vec3::splat(0.5), 0.15)
    } else {
        LevelSet::empty(dims)
    };
    FlagGrid::rebuild(dims, 1, open, &obstacle, &LevelSet::empty(dims))
}

/// Smooth but strongly divergent velocity, zero on walls
fn swirl(flags: &FlagGrid) -> MacGrid {
    let mut vel = MacGrid::new(dims());
    for (n, u) in vel.u.iter_mut().enumerate() {
        *u = (n as f32 * 0.37).sin();
    }
    for (n, v) in vel.v.iter_mut().enumerate() {
        *v = (n as f32 * 0.11).cos() + 0.5;
    }
    for (n, w) in vel.w.iter_mut().enumerate() {
        *w = (n as f32 * 0.23).sin() * 0.8;
    }
    set_wall_bcs(flags, &mut vel, None);
    vel
}

fn max_divergence(flags: &FlagGrid, vel: &MacGrid) -> f32 {
    let mut div = ScalarGrid::new(dims());
    compute_divergence(flags, vel, &mut div);
    div.max_abs()
}

fn params(preconditioner: Preconditioner) -> PressureParams {
    PressureParams {
        preconditioner,
        tolerance: 1e-6,
        max_iterations: 1000,
        zero_pressure_fixing: None,
    }
}

fn check_projection(open: &BoundaryMask, fixing: bool, with_sphere: bool) {
    let flags = flags(open, with_sphere);
    for preconditioner in [Preconditioner::None, Preconditioner::Jacobi, Preconditioner::Multigrid] {
        let mut vel = swirl(&flags);
        let before = max_divergence(&flags, &vel);
        let mut pressure = ScalarGrid::new(dims());
        let stats = solve_pressure(&flags, &mut vel, &mut pressure, &params(preconditioner), fixing);
        let after = max_divergence(&flags, &vel);
        assert!(stats.converged, "{:?} did not converge: {:?}", preconditioner, stats);
        assert!(
            after <= 1e-2 * before,
            "{:?}: divergence {} -> {} (open = {})",
            preconditioner,
            before,
            after,
            open
        );
    }
}

/// Closed box: every preconditioner removes the divergence
#[test]
fn test_projection_closed_domain() {
    check_projection(&BoundaryMask::CLOSED, true, false);
}

/// Open top: outflow cells act as zero-pressure boundary
#[test]
fn test_projection_open_domain() {
    let open = BoundaryMask {
        y_max: true,
        ..BoundaryMask::CLOSED
    };
    check_projection(&open, false, false);
}

/// Obstacle sphere inside a fully open domain
#[test]
fn test_projection_around_obstacle() {
    check_projection(&BoundaryMask::OPEN, false, true);
}

/// Walls keep zero normal velocity through the projection
#[test]
fn test_projection_respects_walls() {
    let flags = flags(&BoundaryMask::CLOSED, true);
    let mut vel = swirl(&flags);
    let mut pressure = ScalarGrid::new(dims());
    solve_pressure(&flags, &mut vel, &mut pressure, &params(Preconditioner::Multigrid), true);
    let d = dims();
    // Face between the wall shell and the first fluid layer
    let idx = vel.face_index(Axis::X, 1, RES / 2, RES / 2);
    assert_eq!(vel.u[idx], 0.0, "wall face moved");
    assert_eq!(pressure.data().len(), d.cell_count());
}

/// The guided solve still ends divergence free
#[test]
fn test_guided_projection_is_divergence_free() {
    let flags = flags(&BoundaryMask::CLOSED, false);
    let mut vel = swirl(&flags);
    let before = max_divergence(&flags, &vel);
    let target = MacGrid::new(dims());
    let weight = ScalarGrid::filled(dims(), 1.0);
    let guiding = GuidingParams {
        enabled: true,
        blur_radius: 1,
        max_iterations: 5,
        ..Default::default()
    };
    let mut pressure = ScalarGrid::new(dims());
    solve_guided(
        &flags,
        &mut vel,
        &mut pressure,
        GuideTarget {
            velocity: &target,
            weight: &weight,
        },
        None,
        &guiding,
        &params(Preconditioner::Multigrid),
        true,
    );
    let after = max_divergence(&flags, &vel);
    assert!(after <= 1e-2 * before, "guided divergence {} -> {}", before, after);
}

/// Zero guiding weight leaves the plain projection result
#[test]
fn test_guided_with_zero_weight_matches_plain_projection() {
    let flags = flags(&BoundaryMask::CLOSED, false);
    let mut plain = swirl(&flags);
    let mut guided = plain.clone();
    let mut pressure = ScalarGrid::new(dims());
    solve_pressure(&flags, &mut plain, &mut pressure, &params(Preconditioner::Multigrid), true);

    let target = MacGrid::uniform(dims(), Vec3::new(3.0, 0.0, 0.0));
    let weight = ScalarGrid::new(dims());
    solve_guided(
        &flags,
        &mut guided,
        &mut pressure,
        GuideTarget {
            velocity: &target,
            weight: &weight,
        },
        None,
        &GuidingParams {
            enabled: true,
            blur_radius: 1,
            ..Default::default()
        },
        &params(Preconditioner::Multigrid),
        true,
    );
    let diff = plain
        .u
        .iter()
        .zip(&guided.u)
        .fold(0.0f32, |m, (a, b)| m.max((a - b).abs()));
    assert!(diff < 1e-3, "zero weight changed the flow by {}", diff);
}

/// A guide that pushes straight through an obstacle must not move its faces
#[test]
fn test_guided_projection_keeps_obstacle_faces_closed() {
    let flags = flags(&BoundaryMask::CLOSED, true);
    let mut vel = swirl(&flags);
    let before = max_divergence(&flags, &vel);
    let target = MacGrid::uniform(dims(), Vec3::new(1.0, 0.0, 0.0));
    let weight = ScalarGrid::filled(dims(), 1.0);
    let guiding = GuidingParams {
        enabled: true,
        blur_radius: 2,
        max_iterations: 20,
        ..Default::default()
    };
    let mut pressure = ScalarGrid::new(dims());
    solve_guided(
        &flags,
        &mut vel,
        &mut pressure,
        GuideTarget {
            velocity: &target,
            weight: &weight,
        },
        None,
        &guiding,
        &params(Preconditioner::Multigrid),
        true,
    );

    for axis in Axis::ALL {
        let size = vel.size(axis);
        let component = vel.component(axis);
        for k in 0..size[2] {
            for j in 0..size[1] {
                for i in 0..size[0] {
                    let (a, b) = axis.face_cells(i, j, k);
                    let fluid =
                        flags.is_fluid_signed(a.0, a.1, a.2) || flags.is_fluid_signed(b.0, b.1, b.2);
                    let wall = flags.is_obstacle_signed(a.0, a.1, a.2)
                        || flags.is_obstacle_signed(b.0, b.1, b.2);
                    if fluid && wall {
                        let v = component[(k * size[1] + j) * size[0] + i];
                        assert!(
                            v.abs() <= 1e-6,
                            "{:?} face ({}, {}, {}) moves at {}",
                            axis,
                            i,
                            j,
                            k,
                            v
                        );
                    }
                }
            }
        }
    }
    let after = max_divergence(&flags, &vel);
    assert!(after <= 1e-2 * before, "guided divergence {} -> {}", before, after);
}
