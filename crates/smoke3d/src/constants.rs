//! Numerical constants for the smoke solver.

/// Gravity acceleration (m/s^2) - negative Y direction
pub const GRAVITY: f32 = -9.81;

// =============================================================================
// NOISE SYNTHESIS
// =============================================================================

/// Per-octave decay of the injected turbulence strength.
///
/// Empirical fit to the Kolmogorov energy cascade.
pub const KOLMOGOROV_FACTOR: f32 = 0.06;

/// Spatial frequency of the first noise octave; doubles per octave.
pub const NOISE_BASE_SCALE: f32 = 2.0;

/// Number of texture coordinate carriers blended by the noise stage.
pub const NUM_UV_GRIDS: usize = 2;

/// Time after which a texture carrier is reset to identity.
pub const UV_RESET_TIME: f32 = 10.0;

/// Cells obstacles are grown by before extrapolating energy.
pub const OBSTACLE_DILATION: usize = 2;

/// Cells the energy field is extrapolated into obstacles.
pub const ENERGY_EXTRAPOLATION: usize = 6;

/// Largest accepted noise upsampling factor.
pub const MAX_UPRES: usize = 8;

/// Finite-difference step (in noise space) for curl evaluation.
pub const CURL_EPSILON: f64 = 1e-2;

// =============================================================================
// COMBUSTION
// =============================================================================

/// Fuel below this is treated as none.
pub const FUEL_EPSILON: f32 = 1e-5;

/// Smoke emitted per unit of burned fuel, before `flame_smoke`.
pub const SMOKE_PER_FUEL: f32 = 0.1;

// =============================================================================
// PRESSURE
// =============================================================================

/// Damping of the Jacobi smoother inside the multigrid preconditioner.
pub const JACOBI_OMEGA: f64 = 2.0 / 3.0;

/// Smoothing sweeps before and after each coarse-grid correction.
pub const MG_SMOOTH_SWEEPS: usize = 2;

/// Jacobi sweeps on the coarsest multigrid level.
pub const MG_COARSE_SWEEPS: usize = 30;

/// Stop coarsening once the finest axis of a level drops below this.
pub const MG_MIN_RES: usize = 4;
