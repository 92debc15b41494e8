//! Simulation configuration.
//!
//! Everything a simulation needs at setup. Serializable to JSON and YAML so
//! scenes can be described in files; `validate` is run by
//! `SmokeSimulation::new` and rejects bad settings before any stepping.

use std::path::Path;

use glam::Vec3;
use serde::{Deserialize, Serialize};

use crate::advection::AdvectionOrder;
use crate::constants::{GRAVITY, MAX_UPRES};
use crate::error::ConfigError;
use crate::flags::BoundaryMask;
use crate::grid::GridDims;
use crate::serde_utils::{deserialize_vec3, serialize_vec3};

/// Optional field groups. Fixed for the lifetime of a simulation.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FeatureFlags {
    /// Track temperature and apply heat buoyancy
    pub heat: bool,
    /// Carry RGB smoke color
    pub colors: bool,
    /// Fuel, reaction and flame fields plus combustion
    pub fire: bool,
    /// High-resolution wavelet turbulence grid
    pub noise: bool,
}

/// Wavelet turbulence settings.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NoiseParams {
    /// Noise grid cells per base cell along each axis
    pub upres: usize,
    /// Strength of the first octave
    pub strength: f32,
    /// Scale of noise space relative to texture coordinates
    pub pos_scale: f32,
    /// Speed at which the noise pattern evolves over time
    pub time_anim: f32,
    pub seed: u32,
}

impl Default for NoiseParams {
    fn default() -> Self {
        Self {
            upres: 2,
            strength: 1.0,
            pos_scale: 2.0,
            time_anim: 0.1,
            seed: 0,
        }
    }
}

/// Fire settings.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CombustionParams {
    /// Fuel consumed per second
    pub burning_rate: f32,
    /// Amount of smoke produced by burning fuel
    pub flame_smoke: f32,
    /// Minimum temperature for fuel to ignite (only checked when heat is tracked)
    pub ignition_temp: f32,
    /// Temperature of the hottest part of a flame
    pub max_temp: f32,
    #[serde(serialize_with = "serialize_vec3", deserialize_with = "deserialize_vec3")]
    pub flame_smoke_color: Vec3,
}

impl Default for CombustionParams {
    fn default() -> Self {
        Self {
            burning_rate: 0.75,
            flame_smoke: 1.0,
            ignition_temp: 1.5,
            max_temp: 3.0,
            flame_smoke_color: Vec3::splat(0.7),
        }
    }
}

/// Preconditioner for the pressure conjugate gradient solve.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Preconditioner {
    None,
    Jacobi,
    #[default]
    Multigrid,
}

/// Plain pressure projection settings.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PressureParams {
    pub preconditioner: Preconditioner,
    /// Residual divergence relative to the initial divergence
    pub tolerance: f32,
    pub max_iterations: usize,
    /// Pin one cell to zero pressure. `None` pins only when the domain has no
    /// open boundary or outflow cell.
    pub zero_pressure_fixing: Option<bool>,
}

impl Default for PressureParams {
    fn default() -> Self {
        Self {
            preconditioner: Preconditioner::Multigrid,
            tolerance: 1e-4,
            max_iterations: 500,
            zero_pressure_fixing: None,
        }
    }
}

/// Guided pressure solve (primal-dual iteration toward a target velocity).
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GuidingParams {
    pub enabled: bool,
    /// Box blur radius (cells) applied to the velocity before comparing with the target
    pub blur_radius: usize,
    pub tau: f32,
    pub sigma: f32,
    pub theta: f32,
    pub max_iterations: usize,
    pub eps_abs: f32,
    pub eps_rel: f32,
    /// Preconditioner for the inner projections
    pub preconditioner: Preconditioner,
    /// Same meaning as `PressureParams::zero_pressure_fixing`, set separately
    pub zero_pressure_fixing: Option<bool>,
}

impl Default for GuidingParams {
    fn default() -> Self {
        Self {
            enabled: false,
            blur_radius: 5,
            tau: 1.0,
            sigma: 0.99,
            theta: 1.0,
            max_iterations: 20,
            eps_abs: 1e-3,
            eps_rel: 1e-3,
            preconditioner: Preconditioner::Multigrid,
            zero_pressure_fixing: None,
        }
    }
}

/// Frame length and adaptive substepping.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TimingParams {
    /// Seconds of simulated time per output frame, before `time_scale`
    pub frame_length: f32,
    /// Speed multiplier for the whole simulation
    pub time_scale: f32,
    /// Target CFL number (cells travelled per substep)
    pub cfl: f32,
    /// Subdivide frames to honour the CFL target; one substep per frame otherwise
    pub adaptive: bool,
    pub min_substeps: usize,
    pub max_substeps: usize,
}

impl Default for TimingParams {
    fn default() -> Self {
        Self {
            frame_length: 1.0 / 24.0,
            time_scale: 1.0,
            cfl: 4.0,
            adaptive: true,
            min_substeps: 1,
            max_substeps: 4,
        }
    }
}

/// Gradual removal of smoke.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DissolveParams {
    pub enabled: bool,
    /// Frames for smoke to dissolve
    pub speed: f32,
    /// Exponential instead of linear falloff
    pub logarithmic: bool,
}

impl Default for DissolveParams {
    fn default() -> Self {
        Self {
            enabled: false,
            speed: 5.0,
            logarithmic: false,
        }
    }
}

/// Complete setup of one smoke domain.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SmokeConfig {
    /// Base grid cells per axis
    pub resolution: [usize; 3],
    /// Base cell size in world units
    pub cell_size: f32,
    /// Thickness of the domain wall shell in cells
    pub boundary_width: usize,
    pub open_boundaries: BoundaryMask,
    pub advection_order: AdvectionOrder,
    /// Vorticity confinement strength (0 disables it)
    pub vorticity: f32,
    /// Buoyancy per unit density; positive rises against gravity
    pub buoyancy_density: f32,
    /// Buoyancy per unit heat; only used when heat is tracked
    pub buoyancy_heat: f32,
    #[serde(serialize_with = "serialize_vec3", deserialize_with = "deserialize_vec3")]
    pub gravity: Vec3,
    /// Color given to smoke that exists before any source paints it
    #[serde(serialize_with = "serialize_vec3", deserialize_with = "deserialize_vec3")]
    pub smoke_color: Vec3,
    pub features: FeatureFlags,
    pub noise: NoiseParams,
    pub combustion: CombustionParams,
    pub pressure: PressureParams,
    pub guiding: GuidingParams,
    pub timing: TimingParams,
    pub dissolve: DissolveParams,
}

impl Default for SmokeConfig {
    fn default() -> Self {
        Self {
            resolution: [32, 32, 32],
            cell_size: 1.0 / 32.0,
            boundary_width: 1,
            open_boundaries: BoundaryMask::CLOSED,
            advection_order: AdvectionOrder::MacCormack,
            vorticity: 0.0,
            buoyancy_density: 1.0,
            buoyancy_heat: 1.0,
            gravity: Vec3::new(0.0, GRAVITY, 0.0),
            smoke_color: Vec3::splat(0.7),
            features: FeatureFlags::default(),
            noise: NoiseParams::default(),
            combustion: CombustionParams::default(),
            pressure: PressureParams::default(),
            guiding: GuidingParams::default(),
            timing: TimingParams::default(),
            dissolve: DissolveParams::default(),
        }
    }
}

impl SmokeConfig {
    /// Cubic domain of `res` cells spanning `size` world units.
    pub fn cube(res: usize, size: f32) -> Self {
        Self {
            resolution: [res; 3],
            cell_size: size / res as f32,
            ..Default::default()
        }
    }

    pub fn dims(&self) -> GridDims {
        GridDims::new(
            self.resolution[0],
            self.resolution[1],
            self.resolution[2],
            self.cell_size,
        )
    }

    /// Noise grid dimensions, if noise is enabled.
    pub fn noise_dims(&self) -> Option<GridDims> {
        self.features
            .noise
            .then(|| self.dims().upsampled(self.noise.upres))
    }

    /// Seconds of simulated time per frame after time scaling.
    pub fn frame_length(&self) -> f32 {
        self.timing.frame_length * self.timing.time_scale
    }

    /// Whether the plain pressure solve pins a reference cell.
    pub fn pressure_fixing(&self) -> bool {
        self.pressure
            .zero_pressure_fixing
            .unwrap_or(!self.open_boundaries.any_open())
    }

    /// Whether the guided pressure solve pins a reference cell.
    pub fn guiding_pressure_fixing(&self) -> bool {
        self.guiding
            .zero_pressure_fixing
            .unwrap_or(!self.open_boundaries.any_open())
    }

    /// Reject settings the solver cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        const MIN_RES: usize = 3;
        if self.resolution.iter().any(|&n| n < MIN_RES) {
            return Err(ConfigError::ResolutionTooSmall {
                got: self.resolution,
                min: MIN_RES,
            });
        }
        if self
            .resolution
            .iter()
            .any(|&n| n <= 2 * self.boundary_width)
        {
            return Err(ConfigError::BoundaryTooWide {
                width: self.boundary_width,
                res: self.resolution,
            });
        }

        positive("cell_size", self.cell_size)?;
        positive("timing.frame_length", self.timing.frame_length)?;
        positive("timing.time_scale", self.timing.time_scale)?;
        positive("timing.cfl", self.timing.cfl)?;
        positive("pressure.tolerance", self.pressure.tolerance)?;
        if self.timing.min_substeps == 0 || self.timing.min_substeps > self.timing.max_substeps {
            return Err(ConfigError::InvalidSubsteps {
                min: self.timing.min_substeps,
                max: self.timing.max_substeps,
            });
        }

        finite("vorticity", self.vorticity)?;
        finite("buoyancy_density", self.buoyancy_density)?;
        finite("buoyancy_heat", self.buoyancy_heat)?;
        finite("gravity.x", self.gravity.x)?;
        finite("gravity.y", self.gravity.y)?;
        finite("gravity.z", self.gravity.z)?;

        if self.features.noise {
            if self.noise.upres == 0 || self.noise.upres > MAX_UPRES {
                return Err(ConfigError::InvalidUpres {
                    got: self.noise.upres,
                    max: MAX_UPRES,
                });
            }
            finite("noise.strength", self.noise.strength)?;
            positive("noise.pos_scale", self.noise.pos_scale)?;
            finite("noise.time_anim", self.noise.time_anim)?;
        }

        if self.features.fire {
            range("combustion.burning_rate", self.combustion.burning_rate, 0.0, f32::MAX)?;
            range("combustion.flame_smoke", self.combustion.flame_smoke, 0.0, f32::MAX)?;
            finite("combustion.ignition_temp", self.combustion.ignition_temp)?;
            finite("combustion.max_temp", self.combustion.max_temp)?;
        }

        if self.guiding.enabled {
            positive("guiding.tau", self.guiding.tau)?;
            positive("guiding.sigma", self.guiding.sigma)?;
            range("guiding.theta", self.guiding.theta, 0.0, 1.0)?;
            positive("guiding.eps_abs", self.guiding.eps_abs)?;
            range("guiding.eps_rel", self.guiding.eps_rel, 0.0, f32::MAX)?;
        }

        if self.dissolve.enabled {
            range("dissolve.speed", self.dissolve.speed, 1.0, f32::MAX)?;
        }
        Ok(())
    }

    // ========== Persistence ==========

    /// Save configuration to JSON file
    pub fn save_json(&self, path: &Path) -> Result<(), ConfigError> {
        let json =
            serde_json::to_string_pretty(self).map_err(|e| ConfigError::Parse(e.to_string()))?;
        write_file(path, json)
    }

    /// Load configuration from JSON file
    pub fn load_json(path: &Path) -> Result<Self, ConfigError> {
        let json = read_file(path)?;
        serde_json::from_str(&json).map_err(|e| ConfigError::Parse(e.to_string()))
    }

    /// Save configuration to YAML file
    pub fn save_yaml(&self, path: &Path) -> Result<(), ConfigError> {
        let yaml = serde_yaml::to_string(self).map_err(|e| ConfigError::Parse(e.to_string()))?;
        write_file(path, yaml)
    }

    /// Load configuration from YAML file
    pub fn load_yaml(path: &Path) -> Result<Self, ConfigError> {
        let yaml = read_file(path)?;
        serde_yaml::from_str(&yaml).map_err(|e| ConfigError::Parse(e.to_string()))
    }

    /// Load from JSON or YAML depending on the file extension.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        if is_yaml(path) {
            Self::load_yaml(path)
        } else {
            Self::load_json(path)
        }
    }
}

/// True for `.yaml` / `.yml` paths.
pub fn is_yaml(path: &Path) -> bool {
    matches!(
        path.extension().and_then(|e| e.to_str()),
        Some("yaml") | Some("yml")
    )
}

fn read_file(path: &Path) -> Result<String, ConfigError> {
    std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })
}

fn write_file(path: &Path, contents: String) -> Result<(), ConfigError> {
    std::fs::write(path, contents).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })
}

fn positive(field: &'static str, value: f32) -> Result<(), ConfigError> {
    if value > 0.0 && value.is_finite() {
        Ok(())
    } else {
        Err(ConfigError::NotPositive { field, value })
    }
}

fn finite(field: &'static str, value: f32) -> Result<(), ConfigError> {
    range(field, value, f32::MIN, f32::MAX)
}

fn range(field: &'static str, value: f32, min: f32, max: f32) -> Result<(), ConfigError> {
    if value >= min && value <= max {
        Ok(())
    } else {
        Err(ConfigError::OutOfRange {
            field,
            value,
            min,
            max,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        assert!(SmokeConfig::default().validate().is_ok());
    }

    #[test]
    fn test_rejects_tiny_resolution() {
        let mut config = SmokeConfig::default();
        config.resolution = [2, 16, 16];
        assert!(matches!(
            config.validate(),
            Err(ConfigError::ResolutionTooSmall { .. })
        ));
    }

    #[test]
    fn test_rejects_boundary_wider_than_domain() {
        let mut config = SmokeConfig::cube(8, 1.0);
        config.boundary_width = 4;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::BoundaryTooWide { width: 4, .. })
        ));
    }

    #[test]
    fn test_rejects_zero_upres_only_with_noise() {
        let mut config = SmokeConfig::default();
        config.noise.upres = 0;
        assert!(config.validate().is_ok());
        config.features.noise = true;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidUpres { got: 0, .. })
        ));
    }

    #[test]
    fn test_rejects_nan_cfl() {
        let mut config = SmokeConfig::default();
        config.timing.cfl = f32::NAN;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::NotPositive { field: "timing.cfl", .. })
        ));
    }

    #[test]
    fn test_pressure_fixing_follows_open_bounds() {
        let mut config = SmokeConfig::default();
        assert!(config.pressure_fixing());
        config.open_boundaries.y_max = true;
        assert!(!config.pressure_fixing());
        config.guiding.zero_pressure_fixing = Some(true);
        assert!(config.guiding_pressure_fixing());
        assert!(!config.pressure_fixing());
    }

    #[test]
    fn test_yaml_partial_config_uses_defaults() {
        let yaml = "resolution: [16, 24, 16]\nfeatures:\n  fire: true\nopen_boundaries:\n  y_max: true\n";
        let config: SmokeConfig = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.resolution, [16, 24, 16]);
        assert!(config.features.fire);
        assert!(!config.features.noise);
        assert!(config.open_boundaries.y_max);
        assert_eq!(config.combustion, CombustionParams::default());
    }

    #[test]
    fn test_json_roundtrip_through_file() {
        let dir = std::env::temp_dir().join(format!("smoke3d-config-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("scene.json");

        let mut config = SmokeConfig::cube(24, 2.0);
        config.features.noise = true;
        config.noise.upres = 4;
        config.save_json(&path).unwrap();
        let loaded = SmokeConfig::load(&path).unwrap();
        assert_eq!(loaded, config);

        std::fs::remove_dir_all(&dir).ok();
    }
}
