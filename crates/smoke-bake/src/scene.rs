//! Scene files: a domain configuration plus what happens in it.
//!
//! ```yaml
//! config:
//!   resolution: [64, 96, 64]
//!   features: { heat: true, fire: true, noise: true }
//! frames: [1, 120]
//! emitters:
//!   - frames: [1, 60]
//!     source: { min: [0.4, 0.0, 0.4], max: [0.6, 0.1, 0.6], fuel: 1.0, heat: 2.0 }
//! obstacles:
//!   - shape: sphere
//!     center: [0.5, 0.6, 0.5]
//!     radius: 0.12
//! ```

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use smoke3d::config::is_yaml;
use smoke3d::{Emitter, FrameInputs, GridDims, LevelSet, SmokeConfig, Vec3};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SceneError {
    #[error("cannot read scene {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid yaml scene: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("invalid json scene: {0}")]
    Json(#[from] serde_json::Error),
}

/// Emitter active over an inclusive frame range.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TimedEmitter {
    /// First and last frame, inclusive. Missing means every frame.
    #[serde(default)]
    pub frames: Option<[u32; 2]>,
    pub source: Emitter,
}

impl TimedEmitter {
    pub fn active(&self, frame: u32) -> bool {
        match self.frames {
            Some([first, last]) => (first..=last).contains(&frame),
            None => true,
        }
    }
}

/// Static solid or outflow region.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "shape", rename_all = "snake_case")]
pub enum Shape {
    Box { min: [f32; 3], max: [f32; 3] },
    Sphere { center: [f32; 3], radius: f32 },
}

impl Shape {
    pub fn level_set(&self, dims: GridDims) -> LevelSet {
        match *self {
            Shape::Box { min, max } => LevelSet::from_box(dims, Vec3::from(min), Vec3::from(max)),
            Shape::Sphere { center, radius } => {
                LevelSet::from_sphere(dims, Vec3::from(center), radius)
            }
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct Scene {
    pub config: SmokeConfig,
    /// Default bake range, inclusive
    pub frames: [u32; 2],
    pub emitters: Vec<TimedEmitter>,
    pub obstacles: Vec<Shape>,
    pub outflows: Vec<Shape>,
}

impl Default for Scene {
    fn default() -> Self {
        Self {
            config: SmokeConfig::default(),
            frames: [1, 250],
            emitters: Vec::new(),
            obstacles: Vec::new(),
            outflows: Vec::new(),
        }
    }
}

impl Scene {
    pub fn load(path: &Path) -> Result<Self, SceneError> {
        let text = std::fs::read_to_string(path).map_err(|source| SceneError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let scene = if is_yaml(path) {
            serde_yaml::from_str(&text)?
        } else {
            serde_json::from_str(&text)?
        };
        Ok(scene)
    }

    /// Union of all shapes as one level set, or `None` for an empty list.
    pub fn joined(shapes: &[Shape], dims: GridDims) -> Option<LevelSet> {
        let mut shapes = shapes.iter();
        let mut phi = shapes.next()?.level_set(dims);
        for shape in shapes {
            phi.join(&shape.level_set(dims));
        }
        Some(phi)
    }

    pub fn inputs_for(&self, frame: u32) -> FrameInputs {
        FrameInputs {
            emitters: self
                .emitters
                .iter()
                .filter(|e| e.active(frame))
                .map(|e| e.source.clone())
                .collect(),
            ..Default::default()
        }
    }
}
