//! Serde helpers for glam vectors in config and scene files.
//!
//! Vectors are written as `{ x, y, z }` and read from either that form or a
//! plain `[x, y, z]` array, which is what hand-written YAML tends to use.

use glam::Vec3;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Serde proxy for Vec3
#[derive(Serialize, Deserialize)]
pub struct Vec3Def {
    pub x: f32,
    pub y: f32,
    pub z: f32,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum Vec3Repr {
    Fields(Vec3Def),
    Array([f32; 3]),
}

impl From<Vec3> for Vec3Def {
    fn from(v: Vec3) -> Self {
        Self { x: v.x, y: v.y, z: v.z }
    }
}

impl From<Vec3Repr> for Vec3 {
    fn from(repr: Vec3Repr) -> Self {
        match repr {
            Vec3Repr::Fields(d) => Vec3::new(d.x, d.y, d.z),
            Vec3Repr::Array(a) => Vec3::from_array(a),
        }
    }
}

pub fn serialize_vec3<S>(v: &Vec3, s: S) -> Result<S::Ok, S::Error>
where
    S: Serializer,
{
    Vec3Def::from(*v).serialize(s)
}

pub fn deserialize_vec3<'de, D>(d: D) -> Result<Vec3, D::Error>
where
    D: Deserializer<'de>,
{
    Vec3Repr::deserialize(d).map(Vec3::from)
}
