//! Animated vector noise and its curl.

use glam::Vec3;
use ::noise::{NoiseFn, Perlin};

use crate::constants::CURL_EPSILON;

/// Three decorrelated Perlin channels animated through a fourth dimension.
///
/// Lookup positions are texture coordinates in base cells; `pos_scale` base
/// cells make one unit of noise space before the octave scale is applied.
#[derive(Clone, Debug)]
pub struct NoiseField {
    channels: [Perlin; 3],
    pos_scale: f32,
    time_anim: f32,
}

impl NoiseField {
    pub fn new(seed: u32, pos_scale: f32, time_anim: f32) -> Self {
        Self {
            channels: [
                Perlin::new(seed),
                Perlin::new(seed.wrapping_add(1)),
                Perlin::new(seed.wrapping_add(2)),
            ],
            pos_scale,
            time_anim,
        }
    }

    fn eval(&self, p: [f64; 3], w: f64) -> [f64; 3] {
        let point = [p[0], p[1], p[2], w];
        [
            self.channels[0].get(point),
            self.channels[1].get(point),
            self.channels[2].get(point),
        ]
    }

    /// Vector noise at texture coordinate `uv` for octave scale `scale`.
    pub fn sample(&self, uv: Vec3, scale: f32, time: f32) -> Vec3 {
        let p = (uv * (scale / self.pos_scale)).as_dvec3();
        let v = self.eval(p.to_array(), (time * self.time_anim) as f64);
        Vec3::new(v[0] as f32, v[1] as f32, v[2] as f32)
    }

    /// Curl of the vector noise by central differences in noise space.
    /// Divergence-free up to the difference error.
    pub fn curl(&self, uv: Vec3, scale: f32, time: f32) -> Vec3 {
        let p = (uv * (scale / self.pos_scale)).as_dvec3().to_array();
        let w = (time * self.time_anim) as f64;
        let h = CURL_EPSILON;

        let offset = |axis: usize, sign: f64| {
            let mut q = p;
            q[axis] += sign * h;
            self.eval(q, w)
        };
        // d[axis][channel] = dF_channel / d axis
        let mut d = [[0.0f64; 3]; 3];
        for (axis, row) in d.iter_mut().enumerate() {
            let (hi, lo) = (offset(axis, 1.0), offset(axis, -1.0));
            for c in 0..3 {
                row[c] = (hi[c] - lo[c]) / (2.0 * h);
            }
        }
        Vec3::new(
            (d[1][2] - d[2][1]) as f32,
            (d[2][0] - d[0][2]) as f32,
            (d[0][1] - d[1][0]) as f32,
        )
    }
}
