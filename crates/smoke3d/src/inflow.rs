//! Smoke and fuel sources.
//!
//! An emitter is a world-space box. It is applied once per frame in the
//! pre-step, at base resolution and again at noise resolution, before the
//! level sets are joined.

use glam::Vec3;
use serde::{Deserialize, Serialize};

use crate::grid::{GridDims, ScalarGrid, VecGrid};
use crate::serde_utils::{deserialize_vec3, serialize_vec3};
use crate::store::{ColorGrids, FireGrids};

/// How emitted values combine with what is already in a cell.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InflowMode {
    /// Raise the cell to the emitted value
    #[default]
    Absolute,
    /// Add the emitted value every frame
    Additive,
}

/// Box-shaped source of density, heat, fuel and color.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Emitter {
    #[serde(serialize_with = "serialize_vec3", deserialize_with = "deserialize_vec3")]
    pub min: Vec3,
    #[serde(serialize_with = "serialize_vec3", deserialize_with = "deserialize_vec3")]
    pub max: Vec3,
    pub density: f32,
    pub heat: f32,
    pub fuel: f32,
    #[serde(serialize_with = "serialize_vec3", deserialize_with = "deserialize_vec3")]
    pub color: Vec3,
    /// Initial velocity forced inside the box, if any
    pub velocity: Option<[f32; 3]>,
    pub mode: InflowMode,
}

impl Default for Emitter {
    fn default() -> Self {
        Self {
            min: Vec3::ZERO,
            max: Vec3::ZERO,
            density: 1.0,
            heat: 0.0,
            fuel: 0.0,
            color: Vec3::splat(0.7),
            velocity: None,
            mode: InflowMode::Absolute,
        }
    }
}

/// Grids an emitter writes into at one resolution.
pub struct InflowTargets<'a> {
    pub density: &'a mut ScalarGrid,
    pub heat: Option<&'a mut ScalarGrid>,
    pub fire: Option<&'a mut FireGrids>,
    pub colors: Option<&'a mut ColorGrids>,
    /// Initial velocity and its mask, base resolution only
    pub velocity: Option<(&'a mut VecGrid, &'a mut [bool])>,
}

impl Emitter {
    pub fn new(min: Vec3, max: Vec3) -> Self {
        Self {
            min,
            max,
            ..Default::default()
        }
    }

    pub fn with_density(mut self, density: f32) -> Self {
        self.density = density;
        self
    }

    pub fn with_heat(mut self, heat: f32) -> Self {
        self.heat = heat;
        self
    }

    pub fn with_fuel(mut self, fuel: f32) -> Self {
        self.fuel = fuel;
        self
    }

    pub fn with_color(mut self, color: Vec3) -> Self {
        self.color = color;
        self
    }

    pub fn with_velocity(mut self, velocity: Vec3) -> Self {
        self.velocity = Some(velocity.to_array());
        self
    }

    pub fn with_mode(mut self, mode: InflowMode) -> Self {
        self.mode = mode;
        self
    }

    /// Indices of the cells whose centres lie inside the box.
    pub fn cells(&self, dims: &GridDims) -> Vec<usize> {
        let mut out = Vec::new();
        for k in 0..dims.nz {
            for j in 0..dims.ny {
                for i in 0..dims.nx {
                    let c = dims.cell_center_world(i, j, k);
                    if c.cmpge(self.min).all() && c.cmple(self.max).all() {
                        out.push(dims.cell_index(i, j, k));
                    }
                }
            }
        }
        out
    }

    fn combine(&self, current: f32, emitted: f32) -> f32 {
        match self.mode {
            InflowMode::Absolute => current.max(emitted),
            InflowMode::Additive => current + emitted,
        }
    }

    /// Emit into one resolution. Colors grow with the added density so they
    /// stay premultiplied.
    pub fn apply(&self, targets: &mut InflowTargets<'_>) {
        let dims = *targets.density.dims();
        let cells = self.cells(&dims);
        if cells.is_empty() {
            return;
        }

        for &idx in &cells {
            let old = targets.density.data()[idx];
            let new = self.combine(old, self.density);
            targets.density.data_mut()[idx] = new;

            if let Some(colors) = targets.colors.as_deref_mut() {
                let added = new - old;
                for (channel, c) in colors.channels_mut().into_iter().zip(self.color.to_array()) {
                    channel.data_mut()[idx] += added * c;
                }
            }
            if let Some(heat) = targets.heat.as_deref_mut() {
                if self.heat != 0.0 {
                    let h = heat.data()[idx];
                    heat.data_mut()[idx] = self.combine(h, self.heat);
                }
            }
            if let Some(fire) = targets.fire.as_deref_mut() {
                if self.fuel > 0.0 {
                    let f = fire.fuel.data()[idx];
                    fire.fuel.data_mut()[idx] = self.combine(f, self.fuel);
                }
            }
            if let (Some(v), Some((initial, mask))) = (self.velocity, targets.velocity.as_mut()) {
                initial.data_mut()[idx] = Vec3::from_array(v);
                mask[idx] = true;
            }
        }
    }
}
