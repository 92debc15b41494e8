//! Texture coordinate carriers for the noise lookup.
//!
//! A carrier starts at identity (every cell holds its own centre) and is
//! advected with the base flow, so noise looked up through it moves with the
//! smoke. Advected coordinates shear over time; each carrier is therefore
//! reset periodically and blended with a triangle weight that is zero at the
//! reset. Carriers are staggered by `reset_time / count`, so with two of them
//! the weights always sum to one.

use glam::Vec3;
use rayon::prelude::*;

use crate::grid::{GridDims, VecGrid};

#[derive(Clone, Debug, PartialEq)]
pub struct UvGrid {
    coords: VecGrid,
    index: usize,
    weight: f32,
    last_phase: Option<f32>,
}

impl UvGrid {
    /// Identity carrier number `index`.
    pub fn new(dims: GridDims, index: usize) -> Self {
        let mut uv = Self {
            coords: VecGrid::new(dims),
            index,
            weight: 0.0,
            last_phase: None,
        };
        uv.reset();
        uv
    }

    /// Put every cell back at its own centre (grid space).
    pub fn reset(&mut self) {
        let dims = *self.coords.dims();
        self.coords
            .data_mut()
            .par_iter_mut()
            .enumerate()
            .for_each(|(idx, c)| {
                let (i, j, k) = dims.cell_coords(idx);
                *c = dims.cell_center(i, j, k);
            });
    }

    pub fn coords(&self) -> &VecGrid {
        &self.coords
    }

    pub fn coords_mut(&mut self) -> &mut VecGrid {
        &mut self.coords
    }

    pub fn index(&self) -> usize {
        self.index
    }

    /// Blend weight in `[0, 1]` from the last `update_weight`.
    pub fn weight(&self) -> f32 {
        self.weight
    }

    /// Phase of this carrier in `[0, 1)` at `time`.
    pub fn phase(&self, time: f32, reset_time: f32, count: usize) -> f32 {
        let offset = self.index as f32 * reset_time / count.max(1) as f32;
        (time + offset).rem_euclid(reset_time) / reset_time
    }

    /// Refresh the blend weight for `time`, resetting the coordinates when
    /// the phase wrapped since the last call or time has not started yet.
    pub fn update_weight(&mut self, time: f32, reset_time: f32, count: usize) {
        let phase = self.phase(time, reset_time, count);
        let wrapped = self.last_phase.is_some_and(|last| phase < last);
        if time <= 0.0 || wrapped {
            self.reset();
        }
        self.last_phase = Some(phase);
        self.weight = 1.0 - (2.0 * phase - 1.0).abs();
    }

    /// Coordinate at a grid-space position of the carrier's grid.
    pub fn sample(&self, p: Vec3) -> Vec3 {
        self.coords.sample(p)
    }
}
