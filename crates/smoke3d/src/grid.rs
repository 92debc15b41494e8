//! Dense 3D fields on a fixed-resolution domain.
//!
//! Two layouts share one set of index conventions:
//! - cell-centred fields (`Field<T>`, aliased as `ScalarGrid` / `VecGrid`)
//! - the staggered MAC velocity (`MacGrid`), with
//!   - u (X-velocity) on YZ faces at x = i * dx
//!   - v (Y-velocity) on XZ faces at y = j * dx
//!   - w (Z-velocity) on XY faces at z = k * dx
//!
//! Sampling functions take positions in *grid space*: one unit per cell,
//! cell (i, j, k) spans `[i, i+1) x [j, j+1) x [k, k+1)` and its centre sits
//! at `i + 0.5`. World space is grid space scaled by `cell_size`.

use std::ops::{Add, Mul, Sub};

use glam::Vec3;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

/// Resolution and cell size of one simulation domain.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct GridDims {
    /// Number of cells in X direction
    pub nx: usize,
    /// Number of cells in Y direction
    pub ny: usize,
    /// Number of cells in Z direction
    pub nz: usize,
    /// Size of each cell in world units
    pub cell_size: f32,
}

impl GridDims {
    pub fn new(nx: usize, ny: usize, nz: usize, cell_size: f32) -> Self {
        assert!(cell_size > 0.0, "cell_size must be positive, got {}", cell_size);
        assert!(
            nx > 0 && ny > 0 && nz > 0,
            "grid resolution must be non-zero, got {}x{}x{}",
            nx,
            ny,
            nz
        );
        Self { nx, ny, nz, cell_size }
    }

    /// Same world box, `factor` times more cells per axis.
    pub fn upsampled(&self, factor: usize) -> Self {
        Self::new(
            self.nx * factor,
            self.ny * factor,
            self.nz * factor,
            self.cell_size / factor as f32,
        )
    }

    pub fn cell_count(&self) -> usize {
        self.nx * self.ny * self.nz
    }

    pub fn u_count(&self) -> usize {
        (self.nx + 1) * self.ny * self.nz
    }

    pub fn v_count(&self) -> usize {
        self.nx * (self.ny + 1) * self.nz
    }

    pub fn w_count(&self) -> usize {
        self.nx * self.ny * (self.nz + 1)
    }

    /// Largest axis resolution.
    pub fn max_res(&self) -> usize {
        self.nx.max(self.ny).max(self.nz)
    }

    /// Size of the domain in world units.
    pub fn world_size(&self) -> Vec3 {
        Vec3::new(self.nx as f32, self.ny as f32, self.nz as f32) * self.cell_size
    }

    /// Number of cells in one XY slab (one value of k).
    #[inline]
    pub fn slab(&self) -> usize {
        self.nx * self.ny
    }

    // ========== Index functions ==========

    /// Index into cell-centred arrays.
    #[inline]
    pub fn cell_index(&self, i: usize, j: usize, k: usize) -> usize {
        k * self.nx * self.ny + j * self.nx + i
    }

    /// Inverse of `cell_index`.
    #[inline]
    pub fn cell_coords(&self, idx: usize) -> (usize, usize, usize) {
        let i = idx % self.nx;
        let j = (idx / self.nx) % self.ny;
        let k = idx / (self.nx * self.ny);
        (i, j, k)
    }

    /// Index into U velocity array (left YZ faces).
    /// U array has dimensions (nx+1) x ny x nz.
    #[inline]
    pub fn u_index(&self, i: usize, j: usize, k: usize) -> usize {
        k * (self.nx + 1) * self.ny + j * (self.nx + 1) + i
    }

    /// Index into V velocity array (bottom XZ faces).
    /// V array has dimensions nx x (ny+1) x nz.
    #[inline]
    pub fn v_index(&self, i: usize, j: usize, k: usize) -> usize {
        k * self.nx * (self.ny + 1) + j * self.nx + i
    }

    /// Index into W velocity array (back XY faces).
    /// W array has dimensions nx x ny x (nz+1).
    #[inline]
    pub fn w_index(&self, i: usize, j: usize, k: usize) -> usize {
        k * self.nx * self.ny + j * self.nx + i
    }

    // ========== Position helpers ==========

    /// Grid-space position of the centre of cell (i, j, k).
    #[inline]
    pub fn cell_center(&self, i: usize, j: usize, k: usize) -> Vec3 {
        Vec3::new(i as f32 + 0.5, j as f32 + 0.5, k as f32 + 0.5)
    }

    /// World position of the centre of cell (i, j, k).
    #[inline]
    pub fn cell_center_world(&self, i: usize, j: usize, k: usize) -> Vec3 {
        self.cell_center(i, j, k) * self.cell_size
    }

    /// Convert a world position to (floored) cell indices.
    #[inline]
    pub fn world_to_cell(&self, pos: Vec3) -> (i32, i32, i32) {
        let cell_pos = pos / self.cell_size;
        (
            cell_pos.x.floor() as i32,
            cell_pos.y.floor() as i32,
            cell_pos.z.floor() as i32,
        )
    }

    /// Check if signed cell indices are within bounds.
    #[inline]
    pub fn cell_in_bounds(&self, i: i32, j: i32, k: i32) -> bool {
        i >= 0
            && i < self.nx as i32
            && j >= 0
            && j < self.ny as i32
            && k >= 0
            && k < self.nz as i32
    }

    /// Clamp a grid-space position to the domain box.
    #[inline]
    pub fn clamp_position(&self, p: Vec3) -> Vec3 {
        p.clamp(
            Vec3::ZERO,
            Vec3::new(self.nx as f32, self.ny as f32, self.nz as f32),
        )
    }
}

// ========== Interpolation ==========

/// Values that can live in a grid and be interpolated.
pub trait CellValue:
    Copy + Send + Sync + Default + Add<Output = Self> + Sub<Output = Self> + Mul<f32, Output = Self>
{
    fn min_of(self, other: Self) -> Self;
    fn max_of(self, other: Self) -> Self;
}

impl CellValue for f32 {
    #[inline]
    fn min_of(self, other: Self) -> Self {
        self.min(other)
    }

    #[inline]
    fn max_of(self, other: Self) -> Self {
        self.max(other)
    }
}

impl CellValue for Vec3 {
    #[inline]
    fn min_of(self, other: Self) -> Self {
        self.min(other)
    }

    #[inline]
    fn max_of(self, other: Self) -> Self {
        self.max(other)
    }
}

/// Lower corner index and fractional weight along one axis, clamped so that
/// `i0 + 1` stays inside `0..n`.
#[inline]
fn axis_weights(x: f32, n: usize) -> (usize, usize, f32) {
    if n <= 1 {
        return (0, 0, 0.0);
    }
    let x = x.clamp(0.0, (n - 1) as f32);
    let i0 = (x.floor() as usize).min(n - 2);
    (i0, i0 + 1, x - i0 as f32)
}

/// Trilinear interpolation over a node array of size `size`, at node-space
/// coordinates (x, y, z). Out-of-range coordinates clamp to the edge.
/// Also returns the min and max of the eight contributing nodes.
pub(crate) fn trilinear_bounded<T: CellValue>(
    data: &[T],
    size: [usize; 3],
    x: f32,
    y: f32,
    z: f32,
) -> (T, T, T) {
    let (i0, i1, tx) = axis_weights(x, size[0]);
    let (j0, j1, ty) = axis_weights(y, size[1]);
    let (k0, k1, tz) = axis_weights(z, size[2]);
    let at = |i: usize, j: usize, k: usize| data[k * size[0] * size[1] + j * size[0] + i];

    let c000 = at(i0, j0, k0);
    let c100 = at(i1, j0, k0);
    let c010 = at(i0, j1, k0);
    let c110 = at(i1, j1, k0);
    let c001 = at(i0, j0, k1);
    let c101 = at(i1, j0, k1);
    let c011 = at(i0, j1, k1);
    let c111 = at(i1, j1, k1);

    let lo = c000
        .min_of(c100)
        .min_of(c010)
        .min_of(c110)
        .min_of(c001)
        .min_of(c101)
        .min_of(c011)
        .min_of(c111);
    let hi = c000
        .max_of(c100)
        .max_of(c010)
        .max_of(c110)
        .max_of(c001)
        .max_of(c101)
        .max_of(c011)
        .max_of(c111);

    let c00 = c000 * (1.0 - tx) + c100 * tx;
    let c10 = c010 * (1.0 - tx) + c110 * tx;
    let c01 = c001 * (1.0 - tx) + c101 * tx;
    let c11 = c011 * (1.0 - tx) + c111 * tx;
    let c0 = c00 * (1.0 - ty) + c10 * ty;
    let c1 = c01 * (1.0 - ty) + c11 * ty;
    (c0 * (1.0 - tz) + c1 * tz, lo, hi)
}

#[inline]
pub(crate) fn trilinear<T: CellValue>(data: &[T], size: [usize; 3], x: f32, y: f32, z: f32) -> T {
    trilinear_bounded(data, size, x, y, z).0
}

// ========== Cell-centred fields ==========

/// Dense cell-centred field.
#[derive(Clone, Debug, PartialEq)]
pub struct Field<T> {
    dims: GridDims,
    data: Vec<T>,
}

/// Cell-centred scalar field (density, heat, fuel, ...).
pub type ScalarGrid = Field<f32>;

/// Cell-centred vector field (forces, obstacle velocity, texture coordinates).
pub type VecGrid = Field<Vec3>;

impl<T: CellValue> Field<T> {
    /// Create a field filled with the default value (zero).
    pub fn new(dims: GridDims) -> Self {
        Self::filled(dims, T::default())
    }

    pub fn filled(dims: GridDims, value: T) -> Self {
        Self {
            dims,
            data: vec![value; dims.cell_count()],
        }
    }

    /// Wrap an existing buffer; `None` if its length does not match `dims`.
    pub fn from_vec(dims: GridDims, data: Vec<T>) -> Option<Self> {
        (data.len() == dims.cell_count()).then_some(Self { dims, data })
    }

    /// Wrap a buffer known to match `dims`.
    pub(crate) fn with_data(dims: GridDims, data: Vec<T>) -> Self {
        assert_eq!(
            data.len(),
            dims.cell_count(),
            "buffer of {} values does not fit a grid of {} cells",
            data.len(),
            dims.cell_count()
        );
        Self { dims, data }
    }

    pub fn dims(&self) -> &GridDims {
        &self.dims
    }

    pub fn data(&self) -> &[T] {
        &self.data
    }

    pub fn data_mut(&mut self) -> &mut [T] {
        &mut self.data
    }

    pub fn into_vec(self) -> Vec<T> {
        self.data
    }

    #[inline]
    pub fn get(&self, i: usize, j: usize, k: usize) -> T {
        self.data[self.dims.cell_index(i, j, k)]
    }

    #[inline]
    pub fn set(&mut self, i: usize, j: usize, k: usize, value: T) {
        let idx = self.dims.cell_index(i, j, k);
        self.data[idx] = value;
    }

    pub fn fill(&mut self, value: T) {
        self.data.fill(value);
    }

    /// Replace contents with another field of the same resolution.
    pub fn copy_from(&mut self, other: &Field<T>) {
        debug_assert_eq!(self.dims.cell_count(), other.dims.cell_count());
        self.data.copy_from_slice(&other.data);
    }

    /// Swap the buffer for a freshly computed one of the same size.
    pub(crate) fn replace_data(&mut self, data: Vec<T>) {
        debug_assert_eq!(data.len(), self.data.len());
        self.data = data;
    }

    /// Trilinear sample at a grid-space position.
    #[inline]
    pub fn sample(&self, p: Vec3) -> T {
        self.sample_bounded(p).0
    }

    /// Trilinear sample plus the min/max of the eight contributing cells.
    #[inline]
    pub fn sample_bounded(&self, p: Vec3) -> (T, T, T) {
        trilinear_bounded(
            &self.data,
            [self.dims.nx, self.dims.ny, self.dims.nz],
            p.x - 0.5,
            p.y - 0.5,
            p.z - 0.5,
        )
    }

    /// Resample `source` (same world box, any resolution) into this field.
    pub fn interpolate_from(&mut self, source: &Field<T>) {
        let dims = self.dims;
        let scale = dims.cell_size / source.dims.cell_size;
        self.data
            .par_chunks_mut(dims.slab())
            .enumerate()
            .for_each(|(k, slab)| {
                for j in 0..dims.ny {
                    for i in 0..dims.nx {
                        let p = dims.cell_center(i, j, k) * scale;
                        slab[j * dims.nx + i] = source.sample(p);
                    }
                }
            });
    }
}

impl<T: CellValue> Field<T> {
    /// Grow values from `valid` cells into invalid cells of `region`, one
    /// layer of face neighbours per iteration. Each new value is the average
    /// of its valid neighbours.
    pub fn extrapolate(&mut self, valid: &[bool], region: &[bool], layers: usize) {
        let dims = self.dims;
        let mut valid = valid.to_vec();
        for _ in 0..layers {
            let src = self.data.clone();
            let prev_valid = valid.clone();
            let grown: Vec<(usize, T)> = (0..dims.cell_count())
                .into_par_iter()
                .filter(|&idx| region[idx] && !prev_valid[idx])
                .filter_map(|idx| {
                    let (i, j, k) = dims.cell_coords(idx);
                    let mut sum = T::default();
                    let mut count = 0usize;
                    for n in crate::levelset::neighbors6(&dims, i, j, k) {
                        if prev_valid[n] {
                            sum = sum + src[n];
                            count += 1;
                        }
                    }
                    (count > 0).then(|| (idx, sum * (1.0 / count as f32)))
                })
                .collect();
            if grown.is_empty() {
                break;
            }
            for (idx, value) in grown {
                self.data[idx] = value;
                valid[idx] = true;
            }
        }
    }
}

impl Field<f32> {
    /// Sum of all cell values, accumulated in f64.
    pub fn total(&self) -> f64 {
        self.data.iter().map(|&v| v as f64).sum()
    }

    pub fn max_abs(&self) -> f32 {
        self.data.iter().fold(0.0f32, |m, v| m.max(v.abs()))
    }
}

// ========== Staggered velocity ==========

/// Velocity component / face orientation.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Axis {
    X,
    Y,
    Z,
}

impl Axis {
    pub const ALL: [Axis; 3] = [Axis::X, Axis::Y, Axis::Z];

    #[inline]
    pub fn index(self) -> usize {
        match self {
            Axis::X => 0,
            Axis::Y => 1,
            Axis::Z => 2,
        }
    }

    /// Grid-space position of face node (0, 0, 0).
    #[inline]
    pub fn node_offset(self) -> Vec3 {
        match self {
            Axis::X => Vec3::new(0.0, 0.5, 0.5),
            Axis::Y => Vec3::new(0.5, 0.0, 0.5),
            Axis::Z => Vec3::new(0.5, 0.5, 0.0),
        }
    }

    #[inline]
    pub fn unit(self) -> (i32, i32, i32) {
        match self {
            Axis::X => (1, 0, 0),
            Axis::Y => (0, 1, 0),
            Axis::Z => (0, 0, 1),
        }
    }

    /// The two cells separated by face (i, j, k): lower side first.
    #[inline]
    pub fn face_cells(self, i: usize, j: usize, k: usize) -> ((i32, i32, i32), (i32, i32, i32)) {
        let (di, dj, dk) = self.unit();
        let (i, j, k) = (i as i32, j as i32, k as i32);
        ((i - di, j - dj, k - dk), (i, j, k))
    }

    /// This axis' component of a vector.
    #[inline]
    pub fn of(self, v: Vec3) -> f32 {
        v[self.index()]
    }
}

/// Face-sampled velocity in world units per second.
#[derive(Clone, Debug, PartialEq)]
pub struct MacGrid {
    dims: GridDims,
    /// U velocity (X-component) on left YZ faces, (nx+1) * ny * nz
    pub u: Vec<f32>,
    /// V velocity (Y-component) on bottom XZ faces, nx * (ny+1) * nz
    pub v: Vec<f32>,
    /// W velocity (Z-component) on back XY faces, nx * ny * (nz+1)
    pub w: Vec<f32>,
}

impl MacGrid {
    pub fn new(dims: GridDims) -> Self {
        Self {
            dims,
            u: vec![0.0; dims.u_count()],
            v: vec![0.0; dims.v_count()],
            w: vec![0.0; dims.w_count()],
        }
    }

    /// Uniform velocity on every face.
    pub fn uniform(dims: GridDims, velocity: Vec3) -> Self {
        Self {
            dims,
            u: vec![velocity.x; dims.u_count()],
            v: vec![velocity.y; dims.v_count()],
            w: vec![velocity.z; dims.w_count()],
        }
    }

    pub fn dims(&self) -> &GridDims {
        &self.dims
    }

    pub fn clear(&mut self) {
        self.u.fill(0.0);
        self.v.fill(0.0);
        self.w.fill(0.0);
    }

    pub fn copy_from(&mut self, other: &MacGrid) {
        self.u.copy_from_slice(&other.u);
        self.v.copy_from_slice(&other.v);
        self.w.copy_from_slice(&other.w);
    }

    /// Face values of one component.
    #[inline]
    pub fn component(&self, axis: Axis) -> &[f32] {
        match axis {
            Axis::X => &self.u,
            Axis::Y => &self.v,
            Axis::Z => &self.w,
        }
    }

    #[inline]
    pub fn component_mut(&mut self, axis: Axis) -> &mut Vec<f32> {
        match axis {
            Axis::X => &mut self.u,
            Axis::Y => &mut self.v,
            Axis::Z => &mut self.w,
        }
    }

    /// Node counts of one component's face array.
    #[inline]
    pub fn size(&self, axis: Axis) -> [usize; 3] {
        match axis {
            Axis::X => self.u_size(),
            Axis::Y => self.v_size(),
            Axis::Z => self.w_size(),
        }
    }

    /// Index of face (i, j, k) in one component's array.
    #[inline]
    pub fn face_index(&self, axis: Axis, i: usize, j: usize, k: usize) -> usize {
        match axis {
            Axis::X => self.dims.u_index(i, j, k),
            Axis::Y => self.dims.v_index(i, j, k),
            Axis::Z => self.dims.w_index(i, j, k),
        }
    }

    /// Rewrite every face of one component as `f(i, j, k, old)`.
    pub fn map_component<F>(&mut self, axis: Axis, f: F)
    where
        F: Fn(usize, usize, usize, f32) -> f32 + Sync,
    {
        let size = self.size(axis);
        map_faces(self.component_mut(axis), size, f);
    }

    #[inline]
    pub fn u_size(&self) -> [usize; 3] {
        [self.dims.nx + 1, self.dims.ny, self.dims.nz]
    }

    #[inline]
    pub fn v_size(&self) -> [usize; 3] {
        [self.dims.nx, self.dims.ny + 1, self.dims.nz]
    }

    #[inline]
    pub fn w_size(&self) -> [usize; 3] {
        [self.dims.nx, self.dims.ny, self.dims.nz + 1]
    }

    /// Interpolated X component at a grid-space position.
    #[inline]
    pub fn sample_u(&self, p: Vec3) -> f32 {
        trilinear(&self.u, self.u_size(), p.x, p.y - 0.5, p.z - 0.5)
    }

    #[inline]
    pub fn sample_v(&self, p: Vec3) -> f32 {
        trilinear(&self.v, self.v_size(), p.x - 0.5, p.y, p.z - 0.5)
    }

    #[inline]
    pub fn sample_w(&self, p: Vec3) -> f32 {
        trilinear(&self.w, self.w_size(), p.x - 0.5, p.y - 0.5, p.z)
    }

    /// Full velocity at a grid-space position.
    #[inline]
    pub fn sample(&self, p: Vec3) -> Vec3 {
        Vec3::new(self.sample_u(p), self.sample_v(p), self.sample_w(p))
    }

    /// Velocity at the centre of cell (i, j, k), averaged from its six faces.
    #[inline]
    pub fn centered(&self, i: usize, j: usize, k: usize) -> Vec3 {
        let d = &self.dims;
        Vec3::new(
            0.5 * (self.u[d.u_index(i, j, k)] + self.u[d.u_index(i + 1, j, k)]),
            0.5 * (self.v[d.v_index(i, j, k)] + self.v[d.v_index(i, j + 1, k)]),
            0.5 * (self.w[d.w_index(i, j, k)] + self.w[d.w_index(i, j, k + 1)]),
        )
    }

    /// Cell-centred copy of the velocity.
    pub fn to_centered(&self) -> VecGrid {
        let dims = self.dims;
        let mut out = VecGrid::new(dims);
        out.data_mut()
            .par_chunks_mut(dims.slab())
            .enumerate()
            .for_each(|(k, slab)| {
                for j in 0..dims.ny {
                    for i in 0..dims.nx {
                        slab[j * dims.nx + i] = self.centered(i, j, k);
                    }
                }
            });
        out
    }

    /// Largest cell-centred speed, used for CFL.
    pub fn max_speed(&self) -> f32 {
        let dims = self.dims;
        (0..dims.nz)
            .into_par_iter()
            .map(|k| {
                let mut max = 0.0f32;
                for j in 0..dims.ny {
                    for i in 0..dims.nx {
                        max = max.max(self.centered(i, j, k).length());
                    }
                }
                max
            })
            .reduce(|| 0.0, f32::max)
    }

    /// Resample `source` (same world box, any resolution) into this grid.
    pub fn interpolate_from(&mut self, source: &MacGrid) {
        let dims = self.dims;
        let scale = dims.cell_size / source.dims.cell_size;
        let (u_size, v_size, w_size) = (self.u_size(), self.v_size(), self.w_size());

        map_faces(&mut self.u, u_size, |i, j, k, _| {
            source.sample_u(Vec3::new(i as f32, j as f32 + 0.5, k as f32 + 0.5) * scale)
        });
        map_faces(&mut self.v, v_size, |i, j, k, _| {
            source.sample_v(Vec3::new(i as f32 + 0.5, j as f32, k as f32 + 0.5) * scale)
        });
        map_faces(&mut self.w, w_size, |i, j, k, _| {
            source.sample_w(Vec3::new(i as f32 + 0.5, j as f32 + 0.5, k as f32) * scale)
        });
    }

    /// Discrete divergence at cell (i, j, k), in 1/s.
    #[inline]
    pub fn divergence_at(&self, i: usize, j: usize, k: usize) -> f32 {
        let d = &self.dims;
        ((self.u[d.u_index(i + 1, j, k)] - self.u[d.u_index(i, j, k)])
            + (self.v[d.v_index(i, j + 1, k)] - self.v[d.v_index(i, j, k)])
            + (self.w[d.w_index(i, j, k + 1)] - self.w[d.w_index(i, j, k)]))
            / d.cell_size
    }
}

/// Rewrite every node of a face array as `f(i, j, k, old)`, in parallel over z-slabs.
pub(crate) fn map_faces<F>(data: &mut [f32], size: [usize; 3], f: F)
where
    F: Fn(usize, usize, usize, f32) -> f32 + Sync,
{
    data.par_chunks_mut(size[0] * size[1])
        .enumerate()
        .for_each(|(k, slab)| {
            for j in 0..size[1] {
                for i in 0..size[0] {
                    let n = j * size[0] + i;
                    slab[n] = f(i, j, k, slab[n]);
                }
            }
        });
}
