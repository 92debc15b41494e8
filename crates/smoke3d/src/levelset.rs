//! Signed distance fields for obstacle and outflow regions.
//!
//! Negative inside, positive outside, in world units.

use glam::Vec3;
use rayon::prelude::*;

use crate::grid::{GridDims, ScalarGrid};

/// Signed distance field over one domain.
#[derive(Clone, Debug, PartialEq)]
pub struct LevelSet {
    phi: ScalarGrid,
}

impl LevelSet {
    /// A level set with no inside region.
    pub fn empty(dims: GridDims) -> Self {
        Self {
            phi: ScalarGrid::filled(dims, far_distance(&dims)),
        }
    }

    /// Wrap precomputed distances.
    pub fn from_grid(phi: ScalarGrid) -> Self {
        Self { phi }
    }

    /// Exact signed distance to an axis-aligned world-space box.
    pub fn from_box(dims: GridDims, min: Vec3, max: Vec3) -> Self {
        let center = (min + max) * 0.5;
        let half = (max - min).abs() * 0.5;
        let mut phi = ScalarGrid::new(dims);
        phi.data_mut()
            .par_chunks_mut(dims.slab())
            .enumerate()
            .for_each(|(k, slab)| {
                for j in 0..dims.ny {
                    for i in 0..dims.nx {
                        let q = (dims.cell_center_world(i, j, k) - center).abs() - half;
                        let outside = q.max(Vec3::ZERO).length();
                        let inside = q.max_element().min(0.0);
                        slab[j * dims.nx + i] = outside + inside;
                    }
                }
            });
        Self { phi }
    }

    /// Exact signed distance to a world-space sphere.
    pub fn from_sphere(dims: GridDims, center: Vec3, radius: f32) -> Self {
        let mut phi = ScalarGrid::new(dims);
        phi.data_mut()
            .par_chunks_mut(dims.slab())
            .enumerate()
            .for_each(|(k, slab)| {
                for j in 0..dims.ny {
                    for i in 0..dims.nx {
                        slab[j * dims.nx + i] =
                            (dims.cell_center_world(i, j, k) - center).length() - radius;
                    }
                }
            });
        Self { phi }
    }

    /// Build distances from a boolean inside-mask using fast sweeping.
    pub fn from_mask(dims: GridDims, inside: &[bool]) -> Self {
        assert_eq!(
            inside.len(),
            dims.cell_count(),
            "mask length {} does not match grid of {} cells",
            inside.len(),
            dims.cell_count()
        );
        let dx = dims.cell_size;
        let sentinel = far_distance(&dims);
        let mut sdf: Vec<f32> = inside
            .iter()
            .map(|&s| if s { -sentinel } else { sentinel })
            .collect();

        // Seeds: cells adjacent to the interface sit half a cell from it
        for k in 0..dims.nz {
            for j in 0..dims.ny {
                for i in 0..dims.nx {
                    let idx = dims.cell_index(i, j, k);
                    let solid = inside[idx];
                    let differs = neighbors6(&dims, i, j, k).any(|n| inside[n] != solid);
                    if differs {
                        sdf[idx] = if solid { -0.5 * dx } else { 0.5 * dx };
                    }
                }
            }
        }

        let sweeps: [(bool, bool, bool); 8] = [
            (true, true, true),
            (false, true, true),
            (true, false, true),
            (false, false, true),
            (true, true, false),
            (false, true, false),
            (true, false, false),
            (false, false, false),
        ];
        for _ in 0..2 {
            for &(fi, fj, fk) in &sweeps {
                sweep(&dims, &mut sdf, fi, fj, fk);
            }
        }

        let mut phi = ScalarGrid::new(dims);
        phi.data_mut().copy_from_slice(&sdf);
        Self { phi }
    }

    pub fn dims(&self) -> &GridDims {
        self.phi.dims()
    }

    pub fn grid(&self) -> &ScalarGrid {
        &self.phi
    }

    pub fn values(&self) -> &[f32] {
        self.phi.data()
    }

    #[inline]
    pub fn value(&self, i: usize, j: usize, k: usize) -> f32 {
        self.phi.get(i, j, k)
    }

    #[inline]
    pub fn is_inside(&self, idx: usize) -> bool {
        self.phi.data()[idx] < 0.0
    }

    /// Union with another level set on the same grid (pointwise min).
    pub fn join(&mut self, other: &LevelSet) {
        self.phi
            .data_mut()
            .par_iter_mut()
            .zip(other.phi.data().par_iter())
            .for_each(|(a, &b)| *a = a.min(b));
    }

    /// Resample to another resolution of the same world box.
    pub fn resampled(&self, dims: GridDims) -> LevelSet {
        let mut phi = ScalarGrid::new(dims);
        phi.interpolate_from(&self.phi);
        LevelSet { phi }
    }

    pub fn copy_from(&mut self, other: &LevelSet) {
        self.phi.copy_from(&other.phi);
    }
}

/// Larger than any distance inside the domain.
fn far_distance(dims: &GridDims) -> f32 {
    (dims.nx + dims.ny + dims.nz) as f32 * dims.cell_size
}

/// Indices of the in-domain face neighbours of (i, j, k).
pub(crate) fn neighbors6(
    dims: &GridDims,
    i: usize,
    j: usize,
    k: usize,
) -> impl Iterator<Item = usize> + '_ {
    const OFFSETS: [(i32, i32, i32); 6] = [
        (-1, 0, 0),
        (1, 0, 0),
        (0, -1, 0),
        (0, 1, 0),
        (0, 0, -1),
        (0, 0, 1),
    ];
    OFFSETS.iter().filter_map(move |&(di, dj, dk)| {
        let (ni, nj, nk) = (i as i32 + di, j as i32 + dj, k as i32 + dk);
        dims.cell_in_bounds(ni, nj, nk)
            .then(|| dims.cell_index(ni as usize, nj as usize, nk as usize))
    })
}

/// One Gauss-Seidel sweep of the Eikonal update in the given direction.
fn sweep(dims: &GridDims, sdf: &mut [f32], fwd_i: bool, fwd_j: bool, fwd_k: bool) {
    let order = |n: usize, fwd: bool| -> Vec<usize> {
        if fwd {
            (0..n).collect()
        } else {
            (0..n).rev().collect()
        }
    };
    let (is, js, ks) = (order(dims.nx, fwd_i), order(dims.ny, fwd_j), order(dims.nz, fwd_k));
    let dx = dims.cell_size;

    for &k in &ks {
        for &j in &js {
            for &i in &is {
                let idx = dims.cell_index(i, j, k);
                let val = sdf[idx];
                let sign = if val < 0.0 { -1.0 } else { 1.0 };
                // Only neighbours on the same side carry distance information
                let axis_min = |a: Option<usize>, b: Option<usize>| -> f32 {
                    [a, b]
                        .into_iter()
                        .flatten()
                        .map(|n| sdf[n] * sign)
                        .filter(|&d| d >= 0.0)
                        .fold(f32::INFINITY, f32::min)
                };
                let phi_x = axis_min(
                    (i > 0).then(|| dims.cell_index(i - 1, j, k)),
                    (i + 1 < dims.nx).then(|| dims.cell_index(i + 1, j, k)),
                );
                let phi_y = axis_min(
                    (j > 0).then(|| dims.cell_index(i, j - 1, k)),
                    (j + 1 < dims.ny).then(|| dims.cell_index(i, j + 1, k)),
                );
                let phi_z = axis_min(
                    (k > 0).then(|| dims.cell_index(i, j, k - 1)),
                    (k + 1 < dims.nz).then(|| dims.cell_index(i, j, k + 1)),
                );
                if phi_x.is_finite() || phi_y.is_finite() || phi_z.is_finite() {
                    let candidate = solve_eikonal(phi_x, phi_y, phi_z, dx);
                    if candidate < val.abs() {
                        sdf[idx] = sign * candidate;
                    }
                }
            }
        }
    }
}

/// Solve (φ - a)² + (φ - b)² + (φ - c)² = dx² using upwind finite differences,
/// dropping axes whose neighbour is too far to contribute.
fn solve_eikonal(phi_x: f32, phi_y: f32, phi_z: f32, dx: f32) -> f32 {
    let (phi_a, phi_b, phi_c) = sort3(phi_x, phi_y, phi_z);

    let mut new_val = phi_a + dx;

    if new_val > phi_b {
        let sum = phi_a + phi_b;
        let diff_sq = 2.0 * dx * dx - (phi_a - phi_b).powi(2);
        if diff_sq >= 0.0 {
            new_val = (sum + diff_sq.sqrt()) / 2.0;
        }
    }

    if new_val > phi_c {
        let sum = phi_a + phi_b + phi_c;
        let sum_sq = phi_a * phi_a + phi_b * phi_b + phi_c * phi_c;
        let disc = sum * sum - 3.0 * (sum_sq - dx * dx);
        if disc >= 0.0 {
            new_val = (sum + disc.sqrt()) / 3.0;
        }
    }

    new_val
}

fn sort3(a: f32, b: f32, c: f32) -> (f32, f32, f32) {
    let mut v = [a, b, c];
    v.sort_by(|x, y| x.total_cmp(y));
    (v[0], v[1], v[2])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_solve_eikonal() {
        let result = solve_eikonal(0.0, f32::INFINITY, f32::INFINITY, 1.0);
        assert!((result - 1.0).abs() < 0.001, "1D: expected 1.0, got {}", result);

        let result = solve_eikonal(0.0, 0.0, f32::INFINITY, 1.0);
        let expected = 1.0 / 2.0_f32.sqrt();
        assert!((result - expected).abs() < 0.001, "2D: expected {:.3}, got {:.3}", expected, result);

        let result = solve_eikonal(0.0, 0.0, 0.0, 1.0);
        let expected = 1.0 / 3.0_f32.sqrt();
        assert!((result - expected).abs() < 0.001, "3D: expected {:.3}, got {:.3}", expected, result);
    }

    #[test]
    fn test_sort3() {
        assert_eq!(sort3(3.0, 1.0, 2.0), (1.0, 2.0, 3.0));
        assert_eq!(sort3(1.0, f32::INFINITY, 0.5), (0.5, 1.0, f32::INFINITY));
    }

    #[test]
    fn test_mask_distances_are_euclidean() {
        let dims = GridDims::new(20, 20, 20, 1.0);
        let mut mask = vec![false; dims.cell_count()];
        for k in 8..=11 {
            for j in 8..=11 {
                for i in 8..=11 {
                    mask[dims.cell_index(i, j, k)] = true;
                }
            }
        }
        let ls = LevelSet::from_mask(dims, &mask);

        assert!(ls.value(9, 9, 9) < 0.0, "box interior must be negative");
        let straight = ls.value(5, 9, 9);
        assert!(
            (straight - 2.5).abs() < 0.1,
            "2.5 cells from the box face along x, got {:.3}",
            straight
        );
        let diagonal = ls.value(6, 7, 7);
        assert!(
            diagonal < 3.0,
            "diagonal distance should beat the Manhattan estimate, got {:.3}",
            diagonal
        );
    }

    #[test]
    fn test_join_is_pointwise_min() {
        let dims = GridDims::new(8, 8, 8, 1.0);
        let mut a = LevelSet::from_box(dims, Vec3::ZERO, Vec3::splat(2.0));
        let b = LevelSet::from_box(dims, Vec3::splat(6.0), Vec3::splat(8.0));
        a.join(&b);
        assert!(a.value(0, 0, 0) < 0.0);
        assert!(a.value(7, 7, 7) < 0.0);
        assert!(a.value(4, 4, 4) > 0.0);
    }

    #[test]
    fn test_empty_has_no_inside() {
        let dims = GridDims::new(4, 4, 4, 0.1);
        let ls = LevelSet::empty(dims);
        assert!((0..dims.cell_count()).all(|idx| !ls.is_inside(idx)));
    }

    #[test]
    fn test_sphere_resample_keeps_sign() {
        let dims = GridDims::new(8, 8, 8, 1.0);
        let ls = LevelSet::from_sphere(dims, Vec3::splat(4.0), 2.0);
        let fine = ls.resampled(dims.upsampled(2));
        assert!(fine.value(8, 8, 8) < 0.0);
        assert!(fine.value(0, 0, 0) > 0.0);
    }
}
