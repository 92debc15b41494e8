//! Pressure projection for incompressible flow.
//!
//! Solves `A p = -dx² · div(v)` with preconditioned conjugate gradients in
//! f64, then subtracts the pressure gradient from the face velocities. The
//! pressure absorbs `dt`, so the update is simply `v -= grad(p)`.
//!
//! Boundary handling per cell:
//! - `Fluid` cells are unknowns.
//! - `Outflow` / `Empty` cells are Dirichlet (p = 0).
//! - `Obstacle` cells and everything outside the domain are Neumann; faces
//!   touching them keep the velocity set by the wall boundary conditions.
//!
//! A closed domain has a one-dimensional null space (constant pressure). With
//! zero-pressure fixing enabled one fluid cell is pinned to zero.

pub mod guiding;
mod multigrid;

use rayon::prelude::*;

use crate::config::{PressureParams, Preconditioner};
use crate::flags::{CellType, FlagGrid};
use crate::grid::{Axis, MacGrid, ScalarGrid};
use multigrid::Multigrid;

pub use guiding::{solve_guided, GuideTarget};

/// Outcome of an iterative solve.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct SolveStats {
    pub iterations: usize,
    /// Final residual relative to the right-hand side
    pub residual: f64,
    pub converged: bool,
}

/// Role of a cell in the pressure system.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum Node {
    Active,
    Dirichlet,
    Wall,
}

/// Seven-point Poisson operator over a box of cells.
#[derive(Clone, Debug)]
pub(crate) struct PoissonSystem {
    pub(crate) size: [usize; 3],
    pub(crate) nodes: Vec<Node>,
}

impl PoissonSystem {
    pub(crate) fn new(size: [usize; 3], nodes: Vec<Node>) -> Self {
        debug_assert_eq!(nodes.len(), size[0] * size[1] * size[2]);
        Self { size, nodes }
    }

    /// Classify cells from the flag grid. With `fixing`, a domain without any
    /// Dirichlet cell gets its first fluid cell pinned.
    pub(crate) fn from_flags(flags: &FlagGrid, fixing: bool) -> Self {
        let dims = flags.dims();
        let mut nodes: Vec<Node> = flags
            .cells()
            .iter()
            .map(|cell| match cell {
                CellType::Fluid => Node::Active,
                CellType::Outflow | CellType::Empty => Node::Dirichlet,
                CellType::Obstacle => Node::Wall,
            })
            .collect();
        if fixing && !nodes.contains(&Node::Dirichlet) {
            if let Some(pin) = nodes.iter().position(|&n| n == Node::Active) {
                nodes[pin] = Node::Dirichlet;
            }
        }
        Self::new([dims.nx, dims.ny, dims.nz], nodes)
    }

    #[inline]
    pub(crate) fn len(&self) -> usize {
        self.nodes.len()
    }

    #[inline]
    pub(crate) fn coords(&self, idx: usize) -> [usize; 3] {
        let [nx, ny, _] = self.size;
        [idx % nx, (idx / nx) % ny, idx / (nx * ny)]
    }

    /// The six face neighbours of a cell; `None` outside the box.
    #[inline]
    pub(crate) fn neighbors(&self, idx: usize) -> [Option<usize>; 6] {
        let [nx, ny, nz] = self.size;
        let [i, j, k] = self.coords(idx);
        let slab = nx * ny;
        [
            (i > 0).then(|| idx - 1),
            (i + 1 < nx).then(|| idx + 1),
            (j > 0).then(|| idx - nx),
            (j + 1 < ny).then(|| idx + nx),
            (k > 0).then(|| idx - slab),
            (k + 1 < nz).then(|| idx + slab),
        ]
    }

    /// Number of non-wall neighbours of an active cell.
    #[inline]
    pub(crate) fn diagonal(&self, idx: usize) -> f64 {
        self.neighbors(idx)
            .iter()
            .flatten()
            .filter(|&&n| self.nodes[n] != Node::Wall)
            .count() as f64
    }

    /// `out = A x` on active cells, zero elsewhere.
    pub(crate) fn apply(&self, x: &[f64], out: &mut [f64]) {
        out.par_iter_mut().enumerate().for_each(|(idx, o)| {
            if self.nodes[idx] != Node::Active {
                *o = 0.0;
                return;
            }
            let mut diag = 0.0;
            let mut off = 0.0;
            for n in self.neighbors(idx).into_iter().flatten() {
                match self.nodes[n] {
                    Node::Active => {
                        diag += 1.0;
                        off += x[n];
                    }
                    Node::Dirichlet => diag += 1.0,
                    Node::Wall => {}
                }
            }
            *o = diag * x[idx] - off;
        });
    }

    /// `r = b - A x`.
    pub(crate) fn residual(&self, x: &[f64], b: &[f64], r: &mut [f64]) {
        self.apply(x, r);
        r.par_iter_mut().zip(b.par_iter()).for_each(|(r, &b)| *r = b - *r);
    }

    /// Diagonal scaling; zero outside active cells.
    pub(crate) fn jacobi(&self, r: &[f64], z: &mut [f64]) {
        z.par_iter_mut().enumerate().for_each(|(idx, z)| {
            *z = if self.nodes[idx] == Node::Active {
                let d = self.diagonal(idx);
                if d > 0.0 {
                    r[idx] / d
                } else {
                    0.0
                }
            } else {
                0.0
            };
        });
    }
}

fn dot(a: &[f64], b: &[f64]) -> f64 {
    a.par_iter().zip(b.par_iter()).map(|(x, y)| x * y).sum()
}

fn max_abs(a: &[f64]) -> f64 {
    a.par_iter().map(|v| v.abs()).reduce(|| 0.0, f64::max)
}

enum Precond {
    None,
    Jacobi,
    Multigrid(Box<Multigrid>),
}

impl Precond {
    fn new(system: &PoissonSystem, kind: Preconditioner) -> Self {
        match kind {
            Preconditioner::None => Precond::None,
            Preconditioner::Jacobi => Precond::Jacobi,
            Preconditioner::Multigrid => Precond::Multigrid(Box::new(Multigrid::new(system))),
        }
    }

    fn apply(&mut self, system: &PoissonSystem, r: &[f64], z: &mut [f64]) {
        match self {
            Precond::None => {
                for (idx, z) in z.iter_mut().enumerate() {
                    *z = if system.nodes[idx] == Node::Active { r[idx] } else { 0.0 };
                }
            }
            Precond::Jacobi => system.jacobi(r, z),
            Precond::Multigrid(mg) => mg.apply(r, z),
        }
    }
}

/// Preconditioned conjugate gradients on `A x = b`, starting from `x = 0`.
///
/// Stops when `max|r| <= tolerance * max|b|`.
pub(crate) fn pcg(
    system: &PoissonSystem,
    b: &[f64],
    x: &mut [f64],
    kind: Preconditioner,
    tolerance: f64,
    max_iterations: usize,
) -> SolveStats {
    let n = system.len();
    x.fill(0.0);

    let b_max = max_abs(b);
    if b_max == 0.0 {
        return SolveStats {
            iterations: 0,
            residual: 0.0,
            converged: true,
        };
    }
    let target = tolerance * b_max;

    let mut precond = Precond::new(system, kind);
    let mut r = b.to_vec();
    let mut z = vec![0.0; n];
    let mut q = vec![0.0; n];

    precond.apply(system, &r, &mut z);
    let mut rz = dot(&r, &z);
    if rz <= 0.0 && matches!(precond, Precond::Multigrid(_)) {
        log::debug!("multigrid preconditioner not positive, falling back to Jacobi");
        precond = Precond::Jacobi;
        precond.apply(system, &r, &mut z);
        rz = dot(&r, &z);
    }
    let mut d = z.clone();
    let mut residual = b_max;

    for iteration in 1..=max_iterations {
        system.apply(&d, &mut q);
        let dq = dot(&d, &q);
        if dq <= 0.0 {
            break;
        }
        let alpha = rz / dq;
        x.par_iter_mut().zip(d.par_iter()).for_each(|(x, d)| *x += alpha * d);
        r.par_iter_mut().zip(q.par_iter()).for_each(|(r, q)| *r -= alpha * q);

        residual = max_abs(&r);
        if residual <= target {
            return SolveStats {
                iterations: iteration,
                residual: residual / b_max,
                converged: true,
            };
        }

        precond.apply(system, &r, &mut z);
        let mut rz_new = dot(&r, &z);
        if rz_new <= 0.0 && matches!(precond, Precond::Multigrid(_)) {
            log::debug!("multigrid preconditioner not positive, falling back to Jacobi");
            precond = Precond::Jacobi;
            precond.apply(system, &r, &mut z);
            rz_new = dot(&r, &z);
            d.copy_from_slice(&z);
            rz = rz_new;
            continue;
        }
        let beta = rz_new / rz;
        rz = rz_new;
        d.par_iter_mut().zip(z.par_iter()).for_each(|(d, z)| *d = z + beta * *d);
    }

    SolveStats {
        iterations: max_iterations,
        residual: residual / b_max,
        converged: false,
    }
}

/// Discrete divergence at fluid cells (1/s), zero elsewhere.
pub fn compute_divergence(flags: &FlagGrid, vel: &MacGrid, out: &mut ScalarGrid) {
    let dims = *vel.dims();
    out.data_mut()
        .par_chunks_mut(dims.slab())
        .enumerate()
        .for_each(|(k, slab)| {
            for j in 0..dims.ny {
                for i in 0..dims.nx {
                    slab[j * dims.nx + i] = if flags.is_fluid(i, j, k) {
                        vel.divergence_at(i, j, k)
                    } else {
                        0.0
                    };
                }
            }
        });
}

/// Subtract `grad(p)` on every face with an active cell on one side and no
/// wall on either.
pub(crate) fn apply_pressure_gradient(system: &PoissonSystem, vel: &mut MacGrid, pressure: &[f64]) {
    let dims = *vel.dims();
    let inv_dx = 1.0 / dims.cell_size as f64;
    let node_at = |c: (i32, i32, i32)| -> Option<usize> {
        dims.cell_in_bounds(c.0, c.1, c.2)
            .then(|| dims.cell_index(c.0 as usize, c.1 as usize, c.2 as usize))
    };

    for axis in Axis::ALL {
        vel.map_component(axis, |i, j, k, old| {
            let (a, b) = axis.face_cells(i, j, k);
            let (Some(a), Some(b)) = (node_at(a), node_at(b)) else {
                return old;
            };
            let (na, nb) = (system.nodes[a], system.nodes[b]);
            if na == Node::Wall || nb == Node::Wall {
                return old;
            }
            if na != Node::Active && nb != Node::Active {
                return old;
            }
            (old as f64 - (pressure[b] - pressure[a]) * inv_dx) as f32
        });
    }
}

/// Make `vel` divergence-free at fluid cells.
///
/// `pressure` receives the solution (zero outside fluid cells). Failure to
/// converge is logged and the best iterate is applied.
pub fn solve_pressure(
    flags: &FlagGrid,
    vel: &mut MacGrid,
    pressure: &mut ScalarGrid,
    params: &PressureParams,
    fixing: bool,
) -> SolveStats {
    let system = PoissonSystem::from_flags(flags, fixing);
    project_with(&system, vel, pressure, params.preconditioner, params)
}

pub(crate) fn project_with(
    system: &PoissonSystem,
    vel: &mut MacGrid,
    pressure: &mut ScalarGrid,
    kind: Preconditioner,
    params: &PressureParams,
) -> SolveStats {
    let dims = *vel.dims();
    let dx2 = (dims.cell_size as f64).powi(2);

    let rhs: Vec<f64> = (0..dims.cell_count())
        .into_par_iter()
        .map(|idx| {
            if system.nodes[idx] == Node::Active {
                let (i, j, k) = dims.cell_coords(idx);
                -dx2 * vel.divergence_at(i, j, k) as f64
            } else {
                0.0
            }
        })
        .collect();

    let mut p = vec![0.0f64; dims.cell_count()];
    let stats = pcg(
        system,
        &rhs,
        &mut p,
        kind,
        params.tolerance as f64,
        params.max_iterations,
    );
    if !stats.converged {
        log::warn!(
            "pressure solve did not converge: {} iterations, residual {:.3e}",
            stats.iterations,
            stats.residual
        );
    }

    apply_pressure_gradient(system, vel, &p);
    for (dst, &src) in pressure.data_mut().iter_mut().zip(&p) {
        *dst = src as f32;
    }
    stats
}
