//! Geometric multigrid V-cycle used as a conjugate gradient preconditioner.
//!
//! Levels halve the resolution along every axis. A coarse cell is Dirichlet
//! if any child is Dirichlet, otherwise active if any child is active,
//! otherwise a wall. The coarse operator is the same seven-point stencil
//! rediscretized on the coarse cells, so residuals are restricted with
//! `0.5 * sum(children)` (the average times the `(2h/h)² = 4` scale change)
//! and corrections are prolongated piecewise constant.

use rayon::prelude::*;

use super::{Node, PoissonSystem};
use crate::constants::{JACOBI_OMEGA, MG_COARSE_SWEEPS, MG_MIN_RES, MG_SMOOTH_SWEEPS};

struct Level {
    system: PoissonSystem,
    /// Inverse diagonal, zero outside active cells
    inv_diag: Vec<f64>,
    x: Vec<f64>,
    b: Vec<f64>,
    r: Vec<f64>,
    tmp: Vec<f64>,
}

impl Level {
    fn new(system: PoissonSystem) -> Self {
        let n = system.len();
        let inv_diag = (0..n)
            .map(|idx| {
                let d = system.diagonal(idx);
                if system.nodes[idx] == Node::Active && d > 0.0 {
                    1.0 / d
                } else {
                    0.0
                }
            })
            .collect();
        Self {
            system,
            inv_diag,
            x: vec![0.0; n],
            b: vec![0.0; n],
            r: vec![0.0; n],
            tmp: vec![0.0; n],
        }
    }

    /// Damped Jacobi sweeps on `A x = b`.
    fn smooth(&mut self, sweeps: usize) {
        for _ in 0..sweeps {
            self.system.apply(&self.x, &mut self.tmp);
            let (b, inv_diag, tmp) = (&self.b, &self.inv_diag, &self.tmp);
            self.x.par_iter_mut().enumerate().for_each(|(idx, x)| {
                *x += JACOBI_OMEGA * (b[idx] - tmp[idx]) * inv_diag[idx];
            });
        }
    }
}

pub(crate) struct Multigrid {
    levels: Vec<Level>,
}

impl Multigrid {
    pub(crate) fn new(fine: &PoissonSystem) -> Self {
        let mut levels = vec![Level::new(fine.clone())];
        loop {
            let last = &levels[levels.len() - 1].system;
            let coarse_size = last.size.map(|n| n.div_ceil(2));
            if coarse_size.iter().any(|&n| n < MG_MIN_RES) {
                break;
            }
            let coarse = coarsen(last, coarse_size);
            levels.push(Level::new(coarse));
        }
        log::trace!("multigrid hierarchy with {} levels", levels.len());
        Self { levels }
    }

    /// `z = V(r)`, one V-cycle from a zero initial guess.
    pub(crate) fn apply(&mut self, r: &[f64], z: &mut [f64]) {
        self.levels[0].b.copy_from_slice(r);
        self.v_cycle(0);
        z.copy_from_slice(&self.levels[0].x);
    }

    fn v_cycle(&mut self, level: usize) {
        let last = self.levels.len() - 1;
        self.levels[level].x.fill(0.0);

        if level == last {
            self.levels[level].smooth(MG_COARSE_SWEEPS);
            return;
        }

        // 1. Pre-smooth and form the residual
        {
            let fine = &mut self.levels[level];
            fine.smooth(MG_SMOOTH_SWEEPS);
            fine.system.residual(&fine.x, &fine.b, &mut fine.r);
        }

        // 2. Restrict to the coarse right-hand side
        {
            let (head, tail) = self.levels.split_at_mut(level + 1);
            restrict(&head[level], &mut tail[0]);
        }

        // 3. Coarse correction
        self.v_cycle(level + 1);

        // 4. Prolongate and post-smooth
        {
            let (head, tail) = self.levels.split_at_mut(level + 1);
            prolongate(&tail[0], &mut head[level]);
            head[level].smooth(MG_SMOOTH_SWEEPS);
        }
    }
}

/// Child cell indices of a coarse cell, skipping children past an odd edge.
fn children(fine: [usize; 3], coarse: [usize; 3], idx: usize) -> impl Iterator<Item = usize> {
    let ci = idx % coarse[0];
    let cj = (idx / coarse[0]) % coarse[1];
    let ck = idx / (coarse[0] * coarse[1]);
    (0..8).filter_map(move |c| {
        let i = 2 * ci + (c & 1);
        let j = 2 * cj + ((c >> 1) & 1);
        let k = 2 * ck + ((c >> 2) & 1);
        (i < fine[0] && j < fine[1] && k < fine[2]).then(|| (k * fine[1] + j) * fine[0] + i)
    })
}

fn coarsen(fine: &PoissonSystem, size: [usize; 3]) -> PoissonSystem {
    let n = size[0] * size[1] * size[2];
    let nodes = (0..n)
        .into_par_iter()
        .map(|idx| {
            let mut any_active = false;
            for child in children(fine.size, size, idx) {
                match fine.nodes[child] {
                    Node::Dirichlet => return Node::Dirichlet,
                    Node::Active => any_active = true,
                    Node::Wall => {}
                }
            }
            if any_active {
                Node::Active
            } else {
                Node::Wall
            }
        })
        .collect();
    PoissonSystem::new(size, nodes)
}

fn restrict(fine: &Level, coarse: &mut Level) {
    let (fine_size, coarse_size) = (fine.system.size, coarse.system.size);
    let nodes = &coarse.system.nodes;
    coarse.b.par_iter_mut().enumerate().for_each(|(idx, b)| {
        *b = if nodes[idx] == Node::Active {
            0.5 * children(fine_size, coarse_size, idx)
                .map(|c| fine.r[c])
                .sum::<f64>()
        } else {
            0.0
        };
    });
}

fn prolongate(coarse: &Level, fine: &mut Level) {
    let [nx, ny, _] = fine.system.size;
    let [cx, cy, _] = coarse.system.size;
    let nodes = &fine.system.nodes;
    fine.x.par_iter_mut().enumerate().for_each(|(idx, x)| {
        if nodes[idx] != Node::Active {
            return;
        }
        let i = idx % nx;
        let j = (idx / nx) % ny;
        let k = idx / (nx * ny);
        *x += coarse.x[((k / 2) * cy + j / 2) * cx + i / 2];
    });
}
