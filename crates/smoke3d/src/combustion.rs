//! Fuel burning and flame update.
//!
//! Runs once per substep before advection (`process_burn`) and once after the
//! pressure solve (`update_flame`), at each resolution independently.

use glam::Vec3;
use rayon::prelude::*;

use crate::config::CombustionParams;
use crate::constants::{FUEL_EPSILON, SMOKE_PER_FUEL};
use crate::flags::{CellType, FlagGrid};
use crate::grid::ScalarGrid;
use crate::store::{ColorGrids, FireGrids};

/// Burnable state of one cell.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct BurnState {
    pub fuel: f32,
    pub density: f32,
    pub react: f32,
    /// Temperature, when heat is tracked
    pub heat: Option<f32>,
    /// Premultiplied color, when colors are tracked
    pub color: Option<Vec3>,
}

/// Burn one cell for `dt` seconds.
pub fn burn_cell(cell: BurnState, params: &CombustionParams, dt: f32) -> BurnState {
    let mut out = cell;
    let fuel0 = cell.fuel;

    if fuel0 <= FUEL_EPSILON {
        out.react = 0.0;
        return out;
    }
    if let Some(heat) = cell.heat {
        if heat < params.ignition_temp {
            return out;
        }
    }

    // 1. Consume fuel
    let burned = fuel0.min((params.burning_rate * dt).max(0.0));
    out.fuel = (fuel0 - burned).max(0.0);

    // 2. Reaction follows the unburnt fraction of this cell's fuel
    let react0 = if cell.react > 0.0 { cell.react } else { 1.0 };
    out.react = (react0 * out.fuel / fuel0).clamp(0.0, 1.0);
    let flame = out.react.sqrt();

    // 3. Smoke from burnt fuel, more of it for thin fuel
    let lean = if fuel0 < 1.0 { (1.0 - fuel0) * 0.5 } else { 0.0 };
    let emit = (lean + 0.5) * burned * SMOKE_PER_FUEL * params.flame_smoke;
    out.density = (cell.density + emit).clamp(0.0, 1.0);

    if let Some(heat) = cell.heat {
        if flame > 0.0 {
            out.heat = Some((1.0 - flame) * params.ignition_temp + flame * params.max_temp);
        } else {
            out.heat = Some(heat);
        }
    }

    if let Some(color) = cell.color {
        if emit > FUEL_EPSILON {
            let factor = out.density / (cell.density + emit);
            out.color = Some((color + params.flame_smoke_color * emit) * factor);
        }
    }
    out
}

/// Burn fuel in every fluid cell.
pub fn process_burn(
    flags: &FlagGrid,
    fire: &mut FireGrids,
    density: &mut ScalarGrid,
    heat: Option<&mut ScalarGrid>,
    colors: Option<&mut ColorGrids>,
    params: &CombustionParams,
    dt: f32,
) {
    let n = density.data().len();
    let burned: Vec<Option<BurnState>> = {
        let (fire, density) = (&*fire, &*density);
        let heat = heat.as_deref();
        let colors = colors.as_deref();
        (0..n)
            .into_par_iter()
            .map(|idx| {
                if flags.at(idx) != CellType::Fluid {
                    return None;
                }
                let cell = BurnState {
                    fuel: fire.fuel.data()[idx],
                    density: density.data()[idx],
                    react: fire.react.data()[idx],
                    heat: heat.map(|h| h.data()[idx]),
                    color: colors.map(|c| c.get(idx)),
                };
                let out = burn_cell(cell, params, dt);
                (out != cell).then_some(out)
            })
            .collect()
    };

    let scatter = |grid: &mut ScalarGrid, pick: fn(&BurnState) -> f32| {
        grid.data_mut()
            .par_iter_mut()
            .zip(burned.par_iter())
            .for_each(|(v, b)| {
                if let Some(b) = b {
                    *v = pick(b);
                }
            });
    };
    scatter(&mut fire.fuel, |b| b.fuel);
    scatter(&mut fire.react, |b| b.react);
    scatter(density, |b| b.density);
    if let Some(heat) = heat {
        scatter(heat, |b| b.heat.unwrap_or_default());
    }
    if let Some(colors) = colors {
        scatter(&mut colors.r, |b| b.color.unwrap_or_default().x);
        scatter(&mut colors.g, |b| b.color.unwrap_or_default().y);
        scatter(&mut colors.b, |b| b.color.unwrap_or_default().z);
    }
}

/// `flame = sqrt(react)` where the reaction is running, zero elsewhere.
pub fn update_flame(react: &ScalarGrid, flame: &mut ScalarGrid) {
    flame
        .data_mut()
        .par_iter_mut()
        .zip(react.data().par_iter())
        .for_each(|(f, &r)| *f = if r > 0.0 { r.sqrt() } else { 0.0 });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::grid::GridDims;

    fn cell(fuel: f32, react: f32) -> BurnState {
        BurnState {
            fuel,
            density: 0.0,
            react,
            heat: None,
            color: None,
        }
    }

    #[test]
    fn test_ignition_starts_reaction() {
        let params = CombustionParams::default();
        let out = burn_cell(cell(1.0, 0.0), &params, 0.1);
        assert!((out.fuel - 0.925).abs() < 1e-6, "fuel {}", out.fuel);
        assert!((out.react - 0.925).abs() < 1e-6, "react {}", out.react);
        assert!(out.density > 0.0, "burning emits smoke");
    }

    #[test]
    fn test_no_fuel_clears_reaction() {
        let out = burn_cell(cell(0.0, 0.6), &CombustionParams::default(), 0.1);
        assert_eq!(out.react, 0.0);
        assert_eq!(out.density, 0.0);
    }

    #[test]
    fn test_cold_cells_do_not_burn() {
        let params = CombustionParams::default();
        let mut c = cell(1.0, 0.0);
        c.heat = Some(params.ignition_temp - 0.1);
        assert_eq!(burn_cell(c, &params, 0.1), c);

        c.heat = Some(params.ignition_temp);
        let out = burn_cell(c, &params, 0.1);
        let flame = out.react.sqrt();
        let expected = (1.0 - flame) * params.ignition_temp + flame * params.max_temp;
        assert!((out.heat.unwrap() - expected).abs() < 1e-6);
    }

    #[test]
    fn test_smoke_color_mixes_toward_flame_color() {
        let params = CombustionParams {
            flame_smoke_color: Vec3::new(1.0, 0.0, 0.0),
            ..Default::default()
        };
        let mut c = cell(0.5, 0.0);
        c.density = 0.2;
        c.color = Some(Vec3::new(0.0, 0.2, 0.0));
        let out = burn_cell(c, &params, 0.5);
        let color = out.color.unwrap();
        assert!(color.x > 0.0);
        assert!((color.y - 0.2).abs() < 1e-6, "density unclamped keeps green");
    }

    #[test]
    fn test_update_flame() {
        let dims = GridDims::new(2, 1, 1, 1.0);
        let react = ScalarGrid::from_vec(dims, vec![0.25, 0.0]).unwrap();
        let mut flame = ScalarGrid::filled(dims, 9.0);
        update_flame(&react, &mut flame);
        assert_eq!(flame.data(), &[0.5, 0.0]);
    }

    #[test]
    fn test_process_burn_skips_obstacles() {
        use crate::flags::BoundaryMask;
        use crate::levelset::LevelSet;

        let dims = GridDims::new(4, 4, 4, 1.0);
        let empty = LevelSet::empty(dims);
        let flags = FlagGrid::rebuild(dims, 1, &BoundaryMask::CLOSED, &empty, &empty);
        let mut fire = FireGrids::new(dims);
        fire.fuel.fill(1.0);
        let mut density = ScalarGrid::new(dims);
        process_burn(&flags, &mut fire, &mut density, None, None, &CombustionParams::default(), 0.1);
        assert_eq!(fire.fuel.get(0, 0, 0), 1.0, "shell cell untouched");
        assert!(fire.fuel.get(1, 1, 1) < 1.0);
        assert!(fire.react.get(1, 1, 1) > 0.0);
    }
}
