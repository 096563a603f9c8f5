use glam::IVec2;
use ndarray::{Array2, Zip};
use rayon::prelude::*;

use super::{FILTER, FILTER_WEIGHT, SPLAT};
use crate::util::Index;

/// Agents accumulated by one worker before partial grids are merged.
const SPLAT_CHUNK: usize = 1024;

/// Add one agent's splat to `density`. Taps outside the grid land on the edge.
pub fn splat(density: &mut Array2<u32>, cell: IVec2) {
    let (rows, columns) = density.dim();

    for (dy, weights) in SPLAT.iter().enumerate() {
        let y = (cell.y + dy as i32 - 1).clamp(0, rows as i32 - 1);
        for (dx, &weight) in weights.iter().enumerate() {
            let x = (cell.x + dx as i32 - 1).clamp(0, columns as i32 - 1);
            density[Index::new(x, y)] += weight;
        }
    }
}

/// Smoothed value of `scaled` at (y, x).
pub fn filter_at(scaled: &Array2<u32>, y: usize, x: usize) -> u32 {
    let (rows, columns) = scaled.dim();
    let mut sum: u64 = 0;

    for (i, weights) in FILTER.iter().enumerate() {
        let yy = (y as isize + i as isize - 2).clamp(0, rows as isize - 1);
        for (j, &weight) in weights.iter().enumerate() {
            let xx = (x as isize + j as isize - 2).clamp(0, columns as isize - 1);
            sum += weight as u64 * scaled[Index::new(xx, yy)] as u64;
        }
    }

    (sum / FILTER_WEIGHT as u64) as u32
}

pub fn create_sequential(positions: &[IVec2], density: &mut Array2<u32>) {
    density.fill(0);
    for &cell in positions {
        splat(density, cell);
    }
}

/// Each worker splats into its own partial grid; partials are summed at the end.
pub fn create_parallel(positions: &[IVec2], density: &mut Array2<u32>) {
    let shape = density.dim();
    let merged = positions
        .par_chunks(SPLAT_CHUNK)
        .fold(
            || Array2::zeros(shape),
            |mut partial, chunk| {
                for &cell in chunk {
                    splat(&mut partial, cell);
                }
                partial
            },
        )
        .reduce_with(|mut a, b| {
            a += &b;
            a
        });

    match merged {
        Some(merged) => density.assign(&merged),
        None => density.fill(0),
    }
}

pub fn scale_sequential(density: &Array2<u32>, scaled: &mut Array2<u32>, factor: usize) {
    Zip::indexed(scaled).for_each(|(y, x), value| *value = density[(y / factor, x / factor)]);
}

pub fn scale_parallel(density: &Array2<u32>, scaled: &mut Array2<u32>, factor: usize) {
    Zip::indexed(scaled).par_for_each(|(y, x), value| *value = density[(y / factor, x / factor)]);
}

pub fn filter_sequential(scaled: &Array2<u32>, filtered: &mut Array2<u32>) {
    Zip::indexed(filtered).for_each(|(y, x), value| *value = filter_at(scaled, y, x));
}

pub fn filter_parallel(scaled: &Array2<u32>, filtered: &mut Array2<u32>) {
    Zip::indexed(filtered).par_for_each(|(y, x), value| *value = filter_at(scaled, y, x));
}
