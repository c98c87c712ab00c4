//! Level generation.
//!
//! Boxes sit on the ground on a grid whose pitch is the box size, so
//! neighbouring boxes share faces instead of overlapping.

use std::collections::BTreeSet;

use aram_shared::{
    collision::{Obstacle, ObstacleSet, OBSTACLE_HALF_EXTENT},
    math::Vec3,
    net::BoxSpec,
};
use rand::Rng;

/// Number of distinct box materials the client knows about.
pub const MATERIAL_COUNT: u32 = 4;

/// Scatters `count` boxes within `[-extent, extent]` on X and Z.
///
/// Cells are drawn without replacement; if the area has fewer cells than
/// `count`, every cell gets a box. Only small grids are enumerated up front,
/// large ones are sampled cell by cell.
pub fn generate_boxes<R: Rng + ?Sized>(rng: &mut R, count: usize, extent: f32) -> Vec<BoxSpec> {
    let pitch = OBSTACLE_HALF_EXTENT * 2.0;
    let cells_per_axis = ((extent * 2.0) / pitch).floor().max(1.0) as i32;
    let half = cells_per_axis / 2;
    let axis = -half..cells_per_axis - half;
    // The origin stays free for spawning.
    let free_cells = (cells_per_axis as u64).pow(2) - 1;

    let mut boxes = Vec::with_capacity(count.min(free_cells.min(usize::MAX as u64) as usize));
    let place = |rng: &mut R, (x, z): (i32, i32)| BoxSpec {
        position: Vec3::new(x as f32 * pitch, 0.0, z as f32 * pitch),
        material_index: rng.gen_range(0..MATERIAL_COUNT),
    };

    if (count as u64).saturating_mul(2) < free_cells {
        let mut taken = BTreeSet::new();
        while boxes.len() < count {
            let cell = (rng.gen_range(axis.clone()), rng.gen_range(axis.clone()));
            if cell != (0, 0) && taken.insert(cell) {
                boxes.push(place(rng, cell));
            }
        }
    } else {
        // At most about twice `count` cells here.
        let mut cells: Vec<(i32, i32)> = axis
            .clone()
            .flat_map(|x| axis.clone().map(move |z| (x, z)))
            .filter(|&c| c != (0, 0))
            .collect();
        while boxes.len() < count && !cells.is_empty() {
            let cell = cells.swap_remove(rng.gen_range(0..cells.len()));
            boxes.push(place(rng, cell));
        }
    }
    boxes
}

pub fn obstacle_set(boxes: &[BoxSpec]) -> ObstacleSet {
    ObstacleSet::new(boxes.iter().map(|b| Obstacle::new(b.position)))
}
