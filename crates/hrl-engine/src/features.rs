//! Spatial feature helpers: unit tables, pixel clustering, grid scaling

use std::collections::HashSet;

use hrl_core::{Grid, ScreenPoint};

/// Side length of the screen feature layers
pub const SCREEN_SIZE: usize = 64;
/// Side length of the minimap feature layers
pub const MINIMAP_SIZE: usize = 64;

/// Terran unit type ids
pub mod unit {
    pub const COMMAND_CENTER: u32 = 18;
    pub const SUPPLY_DEPOT: u32 = 19;
    pub const BARRACKS: u32 = 21;
    pub const FACTORY: u32 = 27;
    pub const TECHLAB: u32 = 5;
    pub const REACTOR: u32 = 6;
    pub const SIEGE_TANK_SIEGED: u32 = 32;
    pub const SIEGE_TANK: u32 = 33;
    pub const MARINE: u32 = 48;
    pub const REAPER: u32 = 49;
    pub const HELLION: u32 = 53;
}

/// Screen footprint of a unit type
#[derive(Debug, Clone, Copy)]
pub struct UnitSpec {
    pub unit_type: u32,
    /// Pixels one unit covers on the screen layer
    pub screen_pixels: f64,
}

pub const ARMY_SPEC: &[UnitSpec] = &[
    UnitSpec { unit_type: unit::MARINE, screen_pixels: 9.0 },
    UnitSpec { unit_type: unit::REAPER, screen_pixels: 9.0 },
    UnitSpec { unit_type: unit::HELLION, screen_pixels: 25.0 },
    UnitSpec { unit_type: unit::SIEGE_TANK, screen_pixels: 32.0 },
    UnitSpec { unit_type: unit::SIEGE_TANK_SIEGED, screen_pixels: 32.0 },
];

pub const BUILDING_SPEC: &[UnitSpec] = &[
    UnitSpec { unit_type: unit::COMMAND_CENTER, screen_pixels: 300.0 },
    UnitSpec { unit_type: unit::SUPPLY_DEPOT, screen_pixels: 81.0 },
    UnitSpec { unit_type: unit::BARRACKS, screen_pixels: 144.0 },
    UnitSpec { unit_type: unit::FACTORY, screen_pixels: 144.0 },
    UnitSpec { unit_type: unit::TECHLAB, screen_pixels: 25.0 },
    UnitSpec { unit_type: unit::REACTOR, screen_pixels: 25.0 },
];

/// A group of 8-connected pixels
#[derive(Debug, Clone, PartialEq)]
pub struct Cluster {
    pub center: ScreenPoint,
    pub pixels: usize,
}

impl Cluster {
    /// Number of units the cluster represents, rounded up
    pub fn power(&self, screen_pixels: f64) -> f64 {
        (self.pixels as f64 / screen_pixels).ceil()
    }
}

/// Split `points` into 8-connected clusters, in first-seen order
pub fn clusters(points: &[ScreenPoint]) -> Vec<Cluster> {
    let mut remaining: HashSet<ScreenPoint> = points.iter().copied().collect();
    let mut found = Vec::new();

    for &start in points {
        if !remaining.remove(&start) {
            continue;
        }
        let mut stack = vec![start];
        let (mut sum_y, mut sum_x, mut count) = (0i64, 0i64, 0usize);

        while let Some(p) = stack.pop() {
            sum_y += i64::from(p.y);
            sum_x += i64::from(p.x);
            count += 1;
            for dy in -1..=1 {
                for dx in -1..=1 {
                    let n = ScreenPoint::new(p.y + dy, p.x + dx);
                    if remaining.remove(&n) {
                        stack.push(n);
                    }
                }
            }
        }

        found.push(Cluster {
            center: ScreenPoint::new(
                (sum_y / count as i64) as i32,
                (sum_x / count as i64) as i32,
            ),
            pixels: count,
        });
    }
    found
}

/// Pixels of `unit_type` owned by `relative` on a pair of screen layers
pub fn unit_pixels(
    unit_types: &Grid,
    player_relative: &Grid,
    unit_type: u32,
    relative: i32,
) -> Vec<ScreenPoint> {
    unit_types
        .points_where(|v| v == unit_type as i32)
        .into_iter()
        .filter(|p| player_relative.try_get(p.y as usize, p.x as usize) == Some(relative))
        .collect()
}

/// Mean coordinate of `points`
pub fn centroid(points: &[ScreenPoint]) -> Option<ScreenPoint> {
    if points.is_empty() {
        return None;
    }
    let n = points.len() as i64;
    let y: i64 = points.iter().map(|p| i64::from(p.y)).sum();
    let x: i64 = points.iter().map(|p| i64::from(p.x)).sum();
    Some(ScreenPoint::new((y / n) as i32, (x / n) as i32))
}

/// Cell index of `point` on a `grid`×`grid` partition of a `layer_size` layer
pub fn grid_cell(point: ScreenPoint, layer_size: usize, grid: usize) -> usize {
    let scale = |v: i32| ((v.max(0) as usize * grid) / layer_size).min(grid - 1);
    scale(point.x) + scale(point.y) * grid
}

/// Top-left and bottom-right corners of `cell` on the partition
pub fn cell_bounds(cell: usize, layer_size: usize, grid: usize) -> (ScreenPoint, ScreenPoint) {
    let (y, x) = (cell / grid, cell % grid);
    let start = ScreenPoint::new((layer_size * y / grid) as i32, (layer_size * x / grid) as i32);
    let end = ScreenPoint::new(
        (layer_size * (y + 1) / grid) as i32,
        (layer_size * (x + 1) / grid) as i32,
    );
    (start, end)
}

/// A clickable pixel inside the first visible building of `building_type`
pub fn building_point(unit_types: &Grid, building_type: u32) -> Option<ScreenPoint> {
    let pixels = unit_types.points_where(|v| v == building_type as i32);
    let cluster = clusters(&pixels).into_iter().next()?;
    pixels
        .iter()
        .min_by_key(|p| p.dist_sq(&cluster.center))
        .copied()
}

#[cfg(test)]
mod tests {
    use super::*;
    use hrl_core::observation::layers::relative;

    #[test]
    fn test_clusters_split_disconnected_groups() {
        let mut grid = Grid::new(10, 10);
        grid.fill(0, 3, 0, 3, 1);
        grid.fill(6, 8, 6, 8, 1);
        let points = grid.points_where(|v| v == 1);

        let found = clusters(&points);
        assert_eq!(found.len(), 2);
        assert_eq!(found[0].pixels, 9);
        assert_eq!(found[0].center, ScreenPoint::new(1, 1));
        assert_eq!(found[1].pixels, 4);
        assert_eq!(found[1].power(9.0), 1.0);
        assert_eq!(found[0].power(4.0), 3.0);
    }

    #[test]
    fn test_grid_cell_scaling() {
        assert_eq!(grid_cell(ScreenPoint::new(0, 0), SCREEN_SIZE, 5), 0);
        assert_eq!(grid_cell(ScreenPoint::new(63, 63), SCREEN_SIZE, 5), 24);
        // row 1 (y in [12.8, 25.6)), column 2 (x in [25.6, 38.4))
        assert_eq!(grid_cell(ScreenPoint::new(20, 30), SCREEN_SIZE, 5), 7);
    }

    #[test]
    fn test_cell_bounds() {
        let (start, end) = cell_bounds(3, MINIMAP_SIZE, 2);
        assert_eq!(start, ScreenPoint::new(32, 32));
        assert_eq!(end, ScreenPoint::new(64, 64));
    }

    #[test]
    fn test_unit_pixels_skips_points_outside_owner_layer() {
        let mut unit_types = Grid::new(SCREEN_SIZE, SCREEN_SIZE);
        let mut owners = Grid::new(SCREEN_SIZE / 2, SCREEN_SIZE / 2);
        unit_types.fill(2, 4, 2, 4, unit::MARINE as i32);
        unit_types.fill(50, 52, 50, 52, unit::MARINE as i32);
        owners.fill(2, 4, 2, 4, relative::HOSTILE);

        let points = unit_pixels(&unit_types, &owners, unit::MARINE, relative::HOSTILE);
        assert_eq!(points.len(), 4);
        assert!(points.iter().all(|p| p.y < 4 && p.x < 4));
    }

    #[test]
    fn test_building_point_inside_building() {
        let mut grid = Grid::new(SCREEN_SIZE, SCREEN_SIZE);
        grid.fill(10, 20, 30, 40, unit::BARRACKS as i32);
        let p = building_point(&grid, unit::BARRACKS).unwrap();
        assert_eq!(grid.get(p.y as usize, p.x as usize), unit::BARRACKS as i32);
        assert!(building_point(&grid, unit::FACTORY).is_none());
    }
}
