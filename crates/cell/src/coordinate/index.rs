use std::collections::{BTreeMap, HashMap};

use glam::Vec3;

use crate::config::CoordinateConfig;
use crate::types::{planar_distance, EntityId};

type CellKey = (i32, i32);

#[derive(Debug, Clone, Copy)]
struct Node {
    position: Vec3,
    cell: CellKey,
}

/// Ordered grid over the xz plane. Each row of cells is a contiguous key range, so range
/// queries only touch the rows that intersect the query square.
#[derive(Debug, Clone)]
pub struct CoordinateIndex {
    cell_size: f32,
    has_y: bool,
    cells: BTreeMap<CellKey, Vec<EntityId>>,
    nodes: HashMap<EntityId, Node>,
}

impl Default for CoordinateIndex {
    fn default() -> Self {
        Self::new(&CoordinateConfig::default())
    }
}

impl CoordinateIndex {
    pub fn new(config: &CoordinateConfig) -> Self {
        Self {
            cell_size: config.cell_size.max(0.001),
            has_y: config.has_y,
            cells: BTreeMap::new(),
            nodes: HashMap::new(),
        }
    }

    pub fn has_y(&self) -> bool {
        self.has_y
    }

    fn cell_of(&self, position: Vec3) -> CellKey {
        (
            (position.x / self.cell_size).floor() as i32,
            (position.z / self.cell_size).floor() as i32,
        )
    }

    pub fn insert(&mut self, id: EntityId, position: Vec3) {
        if self.nodes.contains_key(&id) {
            self.update(id, position);
            return;
        }
        let cell = self.cell_of(position);
        self.cells.entry(cell).or_default().push(id);
        self.nodes.insert(id, Node { position, cell });
    }

    /// Returns false when the id is not indexed.
    pub fn update(&mut self, id: EntityId, position: Vec3) -> bool {
        let cell = self.cell_of(position);
        let Some(node) = self.nodes.get_mut(&id) else {
            return false;
        };
        let old_cell = node.cell;
        node.position = position;
        node.cell = cell;
        if old_cell != cell {
            Self::detach(&mut self.cells, old_cell, id);
            self.cells.entry(cell).or_default().push(id);
        }
        true
    }

    pub fn remove(&mut self, id: EntityId) -> Option<Vec3> {
        let node = self.nodes.remove(&id)?;
        Self::detach(&mut self.cells, node.cell, id);
        Some(node.position)
    }

    fn detach(cells: &mut BTreeMap<CellKey, Vec<EntityId>>, cell: CellKey, id: EntityId) {
        if let Some(residents) = cells.get_mut(&cell) {
            if let Some(slot) = residents.iter().position(|r| *r == id) {
                residents.swap_remove(slot);
            }
            if residents.is_empty() {
                cells.remove(&cell);
            }
        }
    }

    pub fn position(&self, id: EntityId) -> Option<Vec3> {
        self.nodes.get(&id).map(|n| n.position)
    }

    pub fn contains(&self, id: EntityId) -> bool {
        self.nodes.contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Visits every resident of the cells overlapping the square. Rows are clamped to the
    /// occupied key range, and a square wider than the occupied cell count is answered with
    /// one ordered scan instead of a range per row.
    fn for_each_in_square(&self, center: Vec3, half_extent: f32, mut visit: impl FnMut(EntityId, Vec3)) {
        let (Some(((first, _), _)), Some(((last, _), _))) =
            (self.cells.first_key_value(), self.cells.last_key_value())
        else {
            return;
        };
        let (x0, z0) = self.cell_of(center - Vec3::new(half_extent, 0.0, half_extent));
        let (x1, z1) = self.cell_of(center + Vec3::new(half_extent, 0.0, half_extent));
        let (x0, x1) = (x0.max(*first), x1.min(*last));
        if x0 > x1 || z0 > z1 {
            return;
        }
        let mut visit_cell = |residents: &Vec<EntityId>| {
            for id in residents {
                if let Some(node) = self.nodes.get(id) {
                    visit(*id, node.position);
                }
            }
        };
        let rows = i64::from(x1) - i64::from(x0) + 1;
        if rows as usize > self.cells.len() {
            for ((_, z), residents) in self.cells.range((x0, i32::MIN)..=(x1, i32::MAX)) {
                if (z0..=z1).contains(z) {
                    visit_cell(residents);
                }
            }
        } else {
            for x in x0..=x1 {
                for (_, residents) in self.cells.range((x, z0)..=(x, z1)) {
                    visit_cell(residents);
                }
            }
        }
    }

    /// Ids within `radius` of `center`, paired with their distance, sorted by id.
    pub fn query_radius_with_distance(&self, center: Vec3, radius: f32) -> Vec<(EntityId, f32)> {
        let mut found = Vec::new();
        if radius.is_nan() || radius < 0.0 {
            return found;
        }
        self.for_each_in_square(center, radius, |id, position| {
            let distance = planar_distance(center, position, self.has_y);
            if distance <= radius {
                found.push((id, distance));
            }
        });
        found.sort_unstable_by_key(|(id, _)| *id);
        found
    }

    pub fn query_radius(&self, center: Vec3, radius: f32) -> Vec<EntityId> {
        self.query_radius_with_distance(center, radius)
            .into_iter()
            .map(|(id, _)| id)
            .collect()
    }

    /// Ids inside the box `|dx|, |dz| <= range_xz` and `|dy| <= range_y`. A non-positive
    /// `range_y` leaves the height unbounded.
    pub fn query_box(&self, center: Vec3, range_xz: f32, range_y: f32) -> Vec<EntityId> {
        let mut found = Vec::new();
        if range_xz.is_nan() || range_xz < 0.0 {
            return found;
        }
        self.for_each_in_square(center, range_xz, |id, position| {
            let d = position - center;
            if d.x.abs() <= range_xz
                && d.z.abs() <= range_xz
                && (range_y <= 0.0 || d.y.abs() <= range_y)
            {
                found.push(id);
            }
        });
        found.sort_unstable();
        found
    }

    /// Expanding ring search for the closest indexed id other than `exclude`. Once the rings
    /// would have looked at more cells than there are indexed ids, the remaining ids are
    /// scanned directly.
    pub fn nearest(
        &self,
        center: Vec3,
        max_radius: f32,
        exclude: Option<EntityId>,
    ) -> Option<(EntityId, f32)> {
        if max_radius.is_nan() || max_radius < 0.0 {
            return None;
        }
        let (cx, cz) = self.cell_of(center);
        let max_ring = (f64::from(max_radius) / f64::from(self.cell_size)).ceil() + 1.0;
        let max_ring = max_ring.min(f64::from(i32::MAX / 2)) as i32;
        let mut best: Option<(EntityId, f32)> = None;
        let consider = |id: EntityId, position: Vec3, best: &mut Option<(EntityId, f32)>| {
            if Some(id) == exclude {
                return;
            }
            let distance = planar_distance(center, position, self.has_y);
            if distance > max_radius {
                return;
            }
            let closer = match *best {
                None => true,
                Some((best_id, best_distance)) => {
                    distance < best_distance || (distance == best_distance && id < best_id)
                }
            };
            if closer {
                *best = Some((id, distance));
            }
        };

        let mut visited: usize = 0;
        for ring in 0..=max_ring {
            visited += if ring == 0 { 1 } else { 8 * ring as usize };
            if visited > self.nodes.len() {
                for (id, node) in &self.nodes {
                    consider(*id, node.position, &mut best);
                }
                return best;
            }
            for x in cx.saturating_sub(ring)..=cx.saturating_add(ring) {
                let on_edge = x == cx.saturating_sub(ring) || x == cx.saturating_add(ring);
                let zs: Vec<i32> = if on_edge {
                    (cz.saturating_sub(ring)..=cz.saturating_add(ring)).collect()
                } else {
                    vec![cz.saturating_sub(ring), cz.saturating_add(ring)]
                };
                for z in zs {
                    let Some(residents) = self.cells.get(&(x, z)) else {
                        continue;
                    };
                    for id in residents {
                        if let Some(node) = self.nodes.get(id) {
                            consider(*id, node.position, &mut best);
                        }
                    }
                }
            }
            // Anything in the next ring is at least `ring * cell_size` away.
            if let Some((_, distance)) = best {
                if distance <= ring as f32 * self.cell_size {
                    break;
                }
            }
        }
        best
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn index() -> CoordinateIndex {
        CoordinateIndex::new(&CoordinateConfig {
            cell_size: 10.0,
            has_y: false,
        })
    }

    #[test]
    fn radius_query_crosses_cells_and_sorts() {
        let mut index = index();
        index.insert(3, Vec3::new(9.0, 0.0, 0.0));
        index.insert(1, Vec3::new(-9.0, 0.0, 0.0));
        index.insert(2, Vec3::new(0.0, 50.0, 11.0));
        index.insert(4, Vec3::new(30.0, 0.0, 0.0));

        assert_eq!(index.query_radius(Vec3::ZERO, 12.0), vec![1, 2, 3]);
        assert_eq!(index.query_radius(Vec3::ZERO, 5.0), Vec::<EntityId>::new());
    }

    #[test]
    fn height_counts_when_y_axis_enabled() {
        let mut index = CoordinateIndex::new(&CoordinateConfig {
            cell_size: 10.0,
            has_y: true,
        });
        index.insert(1, Vec3::new(0.0, 50.0, 0.0));
        assert!(index.query_radius(Vec3::ZERO, 10.0).is_empty());
    }

    #[test]
    fn update_moves_between_cells() {
        let mut index = index();
        index.insert(1, Vec3::ZERO);
        assert!(index.update(1, Vec3::new(100.0, 0.0, 100.0)));
        assert!(index.query_radius(Vec3::ZERO, 5.0).is_empty());
        assert_eq!(index.query_radius(Vec3::new(100.0, 0.0, 100.0), 1.0), vec![1]);
        assert!(!index.update(2, Vec3::ZERO));
        assert_eq!(index.remove(1), Some(Vec3::new(100.0, 0.0, 100.0)));
        assert!(index.is_empty());
    }

    #[test]
    fn box_query_respects_both_extents() {
        let mut index = index();
        index.insert(1, Vec3::new(4.0, 0.0, -4.0));
        index.insert(2, Vec3::new(4.0, 3.0, 0.0));
        index.insert(3, Vec3::new(6.0, 0.0, 0.0));
        assert_eq!(index.query_box(Vec3::ZERO, 5.0, 1.0), vec![1]);
        assert_eq!(index.query_box(Vec3::ZERO, 5.0, 0.0), vec![1, 2]);
    }

    #[test]
    fn nearest_expands_rings() {
        let mut index = index();
        index.insert(1, Vec3::ZERO);
        index.insert(2, Vec3::new(35.0, 0.0, 0.0));
        index.insert(3, Vec3::new(-28.0, 0.0, 0.0));

        assert_eq!(index.nearest(Vec3::ZERO, 100.0, Some(1)).map(|(id, _)| id), Some(3));
        assert_eq!(index.nearest(Vec3::new(1.0, 0.0, 0.0), 100.0, None).map(|(id, _)| id), Some(1));
        assert!(index.nearest(Vec3::ZERO, 20.0, Some(1)).is_none());
    }

    #[test]
    fn huge_and_infinite_radii_touch_only_occupied_cells() {
        let mut index = index();
        for id in 0..10 {
            index.insert(id, Vec3::new(id as f32 * 3.0, 0.0, -(id as f32)));
        }
        let all: Vec<EntityId> = (0..10).collect();
        assert_eq!(index.query_radius(Vec3::ZERO, 2e7), all);
        assert_eq!(index.query_radius(Vec3::ZERO, f32::INFINITY), all);
        assert_eq!(index.query_box(Vec3::ZERO, f32::INFINITY, 0.0), all);
        assert!(index.query_radius(Vec3::ZERO, f32::NAN).is_empty());

        assert_eq!(
            index.nearest(Vec3::new(1e5, 0.0, 0.0), f32::INFINITY, None).map(|(id, _)| id),
            Some(9)
        );
        assert!(index.nearest(Vec3::ZERO, f32::NAN, None).is_none());
    }

    #[test]
    fn nearest_falls_back_to_a_scan_far_from_everything() {
        let mut index = index();
        index.insert(1, Vec3::new(5_000.0, 0.0, 0.0));
        index.insert(2, Vec3::new(-7_000.0, 0.0, 0.0));
        assert_eq!(index.nearest(Vec3::ZERO, 1e6, None).map(|(id, _)| id), Some(1));
        assert!(index.nearest(Vec3::ZERO, 4_000.0, None).is_none());
    }
}
