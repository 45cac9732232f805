use super::geometry::Rect;
use std::collections::{HashMap, HashSet};

/// Spatial index for fast overlap queries during label placement.
pub struct ObstacleGrid {
    cell: f32,
    /// Maps grid cell (ix, iy) to indices into the caller's obstacle list.
    cells: HashMap<(i32, i32), Vec<usize>>,
}

impl ObstacleGrid {
    pub fn new(cell: f32) -> Self {
        Self {
            cell: cell.max(16.0),
            cells: HashMap::new(),
        }
    }

    fn span(&self, rect: &Rect) -> (i32, i32, i32, i32) {
        (
            (rect.0 / self.cell).floor() as i32,
            (rect.1 / self.cell).floor() as i32,
            ((rect.0 + rect.2) / self.cell).floor() as i32,
            ((rect.1 + rect.3) / self.cell).floor() as i32,
        )
    }

    pub fn insert(&mut self, idx: usize, rect: &Rect) {
        let (x0, y0, x1, y1) = self.span(rect);
        for ix in x0..=x1 {
            for iy in y0..=y1 {
                self.cells.entry((ix, iy)).or_default().push(idx);
            }
        }
    }

    /// Return indices of obstacles that could overlap with `rect`.
    pub fn query(&self, rect: &Rect) -> impl Iterator<Item = usize> + '_ {
        let (x0, y0, x1, y1) = self.span(rect);
        let mut seen = HashSet::new();
        (x0..=x1)
            .flat_map(move |ix| (y0..=y1).map(move |iy| (ix, iy)))
            .flat_map(move |key| {
                self.cells
                    .get(&key)
                    .map(|v| v.as_slice())
                    .unwrap_or(&[])
                    .iter()
                    .copied()
            })
            .filter(move |idx| seen.insert(*idx))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn query_finds_nearby_rect() {
        let mut grid = ObstacleGrid::new(20.0);
        grid.insert(0, &(10.0, 10.0, 30.0, 30.0));
        let hits: Vec<usize> = grid.query(&(15.0, 15.0, 5.0, 5.0)).collect();
        assert!(hits.contains(&0), "grid should find overlapping rect");
    }

    #[test]
    fn query_reports_each_index_once() {
        let mut grid = ObstacleGrid::new(16.0);
        grid.insert(3, &(0.0, 0.0, 100.0, 100.0));
        let hits: Vec<usize> = grid.query(&(0.0, 0.0, 100.0, 100.0)).collect();
        assert_eq!(hits, vec![3]);
    }

    #[test]
    fn distant_rects_are_not_returned() {
        let mut grid = ObstacleGrid::new(20.0);
        grid.insert(0, &(500.0, 500.0, 10.0, 10.0));
        assert_eq!(grid.query(&(0.0, 0.0, 10.0, 10.0)).count(), 0);
    }
}
