// Uniform screen-space grid used to estimate local label crowding and to pick
// one representative per cluster.

use crate::candidates::LabelCandidate;
use std::collections::HashMap;

pub type CellKey = (i32, i32);

#[derive(Debug, Default, Clone)]
pub struct GridCell {
    /// Candidate indices for the current pass.
    pub members: Vec<usize>,
    pub count: usize,
    pub priority_sum: f32,
}

#[derive(Debug)]
pub struct DensityGrid {
    cell: f32,
    reset_delta: f32,
    cells: HashMap<CellKey, GridCell>,
    /// Representative candidate key per cell, remembered across passes so
    /// the promoted label stays the same while the view only pans.
    representatives: HashMap<CellKey, String>,
    last_zoom: Option<f32>,
}

impl DensityGrid {
    pub fn new(cell: f32, reset_delta: f32) -> Self {
        Self {
            cell: cell.max(1.0),
            reset_delta,
            cells: HashMap::new(),
            representatives: HashMap::new(),
            last_zoom: None,
        }
    }

    pub fn cell_size(&self) -> f32 {
        self.cell
    }

    pub fn set_cell_size(&mut self, cell: f32) {
        let cell = cell.max(1.0);
        if (cell - self.cell).abs() > f32::EPSILON {
            self.cell = cell;
            self.clear();
        }
    }

    /// Fully clear when zoom moved more than the reset delta since the last
    /// observed zoom. Returns whether the grid was cleared.
    pub fn observe_zoom(&mut self, zoom: f32) -> bool {
        let stale = self
            .last_zoom
            .is_some_and(|last| (zoom - last).abs() > self.reset_delta);
        if stale {
            self.clear();
        }
        if stale || self.last_zoom.is_none() {
            self.last_zoom = Some(zoom);
        }
        stale
    }

    pub fn clear(&mut self) {
        self.cells.clear();
        self.representatives.clear();
    }

    pub fn cell_key(&self, point: (f32, f32)) -> CellKey {
        (
            (point.0 / self.cell).floor() as i32,
            (point.1 / self.cell).floor() as i32,
        )
    }

    pub fn insert(&mut self, idx: usize, point: (f32, f32), priority: f32) -> CellKey {
        let key = self.cell_key(point);
        let cell = self.cells.entry(key).or_default();
        cell.members.push(idx);
        cell.count += 1;
        cell.priority_sum += priority;
        key
    }

    pub fn cell(&self, key: CellKey) -> Option<&GridCell> {
        self.cells.get(&key)
    }

    /// Points in the cell and its eight neighbours.
    pub fn neighborhood_count(&self, key: CellKey) -> usize {
        let mut total = 0;
        for dx in -1..=1 {
            for dy in -1..=1 {
                if let Some(cell) = self.cells.get(&(key.0 + dx, key.1 + dy)) {
                    total += cell.count;
                }
            }
        }
        total
    }

    /// `1 / max(1, ln(n + 1))` over the 3x3 neighbourhood.
    pub fn density_score(&self, key: CellKey) -> f32 {
        let n = self.neighborhood_count(key) as f32;
        1.0 / (n + 1.0).ln().max(1.0)
    }

    /// Rebuild cells from `candidates`, scale every priority by its density
    /// score and boost one representative per cell.
    pub fn apply(&mut self, candidates: &mut [LabelCandidate], boost: f32) {
        self.cells.clear();
        for (idx, candidate) in candidates.iter().enumerate() {
            self.insert(idx, candidate.anchor, candidate.priority);
        }

        let mut order: Vec<usize> = (0..candidates.len()).collect();
        order.sort_by(|&a, &b| {
            candidates[b]
                .priority
                .total_cmp(&candidates[a].priority)
                .then_with(|| candidates[a].key.cmp(&candidates[b].key))
        });

        let mut chosen: HashMap<CellKey, usize> = HashMap::new();
        for (key, cell) in &self.cells {
            let remembered = self.representatives.get(key).and_then(|rep| {
                cell.members
                    .iter()
                    .copied()
                    .find(|&m| candidates[m].key == *rep)
            });
            if let Some(idx) = remembered {
                chosen.insert(*key, idx);
            }
        }
        for &idx in &order {
            let key = self.cell_key(candidates[idx].anchor);
            chosen.entry(key).or_insert(idx);
        }

        let scores: HashMap<CellKey, f32> = self
            .cells
            .keys()
            .map(|key| (*key, self.density_score(*key)))
            .collect();
        for (idx, candidate) in candidates.iter_mut().enumerate() {
            let key = self.cell_key(candidate.anchor);
            candidate.priority *= scores.get(&key).copied().unwrap_or(1.0);
            if chosen.get(&key) == Some(&idx) {
                candidate.priority *= boost;
            }
            candidate.cluster = Some(key);
        }

        self.representatives = chosen
            .into_iter()
            .map(|(key, idx)| (key, candidates[idx].key.clone()))
            .collect();
    }
}
