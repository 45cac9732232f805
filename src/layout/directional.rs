// Greedy compass placement. Boxes are visited in placement order and take
// the first preferred direction that is free.

use super::geometry::{
    Rect, clamp_center_to_bounds, clamp_to_radius, distance, fits_in_bounds, inflate_rect,
    rects_overlap,
};
use super::obstacle_grid::ObstacleGrid;
use super::{LabelBox, LayoutContext, LayoutStrategy};
use crate::config::{DEFAULT_PLACEMENT_ORDER, LayoutConfig};
use std::f32::consts::FRAC_1_SQRT_2;
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Top,
    Right,
    Bottom,
    Left,
    TopRight,
    BottomRight,
    BottomLeft,
    TopLeft,
}

impl Direction {
    pub fn from_name(name: &str) -> Option<Self> {
        let token: String = name
            .trim()
            .to_ascii_lowercase()
            .chars()
            .filter(|c| c.is_ascii_alphabetic())
            .collect();
        match token.as_str() {
            "top" | "n" | "north" => Some(Self::Top),
            "right" | "e" | "east" => Some(Self::Right),
            "bottom" | "s" | "south" => Some(Self::Bottom),
            "left" | "w" | "west" => Some(Self::Left),
            "topright" | "ne" | "northeast" => Some(Self::TopRight),
            "bottomright" | "se" | "southeast" => Some(Self::BottomRight),
            "bottomleft" | "sw" | "southwest" => Some(Self::BottomLeft),
            "topleft" | "nw" | "northwest" => Some(Self::TopLeft),
            _ => None,
        }
    }

    /// Centre offset that leaves `stand_off` pixels between the anchor and
    /// the nearest box edge (or corner, for diagonals).
    pub fn offset(self, w: f32, h: f32, stand_off: f32) -> (f32, f32) {
        let hw = w * 0.5;
        let hh = h * 0.5;
        let diag = stand_off * FRAC_1_SQRT_2;
        match self {
            Self::Top => (0.0, -(stand_off + hh)),
            Self::Right => (stand_off + hw, 0.0),
            Self::Bottom => (0.0, stand_off + hh),
            Self::Left => (-(stand_off + hw), 0.0),
            Self::TopRight => (diag + hw, -(diag + hh)),
            Self::BottomRight => (diag + hw, diag + hh),
            Self::BottomLeft => (-(diag + hw), diag + hh),
            Self::TopLeft => (-(diag + hw), -(diag + hh)),
        }
    }
}

/// Parse a preference list. An empty list, or any unknown name, yields the
/// default order.
pub fn parse_preferences(names: &[String]) -> Vec<Direction> {
    let parsed: Option<Vec<Direction>> = names.iter().map(|n| Direction::from_name(n)).collect();
    match parsed {
        Some(list) if !list.is_empty() => list,
        _ => {
            if !names.is_empty() {
                debug!(?names, "invalid placement preferences; using default order");
            }
            DEFAULT_PLACEMENT_ORDER
                .iter()
                .filter_map(|name| Direction::from_name(name))
                .collect()
        }
    }
}

/// Placed rectangles, each inflated by `pad`, behind a grid index.
pub(super) struct Occupancy {
    grid: ObstacleGrid,
    rects: Vec<Rect>,
    pad: f32,
}

impl Occupancy {
    pub(super) fn new(cell: f32, pad: f32) -> Self {
        Self {
            grid: ObstacleGrid::new(cell),
            rects: Vec::new(),
            pad: pad.max(0.0),
        }
    }

    pub(super) fn add(&mut self, rect: Rect) {
        let rect = inflate_rect(rect, self.pad);
        self.grid.insert(self.rects.len(), &rect);
        self.rects.push(rect);
    }

    pub(super) fn overlaps(&self, rect: &Rect) -> usize {
        let padded = inflate_rect(*rect, self.pad);
        self.grid
            .query(&padded)
            .filter(|&idx| rects_overlap(&padded, &self.rects[idx]))
            .count()
    }
}

enum Placement {
    Free((f32, f32)),
    Crowded((f32, f32), usize),
    Nowhere,
}

pub struct Directional {
    preferences: Vec<Direction>,
    stand_off: f32,
    max_distance: f32,
    margin: f32,
    spacing: f32,
    strict: bool,
}

impl Directional {
    pub fn from_config(config: &LayoutConfig) -> Self {
        Self {
            preferences: parse_preferences(&config.placement_preferences),
            stand_off: config.stand_off.max(0.0),
            max_distance: config.max_label_distance,
            margin: config.viewport_margin.max(0.0),
            spacing: config.min_spacing.max(0.0),
            strict: config.strict_no_overlap,
        }
    }

    pub fn preferences(&self) -> &[Direction] {
        &self.preferences
    }

    fn within_radius(&self, label: &LabelBox, center: (f32, f32)) -> bool {
        self.max_distance <= 0.0 || distance(center, label.anchor) <= self.max_distance + 1e-3
    }

    /// Positions to try, best first: last pass's offset, each preferred
    /// direction as-is, then each direction pulled inside the viewport.
    fn positions(&self, label: &LabelBox, bounds: (f32, f32)) -> Vec<(f32, f32)> {
        let (ax, ay) = label.anchor;
        let mut raw: Vec<(f32, f32)> = Vec::with_capacity(self.preferences.len() + 1);
        if let Some((dx, dy)) = label.previous {
            raw.push((ax + dx, ay + dy));
        }
        for dir in &self.preferences {
            let (dx, dy) = dir.offset(label.w, label.h, self.stand_off);
            raw.push((ax + dx, ay + dy));
        }
        let mut out: Vec<(f32, f32)> = raw
            .iter()
            .copied()
            .filter(|&c| fits_in_bounds(c, label.w, label.h, self.margin, bounds))
            .collect();
        for &c in &raw {
            let pulled = clamp_center_to_bounds(c, label.w, label.h, self.margin, bounds);
            if pulled != c && !out.contains(&pulled) {
                out.push(pulled);
            }
        }
        out.retain(|&c| self.within_radius(label, c));
        out
    }

    fn place(&self, label: &LabelBox, placed: &Occupancy, bounds: (f32, f32)) -> Placement {
        let mut best: Option<((f32, f32), usize)> = None;
        for center in self.positions(label, bounds) {
            let count = placed.overlaps(&label.rect_at(center));
            if count == 0 {
                return Placement::Free(center);
            }
            if best.is_none_or(|(_, fewest)| count < fewest) {
                best = Some((center, count));
            }
        }
        match best {
            Some((center, count)) => Placement::Crowded(center, count),
            None => Placement::Nowhere,
        }
    }

    /// First free position for `label` against `placed`.
    pub(super) fn free_position(
        &self,
        label: &LabelBox,
        placed: &Occupancy,
        ctx: &LayoutContext<'_>,
    ) -> Option<(f32, f32)> {
        self.positions(label, ctx.bounds())
            .into_iter()
            .find(|&center| placed.overlaps(&label.rect_at(center)) == 0)
    }

    fn fallback(&self, label: &LabelBox, bounds: (f32, f32)) -> (f32, f32) {
        let (dx, dy) = self
            .preferences
            .first()
            .map(|dir| dir.offset(label.w, label.h, self.stand_off))
            .unwrap_or((0.0, -self.stand_off));
        let center = (label.anchor.0 + dx, label.anchor.1 + dy);
        let center = clamp_center_to_bounds(center, label.w, label.h, self.margin, bounds);
        if self.max_distance > 0.0 {
            clamp_to_radius(center, label.anchor, self.max_distance)
        } else {
            center
        }
    }
}

impl LayoutStrategy for Directional {
    fn name(&self) -> &'static str {
        "directional"
    }

    fn layout(&self, boxes: &mut [LabelBox], ctx: &mut LayoutContext<'_>) {
        let bounds = ctx.bounds();
        let cell = boxes.iter().map(|b| b.w).fold(16.0_f32, f32::max);
        let mut placed = Occupancy::new(cell, self.spacing * 0.5);
        for label in boxes.iter().filter(|b| b.visible && b.fixed) {
            placed.add(label.rect());
        }

        let mut crowded = 0usize;
        for label in boxes.iter_mut().filter(|b| b.movable()) {
            match self.place(label, &placed, bounds) {
                Placement::Free(center) => label.set_center(center),
                Placement::Crowded(_, _) | Placement::Nowhere if self.strict => {
                    label.visible = false;
                    continue;
                }
                Placement::Crowded(center, _) => {
                    crowded += 1;
                    label.set_center(center);
                }
                Placement::Nowhere => {
                    crowded += 1;
                    label.set_center(self.fallback(label, bounds));
                }
            }
            placed.add(label.rect());
        }
        if crowded > 0 {
            debug!(crowded, "directional placement left overlapping labels");
        }
    }
}
