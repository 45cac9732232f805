// Layout engine. A directional pass always runs first; force relaxation and
// annealing refine its output. Invisible boxes are never moved.

mod annealing;
mod directional;
mod force;
pub mod geometry;
mod obstacle_grid;

pub use annealing::{AnnealStats, Annealing, layout_energy};
pub use directional::{Direction, Directional, parse_preferences};
pub use force::ForceRelaxation;
pub use geometry::Rect;

use crate::candidates::LabelCandidate;
use crate::config::LayoutConfig;
use crate::ir::Viewport;
use directional::Occupancy;
use geometry::{clamp_to_radius, rect_around};
use rand::rngs::StdRng;
use serde::Serialize;
use std::cmp::Ordering;
use tracing::debug;

/// Screen-space box for one candidate. `x`/`y` is the box centre.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LabelBox {
    /// Index of the backing candidate.
    pub idx: usize,
    pub key: String,
    pub text: String,
    pub x: f32,
    pub y: f32,
    pub w: f32,
    pub h: f32,
    pub anchor: (f32, f32),
    /// Pinned by an edit or frozen by editing mode.
    pub fixed: bool,
    pub visible: bool,
    #[serde(skip)]
    pub previous: Option<(f32, f32)>,
}

impl LabelBox {
    pub fn from_candidate(idx: usize, candidate: &LabelCandidate) -> Self {
        let (dx, dy) = candidate.fixed_offset.unwrap_or((0.0, 0.0));
        Self {
            idx,
            key: candidate.key.clone(),
            text: candidate.text.clone(),
            x: candidate.anchor.0 + dx,
            y: candidate.anchor.1 + dy,
            w: candidate.width,
            h: candidate.height,
            anchor: candidate.anchor,
            fixed: candidate.fixed_offset.is_some(),
            visible: candidate.visible,
            previous: candidate.previous_offset,
        }
    }

    pub fn center(&self) -> (f32, f32) {
        (self.x, self.y)
    }

    pub fn set_center(&mut self, center: (f32, f32)) {
        self.x = center.0;
        self.y = center.1;
    }

    pub fn rect(&self) -> Rect {
        rect_around(self.center(), self.w, self.h)
    }

    pub fn rect_at(&self, center: (f32, f32)) -> Rect {
        rect_around(center, self.w, self.h)
    }

    /// Offset of the box centre from its anchor.
    pub fn offset(&self) -> (f32, f32) {
        (self.x - self.anchor.0, self.y - self.anchor.1)
    }

    pub fn movable(&self) -> bool {
        self.visible && !self.fixed
    }
}

/// Boxes for every candidate, ordered for placement: pinned first, then by
/// priority (highest first) and key.
pub fn boxes_for(candidates: &[LabelCandidate]) -> Vec<LabelBox> {
    let mut order: Vec<usize> = (0..candidates.len()).collect();
    order.sort_by(|&a, &b| placement_order(&candidates[a], &candidates[b]));
    order
        .into_iter()
        .map(|idx| LabelBox::from_candidate(idx, &candidates[idx]))
        .collect()
}

fn placement_order(a: &LabelCandidate, b: &LabelCandidate) -> Ordering {
    b.fixed_offset
        .is_some()
        .cmp(&a.fixed_offset.is_some())
        .then_with(|| b.priority.total_cmp(&a.priority))
        .then_with(|| a.key.cmp(&b.key))
}

pub struct LayoutContext<'a> {
    pub viewport: Viewport,
    pub config: &'a LayoutConfig,
    pub rng: &'a mut StdRng,
}

impl LayoutContext<'_> {
    pub fn bounds(&self) -> (f32, f32) {
        (self.viewport.width, self.viewport.height)
    }
}

/// One stage of the layout chain. Each stage consumes the previous stage's
/// boxes in place.
pub trait LayoutStrategy {
    fn name(&self) -> &'static str;
    fn layout(&self, boxes: &mut [LabelBox], ctx: &mut LayoutContext<'_>);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LayoutAlgorithm {
    Directional,
    Force,
    Annealing,
}

impl LayoutAlgorithm {
    /// Unknown names fall back to force relaxation.
    pub fn from_name(name: &str) -> Self {
        match name.trim().to_ascii_lowercase().as_str() {
            "directional" | "greedy" | "baseline" => Self::Directional,
            "force" | "force-directed" | "forcedirected" => Self::Force,
            "annealing" | "simulated-annealing" | "high-quality" | "highquality" => {
                Self::Annealing
            }
            other => {
                debug!(algorithm = other, "unknown layout algorithm; using force");
                Self::Force
            }
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Directional => "directional",
            Self::Force => "force",
            Self::Annealing => "annealing",
        }
    }

    /// The refinement stages that run after the directional pass.
    fn refinements(self) -> Vec<Box<dyn LayoutStrategy>> {
        match self {
            Self::Directional => Vec::new(),
            Self::Force => vec![Box::new(ForceRelaxation)],
            Self::Annealing => vec![Box::new(ForceRelaxation), Box::new(Annealing)],
        }
    }
}

#[derive(Debug, Default, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LayoutReport {
    pub stages: Vec<&'static str>,
    pub placed: usize,
    /// Boxes hidden because no overlap-free position existed.
    pub hidden: usize,
}

/// Run the strategy chain for `algorithm` over `boxes`.
pub fn run_layout(
    boxes: &mut [LabelBox],
    algorithm: LayoutAlgorithm,
    ctx: &mut LayoutContext<'_>,
) -> LayoutReport {
    let mut report = LayoutReport::default();
    let visible_before = boxes.iter().filter(|b| b.visible).count();
    if visible_before == 0 {
        return report;
    }

    let directional = Directional::from_config(ctx.config);
    directional.layout(boxes, ctx);
    report.stages.push(directional.name());
    let home: Vec<(f32, f32)> = boxes.iter().map(LabelBox::center).collect();

    for stage in algorithm.refinements() {
        stage.layout(boxes, ctx);
        report.stages.push(stage.name());
    }

    let max_distance = ctx.config.max_label_distance;
    if max_distance > 0.0 {
        for label in boxes.iter_mut().filter(|b| b.movable()) {
            let clamped = clamp_to_radius(label.center(), label.anchor, max_distance);
            label.set_center(clamped);
        }
    }

    if ctx.config.strict_no_overlap {
        enforce_no_overlap(boxes, &home, &directional, ctx);
    }

    report.placed = boxes.iter().filter(|b| b.visible).count();
    report.hidden = visible_before - report.placed;
    debug!(
        stages = ?report.stages,
        placed = report.placed,
        hidden = report.hidden,
        "layout pass finished"
    );
    report
}

/// Walk boxes in placement order; a box that overlaps an already accepted
/// one goes back to its directional position, then to any free compass
/// position, and is hidden if neither is free.
fn enforce_no_overlap(
    boxes: &mut [LabelBox],
    home: &[(f32, f32)],
    directional: &Directional,
    ctx: &LayoutContext<'_>,
) {
    let mut accepted = Occupancy::new(cell_size(boxes), 0.0);
    for (i, label) in boxes.iter_mut().enumerate() {
        if !label.visible {
            continue;
        }
        if label.fixed {
            accepted.add(label.rect());
            continue;
        }
        if accepted.overlaps(&label.rect()) == 0 {
            accepted.add(label.rect());
            continue;
        }
        if accepted.overlaps(&label.rect_at(home[i])) == 0 {
            label.set_center(home[i]);
            accepted.add(label.rect());
            continue;
        }
        match directional.free_position(label, &accepted, ctx) {
            Some(center) => {
                label.set_center(center);
                accepted.add(label.rect());
            }
            None => {
                debug!(label = %label.key, "no overlap-free position; hiding");
                label.visible = false;
            }
        }
    }
}

fn cell_size(boxes: &[LabelBox]) -> f32 {
    let visible = boxes.iter().filter(|b| b.visible).count().max(1) as f32;
    let avg_w: f32 = boxes.iter().filter(|b| b.visible).map(|b| b.w).sum::<f32>() / visible;
    avg_w.max(16.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layout::geometry::{distance, rects_overlap};
    use rand::SeedableRng;

    pub(super) fn boxed(key: &str, anchor: (f32, f32), w: f32, h: f32) -> LabelBox {
        LabelBox {
            idx: 0,
            key: key.to_string(),
            text: key.to_string(),
            x: anchor.0,
            y: anchor.1,
            w,
            h,
            anchor,
            fixed: false,
            visible: true,
            previous: None,
        }
    }

    fn crowd(n: usize) -> Vec<LabelBox> {
        (0..n)
            .map(|i| {
                let anchor = (150.0 + (i % 5) as f32 * 70.0, 120.0 + (i / 5) as f32 * 60.0);
                let mut label = boxed(&format!("l{i}"), anchor, 48.0, 16.0);
                label.idx = i;
                label
            })
            .collect()
    }

    fn assert_no_overlap(boxes: &[LabelBox]) {
        let visible: Vec<&LabelBox> = boxes.iter().filter(|b| b.visible).collect();
        for (i, a) in visible.iter().enumerate() {
            for b in &visible[i + 1..] {
                assert!(
                    !rects_overlap(&a.rect(), &b.rect()),
                    "{} overlaps {}",
                    a.key,
                    b.key
                );
            }
        }
    }

    #[test]
    fn unknown_algorithm_falls_back_to_force() {
        assert_eq!(LayoutAlgorithm::from_name("spiral"), LayoutAlgorithm::Force);
        assert_eq!(
            LayoutAlgorithm::from_name("High-Quality"),
            LayoutAlgorithm::Annealing
        );
        assert_eq!(
            LayoutAlgorithm::from_name("directional"),
            LayoutAlgorithm::Directional
        );
    }

    #[test]
    fn empty_input_is_a_no_op() {
        let config = LayoutConfig::default();
        let mut rng = StdRng::seed_from_u64(1);
        let mut ctx = LayoutContext {
            viewport: Viewport::new(800.0, 600.0, 12.0),
            config: &config,
            rng: &mut rng,
        };
        let mut boxes: Vec<LabelBox> = Vec::new();
        let report = run_layout(&mut boxes, LayoutAlgorithm::Annealing, &mut ctx);
        assert!(report.stages.is_empty());
    }

    #[test]
    fn every_algorithm_separates_a_crowd_within_radius() {
        let config = LayoutConfig::default();
        for algorithm in [
            LayoutAlgorithm::Directional,
            LayoutAlgorithm::Force,
            LayoutAlgorithm::Annealing,
        ] {
            let mut rng = StdRng::seed_from_u64(7);
            let mut ctx = LayoutContext {
                viewport: Viewport::new(800.0, 600.0, 12.0),
                config: &config,
                rng: &mut rng,
            };
            let mut boxes = crowd(15);
            run_layout(&mut boxes, algorithm, &mut ctx);
            assert_no_overlap(&boxes);
            for label in boxes.iter().filter(|b| b.visible) {
                assert!(
                    distance(label.center(), label.anchor) <= config.max_label_distance + 1e-3,
                    "{algorithm:?}: {} strayed",
                    label.key
                );
            }
            assert!(boxes.iter().all(|b| b.visible), "{algorithm:?} hid a label");
        }
    }

    #[test]
    fn invisible_boxes_are_never_moved() {
        let config = LayoutConfig::default();
        let mut rng = StdRng::seed_from_u64(3);
        let mut ctx = LayoutContext {
            viewport: Viewport::new(800.0, 600.0, 12.0),
            config: &config,
            rng: &mut rng,
        };
        let mut boxes = crowd(10);
        boxes[4].visible = false;
        let before = boxes[4].center();
        run_layout(&mut boxes, LayoutAlgorithm::Annealing, &mut ctx);
        assert_eq!(boxes[4].center(), before);
        assert!(!boxes[4].visible);
    }

    #[test]
    fn fixed_boxes_keep_their_offset() {
        let config = LayoutConfig::default();
        let mut rng = StdRng::seed_from_u64(3);
        let mut ctx = LayoutContext {
            viewport: Viewport::new(800.0, 600.0, 12.0),
            config: &config,
            rng: &mut rng,
        };
        let mut boxes = crowd(6);
        boxes[0].fixed = true;
        let anchor = boxes[0].anchor;
        boxes[0].set_center((anchor.0 + 12.0, anchor.1 - 8.0));
        run_layout(&mut boxes, LayoutAlgorithm::Force, &mut ctx);
        assert_eq!(boxes[0].offset(), (12.0, -8.0));
    }

    #[test]
    fn strict_mode_hides_what_cannot_fit() {
        let config = LayoutConfig::default();
        let mut rng = StdRng::seed_from_u64(5);
        let mut ctx = LayoutContext {
            viewport: Viewport::new(800.0, 600.0, 12.0),
            config: &config,
            rng: &mut rng,
        };
        // Forty wide labels stacked on one anchor cannot all fit.
        let mut boxes: Vec<LabelBox> = (0..40)
            .map(|i| boxed(&format!("s{i:02}"), (400.0, 300.0), 120.0, 20.0))
            .collect();
        let report = run_layout(&mut boxes, LayoutAlgorithm::Force, &mut ctx);
        assert!(report.hidden > 0);
        assert_no_overlap(&boxes);
    }
}
