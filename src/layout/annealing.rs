// Simulated annealing over the relaxed layout. Single-box perturbations,
// Metropolis acceptance, geometric cooling; the best state seen wins.

use super::geometry::{
    Rect, clamp_center_to_bounds, clamp_to_radius, distance, rect_gap, rects_overlap,
};
use super::{LabelBox, LayoutContext, LayoutStrategy};
use crate::config::LayoutConfig;
use rand::Rng;
use tracing::debug;

#[derive(Debug, Default, Clone, Copy, PartialEq)]
pub struct AnnealStats {
    pub initial_energy: f32,
    pub best_energy: f32,
    pub proposed: usize,
    pub accepted: usize,
    pub bypassed: bool,
}

pub struct Annealing;

impl Annealing {
    pub fn run(&self, boxes: &mut [LabelBox], ctx: &mut LayoutContext<'_>) -> AnnealStats {
        let config = ctx.config;
        let bounds = ctx.bounds();
        let movable: Vec<usize> = (0..boxes.len()).filter(|&i| boxes[i].movable()).collect();
        let mut stats = AnnealStats::default();
        if movable.is_empty() || movable.len() < config.anneal_min_labels {
            stats.bypassed = true;
            return stats;
        }

        let mut current = layout_energy(boxes, config, bounds);
        let mut best = current;
        let mut best_centers: Vec<(f32, f32)> = boxes.iter().map(LabelBox::center).collect();
        stats.initial_energy = current;

        let step = config.anneal_step.max(0.1);
        let moves = config.anneal_moves_per_label.max(1) * movable.len();
        let mut temperature = config.anneal_initial_temperature.max(1e-3);

        for _ in 0..config.anneal_iterations {
            for _ in 0..moves {
                let i = movable[ctx.rng.gen_range(0..movable.len())];
                let old = boxes[i].center();
                let proposed = (
                    old.0 + ctx.rng.gen_range(-step..=step),
                    old.1 + ctx.rng.gen_range(-step..=step),
                );
                let proposed = constrain(&boxes[i], proposed, config, bounds);
                stats.proposed += 1;

                let delta = box_energy(boxes, i, proposed, config, bounds)
                    - box_energy(boxes, i, old, config, bounds);
                let accept = delta <= 0.0
                    || ctx.rng.r#gen::<f32>() < (-delta / temperature.max(1e-6)).exp();
                if !accept {
                    continue;
                }
                boxes[i].set_center(proposed);
                current += delta;
                stats.accepted += 1;
                if current < best - 1e-6 {
                    best = current;
                    for (slot, label) in best_centers.iter_mut().zip(boxes.iter()) {
                        *slot = label.center();
                    }
                }
            }
            temperature *= config.anneal_cooling;
        }

        for (label, center) in boxes.iter_mut().zip(best_centers) {
            label.set_center(center);
        }
        stats.best_energy = best;
        stats
    }
}

impl LayoutStrategy for Annealing {
    fn name(&self) -> &'static str {
        "annealing"
    }

    fn layout(&self, boxes: &mut [LabelBox], ctx: &mut LayoutContext<'_>) {
        let stats = self.run(boxes, ctx);
        if stats.bypassed {
            debug!("annealing bypassed for a small label set");
        } else {
            debug!(
                initial = stats.initial_energy,
                best = stats.best_energy,
                accepted = stats.accepted,
                proposed = stats.proposed,
                "annealing finished"
            );
        }
    }
}

fn constrain(
    label: &LabelBox,
    center: (f32, f32),
    config: &LayoutConfig,
    bounds: (f32, f32),
) -> (f32, f32) {
    let center = clamp_center_to_bounds(center, label.w, label.h, config.viewport_margin, bounds);
    if config.max_label_distance > 0.0 {
        clamp_to_radius(center, label.anchor, config.max_label_distance)
    } else {
        center
    }
}

/// Total energy of all visible boxes.
pub fn layout_energy(boxes: &[LabelBox], config: &LayoutConfig, bounds: (f32, f32)) -> f32 {
    let visible: Vec<&LabelBox> = boxes.iter().filter(|b| b.visible).collect();
    let mut energy = 0.0;
    for (n, a) in visible.iter().enumerate() {
        let rect = a.rect();
        energy += single_energy(a, &rect, config, bounds);
        for b in &visible[n + 1..] {
            energy += pair_energy(&rect, &b.rect(), config);
        }
    }
    energy
}

/// Energy terms involving box `i` if it were centred at `center`.
fn box_energy(
    boxes: &[LabelBox],
    i: usize,
    center: (f32, f32),
    config: &LayoutConfig,
    bounds: (f32, f32),
) -> f32 {
    let label = &boxes[i];
    let rect = label.rect_at(center);
    let mut energy = single_energy_at(label, center, &rect, config, bounds);
    for (j, other) in boxes.iter().enumerate() {
        if j != i && other.visible {
            energy += pair_energy(&rect, &other.rect(), config);
        }
    }
    energy
}

fn single_energy(label: &LabelBox, rect: &Rect, config: &LayoutConfig, bounds: (f32, f32)) -> f32 {
    single_energy_at(label, label.center(), rect, config, bounds)
}

fn single_energy_at(
    label: &LabelBox,
    center: (f32, f32),
    rect: &Rect,
    config: &LayoutConfig,
    bounds: (f32, f32),
) -> f32 {
    let mut energy = edge_energy(rect, config, bounds);
    if config.max_label_distance > 0.0 {
        energy += config.anneal_distance_weight * distance(center, label.anchor)
            / config.max_label_distance;
    }
    energy
}

fn pair_energy(a: &Rect, b: &Rect, config: &LayoutConfig) -> f32 {
    if rects_overlap(a, b) {
        return config.overlap_penalty;
    }
    if config.min_spacing <= 0.0 {
        return 0.0;
    }
    let gap = rect_gap(a, b);
    if gap < config.min_spacing {
        config.spacing_penalty * (1.0 - gap / config.min_spacing)
    } else {
        0.0
    }
}

/// Graduated penalty for boxes within `edge_margin` of the viewport edge,
/// growing further once they cross it.
fn edge_energy(rect: &Rect, config: &LayoutConfig, bounds: (f32, f32)) -> f32 {
    let clearance = rect
        .0
        .min(rect.1)
        .min(bounds.0 - (rect.0 + rect.2))
        .min(bounds.1 - (rect.1 + rect.3));
    if config.edge_margin > 0.0 {
        if clearance < config.edge_margin {
            config.edge_penalty * (1.0 - clearance / config.edge_margin)
        } else {
            0.0
        }
    } else if clearance < 0.0 {
        config.edge_penalty
    } else {
        0.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::Viewport;
    use crate::layout::tests::boxed;
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    fn ctx_run(boxes: &mut [LabelBox], config: &LayoutConfig, seed: u64) -> AnnealStats {
        let mut rng = StdRng::seed_from_u64(seed);
        let mut ctx = LayoutContext {
            viewport: Viewport::new(600.0, 400.0, 12.0),
            config,
            rng: &mut rng,
        };
        Annealing.run(boxes, &mut ctx)
    }

    fn grid_of(n: usize) -> Vec<LabelBox> {
        (0..n)
            .map(|i| {
                let anchor = (100.0 + (i % 4) as f32 * 50.0, 100.0 + (i / 4) as f32 * 40.0);
                let mut label = boxed(&format!("g{i}"), anchor, 44.0, 16.0);
                label.set_center((anchor.0, anchor.1 - 16.0));
                label
            })
            .collect()
    }

    #[test]
    fn small_sets_are_bypassed() {
        let config = LayoutConfig::default();
        let mut boxes = grid_of(3);
        let before: Vec<(f32, f32)> = boxes.iter().map(LabelBox::center).collect();
        let stats = ctx_run(&mut boxes, &config, 1);
        assert!(stats.bypassed);
        let after: Vec<(f32, f32)> = boxes.iter().map(LabelBox::center).collect();
        assert_eq!(before, after);
    }

    #[test]
    fn never_returns_worse_than_it_started() {
        let config = LayoutConfig::default();
        let mut boxes = grid_of(12);
        let bounds = (600.0, 400.0);
        let start = layout_energy(&boxes, &config, bounds);
        let stats = ctx_run(&mut boxes, &config, 9);
        assert!(!stats.bypassed);
        let end = layout_energy(&boxes, &config, bounds);
        assert!(end <= start + 1e-3, "energy went from {start} to {end}");
        assert!((end - stats.best_energy).abs() < 1.0);
    }

    #[test]
    fn resolves_overlaps_in_a_tight_cluster() {
        let config = LayoutConfig::default();
        let mut boxes = grid_of(8);
        // Stack every label on the first anchor's top slot.
        let target = boxes[0].center();
        for label in boxes.iter_mut() {
            label.anchor = (target.0, target.1 + 16.0);
            label.set_center((target.0 + 1.0, target.1));
        }
        let bounds = (600.0, 400.0);
        let start = layout_energy(&boxes, &config, bounds);
        ctx_run(&mut boxes, &config, 4);
        let end = layout_energy(&boxes, &config, bounds);
        assert!(end < start * 0.5, "energy went from {start} to {end}");
    }

    #[test]
    fn seeded_runs_are_reproducible() {
        let config = LayoutConfig::default();
        let mut first = grid_of(10);
        let mut second = grid_of(10);
        ctx_run(&mut first, &config, 42);
        ctx_run(&mut second, &config, 42);
        assert_eq!(first, second);
    }

    #[test]
    fn overlap_dominates_spacing() {
        let config = LayoutConfig::default();
        let a: Rect = (0.0, 0.0, 10.0, 10.0);
        let touching: Rect = (11.0, 0.0, 10.0, 10.0);
        let overlapping: Rect = (5.0, 0.0, 10.0, 10.0);
        assert!(pair_energy(&a, &overlapping, &config) > pair_energy(&a, &touching, &config));
        assert!(pair_energy(&a, &touching, &config) > 0.0);
    }
}
