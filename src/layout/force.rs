// Force-directed relaxation seeded from the directional layout.

use super::geometry::{clamp_center_to_bounds, clamp_to_radius, distance, inflate_rect, rect_gap};
use super::{LabelBox, LayoutContext, LayoutStrategy};
use crate::config::LayoutConfig;

pub struct ForceRelaxation;

impl LayoutStrategy for ForceRelaxation {
    fn name(&self) -> &'static str {
        "force"
    }

    fn layout(&self, boxes: &mut [LabelBox], ctx: &mut LayoutContext<'_>) {
        let config = ctx.config;
        let bounds = ctx.bounds();
        let active: Vec<usize> = (0..boxes.len()).filter(|&i| boxes[i].visible).collect();
        if config.force_iterations == 0 || !active.iter().any(|&i| !boxes[i].fixed) {
            return;
        }
        // Spring rest length is where the directional pass put the box.
        let rest: Vec<f32> = boxes
            .iter()
            .map(|b| distance(b.center(), b.anchor))
            .collect();
        let iterations = config.force_iterations;

        for iter in 0..iterations {
            let damping = config.force_damping * (1.0 - iter as f32 / iterations as f32);
            let mut forces = vec![(0.0_f32, 0.0_f32); boxes.len()];

            for (n, &i) in active.iter().enumerate() {
                for &j in &active[n + 1..] {
                    let gap = rect_gap(&boxes[i].rect(), &boxes[j].rect());
                    if gap >= config.force_too_close {
                        continue;
                    }
                    let (ux, uy) = unit_between(boxes[j].center(), boxes[i].center(), i, j);
                    let d = gap.max(1.0);
                    let magnitude = config.force_repulsion / (d * d);
                    forces[i].0 += ux * magnitude;
                    forces[i].1 += uy * magnitude;
                    forces[j].0 -= ux * magnitude;
                    forces[j].1 -= uy * magnitude;
                }
            }

            for &i in &active {
                let label = &boxes[i];
                if label.fixed {
                    continue;
                }
                let (bx, by) = boundary_force(label, config, bounds);
                let (sx, sy) = spring_force(label, rest[i], config);
                let (mx, my) = marker_force(label, config);
                let fx = forces[i].0 + bx + sx + mx;
                let fy = forces[i].1 + by + sy + my;

                let (mut step_x, mut step_y) = (fx * damping, fy * damping);
                let len = (step_x * step_x + step_y * step_y).sqrt();
                if len > config.force_max_step && len > 0.0 {
                    step_x *= config.force_max_step / len;
                    step_y *= config.force_max_step / len;
                }

                let label = &mut boxes[i];
                let moved = (label.x + step_x, label.y + step_y);
                let moved = clamp_center_to_bounds(
                    moved,
                    label.w,
                    label.h,
                    config.viewport_margin,
                    bounds,
                );
                let moved = if config.max_label_distance > 0.0 {
                    clamp_to_radius(moved, label.anchor, config.max_label_distance)
                } else {
                    moved
                };
                label.set_center(moved);
            }
        }
    }
}

/// Unit vector pointing from `from` to `to`. Coincident centres get a
/// deterministic direction derived from the pair indices.
fn unit_between(from: (f32, f32), to: (f32, f32), i: usize, j: usize) -> (f32, f32) {
    let dx = to.0 - from.0;
    let dy = to.1 - from.1;
    let len = (dx * dx + dy * dy).sqrt();
    if len > 1e-4 {
        return (dx / len, dy / len);
    }
    let angle = ((i * 31 + j * 17) % 360) as f32 * std::f32::consts::PI / 180.0;
    (angle.cos(), angle.sin())
}

fn boundary_force(label: &LabelBox, config: &LayoutConfig, bounds: (f32, f32)) -> (f32, f32) {
    let (x, y, w, h) = label.rect();
    let margin = config.viewport_margin;
    let push = |overshoot: f32| {
        if overshoot <= 0.0 {
            0.0
        } else {
            (overshoot * 0.5).min(config.force_boundary)
        }
    };
    let fx = push(margin - x) - push(x + w - (bounds.0 - margin));
    let fy = push(margin - y) - push(y + h - (bounds.1 - margin));
    (fx, fy)
}

/// Pull back toward the anchor once the box is further out than its rest
/// length; beyond half the maximum distance the pull grows quadratically.
fn spring_force(label: &LabelBox, rest: f32, config: &LayoutConfig) -> (f32, f32) {
    let d = distance(label.center(), label.anchor);
    let excess = d - rest;
    if excess <= 0.0 || d <= f32::EPSILON {
        return (0.0, 0.0);
    }
    let mut strength = config.force_spring * excess;
    let half = config.max_label_distance * 0.5;
    if half > 0.0 && d > half {
        strength *= (d / half).powi(2);
    }
    (
        (label.anchor.0 - label.x) / d * strength,
        (label.anchor.1 - label.y) / d * strength,
    )
}

/// Push the box off its own anchor marker.
fn marker_force(label: &LabelBox, config: &LayoutConfig) -> (f32, f32) {
    let (x, y, w, h) = inflate_rect(label.rect(), config.anchor_marker_radius);
    let (ax, ay) = label.anchor;
    if ax <= x || ax >= x + w || ay <= y || ay >= y + h {
        return (0.0, 0.0);
    }
    let depth = (ax - x).min(x + w - ax).min(ay - y).min(y + h - ay);
    let dx = label.x - ax;
    let dy = label.y - ay;
    let len = (dx * dx + dy * dy).sqrt();
    let (ux, uy) = if len > 1e-4 {
        (dx / len, dy / len)
    } else {
        (0.0, -1.0)
    };
    let magnitude = depth * config.force_anchor_repulsion;
    (ux * magnitude, uy * magnitude)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::Viewport;
    use crate::layout::geometry::rects_overlap;
    use crate::layout::tests::boxed;
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    fn relax(boxes: &mut [LabelBox], config: &LayoutConfig) {
        let mut rng = StdRng::seed_from_u64(0);
        let mut ctx = LayoutContext {
            viewport: Viewport::new(400.0, 300.0, 12.0),
            config,
            rng: &mut rng,
        };
        ForceRelaxation.layout(boxes, &mut ctx);
    }

    #[test]
    fn overlapping_pair_is_pushed_apart() {
        let config = LayoutConfig::default();
        let mut boxes = vec![
            boxed("a", (200.0, 150.0), 40.0, 16.0),
            boxed("b", (200.0, 150.0), 40.0, 16.0),
        ];
        boxes[0].set_center((190.0, 130.0));
        boxes[1].set_center((200.0, 130.0));
        relax(&mut boxes, &config);
        assert!(!rects_overlap(&boxes[0].rect(), &boxes[1].rect()));
    }

    #[test]
    fn boxes_stay_inside_viewport_and_radius() {
        let config = LayoutConfig::default();
        let mut boxes = vec![boxed("edge", (2.0, 2.0), 60.0, 16.0)];
        boxes[0].set_center((-40.0, -20.0));
        relax(&mut boxes, &config);
        let (x, y, _, _) = boxes[0].rect();
        assert!(x >= config.viewport_margin - 1e-3);
        assert!(y >= config.viewport_margin - 1e-3);
        assert!(distance(boxes[0].center(), boxes[0].anchor) <= config.max_label_distance + 1e-3);
    }

    #[test]
    fn spring_grows_past_half_distance() {
        let config = LayoutConfig::default();
        let mut near = boxed("near", (0.0, 0.0), 10.0, 10.0);
        near.set_center((30.0, 0.0));
        let mut far = boxed("far", (0.0, 0.0), 10.0, 10.0);
        far.set_center((60.0, 0.0));
        let near_pull = spring_force(&near, 20.0, &config).0.abs();
        let far_pull = spring_force(&far, 50.0, &config).0.abs();
        // Same excess, but the far box is past half of max distance.
        assert!(far_pull > near_pull * 1.5, "{far_pull} vs {near_pull}");
    }

    #[test]
    fn label_sitting_on_its_anchor_is_pushed_off() {
        let config = LayoutConfig::default();
        let label = boxed("on", (100.0, 100.0), 40.0, 16.0);
        let (fx, fy) = marker_force(&label, &config);
        assert!(fx.abs() + fy.abs() > 0.0);
    }

    #[test]
    fn fixed_boxes_do_not_move() {
        let config = LayoutConfig::default();
        let mut boxes = vec![
            boxed("pinned", (200.0, 150.0), 40.0, 16.0),
            boxed("free", (200.0, 150.0), 40.0, 16.0),
        ];
        boxes[0].fixed = true;
        relax(&mut boxes, &config);
        assert_eq!(boxes[0].center(), (200.0, 150.0));
    }
}
