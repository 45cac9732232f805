// Candidate building: turns cached label records into the on-screen set the
// layout strategies work on. Self-managed layers only get visibility toggled.

use crate::config::LabelConfig;
use crate::density::CellKey;
use crate::host::MapHost;
use crate::ir::{Attributes, Entity, EntityIndex, Layer, Viewport};
use crate::records::LabelCache;
use crate::text::measure_label;
use rand::Rng;
use serde_json::Value;
use std::cmp::Ordering;
use std::collections::HashMap;
use tracing::debug;

#[derive(Debug, Clone)]
pub struct LabelCandidate {
    pub key: String,
    /// Index into the label cache.
    pub record: usize,
    pub text: String,
    pub priority: f32,
    /// Anchor in screen space.
    pub anchor: (f32, f32),
    pub width: f32,
    pub height: f32,
    pub cluster: Option<CellKey>,
    pub visible: bool,
    /// Pinned offset from the anchor (user edits, frozen labels).
    pub fixed_offset: Option<(f32, f32)>,
    /// Offset from the previous pass, used to keep labels where they were.
    pub previous_offset: Option<(f32, f32)>,
}

impl LabelCandidate {
    #[cfg(test)]
    pub(crate) fn for_test(key: &str, anchor: (f32, f32), priority: f32) -> Self {
        Self {
            key: key.to_string(),
            record: 0,
            text: key.to_string(),
            priority,
            anchor,
            width: 40.0,
            height: 16.0,
            cluster: None,
            visible: true,
            fixed_offset: None,
            previous_offset: None,
        }
    }
}

#[derive(Debug, Default)]
pub struct CandidateBatch {
    pub candidates: Vec<LabelCandidate>,
    pub hidden: usize,
    pub skipped: usize,
    pub self_managed_visible: usize,
    pub zoom_gated: bool,
}

/// Build this pass's candidates. Records that are off-screen, gated, or
/// unresolvable are marked invisible in the cache.
pub fn build_candidates<H: MapHost, R: Rng>(
    host: &H,
    cache: &mut LabelCache,
    viewport: Viewport,
    config: &LabelConfig,
    freeze_visible: bool,
    rng: &mut R,
) -> CandidateBatch {
    let mut batch = CandidateBatch::default();

    if viewport.zoom < config.min_zoom {
        for record in cache.records_mut() {
            record.visible = false;
            batch.hidden += 1;
        }
        batch.zoom_gated = true;
        return batch;
    }

    let center = viewport.center();
    let layers: HashMap<&str, (&Layer, EntityIndex<'_>)> = host
        .layers()
        .iter()
        .map(|layer| (layer.id.as_str(), (layer, EntityIndex::of_layer(layer))))
        .collect();
    let all_entities = EntityIndex::of_layers(host.layers());
    for idx in 0..cache.len() {
        let record = &cache.records()[idx];
        let Some((layer, entities)) = layers.get(record.layer_id.as_str()) else {
            cache.records_mut()[idx].visible = false;
            batch.skipped += 1;
            continue;
        };
        if !layer.visible || record.user_hidden {
            cache.records_mut()[idx].visible = false;
            batch.hidden += 1;
            continue;
        }
        if record.is_duplicate && !record.is_user_edited() {
            cache.records_mut()[idx].visible = false;
            batch.hidden += 1;
            continue;
        }
        let label = entities.get(record.label_uid);
        let anchor = record
            .anchor_uid
            .and_then(|uid| entities.get(uid).or_else(|| all_entities.get(uid)));
        let (Some(label), Some(anchor)) = (label, anchor) else {
            debug!(label = %record.key, "skipping label without anchor");
            cache.records_mut()[idx].visible = false;
            batch.skipped += 1;
            continue;
        };
        let Some(screen) = host.project(anchor.position) else {
            debug!(label = %record.key, "anchor geometry could not be projected");
            cache.records_mut()[idx].visible = false;
            batch.skipped += 1;
            continue;
        };
        if !viewport.contains(screen) {
            cache.records_mut()[idx].visible = false;
            batch.hidden += 1;
            continue;
        }
        if record.self_managed {
            cache.records_mut()[idx].visible = true;
            batch.self_managed_visible += 1;
            continue;
        }
        let Some(block) = measure_label(&record.text, record.font_size, config) else {
            debug!(label = %record.key, "skipping label without text");
            cache.records_mut()[idx].visible = false;
            batch.skipped += 1;
            continue;
        };

        let priority = compute_priority(label, anchor, screen, center, config, rng);
        let fixed_offset = if record.manual_offset.is_some() {
            record.manual_offset
        } else if freeze_visible && record.visible {
            Some(record.layout_offset)
        } else {
            None
        };
        let previous_offset = record.visible.then_some(record.layout_offset);
        let key = record.key.clone();

        let record = &mut cache.records_mut()[idx];
        record.display_text = block.text.clone();
        record.priority = priority;
        batch.candidates.push(LabelCandidate {
            key,
            record: idx,
            text: block.text,
            priority,
            anchor: screen,
            width: block.width,
            height: block.height,
            cluster: None,
            visible: true,
            fixed_offset,
            previous_offset,
        });
    }
    batch
}

/// Base priority, attribute bonuses, a proximity bonus toward the viewport
/// center and a small jitter to break exact ties.
pub fn compute_priority<R: Rng>(
    label: &Entity,
    anchor: &Entity,
    screen: (f32, f32),
    center: (f32, f32),
    config: &LabelConfig,
    rng: &mut R,
) -> f32 {
    let mut priority = config.base_priority;
    for name in &config.priority_attributes {
        let value = attribute(&label.attributes, name).or_else(|| attribute(&anchor.attributes, name));
        if let Some(value) = value {
            priority += attribute_bonus(value, config.attribute_flat_bonus);
        }
    }
    let dx = screen.0 - center.0;
    let dy = screen.1 - center.1;
    let dist = (dx * dx + dy * dy).sqrt();
    if config.proximity_threshold > 0.0 && dist < config.proximity_threshold {
        priority += config.proximity_bonus_max * (1.0 - dist / config.proximity_threshold);
    }
    if config.priority_jitter > 0.0 {
        priority += rng.gen_range(0.0..config.priority_jitter);
    }
    priority
}

fn attribute<'a>(attributes: &'a Attributes, name: &str) -> Option<&'a Value> {
    attributes.get(name).filter(|value| !value.is_null())
}

fn attribute_bonus(value: &Value, flat: f32) -> f32 {
    match value {
        Value::Number(n) => n.as_f64().map(|v| v as f32).unwrap_or(flat),
        Value::String(s) => match s.trim().parse::<f32>() {
            Ok(v) if v.is_finite() => v,
            _ if s.trim().is_empty() => 0.0,
            _ => flat,
        },
        Value::Bool(false) => 0.0,
        _ => flat,
    }
}

/// Keep pinned candidates plus the highest-priority rest up to `max_visible`;
/// the others are marked invisible and will not be laid out.
pub fn select_visible(candidates: &mut [LabelCandidate], max_visible: usize) -> usize {
    let mut order: Vec<usize> = (0..candidates.len()).collect();
    order.sort_by(|&a, &b| compare_for_visibility(&candidates[a], &candidates[b]));
    let pinned = candidates
        .iter()
        .filter(|candidate| candidate.fixed_offset.is_some())
        .count();
    let mut budget = max_visible.saturating_sub(pinned);
    let mut visible = 0;
    for idx in order {
        let candidate = &mut candidates[idx];
        if candidate.fixed_offset.is_some() {
            candidate.visible = true;
        } else if budget > 0 {
            candidate.visible = true;
            budget -= 1;
        } else {
            candidate.visible = false;
        }
        if candidate.visible {
            visible += 1;
        }
    }
    visible
}

fn compare_for_visibility(a: &LabelCandidate, b: &LabelCandidate) -> Ordering {
    b.fixed_offset
        .is_some()
        .cmp(&a.fixed_offset.is_some())
        .then_with(|| b.priority.total_cmp(&a.priority))
        .then_with(|| a.key.cmp(&b.key))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::Scene;
    use crate::ir::{Layer, WorldPoint};
    use rand::SeedableRng;
    use rand::rngs::StdRng;
    use serde_json::json;

    fn no_jitter() -> LabelConfig {
        LabelConfig {
            priority_jitter: 0.0,
            ..LabelConfig::default()
        }
    }

    fn scene(points: &[(u64, f64, f64)]) -> Scene {
        let mut scene = Scene::pixel_space(400.0, 300.0, 12.0);
        let mut layer = Layer::new("sites");
        for &(uid, x, y) in points {
            let anchor_id = format!("a{uid}");
            layer
                .entities
                .push(Entity::anchor(uid * 10, &anchor_id, WorldPoint::new(x, y)));
            layer.entities.push(Entity::label(
                uid * 10 + 1,
                None,
                &anchor_id,
                WorldPoint::new(x, y),
                &format!("Site {uid}"),
            ));
        }
        scene.add_layer(layer);
        scene
    }

    fn build(scene: &Scene, config: &LabelConfig) -> (LabelCache, CandidateBatch) {
        let mut cache = LabelCache::new();
        cache.sync_layers(scene, None, true, "label", 12.0);
        let mut rng = StdRng::seed_from_u64(1);
        let batch = build_candidates(scene, &mut cache, scene.viewport, config, false, &mut rng);
        (cache, batch)
    }

    #[test]
    fn off_screen_records_are_hidden() {
        let scene = scene(&[(1, 50.0, 50.0), (2, 900.0, 50.0)]);
        let (cache, batch) = build(&scene, &no_jitter());
        assert_eq!(batch.candidates.len(), 1);
        assert_eq!(batch.hidden, 1);
        let hidden = cache.records().iter().find(|r| r.text == "Site 2").unwrap();
        assert!(!hidden.visible);
    }

    #[test]
    fn anchor_in_another_layer_is_resolved() {
        let mut scene = Scene::pixel_space(400.0, 300.0, 12.0);
        let mut anchors = Layer::new("depots");
        anchors
            .entities
            .push(Entity::anchor(1, "depot", WorldPoint::new(120.0, 80.0)));
        let mut labels = Layer::new("depot-labels");
        labels.entities.push(Entity::label(
            2,
            Some("depot-label-0"),
            "depot",
            WorldPoint::new(120.0, 80.0),
            "Depot",
        ));
        scene.add_layer(anchors);
        scene.add_layer(labels);
        let (_, batch) = build(&scene, &no_jitter());
        assert_eq!(batch.skipped, 0);
        assert_eq!(batch.candidates.len(), 1);
        assert_eq!(batch.candidates[0].anchor, (120.0, 80.0));
    }

    #[test]
    fn zoom_gate_hides_everything() {
        let mut scene = scene(&[(1, 50.0, 50.0), (2, 60.0, 50.0)]);
        scene.viewport.zoom = 5.0;
        let (cache, batch) = build(&scene, &no_jitter());
        assert!(batch.zoom_gated);
        assert!(batch.candidates.is_empty());
        assert!(cache.records().iter().all(|r| !r.visible));
    }

    #[test]
    fn self_managed_layers_emit_no_candidates() {
        let mut scene = scene(&[(1, 50.0, 50.0)]);
        scene.layer_mut("sites").unwrap().self_managed = true;
        let (cache, batch) = build(&scene, &no_jitter());
        assert!(batch.candidates.is_empty());
        assert_eq!(batch.self_managed_visible, 1);
        assert!(cache.records()[0].visible);
    }

    #[test]
    fn priority_adds_numeric_and_flat_bonuses() {
        let config = LabelConfig {
            priority_attributes: vec!["priority".to_string(), "flagship".to_string()],
            proximity_threshold: 0.0,
            ..no_jitter()
        };
        let label = Entity::label(1, None, "a", WorldPoint::new(0.0, 0.0), "A")
            .with_attribute("priority", json!(10));
        let anchor = Entity::anchor(2, "a", WorldPoint::new(0.0, 0.0))
            .with_attribute("flagship", json!("yes"));
        let mut rng = StdRng::seed_from_u64(3);
        let p = compute_priority(&label, &anchor, (0.0, 0.0), (200.0, 150.0), &config, &mut rng);
        assert!((p - 13.0).abs() < 1e-5, "expected 1 + 10 + 2, got {p}");
    }

    #[test]
    fn proximity_bonus_scales_linearly() {
        let config = LabelConfig {
            proximity_threshold: 100.0,
            ..no_jitter()
        };
        let label = Entity::label(1, None, "a", WorldPoint::new(0.0, 0.0), "A");
        let anchor = Entity::anchor(2, "a", WorldPoint::new(0.0, 0.0));
        let mut rng = StdRng::seed_from_u64(3);
        let at_center = compute_priority(&label, &anchor, (50.0, 50.0), (50.0, 50.0), &config, &mut rng);
        let halfway = compute_priority(&label, &anchor, (100.0, 50.0), (50.0, 50.0), &config, &mut rng);
        let far = compute_priority(&label, &anchor, (300.0, 50.0), (50.0, 50.0), &config, &mut rng);
        assert!((at_center - 3.0).abs() < 1e-5);
        assert!((halfway - 2.0).abs() < 1e-5);
        assert!((far - 1.0).abs() < 1e-5);
    }

    #[test]
    fn jitter_stays_below_limit() {
        let config = LabelConfig {
            proximity_threshold: 0.0,
            ..LabelConfig::default()
        };
        let label = Entity::label(1, None, "a", WorldPoint::new(0.0, 0.0), "A");
        let anchor = Entity::anchor(2, "a", WorldPoint::new(0.0, 0.0));
        let mut rng = StdRng::seed_from_u64(9);
        for _ in 0..100 {
            let p = compute_priority(&label, &anchor, (0.0, 0.0), (0.0, 0.0), &config, &mut rng);
            assert!((1.0..1.1).contains(&p), "jitter out of range: {p}");
        }
    }

    #[test]
    fn select_visible_respects_cap_and_pins() {
        let mut candidates = vec![
            LabelCandidate::for_test("a", (0.0, 0.0), 1.0),
            LabelCandidate::for_test("b", (0.0, 0.0), 9.0),
            LabelCandidate::for_test("c", (0.0, 0.0), 5.0),
        ];
        candidates[0].fixed_offset = Some((4.0, 4.0));
        let visible = select_visible(&mut candidates, 2);
        assert_eq!(visible, 2);
        assert!(candidates[0].visible, "pinned label always shown");
        assert!(candidates[1].visible);
        assert!(!candidates[2].visible);
    }
}
