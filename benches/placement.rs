use criterion::{BenchmarkId, Criterion, criterion_group, criterion_main};
use maplabel_engine::config::EngineConfig;
use maplabel_engine::dedup::fix_duplicate_labels;
use maplabel_engine::host::Scene;
use maplabel_engine::ir::{Entity, Layer, WorldPoint};
use maplabel_engine::records::LabelCache;
use maplabel_engine::LabelEngine;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::hint::black_box;
use std::time::Instant;

const WIDTH: f32 = 1600.0;
const HEIGHT: f32 = 1000.0;

/// `anchors` points scattered over the viewport, `labels_per_anchor` labels each.
fn synthetic_scene(anchors: usize, labels_per_anchor: usize, seed: u64) -> Scene {
    let mut rng = StdRng::seed_from_u64(seed);
    let mut scene = Scene::pixel_space(WIDTH, HEIGHT, 14.0);
    let mut layer = Layer::new("points");
    let mut uid = 0u64;
    for i in 0..anchors {
        let pos = WorldPoint::new(
            rng.gen_range(20.0..f64::from(WIDTH) - 20.0),
            rng.gen_range(20.0..f64::from(HEIGHT) - 20.0),
        );
        let anchor_id = format!("pt-{i}");
        layer.entities.push(
            Entity::anchor(uid, &anchor_id, pos)
                .with_attribute("priority", serde_json::json!(rng.gen_range(0..10))),
        );
        uid += 1;
        for j in 0..labels_per_anchor {
            layer.entities.push(Entity::label(
                uid,
                Some(&format!("{anchor_id}-label-{j}")),
                &anchor_id,
                pos,
                &format!("Point of interest {i}"),
            ));
            uid += 1;
        }
    }
    scene.add_layer(layer);
    scene
}

fn bench_relayout(c: &mut Criterion) {
    let mut group = c.benchmark_group("relayout");
    for algorithm in ["directional", "force", "annealing"] {
        for anchors in [50usize, 200, 500] {
            let mut config = EngineConfig::default();
            config.layout.algorithm = algorithm.to_string();
            config.labels.max_labels_visible = anchors;
            group.bench_function(BenchmarkId::new(algorithm, anchors), |b| {
                let mut engine = LabelEngine::new(
                    synthetic_scene(anchors, 1, 7),
                    config.clone(),
                    Instant::now(),
                );
                b.iter(|| {
                    let report = engine.relayout(None, true).expect("relayout failed");
                    black_box(report.visible);
                });
            });
        }
    }
    group.finish();
}

fn bench_dedup(c: &mut Criterion) {
    let mut group = c.benchmark_group("fix_duplicate_labels");
    let config = EngineConfig::default();
    for (anchors, per_anchor) in [(200usize, 2usize), (200, 5), (1000, 3)] {
        let scene = synthetic_scene(anchors, per_anchor, 11);
        let mut cache = LabelCache::new();
        cache.sync_layers(&scene, None, true, "label", 12.0);
        let name = format!("{anchors}x{per_anchor}");
        group.bench_with_input(BenchmarkId::from_parameter(name), &scene, |b, scene| {
            b.iter(|| {
                let report = fix_duplicate_labels(black_box(&mut cache), scene, &config.dedup);
                black_box(report.suppressed);
            });
        });
    }
    group.finish();
}

criterion_group!(benches, bench_relayout, bench_dedup);
criterion_main!(benches);
