// The label engine: owns the record cache, density grid, scheduler and
// stores for one map view, and runs layout passes against a `MapHost`.

use crate::candidates::{build_candidates, select_visible};
use crate::config::{EngineConfig, LayerKind};
use crate::dedup::fix_duplicate_labels;
use crate::density::DensityGrid;
use crate::error::{EngineError, Result};
use crate::host::MapHost;
use crate::ir::HostEvent;
use crate::layout::{LabelBox, LayoutAlgorithm, LayoutContext, LayoutReport, boxes_for, run_layout};
use crate::matching::MatcherChain;
use crate::persist::{
    DurableStore, PersistedPosition, PositionMap, load_map, merge_positions, remove_entry,
    save_merged,
};
use crate::records::{LabelCache, LabelRecord, SyncReport};
use crate::render::overlay_svg;
use crate::scheduler::{Due, Scheduler};
use crate::text::measure_label;
use rand::SeedableRng;
use rand::rngs::StdRng;
use serde::Serialize;
use std::collections::BTreeSet;
use std::time::Instant;
use tracing::{debug, info, warn};

/// Outcome of a public operation. Operations never panic or return `Err`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OpResult {
    pub success: bool,
    pub message: String,
}

impl OpResult {
    pub fn ok(message: impl Into<String>) -> Self {
        Self {
            success: true,
            message: message.into(),
        }
    }

    pub fn fail(message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: message.into(),
        }
    }

    fn from_result(result: Result<String>) -> Self {
        match result {
            Ok(message) => Self::ok(message),
            Err(err) => {
                warn!(error = %err, "label engine operation failed");
                Self::fail(err.to_string())
            }
        }
    }
}

/// A label addressed either by its persistence key or by host handle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LabelRef {
    Key(String),
    Handle { layer_id: String, uid: u64 },
}

impl From<&str> for LabelRef {
    fn from(key: &str) -> Self {
        LabelRef::Key(key.to_string())
    }
}

/// A user edit. Unset fields are left alone.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LabelEdit {
    pub offset: Option<(f32, f32)>,
    pub text: Option<String>,
    pub font_size: Option<f32>,
    pub visible: Option<bool>,
}

#[derive(Debug, Default, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PassReport {
    pub layers: usize,
    pub records: usize,
    pub orphans: usize,
    pub candidates: usize,
    pub visible: usize,
    pub duplicates_suppressed: usize,
    pub zoom_gated: bool,
    pub layout: LayoutReport,
    pub written: usize,
}

#[derive(Debug, Default, Clone, PartialEq)]
pub struct TickReport {
    pub relayout: Option<PassReport>,
    pub auto_saved: Option<usize>,
    pub duplicates_suppressed: Option<usize>,
    /// Host events folded into the current or next pass.
    pub coalesced_events: usize,
}

pub struct LabelEngine<H: MapHost> {
    host: H,
    config: EngineConfig,
    cache: LabelCache,
    grid: DensityGrid,
    rng: StdRng,
    scheduler: Scheduler,
    store: Option<Box<dyn DurableStore>>,
    /// Positions saved without the durable store.
    session: PositionMap,
    matchers: MatcherChain,
    editing: bool,
    destroyed: bool,
    clock: Instant,
    /// Layers to rescan on the next scheduled pass; `None` means none.
    dirty_layers: Option<BTreeSet<String>>,
    last_boxes: Vec<LabelBox>,
    overlay: Option<String>,
}

impl<H: MapHost> LabelEngine<H> {
    pub fn new(host: H, config: EngineConfig, now: Instant) -> Self {
        let grid = DensityGrid::new(config.grid.cluster_distance, config.grid.zoom_reset_delta);
        let scheduler = Scheduler::new(&config.schedule, now);
        let rng = StdRng::seed_from_u64(config.seed);
        Self {
            host,
            config,
            cache: LabelCache::new(),
            grid,
            rng,
            scheduler,
            store: None,
            session: PositionMap::new(),
            matchers: MatcherChain::standard(),
            editing: false,
            destroyed: false,
            clock: now,
            dirty_layers: None,
            last_boxes: Vec::new(),
            overlay: None,
        }
    }

    pub fn with_store(mut self, store: Box<dyn DurableStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn with_matchers(mut self, matchers: MatcherChain) -> Self {
        self.matchers = matchers;
        self
    }

    pub fn host(&self) -> &H {
        &self.host
    }

    /// Direct host access for callers driving the view. Changes made here
    /// reach the engine through `handle_event`/`tick`.
    pub fn host_mut(&mut self) -> &mut H {
        &mut self.host
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn records(&self) -> &[LabelRecord] {
        self.cache.records()
    }

    pub fn record(&self, key: &str) -> Option<&LabelRecord> {
        self.cache.records().iter().find(|record| record.key == key)
    }

    pub fn last_boxes(&self) -> &[LabelBox] {
        &self.last_boxes
    }

    pub fn overlay(&self) -> Option<&str> {
        self.overlay.as_deref()
    }

    pub fn is_editing(&self) -> bool {
        self.editing
    }

    pub fn is_destroyed(&self) -> bool {
        self.destroyed
    }

    pub fn session_positions(&self) -> &PositionMap {
        &self.session
    }

    pub fn store(&self) -> Option<&dyn DurableStore> {
        self.store.as_deref()
    }

    pub fn pending_relayout(&self) -> Option<Instant> {
        self.scheduler.pending()
    }

    fn ensure_live(&self) -> Result<()> {
        if self.destroyed {
            return Err(EngineError::Destroyed);
        }
        if !self.host.is_alive() {
            return Err(EngineError::HostGone);
        }
        Ok(())
    }

    // ---- public operations -------------------------------------------------

    /// Rescan `ids` (all layers when `None`) and run a full layout pass now.
    pub fn refresh(&mut self, ids: Option<&[String]>, preserve_edits: bool) -> OpResult {
        OpResult::from_result(self.relayout(ids, preserve_edits).map(|report| {
            format!(
                "placed {} of {} labels ({} candidates)",
                report.layout.placed, report.records, report.candidates
            )
        }))
    }

    /// Run one layout pass and return its report.
    pub fn relayout(&mut self, ids: Option<&[String]>, preserve_edits: bool) -> Result<PassReport> {
        self.ensure_live()?;
        if !self.scheduler.begin_pass() {
            return Err(EngineError::PassInFlight);
        }
        let report = self.pass(ids, preserve_edits);

        // Events raised by our own write-back are drained while the guard
        // is still held so they cannot start another pass.
        let events = self.host.drain_events();
        self.scheduler.end_pass(self.clock);
        for event in events {
            if !matches!(event, HostEvent::LabelStyleChanged { .. }) {
                self.queue_event(event);
            }
        }
        Ok(report)
    }

    /// Snapshot edited labels (plus `edits`) and merge them into the durable
    /// store, or into the session map when `use_durable_store` is false.
    pub fn save_positions(&mut self, edits: Option<PositionMap>, use_durable_store: bool) -> OpResult {
        OpResult::from_result(
            self.save(edits, use_durable_store)
                .map(|count| format!("saved {count} label positions")),
        )
    }

    pub fn load_positions(
        &mut self,
        use_durable_store: bool,
        force_refresh: bool,
        preserve_edits: bool,
    ) -> OpResult {
        OpResult::from_result(
            self.load(use_durable_store, force_refresh, preserve_edits)
                .map(|(matched, unmatched)| {
                    format!("applied {matched} saved positions, {unmatched} unmatched")
                }),
        )
    }

    pub fn reset_label_position(&mut self, label: impl Into<LabelRef>) -> OpResult {
        let label = label.into();
        OpResult::from_result(self.reset(&label).map(|count| format!("reset {count} labels")))
    }

    /// Flip editing mode. Leaving it saves positions.
    pub fn toggle_editing_mode(&mut self) -> OpResult {
        if let Err(err) = self.ensure_live() {
            return OpResult::from_result(Err(err));
        }
        self.editing = !self.editing;
        if self.editing {
            info!("label editing enabled");
            return OpResult::ok("editing mode on");
        }
        info!("label editing disabled");
        let durable = self.store.is_some();
        match self.save(None, durable) {
            Ok(count) => OpResult::ok(format!("editing mode off; saved {count} label positions")),
            Err(err) => OpResult::from_result(Err(err)),
        }
    }

    pub fn edit_label(&mut self, label: impl Into<LabelRef>, edit: LabelEdit) -> OpResult {
        let label = label.into();
        OpResult::from_result(self.apply_edit(&label, &edit).map(|count| format!("edited {count} labels")))
    }

    /// Apply a named preset (`pointPipeline`, `comparison`, `default`).
    pub fn configure_for_layer_kind(&mut self, kind: &str) -> OpResult {
        if let Err(err) = self.ensure_live() {
            return OpResult::from_result(Err(err));
        }
        let kind = LayerKind::from_name(kind);
        self.config.apply_layer_kind(kind);
        self.grid.set_cell_size(self.config.grid.cluster_distance);
        self.scheduler.schedule(self.clock);
        OpResult::ok(format!("configured for {kind:?} layers"))
    }

    /// Feed one host notification. Work is scheduled, not run.
    pub fn handle_event(&mut self, event: HostEvent, now: Instant) -> OpResult {
        self.advance(now);
        if let Err(err) = self.ensure_live() {
            return OpResult::from_result(Err(err));
        }
        let message = self.queue_event(event);
        OpResult::ok(message)
    }

    /// Drive timers: drain host events, then run whatever is due.
    pub fn tick(&mut self, now: Instant) -> TickReport {
        self.advance(now);
        let mut report = TickReport::default();
        if self.ensure_live().is_err() {
            return report;
        }
        for event in self.host.drain_events() {
            self.queue_event(event);
            report.coalesced_events += 1;
        }

        for due in self.scheduler.poll(now) {
            match due {
                Due::Relayout => {
                    let dirty: Vec<String> = self
                        .dirty_layers
                        .take()
                        .map(|set| set.into_iter().collect())
                        .unwrap_or_default();
                    match self.relayout(Some(dirty.as_slice()), true) {
                        Ok(pass) => report.relayout = Some(pass),
                        Err(err) => warn!(error = %err, "scheduled layout pass skipped"),
                    }
                }
                Due::AutoSave => match self.auto_save() {
                    Ok(saved) => report.auto_saved = saved,
                    Err(err) => warn!(error = %err, "auto-save failed"),
                },
                Due::DuplicateSweep => {
                    report.duplicates_suppressed = Some(self.sweep_duplicates());
                }
            }
        }
        report
    }

    /// Release timers, cached records and the debug overlay. Every later
    /// operation is a no-op.
    pub fn destroy(&mut self) -> OpResult {
        if self.destroyed {
            return OpResult::ok("already destroyed");
        }
        self.scheduler.destroy();
        self.cache.clear();
        self.grid.clear();
        self.last_boxes.clear();
        self.overlay = None;
        self.dirty_layers = None;
        self.editing = false;
        self.destroyed = true;
        info!("label engine destroyed");
        OpResult::ok("destroyed")
    }

    // ---- internals ----------------------------------------------------------

    fn advance(&mut self, now: Instant) {
        if now > self.clock {
            self.clock = now;
        }
    }

    fn queue_event(&mut self, event: HostEvent) -> String {
        match event {
            HostEvent::ViewportChanged => {
                self.scheduler.schedule(self.clock);
                "viewport change scheduled".to_string()
            }
            HostEvent::LayersChanged(ids) => {
                self.dirty_layers.get_or_insert_with(BTreeSet::new).extend(ids);
                self.scheduler.schedule(self.clock);
                "layer change scheduled".to_string()
            }
            HostEvent::LayerRemoved(id) => {
                let dropped = self.cache.remove_layer(&id);
                if let Some(dirty) = self.dirty_layers.as_mut() {
                    dirty.remove(&id);
                }
                debug!(layer = %id, dropped, "layer removed");
                self.scheduler.schedule(self.clock);
                format!("dropped {dropped} labels of layer {id}")
            }
            HostEvent::LabelStyleChanged { layer_id, uid } => {
                debug!(layer = %layer_id, uid, "ignoring label style notification");
                "style change ignored".to_string()
            }
        }
    }

    fn pass(&mut self, ids: Option<&[String]>, preserve_edits: bool) -> PassReport {
        let viewport = self.host.viewport();
        let labels = &self.config.labels;
        let sync: SyncReport = self.cache.sync_layers(
            &self.host,
            ids,
            preserve_edits,
            &labels.text_attribute,
            labels.default_font_size,
        );
        let dedup = fix_duplicate_labels(&mut self.cache, &self.host, &self.config.dedup);

        self.grid.set_cell_size(self.config.grid.cluster_distance);
        if self.grid.observe_zoom(viewport.zoom) {
            debug!(zoom = viewport.zoom, "density grid reset after zoom change");
        }
        let mut batch = build_candidates(
            &self.host,
            &mut self.cache,
            viewport,
            &self.config.labels,
            self.editing,
            &mut self.rng,
        );
        if !batch.zoom_gated {
            self.grid
                .apply(&mut batch.candidates, self.config.grid.representative_boost);
            select_visible(&mut batch.candidates, self.config.labels.max_labels_visible);
        }

        let mut boxes = boxes_for(&batch.candidates);
        let algorithm = LayoutAlgorithm::from_name(&self.config.layout.algorithm);
        let mut ctx = LayoutContext {
            viewport,
            config: &self.config.layout,
            rng: &mut self.rng,
        };
        let layout = run_layout(&mut boxes, algorithm, &mut ctx);

        for label in &boxes {
            let record = &mut self.cache.records_mut()[batch.candidates[label.idx].record];
            record.visible = label.visible;
            if label.visible && record.manual_offset.is_none() {
                record.layout_offset = label.offset();
            }
        }
        let written = self.write_back(0..self.cache.len());

        self.overlay = self
            .config
            .debug_overlay
            .then(|| overlay_svg(viewport, &boxes));
        self.last_boxes = boxes;

        let report = PassReport {
            layers: sync.layers,
            records: self.cache.len(),
            orphans: sync.orphans,
            candidates: batch.candidates.len(),
            visible: self.cache.records().iter().filter(|r| r.visible).count(),
            duplicates_suppressed: dedup.suppressed,
            zoom_gated: batch.zoom_gated,
            layout,
            written,
        };
        debug!(
            candidates = report.candidates,
            visible = report.visible,
            duplicates = report.duplicates_suppressed,
            zoom_gated = report.zoom_gated,
            "label pass complete"
        );
        report
    }

    fn write_back(&mut self, indices: impl IntoIterator<Item = usize>) -> usize {
        let mut written = 0;
        for idx in indices {
            let Some(record) = self.cache.records().get(idx) else {
                continue;
            };
            let state = record.state();
            if self
                .host
                .apply_label_state(&record.layer_id, record.label_uid, &state)
            {
                written += 1;
            } else {
                debug!(label = %record.key, "label entity vanished before write-back");
            }
        }
        written
    }

    fn snapshot_edits(&self) -> PositionMap {
        self.cache
            .records()
            .iter()
            .filter(|record| record.has_edit_evidence())
            .map(|record| (record.key.clone(), PersistedPosition::from_record(record)))
            .collect()
    }

    fn save(&mut self, edits: Option<PositionMap>, use_durable_store: bool) -> Result<usize> {
        self.ensure_live()?;
        let mut entries = self.snapshot_edits();
        if let Some(edits) = edits {
            merge_positions(&mut entries, edits);
        }
        let count = entries.len();
        if use_durable_store {
            let key = self.config.persist.storage_key.clone();
            let store = self.store.as_deref_mut().ok_or(EngineError::NoStore)?;
            let merged = save_merged(store, &key, entries)?;
            info!(saved = count, stored = merged.len(), "saved label positions");
        } else {
            merge_positions(&mut self.session, entries);
            info!(saved = count, "saved label positions for this session");
        }
        Ok(count)
    }

    fn auto_save(&mut self) -> Result<Option<usize>> {
        if !self
            .cache
            .records()
            .iter()
            .any(LabelRecord::has_edit_evidence)
        {
            return Ok(None);
        }
        let durable = self.store.is_some();
        self.save(None, durable).map(Some)
    }

    fn load(
        &mut self,
        use_durable_store: bool,
        force_refresh: bool,
        preserve_edits: bool,
    ) -> Result<(usize, usize)> {
        self.ensure_live()?;
        let saved = if use_durable_store {
            let store = self.store.as_deref().ok_or(EngineError::NoStore)?;
            load_map(store, &self.config.persist.storage_key)?
        } else {
            self.session.clone()
        };

        if force_refresh || self.cache.is_empty() {
            let labels = &self.config.labels;
            self.cache.sync_layers(
                &self.host,
                None,
                preserve_edits,
                &labels.text_attribute,
                labels.default_font_size,
            );
        }

        let (matched, unmatched) = self.matchers.resolve_all(&saved, self.cache.records());
        let mut touched = Vec::with_capacity(matched.len());
        for (key, hit) in &matched {
            let Some(entry) = saved.get(*key) else {
                continue;
            };
            let seq = self.cache.next_edit_seq();
            let record = &mut self.cache.records_mut()[hit.record];
            entry.apply_to(record, seq);
            debug!(label = %key, record = %record.key, strategy = hit.strategy, "restored saved position");
            touched.push(hit.record);
        }
        for key in &unmatched {
            if saved.get(*key).is_some_and(PersistedPosition::is_edited) {
                warn!(label = %key, "saved label position has no live match");
            }
        }

        let dedup = fix_duplicate_labels(&mut self.cache, &self.host, &self.config.dedup);
        if !force_refresh && !dedup.promoted.is_empty() {
            self.scheduler.schedule(self.clock);
        }
        touched.extend(dedup.changed);
        touched.sort_unstable();
        touched.dedup();
        self.write_back(touched);
        info!(
            matched = matched.len(),
            unmatched = unmatched.len(),
            "loaded label positions"
        );

        let counts = (matched.len(), unmatched.len());
        if force_refresh {
            self.relayout(None, true)?;
        }
        Ok(counts)
    }

    fn find_indices(&self, label: &LabelRef) -> Vec<usize> {
        match label {
            LabelRef::Key(key) => self.cache.indices_by_key(key),
            LabelRef::Handle { layer_id, uid } => {
                self.cache.index_of(layer_id, *uid).into_iter().collect()
            }
        }
    }

    fn label_name(label: &LabelRef) -> String {
        match label {
            LabelRef::Key(key) => key.clone(),
            LabelRef::Handle { layer_id, uid } => format!("{layer_id}#{uid}"),
        }
    }

    fn reset(&mut self, label: &LabelRef) -> Result<usize> {
        self.ensure_live()?;
        let indices = self.find_indices(label);
        if indices.is_empty() {
            return Err(EngineError::UnknownLabel {
                label: Self::label_name(label),
            });
        }
        let mut keys = BTreeSet::new();
        for &idx in &indices {
            let record = &mut self.cache.records_mut()[idx];
            record.reset_to_original();
            record.display_text = measure_label(&record.text, record.font_size, &self.config.labels)
                .map(|block| block.text)
                .unwrap_or_default();
            keys.insert(record.key.clone());
        }
        self.write_back(indices.iter().copied());

        let storage_key = self.config.persist.storage_key.clone();
        for key in &keys {
            self.session.remove(key);
            if let Some(store) = self.store.as_deref_mut() {
                if let Err(err) = remove_entry(store, &storage_key, key) {
                    warn!(label = %key, error = %err, "could not drop saved position");
                }
            }
        }
        self.scheduler.schedule(self.clock);
        Ok(indices.len())
    }

    fn apply_edit(&mut self, label: &LabelRef, edit: &LabelEdit) -> Result<usize> {
        self.ensure_live()?;
        if !self.editing {
            return Err(EngineError::EditingDisabled);
        }
        let indices = self.find_indices(label);
        if indices.is_empty() {
            return Err(EngineError::UnknownLabel {
                label: Self::label_name(label),
            });
        }
        for &idx in &indices {
            let seq = self.cache.next_edit_seq();
            let record = &mut self.cache.records_mut()[idx];
            if let Some(offset) = edit.offset {
                record.manual_offset = Some(offset);
                record.layout_offset = offset;
            }
            if let Some(text) = edit.text.as_deref() {
                record.text = text.to_string();
            }
            if let Some(size) = edit.font_size.filter(|size| *size > 0.0) {
                record.font_size = size;
            }
            if let Some(visible) = edit.visible {
                record.user_hidden = !visible;
                record.visible = visible;
            }
            record.display_text = measure_label(&record.text, record.font_size, &self.config.labels)
                .map(|block| block.text)
                .unwrap_or_default();
            record.is_edited = true;
            record.user_edited = true;
            record.edit_seq = seq;
        }

        // The edited label now owns its anchor; siblings step aside.
        let dedup = fix_duplicate_labels(&mut self.cache, &self.host, &self.config.dedup);
        if !dedup.promoted.is_empty() {
            self.scheduler.schedule(self.clock);
        }
        let mut touched = indices.clone();
        touched.extend(dedup.changed);
        touched.sort_unstable();
        touched.dedup();
        self.write_back(touched);
        Ok(indices.len())
    }

    /// Demote new duplicates now. Labels that now win are shown by the next
    /// pass, which also applies the zoom gate and the on-screen test.
    fn sweep_duplicates(&mut self) -> usize {
        let report = fix_duplicate_labels(&mut self.cache, &self.host, &self.config.dedup);
        if !report.promoted.is_empty() {
            self.scheduler.schedule(self.clock);
        }
        if !report.changed.is_empty() {
            self.write_back(report.changed);
        }
        report.suppressed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::Scene;
    use crate::ir::{Entity, Layer, WorldPoint};
    use crate::persist::MemoryStore;
    use std::time::Duration;

    fn scene() -> Scene {
        let mut scene = Scene::pixel_space(800.0, 600.0, 12.0);
        let mut layer = Layer::new("sites");
        for i in 0..6u64 {
            let pos = WorldPoint::new(100.0 + i as f64 * 110.0, 300.0);
            layer.entities.push(Entity::anchor(i * 10, &format!("site-{i}"), pos));
            layer.entities.push(Entity::label(
                i * 10 + 1,
                Some(&format!("site-{i}-label-0")),
                &format!("site-{i}"),
                pos,
                &format!("Site {i}"),
            ));
        }
        scene.add_layer(layer);
        scene.drain_events();
        scene
    }

    fn engine() -> LabelEngine<Scene> {
        LabelEngine::new(scene(), EngineConfig::default(), Instant::now())
    }

    /// Two labels bound to one anchor at `x`.
    fn shared_anchor(x: f64, zoom: f32) -> Scene {
        let mut scene = Scene::pixel_space(800.0, 600.0, zoom);
        let mut layer = Layer::new("offices");
        let pos = WorldPoint::new(x, 300.0);
        layer.entities.push(Entity::anchor(1, "hq", pos));
        layer
            .entities
            .push(Entity::label(2, Some("hq-a"), "hq", pos, "Head Office"));
        layer
            .entities
            .push(Entity::label(3, Some("hq-b"), "hq", pos, "HQ"));
        scene.add_layer(layer);
        scene.drain_events();
        scene
    }

    fn visible_host_labels(engine: &LabelEngine<Scene>) -> Vec<String> {
        engine
            .host()
            .layers()
            .iter()
            .flat_map(|layer| layer.entities.iter())
            .filter(|entity| entity.is_label() && entity.visible)
            .filter_map(|entity| entity.id.clone())
            .collect()
    }

    #[test]
    fn refresh_places_and_writes_back() {
        let mut engine = engine();
        let result = engine.refresh(None, true);
        assert!(result.success, "{}", result.message);
        assert_eq!(engine.records().len(), 6);
        assert!(engine.records().iter().all(|r| r.visible));
        let label = engine.host().layers()[0].entity(1).unwrap();
        let style = label.style.as_ref().unwrap();
        assert!(style.y_offset < 0.0, "default preference is above the anchor");
    }

    #[test]
    fn edits_require_editing_mode() {
        let mut engine = engine();
        engine.refresh(None, true);
        let edit = LabelEdit {
            offset: Some((20.0, 5.0)),
            ..LabelEdit::default()
        };
        assert!(!engine.edit_label("site-0-label-0", edit.clone()).success);
        assert!(engine.toggle_editing_mode().success);
        assert!(engine.edit_label("site-0-label-0", edit).success);
        let record = engine.record("site-0-label-0").unwrap();
        assert_eq!(record.manual_offset, Some((20.0, 5.0)));
        assert!(record.user_edited);
    }

    #[test]
    fn leaving_editing_mode_saves_to_store() {
        let mut engine = engine().with_store(Box::new(MemoryStore::new()));
        engine.refresh(None, true);
        engine.toggle_editing_mode();
        engine.edit_label(
            "site-1-label-0",
            LabelEdit {
                text: Some("Renamed".to_string()),
                ..LabelEdit::default()
            },
        );
        let result = engine.toggle_editing_mode();
        assert!(result.success, "{}", result.message);
        assert!(result.message.contains("saved 1"));
    }

    #[test]
    fn unknown_label_reset_fails_softly() {
        let mut engine = engine();
        engine.refresh(None, true);
        let result = engine.reset_label_position("nope");
        assert!(!result.success);
        assert!(result.message.contains("nope"));
    }

    #[test]
    fn durable_ops_without_store_fail_softly() {
        let mut engine = engine();
        engine.refresh(None, true);
        assert!(!engine.save_positions(None, true).success);
        assert!(!engine.load_positions(true, false, true).success);
        assert!(engine.save_positions(None, false).success);
    }

    #[test]
    fn viewport_events_are_throttled_into_one_pass() {
        let t0 = Instant::now();
        let mut engine = LabelEngine::new(scene(), EngineConfig::default(), t0);
        engine.refresh(None, true);
        engine.handle_event(HostEvent::ViewportChanged, t0 + Duration::from_millis(10));
        engine.handle_event(HostEvent::ViewportChanged, t0 + Duration::from_millis(20));
        // A pass ran just now, so the delay is doubled to 300ms.
        assert!(engine.tick(t0 + Duration::from_millis(200)).relayout.is_none());
        let report = engine.tick(t0 + Duration::from_millis(320));
        assert!(report.relayout.is_some());
        assert!(engine.tick(t0 + Duration::from_millis(700)).relayout.is_none());
    }

    #[test]
    fn echoed_style_events_do_not_loop() {
        let t0 = Instant::now();
        let mut host = scene();
        host.echo_style_events = true;
        let mut engine = LabelEngine::new(host, EngineConfig::default(), t0);
        engine.refresh(None, true);
        assert!(engine.pending_relayout().is_none());
    }

    #[test]
    fn layer_removal_drops_records() {
        let t0 = Instant::now();
        let mut engine = LabelEngine::new(scene(), EngineConfig::default(), t0);
        engine.refresh(None, true);
        engine.host_mut().remove_layer("sites");
        let report = engine.tick(t0 + Duration::from_millis(1));
        assert_eq!(report.coalesced_events, 1);
        assert!(engine.records().is_empty());
    }

    #[test]
    fn destroy_turns_everything_into_no_ops() {
        let mut engine = LabelEngine::new(
            scene(),
            EngineConfig {
                debug_overlay: true,
                ..EngineConfig::default()
            },
            Instant::now(),
        );
        engine.refresh(None, true);
        assert!(engine.overlay().is_some());
        assert!(engine.destroy().success);
        assert!(engine.overlay().is_none());
        assert!(!engine.refresh(None, true).success);
        assert!(engine.tick(Instant::now() + Duration::from_secs(60)) == TickReport::default());
        assert!(engine.destroy().success);
    }

    #[test]
    fn duplicate_sweep_respects_the_zoom_gate() {
        let t0 = Instant::now();
        let mut engine = LabelEngine::new(shared_anchor(400.0, 9.0), EngineConfig::default(), t0);
        let pass = engine.relayout(None, true).unwrap();
        assert!(pass.zoom_gated);
        assert!(visible_host_labels(&engine).is_empty());

        let report = engine.tick(t0 + Duration::from_secs(5));
        assert_eq!(report.duplicates_suppressed, Some(1));
        assert!(visible_host_labels(&engine).is_empty());
        assert!(engine.records().iter().all(|r| !r.visible));
    }

    #[test]
    fn duplicate_sweep_keeps_off_screen_winner_hidden() {
        let t0 = Instant::now();
        let mut engine =
            LabelEngine::new(shared_anchor(2000.0, 12.0), EngineConfig::default(), t0);
        let pass = engine.relayout(None, true).unwrap();
        assert!(!pass.zoom_gated);
        assert_eq!(pass.visible, 0);

        let report = engine.tick(t0 + Duration::from_secs(5));
        assert_eq!(report.duplicates_suppressed, Some(1));
        assert!(visible_host_labels(&engine).is_empty());
    }

    #[test]
    fn periodic_sweep_runs_from_tick() {
        let t0 = Instant::now();
        let mut engine = LabelEngine::new(scene(), EngineConfig::default(), t0);
        engine.refresh(None, true);
        let mut annex = Layer::new("annex");
        annex.entities.push(Entity::label(
            100,
            Some("site-0-label-1"),
            "site-0",
            WorldPoint::new(100.0, 300.0),
            "Site 0 annex",
        ));
        engine.host_mut().add_layer(annex);

        let first = engine.tick(t0 + Duration::from_secs(1));
        assert_eq!(first.coalesced_events, 1);
        assert!(first.duplicates_suppressed.is_none());
        assert!(engine.tick(t0 + Duration::from_secs(2)).relayout.is_some());
        assert_eq!(engine.records().len(), 7);

        let report = engine.tick(t0 + Duration::from_secs(5));
        assert_eq!(report.duplicates_suppressed, Some(1));
        assert!(report.relayout.is_none());
        let site_zero: Vec<_> = engine
            .records()
            .iter()
            .filter(|r| r.anchor_key.as_deref() == Some("site-0"))
            .collect();
        assert_eq!(site_zero.len(), 2);
        assert_eq!(site_zero.iter().filter(|r| r.is_duplicate).count(), 1);
        assert_eq!(site_zero.iter().filter(|r| r.visible).count(), 1);
    }

    #[test]
    fn auto_save_skips_when_nothing_was_edited() {
        let t0 = Instant::now();
        let mut engine = LabelEngine::new(scene(), EngineConfig::default(), t0)
            .with_store(Box::new(MemoryStore::new()));
        engine.refresh(None, true);
        let report = engine.tick(t0 + Duration::from_secs(30));
        assert_eq!(report.auto_saved, None);
        let store = engine.store().unwrap();
        assert_eq!(store.read("labelPositions").unwrap(), None);
    }

    #[test]
    fn auto_save_writes_once_a_label_is_edited() {
        let t0 = Instant::now();
        let mut engine = LabelEngine::new(scene(), EngineConfig::default(), t0)
            .with_store(Box::new(MemoryStore::new()));
        engine.refresh(None, true);
        engine.toggle_editing_mode();
        let edit = LabelEdit {
            offset: Some((0.0, 30.0)),
            ..LabelEdit::default()
        };
        assert!(engine.edit_label("site-2-label-0", edit).success);

        let report = engine.tick(t0 + Duration::from_secs(30));
        assert_eq!(report.auto_saved, Some(1));
        let saved = load_map(engine.store().unwrap(), "labelPositions").unwrap();
        assert_eq!(saved.len(), 1);
        assert_eq!(saved["site-2-label-0"].yoffset, 30.0);
    }

    #[test]
    fn reset_writes_truncated_text() {
        let mut scene = Scene::pixel_space(800.0, 600.0, 12.0);
        let mut layer = Layer::new("parks");
        let pos = WorldPoint::new(300.0, 300.0);
        layer.entities.push(Entity::anchor(1, "park", pos));
        layer.entities.push(Entity::label(
            2,
            Some("park-label-0"),
            "park",
            pos,
            "Riverside Business Park",
        ));
        scene.add_layer(layer);
        scene.drain_events();
        let mut config = EngineConfig::default();
        config.labels.max_label_length = 10;
        let mut engine = LabelEngine::new(scene, config, Instant::now());
        engine.refresh(None, true);
        engine.toggle_editing_mode();
        engine.edit_label(
            "park-label-0",
            LabelEdit {
                text: Some("Park".to_string()),
                ..LabelEdit::default()
            },
        );

        assert!(engine.reset_label_position("park-label-0").success);
        let style = engine.host().layers()[0].entity(2).unwrap().style.clone().unwrap();
        assert_eq!(style.text, "Riverside\u{2026}");
        assert_eq!(engine.record("park-label-0").unwrap().text, "Riverside Business Park");
    }

    #[test]
    fn dead_host_makes_operations_no_ops() {
        let mut engine = engine();
        engine.host_mut().destroyed = true;
        let result = engine.refresh(None, true);
        assert!(!result.success);
        assert!(engine.records().is_empty());
    }
}
