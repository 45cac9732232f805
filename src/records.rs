// Engine-side cache of tracked label entities. One record per host label;
// records are created on first scan and dropped with their layer.

use crate::host::MapHost;
use crate::ir::{Entity, EntityIndex, LabelState, Layer, TextStyle, WorldPoint};
use std::collections::HashMap;
use tracing::debug;

const SAME_POSITION_EPS: f64 = 1e-9;

#[derive(Debug, Clone)]
pub struct LabelRecord {
    /// Best-effort label identifier, also the persistence key.
    pub key: String,
    pub layer_id: String,
    pub label_uid: u64,
    pub anchor_uid: Option<u64>,
    /// Anchor parent/object identifier; the dedup grouping key.
    pub anchor_key: Option<String>,
    pub label_position: WorldPoint,
    pub priority: f32,
    pub visible: bool,
    /// Style snapshot taken at first scan, restored on reset.
    pub original: TextStyle,
    /// Raw (untransformed) text; edits replace it.
    pub text: String,
    /// Text as last written to the host after case/truncation.
    pub display_text: String,
    pub font_size: f32,
    pub manual_offset: Option<(f32, f32)>,
    pub layout_offset: (f32, f32),
    pub is_edited: bool,
    pub permanent_edit: bool,
    pub user_edited: bool,
    /// Hidden by an explicit edit; layout never shows it.
    pub user_hidden: bool,
    pub edit_seq: u64,
    pub is_duplicate: bool,
    pub duplicate_of: Option<String>,
    pub self_managed: bool,
}

impl LabelRecord {
    fn from_entity(
        layer: &Layer,
        entity: &Entity,
        anchor: Option<(u64, String)>,
        text_attribute: &str,
        default_font_size: f32,
    ) -> Self {
        let mut original = entity.style.clone().unwrap_or_default();
        if original.text.trim().is_empty() {
            if let Some(text) = entity
                .attributes
                .get(text_attribute)
                .and_then(value_as_text)
            {
                original.text = text;
            }
        }
        if original.font_size <= 0.0 {
            original.font_size = default_font_size;
        }
        let (anchor_uid, anchor_key) = match anchor {
            Some((uid, key)) => (Some(uid), Some(key)),
            None => (None, entity.parent_id.clone()),
        };
        Self {
            key: entity.stable_id(&layer.id),
            layer_id: layer.id.clone(),
            label_uid: entity.uid,
            anchor_uid,
            anchor_key,
            label_position: entity.position,
            priority: 0.0,
            visible: entity.visible,
            text: original.text.clone(),
            display_text: original.text.clone(),
            font_size: original.font_size,
            manual_offset: None,
            layout_offset: (original.x_offset, original.y_offset),
            original,
            is_edited: false,
            permanent_edit: false,
            user_edited: false,
            user_hidden: false,
            edit_seq: 0,
            is_duplicate: false,
            duplicate_of: None,
            self_managed: layer.self_managed,
        }
    }

    /// Exempt from duplicate suppression.
    pub fn is_user_edited(&self) -> bool {
        self.user_edited
    }

    pub fn has_manual_offset(&self) -> bool {
        self.manual_offset
            .is_some_and(|(dx, dy)| dx.abs() > f32::EPSILON || dy.abs() > f32::EPSILON)
    }

    /// Anything worth persisting: flags, a manual offset, or a text/size delta.
    pub fn has_edit_evidence(&self) -> bool {
        self.is_edited
            || self.permanent_edit
            || self.user_edited
            || self.user_hidden
            || self.has_manual_offset()
            || (self.font_size - self.original.font_size).abs() > f32::EPSILON
            || self.text != self.original.text
    }

    pub fn current_offset(&self) -> (f32, f32) {
        self.manual_offset.unwrap_or(self.layout_offset)
    }

    pub fn state(&self) -> LabelState {
        let (x_offset, y_offset) = self.current_offset();
        LabelState {
            visible: self.visible,
            x_offset,
            y_offset,
            font_size: self.font_size,
            text: if self.display_text.is_empty() {
                self.text.clone()
            } else {
                self.display_text.clone()
            },
        }
    }

    pub fn clear_edits(&mut self) {
        self.manual_offset = None;
        self.is_edited = false;
        self.permanent_edit = false;
        self.user_edited = false;
        self.user_hidden = false;
        self.edit_seq = 0;
    }

    /// Restore the original style snapshot and drop all edit state.
    pub fn reset_to_original(&mut self) {
        self.clear_edits();
        self.text = self.original.text.clone();
        self.font_size = self.original.font_size;
        self.layout_offset = (self.original.x_offset, self.original.y_offset);
        self.is_duplicate = false;
        self.duplicate_of = None;
    }

    fn carry_edits_from(&mut self, previous: &LabelRecord) {
        self.manual_offset = previous.manual_offset;
        self.is_edited = previous.is_edited;
        self.permanent_edit = previous.permanent_edit;
        self.user_edited = previous.user_edited;
        self.user_hidden = previous.user_hidden;
        self.edit_seq = previous.edit_seq;
        self.text = previous.text.clone();
        self.font_size = previous.font_size;
        self.original = previous.original.clone();
        self.visible = previous.visible;
    }
}

fn value_as_text(value: &serde_json::Value) -> Option<String> {
    match value {
        serde_json::Value::String(s) => Some(s.clone()),
        serde_json::Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SyncReport {
    pub layers: usize,
    pub records: usize,
    pub orphans: usize,
    pub dropped: usize,
}

#[derive(Debug, Default)]
pub struct LabelCache {
    records: Vec<LabelRecord>,
    edit_seq: u64,
}

impl LabelCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn records(&self) -> &[LabelRecord] {
        &self.records
    }

    pub fn records_mut(&mut self) -> &mut [LabelRecord] {
        &mut self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn clear(&mut self) {
        self.records.clear();
    }

    pub fn next_edit_seq(&mut self) -> u64 {
        self.edit_seq += 1;
        self.edit_seq
    }

    pub fn indices_by_key(&self, key: &str) -> Vec<usize> {
        self.records
            .iter()
            .enumerate()
            .filter(|(_, record)| record.key == key)
            .map(|(idx, _)| idx)
            .collect()
    }

    pub fn index_of(&self, layer_id: &str, uid: u64) -> Option<usize> {
        self.records
            .iter()
            .position(|record| record.layer_id == layer_id && record.label_uid == uid)
    }

    pub fn remove_layer(&mut self, layer_id: &str) -> usize {
        let before = self.records.len();
        self.records.retain(|record| record.layer_id != layer_id);
        before - self.records.len()
    }

    /// Rescan host layers (all when `ids` is `None`). Layers that vanished
    /// from the host lose their records. With `preserve_edits`, edit state
    /// survives both for unchanged handles and for labels regenerated under
    /// a new handle but the same key.
    pub fn sync_layers<H: MapHost>(
        &mut self,
        host: &H,
        ids: Option<&[String]>,
        preserve_edits: bool,
        text_attribute: &str,
        default_font_size: f32,
    ) -> SyncReport {
        let mut report = SyncReport::default();
        let wanted = |id: &str| ids.is_none_or(|ids| ids.iter().any(|wanted| wanted == id));

        let live: Vec<&str> = host.layers().iter().map(|layer| layer.id.as_str()).collect();
        let before = self.records.len();
        self.records.retain(|record| {
            !wanted(&record.layer_id) || live.contains(&record.layer_id.as_str())
        });
        report.dropped += before - self.records.len();

        let global_anchors = anchor_index(host.layers().iter());
        for layer in host.layers().iter().filter(|layer| wanted(&layer.id)) {
            report.layers += 1;
            let local_anchors = anchor_index(std::iter::once(layer));

            let mut previous: Vec<LabelRecord> = Vec::new();
            self.records.retain(|record| {
                if record.layer_id == layer.id {
                    previous.push(record.clone());
                    false
                } else {
                    true
                }
            });

            let previous_by_uid: HashMap<u64, usize> = previous
                .iter()
                .enumerate()
                .map(|(pos, prev)| (prev.label_uid, pos))
                .collect();

            for entity in layer.entities.iter().filter(|entity| entity.is_label()) {
                let anchor = resolve_anchor(layer, entity, &local_anchors, &global_anchors);
                let mut record = LabelRecord::from_entity(
                    layer,
                    entity,
                    anchor,
                    text_attribute,
                    default_font_size,
                );
                if record.anchor_uid.is_none() {
                    report.orphans += 1;
                    debug!(label = %record.key, layer = %layer.id, "label has no resolvable anchor");
                }
                let same_handle = previous_by_uid.get(&entity.uid).map(|&pos| &previous[pos]);
                if let Some(prev) = same_handle {
                    // The host style now holds our own write-back; keep the
                    // engine's view of text and size.
                    record.priority = prev.priority;
                    record.layout_offset = prev.layout_offset;
                    record.original = prev.original.clone();
                    record.display_text = prev.display_text.clone();
                    record.visible = prev.visible;
                    if preserve_edits {
                        record.carry_edits_from(prev);
                    } else {
                        record.text = record.original.text.clone();
                        record.font_size = record.original.font_size;
                    }
                } else if preserve_edits {
                    if let Some(prev) = previous
                        .iter()
                        .find(|prev| prev.key == record.key && prev.has_edit_evidence())
                    {
                        record.carry_edits_from(prev);
                    }
                }
                self.records.push(record);
                report.records += 1;
            }
            let present = EntityIndex::of_layer(layer);
            report.dropped += previous
                .iter()
                .filter(|prev| !present.contains(prev.label_uid))
                .count();
        }
        report
    }
}

type AnchorIndex = HashMap<String, (u64, WorldPoint)>;

fn anchor_index<'a>(layers: impl Iterator<Item = &'a Layer>) -> AnchorIndex {
    let mut index = AnchorIndex::new();
    for layer in layers {
        for entity in layer.entities.iter().filter(|entity| !entity.is_label()) {
            let key = entity.stable_id(&layer.id);
            index.entry(key).or_insert((entity.uid, entity.position));
            if let Some(record_id) = entity.record_id.as_deref() {
                index
                    .entry(record_id.to_string())
                    .or_insert((entity.uid, entity.position));
            }
        }
    }
    index
}

fn resolve_anchor(
    layer: &Layer,
    label: &Entity,
    local: &AnchorIndex,
    global: &AnchorIndex,
) -> Option<(u64, String)> {
    if let Some(parent) = label.parent_id.as_deref() {
        if let Some((uid, _)) = local.get(parent).or_else(|| global.get(parent)) {
            return Some((*uid, parent.to_string()));
        }
    }
    // Fall back to an anchor sitting exactly under the label.
    layer
        .entities
        .iter()
        .filter(|entity| !entity.is_label())
        .find(|entity| {
            (entity.position.x - label.position.x).abs() <= SAME_POSITION_EPS
                && (entity.position.y - label.position.y).abs() <= SAME_POSITION_EPS
        })
        .map(|entity| (entity.uid, entity.stable_id(&layer.id)))
}
