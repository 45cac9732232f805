// Duplicate resolution: at most one visible label per anchor identity.
// User-edited labels are exempt from suppression.

use crate::config::DedupWeights;
use crate::host::MapHost;
use crate::ir::EntityIndex;
use crate::records::{LabelCache, LabelRecord};
use std::collections::BTreeMap;
use tracing::{debug, warn};

#[derive(Debug, Default, Clone, PartialEq)]
pub struct DedupReport {
    pub groups: usize,
    pub suppressed: usize,
    /// Records whose visibility or duplicate flags changed.
    pub changed: Vec<usize>,
    /// Records that were flagged duplicate before and now win or are exempt.
    pub promoted: Vec<usize>,
}

/// Group records by anchor key and keep one winner per group. Running it
/// twice on unchanged input changes nothing the second time.
pub fn fix_duplicate_labels<H: MapHost>(
    cache: &mut LabelCache,
    host: &H,
    weights: &DedupWeights,
) -> DedupReport {
    let mut report = DedupReport::default();
    let mut groups: BTreeMap<String, Vec<usize>> = BTreeMap::new();
    for (idx, record) in cache.records().iter().enumerate() {
        if let Some(key) = record.anchor_key.as_deref() {
            groups.entry(key.to_string()).or_default().push(idx);
        }
    }

    let anchors = EntityIndex::of_layers(host.layers());
    for (anchor_key, members) in groups {
        if members.len() < 2 {
            let idx = members[0];
            let record = &mut cache.records_mut()[idx];
            if record.is_duplicate {
                report.promoted.push(idx);
            }
            if set_flags(record, false, None, None) {
                report.changed.push(idx);
            }
            continue;
        }
        report.groups += 1;

        let records = cache.records();
        let edited: Vec<usize> = members
            .iter()
            .copied()
            .filter(|&idx| records[idx].is_user_edited())
            .collect();

        let winner = if edited.is_empty() {
            let scored: Vec<(usize, f32)> = members
                .iter()
                .map(|&idx| (idx, duplicate_score(&records[idx], host, &anchors, weights)))
                .collect();
            pick_best(&scored, records)
        } else {
            if edited.len() > 1 {
                debug!(anchor = %anchor_key, count = edited.len(), "several user-edited labels share an anchor");
            }
            let by_recency: Vec<(usize, f32)> = edited
                .iter()
                .map(|&idx| (idx, records[idx].edit_seq as f32))
                .collect();
            pick_best(&by_recency, records)
        };
        let winner_key = records[winner].key.clone();

        for &idx in &members {
            let record = &mut cache.records_mut()[idx];
            // Winners only lose stale flags; the layout pass owns visibility.
            let changed = if idx == winner || record.is_user_edited() {
                if record.is_duplicate {
                    report.promoted.push(idx);
                }
                set_flags(record, false, None, None)
            } else {
                report.suppressed += 1;
                set_flags(record, true, Some(winner_key.clone()), Some(false))
            };
            if changed {
                report.changed.push(idx);
            }
        }
    }

    if report.suppressed > 0 {
        debug!(groups = report.groups, suppressed = report.suppressed, "resolved duplicate labels");
    }
    report
}

/// Regression-pinned heuristic for groups without user edits.
pub fn duplicate_score<H: MapHost>(
    record: &LabelRecord,
    host: &H,
    anchors: &EntityIndex,
    weights: &DedupWeights,
) -> f32 {
    let mut score = 0.0;
    if record.permanent_edit {
        score += weights.permanent;
    }
    if record.is_edited {
        score += weights.edited;
    }
    if record.visible {
        score += weights.visible;
    }
    if record.has_manual_offset() {
        score += weights.manual_offset;
    }
    let text = record.text.trim();
    if !text.is_empty() {
        score += weights.has_text;
        if text.chars().count() < weights.short_text_len {
            score += weights.short_text;
        }
    }
    if let Some(distance) = label_anchor_distance(record, host, anchors) {
        score += weights.distance / (1.0 + distance);
    }
    score
}

fn label_anchor_distance<H: MapHost>(
    record: &LabelRecord,
    host: &H,
    anchors: &EntityIndex,
) -> Option<f32> {
    let anchor = anchors.get(record.anchor_uid?)?;
    let anchor_screen = host.project(anchor.position)?;
    let label_screen = host.project(record.label_position)?;
    let (dx, dy) = record.current_offset();
    let x = label_screen.0 + dx - anchor_screen.0;
    let y = label_screen.1 + dy - anchor_screen.1;
    Some((x * x + y * y).sqrt())
}

/// Highest value wins; ties go to the lexicographically smallest key so the
/// result does not depend on scan order.
fn pick_best(scored: &[(usize, f32)], records: &[LabelRecord]) -> usize {
    let mut best = scored[0];
    for &(idx, value) in &scored[1..] {
        let better = value > best.1 + 1e-6
            || ((value - best.1).abs() <= 1e-6 && records[idx].key < records[best.0].key);
        if better {
            best = (idx, value);
        }
    }
    if scored.len() > 1 {
        let ties = scored
            .iter()
            .filter(|(_, value)| (value - best.1).abs() <= 1e-6)
            .count();
        if ties > 1 {
            warn!(winner = %records[best.0].key, ties, "duplicate labels tied; picked by key");
        }
    }
    best.0
}

fn set_flags(
    record: &mut LabelRecord,
    duplicate: bool,
    duplicate_of: Option<String>,
    visible: Option<bool>,
) -> bool {
    let mut changed = false;
    if record.is_duplicate != duplicate {
        record.is_duplicate = duplicate;
        changed = true;
    }
    if record.duplicate_of != duplicate_of {
        record.duplicate_of = duplicate_of;
        changed = true;
    }
    if let Some(visible) = visible {
        if record.visible != visible {
            record.visible = visible;
            changed = true;
        }
    }
    changed
}
