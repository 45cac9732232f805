// Re-matching persisted positions to live labels whose identifiers may have
// changed since the save. Matchers are tried in order; the first hit wins.

use crate::persist::{PersistedPosition, PositionMap};
use crate::records::LabelRecord;
use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::HashSet;

static TRAILING_NUMBER_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?:^|[^0-9.])([0-9]+)$").unwrap());
static PARENT_LABEL_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^(.+)-label-([0-9]+)$").unwrap());

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MatchResult {
    /// Index into the label cache.
    pub record: usize,
    pub strategy: &'static str,
}

pub trait PositionMatcher {
    fn name(&self) -> &'static str;

    /// Find a live record for the persisted entry stored under `key`.
    /// Indices in `taken` are already claimed by earlier entries.
    fn find(
        &self,
        key: &str,
        entry: &PersistedPosition,
        records: &[LabelRecord],
        taken: &HashSet<usize>,
    ) -> Option<usize>;
}

/// Unclaimed records satisfying `pred`, lowest key first.
fn first_free(
    records: &[LabelRecord],
    taken: &HashSet<usize>,
    pred: impl Fn(&LabelRecord) -> bool,
) -> Option<usize> {
    records
        .iter()
        .enumerate()
        .filter(|(idx, record)| !taken.contains(idx) && pred(record))
        .min_by(|(_, a), (_, b)| {
            a.is_duplicate
                .cmp(&b.is_duplicate)
                .then_with(|| a.key.cmp(&b.key))
        })
        .map(|(idx, _)| idx)
}

fn trailing_number(text: &str) -> Option<u64> {
    TRAILING_NUMBER_RE
        .captures(text)
        .and_then(|caps| caps.get(1))
        .and_then(|m| m.as_str().parse().ok())
}

pub struct ExactId;

impl PositionMatcher for ExactId {
    fn name(&self) -> &'static str {
        "exact-id"
    }

    fn find(
        &self,
        key: &str,
        _entry: &PersistedPosition,
        records: &[LabelRecord],
        taken: &HashSet<usize>,
    ) -> Option<usize> {
        first_free(records, taken, |record| record.key == key)
    }
}

pub struct ParentId;

impl PositionMatcher for ParentId {
    fn name(&self) -> &'static str {
        "parent-id"
    }

    fn find(
        &self,
        _key: &str,
        entry: &PersistedPosition,
        records: &[LabelRecord],
        taken: &HashSet<usize>,
    ) -> Option<usize> {
        let parent = entry.parent_id.as_deref()?;
        first_free(records, taken, |record| {
            record.anchor_key.as_deref() == Some(parent)
        })
    }
}

/// Compares the trailing number of the stored id with the trailing number
/// of each live label id or anchor id.
pub struct NumericSuffix;

impl PositionMatcher for NumericSuffix {
    fn name(&self) -> &'static str {
        "numeric-suffix"
    }

    fn find(
        &self,
        key: &str,
        _entry: &PersistedPosition,
        records: &[LabelRecord],
        taken: &HashSet<usize>,
    ) -> Option<usize> {
        let wanted = trailing_number(key)?;
        first_free(records, taken, |record| {
            trailing_number(&record.key) == Some(wanted)
                || record
                    .anchor_key
                    .as_deref()
                    .and_then(trailing_number)
                    == Some(wanted)
        })
    }
}

/// `<parent>-label-<n>`: the n-th label (by key) bound to `<parent>`.
pub struct ParentLabelPattern;

impl PositionMatcher for ParentLabelPattern {
    fn name(&self) -> &'static str {
        "parent-label-pattern"
    }

    fn find(
        &self,
        key: &str,
        _entry: &PersistedPosition,
        records: &[LabelRecord],
        taken: &HashSet<usize>,
    ) -> Option<usize> {
        let caps = PARENT_LABEL_RE.captures(key)?;
        let parent = caps.get(1)?.as_str();
        let ordinal: usize = caps.get(2)?.as_str().parse().ok()?;
        let mut group: Vec<usize> = records
            .iter()
            .enumerate()
            .filter(|(_, record)| record.anchor_key.as_deref() == Some(parent))
            .map(|(idx, _)| idx)
            .collect();
        group.sort_by(|&a, &b| records[a].key.cmp(&records[b].key));
        group
            .get(ordinal)
            .copied()
            .filter(|idx| !taken.contains(idx))
    }
}

pub struct MatcherChain {
    matchers: Vec<Box<dyn PositionMatcher>>,
}

impl Default for MatcherChain {
    fn default() -> Self {
        Self::standard()
    }
}

impl MatcherChain {
    pub fn empty() -> Self {
        Self {
            matchers: Vec::new(),
        }
    }

    /// Exact id, parent id, numeric suffix, then the parent-label pattern.
    pub fn standard() -> Self {
        Self::empty()
            .with(ExactId)
            .with(ParentId)
            .with(NumericSuffix)
            .with(ParentLabelPattern)
    }

    pub fn with(mut self, matcher: impl PositionMatcher + 'static) -> Self {
        self.matchers.push(Box::new(matcher));
        self
    }

    pub fn names(&self) -> Vec<&'static str> {
        self.matchers.iter().map(|m| m.name()).collect()
    }

    pub fn resolve(
        &self,
        key: &str,
        entry: &PersistedPosition,
        records: &[LabelRecord],
        taken: &HashSet<usize>,
    ) -> Option<MatchResult> {
        self.matchers.iter().find_map(|matcher| {
            matcher
                .find(key, entry, records, taken)
                .map(|record| MatchResult {
                    record,
                    strategy: matcher.name(),
                })
        })
    }

    /// Match a whole map rank by rank: every entry gets a chance at an exact
    /// match before any entry falls through to a fuzzier strategy. Returns
    /// the matches and the keys left unmatched.
    pub fn resolve_all<'m>(
        &self,
        entries: &'m PositionMap,
        records: &[LabelRecord],
    ) -> (Vec<(&'m str, MatchResult)>, Vec<&'m str>) {
        let mut taken: HashSet<usize> = HashSet::new();
        let mut matched = Vec::new();
        let mut pending: Vec<&'m str> = entries.keys().map(String::as_str).collect();
        for matcher in &self.matchers {
            pending.retain(|&key| {
                let Some(entry) = entries.get(key) else {
                    return false;
                };
                match matcher.find(key, entry, records, &taken) {
                    Some(record) => {
                        taken.insert(record);
                        matched.push((
                            key,
                            MatchResult {
                                record,
                                strategy: matcher.name(),
                            },
                        ));
                        false
                    }
                    None => true,
                }
            });
        }
        (matched, pending)
    }
}
