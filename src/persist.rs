// Durable label positions. One JSON object per storage key, mapping
// best-effort label ids to their saved offset, style and edit provenance.

use crate::error::StoreError;
use crate::records::LabelRecord;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use tracing::warn;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PersistedPosition {
    #[serde(default)]
    pub xoffset: f32,
    #[serde(default)]
    pub yoffset: f32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub font_size: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(default = "default_true")]
    pub visible: bool,
    #[serde(
        default,
        deserialize_with = "parent_id_from_any",
        skip_serializing_if = "Option::is_none"
    )]
    pub parent_id: Option<String>,
    #[serde(default)]
    pub edited: bool,
    #[serde(default)]
    pub permanent: bool,
    #[serde(default)]
    pub user_edited: bool,
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum NumberOrString {
    Number(serde_json::Number),
    String(String),
}

impl NumberOrString {
    fn as_string(&self) -> String {
        match self {
            NumberOrString::Number(val) => val.to_string(),
            NumberOrString::String(val) => val.clone(),
        }
    }
}

fn parent_id_from_any<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<NumberOrString>::deserialize(deserializer)?;
    Ok(value
        .map(|v| v.as_string())
        .filter(|id| !id.trim().is_empty()))
}

impl PersistedPosition {
    pub fn from_record(record: &LabelRecord) -> Self {
        let (xoffset, yoffset) = record.current_offset();
        Self {
            xoffset,
            yoffset,
            font_size: Some(record.font_size),
            text: Some(record.text.clone()),
            visible: !record.user_hidden,
            parent_id: record.anchor_key.clone(),
            edited: record.is_edited || record.has_manual_offset(),
            permanent: record.permanent_edit,
            user_edited: record.user_edited,
        }
    }

    /// Apply onto a matched live record. Loaded entries count as permanent
    /// user edits so duplicate resolution keeps them visible.
    pub fn apply_to(&self, record: &mut LabelRecord, edit_seq: u64) {
        record.manual_offset = Some((self.xoffset, self.yoffset));
        if let Some(size) = self.font_size.filter(|size| *size > 0.0) {
            record.font_size = size;
        }
        if let Some(text) = self.text.as_deref().filter(|text| !text.trim().is_empty()) {
            record.text = text.to_string();
        }
        record.user_hidden = !self.visible;
        record.visible = self.visible;
        record.is_edited = self.edited;
        record.permanent_edit = true;
        record.user_edited = self.is_edited();
        record.edit_seq = edit_seq;
        record.is_duplicate = false;
        record.duplicate_of = None;
    }

    pub fn is_edited(&self) -> bool {
        self.edited || self.permanent || self.user_edited
    }
}

pub type PositionMap = BTreeMap<String, PersistedPosition>;

/// Parse a stored mapping. Entries that fail to decode are skipped one by
/// one; only a non-object document is an error.
pub fn parse_position_map(contents: &str) -> Result<PositionMap, StoreError> {
    let value: Value = serde_json::from_str(contents)?;
    let Value::Object(entries) = value else {
        return Err(StoreError::NotAnObject);
    };
    let mut map = PositionMap::new();
    for (key, entry) in entries {
        match serde_json::from_value::<PersistedPosition>(entry) {
            Ok(position) => {
                map.insert(key, position);
            }
            Err(err) => warn!(label = %key, error = %err, "skipping malformed persisted position"),
        }
    }
    Ok(map)
}

/// Union of both maps; `incoming` wins on conflicting keys.
pub fn merge_positions(existing: &mut PositionMap, incoming: PositionMap) {
    existing.extend(incoming);
}

pub fn to_json(map: &PositionMap) -> Result<String, StoreError> {
    Ok(serde_json::to_string_pretty(map)?)
}

/// String key-value storage that outlives the engine.
pub trait DurableStore {
    fn read(&self, key: &str) -> Result<Option<String>, StoreError>;
    fn write(&mut self, key: &str, value: &str) -> Result<(), StoreError>;
    fn remove(&mut self, key: &str) -> Result<(), StoreError>;
}

pub fn load_map(store: &dyn DurableStore, key: &str) -> Result<PositionMap, StoreError> {
    match store.read(key)? {
        Some(contents) if !contents.trim().is_empty() => parse_position_map(&contents),
        _ => Ok(PositionMap::new()),
    }
}

/// Merge `entries` into what the store already holds under `key`.
pub fn save_merged(
    store: &mut dyn DurableStore,
    key: &str,
    entries: PositionMap,
) -> Result<PositionMap, StoreError> {
    let mut existing = match load_map(store, key) {
        Ok(map) => map,
        Err(StoreError::Json(err)) => {
            warn!(key, error = %err, "replacing unreadable stored positions");
            PositionMap::new()
        }
        Err(err) => return Err(err),
    };
    merge_positions(&mut existing, entries);
    store.write(key, &to_json(&existing)?)?;
    Ok(existing)
}

/// Drop one label's entry; returns whether it was present.
pub fn remove_entry(
    store: &mut dyn DurableStore,
    key: &str,
    label_key: &str,
) -> Result<bool, StoreError> {
    let mut existing = load_map(store, key)?;
    if existing.remove(label_key).is_none() {
        return Ok(false);
    }
    store.write(key, &to_json(&existing)?)?;
    Ok(true)
}

#[derive(Debug, Default, Clone)]
pub struct MemoryStore {
    values: HashMap<String, String>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl DurableStore for MemoryStore {
    fn read(&self, key: &str) -> Result<Option<String>, StoreError> {
        Ok(self.values.get(key).cloned())
    }

    fn write(&mut self, key: &str, value: &str) -> Result<(), StoreError> {
        self.values.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&mut self, key: &str) -> Result<(), StoreError> {
        self.values.remove(key);
        Ok(())
    }
}

/// One `<key>.json` file per storage key under a directory.
#[derive(Debug, Clone)]
pub struct FileStore {
    dir: PathBuf,
}

impl FileStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn path_for(&self, key: &str) -> PathBuf {
        let name: String = key
            .chars()
            .map(|c| {
                if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                    c
                } else {
                    '_'
                }
            })
            .collect();
        self.dir.join(format!("{name}.json"))
    }
}

fn io_error(path: &Path, source: std::io::Error) -> StoreError {
    StoreError::Io {
        path: path.to_path_buf(),
        source,
    }
}

impl DurableStore for FileStore {
    fn read(&self, key: &str) -> Result<Option<String>, StoreError> {
        let path = self.path_for(key);
        match std::fs::read_to_string(&path) {
            Ok(contents) => Ok(Some(contents)),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(err) => Err(io_error(&path, err)),
        }
    }

    fn write(&mut self, key: &str, value: &str) -> Result<(), StoreError> {
        std::fs::create_dir_all(&self.dir).map_err(|err| io_error(&self.dir, err))?;
        let path = self.path_for(key);
        std::fs::write(&path, value).map_err(|err| io_error(&path, err))
    }

    fn remove(&mut self, key: &str) -> Result<(), StoreError> {
        let path = self.path_for(key);
        match std::fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(io_error(&path, err)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(x: f32, y: f32) -> PersistedPosition {
        PersistedPosition {
            xoffset: x,
            yoffset: y,
            font_size: Some(12.0),
            text: Some("Store".to_string()),
            visible: true,
            parent_id: Some("42".to_string()),
            edited: true,
            permanent: true,
            user_edited: false,
        }
    }

    #[test]
    fn parent_id_accepts_numbers_and_strings() {
        let map = parse_position_map(
            r#"{"a": {"parentId": 42, "xoffset": 12, "yoffset": -8},
                "b": {"parentId": "site-7"},
                "c": {"parentId": null}}"#,
        )
        .unwrap();
        assert_eq!(map["a"].parent_id.as_deref(), Some("42"));
        assert_eq!(map["a"].xoffset, 12.0);
        assert_eq!(map["b"].parent_id.as_deref(), Some("site-7"));
        assert_eq!(map["c"].parent_id, None);
        assert!(map["b"].visible, "visibility defaults to true");
    }

    #[test]
    fn malformed_entries_are_skipped_individually() {
        let map = parse_position_map(r#"{"good": {"xoffset": 1}, "bad": {"xoffset": "left"}}"#)
            .unwrap();
        assert_eq!(map.len(), 1);
        assert!(map.contains_key("good"));
    }

    #[test]
    fn non_object_document_is_an_error() {
        assert!(matches!(
            parse_position_map("[1, 2, 3]"),
            Err(StoreError::NotAnObject)
        ));
    }

    #[test]
    fn save_merges_instead_of_replacing() {
        let mut store = MemoryStore::new();
        let mut first = PositionMap::new();
        first.insert("a".to_string(), entry(1.0, 1.0));
        first.insert("b".to_string(), entry(2.0, 2.0));
        save_merged(&mut store, "labelPositions", first).unwrap();

        let mut second = PositionMap::new();
        second.insert("b".to_string(), entry(9.0, 9.0));
        second.insert("c".to_string(), entry(3.0, 3.0));
        let merged = save_merged(&mut store, "labelPositions", second).unwrap();

        assert_eq!(merged.len(), 3);
        assert_eq!(merged["a"].xoffset, 1.0);
        assert_eq!(merged["b"].xoffset, 9.0, "newer entry wins");
        assert_eq!(load_map(&store, "labelPositions").unwrap(), merged);
    }

    #[test]
    fn remove_entry_keeps_the_rest() {
        let mut store = MemoryStore::new();
        let mut map = PositionMap::new();
        map.insert("a".to_string(), entry(1.0, 1.0));
        map.insert("b".to_string(), entry(2.0, 2.0));
        save_merged(&mut store, "k", map).unwrap();
        assert!(remove_entry(&mut store, "k", "a").unwrap());
        assert!(!remove_entry(&mut store, "k", "a").unwrap());
        assert_eq!(load_map(&store, "k").unwrap().len(), 1);
    }

    #[test]
    fn file_store_round_trips() {
        let dir = std::env::temp_dir().join(format!("maplabel-store-{}", std::process::id()));
        let mut store = FileStore::new(&dir);
        assert_eq!(store.read("labelPositions").unwrap(), None);
        store.write("labelPositions", "{}").unwrap();
        assert_eq!(store.read("labelPositions").unwrap().as_deref(), Some("{}"));
        store.remove("labelPositions").unwrap();
        assert_eq!(store.read("labelPositions").unwrap(), None);
        let _ = std::fs::remove_dir_all(&dir);
    }
}
