use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashMap;

pub type Attributes = Map<String, Value>;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct WorldPoint {
    pub x: f64,
    pub y: f64,
}

impl WorldPoint {
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    pub fn is_finite(&self) -> bool {
        self.x.is_finite() && self.y.is_finite()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Viewport {
    pub width: f32,
    pub height: f32,
    pub zoom: f32,
}

impl Viewport {
    pub fn new(width: f32, height: f32, zoom: f32) -> Self {
        Self {
            width,
            height,
            zoom,
        }
    }

    pub fn center(&self) -> (f32, f32) {
        (self.width * 0.5, self.height * 0.5)
    }

    pub fn contains(&self, point: (f32, f32)) -> bool {
        point.0.is_finite()
            && point.1.is_finite()
            && point.0 >= 0.0
            && point.1 >= 0.0
            && point.0 <= self.width
            && point.1 <= self.height
    }
}

/// Mutable text style carried by label entities.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TextStyle {
    pub text: String,
    pub font_size: f32,
    pub color: String,
    pub x_offset: f32,
    pub y_offset: f32,
    pub halo_color: Option<String>,
    pub halo_size: f32,
}

impl Default for TextStyle {
    fn default() -> Self {
        Self {
            text: String::new(),
            font_size: 12.0,
            color: "#1C2430".to_string(),
            x_offset: 0.0,
            y_offset: 0.0,
            halo_color: None,
            halo_size: 0.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntityKind {
    Anchor,
    Label,
}

impl EntityKind {
    /// Hosts that only tag entities with a symbol type use `"text"` for labels.
    pub fn from_symbol_type(token: &str) -> Self {
        match token.trim().to_ascii_lowercase().as_str() {
            "text" | "label" | "textsymbol" => Self::Label,
            _ => Self::Anchor,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Entity {
    /// Host handle, unique within the host for the entity's lifetime.
    pub uid: u64,
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub record_id: Option<String>,
    #[serde(default)]
    pub kind: Option<EntityKind>,
    #[serde(default)]
    pub symbol_type: Option<String>,
    pub position: WorldPoint,
    #[serde(default)]
    pub parent_id: Option<String>,
    #[serde(default = "default_true")]
    pub visible: bool,
    #[serde(default)]
    pub attributes: Attributes,
    #[serde(default)]
    pub style: Option<TextStyle>,
}

fn default_true() -> bool {
    true
}

impl Entity {
    pub fn anchor(uid: u64, id: &str, position: WorldPoint) -> Self {
        Self {
            uid,
            id: Some(id.to_string()),
            record_id: None,
            kind: Some(EntityKind::Anchor),
            symbol_type: None,
            position,
            parent_id: None,
            visible: true,
            attributes: Attributes::new(),
            style: None,
        }
    }

    pub fn label(
        uid: u64,
        id: Option<&str>,
        parent_id: &str,
        position: WorldPoint,
        text: &str,
    ) -> Self {
        Self {
            uid,
            id: id.map(str::to_string),
            record_id: None,
            kind: Some(EntityKind::Label),
            symbol_type: Some("text".to_string()),
            position,
            parent_id: Some(parent_id.to_string()),
            visible: true,
            attributes: Attributes::new(),
            style: Some(TextStyle {
                text: text.to_string(),
                ..TextStyle::default()
            }),
        }
    }

    pub fn with_attribute(mut self, key: &str, value: Value) -> Self {
        self.attributes.insert(key.to_string(), value);
        self
    }

    pub fn is_label(&self) -> bool {
        match (self.kind, self.symbol_type.as_deref()) {
            (Some(kind), _) => kind == EntityKind::Label,
            (None, Some(symbol)) => EntityKind::from_symbol_type(symbol) == EntityKind::Label,
            (None, None) => self.style.is_some(),
        }
    }

    /// Best-effort stable identifier: explicit id, else layer + record id +
    /// rounded coordinates.
    pub fn stable_id(&self, layer_id: &str) -> String {
        if let Some(id) = self.id.as_deref().filter(|id| !id.trim().is_empty()) {
            return id.to_string();
        }
        let record = self
            .record_id
            .as_deref()
            .map(str::to_string)
            .unwrap_or_else(|| self.uid.to_string());
        format!(
            "{layer_id}-{record}-{:.5}-{:.5}",
            self.position.x, self.position.y
        )
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Layer {
    pub id: String,
    #[serde(default = "default_true")]
    pub visible: bool,
    /// The layer positions its own labels; only visibility is toggled.
    #[serde(default)]
    pub self_managed: bool,
    #[serde(default)]
    pub entities: Vec<Entity>,
}

impl Layer {
    pub fn new(id: &str) -> Self {
        Self {
            id: id.to_string(),
            visible: true,
            self_managed: false,
            entities: Vec::new(),
        }
    }

    pub fn entity(&self, uid: u64) -> Option<&Entity> {
        self.entities.iter().find(|entity| entity.uid == uid)
    }

    pub fn entity_mut(&mut self, uid: u64) -> Option<&mut Entity> {
        self.entities.iter_mut().find(|entity| entity.uid == uid)
    }
}

/// Uid lookup over one or more layers. Build it once per pass; `Layer::entity`
/// is a linear scan. When a uid repeats, the first entity seen wins.
#[derive(Debug, Default)]
pub struct EntityIndex<'a> {
    by_uid: HashMap<u64, &'a Entity>,
}

impl<'a> EntityIndex<'a> {
    pub fn of_layer(layer: &'a Layer) -> Self {
        Self::of_layers(std::slice::from_ref(layer))
    }

    pub fn of_layers(layers: &'a [Layer]) -> Self {
        let mut by_uid = HashMap::with_capacity(layers.iter().map(|l| l.entities.len()).sum());
        for entity in layers.iter().flat_map(|layer| layer.entities.iter()) {
            by_uid.entry(entity.uid).or_insert(entity);
        }
        Self { by_uid }
    }

    pub fn get(&self, uid: u64) -> Option<&'a Entity> {
        self.by_uid.get(&uid).copied()
    }

    pub fn contains(&self, uid: u64) -> bool {
        self.by_uid.contains_key(&uid)
    }

    pub fn len(&self) -> usize {
        self.by_uid.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_uid.is_empty()
    }
}

/// Write-back applied to a host label after a pass or an edit.
#[derive(Debug, Clone, PartialEq)]
pub struct LabelState {
    pub visible: bool,
    pub x_offset: f32,
    pub y_offset: f32,
    pub font_size: f32,
    pub text: String,
}

#[derive(Debug, Clone, PartialEq)]
pub enum HostEvent {
    ViewportChanged,
    LayersChanged(Vec<String>),
    LayerRemoved(String),
    /// A watched label property changed (often fired by our own write-back).
    LabelStyleChanged { layer_id: String, uid: u64 },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn entity_index_matches_linear_lookup() {
        let mut first = Layer::new("first");
        first
            .entities
            .push(Entity::anchor(1, "a", WorldPoint::new(0.0, 0.0)));
        first.entities.push(Entity::label(
            2,
            Some("a-label-0"),
            "a",
            WorldPoint::new(0.0, 0.0),
            "A",
        ));
        let mut second = Layer::new("second");
        second
            .entities
            .push(Entity::anchor(3, "b", WorldPoint::new(5.0, 5.0)));
        // Same uid as an entity in the first layer.
        second
            .entities
            .push(Entity::anchor(1, "shadow", WorldPoint::new(9.0, 9.0)));
        let layers = vec![first, second];

        let local = EntityIndex::of_layer(&layers[0]);
        assert_eq!(local.len(), 2);
        assert_eq!(local.get(2).map(|e| e.uid), layers[0].entity(2).map(|e| e.uid));
        assert!(local.get(3).is_none());

        let global = EntityIndex::of_layers(&layers);
        assert_eq!(global.len(), 3);
        assert!(global.contains(3));
        assert_eq!(global.get(1).and_then(|e| e.id.as_deref()), Some("a"));
    }
}
