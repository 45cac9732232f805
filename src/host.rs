// Boundary to the rendering/geometry collaborator. The engine only reads
// anchors and writes label state back through `MapHost`.

use crate::ir::{HostEvent, LabelState, Layer, Viewport, WorldPoint};
use serde::{Deserialize, Serialize};

pub trait MapHost {
    /// `false` once the view has been torn down; every engine operation
    /// becomes a no-op.
    fn is_alive(&self) -> bool {
        true
    }

    fn viewport(&self) -> Viewport;

    /// Screen position of a world point, `None` when it cannot be projected.
    /// Off-screen points come back outside `0..width`/`0..height`.
    fn project(&self, point: WorldPoint) -> Option<(f32, f32)>;

    fn layers(&self) -> &[Layer];

    fn layer(&self, id: &str) -> Option<&Layer> {
        self.layers().iter().find(|layer| layer.id == id)
    }

    /// Returns `false` when the layer or entity no longer exists.
    fn apply_label_state(&mut self, layer_id: &str, uid: u64, state: &LabelState) -> bool;

    /// Change notifications queued since the last call.
    fn drain_events(&mut self) -> Vec<HostEvent> {
        Vec::new()
    }
}

/// In-memory host with a linear projection, used by the CLI, tests and
/// benches.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Scene {
    pub viewport: Viewport,
    /// World point shown at the viewport center.
    pub center: WorldPoint,
    /// Pixels per world unit at `base_zoom`.
    #[serde(default = "default_scale")]
    pub scale: f64,
    /// Zoom the scale was authored at; scale doubles per level above it.
    /// `None` keeps the scale fixed regardless of zoom.
    #[serde(default)]
    pub base_zoom: Option<f32>,
    #[serde(default)]
    pub layers: Vec<Layer>,
    #[serde(skip)]
    pub destroyed: bool,
    #[serde(skip)]
    pub echo_style_events: bool,
    #[serde(skip)]
    events: Vec<HostEvent>,
}

fn default_scale() -> f64 {
    1.0
}

impl Scene {
    pub fn new(viewport: Viewport, center: WorldPoint) -> Self {
        Self {
            viewport,
            center,
            scale: 1.0,
            base_zoom: None,
            layers: Vec::new(),
            destroyed: false,
            echo_style_events: false,
            events: Vec::new(),
        }
    }

    /// Scene where world coordinates equal screen pixels at every zoom.
    pub fn pixel_space(width: f32, height: f32, zoom: f32) -> Self {
        let center = WorldPoint::new(f64::from(width) * 0.5, f64::from(height) * 0.5);
        Self::new(Viewport::new(width, height, zoom), center)
    }

    pub fn add_layer(&mut self, layer: Layer) {
        self.layers.retain(|existing| existing.id != layer.id);
        self.layers.push(layer);
        let id = self.layers[self.layers.len() - 1].id.clone();
        self.events.push(HostEvent::LayersChanged(vec![id]));
    }

    pub fn remove_layer(&mut self, id: &str) -> Option<Layer> {
        let idx = self.layers.iter().position(|layer| layer.id == id)?;
        self.events.push(HostEvent::LayerRemoved(id.to_string()));
        Some(self.layers.remove(idx))
    }

    pub fn layer_mut(&mut self, id: &str) -> Option<&mut Layer> {
        self.layers.iter_mut().find(|layer| layer.id == id)
    }

    pub fn set_zoom(&mut self, zoom: f32) {
        self.viewport.zoom = zoom;
        self.events.push(HostEvent::ViewportChanged);
    }

    pub fn pan_to(&mut self, center: WorldPoint) {
        self.center = center;
        self.events.push(HostEvent::ViewportChanged);
    }

    fn zoom_scale(&self) -> f64 {
        match self.base_zoom {
            Some(base) => self.scale * 2f64.powf(f64::from(self.viewport.zoom - base)),
            None => self.scale,
        }
    }
}

impl MapHost for Scene {
    fn is_alive(&self) -> bool {
        !self.destroyed
    }

    fn viewport(&self) -> Viewport {
        self.viewport
    }

    fn project(&self, point: WorldPoint) -> Option<(f32, f32)> {
        if !point.is_finite() {
            return None;
        }
        let scale = self.zoom_scale();
        let x = (point.x - self.center.x) * scale + f64::from(self.viewport.width) * 0.5;
        let y = (point.y - self.center.y) * scale + f64::from(self.viewport.height) * 0.5;
        if !x.is_finite() || !y.is_finite() {
            return None;
        }
        Some((x as f32, y as f32))
    }

    fn layers(&self) -> &[Layer] {
        &self.layers
    }

    fn apply_label_state(&mut self, layer_id: &str, uid: u64, state: &LabelState) -> bool {
        let echo = self.echo_style_events;
        let Some(entity) = self
            .layer_mut(layer_id)
            .and_then(|layer| layer.entity_mut(uid))
        else {
            return false;
        };
        entity.visible = state.visible;
        let style = entity.style.get_or_insert_with(Default::default);
        let changed = style.x_offset != state.x_offset
            || style.y_offset != state.y_offset
            || style.font_size != state.font_size
            || style.text != state.text;
        style.x_offset = state.x_offset;
        style.y_offset = state.y_offset;
        style.font_size = state.font_size;
        style.text = state.text.clone();
        if echo && changed {
            self.events.push(HostEvent::LabelStyleChanged {
                layer_id: layer_id.to_string(),
                uid,
            });
        }
        true
    }

    fn drain_events(&mut self) -> Vec<HostEvent> {
        std::mem::take(&mut self.events)
    }
}
