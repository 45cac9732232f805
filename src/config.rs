use serde::{Deserialize, Serialize};
use std::path::Path;

pub const DEFAULT_PLACEMENT_ORDER: [&str; 8] = [
    "top",
    "right",
    "bottom",
    "left",
    "top-right",
    "bottom-right",
    "bottom-left",
    "top-left",
];

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum TextCase {
    #[default]
    None,
    Upper,
    Lower,
    Capitalize,
}

impl TextCase {
    pub fn from_name(name: &str) -> Self {
        match name.trim().to_ascii_lowercase().as_str() {
            "upper" | "uppercase" => Self::Upper,
            "lower" | "lowercase" => Self::Lower,
            "capitalize" | "title" => Self::Capitalize,
            _ => Self::None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LabelConfig {
    /// Below this zoom every label is hidden.
    pub min_zoom: f32,
    pub max_labels_visible: usize,
    pub max_label_length: usize,
    pub text_case: TextCase,
    /// Attribute read when a label entity carries no text.
    pub text_attribute: String,
    pub default_font_size: f32,
    pub char_width_ratio: f32,
    pub line_height: f32,
    pub box_padding: f32,
    pub priority_attributes: Vec<String>,
    pub base_priority: f32,
    pub attribute_flat_bonus: f32,
    pub proximity_bonus_max: f32,
    pub proximity_threshold: f32,
    pub priority_jitter: f32,
}

impl Default for LabelConfig {
    fn default() -> Self {
        Self {
            min_zoom: 10.0,
            max_labels_visible: 200,
            max_label_length: 30,
            text_case: TextCase::None,
            text_attribute: "label".to_string(),
            default_font_size: 12.0,
            char_width_ratio: 0.6,
            line_height: 1.2,
            box_padding: 2.0,
            priority_attributes: vec!["priority".to_string()],
            base_priority: 1.0,
            attribute_flat_bonus: 2.0,
            proximity_bonus_max: 2.0,
            proximity_threshold: 300.0,
            priority_jitter: 0.1,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GridConfig {
    pub cluster_distance: f32,
    /// Zoom delta that invalidates remembered cluster membership.
    pub zoom_reset_delta: f32,
    pub representative_boost: f32,
}

impl Default for GridConfig {
    fn default() -> Self {
        Self {
            cluster_distance: 40.0,
            zoom_reset_delta: 0.75,
            representative_boost: 1.5,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LayoutConfig {
    pub algorithm: String,
    pub placement_preferences: Vec<String>,
    pub stand_off: f32,
    pub max_label_distance: f32,
    pub strict_no_overlap: bool,
    pub min_spacing: f32,
    pub viewport_margin: f32,
    pub anchor_marker_radius: f32,
    pub force_iterations: usize,
    pub force_repulsion: f32,
    pub force_too_close: f32,
    pub force_boundary: f32,
    pub force_spring: f32,
    pub force_anchor_repulsion: f32,
    pub force_damping: f32,
    pub force_max_step: f32,
    pub anneal_iterations: usize,
    pub anneal_moves_per_label: usize,
    pub anneal_initial_temperature: f32,
    pub anneal_cooling: f32,
    pub anneal_step: f32,
    /// Below this many movable labels annealing is skipped.
    pub anneal_min_labels: usize,
    pub overlap_penalty: f32,
    pub spacing_penalty: f32,
    pub edge_penalty: f32,
    pub edge_margin: f32,
    /// Annealing energy per `max_label_distance` of anchor distance.
    pub anneal_distance_weight: f32,
}

impl Default for LayoutConfig {
    fn default() -> Self {
        Self {
            algorithm: "force".to_string(),
            placement_preferences: DEFAULT_PLACEMENT_ORDER
                .iter()
                .map(|name| name.to_string())
                .collect(),
            stand_off: 8.0,
            max_label_distance: 80.0,
            strict_no_overlap: true,
            min_spacing: 4.0,
            viewport_margin: 2.0,
            anchor_marker_radius: 4.0,
            force_iterations: 60,
            force_repulsion: 400.0,
            force_too_close: 24.0,
            force_boundary: 40.0,
            force_spring: 0.08,
            force_anchor_repulsion: 2.0,
            force_damping: 0.85,
            force_max_step: 8.0,
            anneal_iterations: 60,
            anneal_moves_per_label: 4,
            anneal_initial_temperature: 10.0,
            anneal_cooling: 0.92,
            anneal_step: 6.0,
            anneal_min_labels: 8,
            overlap_penalty: 1000.0,
            spacing_penalty: 30.0,
            edge_penalty: 10.0,
            edge_margin: 8.0,
            anneal_distance_weight: 1.0,
        }
    }
}

/// Duplicate scoring weights. The values are regression-pinned, not derived.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DedupWeights {
    pub permanent: f32,
    pub edited: f32,
    pub visible: f32,
    pub manual_offset: f32,
    pub has_text: f32,
    pub short_text: f32,
    pub short_text_len: usize,
    pub distance: f32,
}

impl Default for DedupWeights {
    fn default() -> Self {
        Self {
            permanent: 10.0,
            edited: 5.0,
            visible: 2.0,
            manual_offset: 3.0,
            has_text: 5.0,
            short_text: 3.0,
            short_text_len: 30,
            distance: 1.0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScheduleConfig {
    pub relayout_delay_ms: u64,
    /// A re-layout within this window doubles the next delay.
    pub burst_window_ms: u64,
    pub auto_save_interval_ms: u64,
    pub duplicate_sweep_interval_ms: u64,
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            relayout_delay_ms: 150,
            burst_window_ms: 500,
            auto_save_interval_ms: 30_000,
            duplicate_sweep_interval_ms: 5_000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PersistConfig {
    pub storage_key: String,
}

impl Default for PersistConfig {
    fn default() -> Self {
        Self {
            storage_key: "labelPositions".to_string(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EngineConfig {
    pub labels: LabelConfig,
    pub grid: GridConfig,
    pub layout: LayoutConfig,
    pub dedup: DedupWeights,
    pub schedule: ScheduleConfig,
    pub persist: PersistConfig,
    pub seed: u64,
    pub debug_overlay: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LayerKind {
    PointPipeline,
    Comparison,
    Default,
}

impl LayerKind {
    pub fn from_name(name: &str) -> Self {
        let normalized: String = name
            .chars()
            .filter(|ch| ch.is_ascii_alphanumeric())
            .collect::<String>()
            .to_ascii_lowercase();
        match normalized.as_str() {
            "pointpipeline" | "pipeline" | "points" => Self::PointPipeline,
            "comparison" | "comp" => Self::Comparison,
            _ => Self::Default,
        }
    }
}

impl EngineConfig {
    /// Apply spacing preset for a layer kind. Denser for point pipelines,
    /// sparser for comparison layers.
    pub fn apply_layer_kind(&mut self, kind: LayerKind) {
        let defaults = Self::default();
        let (cluster, spacing, max_visible, stand_off) = match kind {
            LayerKind::PointPipeline => (30.0, 2.0, 300, 6.0),
            LayerKind::Comparison => (80.0, 10.0, 60, 12.0),
            LayerKind::Default => (
                defaults.grid.cluster_distance,
                defaults.layout.min_spacing,
                defaults.labels.max_labels_visible,
                defaults.layout.stand_off,
            ),
        };
        self.grid.cluster_distance = cluster;
        self.layout.min_spacing = spacing;
        self.labels.max_labels_visible = max_visible;
        self.layout.stand_off = stand_off;
    }
}

#[derive(Debug, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
struct LabelConfigFile {
    min_zoom: Option<f32>,
    label_min_zoom: Option<f32>,
    max_labels_visible: Option<usize>,
    max_label_length: Option<usize>,
    text_case: Option<String>,
    text_attribute: Option<String>,
    default_font_size: Option<f32>,
    char_width_ratio: Option<f32>,
    line_height: Option<f32>,
    box_padding: Option<f32>,
    priority_attributes: Option<Vec<String>>,
    base_priority: Option<f32>,
    attribute_flat_bonus: Option<f32>,
    proximity_bonus_max: Option<f32>,
    proximity_threshold: Option<f32>,
    priority_jitter: Option<f32>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
struct GridConfigFile {
    cluster_distance: Option<f32>,
    zoom_reset_delta: Option<f32>,
    representative_boost: Option<f32>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
struct LayoutConfigFile {
    algorithm: Option<String>,
    placement_preferences: Option<Vec<String>>,
    stand_off: Option<f32>,
    max_label_distance: Option<f32>,
    strict_no_overlap: Option<bool>,
    min_spacing: Option<f32>,
    viewport_margin: Option<f32>,
    anchor_marker_radius: Option<f32>,
    force_iterations: Option<usize>,
    force_repulsion: Option<f32>,
    force_too_close: Option<f32>,
    force_boundary: Option<f32>,
    force_spring: Option<f32>,
    force_anchor_repulsion: Option<f32>,
    force_damping: Option<f32>,
    force_max_step: Option<f32>,
    anneal_iterations: Option<usize>,
    anneal_moves_per_label: Option<usize>,
    anneal_initial_temperature: Option<f32>,
    anneal_cooling: Option<f32>,
    anneal_step: Option<f32>,
    anneal_min_labels: Option<usize>,
    overlap_penalty: Option<f32>,
    spacing_penalty: Option<f32>,
    edge_penalty: Option<f32>,
    edge_margin: Option<f32>,
    anneal_distance_weight: Option<f32>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
struct DedupConfigFile {
    permanent: Option<f32>,
    edited: Option<f32>,
    visible: Option<f32>,
    manual_offset: Option<f32>,
    has_text: Option<f32>,
    short_text: Option<f32>,
    short_text_len: Option<usize>,
    distance: Option<f32>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
struct ScheduleConfigFile {
    relayout_delay_ms: Option<u64>,
    burst_window_ms: Option<u64>,
    auto_save_interval_ms: Option<u64>,
    duplicate_sweep_interval_ms: Option<u64>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ConfigFile {
    layer_kind: Option<String>,
    labels: Option<LabelConfigFile>,
    grid: Option<GridConfigFile>,
    layout: Option<LayoutConfigFile>,
    dedup: Option<DedupConfigFile>,
    schedule: Option<ScheduleConfigFile>,
    storage_key: Option<String>,
    seed: Option<u64>,
    debug_overlay: Option<bool>,
}

macro_rules! overlay {
    ($target:expr, $source:expr, [$($field:ident),* $(,)?]) => {
        $(
            if let Some(v) = $source.$field {
                $target.$field = v;
            }
        )*
    };
}

pub fn load_config(path: Option<&Path>) -> anyhow::Result<EngineConfig> {
    let mut config = EngineConfig::default();
    let Some(path) = path else {
        return Ok(config);
    };

    let contents = std::fs::read_to_string(path)?;
    let parsed: ConfigFile = json5::from_str(&contents)?;

    // Preset first so explicit values in the file win over it.
    if let Some(kind) = parsed.layer_kind.as_deref() {
        config.apply_layer_kind(LayerKind::from_name(kind));
    }

    if let Some(labels) = parsed.labels {
        if let Some(v) = labels.label_min_zoom {
            config.labels.min_zoom = v;
        }
        if let Some(v) = labels.text_case.as_deref() {
            config.labels.text_case = TextCase::from_name(v);
        }
        overlay!(
            config.labels,
            labels,
            [
                min_zoom,
                max_labels_visible,
                max_label_length,
                text_attribute,
                default_font_size,
                char_width_ratio,
                line_height,
                box_padding,
                priority_attributes,
                base_priority,
                attribute_flat_bonus,
                proximity_bonus_max,
                proximity_threshold,
                priority_jitter,
            ]
        );
    }

    if let Some(grid) = parsed.grid {
        overlay!(
            config.grid,
            grid,
            [cluster_distance, zoom_reset_delta, representative_boost]
        );
    }

    if let Some(layout) = parsed.layout {
        overlay!(
            config.layout,
            layout,
            [
                algorithm,
                placement_preferences,
                stand_off,
                max_label_distance,
                strict_no_overlap,
                min_spacing,
                viewport_margin,
                anchor_marker_radius,
                force_iterations,
                force_repulsion,
                force_too_close,
                force_boundary,
                force_spring,
                force_anchor_repulsion,
                force_damping,
                force_max_step,
                anneal_iterations,
                anneal_moves_per_label,
                anneal_initial_temperature,
                anneal_cooling,
                anneal_step,
                anneal_min_labels,
                overlap_penalty,
                spacing_penalty,
                edge_penalty,
                edge_margin,
                anneal_distance_weight,
            ]
        );
    }

    if let Some(dedup) = parsed.dedup {
        overlay!(
            config.dedup,
            dedup,
            [
                permanent,
                edited,
                visible,
                manual_offset,
                has_text,
                short_text,
                short_text_len,
                distance,
            ]
        );
    }

    if let Some(schedule) = parsed.schedule {
        overlay!(
            config.schedule,
            schedule,
            [
                relayout_delay_ms,
                burst_window_ms,
                auto_save_interval_ms,
                duplicate_sweep_interval_ms,
            ]
        );
    }

    if let Some(v) = parsed.storage_key {
        config.persist.storage_key = v;
    }
    if let Some(v) = parsed.seed {
        config.seed = v;
    }
    if let Some(v) = parsed.debug_overlay {
        config.debug_overlay = v;
    }

    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write_temp(name: &str, contents: &str) -> std::path::PathBuf {
        let dir = std::env::temp_dir().join(format!("maplabel-config-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join(name);
        std::fs::write(&path, contents).unwrap();
        path
    }

    #[test]
    fn missing_path_yields_defaults() {
        let config = load_config(None).unwrap();
        assert_eq!(config.layout.algorithm, "force");
        assert_eq!(config.layout.placement_preferences.len(), 8);
    }

    #[test]
    fn json5_overlay_keeps_unset_fields() {
        let path = write_temp(
            "overlay.json5",
            r#"{
                // comments are allowed
                labels: { labelMinZoom: 12, textCase: "upper", maxLabelLength: 10 },
                layout: { algorithm: "annealing", strictNoOverlap: false },
                seed: 7,
            }"#,
        );
        let config = load_config(Some(&path)).unwrap();
        assert_eq!(config.labels.min_zoom, 12.0);
        assert_eq!(config.labels.text_case, TextCase::Upper);
        assert_eq!(config.labels.max_label_length, 10);
        assert_eq!(config.layout.algorithm, "annealing");
        assert!(!config.layout.strict_no_overlap);
        assert_eq!(config.layout.stand_off, 8.0);
        assert_eq!(config.seed, 7);
    }

    #[test]
    fn explicit_values_override_layer_kind_preset() {
        let path = write_temp(
            "preset.json5",
            r#"{ layerKind: "comparison", grid: { clusterDistance: 55 } }"#,
        );
        let config = load_config(Some(&path)).unwrap();
        assert_eq!(config.grid.cluster_distance, 55.0);
        assert_eq!(config.labels.max_labels_visible, 60);
    }

    #[test]
    fn unknown_layer_kind_falls_back_to_default() {
        assert_eq!(LayerKind::from_name("point-pipeline"), LayerKind::PointPipeline);
        assert_eq!(LayerKind::from_name("radius rings"), LayerKind::Default);
        let mut config = EngineConfig::default();
        config.apply_layer_kind(LayerKind::PointPipeline);
        config.apply_layer_kind(LayerKind::from_name("???"));
        assert_eq!(config.grid.cluster_distance, 40.0);
    }
}
