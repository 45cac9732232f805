use crate::engine::PassReport;
use crate::host::MapHost;
use crate::ir::Viewport;
use crate::layout::LabelBox;
use crate::records::LabelRecord;
use serde::Serialize;
use std::fs::File;
use std::io::BufWriter;
use std::path::Path;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PlacementDump {
    pub width: f32,
    pub height: f32,
    pub zoom: f32,
    pub report: Option<PassReport>,
    pub boxes: Vec<LabelBox>,
    pub labels: Vec<LabelDump>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LabelDump {
    pub key: String,
    pub layer: String,
    pub anchor: Option<String>,
    pub text: String,
    pub visible: bool,
    pub offset: [f32; 2],
    pub font_size: f32,
    pub priority: f32,
    pub edited: bool,
    pub duplicate_of: Option<String>,
}

impl LabelDump {
    fn from_record(record: &LabelRecord) -> Self {
        let (dx, dy) = record.current_offset();
        Self {
            key: record.key.clone(),
            layer: record.layer_id.clone(),
            anchor: record.anchor_key.clone(),
            text: record.state().text,
            visible: record.visible,
            offset: [dx, dy],
            font_size: record.font_size,
            priority: record.priority,
            edited: record.is_user_edited(),
            duplicate_of: record.duplicate_of.clone(),
        }
    }
}

impl PlacementDump {
    pub fn new(
        viewport: Viewport,
        report: Option<PassReport>,
        boxes: &[LabelBox],
        records: &[LabelRecord],
    ) -> Self {
        let mut labels: Vec<LabelDump> = records.iter().map(LabelDump::from_record).collect();
        labels.sort_by(|a, b| a.key.cmp(&b.key));
        PlacementDump {
            width: viewport.width,
            height: viewport.height,
            zoom: viewport.zoom,
            report,
            boxes: boxes.to_vec(),
            labels,
        }
    }

    pub fn from_engine<H: MapHost>(
        engine: &crate::engine::LabelEngine<H>,
        report: Option<PassReport>,
    ) -> Self {
        Self::new(
            engine.host().viewport(),
            report,
            engine.last_boxes(),
            engine.records(),
        )
    }
}

pub fn write_placement_dump(path: &Path, dump: &PlacementDump) -> anyhow::Result<()> {
    let file = File::create(path)?;
    let writer = BufWriter::new(file);
    serde_json::to_writer_pretty(writer, dump)?;
    Ok(())
}
