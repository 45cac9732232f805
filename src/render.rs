use crate::ir::Viewport;
use crate::layout::LabelBox;
use anyhow::Result;
use std::path::Path;

const ANCHOR_COLOR: &str = "#D9480F";
const BOX_STROKE: &str = "#1C7ED6";
const FIXED_STROKE: &str = "#2F9E44";
const LEADER_COLOR: &str = "#868E96";
const TEXT_COLOR: &str = "#1C2430";

/// Debug overlay: anchors, label boxes (pinned boxes in green) and leader
/// lines. Hidden boxes are drawn faded and dashed.
pub fn overlay_svg(viewport: Viewport, boxes: &[LabelBox]) -> String {
    let width = viewport.width.max(1.0);
    let height = viewport.height.max(1.0);
    let mut svg = String::new();

    svg.push_str(&format!(
        "<svg xmlns=\"http://www.w3.org/2000/svg\" width=\"{width}\" height=\"{height}\" viewBox=\"0 0 {width} {height}\">",
    ));
    svg.push_str("<rect width=\"100%\" height=\"100%\" fill=\"#FFFFFF\"/>");

    for label in boxes.iter().filter(|b| !b.visible) {
        let (x, y, w, h) = label.rect();
        svg.push_str(&format!(
            "<rect x=\"{x:.2}\" y=\"{y:.2}\" width=\"{w:.2}\" height=\"{h:.2}\" fill=\"none\" stroke=\"{LEADER_COLOR}\" stroke-dasharray=\"3 3\" opacity=\"0.4\"/>",
        ));
    }

    for label in boxes.iter().filter(|b| b.visible) {
        let (ax, ay) = label.anchor;
        svg.push_str(&format!(
            "<line x1=\"{ax:.2}\" y1=\"{ay:.2}\" x2=\"{:.2}\" y2=\"{:.2}\" stroke=\"{LEADER_COLOR}\" stroke-width=\"0.8\"/>",
            label.x, label.y
        ));
        let (x, y, w, h) = label.rect();
        let stroke = if label.fixed { FIXED_STROKE } else { BOX_STROKE };
        svg.push_str(&format!(
            "<rect x=\"{x:.2}\" y=\"{y:.2}\" width=\"{w:.2}\" height=\"{h:.2}\" fill=\"#FFFFFF\" fill-opacity=\"0.7\" stroke=\"{stroke}\" stroke-width=\"1\"/>",
        ));
        svg.push_str(&format!(
            "<text x=\"{:.2}\" y=\"{:.2}\" font-family=\"sans-serif\" font-size=\"{:.1}\" fill=\"{TEXT_COLOR}\" text-anchor=\"middle\" dominant-baseline=\"central\">{}</text>",
            label.x,
            label.y,
            (h * 0.6).max(6.0),
            escape_xml(&label.text)
        ));
    }

    for label in boxes {
        let (ax, ay) = label.anchor;
        svg.push_str(&format!(
            "<circle cx=\"{ax:.2}\" cy=\"{ay:.2}\" r=\"3\" fill=\"{ANCHOR_COLOR}\"/>",
        ));
    }

    svg.push_str("</svg>");
    svg
}

pub fn write_output_svg(svg: &str, output: Option<&Path>) -> Result<()> {
    match output {
        Some(path) => {
            std::fs::write(path, svg)?;
        }
        None => {
            print!("{}", svg);
        }
    }
    Ok(())
}

#[cfg(feature = "png")]
pub fn write_overlay_png(svg: &str, output: &Path, viewport: Viewport) -> Result<()> {
    let mut opt = usvg::Options::default();
    opt.default_size = usvg::Size::from_wh(viewport.width, viewport.height)
        .ok_or_else(|| anyhow::anyhow!("viewport has no area"))?;

    let tree = usvg::Tree::from_str(svg, &opt)?;
    let size = tree.size().to_int_size();
    let mut pixmap = resvg::tiny_skia::Pixmap::new(size.width(), size.height())
        .ok_or_else(|| anyhow::anyhow!("Failed to allocate pixmap"))?;

    let mut pixmap_mut = pixmap.as_mut();
    resvg::render(&tree, resvg::tiny_skia::Transform::default(), &mut pixmap_mut);
    pixmap.save_png(output)?;
    Ok(())
}

fn escape_xml(input: &str) -> String {
    input
        .replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
        .replace('\'', "&apos;")
}
