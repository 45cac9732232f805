use crate::config::{LabelConfig, TextCase};

pub const ELLIPSIS: char = '\u{2026}';

#[derive(Debug, Clone, PartialEq)]
pub struct TextBlock {
    pub text: String,
    pub width: f32,
    pub height: f32,
}

/// Resolve the display text and its estimated screen box.
pub fn measure_label(raw: &str, font_size: f32, config: &LabelConfig) -> Option<TextBlock> {
    let normalized = normalize_whitespace(raw);
    if normalized.is_empty() {
        return None;
    }
    let cased = apply_case(&normalized, config.text_case);
    let text = truncate_with_ellipsis(&cased, config.max_label_length);
    let (width, height) = estimate_box(&text, font_size, config);
    Some(TextBlock {
        text,
        width,
        height,
    })
}

pub fn apply_case(text: &str, case: TextCase) -> String {
    match case {
        TextCase::None => text.to_string(),
        TextCase::Upper => text.to_uppercase(),
        TextCase::Lower => text.to_lowercase(),
        TextCase::Capitalize => capitalize_words(text),
    }
}

fn capitalize_words(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut at_word_start = true;
    for ch in text.chars() {
        if at_word_start && ch.is_alphabetic() {
            out.extend(ch.to_uppercase());
            at_word_start = false;
        } else {
            out.push(ch);
            at_word_start = ch.is_whitespace() || ch == '-';
        }
    }
    out
}

/// Cut to `max_chars` characters, drop trailing whitespace and append `…`.
/// A limit of zero disables truncation.
pub fn truncate_with_ellipsis(text: &str, max_chars: usize) -> String {
    if max_chars == 0 || text.chars().count() <= max_chars {
        return text.to_string();
    }
    let mut cut: String = text.chars().take(max_chars).collect();
    let trimmed_len = cut.trim_end().len();
    cut.truncate(trimmed_len);
    cut.push(ELLIPSIS);
    cut
}

/// Character count times font size; labels are single line.
pub fn estimate_box(text: &str, font_size: f32, config: &LabelConfig) -> (f32, f32) {
    let chars = text.chars().count().max(1) as f32;
    let font_size = font_size.max(1.0);
    let pad = config.box_padding.max(0.0);
    let width = chars * font_size * config.char_width_ratio + pad * 2.0;
    let height = font_size * config.line_height + pad * 2.0;
    (width, height)
}

fn normalize_whitespace(text: &str) -> String {
    let replaced = text
        .replace("<br/>", " ")
        .replace("<br>", " ")
        .replace("\\n", " ");
    replaced.split_whitespace().collect::<Vec<_>>().join(" ")
}
