//! Span collection: flatten the layout tree into font-annotated text spans

use crate::layout::LayoutDocument;
use serde::Serialize;

/// Case-sensitive marker in a font name that flags a bold face
pub const BOLD_MARKER: &str = "Bold";

/// One rendered run of text with its font metrics and position
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Span {
    /// Trimmed, never empty
    pub text: String,
    pub font_size: f32,
    pub bold: bool,
    /// Page number (1-indexed)
    pub page: u32,
    /// Top of the run's bounding box (top-left origin, points)
    pub y: f32,
}

/// Whether a font name denotes a bold face
pub fn is_bold_font(font_name: &str) -> bool {
    font_name.contains(BOLD_MARKER)
}

/// Collect one span per non-empty text run, in page, block, line, run order
///
/// Image blocks contribute nothing. Runs whose text trims to empty are
/// dropped.
pub fn collect_spans(doc: &LayoutDocument) -> Vec<Span> {
    let mut spans = Vec::new();

    for (index, page) in doc.pages.iter().enumerate() {
        let page_number = index as u32 + 1;

        for block in page.blocks.iter().filter(|b| b.is_text()) {
            for run in block.lines.iter().flat_map(|line| line.runs.iter()) {
                let text = run.text.trim();
                if text.is_empty() {
                    continue;
                }
                spans.push(Span {
                    text: text.to_string(),
                    font_size: run.font_size,
                    bold: is_bold_font(&run.font_name),
                    page: page_number,
                    y: run.bbox.y0,
                });
            }
        }
    }

    spans
}
