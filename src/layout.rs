//! Page layout tree produced by the extractor
//!
//! The tree mirrors the page → block → line → run nesting that span-level
//! PDF renderers report. Coordinates are page-local with the origin at the
//! top-left corner and y growing downward, in PDF points.

/// Axis-aligned bounding box in page coordinates (top-left origin)
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct BBox {
    pub x0: f32,
    pub y0: f32,
    pub x1: f32,
    pub y1: f32,
}

impl BBox {
    pub fn new(x0: f32, y0: f32, x1: f32, y1: f32) -> Self {
        Self { x0, y0, x1, y1 }
    }
}

/// Block discriminant, numbered the way span-level renderers number them
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockKind {
    Text = 0,
    Image = 1,
}

/// One rendered run of text sharing a font and size
#[derive(Debug, Clone)]
pub struct TextRun {
    pub text: String,
    pub font_size: f32,
    /// Base font name with any subset tag removed (e.g. "Helvetica-Bold")
    pub font_name: String,
    pub bbox: BBox,
}

/// Runs sharing a baseline
#[derive(Debug, Clone, Default)]
pub struct LayoutLine {
    pub runs: Vec<TextRun>,
}

#[derive(Debug, Clone)]
pub struct LayoutBlock {
    pub kind: BlockKind,
    pub bbox: BBox,
    /// Always empty for image blocks
    pub lines: Vec<LayoutLine>,
}

impl LayoutBlock {
    pub fn text(lines: Vec<LayoutLine>) -> Self {
        let bbox = union_bbox(lines.iter().flat_map(|l| l.runs.iter().map(|r| r.bbox)));
        Self {
            kind: BlockKind::Text,
            bbox,
            lines,
        }
    }

    pub fn image(bbox: BBox) -> Self {
        Self {
            kind: BlockKind::Image,
            bbox,
            lines: Vec::new(),
        }
    }

    pub fn is_text(&self) -> bool {
        self.kind == BlockKind::Text
    }
}

#[derive(Debug, Clone)]
pub struct LayoutPage {
    /// Page number (1-indexed)
    pub number: u32,
    pub width: f32,
    pub height: f32,
    pub blocks: Vec<LayoutBlock>,
}

/// A parsed document, pages in document order
#[derive(Debug, Clone, Default)]
pub struct LayoutDocument {
    pub pages: Vec<LayoutPage>,
}

impl LayoutDocument {
    pub fn page_count(&self) -> usize {
        self.pages.len()
    }

    /// Total number of text runs across all text blocks
    pub fn run_count(&self) -> usize {
        self.pages
            .iter()
            .flat_map(|p| p.blocks.iter())
            .filter(|b| b.is_text())
            .flat_map(|b| b.lines.iter())
            .map(|l| l.runs.len())
            .sum()
    }
}

fn union_bbox(boxes: impl Iterator<Item = BBox>) -> BBox {
    boxes
        .reduce(|a, b| BBox {
            x0: a.x0.min(b.x0),
            y0: a.y0.min(b.y0),
            x1: a.x1.max(b.x1),
            y1: a.y1.max(b.y1),
        })
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run(text: &str, y0: f32) -> TextRun {
        TextRun {
            text: text.into(),
            font_size: 12.0,
            font_name: "Helvetica".into(),
            bbox: BBox::new(72.0, y0, 140.0, y0 + 12.0),
        }
    }

    #[test]
    fn test_text_block_bbox_covers_runs() {
        let block = LayoutBlock::text(vec![
            LayoutLine {
                runs: vec![run("First", 100.0)],
            },
            LayoutLine {
                runs: vec![run("Second", 120.0)],
            },
        ]);
        assert!(block.is_text());
        assert_eq!(block.bbox, BBox::new(72.0, 100.0, 140.0, 132.0));
    }

    #[test]
    fn test_run_count_skips_image_blocks() {
        let doc = LayoutDocument {
            pages: vec![LayoutPage {
                number: 1,
                width: 612.0,
                height: 792.0,
                blocks: vec![
                    LayoutBlock::image(BBox::new(0.0, 0.0, 100.0, 100.0)),
                    LayoutBlock::text(vec![LayoutLine {
                        runs: vec![run("A", 10.0), run("B", 10.0)],
                    }]),
                ],
            }],
        };
        assert_eq!(doc.page_count(), 1);
        assert_eq!(doc.run_count(), 2);
        assert_eq!(BlockKind::Image as u8, 1);
    }
}
