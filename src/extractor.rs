//! Layout extraction from PDF using lopdf
//!
//! Walks each page's content stream and rebuilds the page → block → line →
//! run tree that the span collector consumes. Text objects (`BT`..`ET`)
//! become text blocks, baseline changes start new lines, and every
//! text-showing operator becomes a run. Image XObjects painted with `Do`
//! become image blocks.

use crate::layout::{BBox, LayoutBlock, LayoutDocument, LayoutLine, LayoutPage, TextRun};
use crate::tounicode::{extract_stream_from_raw_pdf, ToUnicodeCMap};
use crate::SectionError;
use log::{debug, warn};
use lopdf::{Dictionary, Document, Object, ObjectId};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::Path;

/// US Letter, used when a page has no resolvable MediaBox
const DEFAULT_MEDIA_BOX: [f32; 4] = [0.0, 0.0, 612.0, 792.0];

/// Fraction of the font size above the baseline taken as the run's top edge
const ASCENT: f32 = 0.9;
/// Fraction of the font size below the baseline taken as the run's bottom edge
const DESCENT: f32 = 0.2;

/// Average glyph advance as a fraction of the font size
const AVG_GLYPH_WIDTH: f32 = 0.5;

/// Baselines closer than this belong to the same line
const Y_TOLERANCE: f32 = 3.0;

/// TJ adjustments at or below this (thousandths of text space) read as a word gap
const TJ_SPACE_THRESHOLD: f32 = -250.0;

/// Extract the layout tree from a PDF file
pub fn extract_layout<P: AsRef<Path>>(path: P) -> Result<LayoutDocument, SectionError> {
    let path = path.as_ref();
    let buffer = std::fs::read(path)
        .map_err(|e| SectionError::DocumentParse(format!("{}: {}", path.display(), e)))?;
    extract_layout_mem(&buffer)
}

/// Extract the layout tree from a PDF memory buffer
pub fn extract_layout_mem(buffer: &[u8]) -> Result<LayoutDocument, SectionError> {
    let doc = Document::load_mem(buffer)?;
    layout_from_doc(&doc, buffer)
}

fn layout_from_doc(doc: &Document, raw: &[u8]) -> Result<LayoutDocument, SectionError> {
    let pages = doc.get_pages();
    let mut layout = LayoutDocument {
        pages: Vec::with_capacity(pages.len()),
    };

    for (page_num, &page_id) in pages.iter() {
        layout
            .pages
            .push(extract_page_layout(doc, raw, page_id, *page_num)?);
    }

    debug!(
        "extracted layout: {} pages, {} text runs",
        layout.page_count(),
        layout.run_count()
    );
    Ok(layout)
}

/// Multiply two 2D transformation matrices
/// Matrix format: [a, b, c, d, e, f] representing:
/// | a  b  0 |
/// | c  d  0 |
/// | e  f  1 |
fn multiply_matrices(m1: &[f32; 6], m2: &[f32; 6]) -> [f32; 6] {
    [
        m1[0] * m2[0] + m1[1] * m2[2],
        m1[0] * m2[1] + m1[1] * m2[3],
        m1[2] * m2[0] + m1[3] * m2[2],
        m1[2] * m2[1] + m1[3] * m2[3],
        m1[4] * m2[0] + m1[5] * m2[2] + m2[4],
        m1[4] * m2[1] + m1[5] * m2[3] + m2[5],
    ]
}

/// Fonts available on a page, keyed by resource name (e.g. b"F1")
struct PageFonts<'a> {
    dicts: BTreeMap<Vec<u8>, &'a Dictionary>,
    base_names: HashMap<Vec<u8>, String>,
    cmaps: HashMap<Vec<u8>, ToUnicodeCMap>,
}

impl<'a> PageFonts<'a> {
    fn load(doc: &'a Document, page_id: ObjectId, raw: &[u8]) -> Self {
        let dicts = doc.get_page_fonts(page_id).unwrap_or_default();
        let mut base_names = HashMap::new();
        let mut cmaps = HashMap::new();

        for (name, dict) in &dicts {
            if let Some(base) = base_font_name(dict) {
                base_names.insert(name.clone(), base);
            }
            if is_composite_font(dict) {
                match load_tounicode(doc, dict, raw) {
                    Some(cmap) => {
                        cmaps.insert(name.clone(), cmap);
                    }
                    None => warn!(
                        "composite font {} has no usable ToUnicode map",
                        String::from_utf8_lossy(name)
                    ),
                }
            }
        }

        Self {
            dicts,
            base_names,
            cmaps,
        }
    }

    /// Base font name for a resource, falling back to the resource name itself
    fn display_name(&self, resource: &str) -> String {
        self.base_names
            .get(resource.as_bytes())
            .cloned()
            .unwrap_or_else(|| resource.to_string())
    }
}

fn base_font_name(font: &Dictionary) -> Option<String> {
    let name = font.get(b"BaseFont").ok()?.as_name().ok()?;
    let name = String::from_utf8_lossy(name);
    Some(strip_subset_tag(&name).to_string())
}

/// Remove a subset prefix such as "ABCDEF+" from an embedded font name
pub(crate) fn strip_subset_tag(name: &str) -> &str {
    match name.split_once('+') {
        Some((tag, rest)) if tag.len() == 6 && tag.bytes().all(|b| b.is_ascii_uppercase()) => {
            rest
        }
        _ => name,
    }
}

fn is_composite_font(font: &Dictionary) -> bool {
    font.get(b"Subtype")
        .and_then(|s| s.as_name())
        .map(|s| s == b"Type0")
        .unwrap_or(false)
}

fn load_tounicode(doc: &Document, font: &Dictionary, raw: &[u8]) -> Option<ToUnicodeCMap> {
    let id = font.get(b"ToUnicode").ok()?.as_reference().ok()?;

    let parsed = doc
        .get_object(id)
        .ok()
        .and_then(|obj| obj.as_stream().ok())
        .map(|stream| {
            stream
                .decompressed_content()
                .unwrap_or_else(|_| stream.content.clone())
        })
        .and_then(|content| ToUnicodeCMap::parse(&content));

    // lopdf sometimes fails to load streams of linearized files
    parsed.or_else(|| {
        extract_stream_from_raw_pdf(raw, id.0).and_then(|content| ToUnicodeCMap::parse(&content))
    })
}

/// Resolve the page's MediaBox, walking up the page tree for inherited values
fn page_media_box(doc: &Document, page_id: ObjectId) -> [f32; 4] {
    let mut current = doc.get_dictionary(page_id).ok();

    while let Some(dict) = current {
        if let Ok(obj) = dict.get(b"MediaBox") {
            let resolved = match obj {
                Object::Reference(id) => doc.get_object(*id).ok(),
                other => Some(other),
            };
            if let Some(Ok(array)) = resolved.map(|o| o.as_array()) {
                let nums: Vec<f32> = array.iter().filter_map(get_number).collect();
                if nums.len() == 4 {
                    return [nums[0], nums[1], nums[2], nums[3]];
                }
            }
        }
        current = dict
            .get(b"Parent")
            .and_then(|p| p.as_reference())
            .and_then(|id| doc.get_dictionary(id))
            .ok();
    }

    DEFAULT_MEDIA_BOX
}

/// Names of image XObjects in the page's resource dictionary
fn page_image_names(doc: &Document, page_id: ObjectId) -> HashSet<Vec<u8>> {
    let mut names = HashSet::new();

    let Ok(page_dict) = doc.get_dictionary(page_id) else {
        return names;
    };
    let resources = match page_dict.get(b"Resources") {
        Ok(Object::Reference(id)) => doc.get_dictionary(*id).ok(),
        Ok(Object::Dictionary(dict)) => Some(dict),
        _ => None,
    };
    let xobjects = match resources.and_then(|r| r.get(b"XObject").ok()) {
        Some(Object::Reference(id)) => doc.get_dictionary(*id).ok(),
        Some(Object::Dictionary(dict)) => Some(dict),
        _ => None,
    };

    if let Some(xobjects) = xobjects {
        for (name, value) in xobjects.iter() {
            let is_image = value
                .as_reference()
                .and_then(|id| doc.get_object(id))
                .and_then(|obj| obj.as_stream())
                .and_then(|stream| stream.dict.get(b"Subtype"))
                .and_then(|subtype| subtype.as_name())
                .map(|subtype| subtype == b"Image")
                .unwrap_or(false);
            if is_image {
                names.insert(name.clone());
            }
        }
    }

    names
}

/// Accumulates blocks and lines while the content stream is walked
struct PageBuilder {
    media_box: [f32; 4],
    blocks: Vec<LayoutBlock>,
    lines: Vec<LayoutLine>,
    current_line: LayoutLine,
    last_baseline: Option<f32>,
}

impl PageBuilder {
    fn new(media_box: [f32; 4]) -> Self {
        Self {
            media_box,
            blocks: Vec::new(),
            lines: Vec::new(),
            current_line: LayoutLine::default(),
            last_baseline: None,
        }
    }

    /// Convert a PDF user-space y (bottom-left origin) to a top-left offset
    fn to_top_origin(&self, y: f32) -> f32 {
        self.media_box[3] - y
    }

    fn push_run(&mut self, text: String, font_name: String, font_size: f32, x: f32, baseline: f32) {
        let new_line = self
            .last_baseline
            .map_or(false, |last| (last - baseline).abs() >= Y_TOLERANCE);
        if new_line {
            self.finish_line();
        }
        self.last_baseline = Some(baseline);

        let top = self.to_top_origin(baseline);
        let x0 = x - self.media_box[0];
        let width = text.chars().count() as f32 * font_size * AVG_GLYPH_WIDTH;
        self.current_line.runs.push(TextRun {
            text,
            font_size,
            font_name,
            bbox: BBox::new(
                x0,
                top - font_size * ASCENT,
                x0 + width,
                top + font_size * DESCENT,
            ),
        });
    }

    fn finish_line(&mut self) {
        if !self.current_line.runs.is_empty() {
            self.lines.push(std::mem::take(&mut self.current_line));
        }
    }

    fn finish_text_block(&mut self) {
        self.finish_line();
        self.last_baseline = None;
        if !self.lines.is_empty() {
            let lines = std::mem::take(&mut self.lines);
            self.blocks.push(LayoutBlock::text(lines));
        }
    }

    /// Image XObjects are painted into the unit square mapped by the CTM
    fn push_image(&mut self, ctm: &[f32; 6]) {
        let xs = [ctm[4], ctm[4] + ctm[0], ctm[4] + ctm[2], ctm[4] + ctm[0] + ctm[2]];
        let ys = [ctm[5], ctm[5] + ctm[1], ctm[5] + ctm[3], ctm[5] + ctm[1] + ctm[3]];
        let fold_min = |v: &[f32; 4]| v.iter().copied().fold(f32::INFINITY, f32::min);
        let fold_max = |v: &[f32; 4]| v.iter().copied().fold(f32::NEG_INFINITY, f32::max);

        let bbox = BBox::new(
            fold_min(&xs) - self.media_box[0],
            self.to_top_origin(fold_max(&ys)),
            fold_max(&xs) - self.media_box[0],
            self.to_top_origin(fold_min(&ys)),
        );
        self.blocks.push(LayoutBlock::image(bbox));
    }
}

/// Extract the block tree from a single page
fn extract_page_layout(
    doc: &Document,
    raw: &[u8],
    page_id: ObjectId,
    page_num: u32,
) -> Result<LayoutPage, SectionError> {
    use lopdf::content::Content;

    let fonts = PageFonts::load(doc, page_id, raw);
    let images = page_image_names(doc, page_id);
    let media_box = page_media_box(doc, page_id);

    let content_data = doc.get_page_content(page_id).map_err(|e| {
        SectionError::DocumentParse(format!("page {}: {}", page_num, e))
    })?;
    let content = Content::decode(&content_data).map_err(|e| {
        SectionError::DocumentParse(format!("page {} content stream: {}", page_num, e))
    })?;

    let mut page = PageBuilder::new(media_box);

    // Graphics state tracking
    let mut ctm = [1.0f32, 0.0, 0.0, 1.0, 0.0, 0.0];
    let mut ctm_stack: Vec<[f32; 6]> = Vec::new();

    // Text state tracking
    let mut current_font = String::new();
    let mut current_font_size: f32 = 12.0;
    let mut leading: Option<f32> = None;
    let mut text_matrix = [1.0f32, 0.0, 0.0, 1.0, 0.0, 0.0];
    let mut line_matrix = [1.0f32, 0.0, 0.0, 1.0, 0.0, 0.0];
    let mut in_text_block = false;

    for op in &content.operations {
        let show: Option<String> = match op.operator.as_str() {
            "q" => {
                ctm_stack.push(ctm);
                None
            }
            "Q" => {
                if let Some(saved) = ctm_stack.pop() {
                    ctm = saved;
                }
                None
            }
            "cm" => {
                if op.operands.len() >= 6 {
                    let new_matrix = [
                        get_number(&op.operands[0]).unwrap_or(1.0),
                        get_number(&op.operands[1]).unwrap_or(0.0),
                        get_number(&op.operands[2]).unwrap_or(0.0),
                        get_number(&op.operands[3]).unwrap_or(1.0),
                        get_number(&op.operands[4]).unwrap_or(0.0),
                        get_number(&op.operands[5]).unwrap_or(0.0),
                    ];
                    ctm = multiply_matrices(&new_matrix, &ctm);
                }
                None
            }
            "BT" => {
                in_text_block = true;
                text_matrix = [1.0, 0.0, 0.0, 1.0, 0.0, 0.0];
                line_matrix = [1.0, 0.0, 0.0, 1.0, 0.0, 0.0];
                None
            }
            "ET" => {
                in_text_block = false;
                page.finish_text_block();
                None
            }
            "Tf" => {
                if op.operands.len() >= 2 {
                    if let Ok(name) = op.operands[0].as_name() {
                        current_font = String::from_utf8_lossy(name).to_string();
                    }
                    if let Some(size) = get_number(&op.operands[1]) {
                        current_font_size = size;
                    }
                }
                None
            }
            "TL" => {
                leading = op.operands.first().and_then(get_number);
                None
            }
            "Td" | "TD" => {
                if op.operands.len() >= 2 {
                    let tx = get_number(&op.operands[0]).unwrap_or(0.0);
                    let ty = get_number(&op.operands[1]).unwrap_or(0.0);
                    if op.operator == "TD" {
                        leading = Some(-ty);
                    }
                    line_matrix = translate(&line_matrix, tx, ty);
                    text_matrix = line_matrix;
                }
                None
            }
            "Tm" => {
                if op.operands.len() >= 6 {
                    for (i, operand) in op.operands.iter().take(6).enumerate() {
                        text_matrix[i] =
                            get_number(operand).unwrap_or(if i == 0 || i == 3 { 1.0 } else { 0.0 });
                    }
                    line_matrix = text_matrix;
                }
                None
            }
            "T*" => {
                let step = leading.unwrap_or(current_font_size * 1.2);
                line_matrix = translate(&line_matrix, 0.0, -step);
                text_matrix = line_matrix;
                None
            }
            "Tj" => op
                .operands
                .first()
                .and_then(|o| decode_operand(o, doc, &fonts, &current_font)),
            "TJ" => op
                .operands
                .first()
                .and_then(|o| o.as_array().ok())
                .map(|array| decode_tj_array(array, doc, &fonts, &current_font)),
            "'" | "\"" => {
                let step = leading.unwrap_or(current_font_size * 1.2);
                line_matrix = translate(&line_matrix, 0.0, -step);
                text_matrix = line_matrix;
                // `"` carries word and character spacing before the string
                op.operands
                    .last()
                    .and_then(|o| decode_operand(o, doc, &fonts, &current_font))
            }
            "Do" => {
                let is_image = op
                    .operands
                    .first()
                    .and_then(|o| o.as_name().ok())
                    .map(|name| images.contains(name))
                    .unwrap_or(false);
                if is_image && !in_text_block {
                    page.push_image(&ctm);
                }
                None
            }
            _ => None,
        };

        let Some(text) = show else { continue };
        if !in_text_block || text.trim().is_empty() {
            continue;
        }

        let combined = multiply_matrices(&text_matrix, &ctm);
        let rendered_size = effective_font_size(current_font_size, &combined);
        page.push_run(
            text.clone(),
            fonts.display_name(&current_font),
            rendered_size,
            combined[4],
            combined[5],
        );

        // Advance along the baseline so consecutive shows do not overlap
        let advance = text.chars().count() as f32 * current_font_size * AVG_GLYPH_WIDTH;
        text_matrix = translate(&text_matrix, advance, 0.0);
    }

    if in_text_block {
        debug!("page {} ends inside a text object", page_num);
        page.finish_text_block();
    }

    Ok(LayoutPage {
        number: page_num,
        width: media_box[2] - media_box[0],
        height: media_box[3] - media_box[1],
        blocks: page.blocks,
    })
}

/// Apply a text-space translation to a text or line matrix
fn translate(matrix: &[f32; 6], tx: f32, ty: f32) -> [f32; 6] {
    multiply_matrices(&[1.0, 0.0, 0.0, 1.0, tx, ty], matrix)
}

/// Helper to get f32 from Object
fn get_number(obj: &Object) -> Option<f32> {
    match obj {
        Object::Integer(i) => Some(*i as f32),
        Object::Real(r) => Some(*r),
        _ => None,
    }
}

/// Compute effective font size from base size and text rendering matrix
fn effective_font_size(base_size: f32, matrix: &[f32; 6]) -> f32 {
    let scale_x = (matrix[0].powi(2) + matrix[1].powi(2)).sqrt();
    let scale_y = (matrix[2].powi(2) + matrix[3].powi(2)).sqrt();
    base_size * scale_x.max(scale_y)
}

fn decode_tj_array(
    array: &[Object],
    doc: &Document,
    fonts: &PageFonts,
    current_font: &str,
) -> String {
    let mut combined = String::new();
    for item in array {
        match get_number(item) {
            Some(adjust) if adjust <= TJ_SPACE_THRESHOLD => {
                if !combined.ends_with(' ') {
                    combined.push(' ');
                }
            }
            Some(_) => {}
            None => {
                if let Some(text) = decode_operand(item, doc, fonts, current_font) {
                    combined.push_str(&text);
                }
            }
        }
    }
    combined
}

/// Decode a string operand using the current font's ToUnicode map or encoding
fn decode_operand(
    obj: &Object,
    doc: &Document,
    fonts: &PageFonts,
    current_font: &str,
) -> Option<String> {
    let Object::String(bytes, _) = obj else {
        return None;
    };

    if let Some(cmap) = fonts.cmaps.get(current_font.as_bytes()) {
        return Some(cmap.decode_cids(bytes));
    }

    if let Some(font_dict) = fonts.dicts.get(current_font.as_bytes()) {
        if let Ok(encoding) = font_dict.get_font_encoding(doc) {
            if let Ok(text) = Document::decode_text(&encoding, bytes) {
                return Some(text);
            }
        }
    }

    // Fallback: try UTF-16BE then Latin-1
    if bytes.len() >= 2 && bytes[0] == 0xFE && bytes[1] == 0xFF {
        let utf16: Vec<u16> = bytes[2..]
            .chunks_exact(2)
            .map(|chunk| u16::from_be_bytes([chunk[0], chunk[1]]))
            .collect();
        return Some(String::from_utf16_lossy(&utf16));
    }

    Some(bytes.iter().map(|&b| b as char).collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strip_subset_tag() {
        assert_eq!(strip_subset_tag("ABCDEF+Arial-BoldMT"), "Arial-BoldMT");
        assert_eq!(strip_subset_tag("Helvetica-Bold"), "Helvetica-Bold");
        // Not a subset tag: wrong length / lowercase
        assert_eq!(strip_subset_tag("ABC+Foo"), "ABC+Foo");
        assert_eq!(strip_subset_tag("abcdef+Foo"), "abcdef+Foo");
    }

    #[test]
    fn test_effective_font_size_scales_with_matrix() {
        assert_eq!(effective_font_size(12.0, &[1.0, 0.0, 0.0, 1.0, 0.0, 0.0]), 12.0);
        assert_eq!(effective_font_size(1.0, &[18.0, 0.0, 0.0, 18.0, 50.0, 700.0]), 18.0);
    }

    #[test]
    fn test_translate_moves_origin() {
        let m = translate(&[2.0, 0.0, 0.0, 2.0, 10.0, 20.0], 5.0, -1.0);
        assert_eq!(m, [2.0, 0.0, 0.0, 2.0, 20.0, 18.0]);
    }

    #[test]
    fn test_page_builder_splits_lines_on_baseline_change() {
        let mut page = PageBuilder::new(DEFAULT_MEDIA_BOX);
        page.push_run("Left".into(), "Helvetica".into(), 12.0, 72.0, 700.0);
        page.push_run("Right".into(), "Helvetica".into(), 12.0, 200.0, 701.0);
        page.push_run("Below".into(), "Helvetica".into(), 12.0, 72.0, 680.0);
        page.finish_text_block();

        assert_eq!(page.blocks.len(), 1);
        let lines = &page.blocks[0].lines;
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0].runs.len(), 2);
        assert_eq!(lines[1].runs[0].text, "Below");
        // 792 - 700 = 92 points from the top edge to the baseline
        let bbox = lines[0].runs[0].bbox;
        assert!((bbox.y0 - (92.0 - 12.0 * ASCENT)).abs() < 1e-3);
    }

    #[test]
    fn test_push_image_converts_to_top_origin() {
        let mut page = PageBuilder::new(DEFAULT_MEDIA_BOX);
        page.push_image(&[100.0, 0.0, 0.0, 50.0, 72.0, 600.0]);
        let bbox = page.blocks[0].bbox;
        assert_eq!(bbox, BBox::new(72.0, 142.0, 172.0, 192.0));
        assert!(!page.blocks[0].is_text());
    }
}
