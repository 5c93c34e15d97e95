//! Section heading detection for PDF reports
//!
//! This crate provides:
//! - Layout extraction (page → block → line → run) from PDFs using lopdf
//! - Span collection with font size, weight and position
//! - Heading classification from the bold font-size population
//! - Structuring of candidate headings into section descriptors by a
//!   chat-completion language model

pub mod extractor;
pub mod headings;
pub mod layout;
pub mod prompt;
pub mod spans;
pub mod structuring;
pub mod tounicode;

pub use extractor::{extract_layout, extract_layout_mem};
pub use headings::{
    classify_headings, classify_headings_with_config, dedup_headings, section_font_cutoff,
    CandidateHeading, HeadingConfig,
};
pub use layout::{BBox, BlockKind, LayoutBlock, LayoutDocument, LayoutLine, LayoutPage, TextRun};
pub use spans::{collect_spans, is_bold_font, Span};
pub use structuring::{
    parse_section_descriptors, strip_code_fence, structure_sections, ChatMessage, CompletionClient,
    OpenAiClient, SectionDescriptor, StructuringConfig,
};

use std::path::Path;

/// Collect all text spans from a PDF file
pub fn extract_spans<P: AsRef<Path>>(path: P) -> Result<Vec<Span>, SectionError> {
    let layout = extract_layout(path)?;
    Ok(collect_spans(&layout))
}

/// Collect all text spans from a PDF memory buffer
pub fn extract_spans_mem(buffer: &[u8]) -> Result<Vec<Span>, SectionError> {
    let layout = extract_layout_mem(buffer)?;
    Ok(collect_spans(&layout))
}

/// Extract candidate section headings from a PDF file
///
/// Runs layout extraction, span collection and heading classification.
pub fn extract_section_titles<P: AsRef<Path>>(
    path: P,
    config: &HeadingConfig,
) -> Result<Vec<CandidateHeading>, SectionError> {
    let spans = extract_spans(path)?;
    classify_headings_with_config(&spans, config)
}

/// Extract candidate section headings from a PDF memory buffer
pub fn extract_section_titles_mem(
    buffer: &[u8],
    config: &HeadingConfig,
) -> Result<Vec<CandidateHeading>, SectionError> {
    let spans = extract_spans_mem(buffer)?;
    classify_headings_with_config(&spans, config)
}

#[derive(Debug, thiserror::Error)]
pub enum SectionError {
    #[error("PDF parsing error: {0}")]
    DocumentParse(String),
    #[error(
        "not enough heading signal: found {distinct_bold_sizes} distinct bold font size(s), need at least 2"
    )]
    InsufficientHeadingSignal { distinct_bold_sizes: usize },
    #[error("structuring service request failed: {0}")]
    Collaborator(String),
    #[error("unexpected structuring response: {0}")]
    CollaboratorResponse(String),
    #[error("OPENAI_API_KEY is not set")]
    MissingApiKey,
}

impl From<lopdf::Error> for SectionError {
    fn from(e: lopdf::Error) -> Self {
        SectionError::DocumentParse(e.to_string())
    }
}

impl From<reqwest::Error> for SectionError {
    fn from(e: reqwest::Error) -> Self {
        SectionError::Collaborator(e.to_string())
    }
}
