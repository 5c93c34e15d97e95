//! Heading classification from span font metrics
//!
//! The section cutoff is the second-largest distinct bold font size. The
//! single largest bold size is assumed to be the document title or banner;
//! documents with several equally large title styles (cover page plus table
//! of contents, for example) are not handled specially.

use crate::spans::Span;
use crate::SectionError;
use log::debug;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;
use std::collections::HashSet;

/// Thresholds for heading classification
#[derive(Debug, Clone)]
pub struct HeadingConfig {
    /// Spans down to `cutoff - size_tolerance` still count as headings (default: 0.5)
    pub size_tolerance: f32,
    /// Page holding the headline zone (default: 1)
    pub headline_page: u32,
    /// Spans on `headline_page` whose top is above this offset are dropped
    /// (default: 200.0 points from the top edge)
    pub headline_zone_limit: f32,
}

impl Default for HeadingConfig {
    fn default() -> Self {
        Self {
            size_tolerance: 0.5,
            headline_page: 1,
            headline_zone_limit: 200.0,
        }
    }
}

impl HeadingConfig {
    fn in_headline_zone(&self, span: &Span) -> bool {
        span.page == self.headline_page && span.y < self.headline_zone_limit
    }
}

/// A span selected as a likely section title
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CandidateHeading {
    pub title: String,
    pub page: u32,
    pub font_size: f32,
}

impl From<&Span> for CandidateHeading {
    fn from(span: &Span) -> Self {
        Self {
            title: span.text.clone(),
            page: span.page,
            font_size: span.font_size,
        }
    }
}

/// Distinct font sizes of bold spans, largest first
pub fn distinct_bold_sizes(spans: &[Span]) -> Vec<f32> {
    let mut sizes: Vec<f32> = spans.iter().filter(|s| s.bold).map(|s| s.font_size).collect();
    sizes.sort_by(|a, b| b.total_cmp(a));
    sizes.dedup();
    sizes
}

/// The second-largest distinct bold font size
pub fn section_font_cutoff(spans: &[Span]) -> Result<f32, SectionError> {
    let sizes = distinct_bold_sizes(spans);
    match sizes.get(1) {
        Some(&cutoff) => Ok(cutoff),
        None => Err(SectionError::InsufficientHeadingSignal {
            distinct_bold_sizes: sizes.len(),
        }),
    }
}

/// Select candidate section headings with the default thresholds
pub fn classify_headings(spans: &[Span]) -> Result<Vec<CandidateHeading>, SectionError> {
    classify_headings_with_config(spans, &HeadingConfig::default())
}

/// Select candidate section headings
///
/// Output is ordered by descending font size; spans of equal size keep their
/// document order. Repeated titles are all kept.
pub fn classify_headings_with_config(
    spans: &[Span],
    config: &HeadingConfig,
) -> Result<Vec<CandidateHeading>, SectionError> {
    let cutoff = section_font_cutoff(spans)?;
    let min_size = cutoff - config.size_tolerance;

    // Vec::sort_by is stable
    let mut sorted: Vec<&Span> = spans.iter().collect();
    sorted.sort_by(|a, b| b.font_size.total_cmp(&a.font_size));

    let headings: Vec<CandidateHeading> = sorted
        .into_iter()
        .filter(|s| s.bold && s.font_size >= min_size && !config.in_headline_zone(s))
        .map(CandidateHeading::from)
        .collect();

    debug!(
        "section cutoff {} (min size {}): {} of {} spans kept",
        cutoff,
        min_size,
        headings.len(),
        spans.len()
    );
    Ok(headings)
}

static WHITESPACE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").unwrap());

/// Key used to detect repeated headings
pub fn normalize_title(title: &str) -> String {
    WHITESPACE
        .replace_all(title.trim(), " ")
        .to_lowercase()
}

/// Drop headings whose normalized title already appeared earlier
///
/// Running headers repeat the same title on every page; this keeps the first
/// occurrence and preserves order.
pub fn dedup_headings(headings: Vec<CandidateHeading>) -> Vec<CandidateHeading> {
    let mut seen = HashSet::new();
    headings
        .into_iter()
        .filter(|h| seen.insert(normalize_title(&h.title)))
        .collect()
}
