//! Prompt construction for the section structuring request

use crate::headings::CandidateHeading;

/// Role given to the model for every request
pub const SYSTEM_PROMPT: &str = "You are a financial analyst parsing earnings reports.";

pub const START_MARKER: &str = "=== START ===";
pub const END_MARKER: &str = "=== END ===";

/// Section kinds the model is told to leave out
const EXCLUDED_SECTIONS: &[&str] = &[
    "Forward-Looking Statements",
    "About Company",
    "Investor Relations Contact",
];

/// Build the user message asking the model to turn candidate titles into
/// section descriptors
///
/// Titles are listed one per line between [`START_MARKER`] and
/// [`END_MARKER`], in the order given.
pub fn build_prompt(headings: &[CandidateHeading]) -> String {
    let titles: Vec<&str> = headings.iter().map(|h| h.title.as_str()).collect();
    let excluded: Vec<String> = EXCLUDED_SECTIONS
        .iter()
        .map(|name| format!("- {}", name))
        .collect();

    let parts = [
        "Below is a list of section titles and heading-like lines extracted from a company earnings PDF.".to_string(),
        [
            "Clean this list into proper sections:",
            "- Group duplicates or partial headings",
            "- Remove noise or broken lines",
            "- For each section, return a title, a 1-2 sentence description of what the section is about and a prompt for a language model.",
            "- The prompt will be used to re-generate this section for a future release",
        ]
        .join("\n"),
        [
            "Return an array of JSON objects in this format:",
            "[",
            "  {",
            "    \"title\": \"Section title\",",
            "    \"description\": \"Brief description of what this section typically covers\",",
            "    \"prompt\": \"Prompt to re-generate this section for a future release\"",
            "  },",
            "  ...",
            "]",
        ]
        .join("\n"),
        "Only include real section headings that appear in the list below. Do not make anything up.\n\
         If a section clearly resembles a topic or grouping include it even if it sounds regulatory or long."
            .to_string(),
        format!(
            "Only include important business-related sections. Do NOT include legal or template sections such as:\n{}",
            excluded.join("\n")
        ),
        "Focus on sections with financials, operations, strategy, commentary, or product updates."
            .to_string(),
        format!("{}\n{}\n{}", START_MARKER, titles.join("\n"), END_MARKER),
    ];

    parts.join("\n\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn heading(title: &str) -> CandidateHeading {
        CandidateHeading {
            title: title.to_string(),
            page: 1,
            font_size: 16.0,
        }
    }

    #[test]
    fn test_titles_listed_in_order_between_markers() {
        let prompt = build_prompt(&[heading("Revenue"), heading("Outlook"), heading("Revenue")]);
        assert!(prompt.ends_with("=== START ===\nRevenue\nOutlook\nRevenue\n=== END ==="));
    }

    #[test]
    fn test_empty_heading_list() {
        let prompt = build_prompt(&[]);
        assert!(prompt.contains("=== START ===\n\n=== END ==="));
    }

    #[test]
    fn test_mentions_output_shape_and_exclusions() {
        let prompt = build_prompt(&[heading("Cash Flow")]);
        assert!(prompt.contains("\"title\""));
        assert!(prompt.contains("\"description\""));
        assert!(prompt.contains("\"prompt\""));
        assert!(prompt.contains("- Forward-Looking Statements"));
        assert!(prompt.contains("- Investor Relations Contact"));
    }
}
