//! Section structuring through a chat-completion language model
//!
//! The model receives the candidate titles and answers with a JSON array of
//! section descriptors, sometimes wrapped in a fenced code block.

use crate::headings::CandidateHeading;
use crate::prompt::{build_prompt, SYSTEM_PROMPT};
use crate::SectionError;
use log::{debug, info};
use once_cell::sync::Lazy;
use regex::Regex;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use std::time::Duration;

pub const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";
pub const DEFAULT_MODEL: &str = "gpt-4o";

/// One section type as described by the model
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SectionDescriptor {
    pub title: String,
    pub description: String,
    /// Instruction for regenerating this section in a future document
    pub prompt: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: "system".into(),
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".into(),
            content: content.into(),
        }
    }
}

/// A one-shot chat completion service
pub trait CompletionClient {
    /// Send the conversation and return the assistant's reply text
    fn complete(&self, messages: &[ChatMessage]) -> Result<String, SectionError>;
}

/// Connection settings for an OpenAI-compatible chat completions endpoint
#[derive(Debug, Clone)]
pub struct StructuringConfig {
    pub api_key: String,
    /// API root without the trailing `/chat/completions` (default: OpenAI)
    pub base_url: String,
    /// Model name (default: "gpt-4o")
    pub model: String,
    /// Sampling temperature (default: 0.3)
    pub temperature: f32,
    /// Whole-request timeout (default: 120s)
    pub timeout: Duration,
}

impl Default for StructuringConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            base_url: DEFAULT_BASE_URL.to_string(),
            model: DEFAULT_MODEL.to_string(),
            temperature: 0.3,
            timeout: Duration::from_secs(120),
        }
    }
}

#[derive(Debug, Serialize)]
struct ChatCompletionRequest<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    temperature: f32,
}

#[derive(Debug, Deserialize)]
struct ChatCompletionResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatReply,
}

#[derive(Debug, Deserialize)]
struct ChatReply {
    content: Option<String>,
}

/// Blocking client for `POST {base_url}/chat/completions`
pub struct OpenAiClient {
    config: StructuringConfig,
    http: reqwest::blocking::Client,
}

impl OpenAiClient {
    pub fn new(config: StructuringConfig) -> Result<Self, SectionError> {
        if config.api_key.trim().is_empty() {
            return Err(SectionError::MissingApiKey);
        }
        let http = reqwest::blocking::Client::builder()
            .timeout(config.timeout)
            .build()?;
        Ok(Self { config, http })
    }

    fn endpoint(&self) -> String {
        format!("{}/chat/completions", self.config.base_url.trim_end_matches('/'))
    }
}

impl CompletionClient for OpenAiClient {
    fn complete(&self, messages: &[ChatMessage]) -> Result<String, SectionError> {
        let request = ChatCompletionRequest {
            model: &self.config.model,
            messages,
            temperature: self.config.temperature,
        };

        info!("requesting section structure from {}", self.config.model);
        let resp = self
            .http
            .post(self.endpoint())
            .bearer_auth(&self.config.api_key)
            .json(&request)
            .send()?;

        let status = resp.status();
        let body = resp.text()?;
        completion_content(status, &body)
    }
}

/// Extract the assistant's reply text from a chat completions response
fn completion_content(status: StatusCode, body: &str) -> Result<String, SectionError> {
    if !status.is_success() {
        return Err(SectionError::Collaborator(format!("HTTP {}: {}", status, body)));
    }

    let completion: ChatCompletionResponse = serde_json::from_str(body)
        .map_err(|e| SectionError::CollaboratorResponse(format!("malformed completion: {}", e)))?;

    completion
        .choices
        .into_iter()
        .next()
        .and_then(|choice| choice.message.content)
        .ok_or_else(|| SectionError::CollaboratorResponse("completion has no content".into()))
}

static CODE_FENCE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)^```[A-Za-z0-9_-]*[ \t]*\r?\n?(.*?)\s*(?:```)?$").unwrap());

/// Remove a surrounding fenced code block marker (```` ```json ```` or ```` ``` ````)
pub fn strip_code_fence(reply: &str) -> &str {
    let trimmed = reply.trim();
    CODE_FENCE
        .captures(trimmed)
        .and_then(|caps| caps.get(1))
        .map(|body| body.as_str().trim())
        .unwrap_or(trimmed)
}

/// Parse the model's reply into section descriptors
pub fn parse_section_descriptors(reply: &str) -> Result<Vec<SectionDescriptor>, SectionError> {
    serde_json::from_str(strip_code_fence(reply))
        .map_err(|e| SectionError::CollaboratorResponse(format!("expected a JSON array of sections: {}", e)))
}

/// Ask the model to clean the candidate headings into section descriptors
pub fn structure_sections(
    client: &dyn CompletionClient,
    headings: &[CandidateHeading],
) -> Result<Vec<SectionDescriptor>, SectionError> {
    let messages = [
        ChatMessage::system(SYSTEM_PROMPT),
        ChatMessage::user(build_prompt(headings)),
    ];
    let reply = client.complete(&messages)?;
    debug!("structuring reply: {} bytes", reply.len());

    let sections = parse_section_descriptors(&reply)?;
    info!(
        "{} candidate headings structured into {} sections",
        headings.len(),
        sections.len()
    );
    Ok(sections)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;

    struct FakeClient {
        reply: String,
        seen: RefCell<Vec<ChatMessage>>,
    }

    impl FakeClient {
        fn new(reply: &str) -> Self {
            Self {
                reply: reply.to_string(),
                seen: RefCell::new(Vec::new()),
            }
        }
    }

    impl CompletionClient for FakeClient {
        fn complete(&self, messages: &[ChatMessage]) -> Result<String, SectionError> {
            self.seen.borrow_mut().extend_from_slice(messages);
            Ok(self.reply.clone())
        }
    }

    const REPLY: &str = r#"[{"title":"Revenue","description":"Top-line results.","prompt":"Summarize revenue."}]"#;

    #[test]
    fn test_strip_code_fence() {
        assert_eq!(strip_code_fence("```json\n[1]\n```"), "[1]");
        assert_eq!(strip_code_fence("  ```\n[]\n```  "), "[]");
        assert_eq!(strip_code_fence("```json[]```"), "[]");
        assert_eq!(strip_code_fence("```json\n[2]"), "[2]");
        assert_eq!(strip_code_fence(" [3] "), "[3]");
    }

    #[test]
    fn test_parse_fenced_reply() {
        let reply = format!("```json\n{}\n```", REPLY);
        let sections = parse_section_descriptors(&reply).unwrap();
        assert_eq!(
            sections,
            vec![SectionDescriptor {
                title: "Revenue".into(),
                description: "Top-line results.".into(),
                prompt: "Summarize revenue.".into(),
            }]
        );
    }

    #[test]
    fn test_parse_rejects_wrong_shapes() {
        for reply in [
            "Sure! Here are the sections.",
            r#"{"title":"Revenue","description":"x","prompt":"y"}"#,
            r#"[{"title":"Revenue"}]"#,
        ] {
            assert!(matches!(
                parse_section_descriptors(reply),
                Err(SectionError::CollaboratorResponse(_))
            ));
        }
    }

    #[test]
    fn test_structure_sections_sends_system_and_user_messages() {
        let client = FakeClient::new(REPLY);
        let headings = vec![CandidateHeading {
            title: "Revenue".into(),
            page: 2,
            font_size: 16.0,
        }];

        let sections = structure_sections(&client, &headings).unwrap();
        assert_eq!(sections.len(), 1);

        let seen = client.seen.borrow();
        assert_eq!(seen.len(), 2);
        assert_eq!(seen[0], ChatMessage::system(SYSTEM_PROMPT));
        assert_eq!(seen[1].role, "user");
        assert!(seen[1].content.contains("=== START ===\nRevenue\n=== END ==="));
    }

    #[test]
    fn test_structure_sections_propagates_malformed_reply() {
        let client = FakeClient::new("not json");
        let err = structure_sections(&client, &[]).unwrap_err();
        assert!(matches!(err, SectionError::CollaboratorResponse(_)));
    }

    #[test]
    fn test_openai_client_requires_api_key() {
        let err = OpenAiClient::new(StructuringConfig::default()).err().unwrap();
        assert!(matches!(err, SectionError::MissingApiKey));
    }

    #[test]
    fn test_request_body_shape() {
        let messages = [ChatMessage::user("hi")];
        let request = ChatCompletionRequest {
            model: DEFAULT_MODEL,
            messages: &messages,
            temperature: 0.5,
        };
        let body = serde_json::to_value(&request).unwrap();
        assert_eq!(body["model"], "gpt-4o");
        assert_eq!(body["messages"][0]["role"], "user");
        assert_eq!(body["messages"][0]["content"], "hi");
        assert_eq!(body["temperature"], 0.5);
    }

    #[test]
    fn test_completion_content_returns_first_choice() {
        let body = r#"{"choices":[{"message":{"role":"assistant","content":"[]"}},{"message":{"content":"x"}}]}"#;
        assert_eq!(completion_content(StatusCode::OK, body).unwrap(), "[]");
    }

    #[test]
    fn test_completion_content_error_status() {
        let err = completion_content(StatusCode::UNAUTHORIZED, r#"{"error":"bad key"}"#).unwrap_err();
        match err {
            SectionError::Collaborator(msg) => {
                assert!(msg.contains("401"));
                assert!(msg.contains("bad key"));
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[test]
    fn test_completion_content_rejects_unusable_bodies() {
        for body in [
            "<html>gateway timeout</html>",
            r#"{"id":"chatcmpl-1"}"#,
            r#"{"choices":[]}"#,
            r#"{"choices":[{"message":{"role":"assistant","content":null}}]}"#,
        ] {
            assert!(
                matches!(
                    completion_content(StatusCode::OK, body),
                    Err(SectionError::CollaboratorResponse(_))
                ),
                "body: {}",
                body
            );
        }
    }

    #[test]
    fn test_endpoint_joins_base_url() {
        let client = OpenAiClient::new(StructuringConfig {
            api_key: "sk-test".into(),
            base_url: "http://localhost:8080/v1/".into(),
            ..StructuringConfig::default()
        })
        .unwrap();
        assert_eq!(client.endpoint(), "http://localhost:8080/v1/chat/completions");
    }
}
