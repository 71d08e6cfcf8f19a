//! Meeting summaries through an external chat-completion API.

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::config::SummaryConfig;
use crate::error::{RelayError, Result};

/// Transcripts longer than this are cut before being sent upstream.
pub const MAX_TRANSCRIPT_CHARS: usize = 20_000;

const SYSTEM_PROMPT: &str = "You summarize video meetings. Reply with a short overview, \
the key discussion points, decisions made and action items with owners where known.";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Summary {
    pub summary: String,
    pub tokens_used: u64,
}

#[derive(Debug, Serialize)]
struct CompletionRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    max_tokens: u32,
    temperature: f32,
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: String,
}

#[derive(Debug, Deserialize)]
struct CompletionResponse {
    #[serde(default)]
    choices: Vec<Choice>,
    usage: Option<Usage>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChoiceMessage {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Usage {
    #[serde(default)]
    total_tokens: u64,
}

/// Build the user prompt from participants and transcript.
pub fn build_prompt(transcript: &str, participants: &[String]) -> String {
    let transcript: String = transcript.trim().chars().take(MAX_TRANSCRIPT_CHARS).collect();
    let who = if participants.is_empty() {
        "unknown".to_string()
    } else {
        participants.join(", ")
    };
    format!("Participants: {who}\n\nTranscript:\n{transcript}")
}

fn parse_completion(body: &str) -> Result<Summary> {
    let response: CompletionResponse = serde_json::from_str(body)
        .map_err(|e| RelayError::Upstream(format!("invalid completion response: {e}")))?;
    let summary = response
        .choices
        .into_iter()
        .find_map(|c| c.message.content)
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .ok_or_else(|| RelayError::Upstream("completion contained no summary".into()))?;
    Ok(Summary {
        summary,
        tokens_used: response.usage.map(|u| u.total_tokens).unwrap_or(0),
    })
}

pub struct SummaryClient {
    http: reqwest::Client,
    config: SummaryConfig,
}

impl SummaryClient {
    pub fn new(config: SummaryConfig) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| RelayError::Upstream(format!("failed to build HTTP client: {e}")))?;
        Ok(Self { http, config })
    }

    pub fn is_configured(&self) -> bool {
        self.config.api_key.is_some()
    }

    pub async fn summarize(&self, transcript: &str, participants: &[String]) -> Result<Summary> {
        if transcript.trim().is_empty() {
            return Err(RelayError::invalid("Transcript is required"));
        }
        let Some(api_key) = self.config.api_key.as_deref() else {
            return Err(RelayError::Unavailable("Summary service is not configured".into()));
        };

        let request = CompletionRequest {
            model: &self.config.model,
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: SYSTEM_PROMPT.to_string(),
                },
                ChatMessage {
                    role: "user",
                    content: build_prompt(transcript, participants),
                },
            ],
            max_tokens: 500,
            temperature: 0.3,
        };

        debug!(model = %self.config.model, participants = participants.len(), "Requesting summary");
        let response = self
            .http
            .post(&self.config.api_url)
            .bearer_auth(api_key)
            .json(&request)
            .send()
            .await
            .map_err(|e| RelayError::Upstream(e.to_string()))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| RelayError::Upstream(e.to_string()))?;
        if !status.is_success() {
            warn!(%status, "Summary API returned an error");
            return Err(RelayError::Upstream(format!("summary API returned {status}")));
        }
        parse_completion(&body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn config(api_key: Option<&str>) -> SummaryConfig {
        SummaryConfig {
            api_url: "http://127.0.0.1:9/v1/chat/completions".into(),
            api_key: api_key.map(str::to_string),
            model: "test-model".into(),
            timeout: Duration::from_secs(1),
        }
    }

    #[test]
    fn prompt_lists_participants() {
        let prompt = build_prompt("  hello there ", &["ana".into(), "bo".into()]);
        assert_eq!(prompt, "Participants: ana, bo\n\nTranscript:\nhello there");
        assert!(build_prompt("x", &[]).starts_with("Participants: unknown"));
    }

    #[test]
    fn prompt_truncates_long_transcripts() {
        let long = "a".repeat(MAX_TRANSCRIPT_CHARS + 10);
        let prompt = build_prompt(&long, &[]);
        assert_eq!(prompt.matches('a').count(), MAX_TRANSCRIPT_CHARS);
    }

    #[test]
    fn parses_completion_body() {
        let body = r#"{
            "choices": [{"message": {"role": "assistant", "content": " Key points... "}}],
            "usage": {"prompt_tokens": 10, "completion_tokens": 5, "total_tokens": 15}
        }"#;
        let summary = parse_completion(body).unwrap();
        assert_eq!(summary.summary, "Key points...");
        assert_eq!(summary.tokens_used, 15);
    }

    #[test]
    fn empty_completion_is_upstream_error() {
        let err = parse_completion(r#"{"choices": []}"#).unwrap_err();
        assert!(matches!(err, RelayError::Upstream(_)));
    }

    #[tokio::test]
    async fn rejects_blank_transcript_before_calling_upstream() {
        let client = SummaryClient::new(config(Some("key"))).unwrap();
        let err = client.summarize("   ", &[]).await.unwrap_err();
        assert!(matches!(err, RelayError::InvalidInput(_)));
    }

    #[tokio::test]
    async fn unconfigured_client_is_unavailable() {
        let client = SummaryClient::new(config(None)).unwrap();
        assert!(!client.is_configured());
        let err = client.summarize("we talked", &[]).await.unwrap_err();
        assert!(matches!(err, RelayError::Unavailable(_)));
    }
}
