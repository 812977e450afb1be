use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::{json, Value};
use thiserror::Error;
use tracing::{error, info};

use crate::config::Config;
use crate::schema::SchemaViolation;

/// Sampling settings for formulation requests: varied but plausible output.
pub const TEMPERATURE: f64 = 0.7;
pub const TOP_P: f64 = 0.95;

#[derive(Debug, Error)]
pub enum GenerationError {
    #[error("model call failed: {0}")]
    Transport(String),
    #[error("model reply violates the formulation schema: {0}")]
    Schema(#[from] SchemaViolation),
}

impl GenerationError {
    pub fn kind(&self) -> &'static str {
        match self {
            GenerationError::Transport(_) => "transport",
            GenerationError::Schema(_) => "schema_violation",
        }
    }
}

/// A generative model that can answer a prompt with schema-constrained JSON.
#[async_trait]
pub trait FormulationModel: Send + Sync {
    /// Returns the model's raw reply text. Implementations make exactly one
    /// outbound call and do not retry.
    async fn generate_json(&self, prompt: &str, schema: &Value) -> Result<String, GenerationError>;
}

pub struct GeminiClient {
    client: Client,
    api_key: String,
    base_url: String,
    model: String,
}

impl GeminiClient {
    pub fn new(config: &Config) -> Result<Self, GenerationError> {
        let mut builder = Client::builder();
        if let Some(timeout) = config.request_timeout {
            builder = builder.timeout(timeout);
        }
        let client = builder.build().map_err(|e| GenerationError::Transport(e.to_string()))?;
        Ok(Self {
            client,
            api_key: config.api_key.clone(),
            base_url: config.api_base.clone(),
            model: config.model.clone(),
        })
    }

    fn endpoint(&self) -> String {
        format!("{}/models/{}:generateContent?key={}", self.base_url, self.model, self.api_key)
    }

    fn request_body(prompt: &str, schema: &Value) -> Value {
        json!({
            "contents": [{
                "parts": [{"text": prompt}]
            }],
            "generationConfig": {
                "responseMimeType": "application/json",
                "responseSchema": schema,
                "temperature": TEMPERATURE,
                "topP": TOP_P,
                "candidateCount": 1
            }
        })
    }
}

#[async_trait]
impl FormulationModel for GeminiClient {
    async fn generate_json(&self, prompt: &str, schema: &Value) -> Result<String, GenerationError> {
        let url = self.endpoint();
        info!("🔗 Making request to: {}", url.replace(&self.api_key, "***"));
        info!("📤 Prompt ({} chars): {}", prompt.chars().count(), preview(prompt, 120));

        let response = self
            .client
            .post(&url)
            .json(&Self::request_body(prompt, schema))
            .send()
            .await
            .map_err(|e| GenerationError::Transport(e.to_string().replace(&self.api_key, "***")))?;

        let status = response.status();
        info!("📥 Response status: {}", status);

        let response_text = response
            .text()
            .await
            .map_err(|e| GenerationError::Transport(e.to_string()))?;

        if !status.is_success() {
            error!("❌ Gemini API error response: {}", preview(&response_text, 500));
            return Err(GenerationError::Transport(format!(
                "status={} body={}",
                status,
                preview(&response_text, 500)
            )));
        }

        info!("📥 Raw Gemini API response: {}", preview(&response_text, 1000));

        let parsed: GeminiResponse = serde_json::from_str(&response_text)
            .map_err(|e| GenerationError::Transport(format!("unexpected response envelope: {e}")))?;

        extract_text(&parsed).ok_or_else(|| {
            let reason = parsed
                .prompt_feedback
                .and_then(|f| f.block_reason)
                .map(|r| format!("prompt blocked: {r}"))
                .unwrap_or_else(|| "no text content in response".to_string());
            GenerationError::Transport(reason)
        })
    }
}

/// Shortens `text` to at most `max` characters for log lines.
pub fn preview(text: &str, max: usize) -> String {
    match text.char_indices().nth(max) {
        Some((cut, _)) => format!("{}...[{} chars total]", &text[..cut], text.chars().count()),
        None => text.to_string(),
    }
}

// --- Response Parsing Helpers ---

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GeminiResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
    #[serde(default)]
    prompt_feedback: Option<PromptFeedback>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PromptFeedback {
    #[serde(default)]
    block_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    #[serde(default)]
    content: Content,
}

#[derive(Debug, Deserialize, Default)]
struct Content {
    #[serde(default)]
    parts: Vec<Part>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum Part {
    Text { text: String },
    Other(serde::de::IgnoredAny),
}

/// Concatenates the text parts of the first candidate.
fn extract_text(resp: &GeminiResponse) -> Option<String> {
    let candidate = resp.candidates.first()?;
    let text: String = candidate
        .content
        .parts
        .iter()
        .filter_map(|p| match p {
            Part::Text { text } => Some(text.as_str()),
            Part::Other(_) => None,
        })
        .collect();
    if text.trim().is_empty() { None } else { Some(text) }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{
        extract::Path,
        http::StatusCode,
        response::{IntoResponse, Response},
        routing::post,
        Json, Router,
    };
    use pretty_assertions::assert_eq;

    #[test]
    fn request_body_carries_schema_and_sampling() {
        let schema = json!({"type": "OBJECT"});
        let body = GeminiClient::request_body("prompt text", &schema);
        assert_eq!(body["contents"][0]["parts"][0]["text"], "prompt text");
        let config = &body["generationConfig"];
        assert_eq!(config["responseMimeType"], "application/json");
        assert_eq!(config["responseSchema"], schema);
        assert_eq!(config["temperature"], 0.7);
        assert_eq!(config["topP"], 0.95);
    }

    #[test]
    fn endpoint_uses_configured_model() {
        let config = Config::from_lookup(|k| match k {
            "GEMINI_API_KEY" => Some("secret".into()),
            "GEMINI_API_BASE" => Some("http://127.0.0.1:1/v1beta".into()),
            _ => None,
        })
        .unwrap();
        let client = GeminiClient::new(&config).unwrap();
        assert_eq!(
            client.endpoint(),
            "http://127.0.0.1:1/v1beta/models/gemini-2.5-flash:generateContent?key=secret"
        );
    }

    #[test]
    fn text_parts_are_joined() {
        let raw = r#"{"candidates":[{"content":{"parts":[
            {"text":"```json\n{\"a\":"},
            {"thought": true},
            {"text":"1}\n```"}
        ]}}]}"#;
        let parsed: GeminiResponse = serde_json::from_str(raw).unwrap();
        assert_eq!(extract_text(&parsed).as_deref(), Some("```json\n{\"a\":1}\n```"));
    }

    #[test]
    fn empty_candidates_yield_nothing() {
        let parsed: GeminiResponse =
            serde_json::from_str(r#"{"promptFeedback":{"blockReason":"SAFETY"}}"#).unwrap();
        assert_eq!(extract_text(&parsed), None);
        assert_eq!(parsed.prompt_feedback.unwrap().block_reason.as_deref(), Some("SAFETY"));
    }

    async fn mock_gemini(Path(call): Path<String>, Json(body): Json<Value>) -> Response {
        assert_eq!(body["generationConfig"]["responseMimeType"], "application/json");
        match call.split(':').next().unwrap_or_default() {
            "quota" => (StatusCode::TOO_MANY_REQUESTS, "quota").into_response(),
            "blocked" => Json(json!({"promptFeedback": {"blockReason": "SAFETY"}})).into_response(),
            "garbage" => "<html>proxy error</html>".into_response(),
            _ => Json(json!({"candidates": [{"content": {"parts": [{"text": "```json\n{}\n```"}]}}]}))
                .into_response(),
        }
    }

    /// Serves a stand-in Gemini endpoint and returns a client pointed at it,
    /// calling `model`.
    async fn client_for(model: &str) -> GeminiClient {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let app = Router::new().route("/v1beta/models/:call", post(mock_gemini));
        tokio::spawn(async move { axum::serve(listener, app).await.unwrap() });

        let base = format!("http://{addr}/v1beta");
        let model = model.to_string();
        let config = Config::from_lookup(|k| match k {
            "GEMINI_API_KEY" => Some("test-key".into()),
            "GEMINI_API_BASE" => Some(base.clone()),
            "GEMINI_MODEL" => Some(model.clone()),
            _ => None,
        })
        .unwrap();
        GeminiClient::new(&config).unwrap()
    }

    #[tokio::test]
    async fn non_success_status_is_transport_error() {
        let client = client_for("quota").await;
        match client.generate_json("p", &json!({"type": "OBJECT"})).await {
            Err(GenerationError::Transport(msg)) => {
                assert!(msg.starts_with("status=429"), "{msg}");
                assert!(msg.contains("quota"));
            }
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[tokio::test]
    async fn blocked_prompt_is_transport_error() {
        let client = client_for("blocked").await;
        match client.generate_json("p", &json!({"type": "OBJECT"})).await {
            Err(GenerationError::Transport(msg)) => assert_eq!(msg, "prompt blocked: SAFETY"),
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[tokio::test]
    async fn unexpected_envelope_is_transport_error() {
        let client = client_for("garbage").await;
        match client.generate_json("p", &json!({"type": "OBJECT"})).await {
            Err(GenerationError::Transport(msg)) => assert!(msg.starts_with("unexpected response envelope")),
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[tokio::test]
    async fn fenced_reply_text_is_returned_untouched() {
        let client = client_for("gemini-2.5-flash").await;
        let text = client.generate_json("p", &json!({"type": "OBJECT"})).await.unwrap();
        assert_eq!(text, "```json\n{}\n```");
    }

    #[test]
    fn preview_respects_char_boundaries() {
        assert_eq!(preview("処方開発", 10), "処方開発");
        assert_eq!(preview("処方開発", 2), "処方...[4 chars total]");
    }

    #[test]
    fn error_kinds() {
        assert_eq!(GenerationError::Transport("x".into()).kind(), "transport");
        let schema: GenerationError = SchemaViolation::MissingField("phases".into()).into();
        assert_eq!(schema.kind(), "schema_violation");
    }
}
