//! Vertex AI `generateContent` client.

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use snafu::prelude::*;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, warn};
use url::Url;

use super::{GenerationResponse, TextGenerator};
use crate::emit;
use crate::error::{
    GenerateApiSnafu, GenerateCredentialsSnafu, GenerateEndpointSnafu, GenerateError,
    GenerateHttpSnafu, GenerateResponseSnafu,
};
use crate::gcp::{self, CredentialFile};
use crate::metrics::events::{GenerationCompleted, RequestStatus};

/// Connection and sampling settings for [`VertexGenerator`].
#[derive(Debug, Clone)]
pub struct VertexOptions {
    pub project: String,
    pub location: String,
    /// Publisher model id, e.g. `gemini-1.5-pro`.
    pub model: String,
    /// API root; `None` selects the regional endpoint for `location`.
    pub endpoint: Option<String>,
    pub request_timeout: Duration,
    pub temperature: Option<f32>,
    pub max_output_tokens: Option<u32>,
    pub candidate_count: Option<u32>,
}

/// Text generator backed by a Google publisher model on Vertex AI.
pub struct VertexGenerator {
    client: Client,
    url: Url,
    generation_config: Option<GenerationConfig>,
    credentials: Arc<CredentialFile>,
}

impl std::fmt::Debug for VertexGenerator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "VertexGenerator<{}>", self.url)
    }
}

impl VertexGenerator {
    pub fn new(
        options: VertexOptions,
        credentials: Arc<CredentialFile>,
    ) -> Result<Self, GenerateError> {
        let endpoint = options
            .endpoint
            .clone()
            .unwrap_or_else(|| gcp::vertex_endpoint(&options.location));
        let method = format!("{}:generateContent", options.model);
        let url = gcp::build_url(
            &endpoint,
            &[
                "v1",
                "projects",
                options.project.as_str(),
                "locations",
                options.location.as_str(),
                "publishers",
                "google",
                "models",
                method.as_str(),
            ],
        )
        .context(GenerateEndpointSnafu)?;

        let client = Client::builder()
            .timeout(options.request_timeout)
            .build()
            .context(GenerateHttpSnafu)?;

        Ok(Self {
            client,
            url,
            generation_config: GenerationConfig::from_options(&options),
            credentials,
        })
    }

    async fn call(&self, prompt: &str) -> Result<GenerateContentResponse, GenerateError> {
        let token = self
            .credentials
            .bearer_token()
            .await
            .context(GenerateCredentialsSnafu)?;

        let body = GenerateContentRequest {
            contents: vec![Content {
                role: "user",
                parts: vec![Part { text: prompt }],
            }],
            generation_config: self.generation_config.as_ref(),
        };

        let response = self
            .client
            .post(self.url.clone())
            .bearer_auth(token)
            .json(&body)
            .send()
            .await
            .context(GenerateHttpSnafu)?;

        if !response.status().is_success() {
            let (status, message) = gcp::error_details(response).await;
            return GenerateApiSnafu { status, message }.fail();
        }

        response.json().await.context(GenerateResponseSnafu)
    }
}

#[async_trait]
impl TextGenerator for VertexGenerator {
    async fn generate(&self, prompt: &str) -> Result<GenerationResponse, GenerateError> {
        let start = Instant::now();
        let result = self.call(prompt).await;
        let status = if result.is_ok() {
            RequestStatus::Success
        } else {
            RequestStatus::Error
        };
        emit!(GenerationCompleted {
            status,
            duration: start.elapsed(),
        });

        let response = result?;
        if let Some(reason) = response
            .prompt_feedback
            .as_ref()
            .and_then(|f| f.block_reason.as_deref())
        {
            warn!(block_reason = reason, "Prompt was blocked by the model");
        }
        let response = into_generation_response(response);
        debug!(
            candidates = response.candidates.len(),
            "Received generation response"
        );
        Ok(response)
    }
}

/// Concatenate each candidate's text parts. Candidates keep their position;
/// one without content maps to an empty string.
fn into_generation_response(response: GenerateContentResponse) -> GenerationResponse {
    let candidates = response
        .candidates
        .into_iter()
        .map(|candidate| {
            candidate
                .content
                .map(|content| {
                    content
                        .parts
                        .into_iter()
                        .filter_map(|part| part.text)
                        .collect::<String>()
                })
                .unwrap_or_default()
        })
        .collect();
    GenerationResponse {
        candidates,
        text: None,
    }
}

// ============ Wire types ============

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateContentRequest<'a> {
    contents: Vec<Content<'a>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    generation_config: Option<&'a GenerationConfig>,
}

#[derive(Serialize)]
struct Content<'a> {
    role: &'a str,
    parts: Vec<Part<'a>>,
}

#[derive(Serialize)]
struct Part<'a> {
    text: &'a str,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_output_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    candidate_count: Option<u32>,
}

impl GenerationConfig {
    fn from_options(options: &VertexOptions) -> Option<Self> {
        let config = Self {
            temperature: options.temperature,
            max_output_tokens: options.max_output_tokens,
            candidate_count: options.candidate_count,
        };
        let empty = config.temperature.is_none()
            && config.max_output_tokens.is_none()
            && config.candidate_count.is_none();
        (!empty).then_some(config)
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct GenerateContentResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
    prompt_feedback: Option<PromptFeedback>,
}

#[derive(Deserialize)]
struct Candidate {
    content: Option<CandidateContent>,
}

#[derive(Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<ResponsePart>,
}

#[derive(Deserialize)]
struct ResponsePart {
    text: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct PromptFeedback {
    block_reason: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn options() -> VertexOptions {
        VertexOptions {
            project: "website-401719".to_string(),
            location: "us-central1".to_string(),
            model: "gemini-1.5-pro".to_string(),
            endpoint: None,
            request_timeout: Duration::from_secs(60),
            temperature: None,
            max_output_tokens: None,
            candidate_count: None,
        }
    }

    #[test]
    fn test_model_url() {
        let generator =
            VertexGenerator::new(options(), Arc::new(CredentialFile::new("creds"))).unwrap();
        assert_eq!(
            generator.url.as_str(),
            "https://us-central1-aiplatform.googleapis.com/v1/projects/website-401719/locations/us-central1/publishers/google/models/gemini-1.5-pro:generateContent"
        );
    }

    #[test]
    fn test_endpoint_override() {
        let generator = VertexGenerator::new(
            VertexOptions {
                endpoint: Some("http://localhost:8085".to_string()),
                ..options()
            },
            Arc::new(CredentialFile::new("creds")),
        )
        .unwrap();
        assert!(generator.url.as_str().starts_with("http://localhost:8085/v1/projects/"));
    }

    #[test]
    fn test_request_body() {
        let config = GenerationConfig::from_options(&VertexOptions {
            temperature: Some(0.5),
            max_output_tokens: Some(2048),
            ..options()
        });
        let body = GenerateContentRequest {
            contents: vec![Content {
                role: "user",
                parts: vec![Part { text: "hola" }],
            }],
            generation_config: config.as_ref(),
        };
        assert_eq!(
            serde_json::to_value(&body).unwrap(),
            json!({
                "contents": [{"role": "user", "parts": [{"text": "hola"}]}],
                "generationConfig": {"temperature": 0.5, "maxOutputTokens": 2048}
            })
        );
    }

    #[test]
    fn test_default_options_send_no_generation_config() {
        assert!(GenerationConfig::from_options(&options()).is_none());
    }

    #[test]
    fn test_candidates_join_parts_and_keep_position() {
        let response: GenerateContentResponse = serde_json::from_value(json!({
            "candidates": [
                {"content": {"role": "model", "parts": [{"text": "Análisis: "}, {"text": "tinta"}]},
                 "finishReason": "STOP"},
                {"finishReason": "SAFETY"},
                {"content": {"role": "model", "parts": []}}
            ],
            "usageMetadata": {"promptTokenCount": 10}
        }))
        .unwrap();
        assert_eq!(
            into_generation_response(response),
            GenerationResponse::from_candidates(["Análisis: tinta", "", ""])
        );
    }

    #[test]
    fn test_first_candidate_without_text_stays_first() {
        let response: GenerateContentResponse = serde_json::from_value(json!({
            "candidates": [
                {"finishReason": "SAFETY"},
                {"content": {"role": "model", "parts": [{"text": "segunda"}]}}
            ]
        }))
        .unwrap();
        assert_eq!(
            into_generation_response(response),
            GenerationResponse::from_candidates(["", "segunda"])
        );
    }

    #[test]
    fn test_blocked_prompt_has_no_candidates() {
        let response: GenerateContentResponse = serde_json::from_value(json!({
            "promptFeedback": {"blockReason": "SAFETY"}
        }))
        .unwrap();
        assert_eq!(
            response.prompt_feedback.as_ref().unwrap().block_reason.as_deref(),
            Some("SAFETY")
        );
        assert_eq!(into_generation_response(response), GenerationResponse::empty());
    }
}
