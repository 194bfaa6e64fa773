//! Shared plumbing for the Google Cloud REST clients.

mod credentials;

pub use credentials::CredentialFile;

use serde::Deserialize;
use url::Url;

/// Default BigQuery API root.
pub const BIGQUERY_ENDPOINT: &str = "https://bigquery.googleapis.com";

/// Regional Vertex AI API root.
pub fn vertex_endpoint(location: &str) -> String {
    format!("https://{location}-aiplatform.googleapis.com")
}

/// Append path segments to an API root, percent-encoding each segment.
pub(crate) fn build_url(base: &str, segments: &[&str]) -> Result<Url, url::ParseError> {
    let mut url = Url::parse(base)?;
    url.path_segments_mut()
        .map_err(|_| url::ParseError::RelativeUrlWithCannotBeABaseBase)?
        .pop_if_empty()
        .extend(segments);
    Ok(url)
}

#[derive(Deserialize)]
struct ErrorEnvelope {
    error: ErrorBody,
}

#[derive(Deserialize)]
struct ErrorBody {
    #[serde(default)]
    message: String,
    #[serde(default)]
    status: Option<String>,
}

/// Extract the human-readable message from a Google API error body.
pub(crate) fn parse_error_message(body: &str) -> Option<String> {
    let envelope: ErrorEnvelope = serde_json::from_str(body).ok()?;
    let ErrorBody { message, status } = envelope.error;
    Some(match status {
        Some(status) if !message.is_empty() => format!("{status}: {message}"),
        Some(status) => status,
        None => message,
    })
}

/// Drain a failed response into `(status, message)`.
pub(crate) async fn error_details(response: reqwest::Response) -> (u16, String) {
    let status = response.status();
    let message = match response.text().await {
        Ok(body) => parse_error_message(&body).unwrap_or_else(|| {
            if body.trim().is_empty() {
                status.canonical_reason().unwrap_or("unknown error").to_string()
            } else {
                body
            }
        }),
        Err(e) => e.to_string(),
    };
    (status.as_u16(), message)
}
