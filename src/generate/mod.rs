//! Generative text service abstraction.
//!
//! The enricher only needs "prompt in, text out", so the Vertex AI client and
//! the scripted test double both sit behind [`TextGenerator`].

mod scripted;
mod vertex;

pub use scripted::ScriptedGenerator;
pub use vertex::{VertexGenerator, VertexOptions};

use async_trait::async_trait;
use std::sync::Arc;

use crate::error::GenerateError;

/// A reference-counted text generator.
pub type TextGeneratorRef = Arc<dyn TextGenerator>;

/// What the service produced for one prompt.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GenerationResponse {
    /// Candidate completions in service order.
    pub candidates: Vec<String>,
    /// Direct text, for services that answer without a candidate list.
    pub text: Option<String>,
}

impl GenerationResponse {
    pub fn from_candidates<I, S>(candidates: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            candidates: candidates.into_iter().map(Into::into).collect(),
            text: None,
        }
    }

    pub fn from_text(text: impl Into<String>) -> Self {
        Self {
            candidates: Vec::new(),
            text: Some(text.into()),
        }
    }

    pub fn empty() -> Self {
        Self::default()
    }
}

#[async_trait]
pub trait TextGenerator: Send + Sync {
    /// Submit one prompt and return the service's answer.
    async fn generate(&self, prompt: &str) -> Result<GenerationResponse, GenerateError>;
}
