//! Turning one labeling report into one generated analysis.

pub mod prompt;

use snafu::prelude::*;
use tracing::debug;

use crate::error::{EmptyResponseSnafu, GenerationError, ServiceFailureSnafu};
use crate::generate::{GenerationResponse, TextGeneratorRef};
use crate::source::{AnalysisRecord, SourceRecord};

/// Renders the prompt for a record, calls the generator once, and keeps the
/// first candidate.
///
/// Service failures are wrapped and returned; they are never retried here.
pub struct RecordEnricher {
    generator: TextGeneratorRef,
}

impl RecordEnricher {
    pub fn new(generator: TextGeneratorRef) -> Self {
        Self { generator }
    }

    pub async fn enrich(&self, record: &SourceRecord) -> Result<AnalysisRecord, GenerationError> {
        let prompt = prompt::render(&record.title, &record.comment);
        let response = self
            .generator
            .generate(&prompt)
            .await
            .context(ServiceFailureSnafu)?;

        debug!(
            source_id = %record.source_id(),
            candidates = response.candidates.len(),
            "Generated analysis"
        );
        let analysis = select_text(response).context(EmptyResponseSnafu)?;
        Ok(AnalysisRecord::new(record, analysis))
    }
}

/// Candidate 0, else the direct text when there are no candidates. Later
/// candidates are never used, and empty text counts as none.
fn select_text(response: GenerationResponse) -> Option<String> {
    let GenerationResponse { candidates, text } = response;
    let selected = match candidates.into_iter().next() {
        Some(first) => Some(first),
        None => text,
    };
    selected.filter(|t| !t.is_empty())
}
