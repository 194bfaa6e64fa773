use async_trait::async_trait;
use std::sync::{Mutex, MutexGuard, PoisonError};

use super::{GenerationResponse, TextGenerator};
use crate::error::GenerateError;

type Script = dyn Fn(usize, &str) -> Result<GenerationResponse, GenerateError> + Send + Sync;

/// Generator whose answers come from a closure.
///
/// The closure receives the zero-based call index and the rendered prompt.
/// Every prompt is recorded so tests can assert on what was sent.
pub struct ScriptedGenerator {
    script: Box<Script>,
    prompts: Mutex<Vec<String>>,
}

impl std::fmt::Debug for ScriptedGenerator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "ScriptedGenerator<{} calls>", self.lock().len())
    }
}

impl ScriptedGenerator {
    pub fn new<F>(script: F) -> Self
    where
        F: Fn(usize, &str) -> Result<GenerationResponse, GenerateError> + Send + Sync + 'static,
    {
        Self {
            script: Box::new(script),
            prompts: Mutex::new(Vec::new()),
        }
    }

    /// Answer every prompt with the same single candidate.
    pub fn always(text: impl Into<String>) -> Self {
        let text = text.into();
        Self::new(move |_, _| Ok(GenerationResponse::from_candidates([text.clone()])))
    }

    /// Prompts received so far, in order.
    pub fn prompts(&self) -> Vec<String> {
        self.lock().clone()
    }

    pub fn calls(&self) -> usize {
        self.lock().len()
    }

    fn lock(&self) -> MutexGuard<'_, Vec<String>> {
        self.prompts.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait]
impl TextGenerator for ScriptedGenerator {
    async fn generate(&self, prompt: &str) -> Result<GenerationResponse, GenerateError> {
        let index = {
            let mut prompts = self.lock();
            prompts.push(prompt.to_string());
            prompts.len() - 1
        };
        (self.script)(index, prompt)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_records_prompts_and_indexes_calls() {
        let generator = ScriptedGenerator::new(|index, prompt| {
            Ok(GenerationResponse::from_text(format!("{index}:{}", prompt.len())))
        });
        assert_eq!(
            generator.generate("abc").await.unwrap(),
            GenerationResponse::from_text("0:3")
        );
        assert_eq!(
            generator.generate("de").await.unwrap(),
            GenerationResponse::from_text("1:2")
        );
        assert_eq!(generator.prompts(), vec!["abc", "de"]);
        assert_eq!(generator.calls(), 2);
    }
}
