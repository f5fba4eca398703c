//! Language-model boundary and prompt assembly for summaries and answers.

use async_trait::async_trait;
use thiserror::Error;

use crate::store::SearchHit;

/// What the model is told to say when the context does not contain the answer.
pub const NO_CONTEXT_REPLY: &str = "I can't retrieve the answer from the context.";

const SUMMARY_INSTRUCTION: &str = "Generate a concise summary for the following text.";

/// A two-part chat prompt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Prompt {
    pub system: String,
    pub user: String,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CompletionParams {
    pub temperature: f32,
    pub max_tokens: u32,
}

impl Default for CompletionParams {
    fn default() -> Self {
        Self {
            temperature: 0.7,
            max_tokens: 1024,
        }
    }
}

/// Produces text for a prompt. Wrap in a
/// [`ThrottledModel`](crate::throttle::ThrottledModel) for rate limiting and retries.
#[async_trait]
pub trait LanguageModel: Send + Sync {
    async fn complete(&self, prompt: &Prompt, params: &CompletionParams) -> Result<String, CompletionError>;
}

#[derive(Debug, Error)]
pub enum CompletionError {
    #[error("language model returned an empty response")]
    EmptyResponse,
    #[error("language model request failed: {0}")]
    Backend(String),
}

pub fn summary_prompt(text: &str) -> Prompt {
    Prompt {
        system: SUMMARY_INSTRUCTION.to_string(),
        user: text.to_string(),
    }
}

/// Builds the answer prompt from retrieved hits, best first. With `use_summary`
/// a hit contributes its summary when it has one, else its text.
pub fn answer_prompt(question: &str, hits: &[SearchHit], use_summary: bool) -> Prompt {
    let context = hits
        .iter()
        .map(|h| match (&h.chunk.summary, use_summary) {
            (Some(summary), true) => summary.as_str(),
            _ => h.chunk.text.as_str(),
        })
        .collect::<Vec<_>>()
        .join("\n");
    Prompt {
        system: format!("Context: {context}"),
        user: format!(
            "You are an AI assistant. Answer based on the provided context. \
             If the answer is not in the context, respond with: '{NO_CONTEXT_REPLY}'\n{question}"
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chunks::Chunk;

    fn hit(id: u64, text: &str, summary: Option<&str>) -> SearchHit {
        let mut chunk = Chunk::new("doc", id as usize, text);
        if let Some(s) = summary {
            chunk = chunk.with_summary(s);
        }
        SearchHit { id, chunk, score: 1.0 }
    }

    #[test]
    fn answer_prompt_uses_summaries_when_asked() {
        let hits = vec![hit(1, "long text one", Some("short one")), hit(2, "text two", None)];
        let p = answer_prompt("What?", &hits, true);
        assert_eq!(p.system, "Context: short one\ntext two");
        assert!(p.user.ends_with("\nWhat?"));

        let p = answer_prompt("What?", &hits, false);
        assert_eq!(p.system, "Context: long text one\ntext two");
    }

    #[test]
    fn answer_prompt_without_context_still_asks() {
        let p = answer_prompt("Anything?", &[], true);
        assert_eq!(p.system, "Context: ");
        assert!(p.user.contains(NO_CONTEXT_REPLY));
    }
}
