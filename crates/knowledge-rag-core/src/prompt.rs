//! Answer prompt template.
//!
//! Retrieved chunk texts are joined, in the order the retriever returned
//! them, and substituted into `{context}`; the user's question goes into
//! `{question}`. An optional `{chat_history}` placeholder receives prior
//! turns formatted as `Human:` / `Assistant:` lines.

use crate::error::ConfigError;
use crate::models::RetrievedChunk;

pub const CONTEXT: &str = "{context}";
pub const QUESTION: &str = "{question}";
pub const CHAT_HISTORY: &str = "{chat_history}";

/// Template used when none is configured.
pub const DEFAULT_TEMPLATE: &str = "You are a helpful AI assistant. Use the following pieces of context to answer the question at the end, please answer as long as possible.
If you don't know the answer, just say you don't know. DO NOT try to make up an answer.
If the question is not related to the context, politely respond that you are tuned to only answer questions that are related to the context.

{context}

Question: {question}, Helpful answer in markdown";

/// One prior exchange: the user's question and the assistant's answer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Turn {
    pub question: String,
    pub answer: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PromptTemplate {
    template: String,
}

impl PromptTemplate {
    /// # Errors
    ///
    /// [`ConfigError::Invalid`] unless the template contains both
    /// `{context}` and `{question}`.
    pub fn new(template: impl Into<String>) -> Result<Self, ConfigError> {
        let template = template.into();
        for placeholder in [CONTEXT, QUESTION] {
            if !template.contains(placeholder) {
                return Err(ConfigError::Invalid(format!(
                    "prompt template is missing the {} placeholder",
                    placeholder
                )));
            }
        }
        Ok(Self { template })
    }

    pub fn as_str(&self) -> &str {
        &self.template
    }

    /// Fill the template. Placeholders are substituted in a single pass, so
    /// braces inside chunk text or the question are left alone.
    pub fn render(&self, chunks: &[RetrievedChunk], question: &str, history: &[Turn]) -> String {
        let context = join_context(chunks);
        let history = format_history(history);

        let mut out = String::with_capacity(self.template.len() + context.len() + question.len());
        let mut rest = self.template.as_str();
        while let Some(open) = rest.find('{') {
            out.push_str(&rest[..open]);
            let tail = &rest[open..];
            let (value, len) = if tail.starts_with(CONTEXT) {
                (context.as_str(), CONTEXT.len())
            } else if tail.starts_with(QUESTION) {
                (question, QUESTION.len())
            } else if tail.starts_with(CHAT_HISTORY) {
                (history.as_str(), CHAT_HISTORY.len())
            } else {
                ("{", 1)
            };
            out.push_str(value);
            rest = &tail[len..];
        }
        out.push_str(rest);
        out
    }
}

impl Default for PromptTemplate {
    fn default() -> Self {
        Self {
            template: DEFAULT_TEMPLATE.to_string(),
        }
    }
}

/// Chunk texts separated by blank lines, in the given order.
pub fn join_context(chunks: &[RetrievedChunk]) -> String {
    chunks
        .iter()
        .map(|c| c.text.as_str())
        .collect::<Vec<_>>()
        .join("\n\n")
}

fn format_history(history: &[Turn]) -> String {
    history
        .iter()
        .map(|t| format!("Human: {}\nAssistant: {}", t.question, t.answer))
        .collect::<Vec<_>>()
        .join("\n")
}
