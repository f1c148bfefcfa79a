//! Answering template

use crate::config::PromptConfig;
use crate::errors::{AppError, Result};

/// Fixed template around retrieved context and the user query.
///
/// The persona and the closed set of formatting markers come from
/// configuration; the context and query are inserted verbatim.
#[derive(Debug, Clone)]
pub struct PromptBuilder {
    persona: String,
    formatting_rules: Vec<String>,
    guidance: Vec<String>,
}

impl PromptBuilder {
    /// Fails with a configuration error when the persona or the
    /// formatting rules are missing
    pub fn new(config: &PromptConfig) -> Result<Self> {
        if config.persona.trim().is_empty() {
            return Err(AppError::config("prompt.persona must not be empty"));
        }
        if config.formatting_rules.is_empty() {
            return Err(AppError::config("prompt.formatting_rules must not be empty"));
        }

        Ok(Self {
            persona: config.persona.trim().to_string(),
            formatting_rules: config.formatting_rules.clone(),
            guidance: config.guidance.clone(),
        })
    }

    /// Persona, formatting rules and guidance, without context or query.
    ///
    /// Used as the standing instructions of the stateful assistant.
    pub fn instructions(&self) -> String {
        let mut text = String::with_capacity(1024);
        text.push_str(&self.persona);
        text.push_str("\n\nFormat the answer using only these HTML elements:\n");
        for rule in &self.formatting_rules {
            text.push_str("- ");
            text.push_str(rule);
            text.push('\n');
        }
        if !self.guidance.is_empty() {
            text.push_str("\nWhen answering:\n");
            for line in &self.guidance {
                text.push_str("- ");
                text.push_str(line);
                text.push('\n');
            }
        }
        text
    }

    /// Single instruction block for a one-shot completion
    pub fn build_prompt(&self, query: &str, context: &str) -> String {
        format!(
            "{}\nContext:\n{}\n\nQuestion: {}\n\nAnswer:",
            self.instructions(),
            context,
            query
        )
    }
}

/// First-turn message of a thread: context followed by the question
pub fn enrich_first_turn(query: &str, context: &str) -> String {
    format!("Context:\n{}\n\nQuestion: {}", context, query)
}
