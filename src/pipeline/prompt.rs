//! Prompt assembly.
use std::sync::LazyLock;

use regex::{Captures, Regex};

use crate::index::SearchHit;

/// The instruction given to the model on every question.
pub const DEFAULT_TEMPLATE: &str = "Use the following pieces of context from the portfolio to answer the question at the end.
If you don't know the answer, just say that you don't know, don't try to make up an answer.
Keep the answer concise and professional, as if you are the assistant of the portfolio owner.

Context: {context}

Question: {question}
Answer:";

static PLACEHOLDER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\{(context|question)\}").expect("valid placeholder regex"));

/// A template with `{context}` and `{question}` slots.
#[derive(Debug, Clone)]
pub struct PromptTemplate {
    template: String,
}

impl PromptTemplate {
    pub fn new(template: impl Into<String>) -> Self {
        Self {
            template: template.into(),
        }
    }

    /// Fill both slots in a single pass, so braces inside the retrieved
    /// context or the question are never substituted again.
    ///
    /// Inputs are inserted verbatim.
    #[must_use]
    pub fn render(&self, context: &str, question: &str) -> String {
        PLACEHOLDER
            .replace_all(&self.template, |caps: &Captures| match &caps[1] {
                "context" => context.to_string(),
                _ => question.to_string(),
            })
            .into_owned()
    }
}

impl Default for PromptTemplate {
    fn default() -> Self {
        Self::new(DEFAULT_TEMPLATE)
    }
}

/// Join retrieved chunk texts, best first, separated by a blank line.
#[must_use]
pub fn format_context(hits: &[SearchHit]) -> String {
    hits.iter()
        .map(|h| h.content.as_str())
        .collect::<Vec<_>>()
        .join("\n\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hit(position: usize, content: &str) -> SearchHit {
        SearchHit {
            content: content.to_string(),
            position,
            similarity: 0.5,
        }
    }

    #[test]
    fn test_format_context() {
        let hits = vec![hit(2, "second"), hit(0, "first")];
        assert_eq!(format_context(&hits), "second\n\nfirst");
        assert_eq!(format_context(&[]), "");
    }

    #[test]
    fn test_render_default_template() {
        let prompt = PromptTemplate::default().render("Alice knows Rust.", "What does Alice know?");
        assert!(prompt.starts_with("Use the following pieces of context"));
        assert!(prompt.contains("say that you don't know"));
        assert!(prompt.contains("concise and professional"));
        assert!(prompt.contains("Context: Alice knows Rust.\n\nQuestion: What does Alice know?\nAnswer:"));
    }

    #[test]
    fn test_render_does_not_resubstitute() {
        let template = PromptTemplate::new("C={context} Q={question}");
        let prompt = template.render("literal {question}", "why?");
        assert_eq!(prompt, "C=literal {question} Q=why?");
    }
}
