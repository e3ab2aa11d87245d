//! Translation of questions into query expressions.
//!
//! Two implementations share the [`QueryTranslator`] seam: the
//! deterministic [`RuleTranslator`] and the model-backed [`LlmTranslator`].

pub mod llm;
pub mod rules;
pub mod wire;

use async_trait::async_trait;
use loanq_core::schema::SchemaDescription;

use crate::error::TranslationError;
use crate::types::{ConversationTurn, QueryExpression, QueryResult};

pub use llm::LlmTranslator;
pub use rules::RuleTranslator;

/// Maps a question, with prior turns as context, onto one query expression.
#[async_trait]
pub trait QueryTranslator: Send + Sync {
    async fn translate(
        &self,
        question: &str,
        prior_turns: &[ConversationTurn],
        schema: &SchemaDescription,
    ) -> Result<QueryExpression, TranslationError>;

    fn name(&self) -> &'static str;
}

/// Result of the most recent turn that produced a table. Rows picked by a
/// comparison are skipped.
pub fn latest_table(turns: &[ConversationTurn]) -> Option<&QueryResult> {
    turns
        .iter()
        .rev()
        .filter_map(|t| t.produced_result.as_ref())
        .find(|r| matches!(r, QueryResult::Table(_)))
}
