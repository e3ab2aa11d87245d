//! Model-backed translator.

use std::sync::Arc;

use async_trait::async_trait;
use loanq_core::schema::SchemaDescription;
use tracing::{debug, warn};

use super::wire::parse_reply;
use super::{latest_table, QueryTranslator};
use crate::error::TranslationError;
use crate::provider::LanguageModel;
use crate::types::{ConversationTurn, QueryExpression, QueryResult, Role};

const INSTRUCTIONS: &str = r#"You translate questions about a loan portfolio into one JSON query object.
Reply with the JSON object only. Use only the field names listed below.

Query forms:
{"op":"filter","predicates":[{"field":"region","op":"eq","value":"Central"}]}
{"op":"aggregate","agg":"sum","field":"loan_amount","predicates":[...]}
{"op":"group_by","keys":["region","sex"],"agg":"sum","field":"loan_amount","predicates":[...]}
{"op":"compare","over":"previous","select":"max","metric":"total_amount","per_count":true}
{"op":"compare","over":{"op":"group_by","keys":["region"],"agg":"count"},"select":"min","metric":"count"}

agg is one of sum, avg, count, min, max. Predicate ops: eq, ne, gt, gte, lt, lte, in, contains.
Group results name their metric total_<x>, average_<x>, min_<x>, max_<x> or count, where <x> is
"amount" for loan_amount and the field name otherwise, and always include count.
Use "over":"previous" only to rank the rows of the previous result; set "per_count" to divide
the metric by each row's count (an average per group)."#;

/// Translator that asks a language model for the wire format.
pub struct LlmTranslator {
    model: Arc<dyn LanguageModel>,
    context_turns: usize,
}

impl LlmTranslator {
    pub fn new(model: Arc<dyn LanguageModel>, context_turns: usize) -> Self {
        Self {
            model,
            context_turns,
        }
    }

    fn system_prompt(schema: &SchemaDescription) -> String {
        format!("{}\n\n{}", INSTRUCTIONS, schema.describe())
    }

    /// Recent history plus the question. Results are summarised by shape.
    fn user_prompt(&self, question: &str, prior_turns: &[ConversationTurn]) -> String {
        let start = prior_turns.len().saturating_sub(self.context_turns);
        let mut lines = Vec::new();
        if start < prior_turns.len() {
            lines.push("Conversation so far:".to_string());
            for turn in &prior_turns[start..] {
                let who = match turn.role {
                    Role::Human => "human",
                    Role::Ai => "ai",
                };
                lines.push(format!("{}: {}", who, turn.content));
            }
        }

        match latest_table(prior_turns) {
            Some(result) => lines.push(format!("Previous result: {}", describe_shape(result))),
            None => lines.push("There is no previous result.".to_string()),
        }
        lines.push(format!("Question: {}", question));
        lines.join("\n")
    }
}

fn describe_shape(result: &QueryResult) -> String {
    let rows = match result {
        QueryResult::Table(rows) => rows.len(),
        _ => 1,
    };
    let keys = result.key_fields();
    let columns: Vec<String> = match result {
        QueryResult::Table(rows) => rows
            .first()
            .map(|r| r.values.keys().cloned().collect())
            .unwrap_or_default(),
        QueryResult::Row(row) => row.values.keys().cloned().collect(),
        QueryResult::Scalar(_) => vec![],
    };
    format!(
        "{} row(s) keyed by [{}] with columns [{}]",
        rows,
        keys.join(", "),
        columns.join(", ")
    )
}

#[async_trait]
impl QueryTranslator for LlmTranslator {
    async fn translate(
        &self,
        question: &str,
        prior_turns: &[ConversationTurn],
        schema: &SchemaDescription,
    ) -> Result<QueryExpression, TranslationError> {
        let system = Self::system_prompt(schema);
        let prompt = self.user_prompt(question, prior_turns);
        let reply = self.model.complete(&system, &prompt).await.map_err(|e| {
            warn!(model = self.model.name(), "Translation call failed: {}", e);
            TranslationError::from(e)
        })?;
        debug!(model = self.model.name(), reply = %reply, "Model translation received");
        parse_reply(&reply, schema, latest_table(prior_turns))
    }

    fn name(&self) -> &'static str {
        "llm"
    }
}
