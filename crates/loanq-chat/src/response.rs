//! Response composition: short human-readable explanations of results.
//!
//! [`TemplateComposer`] works without a model. [`LlmComposer`] asks the
//! provider to phrase the answer and falls back to the template on failure,
//! so composing never fails.

use std::sync::{Arc, LazyLock};

use async_trait::async_trait;
use regex::Regex;
use rust_decimal::Decimal;
use tracing::warn;

use crate::provider::LanguageModel;
use crate::types::{QueryResult, Row, Scalar};

static COUNT_QUESTION_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\b(?:how\s+many|count|number\s+of)\b").unwrap());

/// Produces the explanation returned alongside a result.
#[async_trait]
pub trait ResponseComposer: Send + Sync {
    async fn compose(&self, question: &str, result: &QueryResult) -> String;
}

// =============================================================================
// TemplateComposer
// =============================================================================

/// Deterministic one- or two-sentence summaries.
#[derive(Debug, Clone)]
pub struct TemplateComposer {
    /// Maximum number of table entries named in a summary.
    pub max_listed: usize,
}

impl Default for TemplateComposer {
    fn default() -> Self {
        Self { max_listed: 3 }
    }
}

impl TemplateComposer {
    pub fn new(max_listed: usize) -> Self {
        Self { max_listed }
    }

    pub fn explain(&self, question: &str, result: &QueryResult) -> String {
        match result {
            QueryResult::Scalar(scalar) => self.explain_scalar(question, scalar),
            QueryResult::Row(row) => self.explain_row(row),
            QueryResult::Table(rows) => self.explain_table(rows),
        }
    }

    fn explain_scalar(&self, question: &str, scalar: &Scalar) -> String {
        match scalar {
            Scalar::Null => "No matching records were found, so there is no value to report."
                .to_string(),
            Scalar::Number(n) if COUNT_QUESTION_RE.is_match(question) => {
                if n.is_zero() {
                    "No matching loans were found.".to_string()
                } else if *n == Decimal::ONE {
                    "There is 1 matching loan.".to_string()
                } else {
                    format!("There are {} matching loans.", format_number(*n))
                }
            }
            Scalar::Number(n) => format!("The result is {}.", format_number(*n)),
            Scalar::Text(s) => format!("The result is {}.", s),
        }
    }

    fn explain_row(&self, row: &Row) -> String {
        if row.is_grouped() {
            return format!(
                "The top match is {} with {}.",
                describe_key(row),
                describe_values(row)
            );
        }
        if let Some(Scalar::Text(name)) = row.get("user_name") {
            return describe_record(name, row);
        }
        if row.values.is_empty() {
            return "No matching records were found.".to_string();
        }
        format!("The result is {}.", describe_values(row))
    }

    fn explain_table(&self, rows: &[Row]) -> String {
        let Some(first) = rows.first() else {
            return "No matching records were found.".to_string();
        };

        if first.is_grouped() {
            let listed: Vec<String> = rows
                .iter()
                .take(self.max_listed)
                .map(|r| format!("{} ({})", describe_key(r), describe_values(r)))
                .collect();
            let noun = if rows.len() == 1 { "group" } else { "groups" };
            return format!(
                "Found {} {}. Top entries: {}.",
                rows.len(),
                noun,
                listed.join("; ")
            );
        }

        let names: Vec<String> = rows
            .iter()
            .take(self.max_listed)
            .filter_map(|r| match r.get("user_name") {
                Some(Scalar::Text(name)) => Some(name.clone()),
                _ => None,
            })
            .collect();
        let noun = if rows.len() == 1 { "loan" } else { "loans" };
        if names.is_empty() {
            format!("Found {} matching {}.", rows.len(), noun)
        } else {
            format!(
                "Found {} matching {}, including {}.",
                rows.len(),
                noun,
                names.join(", ")
            )
        }
    }
}

#[async_trait]
impl ResponseComposer for TemplateComposer {
    async fn compose(&self, question: &str, result: &QueryResult) -> String {
        self.explain(question, result)
    }
}

fn describe_key(row: &Row) -> String {
    row.key
        .iter()
        .map(|(field, value)| format!("{} {}", humanize(field), format_scalar(value)))
        .collect::<Vec<_>>()
        .join(" and ")
}

/// Metric columns with `count` last, e.g. "total amount 40,500, count 2".
fn describe_values(row: &Row) -> String {
    let mut parts: Vec<String> = row
        .values
        .iter()
        .filter(|(column, _)| column.as_str() != "count")
        .map(|(column, value)| format!("{} {}", humanize(column), format_scalar(value)))
        .collect();
    if let Some(count) = row.values.get("count") {
        parts.push(format!("count {}", format_scalar(count)));
    }
    parts.join(", ")
}

fn describe_record(name: &str, row: &Row) -> String {
    let amount = row.get("loan_amount").map(format_scalar).unwrap_or_default();
    let currency = row.get("currency").map(format_scalar).unwrap_or_default();
    let status = row
        .get("repayment_status")
        .map(format_scalar)
        .unwrap_or_default();
    format!(
        "{} has a loan of {} {} with repayment status {}.",
        name, amount, currency, status
    )
}

fn humanize(column: &str) -> String {
    column.replace('_', " ")
}

fn format_scalar(scalar: &Scalar) -> String {
    match scalar {
        Scalar::Number(n) => format_number(*n),
        Scalar::Text(s) => s.clone(),
        Scalar::Null => "n/a".to_string(),
    }
}

/// Two decimal places at most, with thousands separators: `40500.5` -> `40,500.5`.
pub fn format_number(value: Decimal) -> String {
    let text = value.round_dp(2).normalize().to_string();
    let (sign, digits) = match text.strip_prefix('-') {
        Some(rest) => ("-", rest),
        None => ("", text.as_str()),
    };
    let (int_part, frac_part) = match digits.split_once('.') {
        Some((i, f)) => (i, Some(f)),
        None => (digits, None),
    };

    let mut grouped = String::with_capacity(int_part.len() + int_part.len() / 3);
    for (i, c) in int_part.chars().enumerate() {
        if i > 0 && (int_part.len() - i) % 3 == 0 {
            grouped.push(',');
        }
        grouped.push(c);
    }

    match frac_part {
        Some(f) => format!("{}{}.{}", sign, grouped, f),
        None => format!("{}{}", sign, grouped),
    }
}

// =============================================================================
// LlmComposer
// =============================================================================

const COMPOSER_SYSTEM: &str = "You explain query results about a loan portfolio. \
Answer in one or two plain sentences using only the facts given. \
Never list more than three rows and never invent numbers.";

/// Model-phrased explanations with the template as fallback.
pub struct LlmComposer {
    model: Arc<dyn LanguageModel>,
    fallback: TemplateComposer,
}

impl LlmComposer {
    pub fn new(model: Arc<dyn LanguageModel>, fallback: TemplateComposer) -> Self {
        Self { model, fallback }
    }

    fn prompt(&self, question: &str, result: &QueryResult, facts: &str) -> String {
        let shown = match result {
            QueryResult::Table(rows) => serde_json::Value::Array(
                rows.iter()
                    .take(self.fallback.max_listed)
                    .map(Row::to_json)
                    .collect(),
            ),
            other => other.to_json(),
        };
        format!(
            "Question: {}\nResult (first rows only): {}\nSummary: {}\nExplain the answer.",
            question, shown, facts
        )
    }
}

#[async_trait]
impl ResponseComposer for LlmComposer {
    async fn compose(&self, question: &str, result: &QueryResult) -> String {
        let facts = self.fallback.explain(question, result);
        let prompt = self.prompt(question, result, &facts);
        match self.model.complete(COMPOSER_SYSTEM, &prompt).await {
            Ok(text) if !text.trim().is_empty() => text.trim().to_string(),
            Ok(_) => facts,
            Err(e) => {
                warn!(model = self.model.name(), "Explanation call failed, using template: {}", e);
                facts
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::testing::ScriptedModel;

    fn grouped(region: &str, total: i64, count: i64) -> Row {
        let mut row = Row::default();
        row.key.insert("region".into(), Scalar::Text(region.into()));
        row.values
            .insert("total_amount".into(), Scalar::Number(Decimal::from(total)));
        row.values
            .insert("count".into(), Scalar::Number(Decimal::from(count)));
        row
    }

    fn number(n: i64) -> QueryResult {
        QueryResult::Scalar(Scalar::Number(Decimal::from(n)))
    }

    #[test]
    fn test_format_number() {
        assert_eq!(format_number(Decimal::from(15000)), "15,000");
        assert_eq!(format_number(Decimal::from(999)), "999");
        assert_eq!(format_number(Decimal::from(1234567)), "1,234,567");
        assert_eq!(format_number(Decimal::new(4050050, 2)), "40,500.5");
        assert_eq!(format_number(Decimal::new(-12345, 1)), "-1,234.5");
        assert_eq!(format_number(Decimal::new(20000, 0) / Decimal::from(3)), "6,666.67");
    }

    #[test]
    fn test_scalar_explanations() {
        let c = TemplateComposer::default();
        assert_eq!(
            c.explain("What is the loan amount for Juan Perez?", &number(15000)),
            "The result is 15,000."
        );
        assert_eq!(
            c.explain("How many late loans?", &number(4)),
            "There are 4 matching loans."
        );
        assert_eq!(
            c.explain("How many loans in South?", &number(0)),
            "No matching loans were found."
        );
        assert!(c
            .explain("Average loan in South", &QueryResult::Scalar(Scalar::Null))
            .starts_with("No matching records"));
    }

    #[test]
    fn test_grouped_table_is_summarised() {
        let c = TemplateComposer::new(2);
        let table = QueryResult::Table(vec![
            grouped("Central", 40500, 2),
            grouped("North", 30000, 1),
            grouped("South", 100, 1),
        ]);
        let text = c.explain("Group loans by region", &table);
        assert_eq!(
            text,
            "Found 3 groups. Top entries: region Central (total amount 40,500, count 2); region North (total amount 30,000, count 1)."
        );
        assert!(!text.contains("South"));
    }

    #[test]
    fn test_grouped_row() {
        let mut row = grouped("North", 30000, 1);
        row.values
            .insert("average_amount".into(), Scalar::Number(Decimal::from(30000)));
        let text = TemplateComposer::default().explain("Which region", &QueryResult::Row(row));
        assert_eq!(
            text,
            "The top match is region North with average amount 30,000, total amount 30,000, count 1."
        );
    }

    #[test]
    fn test_empty_table() {
        let text = TemplateComposer::default().explain("List loans", &QueryResult::Table(vec![]));
        assert_eq!(text, "No matching records were found.");
    }

    #[tokio::test]
    async fn test_llm_composer_uses_model_text() {
        let model = Arc::new(ScriptedModel::new(vec![Ok("  Juan Perez borrowed 15,000 COP. ")]));
        let composer = LlmComposer::new(model.clone(), TemplateComposer::default());
        let text = composer.compose("Loan for Juan Perez?", &number(15000)).await;
        assert_eq!(text, "Juan Perez borrowed 15,000 COP.");
        let prompts = model.prompts.lock().unwrap();
        assert!(prompts[0].contains("Summary: The result is 15,000."));
    }

    #[tokio::test]
    async fn test_llm_composer_falls_back_on_failure() {
        let model = Arc::new(ScriptedModel::new(vec![Err("down")]));
        let composer = LlmComposer::new(model, TemplateComposer::default());
        let text = composer.compose("Total loans", &number(7)).await;
        assert_eq!(text, "The result is 7.");
    }
}
