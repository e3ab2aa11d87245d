//! Deterministic keyword translator.
//!
//! Recognises category values, year ranges, amount thresholds, borrower
//! names, aggregate wording, grouping clauses and "which X has the highest"
//! comparisons. Used offline and whenever no language model is configured.

use std::sync::LazyLock;

use async_trait::async_trait;
use chrono::NaiveDate;
use loanq_core::schema::{Field, FieldKind, SchemaDescription};
use loanq_core::types::Value;
use regex::Regex;
use rust_decimal::Decimal;
use tracing::debug;

use super::QueryTranslator;
use crate::error::TranslationError;
use crate::types::{
    Aggregate, AggregateOp, Compare, CompareSource, Comparison, ConversationTurn, GroupBy, Metric,
    Predicate, QueryExpression, QueryResult, Select,
};

// =============================================================================
// Patterns
// =============================================================================

static NAME_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\bfor\s+([A-Z][a-zA-Z'\-]+(?:\s+[A-Z][a-zA-Z'\-]+)+)").unwrap()
});

static THRESHOLD_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)\b(credit\s+scores?\s+)?(?:of\s+)?(over|above|more\s+than|greater\s+than|exceeding|under|below|less\s+than|at\s+least|at\s+most)\s+\$?(\d[\d,]*(?:\.\d+)?)(\s*k\b)?",
    )
    .unwrap()
});

static YEAR_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(before|after|since|in|during)\s+(\d{4})\b").unwrap()
});

static PENDING_METRIC_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)\b(?:pending\s+(?:amounts?|balances?)|outstanding(?:\s+(?:amounts?|balances?))?|balances?|amounts?\s+pending|still\s+owed)\b",
    )
    .unwrap()
});

static CREDIT_SCORE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\bcredit\s+scores?\b").unwrap());

static GROUP_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)\b(?:by|per|each)\s+([a-z][a-z_ ,&\-]*?)\s*(?:[?.!]|$|\b(?:for|in|where|with|having|among|from)\b)",
    )
    .unwrap()
});

static KEY_SPLIT_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\s*(?:,|&|\band\b)\s*").unwrap());

static WHICH_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)\bwhich\s+([a-z][a-z_ ]*?)\s+(?:has|had|have|shows?|is|was|gets?|got|received|holds?)\b",
    )
    .unwrap()
});

static FOLLOW_UP_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)\b(?:of\s+(?:those|these|them)|from\s+(?:that|those|these)|among\s+(?:them|those|these)|that\s+(?:table|result|list)|previous\s+result)\b",
    )
    .unwrap()
});

static HIGHEST_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(?:highest|largest|biggest|most|maximum|max|top|greatest)\b").unwrap()
});

static LOWEST_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(?:lowest|smallest|least|minimum|min|fewest)\b").unwrap()
});

static MOST_FEWEST_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\b(?:most|fewest)\b").unwrap());

static AMOUNT_WORD_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(?:amounts?|total|sum|average|avg|mean|balances?|pending|money|value)\b")
        .unwrap()
});

static AVG_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\b(?:average|avg|mean)\b").unwrap());

static COUNT_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\b(?:how\s+many|count|number\s+of)\b").unwrap());

static SUM_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\b(?:total|sum|how\s+much)\b").unwrap());

static LIST_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(?:list|show|find|display|give\s+me\s+the\s+loans|which\s+loans)\b").unwrap()
});

static LOOKUP_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\bwhat(?:\s+is|\s+was|'s)\s+the\b").unwrap());

static LOAN_VOCAB_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)\b(?:loans?|borrowers?|amounts?|portfolio|credit|pending|balances?|outstanding|records?|debts?|lending|clients?|customers?|disbursed|repayments?)\b",
    )
    .unwrap()
});

/// Words that stand for "the rows of the previous result".
const REFERENTIAL_WORDS: &[&str] = &["one", "ones", "group", "row", "combination", "segment"];

// =============================================================================
// RuleTranslator
// =============================================================================

struct CategoryPattern {
    field: Field,
    canonical: &'static str,
    pattern: Regex,
}

/// Keyword and regex translator over the loan schema.
pub struct RuleTranslator {
    categories: Vec<CategoryPattern>,
}

/// What the scan of a question found, before an expression is chosen.
#[derive(Debug, Default)]
struct Extraction {
    filters: Vec<Predicate>,
    metric_field: Option<Field>,
    group_keys: Vec<Field>,
}

impl RuleTranslator {
    /// Precompile value patterns for every category value and alias.
    pub fn new(schema: &SchemaDescription) -> Self {
        let mut categories = Vec::new();
        for spec in schema.fields.iter().filter(|s| s.kind == FieldKind::Category) {
            let words = spec
                .values
                .iter()
                .map(|v| (*v, *v))
                .chain(spec.value_aliases.iter().copied());
            for (word, canonical) in words {
                let pattern = format!(r"(?i)\b{}\b", regex::escape(word));
                if let Ok(pattern) = Regex::new(&pattern) {
                    categories.push(CategoryPattern {
                        field: spec.field,
                        canonical,
                        pattern,
                    });
                }
            }
        }
        Self { categories }
    }

    /// Translate without any I/O.
    pub fn translate_text(
        &self,
        question: &str,
        prior_turns: &[ConversationTurn],
        schema: &SchemaDescription,
    ) -> Result<QueryExpression, TranslationError> {
        let text = question.trim();
        let mut scan = text.to_string();
        let mut found = Extraction::default();

        self.extract_name(&mut scan, schema, &mut found);
        extract_thresholds(&mut scan, schema, &mut found)?;
        extract_years(&mut scan, &mut found);
        extract_metric_field(&mut scan, &mut found);
        extract_group_keys(&mut scan, schema, &mut found)?;
        let which = extract_which(&mut scan, schema)?;
        self.extract_categories(&scan, &mut found);

        let prior = latest_grouped_result(prior_turns);
        let follow_up = FOLLOW_UP_RE.is_match(text);
        let select = if LOWEST_RE.is_match(&scan) {
            Some(Select::Min)
        } else if HIGHEST_RE.is_match(&scan) {
            Some(Select::Max)
        } else {
            None
        };

        // Comparisons, threaded over the previous grouped result when one fits.
        if which.is_some() || (follow_up && select.is_some()) {
            let select = select.unwrap_or(Select::Max);
            let threaded = match (&which, prior) {
                (Some(WhichTarget::Field(field)), Some(table)) => {
                    follow_up || table.key_fields().iter().any(|k| k == field.name())
                }
                (Some(WhichTarget::Referential), Some(_)) | (None, Some(_)) => true,
                (Some(WhichTarget::Referential), None) | (None, None) => {
                    return Err(TranslationError::AmbiguousReference(
                        "there is no earlier grouped result to compare".to_string(),
                    ))
                }
                (Some(WhichTarget::Field(_)), None) => {
                    if follow_up {
                        return Err(TranslationError::AmbiguousReference(
                            "there is no earlier grouped result to compare".to_string(),
                        ));
                    }
                    false
                }
            };

            if let (true, Some(table)) = (threaded, prior) {
                let metric = threaded_metric(table, &scan)?;
                debug!(metric = %metric.label(), "Threading previous result into comparison");
                return Ok(QueryExpression::Compare(Compare::new(
                    CompareSource::Prior(table.clone()),
                    select,
                    metric,
                )));
            }

            if let Some(WhichTarget::Field(field)) = which {
                let op = if wants_count(&scan) {
                    AggregateOp::Count
                } else if AVG_RE.is_match(&scan) {
                    AggregateOp::Avg
                } else {
                    AggregateOp::Sum
                };
                let agg = Aggregate::new(
                    op,
                    found.metric_field.unwrap_or(Field::LoanAmount),
                    found.filters,
                );
                let metric = Metric::Column(agg.metric_name());
                return Ok(QueryExpression::Compare(Compare::new(
                    CompareSource::GroupBy(GroupBy::new(vec![field], agg)),
                    select,
                    metric,
                )));
            }
        }

        if follow_up {
            return Err(TranslationError::AmbiguousReference(
                "follow-up questions can only pick the highest or lowest row of an earlier result"
                    .to_string(),
            ));
        }

        let op = aggregate_op(&scan);
        let metric_field = found.metric_field.unwrap_or(Field::LoanAmount);

        if !found.group_keys.is_empty() {
            let agg = Aggregate::new(op.unwrap_or(AggregateOp::Sum), metric_field, found.filters);
            return Ok(QueryExpression::GroupBy(GroupBy::new(found.group_keys, agg)));
        }

        if let Some(op) = op {
            return Ok(QueryExpression::Aggregate(Aggregate::new(
                op,
                metric_field,
                found.filters,
            )));
        }

        if LIST_RE.is_match(&scan) {
            return Ok(QueryExpression::Filter(found.filters));
        }

        // "What is the loan amount for Juan Perez?"
        if LOOKUP_RE.is_match(&scan) && !found.filters.is_empty() {
            let op = if metric_field.is_monetary() {
                AggregateOp::Sum
            } else {
                AggregateOp::Avg
            };
            return Ok(QueryExpression::Aggregate(Aggregate::new(
                op,
                metric_field,
                found.filters,
            )));
        }

        if !found.filters.is_empty() {
            return Ok(QueryExpression::Filter(found.filters));
        }

        if LOAN_VOCAB_RE.is_match(text) {
            return Ok(QueryExpression::Aggregate(Aggregate::new(
                AggregateOp::Count,
                Field::LoanAmount,
                vec![],
            )));
        }

        Err(TranslationError::AmbiguousReference(
            "the question does not mention anything in the loan data".to_string(),
        ))
    }

    fn extract_name(&self, scan: &mut String, schema: &SchemaDescription, found: &mut Extraction) {
        let Some(caps) = NAME_RE.captures(scan) else {
            return;
        };
        let name = caps[1].to_string();
        let is_vocabulary = name.split_whitespace().any(|word| {
            schema.resolve_field(word).is_some()
                || self
                    .categories
                    .iter()
                    .any(|c| c.pattern.is_match(word))
        });
        if is_vocabulary {
            return;
        }
        found
            .filters
            .push(Predicate::eq(Field::UserName, Value::Text(name.clone())));
        *scan = scan.replacen(&name, " ", 1);
    }

    fn extract_categories(&self, scan: &str, found: &mut Extraction) {
        let mut matched: Vec<(Field, Vec<&'static str>)> = Vec::new();
        for c in &self.categories {
            if !c.pattern.is_match(scan) {
                continue;
            }
            match matched.iter_mut().find(|(f, _)| *f == c.field) {
                Some((_, values)) => {
                    if !values.contains(&c.canonical) {
                        values.push(c.canonical);
                    }
                }
                None => matched.push((c.field, vec![c.canonical])),
            }
        }

        for (field, values) in matched {
            let predicate = if values.len() == 1 {
                Predicate::eq_text(field, values[0])
            } else {
                Predicate::new(
                    field,
                    Comparison::In(values.iter().map(|v| Value::Text(v.to_string())).collect()),
                )
            };
            found.filters.push(predicate);
        }
    }
}

impl Default for RuleTranslator {
    fn default() -> Self {
        Self::new(&SchemaDescription::loans())
    }
}

#[async_trait]
impl QueryTranslator for RuleTranslator {
    async fn translate(
        &self,
        question: &str,
        prior_turns: &[ConversationTurn],
        schema: &SchemaDescription,
    ) -> Result<QueryExpression, TranslationError> {
        self.translate_text(question, prior_turns, schema)
    }

    fn name(&self) -> &'static str {
        "rules"
    }
}

// =============================================================================
// Extraction helpers
// =============================================================================

enum WhichTarget {
    Field(Field),
    /// "which one", "which group": the rows of the earlier result.
    Referential,
}

fn blank(scan: &mut String, re: &Regex) {
    *scan = re.replace_all(scan, " ").into_owned();
}

fn extract_thresholds(
    scan: &mut String,
    schema: &SchemaDescription,
    found: &mut Extraction,
) -> Result<(), TranslationError> {
    for caps in THRESHOLD_RE.captures_iter(scan) {
        let field = if caps.get(1).is_some() {
            Field::CreditScore
        } else {
            Field::LoanAmount
        };
        let Some(Value::Number(mut amount)) = schema.parse_value(field, &caps[3]) else {
            continue;
        };
        if caps.get(4).is_some() {
            amount = amount
                .checked_mul(Decimal::from(1000))
                .ok_or_else(|| TranslationError::ValueOutOfRange(format!("{}k", &caps[3])))?;
        }
        let value = Value::Number(amount);
        let operator = caps[2].to_lowercase();
        let words: Vec<&str> = operator.split_whitespace().collect();
        let comparison = match words.as_slice() {
            ["at", "least"] => Comparison::Gte(value),
            ["at", "most"] => Comparison::Lte(value),
            ["under" | "below" | "less", ..] => Comparison::Lt(value),
            _ => Comparison::Gt(value),
        };
        found.filters.push(Predicate::new(field, comparison));
    }
    blank(scan, &THRESHOLD_RE);
    Ok(())
}

fn extract_years(scan: &mut String, found: &mut Extraction) {
    for caps in YEAR_RE.captures_iter(scan) {
        let Ok(year) = caps[2].parse::<i32>() else {
            continue;
        };
        let (Some(start), Some(next)) = (
            NaiveDate::from_ymd_opt(year, 1, 1),
            NaiveDate::from_ymd_opt(year + 1, 1, 1),
        ) else {
            continue;
        };
        let field = Field::DisbursedDate;
        match caps[1].to_lowercase().as_str() {
            "before" => found
                .filters
                .push(Predicate::new(field, Comparison::Lt(Value::Date(start)))),
            "after" | "since" => found
                .filters
                .push(Predicate::new(field, Comparison::Gte(Value::Date(start)))),
            _ => {
                found
                    .filters
                    .push(Predicate::new(field, Comparison::Gte(Value::Date(start))));
                found
                    .filters
                    .push(Predicate::new(field, Comparison::Lt(Value::Date(next))));
            }
        }
    }
    blank(scan, &YEAR_RE);
}

fn extract_metric_field(scan: &mut String, found: &mut Extraction) {
    if PENDING_METRIC_RE.is_match(scan) {
        found.metric_field = Some(Field::Pending);
        blank(scan, &PENDING_METRIC_RE);
    } else if CREDIT_SCORE_RE.is_match(scan) {
        found.metric_field = Some(Field::CreditScore);
        blank(scan, &CREDIT_SCORE_RE);
    }
}

fn extract_group_keys(
    scan: &mut String,
    schema: &SchemaDescription,
    found: &mut Extraction,
) -> Result<(), TranslationError> {
    let Some(caps) = GROUP_RE.captures(scan) else {
        return Ok(());
    };
    for word in KEY_SPLIT_RE.split(&caps[1]) {
        let word = word.trim();
        let word = word.strip_prefix("the ").unwrap_or(word).trim();
        if word.is_empty() {
            continue;
        }
        let field = schema
            .resolve_field(word)
            .ok_or_else(|| TranslationError::UnresolvableField(word.to_string()))?;
        found.group_keys.push(field);
    }
    let clause = caps[0].to_string();
    *scan = scan.replacen(&clause, " ", 1);
    Ok(())
}

fn extract_which(
    scan: &mut String,
    schema: &SchemaDescription,
) -> Result<Option<WhichTarget>, TranslationError> {
    let Some(caps) = WHICH_RE.captures(scan) else {
        return Ok(None);
    };
    let word = caps[1].trim().to_lowercase();
    // "which loans have ..." asks for a listing, not a comparison.
    if matches!(word.as_str(), "loan" | "loans") {
        return Ok(None);
    }
    let target = match schema.resolve_field(&word) {
        Some(field) => WhichTarget::Field(field),
        None if REFERENTIAL_WORDS.contains(&word.as_str()) => WhichTarget::Referential,
        None => return Err(TranslationError::UnresolvableField(word)),
    };
    let clause = caps[0].to_string();
    *scan = scan.replacen(&clause, " ", 1);
    Ok(Some(target))
}

fn aggregate_op(scan: &str) -> Option<AggregateOp> {
    if AVG_RE.is_match(scan) {
        Some(AggregateOp::Avg)
    } else if COUNT_RE.is_match(scan) {
        Some(AggregateOp::Count)
    } else if SUM_RE.is_match(scan) {
        Some(AggregateOp::Sum)
    } else if HIGHEST_RE.is_match(scan) {
        Some(AggregateOp::Max)
    } else if LOWEST_RE.is_match(scan) {
        Some(AggregateOp::Min)
    } else {
        None
    }
}

/// "how many", or "most"/"fewest" with no amount wording ("the most loans").
fn wants_count(scan: &str) -> bool {
    COUNT_RE.is_match(scan) || (MOST_FEWEST_RE.is_match(scan) && !AMOUNT_WORD_RE.is_match(scan))
}

/// Most recent grouped table. The single row a comparison picked is never
/// threaded, so consecutive comparisons rank the same groups.
fn latest_grouped_result(turns: &[ConversationTurn]) -> Option<&QueryResult> {
    turns
        .iter()
        .rev()
        .filter_map(|t| t.produced_result.as_ref())
        .find(|r| matches!(r, QueryResult::Table(_)) && !r.key_fields().is_empty())
}

/// Pick the column of an earlier grouped result the question ranks by.
fn threaded_metric(table: &QueryResult, scan: &str) -> Result<Metric, TranslationError> {
    let base = table.primary_metric().ok_or_else(|| {
        TranslationError::AmbiguousReference("the earlier result has no metric".to_string())
    })?;
    let has_count = match table {
        QueryResult::Table(rows) => rows.first().is_some_and(|r| r.values.contains_key("count")),
        QueryResult::Row(row) => row.values.contains_key("count"),
        QueryResult::Scalar(_) => false,
    };

    if wants_count(scan) && has_count {
        return Ok(Metric::Column("count".to_string()));
    }
    if AVG_RE.is_match(scan) && has_count && base.starts_with("total_") {
        return Ok(Metric::PerCount(base));
    }
    Ok(Metric::Column(base))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Row, Scalar};

    fn translate(question: &str) -> Result<QueryExpression, TranslationError> {
        translate_with(question, &[])
    }

    fn translate_with(
        question: &str,
        prior: &[ConversationTurn],
    ) -> Result<QueryExpression, TranslationError> {
        let schema = SchemaDescription::loans();
        RuleTranslator::new(&schema).translate_text(question, prior, &schema)
    }

    fn grouped_table() -> QueryResult {
        let mut row = Row::default();
        row.key.insert("region".into(), Scalar::Text("Central".into()));
        row.key.insert("sex".into(), Scalar::Text("Female".into()));
        row.values
            .insert("total_amount".into(), Scalar::Number(Decimal::from(40500)));
        row.values.insert("count".into(), Scalar::Number(Decimal::from(2)));
        QueryResult::Table(vec![row])
    }

    fn prior_with_table() -> Vec<ConversationTurn> {
        vec![
            ConversationTurn::human("Group total loans by region and gender"),
            ConversationTurn::ai("Grouped", Some(grouped_table())),
        ]
    }

    // ---- Aggregates ----

    #[test]
    fn test_lookup_for_named_borrower() {
        let expr = translate("What is the loan amount for Juan Perez?").unwrap();
        assert_eq!(
            expr,
            QueryExpression::Aggregate(Aggregate::new(
                AggregateOp::Sum,
                Field::LoanAmount,
                vec![Predicate::eq_text(Field::UserName, "Juan Perez")],
            ))
        );
    }

    #[test]
    fn test_total_pending_status_in_currency() {
        let expr = translate("Total pending loan amount in COP?").unwrap();
        let QueryExpression::Aggregate(agg) = expr else {
            panic!("expected aggregate");
        };
        assert_eq!(agg.op, AggregateOp::Sum);
        assert_eq!(agg.field, Field::LoanAmount);
        assert!(agg
            .filter
            .contains(&Predicate::eq_text(Field::RepaymentStatus, "Pending")));
        assert!(agg.filter.contains(&Predicate::eq_text(Field::Currency, "COP")));
        assert_eq!(agg.filter.len(), 2);
    }

    #[test]
    fn test_average_for_women_in_region() {
        let expr = translate("Average loan for women in Central region").unwrap();
        let QueryExpression::Aggregate(agg) = expr else {
            panic!("expected aggregate");
        };
        assert_eq!(agg.op, AggregateOp::Avg);
        assert_eq!(agg.field, Field::LoanAmount);
        assert!(agg.filter.contains(&Predicate::eq_text(Field::Sex, "Female")));
        assert!(agg.filter.contains(&Predicate::eq_text(Field::Region, "Central")));
    }

    #[test]
    fn test_outstanding_balance_selects_pending_field() {
        let expr = translate("What is the total outstanding balance for men?").unwrap();
        let QueryExpression::Aggregate(agg) = expr else {
            panic!("expected aggregate");
        };
        assert_eq!(agg.field, Field::Pending);
        assert_eq!(agg.filter, vec![Predicate::eq_text(Field::Sex, "Male")]);
    }

    #[test]
    fn test_how_many_late_loans() {
        let expr = translate("How many late loans are there?").unwrap();
        let QueryExpression::Aggregate(agg) = expr else {
            panic!("expected aggregate");
        };
        assert_eq!(agg.op, AggregateOp::Count);
        assert_eq!(agg.filter, vec![Predicate::eq_text(Field::RepaymentStatus, "Late")]);
    }

    #[test]
    fn test_highest_loan_is_max() {
        let expr = translate("What is the highest loan in USD?").unwrap();
        let QueryExpression::Aggregate(agg) = expr else {
            panic!("expected aggregate");
        };
        assert_eq!(agg.op, AggregateOp::Max);
    }

    #[test]
    fn test_average_credit_score() {
        let expr = translate("Average credit score for women").unwrap();
        let QueryExpression::Aggregate(agg) = expr else {
            panic!("expected aggregate");
        };
        assert_eq!(agg.field, Field::CreditScore);
    }

    #[test]
    fn test_plain_loan_question_defaults_to_count() {
        let expr = translate("Tell me about the loans").unwrap();
        assert_eq!(
            expr,
            QueryExpression::Aggregate(Aggregate::new(AggregateOp::Count, Field::LoanAmount, vec![]))
        );
    }

    // ---- Filters ----

    #[test]
    fn test_years_and_thresholds() {
        let expr = translate("List loans over 10,000 disbursed before 2023").unwrap();
        let QueryExpression::Filter(preds) = expr else {
            panic!("expected filter");
        };
        assert!(preds.contains(&Predicate::new(
            Field::LoanAmount,
            Comparison::Gt(Value::Number(Decimal::from(10000)))
        )));
        assert!(preds.contains(&Predicate::new(
            Field::DisbursedDate,
            Comparison::Lt(Value::Date(NaiveDate::from_ymd_opt(2023, 1, 1).unwrap()))
        )));
    }

    #[test]
    fn test_in_year_is_a_range() {
        let expr = translate("Show loans in 2023").unwrap();
        let QueryExpression::Filter(preds) = expr else {
            panic!("expected filter");
        };
        assert_eq!(preds.len(), 2);
    }

    #[test]
    fn test_oversized_thousands_threshold_is_rejected() {
        let err = translate("How many loans over 79228162514264337593543951k?").unwrap_err();
        assert_eq!(
            err,
            TranslationError::ValueOutOfRange("79228162514264337593543951k".into())
        );
    }

    #[test]
    fn test_credit_score_threshold() {
        let expr = translate("Find borrowers with credit score at least 700").unwrap();
        let QueryExpression::Filter(preds) = expr else {
            panic!("expected filter");
        };
        assert_eq!(
            preds,
            vec![Predicate::new(
                Field::CreditScore,
                Comparison::Gte(Value::Number(Decimal::from(700)))
            )]
        );
    }

    #[test]
    fn test_thousands_suffix() {
        let expr = translate("How many loans under 5k?").unwrap();
        let QueryExpression::Aggregate(agg) = expr else {
            panic!("expected aggregate");
        };
        assert_eq!(
            agg.filter,
            vec![Predicate::new(
                Field::LoanAmount,
                Comparison::Lt(Value::Number(Decimal::from(5000)))
            )]
        );
    }

    #[test]
    fn test_two_values_of_one_field_become_in() {
        let expr = translate("List loans in North and South").unwrap();
        let QueryExpression::Filter(preds) = expr else {
            panic!("expected filter");
        };
        assert_eq!(
            preds,
            vec![Predicate::new(
                Field::Region,
                Comparison::In(vec![Value::Text("North".into()), Value::Text("South".into())])
            )]
        );
    }

    #[test]
    fn test_capitalised_region_is_not_a_name() {
        let expr = translate("Total loans for Central Region").unwrap();
        let QueryExpression::Aggregate(agg) = expr else {
            panic!("expected aggregate");
        };
        assert_eq!(agg.filter, vec![Predicate::eq_text(Field::Region, "Central")]);
    }

    // ---- Grouping and comparison ----

    #[test]
    fn test_group_by_region_and_gender() {
        let expr = translate("Group total loans by region and gender").unwrap();
        let QueryExpression::GroupBy(group) = expr else {
            panic!("expected group_by");
        };
        assert_eq!(group.keys, vec![Field::Region, Field::Sex]);
        assert_eq!(group.agg.op, AggregateOp::Sum);
        assert_eq!(group.agg.field, Field::LoanAmount);
        assert!(group.agg.filter.is_empty());
    }

    #[test]
    fn test_group_by_unknown_field() {
        let err = translate("Total loans by occupation").unwrap_err();
        assert_eq!(err, TranslationError::UnresolvableField("occupation".into()));
    }

    #[test]
    fn test_which_follow_up_threads_previous_table() {
        let prior = prior_with_table();
        let expr =
            translate_with("Which region has the highest average loan amount?", &prior).unwrap();
        assert_eq!(
            expr,
            QueryExpression::Compare(Compare::new(
                CompareSource::Prior(grouped_table()),
                Select::Max,
                Metric::PerCount("total_amount".into()),
            ))
        );
    }

    #[test]
    fn test_second_comparison_ranks_the_grouped_table_again() {
        let mut prior = prior_with_table();
        let mut best = Row::default();
        best.key.insert("region".into(), Scalar::Text("Central".into()));
        best.values
            .insert("average_amount".into(), Scalar::Number(Decimal::from(20250)));
        prior.push(ConversationTurn::human("Which region has the highest average loan amount?"));
        prior.push(ConversationTurn::ai("Central", Some(QueryResult::Row(best))));

        let expr =
            translate_with("Which region has the lowest average loan amount?", &prior).unwrap();
        assert_eq!(
            expr,
            QueryExpression::Compare(Compare::new(
                CompareSource::Prior(grouped_table()),
                Select::Min,
                Metric::PerCount("total_amount".into()),
            ))
        );
    }

    #[test]
    fn test_which_without_prior_builds_fresh_grouping() {
        let expr = translate("Which region has the lowest total loan amount?").unwrap();
        let QueryExpression::Compare(cmp) = expr else {
            panic!("expected compare");
        };
        assert_eq!(cmp.select, Select::Min);
        assert_eq!(cmp.metric, Metric::Column("total_amount".into()));
        let CompareSource::GroupBy(group) = *cmp.over else {
            panic!("expected grouped source");
        };
        assert_eq!(group.keys, vec![Field::Region]);
    }

    #[test]
    fn test_which_has_most_loans_counts() {
        let expr = translate("Which currency has the most loans?").unwrap();
        let QueryExpression::Compare(cmp) = expr else {
            panic!("expected compare");
        };
        assert_eq!(cmp.metric, Metric::Column("count".into()));
    }

    #[test]
    fn test_which_unknown_field() {
        let err = translate("Which planet has the highest loan?").unwrap_err();
        assert_eq!(err, TranslationError::UnresolvableField("planet".into()));
    }

    #[test]
    fn test_follow_up_without_prior_is_ambiguous() {
        let err = translate("Of those, which one is the highest?").unwrap_err();
        assert!(matches!(err, TranslationError::AmbiguousReference(_)));
    }

    #[test]
    fn test_follow_up_phrase_threads_previous_table() {
        let expr = translate_with("Of those, which one has the lowest count?", &prior_with_table())
            .unwrap();
        let QueryExpression::Compare(cmp) = expr else {
            panic!("expected compare");
        };
        assert_eq!(cmp.select, Select::Min);
        assert_eq!(cmp.metric, Metric::Column("count".into()));
    }

    #[test]
    fn test_unrelated_question_is_ambiguous() {
        let err = translate("What's the weather like?").unwrap_err();
        assert!(matches!(err, TranslationError::AmbiguousReference(_)));
    }
}
