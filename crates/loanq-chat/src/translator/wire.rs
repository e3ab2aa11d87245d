//! JSON wire format requested from the language model.
//!
//! ```json
//! {"op":"aggregate","agg":"sum","field":"loan_amount","predicates":[{"field":"currency","op":"eq","value":"COP"}]}
//! {"op":"compare","over":"previous","select":"max","metric":"total_amount","per_count":true}
//! ```

use std::str::FromStr;

use loanq_core::schema::{Field, SchemaDescription};
use loanq_core::types::Value;
use rust_decimal::Decimal;
use serde::Deserialize;

use crate::error::TranslationError;
use crate::types::{
    Aggregate, AggregateOp, Compare, CompareSource, Comparison, GroupBy, Metric, Predicate,
    QueryExpression, QueryResult, Select,
};

#[derive(Debug, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum WireExpression {
    Filter {
        #[serde(default)]
        predicates: Vec<WirePredicate>,
    },
    Aggregate {
        agg: AggregateOp,
        #[serde(default)]
        field: Option<String>,
        #[serde(default)]
        predicates: Vec<WirePredicate>,
    },
    GroupBy {
        keys: Vec<String>,
        agg: AggregateOp,
        #[serde(default)]
        field: Option<String>,
        #[serde(default)]
        predicates: Vec<WirePredicate>,
    },
    Compare {
        over: WireSource,
        select: Select,
        metric: String,
        #[serde(default)]
        per_count: bool,
    },
}

/// Input of a wire comparison: `"previous"` or a nested expression.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub enum WireSource {
    Reference(String),
    Expression(Box<WireExpression>),
}

#[derive(Debug, Deserialize)]
pub struct WirePredicate {
    pub field: String,
    pub op: WireOperator,
    pub value: serde_json::Value,
}

#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WireOperator {
    Eq,
    Ne,
    Gt,
    Gte,
    Lt,
    Lte,
    In,
    Contains,
}

/// Parse a model reply into a schema-bound expression.
///
/// Prose around the JSON object is ignored: the text from the first `{` to
/// the last `}` is parsed.
pub fn parse_reply(
    reply: &str,
    schema: &SchemaDescription,
    previous: Option<&QueryResult>,
) -> Result<QueryExpression, TranslationError> {
    let json = extract_object(reply).ok_or_else(|| {
        TranslationError::ProviderFailure("model reply contains no JSON object".to_string())
    })?;
    let wire: WireExpression = serde_json::from_str(json).map_err(|e| {
        TranslationError::ProviderFailure(format!("model reply is not a valid query: {}", e))
    })?;
    wire.resolve(schema, previous)
}

fn extract_object(reply: &str) -> Option<&str> {
    let start = reply.find('{')?;
    let end = reply.rfind('}')?;
    (end > start).then(|| &reply[start..=end])
}

impl WireExpression {
    /// Bind names to schema fields and literals to typed values.
    pub fn resolve(
        self,
        schema: &SchemaDescription,
        previous: Option<&QueryResult>,
    ) -> Result<QueryExpression, TranslationError> {
        match self {
            WireExpression::Filter { predicates } => {
                Ok(QueryExpression::Filter(resolve_predicates(schema, predicates)?))
            }
            WireExpression::Aggregate {
                agg,
                field,
                predicates,
            } => Ok(QueryExpression::Aggregate(resolve_aggregate(
                schema, agg, field, predicates,
            )?)),
            WireExpression::GroupBy {
                keys,
                agg,
                field,
                predicates,
            } => {
                let keys = keys
                    .iter()
                    .map(|k| resolve_field(schema, k))
                    .collect::<Result<Vec<_>, _>>()?;
                if keys.is_empty() {
                    return Err(TranslationError::ProviderFailure(
                        "group_by needs at least one key".to_string(),
                    ));
                }
                let agg = resolve_aggregate(schema, agg, field, predicates)?;
                Ok(QueryExpression::GroupBy(GroupBy::new(keys, agg)))
            }
            WireExpression::Compare {
                over,
                select,
                metric,
                per_count,
            } => {
                let source = match over {
                    WireSource::Reference(name) if name.eq_ignore_ascii_case("previous") => {
                        let table = previous.ok_or_else(|| {
                            TranslationError::AmbiguousReference(
                                "there is no earlier result to compare".to_string(),
                            )
                        })?;
                        CompareSource::Prior(table.clone())
                    }
                    WireSource::Reference(name) => {
                        return Err(TranslationError::ProviderFailure(format!(
                            "unknown comparison source: {}",
                            name
                        )))
                    }
                    WireSource::Expression(inner) => match inner.resolve(schema, previous)? {
                        QueryExpression::GroupBy(group) => CompareSource::GroupBy(group),
                        QueryExpression::Aggregate(agg) => CompareSource::Aggregate(agg),
                        other => {
                            return Err(TranslationError::ProviderFailure(format!(
                                "cannot compare over a {} expression",
                                other.op_name()
                            )))
                        }
                    },
                };
                let metric = if per_count {
                    Metric::PerCount(metric)
                } else {
                    Metric::Column(metric)
                };
                Ok(QueryExpression::Compare(Compare::new(source, select, metric)))
            }
        }
    }
}

fn resolve_field(schema: &SchemaDescription, raw: &str) -> Result<Field, TranslationError> {
    schema
        .resolve_field(raw)
        .ok_or_else(|| TranslationError::UnresolvableField(raw.to_string()))
}

fn resolve_aggregate(
    schema: &SchemaDescription,
    op: AggregateOp,
    field: Option<String>,
    predicates: Vec<WirePredicate>,
) -> Result<Aggregate, TranslationError> {
    let field = match (field, op) {
        (Some(name), _) => resolve_field(schema, &name)?,
        (None, AggregateOp::Count) => Field::LoanAmount,
        (None, _) => {
            return Err(TranslationError::ProviderFailure(format!(
                "{} aggregate needs a field",
                op.as_str()
            )))
        }
    };
    Ok(Aggregate::new(op, field, resolve_predicates(schema, predicates)?))
}

fn resolve_predicates(
    schema: &SchemaDescription,
    predicates: Vec<WirePredicate>,
) -> Result<Vec<Predicate>, TranslationError> {
    predicates
        .into_iter()
        .map(|p| {
            let field = resolve_field(schema, &p.field)?;
            let comparison = match p.op {
                WireOperator::In => {
                    let items = match p.value {
                        serde_json::Value::Array(items) => items,
                        single => vec![single],
                    };
                    Comparison::In(
                        items
                            .iter()
                            .map(|v| literal(schema, field, v))
                            .collect::<Result<_, _>>()?,
                    )
                }
                WireOperator::Contains => match p.value {
                    serde_json::Value::String(s) => Comparison::Contains(s),
                    other => Comparison::Contains(other.to_string()),
                },
                op => {
                    let value = literal(schema, field, &p.value)?;
                    match op {
                        WireOperator::Eq => Comparison::Eq(value),
                        WireOperator::Ne => Comparison::Ne(value),
                        WireOperator::Gt => Comparison::Gt(value),
                        WireOperator::Gte => Comparison::Gte(value),
                        WireOperator::Lt => Comparison::Lt(value),
                        _ => Comparison::Lte(value),
                    }
                }
            };
            Ok(Predicate::new(field, comparison))
        })
        .collect()
}

/// Type a JSON literal for `field`. Literals that do not fit the field keep
/// their JSON type so the executor can report the mismatch.
fn literal(
    schema: &SchemaDescription,
    field: Field,
    json: &serde_json::Value,
) -> Result<Value, TranslationError> {
    let (raw, is_number) = match json {
        serde_json::Value::String(s) => (s.clone(), false),
        serde_json::Value::Number(n) => (n.to_string(), true),
        other => {
            return Err(TranslationError::ProviderFailure(format!(
                "unsupported literal for {}: {}",
                field, other
            )))
        }
    };
    if let Some(value) = schema.parse_value(field, &raw) {
        return Ok(value);
    }
    if is_number {
        if let Ok(n) = Decimal::from_str(&raw) {
            return Ok(Value::Number(n));
        }
    }
    Ok(Value::Text(raw))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Row;
    use chrono::NaiveDate;

    fn parse(reply: &str) -> Result<QueryExpression, TranslationError> {
        parse_reply(reply, &SchemaDescription::loans(), None)
    }

    #[test]
    fn test_parse_aggregate_with_prose() {
        let reply = r#"Sure! Here is the query:
{"op":"aggregate","agg":"sum","field":"loan_amount","predicates":[{"field":"currency","op":"eq","value":"cop"}]}
Let me know if you need anything else."#;
        let expr = parse(reply).unwrap();
        assert_eq!(
            expr,
            QueryExpression::Aggregate(Aggregate::new(
                AggregateOp::Sum,
                Field::LoanAmount,
                vec![Predicate::eq_text(Field::Currency, "COP")],
            ))
        );
    }

    #[test]
    fn test_parse_group_by_with_synonyms() {
        let expr = parse(r#"{"op":"group_by","keys":["region","gender"],"agg":"sum","field":"amount"}"#)
            .unwrap();
        let QueryExpression::GroupBy(group) = expr else {
            panic!("expected group_by");
        };
        assert_eq!(group.keys, vec![Field::Region, Field::Sex]);
        assert_eq!(group.agg.field, Field::LoanAmount);
    }

    #[test]
    fn test_count_without_field() {
        let expr = parse(r#"{"op":"aggregate","agg":"count"}"#).unwrap();
        assert!(matches!(
            expr,
            QueryExpression::Aggregate(Aggregate {
                op: AggregateOp::Count,
                ..
            })
        ));
        assert!(parse(r#"{"op":"aggregate","agg":"avg"}"#).is_err());
    }

    #[test]
    fn test_unknown_field_is_unresolvable() {
        let err = parse(r#"{"op":"filter","predicates":[{"field":"occupation","op":"eq","value":"x"}]}"#)
            .unwrap_err();
        assert_eq!(err, TranslationError::UnresolvableField("occupation".into()));
    }

    #[test]
    fn test_malformed_json_is_provider_failure() {
        assert!(matches!(
            parse("I cannot help with that."),
            Err(TranslationError::ProviderFailure(_))
        ));
        assert!(matches!(
            parse(r#"{"op":"explode"}"#),
            Err(TranslationError::ProviderFailure(_))
        ));
    }

    #[test]
    fn test_compare_previous_requires_prior_result() {
        let reply = r#"{"op":"compare","over":"previous","select":"max","metric":"total_amount","per_count":true}"#;
        assert!(matches!(
            parse(reply),
            Err(TranslationError::AmbiguousReference(_))
        ));

        let table = QueryResult::Table(vec![Row::default()]);
        let expr = parse_reply(reply, &SchemaDescription::loans(), Some(&table)).unwrap();
        assert_eq!(
            expr,
            QueryExpression::Compare(Compare::new(
                CompareSource::Prior(table),
                Select::Max,
                Metric::PerCount("total_amount".into()),
            ))
        );
    }

    #[test]
    fn test_compare_over_nested_group_by() {
        let reply = r#"{"op":"compare","over":{"op":"group_by","keys":["currency"],"agg":"count"},"select":"min","metric":"count"}"#;
        let QueryExpression::Compare(cmp) = parse(reply).unwrap() else {
            panic!("expected compare");
        };
        assert_eq!(cmp.select, Select::Min);
        assert!(matches!(*cmp.over, CompareSource::GroupBy(_)));
    }

    #[test]
    fn test_literals_typed_by_field() {
        let reply = r#"{"op":"filter","predicates":[
            {"field":"loan_amount","op":"gte","value":1000.5},
            {"field":"disbursed_date","op":"lt","value":"2023-01-01"},
            {"field":"region","op":"in","value":["north","Central"]},
            {"field":"user_name","op":"contains","value":"perez"}
        ]}"#;
        let QueryExpression::Filter(preds) = parse(reply).unwrap() else {
            panic!("expected filter");
        };
        assert_eq!(
            preds[0].comparison,
            Comparison::Gte(Value::Number(Decimal::new(10005, 1)))
        );
        assert_eq!(
            preds[1].comparison,
            Comparison::Lt(Value::Date(NaiveDate::from_ymd_opt(2023, 1, 1).unwrap()))
        );
        assert_eq!(
            preds[2].comparison,
            Comparison::In(vec![Value::Text("North".into()), Value::Text("Central".into())])
        );
        assert_eq!(preds[3].comparison, Comparison::Contains("perez".into()));
    }

    #[test]
    fn test_mistyped_literal_kept_for_executor() {
        let reply = r#"{"op":"filter","predicates":[{"field":"loan_amount","op":"eq","value":"lots"}]}"#;
        let QueryExpression::Filter(preds) = parse(reply).unwrap() else {
            panic!("expected filter");
        };
        assert_eq!(preds[0].comparison, Comparison::Eq(Value::Text("lots".into())));
    }
}
