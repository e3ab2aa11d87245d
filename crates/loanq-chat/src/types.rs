//! Query algebra, results, and conversation types.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use loanq_core::schema::Field;
use loanq_core::types::{decimal_to_json, LoanRecord, Value};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize, Serializer};
use uuid::Uuid;

// =============================================================================
// Predicates
// =============================================================================

/// Comparison applied to one field of a record.
#[derive(Debug, Clone, PartialEq)]
pub enum Comparison {
    Eq(Value),
    Ne(Value),
    Gt(Value),
    Gte(Value),
    Lt(Value),
    Lte(Value),
    In(Vec<Value>),
    /// Case-insensitive substring match on text fields.
    Contains(String),
}

impl Comparison {
    pub fn operator(&self) -> &'static str {
        match self {
            Comparison::Eq(_) => "eq",
            Comparison::Ne(_) => "ne",
            Comparison::Gt(_) => "gt",
            Comparison::Gte(_) => "gte",
            Comparison::Lt(_) => "lt",
            Comparison::Lte(_) => "lte",
            Comparison::In(_) => "in",
            Comparison::Contains(_) => "contains",
        }
    }

    /// Whether the operator orders values rather than testing equality.
    pub fn is_ordering(&self) -> bool {
        matches!(
            self,
            Comparison::Gt(_) | Comparison::Gte(_) | Comparison::Lt(_) | Comparison::Lte(_)
        )
    }

    /// Operand values, empty for `Contains`.
    pub fn operands(&self) -> Vec<&Value> {
        match self {
            Comparison::Eq(v)
            | Comparison::Ne(v)
            | Comparison::Gt(v)
            | Comparison::Gte(v)
            | Comparison::Lt(v)
            | Comparison::Lte(v) => vec![v],
            Comparison::In(values) => values.iter().collect(),
            Comparison::Contains(_) => vec![],
        }
    }
}

/// One `(field, operator, value)` condition.
#[derive(Debug, Clone, PartialEq)]
pub struct Predicate {
    pub field: Field,
    pub comparison: Comparison,
}

impl Predicate {
    pub fn new(field: Field, comparison: Comparison) -> Self {
        Self { field, comparison }
    }

    pub fn eq(field: Field, value: Value) -> Self {
        Self::new(field, Comparison::Eq(value))
    }

    pub fn eq_text(field: Field, value: &str) -> Self {
        Self::eq(field, Value::Text(value.to_string()))
    }
}

impl fmt::Display for Predicate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.comparison {
            Comparison::In(values) => {
                let list: Vec<String> = values.iter().map(|v| v.to_string()).collect();
                write!(f, "{} in [{}]", self.field, list.join(", "))
            }
            Comparison::Contains(s) => write!(f, "{} contains {}", self.field, s),
            other => {
                let symbol = match other {
                    Comparison::Eq(_) => "=",
                    Comparison::Ne(_) => "!=",
                    Comparison::Gt(_) => ">",
                    Comparison::Gte(_) => ">=",
                    Comparison::Lt(_) => "<",
                    _ => "<=",
                };
                let operand = other.operands().first().map(|v| v.to_string()).unwrap_or_default();
                write!(f, "{} {} {}", self.field, symbol, operand)
            }
        }
    }
}

// =============================================================================
// Query expressions
// =============================================================================

/// Aggregate function.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AggregateOp {
    Sum,
    Avg,
    Count,
    Min,
    Max,
}

impl AggregateOp {
    pub fn as_str(&self) -> &'static str {
        match self {
            AggregateOp::Sum => "sum",
            AggregateOp::Avg => "avg",
            AggregateOp::Count => "count",
            AggregateOp::Min => "min",
            AggregateOp::Max => "max",
        }
    }
}

/// `op(field)` over the records matching `filter` (all records when empty).
#[derive(Debug, Clone, PartialEq)]
pub struct Aggregate {
    pub op: AggregateOp,
    pub field: Field,
    pub filter: Vec<Predicate>,
}

impl Aggregate {
    pub fn new(op: AggregateOp, field: Field, filter: Vec<Predicate>) -> Self {
        Self { op, field, filter }
    }

    /// Name of the result column this aggregate produces.
    pub fn metric_name(&self) -> String {
        let stem = self.field.metric_stem();
        match self.op {
            AggregateOp::Sum => format!("total_{}", stem),
            AggregateOp::Avg => format!("average_{}", stem),
            AggregateOp::Min => format!("min_{}", stem),
            AggregateOp::Max => format!("max_{}", stem),
            AggregateOp::Count => "count".to_string(),
        }
    }
}

/// One aggregate per unique combination of `keys`.
#[derive(Debug, Clone, PartialEq)]
pub struct GroupBy {
    pub keys: Vec<Field>,
    pub agg: Aggregate,
}

impl GroupBy {
    /// Build a grouping; repeated keys are dropped, first occurrence wins.
    pub fn new(keys: Vec<Field>, agg: Aggregate) -> Self {
        let mut unique = Vec::with_capacity(keys.len());
        for key in keys {
            if !unique.contains(&key) {
                unique.push(key);
            }
        }
        Self { keys: unique, agg }
    }
}

/// Which extreme a comparison selects.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Select {
    Max,
    Min,
}

/// Value a comparison ranks rows by.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Metric {
    /// A named result column.
    Column(String),
    /// A column divided by the row's `count`.
    PerCount(String),
}

impl Metric {
    /// Result column name, `average_<x>` for per-count metrics of `total_<x>`.
    pub fn label(&self) -> String {
        match self {
            Metric::Column(column) => column.clone(),
            Metric::PerCount(column) => {
                let stem = column.strip_prefix("total_").unwrap_or(column);
                format!("average_{}", stem)
            }
        }
    }
}

/// Input of a comparison.
#[derive(Debug, Clone, PartialEq)]
pub enum CompareSource {
    GroupBy(GroupBy),
    Aggregate(Aggregate),
    /// A result produced by an earlier turn.
    Prior(QueryResult),
}

/// Select the row with the extreme metric value.
#[derive(Debug, Clone, PartialEq)]
pub struct Compare {
    pub over: Box<CompareSource>,
    pub select: Select,
    pub metric: Metric,
}

impl Compare {
    pub fn new(over: CompareSource, select: Select, metric: Metric) -> Self {
        Self {
            over: Box::new(over),
            select,
            metric,
        }
    }
}

/// A schema-bound query, built fresh for each question.
#[derive(Debug, Clone, PartialEq)]
pub enum QueryExpression {
    Filter(Vec<Predicate>),
    Aggregate(Aggregate),
    GroupBy(GroupBy),
    Compare(Compare),
}

impl QueryExpression {
    /// Short operation name for logs.
    pub fn op_name(&self) -> &'static str {
        match self {
            QueryExpression::Filter(_) => "filter",
            QueryExpression::Aggregate(_) => "aggregate",
            QueryExpression::GroupBy(_) => "group_by",
            QueryExpression::Compare(_) => "compare",
        }
    }
}

// =============================================================================
// Results
// =============================================================================

/// A single result value.
#[derive(Debug, Clone, PartialEq)]
pub enum Scalar {
    Number(Decimal),
    Text(String),
    Null,
}

impl Scalar {
    pub fn as_number(&self) -> Option<Decimal> {
        match self {
            Scalar::Number(n) => Some(*n),
            _ => None,
        }
    }

    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Scalar::Number(n) => decimal_to_json(*n),
            Scalar::Text(s) => serde_json::Value::String(s.clone()),
            Scalar::Null => serde_json::Value::Null,
        }
    }
}

impl From<Value> for Scalar {
    fn from(value: Value) -> Self {
        match value {
            Value::Number(n) => Scalar::Number(n),
            Value::Text(s) => Scalar::Text(s),
            Value::Date(d) => Scalar::Text(d.format("%Y-%m-%d").to_string()),
        }
    }
}

impl From<Option<Decimal>> for Scalar {
    fn from(value: Option<Decimal>) -> Self {
        value.map(Scalar::Number).unwrap_or(Scalar::Null)
    }
}

impl fmt::Display for Scalar {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Scalar::Number(n) => write!(f, "{}", n.normalize()),
            Scalar::Text(s) => f.write_str(s),
            Scalar::Null => f.write_str("null"),
        }
    }
}

/// A result row. Grouped rows carry their key fields in `key`, apart from
/// the metric columns in `values`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Row {
    pub key: BTreeMap<String, Scalar>,
    pub values: BTreeMap<String, Scalar>,
}

impl Row {
    /// A keyless row holding every field of a record.
    pub fn from_record(record: &LoanRecord) -> Self {
        let values = Field::ALL
            .iter()
            .map(|f| (f.name().to_string(), Scalar::from(record.value(*f))))
            .collect();
        Self {
            key: BTreeMap::new(),
            values,
        }
    }

    /// Look a column up among the metric values, then the key fields.
    pub fn get(&self, column: &str) -> Option<&Scalar> {
        self.values.get(column).or_else(|| self.key.get(column))
    }

    pub fn is_grouped(&self) -> bool {
        !self.key.is_empty()
    }

    /// `{"_id": {keys}, ...values}` for grouped rows, the plain values otherwise.
    pub fn to_json(&self) -> serde_json::Value {
        let mut map = serde_json::Map::new();
        if self.is_grouped() {
            let key: serde_json::Map<String, serde_json::Value> = self
                .key
                .iter()
                .map(|(k, v)| (k.clone(), v.to_json()))
                .collect();
            map.insert("_id".to_string(), serde_json::Value::Object(key));
        }
        for (column, value) in &self.values {
            map.insert(column.clone(), value.to_json());
        }
        serde_json::Value::Object(map)
    }
}

/// Outcome of executing a query expression.
#[derive(Debug, Clone, PartialEq)]
pub enum QueryResult {
    Scalar(Scalar),
    Row(Row),
    Table(Vec<Row>),
}

impl QueryResult {
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            QueryResult::Scalar(s) => s.to_json(),
            QueryResult::Row(row) => row.to_json(),
            QueryResult::Table(rows) => {
                serde_json::Value::Array(rows.iter().map(Row::to_json).collect())
            }
        }
    }

    /// Key fields of the rows, empty for scalars and record tables.
    pub fn key_fields(&self) -> Vec<String> {
        match self {
            QueryResult::Row(row) => row.key.keys().cloned().collect(),
            QueryResult::Table(rows) => rows
                .first()
                .map(|r| r.key.keys().cloned().collect())
                .unwrap_or_default(),
            QueryResult::Scalar(_) => vec![],
        }
    }

    /// The first metric column of a grouped result other than `count`.
    pub fn primary_metric(&self) -> Option<String> {
        let row = match self {
            QueryResult::Row(row) => row,
            QueryResult::Table(rows) => rows.first()?,
            QueryResult::Scalar(_) => return None,
        };
        row.values
            .keys()
            .find(|c| c.as_str() != "count")
            .or_else(|| row.values.keys().next())
            .cloned()
    }
}

impl Serialize for QueryResult {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.to_json().serialize(serializer)
    }
}

// =============================================================================
// Conversation
// =============================================================================

/// Author of a conversation turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Human,
    Ai,
}

/// One message in a session's history. Never mutated after creation.
#[derive(Debug, Clone, Serialize)]
pub struct ConversationTurn {
    pub id: Uuid,
    pub role: Role,
    pub content: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub produced_result: Option<QueryResult>,
    pub created_at: DateTime<Utc>,
}

impl ConversationTurn {
    pub fn human(content: &str) -> Self {
        Self {
            id: Uuid::new_v4(),
            role: Role::Human,
            content: content.to_string(),
            produced_result: None,
            created_at: Utc::now(),
        }
    }

    pub fn ai(content: &str, produced_result: Option<QueryResult>) -> Self {
        Self {
            id: Uuid::new_v4(),
            role: Role::Ai,
            content: content.to_string(),
            produced_result,
            created_at: Utc::now(),
        }
    }
}

/// Answer to one question.
#[derive(Debug, Clone, Serialize)]
pub struct QueryResponse {
    pub result: QueryResult,
    pub explanation: String,
}
