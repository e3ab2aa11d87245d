//! Query executor: evaluates expressions against a record store.

use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet};
use std::time::Instant;

use loanq_core::schema::{Field, FieldKind};
use loanq_core::types::{LoanRecord, Value};
use loanq_store::RecordStore;
use rust_decimal::Decimal;
use tracing::debug;

use crate::error::ExecutionError;
use crate::types::{
    Aggregate, AggregateOp, Compare, CompareSource, Comparison, GroupBy, Metric, Predicate,
    QueryExpression, QueryResult, Row, Scalar, Select,
};

/// Evaluates query expressions. Stateless apart from the currency policy.
#[derive(Debug, Clone)]
pub struct QueryExecutor {
    allow_mixed_currency: bool,
}

impl Default for QueryExecutor {
    fn default() -> Self {
        Self::new(true)
    }
}

impl QueryExecutor {
    pub fn new(allow_mixed_currency: bool) -> Self {
        Self {
            allow_mixed_currency,
        }
    }

    pub fn execute(
        &self,
        expr: &QueryExpression,
        store: &dyn RecordStore,
    ) -> Result<QueryResult, ExecutionError> {
        let started = Instant::now();
        let records = store.records();
        let result = match expr {
            QueryExpression::Filter(predicates) => {
                let rows = filter(predicates, records)?
                    .into_iter()
                    .map(Row::from_record)
                    .collect();
                QueryResult::Table(rows)
            }
            QueryExpression::Aggregate(agg) => QueryResult::Scalar(self.aggregate(agg, records)?),
            QueryExpression::GroupBy(group) => QueryResult::Table(self.group_by(group, records)?),
            QueryExpression::Compare(cmp) => QueryResult::Row(self.compare(cmp, records)?),
        };
        let rows = match &result {
            QueryResult::Table(rows) => rows.len(),
            _ => 1,
        };
        debug!(
            op = expr.op_name(),
            rows,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Query executed"
        );
        Ok(result)
    }

    fn aggregate(&self, agg: &Aggregate, records: &[LoanRecord]) -> Result<Scalar, ExecutionError> {
        check_aggregate_field(agg)?;
        let matched = filter(&agg.filter, records)?;
        self.check_currency(agg, &matched)?;
        compute(agg.op, agg.field, &matched)
    }

    fn group_by(&self, group: &GroupBy, records: &[LoanRecord]) -> Result<Vec<Row>, ExecutionError> {
        check_aggregate_field(&group.agg)?;
        let matched = filter(&group.agg.filter, records)?;

        // BTreeMap iteration yields key tuples in lexical order, which the
        // stable sort below keeps for equal metrics.
        let mut groups: BTreeMap<Vec<Value>, Vec<&LoanRecord>> = BTreeMap::new();
        for record in matched {
            let key = group.keys.iter().map(|f| record.value(*f)).collect();
            groups.entry(key).or_default().push(record);
        }

        let metric_name = group.agg.metric_name();
        let mut rows = Vec::with_capacity(groups.len());
        for (key, members) in groups {
            self.check_currency(&group.agg, &members)?;
            let mut row = Row::default();
            for (field, value) in group.keys.iter().zip(key) {
                row.key.insert(field.name().to_string(), Scalar::from(value));
            }
            row.values.insert(
                metric_name.clone(),
                compute(group.agg.op, group.agg.field, &members)?,
            );
            row.values.insert(
                "count".to_string(),
                Scalar::Number(Decimal::from(members.len())),
            );
            rows.push(row);
        }

        rows.sort_by(|a, b| {
            let a = a.values.get(&metric_name).and_then(Scalar::as_number);
            let b = b.values.get(&metric_name).and_then(Scalar::as_number);
            match (a, b) {
                (Some(a), Some(b)) => b.cmp(&a),
                (Some(_), None) => Ordering::Less,
                (None, Some(_)) => Ordering::Greater,
                (None, None) => Ordering::Equal,
            }
        });
        Ok(rows)
    }

    fn compare(&self, cmp: &Compare, records: &[LoanRecord]) -> Result<Row, ExecutionError> {
        let rows = match cmp.over.as_ref() {
            CompareSource::GroupBy(group) => self.group_by(group, records)?,
            CompareSource::Aggregate(agg) => {
                let mut row = Row::default();
                row.values.insert(agg.metric_name(), self.aggregate(agg, records)?);
                vec![row]
            }
            CompareSource::Prior(QueryResult::Table(rows)) => rows.clone(),
            CompareSource::Prior(QueryResult::Row(row)) => vec![row.clone()],
            CompareSource::Prior(QueryResult::Scalar(_)) => {
                return Err(ExecutionError::UnknownField(cmp.metric.label()))
            }
        };
        select_row(rows, cmp.select, &cmp.metric)
    }

    /// Reject monetary aggregates over several currencies when configured to.
    fn check_currency(&self, agg: &Aggregate, records: &[&LoanRecord]) -> Result<(), ExecutionError> {
        if self.allow_mixed_currency || agg.op == AggregateOp::Count || !agg.field.is_monetary() {
            return Ok(());
        }
        let currencies: BTreeSet<&str> = records.iter().map(|r| r.currency.as_str()).collect();
        if currencies.len() > 1 {
            return Err(ExecutionError::MixedCurrencies(
                currencies.into_iter().map(str::to_string).collect(),
            ));
        }
        Ok(())
    }
}

/// Records satisfying every predicate, in store order.
fn filter<'a>(
    predicates: &[Predicate],
    records: &'a [LoanRecord],
) -> Result<Vec<&'a LoanRecord>, ExecutionError> {
    for predicate in predicates {
        check_predicate(predicate)?;
    }
    Ok(records
        .iter()
        .filter(|r| predicates.iter().all(|p| matches(p, r)))
        .collect())
}

fn check_predicate(predicate: &Predicate) -> Result<(), ExecutionError> {
    let field = predicate.field;
    let kind = field.kind();
    let mismatch = |expected: &str, found: &str| ExecutionError::TypeMismatch {
        field: field.name().to_string(),
        expected: expected.to_string(),
        found: found.to_string(),
    };

    if let Comparison::Contains(_) = predicate.comparison {
        if !kind.is_textual() {
            return Err(mismatch(kind_name(kind), "text"));
        }
        return Ok(());
    }
    if kind.is_textual() && predicate.comparison.is_ordering() {
        return Err(mismatch("an ordered type", "text"));
    }
    for operand in predicate.comparison.operands() {
        let fits = match operand {
            Value::Text(_) => kind.is_textual(),
            Value::Number(_) => kind.is_numeric(),
            Value::Date(_) => kind == FieldKind::Date,
        };
        if !fits {
            return Err(mismatch(kind_name(kind), operand.type_name()));
        }
    }
    Ok(())
}

fn kind_name(kind: FieldKind) -> &'static str {
    match kind {
        FieldKind::Text | FieldKind::Category => "text",
        FieldKind::Decimal | FieldKind::Integer => "number",
        FieldKind::Date => "date",
    }
}

fn check_aggregate_field(agg: &Aggregate) -> Result<(), ExecutionError> {
    if agg.op != AggregateOp::Count && !agg.field.kind().is_numeric() {
        return Err(ExecutionError::TypeMismatch {
            field: agg.field.name().to_string(),
            expected: "number".to_string(),
            found: kind_name(agg.field.kind()).to_string(),
        });
    }
    Ok(())
}

fn matches(predicate: &Predicate, record: &LoanRecord) -> bool {
    let actual = record.value(predicate.field);
    match &predicate.comparison {
        Comparison::Eq(v) => order(&actual, v) == Some(Ordering::Equal),
        Comparison::Ne(v) => order(&actual, v) != Some(Ordering::Equal),
        Comparison::Gt(v) => order(&actual, v) == Some(Ordering::Greater),
        Comparison::Gte(v) => matches!(
            order(&actual, v),
            Some(Ordering::Greater | Ordering::Equal)
        ),
        Comparison::Lt(v) => order(&actual, v) == Some(Ordering::Less),
        Comparison::Lte(v) => matches!(order(&actual, v), Some(Ordering::Less | Ordering::Equal)),
        Comparison::In(values) => values
            .iter()
            .any(|v| order(&actual, v) == Some(Ordering::Equal)),
        Comparison::Contains(needle) => actual
            .as_text()
            .is_some_and(|s| s.to_lowercase().contains(&needle.to_lowercase())),
    }
}

/// Decimal ordering for numbers, calendar ordering for dates, and
/// case-insensitive equality for text. Values of different types are unordered.
fn order(a: &Value, b: &Value) -> Option<Ordering> {
    match (a, b) {
        (Value::Number(a), Value::Number(b)) => Some(a.cmp(b)),
        (Value::Date(a), Value::Date(b)) => Some(a.cmp(b)),
        (Value::Text(a), Value::Text(b)) => Some(a.to_lowercase().cmp(&b.to_lowercase())),
        _ => None,
    }
}

/// Aggregate over already-filtered records. Empty input gives `0` for sum
/// and count and null for avg, min and max.
fn compute(op: AggregateOp, field: Field, records: &[&LoanRecord]) -> Result<Scalar, ExecutionError> {
    if op == AggregateOp::Count {
        return Ok(Scalar::Number(Decimal::from(records.len())));
    }
    let numbers = records.iter().filter_map(|r| r.value(field).as_number());
    let scalar = match op {
        AggregateOp::Sum | AggregateOp::Avg => {
            let (total, n) = checked_total(numbers)
                .ok_or_else(|| ExecutionError::Overflow(format!("{} of {}", op.as_str(), field)))?;
            match op {
                AggregateOp::Avg if n == 0 => Scalar::Null,
                AggregateOp::Avg => Scalar::Number(total / Decimal::from(n)),
                _ => Scalar::Number(total),
            }
        }
        AggregateOp::Min => Scalar::from(numbers.min()),
        AggregateOp::Max => Scalar::from(numbers.max()),
        AggregateOp::Count => Scalar::Number(Decimal::from(records.len())),
    };
    Ok(scalar)
}

/// Sum and count of the values, or `None` once the sum leaves decimal range.
fn checked_total(mut numbers: impl Iterator<Item = Decimal>) -> Option<(Decimal, u64)> {
    numbers.try_fold((Decimal::ZERO, 0u64), |(total, n), x| {
        Some((total.checked_add(x)?, n + 1))
    })
}

fn metric_value(row: &Row, metric: &Metric) -> Option<Decimal> {
    match metric {
        Metric::Column(column) => row.get(column).and_then(Scalar::as_number),
        Metric::PerCount(column) => {
            let value = row.get(column).and_then(Scalar::as_number)?;
            let count = row.get("count").and_then(Scalar::as_number)?;
            value.checked_div(count)
        }
    }
}

/// Row with the extreme metric; ties go to the first row encountered.
fn select_row(rows: Vec<Row>, select: Select, metric: &Metric) -> Result<Row, ExecutionError> {
    if rows.is_empty() {
        return Err(ExecutionError::EmptyInputForCompare);
    }

    let mut best: Option<(usize, Decimal)> = None;
    for (i, row) in rows.iter().enumerate() {
        let Some(value) = metric_value(row, metric) else {
            continue;
        };
        let better = match best {
            None => true,
            Some((_, current)) => match select {
                Select::Max => value > current,
                Select::Min => value < current,
            },
        };
        if better {
            best = Some((i, value));
        }
    }

    let (index, value) = best.ok_or_else(|| match metric {
        Metric::Column(c) | Metric::PerCount(c) => ExecutionError::UnknownField(c.clone()),
    })?;
    let mut row = rows.into_iter().nth(index).unwrap_or_default();
    if let Metric::PerCount(_) = metric {
        row.values.insert(metric.label(), Scalar::Number(value));
    }
    Ok(row)
}
