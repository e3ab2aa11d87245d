//! Static description of the loan-record schema.
//!
//! The schema grounds query translation: every field reference in a query
//! expression must resolve through [`SchemaDescription::resolve_field`], and
//! every literal through [`SchemaDescription::parse_value`].

use std::str::FromStr;

use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::types::{Currency, RepaymentStatus, Region, Sex, Value};

// =============================================================================
// Field
// =============================================================================

/// A field of [`crate::LoanRecord`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Field {
    UserId,
    UserName,
    Region,
    Sex,
    LoanAmount,
    Currency,
    DisbursedDate,
    DueDate,
    Pending,
    CreditScore,
    RepaymentStatus,
}

impl Field {
    pub const ALL: [Field; 11] = [
        Field::UserId,
        Field::UserName,
        Field::Region,
        Field::Sex,
        Field::LoanAmount,
        Field::Currency,
        Field::DisbursedDate,
        Field::DueDate,
        Field::Pending,
        Field::CreditScore,
        Field::RepaymentStatus,
    ];

    /// Canonical snake_case name.
    pub fn name(&self) -> &'static str {
        match self {
            Field::UserId => "user_id",
            Field::UserName => "user_name",
            Field::Region => "region",
            Field::Sex => "sex",
            Field::LoanAmount => "loan_amount",
            Field::Currency => "currency",
            Field::DisbursedDate => "disbursed_date",
            Field::DueDate => "due_date",
            Field::Pending => "pending",
            Field::CreditScore => "credit_score",
            Field::RepaymentStatus => "repayment_status",
        }
    }

    pub fn kind(&self) -> FieldKind {
        match self {
            Field::UserId | Field::UserName => FieldKind::Text,
            Field::Region | Field::Sex | Field::Currency | Field::RepaymentStatus => {
                FieldKind::Category
            }
            Field::LoanAmount | Field::Pending => FieldKind::Decimal,
            Field::CreditScore => FieldKind::Integer,
            Field::DisbursedDate | Field::DueDate => FieldKind::Date,
        }
    }

    /// Amounts denominated in the record's currency.
    pub fn is_monetary(&self) -> bool {
        matches!(self, Field::LoanAmount | Field::Pending)
    }

    /// Stem used to name aggregate result columns (`total_amount`, `average_pending`).
    pub fn metric_stem(&self) -> &'static str {
        match self {
            Field::LoanAmount => "amount",
            other => other.name(),
        }
    }
}

impl std::fmt::Display for Field {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Declared type of a field.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldKind {
    /// Free text.
    Text,
    /// Closed set of text values.
    Category,
    Decimal,
    Integer,
    Date,
}

impl FieldKind {
    pub fn is_numeric(&self) -> bool {
        matches!(self, FieldKind::Decimal | FieldKind::Integer)
    }

    pub fn is_textual(&self) -> bool {
        matches!(self, FieldKind::Text | FieldKind::Category)
    }
}

// =============================================================================
// SchemaDescription
// =============================================================================

/// Description of one field for grounding and validation.
#[derive(Clone, Debug, Serialize)]
pub struct FieldSpec {
    pub field: Field,
    pub name: &'static str,
    pub kind: FieldKind,
    pub description: &'static str,
    /// Allowed values for category fields.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub values: Vec<&'static str>,
    /// Alternative names users say for this field.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub synonyms: Vec<&'static str>,
    /// Words that stand for a category value (`women` -> `Female`).
    #[serde(skip)]
    pub value_aliases: Vec<(&'static str, &'static str)>,
}

/// The fixed schema of the loan collection.
#[derive(Clone, Debug, Serialize)]
pub struct SchemaDescription {
    pub collection: &'static str,
    pub fields: Vec<FieldSpec>,
}

impl Default for SchemaDescription {
    fn default() -> Self {
        Self::loans()
    }
}

impl SchemaDescription {
    /// The loan portfolio schema.
    pub fn loans() -> Self {
        let fields = vec![
            FieldSpec {
                field: Field::UserId,
                name: Field::UserId.name(),
                kind: FieldKind::Text,
                description: "Borrower identifier",
                values: vec![],
                synonyms: vec!["id", "borrower_id"],
                value_aliases: vec![],
            },
            FieldSpec {
                field: Field::UserName,
                name: Field::UserName.name(),
                kind: FieldKind::Text,
                description: "Borrower full name",
                values: vec![],
                synonyms: vec!["name", "borrower", "client", "customer"],
                value_aliases: vec![],
            },
            FieldSpec {
                field: Field::Region,
                name: Field::Region.name(),
                kind: FieldKind::Category,
                description: "Region where the loan was disbursed",
                values: Region::ALL.iter().map(|r| r.as_str()).collect(),
                synonyms: vec!["zone", "area"],
                value_aliases: vec![],
            },
            FieldSpec {
                field: Field::Sex,
                name: Field::Sex.name(),
                kind: FieldKind::Category,
                description: "Borrower sex",
                values: Sex::ALL.iter().map(|s| s.as_str()).collect(),
                synonyms: vec!["gender"],
                value_aliases: vec![
                    ("women", "Female"),
                    ("woman", "Female"),
                    ("females", "Female"),
                    ("men", "Male"),
                    ("man", "Male"),
                    ("males", "Male"),
                ],
            },
            FieldSpec {
                field: Field::LoanAmount,
                name: Field::LoanAmount.name(),
                kind: FieldKind::Decimal,
                description: "Principal disbursed, in the loan currency",
                values: vec![],
                synonyms: vec!["amount", "loan", "principal", "loan_size"],
                value_aliases: vec![],
            },
            FieldSpec {
                field: Field::Currency,
                name: Field::Currency.name(),
                kind: FieldKind::Category,
                description: "Currency of the loan",
                values: Currency::ALL.iter().map(|c| c.as_str()).collect(),
                synonyms: vec![],
                value_aliases: vec![("pesos", "COP"), ("dollars", "USD"), ("euros", "EUR")],
            },
            FieldSpec {
                field: Field::DisbursedDate,
                name: Field::DisbursedDate.name(),
                kind: FieldKind::Date,
                description: "Date the loan was disbursed (YYYY-MM-DD)",
                values: vec![],
                synonyms: vec!["date", "disbursement_date", "disbursed", "disbursement"],
                value_aliases: vec![],
            },
            FieldSpec {
                field: Field::DueDate,
                name: Field::DueDate.name(),
                kind: FieldKind::Date,
                description: "Final repayment date (YYYY-MM-DD)",
                values: vec![],
                synonyms: vec!["due", "maturity", "maturity_date"],
                value_aliases: vec![],
            },
            FieldSpec {
                field: Field::Pending,
                name: Field::Pending.name(),
                kind: FieldKind::Decimal,
                description: "Outstanding balance still owed, in the loan currency",
                values: vec![],
                synonyms: vec!["outstanding", "balance", "pending_amount", "outstanding_balance"],
                value_aliases: vec![],
            },
            FieldSpec {
                field: Field::CreditScore,
                name: Field::CreditScore.name(),
                kind: FieldKind::Integer,
                description: "Credit score between 300 and 850",
                values: vec![],
                synonyms: vec!["score", "credit"],
                value_aliases: vec![],
            },
            FieldSpec {
                field: Field::RepaymentStatus,
                name: Field::RepaymentStatus.name(),
                kind: FieldKind::Category,
                description: "Repayment status of the loan",
                values: RepaymentStatus::ALL.iter().map(|s| s.as_str()).collect(),
                synonyms: vec!["status", "repayment"],
                value_aliases: vec![("overdue", "Late"), ("repaid", "Paid")],
            },
        ];

        Self {
            collection: "loans",
            fields,
        }
    }

    pub fn spec(&self, field: Field) -> Option<&FieldSpec> {
        self.fields.iter().find(|s| s.field == field)
    }

    /// Resolve a user- or model-supplied field reference.
    ///
    /// Matches canonical names and synonyms case-insensitively, treating
    /// spaces and hyphens as underscores, and tolerates a plural `s`.
    pub fn resolve_field(&self, raw: &str) -> Option<Field> {
        let normalized: String = raw
            .trim()
            .trim_start_matches('$')
            .to_lowercase()
            .chars()
            .map(|c| if c == ' ' || c == '-' { '_' } else { c })
            .collect();
        if normalized.is_empty() {
            return None;
        }

        let lookup = |needle: &str| {
            self.fields
                .iter()
                .find(|s| s.name == needle || s.synonyms.contains(&needle))
                .map(|s| s.field)
        };

        lookup(&normalized).or_else(|| {
            normalized
                .strip_suffix('s')
                .filter(|singular| !singular.is_empty())
                .and_then(lookup)
        })
    }

    /// Canonical category value for a word, honouring value aliases.
    pub fn canonical_category(&self, field: Field, word: &str) -> Option<&'static str> {
        let spec = self.spec(field)?;
        let needle = word.trim();
        spec.values
            .iter()
            .copied()
            .find(|v| v.eq_ignore_ascii_case(needle))
            .or_else(|| {
                spec.value_aliases
                    .iter()
                    .find(|(alias, _)| alias.eq_ignore_ascii_case(needle))
                    .map(|(_, canonical)| *canonical)
            })
    }

    /// Parse a literal into a value typed for `field`.
    ///
    /// Returns `None` when the literal cannot represent a value of the
    /// field's declared type (or is not one of a category's values).
    pub fn parse_value(&self, field: Field, raw: &str) -> Option<Value> {
        let raw = raw.trim();
        match field.kind() {
            FieldKind::Text => {
                if raw.is_empty() {
                    None
                } else {
                    Some(Value::Text(raw.to_string()))
                }
            }
            FieldKind::Category => self
                .canonical_category(field, raw)
                .map(|v| Value::Text(v.to_string())),
            FieldKind::Decimal => parse_decimal(raw).map(Value::Number),
            FieldKind::Integer => parse_decimal(raw)
                .filter(|d| d.fract().is_zero())
                .map(Value::Number),
            FieldKind::Date => parse_date(raw).map(Value::Date),
        }
    }

    /// Plain-text rendering for language-model prompts.
    pub fn describe(&self) -> String {
        let mut lines = vec![format!("Collection `{}` with fields:", self.collection)];
        for spec in &self.fields {
            let kind = match spec.kind {
                FieldKind::Text => "text",
                FieldKind::Category => "category",
                FieldKind::Decimal => "decimal",
                FieldKind::Integer => "integer",
                FieldKind::Date => "date",
            };
            let mut line = format!("- {} ({}): {}", spec.name, kind, spec.description);
            if !spec.values.is_empty() {
                line.push_str(&format!(". Values: {}", spec.values.join(", ")));
            }
            lines.push(line);
        }
        lines.join("\n")
    }
}

fn parse_decimal(raw: &str) -> Option<Decimal> {
    let cleaned: String = raw.chars().filter(|c| *c != ',' && *c != '$').collect();
    Decimal::from_str(cleaned.trim()).ok()
}

/// Accepts `YYYY-MM-DD` or a bare year (January 1st of that year).
fn parse_date(raw: &str) -> Option<NaiveDate> {
    if let Ok(d) = NaiveDate::parse_from_str(raw, "%Y-%m-%d") {
        return Some(d);
    }
    if raw.len() == 4 {
        let year: i32 = raw.parse().ok()?;
        return NaiveDate::from_ymd_opt(year, 1, 1);
    }
    None
}
