use std::fmt;

use chrono::NaiveDate;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::schema::Field;

// =============================================================================
// Enums
// =============================================================================

/// Portfolio region a loan was disbursed in.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Region {
    North,
    Central,
    South,
}

impl Region {
    pub const ALL: [Region; 3] = [Region::North, Region::Central, Region::South];

    pub fn as_str(&self) -> &'static str {
        match self {
            Region::North => "North",
            Region::Central => "Central",
            Region::South => "South",
        }
    }
}

/// Borrower sex as recorded at origination.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Sex {
    Male,
    Female,
}

impl Sex {
    pub const ALL: [Sex; 2] = [Sex::Male, Sex::Female];

    pub fn as_str(&self) -> &'static str {
        match self {
            Sex::Male => "Male",
            Sex::Female => "Female",
        }
    }
}

/// Currency the loan is denominated in.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Currency {
    Cop,
    Usd,
    Eur,
}

impl Currency {
    pub const ALL: [Currency; 3] = [Currency::Cop, Currency::Usd, Currency::Eur];

    pub fn as_str(&self) -> &'static str {
        match self {
            Currency::Cop => "COP",
            Currency::Usd => "USD",
            Currency::Eur => "EUR",
        }
    }
}

/// Repayment state of a loan.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum RepaymentStatus {
    /// Disbursed, first instalment not yet due.
    Pending,
    /// Instalments up to date.
    Current,
    /// At least one instalment overdue.
    Late,
    /// Fully repaid.
    Paid,
}

impl RepaymentStatus {
    pub const ALL: [RepaymentStatus; 4] = [
        RepaymentStatus::Pending,
        RepaymentStatus::Current,
        RepaymentStatus::Late,
        RepaymentStatus::Paid,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            RepaymentStatus::Pending => "Pending",
            RepaymentStatus::Current => "Current",
            RepaymentStatus::Late => "Late",
            RepaymentStatus::Paid => "Paid",
        }
    }
}

// =============================================================================
// LoanRecord
// =============================================================================

/// One loan in the portfolio. Immutable once loaded into a record store.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct LoanRecord {
    pub user_id: String,
    pub user_name: String,
    pub region: Region,
    pub sex: Sex,
    pub loan_amount: Decimal,
    pub currency: Currency,
    pub disbursed_date: NaiveDate,
    pub due_date: NaiveDate,
    /// Outstanding balance, in the loan's currency.
    pub pending: Decimal,
    pub credit_score: u16,
    pub repayment_status: RepaymentStatus,
}

impl LoanRecord {
    /// Read a field as a typed [`Value`].
    pub fn value(&self, field: Field) -> Value {
        match field {
            Field::UserId => Value::Text(self.user_id.clone()),
            Field::UserName => Value::Text(self.user_name.clone()),
            Field::Region => Value::Text(self.region.as_str().to_string()),
            Field::Sex => Value::Text(self.sex.as_str().to_string()),
            Field::LoanAmount => Value::Number(self.loan_amount),
            Field::Currency => Value::Text(self.currency.as_str().to_string()),
            Field::DisbursedDate => Value::Date(self.disbursed_date),
            Field::DueDate => Value::Date(self.due_date),
            Field::Pending => Value::Number(self.pending),
            Field::CreditScore => Value::Number(Decimal::from(self.credit_score)),
            Field::RepaymentStatus => Value::Text(self.repayment_status.as_str().to_string()),
        }
    }
}

// =============================================================================
// Value
// =============================================================================

/// A typed field value. Numbers use decimal semantics.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Value {
    Text(String),
    Number(Decimal),
    Date(NaiveDate),
}

impl Value {
    /// Short type name used in error messages.
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Text(_) => "text",
            Value::Number(_) => "number",
            Value::Date(_) => "date",
        }
    }

    pub fn as_number(&self) -> Option<Decimal> {
        match self {
            Value::Number(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Value::Text(s) => Some(s),
            _ => None,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Text(s) => f.write_str(s),
            Value::Number(n) => write!(f, "{}", n.normalize()),
            Value::Date(d) => write!(f, "{}", d.format("%Y-%m-%d")),
        }
    }
}

/// Convert a decimal to a bare JSON number: integral values stay integers,
/// everything else goes through `f64`.
pub fn decimal_to_json(value: Decimal) -> serde_json::Value {
    let value = value.normalize();
    if value.scale() == 0 {
        if let Some(i) = value.to_i64() {
            return serde_json::Value::from(i);
        }
    }
    value
        .to_f64()
        .and_then(serde_json::Number::from_f64)
        .map(serde_json::Value::Number)
        .unwrap_or_else(|| serde_json::Value::String(value.to_string()))
}
