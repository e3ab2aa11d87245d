//! Seeded mock portfolio for demos and local development.

use chrono::NaiveDate;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rust_decimal::Decimal;

use loanq_core::types::{Currency, LoanRecord, RepaymentStatus, Region, Sex};

/// Generate `count` loans deterministically from `seed`.
///
/// The first three records are fixed borrowers (Juan Perez, Maria Rodriguez,
/// Ana Gomez) so example questions have known answers.
pub fn generate_mock_loans(seed: u64, count: usize) -> Vec<LoanRecord> {
    let mut rng = StdRng::seed_from_u64(seed);
    let mut loans: Vec<LoanRecord> = (1..=count).map(|i| random_loan(&mut rng, i)).collect();

    let fixed = [
        ("Juan Perez", Region::Central, Sex::Male, 15_000, Currency::Cop),
        ("Maria Rodriguez", Region::Central, Sex::Female, 22_000, Currency::Usd),
        ("Ana Gomez", Region::Central, Sex::Female, 18_500, Currency::Eur),
    ];
    for (loan, (name, region, sex, amount, currency)) in loans.iter_mut().zip(fixed) {
        loan.user_name = name.to_string();
        loan.region = region;
        loan.sex = sex;
        loan.loan_amount = Decimal::from(amount);
        loan.currency = currency;
        if loan.pending > loan.loan_amount {
            loan.pending = loan.loan_amount;
        }
    }

    loans
}

fn random_loan(rng: &mut StdRng, index: usize) -> LoanRecord {
    let year = rng.random_range(2022..=2024);
    let month = rng.random_range(1..=12);
    let day = rng.random_range(1..=28);
    let term_years = rng.random_range(1..=3);
    // Day is capped at 28, so both dates always exist.
    let disbursed_date = NaiveDate::from_ymd_opt(year, month, day).unwrap_or_default();
    let due_date = NaiveDate::from_ymd_opt(year + term_years, month, day).unwrap_or_default();

    let amount_cents: i64 = rng.random_range(100_000..=5_000_000);
    let pending_cents = if rng.random_bool(0.8) {
        amount_cents * rng.random_range(0..=100) / 100
    } else {
        0
    };

    LoanRecord {
        user_id: format!("P{}", index),
        user_name: format!("User {}", index),
        region: pick(rng, &[Region::North, Region::Central]),
        sex: pick(rng, &Sex::ALL),
        loan_amount: Decimal::new(amount_cents, 2),
        currency: pick(rng, &Currency::ALL),
        disbursed_date,
        due_date,
        pending: Decimal::new(pending_cents, 2),
        credit_score: rng.random_range(300..=850),
        repayment_status: pick(rng, &RepaymentStatus::ALL),
    }
}

fn pick<T: Copy>(rng: &mut StdRng, options: &[T]) -> T {
    options[rng.random_range(0..options.len())]
}
