//! loanq record store - the passive loan collection queries run against.
//!
//! Provides the [`RecordStore`] trait, an in-memory implementation loaded
//! from a JSON file, and a seeded mock-portfolio generator.

pub mod mock;
pub mod repository;

pub use mock::generate_mock_loans;
pub use repository::{InMemoryLoanStore, RecordStore};
