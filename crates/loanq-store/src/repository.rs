//! Record store contract and the in-memory implementation.

use std::path::Path;

use loanq_core::config::StoreConfig;
use loanq_core::error::CoreError;
use loanq_core::types::LoanRecord;

use crate::mock::generate_mock_loans;

/// Read-only access to the loan collection.
///
/// Records are immutable once loaded, so implementations can be shared
/// across requests without locking.
pub trait RecordStore: Send + Sync {
    /// All records in load order.
    fn records(&self) -> &[LoanRecord];

    fn len(&self) -> usize {
        self.records().len()
    }

    fn is_empty(&self) -> bool {
        self.records().is_empty()
    }
}

/// Loan records held in a `Vec`.
#[derive(Debug, Clone, Default)]
pub struct InMemoryLoanStore {
    records: Vec<LoanRecord>,
}

impl InMemoryLoanStore {
    pub fn new(records: Vec<LoanRecord>) -> Self {
        Self { records }
    }

    /// Generate a seeded mock portfolio.
    pub fn mock(seed: u64, count: usize) -> Self {
        Self::new(generate_mock_loans(seed, count))
    }

    /// Parse a JSON array of loan records.
    pub fn from_json_str(json: &str) -> Result<Self, CoreError> {
        let records: Vec<LoanRecord> = serde_json::from_str(json)?;
        Ok(Self::new(records))
    }

    /// Load a JSON array of loan records from disk.
    pub fn from_json_file(path: &Path) -> Result<Self, CoreError> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            CoreError::Storage(format!("Failed to read {}: {}", path.display(), e))
        })?;
        let store = Self::from_json_str(&content)?;
        tracing::info!(
            path = %path.display(),
            records = store.records.len(),
            "Loan records loaded"
        );
        Ok(store)
    }

    /// Build the store described by the configuration: the data file when
    /// one is set, otherwise a mock portfolio.
    pub fn from_config(config: &StoreConfig) -> Result<Self, CoreError> {
        match config.data_file {
            Some(ref path) => Self::from_json_file(Path::new(path)),
            None => {
                tracing::info!(
                    seed = config.seed,
                    records = config.record_count,
                    "Generating mock loan portfolio"
                );
                Ok(Self::mock(config.seed, config.record_count))
            }
        }
    }
}

impl RecordStore for InMemoryLoanStore {
    fn records(&self) -> &[LoanRecord] {
        &self.records
    }
}
