pub mod config;
pub mod error;
pub mod schema;
pub mod types;

pub use config::LoanqConfig;
pub use error::{CoreError, Result};
pub use schema::{Field, FieldKind, FieldSpec, SchemaDescription};
pub use types::*;
