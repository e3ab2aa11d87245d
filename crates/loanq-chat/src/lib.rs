//! Natural-language questions over a loan portfolio.
//!
//! A question flows through [`QueryTranslator`] (text to a query-algebra
//! expression), [`QueryExecutor`] (expression to result) and
//! [`ResponseComposer`] (result to explanation). [`QueryOrchestrator`] runs
//! that pipeline per [`Session`] and records each exchange in its
//! [`ConversationMemory`].

pub mod error;
pub mod executor;
pub mod memory;
pub mod orchestrator;
pub mod provider;
pub mod response;
pub mod translator;
pub mod types;

pub use error::{ChatError, ExecutionError, ProviderError, QueryError, TranslationError};
pub use executor::QueryExecutor;
pub use memory::{ConversationMemory, Session, SessionRegistry, DEFAULT_SESSION};
pub use orchestrator::QueryOrchestrator;
pub use provider::{LanguageModel, OllamaProvider};
pub use response::{LlmComposer, ResponseComposer, TemplateComposer};
pub use translator::{LlmTranslator, QueryTranslator, RuleTranslator};
pub use types::{
    Aggregate, AggregateOp, Compare, CompareSource, Comparison, ConversationTurn, GroupBy, Metric,
    Predicate, QueryExpression, QueryResponse, QueryResult, Role, Row, Scalar, Select,
};
