//! Error types for the query pipeline.

/// Failure to map a question onto a query expression.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TranslationError {
    #[error("unresolvable field: {0}")]
    UnresolvableField(String),
    #[error("ambiguous reference: {0}")]
    AmbiguousReference(String),
    #[error("value out of range: {0}")]
    ValueOutOfRange(String),
    #[error("provider failure: {0}")]
    ProviderFailure(String),
}

/// Failure to evaluate a query expression against the record store.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ExecutionError {
    #[error("unknown field: {0}")]
    UnknownField(String),
    #[error("type mismatch on {field}: expected {expected}, found {found}")]
    TypeMismatch {
        field: String,
        expected: String,
        found: String,
    },
    #[error("nothing to compare: the input has no rows")]
    EmptyInputForCompare,
    #[error("amounts span several currencies: {}", .0.join(", "))]
    MixedCurrencies(Vec<String>),
    #[error("numeric overflow computing {0}")]
    Overflow(String),
}

/// Errors from a language-model provider call.
#[derive(Debug, thiserror::Error)]
pub enum ProviderError {
    #[error("invalid provider endpoint: {0}")]
    InvalidEndpoint(String),
    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("unexpected HTTP status {status}: {snippet}")]
    HttpStatus { status: u16, snippet: String },
    #[error("failed to decode response: {0}")]
    Decode(String),
    #[error("request timed out after {0}s")]
    Timeout(u64),
}

impl From<ProviderError> for TranslationError {
    fn from(err: ProviderError) -> Self {
        TranslationError::ProviderFailure(err.to_string())
    }
}

/// Errors from handling one question.
#[derive(Debug, thiserror::Error)]
pub enum ChatError {
    #[error("message cannot be empty")]
    EmptyMessage,
    #[error("message exceeds maximum length of {0} characters")]
    MessageTooLong(usize),
    #[error(transparent)]
    Translation(#[from] TranslationError),
    #[error(transparent)]
    Execution(#[from] ExecutionError),
}

/// The pipeline error returned by [`crate::QueryOrchestrator::handle_query`].
pub type QueryError = ChatError;

impl ChatError {
    /// Stable machine-readable error kind.
    pub fn kind(&self) -> &'static str {
        match self {
            ChatError::EmptyMessage => "empty_message",
            ChatError::MessageTooLong(_) => "message_too_long",
            ChatError::Translation(TranslationError::UnresolvableField(_)) => "unresolvable_field",
            ChatError::Translation(TranslationError::AmbiguousReference(_)) => {
                "ambiguous_reference"
            }
            ChatError::Translation(TranslationError::ValueOutOfRange(_)) => "value_out_of_range",
            ChatError::Translation(TranslationError::ProviderFailure(_)) => "provider_failure",
            ChatError::Execution(ExecutionError::UnknownField(_)) => "unknown_field",
            ChatError::Execution(ExecutionError::TypeMismatch { .. }) => "type_mismatch",
            ChatError::Execution(ExecutionError::EmptyInputForCompare) => "empty_input_for_compare",
            ChatError::Execution(ExecutionError::MixedCurrencies(_)) => "mixed_currencies",
            ChatError::Execution(ExecutionError::Overflow(_)) => "numeric_overflow",
        }
    }

    /// Explanation shown to the user and recorded as the AI turn.
    pub fn user_message(&self) -> String {
        match self {
            ChatError::EmptyMessage => "Please ask a question about the loan data.".to_string(),
            ChatError::MessageTooLong(max) => {
                format!("Questions are limited to {} characters.", max)
            }
            ChatError::Translation(TranslationError::UnresolvableField(field)) => format!(
                "I couldn't answer that: '{}' is not a field of the loan data.",
                field
            ),
            ChatError::Translation(TranslationError::AmbiguousReference(detail)) => format!(
                "I'm not sure what you are referring to ({}). Could you rephrase the question?",
                detail
            ),
            ChatError::Translation(TranslationError::ValueOutOfRange(value)) => format!(
                "I couldn't answer that: {} is too large to work with.",
                value
            ),
            ChatError::Translation(TranslationError::ProviderFailure(_)) => {
                "The language model is unavailable right now, please try again.".to_string()
            }
            ChatError::Execution(ExecutionError::UnknownField(field)) => format!(
                "I couldn't answer that: the result has no '{}' value to work with.",
                field
            ),
            ChatError::Execution(ExecutionError::TypeMismatch {
                field,
                expected,
                found,
            }) => format!(
                "I couldn't answer that: {} holds {} values, not {}.",
                field, expected, found
            ),
            ChatError::Execution(ExecutionError::EmptyInputForCompare) => {
                "There were no matching records to compare.".to_string()
            }
            ChatError::Execution(ExecutionError::MixedCurrencies(currencies)) => format!(
                "Those loans are in different currencies ({}). Please narrow the question to one currency.",
                currencies.join(", ")
            ),
            ChatError::Execution(ExecutionError::Overflow(what)) => format!(
                "I couldn't answer that: the {} is too large to compute.",
                what
            ),
        }
    }

    /// Whether the failure lies with the language-model provider.
    pub fn is_provider_failure(&self) -> bool {
        matches!(
            self,
            ChatError::Translation(TranslationError::ProviderFailure(_))
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = ChatError::EmptyMessage;
        assert_eq!(err.to_string(), "message cannot be empty");

        let err = ChatError::MessageTooLong(2000);
        assert_eq!(
            err.to_string(),
            "message exceeds maximum length of 2000 characters"
        );

        let err = ChatError::from(TranslationError::UnresolvableField("occupation".into()));
        assert_eq!(err.to_string(), "unresolvable field: occupation");

        let err = ExecutionError::TypeMismatch {
            field: "region".into(),
            expected: "text".into(),
            found: "number".into(),
        };
        assert_eq!(
            err.to_string(),
            "type mismatch on region: expected text, found number"
        );

        let err = ExecutionError::MixedCurrencies(vec!["COP".into(), "USD".into()]);
        assert_eq!(err.to_string(), "amounts span several currencies: COP, USD");
    }

    #[test]
    fn test_provider_error_becomes_provider_failure() {
        let err: TranslationError = ProviderError::Timeout(30).into();
        assert_eq!(
            err,
            TranslationError::ProviderFailure("request timed out after 30s".into())
        );
    }

    #[test]
    fn test_kind() {
        assert_eq!(ChatError::EmptyMessage.kind(), "empty_message");
        assert_eq!(
            ChatError::from(TranslationError::AmbiguousReference("those".into())).kind(),
            "ambiguous_reference"
        );
        assert_eq!(
            ChatError::from(ExecutionError::EmptyInputForCompare).kind(),
            "empty_input_for_compare"
        );
        assert_eq!(
            ChatError::from(ExecutionError::Overflow("sum of loan_amount".into())).kind(),
            "numeric_overflow"
        );
        assert_eq!(
            ChatError::from(TranslationError::ValueOutOfRange("1e30".into())).kind(),
            "value_out_of_range"
        );
    }

    #[test]
    fn test_user_message_mentions_field() {
        let err = ChatError::from(TranslationError::UnresolvableField("occupation".into()));
        assert!(err.user_message().contains("'occupation'"));
    }

    #[test]
    fn test_is_provider_failure() {
        let err = ChatError::from(TranslationError::ProviderFailure("down".into()));
        assert!(err.is_provider_failure());
        assert!(!ChatError::EmptyMessage.is_provider_failure());
    }
}
