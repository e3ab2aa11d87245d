//! Session orchestrator: translate, execute, compose, remember.

use std::sync::{Arc, LazyLock};
use std::time::Instant;

use loanq_core::config::{ChatConfig, LoanqConfig, ProviderKind};
use loanq_core::schema::SchemaDescription;
use loanq_store::RecordStore;
use regex::Regex;
use tracing::{info, warn};

use crate::error::{ChatError, ProviderError};
use crate::executor::QueryExecutor;
use crate::memory::{ConversationMemory, Session};
use crate::provider::{LanguageModel, OllamaProvider};
use crate::response::{LlmComposer, ResponseComposer, TemplateComposer};
use crate::translator::{LlmTranslator, QueryTranslator, RuleTranslator};
use crate::types::{ConversationTurn, QueryExpression, QueryResponse, QueryResult, Scalar};

const GREETING_REPLY: &str = "Hello! How can I help you with loan data today?";
const GREETING_EXPLANATION: &str = "This is a friendly greeting response.";

static GREETING_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^\s*(?:hi|hello|hey|howdy|greetings|good\s+(?:morning|afternoon|evening))(?:\s+there)?[\s!.,]*$")
        .unwrap()
});

/// Runs one question through the pipeline for a session.
pub struct QueryOrchestrator {
    translator: Arc<dyn QueryTranslator>,
    executor: QueryExecutor,
    composer: Arc<dyn ResponseComposer>,
    store: Arc<dyn RecordStore>,
    schema: SchemaDescription,
    config: ChatConfig,
}

impl QueryOrchestrator {
    pub fn new(
        translator: Arc<dyn QueryTranslator>,
        executor: QueryExecutor,
        composer: Arc<dyn ResponseComposer>,
        store: Arc<dyn RecordStore>,
        schema: SchemaDescription,
        config: ChatConfig,
    ) -> Self {
        Self {
            translator,
            executor,
            composer,
            store,
            schema,
            config,
        }
    }

    /// Wire translator, composer and executor from configuration.
    ///
    /// Fails only when the Ollama provider is selected and its endpoint is invalid.
    pub fn from_config(
        config: &LoanqConfig,
        store: Arc<dyn RecordStore>,
    ) -> Result<Self, ProviderError> {
        let schema = SchemaDescription::loans();
        let template = TemplateComposer::default();

        let translator: Arc<dyn QueryTranslator>;
        let composer: Arc<dyn ResponseComposer>;
        match config.provider.kind {
            ProviderKind::Rules => {
                translator = Arc::new(RuleTranslator::new(&schema));
                composer = Arc::new(template);
            }
            ProviderKind::Ollama => {
                let model: Arc<dyn LanguageModel> = Arc::new(OllamaProvider::new(&config.provider)?);
                composer = if config.provider.llm_explanations {
                    Arc::new(LlmComposer::new(Arc::clone(&model), template))
                } else {
                    Arc::new(template)
                };
                translator = Arc::new(LlmTranslator::new(model, config.chat.context_turns));
            }
        }

        info!(
            translator = translator.name(),
            llm_explanations = config.provider.llm_explanations,
            allow_mixed_currency = config.executor.allow_mixed_currency,
            "Query pipeline configured"
        );

        Ok(Self::new(
            translator,
            QueryExecutor::new(config.executor.allow_mixed_currency),
            composer,
            store,
            schema,
            config.chat.clone(),
        ))
    }

    pub fn schema(&self) -> &SchemaDescription {
        &self.schema
    }

    pub fn store(&self) -> &dyn RecordStore {
        self.store.as_ref()
    }

    pub fn translator_name(&self) -> &'static str {
        self.translator.name()
    }

    /// Answer `question` within `session`.
    ///
    /// The session's memory stays locked until the turns are recorded. On a
    /// translation or execution failure the question and an explanatory AI
    /// turn are still appended before the error is returned.
    pub async fn handle_query(
        &self,
        session: &Session,
        question: &str,
    ) -> Result<QueryResponse, ChatError> {
        let question = question.trim();
        if question.is_empty() {
            return Err(ChatError::EmptyMessage);
        }
        if question.chars().count() > self.config.max_question_length {
            return Err(ChatError::MessageTooLong(self.config.max_question_length));
        }

        let started = Instant::now();
        let mut memory = session.memory.lock().await;

        if self.config.answer_greetings && GREETING_RE.is_match(question) {
            let result = QueryResult::Scalar(Scalar::Text(GREETING_REPLY.to_string()));
            record(&mut memory, question, GREETING_EXPLANATION, Some(result.clone()));
            info!(session = %session.id, op = "greeting", "Query answered");
            return Ok(QueryResponse {
                result,
                explanation: GREETING_EXPLANATION.to_string(),
            });
        }

        let outcome = self.run(question, &memory).await;
        let (expr, result) = match outcome {
            Ok(done) => done,
            Err(err) => {
                record(&mut memory, question, &err.user_message(), None);
                warn!(
                    session = %session.id,
                    kind = err.kind(),
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "Query failed: {}",
                    err
                );
                return Err(err);
            }
        };

        let explanation = self.composer.compose(question, &result).await;
        record(&mut memory, question, &explanation, Some(result.clone()));
        info!(
            session = %session.id,
            op = expr.op_name(),
            translator = self.translator.name(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Query answered"
        );

        Ok(QueryResponse {
            result,
            explanation,
        })
    }

    async fn run(
        &self,
        question: &str,
        memory: &ConversationMemory,
    ) -> Result<(QueryExpression, QueryResult), ChatError> {
        let prior = memory.recent(self.config.context_turns);
        let expr = self
            .translator
            .translate(question, prior, &self.schema)
            .await?;
        let result = self.executor.execute(&expr, self.store.as_ref())?;
        Ok((expr, result))
    }
}

fn record(
    memory: &mut ConversationMemory,
    question: &str,
    answer: &str,
    result: Option<QueryResult>,
) {
    memory.append(ConversationTurn::human(question));
    memory.append(ConversationTurn::ai(answer, result));
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use chrono::NaiveDate;
    use loanq_core::types::{Currency, LoanRecord, Region, RepaymentStatus, Sex};
    use loanq_store::InMemoryLoanStore;
    use rust_decimal::Decimal;

    use crate::error::{ExecutionError, TranslationError};
    use crate::memory::SessionRegistry;
    use crate::types::{Aggregate, AggregateOp, Compare, CompareSource, Metric, Role, Select};
    use loanq_core::schema::Field;

    fn loan(
        name: &str,
        region: Region,
        sex: Sex,
        amount: i64,
        currency: Currency,
        status: RepaymentStatus,
    ) -> LoanRecord {
        LoanRecord {
            user_id: format!("ID-{}", name),
            user_name: name.to_string(),
            region,
            sex,
            loan_amount: Decimal::from(amount),
            currency,
            disbursed_date: NaiveDate::from_ymd_opt(2023, 3, 1).unwrap(),
            due_date: NaiveDate::from_ymd_opt(2025, 3, 1).unwrap(),
            pending: Decimal::from(amount / 2),
            credit_score: 700,
            repayment_status: status,
        }
    }

    fn store() -> Arc<dyn RecordStore> {
        use Currency::*;
        use RepaymentStatus::*;
        Arc::new(InMemoryLoanStore::new(vec![
            loan("Juan Perez", Region::Central, Sex::Male, 15000, Cop, Pending),
            loan("Maria Rodriguez", Region::Central, Sex::Female, 22000, Cop, Current),
            loan("Ana Gomez", Region::Central, Sex::Female, 18000, Cop, Pending),
            loan("Luis Diaz", Region::North, Sex::Male, 10000, Cop, Late),
            loan("Sofia Ruiz", Region::North, Sex::Female, 30000, Usd, Paid),
        ]))
    }

    fn orchestrator_with(translator: Arc<dyn QueryTranslator>) -> QueryOrchestrator {
        QueryOrchestrator::new(
            translator,
            QueryExecutor::default(),
            Arc::new(TemplateComposer::default()),
            store(),
            SchemaDescription::loans(),
            ChatConfig::default(),
        )
    }

    fn orchestrator() -> QueryOrchestrator {
        orchestrator_with(Arc::new(RuleTranslator::default()))
    }

    fn number(n: i64) -> QueryResult {
        QueryResult::Scalar(Scalar::Number(Decimal::from(n)))
    }

    /// Translator returning a fixed expression or error.
    struct FixedTranslator(Result<QueryExpression, TranslationError>);

    #[async_trait]
    impl QueryTranslator for FixedTranslator {
        async fn translate(
            &self,
            _question: &str,
            _prior_turns: &[ConversationTurn],
            _schema: &SchemaDescription,
        ) -> Result<QueryExpression, TranslationError> {
            self.0.clone()
        }

        fn name(&self) -> &'static str {
            "fixed"
        }
    }

    // ---- Scenarios ----

    #[tokio::test]
    async fn test_loan_amount_for_named_user() {
        let session = Session::new("s1");
        let response = orchestrator()
            .handle_query(&session, "What is the loan amount for Juan Perez?")
            .await
            .unwrap();
        assert_eq!(response.result, number(15000));
        assert!(response.explanation.contains("15,000"));

        let turns = session.memory.lock().await.list();
        assert_eq!(turns.len(), 2);
        assert_eq!(turns[0].role, Role::Human);
        assert_eq!(turns[1].produced_result, Some(number(15000)));
    }

    #[tokio::test]
    async fn test_total_pending_in_cop() {
        let session = Session::new("s2");
        let response = orchestrator()
            .handle_query(&session, "Total pending loan amount in COP?")
            .await
            .unwrap();
        assert_eq!(response.result, number(33000));
    }

    #[tokio::test]
    async fn test_average_for_women_in_central() {
        let session = Session::new("s3");
        let response = orchestrator()
            .handle_query(&session, "Average loan for women in Central region")
            .await
            .unwrap();
        assert_eq!(response.result, number(20000));
    }

    #[tokio::test]
    async fn test_follow_up_reuses_grouped_table() {
        let orchestrator = orchestrator();
        let session = Session::new("s4");

        let grouped = orchestrator
            .handle_query(&session, "Group total loans by region and gender")
            .await
            .unwrap();
        let QueryResult::Table(rows) = &grouped.result else {
            panic!("expected table");
        };
        assert_eq!(rows.len(), 4);
        assert!(rows.iter().all(|r| r.key.len() == 2));

        let best = orchestrator
            .handle_query(&session, "Which region has the highest average loan amount?")
            .await
            .unwrap();
        let QueryResult::Row(row) = best.result else {
            panic!("expected row");
        };
        assert_eq!(row.key["region"], Scalar::Text("North".into()));
        assert_eq!(row.key["sex"], Scalar::Text("Female".into()));
        assert_eq!(row.values["average_amount"], Scalar::Number(Decimal::from(30000)));
        assert_eq!(session.memory.lock().await.len(), 4);
    }

    #[tokio::test]
    async fn test_consecutive_follow_ups_rank_the_grouped_table() {
        let orchestrator = orchestrator();
        let session = Session::new("s4b");
        orchestrator
            .handle_query(&session, "Group total loans by region and gender")
            .await
            .unwrap();

        let highest = orchestrator
            .handle_query(&session, "Which region has the highest average loan amount?")
            .await
            .unwrap();
        let lowest = orchestrator
            .handle_query(&session, "Which region has the lowest average loan amount?")
            .await
            .unwrap();

        let (QueryResult::Row(highest), QueryResult::Row(lowest)) = (highest.result, lowest.result)
        else {
            panic!("expected rows");
        };
        assert_eq!(highest.values["average_amount"], Scalar::Number(Decimal::from(30000)));
        assert_eq!(lowest.key["region"], Scalar::Text("North".into()));
        assert_eq!(lowest.key["sex"], Scalar::Text("Male".into()));
        assert_eq!(lowest.values["average_amount"], Scalar::Number(Decimal::from(10000)));
    }

    #[tokio::test]
    async fn test_oversized_threshold_is_reported_not_panicked() {
        let session = Session::new("s4c");
        let err = orchestrator()
            .handle_query(&session, "How many loans over 79228162514264337593543951k?")
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "value_out_of_range");
        assert_eq!(session.memory.lock().await.len(), 2);
    }

    // ---- Failures ----

    #[tokio::test]
    async fn test_empty_and_long_questions_record_nothing() {
        let session = Session::new("s5");
        let orchestrator = orchestrator();

        let err = orchestrator.handle_query(&session, "   ").await.unwrap_err();
        assert!(matches!(err, ChatError::EmptyMessage));

        let long = "a".repeat(2001);
        let err = orchestrator.handle_query(&session, &long).await.unwrap_err();
        assert!(matches!(err, ChatError::MessageTooLong(2000)));

        assert!(session.memory.lock().await.is_empty());
    }

    #[tokio::test]
    async fn test_translation_failure_records_turns() {
        let session = Session::new("s6");
        let orchestrator = orchestrator_with(Arc::new(FixedTranslator(Err(
            TranslationError::UnresolvableField("zodiac".into()),
        ))));
        let err = orchestrator
            .handle_query(&session, "Total loans by zodiac sign")
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "unresolvable_field");

        let memory = session.memory.lock().await;
        let turns = memory.list();
        assert_eq!(turns.len(), 2);
        assert_eq!(turns[0].content, "Total loans by zodiac sign");
        assert_eq!(turns[1].role, Role::Ai);
        assert!(turns[1].content.contains("zodiac"));
        assert!(turns[1].produced_result.is_none());
    }

    #[tokio::test]
    async fn test_execution_failure_records_turns() {
        let session = Session::new("s7");
        let expr = QueryExpression::Compare(Compare::new(
            CompareSource::Prior(QueryResult::Table(vec![])),
            Select::Max,
            Metric::Column("count".into()),
        ));
        let orchestrator = orchestrator_with(Arc::new(FixedTranslator(Ok(expr))));
        let err = orchestrator
            .handle_query(&session, "Which is biggest?")
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            ChatError::Execution(ExecutionError::EmptyInputForCompare)
        ));
        assert_eq!(session.memory.lock().await.len(), 2);
    }

    #[tokio::test]
    async fn test_follow_up_without_prior_result_is_ambiguous() {
        let session = Session::new("s8");
        let err = orchestrator()
            .handle_query(&session, "Which one has the highest total?")
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "ambiguous_reference");
    }

    // ---- Greetings and sessions ----

    #[tokio::test]
    async fn test_greeting_is_answered_directly() {
        let session = Session::new("s9");
        let orchestrator = orchestrator_with(Arc::new(FixedTranslator(Err(
            TranslationError::ProviderFailure("should not be called".into()),
        ))));
        let response = orchestrator.handle_query(&session, "Hello!").await.unwrap();
        assert_eq!(
            response.result,
            QueryResult::Scalar(Scalar::Text(GREETING_REPLY.into()))
        );
        assert_eq!(response.explanation, GREETING_EXPLANATION);
        assert_eq!(session.memory.lock().await.len(), 2);
    }

    #[tokio::test]
    async fn test_sessions_do_not_share_memory() {
        let registry = SessionRegistry::new();
        let orchestrator = orchestrator_with(Arc::new(FixedTranslator(Ok(
            QueryExpression::Aggregate(Aggregate::new(AggregateOp::Count, Field::LoanAmount, vec![])),
        ))));

        let a = registry.get_or_create("a");
        let b = registry.get_or_create("b");
        orchestrator.handle_query(&a, "How many loans?").await.unwrap();
        orchestrator.handle_query(&a, "How many loans?").await.unwrap();
        orchestrator.handle_query(&b, "How many loans?").await.unwrap();

        assert_eq!(a.memory.lock().await.len(), 4);
        assert_eq!(b.memory.lock().await.len(), 2);
    }

    #[test]
    fn test_from_config_selects_translator() {
        let mut config = LoanqConfig::default();
        let orchestrator = QueryOrchestrator::from_config(&config, store()).unwrap();
        assert_eq!(orchestrator.translator_name(), "rules");

        config.provider.kind = ProviderKind::Ollama;
        let orchestrator = QueryOrchestrator::from_config(&config, store()).unwrap();
        assert_eq!(orchestrator.translator_name(), "llm");

        config.provider.endpoint = "ftp://nowhere".to_string();
        assert!(QueryOrchestrator::from_config(&config, store()).is_err());
    }

    #[test]
    fn test_greeting_pattern() {
        for text in ["hi", "Hello!", "hey there", "Good morning.", "howdy"] {
            assert!(GREETING_RE.is_match(text), "{}", text);
        }
        for text in ["hi, how many loans?", "Hello what is the total", "highest loan"] {
            assert!(!GREETING_RE.is_match(text), "{}", text);
        }
    }
}
