use crate::database::Database;
use crate::error::{AppError, AppResult};
use crate::logger::{LogLevel, LOGGER};
use crate::pipeline::{PipelineStage, StageInput, StageKey, StageOutput};
use crate::sql_gate::{SafetyGate, ValidationVerdict};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;

const READS: &[StageKey] = &[StageKey::GeneratedSql];

/// Stage that runs the generated SQL through the safety gate and executes it
pub struct QueryStage {
    name: String,
    gate: SafetyGate,
    database: Arc<dyn Database>,
    query_timeout: Duration,
}

impl QueryStage {
    pub fn new(
        name: impl Into<String>,
        gate: SafetyGate,
        database: Arc<dyn Database>,
        query_timeout: Duration,
    ) -> Self {
        Self {
            name: name.into(),
            gate,
            database,
            query_timeout,
        }
    }
}

#[async_trait]
impl PipelineStage for QueryStage {
    fn name(&self) -> &str {
        &self.name
    }

    fn output_key(&self) -> StageKey {
        StageKey::QueryResult
    }

    fn reads(&self) -> &[StageKey] {
        READS
    }

    async fn execute(&self, input: StageInput<'_>) -> AppResult<StageOutput> {
        let sql = input
            .state
            .sql()
            .ok_or_else(|| AppError::MissingStateKey(StageKey::GeneratedSql.to_string()))?;

        let approved = match self.gate.validate(sql) {
            ValidationVerdict::Approved(query) => query,
            ValidationVerdict::Rejected(reason) => {
                LOGGER.log(
                    LogLevel::Warn,
                    &format!("Safety gate rejected query ({}): {}", reason, sql),
                    "sql_gate",
                );
                return Err(AppError::QueryRejected(reason));
            }
        };

        if approved != sql.trim() {
            LOGGER.log(
                LogLevel::Debug,
                &format!("Safety gate rewrote query to: {}", approved),
                "sql_gate",
            );
        }

        let result = self.database.execute(&approved, self.query_timeout).await?;
        Ok(StageOutput::Table(result))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::{QueryResult, SchemaDescription};
    use crate::error::ErrorKind;
    use crate::pipeline::PipelineState;
    use crate::sql_gate::LimitStyle;
    use std::sync::Mutex;

    /// Records executed queries and returns an empty result
    #[derive(Default)]
    struct RecordingDatabase {
        executed: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl Database for RecordingDatabase {
        async fn load_schema(&self) -> AppResult<SchemaDescription> {
            Ok(SchemaDescription::default())
        }

        async fn execute(&self, query: &str, _timeout: Duration) -> AppResult<QueryResult> {
            self.executed.lock().unwrap().push(query.to_string());
            Ok(QueryResult {
                query: query.to_string(),
                ..QueryResult::default()
            })
        }
    }

    fn stage(db: Arc<RecordingDatabase>) -> QueryStage {
        QueryStage::new(
            "query_executor",
            SafetyGate::new(["DROP", "DELETE"], 100, LimitStyle::Limit),
            db,
            Duration::from_secs(5),
        )
    }

    fn state_with_sql(sql: &str) -> PipelineState {
        let mut state = PipelineState::new();
        state
            .insert(StageKey::GeneratedSql, StageOutput::Sql(sql.to_string()))
            .unwrap();
        state
    }

    #[tokio::test]
    async fn test_executes_rewritten_query() {
        let db = Arc::new(RecordingDatabase::default());
        let state = state_with_sql("SELECT Name FROM Products");

        let output = stage(db.clone())
            .execute(StageInput {
                request: "q",
                state: &state,
                prompt: "q",
            })
            .await
            .unwrap();

        assert_eq!(
            *db.executed.lock().unwrap(),
            vec!["SELECT Name FROM Products LIMIT 100"]
        );
        match output {
            StageOutput::Table(result) => {
                assert_eq!(result.query, "SELECT Name FROM Products LIMIT 100")
            }
            other => panic!("expected table, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_rejected_query_never_reaches_database() {
        let db = Arc::new(RecordingDatabase::default());
        let state = state_with_sql("DROP TABLE Products");

        let err = stage(db.clone())
            .execute(StageInput {
                request: "q",
                state: &state,
                prompt: "q",
            })
            .await
            .unwrap_err();

        assert_eq!(err.kind(), ErrorKind::Validation);
        assert_eq!(err.to_string(), "query rejected: forbidden keyword: DROP");
        assert!(db.executed.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_missing_sql() {
        let db = Arc::new(RecordingDatabase::default());
        let state = PipelineState::new();
        let query_stage = stage(db);

        assert!(query_stage.pre_execute(&state).is_err());
        let err = query_stage
            .execute(StageInput {
                request: "q",
                state: &state,
                prompt: "q",
            })
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::MissingStateKey(_)));
    }
}
