use std::sync::Arc;

use futures::future::BoxFuture;
use tracing::{debug, warn};

use sqlpilot_core::error::{Result, SqlPilotError};
use sqlpilot_core::state::{Field, QueryResult, StateRecord, StateUpdate, StatementResult, StepId};
use sqlpilot_core::traits::{QueryAssistant, SqlBackend};
use sqlpilot_db::split_statements;

use crate::graph::{Step, StepOutput};

/// Marker a corrector returns when the question cannot be answered.
pub const IMPOSSIBLE_MARKER: &str = "-- IMPOSSIBLE";

const EMPTY_SQL_ERROR: &str = "no SQL statement to execute";

/// Writes the first SQL candidate from the question and the schema.
pub struct QueryGeneration {
    assistant: Arc<dyn QueryAssistant>,
    schema: Arc<str>,
}

impl QueryGeneration {
    pub fn new(assistant: Arc<dyn QueryAssistant>, schema: Arc<str>) -> Self {
        Self { assistant, schema }
    }
}

impl Step for QueryGeneration {
    fn id(&self) -> StepId {
        StepId::QueryGeneration
    }

    fn writes(&self) -> &'static [Field] {
        &[Field::SqlQuery]
    }

    fn run<'a>(&'a self, state: &'a StateRecord) -> BoxFuture<'a, Result<StepOutput>> {
        Box::pin(async move {
            match self.assistant.generate_sql(&state.question, &self.schema).await {
                Ok(sql) => {
                    let count = split_statements(&sql).len();
                    Ok(StepOutput::new(StateUpdate::new().sql_query(sql))
                        .note(format!("generated {count} statement(s)")))
                }
                Err(e) => {
                    warn!(run_id = %state.run_id, error = %e, "SQL generation failed");
                    Ok(StepOutput::new(StateUpdate::new().sql_query(""))
                        .note(format!("generation failed: {e}")))
                }
            }
        })
    }
}

/// Runs every statement of `sql_query` in order, stopping at the first failure.
pub struct Execution {
    backend: Arc<dyn SqlBackend>,
    row_cap: usize,
}

impl Execution {
    pub fn new(backend: Arc<dyn SqlBackend>, row_cap: usize) -> Self {
        Self { backend, row_cap }
    }
}

impl Step for Execution {
    fn id(&self) -> StepId {
        StepId::Execution
    }

    fn writes(&self) -> &'static [Field] {
        &[Field::QueryResult, Field::Error]
    }

    fn run<'a>(&'a self, state: &'a StateRecord) -> BoxFuture<'a, Result<StepOutput>> {
        Box::pin(async move {
            let statements = split_statements(&state.sql_query);
            if statements.is_empty() {
                return Ok(StepOutput::new(
                    StateUpdate::new()
                        .query_result(QueryResult::default())
                        .error(EMPTY_SQL_ERROR),
                )
                .note(EMPTY_SQL_ERROR));
            }

            let total = statements.len();
            let mut results = Vec::with_capacity(total);
            let mut notes = Vec::new();
            let mut failure = None;

            for (i, statement) in statements.into_iter().enumerate() {
                match self.backend.run(&statement, self.row_cap).await {
                    Ok(mut rows) => {
                        if let Some(bad) = rows.ragged_row() {
                            return Err(SqlPilotError::contract(
                                StepId::Execution.as_str(),
                                format!(
                                    "backend row {bad} has {} cells for {} columns",
                                    rows.rows[bad].len(),
                                    rows.columns.len()
                                ),
                            ));
                        }
                        let seen = rows.total_rows.max(rows.rows.len());
                        rows.rows.truncate(self.row_cap);
                        notes.push(match rows.affected {
                            Some(n) => format!("statement {}/{total}: {n} row(s) affected", i + 1),
                            None => format!("statement {}/{total}: {seen} row(s)", i + 1),
                        });
                        results.push(StatementResult {
                            statement,
                            columns: rows.columns,
                            rows: rows.rows,
                            total_rows: seen,
                        });
                    }
                    Err(e) if e.is_malformed() => {
                        return Err(SqlPilotError::contract(
                            StepId::Execution.as_str(),
                            e.to_string(),
                        ));
                    }
                    Err(e) => {
                        let message = if total > 1 {
                            format!("statement {} of {total} failed: {e}", i + 1)
                        } else {
                            e.to_string()
                        };
                        debug!(run_id = %state.run_id, error = %message, "Statement failed");
                        notes.push(message.clone());
                        failure = Some(message);
                        break;
                    }
                }
            }

            let update = StateUpdate::new().query_result(QueryResult::new(results));
            let update = match failure {
                Some(message) => update.error(message),
                None => update.clear_error(),
            };
            Ok(StepOutput { update, notes })
        })
    }
}

/// Repairs a failing query, or gives up once the retry ceiling is reached.
pub struct Correction {
    assistant: Arc<dyn QueryAssistant>,
    schema: Arc<str>,
    retry_ceiling: u32,
}

impl Correction {
    pub fn new(assistant: Arc<dyn QueryAssistant>, schema: Arc<str>, retry_ceiling: u32) -> Self {
        Self {
            assistant,
            schema,
            retry_ceiling,
        }
    }
}

/// Answer written when the run stops retrying.
pub fn give_up_answer(attempts: u32, error: &str) -> String {
    format!(
        "Sorry, I was unable to complete this request after {attempts} attempts. \
         The last database error was: {error}"
    )
}

fn give_up(update: StateUpdate, attempts: u32, error: &str) -> StateUpdate {
    update
        .clear_error()
        .last_error(error)
        .final_answer(give_up_answer(attempts, error))
}

impl Step for Correction {
    fn id(&self) -> StepId {
        StepId::Correction
    }

    fn writes(&self) -> &'static [Field] {
        &[
            Field::SqlQuery,
            Field::Iteration,
            Field::Error,
            Field::FinalAnswer,
            Field::LastError,
        ]
    }

    fn run<'a>(&'a self, state: &'a StateRecord) -> BoxFuture<'a, Result<StepOutput>> {
        Box::pin(async move {
            let error = match state.error.as_deref() {
                Some(e) if !e.is_empty() => e,
                _ => return Ok(StepOutput::default().note("nothing to correct")),
            };

            let attempt = state.iteration + 1;
            if attempt > self.retry_ceiling {
                warn!(
                    run_id = %state.run_id,
                    attempts = state.iteration,
                    "Retry ceiling reached, giving up"
                );
                return Ok(StepOutput::new(give_up(
                    StateUpdate::new(),
                    state.iteration,
                    error,
                ))
                .note(format!("retry ceiling ({}) reached", self.retry_ceiling)));
            }

            let update = StateUpdate::new().iteration(attempt);
            let reply = self
                .assistant
                .correct_sql(&state.sql_query, error, &self.schema)
                .await;

            let output = match reply {
                Ok(sql) if sql.trim_start().starts_with(IMPOSSIBLE_MARKER) => {
                    StepOutput::new(give_up(update, attempt, error))
                        .note(format!("attempt {attempt}: corrector declared the query impossible"))
                }
                Ok(sql) => StepOutput::new(update.sql_query(sql).clear_error())
                    .note(format!("attempt {attempt}/{}: corrected query", self.retry_ceiling)),
                Err(e) => {
                    warn!(run_id = %state.run_id, attempt, error = %e, "Correction failed");
                    StepOutput::new(update.clear_error())
                        .note(format!("attempt {attempt}: corrector failed ({e}), retrying prior query"))
                }
            };
            Ok(output)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use sqlpilot_core::error::AdapterError;
    use sqlpilot_test_utils::{rows, ScriptedAssistant, ScriptedBackend};

    fn schema() -> Arc<str> {
        Arc::from("orders(order_id, order_status)")
    }

    async fn run_step(step: &dyn Step, record: &mut StateRecord) -> StepOutput {
        let out = step.run(record).await.unwrap();
        record.apply(step.writes(), out.update.clone()).unwrap();
        out
    }

    #[tokio::test]
    async fn test_generation_failure_leaves_empty_query() {
        let assistant = ScriptedAssistant::new().generate(Err(AdapterError::failed("HTTP 500")));
        let step = QueryGeneration::new(Arc::new(assistant), schema());
        let mut r = StateRecord::new("q");
        r.sql_query = "stale".into();
        run_step(&step, &mut r).await;
        assert_eq!(r.sql_query, "");
    }

    #[tokio::test]
    async fn test_execution_empty_query() {
        let backend = ScriptedBackend::new();
        let step = Execution::new(Arc::new(backend.clone()), 100);
        let mut r = StateRecord::new("q");
        run_step(&step, &mut r).await;
        assert_eq!(r.error.as_deref(), Some(EMPTY_SQL_ERROR));
        assert!(backend.statements().is_empty());
    }

    #[tokio::test]
    async fn test_execution_caps_rows_and_clears_error() {
        let many: Vec<_> = (0..150).map(|i| json!([i])).collect();
        let backend = ScriptedBackend::new().rows(rows(&["n"], many));
        let step = Execution::new(Arc::new(backend), 100);
        let mut r = StateRecord::new("q");
        r.sql_query = "SELECT n FROM t".into();
        r.error = Some("old".into());
        run_step(&step, &mut r).await;
        assert!(r.error.is_none());
        let first = &r.query_result.statements[0];
        assert_eq!(first.rows.len(), 100);
        assert_eq!(first.total_rows, 150);
    }

    #[tokio::test]
    async fn test_execution_hands_row_cap_to_backend() {
        let backend = ScriptedBackend::new()
            .rows(rows(&["n"], vec![json!([1]), json!([2]), json!([3])]))
            .rows(rows(&["n"], vec![json!([4])]));
        let step = Execution::new(Arc::new(backend.clone()), 2);
        let mut r = StateRecord::new("q");
        r.sql_query = "SELECT n FROM a; SELECT n FROM b".into();
        run_step(&step, &mut r).await;
        assert_eq!(backend.row_caps(), vec![2, 2]);
        let first = &r.query_result.statements[0];
        assert_eq!(first.rows, vec![vec![json!(1)], vec![json!(2)]]);
        assert_eq!(first.total_rows, 3);
    }

    #[tokio::test]
    async fn test_execution_stops_at_first_failure_keeping_partials() {
        let backend = ScriptedBackend::new()
            .rows(rows(&["n"], vec![json!([1])]))
            .fail("no such table: nope")
            .rows(rows(&["n"], vec![json!([3])]));
        let step = Execution::new(Arc::new(backend.clone()), 100);
        let mut r = StateRecord::new("q");
        r.sql_query = "SELECT 1; SELECT * FROM nope; SELECT 3".into();
        run_step(&step, &mut r).await;
        assert_eq!(backend.statements().len(), 2);
        assert_eq!(r.query_result.statements.len(), 1);
        assert_eq!(
            r.error.as_deref(),
            Some("statement 2 of 3 failed: no such table: nope")
        );
    }

    #[tokio::test]
    async fn test_execution_ragged_rows_violate_contract() {
        let mut bad = rows(&["a", "b"], vec![json!([1, 2])]);
        bad.rows.push(vec![json!(3)]);
        let step = Execution::new(Arc::new(ScriptedBackend::new().rows(bad)), 100);
        let mut r = StateRecord::new("q");
        r.sql_query = "SELECT a, b FROM t".into();
        let err = step.run(&r).await.unwrap_err();
        assert!(matches!(err, SqlPilotError::ContractViolation { .. }));
    }

    fn failing(iteration: u32) -> StateRecord {
        let mut r = StateRecord::new("q");
        r.sql_query = "SELECT bad FROM orders".into();
        r.error = Some("no such column: bad".into());
        r.iteration = iteration;
        r
    }

    #[tokio::test]
    async fn test_correction_increments_and_replaces_query() {
        let assistant = ScriptedAssistant::new().corrected("SELECT order_id FROM orders");
        let step = Correction::new(Arc::new(assistant), schema(), 3);
        let mut r = failing(0);
        run_step(&step, &mut r).await;
        assert_eq!(r.iteration, 1);
        assert_eq!(r.sql_query, "SELECT order_id FROM orders");
        assert!(r.error.is_none());
        assert!(!r.has_answer());
    }

    #[tokio::test]
    async fn test_correction_gives_up_at_ceiling_without_touching_query() {
        let assistant = ScriptedAssistant::new();
        let step = Correction::new(Arc::new(assistant.clone()), schema(), 3);
        let mut r = failing(3);
        run_step(&step, &mut r).await;
        assert_eq!(r.iteration, 3);
        assert_eq!(r.sql_query, "SELECT bad FROM orders");
        assert!(r.error.is_none());
        assert_eq!(r.last_error.as_deref(), Some("no such column: bad"));
        assert!(r.final_answer.unwrap().contains("unable to complete"));
        assert_eq!(assistant.call_count("correct_sql"), 0);
    }

    #[tokio::test]
    async fn test_correction_impossible_gives_up_immediately() {
        let assistant = ScriptedAssistant::new().corrected("-- IMPOSSIBLE\n");
        let step = Correction::new(Arc::new(assistant), schema(), 3);
        let mut r = failing(0);
        run_step(&step, &mut r).await;
        assert_eq!(r.iteration, 1);
        assert_eq!(r.sql_query, "SELECT bad FROM orders");
        assert!(r.has_answer());
        assert!(r.error.is_none());
    }

    #[tokio::test]
    async fn test_correction_failure_consumes_retry() {
        let assistant = ScriptedAssistant::new().correct(Err(AdapterError::failed("timeout")));
        let step = Correction::new(Arc::new(assistant), schema(), 3);
        let mut r = failing(1);
        run_step(&step, &mut r).await;
        assert_eq!(r.iteration, 2);
        assert_eq!(r.sql_query, "SELECT bad FROM orders");
        assert!(r.error.is_none());
    }
}
