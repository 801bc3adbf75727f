use std::sync::Arc;
use std::time::Instant;

use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use sqlpilot_core::error::{Result, SqlPilotError};
use sqlpilot_core::state::StateRecord;
use sqlpilot_core::traits::EventSink;
use sqlpilot_core::types::{RunEvent, RunOutcome};

use super::definition::GraphDefinition;
use super::router::Next;

/// Default global ceiling on executed steps per run.
pub const DEFAULT_MAX_STEPS: usize = 50;

/// Walks a [`GraphDefinition`] for one record at a time.
///
/// Steps run strictly in sequence. The executor is the only code that
/// merges step updates into the record, and it never retries a step.
pub struct Executor {
    graph: Arc<GraphDefinition>,
    max_steps: usize,
}

impl Executor {
    pub fn new(graph: Arc<GraphDefinition>, max_steps: usize) -> Self {
        Self { graph, max_steps }
    }

    pub fn graph(&self) -> &GraphDefinition {
        &self.graph
    }

    /// Drive `state` to the terminal node.
    ///
    /// Internal errors emit a failed `RunTerminated` before they are returned.
    /// Cancellation is checked between steps and emits nothing.
    pub async fn run(
        &self,
        state: StateRecord,
        sink: &dyn EventSink,
        cancel: &CancellationToken,
    ) -> Result<StateRecord> {
        let mut state = state;
        match self.walk(&mut state, sink, cancel).await {
            Ok(()) => {
                let outcome = state.outcome();
                info!(
                    run_id = %state.run_id,
                    outcome = ?outcome,
                    iteration = state.iteration,
                    version = state.version,
                    "Run terminated"
                );
                sink.emit(RunEvent::RunTerminated {
                    run_id: state.run_id.clone(),
                    last_step: state.last_step,
                    outcome,
                    snapshot: state.snapshot(),
                });
                Ok(state)
            }
            Err(SqlPilotError::Cancelled) => {
                info!(run_id = %state.run_id, "Run cancelled");
                Err(SqlPilotError::Cancelled)
            }
            Err(e) => {
                error!(run_id = %state.run_id, kind = ?e.kind(), error = %e, "Run failed");
                sink.emit(RunEvent::RunTerminated {
                    run_id: state.run_id.clone(),
                    last_step: state.last_step,
                    outcome: RunOutcome::Failed {
                        error: e.to_string(),
                    },
                    snapshot: state.snapshot(),
                });
                Err(e)
            }
        }
    }

    async fn walk(
        &self,
        state: &mut StateRecord,
        sink: &dyn EventSink,
        cancel: &CancellationToken,
    ) -> Result<()> {
        let router = self.graph.router();
        let mut executed = 0usize;
        let mut next = router.next(state)?;

        while let Next::Step(step_id) = next {
            if cancel.is_cancelled() {
                return Err(SqlPilotError::Cancelled);
            }
            if executed >= self.max_steps {
                return Err(SqlPilotError::StepLimitExceeded(self.max_steps));
            }
            executed += 1;

            let step = self.graph.step(step_id).ok_or_else(|| {
                SqlPilotError::Misconfigured(format!("step '{step_id}' is not registered"))
            })?;

            debug!(run_id = %state.run_id, step = %step_id, "Step started");
            sink.emit(RunEvent::StepStarted {
                run_id: state.run_id.clone(),
                step: step_id,
                snapshot: state.snapshot(),
            });

            let started = Instant::now();
            let output = step.run(state).await?;
            for note in output.notes {
                sink.emit(RunEvent::StepProgress {
                    run_id: state.run_id.clone(),
                    step: step_id,
                    message: note,
                });
            }

            state
                .apply(step.writes(), output.update)
                .map_err(|field| {
                    SqlPilotError::contract(
                        step_id.as_str(),
                        format!("wrote '{field}' outside its write-set"),
                    )
                })?;
            state.advance(step_id);

            let elapsed_ms = started.elapsed().as_millis() as u64;
            info!(
                run_id = %state.run_id,
                step = %step_id,
                elapsed_ms,
                iteration = state.iteration,
                has_error = state.has_error(),
                "Step finished"
            );
            sink.emit(RunEvent::StepFinished {
                run_id: state.run_id.clone(),
                step: step_id,
                elapsed_ms,
                snapshot: state.snapshot(),
            });

            next = router.next(state)?;
            debug!(run_id = %state.run_id, from = %step_id, to = %next, "Routed");
        }

        state
            .check_terminal()
            .map_err(|detail| SqlPilotError::contract("terminal", detail))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::future::BoxFuture;
    use sqlpilot_core::state::{Field, StepId};
    use sqlpilot_test_utils::RecordingSink;

    use crate::graph::{Edge, Router, Step, StepOutput};

    /// Writes nothing; cancels `token` once it has run.
    struct Tick {
        token: Option<CancellationToken>,
    }

    impl Step for Tick {
        fn id(&self) -> StepId {
            StepId::ScopeCheck
        }

        fn writes(&self) -> &'static [Field] {
            &[]
        }

        fn run<'a>(&'a self, _state: &'a StateRecord) -> BoxFuture<'a, Result<StepOutput>> {
            Box::pin(async move {
                if let Some(token) = &self.token {
                    token.cancel();
                }
                Ok(StepOutput::default().note("tick"))
            })
        }
    }

    fn looping(step: Tick, max_steps: usize) -> Executor {
        let router = Router::new(vec![
            Edge::always(None, Next::Step(StepId::ScopeCheck)),
            Edge::always(Some(StepId::ScopeCheck), Next::Step(StepId::ScopeCheck)),
        ]);
        let graph = GraphDefinition::new(vec![Arc::new(step)], router).unwrap();
        Executor::new(Arc::new(graph), max_steps)
    }

    #[tokio::test]
    async fn test_cancel_during_step_stops_before_next() {
        let token = CancellationToken::new();
        let executor = looping(
            Tick {
                token: Some(token.clone()),
            },
            10,
        );
        let sink = RecordingSink::new();

        let err = executor
            .run(StateRecord::new("q"), &sink, &token)
            .await
            .unwrap_err();

        assert!(matches!(err, SqlPilotError::Cancelled));
        let kinds: Vec<_> = sink.events().iter().map(|e| e.kind()).collect();
        assert_eq!(kinds, vec!["step_started", "step_progress", "step_finished"]);
    }

    #[tokio::test]
    async fn test_step_ceiling_counts_executed_steps() {
        let executor = looping(Tick { token: None }, 3);
        let sink = RecordingSink::new();

        let err = executor
            .run(StateRecord::new("q"), &sink, &CancellationToken::new())
            .await
            .unwrap_err();

        assert!(matches!(err, SqlPilotError::StepLimitExceeded(3)));
        let events = sink.events();
        let finished = events
            .iter()
            .filter(|e| matches!(e, RunEvent::StepFinished { .. }))
            .count();
        assert_eq!(finished, 3);
        match events.last() {
            Some(RunEvent::RunTerminated {
                outcome: RunOutcome::Failed { error },
                last_step,
                ..
            }) => {
                assert!(error.contains('3'));
                assert_eq!(*last_step, Some(StepId::ScopeCheck));
            }
            other => panic!("expected a failed RunTerminated, got {other:?}"),
        }
    }
}
