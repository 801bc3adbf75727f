use std::sync::Arc;

use futures::stream::{BoxStream, StreamExt};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_stream::wrappers::UnboundedReceiverStream;
use tokio_util::sync::CancellationToken;
use tracing::info;

use sqlpilot_core::config::{RepliesConfig, WorkflowConfig};
use sqlpilot_core::error::{Result, SqlPilotError};
use sqlpilot_core::state::StateRecord;
use sqlpilot_core::traits::EventSink;
use sqlpilot_core::types::{RunEvent, RunId};

use crate::graph::{Executor, GraphDefinition, Router};
use crate::steps::{text2sql_steps, Adapters};

/// Entry point for answering questions. Each call to [`Pipeline::start_run`]
/// owns a fresh record; independent runs may execute concurrently.
#[derive(Clone)]
pub struct Pipeline {
    executor: Arc<Executor>,
    sink: Arc<dyn EventSink>,
}

impl Pipeline {
    /// Wrap an arbitrary graph.
    pub fn new(graph: GraphDefinition, max_steps: usize, sink: Arc<dyn EventSink>) -> Self {
        Self {
            executor: Arc::new(Executor::new(Arc::new(graph), max_steps)),
            sink,
        }
    }

    /// The standard text-to-SQL graph.
    pub fn text2sql(
        adapters: &Adapters,
        workflow: &WorkflowConfig,
        replies: &RepliesConfig,
        schema: &str,
        sink: Arc<dyn EventSink>,
    ) -> Result<Self> {
        workflow.validate()?;
        let graph = GraphDefinition::new(
            text2sql_steps(adapters, workflow, replies, schema),
            Router::text2sql(),
        )?;
        Ok(Self::new(graph, workflow.max_steps, sink))
    }

    pub fn graph(&self) -> &GraphDefinition {
        self.executor.graph()
    }

    /// Start a run on a background task.
    pub fn start_run(&self, question: impl Into<String>) -> RunHandle {
        self.start_run_with(question, CancellationToken::new())
    }

    /// Start a run governed by an existing cancellation token.
    pub fn start_run_with(
        &self,
        question: impl Into<String>,
        cancel: CancellationToken,
    ) -> RunHandle {
        let state = StateRecord::new(question);
        let run_id = state.run_id.clone();
        let (tx, rx) = mpsc::unbounded_channel();
        let sink = RunSink {
            tx,
            shared: self.sink.clone(),
        };

        info!(run_id = %run_id, "Run started");
        let executor = self.executor.clone();
        let token = cancel.clone();
        let task = tokio::spawn(async move { executor.run(state, &sink, &token).await });

        RunHandle {
            run_id,
            events: Some(rx),
            task,
            cancel,
        }
    }

    /// Run to completion without observing events.
    pub async fn ask(&self, question: impl Into<String>) -> Result<StateRecord> {
        self.start_run(question).result().await
    }
}

/// Forwards a run's events to its handle and to the shared sink.
struct RunSink {
    tx: mpsc::UnboundedSender<RunEvent>,
    shared: Arc<dyn EventSink>,
}

impl EventSink for RunSink {
    fn emit(&self, event: RunEvent) {
        self.shared.emit(event.clone());
        // The handle may have been dropped; the run carries on regardless.
        let _ = self.tx.send(event);
    }
}

/// Handle to an in-flight run.
pub struct RunHandle {
    run_id: RunId,
    events: Option<mpsc::UnboundedReceiver<RunEvent>>,
    task: JoinHandle<Result<StateRecord>>,
    cancel: CancellationToken,
}

impl RunHandle {
    pub fn run_id(&self) -> &RunId {
        &self.run_id
    }

    /// The run's events, in order. Single pass: later calls yield an empty stream.
    pub fn events(&mut self) -> BoxStream<'static, RunEvent> {
        match self.events.take() {
            Some(rx) => UnboundedReceiverStream::new(rx).boxed(),
            None => futures::stream::empty().boxed(),
        }
    }

    /// Stop the run before its next step.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Wait for the final record.
    pub async fn result(self) -> Result<StateRecord> {
        self.task
            .await
            .map_err(|e| SqlPilotError::Join(e.to_string()))?
    }
}
