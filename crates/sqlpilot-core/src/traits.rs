use futures::future::BoxFuture;
use futures::stream::BoxStream;

use crate::config::ModelConfig;
use crate::error::{AdapterResult, Result};
use crate::state::{GraphType, QueryResult};
use crate::types::*;

/// LLM client — multi-provider streaming.
pub trait LlmClient: Send + Sync + 'static {
    /// Send a chat request and receive a stream of deltas.
    fn chat_stream(
        &self,
        config: &ModelConfig,
        messages: Vec<ChatMessage>,
    ) -> BoxFuture<'_, Result<BoxStream<'_, Result<StreamDelta>>>>;
}

/// Classifier / generator collaborator.
///
/// Every call may fail; failures come back as [`AdapterError`](crate::AdapterError)
/// and the calling step decides how to record them.
pub trait QueryAssistant: Send + Sync + 'static {
    /// Decide whether the question is answerable, or just a greeting.
    fn classify(&self, question: &str) -> BoxFuture<'_, AdapterResult<ScopeVerdict>>;

    /// Produce one or more `;`-separated statements for the question.
    fn generate_sql(&self, question: &str, schema: &str) -> BoxFuture<'_, AdapterResult<String>>;

    /// Repair a statement that failed with `error`.
    fn correct_sql(
        &self,
        prior_query: &str,
        error: &str,
        schema: &str,
    ) -> BoxFuture<'_, AdapterResult<String>>;

    /// Turn a result set into a natural-language answer.
    fn explain(&self, question: &str, result: &QueryResult) -> BoxFuture<'_, AdapterResult<String>>;

    /// Decide whether a chart helps and which kind.
    fn decide_viz(
        &self,
        question: &str,
        result: &QueryResult,
    ) -> BoxFuture<'_, AdapterResult<VizChoice>>;
}

/// Chart generator collaborator.
pub trait ChartRenderer: Send + Sync + 'static {
    /// Build a serialized chart figure for the result.
    fn render(
        &self,
        question: &str,
        result: &QueryResult,
        graph_type: GraphType,
    ) -> BoxFuture<'_, AdapterResult<serde_json::Value>>;
}

/// SQL execution collaborator. Statement level, no implicit transactions.
pub trait SqlBackend: Send + Sync + 'static {
    /// Execute a single statement, keeping at most `max_rows` rows.
    ///
    /// `QueryRows::total_rows` still counts every row the statement produced.
    fn run(&self, statement: &str, max_rows: usize) -> BoxFuture<'_, AdapterResult<QueryRows>>;

    /// Human-readable schema description for prompts.
    fn describe_schema(&self) -> BoxFuture<'_, AdapterResult<String>>;
}

/// Receiver of step-lifecycle events.
///
/// Implementations must accept calls from concurrent runs and must never
/// interleave parts of two events.
pub trait EventSink: Send + Sync {
    fn emit(&self, event: RunEvent);
}

/// Sink that drops everything.
pub struct NullSink;

impl EventSink for NullSink {
    fn emit(&self, _event: RunEvent) {}
}
