//! Test doubles shared by the sqlpilot crates.
//!
//! Every scripted adapter replays a queue of canned answers in order and
//! records what it was asked. Handles are cheap to clone and share their
//! state, so a test keeps one clone for assertions and hands another to the
//! code under test.

use std::collections::VecDeque;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use futures::future::BoxFuture;
use futures::stream::BoxStream;
use serde_json::Value;

use sqlpilot_core::config::{AppConfig, ModelConfig};
use sqlpilot_core::error::{AdapterError, AdapterResult, Result, SqlPilotError};
use sqlpilot_core::state::{GraphType, QueryResult};
use sqlpilot_core::traits::{ChartRenderer, EventSink, LlmClient, QueryAssistant, SqlBackend};
use sqlpilot_core::types::*;

fn lock<T>(m: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

// ---------------------------------------------------------------------------
// LLM client
// ---------------------------------------------------------------------------

/// An [`LlmClient`] that streams scripted replies, one per call.
#[derive(Clone, Default)]
pub struct ScriptedLlm {
    replies: Arc<Mutex<VecDeque<Result<String>>>>,
    calls: Arc<AtomicUsize>,
    prompts: Arc<Mutex<Vec<Vec<ChatMessage>>>>,
}

impl ScriptedLlm {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reply(self, text: impl Into<String>) -> Self {
        lock(&self.replies).push_back(Ok(text.into()));
        self
    }

    pub fn fail_with(self, err: SqlPilotError) -> Self {
        lock(&self.replies).push_back(Err(err));
        self
    }

    /// Shared counter of `chat_stream` calls.
    pub fn calls(&self) -> Arc<AtomicUsize> {
        self.calls.clone()
    }

    /// Every message list the client was sent.
    pub fn prompts(&self) -> Vec<Vec<ChatMessage>> {
        lock(&self.prompts).clone()
    }
}

impl LlmClient for ScriptedLlm {
    fn chat_stream(
        &self,
        _config: &ModelConfig,
        messages: Vec<ChatMessage>,
    ) -> BoxFuture<'_, Result<BoxStream<'_, Result<StreamDelta>>>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        lock(&self.prompts).push(messages);
        let next = lock(&self.replies).pop_front();
        Box::pin(async move {
            let text = next.unwrap_or_else(|| {
                Err(SqlPilotError::LlmRequest("no scripted reply left".into()))
            })?;
            let deltas: Vec<Result<StreamDelta>> = vec![
                Ok(StreamDelta::MessageId("scripted".into())),
                Ok(StreamDelta::TextDelta(text)),
                Ok(StreamDelta::Stop(StopReason::EndTurn)),
            ];
            Ok(Box::pin(futures::stream::iter(deltas)) as BoxStream<'_, Result<StreamDelta>>)
        })
    }
}

// ---------------------------------------------------------------------------
// Query assistant
// ---------------------------------------------------------------------------

#[derive(Default)]
struct AssistantScript {
    classify: VecDeque<AdapterResult<ScopeVerdict>>,
    generate: VecDeque<AdapterResult<String>>,
    correct: VecDeque<AdapterResult<String>>,
    explain: VecDeque<AdapterResult<String>>,
    viz: VecDeque<AdapterResult<VizChoice>>,
    calls: Vec<String>,
}

/// A [`QueryAssistant`] with one reply queue per operation.
#[derive(Clone, Default)]
pub struct ScriptedAssistant {
    script: Arc<Mutex<AssistantScript>>,
}

impl ScriptedAssistant {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn classify(self, reply: AdapterResult<ScopeVerdict>) -> Self {
        lock(&self.script).classify.push_back(reply);
        self
    }

    pub fn in_scope(self) -> Self {
        self.classify(Ok(ScopeVerdict {
            in_scope: true,
            is_greeting: false,
            reason: "about the database".into(),
        }))
    }

    pub fn greeting(self) -> Self {
        self.classify(Ok(ScopeVerdict {
            in_scope: true,
            is_greeting: true,
            reason: "greeting".into(),
        }))
    }

    pub fn out_of_scope(self) -> Self {
        self.classify(Ok(ScopeVerdict {
            in_scope: false,
            is_greeting: false,
            reason: "needs external data".into(),
        }))
    }

    pub fn generate(self, reply: AdapterResult<String>) -> Self {
        lock(&self.script).generate.push_back(reply);
        self
    }

    pub fn sql(self, sql: &str) -> Self {
        self.generate(Ok(sql.to_string()))
    }

    pub fn correct(self, reply: AdapterResult<String>) -> Self {
        lock(&self.script).correct.push_back(reply);
        self
    }

    pub fn corrected(self, sql: &str) -> Self {
        self.correct(Ok(sql.to_string()))
    }

    pub fn explain(self, reply: AdapterResult<String>) -> Self {
        lock(&self.script).explain.push_back(reply);
        self
    }

    pub fn answer(self, text: &str) -> Self {
        self.explain(Ok(text.to_string()))
    }

    pub fn viz(self, reply: AdapterResult<VizChoice>) -> Self {
        lock(&self.script).viz.push_back(reply);
        self
    }

    pub fn chart(self, graph_type: GraphType) -> Self {
        self.viz(Ok(VizChoice {
            needs_graph: graph_type != GraphType::None,
            graph_type,
        }))
    }

    /// Operation names in call order, e.g. `["classify", "generate_sql"]`.
    pub fn calls(&self) -> Vec<String> {
        lock(&self.script).calls.clone()
    }

    pub fn call_count(&self, op: &str) -> usize {
        lock(&self.script).calls.iter().filter(|c| *c == op).count()
    }

    fn next<T>(
        &self,
        op: &str,
        pick: impl FnOnce(&mut AssistantScript) -> Option<AdapterResult<T>>,
    ) -> AdapterResult<T> {
        let mut script = lock(&self.script);
        script.calls.push(op.to_string());
        pick(&mut script)
            .unwrap_or_else(|| Err(AdapterError::failed(format!("no scripted {op} reply"))))
    }
}

impl QueryAssistant for ScriptedAssistant {
    fn classify(&self, _question: &str) -> BoxFuture<'_, AdapterResult<ScopeVerdict>> {
        let reply = self.next("classify", |s| s.classify.pop_front());
        Box::pin(async move { reply })
    }

    fn generate_sql(&self, _question: &str, _schema: &str) -> BoxFuture<'_, AdapterResult<String>> {
        let reply = self.next("generate_sql", |s| s.generate.pop_front());
        Box::pin(async move { reply })
    }

    fn correct_sql(
        &self,
        _prior_query: &str,
        _error: &str,
        _schema: &str,
    ) -> BoxFuture<'_, AdapterResult<String>> {
        let reply = self.next("correct_sql", |s| s.correct.pop_front());
        Box::pin(async move { reply })
    }

    fn explain(&self, _question: &str, _result: &QueryResult) -> BoxFuture<'_, AdapterResult<String>> {
        let reply = self.next("explain", |s| s.explain.pop_front());
        Box::pin(async move { reply })
    }

    fn decide_viz(
        &self,
        _question: &str,
        _result: &QueryResult,
    ) -> BoxFuture<'_, AdapterResult<VizChoice>> {
        let reply = self.next("decide_viz", |s| s.viz.pop_front());
        Box::pin(async move { reply })
    }
}

// ---------------------------------------------------------------------------
// SQL backend
// ---------------------------------------------------------------------------

#[derive(Default)]
struct BackendScript {
    replies: VecDeque<AdapterResult<QueryRows>>,
    statements: Vec<String>,
    row_caps: Vec<usize>,
}

/// A [`SqlBackend`] answering statements from a queue.
#[derive(Clone)]
pub struct ScriptedBackend {
    script: Arc<Mutex<BackendScript>>,
    schema: String,
}

impl Default for ScriptedBackend {
    fn default() -> Self {
        Self {
            script: Default::default(),
            schema: "orders(order_id TEXT, customer_id TEXT, order_status TEXT)".into(),
        }
    }
}

impl ScriptedBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reply(self, reply: AdapterResult<QueryRows>) -> Self {
        lock(&self.script).replies.push_back(reply);
        self
    }

    pub fn rows(self, rows: QueryRows) -> Self {
        self.reply(Ok(rows))
    }

    pub fn fail(self, msg: &str) -> Self {
        self.reply(Err(AdapterError::failed(msg)))
    }

    /// Statements received, in order.
    pub fn statements(&self) -> Vec<String> {
        lock(&self.script).statements.clone()
    }

    /// Row cap passed with each statement.
    pub fn row_caps(&self) -> Vec<usize> {
        lock(&self.script).row_caps.clone()
    }
}

impl SqlBackend for ScriptedBackend {
    fn run(&self, statement: &str, max_rows: usize) -> BoxFuture<'_, AdapterResult<QueryRows>> {
        let reply = {
            let mut script = lock(&self.script);
            script.statements.push(statement.to_string());
            script.row_caps.push(max_rows);
            script
                .replies
                .pop_front()
                .unwrap_or_else(|| Err(AdapterError::failed("no scripted rows")))
        };
        // Apply the cap the way a real backend would.
        let reply = reply.map(|mut rows| {
            rows.total_rows = rows.total_rows.max(rows.rows.len());
            rows.rows.truncate(max_rows);
            rows
        });
        Box::pin(async move { reply })
    }

    fn describe_schema(&self) -> BoxFuture<'_, AdapterResult<String>> {
        Box::pin(async move { Ok(self.schema.clone()) })
    }
}

// ---------------------------------------------------------------------------
// Chart renderer
// ---------------------------------------------------------------------------

/// A [`ChartRenderer`] returning queued payloads, or a tiny figure when the queue is empty.
#[derive(Clone, Default)]
pub struct ScriptedCharts {
    replies: Arc<Mutex<VecDeque<AdapterResult<Value>>>>,
    calls: Arc<AtomicUsize>,
}

impl ScriptedCharts {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reply(self, reply: AdapterResult<Value>) -> Self {
        lock(&self.replies).push_back(reply);
        self
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl ChartRenderer for ScriptedCharts {
    fn render(
        &self,
        _question: &str,
        _result: &QueryResult,
        graph_type: GraphType,
    ) -> BoxFuture<'_, AdapterResult<Value>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let reply = lock(&self.replies).pop_front().unwrap_or_else(|| {
            Ok(serde_json::json!({
                "data": [{ "type": graph_type.as_str() }],
                "layout": {}
            }))
        });
        Box::pin(async move { reply })
    }
}

// ---------------------------------------------------------------------------
// Event sink
// ---------------------------------------------------------------------------

/// An [`EventSink`] that keeps every event.
#[derive(Clone, Default)]
pub struct RecordingSink {
    events: Arc<Mutex<Vec<RunEvent>>>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<RunEvent> {
        lock(&self.events).clone()
    }

    /// `(kind, step)` pairs, handy for asserting event order.
    pub fn trace(&self) -> Vec<(&'static str, Option<String>)> {
        lock(&self.events)
            .iter()
            .map(|e| (e.kind(), e.step().map(|s| s.as_str().to_string())))
            .collect()
    }

    pub fn len(&self) -> usize {
        lock(&self.events).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl EventSink for RecordingSink {
    fn emit(&self, event: RunEvent) {
        lock(&self.events).push(event);
    }
}

// ---------------------------------------------------------------------------
// Fixtures
// ---------------------------------------------------------------------------

/// Rows with the given columns; each row is a JSON array.
pub fn rows(columns: &[&str], rows: Vec<Value>) -> QueryRows {
    let rows: Vec<Vec<Value>> = rows
        .into_iter()
        .map(|r| match r {
            Value::Array(cells) => cells,
            other => vec![other],
        })
        .collect();
    QueryRows {
        columns: columns.iter().map(|c| c.to_string()).collect(),
        total_rows: rows.len(),
        rows,
        affected: None,
    }
}

/// A minimal config parsed from TOML, with every section at its default.
pub fn test_config() -> AppConfig {
    toml::from_str(
        r#"
[model]
provider = "openai"
model_id = "test-model"
"#,
    )
    .unwrap_or_else(|e| panic!("test config must parse: {e}"))
}

/// Write `contents` to `sqlpilot.toml` inside a fresh temp dir.
pub fn write_config(contents: &str) -> (tempfile::TempDir, PathBuf) {
    let dir = tempfile::tempdir().unwrap_or_else(|e| panic!("tempdir: {e}"));
    let path = dir.path().join("sqlpilot.toml");
    std::fs::write(&path, contents).unwrap_or_else(|e| panic!("write config: {e}"));
    (dir, path)
}
