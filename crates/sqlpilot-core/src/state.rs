//! The state record threaded through every step of a run.
//!
//! A run owns exactly one [`StateRecord`]. Steps only ever see it by shared
//! reference and describe their effect as a [`StateUpdate`]; the executor is
//! the only code that merges updates back, and it does so through
//! [`StateRecord::apply`], which enforces the step's declared write-set.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::types::{RunId, RunOutcome};

/// Maximum characters kept per string field in event snapshots.
const SNAPSHOT_TEXT_LIMIT: usize = 400;

/// Identifier of a step in the workflow graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepId {
    ScopeCheck,
    QueryGeneration,
    Execution,
    Correction,
    Explanation,
    VizDecision,
    VizGeneration,
}

impl StepId {
    pub const ALL: [StepId; 7] = [
        StepId::ScopeCheck,
        StepId::QueryGeneration,
        StepId::Execution,
        StepId::Correction,
        StepId::Explanation,
        StepId::VizDecision,
        StepId::VizGeneration,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ScopeCheck => "scope_check",
            Self::QueryGeneration => "query_generation",
            Self::Execution => "execution",
            Self::Correction => "correction",
            Self::Explanation => "explanation",
            Self::VizDecision => "viz_decision",
            Self::VizGeneration => "viz_generation",
        }
    }

    /// Human-readable label for progress displays.
    pub fn label(&self) -> &'static str {
        match self {
            Self::ScopeCheck => "Scope check",
            Self::QueryGeneration => "Generate SQL",
            Self::Execution => "Execute SQL",
            Self::Correction => "Fix SQL error",
            Self::Explanation => "Explain result",
            Self::VizDecision => "Decide chart",
            Self::VizGeneration => "Build chart",
        }
    }
}

impl fmt::Display for StepId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A step-writable field of the [`StateRecord`].
///
/// `question`, `run_id`, `version` and `last_step` are deliberately absent:
/// no step may write them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Field {
    InScope,
    IsGreeting,
    SqlQuery,
    QueryResult,
    Error,
    Iteration,
    FinalAnswer,
    NeedsGraph,
    GraphType,
    GraphPayload,
    LastError,
}

impl fmt::Display for Field {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::InScope => "in_scope",
            Self::IsGreeting => "is_greeting",
            Self::SqlQuery => "sql_query",
            Self::QueryResult => "query_result",
            Self::Error => "error",
            Self::Iteration => "iteration",
            Self::FinalAnswer => "final_answer",
            Self::NeedsGraph => "needs_graph",
            Self::GraphType => "graph_type",
            Self::GraphPayload => "graph_payload",
            Self::LastError => "last_error",
        };
        f.write_str(name)
    }
}

/// Chart kind selected by the visualization decision.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GraphType {
    Bar,
    Line,
    Pie,
    Scatter,
    #[default]
    None,
}

impl GraphType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Bar => "bar",
            Self::Line => "line",
            Self::Pie => "pie",
            Self::Scatter => "scatter",
            Self::None => "none",
        }
    }
}

impl fmt::Display for GraphType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for GraphType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "bar" => Ok(Self::Bar),
            "line" => Ok(Self::Line),
            "pie" => Ok(Self::Pie),
            "scatter" => Ok(Self::Scatter),
            "none" | "" => Ok(Self::None),
            other => Err(format!("unknown graph type: {other}")),
        }
    }
}

/// Rows returned by one executed statement.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StatementResult {
    pub statement: String,
    pub columns: Vec<String>,
    pub rows: Vec<Vec<Value>>,
    /// Rows the backend produced before the row cap was applied.
    pub total_rows: usize,
}

impl StatementResult {
    pub fn truncated(&self) -> bool {
        self.total_rows > self.rows.len()
    }

    /// Render as a `col | col` text table, showing at most `max_rows` rows.
    pub fn render_table(&self, max_rows: usize) -> String {
        let mut lines = Vec::new();
        if self.rows.is_empty() {
            lines.push("(no rows)".to_string());
            return lines.join("\n");
        }
        if !self.columns.is_empty() {
            let header = self.columns.join(" | ");
            lines.push(header.clone());
            lines.push("-".repeat(header.len()));
        }
        for row in self.rows.iter().take(max_rows) {
            let cells: Vec<String> = row.iter().map(display_cell).collect();
            lines.push(cells.join(" | "));
        }
        if self.total_rows > max_rows.min(self.rows.len()) {
            lines.push(format!(
                "... ({} rows total)",
                self.total_rows
            ));
        }
        lines.join("\n")
    }

    /// Rows as JSON objects keyed by column name.
    pub fn records(&self) -> Vec<serde_json::Map<String, Value>> {
        self.rows
            .iter()
            .map(|row| {
                self.columns
                    .iter()
                    .cloned()
                    .zip(row.iter().cloned())
                    .collect()
            })
            .collect()
    }
}

fn display_cell(v: &Value) -> String {
    match v {
        Value::String(s) => s.clone(),
        Value::Null => "NULL".to_string(),
        other => other.to_string(),
    }
}

/// Results of every statement executed for the current `sql_query`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QueryResult {
    pub statements: Vec<StatementResult>,
}

impl QueryResult {
    pub fn new(statements: Vec<StatementResult>) -> Self {
        Self { statements }
    }

    /// True when no statement produced a single row.
    pub fn is_empty(&self) -> bool {
        self.statements.iter().all(|s| s.rows.is_empty())
    }

    pub fn row_count(&self) -> usize {
        self.statements.iter().map(|s| s.rows.len()).sum()
    }

    /// The first statement that returned rows; charts are drawn from it.
    pub fn primary(&self) -> Option<&StatementResult> {
        self.statements.iter().find(|s| !s.rows.is_empty())
    }

    /// Text rendering used for prompts and degraded answers.
    pub fn render(&self, max_rows: usize) -> String {
        if self.statements.is_empty() {
            return "(no results)".to_string();
        }
        let multi = self.statements.len() > 1;
        self.statements
            .iter()
            .enumerate()
            .map(|(i, s)| {
                if multi {
                    format!("[{}] {}\n{}", i + 1, s.statement, s.render_table(max_rows))
                } else {
                    s.render_table(max_rows)
                }
            })
            .collect::<Vec<_>>()
            .join("\n\n")
    }
}

/// A single field assignment produced by a step.
#[derive(Debug, Clone, PartialEq)]
pub enum Assignment {
    InScope(Option<bool>),
    IsGreeting(bool),
    SqlQuery(String),
    QueryResult(QueryResult),
    Error(Option<String>),
    Iteration(u32),
    FinalAnswer(Option<String>),
    NeedsGraph(bool),
    GraphType(GraphType),
    GraphPayload(Option<Value>),
    LastError(Option<String>),
}

impl Assignment {
    pub fn field(&self) -> Field {
        match self {
            Self::InScope(_) => Field::InScope,
            Self::IsGreeting(_) => Field::IsGreeting,
            Self::SqlQuery(_) => Field::SqlQuery,
            Self::QueryResult(_) => Field::QueryResult,
            Self::Error(_) => Field::Error,
            Self::Iteration(_) => Field::Iteration,
            Self::FinalAnswer(_) => Field::FinalAnswer,
            Self::NeedsGraph(_) => Field::NeedsGraph,
            Self::GraphType(_) => Field::GraphType,
            Self::GraphPayload(_) => Field::GraphPayload,
            Self::LastError(_) => Field::LastError,
        }
    }
}

/// The partial update a step returns.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StateUpdate {
    assignments: Vec<Assignment>,
}

impl StateUpdate {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(mut self, assignment: Assignment) -> Self {
        self.assignments.push(assignment);
        self
    }

    pub fn in_scope(self, v: bool) -> Self {
        self.set(Assignment::InScope(Some(v)))
    }

    pub fn is_greeting(self, v: bool) -> Self {
        self.set(Assignment::IsGreeting(v))
    }

    pub fn sql_query(self, sql: impl Into<String>) -> Self {
        self.set(Assignment::SqlQuery(sql.into()))
    }

    pub fn query_result(self, result: QueryResult) -> Self {
        self.set(Assignment::QueryResult(result))
    }

    pub fn error(self, msg: impl Into<String>) -> Self {
        self.set(Assignment::Error(Some(msg.into())))
    }

    pub fn clear_error(self) -> Self {
        self.set(Assignment::Error(None))
    }

    pub fn iteration(self, n: u32) -> Self {
        self.set(Assignment::Iteration(n))
    }

    pub fn final_answer(self, text: impl Into<String>) -> Self {
        self.set(Assignment::FinalAnswer(Some(text.into())))
    }

    pub fn needs_graph(self, v: bool) -> Self {
        self.set(Assignment::NeedsGraph(v))
    }

    pub fn graph_type(self, t: GraphType) -> Self {
        self.set(Assignment::GraphType(t))
    }

    pub fn graph_payload(self, payload: Value) -> Self {
        self.set(Assignment::GraphPayload(Some(payload)))
    }

    pub fn last_error(self, msg: impl Into<String>) -> Self {
        self.set(Assignment::LastError(Some(msg.into())))
    }

    pub fn assignments(&self) -> &[Assignment] {
        &self.assignments
    }

    pub fn fields(&self) -> Vec<Field> {
        self.assignments.iter().map(Assignment::field).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.assignments.is_empty()
    }
}

/// The shared record of one run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateRecord {
    pub run_id: RunId,
    /// Bumped by the executor on every merge.
    pub version: u64,
    /// Last step whose update was merged; `None` before the first step.
    pub last_step: Option<StepId>,

    pub question: String,
    pub in_scope: Option<bool>,
    pub is_greeting: bool,
    pub sql_query: String,
    pub query_result: QueryResult,
    pub error: Option<String>,
    pub iteration: u32,
    pub final_answer: Option<String>,
    pub needs_graph: bool,
    pub graph_type: GraphType,
    pub graph_payload: Option<Value>,
    pub last_error: Option<String>,
}

impl StateRecord {
    pub fn new(question: impl Into<String>) -> Self {
        Self::with_run_id(RunId::new(), question)
    }

    pub fn with_run_id(run_id: RunId, question: impl Into<String>) -> Self {
        Self {
            run_id,
            version: 0,
            last_step: None,
            question: question.into(),
            in_scope: None,
            is_greeting: false,
            sql_query: String::new(),
            query_result: QueryResult::default(),
            error: None,
            iteration: 0,
            final_answer: None,
            needs_graph: false,
            graph_type: GraphType::None,
            graph_payload: None,
            last_error: None,
        }
    }

    pub fn has_error(&self) -> bool {
        self.error.as_deref().is_some_and(|e| !e.is_empty())
    }

    pub fn has_answer(&self) -> bool {
        self.final_answer.as_deref().is_some_and(|a| !a.is_empty())
    }

    /// Merge a step's update, refusing any write outside `writes`.
    ///
    /// The check runs before anything is written, so a rejected update
    /// leaves the record untouched. On rejection the offending field is
    /// returned.
    pub fn apply(&mut self, writes: &[Field], update: StateUpdate) -> Result<(), Field> {
        if let Some(bad) = update.fields().into_iter().find(|f| !writes.contains(f)) {
            return Err(bad);
        }
        for assignment in update.assignments {
            match assignment {
                Assignment::InScope(v) => self.in_scope = v,
                Assignment::IsGreeting(v) => self.is_greeting = v,
                Assignment::SqlQuery(v) => self.sql_query = v,
                Assignment::QueryResult(v) => self.query_result = v,
                Assignment::Error(v) => self.error = v,
                Assignment::Iteration(v) => self.iteration = v,
                Assignment::FinalAnswer(v) => self.final_answer = v,
                Assignment::NeedsGraph(v) => self.needs_graph = v,
                Assignment::GraphType(v) => self.graph_type = v,
                Assignment::GraphPayload(v) => self.graph_payload = v,
                Assignment::LastError(v) => self.last_error = v,
            }
        }
        Ok(())
    }

    /// Record that `step` has been merged.
    pub fn advance(&mut self, step: StepId) {
        self.last_step = Some(step);
        self.version += 1;
    }

    /// Step-writable fields whose value differs between `self` and `other`.
    pub fn changed_fields(&self, other: &StateRecord) -> Vec<Field> {
        let mut changed = Vec::new();
        if self.in_scope != other.in_scope {
            changed.push(Field::InScope);
        }
        if self.is_greeting != other.is_greeting {
            changed.push(Field::IsGreeting);
        }
        if self.sql_query != other.sql_query {
            changed.push(Field::SqlQuery);
        }
        if self.query_result != other.query_result {
            changed.push(Field::QueryResult);
        }
        if self.error != other.error {
            changed.push(Field::Error);
        }
        if self.iteration != other.iteration {
            changed.push(Field::Iteration);
        }
        if self.final_answer != other.final_answer {
            changed.push(Field::FinalAnswer);
        }
        if self.needs_graph != other.needs_graph {
            changed.push(Field::NeedsGraph);
        }
        if self.graph_type != other.graph_type {
            changed.push(Field::GraphType);
        }
        if self.graph_payload != other.graph_payload {
            changed.push(Field::GraphPayload);
        }
        if self.last_error != other.last_error {
            changed.push(Field::LastError);
        }
        changed
    }

    /// Invariants that must hold when the run reaches the terminal node.
    pub fn check_terminal(&self) -> Result<(), String> {
        if self.has_error() && self.has_answer() {
            return Err("error and final_answer are both set at termination".into());
        }
        if !self.needs_graph && self.graph_payload.is_some() {
            return Err("graph_payload present while needs_graph is false".into());
        }
        Ok(())
    }

    /// How the run ended, judged from the terminal record.
    pub fn outcome(&self) -> RunOutcome {
        if self.last_error.is_some() {
            RunOutcome::Degraded
        } else if self.is_greeting || self.in_scope != Some(true) {
            RunOutcome::Rejected
        } else {
            RunOutcome::Answered
        }
    }

    /// A redacted, serializable view for event streams.
    ///
    /// Long strings are cut at 400 characters, result rows are replaced by
    /// counts and the chart payload by its size.
    pub fn snapshot(&self) -> Value {
        let statements: Vec<Value> = self
            .query_result
            .statements
            .iter()
            .map(|s| {
                serde_json::json!({
                    "statement": clip(&s.statement),
                    "columns": s.columns,
                    "rows": s.rows.len(),
                    "total_rows": s.total_rows,
                })
            })
            .collect();
        let graph_payload = self.graph_payload.as_ref().map(|p| {
            serde_json::json!({ "redacted": true, "bytes": p.to_string().len() })
        });

        serde_json::json!({
            "run_id": self.run_id,
            "version": self.version,
            "last_step": self.last_step,
            "question": clip(&self.question),
            "in_scope": self.in_scope,
            "is_greeting": self.is_greeting,
            "sql_query": clip(&self.sql_query),
            "query_result": statements,
            "error": self.error.as_deref().map(clip),
            "iteration": self.iteration,
            "final_answer": self.final_answer.as_deref().map(clip),
            "needs_graph": self.needs_graph,
            "graph_type": self.graph_type,
            "graph_payload": graph_payload,
            "last_error": self.last_error.as_deref().map(clip),
        })
    }
}

fn clip(s: &str) -> String {
    if s.chars().count() <= SNAPSHOT_TEXT_LIMIT {
        s.to_string()
    } else {
        let head: String = s.chars().take(SNAPSHOT_TEXT_LIMIT).collect();
        format!("{head}...(truncated)")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample_result() -> QueryResult {
        QueryResult::new(vec![StatementResult {
            statement: "SELECT seller_id, COUNT(*) AS n FROM order_items GROUP BY 1".into(),
            columns: vec!["seller_id".into(), "n".into()],
            rows: vec![vec![json!("s1"), json!(12)], vec![json!("s2"), json!(7)]],
            total_rows: 2,
        }])
    }

    #[test]
    fn test_new_record_defaults() {
        let r = StateRecord::new("How many orders?");
        assert_eq!(r.question, "How many orders?");
        assert_eq!(r.iteration, 0);
        assert_eq!(r.version, 0);
        assert!(r.in_scope.is_none());
        assert!(r.last_step.is_none());
        assert!(!r.has_error());
        assert!(!r.has_answer());
        assert_eq!(r.graph_type, GraphType::None);
    }

    #[test]
    fn test_apply_within_write_set() {
        let mut r = StateRecord::new("q");
        let update = StateUpdate::new().in_scope(true).is_greeting(false);
        r.apply(&[Field::InScope, Field::IsGreeting], update).unwrap();
        assert_eq!(r.in_scope, Some(true));
        assert!(!r.is_greeting);
    }

    #[test]
    fn test_apply_rejects_outside_write_set_atomically() {
        let mut r = StateRecord::new("q");
        let before = r.clone();
        let update = StateUpdate::new().sql_query("SELECT 1").iteration(9);
        let err = r.apply(&[Field::SqlQuery], update).unwrap_err();
        assert_eq!(err, Field::Iteration);
        assert_eq!(r, before);
    }

    #[test]
    fn test_changed_fields() {
        let a = StateRecord::new("q");
        let mut b = a.clone();
        b.error = Some("no such table".into());
        b.query_result = sample_result();
        let changed = a.changed_fields(&b);
        assert_eq!(changed, vec![Field::QueryResult, Field::Error]);
    }

    #[test]
    fn test_advance_bumps_version() {
        let mut r = StateRecord::new("q");
        r.advance(StepId::ScopeCheck);
        r.advance(StepId::QueryGeneration);
        assert_eq!(r.version, 2);
        assert_eq!(r.last_step, Some(StepId::QueryGeneration));
        assert!(no_step_fields_changed(&r));
    }

    fn no_step_fields_changed(r: &StateRecord) -> bool {
        StateRecord::with_run_id(r.run_id.clone(), r.question.clone())
            .changed_fields(r)
            .is_empty()
    }

    #[test]
    fn test_terminal_invariants() {
        let mut r = StateRecord::new("q");
        r.final_answer = Some("done".into());
        assert!(r.check_terminal().is_ok());

        r.error = Some("boom".into());
        assert!(r.check_terminal().is_err());

        r.error = None;
        r.graph_payload = Some(json!({"data": []}));
        assert!(r.check_terminal().is_err());

        r.needs_graph = true;
        assert!(r.check_terminal().is_ok());
    }

    #[test]
    fn test_outcome() {
        let mut r = StateRecord::new("Hello!");
        r.is_greeting = true;
        r.in_scope = Some(true);
        assert_eq!(r.outcome(), RunOutcome::Rejected);

        r.is_greeting = false;
        assert_eq!(r.outcome(), RunOutcome::Answered);

        r.last_error = Some("no such column".into());
        assert_eq!(r.outcome(), RunOutcome::Degraded);
    }

    #[test]
    fn test_graph_type_parse() {
        assert_eq!("Bar".parse::<GraphType>(), Ok(GraphType::Bar));
        assert_eq!(" pie ".parse::<GraphType>(), Ok(GraphType::Pie));
        assert_eq!("".parse::<GraphType>(), Ok(GraphType::None));
        assert!("histogram".parse::<GraphType>().is_err());
    }

    #[test]
    fn test_render_table() {
        let result = sample_result();
        let text = result.render(10);
        assert!(text.starts_with("seller_id | n"));
        assert!(text.contains("s1 | 12"));
        assert!(!result.is_empty());
        assert_eq!(result.row_count(), 2);
    }

    #[test]
    fn test_render_multi_statement_and_truncation() {
        let mut first = sample_result().statements.remove(0);
        first.total_rows = 250;
        let second = StatementResult {
            statement: "SELECT 1".into(),
            columns: vec!["1".into()],
            rows: vec![],
            total_rows: 0,
        };
        let result = QueryResult::new(vec![first, second]);
        let text = result.render(1);
        assert!(text.contains("[1] SELECT seller_id"));
        assert!(text.contains("(250 rows total)"));
        assert!(text.contains("[2] SELECT 1\n(no rows)"));
        assert!(result.statements[0].truncated());
    }

    #[test]
    fn test_records() {
        let records = sample_result().statements[0].records();
        assert_eq!(records[0].get("seller_id"), Some(&json!("s1")));
        assert_eq!(records[1].get("n"), Some(&json!(7)));
    }

    #[test]
    fn test_snapshot_redacts() {
        let mut r = StateRecord::new("x".repeat(1000));
        r.query_result = sample_result();
        r.needs_graph = true;
        r.graph_payload = Some(json!({"data": [1, 2, 3]}));

        let snap = r.snapshot();
        let q = snap["question"].as_str().unwrap();
        assert!(q.ends_with("...(truncated)"));
        assert_eq!(snap["query_result"][0]["rows"], json!(2));
        assert_eq!(snap["graph_payload"]["redacted"], json!(true));
    }

    #[test]
    fn test_record_serde_roundtrip_preserves_routing_inputs() {
        let mut r = StateRecord::new("q");
        r.advance(StepId::Execution);
        r.error = Some("syntax error".into());
        let json = serde_json::to_string(&r).unwrap();
        let back: StateRecord = serde_json::from_str(&json).unwrap();
        assert_eq!(back, r);
    }
}
