use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::state::{GraphType, StepId};

/// Unique run identifier. One run per user turn.
#[derive(Debug, Clone, Hash, Eq, PartialEq, Serialize, Deserialize)]
pub struct RunId(pub String);

impl RunId {
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn from_str(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl Default for RunId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for RunId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Role in a conversation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

/// A chat message sent to an LLM collaborator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<DateTime<Utc>>,
}

impl ChatMessage {
    pub fn system(text: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: text.into(),
            timestamp: Some(Utc::now()),
        }
    }

    pub fn user(text: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: text.into(),
            timestamp: Some(Utc::now()),
        }
    }
}

/// Stop reason from the LLM.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub enum StopReason {
    EndTurn,
    MaxTokens,
    StopSequence,
}

/// A streaming delta from the LLM.
#[derive(Debug, Clone)]
pub enum StreamDelta {
    /// A chunk of text content.
    TextDelta(String),

    /// The response is complete.
    Stop(StopReason),

    /// Usage information.
    Usage {
        input_tokens: u64,
        output_tokens: u64,
    },

    /// Message ID from the API.
    MessageId(String),
}

/// Scope classification returned by the classifier adapter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScopeVerdict {
    pub in_scope: bool,
    #[serde(default)]
    pub is_greeting: bool,
    #[serde(default)]
    pub reason: String,
}

/// Visualization choice returned by the classifier adapter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct VizChoice {
    pub needs_graph: bool,
    #[serde(default)]
    pub graph_type: GraphType,
}

/// Rows returned by the execution backend for one statement.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QueryRows {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<Value>>,
    /// Rows changed by a non-SELECT statement.
    #[serde(default)]
    pub affected: Option<usize>,
    /// Rows the statement produced, including any not kept in `rows`.
    #[serde(default)]
    pub total_rows: usize,
}

impl QueryRows {
    /// Index of the first row whose width disagrees with `columns`.
    pub fn ragged_row(&self) -> Option<usize> {
        self.rows.iter().position(|r| r.len() != self.columns.len())
    }
}

/// How a run ended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum RunOutcome {
    /// The question was answered from query results.
    Answered,
    /// Greeting or out-of-scope question, answered with a canned reply.
    Rejected,
    /// Retry ceiling reached; the answer explains the failure.
    Degraded,
    /// Internal error; no domain answer.
    Failed { error: String },
}

/// Step-lifecycle event streamed to observers.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RunEvent {
    /// A step is about to run.
    StepStarted {
        run_id: RunId,
        step: StepId,
        snapshot: Value,
    },
    /// A step reported progress while running.
    StepProgress {
        run_id: RunId,
        step: StepId,
        message: String,
    },
    /// A step's update has been merged.
    StepFinished {
        run_id: RunId,
        step: StepId,
        elapsed_ms: u64,
        snapshot: Value,
    },
    /// The run reached the terminal node or failed internally.
    RunTerminated {
        run_id: RunId,
        last_step: Option<StepId>,
        outcome: RunOutcome,
        snapshot: Value,
    },
}

impl RunEvent {
    pub fn run_id(&self) -> &RunId {
        match self {
            Self::StepStarted { run_id, .. }
            | Self::StepProgress { run_id, .. }
            | Self::StepFinished { run_id, .. }
            | Self::RunTerminated { run_id, .. } => run_id,
        }
    }

    pub fn step(&self) -> Option<StepId> {
        match self {
            Self::StepStarted { step, .. }
            | Self::StepProgress { step, .. }
            | Self::StepFinished { step, .. } => Some(*step),
            Self::RunTerminated { last_step, .. } => *last_step,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::StepStarted { .. } => "step_started",
            Self::StepProgress { .. } => "step_progress",
            Self::StepFinished { .. } => "step_finished",
            Self::RunTerminated { .. } => "run_terminated",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::RunTerminated { .. })
    }
}
