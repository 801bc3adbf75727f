use std::fmt;

use serde::{Deserialize, Serialize};

use sqlpilot_core::error::{Result, SqlPilotError};
use sqlpilot_core::state::{StateRecord, StepId};

/// Where the run goes after the current step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Next {
    Step(StepId),
    Terminal,
}

impl fmt::Display for Next {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Step(id) => write!(f, "{id}"),
            Self::Terminal => f.write_str("terminal"),
        }
    }
}

/// Predicate over the record guarding an edge.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Condition {
    #[default]
    Always,
    /// Greeting, or not confirmed in scope.
    Rejected,
    HasError,
    NoError,
    HasAnswer,
    NeedsGraph,
}

impl Condition {
    pub fn matches(&self, state: &StateRecord) -> bool {
        match self {
            Self::Always => true,
            Self::Rejected => state.is_greeting || state.in_scope != Some(true),
            Self::HasError => state.has_error(),
            Self::NoError => !state.has_error(),
            Self::HasAnswer => state.has_answer(),
            Self::NeedsGraph => state.needs_graph,
        }
    }

    fn label(&self) -> Option<&'static str> {
        match self {
            Self::Always => None,
            Self::Rejected => Some("greeting or out of scope"),
            Self::HasError => Some("error"),
            Self::NoError => Some("no error"),
            Self::HasAnswer => Some("gave up"),
            Self::NeedsGraph => Some("needs graph"),
        }
    }
}

/// A routing edge. `from = None` is the start of a run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Edge {
    pub from: Option<StepId>,
    #[serde(default)]
    pub condition: Condition,
    pub to: Next,
}

impl Edge {
    /// Create an unconditional edge.
    pub fn always(from: Option<StepId>, to: Next) -> Self {
        Self {
            from,
            condition: Condition::Always,
            to,
        }
    }

    /// Create a conditional edge.
    pub fn when(from: Option<StepId>, condition: Condition, to: Next) -> Self {
        Self {
            from,
            condition,
            to,
        }
    }
}

/// Ordered routing table; the first edge whose source and condition match wins.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Router {
    edges: Vec<Edge>,
}

impl Router {
    pub fn new(edges: Vec<Edge>) -> Self {
        Self { edges }
    }

    /// The text-to-SQL workflow.
    pub fn text2sql() -> Self {
        use Condition::*;
        use Next::{Step, Terminal};
        use StepId::*;

        Self::new(vec![
            Edge::always(None, Step(ScopeCheck)),
            Edge::when(Some(ScopeCheck), Rejected, Terminal),
            Edge::always(Some(ScopeCheck), Step(QueryGeneration)),
            Edge::always(Some(QueryGeneration), Step(Execution)),
            Edge::when(Some(Execution), NoError, Step(Explanation)),
            Edge::when(Some(Execution), HasError, Step(Correction)),
            Edge::when(Some(Correction), HasAnswer, Terminal),
            Edge::always(Some(Correction), Step(Execution)),
            Edge::always(Some(Explanation), Step(VizDecision)),
            Edge::when(Some(VizDecision), NeedsGraph, Step(VizGeneration)),
            Edge::always(Some(VizDecision), Terminal),
            Edge::always(Some(VizGeneration), Terminal),
        ])
    }

    pub fn edges(&self) -> &[Edge] {
        &self.edges
    }

    /// Decide the next hop from the record alone.
    pub fn next(&self, state: &StateRecord) -> Result<Next> {
        self.edges
            .iter()
            .filter(|e| e.from == state.last_step)
            .find(|e| e.condition.matches(state))
            .map(|e| e.to)
            .ok_or_else(|| {
                SqlPilotError::Misconfigured(match state.last_step {
                    Some(step) => format!("no edge matches after step '{step}'"),
                    None => "no entry edge".to_string(),
                })
            })
    }

    /// Render as a Mermaid flowchart.
    pub fn to_mermaid(&self) -> String {
        let mut out = String::from("flowchart TD\n");
        for edge in &self.edges {
            let from = match edge.from {
                Some(step) => step.as_str().to_string(),
                None => "START([start])".to_string(),
            };
            let to = match edge.to {
                Next::Step(step) => step.as_str().to_string(),
                Next::Terminal => "END([end])".to_string(),
            };
            match edge.condition.label() {
                Some(label) => out.push_str(&format!("    {from} -->|{label}| {to}\n")),
                None => out.push_str(&format!("    {from} --> {to}\n")),
            }
        }
        out
    }
}

impl Default for Router {
    fn default() -> Self {
        Self::text2sql()
    }
}
