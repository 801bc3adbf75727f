//! The seven steps of the text-to-SQL workflow.

pub mod explain;
pub mod scope;
pub mod sql;
pub mod viz;

use std::sync::Arc;

use sqlpilot_core::config::{RepliesConfig, WorkflowConfig};
use sqlpilot_core::traits::{ChartRenderer, QueryAssistant, SqlBackend};

pub use explain::Explanation;
pub use scope::ScopeCheck;
pub use sql::{give_up_answer, Correction, Execution, QueryGeneration, IMPOSSIBLE_MARKER};
pub use viz::{VizDecision, VizGeneration};

use crate::graph::Step;

/// Collaborators the steps call out to.
#[derive(Clone)]
pub struct Adapters {
    pub assistant: Arc<dyn QueryAssistant>,
    pub backend: Arc<dyn SqlBackend>,
    pub charts: Arc<dyn ChartRenderer>,
}

/// Instantiate every step with its collaborators and limits.
pub fn text2sql_steps(
    adapters: &Adapters,
    workflow: &WorkflowConfig,
    replies: &RepliesConfig,
    schema: &str,
) -> Vec<Arc<dyn Step>> {
    let schema: Arc<str> = Arc::from(schema);
    vec![
        Arc::new(ScopeCheck::new(adapters.assistant.clone(), replies.clone())),
        Arc::new(QueryGeneration::new(adapters.assistant.clone(), schema.clone())),
        Arc::new(Execution::new(adapters.backend.clone(), workflow.row_cap)),
        Arc::new(Correction::new(
            adapters.assistant.clone(),
            schema,
            workflow.retry_ceiling,
        )),
        Arc::new(Explanation::new(adapters.assistant.clone())),
        Arc::new(VizDecision::new(adapters.assistant.clone())),
        Arc::new(VizGeneration::new(adapters.charts.clone())),
    ]
}
