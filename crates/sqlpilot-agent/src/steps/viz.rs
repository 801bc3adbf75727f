use std::sync::Arc;

use futures::future::BoxFuture;
use tracing::warn;

use sqlpilot_core::error::Result;
use sqlpilot_core::state::{Assignment, Field, GraphType, StateRecord, StateUpdate, StepId};
use sqlpilot_core::traits::{ChartRenderer, QueryAssistant};

use crate::graph::{Step, StepOutput};

fn no_chart() -> StateUpdate {
    StateUpdate::new().needs_graph(false).graph_type(GraphType::None)
}

/// Decides whether a chart is worth drawing, and which kind.
pub struct VizDecision {
    assistant: Arc<dyn QueryAssistant>,
}

impl VizDecision {
    pub fn new(assistant: Arc<dyn QueryAssistant>) -> Self {
        Self { assistant }
    }
}

impl Step for VizDecision {
    fn id(&self) -> StepId {
        StepId::VizDecision
    }

    fn writes(&self) -> &'static [Field] {
        &[Field::NeedsGraph, Field::GraphType]
    }

    fn run<'a>(&'a self, state: &'a StateRecord) -> BoxFuture<'a, Result<StepOutput>> {
        Box::pin(async move {
            if state.query_result.is_empty() {
                return Ok(StepOutput::new(no_chart()).note("no rows to chart"));
            }

            let output = match self
                .assistant
                .decide_viz(&state.question, &state.query_result)
                .await
            {
                Ok(choice) if choice.needs_graph && choice.graph_type != GraphType::None => {
                    StepOutput::new(
                        StateUpdate::new()
                            .needs_graph(true)
                            .graph_type(choice.graph_type),
                    )
                    .note(format!("{} chart", choice.graph_type))
                }
                Ok(_) => StepOutput::new(no_chart()).note("no chart needed"),
                Err(e) => {
                    warn!(run_id = %state.run_id, error = %e, "Visualization decision failed");
                    StepOutput::new(no_chart()).note(format!("decision failed: {e}"))
                }
            };
            Ok(output)
        })
    }
}

/// Builds the chart payload for the chosen graph type.
pub struct VizGeneration {
    charts: Arc<dyn ChartRenderer>,
}

impl VizGeneration {
    pub fn new(charts: Arc<dyn ChartRenderer>) -> Self {
        Self { charts }
    }
}

impl Step for VizGeneration {
    fn id(&self) -> StepId {
        StepId::VizGeneration
    }

    fn writes(&self) -> &'static [Field] {
        &[Field::GraphPayload, Field::NeedsGraph]
    }

    fn run<'a>(&'a self, state: &'a StateRecord) -> BoxFuture<'a, Result<StepOutput>> {
        Box::pin(async move {
            if !state.needs_graph {
                return Ok(StepOutput::default().note("skipped: no chart requested"));
            }

            let output = match self
                .charts
                .render(&state.question, &state.query_result, state.graph_type)
                .await
            {
                Ok(payload) => StepOutput::new(
                    StateUpdate::new().graph_payload(payload).needs_graph(true),
                )
                .note(format!("{} chart ready", state.graph_type)),
                Err(e) => {
                    warn!(run_id = %state.run_id, error = %e, "Chart generation failed");
                    StepOutput::new(
                        StateUpdate::new()
                            .needs_graph(false)
                            .set(Assignment::GraphPayload(None)),
                    )
                    .note(format!("chart failed: {e}"))
                }
            };
            Ok(output)
        })
    }
}
