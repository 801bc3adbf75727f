use std::sync::Arc;

use futures::future::BoxFuture;
use tracing::warn;

use sqlpilot_core::error::Result;
use sqlpilot_core::state::{Field, StateRecord, StateUpdate, StepId};
use sqlpilot_core::traits::QueryAssistant;

use crate::graph::{Step, StepOutput};

/// Rows shown in the fallback answer when the explainer is unavailable.
const FALLBACK_TABLE_ROWS: usize = 20;

/// Turns the query result into the natural-language answer.
pub struct Explanation {
    assistant: Arc<dyn QueryAssistant>,
}

impl Explanation {
    pub fn new(assistant: Arc<dyn QueryAssistant>) -> Self {
        Self { assistant }
    }
}

fn fallback_answer(state: &StateRecord) -> String {
    format!(
        "I could not summarize the result, here is what the query returned:\n\n{}",
        state.query_result.render(FALLBACK_TABLE_ROWS)
    )
}

impl Step for Explanation {
    fn id(&self) -> StepId {
        StepId::Explanation
    }

    fn writes(&self) -> &'static [Field] {
        &[Field::FinalAnswer]
    }

    fn run<'a>(&'a self, state: &'a StateRecord) -> BoxFuture<'a, Result<StepOutput>> {
        Box::pin(async move {
            if state.has_error() {
                return Ok(StepOutput::default().note("skipped: execution error pending"));
            }

            let output = match self
                .assistant
                .explain(&state.question, &state.query_result)
                .await
            {
                Ok(text) if !text.trim().is_empty() => {
                    StepOutput::new(StateUpdate::new().final_answer(text))
                }
                Ok(_) => StepOutput::new(StateUpdate::new().final_answer(fallback_answer(state)))
                    .note("explainer returned nothing, showing raw result"),
                Err(e) => {
                    warn!(run_id = %state.run_id, error = %e, "Explanation failed");
                    StepOutput::new(StateUpdate::new().final_answer(fallback_answer(state)))
                        .note(format!("explainer failed ({e}), showing raw result"))
                }
            };
            Ok(output)
        })
    }
}
