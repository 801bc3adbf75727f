use std::sync::Arc;

use futures::future::BoxFuture;
use tracing::warn;

use sqlpilot_core::config::RepliesConfig;
use sqlpilot_core::error::Result;
use sqlpilot_core::state::{Field, StateRecord, StateUpdate, StepId};
use sqlpilot_core::traits::QueryAssistant;

use crate::graph::{Step, StepOutput};

/// Classifies the question as in scope, out of scope or a greeting.
///
/// Fails closed: an unusable classifier answer counts as out of scope.
pub struct ScopeCheck {
    assistant: Arc<dyn QueryAssistant>,
    replies: RepliesConfig,
}

impl ScopeCheck {
    pub fn new(assistant: Arc<dyn QueryAssistant>, replies: RepliesConfig) -> Self {
        Self { assistant, replies }
    }

    fn rejected(&self) -> StateUpdate {
        StateUpdate::new()
            .in_scope(false)
            .is_greeting(false)
            .final_answer(self.replies.out_of_scope.clone())
    }
}

impl Step for ScopeCheck {
    fn id(&self) -> StepId {
        StepId::ScopeCheck
    }

    fn writes(&self) -> &'static [Field] {
        &[Field::InScope, Field::IsGreeting, Field::FinalAnswer]
    }

    fn run<'a>(&'a self, state: &'a StateRecord) -> BoxFuture<'a, Result<StepOutput>> {
        Box::pin(async move {
            if state.question.trim().is_empty() {
                return Ok(StepOutput::new(self.rejected()).note("empty question"));
            }

            let output = match self.assistant.classify(&state.question).await {
                Ok(verdict) if verdict.is_greeting => StepOutput::new(
                    StateUpdate::new()
                        .in_scope(verdict.in_scope)
                        .is_greeting(true)
                        .final_answer(self.replies.greeting.clone()),
                )
                .note("greeting"),
                Ok(verdict) if verdict.in_scope => StepOutput::new(
                    StateUpdate::new().in_scope(true).is_greeting(false),
                )
                .note("in scope"),
                Ok(verdict) => {
                    let note = if verdict.reason.is_empty() {
                        "out of scope".to_string()
                    } else {
                        format!("out of scope: {}", verdict.reason)
                    };
                    StepOutput::new(self.rejected()).note(note)
                }
                Err(e) => {
                    warn!(run_id = %state.run_id, error = %e, "Classifier failed, treating as out of scope");
                    StepOutput::new(self.rejected()).note(format!("classifier unavailable: {e}"))
                }
            };
            Ok(output)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sqlpilot_core::error::AdapterError;
    use sqlpilot_test_utils::ScriptedAssistant;

    fn step(assistant: &ScriptedAssistant) -> ScopeCheck {
        ScopeCheck::new(Arc::new(assistant.clone()), RepliesConfig::default())
    }

    fn apply(step: &ScopeCheck, record: &mut StateRecord, output: StepOutput) {
        record.apply(step.writes(), output.update).unwrap();
    }

    #[tokio::test]
    async fn test_greeting_writes_canned_reply() {
        let assistant = ScriptedAssistant::new().greeting();
        let s = step(&assistant);
        let mut r = StateRecord::new("Hello!");
        let out = s.run(&r).await.unwrap();
        apply(&s, &mut r, out);
        assert!(r.is_greeting);
        assert_eq!(r.final_answer, Some(RepliesConfig::default().greeting));
    }

    #[tokio::test]
    async fn test_in_scope_leaves_answer_unset() {
        let assistant = ScriptedAssistant::new().in_scope();
        let s = step(&assistant);
        let mut r = StateRecord::new("How many orders were delivered?");
        let out = s.run(&r).await.unwrap();
        apply(&s, &mut r, out);
        assert_eq!(r.in_scope, Some(true));
        assert!(!r.has_answer());
    }

    #[tokio::test]
    async fn test_classifier_failure_fails_closed() {
        let assistant = ScriptedAssistant::new()
            .classify(Err(AdapterError::malformed("not json")))
            .classify(Err(AdapterError::failed("timeout")));
        let s = step(&assistant);
        for _ in 0..2 {
            let mut r = StateRecord::new("Top categories?");
            let out = s.run(&r).await.unwrap();
            assert!(out.notes[0].starts_with("classifier unavailable"));
            apply(&s, &mut r, out);
            assert_eq!(r.in_scope, Some(false));
            assert_eq!(r.final_answer, Some(RepliesConfig::default().out_of_scope));
        }
    }

    #[tokio::test]
    async fn test_empty_question_skips_classifier() {
        let assistant = ScriptedAssistant::new();
        let s = step(&assistant);
        let mut r = StateRecord::new("   ");
        let out = s.run(&r).await.unwrap();
        apply(&s, &mut r, out);
        assert_eq!(r.in_scope, Some(false));
        assert!(assistant.calls().is_empty());
    }
}
