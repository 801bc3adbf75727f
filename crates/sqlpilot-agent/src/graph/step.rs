use futures::future::BoxFuture;

use sqlpilot_core::error::Result;
use sqlpilot_core::state::{Field, StateRecord, StateUpdate, StepId};

/// What a step hands back to the executor.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StepOutput {
    pub update: StateUpdate,
    /// Progress notes, emitted as `StepProgress` events in order.
    pub notes: Vec<String>,
}

impl StepOutput {
    pub fn new(update: StateUpdate) -> Self {
        Self {
            update,
            notes: Vec::new(),
        }
    }

    pub fn note(mut self, note: impl Into<String>) -> Self {
        self.notes.push(note.into());
        self
    }
}

/// A unit of work in the workflow graph.
///
/// Steps read the record, call at most one collaborator and describe their
/// effect as a [`StateUpdate`]. Domain failures end up in record fields;
/// an `Err` is reserved for contract violations.
pub trait Step: Send + Sync {
    fn id(&self) -> StepId;

    /// Fields this step may assign. Anything else is rejected on merge.
    fn writes(&self) -> &'static [Field];

    fn run<'a>(&'a self, state: &'a StateRecord) -> BoxFuture<'a, Result<StepOutput>>;
}
