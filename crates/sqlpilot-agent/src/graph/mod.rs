//! Workflow graph: steps, routing table, definition and executor.
//!
//! A run starts from the router's entry edge and loops
//! `record -> router -> step -> merged record` until the router answers
//! [`Next::Terminal`]. Routing is data (an ordered edge list) and depends on
//! the record alone, including its `last_step` bookkeeping field.

pub mod definition;
pub mod executor;
pub mod router;
pub mod step;

pub use definition::GraphDefinition;
pub use executor::{Executor, DEFAULT_MAX_STEPS};
pub use router::{Condition, Edge, Next, Router};
pub use step::{Step, StepOutput};
