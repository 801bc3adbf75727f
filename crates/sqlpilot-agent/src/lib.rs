pub mod chart;
pub mod graph;
pub mod pipeline;
pub mod run_log;
pub mod steps;

pub use chart::PlotlyChartRenderer;
pub use graph::{
    Condition, Edge, Executor, GraphDefinition, Next, Router, Step, StepOutput, DEFAULT_MAX_STEPS,
};
pub use pipeline::{Pipeline, RunHandle};
pub use run_log::RunLogger;
pub use steps::{text2sql_steps, Adapters};
