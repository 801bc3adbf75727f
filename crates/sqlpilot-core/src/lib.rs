pub mod config;
pub mod error;
pub mod event;
pub mod state;
pub mod traits;
pub mod types;

pub use config::AppConfig;
pub use error::{AdapterError, AdapterResult, ErrorKind, Result, SqlPilotError};
pub use event::EventBus;
pub use state::{Assignment, Field, GraphType, QueryResult, StateRecord, StateUpdate, StatementResult, StepId};
pub use types::*;
