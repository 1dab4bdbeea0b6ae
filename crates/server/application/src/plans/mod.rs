//! Plan execution.

mod executor;

pub use executor::{ExecutorSettings, PlanExecutor};
