//! Rollback monitoring.

mod controller;

pub use controller::RollbackController;
