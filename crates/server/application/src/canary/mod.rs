//! Canary rollout controller.

mod controller;

pub use controller::CanaryController;
