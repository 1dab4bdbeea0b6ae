//! Application layer of the Artzain workload controller.
//!
//! The four control subsystems (policy engine, canary controller,
//! rollback controller, plan executor) plus the service facade the
//! hosting request layer calls into. Everything talks to the cluster and
//! the outside world through the domain ports.

pub mod canary;
pub mod emitter;
pub mod plans;
pub mod policy;
pub mod rollback;
pub mod service;

pub use canary::CanaryController;
pub use emitter::EventEmitter;
pub use plans::{ExecutorSettings, PlanExecutor};
pub use policy::{
    NullObservationSource, ObservationSource, PolicyEngine, PolicyEngineConfig, RateLimiter,
};
pub use rollback::RollbackController;
pub use service::ControllerService;
