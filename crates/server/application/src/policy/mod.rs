//! Policy engine and its collaborators.

mod engine;
mod observations;
mod rate_limiter;

pub use engine::{PolicyEngine, PolicyEngineConfig};
pub use observations::{NullObservationSource, ObservationSource, Observations};
pub use rate_limiter::RateLimiter;
