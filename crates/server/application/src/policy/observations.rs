//! Observation lookups consulted by SLA/SLO rules.
//!
//! The metrics store is an external collaborator; the engine only needs
//! three point lookups. Absent data means "no opinion": a rule never
//! fires on a missing observation.

use async_trait::async_trait;

use artzain_server_domain::plans::DecisionTarget;

/// Point-in-time service-level observations for a decision target.
#[derive(Debug, Clone, Copy, Default)]
pub struct Observations {
    /// Observed uptime over the last 7 days, as a fraction
    pub uptime_7d: Option<f64>,
    /// Current p95 latency in milliseconds
    pub latency_p95_ms: Option<f64>,
    /// Current success rate, as a fraction
    pub success_rate: Option<f64>,
}

/// Port to the external metrics store.
#[async_trait]
pub trait ObservationSource: Send + Sync {
    async fn observe(&self, target: &DecisionTarget) -> Observations;
}

/// Source with no data; every lookup returns no opinion.
#[derive(Debug, Default)]
pub struct NullObservationSource;

#[async_trait]
impl ObservationSource for NullObservationSource {
    async fn observe(&self, _target: &DecisionTarget) -> Observations {
        Observations::default()
    }
}
