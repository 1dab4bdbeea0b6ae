//! Infrastructure layer of the Artzain workload controller.
//!
//! Implementations of the domain ports: the kube-backed cluster driver,
//! the NATS JetStream event bus (plus an in-memory bus for tests and
//! broker-less operation) and in-memory entity repositories.

pub mod kubernetes;
pub mod messaging;
pub mod persistence;
