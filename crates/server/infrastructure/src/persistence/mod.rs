//! Repository implementations.
//!
//! The persistent store is an external collaborator; the core ships
//! in-memory repositories for broker-less operation and tests.

mod memory;

pub use memory::{
    InMemoryClusterRepository, InMemoryDeploymentRepository, InMemoryPlanRepository,
    InMemoryPolicyRepository, InMemoryWorkloadRepository,
};
