//! Workload entity: a logical unit of ML compute.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::shared_kernel::{DomainError, Result, WorkloadId};

/// Kind of ML workload
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkloadKind {
    Training,
    Inference,
    Batch,
}

/// GPU requirement of a workload
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GpuRequest {
    pub count: u32,
    /// GPU SKU, e.g. "L4" or "A100"
    pub sku: String,
}

/// Resource request of a single replica
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceRequest {
    /// CPU request in millicores (1000 = one core)
    pub cpu_millis: u64,
    /// Memory request in bytes
    pub memory_bytes: u64,
    /// Optional GPU requirement
    pub gpu: Option<GpuRequest>,
}

impl ResourceRequest {
    pub fn new(cpu_millis: u64, memory_bytes: u64) -> Self {
        Self {
            cpu_millis,
            memory_bytes,
            gpu: None,
        }
    }

    pub fn with_gpu(mut self, count: u32, sku: impl Into<String>) -> Self {
        self.gpu = Some(GpuRequest {
            count,
            sku: sku.into(),
        });
        self
    }

    pub fn cpu_cores(&self) -> f64 {
        self.cpu_millis as f64 / 1000.0
    }

    pub fn memory_gib(&self) -> f64 {
        self.memory_bytes as f64 / (1024.0 * 1024.0 * 1024.0)
    }

    pub fn gpu_count(&self) -> u32 {
        self.gpu.as_ref().map(|g| g.count).unwrap_or(0)
    }
}

/// A logical unit of compute. Immutable after creation except through an
/// explicit update decision.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Workload {
    pub id: WorkloadId,
    pub name: String,
    pub kind: WorkloadKind,
    /// Container image reference
    pub image: String,
    pub resources: ResourceRequest,
    /// Environment bindings injected into each replica
    pub env: BTreeMap<String, String>,
    /// Optional reference to an external configuration object
    pub config_ref: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Workload {
    pub fn new(
        name: impl Into<String>,
        kind: WorkloadKind,
        image: impl Into<String>,
        resources: ResourceRequest,
    ) -> Result<Self> {
        let name = name.into();
        let image = image.into();

        if name.len() < 3 || name.len() > 255 {
            return Err(DomainError::InvalidInput {
                field: "workload.name".to_string(),
                reason: format!("length must be in 3..=255, got {}", name.len()),
            });
        }
        if image.len() < 5 {
            return Err(DomainError::InvalidInput {
                field: "workload.image".to_string(),
                reason: "image reference too short".to_string(),
            });
        }

        let now = Utc::now();
        Ok(Self {
            id: WorkloadId::new(),
            name,
            kind,
            image,
            resources,
            env: BTreeMap::new(),
            config_ref: None,
            created_at: now,
            updated_at: now,
        })
    }

    pub fn with_env(mut self, env: BTreeMap<String, String>) -> Self {
        self.env = env;
        self
    }

    /// Apply a new image, bumping `updated_at`. Used by the update decision.
    pub fn set_image(&mut self, image: impl Into<String>) {
        self.image = image.into();
        self.updated_at = Utc::now();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn resources() -> ResourceRequest {
        ResourceRequest::new(2000, 8 * 1024 * 1024 * 1024)
    }

    #[test]
    fn test_new_workload_validates_name() {
        let err = Workload::new("ab", WorkloadKind::Training, "registry/img:1", resources());
        assert!(err.is_err());

        let ok = Workload::new("bert-finetune", WorkloadKind::Training, "registry/img:1", resources());
        assert!(ok.is_ok());
    }

    #[test]
    fn test_resource_conversions() {
        let r = resources().with_gpu(2, "L4");
        assert_eq!(r.cpu_cores(), 2.0);
        assert_eq!(r.memory_gib(), 8.0);
        assert_eq!(r.gpu_count(), 2);
        assert_eq!(ResourceRequest::new(500, 0).gpu_count(), 0);
    }

    #[test]
    fn test_set_image_bumps_updated_at() {
        let mut w =
            Workload::new("resnet-serving", WorkloadKind::Inference, "registry/img:1", resources())
                .unwrap();
        let before = w.updated_at;
        w.set_image("registry/img:2");
        assert_eq!(w.image, "registry/img:2");
        assert!(w.updated_at >= before);
    }
}
