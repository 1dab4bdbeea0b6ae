//! Cluster entity: a handle to one target cluster.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::shared_kernel::{ClusterId, DomainError, Result};

/// A registered target cluster.
///
/// The connection descriptor is opaque to the core; the kube driver
/// interprets it (kubeconfig context, in-cluster marker, ...).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Cluster {
    pub id: ClusterId,
    pub name: String,
    /// Opaque connection descriptor, interpreted by the driver
    pub connection: String,
    pub labels: BTreeMap<String, String>,
    /// GPU families available in this cluster, by SKU
    pub gpu_skus: Vec<String>,
    pub created_at: DateTime<Utc>,
}

impl Cluster {
    pub fn new(name: impl Into<String>, connection: impl Into<String>) -> Result<Self> {
        let name = name.into();
        if name.is_empty() {
            return Err(DomainError::InvalidInput {
                field: "cluster.name".to_string(),
                reason: "must not be empty".to_string(),
            });
        }
        Ok(Self {
            id: ClusterId::new(),
            name,
            connection: connection.into(),
            labels: BTreeMap::new(),
            gpu_skus: Vec::new(),
            created_at: Utc::now(),
        })
    }

    pub fn with_gpu_skus(mut self, skus: Vec<String>) -> Self {
        self.gpu_skus = skus;
        self
    }

    pub fn has_gpu_sku(&self, sku: &str) -> bool {
        self.gpu_skus.iter().any(|s| s == sku)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_name_rejected() {
        assert!(Cluster::new("", "kubeconfig:prod").is_err());
    }

    #[test]
    fn test_gpu_sku_lookup() {
        let cluster = Cluster::new("gpu-west", "kubeconfig:gpu-west")
            .unwrap()
            .with_gpu_skus(vec!["L4".to_string(), "A100".to_string()]);
        assert!(cluster.has_gpu_sku("L4"));
        assert!(!cluster.has_gpu_sku("H100"));
    }
}
