//! The compute platform being remediated.

pub mod render;
pub mod simulated;

use serde::{Deserialize, Serialize};

use crate::error::CollaboratorError;

pub use self::render::RenderTarget;
pub use self::simulated::SimulatedTarget;

/// Live status of a compute-target service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ServiceStatus {
    Active,
    Suspended,
    Failed,
    Unknown,
}

impl ServiceStatus {
    pub fn is_healthy(&self) -> bool {
        matches!(self, ServiceStatus::Active)
    }
}

impl std::fmt::Display for ServiceStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ServiceStatus::Active => write!(f, "active"),
            ServiceStatus::Suspended => write!(f, "suspended"),
            ServiceStatus::Failed => write!(f, "failed"),
            ServiceStatus::Unknown => write!(f, "unknown"),
        }
    }
}

/// A service as listed by the compute target.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceInfo {
    pub id: String,
    pub name: String,
    pub status: ServiceStatus,
}

impl ServiceInfo {
    /// Case-insensitive substring match in either direction.
    pub fn matches(&self, service: &str) -> bool {
        let name = self.name.to_lowercase();
        let service = service.to_lowercase();
        if name.is_empty() || service.is_empty() {
            return false;
        }
        name.contains(&service) || service.contains(&name)
    }
}

/// Trait for compute platforms that can be inspected and remediated.
///
/// Mutating calls report `Ok(false)` for a refused/failed operation; `Err`
/// is reserved for the platform being unreachable.
#[async_trait::async_trait]
pub trait ComputeTarget: Send + Sync {
    async fn list_services(&self) -> Result<Vec<ServiceInfo>, CollaboratorError>;

    async fn get_status(&self, id: &str) -> Result<ServiceStatus, CollaboratorError>;

    async fn restart(&self, id: &str) -> Result<bool, CollaboratorError>;

    async fn scale(&self, id: &str, instances: u32) -> Result<bool, CollaboratorError>;

    async fn resume(&self, id: &str) -> Result<bool, CollaboratorError>;
}
