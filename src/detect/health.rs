//! Health-check source: reports every non-active compute-target service.

use std::sync::Arc;

use tracing::debug;

use super::{DetectionSignal, DetectionSource, SignalSource};
use crate::compute::ComputeTarget;
use crate::error::CollaboratorError;

pub struct HealthCheckSource {
    target: Arc<dyn ComputeTarget>,
}

impl HealthCheckSource {
    pub fn new(target: Arc<dyn ComputeTarget>) -> Self {
        Self { target }
    }
}

#[async_trait::async_trait]
impl DetectionSource for HealthCheckSource {
    fn name(&self) -> &str {
        "health"
    }

    async fn detect(&self) -> Result<Vec<DetectionSignal>, CollaboratorError> {
        let services = self.target.list_services().await?;
        debug!(count = services.len(), "health check listed services");

        Ok(services
            .into_iter()
            .filter(|s| !s.status.is_healthy())
            .map(|s| {
                DetectionSignal::new(
                    SignalSource::Health,
                    format!("Service unhealthy: {}", s.name),
                    format!("{} is {}", s.name, s.status),
                )
                .with_raw(serde_json::json!({
                    "service": s.name,
                    "service_id": s.id,
                    "status": s.status.to_string(),
                }))
            })
            .collect())
    }
}
