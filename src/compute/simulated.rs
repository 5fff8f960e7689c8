//! In-memory compute target with scripted outcomes, used for dry runs and tests.

use tokio::sync::Mutex;

use super::{ComputeTarget, ServiceInfo, ServiceStatus};
use crate::error::CollaboratorError;

/// Scripted outcome of each operation against one simulated service.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Behavior {
    pub restart_succeeds: bool,
    pub restart_heals: bool,
    pub scale_succeeds: bool,
    pub scale_heals: bool,
    pub resume_succeeds: bool,
    pub resume_heals: bool,
}

impl Default for Behavior {
    fn default() -> Self {
        Self {
            restart_succeeds: true,
            restart_heals: true,
            scale_succeeds: true,
            scale_heals: true,
            resume_succeeds: true,
            resume_heals: true,
        }
    }
}

impl Behavior {
    /// Every call is accepted but the service never recovers.
    pub fn stuck() -> Self {
        Self {
            restart_heals: false,
            scale_heals: false,
            resume_heals: false,
            ..Self::default()
        }
    }
}

#[derive(Debug)]
struct SimService {
    info: ServiceInfo,
    behavior: Behavior,
    instances: u32,
}

#[derive(Debug, Default)]
struct State {
    services: Vec<SimService>,
    calls: Vec<String>,
    unreachable: bool,
}

#[derive(Debug, Default)]
pub struct SimulatedTarget {
    state: Mutex<State>,
}

impl SimulatedTarget {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style: add a service with default behavior.
    pub fn with_service(self, name: &str, status: ServiceStatus) -> Self {
        self.with_scripted_service(name, status, Behavior::default())
    }

    /// Builder-style: add a service with scripted behavior.
    pub fn with_scripted_service(mut self, name: &str, status: ServiceStatus, behavior: Behavior) -> Self {
        {
            let state = self.state.get_mut();
            let id = format!("srv-{}", state.services.len() + 1);
            state.services.push(SimService {
                info: ServiceInfo {
                    id,
                    name: name.to_string(),
                    status,
                },
                behavior,
                instances: 1,
            });
        }
        self
    }

    /// Make every subsequent call fail as if the platform were down.
    pub async fn set_unreachable(&self, unreachable: bool) {
        self.state.lock().await.unreachable = unreachable;
    }

    /// Remove a service, as if it had been deleted on the platform.
    pub async fn remove_service(&self, name: &str) {
        self.state.lock().await.services.retain(|s| s.info.name != name);
    }

    /// Operations received so far, formatted as `op:id`.
    pub async fn calls(&self) -> Vec<String> {
        self.state.lock().await.calls.clone()
    }

    pub async fn instances(&self, name: &str) -> Option<u32> {
        let state = self.state.lock().await;
        state.services.iter().find(|s| s.info.name == name).map(|s| s.instances)
    }

    async fn mutate(
        &self,
        op: &str,
        id: &str,
        apply: impl FnOnce(&mut SimService) -> bool + Send,
    ) -> Result<bool, CollaboratorError> {
        let mut state = self.state.lock().await;
        if state.unreachable {
            return Err(CollaboratorError::Unavailable("simulated platform offline".into()));
        }
        state.calls.push(format!("{}:{}", op, id));
        match state.services.iter_mut().find(|s| s.info.id == id) {
            Some(service) => Ok(apply(service)),
            None => Ok(false),
        }
    }
}

#[async_trait::async_trait]
impl ComputeTarget for SimulatedTarget {
    async fn list_services(&self) -> Result<Vec<ServiceInfo>, CollaboratorError> {
        let state = self.state.lock().await;
        if state.unreachable {
            return Err(CollaboratorError::Unavailable("simulated platform offline".into()));
        }
        Ok(state.services.iter().map(|s| s.info.clone()).collect())
    }

    async fn get_status(&self, id: &str) -> Result<ServiceStatus, CollaboratorError> {
        let state = self.state.lock().await;
        if state.unreachable {
            return Err(CollaboratorError::Unavailable("simulated platform offline".into()));
        }
        state
            .services
            .iter()
            .find(|s| s.info.id == id)
            .map(|s| s.info.status.clone())
            .ok_or_else(|| CollaboratorError::NotFound(id.to_string()))
    }

    async fn restart(&self, id: &str) -> Result<bool, CollaboratorError> {
        self.mutate("restart", id, |s| {
            if s.behavior.restart_succeeds && s.behavior.restart_heals {
                s.info.status = ServiceStatus::Active;
            }
            s.behavior.restart_succeeds
        })
        .await
    }

    async fn scale(&self, id: &str, instances: u32) -> Result<bool, CollaboratorError> {
        self.mutate("scale", id, move |s| {
            if s.behavior.scale_succeeds {
                s.instances = instances;
                if s.behavior.scale_heals {
                    s.info.status = ServiceStatus::Active;
                }
            }
            s.behavior.scale_succeeds
        })
        .await
    }

    async fn resume(&self, id: &str) -> Result<bool, CollaboratorError> {
        self.mutate("resume", id, |s| {
            if s.behavior.resume_succeeds && s.behavior.resume_heals {
                s.info.status = ServiceStatus::Active;
            }
            s.behavior.resume_succeeds
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_restart_heals_by_default() {
        let target = SimulatedTarget::new().with_service("api", ServiceStatus::Failed);
        assert!(target.restart("srv-1").await.unwrap());
        assert_eq!(target.get_status("srv-1").await.unwrap(), ServiceStatus::Active);
        assert_eq!(target.calls().await, vec!["restart:srv-1"]);
    }

    #[tokio::test]
    async fn test_stuck_service_accepts_but_stays_down() {
        let target = SimulatedTarget::new().with_scripted_service("api", ServiceStatus::Failed, Behavior::stuck());
        assert!(target.scale("srv-1", 2).await.unwrap());
        assert_eq!(target.instances("api").await, Some(2));
        assert_eq!(target.get_status("srv-1").await.unwrap(), ServiceStatus::Failed);
    }

    #[tokio::test]
    async fn test_unreachable_platform_errors() {
        let target = SimulatedTarget::new().with_service("api", ServiceStatus::Active);
        target.set_unreachable(true).await;
        assert!(target.list_services().await.is_err());
        assert!(target.restart("srv-1").await.is_err());
    }

    #[tokio::test]
    async fn test_unknown_id() {
        let target = SimulatedTarget::new();
        assert!(!target.resume("srv-9").await.unwrap());
        assert!(matches!(target.get_status("srv-9").await, Err(CollaboratorError::NotFound(_))));
    }
}
