//! Post-remediation validation and escalation.
//!
//! After a settle delay every target of a `restart`, `scale` or `resume`
//! action is re-checked. Unhealthy targets escalate one step:
//! `restart -> scale -> alert`, and `resume -> alert`.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use uuid::Uuid;

use super::StrategyEngine;
use crate::compute::{ComputeTarget, ServiceInfo};
use crate::error::FailureKind;
use crate::incident::{ActionType, Incident, RemediationAction};

/// What one validation pass observed and changed.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ValidationReport {
    /// The wait was cancelled and nothing was checked.
    pub skipped: bool,
    /// Targets whose health could be determined.
    pub checked: usize,
    pub healthy: usize,
    /// Targets that could not be validated.
    pub inconclusive: Vec<String>,
    /// `(action id, healthy)` for every action whose target was checked.
    pub validated: Vec<(Uuid, bool)>,
    /// Actions appended by this pass.
    pub escalations: Vec<RemediationAction>,
    pub resolved: bool,
}

/// The next step for a target found unhealthy after `last`.
fn escalation_for(last: ActionType) -> Option<(ActionType, &'static str)> {
    match last {
        ActionType::Restart => Some((ActionType::Scale, "Escalation after failed restart")),
        ActionType::Scale => Some((
            ActionType::Alert,
            "Escalation after failed scale; manual intervention",
        )),
        ActionType::Resume => Some((
            ActionType::Alert,
            "Escalation after failed resume; manual intervention",
        )),
        ActionType::Alert | ActionType::Noop => None,
    }
}

/// A remediated target and the indices of its validatable actions.
/// `last` is the target's most recent action of any type, so a chain that
/// already ended in an alert is not escalated again.
struct Target {
    name: String,
    last: ActionType,
    actions: Vec<usize>,
}

fn collect_targets(incident: &Incident) -> Vec<Target> {
    let mut targets: Vec<Target> = Vec::new();
    for (idx, action) in incident.remediation_actions.iter().enumerate() {
        let terminal = action.action_type.is_terminal();
        match targets.iter_mut().find(|t| t.name == action.target_service) {
            Some(t) => {
                t.last = action.action_type;
                if !terminal {
                    t.actions.push(idx);
                }
            }
            None => targets.push(Target {
                name: action.target_service.clone(),
                last: action.action_type,
                actions: if terminal { Vec::new() } else { vec![idx] },
            }),
        }
    }
    targets.retain(|t| !t.actions.is_empty());
    targets
}

pub struct Validator {
    compute: Arc<dyn ComputeTarget>,
    delay: Duration,
    cancel: CancellationToken,
}

impl Validator {
    pub fn new(compute: Arc<dyn ComputeTarget>, delay: Duration, cancel: CancellationToken) -> Self {
        Self { compute, delay, cancel }
    }

    /// Wait for the settle delay, or return `false` if cancelled first.
    async fn settle(&self) -> bool {
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => false,
            _ = tokio::time::sleep(self.delay) => true,
        }
    }

    /// Validate `incident` and append any escalations to it. Sets
    /// `resolved_at` when every checked target is healthy.
    pub async fn validate(&self, incident: &mut Incident, engine: &StrategyEngine) -> ValidationReport {
        let mut report = ValidationReport::default();

        if !self.settle().await {
            warn!(incident_id = %incident.id, "validation cancelled; incident left unresolved");
            report.skipped = true;
            return report;
        }

        let targets = collect_targets(incident);
        if targets.is_empty() {
            // Only terminal actions: an all-noop run is a monitoring-only
            // incident and counts as resolved, an alert leaves it open.
            let monitoring_only = !incident.remediation_actions.is_empty()
                && incident.remediation_actions.iter().all(|a| a.action_type == ActionType::Noop);
            if monitoring_only {
                incident.resolved_at = Some(Utc::now());
                report.resolved = true;
            }
            return report;
        }

        let live = match self.compute.list_services().await {
            Ok(live) => live,
            Err(e) => {
                warn!(incident_id = %incident.id, kind = %FailureKind::CollectorFailure, error = %e, "could not list services for validation");
                report.inconclusive = targets.into_iter().map(|t| t.name).collect();
                return report;
            }
        };

        for target in targets {
            let Some(service) = live.iter().find(|s| s.name == target.name) else {
                warn!(service = %target.name, kind = %FailureKind::ValidationInconclusive, "target no longer listed");
                report.inconclusive.push(target.name);
                continue;
            };

            let healthy = match self.compute.get_status(&service.id).await {
                Ok(status) => status.is_healthy(),
                Err(e) => {
                    warn!(service = %target.name, kind = %FailureKind::ValidationInconclusive, error = %e, "status check failed");
                    report.inconclusive.push(target.name);
                    continue;
                }
            };

            report.checked += 1;
            for &idx in &target.actions {
                let action = &mut incident.remediation_actions[idx];
                action.validated = Some(healthy);
                report.validated.push((action.id, healthy));
            }

            if healthy {
                report.healthy += 1;
                info!(incident_id = %incident.id, service = %target.name, "target validated healthy");
                continue;
            }

            if let Some(escalation) = self.escalate(engine, service, target.last).await {
                info!(
                    incident_id = %incident.id,
                    service = %target.name,
                    from = %target.last,
                    to = %escalation.action_type,
                    "escalating"
                );
                incident.remediation_actions.push(escalation.clone());
                report.escalations.push(escalation);
            }
        }

        if report.checked > 0 && report.healthy == report.checked {
            incident.resolved_at = Some(Utc::now());
            report.resolved = true;
        }
        report
    }

    async fn escalate(&self, engine: &StrategyEngine, service: &ServiceInfo, last: ActionType) -> Option<RemediationAction> {
        let (next, reasoning) = escalation_for(last)?;
        Some(engine.execute(next, service, reasoning).await)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compute::simulated::Behavior;
    use crate::compute::{ServiceStatus, SimulatedTarget};
    use crate::detect::{DetectionSignal, SignalSource};
    use crate::classify::Fuser;
    use crate::history::Advisories;
    use crate::incident::Severity;

    fn incident(severity: Severity, service: &str) -> Incident {
        let mut incident = Fuser::default()
            .fuse(vec![DetectionSignal::new(SignalSource::Manual, "Manual trigger", "n/a")])
            .unwrap();
        incident.severity = severity;
        incident.services = [service.to_string()].into_iter().collect();
        incident
    }

    fn setup(target: SimulatedTarget) -> (Arc<SimulatedTarget>, StrategyEngine, Validator) {
        let target = Arc::new(target);
        let engine = StrategyEngine::new(target.clone(), 2);
        let validator = Validator::new(target.clone(), Duration::ZERO, CancellationToken::new());
        (target, engine, validator)
    }

    fn types(incident: &Incident) -> Vec<ActionType> {
        incident.remediation_actions.iter().map(|a| a.action_type).collect()
    }

    #[test]
    fn test_escalation_never_returns_to_restart() {
        assert_eq!(escalation_for(ActionType::Restart).map(|e| e.0), Some(ActionType::Scale));
        assert_eq!(escalation_for(ActionType::Scale).map(|e| e.0), Some(ActionType::Alert));
        assert_eq!(escalation_for(ActionType::Resume).map(|e| e.0), Some(ActionType::Alert));
        assert_eq!(escalation_for(ActionType::Alert), None);
        assert_eq!(escalation_for(ActionType::Noop), None);
    }

    #[tokio::test]
    async fn test_healthy_target_resolves() {
        let (_target, engine, validator) = setup(SimulatedTarget::new().with_service("api", ServiceStatus::Failed));
        let mut inc = incident(Severity::Warning, "api");
        engine.remediate(&mut inc, &Advisories::default()).await;

        let report = validator.validate(&mut inc, &engine).await;
        assert!(report.resolved);
        assert!(inc.resolved_at.is_some());
        assert_eq!(inc.remediation_actions[0].validated, Some(true));
        assert!(report.escalations.is_empty());
    }

    #[tokio::test]
    async fn test_failed_restart_escalates_to_scale() {
        let (target, engine, validator) =
            setup(SimulatedTarget::new().with_scripted_service("api", ServiceStatus::Failed, Behavior::stuck()));
        let mut inc = incident(Severity::Warning, "api");
        engine.remediate(&mut inc, &Advisories::default()).await;

        let report = validator.validate(&mut inc, &engine).await;
        assert_eq!(types(&inc), vec![ActionType::Restart, ActionType::Scale]);
        assert_eq!(inc.remediation_actions[0].validated, Some(false));
        assert_eq!(
            inc.remediation_actions[1].reasoning.as_deref(),
            Some("Escalation after failed restart")
        );
        assert!(!report.resolved);
        assert!(inc.resolved_at.is_none());
        assert_eq!(target.instances("api").await, Some(2));
    }

    #[tokio::test]
    async fn test_failed_scale_escalates_to_terminal_alert() {
        let (_target, engine, validator) =
            setup(SimulatedTarget::new().with_scripted_service("api", ServiceStatus::Failed, Behavior::stuck()));
        let mut inc = incident(Severity::Critical, "api");
        engine.remediate(&mut inc, &Advisories::default()).await;

        validator.validate(&mut inc, &engine).await;
        assert_eq!(types(&inc), vec![ActionType::Restart, ActionType::Scale, ActionType::Alert]);
        assert!(inc.remediation_actions.last().unwrap().action_type.is_terminal());

        // A second pass has nothing left to escalate past the alert.
        let report = validator.validate(&mut inc, &engine).await;
        assert!(report.escalations.is_empty());
        assert_eq!(inc.remediation_actions.len(), 3);
    }

    #[tokio::test]
    async fn test_missing_target_is_inconclusive() {
        let (target, engine, validator) =
            setup(SimulatedTarget::new().with_scripted_service("api", ServiceStatus::Failed, Behavior::stuck()));
        let mut inc = incident(Severity::Warning, "api");
        engine.remediate(&mut inc, &Advisories::default()).await;
        target.remove_service("api").await;

        let report = validator.validate(&mut inc, &engine).await;
        assert_eq!(report.inconclusive, vec!["api".to_string()]);
        assert!(report.escalations.is_empty());
        assert_eq!(inc.remediation_actions[0].validated, None);
        assert!(!report.resolved);
    }

    #[tokio::test]
    async fn test_noop_only_resolves_alert_only_does_not() {
        let (_target, engine, validator) = setup(SimulatedTarget::new());
        let mut info = incident(Severity::Info, "api");
        engine.remediate(&mut info, &Advisories::default()).await;
        assert!(validator.validate(&mut info, &engine).await.resolved);

        let mut unmatched = incident(Severity::Warning, "api");
        engine.remediate(&mut unmatched, &Advisories::default()).await;
        assert_eq!(types(&unmatched), vec![ActionType::Alert]);
        assert!(!validator.validate(&mut unmatched, &engine).await.resolved);
    }

    #[tokio::test]
    async fn test_cancellation_skips_validation() {
        let target = Arc::new(SimulatedTarget::new().with_service("api", ServiceStatus::Failed));
        let engine = StrategyEngine::new(target.clone(), 2);
        let cancel = CancellationToken::new();
        let validator = Validator::new(target.clone(), Duration::from_secs(3600), cancel.clone());
        let mut inc = incident(Severity::Warning, "api");
        engine.remediate(&mut inc, &Advisories::default()).await;

        cancel.cancel();
        let report = validator.validate(&mut inc, &engine).await;
        assert!(report.skipped);
        assert!(inc.resolved_at.is_none());
        assert_eq!(inc.remediation_actions[0].validated, None);
    }
}
