//! Remediation strategy engine.
//!
//! Maps severity, advisories and live compute-target state onto an ordered
//! chain of actions per matched service, executes each action and records
//! the outcome on the incident.

pub mod validate;

use std::sync::Arc;

use tracing::{info, warn};

use crate::compute::{ComputeTarget, ServiceInfo, ServiceStatus};
use crate::error::FailureKind;
use crate::history::Advisories;
use crate::incident::{ActionType, Incident, RemediationAction, Severity};

pub use self::validate::{ValidationReport, Validator};

/// Target name used when an incident names no service at all.
pub const UNKNOWN_TARGET: &str = "unknown";

/// Inputs a strategy row is evaluated against, for one matched service.
pub struct StrategyContext<'a> {
    pub severity: Severity,
    pub service: &'a ServiceInfo,
    pub escalate: bool,
}

/// One row of the strategy table.
pub struct StrategyRule {
    pub name: &'static str,
    pub applies: fn(&StrategyContext<'_>) -> bool,
    pub chain: &'static [ActionType],
    pub reasoning: &'static str,
}

/// Per-service strategy rows, first match wins. `Info` incidents never
/// reach this table: they get a single incident-level `noop`.
pub const STRATEGY_RULES: &[StrategyRule] = &[
    StrategyRule {
        name: "suspended",
        applies: |ctx| ctx.service.status == ServiceStatus::Suspended,
        chain: &[ActionType::Resume],
        reasoning: "Service is suspended; restore availability",
    },
    StrategyRule {
        name: "warning with precedent",
        applies: |ctx| ctx.severity == Severity::Warning && ctx.escalate,
        chain: &[ActionType::Restart, ActionType::Scale],
        reasoning: "History shows failed restarts or escalation; escalate preemptively based on precedent",
    },
    StrategyRule {
        name: "critical",
        applies: |ctx| ctx.severity == Severity::Critical,
        chain: &[ActionType::Restart, ActionType::Scale],
        reasoning: "Standard critical-incident protocol: restart then add capacity",
    },
    StrategyRule {
        name: "warning",
        applies: |ctx| ctx.severity == Severity::Warning,
        chain: &[ActionType::Restart],
        reasoning: "Standard first response",
    },
];

pub struct StrategyEngine {
    compute: Arc<dyn ComputeTarget>,
    scale_target: u32,
}

impl StrategyEngine {
    pub fn new(compute: Arc<dyn ComputeTarget>, scale_target: u32) -> Self {
        Self { compute, scale_target }
    }

    /// Choose and execute remediation for `incident`, appending every action
    /// to it. Returns the actions added by this call, in execution order.
    pub async fn remediate(&self, incident: &mut Incident, advisories: &Advisories) -> Vec<RemediationAction> {
        let start = incident.remediation_actions.len();
        let fallback_target = incident.primary_service().unwrap_or(UNKNOWN_TARGET).to_string();

        if incident.severity == Severity::Info {
            incident.remediation_actions.push(RemediationAction::new(
                ActionType::Noop,
                &fallback_target,
                format!("Monitor {}; no automated action", fallback_target),
                Some("Informational severity; monitoring only".to_string()),
                true,
            ));
            return incident.remediation_actions[start..].to_vec();
        }

        let live = match self.compute.list_services().await {
            Ok(services) => services,
            Err(e) => {
                warn!(incident_id = %incident.id, kind = %FailureKind::CollectorFailure, error = %e, "could not list compute services");
                Vec::new()
            }
        };
        let matched: Vec<ServiceInfo> = live
            .into_iter()
            .filter(|svc| incident.services.iter().any(|name| svc.matches(name)))
            .collect();

        if matched.is_empty() {
            info!(incident_id = %incident.id, target = %fallback_target, "no live service matched; alerting");
            incident.remediation_actions.push(RemediationAction::new(
                ActionType::Alert,
                &fallback_target,
                format!("Manual intervention required for {}", fallback_target),
                Some("No matching compute service can be remediated automatically".to_string()),
                true,
            ));
            return incident.remediation_actions[start..].to_vec();
        }

        let escalate = advisories.suggests_escalation();
        for service in &matched {
            let ctx = StrategyContext {
                severity: incident.severity,
                service,
                escalate,
            };
            let Some(rule) = STRATEGY_RULES.iter().find(|r| (r.applies)(&ctx)) else {
                continue;
            };
            info!(incident_id = %incident.id, service = %service.name, rule = rule.name, "strategy selected");
            for &action_type in rule.chain {
                let action = self.execute(action_type, service, rule.reasoning).await;
                incident.remediation_actions.push(action);
            }
        }

        incident.remediation_actions[start..].to_vec()
    }

    /// Run one action against the compute target. A failed call is recorded,
    /// never raised, and does not stop the rest of the chain.
    pub async fn execute(&self, action_type: ActionType, service: &ServiceInfo, reasoning: &str) -> RemediationAction {
        let (description, outcome) = match action_type {
            ActionType::Restart => (format!("Restart {}", service.name), Some(self.compute.restart(&service.id).await)),
            ActionType::Scale => (
                format!("Scale {} to {} instances", service.name, self.scale_target),
                Some(self.compute.scale(&service.id, self.scale_target).await),
            ),
            ActionType::Resume => (
                format!("Resume suspended service {}", service.name),
                Some(self.compute.resume(&service.id).await),
            ),
            ActionType::Alert => (format!("Manual intervention required for {}", service.name), None),
            ActionType::Noop => (format!("Monitor {}; no automated action", service.name), None),
        };

        let success = match outcome {
            None => true,
            Some(Ok(ok)) => ok,
            Some(Err(e)) => {
                warn!(service = %service.name, action = %action_type, error = %e, "compute call errored");
                false
            }
        };
        if !success {
            warn!(service = %service.name, action = %action_type, kind = %FailureKind::ActionExecutionFailure, "remediation action failed");
        } else {
            info!(service = %service.name, action = %action_type, "remediation action executed");
        }

        RemediationAction::new(action_type, &service.name, description, Some(reasoning.to_string()), success)
    }
}
