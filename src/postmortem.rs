//! Post-mortem synthesis and publication.
//!
//! Publishing to the incident store and memory search is what lets the
//! history advisor learn from this incident on the next run.

use std::collections::BTreeSet;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{info, warn};

use crate::error::FailureKind;
use crate::incident::{Incident, PostMortem, RemediationAction, Severity};
use crate::storage::{IncidentStore, MemoryDocument, MemorySearch};

const UNDER_INVESTIGATION: &str = "Under investigation";

fn ts(at: &DateTime<Utc>) -> String {
    at.format("%Y-%m-%d %H:%M:%S UTC").to_string()
}

fn join_or(items: &BTreeSet<String>, fallback: &str) -> String {
    if items.is_empty() {
        fallback.to_string()
    } else {
        items.iter().cloned().collect::<Vec<_>>().join(", ")
    }
}

fn outcome(action: &RemediationAction) -> String {
    let mut s = if action.success { "succeeded" } else { "failed" }.to_string();
    match action.validated {
        Some(true) => s.push_str(", validated healthy"),
        Some(false) => s.push_str(", validated unhealthy"),
        None => {}
    }
    s
}

fn timeline(incident: &Incident) -> Vec<String> {
    let mut lines = vec![format!(
        "{} Incident detected: {} (severity {})",
        ts(&incident.detected_at),
        incident.title,
        incident.severity
    )];
    for signal in &incident.signals {
        let source = serde_json::to_value(signal.source)
            .ok()
            .and_then(|v| v.as_str().map(str::to_string))
            .unwrap_or_else(|| "other".to_string());
        lines.push(format!("{} Signal [{}] {}", ts(&signal.timestamp), source, signal.title));
    }
    for action in &incident.remediation_actions {
        lines.push(format!(
            "{} {} {}: {} ({})",
            ts(&action.executed_at),
            action.action_type,
            action.target_service,
            action.description,
            outcome(action)
        ));
    }
    match &incident.resolved_at {
        Some(at) => lines.push(format!("{} Incident resolved", ts(at))),
        None => lines.push("Incident remained open at end of run".to_string()),
    }
    lines
}

fn impact(incident: &Incident) -> String {
    format!(
        "Severity: {}. Affected services: {}. Error codes: {}.",
        incident.severity,
        join_or(&incident.services, "none identified"),
        join_or(&incident.errors, "none observed")
    )
}

fn remediation(incident: &Incident) -> String {
    if incident.remediation_actions.is_empty() {
        return "No remediation actions were taken.".to_string();
    }
    incident
        .remediation_actions
        .iter()
        .map(|a| format!("- {} {}: {} ({})", a.action_type, a.target_service, a.description, outcome(a)))
        .collect::<Vec<_>>()
        .join("\n")
}

fn lessons(incident: &Incident) -> Vec<String> {
    let services = join_or(&incident.services, "affected services");
    let mut lessons = Vec::new();

    if let Some(cause) = &incident.root_cause {
        lessons.push(format!("Add monitoring for {} on {}", cause, services));
    }
    let failed = incident
        .remediation_actions
        .iter()
        .filter(|a| !a.success || a.validated == Some(false))
        .count();
    if failed > 0 {
        lessons.push(format!(
            "Review recovery procedures: {} remediation action(s) did not restore health",
            failed
        ));
    }
    if incident.severity == Severity::Critical {
        lessons.push(format!("Consider redundancy for {} to reduce blast radius", services));
    }
    if lessons.is_empty() {
        lessons.push("Continue routine monitoring; no specific follow-up identified".to_string());
    }
    lessons
}

/// Build the post-mortem for a finished incident.
///
/// Every narrative section is a pure function of `incident`; only
/// `generated_at` differs between calls.
pub fn synthesize(incident: &Incident) -> PostMortem {
    PostMortem {
        incident_id: incident.id,
        title: format!("Post-mortem: {}", incident.title),
        timeline: timeline(incident),
        root_cause: incident
            .root_cause
            .clone()
            .unwrap_or_else(|| UNDER_INVESTIGATION.to_string()),
        impact: impact(incident),
        remediation: remediation(incident),
        lessons_learned: lessons(incident),
        generated_at: Utc::now(),
    }
}

/// Writes post-mortems to the store and memory search.
pub struct PostMortemPublisher {
    store: Arc<dyn IncidentStore>,
    memory: Arc<dyn MemorySearch>,
}

impl PostMortemPublisher {
    pub fn new(store: Arc<dyn IncidentStore>, memory: Arc<dyn MemorySearch>) -> Self {
        Self { store, memory }
    }

    /// Synthesize, attach to `incident` and publish. Publication failures
    /// are logged; the post-mortem is still attached and returned.
    pub async fn publish(&self, incident: &mut Incident) -> PostMortem {
        let pm = synthesize(incident);

        if let Err(e) = self.store.add_post_mortem(&pm).await {
            warn!(incident_id = %incident.id, kind = %FailureKind::CollectorFailure, error = %e, "failed to store post-mortem");
        }
        let document = MemoryDocument {
            title: pm.title.clone(),
            content: pm.to_markdown(),
        };
        match self.memory.store(&document).await {
            Ok(doc_id) => info!(incident_id = %incident.id, %doc_id, "post-mortem published to memory"),
            Err(e) => {
                warn!(incident_id = %incident.id, kind = %FailureKind::CollectorFailure, error = %e, "failed to publish post-mortem to memory")
            }
        }

        incident.post_mortem = Some(pm.clone());
        pm
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classify::Fuser;
    use crate::detect::{DetectionSignal, SignalSource};
    use crate::incident::ActionType;

    fn finished_incident() -> Incident {
        let mut incident = Fuser::default()
            .fuse(vec![DetectionSignal::new(
                SignalSource::Health,
                "Service unhealthy: api",
                "api returned 503, OOM killed",
            )
            .with_raw(serde_json::json!({ "service": "api" }))])
            .unwrap();
        let mut restart = RemediationAction::new(ActionType::Restart, "api", "Restart api", None, true);
        restart.validated = Some(false);
        incident.remediation_actions.push(restart);
        incident.remediation_actions.push(RemediationAction::new(
            ActionType::Scale,
            "api",
            "Scale api to 2 instances",
            Some("Escalation after failed restart".into()),
            false,
        ));
        incident
    }

    #[test]
    fn test_sections() {
        let incident = finished_incident();
        let pm = synthesize(&incident);

        assert_eq!(pm.title, "Post-mortem: Service unhealthy: api");
        assert_eq!(pm.root_cause, "server-side error");
        assert_eq!(pm.timeline.len(), 1 + 1 + 2 + 1);
        assert!(pm.timeline[0].contains("Incident detected"));
        assert!(pm.timeline[1].contains("Signal [health] Service unhealthy: api"));
        assert!(pm.timeline[2].contains("restart api: Restart api (succeeded, validated unhealthy)"));
        assert_eq!(pm.timeline[4], "Incident remained open at end of run");
        assert_eq!(
            pm.impact,
            "Severity: critical. Affected services: api. Error codes: 503, out of memory."
        );
        assert_eq!(pm.remediation.lines().count(), 2);
        assert!(pm.lessons_learned[0].starts_with("Add monitoring for server-side error"));
        assert!(pm.lessons_learned[1].contains("2 remediation action(s)"));
        assert!(pm.lessons_learned[2].starts_with("Consider redundancy"));
    }

    #[test]
    fn test_generic_lesson_and_unset_root_cause() {
        let incident = Fuser::default()
            .fuse(vec![DetectionSignal::new(SignalSource::Search, "Scheduled maintenance", "tonight")])
            .unwrap();
        let pm = synthesize(&incident);
        assert_eq!(pm.root_cause, "Under investigation");
        assert_eq!(pm.remediation, "No remediation actions were taken.");
        assert_eq!(pm.lessons_learned.len(), 1);
        assert!(pm.lessons_learned[0].starts_with("Continue routine monitoring"));
    }

    #[test]
    fn test_synthesis_is_idempotent() {
        let incident = finished_incident();
        let a = synthesize(&incident);
        let b = synthesize(&incident);
        assert_eq!(a.to_markdown(), b.to_markdown());
        assert_eq!(a.timeline, b.timeline);
        assert_eq!(a.lessons_learned, b.lessons_learned);
    }

    #[test]
    fn test_resolution_line() {
        let mut incident = finished_incident();
        incident.resolved_at = Some(incident.detected_at);
        let pm = synthesize(&incident);
        assert!(pm.timeline.last().unwrap().ends_with("Incident resolved"));
    }
}
