//! History advisor: distills prior incidents and memory documents into a
//! few advisory facts for the strategy engine.

use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, warn};

use crate::error::FailureKind;
use crate::incident::{ActionType, Incident, PastRemediation};
use crate::storage::{IncidentStore, MemoryHit, MemorySearch};

/// Phrases in historical documents that argue for escalating early.
pub const ESCALATION_PHRASES: &[&str] = &[
    "scale",
    "capacity",
    "restart failed",
    "failed restart",
    "escalat",
    "insufficient resources",
];

const SNIPPET_CHARS: usize = 160;

/// Read-only context derived from precedent.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Advisories {
    /// Fraction of past `restart` actions that failed; 0 when there were none.
    pub restart_fail_rate: f64,
    pub had_failed_restarts: bool,
    /// Snippets from memory documents containing an escalation phrase.
    pub escalation_hints: Vec<String>,
    pub similar_incidents: usize,
}

impl Advisories {
    pub fn suggests_escalation(&self) -> bool {
        self.had_failed_restarts || !self.escalation_hints.is_empty()
    }
}

/// Failure rate of `restart` actions within `past`.
pub fn restart_fail_rate(past: &[PastRemediation]) -> f64 {
    let restarts: Vec<&PastRemediation> = past.iter().filter(|p| p.action_type == ActionType::Restart).collect();
    if restarts.is_empty() {
        return 0.0;
    }
    let failed = restarts.iter().filter(|p| !p.success).count();
    failed as f64 / restarts.len() as f64
}

/// Snippets of the hits whose text contains an escalation phrase.
pub fn escalation_hints(hits: &[MemoryHit]) -> Vec<String> {
    hits.iter()
        .filter(|hit| {
            let text = format!("{} {}", hit.title, hit.content).to_lowercase();
            ESCALATION_PHRASES.iter().any(|p| text.contains(p))
        })
        .map(|hit| {
            let snippet: String = hit.content.chars().take(SNIPPET_CHARS).collect();
            format!("{}: {}", hit.title, snippet.replace('\n', " "))
        })
        .collect()
}

pub struct HistoryAdvisor {
    store: Arc<dyn IncidentStore>,
    memory: Arc<dyn MemorySearch>,
    similar_limit: usize,
    memory_limit: usize,
}

impl HistoryAdvisor {
    pub fn new(
        store: Arc<dyn IncidentStore>,
        memory: Arc<dyn MemorySearch>,
        similar_limit: usize,
        memory_limit: usize,
    ) -> Self {
        Self {
            store,
            memory,
            similar_limit,
            memory_limit,
        }
    }

    /// Gather precedent for `incident`. Collaborator failures degrade to
    /// neutral advisories.
    pub async fn advise(&self, incident: &Incident) -> Advisories {
        // The incident itself is already stored; ask for one extra and drop it.
        let similar: Vec<Incident> = match self
            .store
            .find_similar_incidents(&incident.services, &incident.errors, self.similar_limit + 1)
            .await
        {
            Ok(found) => found
                .into_iter()
                .filter(|i| i.id != incident.id)
                .take(self.similar_limit)
                .collect(),
            Err(e) => {
                warn!(incident_id = %incident.id, kind = %FailureKind::CollectorFailure, error = %e, "similar incident lookup failed");
                Vec::new()
            }
        };

        let hits = match self.memory.search(&incident.title, self.memory_limit).await {
            Ok(hits) => hits,
            Err(e) => {
                warn!(incident_id = %incident.id, kind = %FailureKind::CollectorFailure, error = %e, "memory search failed");
                Vec::new()
            }
        };

        let past: Vec<PastRemediation> = similar.iter().flat_map(|i| i.past_remediations()).collect();
        let rate = restart_fail_rate(&past);
        let advisories = Advisories {
            restart_fail_rate: rate,
            had_failed_restarts: rate > 0.0,
            escalation_hints: escalation_hints(&hits),
            similar_incidents: similar.len(),
        };

        debug!(
            incident_id = %incident.id,
            similar = advisories.similar_incidents,
            restart_fail_rate = advisories.restart_fail_rate,
            hints = advisories.escalation_hints.len(),
            "history advisories ready"
        );
        advisories
    }
}
