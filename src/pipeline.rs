//! Pipeline orchestrator: one end-to-end incident run.
//!
//! detection -> classification -> history -> remediation -> validation ->
//! post-mortem, each stage consuming the previous stage's complete output.
//! Overlapping runs are rejected by an in-flight guard.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use serde::Serialize;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use uuid::Uuid;

use crate::classify::Fuser;
use crate::compute::ComputeTarget;
use crate::config::EngineConfig;
use crate::detect::{DetectionSignal, DetectionSource};
use crate::error::{FailureKind, PipelineError};
use crate::history::{Advisories, HistoryAdvisor};
use crate::incident::{Incident, RemediationAction, Severity};
use crate::postmortem::PostMortemPublisher;
use crate::remediate::{StrategyEngine, Validator};
use crate::storage::{IncidentStore, MemorySearch};

const EVENT_CAPACITY: usize = 64;

/// Stage-completion notices for observers.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PipelineEvent {
    DetectionComplete {
        signal_count: usize,
    },
    AnalysisComplete {
        incident_id: Uuid,
        severity: Severity,
        root_cause: Option<String>,
        advisories: Advisories,
    },
    RemediationAction {
        incident_id: Uuid,
        action: RemediationAction,
    },
    ValidationComplete {
        incident_id: Uuid,
        resolved: bool,
        escalations: usize,
    },
    PostmortemComplete {
        incident_id: Uuid,
    },
}

/// How a run concluded. All three are normal outcomes.
#[derive(Debug, Clone, PartialEq)]
pub enum PipelineOutcome {
    NoSignals,
    NoIncident,
    Completed(Box<Incident>),
}

/// Releases the in-flight flag when the run ends, however it ends.
struct InFlight<'a>(&'a AtomicBool);

impl<'a> InFlight<'a> {
    fn acquire(flag: &'a AtomicBool) -> Result<Self, PipelineError> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .map_err(|_| PipelineError::AlreadyRunning)?;
        Ok(Self(flag))
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

pub struct Pipeline {
    sources: Vec<Arc<dyn DetectionSource>>,
    store: Arc<dyn IncidentStore>,
    fuser: Fuser,
    advisor: HistoryAdvisor,
    engine: StrategyEngine,
    validator: Validator,
    publisher: PostMortemPublisher,
    events: broadcast::Sender<PipelineEvent>,
    in_flight: AtomicBool,
    cancel: CancellationToken,
}

impl Pipeline {
    pub fn new(
        config: &EngineConfig,
        fuser: Fuser,
        sources: Vec<Arc<dyn DetectionSource>>,
        store: Arc<dyn IncidentStore>,
        memory: Arc<dyn MemorySearch>,
        compute: Arc<dyn ComputeTarget>,
    ) -> Self {
        let cancel = CancellationToken::new();
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            sources,
            fuser,
            advisor: HistoryAdvisor::new(
                store.clone(),
                memory.clone(),
                config.similar_incident_limit,
                config.memory_search_limit,
            ),
            engine: StrategyEngine::new(compute.clone(), config.scale_target),
            validator: Validator::new(
                compute,
                Duration::from_secs(config.validation_delay_secs),
                cancel.child_token(),
            ),
            publisher: PostMortemPublisher::new(store.clone(), memory),
            store,
            events,
            in_flight: AtomicBool::new(false),
            cancel,
        }
    }

    /// Subscribe to stage-completion notices.
    pub fn subscribe(&self) -> broadcast::Receiver<PipelineEvent> {
        self.events.subscribe()
    }

    /// Token that cancels any pending validation wait.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn is_running(&self) -> bool {
        self.in_flight.load(Ordering::Acquire)
    }

    fn emit(&self, event: PipelineEvent) {
        // No subscribers is fine.
        let _ = self.events.send(event);
    }

    /// Collect signals from every source concurrently, in source order.
    async fn acquire(&self) -> Vec<DetectionSignal> {
        let results = join_all(self.sources.iter().map(|s| s.detect())).await;
        let mut signals = Vec::new();
        for (source, result) in self.sources.iter().zip(results) {
            match result {
                Ok(batch) => signals.extend(batch),
                Err(e) => {
                    warn!(source = source.name(), kind = %FailureKind::CollectorFailure, error = %e, "detection source failed");
                }
            }
        }
        signals
    }

    /// Run the pipeline once. `signals` replaces live acquisition when given.
    pub async fn run(&self, signals: Option<Vec<DetectionSignal>>) -> Result<PipelineOutcome, PipelineError> {
        let _guard = InFlight::acquire(&self.in_flight)?;

        let signals = match signals {
            Some(batch) => batch,
            None => self.acquire().await,
        };
        self.emit(PipelineEvent::DetectionComplete {
            signal_count: signals.len(),
        });
        if signals.is_empty() {
            info!("no signals found");
            return Ok(PipelineOutcome::NoSignals);
        }

        let Some(mut incident) = self.fuser.fuse(signals) else {
            info!("no incident could be classified");
            return Ok(PipelineOutcome::NoIncident);
        };
        info!(
            incident_id = %incident.id,
            severity = %incident.severity,
            title = %incident.title,
            "incident classified"
        );

        if let Err(e) = self.store.create_incident(&incident).await {
            warn!(incident_id = %incident.id, kind = %FailureKind::CollectorFailure, error = %e, "failed to persist incident");
        }

        let advisories = self.advisor.advise(&incident).await;
        self.emit(PipelineEvent::AnalysisComplete {
            incident_id: incident.id,
            severity: incident.severity,
            root_cause: incident.root_cause.clone(),
            advisories: advisories.clone(),
        });

        let actions = self.engine.remediate(&mut incident, &advisories).await;
        self.record_actions(incident.id, actions).await;

        let report = self.validator.validate(&mut incident, &self.engine).await;
        for (action_id, healthy) in &report.validated {
            if let Err(e) = self.store.update_validation(*action_id, *healthy).await {
                warn!(%action_id, kind = %FailureKind::CollectorFailure, error = %e, "failed to record validation");
            }
        }
        self.record_actions(incident.id, report.escalations.clone()).await;
        if let Some(at) = incident.resolved_at {
            if let Err(e) = self.store.resolve_incident(incident.id, at).await {
                warn!(incident_id = %incident.id, kind = %FailureKind::CollectorFailure, error = %e, "failed to record resolution");
            }
        }
        self.emit(PipelineEvent::ValidationComplete {
            incident_id: incident.id,
            resolved: report.resolved,
            escalations: report.escalations.len(),
        });

        self.publisher.publish(&mut incident).await;
        self.emit(PipelineEvent::PostmortemComplete {
            incident_id: incident.id,
        });

        info!(
            incident_id = %incident.id,
            actions = incident.remediation_actions.len(),
            resolved = incident.is_resolved(),
            "pipeline run complete"
        );
        Ok(PipelineOutcome::Completed(Box::new(incident)))
    }

    async fn record_actions(&self, incident_id: Uuid, actions: Vec<RemediationAction>) {
        for action in actions {
            if let Err(e) = self.store.add_remediation(incident_id, &action).await {
                warn!(%incident_id, kind = %FailureKind::CollectorFailure, error = %e, "failed to record remediation");
            }
            self.emit(PipelineEvent::RemediationAction { incident_id, action });
        }
    }
}
