//! Signal acquisition: the signal type, the `DetectionSource` seam, and the
//! concrete sources (compute-target health checks, status pages, files).

pub mod health;
pub mod statuspage;

use std::path::Path;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::CollaboratorError;

/// Where a signal came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SignalSource {
    /// Direct health check against the compute target.
    Health,
    StatusPage,
    Search,
    Scout,
    Manual,
    #[serde(other)]
    Other,
}

/// A single observation suggesting something may be wrong. Immutable once produced.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetectionSignal {
    pub source: SignalSource,
    pub title: String,
    pub summary: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default = "Utc::now")]
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub raw: Option<serde_json::Value>,
}

impl DetectionSignal {
    pub fn new(source: SignalSource, title: impl Into<String>, summary: impl Into<String>) -> Self {
        Self {
            source,
            title: title.into(),
            summary: summary.into(),
            url: None,
            timestamp: Utc::now(),
            raw: None,
        }
    }

    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.url = Some(url.into());
        self
    }

    pub fn with_raw(mut self, raw: serde_json::Value) -> Self {
        self.raw = Some(raw);
        self
    }

    /// Title and summary joined, the text every classification rule reads.
    pub fn text(&self) -> String {
        format!("{} {}", self.title, self.summary)
    }

    /// Whether the signal carries any text at all.
    pub fn is_blank(&self) -> bool {
        self.title.trim().is_empty() && self.summary.trim().is_empty()
    }

    /// Service name reported by a health-check collaborator, if any.
    pub fn reported_service(&self) -> Option<&str> {
        if self.source != SignalSource::Health {
            return None;
        }
        self.raw.as_ref()?.get("service")?.as_str()
    }
}

/// Trait for all signal collectors.
#[async_trait::async_trait]
pub trait DetectionSource: Send + Sync {
    /// Short identifier used in logs.
    fn name(&self) -> &str;

    /// Collect the current batch of signals.
    async fn detect(&self) -> Result<Vec<DetectionSignal>, CollaboratorError>;
}

/// Load a JSON array of signals for a manual or simulated trigger.
pub fn load_signals(path: &Path) -> Result<Vec<DetectionSignal>> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read signal file: {}", path.display()))?;
    let signals: Vec<DetectionSignal> = serde_json::from_str(&content)
        .with_context(|| format!("failed to parse signal file: {}", path.display()))?;
    Ok(signals)
}
