//! Statuspage poller (`/api/v2/summary.json`).

use std::time::Duration;

use chrono::{DateTime, Utc};
use reqwest::Client;
use serde::Deserialize;
use tracing::warn;

use super::{DetectionSignal, DetectionSource, SignalSource};
use crate::error::{CollaboratorError, FailureKind};

#[derive(Debug, Deserialize)]
struct Summary {
    page: Page,
    status: PageStatus,
    #[serde(default)]
    incidents: Vec<PageIncident>,
}

#[derive(Debug, Deserialize)]
struct Page {
    name: String,
}

#[derive(Debug, Deserialize)]
struct PageStatus {
    indicator: String,
    description: String,
}

#[derive(Debug, Deserialize)]
struct PageIncident {
    name: String,
    status: String,
    #[serde(default)]
    shortlink: Option<String>,
    #[serde(default)]
    created_at: Option<DateTime<Utc>>,
    #[serde(default)]
    incident_updates: Vec<IncidentUpdate>,
}

#[derive(Debug, Deserialize)]
struct IncidentUpdate {
    body: String,
}

/// Polls one or more Atlassian Statuspage sites.
pub struct StatusPageSource {
    client: Client,
    urls: Vec<String>,
}

impl StatusPageSource {
    pub fn new(urls: Vec<String>, timeout: Duration) -> Result<Self, CollaboratorError> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self { client, urls })
    }

    async fn fetch(&self, base: &str) -> Result<Summary, CollaboratorError> {
        let url = format!("{}/api/v2/summary.json", base.trim_end_matches('/'));
        let resp = self.client.get(&url).send().await?.error_for_status()?;
        Ok(resp.json().await?)
    }
}

fn signals_from_summary(summary: Summary) -> Vec<DetectionSignal> {
    let open: Vec<PageIncident> = summary
        .incidents
        .into_iter()
        .filter(|i| i.status != "resolved" && i.status != "postmortem")
        .collect();

    if open.is_empty() {
        if summary.status.indicator == "none" {
            return Vec::new();
        }
        return vec![DetectionSignal::new(
            SignalSource::StatusPage,
            format!("{}: {}", summary.page.name, summary.status.description),
            format!(
                "{} reports indicator '{}'",
                summary.page.name, summary.status.indicator
            ),
        )];
    }

    open.into_iter()
        .map(|i| {
            let body = i
                .incident_updates
                .first()
                .map(|u| u.body.clone())
                .unwrap_or_else(|| i.status.clone());
            let mut signal = DetectionSignal::new(
                SignalSource::StatusPage,
                format!("{}: {}", summary.page.name, i.name),
                body,
            );
            if let Some(at) = i.created_at {
                signal.timestamp = at;
            }
            match i.shortlink {
                Some(link) => signal.with_url(link),
                None => signal,
            }
        })
        .collect()
}

#[async_trait::async_trait]
impl DetectionSource for StatusPageSource {
    fn name(&self) -> &str {
        "status_page"
    }

    async fn detect(&self) -> Result<Vec<DetectionSignal>, CollaboratorError> {
        let mut signals = Vec::new();
        for base in &self.urls {
            match self.fetch(base).await {
                Ok(summary) => signals.extend(signals_from_summary(summary)),
                Err(e) => {
                    warn!(url = %base, kind = %FailureKind::CollectorFailure, error = %e, "status page poll failed");
                }
            }
        }
        Ok(signals)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(body: &str) -> Summary {
        serde_json::from_str(body).unwrap()
    }

    #[test]
    fn test_open_incidents_become_signals() {
        let summary = parse(
            r#"{
                "page": {"name": "Render"},
                "status": {"indicator": "major", "description": "Partial System Outage"},
                "incidents": [
                    {"name": "Elevated 503 errors", "status": "investigating",
                     "shortlink": "https://stspg.io/abc",
                     "created_at": "2026-01-02T03:04:05Z",
                     "incident_updates": [{"body": "We are seeing 503 and 500 errors"}]},
                    {"name": "Old issue", "status": "resolved", "incident_updates": []}
                ]
            }"#,
        );
        let signals = signals_from_summary(summary);
        assert_eq!(signals.len(), 1);
        assert_eq!(signals[0].title, "Render: Elevated 503 errors");
        assert_eq!(signals[0].summary, "We are seeing 503 and 500 errors");
        assert_eq!(signals[0].url.as_deref(), Some("https://stspg.io/abc"));
        assert_eq!(signals[0].source, SignalSource::StatusPage);
    }

    #[test]
    fn test_indicator_without_incidents() {
        let summary = parse(
            r#"{"page": {"name": "GitHub"},
                "status": {"indicator": "minor", "description": "Degraded performance"}}"#,
        );
        let signals = signals_from_summary(summary);
        assert_eq!(signals.len(), 1);
        assert_eq!(signals[0].title, "GitHub: Degraded performance");
    }

    #[test]
    fn test_all_clear_yields_nothing() {
        let summary = parse(
            r#"{"page": {"name": "GitHub"},
                "status": {"indicator": "none", "description": "All Systems Operational"},
                "incidents": []}"#,
        );
        assert!(signals_from_summary(summary).is_empty());
    }
}
