//! Signal fusion and classification.
//!
//! A batch of raw signals is merged into one [`Incident`]: affected
//! entities, error markers, severity and a best-guess root cause are all
//! derived from the concatenated signal text using the ordered tables in
//! [`rules`].

pub mod rules;

use std::collections::{BTreeSet, HashSet};

use chrono::Utc;
use tracing::debug;
use uuid::Uuid;

use self::rules::{SeverityPredicate, ENTITY_CATALOG, ERROR_PATTERNS, ROOT_CAUSE_RULES, SEVERITY_RULES};
use crate::detect::DetectionSignal;
use crate::incident::{Incident, Severity};

const SUMMARY_MAX_CHARS: usize = 500;

/// Merges signal batches into classified incidents.
#[derive(Debug, Clone)]
pub struct Fuser {
    catalog: Vec<String>,
    title_min_len: usize,
}

impl Default for Fuser {
    fn default() -> Self {
        Self::new(&[], 10)
    }
}

impl Fuser {
    /// Build a fuser whose entity catalog is the built-in list plus `extra_services`.
    pub fn new(extra_services: &[String], title_min_len: usize) -> Self {
        let mut catalog: Vec<String> = ENTITY_CATALOG.iter().map(|s| s.to_string()).collect();
        for name in extra_services {
            let name = name.trim().to_lowercase();
            if !name.is_empty() && !catalog.contains(&name) {
                catalog.push(name);
            }
        }
        Self { catalog, title_min_len }
    }

    /// Fuse a batch into one incident.
    ///
    /// Returns `None` for an empty batch (or one with no text at all); that
    /// is a normal outcome, not an error.
    pub fn fuse(&self, signals: Vec<DetectionSignal>) -> Option<Incident> {
        let signals = dedup_by_url(signals);
        if signals.is_empty() {
            return None;
        }

        let text = signals.iter().map(|s| s.text()).collect::<Vec<_>>().join("\n");

        let mut services = extract_entities(&text, &self.catalog);
        services.extend(
            signals
                .iter()
                .filter_map(|s| s.reported_service())
                .map(|s| s.to_lowercase()),
        );
        let errors = extract_errors(&text);
        let severity = classify_severity(&signals);
        let root_cause = infer_root_cause(&text).map(str::to_string);
        let title = self.select_title(&signals[0], &services);

        debug!(%severity, ?root_cause, services = services.len(), errors = errors.len(), "classified signal batch");

        Some(Incident {
            id: Uuid::new_v4(),
            title,
            summary: fuse_summary(&signals),
            severity,
            detected_at: Utc::now(),
            services,
            errors,
            root_cause,
            signals,
            remediation_actions: Vec::new(),
            resolved_at: None,
            post_mortem: None,
        })
    }

    fn select_title(&self, first: &DetectionSignal, services: &BTreeSet<String>) -> String {
        let title = first.title.trim();
        if title.chars().count() >= self.title_min_len {
            return title.to_string();
        }
        if services.is_empty() {
            "Unclassified incident".to_string()
        } else {
            format!(
                "Incident affecting {}",
                services.iter().cloned().collect::<Vec<_>>().join(", ")
            )
        }
    }
}

/// Drop blank signals and later signals repeating an already-seen URL.
fn dedup_by_url(signals: Vec<DetectionSignal>) -> Vec<DetectionSignal> {
    let mut seen = HashSet::new();
    signals
        .into_iter()
        .filter(|s| !s.is_blank())
        .filter(|s| match &s.url {
            Some(url) => seen.insert(url.clone()),
            None => true,
        })
        .collect()
}

fn fuse_summary(signals: &[DetectionSignal]) -> String {
    let mut parts: Vec<&str> = Vec::new();
    for s in signals {
        let summary = s.summary.trim();
        if !summary.is_empty() && !parts.contains(&summary) {
            parts.push(summary);
        }
    }
    let joined = parts.join(" | ");
    if joined.chars().count() > SUMMARY_MAX_CHARS {
        joined.chars().take(SUMMARY_MAX_CHARS).collect()
    } else {
        joined
    }
}

/// Case-insensitive substring match of `text` against the catalog.
pub fn extract_entities(text: &str, catalog: &[String]) -> BTreeSet<String> {
    let lower = text.to_lowercase();
    catalog
        .iter()
        .filter(|name| lower.contains(name.as_str()))
        .cloned()
        .collect()
}

/// Collect every distinct error marker in `text`.
pub fn extract_errors(text: &str) -> BTreeSet<String> {
    let mut errors = BTreeSet::new();
    for pattern in ERROR_PATTERNS.iter() {
        match pattern.label {
            Some(label) => {
                if pattern.regex.is_match(text) {
                    errors.insert(label.to_string());
                }
            }
            None => {
                errors.extend(pattern.regex.find_iter(text).map(|m| m.as_str().to_string()));
            }
        }
    }
    errors
}

/// First-match-wins over [`SEVERITY_RULES`]; `Info` when nothing matches.
pub fn classify_severity(signals: &[DetectionSignal]) -> Severity {
    for rule in SEVERITY_RULES.iter() {
        let hit = match &rule.predicate {
            SeverityPredicate::Keywords(regex) => signals.iter().any(|s| regex.is_match(&s.text())),
            SeverityPredicate::Source(source) => signals.iter().any(|s| s.source == *source),
        };
        if hit {
            debug!(rule = rule.name, outcome = %rule.outcome, "severity rule matched");
            return rule.outcome;
        }
    }
    Severity::Info
}

/// First-match-wins over [`ROOT_CAUSE_RULES`]. `None` means "under investigation".
pub fn infer_root_cause(text: &str) -> Option<&'static str> {
    ROOT_CAUSE_RULES
        .iter()
        .find(|rule| rule.regex.is_match(text))
        .map(|rule| rule.cause)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detect::SignalSource;

    fn sig(source: SignalSource, title: &str, summary: &str) -> DetectionSignal {
        DetectionSignal::new(source, title, summary)
    }

    #[test]
    fn test_empty_batch_is_no_incident() {
        assert!(Fuser::default().fuse(Vec::new()).is_none());
        let blank = sig(SignalSource::Search, "  ", "");
        assert!(Fuser::default().fuse(vec![blank]).is_none());
    }

    #[test]
    fn test_critical_keyword_wins_over_everything() {
        let signals = vec![
            sig(SignalSource::Search, "Minor latency on checkout", "intermittent slowness"),
            sig(SignalSource::Health, "Service unhealthy: api", "api is degraded"),
            sig(SignalSource::Scout, "Stripe outage", "payments unavailable"),
        ];
        assert_eq!(classify_severity(&signals), Severity::Critical);
    }

    #[test]
    fn test_health_source_forces_warning() {
        let signals = vec![sig(SignalSource::Health, "Service unhealthy: api", "api is suspended")];
        assert_eq!(classify_severity(&signals), Severity::Warning);
    }

    #[test]
    fn test_warning_keywords_and_info_default() {
        let warn = vec![sig(SignalSource::Search, "GitHub Actions degraded", "queued jobs")];
        assert_eq!(classify_severity(&warn), Severity::Warning);
        let info = vec![sig(SignalSource::Search, "Scheduled maintenance", "window tonight")];
        assert_eq!(classify_severity(&info), Severity::Info);
    }

    #[test]
    fn test_root_cause_table_order() {
        // 5xx outranks timeout when both appear.
        assert_eq!(infer_root_cause("504 gateway timeout"), Some("server-side error"));
        assert_eq!(infer_root_cause("upstream timed out"), Some("service timeout"));
        assert_eq!(infer_root_cause("OOM killed, ENOMEM"), Some("memory exhaustion"));
        assert_eq!(infer_root_cause("write failed: no space left on device"), Some("disk exhaustion"));
        assert_eq!(infer_root_cause("NXDOMAIN for api.example.com"), Some("DNS resolution failure"));
        assert_eq!(infer_root_cause("x509: certificate has expired"), Some("certificate issue"));
        assert_eq!(infer_root_cause("errors began after deploy"), Some("bad deployment"));
        assert_eq!(infer_root_cause("something looks off"), None);
    }

    #[test]
    fn test_extract_errors() {
        let errors = extract_errors("503 and 500 errors, ECONNREFUSED, request timed out, 404");
        for expected in ["503", "500", "404", "connection refused", "timeout"] {
            assert!(errors.contains(expected), "missing {}", expected);
        }
        assert!(extract_errors("all good").is_empty());
    }

    #[test]
    fn test_entities_and_reported_service() {
        let fuser = Fuser::new(&["Ghost-Blog".to_string()], 10);
        let signals = vec![
            sig(SignalSource::Search, "Render and Cloudflare issues", "ghost-blog is slow"),
            sig(SignalSource::Health, "Service unhealthy: api", "api is suspended")
                .with_raw(serde_json::json!({ "service": "API" })),
        ];
        let incident = fuser.fuse(signals).unwrap();
        let services: Vec<&str> = incident.services.iter().map(String::as_str).collect();
        assert_eq!(services, vec!["api", "cloudflare", "ghost-blog", "render"]);
        assert_eq!(incident.primary_service(), Some("api"));
    }

    #[test]
    fn test_dedup_by_url_keeps_first() {
        let a = sig(SignalSource::Search, "Render outage reported", "first").with_url("https://x/1");
        let b = sig(SignalSource::Scout, "Render outage again", "second").with_url("https://x/1");
        let c = sig(SignalSource::Scout, "Unrelated note", "third");
        let incident = Fuser::default().fuse(vec![a, b, c]).unwrap();
        assert_eq!(incident.signals.len(), 2);
        assert_eq!(incident.summary, "first | third");
    }

    #[test]
    fn test_title_selection() {
        let fuser = Fuser::default();
        let long = fuser.fuse(vec![sig(SignalSource::Search, "Redis cluster failover", "x")]).unwrap();
        assert_eq!(long.title, "Redis cluster failover");

        let short = fuser.fuse(vec![sig(SignalSource::Search, "alert", "redis and kafka lag")]).unwrap();
        assert_eq!(short.title, "Incident affecting kafka, redis");

        let bare = fuser.fuse(vec![sig(SignalSource::Search, "hmm", "something odd")]).unwrap();
        assert_eq!(bare.title, "Unclassified incident");
    }

    #[test]
    fn test_classification_is_deterministic() {
        let build = || {
            vec![
                sig(SignalSource::Health, "Service unhealthy: ghost-api", "503 errors, timed out"),
                sig(SignalSource::Search, "Render degraded", "elevated latency"),
            ]
        };
        let a = Fuser::default().fuse(build()).unwrap();
        let b = Fuser::default().fuse(build()).unwrap();
        assert_eq!(a.severity, b.severity);
        assert_eq!(a.services, b.services);
        assert_eq!(a.errors, b.errors);
        assert_eq!(a.root_cause, b.root_cause);
        assert_ne!(a.id, b.id);
    }

    #[test]
    fn test_new_incident_has_no_actions() {
        let incident = Fuser::default()
            .fuse(vec![sig(SignalSource::Search, "Vercel edge outage", "down")])
            .unwrap();
        assert!(incident.remediation_actions.is_empty());
        assert!(incident.resolved_at.is_none());
        assert!(incident.post_mortem.is_none());
    }
}
