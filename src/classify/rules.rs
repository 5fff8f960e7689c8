//! Fixed, ordered rule tables for classification.
//!
//! Every table is evaluated top-to-bottom and the first matching row wins.
//! Row order is therefore part of the behavior and is covered by tests.

use once_cell::sync::Lazy;
use regex::Regex;

use crate::detect::SignalSource;
use crate::incident::Severity;

/// Known vendor and platform names recognised in signal text.
pub const ENTITY_CATALOG: &[&str] = &[
    "render",
    "vercel",
    "netlify",
    "heroku",
    "railway",
    "fly.io",
    "aws",
    "azure",
    "google cloud",
    "cloudflare",
    "github",
    "gitlab",
    "stripe",
    "twilio",
    "sendgrid",
    "openai",
    "anthropic",
    "supabase",
    "postgres",
    "mysql",
    "redis",
    "mongodb",
    "kafka",
    "elasticsearch",
];

fn re(pattern: &str) -> Regex {
    Regex::new(pattern).expect("rule table pattern must compile")
}

/// An error marker extracted from text. `label = None` keeps the matched
/// text itself (HTTP status codes).
pub struct ErrorPattern {
    pub regex: Regex,
    pub label: Option<&'static str>,
}

pub static ERROR_PATTERNS: Lazy<Vec<ErrorPattern>> = Lazy::new(|| {
    vec![
        ErrorPattern { regex: re(r"\b[45]\d{2}\b"), label: None },
        ErrorPattern { regex: re(r"(?i)\b(timed out|time out|timeout|etimedout)\b"), label: Some("timeout") },
        ErrorPattern { regex: re(r"(?i)(connection refused|econnrefused)"), label: Some("connection refused") },
        ErrorPattern { regex: re(r"(?i)\b(out of memory|oom|enomem)\b"), label: Some("out of memory") },
        ErrorPattern { regex: re(r"(?i)(no space left|disk full|enospc)"), label: Some("disk full") },
    ]
});

/// What a severity row tests.
pub enum SeverityPredicate {
    /// Any signal text matches the pattern.
    Keywords(Regex),
    /// Any signal comes from the given source.
    Source(SignalSource),
}

pub struct SeverityRule {
    pub name: &'static str,
    pub predicate: SeverityPredicate,
    pub outcome: Severity,
}

/// Severity tiers in strict priority order. Critical keywords beat a
/// health-check source, which beats warning keywords; no match is `Info`.
pub static SEVERITY_RULES: Lazy<Vec<SeverityRule>> = Lazy::new(|| {
    vec![
        SeverityRule {
            name: "critical keywords",
            predicate: SeverityPredicate::Keywords(re(
                r"(?i)\b(outage|down|critical|data loss|crash(ed)?|fatal|oom)\b",
            )),
            outcome: Severity::Critical,
        },
        SeverityRule {
            name: "health check",
            predicate: SeverityPredicate::Source(SignalSource::Health),
            outcome: Severity::Warning,
        },
        SeverityRule {
            name: "warning keywords",
            predicate: SeverityPredicate::Keywords(re(
                r"(?i)\b(degraded|intermittent|latency|slow(ness)?|elevated|partial|delays?)\b",
            )),
            outcome: Severity::Warning,
        },
    ]
});

pub struct RootCauseRule {
    pub regex: Regex,
    pub cause: &'static str,
}

/// Root-cause cues, first match wins. No match leaves the cause unset.
pub static ROOT_CAUSE_RULES: Lazy<Vec<RootCauseRule>> = Lazy::new(|| {
    vec![
        RootCauseRule { regex: re(r"\b5\d{2}\b"), cause: "server-side error" },
        RootCauseRule { regex: re(r"(?i)\b(timed out|time out|timeout|etimedout)\b"), cause: "service timeout" },
        RootCauseRule { regex: re(r"(?i)\b(out of memory|oom|enomem|memory exhaust\w*)\b"), cause: "memory exhaustion" },
        RootCauseRule { regex: re(r"(?i)(no space left|disk full|enospc|disk exhaust)"), cause: "disk exhaustion" },
        RootCauseRule { regex: re(r"(?i)\b(dns|nxdomain|name resolution)\b"), cause: "DNS resolution failure" },
        RootCauseRule { regex: re(r"(?i)\b(tls|ssl|certificates?|x509)\b"), cause: "certificate issue" },
        RootCauseRule { regex: re(r"(?i)\b(deploy(ment|ed)?|rollback|rolled back)\b"), cause: "bad deployment" },
    ]
});
