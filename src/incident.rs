//! Incident data model shared by every stage of the decision engine.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::detect::DetectionSignal;

/// Severity levels for incidents, ordered `Info < Warning < Critical`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Info,
    Warning,
    Critical,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Info => "info",
            Severity::Warning => "warning",
            Severity::Critical => "critical",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "info" => Some(Severity::Info),
            "warning" => Some(Severity::Warning),
            "critical" => Some(Severity::Critical),
            _ => None,
        }
    }
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The kind of operation a remediation action performs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ActionType {
    Restart,
    Scale,
    Resume,
    Alert,
    Noop,
}

impl ActionType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ActionType::Restart => "restart",
            ActionType::Scale => "scale",
            ActionType::Resume => "resume",
            ActionType::Alert => "alert",
            ActionType::Noop => "noop",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "restart" => Some(ActionType::Restart),
            "scale" => Some(ActionType::Scale),
            "resume" => Some(ActionType::Resume),
            "alert" => Some(ActionType::Alert),
            "noop" => Some(ActionType::Noop),
            _ => None,
        }
    }

    /// Terminal actions end a chain and carry no health to validate.
    pub fn is_terminal(&self) -> bool {
        matches!(self, ActionType::Alert | ActionType::Noop)
    }
}

impl std::fmt::Display for ActionType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One concrete operation taken (or attempted) against a compute target.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemediationAction {
    pub id: Uuid,
    #[serde(rename = "type")]
    pub action_type: ActionType,
    pub target_service: String,
    pub description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reasoning: Option<String>,
    pub executed_at: DateTime<Utc>,
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub validated: Option<bool>,
}

impl RemediationAction {
    pub fn new(
        action_type: ActionType,
        target_service: impl Into<String>,
        description: impl Into<String>,
        reasoning: Option<String>,
        success: bool,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            action_type,
            target_service: target_service.into(),
            description: description.into(),
            reasoning,
            executed_at: Utc::now(),
            success,
            validated: None,
        }
    }
}

/// A fused, classified unit of work representing one suspected failure.
///
/// Only [`crate::classify::Fuser`] constructs incidents, and only from a
/// non-empty signal batch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Incident {
    pub id: Uuid,
    pub title: String,
    pub summary: String,
    pub severity: Severity,
    pub detected_at: DateTime<Utc>,
    pub services: BTreeSet<String>,
    pub errors: BTreeSet<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub root_cause: Option<String>,
    pub signals: Vec<DetectionSignal>,
    #[serde(default)]
    pub remediation_actions: Vec<RemediationAction>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resolved_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub post_mortem: Option<PostMortem>,
}

impl Incident {
    /// First service in the (sorted) affected set, if any.
    pub fn primary_service(&self) -> Option<&str> {
        self.services.iter().next().map(String::as_str)
    }

    pub fn is_resolved(&self) -> bool {
        self.resolved_at.is_some()
    }

    /// Flatten this incident's actions into success/failure precedent. An
    /// action that was accepted but validated unhealthy did not succeed.
    pub fn past_remediations(&self) -> impl Iterator<Item = PastRemediation> + '_ {
        self.remediation_actions.iter().map(|a| PastRemediation {
            action_type: a.action_type,
            success: a.success && a.validated != Some(false),
        })
    }
}

/// Aggregate precedent used to compute failure rates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PastRemediation {
    pub action_type: ActionType,
    pub success: bool,
}

/// Structured narrative generated once an incident run concludes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PostMortem {
    pub incident_id: Uuid,
    pub title: String,
    pub timeline: Vec<String>,
    pub root_cause: String,
    pub impact: String,
    pub remediation: String,
    pub lessons_learned: Vec<String>,
    pub generated_at: DateTime<Utc>,
}

impl PostMortem {
    /// Render as a markdown document (used for memory search and the CLI).
    pub fn to_markdown(&self) -> String {
        let mut out = format!("# {}\n\n", self.title);
        out.push_str("## Timeline\n");
        for line in &self.timeline {
            out.push_str(&format!("- {}\n", line));
        }
        out.push_str(&format!("\n## Root Cause\n{}\n", self.root_cause));
        out.push_str(&format!("\n## Impact\n{}\n", self.impact));
        out.push_str(&format!("\n## Remediation\n{}\n", self.remediation));
        out.push_str("\n## Lessons Learned\n");
        for lesson in &self.lessons_learned {
            out.push_str(&format!("- {}\n", lesson));
        }
        out
    }
}
