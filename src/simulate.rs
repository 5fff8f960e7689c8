//! Built-in scenarios for dry runs against a [`SimulatedTarget`].

use serde_json::json;

use crate::compute::simulated::Behavior;
use crate::compute::{ServiceStatus, SimulatedTarget};
use crate::detect::{DetectionSignal, SignalSource};

/// Service name every scenario is built around.
pub const DEMO_SERVICE: &str = "ghost-api";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scenario {
    /// Suspended service during a reported platform outage.
    Outage,
    /// Suspended service killed by the OOM killer.
    Oom,
    /// Latency report naming nothing we can remediate.
    Unknown,
    /// Failed service that restarts but never recovers.
    FlakyRestart,
}

impl Scenario {
    pub fn signals(&self) -> Vec<DetectionSignal> {
        match self {
            Scenario::Outage => vec![
                DetectionSignal::new(
                    SignalSource::Health,
                    format!("Service unhealthy: {}", DEMO_SERVICE),
                    format!("{} is suspended; 503 errors on every request", DEMO_SERVICE),
                )
                .with_raw(json!({ "service": DEMO_SERVICE, "status": "suspended" })),
                DetectionSignal::new(
                    SignalSource::Search,
                    "Render platform outage reported",
                    "Users report 503 and 500 errors across Render-hosted services",
                )
                .with_url("https://status.render.com/incidents/demo"),
            ],
            Scenario::Oom => vec![DetectionSignal::new(
                SignalSource::Health,
                format!("Service unhealthy: {}", DEMO_SERVICE),
                "Process OOM killed. Out of memory error detected. ENOMEM.",
            )
            .with_raw(json!({ "service": DEMO_SERVICE, "status": "suspended" }))],
            Scenario::Unknown => vec![DetectionSignal::new(
                SignalSource::Scout,
                "Intermittent latency reported",
                "Some users see elevated latency on checkout",
            )],
            Scenario::FlakyRestart => vec![DetectionSignal::new(
                SignalSource::Health,
                format!("Service unhealthy: {}", DEMO_SERVICE),
                format!("{} is failed", DEMO_SERVICE),
            )
            .with_raw(json!({ "service": DEMO_SERVICE, "status": "failed" }))],
        }
    }

    pub fn target(&self) -> SimulatedTarget {
        let target = SimulatedTarget::new().with_service("billing-worker", ServiceStatus::Active);
        match self {
            Scenario::Outage | Scenario::Oom | Scenario::Unknown => {
                target.with_service(DEMO_SERVICE, ServiceStatus::Suspended)
            }
            Scenario::FlakyRestart => {
                target.with_scripted_service(DEMO_SERVICE, ServiceStatus::Failed, Behavior::stuck())
            }
        }
    }
}

impl std::str::FromStr for Scenario {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "outage" => Ok(Scenario::Outage),
            "oom" => Ok(Scenario::Oom),
            "unknown" => Ok(Scenario::Unknown),
            "flaky-restart" => Ok(Scenario::FlakyRestart),
            other => Err(format!(
                "unknown scenario '{}' (expected outage, oom, unknown or flaky-restart)",
                other
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse() {
        assert_eq!("flaky-restart".parse::<Scenario>(), Ok(Scenario::FlakyRestart));
        assert!("nope".parse::<Scenario>().is_err());
    }

    #[test]
    fn test_every_scenario_has_signals() {
        for s in [Scenario::Outage, Scenario::Oom, Scenario::Unknown, Scenario::FlakyRestart] {
            assert!(!s.signals().is_empty());
        }
    }
}
