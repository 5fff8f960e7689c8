//! opsmedic -- incident decision engine.
//!
//! Fuses detection signals into classified incidents, picks and executes a
//! history-aware remediation strategy, validates and escalates, and
//! publishes a post-mortem that feeds the next run's history.

pub mod classify;
pub mod compute;
pub mod config;
pub mod detect;
pub mod error;
pub mod history;
pub mod incident;
pub mod pipeline;
pub mod postmortem;
pub mod remediate;
pub mod scheduler;
pub mod simulate;
pub mod storage;

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};

use crate::classify::Fuser;
use crate::compute::{ComputeTarget, RenderTarget};
use crate::config::Config;
use crate::detect::health::HealthCheckSource;
use crate::detect::statuspage::StatusPageSource;
use crate::detect::DetectionSource;
use crate::pipeline::Pipeline;
use crate::storage::{Pool, SqliteIncidentStore, SqliteMemorySearch};

/// Wire a pipeline over SQLite storage and the given compute target.
pub fn build_pipeline(
    config: &Config,
    pool: Pool,
    compute: Arc<dyn ComputeTarget>,
    sources: Vec<Arc<dyn DetectionSource>>,
) -> Pipeline {
    let fuser = Fuser::new(&config.classifier.extra_services, config.engine.title_min_len);
    Pipeline::new(
        &config.engine,
        fuser,
        sources,
        Arc::new(SqliteIncidentStore::new(pool.clone())),
        Arc::new(SqliteMemorySearch::new(pool)),
        compute,
    )
}

/// Pipeline against the live Render API, with health-check and status-page sources.
pub fn build_live_pipeline(config: &Config, pool: Pool) -> Result<Pipeline> {
    let api_key = config
        .render
        .api_key()
        .with_context(|| format!("{} is not set", config.render.api_key_env))?;
    let timeout = Duration::from_secs(config.render.timeout_secs);

    let compute: Arc<dyn ComputeTarget> = Arc::new(
        RenderTarget::new(&config.render.base_url, api_key, timeout).context("failed to build Render client")?,
    );

    let mut sources: Vec<Arc<dyn DetectionSource>> = vec![Arc::new(HealthCheckSource::new(compute.clone()))];
    if !config.status_pages.urls.is_empty() {
        sources.push(Arc::new(
            StatusPageSource::new(config.status_pages.urls.clone(), timeout)
                .context("failed to build status page client")?,
        ));
    }

    tracing::info!(sources = sources.len(), "live pipeline ready");
    Ok(build_pipeline(config, pool, compute, sources))
}
