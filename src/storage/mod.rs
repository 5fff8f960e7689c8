//! Durable incident history and free-text memory, behind two seams:
//! [`IncidentStore`] and [`MemorySearch`]. SQLite implementations live in
//! [`incidents`] and [`memory`].

pub mod incidents;
pub mod memory;
pub mod schema;

use std::collections::BTreeSet;

use anyhow::Result;
use chrono::{DateTime, SecondsFormat, Utc};
use r2d2::Pool as R2D2Pool;
use r2d2_sqlite::SqliteConnectionManager;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::CollaboratorError;
use crate::incident::{Incident, PostMortem, RemediationAction};

pub use self::incidents::SqliteIncidentStore;
pub use self::memory::SqliteMemorySearch;

/// Connection Pool type
pub type Pool = R2D2Pool<SqliteConnectionManager>;

/// Open (or create) the SQLite database and return a connection pool.
pub fn open_pool(path: &str) -> Result<Pool> {
    if let Some(parent) = std::path::Path::new(path).parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }

    let manager = SqliteConnectionManager::file(path).with_init(|c| {
        c.execute_batch(
            "PRAGMA journal_mode = WAL;
                 PRAGMA synchronous = NORMAL;
                 PRAGMA temp_store = MEMORY;
                 PRAGMA foreign_keys = ON;
                 PRAGMA busy_timeout = 5000;",
        )
    });

    let pool = R2D2Pool::new(manager)?;

    // Run migrations on a single connection
    let conn = pool.get()?;
    schema::migrate(&conn)?;

    Ok(pool)
}

/// Fixed-width RFC 3339 so stored timestamps sort lexically.
pub(crate) fn format_ts(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub(crate) fn parse_ts(s: &str) -> Result<DateTime<Utc>, CollaboratorError> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| CollaboratorError::Corrupt(format!("timestamp '{}': {}", s, e)))
}

/// Persistent incident history.
///
/// Implementations report unavailability as `Err`; the engine degrades every
/// such error to an empty result or a no-op.
#[async_trait::async_trait]
pub trait IncidentStore: Send + Sync {
    async fn create_incident(&self, incident: &Incident) -> Result<(), CollaboratorError>;

    async fn add_remediation(&self, incident_id: Uuid, action: &RemediationAction) -> Result<(), CollaboratorError>;

    async fn update_validation(&self, action_id: Uuid, validated: bool) -> Result<(), CollaboratorError>;

    async fn resolve_incident(&self, incident_id: Uuid, resolved_at: DateTime<Utc>) -> Result<(), CollaboratorError>;

    async fn add_post_mortem(&self, post_mortem: &PostMortem) -> Result<(), CollaboratorError>;

    /// Prior incidents sharing a service (or, with no services, an error),
    /// most recent first, at most `limit`.
    async fn find_similar_incidents(
        &self,
        services: &BTreeSet<String>,
        errors: &BTreeSet<String>,
        limit: usize,
    ) -> Result<Vec<Incident>, CollaboratorError>;

    async fn get_incident(&self, id: Uuid) -> Result<Option<Incident>, CollaboratorError>;

    async fn list_recent(&self, limit: usize) -> Result<Vec<Incident>, CollaboratorError>;
}

/// A free-text document stored for later retrieval.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemoryDocument {
    pub title: String,
    pub content: String,
}

/// A scored search result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemoryHit {
    pub title: String,
    pub content: String,
    pub score: f64,
}

/// Free-text memory over past incidents and post-mortems.
#[async_trait::async_trait]
pub trait MemorySearch: Send + Sync {
    /// Store a document, returning its id.
    async fn store(&self, document: &MemoryDocument) -> Result<String, CollaboratorError>;

    /// Best matches for `query`, highest score first.
    async fn search(&self, query: &str, limit: usize) -> Result<Vec<MemoryHit>, CollaboratorError>;
}
