//! SQLite-backed incident history.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use tracing::debug;
use uuid::Uuid;

use super::{format_ts, parse_ts, IncidentStore, Pool};
use crate::error::CollaboratorError;
use crate::incident::{ActionType, Incident, PostMortem, RemediationAction, Severity};

pub struct SqliteIncidentStore {
    pool: Pool,
}

/// Raw columns of an `incidents` row before decoding.
struct IncidentRow {
    id: String,
    title: String,
    summary: String,
    severity: String,
    detected_at: String,
    services_json: String,
    errors_json: String,
    root_cause: Option<String>,
    signals_json: String,
    resolved_at: Option<String>,
}

const INCIDENT_COLUMNS: &str = "id, title, summary, severity, detected_at, services_json, errors_json, root_cause, signals_json, resolved_at";

impl SqliteIncidentStore {
    pub fn new(pool: Pool) -> Self {
        Self { pool }
    }

    /// Run `f` on a pooled connection off the async runtime.
    async fn with_conn<T, F>(&self, f: F) -> Result<T, CollaboratorError>
    where
        F: FnOnce(&Connection) -> Result<T, CollaboratorError> + Send + 'static,
        T: Send + 'static,
    {
        let pool = self.pool.clone();
        tokio::task::spawn_blocking(move || -> Result<T, CollaboratorError> {
            let conn = pool.get()?;
            f(&conn)
        })
        .await?
    }
}

fn parse_uuid(s: &str) -> Result<Uuid, CollaboratorError> {
    Uuid::parse_str(s).map_err(|e| CollaboratorError::Corrupt(format!("id '{}': {}", s, e)))
}

fn insert_action(conn: &Connection, incident_id: Uuid, action: &RemediationAction) -> Result<(), CollaboratorError> {
    conn.execute(
        "INSERT INTO remediation_actions
            (id, incident_id, seq, action_type, target_service, description, reasoning, executed_at, success, validated)
         VALUES (?1, ?2,
            (SELECT COALESCE(MAX(seq), -1) + 1 FROM remediation_actions WHERE incident_id = ?2),
            ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
        params![
            action.id.to_string(),
            incident_id.to_string(),
            action.action_type.as_str(),
            action.target_service,
            action.description,
            action.reasoning,
            format_ts(&action.executed_at),
            action.success,
            action.validated,
        ],
    )?;
    Ok(())
}

fn load_actions(conn: &Connection, incident_id: &str) -> Result<Vec<RemediationAction>, CollaboratorError> {
    let mut stmt = conn.prepare(
        "SELECT id, action_type, target_service, description, reasoning, executed_at, success, validated
         FROM remediation_actions WHERE incident_id = ?1 ORDER BY seq ASC",
    )?;
    let rows = stmt.query_map(params![incident_id], |row| {
        Ok((
            row.get::<_, String>(0)?,
            row.get::<_, String>(1)?,
            row.get::<_, String>(2)?,
            row.get::<_, String>(3)?,
            row.get::<_, Option<String>>(4)?,
            row.get::<_, String>(5)?,
            row.get::<_, bool>(6)?,
            row.get::<_, Option<bool>>(7)?,
        ))
    })?;

    let mut actions = Vec::new();
    for r in rows {
        let (id, kind, target_service, description, reasoning, executed_at, success, validated) = r?;
        let action_type = ActionType::parse(&kind)
            .ok_or_else(|| CollaboratorError::Corrupt(format!("action type '{}'", kind)))?;
        actions.push(RemediationAction {
            id: parse_uuid(&id)?,
            action_type,
            target_service,
            description,
            reasoning,
            executed_at: parse_ts(&executed_at)?,
            success,
            validated,
        });
    }
    Ok(actions)
}

fn load_post_mortem(conn: &Connection, incident_id: &str) -> Result<Option<PostMortem>, CollaboratorError> {
    let body: Option<String> = conn
        .query_row(
            "SELECT body_json FROM post_mortems WHERE incident_id = ?1",
            params![incident_id],
            |row| row.get(0),
        )
        .optional()?;
    match body {
        Some(json) => Ok(Some(serde_json::from_str(&json)?)),
        None => Ok(None),
    }
}

fn query_incidents<P: rusqlite::Params>(conn: &Connection, sql: &str, params: P) -> Result<Vec<IncidentRow>, CollaboratorError> {
    let mut stmt = conn.prepare(sql)?;
    let rows = stmt.query_map(params, |row| {
        Ok(IncidentRow {
            id: row.get(0)?,
            title: row.get(1)?,
            summary: row.get(2)?,
            severity: row.get(3)?,
            detected_at: row.get(4)?,
            services_json: row.get(5)?,
            errors_json: row.get(6)?,
            root_cause: row.get(7)?,
            signals_json: row.get(8)?,
            resolved_at: row.get(9)?,
        })
    })?;
    let mut out = Vec::new();
    for r in rows {
        out.push(r?);
    }
    Ok(out)
}

fn hydrate(conn: &Connection, row: IncidentRow) -> Result<Incident, CollaboratorError> {
    let severity = Severity::parse(&row.severity)
        .ok_or_else(|| CollaboratorError::Corrupt(format!("severity '{}'", row.severity)))?;
    let resolved_at = match row.resolved_at {
        Some(ts) => Some(parse_ts(&ts)?),
        None => None,
    };
    Ok(Incident {
        id: parse_uuid(&row.id)?,
        title: row.title,
        summary: row.summary,
        severity,
        detected_at: parse_ts(&row.detected_at)?,
        services: serde_json::from_str(&row.services_json)?,
        errors: serde_json::from_str(&row.errors_json)?,
        root_cause: row.root_cause,
        signals: serde_json::from_str(&row.signals_json)?,
        remediation_actions: load_actions(conn, &row.id)?,
        resolved_at,
        post_mortem: load_post_mortem(conn, &row.id)?,
    })
}

fn load_incident(conn: &Connection, id: &str) -> Result<Option<Incident>, CollaboratorError> {
    let sql = format!("SELECT {} FROM incidents WHERE id = ?1", INCIDENT_COLUMNS);
    match query_incidents(conn, &sql, params![id])?.into_iter().next() {
        Some(row) => Ok(Some(hydrate(conn, row)?)),
        None => Ok(None),
    }
}

#[async_trait::async_trait]
impl IncidentStore for SqliteIncidentStore {
    async fn create_incident(&self, incident: &Incident) -> Result<(), CollaboratorError> {
        let incident = incident.clone();
        self.with_conn(move |conn| {
            conn.execute(
                "INSERT INTO incidents
                    (id, title, summary, severity, detected_at, services_json, errors_json, root_cause, signals_json, resolved_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
                params![
                    incident.id.to_string(),
                    incident.title,
                    incident.summary,
                    incident.severity.as_str(),
                    format_ts(&incident.detected_at),
                    serde_json::to_string(&incident.services)?,
                    serde_json::to_string(&incident.errors)?,
                    incident.root_cause,
                    serde_json::to_string(&incident.signals)?,
                    incident.resolved_at.as_ref().map(format_ts),
                ],
            )?;
            for action in &incident.remediation_actions {
                insert_action(conn, incident.id, action)?;
            }
            debug!(incident_id = %incident.id, "incident persisted");
            Ok(())
        })
        .await
    }

    async fn add_remediation(&self, incident_id: Uuid, action: &RemediationAction) -> Result<(), CollaboratorError> {
        let action = action.clone();
        self.with_conn(move |conn| insert_action(conn, incident_id, &action)).await
    }

    async fn update_validation(&self, action_id: Uuid, validated: bool) -> Result<(), CollaboratorError> {
        self.with_conn(move |conn| {
            let changed = conn.execute(
                "UPDATE remediation_actions SET validated = ?1 WHERE id = ?2",
                params![validated, action_id.to_string()],
            )?;
            if changed == 0 {
                return Err(CollaboratorError::NotFound(action_id.to_string()));
            }
            Ok(())
        })
        .await
    }

    async fn resolve_incident(&self, incident_id: Uuid, resolved_at: DateTime<Utc>) -> Result<(), CollaboratorError> {
        self.with_conn(move |conn| {
            let changed = conn.execute(
                "UPDATE incidents SET resolved_at = ?1 WHERE id = ?2",
                params![format_ts(&resolved_at), incident_id.to_string()],
            )?;
            if changed == 0 {
                return Err(CollaboratorError::NotFound(incident_id.to_string()));
            }
            Ok(())
        })
        .await
    }

    async fn add_post_mortem(&self, post_mortem: &PostMortem) -> Result<(), CollaboratorError> {
        let pm = post_mortem.clone();
        self.with_conn(move |conn| {
            conn.execute(
                "INSERT INTO post_mortems (incident_id, title, body_json, generated_at) VALUES (?1, ?2, ?3, ?4)",
                params![
                    pm.incident_id.to_string(),
                    pm.title,
                    serde_json::to_string(&pm)?,
                    format_ts(&pm.generated_at),
                ],
            )?;
            Ok(())
        })
        .await
    }

    async fn find_similar_incidents(
        &self,
        services: &BTreeSet<String>,
        errors: &BTreeSet<String>,
        limit: usize,
    ) -> Result<Vec<Incident>, CollaboratorError> {
        let services = services.clone();
        let errors = errors.clone();
        self.with_conn(move |conn| {
            // Only the overlap columns are read while scanning, and the scan
            // stops as soon as `limit` matches are found.
            let mut ids = Vec::new();
            {
                let mut stmt = conn.prepare(
                    "SELECT id, services_json, errors_json FROM incidents
                     ORDER BY detected_at DESC, rowid DESC",
                )?;
                let mut rows = stmt.query([])?;
                while ids.len() < limit {
                    let Some(row) = rows.next()? else {
                        break;
                    };
                    let overlaps = if services.is_empty() {
                        let past_errors: BTreeSet<String> = serde_json::from_str(&row.get::<_, String>(2)?)?;
                        !errors.is_disjoint(&past_errors)
                    } else {
                        let past_services: BTreeSet<String> = serde_json::from_str(&row.get::<_, String>(1)?)?;
                        !services.is_disjoint(&past_services)
                    };
                    if overlaps {
                        ids.push(row.get::<_, String>(0)?);
                    }
                }
            }

            let mut similar = Vec::with_capacity(ids.len());
            for id in &ids {
                if let Some(incident) = load_incident(conn, id)? {
                    similar.push(incident);
                }
            }
            Ok(similar)
        })
        .await
    }

    async fn get_incident(&self, id: Uuid) -> Result<Option<Incident>, CollaboratorError> {
        self.with_conn(move |conn| load_incident(conn, &id.to_string())).await
    }

    async fn list_recent(&self, limit: usize) -> Result<Vec<Incident>, CollaboratorError> {
        self.with_conn(move |conn| {
            let sql = format!(
                "SELECT {} FROM incidents ORDER BY detected_at DESC, rowid DESC LIMIT ?1",
                INCIDENT_COLUMNS
            );
            query_incidents(conn, &sql, params![limit as i64])?
                .into_iter()
                .map(|row| hydrate(conn, row))
                .collect()
        })
        .await
    }
}
