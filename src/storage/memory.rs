//! SQLite-backed keyword memory search.
//!
//! Scoring is the fraction of distinct query terms (three or more
//! characters) found in a document's title or content.

use std::collections::BTreeSet;

use chrono::Utc;
use rusqlite::params;
use uuid::Uuid;

use super::{format_ts, MemoryDocument, MemoryHit, MemorySearch, Pool};
use crate::error::CollaboratorError;

const MIN_TERM_LEN: usize = 3;

pub struct SqliteMemorySearch {
    pool: Pool,
}

impl SqliteMemorySearch {
    pub fn new(pool: Pool) -> Self {
        Self { pool }
    }
}

fn query_terms(query: &str) -> BTreeSet<String> {
    query
        .split(|c: char| !c.is_alphanumeric() && c != '-')
        .map(|t| t.trim_matches('-').to_lowercase())
        .filter(|t| t.chars().count() >= MIN_TERM_LEN)
        .collect()
}

fn score(terms: &BTreeSet<String>, title: &str, content: &str) -> f64 {
    if terms.is_empty() {
        return 0.0;
    }
    let haystack = format!("{}\n{}", title, content).to_lowercase();
    let hits = terms.iter().filter(|t| haystack.contains(t.as_str())).count();
    hits as f64 / terms.len() as f64
}

#[async_trait::async_trait]
impl MemorySearch for SqliteMemorySearch {
    async fn store(&self, document: &MemoryDocument) -> Result<String, CollaboratorError> {
        let pool = self.pool.clone();
        let doc = document.clone();
        tokio::task::spawn_blocking(move || -> Result<String, CollaboratorError> {
            let conn = pool.get()?;
            let id = Uuid::new_v4().to_string();
            conn.execute(
                "INSERT INTO memory_documents (id, title, content, created_at) VALUES (?1, ?2, ?3, ?4)",
                params![id, doc.title, doc.content, format_ts(&Utc::now())],
            )?;
            Ok(id)
        })
        .await?
    }

    async fn search(&self, query: &str, limit: usize) -> Result<Vec<MemoryHit>, CollaboratorError> {
        let terms = query_terms(query);
        if terms.is_empty() || limit == 0 {
            return Ok(Vec::new());
        }
        let pool = self.pool.clone();
        tokio::task::spawn_blocking(move || -> Result<Vec<MemoryHit>, CollaboratorError> {
            let conn = pool.get()?;
            // Newest first so equal scores keep recency order after the stable sort.
            let mut stmt = conn.prepare(
                "SELECT title, content FROM memory_documents ORDER BY created_at DESC, rowid DESC",
            )?;
            let rows = stmt.query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?)))?;

            let mut hits = Vec::new();
            for r in rows {
                let (title, content) = r?;
                let relevance = score(&terms, &title, &content);
                if relevance > 0.0 {
                    hits.push(MemoryHit { title, content, score: relevance });
                }
            }
            hits.sort_by(|a, b| b.score.total_cmp(&a.score));
            hits.truncate(limit);
            Ok(hits)
        })
        .await?
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::open_pool;

    fn memory() -> (tempfile::TempDir, SqliteMemorySearch) {
        let dir = tempfile::tempdir().unwrap();
        let pool = open_pool(dir.path().join("mem.db").to_str().unwrap()).unwrap();
        (dir, SqliteMemorySearch::new(pool))
    }

    fn doc(title: &str, content: &str) -> MemoryDocument {
        MemoryDocument {
            title: title.into(),
            content: content.into(),
        }
    }

    #[test]
    fn test_query_terms() {
        let terms = query_terms("Service unhealthy: ghost-api is down");
        assert!(terms.contains("ghost-api"));
        assert!(terms.contains("unhealthy"));
        assert!(!terms.contains("is"));
    }

    #[tokio::test]
    async fn test_search_ranks_by_term_overlap() {
        let (_dir, mem) = memory();
        mem.store(&doc("Post-mortem: ghost-api outage", "restart failed, scaled to 2")).await.unwrap();
        mem.store(&doc("Post-mortem: billing latency", "cache warmed")).await.unwrap();
        mem.store(&doc("Unrelated", "nothing to see")).await.unwrap();

        let hits = mem.search("ghost-api outage", 5).await.unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].title, "Post-mortem: ghost-api outage");
        assert!((hits[0].score - 1.0).abs() < f64::EPSILON);
    }

    #[tokio::test]
    async fn test_search_limit_and_empty_query() {
        let (_dir, mem) = memory();
        for i in 0..4 {
            mem.store(&doc(&format!("redis incident {}", i), "eviction storm")).await.unwrap();
        }
        assert_eq!(mem.search("redis eviction", 2).await.unwrap().len(), 2);
        assert!(mem.search("a b", 5).await.unwrap().is_empty());
    }
}
