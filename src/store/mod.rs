//! SQLite event store backing the ingest server.
//!
//! One `events` table holds the unified record; correlation keys live in
//! dedicated indexed columns and the heterogeneous `properties` bag is
//! stored as JSON text queried via json_extract. The schema itself enforces
//! the hard invariants (closed event_type set, positive timestamp, valid
//! JSON properties) so no writer path can sneak bad rows in.
//!
//! # WAL Mode Concurrency
//!
//! The store uses WAL (Write-Ahead Logging) mode, which allows multiple
//! concurrent readers while one writer is active. A small r2d2 pool serves
//! both; SQLite serializes the write transactions.

pub mod query;

use crate::config::Environment;
use crate::events::Event;
use anyhow::Context;
use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::{params, Connection, Transaction};
use serde::Serialize;
use std::path::Path;

/// Per-event outcome counts for one ingest request
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct IngestStats {
    pub processed: usize,
    pub skipped: usize,
    pub errors: usize,
}

/// Pooled SQLite event store
pub struct EventStore {
    pool: Pool<SqliteConnectionManager>,
    environment: Environment,
}

impl EventStore {
    /// Open (or create) the store at `path`
    pub fn open(path: &Path, environment: Environment) -> anyhow::Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).context("Failed to create database directory")?;
        }

        let manager = SqliteConnectionManager::file(path).with_init(|conn| {
            conn.execute_batch(
                r#"
                PRAGMA journal_mode=WAL;
                PRAGMA synchronous=NORMAL;
                PRAGMA busy_timeout=5000;
                "#,
            )
        });
        let pool = Pool::builder()
            .max_size(4)
            .build(manager)
            .context("Failed to create connection pool")?;

        Self::init_schema(&*pool.get()?)?;

        Ok(Self { pool, environment })
    }

    /// Connection pool handle for the query layer
    pub fn pool(&self) -> Pool<SqliteConnectionManager> {
        self.pool.clone()
    }

    /// Initialize schema and run migrations
    fn init_schema(conn: &Connection) -> anyhow::Result<()> {
        // Check current schema version
        let current_version: i32 = conn
            .query_row(
                "SELECT COALESCE(
                    (SELECT CAST(value AS INTEGER) FROM metadata WHERE key = 'schema_version'),
                    0
                )",
                [],
                |row| row.get(0),
            )
            .unwrap_or(0);

        if current_version < 1 {
            Self::apply_schema_v1(conn)?;
        }

        Ok(())
    }

    /// Initial schema (v1): the unified events table plus its indexes
    fn apply_schema_v1(conn: &Connection) -> anyhow::Result<()> {
        conn.execute_batch(
            r#"
            -- Metadata table (created first for version tracking)
            CREATE TABLE IF NOT EXISTS metadata (
                key TEXT PRIMARY KEY,
                value TEXT
            );

            -- Unified event table
            CREATE TABLE IF NOT EXISTS events (
                event_id TEXT PRIMARY KEY,
                user_id TEXT NOT NULL CHECK (length(user_id) > 0),
                event_type TEXT NOT NULL CHECK (event_type IN (
                    'turn_created', 'turn_completed', 'turn_failed',
                    'user_action', 'vote_cast', 'journey_step',
                    'conversation_started', 'conversation_ended',
                    'regeneration_requested', 'frustration_detected'
                )),
                timestamp INTEGER NOT NULL CHECK (timestamp > 0),
                properties TEXT NOT NULL DEFAULT '{}' CHECK (json_valid(properties)),
                prompt_text TEXT,
                ai_response TEXT,

                -- Correlation keys promoted for index efficiency
                journey_id TEXT,
                conversation_id TEXT,
                turn_sequence INTEGER,
                turn_id TEXT
            );

            CREATE INDEX IF NOT EXISTS idx_events_user_time ON events(user_id, timestamp);
            CREATE INDEX IF NOT EXISTS idx_events_type_time ON events(event_type, timestamp);
            CREATE INDEX IF NOT EXISTS idx_events_time ON events(timestamp);
            CREATE INDEX IF NOT EXISTS idx_events_user ON events(user_id);
            CREATE INDEX IF NOT EXISTS idx_events_journey_time ON events(journey_id, timestamp);
            CREATE INDEX IF NOT EXISTS idx_events_conversation ON events(conversation_id, turn_sequence, timestamp);
            CREATE INDEX IF NOT EXISTS idx_events_turn_time ON events(turn_id, timestamp);

            -- Set initial version
            INSERT INTO metadata (key, value) VALUES ('schema_version', '1');
            "#,
        )?;

        Ok(())
    }

    /// Transactional multi-event insert. Validation rejects the batch
    /// wholesale: either every event lands or none do. Duplicate event_ids
    /// are silent no-ops (idempotent insert).
    pub fn insert_events(&self, events: &[Event]) -> anyhow::Result<()> {
        for event in events {
            event
                .validate()
                .with_context(|| format!("invalid event {}", event.event_id))?;
        }

        let mut conn = self.pool.get()?;
        let tx = conn.transaction()?;
        for event in events {
            Self::insert_row(&tx, event)?;
        }
        tx.commit()?;

        tracing::debug!("Inserted {} events", events.len());
        Ok(())
    }

    /// Per-event ingest used by the HTTP handler: each element is converted
    /// and validated individually so one bad event never poisons the batch.
    /// Runs in a single transaction.
    pub fn ingest(&self, raw_events: Vec<serde_json::Value>) -> anyhow::Result<IngestStats> {
        let mut stats = IngestStats::default();

        let mut conn = self.pool.get()?;
        let tx = conn.transaction()?;

        for raw in raw_events {
            let mut event: Event = match serde_json::from_value(raw) {
                Ok(event) => event,
                Err(e) => {
                    tracing::debug!("Rejected malformed event: {}", e);
                    stats.errors += 1;
                    continue;
                }
            };
            event.promote_correlation_keys();

            if let Err(e) = event.validate() {
                tracing::debug!("Rejected invalid event {}: {}", event.event_id, e);
                stats.errors += 1;
                continue;
            }

            if Self::exists(&tx, &event.event_id)? {
                stats.skipped += 1;
                continue;
            }

            Self::insert_row(&tx, &event)?;
            stats.processed += 1;
        }

        tx.commit()?;
        Ok(stats)
    }

    fn exists(tx: &Transaction<'_>, event_id: &str) -> anyhow::Result<bool> {
        let found: bool = tx.query_row(
            "SELECT COUNT(*) > 0 FROM events WHERE event_id = ?1",
            params![event_id],
            |row| row.get(0),
        )?;
        Ok(found)
    }

    fn insert_row(tx: &Transaction<'_>, event: &Event) -> anyhow::Result<()> {
        tx.execute(
            "INSERT OR IGNORE INTO events (
                event_id, user_id, event_type, timestamp, properties,
                prompt_text, ai_response,
                journey_id, conversation_id, turn_sequence, turn_id
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
            params![
                event.event_id,
                event.user_id,
                event.event_type.as_str(),
                event.timestamp,
                serde_json::to_string(&event.properties)?,
                event.prompt_text,
                event.ai_response,
                event.journey_id,
                event.conversation_id,
                event.turn_sequence,
                event.turn_id,
            ],
        )?;
        Ok(())
    }

    /// Execute arbitrary SQL and return rows as JSON objects.
    ///
    /// Development/test tooling only. Hosted deployments set
    /// BILAN_ENV=production, which disables this path entirely.
    pub fn execute_raw_sql(&self, sql: &str) -> anyhow::Result<Vec<serde_json::Value>> {
        if self.environment == Environment::Production {
            anyhow::bail!("Raw SQL execution is disabled in production environments");
        }

        let conn = self.pool.get()?;
        let mut stmt = conn.prepare(sql)?;
        let column_names: Vec<String> = stmt.column_names().iter().map(|s| s.to_string()).collect();

        let rows = stmt.query_map([], |row| {
            let mut object = serde_json::Map::new();
            for (i, name) in column_names.iter().enumerate() {
                let value = match row.get_ref(i)? {
                    rusqlite::types::ValueRef::Null => serde_json::Value::Null,
                    rusqlite::types::ValueRef::Integer(n) => serde_json::Value::from(n),
                    rusqlite::types::ValueRef::Real(f) => serde_json::Value::from(f),
                    rusqlite::types::ValueRef::Text(t) => {
                        serde_json::Value::from(String::from_utf8_lossy(t).into_owned())
                    }
                    rusqlite::types::ValueRef::Blob(_) => serde_json::Value::Null,
                };
                object.insert(name.clone(), value);
            }
            Ok(serde_json::Value::Object(object))
        })?;

        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use std::path::PathBuf;

    /// Unique temp database path per test
    pub fn temp_db(tag: &str) -> PathBuf {
        std::env::temp_dir().join(format!(
            "bilan-store-{}-{}.db",
            tag,
            crate::events::new_event_id()
        ))
    }

    pub fn open_store(tag: &str) -> EventStore {
        EventStore::open(&temp_db(tag), Environment::Development).unwrap()
    }
}
