//! Query interface for the event store.
//!
//! Serves the correlation surface: filtered event reads, turn↔vote joins,
//! and the diagnostic aggregates used to watch relationship-key capture
//! rates. Reads go through the same pooled connections as writes; WAL mode
//! keeps them from blocking each other.
//!
//! The turn id filter matches the dedicated column OR the JSON property
//! (both casings) so records written before the column promotion existed
//! are still reachable.

use crate::events::{now_ms, Event, EventType};
use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::types::ToSql;
use rusqlite::Row;
use serde::{Deserialize, Serialize};

/// Default page size when a filter does not set a limit
const DEFAULT_LIMIT: usize = 100;

/// Predicates accepted by get_events / get_events_count
#[derive(Debug, Clone, Default, Deserialize)]
pub struct EventFilters {
    pub user_id: Option<String>,
    /// One or more event types; empty means no type filter
    #[serde(default)]
    pub event_types: Vec<EventType>,
    pub turn_id: Option<String>,
    pub start_ts: Option<i64>,
    pub end_ts: Option<i64>,
    pub limit: Option<usize>,
    pub offset: Option<usize>,
}

/// One turn lifecycle event left-joined to its vote, if any
#[derive(Debug, Clone, Serialize)]
pub struct TurnVoteCorrelation {
    pub turn_id: String,
    pub turn_event_id: String,
    pub turn_event_type: EventType,
    pub turn_timestamp: i64,
    pub journey_id: Option<String>,
    pub conversation_id: Option<String>,
    pub turn_sequence: Option<i64>,
    pub vote_event_id: Option<String>,
    pub vote_timestamp: Option<i64>,
    pub vote_value: Option<i64>,
    pub vote_comment: Option<String>,
}

/// Per-event-type turn id coverage (migration diagnostic)
#[derive(Debug, Clone, Serialize)]
pub struct TurnIdMigrationRow {
    pub event_type: String,
    pub total: i64,
    /// Rows with the promoted turn_id column set
    pub with_column: i64,
    /// Rows carrying a turn id only inside properties
    pub with_property: i64,
}

/// Relationship-column population rates over a recent window
#[derive(Debug, Clone, Serialize)]
pub struct RelationshipCapture {
    pub window_hours: i64,
    pub total: i64,
    pub by_event_type: Vec<(String, i64)>,
    pub journey_rate: f64,
    pub conversation_rate: f64,
    pub turn_sequence_rate: f64,
    pub turn_id_rate: f64,
}

/// Read-side handle over the event store
pub struct EventQuery {
    pool: Pool<SqliteConnectionManager>,
}

impl EventQuery {
    pub fn new(pool: Pool<SqliteConnectionManager>) -> Self {
        Self { pool }
    }

    /// Fetch events matching the filters, newest first
    pub fn get_events(&self, filters: &EventFilters) -> anyhow::Result<Vec<Event>> {
        let (where_clause, params) = build_where(filters);
        let limit = filters.limit.unwrap_or(DEFAULT_LIMIT);
        let offset = filters.offset.unwrap_or(0);

        let sql = format!(
            "SELECT event_id, user_id, event_type, timestamp, properties,
                    prompt_text, ai_response, journey_id, conversation_id,
                    turn_sequence, turn_id
             FROM events{}
             ORDER BY timestamp DESC, rowid DESC
             LIMIT {} OFFSET {}",
            where_clause, limit, offset
        );

        let conn = self.pool.get()?;
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(
            rusqlite::params_from_iter(params.iter().map(|p| p.as_ref())),
            row_to_event,
        )?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    /// Count events matching the same predicates as get_events
    pub fn get_events_count(&self, filters: &EventFilters) -> anyhow::Result<i64> {
        let (where_clause, params) = build_where(filters);
        let sql = format!("SELECT COUNT(*) FROM events{}", where_clause);

        let conn = self.pool.get()?;
        let count = conn.query_row(
            &sql,
            rusqlite::params_from_iter(params.iter().map(|p| p.as_ref())),
            |row| row.get(0),
        )?;
        Ok(count)
    }

    /// Every event referencing the turn id (column or property), oldest
    /// first - the emission order of the turn's lifecycle
    pub fn get_events_by_turn_id(&self, turn_id: &str) -> anyhow::Result<Vec<Event>> {
        let sql = "SELECT event_id, user_id, event_type, timestamp, properties,
                          prompt_text, ai_response, journey_id, conversation_id,
                          turn_sequence, turn_id
                   FROM events
                   WHERE turn_id = ?1
                      OR json_extract(properties, '$.turn_id') = ?1
                      OR json_extract(properties, '$.turnId') = ?1
                   ORDER BY timestamp ASC, rowid ASC";

        let conn = self.pool.get()?;
        let mut stmt = conn.prepare(sql)?;
        let rows = stmt.query_map([turn_id], row_to_event)?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    /// Left-join the turn's lifecycle event to its vote_cast counterpart.
    /// Prefers the settled event (completed/failed) over turn_created and
    /// returns the single most recent pairing.
    pub fn get_turn_vote_correlation(
        &self,
        turn_id: &str,
    ) -> anyhow::Result<Option<TurnVoteCorrelation>> {
        let sql = r#"
            SELECT ?1,
                   t.event_id, t.event_type, t.timestamp,
                   t.journey_id, t.conversation_id, t.turn_sequence,
                   v.event_id, v.timestamp,
                   CAST(json_extract(v.properties, '$.value') AS INTEGER),
                   json_extract(v.properties, '$.comment')
            FROM events t
            LEFT JOIN events v
              ON v.event_type = 'vote_cast'
             AND (v.turn_id = ?1
                  OR json_extract(v.properties, '$.turn_id') = ?1
                  OR json_extract(v.properties, '$.turnId') = ?1
                  OR json_extract(v.properties, '$.prompt_id') = ?1)
            WHERE t.event_type IN ('turn_created', 'turn_completed', 'turn_failed')
              AND (t.turn_id = ?1
                   OR json_extract(t.properties, '$.turn_id') = ?1
                   OR json_extract(t.properties, '$.turnId') = ?1)
            ORDER BY CASE t.event_type WHEN 'turn_created' THEN 1 ELSE 0 END,
                     t.timestamp DESC,
                     v.timestamp DESC
            LIMIT 1
        "#;

        let conn = self.pool.get()?;
        let mut stmt = conn.prepare(sql)?;
        let mut rows = stmt.query_map([turn_id], |row| {
            Ok(TurnVoteCorrelation {
                turn_id: row.get(0)?,
                turn_event_id: row.get(1)?,
                turn_event_type: parse_event_type(row, 2)?,
                turn_timestamp: row.get(3)?,
                journey_id: row.get(4)?,
                conversation_id: row.get(5)?,
                turn_sequence: row.get(6)?,
                vote_event_id: row.get(7)?,
                vote_timestamp: row.get(8)?,
                vote_value: row.get(9)?,
                vote_comment: row.get(10)?,
            })
        })?;

        Ok(rows.next().transpose()?)
    }

    /// Per-event-type coverage of the promoted turn_id column versus the
    /// legacy property-only form
    pub fn validate_turn_id_migration(&self) -> anyhow::Result<Vec<TurnIdMigrationRow>> {
        let sql = "SELECT event_type,
                          COUNT(*),
                          SUM(CASE WHEN turn_id IS NOT NULL THEN 1 ELSE 0 END),
                          SUM(CASE WHEN turn_id IS NULL
                                    AND (json_extract(properties, '$.turn_id') IS NOT NULL
                                         OR json_extract(properties, '$.turnId') IS NOT NULL)
                                   THEN 1 ELSE 0 END)
                   FROM events
                   GROUP BY event_type
                   ORDER BY event_type";

        let conn = self.pool.get()?;
        let mut stmt = conn.prepare(sql)?;
        let rows = stmt.query_map([], |row| {
            Ok(TurnIdMigrationRow {
                event_type: row.get(0)?,
                total: row.get(1)?,
                with_column: row.get(2)?,
                with_property: row.get(3)?,
            })
        })?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    /// Relationship-column population rates over the last `window_hours`
    pub fn validate_relationship_capture(
        &self,
        window_hours: i64,
    ) -> anyhow::Result<RelationshipCapture> {
        let cutoff = now_ms() - window_hours * 3_600_000;
        let conn = self.pool.get()?;

        let (total, journeys, conversations, sequences, turns): (i64, i64, i64, i64, i64) = conn
            .query_row(
                "SELECT COUNT(*),
                        SUM(CASE WHEN journey_id IS NOT NULL THEN 1 ELSE 0 END),
                        SUM(CASE WHEN conversation_id IS NOT NULL THEN 1 ELSE 0 END),
                        SUM(CASE WHEN turn_sequence IS NOT NULL THEN 1 ELSE 0 END),
                        SUM(CASE WHEN turn_id IS NOT NULL THEN 1 ELSE 0 END)
                 FROM events
                 WHERE timestamp >= ?1",
                [cutoff],
                |row| {
                    Ok((
                        row.get(0)?,
                        row.get::<_, Option<i64>>(1)?.unwrap_or(0),
                        row.get::<_, Option<i64>>(2)?.unwrap_or(0),
                        row.get::<_, Option<i64>>(3)?.unwrap_or(0),
                        row.get::<_, Option<i64>>(4)?.unwrap_or(0),
                    ))
                },
            )?;

        let mut stmt = conn.prepare(
            "SELECT event_type, COUNT(*)
             FROM events
             WHERE timestamp >= ?1
             GROUP BY event_type
             ORDER BY event_type",
        )?;
        let by_event_type = stmt
            .query_map([cutoff], |row| Ok((row.get(0)?, row.get(1)?)))?
            .collect::<Result<Vec<(String, i64)>, _>>()?;

        let rate = |n: i64| if total > 0 { n as f64 / total as f64 } else { 0.0 };

        Ok(RelationshipCapture {
            window_hours,
            total,
            by_event_type,
            journey_rate: rate(journeys),
            conversation_rate: rate(conversations),
            turn_sequence_rate: rate(sequences),
            turn_id_rate: rate(turns),
        })
    }
}

/// Build the WHERE clause for the shared filter predicates
fn build_where(filters: &EventFilters) -> (String, Vec<Box<dyn ToSql>>) {
    let mut conditions: Vec<String> = Vec::new();
    let mut params: Vec<Box<dyn ToSql>> = Vec::new();

    if let Some(user_id) = &filters.user_id {
        params.push(Box::new(user_id.clone()));
        conditions.push(format!("user_id = ?{}", params.len()));
    }

    if !filters.event_types.is_empty() {
        let mut placeholders = Vec::new();
        for event_type in &filters.event_types {
            params.push(Box::new(event_type.as_str().to_string()));
            placeholders.push(format!("?{}", params.len()));
        }
        conditions.push(format!("event_type IN ({})", placeholders.join(", ")));
    }

    if let Some(turn_id) = &filters.turn_id {
        params.push(Box::new(turn_id.clone()));
        let n = params.len();
        conditions.push(format!(
            "(turn_id = ?{n} \
              OR json_extract(properties, '$.turn_id') = ?{n} \
              OR json_extract(properties, '$.turnId') = ?{n})"
        ));
    }

    if let Some(start_ts) = filters.start_ts {
        params.push(Box::new(start_ts));
        conditions.push(format!("timestamp >= ?{}", params.len()));
    }

    if let Some(end_ts) = filters.end_ts {
        params.push(Box::new(end_ts));
        conditions.push(format!("timestamp <= ?{}", params.len()));
    }

    if conditions.is_empty() {
        (String::new(), params)
    } else {
        (format!(" WHERE {}", conditions.join(" AND ")), params)
    }
}

/// Reconstruct an Event from the standard column order
fn row_to_event(row: &Row<'_>) -> rusqlite::Result<Event> {
    let properties_raw: String = row.get(4)?;
    let properties = serde_json::from_str(&properties_raw).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(4, rusqlite::types::Type::Text, Box::new(e))
    })?;

    Ok(Event {
        event_id: row.get(0)?,
        user_id: row.get(1)?,
        event_type: parse_event_type(row, 2)?,
        timestamp: row.get(3)?,
        properties,
        prompt_text: row.get(5)?,
        ai_response: row.get(6)?,
        journey_id: row.get(7)?,
        conversation_id: row.get(8)?,
        turn_sequence: row.get(9)?,
        turn_id: row.get(10)?,
    })
}

fn parse_event_type(row: &Row<'_>, idx: usize) -> rusqlite::Result<EventType> {
    let raw: String = row.get(idx)?;
    serde_json::from_value(serde_json::Value::String(raw)).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(e))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::test_support::open_store;
    use crate::store::EventStore;
    use serde_json::{json, Map, Value};

    fn event(id: &str, event_type: EventType, ts: i64, props: &[(&str, Value)]) -> Event {
        let properties: Map<String, Value> =
            props.iter().map(|(k, v)| (k.to_string(), v.clone())).collect();
        let mut e = Event::new(event_type, "u1", properties);
        e.event_id = id.to_string();
        e.timestamp = ts;
        e
    }

    fn seeded() -> (EventStore, EventQuery) {
        let store = open_store("query");
        store
            .insert_events(&[
                event("E1", EventType::TurnCreated, 1000, &[("turn_id", json!("turn_a"))]),
                event(
                    "E2",
                    EventType::TurnCompleted,
                    2000,
                    &[("turn_id", json!("turn_a")), ("status", json!("success"))],
                ),
                event(
                    "E3",
                    EventType::VoteCast,
                    3000,
                    &[("value", json!(1)), ("turn_id", json!("turn_a")), ("comment", json!("nice"))],
                ),
                event("E4", EventType::UserAction, 4000, &[]),
                event("E5", EventType::TurnCreated, 5000, &[("turn_id", json!("turn_b"))]),
            ])
            .unwrap();
        let query = EventQuery::new(store.pool());
        (store, query)
    }

    #[test]
    fn test_get_events_orders_newest_first() {
        let (_store, query) = seeded();
        let events = query.get_events(&EventFilters::default()).unwrap();
        let ids: Vec<&str> = events.iter().map(|e| e.event_id.as_str()).collect();
        assert_eq!(ids, vec!["E5", "E4", "E3", "E2", "E1"]);
    }

    #[test]
    fn test_get_events_filters_by_type_list() {
        let (_store, query) = seeded();
        let filters = EventFilters {
            event_types: vec![EventType::TurnCreated, EventType::TurnCompleted],
            ..Default::default()
        };
        let events = query.get_events(&filters).unwrap();
        let ids: Vec<&str> = events.iter().map(|e| e.event_id.as_str()).collect();
        assert_eq!(ids, vec!["E5", "E2", "E1"]);
    }

    #[test]
    fn test_get_events_time_window_and_paging() {
        let (_store, query) = seeded();
        let filters = EventFilters {
            start_ts: Some(2000),
            end_ts: Some(4000),
            limit: Some(2),
            offset: Some(1),
            ..Default::default()
        };
        let events = query.get_events(&filters).unwrap();
        let ids: Vec<&str> = events.iter().map(|e| e.event_id.as_str()).collect();
        // Window is [E4, E3, E2] newest-first; offset 1, limit 2
        assert_eq!(ids, vec!["E3", "E2"]);
    }

    #[test]
    fn test_get_events_by_turn_id_bridges_property_records() {
        let (_store, query) = seeded();
        let filters = EventFilters {
            turn_id: Some("turn_a".into()),
            ..Default::default()
        };
        let events = query.get_events(&filters).unwrap();
        assert_eq!(events.len(), 3);
        assert_eq!(query.get_events_count(&filters).unwrap(), 3);
    }

    #[test]
    fn test_turn_id_filter_matches_property_only_rows() {
        let store = open_store("legacy");
        // Legacy row: turn id only inside properties, column never promoted
        store
            .execute_raw_sql(
                r#"INSERT INTO events (event_id, user_id, event_type, timestamp, properties)
                   VALUES ('L1', 'u1', 'vote_cast', 100, '{"value": 1, "turnId": "turn_z"}')"#,
            )
            .unwrap();
        let query = EventQuery::new(store.pool());

        let filters = EventFilters {
            turn_id: Some("turn_z".into()),
            ..Default::default()
        };
        assert_eq!(query.get_events_count(&filters).unwrap(), 1);
        assert_eq!(query.get_events_by_turn_id("turn_z").unwrap().len(), 1);
    }

    #[test]
    fn test_get_events_count_matches_get_events() {
        let (_store, query) = seeded();
        let filters = EventFilters {
            user_id: Some("u1".into()),
            ..Default::default()
        };
        assert_eq!(query.get_events_count(&filters).unwrap(), 5);
        assert_eq!(
            query.get_events_count(&EventFilters {
                user_id: Some("nobody".into()),
                ..Default::default()
            })
            .unwrap(),
            0
        );
    }

    #[test]
    fn test_get_events_by_turn_id_emission_order() {
        let (_store, query) = seeded();
        let events = query.get_events_by_turn_id("turn_a").unwrap();
        let ids: Vec<&str> = events.iter().map(|e| e.event_id.as_str()).collect();
        assert_eq!(ids, vec!["E1", "E2", "E3"]);
    }

    #[test]
    fn test_turn_vote_correlation_joins_vote() {
        let (_store, query) = seeded();
        let row = query.get_turn_vote_correlation("turn_a").unwrap().unwrap();
        assert_eq!(row.turn_id, "turn_a");
        assert_eq!(row.turn_event_type, EventType::TurnCompleted);
        assert_eq!(row.vote_event_id.as_deref(), Some("E3"));
        assert_eq!(row.vote_value, Some(1));
        assert_eq!(row.vote_comment.as_deref(), Some("nice"));
    }

    #[test]
    fn test_turn_vote_correlation_without_vote() {
        let (_store, query) = seeded();
        let row = query.get_turn_vote_correlation("turn_b").unwrap().unwrap();
        assert_eq!(row.turn_event_id, "E5");
        assert!(row.vote_event_id.is_none());
        assert!(row.vote_value.is_none());
    }

    #[test]
    fn test_turn_vote_correlation_unknown_turn() {
        let (_store, query) = seeded();
        assert!(query.get_turn_vote_correlation("turn_missing").unwrap().is_none());
    }

    #[test]
    fn test_validate_turn_id_migration_counts() {
        let (store, query) = seeded();
        // One legacy property-only row
        store
            .execute_raw_sql(
                r#"INSERT INTO events (event_id, user_id, event_type, timestamp, properties)
                   VALUES ('L1', 'u1', 'vote_cast', 100, '{"value": 1, "turn_id": "turn_x"}')"#,
            )
            .unwrap();

        let rows = query.validate_turn_id_migration().unwrap();
        let vote_row = rows.iter().find(|r| r.event_type == "vote_cast").unwrap();
        assert_eq!(vote_row.total, 2);
        assert_eq!(vote_row.with_column, 1);
        assert_eq!(vote_row.with_property, 1);

        let action_row = rows.iter().find(|r| r.event_type == "user_action").unwrap();
        assert_eq!(action_row.with_column, 0);
    }

    #[test]
    fn test_validate_relationship_capture_rates() {
        let store = open_store("capture");
        let now = now_ms();
        store
            .insert_events(&[
                event("E1", EventType::TurnCompleted, now, &[("turn_id", json!("turn_a"))]),
                event("E2", EventType::UserAction, now, &[]),
                // Outside any reasonable window
                event("E3", EventType::UserAction, 1, &[]),
            ])
            .unwrap();
        let query = EventQuery::new(store.pool());

        let capture = query.validate_relationship_capture(24).unwrap();
        assert_eq!(capture.total, 2);
        assert!((capture.turn_id_rate - 0.5).abs() < f64::EPSILON);
        assert!((capture.journey_rate - 0.0).abs() < f64::EPSILON);
        assert_eq!(
            capture.by_event_type,
            vec![("turn_completed".to_string(), 1), ("user_action".to_string(), 1)]
        );
    }

    #[test]
    fn test_row_round_trips_properties() {
        let (_store, query) = seeded();
        let events = query.get_events_by_turn_id("turn_a").unwrap();
        assert_eq!(events[1].properties["status"], json!("success"));
        assert_eq!(events[1].turn_id.as_deref(), Some("turn_a"));
    }
}
