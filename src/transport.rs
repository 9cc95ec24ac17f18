// Flush-sink implementations: where batches go when the queue flushes.
//
// Local mode appends to the per-user events record in the local store,
// trimmed to the most recent 1,000 entries. Server mode POSTs the batch to
// the ingest endpoint with Bearer auth. Neither variant retries - a failed
// delivery propagates as a flush error, the queue requeues the batch, and
// the next flush cycle is the retry.

use crate::error::TransportError;
use crate::events::Event;
use crate::queue::EventSink;
use crate::storage::KeyValueStore;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;

/// Cap on locally retained events per user; oldest entries are trimmed
pub const LOCAL_EVENTS_CAP: usize = 1_000;

/// Store key holding the delivered-events record for a user
pub fn events_key(user_id: &str) -> String {
    format!("events:{}", user_id)
}

/// Appends batches to the local store under `events:<user_id>`
pub struct LocalTransport {
    store: Arc<dyn KeyValueStore>,
    user_id: String,
}

impl LocalTransport {
    pub fn new(store: Arc<dyn KeyValueStore>, user_id: impl Into<String>) -> Self {
        Self {
            store,
            user_id: user_id.into(),
        }
    }

    /// Read back the locally delivered events (used by stats)
    pub fn read_events(
        store: &dyn KeyValueStore,
        user_id: &str,
    ) -> Result<Vec<Event>, TransportError> {
        match store.get(&events_key(user_id))? {
            Some(raw) => Ok(serde_json::from_str(&raw)?),
            None => Ok(Vec::new()),
        }
    }
}

#[async_trait]
impl EventSink for LocalTransport {
    async fn deliver(&self, batch: &[Event]) -> Result<(), TransportError> {
        let key = events_key(&self.user_id);
        let mut events = match self.store.get(&key)? {
            Some(raw) => serde_json::from_str::<Vec<Event>>(&raw)?,
            None => Vec::new(),
        };
        events.extend_from_slice(batch);
        if events.len() > LOCAL_EVENTS_CAP {
            let excess = events.len() - LOCAL_EVENTS_CAP;
            events.drain(..excess);
        }
        self.store.set(&key, &serde_json::to_string(&events)?)?;
        tracing::debug!("Stored {} events locally ({} retained)", batch.len(), events.len());
        Ok(())
    }
}

/// POSTs batches to `{endpoint}/api/events` with Bearer auth
pub struct HttpTransport {
    client: reqwest::Client,
    endpoint: String,
    api_key: String,
}

impl HttpTransport {
    pub fn new(endpoint: impl Into<String>, api_key: impl Into<String>) -> Result<Self, TransportError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| TransportError::Network(e.to_string()))?;
        Ok(Self {
            client,
            endpoint: endpoint.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
        })
    }

    fn ingest_url(&self) -> String {
        format!("{}/api/events", self.endpoint)
    }
}

#[async_trait]
impl EventSink for HttpTransport {
    async fn deliver(&self, batch: &[Event]) -> Result<(), TransportError> {
        let response = self
            .client
            .post(self.ingest_url())
            .header("Authorization", format!("Bearer {}", self.api_key))
            .json(&serde_json::json!({ "events": batch }))
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(TransportError::Rejected {
                status: status.as_u16(),
                body,
            });
        }

        tracing::debug!("Delivered {} events to {}", batch.len(), self.ingest_url());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::EventType;
    use crate::storage::MemoryStore;
    use serde_json::Map;

    fn event(tag: &str) -> Event {
        let mut e = Event::new(EventType::UserAction, "u1", Map::new());
        e.event_id = format!("evt_{}", tag);
        e
    }

    #[tokio::test]
    async fn test_local_transport_appends_in_order() {
        let store = Arc::new(MemoryStore::new());
        let transport = LocalTransport::new(store.clone(), "u1");

        transport.deliver(&[event("a"), event("b")]).await.unwrap();
        transport.deliver(&[event("c")]).await.unwrap();

        let events = LocalTransport::read_events(store.as_ref(), "u1").unwrap();
        let ids: Vec<&str> = events.iter().map(|e| e.event_id.as_str()).collect();
        assert_eq!(ids, vec!["evt_a", "evt_b", "evt_c"]);
    }

    #[tokio::test]
    async fn test_local_transport_trims_to_cap() {
        let store = Arc::new(MemoryStore::new());
        let transport = LocalTransport::new(store.clone(), "u1");

        let batch: Vec<Event> = (0..LOCAL_EVENTS_CAP + 10)
            .map(|i| event(&format!("{:05}", i)))
            .collect();
        transport.deliver(&batch).await.unwrap();

        let events = LocalTransport::read_events(store.as_ref(), "u1").unwrap();
        assert_eq!(events.len(), LOCAL_EVENTS_CAP);
        // Oldest entries were trimmed
        assert_eq!(events.first().unwrap().event_id, "evt_00010");
        assert_eq!(
            events.last().unwrap().event_id,
            format!("evt_{:05}", LOCAL_EVENTS_CAP + 9)
        );
    }

    #[tokio::test]
    async fn test_local_transport_namespaces_by_user() {
        let store = Arc::new(MemoryStore::new());
        LocalTransport::new(store.clone(), "alice")
            .deliver(&[event("a")])
            .await
            .unwrap();

        assert!(LocalTransport::read_events(store.as_ref(), "bob")
            .unwrap()
            .is_empty());
    }

    #[test]
    fn test_http_transport_url_building() {
        let t = HttpTransport::new("https://ingest.example.com/", "key").unwrap();
        assert_eq!(t.ingest_url(), "https://ingest.example.com/api/events");
    }

    #[tokio::test]
    async fn test_http_transport_network_error_is_flush_error() {
        // Port 1 on localhost refuses connections
        let t = HttpTransport::new("http://127.0.0.1:1", "key").unwrap();
        let err = t.deliver(&[event("a")]).await.unwrap_err();
        assert!(matches!(err, TransportError::Network(_)));
    }
}
