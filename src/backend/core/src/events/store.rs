//! Event references, the store abstraction and the context loader.

use async_trait::async_trait;
use dashmap::DashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, instrument};

use super::{EventId, EventSnapshot};
use crate::error::{GatekeeperError, Result, UpstreamCall};
use crate::telemetry::record_upstream_call;

/// How a request names the event it is scoped to.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum EventRef {
    Id(EventId),
    Slug(String),
}

impl EventRef {
    /// Parse a raw route parameter.
    ///
    /// An all-digit reference is an id; slugs are never purely numeric.
    /// Anything else is taken as a slug. References that can never match
    /// (empty, or an id out of range) are reported as not found.
    pub fn parse(raw: &str) -> Result<Self> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Err(GatekeeperError::event_not_found(raw));
        }

        if trimmed.bytes().all(|b| b.is_ascii_digit()) {
            return trimmed
                .parse::<EventId>()
                .map(Self::Id)
                .map_err(|_| GatekeeperError::event_not_found(raw));
        }

        Ok(Self::Slug(trimmed.to_lowercase()))
    }

    pub fn matches(&self, event: &EventSnapshot) -> bool {
        match self {
            Self::Id(id) => event.id == *id,
            Self::Slug(slug) => &event.slug == slug,
        }
    }
}

impl fmt::Display for EventRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Id(id) => write!(f, "{}", id),
            Self::Slug(slug) => f.write_str(slug),
        }
    }
}

/// Read access to events.
///
/// Implementations return the row as stored, including soft-deleted ones;
/// [`EventContextLoader`] decides what is visible.
#[async_trait]
pub trait EventStore: Send + Sync {
    async fn find(&self, event_ref: &EventRef) -> Result<Option<EventSnapshot>>;

    /// Store name for logs.
    fn name(&self) -> &'static str;
}

/// Event store held in memory, keyed by id.
#[derive(Debug, Default)]
pub struct InMemoryEventStore {
    events: DashMap<EventId, EventSnapshot>,
}

impl InMemoryEventStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, event: EventSnapshot) {
        self.events.insert(event.id, event);
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }
}

#[async_trait]
impl EventStore for InMemoryEventStore {
    async fn find(&self, event_ref: &EventRef) -> Result<Option<EventSnapshot>> {
        let found = match event_ref {
            EventRef::Id(id) => self.events.get(id).map(|e| e.value().clone()),
            EventRef::Slug(_) => self
                .events
                .iter()
                .find(|e| event_ref.matches(e.value()))
                .map(|e| e.value().clone()),
        };
        Ok(found)
    }

    fn name(&self) -> &'static str {
        "memory"
    }
}

/// Loads the event a request is scoped to.
#[derive(Clone)]
pub struct EventContextLoader {
    store: Arc<dyn EventStore>,
}

impl fmt::Debug for EventContextLoader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventContextLoader")
            .field("store", &self.store.name())
            .finish()
    }
}

impl EventContextLoader {
    pub fn new(store: Arc<dyn EventStore>) -> Self {
        Self { store }
    }

    /// Resolve a raw id or slug to a visible event.
    #[instrument(skip(self), fields(store = self.store.name()))]
    pub async fn load(&self, raw_ref: &str) -> Result<EventSnapshot> {
        let event_ref = EventRef::parse(raw_ref)?;
        let started = Instant::now();

        let result = self.store.find(&event_ref).await;
        let outcome = match &result {
            Ok(Some(_)) => "ok",
            Ok(None) => "not_found",
            Err(_) => "error",
        };
        record_upstream_call(UpstreamCall::EventStore, outcome, started.elapsed());

        match result {
            Ok(Some(event)) if !event.deleted => {
                debug!(event_id = %event.id, "Event loaded");
                Ok(event)
            }
            Ok(_) => Err(GatekeeperError::event_not_found(raw_ref)),
            Err(e) if e.code() == crate::ErrorCode::NotFound => {
                Err(GatekeeperError::event_not_found(raw_ref))
            }
            Err(e) => Err(e.for_call(UpstreamCall::EventStore)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::EventType;
    use crate::ErrorCode;

    fn loader_with(events: Vec<EventSnapshot>) -> EventContextLoader {
        let store = InMemoryEventStore::new();
        for event in events {
            store.insert(event);
        }
        EventContextLoader::new(Arc::new(store))
    }

    #[test]
    fn test_parse_id_and_slug() {
        assert_eq!(EventRef::parse("1337").unwrap(), EventRef::Id(1337));
        assert_eq!(EventRef::parse(" 42 ").unwrap(), EventRef::Id(42));
        assert_eq!(
            EventRef::parse("  Summer-University ").unwrap(),
            EventRef::Slug("summer-university".to_string())
        );
        assert_eq!(
            EventRef::parse("agora-2024").unwrap(),
            EventRef::Slug("agora-2024".to_string())
        );
        assert_eq!(EventRef::parse("-5").unwrap(), EventRef::Slug("-5".to_string()));
        assert_eq!(EventRef::parse("").unwrap_err().code(), ErrorCode::NotFound);
    }

    #[test]
    fn test_out_of_range_id_is_not_found() {
        let err = EventRef::parse("99999999999999999999999").unwrap_err();
        assert_eq!(err.code(), ErrorCode::NotFound);
    }

    #[tokio::test]
    async fn test_load_by_id_and_slug() {
        let event = EventSnapshot::draft("agora", EventType::Statutory).with_id(1337);
        let loader = loader_with(vec![event]);

        assert_eq!(loader.load("1337").await.unwrap().slug, "agora");
        assert_eq!(loader.load("AGORA").await.unwrap().id, 1337);
    }

    #[tokio::test]
    async fn test_unknown_and_malformed_refs_are_not_found() {
        let loader = loader_with(vec![]);

        let err = loader.load("1337").await.unwrap_err();
        assert_eq!(err.code(), ErrorCode::NotFound);

        let err = loader.load("no-such-event-{}").await.unwrap_err();
        assert_eq!(err.code(), ErrorCode::NotFound);
        assert!(err.user_message().contains("no-such-event-{}"));
    }

    #[tokio::test]
    async fn test_deleted_event_is_not_found() {
        let mut event = EventSnapshot::draft("old-event", EventType::Local);
        event.deleted = true;
        let loader = loader_with(vec![event]);

        let err = loader.load("old-event").await.unwrap_err();
        assert_eq!(err.code(), ErrorCode::NotFound);
    }
}
