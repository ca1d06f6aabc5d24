//! Event context: the event a request is scoped to.
//!
//! - **`snapshot`**: the read-only [`EventSnapshot`] consumed by the permission deriver.
//! - **`store`**: [`EventRef`] parsing, the [`EventStore`] trait, an in-memory store and
//!   the [`EventContextLoader`] that hides deleted events.
//! - **`postgres`**: the `sqlx` store used in deployments.

pub mod postgres;
pub mod snapshot;
pub mod store;

pub use postgres::PostgresEventStore;
pub use snapshot::{
    ApplicationEntry, ApplicationStatus, EventId, EventSnapshot, EventStatus, EventType,
    ForeignRef, ParticipantStatus,
};
pub use store::{EventContextLoader, EventRef, EventStore, InMemoryEventStore};
