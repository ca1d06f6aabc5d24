#![allow(clippy::result_large_err)]
//! # Gatekeeper Core
//!
//! Authentication and event-scoped permission pipeline for the events service.
//!
//! ## Architecture
//!
//! - **Identity**: resolves tokens and fetches profiles from the identity service
//! - **Cache**: TTL cache for resolved identities and profiles (memory or Redis)
//! - **Events**: loads the event a request is scoped to
//! - **Permissions**: derives the `is`/`can` flags from identity, profile and event
//! - **Pipeline**: runs the stages in order and stops at the first failure
//! - **Middleware**: attaches the result to axum requests

pub mod api;
pub mod cache;
pub mod config;
pub mod error;
pub mod events;
pub mod identity;
pub mod middleware;
pub mod permissions;
pub mod pipeline;
pub mod telemetry;

pub use error::{ErrorClass, ErrorCode, ErrorDetails, ErrorSeverity, GatekeeperError, Result};

/// Re-export commonly used types
pub mod prelude {
    pub use crate::cache::{CacheBackend, IdentityCache, InMemoryBackend, ProfileCache};
    pub use crate::error::{ErrorCode, GatekeeperError, Result};
    pub use crate::events::{EventContextLoader, EventRef, EventSnapshot, EventStore};
    pub use crate::identity::{Identity, IdentityResolver, Profile, ProfileEnricher};
    pub use crate::middleware::AuthLayer;
    pub use crate::permissions::{PermissionDeriver, PermissionSet, RoleConfig};
    pub use crate::pipeline::{AuthPipeline, AuthSession, PipelineRequest, RequestAuth};
}
