//! Identity resolution and profile enrichment.
//!
//! The pipeline depends on the [`IdentityResolver`] and [`ProfileEnricher`]
//! traits; [`IdentityServiceClient`] implements both against the identity
//! service's HTTP API.

pub mod client;
pub mod model;

pub use client::IdentityServiceClient;
pub use model::{BoardPosition, Identity, MemberId, Profile, RoleRef};

use async_trait::async_trait;

use crate::error::Result;

/// Exchanges a token for an identity.
///
/// Fails with `Unauthorized` when the token is denied, `Unreachable` on a
/// transport failure or timeout, and `Malformed` when the answer cannot be
/// understood. Implementations have no side effects.
#[async_trait]
pub trait IdentityResolver: Send + Sync {
    async fn resolve(&self, token: &str) -> Result<Identity>;
}

/// Fetches the extended profile for a token, with the same failure kinds
/// as [`IdentityResolver`].
#[async_trait]
pub trait ProfileEnricher: Send + Sync {
    async fn enrich(&self, token: &str) -> Result<Profile>;
}
