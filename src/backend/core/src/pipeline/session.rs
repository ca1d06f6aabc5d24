use std::fmt;
use std::sync::Arc;
use tokio::sync::OnceCell;
use tracing::{debug, info_span, Instrument};

use super::{write_behind, PipelineInner, Stage};
use crate::error::Result;
use crate::events::EventSnapshot;
use crate::identity::{Identity, Profile};
use crate::permissions::PermissionSet;
use crate::telemetry::token_fingerprint;

/// A request whose token has been resolved to an identity.
///
/// The profile is fetched lazily and at most once per session.
pub struct AuthSession {
    inner: Arc<PipelineInner>,
    token: String,
    identity: Identity,
    from_cache: bool,
    profile: OnceCell<Profile>,
}

impl fmt::Debug for AuthSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuthSession")
            .field("token", &token_fingerprint(&self.token))
            .field("identity", &self.identity.id)
            .field("from_cache", &self.from_cache)
            .field("profile_loaded", &self.profile.initialized())
            .finish()
    }
}

impl AuthSession {
    pub(super) fn new(inner: Arc<PipelineInner>, token: &str, identity: Identity, from_cache: bool) -> Self {
        Self {
            inner,
            token: token.to_string(),
            identity,
            from_cache,
            profile: OnceCell::new(),
        }
    }

    pub fn identity(&self) -> &Identity {
        &self.identity
    }

    /// Whether the identity came from the cache rather than the resolver.
    pub fn from_cache(&self) -> bool {
        self.from_cache
    }

    /// The profile, if it has already been fetched.
    pub fn cached_profile(&self) -> Option<&Profile> {
        self.profile.get()
    }

    /// Enrich the identity with its profile.
    ///
    /// Idempotent: later calls return the first result without another
    /// upstream call. A failed fetch is not remembered.
    pub async fn profile(&self) -> Result<&Profile> {
        let span = info_span!("profile_enriched", token = %token_fingerprint(&self.token));
        self.profile
            .get_or_try_init(|| self.fetch_profile().instrument(span))
            .await
            .map_err(|e| e.with_context("stage", Stage::ProfileEnriched))
    }

    async fn fetch_profile(&self) -> Result<Profile> {
        if let Some(cache) = &self.inner.profile_cache {
            if let Some(profile) = cache.get(&self.token).await {
                return Ok(profile);
            }
        }

        let profile = self.inner.enricher.enrich(&self.token).await?;
        debug!(roles = profile.roles.len(), boards = profile.board_positions.len(), "Profile fetched");

        if let Some(cache) = &self.inner.profile_cache {
            write_behind(cache.clone(), &self.token, profile.clone());
        }

        Ok(profile)
    }

    /// Load the event the request is scoped to.
    pub async fn load_event(&self, event_ref: &str) -> Result<EventSnapshot> {
        let span = info_span!("event_loaded", event_ref = %event_ref);
        self.inner
            .events
            .load(event_ref)
            .instrument(span)
            .await
            .map_err(|e| e.with_context("stage", Stage::EventLoaded))
    }

    /// Derive permissions from the identity, the profile if it was fetched,
    /// and the given event.
    pub fn permissions(&self, event: Option<&EventSnapshot>) -> PermissionSet {
        self.permissions_onto(PermissionSet::new(), event)
    }

    /// Same as [`AuthSession::permissions`], merged onto an earlier set.
    pub fn permissions_onto(&self, prior: PermissionSet, event: Option<&EventSnapshot>) -> PermissionSet {
        let _span = info_span!("permissions_derived").entered();
        self.inner
            .deriver
            .derive_onto(prior, &self.identity, self.profile.get(), event)
    }
}
