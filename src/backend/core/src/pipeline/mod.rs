//! The auth pipeline orchestrator.
//!
//! ```text
//! Start → TokenPresent? → IdentityResolved → (ProfileEnriched)? → (EventLoaded)? → PermissionsDerived
//! ```
//!
//! Every stage either advances or ends the run with its own error. Dropping
//! the future abandons the remaining stages; the only work that outlives a
//! request is the write-behind of a value that was already resolved for
//! that request's token.

mod session;

pub use session::AuthSession;

use serde::Serialize;
use std::fmt;
use std::sync::Arc;
use tracing::{info_span, warn, Instrument};

use crate::cache::{IdentityCache, ProfileCache};
use crate::error::{GatekeeperError, Result};
use crate::events::{EventContextLoader, EventSnapshot};
use crate::identity::{Identity, IdentityResolver, Profile, ProfileEnricher};
use crate::permissions::{PermissionDeriver, PermissionSet, RoleConfig};
use crate::telemetry::metrics::record_pipeline_run;
use crate::telemetry::token_fingerprint;

/// Pipeline stages, used to label spans and errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    TokenPresent,
    IdentityResolved,
    ProfileEnriched,
    EventLoaded,
    PermissionsDerived,
}

impl Stage {
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::TokenPresent => "token_present",
            Self::IdentityResolved => "identity_resolved",
            Self::ProfileEnriched => "profile_enriched",
            Self::EventLoaded => "event_loaded",
            Self::PermissionsDerived => "permissions_derived",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What a request needs from the pipeline.
#[derive(Debug, Clone, Default)]
pub struct PipelineRequest {
    pub token: Option<String>,

    /// Fetch the profile so that role-based flags can be derived
    pub needs_profile: bool,

    /// Event id or slug the request is scoped to
    pub event_ref: Option<String>,

    /// Permissions computed earlier in the request, merged rather than replaced
    pub prior_permissions: Option<PermissionSet>,
}

impl PipelineRequest {
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: Some(token.into()),
            ..Self::default()
        }
    }

    pub fn with_profile(mut self) -> Self {
        self.needs_profile = true;
        self
    }

    pub fn for_event(mut self, event_ref: impl Into<String>) -> Self {
        self.event_ref = Some(event_ref.into());
        self
    }

    pub fn with_prior(mut self, prior: PermissionSet) -> Self {
        self.prior_permissions = Some(prior);
        self
    }
}

/// The decorated identity handed to the rest of the request.
#[derive(Debug, Clone, Serialize)]
pub struct RequestAuth {
    pub identity: Identity,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub profile: Option<Profile>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub event: Option<EventSnapshot>,
    pub permissions: PermissionSet,
}

pub(crate) struct PipelineInner {
    pub(crate) resolver: Arc<dyn IdentityResolver>,
    pub(crate) enricher: Arc<dyn ProfileEnricher>,
    pub(crate) events: EventContextLoader,
    pub(crate) deriver: PermissionDeriver,
    pub(crate) identity_cache: Option<IdentityCache>,
    pub(crate) profile_cache: Option<ProfileCache>,
}

/// Composes the resolver, enricher, event loader and deriver.
///
/// Cheap to clone; all clones share the same collaborators and caches.
#[derive(Clone)]
pub struct AuthPipeline {
    inner: Arc<PipelineInner>,
}

impl fmt::Debug for AuthPipeline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuthPipeline")
            .field("events", &self.inner.events)
            .field("identity_cache", &self.inner.identity_cache)
            .field("profile_cache", &self.inner.profile_cache)
            .finish_non_exhaustive()
    }
}

/// Builder for [`AuthPipeline`]. Caches are off unless provided.
pub struct AuthPipelineBuilder {
    resolver: Arc<dyn IdentityResolver>,
    enricher: Arc<dyn ProfileEnricher>,
    events: EventContextLoader,
    roles: RoleConfig,
    identity_cache: Option<IdentityCache>,
    profile_cache: Option<ProfileCache>,
}

impl AuthPipelineBuilder {
    pub fn roles(mut self, roles: RoleConfig) -> Self {
        self.roles = roles;
        self
    }

    pub fn identity_cache(mut self, cache: IdentityCache) -> Self {
        self.identity_cache = Some(cache);
        self
    }

    pub fn profile_cache(mut self, cache: ProfileCache) -> Self {
        self.profile_cache = Some(cache);
        self
    }

    pub fn build(self) -> AuthPipeline {
        AuthPipeline {
            inner: Arc::new(PipelineInner {
                resolver: self.resolver,
                enricher: self.enricher,
                events: self.events,
                deriver: PermissionDeriver::new(&self.roles),
                identity_cache: self.identity_cache,
                profile_cache: self.profile_cache,
            }),
        }
    }
}

impl AuthPipeline {
    pub fn builder(
        resolver: Arc<dyn IdentityResolver>,
        enricher: Arc<dyn ProfileEnricher>,
        events: EventContextLoader,
    ) -> AuthPipelineBuilder {
        AuthPipelineBuilder {
            resolver,
            enricher,
            events,
            roles: RoleConfig::default(),
            identity_cache: None,
            profile_cache: None,
        }
    }

    /// Check the token and resolve it to an identity.
    pub async fn authenticate(&self, token: Option<&str>) -> Result<AuthSession> {
        let token = match token.map(str::trim) {
            Some(token) if !token.is_empty() => token,
            _ => {
                return Err(GatekeeperError::no_token().with_context("stage", Stage::TokenPresent))
            }
        };

        let span = info_span!("identity_resolved", token = %token_fingerprint(token), cached = tracing::field::Empty);
        self.resolve_identity(token)
            .instrument(span)
            .await
            .map_err(|e| e.with_context("stage", Stage::IdentityResolved))
    }

    async fn resolve_identity(&self, token: &str) -> Result<AuthSession> {
        if let Some(cache) = &self.inner.identity_cache {
            if let Some(identity) = cache.get(token).await {
                tracing::Span::current().record("cached", true);
                return Ok(AuthSession::new(self.inner.clone(), token, identity, true));
            }
        }

        let identity = self.inner.resolver.resolve(token).await?;
        tracing::Span::current().record("cached", false);

        if let Some(cache) = &self.inner.identity_cache {
            write_behind(cache.clone(), token, identity.clone());
        }

        Ok(AuthSession::new(self.inner.clone(), token, identity, false))
    }

    /// Run the whole pipeline for one request.
    pub async fn run(&self, request: PipelineRequest) -> Result<RequestAuth> {
        let result = self.run_stages(request).await;
        match &result {
            Ok(_) => record_pipeline_run("ok"),
            Err(e) => record_pipeline_run(e.code().category()),
        }
        result
    }

    async fn run_stages(&self, request: PipelineRequest) -> Result<RequestAuth> {
        let session = self.authenticate(request.token.as_deref()).await?;

        let profile = if request.needs_profile {
            Some(session.profile().await?.clone())
        } else {
            None
        };

        let event = match request.event_ref.as_deref() {
            Some(event_ref) => Some(session.load_event(event_ref).await?),
            None => None,
        };

        let permissions = match request.prior_permissions {
            Some(prior) => session.permissions_onto(prior, event.as_ref()),
            None => session.permissions(event.as_ref()),
        };

        Ok(RequestAuth {
            identity: session.identity().clone(),
            profile,
            event,
            permissions,
        })
    }
}

/// Fill a cache after the value has been handed on. Failures only warn.
pub(crate) fn write_behind<T>(cache: crate::cache::TypedCache<T>, token: &str, value: T)
where
    T: Serialize + serde::de::DeserializeOwned + Send + Sync + 'static,
{
    let token = token.to_string();
    tokio::spawn(async move {
        if let Err(e) = cache.put(&token, &value).await {
            warn!(
                token = %token_fingerprint(&token),
                error = %e,
                "Could not store user data in cache"
            );
        }
    });
}
