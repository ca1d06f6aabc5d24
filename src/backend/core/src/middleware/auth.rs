//! Request authentication layer.
//!
//! [`AuthLayer`] runs the [`AuthPipeline`] for every request it wraps and
//! stores the resulting [`RequestAuth`] in the request extensions. Handlers
//! take it as an extractor. Pipeline failures short-circuit the request with
//! the error response.
//!
//! The event reference is read from a named path parameter, so the layer has
//! to be installed with `Router::route_layer` for the parameter to be known.

use axum::{
    body::Body,
    extract::{FromRequestParts, RawPathParams, Request},
    http::{request::Parts, HeaderName},
    response::{IntoResponse, Response},
};
use futures::future::BoxFuture;
use std::{
    sync::Arc,
    task::{Context, Poll},
};
use tower::{Layer, Service};
use tracing::debug;

use crate::error::GatekeeperError;
use crate::pipeline::{AuthPipeline, PipelineRequest, RequestAuth};

const DEFAULT_TOKEN_HEADER: &str = "x-auth-token";

#[derive(Debug)]
struct AuthSettings {
    pipeline: AuthPipeline,
    token_header: HeaderName,
    event_param: Option<String>,
    needs_profile: bool,
}

/// Layer that authenticates requests.
#[derive(Debug, Clone)]
pub struct AuthLayer {
    settings: Arc<AuthSettings>,
}

impl AuthLayer {
    pub fn new(pipeline: AuthPipeline) -> Self {
        Self {
            settings: Arc::new(AuthSettings {
                pipeline,
                token_header: HeaderName::from_static(DEFAULT_TOKEN_HEADER),
                event_param: None,
                needs_profile: false,
            }),
        }
    }

    fn update(self, f: impl FnOnce(&mut AuthSettings)) -> Self {
        let mut settings = Arc::try_unwrap(self.settings).unwrap_or_else(|shared| AuthSettings {
            pipeline: shared.pipeline.clone(),
            token_header: shared.token_header.clone(),
            event_param: shared.event_param.clone(),
            needs_profile: shared.needs_profile,
        });
        f(&mut settings);
        Self {
            settings: Arc::new(settings),
        }
    }

    /// Read the token from another header.
    pub fn with_token_header(self, header: HeaderName) -> Self {
        self.update(|s| s.token_header = header)
    }

    /// Scope requests to the event named by this path parameter.
    pub fn with_event_param(self, name: impl Into<String>) -> Self {
        let name = name.into();
        self.update(|s| s.event_param = Some(name))
    }

    /// Fetch the caller's profile as part of authentication.
    pub fn with_profile(self) -> Self {
        self.update(|s| s.needs_profile = true)
    }
}

impl<S> Layer<S> for AuthLayer {
    type Service = AuthService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        AuthService {
            inner,
            settings: self.settings.clone(),
        }
    }
}

/// Authentication service.
#[derive(Debug, Clone)]
pub struct AuthService<S> {
    inner: S,
    settings: Arc<AuthSettings>,
}

impl<S> Service<Request<Body>> for AuthService<S>
where
    S: Service<Request<Body>, Response = Response> + Clone + Send + 'static,
    S::Future: Send,
{
    type Response = Response;
    type Error = S::Error;
    type Future = BoxFuture<'static, Result<Self::Response, Self::Error>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, request: Request<Body>) -> Self::Future {
        let settings = self.settings.clone();
        let mut inner = self.inner.clone();

        Box::pin(async move {
            let (mut parts, body) = request.into_parts();

            let token = parts
                .headers
                .get(&settings.token_header)
                .and_then(|v| v.to_str().ok())
                .map(str::to_string);

            let event_ref = match &settings.event_param {
                Some(name) => event_param(&mut parts, name).await,
                None => None,
            };

            let pipeline_request = PipelineRequest {
                token,
                needs_profile: settings.needs_profile,
                event_ref,
                prior_permissions: None,
            };

            match settings.pipeline.run(pipeline_request).await {
                Ok(auth) => {
                    debug!(member_id = %auth.identity.id, "Request authenticated");
                    parts.extensions.insert(auth);
                    inner.call(Request::from_parts(parts, body)).await
                }
                Err(e) => Ok(e.into_response()),
            }
        })
    }
}

async fn event_param(parts: &mut Parts, name: &str) -> Option<String> {
    let params = RawPathParams::from_request_parts(parts, &()).await.ok()?;
    params
        .iter()
        .find(|(key, _)| *key == name)
        .map(|(_, value)| value.to_string())
}

#[axum::async_trait]
impl<S> FromRequestParts<S> for RequestAuth
where
    S: Send + Sync,
{
    type Rejection = GatekeeperError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<RequestAuth>()
            .cloned()
            .ok_or_else(|| GatekeeperError::internal("route is not behind the auth layer"))
    }
}
