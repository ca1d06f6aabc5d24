//! HTTP client for the identity service.

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use reqwest::{Client, RequestBuilder};
use serde::Deserialize;
use serde_json::Value;
use std::time::Instant;
use tracing::{debug, info, instrument, warn};

use super::model::loose_bool;
use super::{BoardPosition, Identity, IdentityResolver, MemberId, Profile, ProfileEnricher, RoleRef};
use crate::config::IdentityServiceConfig;
use crate::error::{GatekeeperError, Result, UpstreamCall};
use crate::telemetry::{record_upstream_call, redact_tokens, token_fingerprint};

/// Talks to the identity service's member API.
///
/// Every call is a single request without retries. The `success` flag of
/// the JSON envelope decides the outcome; HTTP status codes are ignored.
#[derive(Debug, Clone)]
pub struct IdentityServiceClient {
    client: Client,
    base_url: String,
    token_header: HeaderName,
    placeholder_antenna_name: String,
}

#[derive(Debug, Deserialize)]
struct ProfileBody {
    user: Value,
    #[serde(default, rename = "workingGroups")]
    working_groups: Vec<Value>,
    #[serde(default)]
    board_positions: Vec<BoardPosition>,
    roles: Vec<RoleRef>,
    #[serde(default, deserialize_with = "loose_bool")]
    fees_paid: bool,
}

impl IdentityServiceClient {
    pub fn new(config: &IdentityServiceConfig) -> Result<Self> {
        let token_header = HeaderName::from_bytes(config.token_header.as_bytes())
            .map_err(|e| GatekeeperError::configuration(format!("invalid token header: {}", e)))?;

        let mut default_headers = HeaderMap::new();
        for (name, value) in &config.extra_headers {
            let name = HeaderName::from_bytes(name.as_bytes()).map_err(|e| {
                GatekeeperError::configuration(format!("invalid header name `{}`: {}", name, e))
            })?;
            let value = HeaderValue::from_str(value).map_err(|e| {
                GatekeeperError::configuration(format!("invalid value for header `{}`: {}", name, e))
            })?;
            default_headers.insert(name, value);
        }

        let client = Client::builder()
            .timeout(config.timeout)
            .default_headers(default_headers)
            .build()
            .map_err(|e| GatekeeperError::configuration(format!("failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            token_header,
            placeholder_antenna_name: config.placeholder_antenna_name.clone(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Look up another member by id, using the caller's token.
    ///
    /// Returns `Ok(None)` when the identity service refuses to show the member.
    #[instrument(skip(self, token), fields(token = %token_fingerprint(token)))]
    pub async fn get_user(&self, token: &str, id: &MemberId) -> Result<Option<Identity>> {
        let call = UpstreamCall::GetUser;
        let request = self
            .client
            .get(format!("{}/api/getUser", self.base_url))
            .header(self.token_header.clone(), self.token_value(call, token)?)
            .query(&[("id", id.as_str())]);

        let body = self.send(call, request).await?;
        if !Self::success(call, &body)? {
            debug!(member_id = %id, "Member not visible to caller");
            return Ok(None);
        }

        self.identity_from(call, &body).map(Some)
    }

    fn token_value(&self, call: UpstreamCall, token: &str) -> Result<HeaderValue> {
        HeaderValue::from_str(token).map_err(|_| GatekeeperError::unauthorized(call))
    }

    /// Send one request and parse the body as JSON.
    async fn send(&self, call: UpstreamCall, request: RequestBuilder) -> Result<Value> {
        let started = Instant::now();

        let response = match request.send().await {
            Ok(response) => response,
            Err(e) => {
                record_upstream_call(call, "unreachable", started.elapsed());
                return Err(GatekeeperError::unreachable(call, redact_tokens(&e.to_string())).with_source(e));
            }
        };

        let status = response.status();
        let text = match response.text().await {
            Ok(text) => text,
            Err(e) => {
                record_upstream_call(call, "unreachable", started.elapsed());
                return Err(GatekeeperError::unreachable(call, redact_tokens(&e.to_string())).with_source(e));
            }
        };

        match serde_json::from_str::<Value>(&text) {
            Ok(body) => {
                record_upstream_call(call, "ok", started.elapsed());
                Ok(body)
            }
            Err(e) => {
                record_upstream_call(call, "malformed", started.elapsed());
                warn!(call = %call, status = %status, "Identity service answered with a non-JSON body");
                Err(GatekeeperError::malformed(call, format!("non-JSON body (HTTP {}): {}", status, e)).with_source(e))
            }
        }
    }

    /// Read the `success` flag of the envelope.
    fn success(call: UpstreamCall, body: &Value) -> Result<bool> {
        body.get("success")
            .and_then(Value::as_bool)
            .ok_or_else(|| GatekeeperError::malformed(call, "missing boolean `success`"))
    }

    fn identity_from(&self, call: UpstreamCall, body: &Value) -> Result<Identity> {
        let user = body
            .get("user")
            .filter(|u| u.is_object())
            .ok_or_else(|| GatekeeperError::malformed(call, "missing `user` object"))?;

        let mut identity: Identity = serde_json::from_value(user.clone())
            .map_err(|e| GatekeeperError::malformed(call, format!("invalid `user`: {}", e)))?;
        identity.antenna_name = self.antenna_name(user);
        Ok(identity)
    }

    /// Display name of the member's antenna, falling back to the placeholder.
    fn antenna_name(&self, user: &Value) -> String {
        user.pointer("/antenna/name")
            .and_then(Value::as_str)
            .or_else(|| user.get("antenna_name").and_then(Value::as_str))
            .filter(|name| !name.trim().is_empty())
            .unwrap_or(self.placeholder_antenna_name.as_str())
            .to_string()
    }
}

#[async_trait]
impl IdentityResolver for IdentityServiceClient {
    #[instrument(skip(self, token), fields(token = %token_fingerprint(token)))]
    async fn resolve(&self, token: &str) -> Result<Identity> {
        let call = UpstreamCall::GetUserByToken;
        let request = self
            .client
            .post(format!("{}/api/getUserByToken", self.base_url))
            .form(&[("token", token)]);

        let body = self.send(call, request).await?;
        if !Self::success(call, &body)? {
            info!("Identity service denied the token");
            return Err(GatekeeperError::unauthorized(call));
        }

        let identity = self.identity_from(call, &body)?;
        debug!(member_id = %identity.id, "Token resolved");
        Ok(identity)
    }
}

#[async_trait]
impl ProfileEnricher for IdentityServiceClient {
    #[instrument(skip(self, token), fields(token = %token_fingerprint(token)))]
    async fn enrich(&self, token: &str) -> Result<Profile> {
        let call = UpstreamCall::GetUserProfile;
        let request = self
            .client
            .get(format!("{}/api/getUserProfile", self.base_url))
            .header(self.token_header.clone(), self.token_value(call, token)?)
            .query(&[("is_ui", "0")]);

        let body = self.send(call, request).await?;
        if !Self::success(call, &body)? {
            info!("Identity service refused the profile fetch");
            return Err(GatekeeperError::unauthorized(call));
        }

        let parsed: ProfileBody = serde_json::from_value(body)
            .map_err(|e| GatekeeperError::malformed(call, format!("invalid profile: {}", e)))?;

        Ok(Profile {
            details: parsed.user,
            roles: parsed.roles,
            board_positions: parsed.board_positions,
            working_groups: parsed.working_groups,
            fees_paid: parsed.fees_paid,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ErrorCode;
    use serde_json::json;

    fn client() -> IdentityServiceClient {
        IdentityServiceClient::new(&IdentityServiceConfig::new("http://core:8084/")).unwrap()
    }

    #[test]
    fn test_trailing_slash_trimmed() {
        assert_eq!(client().base_url(), "http://core:8084");
    }

    #[test]
    fn test_antenna_name_fallbacks() {
        let c = client();
        assert_eq!(c.antenna_name(&json!({"antenna": {"name": "AEGEE-Delft"}})), "AEGEE-Delft");
        assert_eq!(c.antenna_name(&json!({"antenna_name": "AEGEE-Kyiv"})), "AEGEE-Kyiv");
        assert_eq!(c.antenna_name(&json!({"antenna_name": ""})), "Unknown antenna");
        assert_eq!(c.antenna_name(&json!({})), "Unknown antenna");
    }

    #[test]
    fn test_missing_success_flag_is_malformed() {
        let err = IdentityServiceClient::success(UpstreamCall::GetUser, &json!({"user": {}})).unwrap_err();
        assert_eq!(err.code(), ErrorCode::Malformed);
        assert_eq!(err.upstream(), Some(UpstreamCall::GetUser));
    }

    #[test]
    fn test_identity_without_id_is_malformed() {
        let err = client()
            .identity_from(UpstreamCall::GetUserByToken, &json!({"success": true, "user": {"antenna_id": 1}}))
            .unwrap_err();
        assert_eq!(err.code(), ErrorCode::Malformed);
    }

    #[test]
    fn test_invalid_extra_header_is_configuration_error() {
        let mut config = IdentityServiceConfig::new("http://core:8084");
        config.extra_headers.insert("bad header".to_string(), "x".to_string());
        let err = IdentityServiceClient::new(&config).unwrap_err();
        assert_eq!(err.code(), ErrorCode::ConfigurationError);
    }
}
