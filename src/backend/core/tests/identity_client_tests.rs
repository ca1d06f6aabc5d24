//! Identity service client against a mocked HTTP server.
//!
//! Tests cover:
//! - Token resolution and the `success` envelope
//! - Denials, malformed bodies and timeouts
//! - Profile enrichment request shape and parsing
//! - Member lookup by id

use gatekeeper_core::config::IdentityServiceConfig;
use gatekeeper_core::error::UpstreamCall;
use gatekeeper_core::identity::{IdentityResolver, IdentityServiceClient, MemberId, ProfileEnricher};
use gatekeeper_core::ErrorCode;
use serde_json::json;
use std::time::Duration;
use wiremock::matchers::{body_string_contains, header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn client_for(server: &MockServer) -> IdentityServiceClient {
    let mut config = IdentityServiceConfig::new(server.uri());
    config.timeout = Duration::from_millis(200);
    config
        .extra_headers
        .insert("X-Service-Name".to_string(), "gatekeeper".to_string());
    IdentityServiceClient::new(&config).unwrap()
}

// ============================================================================
// Token resolution
// ============================================================================

#[tokio::test]
async fn test_resolve_posts_token_and_parses_user() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/getUserByToken"))
        .and(body_string_contains("token=abc123"))
        .and(header("X-Service-Name", "gatekeeper"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "success": true,
            "user": {
                "id": 17,
                "antenna_id": 4,
                "first_name": "Ada",
                "antenna": { "name": "AEGEE-Enschede" },
                "is_superadmin": "1"
            }
        })))
        .expect(1)
        .mount(&server)
        .await;

    let identity = client_for(&server).resolve("abc123").await.unwrap();
    assert_eq!(identity.id, MemberId::from("17"));
    assert_eq!(identity.antenna_id, Some(MemberId::from("4")));
    assert_eq!(identity.antenna_name, "AEGEE-Enschede");
    assert!(identity.is_superadmin);
}

#[tokio::test]
async fn test_missing_antenna_name_uses_placeholder() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/getUserByToken"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "success": true,
            "user": { "id": "9" }
        })))
        .mount(&server)
        .await;

    let identity = client_for(&server).resolve("tok").await.unwrap();
    assert_eq!(identity.antenna_name, "Unknown antenna");
    assert!(identity.antenna_id.is_none());
    assert!(!identity.is_superadmin);
}

#[tokio::test]
async fn test_success_false_is_unauthorized_regardless_of_status() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/getUserByToken"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "success": false,
            "message": "Invalid token"
        })))
        .mount(&server)
        .await;

    let err = client_for(&server).resolve("expired").await.unwrap_err();
    assert_eq!(err.code(), ErrorCode::Unauthorized);
    assert_eq!(err.upstream(), Some(UpstreamCall::GetUserByToken));
}

#[tokio::test]
async fn test_success_true_with_error_status_is_accepted() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/getUserByToken"))
        .respond_with(ResponseTemplate::new(500).set_body_json(json!({
            "success": true,
            "user": { "id": 1 }
        })))
        .mount(&server)
        .await;

    let identity = client_for(&server).resolve("tok").await.unwrap();
    assert_eq!(identity.id.as_str(), "1");
}

#[tokio::test]
async fn test_non_json_body_is_malformed() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/getUserByToken"))
        .respond_with(ResponseTemplate::new(502).set_body_string("<html>Bad Gateway</html>"))
        .mount(&server)
        .await;

    let err = client_for(&server).resolve("tok").await.unwrap_err();
    assert_eq!(err.code(), ErrorCode::Malformed);
}

#[tokio::test]
async fn test_missing_success_flag_is_malformed() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/getUserByToken"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "user": { "id": 1 } })))
        .mount(&server)
        .await;

    let err = client_for(&server).resolve("tok").await.unwrap_err();
    assert_eq!(err.code(), ErrorCode::Malformed);
}

#[tokio::test]
async fn test_slow_service_is_unreachable() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/getUserByToken"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({ "success": true, "user": { "id": 1 } }))
                .set_delay(Duration::from_secs(2)),
        )
        .mount(&server)
        .await;

    let err = client_for(&server).resolve("secret-token").await.unwrap_err();
    assert_eq!(err.code(), ErrorCode::Unreachable);
    assert!(!err.internal_message().unwrap_or_default().contains("secret-token"));
}

#[tokio::test]
async fn test_connection_refused_is_unreachable() {
    let mut config = IdentityServiceConfig::new("http://127.0.0.1:1");
    config.timeout = Duration::from_millis(200);
    let client = IdentityServiceClient::new(&config).unwrap();

    let err = client.resolve("tok").await.unwrap_err();
    assert_eq!(err.code(), ErrorCode::Unreachable);
}

// ============================================================================
// Profile enrichment
// ============================================================================

#[tokio::test]
async fn test_enrich_sends_token_header_and_ui_flag() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/getUserProfile"))
        .and(query_param("is_ui", "0"))
        .and(header("X-Auth-Token", "abc123"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "success": true,
            "user": { "id": 17, "first_name": "Ada" },
            "roles": [{ "id": 3, "name": "Statutory admin" }],
            "board_positions": [{ "antenna_id": 4, "function": "President", "since": "2023" }],
            "workingGroups": [{ "id": 1 }],
            "fees_paid": 1
        })))
        .expect(1)
        .mount(&server)
        .await;

    let profile = client_for(&server).enrich("abc123").await.unwrap();
    assert!(profile.has_role(&MemberId::from("3")));
    assert!(profile.is_board_member());
    assert_eq!(profile.board_positions[0].extra.get("since"), Some(&json!("2023")));
    assert_eq!(profile.working_groups.len(), 1);
    assert!(profile.fees_paid);
    assert_eq!(profile.details["first_name"], "Ada");
}

#[tokio::test]
async fn test_profile_without_roles_is_malformed() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/getUserProfile"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "success": true,
            "user": { "id": 17 }
        })))
        .mount(&server)
        .await;

    let err = client_for(&server).enrich("abc123").await.unwrap_err();
    assert_eq!(err.code(), ErrorCode::Malformed);
    assert_eq!(err.upstream(), Some(UpstreamCall::GetUserProfile));
}

#[tokio::test]
async fn test_refused_profile_is_unauthorized() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/getUserProfile"))
        .respond_with(ResponseTemplate::new(403).set_body_json(json!({ "success": false })))
        .mount(&server)
        .await;

    let err = client_for(&server).enrich("abc123").await.unwrap_err();
    assert_eq!(err.code(), ErrorCode::Unauthorized);
}

// ============================================================================
// Member lookup
// ============================================================================

#[tokio::test]
async fn test_get_user_returns_member() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/getUser"))
        .and(query_param("id", "42"))
        .and(header("X-Auth-Token", "abc123"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "success": true,
            "user": { "id": 42, "antenna_name": "AEGEE-Kyiv" }
        })))
        .mount(&server)
        .await;

    let member = client_for(&server)
        .get_user("abc123", &MemberId::from("42"))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(member.id.as_str(), "42");
    assert_eq!(member.antenna_name, "AEGEE-Kyiv");
}

#[tokio::test]
async fn test_get_user_hidden_member_is_none() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/getUser"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "success": false })))
        .mount(&server)
        .await;

    let member = client_for(&server)
        .get_user("abc123", &MemberId::from("42"))
        .await
        .unwrap();
    assert!(member.is_none());
}
