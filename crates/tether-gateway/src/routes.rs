//! Router configuration.
//!
//! This module sets up the Axum router with all routes and middleware.

use std::sync::Arc;

use axum::routing::{delete, get, post, put};
use axum::Router;
use tower::ServiceBuilder;
use tower_http::cors::{Any, CorsLayer};
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;

use tether_auth::JwtValidator;
use tether_control::CompanionPlane;

use crate::handlers::{calls, connections, health, internal, presence, signals};
use crate::state::GatewayState;

/// Create the gateway router with all routes and middleware.
///
/// # Routes
///
/// ## Public
/// - `GET /health` - Health check
///
/// ## Connections (authenticated)
/// - `POST /v1/connections` - Invite a companion
/// - `GET /v1/connections` - List connections
/// - `DELETE /v1/connections/:connection_id` - Revoke
/// - `POST /v1/connections/:connection_id/block` - Block
/// - `PUT /v1/connections/:connection_id/sharing` - Toggle availability sharing
/// - `POST /v1/identity/link` - Link the token's email to the caller
///
/// ## Presence (authenticated)
/// - `PUT /v1/presence` - Heartbeat
/// - `GET /v1/presence` - Presence of connected users
///
/// ## Calls (authenticated)
/// - `POST /v1/calls` - Place a call
/// - `GET /v1/calls/incoming` - Ringing calls for the caller
/// - `GET /v1/calls/:call_id` - Get a call
/// - `POST /v1/calls/:call_id/respond` - Accept or decline
/// - `POST /v1/calls/:call_id/end` - Hang up
/// - `POST /v1/calls/:call_id/signals` - Relay a signal
/// - `GET /v1/signals` - Receive signals
///
/// ## Internal
/// - `POST /internal/v1/identities` - Bind a contact to an account
/// - `POST /internal/v1/sweep` - Run maintenance once
/// - `GET /internal/health` - Internal health check
pub fn create_router<C, V>(state: GatewayState<C, V>) -> Router
where
    C: CompanionPlane + 'static,
    V: JwtValidator + 'static,
{
    let cors = build_cors_layer(&state.config.cors_origins);
    let middleware = ServiceBuilder::new()
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .layer(RequestBodyLimitLayer::new(state.config.max_body_bytes))
        .layer(TimeoutLayer::new(state.config.request_timeout()));

    let state = Arc::new(state);

    Router::new()
        // Health (public)
        .route("/health", get(health::health))
        // Connections
        .route(
            "/v1/connections",
            get(connections::list_connections::<C, V>).post(connections::invite::<C, V>),
        )
        .route(
            "/v1/connections/:connection_id",
            delete(connections::revoke::<C, V>),
        )
        .route(
            "/v1/connections/:connection_id/block",
            post(connections::block::<C, V>),
        )
        .route(
            "/v1/connections/:connection_id/sharing",
            put(connections::set_sharing::<C, V>),
        )
        .route(
            "/v1/identity/link",
            post(connections::link_identity::<C, V>),
        )
        // Presence
        .route(
            "/v1/presence",
            get(presence::query::<C, V>).put(presence::heartbeat::<C, V>),
        )
        // Calls
        .route("/v1/calls", post(calls::initiate::<C, V>))
        .route("/v1/calls/incoming", get(calls::incoming::<C, V>))
        .route("/v1/calls/:call_id", get(calls::get_call::<C, V>))
        .route("/v1/calls/:call_id/respond", post(calls::respond::<C, V>))
        .route("/v1/calls/:call_id/end", post(calls::end::<C, V>))
        // Signaling
        .route("/v1/calls/:call_id/signals", post(signals::send::<C, V>))
        .route("/v1/signals", get(signals::receive::<C, V>))
        // Internal
        .route(
            "/internal/v1/identities",
            post(internal::register_identity::<C, V>),
        )
        .route("/internal/v1/sweep", post(internal::sweep::<C, V>))
        .route("/internal/health", get(health::internal_health::<C, V>))
        // Middleware
        .layer(middleware)
        .with_state(state)
}

/// Build the CORS layer from configured origins.
fn build_cors_layer(origins: &[String]) -> CorsLayer {
    if origins.iter().any(|o| o == "*") {
        CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any)
    } else {
        let origins: Vec<_> = origins.iter().filter_map(|o| o.parse().ok()).collect();

        CorsLayer::new()
            .allow_origin(origins)
            .allow_methods(Any)
            .allow_headers(Any)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::header::AUTHORIZATION;
    use axum::http::{HeaderName, HeaderValue, StatusCode};
    use axum_test::TestServer;
    use serde_json::{json, Value};
    use tempfile::TempDir;
    use tether_auth::MockJwtValidator;
    use tether_control::{CompanionService, UserId};
    use tether_store::RocksStore;

    use crate::config::GatewayConfig;

    const INTERNAL_TOKEN: &str = "s3cret";

    fn test_server() -> (TestServer, TempDir) {
        let dir = TempDir::new().unwrap();
        let store = Arc::new(RocksStore::open(dir.path()).unwrap());
        let control = Arc::new(CompanionService::with_defaults(store));
        let config = GatewayConfig {
            internal_token: Some(INTERNAL_TOKEN.to_string()),
            ..GatewayConfig::default()
        };
        let state = GatewayState::new(control, Arc::new(MockJwtValidator), config);
        (TestServer::new(create_router(state)).unwrap(), dir)
    }

    fn bearer(user: UserId) -> HeaderValue {
        HeaderValue::from_str(&format!("Bearer test-token:{user}")).unwrap()
    }

    fn bearer_with_email(user: UserId, email: &str) -> HeaderValue {
        HeaderValue::from_str(&format!("Bearer test-token:{user}:{email}")).unwrap()
    }

    fn internal_token() -> (HeaderName, HeaderValue) {
        (
            HeaderName::from_static("x-internal-token"),
            HeaderValue::from_static(INTERNAL_TOKEN),
        )
    }

    #[test]
    fn cors_specific_origins() {
        let origins = vec![
            "http://localhost:3000".to_string(),
            "https://app.example.com".to_string(),
        ];
        let _layer = build_cors_layer(&origins);
    }

    #[tokio::test]
    async fn health_is_public() {
        let (server, _dir) = test_server();
        let response = server.get("/health").await;
        assert_eq!(response.status_code(), StatusCode::OK);
    }

    #[tokio::test]
    async fn missing_token_is_unauthorized() {
        let (server, _dir) = test_server();
        let response = server.get("/v1/presence").await;
        assert_eq!(response.status_code(), StatusCode::UNAUTHORIZED);
        assert_eq!(response.json::<Value>()["error"]["code"], "unauthorized");

        let response = server
            .get("/v1/presence")
            .add_header(AUTHORIZATION, HeaderValue::from_static("Bearer nope"))
            .await;
        assert_eq!(response.status_code(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn student_calls_parent_end_to_end() {
        let (server, _dir) = test_server();
        let student = UserId::generate();
        let parent = UserId::generate();
        let stranger = UserId::generate();

        // Invite, then the parent signs in and links their email.
        let response = server
            .post("/v1/connections")
            .add_header(AUTHORIZATION, bearer(student))
            .json(&json!({"contact": "Mom@Example.com", "relationship_label": "parent"}))
            .await;
        assert_eq!(response.status_code(), StatusCode::CREATED);
        assert_eq!(response.json::<Value>()["status"], "pending");

        let response = server
            .post("/v1/identity/link")
            .add_header(AUTHORIZATION, bearer_with_email(parent, "mom@example.com"))
            .await;
        assert_eq!(response.status_code(), StatusCode::OK);
        assert_eq!(response.json::<Value>()["activated"][0]["status"], "active");

        // Presence flows one way per heartbeat.
        let response = server
            .put("/v1/presence")
            .add_header(AUTHORIZATION, bearer(parent))
            .json(&json!({"is_available": true, "custom_message": "At work"}))
            .await;
        assert_eq!(response.status_code(), StatusCode::OK);

        let presence = server
            .get("/v1/presence")
            .add_header(AUTHORIZATION, bearer(student))
            .await
            .json::<Value>();
        assert_eq!(presence["companions"][0]["user_id"], parent.to_string());
        assert_eq!(presence["companions"][0]["status"], "online");
        assert_eq!(presence["companions"][0]["is_available_for_calls"], true);

        let presence = server
            .get("/v1/presence")
            .add_header(AUTHORIZATION, bearer(stranger))
            .await
            .json::<Value>();
        assert_eq!(presence["companions"], json!([]));

        // Ring.
        let response = server
            .post("/v1/calls")
            .add_header(AUTHORIZATION, bearer(student))
            .json(&json!({"recipient_id": parent.to_string()}))
            .await;
        assert_eq!(response.status_code(), StatusCode::CREATED);
        let call = response.json::<Value>();
        let call_id = call["id"].as_str().unwrap().to_string();
        assert_eq!(call["status"], "ringing");
        assert!(call["channel_ref"].is_null());

        let incoming = server
            .get("/v1/calls/incoming")
            .add_header(AUTHORIZATION, bearer(parent))
            .await
            .json::<Value>();
        assert_eq!(incoming["calls"][0]["id"], call_id.as_str());

        // Negotiate.
        let response = server
            .post(&format!("/v1/calls/{call_id}/signals"))
            .add_header(AUTHORIZATION, bearer(student))
            .json(&json!({"to_user_id": parent.to_string(), "type": "offer", "payload": "v=0"}))
            .await;
        assert_eq!(response.status_code(), StatusCode::CREATED);

        let inbox = server
            .get("/v1/signals")
            .add_header(AUTHORIZATION, bearer(parent))
            .add_query_param("call_id", &call_id)
            .await
            .json::<Value>();
        assert_eq!(inbox["messages"][0]["type"], "offer");
        assert_eq!(inbox["messages"][0]["payload"], "v=0");
        let cursor = inbox["cursor"].as_str().unwrap().to_string();

        let inbox = server
            .get("/v1/signals")
            .add_header(AUTHORIZATION, bearer(parent))
            .add_query_param("since", &cursor)
            .await
            .json::<Value>();
        assert_eq!(inbox["messages"], json!([]));

        // Outsiders see nothing.
        let response = server
            .get(&format!("/v1/calls/{call_id}"))
            .add_header(AUTHORIZATION, bearer(stranger))
            .await;
        assert_eq!(response.status_code(), StatusCode::FORBIDDEN);

        // Answer and hang up.
        let response = server
            .post(&format!("/v1/calls/{call_id}/respond"))
            .add_header(AUTHORIZATION, bearer(student))
            .json(&json!({"action": "accept"}))
            .await;
        assert_eq!(response.status_code(), StatusCode::FORBIDDEN);

        let accepted = server
            .post(&format!("/v1/calls/{call_id}/respond"))
            .add_header(AUTHORIZATION, bearer(parent))
            .json(&json!({"action": "accept"}))
            .await
            .json::<Value>();
        assert_eq!(accepted["status"], "accepted");
        assert!(accepted["channel_ref"].is_string());

        let ended = server
            .post(&format!("/v1/calls/{call_id}/end"))
            .add_header(AUTHORIZATION, bearer(student))
            .await
            .json::<Value>();
        assert_eq!(ended["status"], "ended");
        assert!(ended["channel_ref"].is_null());

        let response = server
            .post(&format!("/v1/calls/{call_id}/respond"))
            .add_header(AUTHORIZATION, bearer(parent))
            .json(&json!({"action": "accept"}))
            .await;
        assert_eq!(response.status_code(), StatusCode::CONFLICT);
        assert_eq!(response.json::<Value>()["error"]["code"], "invalid_transition");
    }

    #[tokio::test]
    async fn call_requires_connection() {
        let (server, _dir) = test_server();
        let response = server
            .post("/v1/calls")
            .add_header(AUTHORIZATION, bearer(UserId::generate()))
            .json(&json!({"recipient_id": UserId::generate().to_string()}))
            .await;
        assert_eq!(response.status_code(), StatusCode::FORBIDDEN);
        assert_eq!(response.json::<Value>()["error"]["code"], "not_connected");
    }

    #[tokio::test]
    async fn malformed_input_is_rejected() {
        let (server, _dir) = test_server();
        let user = UserId::generate();

        let response = server
            .get("/v1/calls/not-a-uuid")
            .add_header(AUTHORIZATION, bearer(user))
            .await;
        assert_eq!(response.status_code(), StatusCode::BAD_REQUEST);

        let response = server
            .post("/v1/connections")
            .add_header(AUTHORIZATION, bearer(user))
            .json(&json!({"contact": "no-at-sign", "relationship_label": "parent"}))
            .await;
        assert_eq!(response.status_code(), StatusCode::UNPROCESSABLE_ENTITY);

        let response = server
            .post("/v1/connections")
            .add_header(AUTHORIZATION, bearer(user))
            .json(&json!({"contact": "mom@example.com", "relationship_label": " "}))
            .await;
        assert_eq!(response.status_code(), StatusCode::BAD_REQUEST);

        let response = server
            .get("/v1/signals")
            .add_header(AUTHORIZATION, bearer(user))
            .add_query_param("since", "yesterday")
            .await;
        assert_eq!(response.status_code(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn internal_routes_require_token() {
        let (server, _dir) = test_server();
        let student = UserId::generate();
        let parent = UserId::generate();

        server
            .post("/v1/connections")
            .add_header(AUTHORIZATION, bearer(student))
            .json(&json!({"contact": "dad@example.com", "relationship_label": "parent"}))
            .await;

        let body = json!({"contact": "dad@example.com", "user_id": parent.to_string()});
        let response = server.post("/internal/v1/identities").json(&body).await;
        assert_eq!(response.status_code(), StatusCode::UNAUTHORIZED);

        let (name, value) = internal_token();
        let response = server
            .post("/internal/v1/identities")
            .add_header(name, value)
            .json(&body)
            .await;
        assert_eq!(response.status_code(), StatusCode::OK);
        assert_eq!(response.json::<Value>()["activated"].as_array().unwrap().len(), 1);

        let (name, value) = internal_token();
        let report = server
            .post("/internal/v1/sweep")
            .add_header(name, value)
            .await
            .json::<Value>();
        assert_eq!(report["expired_calls"], 0);

        let response = server.get("/internal/health").await;
        assert_eq!(response.status_code(), StatusCode::UNAUTHORIZED);

        let (name, value) = internal_token();
        let probe = server
            .get("/internal/health")
            .add_header(name, value)
            .await
            .json::<Value>();
        assert_eq!(probe["sweep"], "in_process");
        assert_eq!(probe["internal_token_required"], true);
    }
}
