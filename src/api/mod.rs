//! HTTP API for the telecall hub
//!
//! Read-side companion to the WebSocket hub:
//! - `GET /api/sessions/:id` - Session record
//! - `GET /api/sessions/:id/chat` - Paginated chat history
//! - `DELETE /api/sessions/:id/chat/:message_id` - Remove a chat message
//! - `GET /health` - Fault-window and ICE server health
//! - `GET /metrics` - Hub counters

use axum::{
    extract::{Path, Query, State},
    http::{header, HeaderMap, StatusCode},
    response::IntoResponse,
    routing::{delete, get},
    Json, Router,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::auth::{Identity, IdentityVerifier};
use crate::hub::{HubMetrics, MetricsSnapshot};
use crate::ice::{HealthState, IceProvider};
use crate::monitor::FaultClassifier;
use crate::store::{MessageStore, SessionStore};
use crate::{Error, Result};

/// Application state shared across handlers
#[derive(Clone)]
pub struct ApiState {
    pub sessions: Arc<dyn SessionStore>,
    pub messages: Arc<dyn MessageStore>,
    pub ice: Arc<IceProvider>,
    pub faults: Arc<FaultClassifier>,
    pub metrics: Arc<HubMetrics>,
    pub verifier: Arc<dyn IdentityVerifier>,
}

/// Build the HTTP API router
pub fn build_router(state: ApiState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/api/sessions/:id", get(get_session))
        .route("/api/sessions/:id/chat", get(get_chat_history))
        .route("/api/sessions/:id/chat/:message_id", delete(delete_chat))
        .route("/health", get(health_check))
        .route("/metrics", get(metrics_handler))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Error response
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub message: String,
}

fn error_response(err: Error) -> (StatusCode, Json<ErrorResponse>) {
    let (status, code) = match &err {
        Error::NotFound(_) => (StatusCode::NOT_FOUND, "not_found"),
        Error::Forbidden(_) => (StatusCode::FORBIDDEN, "forbidden"),
        Error::Conflict(_) => (StatusCode::CONFLICT, "conflict"),
        Error::SessionEnded(_) => (StatusCode::GONE, "session_ended"),
        Error::Authentication(_) => (StatusCode::UNAUTHORIZED, "unauthenticated"),
        Error::RateLimited(_) => (StatusCode::TOO_MANY_REQUESTS, "rate_limited"),
        Error::Negotiation(_) | Error::InvalidConfig(_) | Error::Serialization(_) => {
            (StatusCode::BAD_REQUEST, "invalid")
        }
        _ => (StatusCode::INTERNAL_SERVER_ERROR, "internal"),
    };

    (
        status,
        Json(ErrorResponse {
            error: code.to_string(),
            message: err.to_string(),
        }),
    )
}

async fn bearer_identity(state: &ApiState, headers: &HeaderMap) -> Result<Identity> {
    let value = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| Error::Authentication("missing authorization header".to_string()))?;
    let token = value
        .strip_prefix("Bearer ")
        .ok_or_else(|| Error::Authentication("expected bearer token".to_string()))?;
    state.verifier.verify(token).await
}

/// Get a session record
///
/// GET /api/sessions/:id
async fn get_session(
    State(state): State<ApiState>,
    Path(session_id): Path<String>,
) -> impl IntoResponse {
    match state.sessions.get(&session_id).await {
        Ok(Some(session)) => (StatusCode::OK, Json(session)).into_response(),
        Ok(None) => {
            error_response(Error::NotFound(format!("session {}", session_id))).into_response()
        }
        Err(e) => error_response(e).into_response(),
    }
}

/// Chat history query parameters
#[derive(Debug, Deserialize)]
pub struct ChatHistoryQuery {
    /// Page number; page 0 is the oldest
    #[serde(default)]
    pub page: usize,

    /// Messages per page
    #[serde(default = "default_page_size")]
    pub page_size: usize,
}

fn default_page_size() -> usize {
    50
}

/// Chat history response, newest-last within the page
#[derive(Debug, Serialize)]
pub struct ChatHistoryResponse {
    pub session_id: String,
    pub page: usize,
    pub page_size: usize,
    pub messages: Vec<crate::store::ChatMessage>,
}

/// Get paginated chat history for a session
///
/// GET /api/sessions/:id/chat?page=0&page_size=50
async fn get_chat_history(
    State(state): State<ApiState>,
    Path(session_id): Path<String>,
    Query(query): Query<ChatHistoryQuery>,
) -> impl IntoResponse {
    if query.page_size == 0 || query.page_size > 500 {
        return error_response(Error::InvalidConfig(
            "page_size must be between 1 and 500".to_string(),
        ))
        .into_response();
    }

    match state.sessions.get(&session_id).await {
        Ok(Some(_)) => {}
        Ok(None) => {
            return error_response(Error::NotFound(format!("session {}", session_id)))
                .into_response()
        }
        Err(e) => return error_response(e).into_response(),
    }

    match state
        .messages
        .chat_history(&session_id, query.page, query.page_size)
        .await
    {
        Ok(messages) => (
            StatusCode::OK,
            Json(ChatHistoryResponse {
                session_id,
                page: query.page,
                page_size: query.page_size,
                messages,
            }),
        )
            .into_response(),
        Err(e) => error_response(e).into_response(),
    }
}

/// Delete a chat message; sender or admin only
///
/// DELETE /api/sessions/:id/chat/:message_id
async fn delete_chat(
    State(state): State<ApiState>,
    Path((session_id, message_id)): Path<(String, String)>,
    headers: HeaderMap,
) -> impl IntoResponse {
    let requester = match bearer_identity(&state, &headers).await {
        Ok(identity) => identity,
        Err(e) => return error_response(e).into_response(),
    };

    match state
        .messages
        .delete_chat(&session_id, &message_id, &requester)
        .await
    {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(e) => error_response(e).into_response(),
    }
}

/// Health response
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    /// "ok" or "degraded" from the recent fault window
    pub status: String,
    /// Last successful credential rotation
    pub credentials_rotated_at: Option<DateTime<Utc>>,
    /// Per-URL ICE server health
    pub ice_servers: HashMap<String, HealthState>,
}

/// Health check endpoint
///
/// GET /health
async fn health_check(State(state): State<ApiState>) -> impl IntoResponse {
    let ice = state.ice.status();
    let healthy = state.faults.is_system_healthy();

    let status = if healthy { "ok" } else { "degraded" };
    let code = if healthy {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    (
        code,
        Json(HealthResponse {
            status: status.to_string(),
            credentials_rotated_at: ice.rotated_at,
            ice_servers: ice.server_health,
        }),
    )
}

/// Metrics response
#[derive(Debug, Serialize)]
pub struct MetricsResponse {
    #[serde(flatten)]
    pub counters: MetricsSnapshot,
    pub credentials_rotated_at: Option<DateTime<Utc>>,
}

/// Metrics endpoint
///
/// GET /metrics
async fn metrics_handler(State(state): State<ApiState>) -> Json<MetricsResponse> {
    Json(MetricsResponse {
        counters: state.metrics.snapshot(),
        credentials_rotated_at: state.ice.status().rotated_at,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::JwtVerifier;
    use crate::config::IceProviderConfig;
    use crate::store::{ChatKind, ChatMessage, MemoryStore, PartyRole, Session};

    fn test_state() -> ApiState {
        let store = Arc::new(MemoryStore::new());
        ApiState {
            sessions: store.clone(),
            messages: store,
            ice: IceProvider::new(IceProviderConfig::default()),
            faults: Arc::new(FaultClassifier::new()),
            metrics: Arc::new(HubMetrics::new()),
            verifier: Arc::new(JwtVerifier::new("test-secret".to_string())),
        }
    }

    fn chat(session_id: &str, sender: &str, body: &str) -> ChatMessage {
        ChatMessage {
            id: uuid::Uuid::new_v4().to_string(),
            session_id: session_id.to_string(),
            sender: sender.to_string(),
            sender_role: PartyRole::Initiator,
            body: body.to_string(),
            kind: ChatKind::Text,
            sent_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_get_session_found_and_missing() {
        let state = test_state();
        let session = Session::new("alice".to_string(), "bob".to_string(), None).unwrap();
        let id = session.id.clone();
        state.sessions.insert(session).await.unwrap();

        let response = get_session(State(state.clone()), Path(id)).await.into_response();
        assert_eq!(response.status(), StatusCode::OK);

        let response = get_session(State(state), Path("missing".to_string()))
            .await
            .into_response();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_chat_history_rejects_bad_page_size() {
        let state = test_state();
        let response = get_chat_history(
            State(state),
            Path("s1".to_string()),
            Query(ChatHistoryQuery {
                page: 0,
                page_size: 0,
            }),
        )
        .await
        .into_response();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_delete_chat_requires_bearer_token() {
        let state = test_state();
        let session = Session::new("alice".to_string(), "bob".to_string(), None).unwrap();
        let session_id = session.id.clone();
        state.sessions.insert(session).await.unwrap();

        let message = chat(&session_id, "alice", "hello");
        let message_id = message.id.clone();
        state.messages.append_chat(message).await.unwrap();

        let response = delete_chat(
            State(state.clone()),
            Path((session_id.clone(), message_id.clone())),
            HeaderMap::new(),
        )
        .await
        .into_response();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

        // Sender may delete their own message
        let verifier = JwtVerifier::new("test-secret".to_string());
        let token = verifier.generate("alice", 60).unwrap();
        let mut headers = HeaderMap::new();
        headers.insert(
            header::AUTHORIZATION,
            format!("Bearer {}", token).parse().unwrap(),
        );
        let response = delete_chat(State(state), Path((session_id, message_id)), headers)
            .await
            .into_response();
        assert_eq!(response.status(), StatusCode::NO_CONTENT);
    }

    #[tokio::test]
    async fn test_health_reports_ok_without_faults() {
        let state = test_state();
        let response = health_check(State(state)).await.into_response();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[test]
    fn test_error_mapping() {
        let (status, _) = error_response(Error::SessionEnded("s1".to_string()));
        assert_eq!(status, StatusCode::GONE);
        let (status, _) = error_response(Error::RateLimited("chat".to_string()));
        assert_eq!(status, StatusCode::TOO_MANY_REQUESTS);
        let (status, _) = error_response(Error::Storage("disk".to_string()));
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    }
}
