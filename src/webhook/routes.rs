//! HTTP surface of the bridge.
//!
//! `POST /webhook` answers with HTTP 200 for every request, whatever the
//! body looks like. The voice platform retries anything else.

use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::http::{HeaderMap, HeaderName, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use serde_json::{Value, json};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{Instrument, info_span, warn};
use uuid::Uuid;

use crate::conversation::orchestrator::ConversationOrchestrator;
use crate::conversation::request::InboundTurn;
use crate::stream::ResponseStreamAdapter;

const REQUEST_ID_HEADER: &str = "x-request-id";

/// Shared state for bridge routes.
#[derive(Clone)]
pub struct BridgeState {
    pub orchestrator: Arc<ConversationOrchestrator>,
    pub adapter: Arc<ResponseStreamAdapter>,
}

/// POST /webhook
///
/// One conversational turn. Streams `chat.completion.chunk` frames unless
/// the body sets `"stream": false`.
async fn post_webhook(
    State(state): State<BridgeState>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let request_id = Uuid::new_v4();
    let span = info_span!("webhook", request_id = %request_id);

    async move {
        let body: Value = match serde_json::from_slice(&body) {
            Ok(value) => value,
            Err(e) => {
                warn!(error = %e, "Unparsable webhook body, treating as empty");
                Value::Null
            }
        };
        let turn = InboundTurn::from_body(&body);
        let reply = state.orchestrator.handle_turn(&headers, &body, &turn).await;

        let mut response = if turn.stream {
            state.adapter.sse(&reply).into_response()
        } else {
            Json(state.adapter.completion(&reply, &turn.messages)).into_response()
        };

        if let Ok(value) = HeaderValue::from_str(&request_id.to_string()) {
            response
                .headers_mut()
                .insert(HeaderName::from_static(REQUEST_ID_HEADER), value);
        }
        response
    }
    .instrument(span)
    .await
}

/// GET /webhook
///
/// Static capability descriptor for discovery and health probes.
async fn get_webhook() -> impl IntoResponse {
    Json(json!({
        "service": "voice-bridge",
        "version": env!("CARGO_PKG_VERSION"),
        "object": "chat.completion.chunk",
        "events": ["role", "content", "stop", "[DONE]"],
        "features": {
            "streaming": true,
            "non_streaming_fallback": true,
            "interruption_control": true,
            "voice_settings": true,
            "cited_sources": true,
            "structured_lessons": true
        }
    }))
}

/// GET /health
async fn health() -> impl IntoResponse {
    Json(json!({"status": "ok"}))
}

/// GET /api/educational-sessions/{id}
///
/// Progress of one educational session plus its response log.
async fn get_educational_session(
    State(state): State<BridgeState>,
    Path(id): Path<String>,
) -> impl IntoResponse {
    let engine = state.orchestrator.engine();
    let session = match engine.get_session(&id).await {
        Ok(Some(session)) => session,
        Ok(None) => {
            return (
                StatusCode::NOT_FOUND,
                Json(json!({"error": format!("Educational session {id} not found")})),
            )
                .into_response();
        }
        Err(e) => {
            warn!(educational_session_id = %id, error = %e, "Session read failed");
            return (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({"error": e.to_string()})),
            )
                .into_response();
        }
    };

    let responses = match engine.list_responses(&id).await {
        Ok(responses) => responses,
        Err(e) => {
            warn!(educational_session_id = %id, error = %e, "Response log read failed");
            Vec::new()
        }
    };

    Json(json!({
        "session": session,
        "responses": responses,
    }))
    .into_response()
}

/// Build the bridge router.
pub fn bridge_routes(state: BridgeState) -> Router {
    Router::new()
        .route("/webhook", get(get_webhook).post(post_webhook))
        .route("/health", get(health))
        .route("/api/educational-sessions/{id}", get(get_educational_session))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}
