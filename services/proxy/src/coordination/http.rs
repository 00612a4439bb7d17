//! Coordination HTTP endpoints.
//!
//! - `GET  /history`       — raw history octets, 404 when none uploaded
//! - `POST /history`       — upload history (raw body), invalidates
//!                           breakpoints when the content hash changed
//! - `GET  /breakpoints`   — `{"breakpoints":[<ids>]}`
//! - `POST /breakpoints`   — replace the breakpoint set
//! - `POST /current-event` — `{"eventId":<n>}`, republished to the UI bus
//! - `DELETE /current-event`
//! - `GET  /test`          — liveness probe
//!
//! Error responses are `{"error":"<text>"}` with 400/404/405 status.
//! No authentication; the server binds loopback only.

use super::{CoordinationEvent, CoordinationState};
use axum::{
    Json, Router,
    body::Bytes,
    extract::State,
    http::{StatusCode, header},
    response::{IntoResponse, Response},
    routing::{get, post},
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::debug;

#[derive(Serialize)]
struct ErrorBody {
    error: String,
}

#[derive(Serialize, Deserialize)]
struct BreakpointsBody {
    breakpoints: Vec<u64>,
}

#[derive(Deserialize)]
struct CurrentEventBody {
    #[serde(rename = "eventId")]
    event_id: u64,
}

pub fn build_router(state: CoordinationState) -> Router {
    Router::new()
        .route("/history", get(get_history).post(post_history))
        .route("/breakpoints", get(get_breakpoints).post(post_breakpoints))
        .route(
            "/current-event",
            post(post_current_event).delete(delete_current_event),
        )
        .route("/test", get(get_test))
        .fallback(not_found)
        .method_not_allowed_fallback(method_not_allowed)
        .with_state(state)
}

async fn get_history(State(state): State<CoordinationState>) -> Response {
    let store = state.store.lock().unwrap();
    match store.history() {
        Some(bytes) => (
            [(header::CONTENT_TYPE, "application/octet-stream")],
            bytes.to_vec(),
        )
            .into_response(),
        None => error_response(StatusCode::NOT_FOUND, "No current history available"),
    }
}

async fn post_history(State(state): State<CoordinationState>, body: Bytes) -> Response {
    debug!(len = body.len(), "history uploaded");
    state.store.lock().unwrap().set_history(body.to_vec());
    StatusCode::OK.into_response()
}

async fn get_breakpoints(State(state): State<CoordinationState>) -> Response {
    let breakpoints = state.store.lock().unwrap().breakpoints();
    Json(BreakpointsBody { breakpoints }).into_response()
}

async fn post_breakpoints(State(state): State<CoordinationState>, body: Bytes) -> Response {
    let parsed: BreakpointsBody = match serde_json::from_slice(&body) {
        Ok(parsed) => parsed,
        Err(e) => return error_response(StatusCode::BAD_REQUEST, &e.to_string()),
    };
    state
        .store
        .lock()
        .unwrap()
        .set_breakpoints(parsed.breakpoints);
    StatusCode::OK.into_response()
}

async fn post_current_event(State(state): State<CoordinationState>, body: Bytes) -> Response {
    let parsed: CurrentEventBody = match serde_json::from_slice(&body) {
        Ok(parsed) => parsed,
        Err(e) => return error_response(StatusCode::BAD_REQUEST, &e.to_string()),
    };
    state
        .store
        .lock()
        .unwrap()
        .set_highlighted_event(Some(parsed.event_id));
    let _ = state.events.send(CoordinationEvent::CurrentEventChanged {
        event_id: Some(parsed.event_id),
    });
    StatusCode::OK.into_response()
}

async fn delete_current_event(State(state): State<CoordinationState>) -> Response {
    state.store.lock().unwrap().set_highlighted_event(None);
    let _ = state
        .events
        .send(CoordinationEvent::CurrentEventChanged { event_id: None });
    StatusCode::OK.into_response()
}

async fn get_test(State(state): State<CoordinationState>) -> Response {
    Json(json!({ "status": "ok", "port": state.port })).into_response()
}

async fn not_found() -> Response {
    error_response(StatusCode::NOT_FOUND, "Not found")
}

async fn method_not_allowed() -> Response {
    error_response(StatusCode::METHOD_NOT_ALLOWED, "Method not allowed")
}

fn error_response(status: StatusCode, message: &str) -> Response {
    (
        status,
        Json(ErrorBody {
            error: message.to_owned(),
        }),
    )
        .into_response()
}
