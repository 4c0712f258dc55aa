//! Progress Broadcaster transports: WebSocket preferred, Server-Sent
//! Events as fallback. Authorisation (task owner or admin) and the
//! per-subscriber connection rate limit are enforced identically by both
//! before the stream is handed off.

use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Path, State};
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{IntoResponse, Response};
use futures::stream::Stream;
use futures::StreamExt;
use uuid::Uuid;

use crate::auth::{forbidden, AuthUser};
use crate::error::{not_found, ApiFailure};
use crate::state::AppState;

const CONNECTS_PER_MINUTE: usize = 10;

async fn rate_limited(state: &AppState, subscriber_id: Uuid) -> bool {
    let mut map = state.connection_attempts.lock().await;
    let now = Instant::now();
    let entries = map.entry(subscriber_id).or_default();
    entries.retain(|t| now.duration_since(*t) < Duration::from_secs(60));
    if entries.len() >= CONNECTS_PER_MINUTE {
        return true;
    }
    entries.push(now);
    false
}

async fn authorize(state: &AppState, auth: &AuthUser, task_id: Uuid) -> Result<(), Response> {
    let task = state
        .scheduler
        .status(task_id)
        .await
        .map_err(ApiFailure::from)
        .map_err(IntoResponse::into_response)?
        .ok_or_else(|| not_found("task"))
        .map_err(IntoResponse::into_response)?;

    if task.user_id != auth.user_id && !auth.is_admin_or_moderator() {
        return Err(forbidden());
    }
    Ok(())
}

pub async fn subscribe_ws(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
    Path(task_id): Path<Uuid>,
    ws: WebSocketUpgrade,
) -> Result<Response, Response> {
    authorize(&state, &auth, task_id).await?;
    if rate_limited(&state, auth.user_id).await {
        return Err(crate::error::too_many_requests());
    }

    Ok(ws.on_upgrade(move |socket| forward_progress(socket, state, task_id, auth.user_id)))
}

async fn forward_progress(mut socket: WebSocket, state: Arc<AppState>, task_id: Uuid, subscriber_id: Uuid) {
    let mut events = Box::pin(state.scheduler.subscribe(task_id, subscriber_id));
    while let Some(event) = events.next().await {
        let Ok(text) = serde_json::to_string(&event) else { continue };
        if socket.send(Message::Text(text.into())).await.is_err() {
            break;
        }
    }
    let _ = socket.send(Message::Close(None)).await;
}

pub async fn subscribe_sse(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
    Path(task_id): Path<Uuid>,
) -> Result<Sse<impl Stream<Item = Result<Event, std::convert::Infallible>>>, Response> {
    authorize(&state, &auth, task_id).await?;
    if rate_limited(&state, auth.user_id).await {
        return Err(crate::error::too_many_requests());
    }

    let events = state.scheduler.subscribe(task_id, auth.user_id).map(|event| {
        let payload = serde_json::to_string(&event).unwrap_or_default();
        Ok(Event::default().data(payload))
    });

    Ok(Sse::new(events).keep_alive(KeepAlive::default()))
}
