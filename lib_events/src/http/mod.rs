//! # HTTP Surface
//!
//! axum routes in front of the [`EventStreamService`]:
//!
//! - `GET /ws/v1/clusters/{cluster}/events?namespace=&resource=`: resource stream.
//! - `GET /ws/v1/clusters/{cluster}/groups/{group}/events?namespace=&instance=`:
//!   group stream.
//! - `POST /feed/v1/clusters/{cluster}/events`: applies one informer change.
//! - `GET /health`.
//!
//! Upgrades always succeed; setup problems are reported over the socket.

use axum::{
    extract::{
        ws::{self, Message, WebSocket, WebSocketUpgrade},
        Path, Query, State,
    },
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use futures_util::{future, SinkExt, StreamExt};
use serde::Deserialize;
use tokio_util::sync::CancellationToken;

use crate::core::session::EventStreamService;
use crate::core::transport::{CloseFrame, FrameSink, FrameStream, WsFrame};
use crate::error::{CacheError, TransportError};
use crate::model::{Caller, Event, GroupTarget, ResourceTarget, SubscriptionTarget};
use crate::services::MemoryEventCache;

/// Shared by every handler.
#[derive(Clone)]
pub struct AppState {
    pub service: EventStreamService,
    pub cache: MemoryEventCache,
    /// Parent of every session token. Cancelling it ends all sessions.
    pub shutdown: CancellationToken,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/ws/v1/clusters/{cluster}/events", get(resource_events))
        .route("/ws/v1/clusters/{cluster}/groups/{group}/events", get(group_events))
        .route("/feed/v1/clusters/{cluster}/events", post(feed_event))
        .route("/health", get(health_handler))
        .with_state(state)
}

#[derive(Debug, Default, Deserialize)]
pub struct ResourceQuery {
    pub namespace: Option<String>,
    pub resource: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct GroupQuery {
    pub namespace: Option<String>,
    pub instance: Option<String>,
}

#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FeedKind {
    Added,
    Updated,
    Deleted,
}

/// Body of a feed request.
#[derive(Debug, Deserialize)]
pub struct FeedChange {
    #[serde(rename = "type")]
    pub kind: FeedKind,
    pub object: Event,
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

/// Bearer token from the `Authorization` header, if any.
pub fn caller_from(headers: &HeaderMap) -> Caller {
    headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(|token| Caller::with_token(token.trim()))
        .unwrap_or_else(Caller::anonymous)
}

async fn resource_events(
    ws: WebSocketUpgrade,
    Path(cluster): Path<String>,
    Query(query): Query<ResourceQuery>,
    headers: HeaderMap,
    State(state): State<AppState>,
) -> Response {
    let target = SubscriptionTarget::Resource(ResourceTarget {
        cluster,
        namespace: query.namespace.unwrap_or_default(),
        name: non_empty(query.resource),
    });
    upgrade(ws, state, caller_from(&headers), target)
}

async fn group_events(
    ws: WebSocketUpgrade,
    Path((cluster, group)): Path<(String, String)>,
    Query(query): Query<GroupQuery>,
    headers: HeaderMap,
    State(state): State<AppState>,
) -> Response {
    let target = SubscriptionTarget::Group(GroupTarget {
        cluster,
        namespace: non_empty(query.namespace),
        group,
        instance: non_empty(query.instance),
    });
    upgrade(ws, state, caller_from(&headers), target)
}

fn upgrade(ws: WebSocketUpgrade, state: AppState, caller: Caller, target: SubscriptionTarget) -> Response {
    ws.on_upgrade(move |socket| async move {
        let (writer, reader) = adapt(socket);
        let report = state
            .service
            .stream(caller, target, writer, reader, &state.shutdown)
            .await;
        log::debug!("session {} finished: {}", report.id, report.reason);
    })
}

/// Splits an axum socket into the frame halves sessions run over.
pub fn adapt(socket: WebSocket) -> (impl FrameSink, impl FrameStream) {
    let (sink, stream) = socket.split();
    let writer = sink
        .sink_map_err(|e| TransportError::Write(e.to_string()))
        .with(|frame: WsFrame| future::ready(Ok::<_, TransportError>(to_message(frame))));
    let reader = stream.map(|msg| {
        msg.map(from_message)
            .map_err(|e| TransportError::Read(e.to_string()))
    });
    (writer, reader)
}

fn to_message(frame: WsFrame) -> Message {
    match frame {
        WsFrame::Text(text) => Message::Text(text.into()),
        WsFrame::Binary(data) => Message::Binary(data.into()),
        WsFrame::Ping(data) => Message::Ping(data.into()),
        WsFrame::Pong(data) => Message::Pong(data.into()),
        WsFrame::Close(frame) => Message::Close(frame.map(|f| ws::CloseFrame {
            code: f.code,
            reason: f.reason.into(),
        })),
    }
}

fn from_message(message: Message) -> WsFrame {
    match message {
        Message::Text(text) => WsFrame::Text(text.as_str().to_owned()),
        Message::Binary(data) => WsFrame::Binary(data.to_vec()),
        Message::Ping(data) => WsFrame::Ping(data.to_vec()),
        Message::Pong(data) => WsFrame::Pong(data.to_vec()),
        Message::Close(frame) => WsFrame::Close(frame.map(|f| CloseFrame {
            code: f.code,
            reason: f.reason.as_str().to_owned(),
        })),
    }
}

async fn feed_event(
    Path(cluster): Path<String>,
    State(state): State<AppState>,
    Json(change): Json<FeedChange>,
) -> Result<StatusCode, (StatusCode, String)> {
    let result = match change.kind {
        FeedKind::Added | FeedKind::Updated => state.cache.upsert(&cluster, change.object),
        FeedKind::Deleted => state.cache.remove(&cluster, change.object),
    };
    match result {
        Ok(()) => Ok(StatusCode::ACCEPTED),
        Err(e @ CacheError::Unavailable { .. }) => Err((StatusCode::NOT_FOUND, e.to_string())),
        Err(e) => {
            log::warn!("feed for {} rejected: {}", cluster, e);
            Err((StatusCode::CONFLICT, e.to_string()))
        }
    }
}

async fn health_handler() -> impl IntoResponse {
    (StatusCode::OK, "OK")
}
