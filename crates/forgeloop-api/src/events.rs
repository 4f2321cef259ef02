//! Real-time push channel (spec.md §6): a Server-Sent Events stream,
//! optionally scoped by `?project=`, of `{type, timestamp, …}` frames.

use std::convert::Infallible;
use std::time::Duration;

use axum::extract::{Query, State};
use axum::response::sse::{Event as SseEvent, KeepAlive, Sse};
use chrono::Utc;
use futures::{Stream, StreamExt};
use serde::Deserialize;
use serde_json::json;

use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct EventsQuery {
    project: Option<String>,
}

const PUSH_FRAME_TYPES: &[&str] = &[
    "notification",
    "progress_update",
    "validation.step_completed",
    "workflow.state_changed",
    "echo",
];

pub async fn stream_events(
    State(state): State<AppState>,
    Query(query): Query<EventsQuery>,
) -> Sse<impl Stream<Item = Result<SseEvent, Infallible>>> {
    let project = query.project.clone();
    let subscription = state.bus.subscribe(Box::new(move |event| {
        let type_matches = PUSH_FRAME_TYPES.contains(&event.event_type.as_str());
        let project_matches = match &project {
            Some(p) => event
                .payload
                .get("repository")
                .and_then(serde_json::Value::as_str)
                .map(|r| r == p)
                .unwrap_or(false),
            None => true,
        };
        type_matches && project_matches
    }));

    let established = futures::stream::once(async {
        Ok(frame_from_json(json!({
            "type": "connection_established",
            "timestamp": Utc::now(),
        })))
    });

    let forwarded = subscription.map(|event| {
        Ok(frame_from_json(json!({
            "type": event.event_type,
            "timestamp": event.timestamp,
            "payload": event.payload,
        })))
    });

    Sse::new(established.chain(forwarded)).keep_alive(
        KeepAlive::new()
            .interval(Duration::from_secs(15))
            .text("keep-alive"),
    )
}

fn frame_from_json(value: serde_json::Value) -> SseEvent {
    SseEvent::default().data(value.to_string())
}
