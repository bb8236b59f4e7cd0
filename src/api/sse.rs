// src/api/sse.rs

//! `GET /daemon/events`: streams bus events to a client. Grounded in
//! `daemon/daemonapi/get_daemon_events.go`'s `writeEvent`/`allowEvent` loop:
//! content-negotiated framing (`text/event-stream` vs. raw `\n\n\x00`
//! frames), an optional `limit` on event count, and an optional `duration`
//! wall-clock budget.

use std::convert::Infallible;
use std::time::Duration;

use axum::extract::{Query, State};
use axum::http::{header, HeaderMap};
use axum::response::Response;
use bytes::Bytes;
use serde::Deserialize;

use crate::api::http::AppState;
use crate::core::events::{Envelope, Filter, MessageKind};

#[derive(Debug, Deserialize, Default)]
pub struct EventsQuery {
    pub limit: Option<u64>,
    pub duration: Option<u64>,
    pub filter: Option<String>,
}

const ALL_KINDS: &[MessageKind] = &[
    MessageKind::ObjectStatusUpdated,
    MessageKind::SetInstanceMonitor,
    MessageKind::InstanceMonitorUpdated,
    MessageKind::InstanceMonitorDeleted,
    MessageKind::NodeMonitorUpdated,
    MessageKind::NodeStatusUpdated,
    MessageKind::NodeStatsUpdated,
    MessageKind::JoinRequest,
    MessageKind::LeaveRequest,
    MessageKind::SetNodeMonitor,
    MessageKind::JoinIgnored,
    MessageKind::JoinError,
    MessageKind::LeaveIgnored,
    MessageKind::LeaveError,
    MessageKind::HbBeating,
    MessageKind::HbStale,
    MessageKind::SubscriberSlow,
];

/// Parses `filter` as `kind[=label=value,...]`; an unrecognized kind name
/// falls back to subscribing to everything (matching the original's
/// permissive "TODO: Honor namespace and selection parameters").
fn parse_filters(filter: Option<&str>) -> Vec<Filter> {
    let Some(spec) = filter else {
        return ALL_KINDS.iter().map(|k| Filter::new(*k)).collect();
    };
    let mut parts = spec.split(',');
    let kind_name = parts.next().unwrap_or_default();
    let kind = ALL_KINDS
        .iter()
        .find(|k| format!("{k:?}").eq_ignore_ascii_case(kind_name))
        .copied();
    match kind {
        Some(k) => vec![Filter::new(k)],
        None => ALL_KINDS.iter().map(|k| Filter::new(*k)).collect(),
    }
}

fn encode(env: &Envelope, sse: bool) -> Bytes {
    let body = serde_json::json!({
        "kind": format!("{:?}", env.message.kind()),
        "labels": env.labels,
        "published_at": env.published_at,
    });
    let text = body.to_string();
    if sse {
        Bytes::from(format!("data: {text}\n\n"))
    } else {
        Bytes::from(format!("{text}\n\n\0"))
    }
}

pub async fn get_daemon_events(
    State(state): State<AppState>,
    Query(query): Query<EventsQuery>,
    headers: HeaderMap,
) -> Response {
    let sse = headers
        .get(header::ACCEPT)
        .and_then(|v| v.to_str().ok())
        .map(|v| v == "text/event-stream")
        .unwrap_or(false);

    let filters = parse_filters(query.filter.as_deref());
    let mut sub = state.bus.subscribe("daemon-events", filters, None, None);
    let limit = query.limit.unwrap_or(0);
    let budget = query.duration.map(Duration::from_secs);

    let stream = async_stream::stream! {
        let mut count: u64 = 0;
        let deadline = budget.map(|d| tokio::time::Instant::now() + d);
        loop {
            let recv = async {
                match deadline {
                    Some(d) => tokio::time::timeout_at(d, sub.recv()).await.ok().flatten(),
                    None => sub.recv().await,
                }
            };
            match recv.await {
                Some(env) => {
                    yield Ok::<Bytes, Infallible>(encode(&env, sse));
                    count += 1;
                    if limit > 0 && count >= limit {
                        break;
                    }
                }
                None => break,
            }
        }
    };

    let body = axum::body::Body::from_stream(stream);

    let mut response = Response::new(body);
    if sse {
        response
            .headers_mut()
            .insert(header::CONTENT_TYPE, "text/event-stream".parse().unwrap());
        response
            .headers_mut()
            .insert(header::CACHE_CONTROL, "no-store".parse().unwrap());
    } else {
        response
            .headers_mut()
            .insert(header::CONTENT_TYPE, "application/json".parse().unwrap());
    }
    response
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recognized_filter_name_narrows_to_one_kind() {
        let filters = parse_filters(Some("HbBeating"));
        assert_eq!(filters.len(), 1);
    }

    #[test]
    fn unrecognized_filter_name_falls_back_to_everything() {
        let filters = parse_filters(Some("not_a_real_kind"));
        assert_eq!(filters.len(), ALL_KINDS.len());
    }

    #[test]
    fn no_filter_subscribes_to_everything() {
        let filters = parse_filters(None);
        assert_eq!(filters.len(), ALL_KINDS.len());
    }

    fn stale_envelope() -> Envelope {
        Envelope {
            message: crate::core::events::BusMessage::HbStale {
                peer: "n2".into(),
                transport: "hb0".into(),
                status: Default::default(),
            },
            labels: Default::default(),
            published_at: chrono::Utc::now(),
            ack: None,
        }
    }

    #[test]
    fn sse_framing_uses_data_prefix_and_blank_line() {
        let framed = encode(&stale_envelope(), true);
        let text = String::from_utf8(framed.to_vec()).unwrap();
        assert!(text.starts_with("data: "));
        assert!(text.ends_with("\n\n"));
    }

    #[test]
    fn raw_framing_uses_nul_terminator() {
        let framed = encode(&stale_envelope(), false);
        assert!(framed.ends_with(b"\n\n\0"));
    }
}
