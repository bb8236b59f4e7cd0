// src/api/http.rs

//! The HTTP REST surface: the orchestration API boundary from spec.md §4.5
//! and the endpoint list from spec.md §6. Built with `axum`, mirroring
//! `server/metrics_server.rs`'s `Router`/`axum::serve` idiom.
//!
//! `post_object_monitor` is grounded directly in
//! `daemon/daemonapi/post_object_monitor.go`: validate the path is known
//! locally, publish a `SetInstanceMonitor` with a fresh orchestration id,
//! then race the ack against a timeout. The original also races request
//! cancellation (`ctx.Request().Context().Done()`); axum does not expose a
//! disconnect future without extra middleware, so this reference
//! implementation races only ack-vs-timeout and relies on the publisher's
//! own timeout to guarantee no expectation is silently dropped forever.

use std::str::FromStr;
use std::time::Duration;

use axum::extract::{Path as AxPath, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::api::snapshot::ClusterSnapshot;
use crate::core::errors::OrchestratorError;
use crate::core::events::{path_label, BusMessage, EventBus, MonitorUpdate};
use crate::core::events::node_label;
use crate::core::model::instance::{GlobalExpect, GlobalExpectOptions, LocalExpect, MonitorState};
use crate::core::model::node::NodeMonitorState;
use crate::core::path::Path as ObjPath;

/// Fallback used only by tests that build an `AppState` without a config.
const DEFAULT_SET_MONITOR_DEADLINE: Duration = Duration::from_millis(300);

#[derive(Clone)]
pub struct AppState {
    pub bus: EventBus,
    pub snapshot: ClusterSnapshot,
    pub localhost: String,
    /// Configured `set_monitor_deadline` (spec.md §4.5's 300ms default,
    /// overridable per `config::Config`).
    pub set_monitor_deadline: Duration,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/daemon/status", get(get_daemon_status))
        .route("/daemon/events", get(crate::api::sse::get_daemon_events))
        .route("/object/monitor", post(post_object_monitor))
        .route("/object/action/{verb}", post(post_object_action))
        .route("/node/clear", post(post_node_clear))
        .route("/node/monitor", post(post_node_monitor))
        .route("/object/clear", post(post_object_clear))
        .route("/object/abort", post(post_object_abort))
        .route("/auth/token", post(post_auth_token))
        .route("/relay/message", get(get_relay_message).post(post_relay_message))
        .with_state(state)
}

/// A problem document, per spec.md §6 "all error responses use a
/// structured problem document".
struct ApiError(OrchestratorError);

impl From<OrchestratorError> for ApiError {
    fn from(e: OrchestratorError) -> Self {
        ApiError(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let problem = self.0.to_problem();
        let status = StatusCode::from_u16(problem.status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        (status, Json(problem)).into_response()
    }
}

#[derive(Debug, Deserialize)]
pub struct ObjectMonitorRequest {
    pub path: String,
    pub global_expect: Option<GlobalExpect>,
    pub local_expect: Option<LocalExpect>,
    pub state: Option<MonitorState>,
    pub global_expect_options: Option<GlobalExpectOptions>,
}

#[derive(Debug, Serialize)]
pub struct ObjectMonitorResponse {
    pub orchestration_id: Uuid,
}

async fn post_object_monitor(
    State(state): State<AppState>,
    Json(body): Json<ObjectMonitorRequest>,
) -> Result<Json<ObjectMonitorResponse>, ApiError> {
    set_instance_monitor(
        &state,
        &body.path,
        MonitorUpdate {
            state: body.state,
            local_expect: body.local_expect,
            global_expect: body.global_expect,
            global_expect_options: body.global_expect_options,
            candidate_orchestration_id: Uuid::new_v4(),
        },
    )
    .await
    .map(Json)
}

#[derive(Debug, Deserialize, Default)]
pub struct ObjectActionRequest {
    pub path: String,
    #[serde(default)]
    pub destination: Vec<String>,
}

/// `switch`/`start`/`stop`/`freeze`/`thaw`/`placed_at` are shorthand that
/// each compose one `SetInstanceMonitor`, per spec.md §6.
async fn post_object_action(
    State(state): State<AppState>,
    AxPath(verb): AxPath<String>,
    Json(body): Json<ObjectActionRequest>,
) -> Result<Json<ObjectMonitorResponse>, ApiError> {
    let (global_expect, options) = match verb.as_str() {
        "switch" => (GlobalExpect::Placed, GlobalExpectOptions::default()),
        "start" => (GlobalExpect::Started, GlobalExpectOptions::default()),
        "stop" => (GlobalExpect::Stopped, GlobalExpectOptions::default()),
        "freeze" => (GlobalExpect::Frozen, GlobalExpectOptions::default()),
        "thaw" => (GlobalExpect::Thawed, GlobalExpectOptions::default()),
        "placed_at" => (
            GlobalExpect::PlacedAt,
            GlobalExpectOptions {
                destination: body.destination.clone(),
            },
        ),
        other => {
            return Err(ApiError(OrchestratorError::InvalidParameters(format!(
                "unknown object action {other}"
            ))))
        }
    };
    set_instance_monitor(
        &state,
        &body.path,
        MonitorUpdate {
            state: None,
            local_expect: None,
            global_expect: Some(global_expect),
            global_expect_options: Some(options),
            candidate_orchestration_id: Uuid::new_v4(),
        },
    )
    .await
    .map(Json)
}

async fn post_object_clear(
    State(state): State<AppState>,
    Json(body): Json<ObjectActionRequest>,
) -> Result<Json<ObjectMonitorResponse>, ApiError> {
    set_instance_monitor(
        &state,
        &body.path,
        MonitorUpdate {
            state: Some(MonitorState::Idle),
            local_expect: None,
            global_expect: Some(GlobalExpect::Unset),
            global_expect_options: None,
            candidate_orchestration_id: Uuid::new_v4(),
        },
    )
    .await
    .map(Json)
}

async fn post_object_abort(
    State(state): State<AppState>,
    Json(body): Json<ObjectActionRequest>,
) -> Result<Json<ObjectMonitorResponse>, ApiError> {
    set_instance_monitor(
        &state,
        &body.path,
        MonitorUpdate {
            state: None,
            local_expect: None,
            global_expect: Some(GlobalExpect::Aborted),
            global_expect_options: None,
            candidate_orchestration_id: Uuid::new_v4(),
        },
    )
    .await
    .map(Json)
}

#[derive(Debug, Deserialize)]
pub struct NodeActionRequest {
    pub node: Option<String>,
}

async fn post_node_clear(State(state): State<AppState>, Json(_body): Json<NodeActionRequest>) -> impl IntoResponse {
    publish_set_node_monitor(&state, NodeMonitorState::Idle);
    StatusCode::OK
}

#[derive(Debug, Deserialize)]
pub struct NodeMonitorRequest {
    pub state: NodeMonitorState,
}

async fn post_node_monitor(
    State(state): State<AppState>,
    Json(body): Json<NodeMonitorRequest>,
) -> impl IntoResponse {
    publish_set_node_monitor(&state, body.state);
    StatusCode::OK
}

fn publish_set_node_monitor(state: &AppState, target_state: NodeMonitorState) {
    state.bus.publish(
        BusMessage::SetNodeMonitor {
            node: state.localhost.clone(),
            target_state,
        },
        node_label(&state.localhost),
    );
}

async fn set_instance_monitor(
    state: &AppState,
    path_str: &str,
    value: MonitorUpdate,
) -> Result<ObjectMonitorResponse, ApiError> {
    let path = ObjPath::from_str(path_str)
        .map_err(|_| ApiError(OrchestratorError::InvalidParameters(format!("bad path {path_str}"))))?;

    if !state
        .snapshot
        .inst_monitor
        .contains_key(&(path.to_string(), state.localhost.clone()))
    {
        return Err(ApiError(OrchestratorError::NotFound(format!(
            "{path} not found on {}",
            state.localhost
        ))));
    }

    let orchestration_id = value.candidate_orchestration_id;
    let ack_rx = state.bus.publish_with_ack(
        BusMessage::SetInstanceMonitor {
            path: path.clone(),
            node: state.localhost.clone(),
            value,
        },
        path_label(&path),
    );

    tokio::select! {
        result = ack_rx => {
            match result {
                Ok(Ok(())) => Ok(ObjectMonitorResponse { orchestration_id }),
                Ok(Err(e)) => Err(ApiError(e)),
                Err(_) => Err(ApiError(OrchestratorError::Internal(
                    "monitor ack channel dropped".into(),
                ))),
            }
        }
        _ = tokio::time::sleep(state.set_monitor_deadline) => {
            Err(ApiError(OrchestratorError::Timeout))
        }
    }
}

#[derive(Debug, Serialize)]
struct DaemonStatusResponse {
    instances: Vec<serde_json::Value>,
    nodes: Vec<serde_json::Value>,
}

async fn get_daemon_status(State(state): State<AppState>) -> Json<DaemonStatusResponse> {
    let instances = state
        .snapshot
        .inst_monitor
        .iter()
        .map(|entry| {
            let ((path, node), monitor) = entry.pair();
            serde_json::json!({ "path": path, "node": node, "monitor": monitor })
        })
        .collect();
    let nodes = state
        .snapshot
        .node_monitor
        .iter()
        .map(|entry| {
            let (node, monitor) = entry.pair();
            serde_json::json!({ "node": node, "monitor": monitor })
        })
        .collect();
    Json(DaemonStatusResponse { instances, nodes })
}

#[derive(Debug, Deserialize)]
pub struct AuthTokenRequest {
    pub username: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct AuthTokenResponse {
    pub token: String,
}

/// Basic/bearer issuance is out of scope beyond a reference stub: every
/// request is granted a fresh opaque token. Real credential validation is
/// a driver concern, same as CRM actions.
async fn post_auth_token(Json(_body): Json<AuthTokenRequest>) -> Json<AuthTokenResponse> {
    Json(AuthTokenResponse {
        token: Uuid::new_v4().to_string(),
    })
}

async fn get_relay_message() -> impl IntoResponse {
    StatusCode::NOT_IMPLEMENTED
}

async fn post_relay_message(body: String) -> impl IntoResponse {
    (StatusCode::OK, body)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::model::instance::InstanceMonitor;

    fn test_state() -> AppState {
        AppState {
            bus: EventBus::new(),
            snapshot: ClusterSnapshot::new(),
            localhost: "n1".to_string(),
            set_monitor_deadline: DEFAULT_SET_MONITOR_DEADLINE,
        }
    }

    #[tokio::test]
    async fn set_instance_monitor_404s_for_unknown_path() {
        let state = test_state();
        let err = set_instance_monitor(&state, "default/svc/unknown", MonitorUpdate::default())
            .await
            .unwrap_err();
        assert_eq!(err.0.status_code(), 404);
    }

    #[tokio::test]
    async fn set_instance_monitor_times_out_with_no_subscriber() {
        let state = test_state();
        state.snapshot.inst_monitor.insert(
            ("default/svc/s1".to_string(), "n1".to_string()),
            InstanceMonitor::default(),
        );
        let err = set_instance_monitor(
            &state,
            "default/svc/s1",
            MonitorUpdate {
                global_expect: Some(GlobalExpect::Started),
                ..Default::default()
            },
        )
        .await
        .unwrap_err();
        // No imon is running to ack the publish, so this must time out
        // rather than hang.
        assert_eq!(err.0, OrchestratorError::Timeout);
    }

    #[tokio::test]
    async fn set_instance_monitor_succeeds_when_acked() {
        let state = test_state();
        state.snapshot.inst_monitor.insert(
            ("default/svc/s1".to_string(), "n1".to_string()),
            InstanceMonitor::default(),
        );
        let mut sub = state.bus.subscribe(
            "fake-imon",
            vec![crate::core::events::Filter::new(
                crate::core::events::MessageKind::SetInstanceMonitor,
            )],
            None,
            None,
        );
        let bus = state.bus.clone();
        tokio::spawn(async move {
            let env = sub.recv().await.expect("message delivered");
            env.ack.expect("ack present").ack(Ok(()));
            drop(bus);
        });

        let response = set_instance_monitor(&state, "default/svc/s1", MonitorUpdate::default())
            .await
            .unwrap();
        assert_ne!(response.orchestration_id, Uuid::nil());
    }

    #[tokio::test]
    async fn node_clear_publishes_set_node_monitor_idle() {
        let state = test_state();
        let mut sub = state.bus.subscribe(
            "observer",
            vec![crate::core::events::Filter::new(
                crate::core::events::MessageKind::SetNodeMonitor,
            )],
            None,
            None,
        );
        publish_set_node_monitor(&state, NodeMonitorState::Idle);
        let env = sub.recv().await.expect("message delivered");
        match env.message {
            BusMessage::SetNodeMonitor { node, target_state } => {
                assert_eq!(node, "n1");
                assert_eq!(target_state, NodeMonitorState::Idle);
                assert_eq!(env.label("node"), Some("n1"));
            }
            _ => panic!("unexpected message"),
        }
    }
}
