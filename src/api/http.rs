//! HTTP API Server
//!
//! REST front end for the volume controller. Every route maps onto exactly
//! one controller operation.

use std::sync::Arc;

use axum::{
    body::Bytes,
    extract::{Path, State, Json},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Router,
};
use serde::Serialize;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use super::types::*;
use crate::config::ApiConfig;
use crate::controller::{Operation, OperationOutput, VolumeController};
use crate::error::{Error, Result};
use crate::rebuild::VerifyOutcome;

/// Shared application state
pub struct AppState {
    /// Controller identifier
    pub node_id: String,
    /// Volume controller
    pub controller: Arc<VolumeController>,
}

/// HTTP API server
pub struct HttpServer {
    config: ApiConfig,
    state: Arc<AppState>,
}

impl HttpServer {
    /// Create a new HTTP server
    pub fn new(config: ApiConfig, node_id: String, controller: Arc<VolumeController>) -> Self {
        let state = Arc::new(AppState {
            node_id,
            controller,
        });

        Self { config, state }
    }

    /// Create the router
    pub fn router(&self) -> Router {
        let router = Self::create_router(Arc::clone(&self.state)).layer(TraceLayer::new_for_http());
        if self.config.cors_enabled {
            router.layer(CorsLayer::permissive())
        } else {
            router
        }
    }

    fn create_router(state: Arc<AppState>) -> Router {
        Router::new()
            // Volume operations
            .route("/v1/volumes", get(handle_list_volumes))
            .route("/v1/volumes/:name", get(handle_get_volume))
            .route("/v1/volumes/:name/start", post(handle_start))
            .route("/v1/volumes/:name/snapshot", post(handle_snapshot))
            .route("/v1/volumes/:name/revert", post(handle_revert))
            .route("/v1/journal", post(handle_journal))
            // Replica management
            .route(
                "/v1/replicas",
                get(handle_list_replicas).post(handle_create_replica),
            )
            .route(
                "/v1/replicas/:address",
                get(handle_get_replica)
                    .put(handle_update_replica)
                    .delete(handle_delete_replica),
            )
            // Rebuild handshake
            .route("/v1/replicas/:address/preparerebuild", post(handle_prepare_rebuild))
            .route("/v1/replicas/:address/verifyrebuild", post(handle_verify_rebuild))
            .route("/v1/register", post(handle_register))
            .route("/health", get(handle_health))
            .with_state(state)
    }

    /// Start the HTTP server and run until `shutdown` resolves
    pub async fn start<F>(&self, shutdown: F) -> Result<()>
    where
        F: std::future::Future<Output = ()> + Send + 'static,
    {
        if !self.config.enabled {
            tracing::info!("HTTP API disabled");
            shutdown.await;
            return Ok(());
        }

        let app = self.router();

        let listener = tokio::net::TcpListener::bind(&self.config.bind_address).await?;
        tracing::info!("HTTP API listening on {}", self.config.bind_address);

        axum::serve(listener, app)
            .with_graceful_shutdown(shutdown)
            .await
            .map_err(|e| Error::Network(format!("HTTP server error: {}", e)))?;

        Ok(())
    }
}

/// Health response
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub healthy: bool,
    pub node_id: String,
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        let status = match &self {
            Error::NotFound(_) => StatusCode::NOT_FOUND,
            Error::Conflict(_) | Error::StaleRevision { .. } | Error::NoOutstandingTicket(_) => {
                StatusCode::CONFLICT
            }
            Error::NotQuorate { .. } => StatusCode::SERVICE_UNAVAILABLE,
            Error::Timeout(_) => StatusCode::GATEWAY_TIMEOUT,
            Error::InvalidRequest(_) | Error::Config(_) | Error::ConfigParse(_) => {
                StatusCode::BAD_REQUEST
            }
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        if status.is_server_error() {
            tracing::error!("Request failed: {}", self);
        }

        (status, Json(ErrorResponse::from(&self))).into_response()
    }
}

/// Reject a volume name that is not the one this controller serves
async fn check_volume(state: &AppState, name: &str) -> Result<()> {
    let volume = state.controller.volume().await;
    if volume.name != name {
        return Err(Error::NotFound(format!("volume {}", name)));
    }
    Ok(())
}

// ============ Handlers ============

async fn handle_health(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(HealthResponse {
        healthy: true,
        node_id: state.node_id.clone(),
    })
}

async fn handle_list_volumes(State(state): State<Arc<AppState>>) -> Json<VolumeCollection> {
    let volume = state.controller.volume().await;
    Json(VolumeCollection {
        data: vec![volume.into()],
    })
}

async fn handle_get_volume(
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
) -> Result<Json<VolumeResource>> {
    check_volume(&state, &name).await?;
    Ok(Json(state.controller.volume().await.into()))
}

async fn handle_start(
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
    Json(input): Json<StartInput>,
) -> Result<Json<VolumeResource>> {
    check_volume(&state, &name).await?;
    match state
        .controller
        .dispatch(Operation::Start {
            replicas: input.replicas,
        })
        .await?
    {
        OperationOutput::Started(volume) => Ok(Json(volume.into())),
        other => Err(unexpected(other)),
    }
}

async fn handle_snapshot(
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
    Json(input): Json<SnapshotInput>,
) -> Result<Json<SnapshotOutput>> {
    check_volume(&state, &name).await?;
    match state
        .controller
        .dispatch(Operation::Snapshot { name: input.name })
        .await?
    {
        OperationOutput::SnapshotTaken(id) => Ok(Json(SnapshotOutput { id })),
        other => Err(unexpected(other)),
    }
}

async fn handle_revert(
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
    Json(input): Json<RevertInput>,
) -> Result<Json<VolumeResource>> {
    check_volume(&state, &name).await?;
    match state
        .controller
        .dispatch(Operation::Revert { name: input.name })
        .await?
    {
        OperationOutput::Reverted(volume) => Ok(Json(volume.into())),
        other => Err(unexpected(other)),
    }
}

async fn handle_journal(
    State(state): State<Arc<AppState>>,
    Json(input): Json<JournalInput>,
) -> Json<JournalCollection> {
    Json(JournalCollection {
        data: state.controller.journal(input.limit).await,
    })
}

async fn handle_list_replicas(State(state): State<Arc<AppState>>) -> Json<ReplicaCollection> {
    let replicas = state.controller.list_replicas().await;
    tracing::debug!("Listing {} replicas", replicas.len());
    Json(ReplicaCollection {
        data: replicas.into_iter().map(ReplicaResource::from).collect(),
    })
}

async fn handle_create_replica(
    State(state): State<Arc<AppState>>,
    Json(input): Json<CreateReplicaInput>,
) -> Result<(StatusCode, Json<ReplicaResource>)> {
    let replica = state
        .controller
        .create_replica(&input.address, input.replica_type)
        .await?;
    Ok((StatusCode::CREATED, Json(replica.into())))
}

async fn handle_get_replica(
    State(state): State<Arc<AppState>>,
    Path(address): Path<String>,
) -> Result<Json<ReplicaResource>> {
    Ok(Json(state.controller.get_replica(&address).await?.into()))
}

async fn handle_update_replica(
    State(state): State<Arc<AppState>>,
    Path(address): Path<String>,
    Json(input): Json<UpdateReplicaInput>,
) -> Result<Json<ReplicaResource>> {
    let replica = state.controller.update_replica(&address, input.state).await?;
    Ok(Json(replica.into()))
}

async fn handle_delete_replica(
    State(state): State<Arc<AppState>>,
    Path(address): Path<String>,
) -> Result<Json<ReplicaResource>> {
    Ok(Json(state.controller.remove_replica(&address).await?.into()))
}

async fn handle_prepare_rebuild(
    State(state): State<Arc<AppState>>,
    Path(address): Path<String>,
) -> Result<Json<PrepareRebuildOutput>> {
    match state
        .controller
        .dispatch(Operation::PrepareRebuild { address })
        .await?
    {
        OperationOutput::RebuildPrepared(descriptor) => Ok(Json(PrepareRebuildOutput { descriptor })),
        other => Err(unexpected(other)),
    }
}

async fn handle_verify_rebuild(
    State(state): State<Arc<AppState>>,
    Path(address): Path<String>,
    body: Bytes,
) -> Result<Json<ReplicaResource>> {
    let failure = parse_verify_report(&body)?.failure;
    match state
        .controller
        .dispatch(Operation::VerifyRebuild {
            address,
            outcome: VerifyOutcome::from_failure(failure),
        })
        .await?
    {
        OperationOutput::RebuildVerified(replica) => Ok(Json(replica.into())),
        other => Err(unexpected(other)),
    }
}

async fn handle_register(
    State(state): State<Arc<AppState>>,
    Json(input): Json<RegisterInput>,
) -> Result<Json<ReplicaResource>> {
    let replica = state.controller.register(input.into()).await?;
    Ok(Json(replica.into()))
}

/// An empty body reports success; anything else must be a valid report
fn parse_verify_report(body: &[u8]) -> Result<VerifyRebuildInput> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(VerifyRebuildInput::default());
    }
    serde_json::from_slice(body)
        .map_err(|e| Error::InvalidRequest(format!("malformed verify report: {}", e)))
}

fn unexpected(output: OperationOutput) -> Error {
    Error::Internal(format!("unexpected operation output {:?}", output))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::MemoryCatalog;
    use crate::controller::ControllerConfig;
    use crate::state::{PeerDetails, ReplicaState, ReplicaType};
    use axum::body::Body;
    use axum::http::{Method, Request};
    use tower::ServiceExt;

    async fn app() -> Router {
        let controller = VolumeController::open(
            ControllerConfig::new("vol1"),
            Arc::new(MemoryCatalog::new()),
        )
        .await
        .unwrap();
        HttpServer::new(ApiConfig::default(), "controller-1".into(), Arc::new(controller)).router()
    }

    async fn call(
        app: &Router,
        method: Method,
        uri: &str,
        body: Option<serde_json::Value>,
    ) -> (StatusCode, serde_json::Value) {
        let builder = Request::builder().method(method).uri(uri);
        let request = match body {
            Some(json) => builder
                .header("content-type", "application/json")
                .body(Body::from(json.to_string()))
                .unwrap(),
            None => builder.body(Body::empty()).unwrap(),
        };

        let response = app.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let json = if bytes.is_empty() {
            serde_json::Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap()
        };
        (status, json)
    }

    fn register_body(address: &str, revision: u64) -> serde_json::Value {
        serde_json::to_value(RegisterInput {
            address: address.into(),
            revision_count: revision,
            peer_details: PeerDetails::default(),
            replica_type: ReplicaType::Quorum,
            up_time_secs: 10,
            state: ReplicaState::Registering,
        })
        .unwrap()
    }

    #[tokio::test]
    async fn test_health() {
        let app = app().await;
        let (status, body) = call(&app, Method::GET, "/health", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["node_id"], "controller-1");
    }

    #[tokio::test]
    async fn test_rebuild_handshake_over_http() {
        let app = app().await;
        let a = "tcp://10.0.0.1:9502";
        let b = "tcp://10.0.0.2:9502";

        for (addr, rev) in [(a, 4), (b, 1)] {
            let (status, _) = call(&app, Method::POST, "/v1/register", Some(register_body(addr, rev))).await;
            assert_eq!(status, StatusCode::OK);
        }

        let (status, body) = call(
            &app,
            Method::POST,
            "/v1/volumes/vol1/start",
            Some(serde_json::json!({ "replicas": [a] })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["generation"], 4);

        let b_path = replica_path(b);
        let (status, body) = call(&app, Method::POST, &format!("{}/preparerebuild", b_path), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["descriptor"]["source"], a);

        let (status, body) = call(&app, Method::POST, &format!("{}/preparerebuild", b_path), None).await;
        assert_eq!(status, StatusCode::CONFLICT);
        assert_eq!(body["code"], "CONFLICT");

        let (status, body) = call(
            &app,
            Method::POST,
            &format!("{}/verifyrebuild", b_path),
            Some(serde_json::json!({})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["state"], "Ready");
        assert_eq!(body["revision_count"], 4);

        let (status, body) = call(&app, Method::POST, &format!("{}/verifyrebuild", b_path), None).await;
        assert_eq!(status, StatusCode::CONFLICT);
        assert_eq!(body["code"], "NO_OUTSTANDING_TICKET");

        let (status, body) = call(&app, Method::GET, "/v1/volumes", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"][0]["state"], "Healthy");
    }

    #[tokio::test]
    async fn test_error_statuses() {
        let app = app().await;

        let (status, body) = call(&app, Method::GET, &replica_path("tcp://nope:1"), None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["code"], "NOT_FOUND");

        let (status, _) = call(&app, Method::DELETE, &replica_path("tcp://nope:1"), None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let (status, body) = call(
            &app,
            Method::POST,
            "/v1/volumes/vol1/snapshot",
            Some(serde_json::json!({ "name": "s1" })),
        )
        .await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(body["code"], "NOT_QUORATE");

        let (status, _) = call(&app, Method::GET, "/v1/volumes/other", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let (status, body) = call(
            &app,
            Method::POST,
            "/v1/journal",
            Some(serde_json::json!({ "limit": 10 })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        let entries = body["data"].as_array().unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[1]["kind"], "Snapshot");
        assert_eq!(entries[1]["success"], false);
    }

    #[tokio::test]
    async fn test_replica_management() {
        let app = app().await;
        let c = "tcp://10.0.0.3:9502";

        let (status, body) = call(
            &app,
            Method::POST,
            "/v1/replicas",
            Some(serde_json::json!({ "address": c, "replica_type": "NonQuorum" })),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(body["state"], "Registering");

        let (status, body) = call(
            &app,
            Method::PUT,
            &replica_path(c),
            Some(serde_json::json!({ "state": "Failed" })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["failure_reason"], "marked failed by operator");

        let (status, body) = call(&app, Method::GET, "/v1/replicas", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"].as_array().unwrap().len(), 1);

        let (status, _) = call(&app, Method::DELETE, &replica_path(c), None).await;
        assert_eq!(status, StatusCode::OK);
        let (_, body) = call(&app, Method::GET, "/v1/replicas", None).await;
        assert!(body["data"].as_array().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_verify_failure_report_over_http() {
        let app = app().await;
        let a = "tcp://10.0.0.1:9502";
        let b = "tcp://10.0.0.2:9502";
        for (addr, rev) in [(a, 4), (b, 1)] {
            call(&app, Method::POST, "/v1/register", Some(register_body(addr, rev))).await;
        }
        call(
            &app,
            Method::POST,
            "/v1/volumes/vol1/start",
            Some(serde_json::json!({ "replicas": [a] })),
        )
        .await;

        let b_path = replica_path(b);
        let (status, _) = call(&app, Method::POST, &format!("{}/preparerebuild", b_path), None).await;
        assert_eq!(status, StatusCode::OK);

        let post_raw = |body: &'static str, content_type: &'static str| {
            let request = Request::builder()
                .method(Method::POST)
                .uri(format!("{}/verifyrebuild", b_path))
                .header("content-type", content_type)
                .body(Body::from(body))
                .unwrap();
            app.clone().oneshot(request)
        };

        // Unreadable reports are rejected and the ticket stays outstanding
        for (body, content_type) in [
            ("{\"failure\": ", "application/json"),
            ("{\"failure\": 42}", "application/json"),
            ("checksum mismatch", "text/plain"),
        ] {
            let response = post_raw(body, content_type).await.unwrap();
            assert_eq!(response.status(), StatusCode::BAD_REQUEST, "body {:?}", body);
        }
        let (_, body) = call(&app, Method::GET, &b_path, None).await;
        assert_eq!(body["state"], "PreparingRebuild");

        // A failure report without a JSON content type still counts as a failure
        let response = post_raw("{\"failure\":\"checksum mismatch\"}", "text/plain")
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let (_, body) = call(&app, Method::GET, &b_path, None).await;
        assert_eq!(body["state"], "Failed");
        assert_eq!(body["failure_reason"], "checksum mismatch");
    }
}
