use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use axum::extract::Path;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::response::Response;
use axum::routing::get;
use axum::routing::post;
use axum::Json;
use axum::Router;
use serde::Deserialize;
use serde::Serialize;
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;

use crate::config::format_diagnostics;
use crate::cover::CoverError;
use crate::cover::CoverSnapshot;
use crate::engine::Engine;

/// Response for the /v1/ping endpoint
#[derive(Serialize)]
struct PingResponse {
    status: String,
}

/// Response for the /v1/info endpoint
#[derive(Serialize)]
struct InfoResponse {
    version: String,
    hostname: String,
    covers: usize,
}

/// Response for the /v1/reload endpoint
#[derive(Serialize)]
struct ReloadResponse {
    covers: usize,
    diagnostics: String,
}

#[derive(Serialize)]
struct ErrorResponse {
    error: String,
}

#[derive(Debug, Deserialize)]
struct PositionAndTiltRequest {
    position: Option<f64>,
    tilt: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct PositionRequest {
    position: f64,
}

#[derive(Debug, Deserialize)]
struct TiltRequest {
    tilt: f64,
}

/// One entity id or a list of them
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum EntityIds {
    One(String),
    Many(Vec<String>),
}

impl EntityIds {
    fn into_vec(self) -> Vec<String> {
        match self {
            EntityIds::One(id) => vec![id],
            EntityIds::Many(ids) => ids,
        }
    }
}

#[derive(Debug, Deserialize)]
struct ServiceRequest {
    entity_id: EntityIds,
    position: Option<f64>,
    tilt: Option<f64>,
}

/// Shared application state
#[derive(Clone)]
struct AppState {
    version: &'static str,
    engine: Arc<Engine>,
    config_path: Option<PathBuf>,
}

struct ApiError {
    status: StatusCode,
    message: String,
}

impl From<CoverError> for ApiError {
    fn from(error: CoverError) -> Self {
        let status = match &error {
            CoverError::NotFound(_) => StatusCode::NOT_FOUND,
            CoverError::Validation { .. } => StatusCode::UNPROCESSABLE_ENTITY,
            CoverError::Unavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
        };
        ApiError {
            status,
            message: error.to_string(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (
            self.status,
            Json(ErrorResponse {
                error: self.message,
            }),
        )
            .into_response()
    }
}

type ApiResult<T> = Result<Json<T>, ApiError>;

/// Handler for GET /v1/ping
#[tracing::instrument]
async fn ping() -> impl IntoResponse {
    tracing::debug!("Handling /v1/ping request");
    (
        StatusCode::OK,
        Json(PingResponse {
            status: "ok".to_string(),
        }),
    )
}

/// Handler for GET /v1/info
#[tracing::instrument(skip(state))]
async fn info(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    tracing::debug!("Handling /v1/info request");

    let hostname = hostname::get()
        .ok()
        .and_then(|h| h.into_string().ok())
        .unwrap_or_else(|| "unknown".to_string());

    (
        StatusCode::OK,
        Json(InfoResponse {
            version: state.version.to_string(),
            hostname,
            covers: state.engine.list_states().await.len(),
        }),
    )
}

#[tracing::instrument(skip(state))]
async fn list_covers(State(state): State<Arc<AppState>>) -> Json<Vec<CoverSnapshot>> {
    Json(state.engine.list_states().await)
}

#[tracing::instrument(skip(state))]
async fn get_cover(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> ApiResult<CoverSnapshot> {
    Ok(Json(state.engine.get_state(&id).await?))
}

#[tracing::instrument(skip(state))]
async fn set_position_and_tilt(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Json(request): Json<PositionAndTiltRequest>,
) -> ApiResult<CoverSnapshot> {
    let snapshot = state
        .engine
        .set_position_and_tilt(&id, request.position, request.tilt)
        .await?;
    Ok(Json(snapshot))
}

#[tracing::instrument(skip(state))]
async fn set_position(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Json(request): Json<PositionRequest>,
) -> ApiResult<CoverSnapshot> {
    Ok(Json(state.engine.set_position(&id, request.position).await?))
}

#[tracing::instrument(skip(state))]
async fn set_tilt(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Json(request): Json<TiltRequest>,
) -> ApiResult<CoverSnapshot> {
    Ok(Json(state.engine.set_tilt(&id, request.tilt).await?))
}

#[tracing::instrument(skip(state))]
async fn open(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> ApiResult<CoverSnapshot> {
    Ok(Json(state.engine.open(&id).await?))
}

#[tracing::instrument(skip(state))]
async fn close(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> ApiResult<CoverSnapshot> {
    Ok(Json(state.engine.close(&id).await?))
}

#[tracing::instrument(skip(state))]
async fn stop(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> ApiResult<CoverSnapshot> {
    Ok(Json(state.engine.stop(&id).await?))
}

/// Handler for POST /v1/set_position_and_tilt, addressing several covers
#[tracing::instrument(skip(state))]
async fn service_set_position_and_tilt(
    State(state): State<Arc<AppState>>,
    Json(request): Json<ServiceRequest>,
) -> ApiResult<Vec<CoverSnapshot>> {
    if request.position.is_none() && request.tilt.is_none() {
        tracing::debug!("set_position_and_tilt without position or tilt, nothing to do");
        return Ok(Json(Vec::new()));
    }

    let snapshots = state
        .engine
        .set_position_and_tilt_many(
            &request.entity_id.into_vec(),
            request.position,
            request.tilt,
        )
        .await?;
    Ok(Json(snapshots))
}

/// Handler for POST /v1/reload
#[tracing::instrument(skip(state))]
async fn reload(State(state): State<Arc<AppState>>) -> ApiResult<ReloadResponse> {
    let Some(path) = &state.config_path else {
        return Err(ApiError {
            status: StatusCode::CONFLICT,
            message: "no configuration file to reload from".to_string(),
        });
    };

    let diagnostics = state
        .engine
        .reload_from_file(path)
        .await
        .map_err(|e| ApiError {
            status: StatusCode::UNPROCESSABLE_ENTITY,
            message: e.to_string(),
        })?;

    Ok(Json(ReloadResponse {
        covers: state.engine.list_states().await.len(),
        diagnostics: format_diagnostics(&diagnostics),
    }))
}

/// Create the API router with all endpoints
fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/v1/ping", get(ping))
        .route("/v1/info", get(info))
        .route("/v1/covers", get(list_covers))
        .route("/v1/covers/:id", get(get_cover))
        .route(
            "/v1/covers/:id/set_position_and_tilt",
            post(set_position_and_tilt),
        )
        .route("/v1/covers/:id/position", post(set_position))
        .route("/v1/covers/:id/tilt", post(set_tilt))
        .route("/v1/covers/:id/open", post(open))
        .route("/v1/covers/:id/close", post(close))
        .route("/v1/covers/:id/stop", post(stop))
        .route(
            "/v1/set_position_and_tilt",
            post(service_set_position_and_tilt),
        )
        .route("/v1/reload", post(reload))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Start the HTTP API server
///
/// This function will bind to the specified address and serve the API endpoints.
/// It will run until the provided shutdown signal is triggered.
///
/// # Arguments
/// * `listen` - The IP address to listen on (e.g., "127.0.0.1")
/// * `port` - The port to listen on (e.g., 8566)
/// * `engine` - The engine whose covers are exposed
/// * `config_path` - File re-read by `/v1/reload`
/// * `shutdown_rx` - A oneshot receiver that will trigger graceful shutdown
pub async fn serve(
    listen: String,
    port: u16,
    engine: Arc<Engine>,
    config_path: Option<PathBuf>,
    shutdown_rx: tokio::sync::oneshot::Receiver<()>,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let version = env!("CARGO_PKG_VERSION");

    let state = Arc::new(AppState {
        version,
        engine,
        config_path,
    });
    let app = create_router(state);

    let addr: SocketAddr = format!("{}:{}", listen, port).parse()?;
    tracing::info!("Starting HTTP API server on {}", addr);

    let listener = TcpListener::bind(addr).await?;

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            shutdown_rx.await.ok();
            tracing::info!("HTTP API server shutting down gracefully");
        })
        .await?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use std::io::Write;
    use std::time::Duration;

    use axum::body::Body;
    use axum::http::Request;
    use serde_json::Value;
    use tower::ServiceExt;

    use super::*;
    use crate::backends::LogBackend;
    use crate::config::Config;

    const CONFIG: &str = r#"
[backends.log]

[[covers]]
name = "Office"
real_entity_id = "cover.office_motor"
open_time_sec = 20
tilt_time_ms = 750

[[covers]]
name = "Den"
real_entity_id = "cover.den_motor"
open_time_sec = 10
tilt_time_ms = 750
"#;

    async fn test_app(config: &str) -> (Router, tempfile::NamedTempFile) {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        write!(file, "{}", config).unwrap();

        let (config, _) = Config::from_file(file.path()).unwrap();
        let engine = Arc::new(Engine::new(Box::new(LogBackend), None));
        engine.load(&config.covers, &config.scheduler).await;

        let state = Arc::new(AppState {
            version: "test",
            engine,
            config_path: Some(file.path().to_path_buf()),
        });
        (create_router(state), file)
    }

    async fn call(
        app: &Router,
        method: &str,
        uri: &str,
        body: Option<Value>,
    ) -> (StatusCode, Value) {
        let request = Request::builder()
            .method(method)
            .uri(uri)
            .header("content-type", "application/json");
        let request = match body {
            Some(body) => request.body(Body::from(body.to_string())).unwrap(),
            None => request.body(Body::empty()).unwrap(),
        };

        let response = app.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let value = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
        (status, value)
    }

    #[tokio::test]
    async fn test_ping() {
        let (app, _file) = test_app(CONFIG).await;
        let (status, body) = call(&app, "GET", "/v1/ping", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "ok");
    }

    #[tokio::test]
    async fn test_list_and_get_covers() {
        let (app, _file) = test_app(CONFIG).await;

        let (status, body) = call(&app, "GET", "/v1/covers", None).await;
        assert_eq!(status, StatusCode::OK);
        let ids: Vec<_> = body
            .as_array()
            .unwrap()
            .iter()
            .map(|c| c["cover_id"].as_str().unwrap().to_string())
            .collect();
        assert_eq!(ids, vec!["cover.den", "cover.office"]);

        let (status, body) = call(&app, "GET", "/v1/covers/cover.office", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["real_entity_id"], "cover.office_motor");
        assert_eq!(body["phase"], "idle");
        assert_eq!(body["direction"], "idle");
        assert_eq!(body["is_closed"], true);

        let (status, body) = call(&app, "GET", "/v1/covers/cover.garage", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["error"], "cover not found: cover.garage");
    }

    #[tokio::test(start_paused = true)]
    async fn test_commands_drive_cover() {
        let (app, _file) = test_app(CONFIG).await;

        let (status, body) = call(
            &app,
            "POST",
            "/v1/covers/cover.office/set_position_and_tilt",
            Some(serde_json::json!({"position": 50, "tilt": 30})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["phase"], "pre_tilt");
        assert_eq!(body["is_moving"], true);
        assert_eq!(body["pending_target"]["position"], 50.0);

        tokio::time::sleep(Duration::from_secs(15)).await;
        let (_, body) = call(&app, "GET", "/v1/covers/cover.office", None).await;
        assert_eq!(body["position"], 50.0);
        assert_eq!(body["tilt"], 30.0);
        assert_eq!(body["phase"], "idle");

        let (status, body) = call(&app, "POST", "/v1/covers/cover.office/open", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["direction"], "opening");

        let (status, body) = call(&app, "POST", "/v1/covers/cover.office/stop", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["is_moving"], false);
    }

    #[tokio::test]
    async fn test_out_of_range_is_unprocessable() {
        let (app, _file) = test_app(CONFIG).await;

        let (status, body) = call(
            &app,
            "POST",
            "/v1/covers/cover.office/position",
            Some(serde_json::json!({"position": 101})),
        )
        .await;
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
        assert_eq!(body["error"], "position must be between 0 and 100, got 101");

        let (status, _) = call(
            &app,
            "POST",
            "/v1/covers/cover.office/tilt",
            Some(serde_json::json!({"angle": 20})),
        )
        .await;
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    }

    #[tokio::test]
    async fn test_domain_service_accepts_one_or_many() {
        let (app, _file) = test_app(CONFIG).await;

        let (status, body) = call(
            &app,
            "POST",
            "/v1/set_position_and_tilt",
            Some(serde_json::json!({"entity_id": "cover.den", "tilt": 40})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body.as_array().unwrap().len(), 1);

        let (status, body) = call(
            &app,
            "POST",
            "/v1/set_position_and_tilt",
            Some(serde_json::json!({
                "entity_id": ["cover.den", "cover.nowhere", "cover.office"],
                "position": 10
            })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body.as_array().unwrap().len(), 2);

        let (status, body) = call(
            &app,
            "POST",
            "/v1/set_position_and_tilt",
            Some(serde_json::json!({"entity_id": ["cover.den"]})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert!(body.as_array().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_reload_rereads_config() {
        let (app, mut file) = test_app(CONFIG).await;

        write!(
            file,
            r#"
[[covers]]
name = "Attic"
real_entity_id = "cover.attic_motor"
open_time_sec = 15
tilt_time_ms = 600
"#
        )
        .unwrap();

        let (status, body) = call(&app, "POST", "/v1/reload", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["covers"], 3);

        let (status, _) = call(&app, "GET", "/v1/covers/cover.attic", None).await;
        assert_eq!(status, StatusCode::OK);
    }

    #[tokio::test]
    async fn test_reload_keeps_covers_on_bad_config() {
        let (app, mut file) = test_app(CONFIG).await;
        write!(file, "\n[scheduler]\ntick_interval_ms = 1\n").unwrap();

        let (status, body) = call(&app, "POST", "/v1/reload", None).await;
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
        assert!(body["error"].as_str().unwrap().contains("tick_interval_ms"));

        let (_, body) = call(&app, "GET", "/v1/covers", None).await;
        assert_eq!(body.as_array().unwrap().len(), 2);
    }
}
