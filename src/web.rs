//! Axum admin and query surface
//!
//! Handlers reach the driver only through the [`DriverHandle`] stored in
//! [`AppState`].

use crate::config::Config;
use crate::driver::DriverHandle;
use crate::error::BridgeError;
use crate::normalize::OutputDocument;
use crate::vendor::{QueryMethod, QueryRequest};
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::{
    Json, Router,
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
};
use serde::Deserialize;
use serde_json::{Value, json};
use std::future::Future;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use tokio_stream::StreamExt;
use tower_http::{cors::CorsLayer, trace::TraceLayer};

#[derive(Clone)]
pub struct AppState {
    pub driver: DriverHandle,
    pub config: Arc<Config>,
}

/// Body of `POST /api/query`
#[derive(Debug, Deserialize)]
pub struct QueryBody {
    pub method: QueryMethod,
    pub command: String,
    #[serde(default)]
    pub payload: Option<Value>,
}

/// HTTP status of a bridge error
pub fn status_for(err: &BridgeError) -> StatusCode {
    match err {
        BridgeError::Config { .. } => StatusCode::BAD_REQUEST,
        BridgeError::Validation { field, .. } if field == "mode" => StatusCode::CONFLICT,
        BridgeError::Validation { .. } => StatusCode::BAD_REQUEST,
        BridgeError::Transport { .. }
        | BridgeError::Auth { .. }
        | BridgeError::ExpiredRefreshToken
        | BridgeError::Parse { .. }
        | BridgeError::EmptyPayload { .. }
        | BridgeError::Rejected { .. } => StatusCode::BAD_GATEWAY,
        BridgeError::Web { .. } => StatusCode::SERVICE_UNAVAILABLE,
        BridgeError::Io { .. } => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn error_response(err: BridgeError) -> Response {
    (status_for(&err), Json(json!({"error": err.to_string()}))).into_response()
}

async fn health() -> impl IntoResponse {
    (StatusCode::OK, "ok")
}

async fn status(State(state): State<AppState>) -> Response {
    match state.driver.status().await {
        Ok(status) => Json(status).into_response(),
        Err(e) => error_response(e),
    }
}

async fn document(State(state): State<AppState>) -> Response {
    match state.driver.latest_document() {
        Some(doc) => Json(doc.as_ref().clone()).into_response(),
        None => StatusCode::NO_CONTENT.into_response(),
    }
}

async fn systems(State(state): State<AppState>) -> Response {
    match state.driver.list_systems().await {
        Ok(systems) => Json(systems).into_response(),
        Err(e) => error_response(e),
    }
}

async fn query(State(state): State<AppState>, Json(body): Json<QueryBody>) -> Response {
    let request = QueryRequest::new(body.method, &body.command, body.payload);
    match state.driver.query(request).await {
        Ok(resp) => Json(resp).into_response(),
        Err(e) => error_response(e),
    }
}

async fn get_config(State(state): State<AppState>) -> impl IntoResponse {
    // secrets are skipped during serialization
    let json = serde_json::to_value(state.config.as_ref())
        .unwrap_or(json!({"error": "serialization"}));
    Json(json)
}

async fn get_config_schema() -> impl IntoResponse {
    Json(schemars::schema_for!(Config))
}

async fn get_document_schema() -> impl IntoResponse {
    Json(schemars::schema_for!(OutputDocument))
}

async fn events(State(state): State<AppState>) -> impl IntoResponse {
    let rx = state.driver.subscribe();
    let stream = tokio_stream::wrappers::BroadcastStream::new(rx).filter_map(|msg| {
        let doc = msg.ok()?;
        Event::default()
            .event("document")
            .json_data(doc.as_ref())
            .ok()
            .map(Ok::<Event, std::convert::Infallible>)
    });
    Sse::new(stream).keep_alive(KeepAlive::default())
}

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/api/health", get(health))
        .route("/api/status", get(status))
        .route("/api/document", get(document))
        .route("/api/document/schema", get(get_document_schema))
        .route("/api/systems", get(systems))
        .route("/api/query", post(query))
        .route("/api/config", get(get_config))
        .route("/api/config/schema", get(get_config_schema))
        .route("/api/events", get(events))
        .with_state(state)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
}

pub async fn serve(
    state: AppState,
    host: &str,
    port: u16,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> anyhow::Result<()> {
    let router = build_router(state);
    let logger = crate::logging::get_logger("web");

    let addr = match host.parse::<IpAddr>() {
        Ok(ip) => SocketAddr::new(ip, port),
        Err(_) => {
            logger.warn(&format!("Invalid host '{}'; falling back to 127.0.0.1", host));
            ([127, 0, 0, 1], port).into()
        }
    };

    let listener = tokio::net::TcpListener::bind(addr).await?;
    let local_addr = listener.local_addr()?;
    logger.info(&format!(
        "Web server listening at http://{}:{}",
        local_addr.ip(),
        local_addr.port()
    ));

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown)
        .await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::OperatingMode;
    use crate::driver::BridgeDriver;
    use crate::vendor::AuthGrant;
    use crate::vendor::scripted::ScriptedClient;
    use axum::body::Body;
    use axum::http::Request;
    use http_body_util::BodyExt;
    use tower::ServiceExt;

    fn config(mode: OperatingMode) -> Config {
        let mut config = Config::default();
        config.device.serial = "AL001".into();
        config.credentials.username = "user".into();
        config.credentials.password = "secret".into();
        config.mode = mode;
        config
    }

    fn spawn_driver(mode: OperatingMode) -> AppState {
        let client = Arc::new(ScriptedClient::legacy());
        client.push_login(Ok(AuthGrant {
            access_token: "tok".into(),
            expires_in: Some(7200),
            refresh_key: None,
        }));
        let cfg = config(mode);
        let (mut driver, handle) = BridgeDriver::new(cfg.clone(), client, Vec::new());
        tokio::spawn(async move { driver.run().await });
        AppState {
            driver: handle,
            config: Arc::new(cfg),
        }
    }

    async fn body_json(resp: Response) -> Value {
        let bytes = resp.into_body().collect().await.unwrap().to_bytes();
        serde_json::from_slice(&bytes).unwrap()
    }

    fn post_query(body: Value) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri("/api/query")
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    #[tokio::test]
    async fn health_ok() {
        let router = Router::new().route("/api/health", get(health));
        let response = router
            .oneshot(Request::builder().uri("/api/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn document_is_no_content_before_first_emit() {
        let router = build_router(spawn_driver(OperatingMode::Manual));
        let response = router
            .oneshot(Request::builder().uri("/api/document").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NO_CONTENT);
    }

    #[tokio::test]
    async fn manual_query_returns_request_and_data() {
        let router = build_router(spawn_driver(OperatingMode::Manual));
        let response = router
            .oneshot(post_query(json!({
                "method": "GET",
                "command": "getOneDateEnergyBySn",
                "payload": {"queryDate": "2024-05-01"}
            })))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        assert_eq!(body["request"]["method"], "GET");
        assert_eq!(body["request"]["command"], "getOneDateEnergyBySn");
        assert_eq!(body["request"]["payload"]["queryDate"], "2024-05-01");
        assert!(body["request"]["id"].is_string());
        assert_eq!(body["data"]["serial"], "AL001");
    }

    #[tokio::test]
    async fn query_in_automatic_mode_is_conflict() {
        let router = build_router(spawn_driver(OperatingMode::Automatic));
        let response = router
            .oneshot(post_query(json!({"method": "GET", "command": "getEssList"})))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::CONFLICT);
    }

    #[tokio::test]
    async fn invalid_command_is_bad_request() {
        let router = build_router(spawn_driver(OperatingMode::Manual));
        let response = router
            .oneshot(post_query(json!({"method": "GET", "command": "https://elsewhere"})))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn status_reports_caches_and_mode() {
        let router = build_router(spawn_driver(OperatingMode::Manual));
        let response = router
            .oneshot(Request::builder().uri("/api/status").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        assert_eq!(body["mode"], "manual");
        assert_eq!(body["strategy"], "primary");
        assert_eq!(body["caches"].as_array().unwrap().len(), 4);
    }

    #[tokio::test]
    async fn config_is_redacted() {
        let router = build_router(spawn_driver(OperatingMode::Manual));
        let response = router
            .oneshot(Request::builder().uri("/api/config").body(Body::empty()).unwrap())
            .await
            .unwrap();
        let body = body_json(response).await;
        assert_eq!(body["credentials"]["username"], "user");
        assert!(body["credentials"].get("password").is_none());
    }

    #[tokio::test]
    async fn document_schema_describes_payload() {
        let router = build_router(spawn_driver(OperatingMode::Manual));
        let response = router
            .oneshot(
                Request::builder()
                    .uri("/api/document/schema")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let schema = body_json(response).await;
        let props = schema["properties"].as_object().unwrap();
        for key in ["code", "info", "payload"] {
            assert!(props.contains_key(key), "missing field: {}", key);
        }
        assert!(schema.to_string().contains("rawdata"));
    }

    #[test]
    fn error_statuses() {
        assert_eq!(status_for(&BridgeError::config("x")), StatusCode::BAD_REQUEST);
        assert_eq!(
            status_for(&BridgeError::validation("mode", "automatic")),
            StatusCode::CONFLICT
        );
        assert_eq!(
            status_for(&BridgeError::rejected(6002, "not bound")),
            StatusCode::BAD_GATEWAY
        );
        assert_eq!(
            status_for(&BridgeError::web("driver is not running")),
            StatusCode::SERVICE_UNAVAILABLE
        );
    }
}
