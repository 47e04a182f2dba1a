use crate::config::{AppConfig, ServerConfig};
use crate::error::GatewayError;
use crate::subprocess::ProcessSource;
use crate::types::MapDataPoint;
use crate::upstream::UpstreamClient;
use anyhow::{Context, Result};
use axum::{
    body::Bytes,
    extract::State,
    http::{header::CONTENT_TYPE, HeaderValue, Method},
    response::{IntoResponse, Json, Response},
    routing::get,
    Router,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::signal;
use tower_http::cors::{AllowOrigin, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{error, info};

const COUNTRY_FIRE_MAP_PATH: &str = "/api/country_fire_map";

pub struct AppState {
    pub upstream: UpstreamClient,
    pub process: ProcessSource,
    pub config: AppConfig,
}

impl AppState {
    pub fn from_config(config: AppConfig) -> Result<Self> {
        let upstream = UpstreamClient::from_config(&config.upstream)
            .context("Failed to build upstream HTTP client")?;
        let process = ProcessSource::from_config(&config.process);

        Ok(Self {
            upstream,
            process,
            config,
        })
    }
}

pub fn build_router(state: Arc<AppState>) -> Result<Router> {
    let origin: HeaderValue = state
        .config
        .server
        .allowed_origin
        .parse()
        .with_context(|| format!("Invalid allowed origin: {}", state.config.server.allowed_origin))?;

    let cors = CorsLayer::new()
        .allow_origin(AllowOrigin::list([origin]))
        .allow_methods([Method::GET, Method::OPTIONS])
        .allow_headers([CONTENT_TYPE])
        .max_age(Duration::from_secs(60 * 60));

    Ok(Router::new()
        .route("/health", get(health_handler))
        .route("/api/mapdata", get(map_data_handler))
        .route(COUNTRY_FIRE_MAP_PATH, get(country_fire_map_handler))
        .route("/api/countrymapdata", get(country_map_data_handler))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state))
}

pub async fn start_server(config: AppConfig) -> Result<()> {
    info!("Upstream GeoDataSource: {}", config.upstream.base_url);
    info!("Local GeoDataSource: {} {:?}", config.process.program, config.process.args);

    let listener = bind_listener(&config.server).await?;
    let addr = listener.local_addr()?;

    let state = Arc::new(AppState::from_config(config)?);
    let app = build_router(state)?;
    info!("Server is running on http://{}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Server shut down");
    Ok(())
}

/// Binds `server.bind` and `server.port`. The host may be a hostname or an
/// IPv4/IPv6 literal.
pub async fn bind_listener(server: &ServerConfig) -> Result<TcpListener> {
    TcpListener::bind((server.bind.as_str(), server.port))
        .await
        .with_context(|| format!("Failed to bind {} port {}", server.bind, server.port))
}

async fn health_handler() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "healthy",
        "service": env!("CARGO_PKG_NAME"),
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

/// Placeholder fixture kept for integration checks.
async fn map_data_handler() -> Json<Vec<MapDataPoint>> {
    Json(vec![MapDataPoint {
        coordinates: vec![[37.7749, -122.4194]],
        risk_color: "red".to_string(),
    }])
}

async fn country_fire_map_handler(State(state): State<Arc<AppState>>) -> Response {
    match state.upstream.fetch(COUNTRY_FIRE_MAP_PATH).await {
        Ok(body) => ([(CONTENT_TYPE, "application/json")], body).into_response(),
        Err(err) => {
            error!("Error fetching data: {err}");

            let pass_through = match &err {
                GatewayError::UpstreamBadStatus(status) if state.config.upstream.pass_through_status => {
                    Some(*status)
                }
                _ => None,
            };

            let mut response = err.into_response();
            if let Some(status) = pass_through {
                *response.status_mut() = status;
            }
            response
        }
    }
}

async fn country_map_data_handler(State(state): State<Arc<AppState>>) -> Result<Response, GatewayError> {
    let body = state.process.run().await.map_err(|e| {
        error!("Error generating map data: {e}");
        GatewayError::from(e)
    })?;

    Ok(([(CONTENT_TYPE, content_type_for(&body))], body).into_response())
}

fn content_type_for(body: &Bytes) -> &'static str {
    if serde_json::from_slice::<serde::de::IgnoredAny>(body).is_ok() {
        "application/json"
    } else {
        "text/plain; charset=utf-8"
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to install Ctrl+C handler: {e}");
            std::future::pending::<()>().await;
        }
        info!("Received Ctrl+C, shutting down");
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
                info!("Received terminate signal, shutting down");
            }
            Err(e) => {
                error!("Failed to install terminate handler: {e}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{FETCH_ERROR_MESSAGE, GENERATE_ERROR_MESSAGE};
    use crate::test_support::{spawn_upstream, unused_addr};
    use crate::types::ErrorResponse;
    use axum::{
        body::{to_bytes, Body},
        http::{Request, StatusCode},
    };
    use std::net::SocketAddr;
    use tower::ServiceExt;

    fn test_config(upstream: SocketAddr) -> AppConfig {
        let mut config = AppConfig::default();
        config.upstream.base_url = format!("http://{upstream}");
        config.upstream.timeout_secs = 2;
        config
    }

    fn app(config: AppConfig) -> Router {
        build_router(Arc::new(AppState::from_config(config).unwrap())).unwrap()
    }

    async fn get_path(app: Router, path: &str) -> (StatusCode, Option<String>, Bytes) {
        let response = app
            .oneshot(Request::builder().uri(path).body(Body::empty()).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, content_type, body)
    }

    async fn upstream_with(status: StatusCode, body: &'static str) -> SocketAddr {
        spawn_upstream(Router::new().route(
            COUNTRY_FIRE_MAP_PATH,
            get(move || async move { (status, body) }),
        ))
        .await
    }

    #[tokio::test]
    async fn mapdata_serves_fixture() {
        let (status, _, body) = get_path(app(AppConfig::default()), "/api/mapdata").await;
        assert_eq!(status, StatusCode::OK);

        let points: Vec<MapDataPoint> = serde_json::from_slice(&body).unwrap();
        assert_eq!(points.len(), 1);
        assert_eq!(points[0].risk_color, "red");
        assert_eq!(points[0].coordinates, vec![[37.7749, -122.4194]]);
    }

    #[tokio::test]
    async fn proxy_relays_upstream_body_byte_for_byte() {
        let upstream_body = "{\"us\": \"{\\\"type\\\": \\\"FeatureCollection\\\", \\\"features\\\": []}\",\n \"states\": {}}";
        let addr = upstream_with(StatusCode::OK, upstream_body).await;

        let (status, content_type, body) = get_path(app(test_config(addr)), COUNTRY_FIRE_MAP_PATH).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(content_type.as_deref(), Some("application/json"));
        assert_eq!(&body[..], upstream_body.as_bytes());
    }

    #[tokio::test]
    async fn proxy_collapses_upstream_errors_to_generic_500() {
        for upstream_status in [StatusCode::NOT_FOUND, StatusCode::SERVICE_UNAVAILABLE] {
            let addr = upstream_with(upstream_status, "Traceback (most recent call last)").await;

            let (status, _, body) = get_path(app(test_config(addr)), COUNTRY_FIRE_MAP_PATH).await;
            assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
            assert_eq!(&body[..], br#"{"error":"An error occurred while fetching data"}"#);
        }
    }

    #[tokio::test]
    async fn proxy_reports_refused_connection_as_500() {
        let addr = unused_addr().await;

        let (status, _, body) = get_path(app(test_config(addr)), COUNTRY_FIRE_MAP_PATH).await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        let parsed: ErrorResponse = serde_json::from_slice(&body).unwrap();
        assert_eq!(parsed.error, FETCH_ERROR_MESSAGE);
    }

    #[tokio::test]
    async fn proxy_reports_timeout_as_500() {
        let addr = spawn_upstream(Router::new().route(
            COUNTRY_FIRE_MAP_PATH,
            get(|| async {
                tokio::time::sleep(Duration::from_secs(10)).await;
                "{}"
            }),
        ))
        .await;
        let mut config = test_config(addr);
        config.upstream.timeout_secs = 1;

        let (status, _, body) = get_path(app(config), COUNTRY_FIRE_MAP_PATH).await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(&body[..], br#"{"error":"An error occurred while fetching data"}"#);
    }

    #[tokio::test]
    async fn proxy_can_pass_through_upstream_status() {
        let addr = upstream_with(StatusCode::SERVICE_UNAVAILABLE, "down").await;
        let mut config = test_config(addr);
        config.upstream.pass_through_status = true;

        let (status, _, body) = get_path(app(config), COUNTRY_FIRE_MAP_PATH).await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(&body[..], br#"{"error":"An error occurred while fetching data"}"#);
    }

    #[cfg(unix)]
    fn process_config(script: &str) -> AppConfig {
        let mut config = AppConfig::default();
        config.process.program = "sh".to_string();
        config.process.args = vec!["-c".to_string(), script.to_string()];
        config.process.timeout_secs = 10;
        config
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn process_output_is_sent_whole_after_exit() {
        let config = process_config(
            r#"printf '{"us":"'; sleep 0.1; printf 'a","states":"'; sleep 0.1; printf 'b"}'"#,
        );

        let (status, content_type, body) = get_path(app(config), "/api/countrymapdata").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(content_type.as_deref(), Some("application/json"));
        assert_eq!(&body[..], br#"{"us":"a","states":"b"}"#);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn process_non_json_output_is_plain_text() {
        let (status, content_type, body) = get_path(app(process_config("printf 'hello'")), "/api/countrymapdata").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(content_type.as_deref(), Some("text/plain; charset=utf-8"));
        assert_eq!(&body[..], b"hello");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn process_failure_is_structured_500() {
        let config = process_config("printf '{\"us\":'; echo 'KeyError: STATEFP' >&2; exit 1");

        let (status, _, body) = get_path(app(config), "/api/countrymapdata").await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        let parsed: ErrorResponse = serde_json::from_slice(&body).unwrap();
        assert_eq!(parsed.error, GENERATE_ERROR_MESSAGE);
    }

    #[tokio::test]
    async fn rejects_unparseable_origin() {
        let mut config = AppConfig::default();
        config.server.allowed_origin = "http://bad\norigin".to_string();
        assert!(build_router(Arc::new(AppState::from_config(config).unwrap())).is_err());
    }

    async fn allow_origin_for(origin: &str) -> Option<HeaderValue> {
        let response = app(AppConfig::default())
            .oneshot(
                Request::builder()
                    .uri("/api/mapdata")
                    .header("origin", origin)
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        response.headers().get("access-control-allow-origin").cloned()
    }

    #[tokio::test]
    async fn cors_allows_configured_origin_only() {
        assert_eq!(
            allow_origin_for("http://localhost:3000").await.unwrap(),
            "http://localhost:3000"
        );
        assert!(allow_origin_for("http://evil.example").await.is_none());
    }

    #[tokio::test]
    async fn binds_hostnames_and_serves() {
        let server = ServerConfig {
            bind: "localhost".to_string(),
            port: 0,
            ..ServerConfig::default()
        };
        let listener = bind_listener(&server).await.unwrap();
        let addr = listener.local_addr().unwrap();
        assert!(addr.ip().is_loopback());
        assert_ne!(addr.port(), 0);

        let router = app(AppConfig::default());
        tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });

        let response = reqwest::get(format!("http://{addr}/health")).await.unwrap();
        assert!(response.status().is_success());
    }

    #[tokio::test]
    async fn binds_ip_literals_without_brackets() {
        let server = ServerConfig {
            bind: "127.0.0.1".to_string(),
            port: 0,
            ..ServerConfig::default()
        };
        assert!(bind_listener(&server).await.is_ok());

        // IPv6 may be disabled on the host; only check that the literal is accepted as an address.
        let v6 = ServerConfig {
            bind: "::1".to_string(),
            port: 0,
            ..ServerConfig::default()
        };
        if let Err(e) = bind_listener(&v6).await {
            let io = e.downcast_ref::<std::io::Error>().unwrap();
            assert_ne!(io.kind(), std::io::ErrorKind::InvalidInput);
        }
    }
}
