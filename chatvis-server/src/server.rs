use std::{
    sync::{Arc, OnceLock},
    time::Duration,
};

use axum::{
    Extension, Router,
    http::{HeaderValue, Method, StatusCode, header},
    middleware::from_fn_with_state,
    response::IntoResponse,
    routing::get,
    serve,
};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use shared::config::{Config, LogFormat, server::DatabaseConfig};
use sqlx::postgres::{PgConnectOptions, PgPoolOptions};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tower_http::cors::{AllowHeaders, AllowMethods, AllowOrigin, CorsLayer};
use tracing::{error, info, level_filters::LevelFilter, warn};
use tracing_subscriber::{EnvFilter, fmt};

use crate::{
    app_state::AppState,
    auth::TokenService,
    db::bootstrap,
    dispatch::{AgentSpec, DispatchRuntime, DispatchServices},
    hub::Hub,
    middleware::request_context::{RequestIdState, assign_request_id},
    routes, tracer,
    services::{GroupDirectory, MessageStore, PgGroupDirectory, PgMessageStore},
};

static PROMETHEUS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Handle to the process-wide Prometheus recorder, installing it on first use.
pub(crate) fn metrics_handle() -> PrometheusHandle {
    PROMETHEUS_HANDLE
        .get_or_init(|| {
            let recorder = PrometheusBuilder::new().build_recorder();
            let handle = recorder.handle();
            if metrics::set_global_recorder(recorder).is_err() {
                warn!("a metrics recorder is already installed; /metrics will stay empty");
            }
            handle
        })
        .clone()
}

async fn metrics_endpoint(Extension(handle): Extension<PrometheusHandle>) -> impl IntoResponse {
    (
        StatusCode::OK,
        [(
            header::CONTENT_TYPE,
            HeaderValue::from_static("text/plain; version=0.0.4"),
        )],
        handle.render(),
    )
}

/// Initializes the tracing subscriber for logging using the provided configuration.
///
/// Returns the configured level. A subscriber installed earlier is left in place.
pub fn initialize_tracing(config: &Config) -> String {
    let env_filter = build_env_filter(config);

    let fmt_builder = fmt::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .with_level(true)
        .with_thread_ids(false)
        .with_thread_names(false);

    let installed = if matches!(config.logging.format, LogFormat::Json) {
        fmt_builder.json().with_ansi(false).try_init()
    } else {
        fmt_builder.with_ansi(true).try_init()
    };
    if installed.is_err() {
        warn!("tracing subscriber already installed");
    }

    config.logging.level.clone()
}

fn build_env_filter(config: &Config) -> EnvFilter {
    let default_level = config
        .logging
        .level
        .parse::<LevelFilter>()
        .unwrap_or(LevelFilter::INFO);

    EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::builder()
            .with_default_directive(default_level.into())
            .from_env_lossy()
    })
}

/// Creates the Postgres pool, applying the configured statement timeout to every
/// connection.
///
/// # Errors
/// Returns an error if the URL does not parse or no connection can be established.
#[allow(clippy::cast_precision_loss)]
pub async fn create_database_pool(db: &DatabaseConfig) -> Result<sqlx::PgPool, sqlx::Error> {
    let options = db
        .url
        .parse::<PgConnectOptions>()?
        .options([("statement_timeout", db.statement_timeout_ms.to_string())]);
    let pool = PgPoolOptions::new()
        .max_connections(db.max_connections)
        .connect_with(options)
        .await?;
    metrics::gauge!("db_pool_max_connections").set(f64::from(db.max_connections));
    metrics::gauge!("db_statement_timeout_ms").set(db.statement_timeout_ms as f64);
    Ok(pool)
}

/// Creates the CORS layer. An empty origin list allows any origin.
pub fn create_cors_layer(config: &Config) -> CorsLayer {
    let methods = vec![
        Method::GET,
        Method::POST,
        Method::PUT,
        Method::DELETE,
        Method::OPTIONS,
    ];

    let mut cors = CorsLayer::new()
        .allow_methods(AllowMethods::list(methods))
        .allow_headers(AllowHeaders::list([
            header::AUTHORIZATION,
            header::CONTENT_TYPE,
        ]))
        .allow_credentials(config.server.cors.allow_credentials)
        .max_age(Duration::from_secs(config.server.cors.max_age_seconds));

    if config.server.cors.allowed_origins.is_empty() {
        cors = cors.allow_origin(AllowOrigin::any());
    } else {
        let origins = config
            .server
            .cors
            .allowed_origins
            .iter()
            .filter_map(|origin| HeaderValue::from_str(origin).ok())
            .collect::<Vec<_>>();
        cors = cors.allow_origin(AllowOrigin::list(origins));
    }

    cors
}

/// Creates the main application router with all middleware and routes.
pub fn create_app_router(
    state: Arc<AppState>,
    config: &Config,
    metrics_handle: PrometheusHandle,
) -> Router {
    let request_id_state = RequestIdState::from_config(config);

    Router::new()
        .merge(routes::public::create_router_public())
        .merge(routes::protected::create_router_protected(Arc::clone(&state)))
        .merge(routes::health::create_health_router())
        .route("/metrics", get(metrics_endpoint))
        .layer(Extension(metrics_handle))
        .layer(create_cors_layer(config))
        .layer(tracer::create_trace_layer())
        .layer(from_fn_with_state(request_id_state, assign_request_id))
        .with_state(state)
}

/// Resolves when the process receives Ctrl+C.
pub async fn create_shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        error!(error = %err, "cannot listen for shutdown signal; running until killed");
        std::future::pending::<()>().await;
    }
    info!("Shutting down...");
}

/// Starts the server: database bootstrap, hub, agent dispatch, then HTTP.
///
/// On shutdown the listener stops first, then the dispatch runtime drains its in-flight
/// jobs.
///
/// # Errors
/// Returns an error if the database, an agent's completion client, or the listener cannot
/// be set up, or if serving fails.
pub async fn run(config: Config) -> Result<(), Box<dyn std::error::Error>> {
    initialize_tracing(&config);
    info!(profile = ?config.profile, agents = config.agents.len(), "Starting server...");

    let metrics_handle = metrics_handle();

    let pool = create_database_pool(&config.db).await?;
    bootstrap::ensure_liveness(&pool).await?;
    bootstrap::run(&pool, &config.db).await?;
    bootstrap::ensure_readiness(&pool).await?;

    let (hub, intake) = Hub::new();
    let hub = Arc::new(hub);
    let messages: Arc<dyn MessageStore> = Arc::new(PgMessageStore::new(pool.clone()));
    let directory: Arc<dyn GroupDirectory> = Arc::new(PgGroupDirectory::new(pool.clone()));

    let agents = config
        .agents
        .iter()
        .cloned()
        .map(|agent| AgentSpec::from_config(agent, &config.dispatch))
        .collect::<Result<Vec<_>, _>>()?;

    let shutdown = CancellationToken::new();
    let runtime = DispatchRuntime::start(
        agents,
        DispatchServices::new(Arc::clone(&messages), Arc::clone(&directory), Arc::clone(&hub)),
        intake,
        Duration::from_secs(config.dispatch.completion_timeout_seconds),
        &shutdown,
    )
    .await;

    let state = Arc::new(
        AppState::new(
            hub,
            Arc::new(TokenService::from_config(&config.auth)),
            config.websocket.clone(),
        )
        .with_pool(pool)
        .with_stores(messages, directory),
    );
    let app = create_app_router(state, &config, metrics_handle);

    let listener = TcpListener::bind((config.server.host.as_str(), config.server.port)).await?;
    info!(address = %listener.local_addr()?, "Listening");

    let served = serve(listener, app)
        .with_graceful_shutdown(create_shutdown_signal())
        .await;

    shutdown.cancel();
    runtime.shutdown().await;
    info!("Server stopped");

    served?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{
        body::{Body, to_bytes},
        http::Request,
    };
    use serde_json::Value;
    use shared::config::{
        Profile,
        server::{AuthConfig, WebSocketConfig},
    };
    use std::{
        io::{self, Write},
        sync::Mutex,
    };
    use tower::ServiceExt;
    use tracing::{Subscriber, info};
    use tracing_subscriber::fmt::MakeWriter;

    #[derive(Clone)]
    struct BufferMakeWriter {
        buffer: Arc<Mutex<Vec<u8>>>,
    }

    struct BufferWriter {
        buffer: Arc<Mutex<Vec<u8>>>,
    }

    impl<'a> MakeWriter<'a> for BufferMakeWriter {
        type Writer = BufferWriter;

        fn make_writer(&'a self) -> Self::Writer {
            BufferWriter {
                buffer: Arc::clone(&self.buffer),
            }
        }
    }

    impl Write for BufferWriter {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.buffer.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    fn subscriber_with_writer<W>(config: &Config, writer: W) -> Box<dyn Subscriber + Send + Sync>
    where
        W: for<'writer> MakeWriter<'writer> + Send + Sync + 'static,
    {
        let builder = fmt::fmt()
            .with_env_filter(build_env_filter(config))
            .with_target(false)
            .with_writer(writer);

        if matches!(config.logging.format, LogFormat::Json) {
            Box::new(builder.json().with_ansi(false).finish())
        } else {
            Box::new(builder.with_ansi(false).finish())
        }
    }

    fn first_log_line(config: &Config) -> String {
        let buffer = Arc::new(Mutex::new(Vec::new()));
        let subscriber = subscriber_with_writer(
            config,
            BufferMakeWriter {
                buffer: Arc::clone(&buffer),
            },
        );
        let dispatch = tracing::dispatcher::Dispatch::new(subscriber);
        tracing::dispatcher::with_default(&dispatch, || {
            info!(event = "format_test", "log entry");
        });
        let contents = String::from_utf8(buffer.lock().unwrap().clone()).unwrap();
        contents
            .lines()
            .find(|line| !line.trim().is_empty())
            .unwrap()
            .to_string()
    }

    fn test_state() -> Arc<AppState> {
        let (hub, _intake) = Hub::new();
        Arc::new(AppState::new(
            Arc::new(hub),
            Arc::new(TokenService::from_config(&AuthConfig::default())),
            WebSocketConfig::default(),
        ))
    }

    fn test_app(config: &Config) -> Router {
        create_app_router(test_state(), config, metrics_handle())
    }

    #[test]
    fn initialize_tracing_returns_configured_level() {
        let config = Config::default_for_profile(Profile::Dev);
        assert_eq!(initialize_tracing(&config), config.logging.level);
        // A second call must not panic.
        initialize_tracing(&config);
    }

    #[test]
    fn json_log_format_produces_json_output() {
        let mut config = Config::default_for_profile(Profile::Dev);
        config.logging.format = LogFormat::Json;

        let value: Value = serde_json::from_str(&first_log_line(&config)).unwrap();
        assert_eq!(value["fields"]["message"], "log entry");
        assert_eq!(value["fields"]["event"], "format_test");
    }

    #[test]
    fn text_log_format_emits_plain_events() {
        let config = Config::default_for_profile(Profile::Dev);
        let line = first_log_line(&config);
        assert!(serde_json::from_str::<Value>(&line).is_err());
        assert!(line.contains("log entry"));
    }

    #[tokio::test]
    async fn metrics_endpoint_returns_prometheus_payload() {
        let app = test_app(&Config::default_for_profile(Profile::Test));
        metrics::counter!("server_test_probe_total").increment(1);
        let response = app
            .oneshot(Request::builder().uri("/metrics").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.headers().get(header::CONTENT_TYPE).unwrap(),
            "text/plain; version=0.0.4"
        );
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let body = String::from_utf8(bytes.to_vec()).unwrap();
        assert!(body.contains("server_test_probe_total"));
    }

    #[tokio::test]
    async fn responses_echo_the_request_id() {
        let config = Config::default_for_profile(Profile::Test);
        let response = test_app(&config)
            .oneshot(
                Request::builder()
                    .uri("/healthz")
                    .header("x-request-id", "req-42")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers().get("x-request-id").unwrap(), "req-42");
    }

    #[tokio::test]
    async fn protected_routes_require_a_token() {
        let config = Config::default_for_profile(Profile::Test);
        let response = test_app(&config)
            .oneshot(
                Request::builder()
                    .uri("/api/groups")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn cors_allows_configured_origin() {
        let mut config = Config::default_for_profile(Profile::Test);
        config.server.cors.allowed_origins = vec!["https://chat.example.com".to_string()];

        let response = test_app(&config)
            .oneshot(
                Request::builder()
                    .method(Method::OPTIONS)
                    .uri("/api/groups")
                    .header(header::ORIGIN, "https://chat.example.com")
                    .header(header::ACCESS_CONTROL_REQUEST_METHOD, "GET")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(
            response
                .headers()
                .get(header::ACCESS_CONTROL_ALLOW_ORIGIN)
                .unwrap(),
            "https://chat.example.com"
        );
    }

    #[tokio::test]
    async fn cors_ignores_unknown_origin() {
        let mut config = Config::default_for_profile(Profile::Test);
        config.server.cors.allowed_origins = vec!["https://chat.example.com".to_string()];

        let response = test_app(&config)
            .oneshot(
                Request::builder()
                    .method(Method::OPTIONS)
                    .uri("/api/groups")
                    .header(header::ORIGIN, "https://evil.example.com")
                    .header(header::ACCESS_CONTROL_REQUEST_METHOD, "GET")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert!(
            response
                .headers()
                .get(header::ACCESS_CONTROL_ALLOW_ORIGIN)
                .is_none()
        );
    }
}
