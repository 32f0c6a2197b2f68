use std::future::ready;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use anyhow::Result;
use axum::extract::{MatchedPath, Request};
use axum::http::Method;
use axum::middleware::{self, Next};
use axum::response::IntoResponse;
use axum::routing::get;
use axum::Router;
use clap::Parser;
use console::{style, Term};
use spayd::auth::{api_auth_middleware, ApiAuth};
use spayd::config::Config;
use spayd::health::{health_check, liveness_check, readiness_check};
use spayd::metrics::{api_metrics, init_prometheus_metrics};
use spayd::observability::{init_logging, request_id_middleware, LoggingConfig};
use spayd::router::{invoice_router, webhook_router};
use spayd::state::AppState;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::info;

#[derive(Parser)]
#[clap(version = "0.3.0", author = "Spayd Developers")]
struct Cli {
    /// Data directory path (contains config and logs)
    #[clap(long, env = "SPAYD_DATA_DIR", default_value = ".")]
    data_dir: PathBuf,

    /// Server address (overrides config)
    #[clap(long, env = "SPAYD_ADDR")]
    addr: Option<String>,

    /// API password (overrides config)
    #[clap(long, env = "SPAYD_PASSWORD")]
    password: Option<String>,

    /// Ledger provider RPC url (overrides config)
    #[clap(long, env = "SPAYD_RPC_URL")]
    rpc_url: Option<String>,

    /// Inbound webhook shared secret (overrides config)
    #[clap(long, env = "SPAYD_WEBHOOK_SECRET")]
    webhook_secret: Option<String>,

    /// Disable authentication
    #[clap(long)]
    no_auth: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();

    let cli: Cli = Cli::parse();

    let log_config = LoggingConfig {
        level: std::env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
        log_dir: cli.data_dir.join("logs"),
        console_output: std::env::var("NO_CONSOLE_LOG").is_err(),
        file_output: std::env::var("NO_FILE_LOG").is_err(),
        ..Default::default()
    };
    init_logging(log_config)?;

    std::fs::create_dir_all(&cli.data_dir)?;

    let config_path = cli.data_dir.join("spayd.conf");
    let term = Term::stdout();
    let (mut config, password_generated) = Config::load_or_create(&config_path)?;

    if password_generated {
        term.write_line(&format!(
            "{}{}",
            style("Generating default api password...").yellow(),
            style("done").white()
        ))?;
    }

    // Override config with CLI arguments
    config.data_dir = Some(cli.data_dir.clone());
    if let Some(addr) = cli.addr {
        if let Some((ip, port_str)) = addr.split_once(':') {
            config.http_bind_ip = ip.to_string();
            if let Ok(port) = port_str.parse::<u16>() {
                config.http_bind_port = port;
            }
        }
    }
    if let Some(password) = cli.password {
        config.http_password = Some(password);
    }
    if let Some(rpc_url) = cli.rpc_url {
        config.rpc_url = rpc_url;
    }
    if let Some(webhook_secret) = cli.webhook_secret {
        config.webhook_secret = Some(webhook_secret);
    }
    if cli.no_auth {
        config.http_password = None;
    }

    info!(
        rpc_url = %config.rpc_url,
        token_mint = %config.token_mint,
        "Starting spayd"
    );

    let state = AppState::new(config.clone())?;
    state.register_default_handlers().await?;
    state.start_background_services().await?;

    serve(&config, state).await
}

async fn serve(config: &Config, state: AppState) -> Result<()> {
    let api_auth = Arc::new(ApiAuth::new(config.http_password.clone()));

    // The provider webhook route stays outside basic auth; it carries its
    // own HMAC signature.
    let invoices = if api_auth.is_enabled() {
        let auth = api_auth.clone();
        invoice_router().route_layer(middleware::from_fn(move |request, next| {
            api_auth_middleware(auth.clone(), request, next)
        }))
    } else {
        invoice_router()
    };

    let v1 = Router::new()
        .nest("/invoices", invoices)
        .nest("/webhooks", webhook_router());

    let auth_status = if config.is_auth_enabled() {
        "enabled"
    } else {
        "disabled"
    };
    info!("Starting server with authentication {auth_status}");

    let cors = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST])
        .allow_origin(Any)
        .allow_headers(Any);

    let metrics_handle = init_prometheus_metrics()?;

    let app = Router::new()
        .nest("/v1", v1)
        .route("/health", get(health_check))
        .route("/health/live", get(liveness_check))
        .route("/health/ready", get(readiness_check))
        .with_state(state.clone())
        .route("/metrics", get(move || ready(metrics_handle.render())))
        .layer(middleware::from_fn(request_id_middleware))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .route_layer(middleware::from_fn(track_metrics));

    let addr = config.http_address();
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!("spayd listening on {addr}");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    state.stop_background_services().await?;
    info!("spayd stopped");
    Ok(())
}

async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
    info!("Shutdown signal received");
}

async fn track_metrics(req: Request, next: Next) -> impl IntoResponse {
    let start = Instant::now();
    let path = if let Some(matched_path) = req.extensions().get::<MatchedPath>() {
        matched_path.as_str().to_owned()
    } else {
        req.uri().path().to_owned()
    };
    let method = req.method().clone();

    let response = next.run(req).await;

    let duration = start.elapsed();
    let status_code = response.status().as_u16();

    api_metrics::record_api_request(&method.to_string(), &path, status_code, duration);

    response
}
