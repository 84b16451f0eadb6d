//! Parlance call gateway: HTTP surface for chat turns, plus the outbound
//! dialer worker. Configuration is explicit: settings are loaded once here
//! and threaded through, and a misconfigured dialog graph aborts startup.

mod chat;
mod dialer;
mod secrets;
mod transport;

use axum::routing::{get, post};
use axum::Router;
use parlance_core::{CallSettings, CallStore};
use parlance_dialog::{
    payment_tool_registry, DialogEngineManager, EngineConfig, HttpCompletionBackend,
};
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<DialogEngineManager>,
    pub store: Arc<CallStore>,
    pub settings: Arc<CallSettings>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let settings = CallSettings::from_env()?;
    info!(client = %settings.client_name, language = settings.language.as_str(), "starting gateway");

    let store = Arc::new(CallStore::new()?);
    let backend = Arc::new(HttpCompletionBackend::from_settings(&settings)?);
    let registry = Arc::new(payment_tool_registry());
    // Graph validation failures are configuration defects; abort startup.
    let engine = Arc::new(DialogEngineManager::new(
        settings.client_name.clone(),
        registry,
        backend,
        EngineConfig::default(),
    )?);

    let dialer_config = dialer::DialerConfig::from_env();
    if dialer_config.enabled {
        let has_credentials = secrets::get_secret("TELEPHONY_ACCOUNT_SID")
            .zip(secrets::get_secret("TELEPHONY_AUTH_TOKEN"))
            .is_some();
        if !has_credentials {
            warn!("dialer enabled without telephony credentials; calls use the loopback transport");
        }
        let transport = Arc::new(transport::LoopbackTransport);
        tokio::spawn(dialer::run_dialer(
            dialer_config,
            Arc::clone(&store),
            transport,
        ));
    }

    let state = AppState {
        engine,
        store,
        settings: Arc::new(settings),
    };

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);
    let app = Router::new()
        .route("/health", get(health))
        .route("/api/v1/chat", post(chat::chat_stream))
        .layer(cors)
        .with_state(state);

    let port: u16 = std::env::var("PARLANCE_PORT")
        .ok()
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(3000);
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    info!("📞 Parlance gateway listening on {addr}");
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}

async fn health() -> axum::Json<serde_json::Value> {
    axum::Json(serde_json::json!({ "status": "ok" }))
}
