use std::{net::SocketAddr, sync::Arc};

use axum::{
    Json, Router,
    body::Body,
    extract::State,
    http::{Request, header},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::get,
};
use axum_server::Server;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use tracing::{info, warn};
use utoipa::OpenApi;

use crate::{
    error::Error,
    shutdown::ShutdownSignal,
    storage::kv_store::StorageHandler,
    sync::Network,
    wallet::import::TransactionImporter,
    writer::TaskSubmitter,
};

use error::ServeError;

pub mod error;
pub mod openapi;
pub mod routes;
pub mod types;

pub static DEFAULT_SERVE_ADDRESS: &str = "0.0.0.0:8080";
const DEFAULT_SAFE_CONFIRMATIONS: u32 = 6;

#[derive(Deserialize, Debug, Clone, Default)]
pub struct ServerConfig {
    pub address: Option<String>,

    /// When set, mutating routes require `Authorization: Bearer <token>`
    pub auth_token: Option<String>,

    /// Depth at which imported transactions are persisted
    pub safe_confirmations: Option<u32>,
}

impl ServerConfig {
    pub fn address(&self) -> &str {
        self.address.as_deref().unwrap_or(DEFAULT_SERVE_ADDRESS)
    }

    pub fn safe_confirmations(&self) -> u32 {
        self.safe_confirmations
            .unwrap_or(DEFAULT_SAFE_CONFIRMATIONS)
    }
}

/// Everything a request handler can reach
pub struct AppContext {
    pub db: StorageHandler,
    pub importer: TransactionImporter,
    pub submitter: Arc<dyn TaskSubmitter>,
    pub network: Network,
    pub started_at: DateTime<Utc>,
    pub auth_token: Option<String>,
}

pub type AppState = Arc<AppContext>;

async fn auto_refresh(
    State(state): State<AppState>,
    request: Request<Body>,
    next: Next,
) -> impl IntoResponse {
    // secondary instances must be told to catch up with the writer
    if state.db.is_read_only() {
        if let Err(e) = state.db.try_refresh_read_only_data() {
            warn!("failed to refresh read-only database: {}", e);
        }
    }

    next.run(request).await
}

pub(crate) async fn require_token(
    State(state): State<AppState>,
    request: Request<Body>,
    next: Next,
) -> Result<Response, ServeError> {
    if let Some(expected) = &state.auth_token {
        let presented = request
            .headers()
            .get(header::AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.strip_prefix("Bearer "));

        if presented != Some(expected.as_str()) {
            return Err(ServeError::Unauthorized);
        }
    }

    Ok(next.run(request).await)
}

pub fn app(state: AppState) -> Router {
    Router::new()
        .route("/info", get(routes::info::info))
        .route("/docs/openapi.json", get(openapi_json))
        .nest("/wallets", routes::wallets::router(state.clone()))
        .layer(middleware::from_fn_with_state(state.clone(), auto_refresh))
        .with_state(state)
}

pub async fn run(state: AppState, address: &str, shutdown: ShutdownSignal) -> Result<(), Error> {
    let addr = address
        .parse::<SocketAddr>()
        .map_err(|e| Error::custom(format!("invalid server address '{address}': {e}")))?;

    let handle = axum_server::Handle::new();

    tokio::spawn({
        let handle = handle.clone();
        async move {
            shutdown.triggered().await;
            handle.graceful_shutdown(None);
        }
    });

    info!("api listening on {}...", addr);

    Server::bind(addr)
        .handle(handle)
        .serve(app(state).into_make_service())
        .await?;

    Ok(())
}

async fn openapi_json() -> impl IntoResponse {
    Json(openapi::APIDoc::openapi())
}
