pub mod api;
pub mod app_state;
pub mod config;
pub mod edge;
pub mod entry;
pub mod issuer;
pub mod object_store;

use axum::Router;
use axum::extract::Extension;
use axum::http::Method;
use axum::routing::get;
use tokio::net::TcpListener;
use tower_http::cors::{Any, CorsLayer};
use tracing::info;

//
// Re-export
//
pub use api::{get_url, log_request_errors, serve_asset};
pub use app_state::AppState;
pub use config::Config;
pub use edge::{EdgeValidator, RedeemError, RedeemedToken, deny_response, one_time_token_middleware};
pub use entry::{
    Entry, EntryState, EntryStore, EntryStoreConfig, EntryStoreResolver, MemoryEntryStore,
    SqliteEntryStore, StoreError,
};
pub use issuer::{IssueError, IssueUrlResponse, IssuedUrl, IssuerSettings, RetryPolicy, TokenIssuer};
pub use object_store::{ObjectStore, StorageBackend};

/// Public router: every object fetch goes through the one-time token check
pub fn distribution_router(state: AppState) -> Router {
    Router::new()
        .route("/{*key}", get(serve_asset))
        .route_layer(axum::middleware::from_fn_with_state(
            state.validator.clone(),
            one_time_token_middleware,
        ))
        .fallback(|| async { deny_response() })
        .layer(axum::middleware::from_fn(log_request_errors))
        .layer(Extension(state))
}

/// Internal router exposing URL issuance
pub fn issuer_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET])
        .allow_headers(Any);

    Router::new()
        .route("/get-url", get(get_url))
        .layer(axum::middleware::from_fn(log_request_errors))
        .layer(cors)
        .layer(Extension(state))
}

pub async fn run(config: Config) -> anyhow::Result<()> {
    // Ensure we're in a proper async context by yielding once
    tokio::task::yield_now().await;

    config.validate()?;

    let listen_on_port = config.listen_on_port;
    let internal_port = config.internal_port;

    info!(
        storage_backend = %config.storage_backend,
        entry_store = %config.entry_store,
        asset_path = %config.asset_path,
        token_ttl_secs = config.token_ttl_secs,
        "Starting one-time URL service"
    );

    let state = AppState::new(&config).await?;

    let distribution_app = distribution_router(state.clone());
    let issuer_app = issuer_router(state);

    // Start distribution server
    let distribution_addr = format!("0.0.0.0:{listen_on_port}");
    info!("Distribution listening on {distribution_addr}");
    let distribution_listener = TcpListener::bind(&distribution_addr).await?;

    // Start issuer server
    let issuer_addr = format!("0.0.0.0:{internal_port}");
    info!("Issuer API listening on {issuer_addr}");
    let issuer_listener = TcpListener::bind(&issuer_addr).await?;

    // Run both servers concurrently
    tokio::select! {
        result = axum::serve(distribution_listener, distribution_app) => result?,
        result = axum::serve(issuer_listener, issuer_app) => result?,
    }

    Ok(())
}
