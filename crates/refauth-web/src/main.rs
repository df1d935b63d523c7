mod api;
mod auth;
mod config;
mod dto;
mod error;
mod mailer;
mod middleware;
mod state;

use std::sync::Arc;

use axum::http::{header, Method};
use axum::middleware::from_fn;
use axum::Router;
use refauth_core::{AuthFlow, IdentityStore, LogNotifier, MemoryStore, Notifier, SqliteStore};
use tower_http::cors::CorsLayer;
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::config::ServerConfig;
use crate::mailer::WebhookNotifier;
use crate::state::AppState;

const MAX_BODY_BYTES: usize = 64 * 1024;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "refauth_web=debug,refauth_core=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = ServerConfig::load()?;
    let bind_addr = config.bind_addr;
    let tls_config = config.tls.clone();

    let store: Arc<dyn IdentityStore> = match &config.storage.database_url {
        Some(url) => {
            tracing::info!("Using SQLite store: {url}");
            Arc::new(SqliteStore::connect(url).await?)
        }
        None => {
            tracing::warn!("No database configured. Users are kept in memory and lost on restart.");
            Arc::new(MemoryStore::new())
        }
    };

    let notifier: Arc<dyn Notifier> = match &config.mail.webhook_url {
        Some(url) => Arc::new(WebhookNotifier::new(url.clone(), config.mail.from_address.clone())),
        None => {
            tracing::warn!("No mail webhook configured. Password reset mail is written to the log.");
            Arc::new(LogNotifier)
        }
    };

    let flow = Arc::new(AuthFlow::new(store, notifier, config.auth_settings())?);

    let state = AppState {
        config: Arc::new(config),
        flow: flow.clone(),
    };

    // Rate-limit window + stats cache cleanup task
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(std::time::Duration::from_secs(60));
        loop {
            interval.tick().await;
            flow.purge_expired();
        }
    });

    let app = build_app(state);

    if let (Some(cert), Some(key)) = (&tls_config.cert_path, &tls_config.key_path) {
        use axum_server::tls_rustls::RustlsConfig;
        let rustls_config = RustlsConfig::from_pem_file(cert, key).await?;
        tracing::info!("refauth-web listening on https://{}", bind_addr);
        axum_server::bind_rustls(bind_addr, rustls_config)
            .serve(app.into_make_service_with_connect_info::<std::net::SocketAddr>())
            .await?;
    } else {
        let listener = tokio::net::TcpListener::bind(bind_addr).await?;
        tracing::info!("refauth-web listening on http://{}", bind_addr);
        axum::serve(
            listener,
            app.into_make_service_with_connect_info::<std::net::SocketAddr>(),
        )
        .await?;
    }

    Ok(())
}

/// The full application: `/api` routes plus the shared middleware stack.
pub(crate) fn build_app(state: AppState) -> Router {
    // CORS: same-origin only by default (no cross-origin requests allowed)
    let cors = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST])
        .allow_headers([header::CONTENT_TYPE, header::AUTHORIZATION]);

    let base_router = Router::new().nest("/api", api::router());

    if state.config.tls_enabled() {
        base_router
            .layer(from_fn(middleware::security_headers::security_headers_with_hsts))
            .layer(RequestBodyLimitLayer::new(MAX_BODY_BYTES))
            .layer(cors)
            .layer(TraceLayer::new_for_http())
            .with_state(state)
    } else {
        base_router
            .layer(from_fn(middleware::security_headers::security_headers))
            .layer(RequestBodyLimitLayer::new(MAX_BODY_BYTES))
            .layer(cors)
            .layer(TraceLayer::new_for_http())
            .with_state(state)
    }
}
