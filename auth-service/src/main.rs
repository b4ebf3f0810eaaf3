use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context;
use auth_service::app::{build_router, cors_layer, AppState};
use auth_service::config::AuthConfig;
use auth_service::metrics::AuthMetrics;
use auth_service::pg_store::PgStore;
use auth_service::service::{AuthService, AuthSettings};
use auth_service::tokens::TokenIssuer;
use common_auth::TokenCodec;
use sqlx::postgres::PgPoolOptions;
use tokio::net::TcpListener;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = AuthConfig::from_env().context("Failed to load auth-service configuration")?;
    info!(?config, "loaded configuration");

    let pool = PgPoolOptions::new()
        .max_connections(config.db_max_connections)
        .connect(&config.database_url)
        .await
        .context("Failed to connect to DATABASE_URL")?;
    let store = Arc::new(PgStore::new(pool));

    let codec = Arc::new(
        TokenCodec::new(&config.jwt_config()).context("Invalid token signing configuration")?,
    );
    let tokens = TokenIssuer::new(
        codec.clone(),
        config.access_ttl,
        config.refresh_ttl,
        config.two_factor_ttl,
    );
    let auth = AuthService::new(
        store.clone(),
        tokens,
        AuthSettings {
            totp_issuer: config.totp_issuer.clone(),
            recovery_code_count: config.recovery_code_count,
            rotate_refresh_tokens: config.rotate_refresh_tokens,
        },
    );

    let state = AppState {
        auth: Arc::new(auth),
        codec,
        permissions: store.clone(),
        roles: store,
        metrics: Arc::new(AuthMetrics::new()?),
    };

    let app = build_router(state, Some(cors_layer(&config.cors_origins)?));

    info!(addr = %config.bind_addr, "starting auth-service");
    let listener = TcpListener::bind(config.bind_addr).await?;
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await?;

    Ok(())
}
