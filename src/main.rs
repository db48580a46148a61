//! Fleet Backend
//! REST API + realtime store sync + licence expiry notifications

use anyhow::{Context, Result};
use clap::Parser;
use fleet_backend::{
    api::{self, AppState},
    auth::{JwtHandler, UserStore},
    config::{load_env, Config},
    db::Database,
    jobs::{LicenceExpiryJob, LogMailer},
    middleware::{RateLimitConfig, RateLimitLayer},
    realtime::{FirebaseStore, MemoryStore, RealtimeStore},
    sync::{boot, SyncService},
};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::{net::TcpListener, time::interval};
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<()> {
    load_env();
    init_tracing();
    let config = Config::parse();

    info!("🚚 Fleet backend starting");

    let db = Arc::new(Database::new(&config.db_path)?);

    if config.uses_dev_secret() {
        warn!("⚠️  JWT_SECRET not set - using development secret");
    }
    let jwt = Arc::new(JwtHandler::new(
        config.jwt_secret.clone(),
        config.jwt_expiration_hours,
    ));
    let users = Arc::new(UserStore::new(db.clone(), config.bcrypt_cost));

    let remote: Arc<dyn RealtimeStore> = match &config.realtime_url {
        Some(url) if !url.trim().is_empty() => {
            info!("📡 Realtime store: {}", url);
            Arc::new(FirebaseStore::new(url, config.realtime_token.clone())?)
        }
        _ => {
            warn!("⚠️  FIREBASE_DATABASE_URL not set - using in-memory realtime store");
            Arc::new(MemoryStore::new())
        }
    };
    let sync = Arc::new(SyncService::new(db.clone(), remote, config.push_local));

    boot(
        &sync,
        &users,
        &config.admin_email,
        &config.admin_password,
        config.sync_enabled,
    )
    .await
    .context("Failed to bootstrap admin user")?;

    if config.sync_enabled {
        sync.clone().listen();
    } else {
        info!("Realtime sync disabled");
    }

    let licence_job = LicenceExpiryJob::new(
        db.clone(),
        sync.clone(),
        Arc::new(LogMailer),
        config.licence_warning_days,
        config.licence_scan_interval(),
    );
    tokio::spawn(licence_job.run());

    let login_limiter = RateLimitLayer::new(RateLimitConfig::per_minute(config.login_rate_limit));
    tokio::spawn(limiter_cleanup(login_limiter.clone()));

    let state = AppState {
        db,
        sync,
        users,
        jwt,
    };
    let app = api::create_router(state, login_limiter);

    let listener = TcpListener::bind(config.bind_addr)
        .await
        .with_context(|| format!("Failed to bind {}", config.bind_addr))?;
    info!("🎯 API server listening on {}", config.bind_addr);

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await
    .context("Server error")?;

    Ok(())
}

async fn limiter_cleanup(limiter: RateLimitLayer) {
    let mut ticker = interval(Duration::from_secs(300));
    loop {
        ticker.tick().await;
        limiter.cleanup();
    }
}

fn init_tracing() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "fleet_backend=debug,fleet=debug,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}
