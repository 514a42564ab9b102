//! Keyhole gateway server binary.
//!
//! Connects to PostgreSQL, applies migrations and serves the HTTP API until
//! interrupted.

use std::net::SocketAddr;
use std::sync::Arc;

use clap::Parser;
use keyhole_api::config::ApiConfig;
use keyhole_core::Gateway;
use keyhole_core::migrate::{self, DEFAULT_MAX_CONNECTIONS};
use keyhole_core::store::PgStore;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

const DEFAULT_LOG_FILTER: &str = "info,keyhole_api=debug,keyhole_core=debug";

/// CLI arguments for the gateway server.
#[derive(Parser, Debug)]
#[command(name = "keyhole_server", about = "Keyhole SSO gateway server")]
struct Args {
    /// Address to listen on. Overrides `BIND_ADDR`.
    #[arg(long)]
    bind_addr: Option<String>,

    /// PostgreSQL connection URL.
    #[arg(
        long,
        env = "DATABASE_URL",
        default_value = "postgres://localhost:5432/keyhole"
    )]
    database_url: String,

    /// Maximum number of database connections in the pool.
    #[arg(long, default_value_t = DEFAULT_MAX_CONNECTIONS)]
    max_connections: u32,

    /// Skip running migrations at startup.
    #[arg(long, default_value_t = false)]
    skip_migrations: bool,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER)),
        )
        .init();

    let args = Args::parse();

    let mut config = ApiConfig::from_env();
    config.pg_connection_url = args.database_url;
    if let Some(bind_addr) = args.bind_addr {
        config.bind_addr = bind_addr;
    }
    info!(?config, max_connections = args.max_connections, "starting keyhole_server");

    let pool = migrate::connect(&config.pg_connection_url, args.max_connections).await?;
    if args.skip_migrations {
        warn!("skipping database migrations");
    } else {
        migrate::migrate(&pool).await?;
    }

    let gateway = Arc::new(Gateway::new(
        Arc::new(PgStore::new(pool)),
        config.session_secret.as_bytes(),
        config.gateway_settings(),
    ));
    let state = keyhole_api::AppState {
        gateway: gateway.clone(),
        config: config.clone(),
    };
    let app = keyhole_api::router(state);

    let listener = tokio::net::TcpListener::bind(&config.bind_addr).await?;
    let local_addr = listener.local_addr()?;
    info!(addr = %local_addr, "REST API listening");

    let shutdown = CancellationToken::new();
    tokio::spawn({
        let shutdown = shutdown.clone();
        async move {
            if let Err(e) = tokio::signal::ctrl_c().await {
                warn!(error = %e, "failed to listen for ctrl-c");
                return;
            }
            info!("shutdown requested");
            shutdown.cancel();
        }
    });

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(async move { shutdown.cancelled().await })
    .await?;

    // Drain queued audit records before the runtime goes away.
    gateway.audit().flush().await;
    info!("server stopped");

    Ok(())
}
