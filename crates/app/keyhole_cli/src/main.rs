// Import and re-export the `error` module
pub use self::error::{Error, Result};
mod error;

use std::sync::Arc;

use clap::Parser;
use cli::{Cli, Commands};
use keyhole_core::auth::session_token::resolve_session_secret;
use keyhole_core::migrate::{self, DEFAULT_MAX_CONNECTIONS};
use keyhole_core::models::{AuditAction, AuditFilter, AuditStatus, ClientInfo};
use keyhole_core::store::PgStore;
use keyhole_core::{Gateway, GatewaySettings};

mod cli;
mod logging;

fn main() -> Result<()> {
    if let Err(e) = run() {
        log::error!("{}", e);
        std::process::exit(1);
    }
    Ok(())
}

fn run() -> Result<()> {
    dotenvy::dotenv().ok();
    let args = Cli::parse();
    let _logger = logging::init(logging::level_spec(args.verbose, args.quiet))?;

    match args.command {
        Commands::Version => {
            println!("{} {}", env!("CARGO_PKG_NAME"), env!("CARGO_PKG_VERSION"));
            Ok(())
        }
        command => {
            let runtime = tokio::runtime::Runtime::new()?;
            runtime.block_on(execute(&args.database_url, command))
        }
    }
}

async fn execute(database_url: &str, command: Commands) -> Result<()> {
    let pool = migrate::connect(database_url, DEFAULT_MAX_CONNECTIONS).await?;
    if let Commands::Migrate = command {
        migrate::migrate(&pool).await?;
        log::info!("migrations applied");
        return Ok(());
    }

    let gateway = Gateway::new(
        Arc::new(PgStore::new(pool)),
        resolve_session_secret().as_bytes(),
        GatewaySettings::default(),
    );
    let agent = format!("keyhole-cli/{}", env!("CARGO_PKG_VERSION"));
    let operator = ClientInfo::new(None, Some(agent));

    let result = match command {
        Commands::RotateKey { project } => gateway
            .rotate_api_key(project, &operator)
            .await
            .map(|key| {
                log::info!("rotated API key for project {project}");
                println!("{key}");
            }),
        Commands::RevokeUser { user } => gateway.revoke_user_tokens(user).await.map(|revoked| {
            println!(
                "token version {} ({} sessions removed)",
                revoked.token_version, revoked.sessions_removed
            );
        }),
        Commands::Audit {
            project,
            action,
            status,
            limit,
        } => {
            let filter = AuditFilter {
                project_id: project,
                action: parse_arg(action.as_deref(), AuditAction::parse, "action")?,
                status: parse_arg(status.as_deref(), AuditStatus::parse, "status")?,
                limit,
            };
            gateway.list_audit(filter).await.map(|entries| {
                for e in entries {
                    println!(
                        "{} {:<20} {:<7} user={} ip={} {}",
                        e.created_at.to_rfc3339(),
                        e.action,
                        e.status.as_str(),
                        e.user_id.map(|id| id.to_string()).unwrap_or_else(|| "-".into()),
                        e.ip_address.as_deref().unwrap_or("-"),
                        e.metadata.to_json()
                    );
                }
            })
        }
        Commands::BruteForce {
            identifier,
            project,
        } => gateway.detect_brute_force(&identifier, project).await.map(|a| {
            let verdict = if a.flagged { "FLAGGED" } else { "ok" };
            println!("{} {verdict}: {} failed attempts", a.identifier, a.failed_attempts);
            if let Some(ms) = a.retry_after_ms {
                println!("window clears in {} s", (ms + 999) / 1000);
            }
        }),
        Commands::Prune => gateway.prune_expired().await.map(|removed| {
            println!("removed {removed} expired rows");
        }),
        Commands::Version | Commands::Migrate => Ok(()),
    };

    // Audit records are written in the background; drain them before exit.
    gateway.audit().flush().await;
    Ok(result?)
}

fn parse_arg<T>(
    value: Option<&str>,
    parse: fn(&str) -> Option<T>,
    what: &str,
) -> Result<Option<T>> {
    value
        .map(|v| parse(v).ok_or_else(|| Error::Custom(format!("unknown {what} '{v}'"))))
        .transpose()
}
