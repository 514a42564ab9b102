use clap::{Parser, Subcommand};
use uuid::Uuid;

#[derive(Parser, Debug)]
#[command(name = "keyhole", version, about = "Keyhole gateway operator CLI")]
pub struct Cli {
    /// PostgreSQL connection URL.
    #[arg(
        long,
        global = true,
        env = "DATABASE_URL",
        default_value = "postgres://localhost:5432/keyhole"
    )]
    pub database_url: String,

    /// Raise log verbosity (-v debug, -vv trace). `RUST_LOG` still wins.
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Only log warnings and errors.
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    pub quiet: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Print the CLI version.
    Version,

    /// Apply pending database migrations.
    Migrate,

    /// Issue a new API key for a project. The old key stops working immediately.
    RotateKey {
        #[arg(long)]
        project: Uuid,
    },

    /// Kill switch: invalidate every session token of a user.
    RevokeUser {
        #[arg(long)]
        user: Uuid,
    },

    /// List recent audit entries.
    Audit {
        #[arg(long)]
        project: Option<Uuid>,
        /// Action name, e.g. `token.exchange`.
        #[arg(long)]
        action: Option<String>,
        /// `success` or `failure`.
        #[arg(long)]
        status: Option<String>,
        #[arg(long, default_value_t = 50)]
        limit: i64,
    },

    /// Check an IP address or email for repeated authentication failures.
    BruteForce {
        #[arg(long)]
        identifier: String,
        /// Only count failures recorded against this project.
        #[arg(long)]
        project: Option<Uuid>,
    },

    /// Delete expired authorization codes, setup codes and rate-limit windows.
    Prune,
}
