//! Roster CLI - sign in, join an organization and manage headshot photos.

mod commands;
mod output;

use clap::{Parser, Subcommand, ValueEnum};
use roster_backend::MemberRole;
use roster_config_and_utils::{init_logging_with, Config, LogConfig, Paths};
use std::path::PathBuf;
use tracing::debug;

/// Roster CLI - Member sign-in, organization onboarding and headshot photos.
#[derive(Parser)]
#[command(name = "roster")]
#[command(about = "Roster CLI for member authentication and headshot photos")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Output format (text or json)
    #[arg(short, long, default_value = "text", global = true)]
    format: output::OutputFormat,

    /// Log level (trace, debug, info, warn, error); defaults to the config file
    #[arg(long, global = true)]
    log_level: Option<String>,
}

#[derive(Subcommand)]
enum Commands {
    /// Create an account with email and password
    Signup,

    /// Login with email and password
    Login,

    /// Logout and clear session
    Logout,

    /// Check authentication and membership status
    Status,

    /// Join an organization with its join code
    Provision {
        /// Join code shared by the organization
        #[arg(short, long)]
        join_code: String,
        /// Role within the organization
        #[arg(short, long, value_enum, default_value = "member")]
        role: RoleArg,
        /// Display name (defaults to profile metadata or email)
        #[arg(short, long)]
        name: Option<String>,
    },

    /// Complete a federated login from its redirect URL
    Callback {
        /// Redirect URL, or just its fragment/query part
        url: String,
    },

    /// Manage headshot photos
    Photos {
        #[command(subcommand)]
        command: PhotoCommands,
    },
}

#[derive(Subcommand)]
enum PhotoCommands {
    /// List photos
    List {
        /// Member ID (defaults to the signed-in member)
        #[arg(short, long)]
        member: Option<String>,
    },
    /// Upload a photo
    Upload {
        /// Path to the image file
        file: PathBuf,
        /// MIME type (guessed from the extension when omitted)
        #[arg(long)]
        mime: Option<String>,
    },
    /// Delete a photo
    Delete {
        /// Photo ID
        id: String,
    },
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum RoleArg {
    Admin,
    Member,
}

impl From<RoleArg> for MemberRole {
    fn from(role: RoleArg) -> Self {
        match role {
            RoleArg::Admin => MemberRole::Admin,
            RoleArg::Member => MemberRole::Member,
        }
    }
}

async fn run(cli: Cli, paths: Paths, config: Config) -> anyhow::Result<()> {
    let ctx = commands::Context::new(paths, config)?;
    let format = &cli.format;

    match cli.command {
        Commands::Signup => commands::signup(&ctx, format).await,
        Commands::Login => commands::login(&ctx, format).await,
        Commands::Logout => commands::logout(&ctx, format).await,
        Commands::Status => commands::status(&ctx, format).await,
        Commands::Provision {
            join_code,
            role,
            name,
        } => commands::provision(&ctx, &join_code, role.into(), name.as_deref(), format).await,
        Commands::Callback { url } => commands::callback(&ctx, &url, format).await,
        Commands::Photos { command } => match command {
            PhotoCommands::List { member } => {
                commands::photos_list(&ctx, member.as_deref(), format).await
            }
            PhotoCommands::Upload { file, mime } => {
                commands::photos_upload(&ctx, &file, mime.as_deref(), format).await
            }
            PhotoCommands::Delete { id } => commands::photos_delete(&ctx, &id, format).await,
        },
    }
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let loaded = Paths::new().and_then(|paths| {
        let config = Config::load(&paths)?;
        Ok((paths, config))
    });
    let (paths, config) = match loaded {
        Ok(loaded) => loaded,
        Err(e) => {
            eprintln!("Error: {}", e);
            std::process::exit(1);
        }
    };

    let level = cli
        .log_level
        .clone()
        .unwrap_or_else(|| config.log_level.clone());
    if let Err(e) = init_logging_with(LogConfig {
        service_name: "roster-cli".into(),
        default_level: level,
        log_path: Some(paths.log_file()),
        // CLI doesn't need stderr output by default
        also_stderr: false,
    }) {
        eprintln!("Warning: logging disabled: {}", e);
    }
    debug!(base_dir = %paths.base_dir().display(), "Starting roster CLI");

    if let Err(e) = run(cli, paths, config).await {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}
