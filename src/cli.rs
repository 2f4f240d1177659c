//! Command-line interface

use clap::{Args, Parser, Subcommand};
use serde::Serialize;
use std::io::Write;
use std::path::{Path, PathBuf};
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::app::App;
use crate::config::{default_config_path, Config};
use crate::error::{GctlError, Result};
use crate::models::SearchQuery;

#[derive(Parser, Debug)]
#[command(name = "gctl")]
#[command(version)]
#[command(about = "Search Google Drive and Gmail from the command line", long_about = None)]
pub struct Cli {
    /// Path to configuration file [default: ~/.gctl/config.toml]
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Path to the OAuth2 client secret file
    #[arg(long, global = true)]
    pub credentials: Option<PathBuf>,

    /// Path to the token cache file
    #[arg(long, global = true)]
    pub token_cache: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error); RUST_LOG takes precedence
    #[arg(long, global = true)]
    pub level: Option<String>,

    /// Write logs to stderr instead of the log file
    #[arg(long, global = true)]
    pub log_stderr: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Obtain and cache credentials
    Auth {
        /// Discard the cached token and authorize again
        #[arg(long)]
        force: bool,
    },

    /// Google Drive documents
    #[command(subcommand)]
    Drive(DriveCommands),

    /// Gmail messages
    #[command(subcommand)]
    Mail(MailCommands),

    /// Show or change configuration
    #[command(subcommand)]
    Config(ConfigCommands),
}

#[derive(Args, Debug, Clone)]
pub struct SearchArgs {
    /// Search query in the service's own syntax
    pub query: String,

    /// Maximum number of results; 0 fetches every page
    #[arg(short, long, default_value_t = 25)]
    pub max_results: usize,

    /// Page token to resume from
    #[arg(short, long)]
    pub page_token: Option<String>,
}

impl SearchArgs {
    pub fn to_query(&self) -> SearchQuery {
        let query = SearchQuery::new(self.query.clone(), self.max_results);
        match &self.page_token {
            Some(token) => query.with_page_token(token.clone()),
            None => query,
        }
    }
}

#[derive(Subcommand, Debug)]
pub enum DriveCommands {
    /// Search files, newest first
    Search(SearchArgs),

    /// Import an HTML file as a Google Doc
    Import {
        /// HTML file to import
        #[arg(short, long)]
        file: PathBuf,

        /// Title of the new document
        #[arg(short, long)]
        title: String,

        /// Folder to create the document in
        #[arg(long)]
        folder_id: Option<String>,
    },
}

#[derive(Subcommand, Debug)]
pub enum MailCommands {
    /// Search messages
    Search(SearchArgs),

    /// Show one message with its body
    Get {
        /// Message id as returned by `mail search`
        id: String,
    },
}

#[derive(Subcommand, Debug)]
pub enum ConfigCommands {
    /// Print the resolved configuration as TOML
    Get,

    /// Persist one setting, e.g. `auth.return_method=manual`
    Set {
        /// KEY=VALUE
        assignment: String,
    },
}

impl Cli {
    pub fn config_path(&self) -> PathBuf {
        self.config.clone().unwrap_or_else(default_config_path)
    }

    /// Config file values with command-line overrides applied
    pub async fn resolve_config(&self) -> Result<Config> {
        let mut config = Config::load(&self.config_path()).await?;
        config.apply_overrides(
            self.credentials.clone(),
            self.token_cache.clone(),
            self.level.clone(),
        );
        config.validate()?;
        Ok(config)
    }
}

/// Run one command, writing its result to `out`
pub async fn execute<W: Write>(
    cli: &Cli,
    config: Config,
    cancel: &CancellationToken,
    out: &mut W,
) -> Result<()> {
    match &cli.command {
        Commands::Config(cmd) => run_config(cmd, &cli.config_path(), &config, out).await,
        command => {
            let app = App::new(config).await?;
            run_with_app(&app, command, cancel, out).await
        }
    }
}

/// Commands that talk to Google
pub async fn run_with_app<W: Write>(
    app: &App,
    command: &Commands,
    cancel: &CancellationToken,
    out: &mut W,
) -> Result<()> {
    match command {
        Commands::Auth { force } => {
            let credential = app.authenticate(*force, cancel).await?;
            writeln!(out, "Successfully authenticated")?;
            writeln!(out, "Token cached at: {:?}", app.config().cache_file)?;
            writeln!(
                out,
                "Access token expires: {}",
                credential.expiry.format("%Y-%m-%d %H:%M:%S UTC")
            )?;
            writeln!(
                out,
                "Scopes: {}",
                credential.scopes.iter().cloned().collect::<Vec<_>>().join(" ")
            )?;
            Ok(())
        }

        Commands::Drive(DriveCommands::Search(args)) => {
            info!("Searching Drive for {:?}", args.query);
            let results = app.search_drive(&args.to_query(), cancel).await?;
            print_json(out, &results)
        }

        Commands::Drive(DriveCommands::Import {
            file,
            title,
            folder_id,
        }) => {
            info!("Importing {:?} as {:?}", file, title);
            let drive = app.drive(cancel).await?;
            let url = drive
                .import_html(file, title, folder_id.as_deref(), cancel)
                .await?;
            writeln!(out, "{}", url)?;
            Ok(())
        }

        Commands::Mail(MailCommands::Search(args)) => {
            info!("Searching Gmail for {:?}", args.query);
            let results = app.search_mail(&args.to_query(), cancel).await?;
            print_json(out, &results)
        }

        Commands::Mail(MailCommands::Get { id }) => {
            let mail = app.mail(cancel).await?;
            let email = mail.get_message(id, cancel).await?;
            print_json(out, &email)
        }

        Commands::Config(_) => Err(GctlError::ConfigError(
            "config commands do not need credentials".to_string(),
        )),
    }
}

async fn run_config<W: Write>(
    command: &ConfigCommands,
    path: &Path,
    resolved: &Config,
    out: &mut W,
) -> Result<()> {
    match command {
        ConfigCommands::Get => {
            write!(out, "{}", resolved.to_toml()?)?;
            Ok(())
        }
        ConfigCommands::Set { assignment } => {
            let (key, value) = parse_assignment(assignment)?;
            // Start from the file alone so command-line overrides are not persisted
            let mut config = Config::load(path).await?;
            config.set_key(key, value)?;
            config.save(path).await?;
            writeln!(out, "Set {} = {} in {:?}", key, value, path)?;
            Ok(())
        }
    }
}

/// Split `key=value`, trimming whitespace around both
pub fn parse_assignment(assignment: &str) -> Result<(&str, &str)> {
    match assignment.split_once('=') {
        Some((key, value)) if !key.trim().is_empty() => Ok((key.trim(), value.trim())),
        _ => Err(GctlError::ConfigError(format!(
            "Expected KEY=VALUE, got '{}'",
            assignment
        ))),
    }
}

fn print_json<W: Write, T: Serialize + ?Sized>(out: &mut W, value: &T) -> Result<()> {
    let json = serde_json::to_string_pretty(value)?;
    writeln!(out, "{}", json)?;
    Ok(())
}
