use anyhow::{Context, Result};
use clap::Parser;
use gctl::cli::{self, Cli};
use gctl::config::Config;
use gctl::error::{AuthError, CacheError, GctlError};
use std::fs::OpenOptions;
use std::process;
use std::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

const LOG_FILE_NAME: &str = "gctl.log";

#[tokio::main]
async fn main() {
    // Exit with proper code on error
    if let Err(e) = run().await {
        display_error(&e);
        process::exit(1);
    }
}

async fn run() -> Result<()> {
    gctl::http::install_crypto_provider();

    let cli = Cli::parse();
    let config = cli.resolve_config().await?;

    init_logging(&config, cli.log_stderr)?;
    tracing::info!("gctl {} starting", env!("CARGO_PKG_VERSION"));

    let cancel = CancellationToken::new();
    let ctrl_c = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("Interrupted, cancelling");
            ctrl_c.cancel();
        }
    });

    let mut stdout = std::io::stdout().lock();
    cli::execute(&cli, config, &cancel, &mut stdout).await?;
    Ok(())
}

/// Send logs to `<log_dir>/gctl.log`, or stderr, so stdout only carries results.
///
/// `RUST_LOG` wins over the configured level.
fn init_logging(config: &Config, to_stderr: bool) -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(format!("gctl={},warn", config.logging.level.to_ascii_lowercase()))
    });

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false);

    if to_stderr {
        builder.with_writer(std::io::stderr).init();
        return Ok(());
    }

    std::fs::create_dir_all(&config.logging.log_dir)
        .with_context(|| format!("Failed to create log directory {:?}", config.logging.log_dir))?;
    let path = config.logging.log_dir.join(LOG_FILE_NAME);
    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(&path)
        .with_context(|| format!("Failed to open log file {:?}", path))?;

    builder.with_ansi(false).with_writer(Mutex::new(file)).init();
    Ok(())
}

/// Display error with context
fn display_error(error: &anyhow::Error) {
    eprintln!("Error: {}", error);

    // Display error chain
    let mut cause = error.source();
    while let Some(e) = cause {
        eprintln!("  Caused by: {}", e);
        cause = e.source();
    }

    // Display helpful hints based on error type
    if let Some(gctl_err) = error.downcast_ref::<GctlError>() {
        match gctl_err {
            GctlError::ConfigError(_) => {
                eprintln!("\nHint: Check your configuration with: gctl config get");
                eprintln!("      The OAuth client secret can be downloaded from Google Cloud Console.");
            }
            GctlError::AuthError(AuthError::Terminal(_))
            | GctlError::AuthError(AuthError::RefreshFailed(_)) => {
                eprintln!("\nHint: Stored credentials can no longer be used.");
                eprintln!("      Try running: gctl auth --force");
            }
            GctlError::AuthError(AuthError::Network(_)) => {
                eprintln!("\nHint: Could not reach Google's OAuth service.");
                eprintln!("      Check your network connection and try again.");
            }
            GctlError::RemoteError(e) if e.is_transient() => {
                eprintln!("\nHint: This may be a temporary network error.");
                eprintln!("      Try running the command again.");
            }
            GctlError::RemoteError(e) => {
                if let Some(reason) = e.api_reason() {
                    eprintln!("\nHint: Google rejected the request ({}).", reason);
                }
            }
            GctlError::CacheError(CacheError::Io { path, .. }) => {
                eprintln!("\nHint: Check permissions on {:?}.", path);
            }
            GctlError::PartialImport { resource_id, .. } => {
                eprintln!(
                    "\nHint: An empty document was left behind: {}",
                    gctl::drive::document_url(resource_id)
                );
            }
            _ => {}
        }
    }
}
