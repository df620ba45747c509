//! Server binary.
//!
//! Run with: cargo run --bin portcullis-sftp-server

use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use portcullis_core::CancelCause;
use portcullis_sftp::{Config, LogFormat, Server};
use portcullis_users::UserDirectory;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Configuration file path
    #[arg(short, long)]
    config: Option<String>,

    /// Bind address
    #[arg(short, long, default_value = "0.0.0.0")]
    bind: String,

    /// Port to listen on
    #[arg(short, long, default_value = "2222")]
    port: u16,

    /// Root directory served to authenticated sessions
    #[arg(short, long)]
    root: Option<PathBuf>,

    /// Host key path
    #[arg(long)]
    host_key: Option<PathBuf>,

    /// Verbose logging (debug level)
    #[arg(short, long)]
    verbose: bool,

    /// Log format (json or text)
    #[arg(long)]
    log_format: Option<LogFormat>,

    /// Log file path
    #[arg(long)]
    log_file: Option<PathBuf>,
}

fn resolve_config(args: Args) -> Config {
    let mut config = if let Some(config_path) = args.config {
        match Config::from_file(&config_path) {
            Ok(cfg) => cfg,
            Err(e) => {
                eprintln!("Failed to load config: {e}");
                std::process::exit(1);
            }
        }
    } else {
        let mut config = Config::default();
        config.bind_address = args.bind;
        config.port = args.port;
        config
    };

    if let Some(root) = args.root {
        config.root_dir = root;
    }
    if let Some(host_key) = args.host_key {
        config.host_key_path = host_key;
    }
    if let Some(log_format) = args.log_format {
        config.logging.format = log_format;
    }
    if let Some(log_file) = args.log_file {
        config.logging.file = Some(log_file);
    }
    if args.verbose {
        config.logging.level = "debug".to_string();
    }

    config
}

/// Initializes tracing; the returned guard must outlive the process when a
/// file appender is in use.
fn init_logging(config: &mut Config) -> Option<tracing_appender::non_blocking::WorkerGuard> {
    if let Some(log_file) = config.logging.file.clone() {
        let parent = log_file.parent().unwrap_or_else(|| std::path::Path::new("."));
        if !parent.as_os_str().is_empty() && !parent.exists() {
            if let Err(e) = std::fs::create_dir_all(parent) {
                eprintln!("Warning: failed to create log directory: {e}");
                eprintln!("Falling back to stderr logging");
                config.logging.file = None;
            }
        }

        if config.logging.file.is_some() {
            let file_name = log_file
                .file_name()
                .map(|name| name.to_string_lossy().to_string())
                .unwrap_or_else(|| "portcullis.log".to_string());
            let file_appender = tracing_appender::rolling::daily(parent, file_name);
            let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

            match config.logging.format {
                LogFormat::Json => {
                    tracing_subscriber::fmt()
                        .json()
                        .with_env_filter(EnvFilter::new(config.logging.level.clone()))
                        .with_writer(non_blocking)
                        .init();
                }
                LogFormat::Text => {
                    tracing_subscriber::fmt()
                        .with_env_filter(EnvFilter::new(config.logging.level.clone()))
                        .with_writer(non_blocking)
                        .init();
                }
            }
            return Some(guard);
        }
    }

    match config.logging.format {
        LogFormat::Json => {
            tracing_subscriber::fmt()
                .json()
                .with_env_filter(EnvFilter::new(config.logging.level.clone()))
                .init();
        }
        LogFormat::Text => {
            tracing_subscriber::fmt()
                .with_env_filter(EnvFilter::new(config.logging.level.clone()))
                .init();
        }
    }
    None
}

async fn seed_directory(config: &Config) -> Arc<UserDirectory> {
    let directory = Arc::new(UserDirectory::new());

    for seed in &config.users {
        directory.add(&seed.username, &seed.secret).await;
        for spec in &seed.origins {
            if let Err(e) = directory.add_origin(&seed.username, spec).await {
                error!(user = %seed.username, origin = %spec, error = %e, "invalid origin spec");
                std::process::exit(1);
            }
        }
        info!(
            user = %seed.username,
            origins = seed.origins.len(),
            "seeded user"
        );
    }

    if config.users.is_empty() {
        warn!("no users configured, every login will be rejected");
    }

    directory
}

#[tokio::main]
async fn main() {
    let args = Args::parse();
    let mut config = resolve_config(args);
    let _log_guard = init_logging(&mut config);

    info!(
        version = env!("CARGO_PKG_VERSION"),
        "starting portcullis server"
    );

    // Ensure the root directory exists before validation.
    if !config.root_dir.exists() {
        info!(directory = ?config.root_dir, "creating root directory");
        if let Err(e) = std::fs::create_dir_all(&config.root_dir) {
            error!(directory = ?config.root_dir, error = %e, "failed to create root directory");
            std::process::exit(1);
        }
    }

    info!(
        bind_address = %config.bind_address,
        port = config.port,
        root_dir = ?config.root_dir,
        auth_timeout_secs = config.auth_timeout_secs,
        inactivity_timeout_secs = config.inactivity_timeout_secs,
        "server configuration"
    );

    let directory = seed_directory(&config).await;

    let server = match Server::new(config, directory).await {
        Ok(server) => server,
        Err(e) => {
            error!(error = %e, "failed to create server");
            std::process::exit(1);
        }
    };

    let shutdown = server.shutdown_token();
    let server_task = tokio::spawn(async move { server.run().await });

    match tokio::signal::ctrl_c().await {
        Ok(()) => info!("interrupt received, shutting down"),
        Err(e) => error!(error = %e, "failed to listen for shutdown signal"),
    }
    shutdown.cancel(CancelCause::Shutdown);

    match server_task.await {
        Ok(Ok(())) => info!("shutdown complete"),
        Ok(Err(e)) => {
            error!(error = %e, "server encountered an error");
            std::process::exit(1);
        }
        Err(e) => {
            error!(error = %e, "server task failed");
            std::process::exit(1);
        }
    }
}
