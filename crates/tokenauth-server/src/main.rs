//! tokenauth binary: opens the database services and either runs a one-shot
//! command or stays up until SIGTERM/SIGINT.
//!
//! ```text
//! tokenauth [CONFIG] [seed [COUNT] | lookup MAIL HASHED]
//! ```

use std::sync::Arc;

use tokenauth_db::DatabaseServices;
use tokenauth_server::config;
use tokenauth_server::AuthController;
use tracing_subscriber::EnvFilter;

/// What to do once the services are open.
#[derive(Debug, PartialEq, Eq)]
enum Command {
    /// Keep the services open until a shutdown signal.
    Serve,
    /// Seed `count` records, or the configured default.
    Seed(Option<usize>),
    Lookup { mail: String, hashed: String },
}

#[derive(Debug, PartialEq, Eq)]
struct Invocation {
    config_path: Option<String>,
    command: Command,
}

fn is_command(word: &str) -> bool {
    matches!(word, "seed" | "lookup")
}

fn parse_args(args: &[String]) -> Result<Invocation, String> {
    let mut rest = args;
    let mut config_path = None;

    if let Some(first) = rest.first() {
        if !is_command(first) {
            if !first.trim().is_empty() {
                config_path = Some(first.clone());
            }
            rest = &rest[1..];
        }
    }

    let command = match rest {
        [] => Command::Serve,
        [cmd] if cmd == "seed" => Command::Seed(None),
        [cmd, count] if cmd == "seed" => match count.parse::<usize>() {
            Ok(n) if n > 0 => Command::Seed(Some(n)),
            _ => return Err(format!("seed count must be a positive integer, got {count:?}")),
        },
        [cmd, mail, hashed] if cmd == "lookup" => Command::Lookup {
            mail: mail.clone(),
            hashed: hashed.clone(),
        },
        _ => return Err("usage: tokenauth [CONFIG] [seed [COUNT] | lookup MAIL HASHED]".into()),
    };

    Ok(Invocation {
        config_path,
        command,
    })
}

fn resolve_config_path(cli: Option<String>) -> (Option<String>, &'static str) {
    if let Some(path) = cli {
        return (Some(path), "cli-arg");
    }

    if let Ok(path) = std::env::var("TOKENAUTH_CONFIG_PATH") {
        if !path.trim().is_empty() {
            return (Some(path), "env-var");
        }
    }

    (None, "default")
}

#[tokio::main]
async fn main() {
    let args: Vec<String> = std::env::args().skip(1).collect();
    let invocation = match parse_args(&args) {
        Ok(invocation) => invocation,
        Err(message) => {
            eprintln!("{message}");
            std::process::exit(2);
        }
    };

    let (resolved_config_path, config_source) = resolve_config_path(invocation.config_path);
    let selected_config_path = resolved_config_path.as_deref().or(Some("config.toml"));

    // Load configuration
    let config = config::load_config(selected_config_path)
        .expect("failed to load configuration, cannot start without valid config");

    // Initialize tracing
    let filter =
        EnvFilter::try_new(&config.logging.level).unwrap_or_else(|_| EnvFilter::new("info"));

    if config.logging.json {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .json()
            .init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }

    tracing::info!(
        source = config_source,
        path = selected_config_path.unwrap_or("<none>"),
        "resolved startup configuration path"
    );

    // Open services off the async workers: reader population compiles every
    // pooled statement up front.
    let db_path = config.database.path.clone();
    let settings = config.database.to_settings();
    let services = tokio::task::spawn_blocking(move || DatabaseServices::open(&db_path, settings))
        .await
        .expect("database startup task panicked")
        .expect("failed to open database services, check database.path in config");

    tracing::info!(
        path = %config.database.path,
        read_only = services.is_read_only(),
        "database services open"
    );

    let controller = AuthController::new(Arc::new(services));

    if config.seed.on_start && !matches!(invocation.command, Command::Seed(_)) {
        let result = controller.seed(config.seed.count).await;
        match result.error {
            Some(error) => tracing::warn!(%error, "seed on start failed"),
            None => tracing::info!(written = result.written, "seeded on start"),
        }
    }

    match invocation.command {
        Command::Serve => {
            tracing::info!("tokenauth ready");
            shutdown_signal().await;
        }
        Command::Seed(count) => {
            let result = controller.seed(count.unwrap_or(config.seed.count)).await;
            print_json(&result);
        }
        Command::Lookup { mail, hashed } => {
            let result = controller.lookup(mail, hashed).await;
            print_json(&result);
        }
    }

    let services = Arc::clone(controller.services());
    drop(controller);
    match Arc::try_unwrap(services) {
        Ok(services) => tokio::task::spawn_blocking(move || services.close())
            .await
            .unwrap_or_else(|e| tracing::error!(error = %e, "close task failed")),
        Err(_) => tracing::warn!("database services still shared at shutdown, skipping close"),
    }

    tracing::info!("tokenauth shut down");
}

fn print_json<T: serde::Serialize>(value: &T) {
    match serde_json::to_string(value) {
        Ok(json) => println!("{json}"),
        Err(e) => tracing::error!(error = %e, "failed to serialize result"),
    }
}

/// Waits for a SIGINT (Ctrl+C) or SIGTERM signal for graceful shutdown.
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => { tracing::info!("received SIGINT, initiating graceful shutdown"); }
        () = terminate => { tracing::info!("received SIGTERM, initiating graceful shutdown"); }
    }
}
