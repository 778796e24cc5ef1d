//! Rendezvous - timed barrier broker
//!
//! CLI entry point for serving a broker and talking to it.

use std::fs;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use colored::*;
use eyre::{Context, Result};
use tracing::{debug, info};

use rendezvous::cli::{Cli, Command};
use rendezvous::config::Config;
use rendezvous::ipc::{self, BrokerClient};
use rendezvous::{Broker, Emitter, LogConsumer};

fn setup_logging(cli_log_level: Option<&str>, config_log_level: Option<&str>) -> Result<()> {
    let log_dir = dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("rendezvous")
        .join("logs");

    fs::create_dir_all(&log_dir).context("Failed to create log directory")?;

    // Priority: CLI --log-level > config file > INFO
    let level = match cli_log_level.or(config_log_level) {
        Some(s) => match s.to_uppercase().as_str() {
            "TRACE" => tracing::Level::TRACE,
            "DEBUG" => tracing::Level::DEBUG,
            "INFO" => tracing::Level::INFO,
            "WARN" | "WARNING" => tracing::Level::WARN,
            "ERROR" => tracing::Level::ERROR,
            _ => {
                eprintln!("Warning: Unknown log-level '{}', defaulting to INFO", s);
                tracing::Level::INFO
            }
        },
        None => tracing::Level::INFO,
    };

    let log_file = fs::File::create(log_dir.join("rendezvous.log")).context("Failed to create log file")?;

    tracing_subscriber::fmt()
        .with_writer(log_file)
        .with_ansi(false)
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env().add_directive(level.into()))
        .init();

    info!("Logging initialized (level: {:?})", level);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config_log_level = Config::load_log_level(cli.config.as_ref());
    setup_logging(cli.log_level.as_deref(), config_log_level.as_deref()).context("Failed to setup logging")?;

    let config = Config::load(cli.config.as_ref()).context("Failed to load configuration")?;

    debug!(command = ?cli.command, "main: dispatching command");
    match cli.command {
        Command::Serve { socket } => cmd_serve(&config, socket).await,
        Command::Register { id } => cmd_register(&config, id.as_deref()).await,
        Command::Emit { id } => cmd_emit(&config, &id).await,
        Command::Unregister { id } => cmd_unregister(&config, &id).await,
        Command::Status => cmd_status(&config).await,
        Command::Ping => cmd_ping(&config).await,
        Command::Stop => cmd_stop(&config).await,
        Command::Demo { delay_ms, emitters } => cmd_demo(&config, delay_ms, emitters).await,
    }
}

fn client(config: &Config) -> BrokerClient {
    // Emit blocks for a whole round
    let timeout = config.broker.timeout() + Duration::from_secs(5);
    BrokerClient::with_socket_path(config.ipc.socket_path()).with_timeout(timeout)
}

async fn cmd_serve(config: &Config, socket: Option<PathBuf>) -> Result<()> {
    let socket_path = socket.unwrap_or_else(|| config.ipc.socket_path());
    debug!(?socket_path, "cmd_serve: called");

    let broker = Broker::from_config(&config.broker);
    broker.register_consumer(Arc::new(LogConsumer::new())).await;

    let (listener, socket_path) = ipc::create_listener_at(&socket_path)?;
    println!(
        "{} Broker {} listening on {}",
        "✓".green(),
        broker.id().cyan(),
        socket_path.display()
    );

    let result = tokio::select! {
        served = ipc::serve(broker, listener) => served,
        _ = tokio::signal::ctrl_c() => {
            info!("Received interrupt, stopping");
            Ok(())
        }
    };

    ipc::cleanup_socket(&socket_path);
    result
}

async fn cmd_register(config: &Config, id: Option<&str>) -> Result<()> {
    let id = client(config).register(id).await?;
    println!("{} Registered emitter {}", "✓".green(), id.cyan());
    Ok(())
}

async fn cmd_emit(config: &Config, id: &str) -> Result<()> {
    let success = client(config).emit(id).await?;
    print_outcome(success);
    Ok(())
}

async fn cmd_unregister(config: &Config, id: &str) -> Result<()> {
    client(config).unregister(id).await?;
    println!("{} Unregistered emitter {}", "✓".green(), id);
    Ok(())
}

async fn cmd_status(config: &Config) -> Result<()> {
    let (metrics, session_open) = client(config).status().await?;
    let state = if session_open { "open".yellow() } else { "idle".green() };
    println!("Round: {}", state);
    println!("Emitters: {}", metrics.registered_emitters);
    println!("Consumers: {}", metrics.registered_consumers);
    println!(
        "Rounds: {} opened, {} succeeded, {} failed",
        metrics.rounds_opened,
        metrics.rounds_succeeded.to_string().green(),
        metrics.rounds_failed.to_string().red()
    );
    println!("Folded calls: {}", metrics.folded_calls);
    println!("Rejected registrations: {}", metrics.rejected_registrations);
    println!("Ignored signals: {}", metrics.ignored_signals);
    println!("Consumer failures: {}", metrics.consumer_failures);
    Ok(())
}

async fn cmd_ping(config: &Config) -> Result<()> {
    let client = client(config);
    if !client.socket_exists() {
        println!("Broker is not running");
        return Ok(());
    }

    match client.ping().await {
        Ok(version) => {
            println!("Broker is alive and responsive");
            println!("Version: {}", version);
        }
        Err(e) => {
            println!("Broker socket exists but is not responding");
            println!("Error: {}", e);
        }
    }
    Ok(())
}

async fn cmd_stop(config: &Config) -> Result<()> {
    client(config).shutdown().await?;
    println!("{} Broker stopped", "✓".green());
    Ok(())
}

async fn cmd_demo(config: &Config, delay_ms: u64, count: usize) -> Result<()> {
    debug!(delay_ms, count, "cmd_demo: called");
    let broker = Broker::from_config(&config.broker);
    broker.register_consumer(Arc::new(LogConsumer::new())).await;

    let emitters: Vec<Emitter> = (0..count.max(1)).map(|_| Emitter::new()).collect();
    let _ = broker.register_emitters(&emitters).await;
    println!(
        "Broker {} with {} emitters, deadline {}ms, others resolve after {}ms",
        broker.id().cyan(),
        emitters.len(),
        broker.timeout().as_millis(),
        delay_ms
    );

    let Some((initiator, others)) = emitters.split_first() else {
        return Ok(());
    };
    for emitter in others {
        let emitter = emitter.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(delay_ms)).await;
            if let Err(e) = emitter.emit().await {
                tracing::warn!(error = %e, "Demo emitter failed to signal");
            }
        });
    }

    let success = initiator.emit().await?;
    print_outcome(success);
    Ok(())
}

fn print_outcome(success: bool) {
    if success {
        println!("{} Round succeeded", "✓".green());
    } else {
        println!("{} Round timed out", "✗".red());
    }
}
