//! CLI entry point for the SPI simulator client.
//!
//! # Usage
//!
//! Check what the backend sees:
//! ```bash
//! spisim status
//! ```
//!
//! Load the driver with a sequence table and talk to the device:
//! ```bash
//! spisim start --sequences spi_sequences_2024-05-01.json
//! spisim send "9F"
//! ```
//!
//! Watch logs and driver state until Ctrl+C:
//! ```bash
//! spisim monitor
//! ```
//!
//! Every command also runs against an in-memory simulated backend with `--mock`.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use spi_sim_client::backend::mock::MockBackend;
use spi_sim_client::logging;
use spi_sim_client::persist;
use spi_sim_client::sequence::SequenceId;
use spi_sim_client::session::Session;
use spi_sim_client::settings::{ClientSettings, DEFAULT_SETTINGS_PATH};

#[derive(Parser)]
#[command(name = "spisim")]
#[command(about = "Client for the virtual SPI device simulator", long_about = None)]
struct Cli {
    /// Settings file
    #[arg(long, global = true, default_value = DEFAULT_SETTINGS_PATH)]
    config: PathBuf,

    /// Backend base URL (overrides settings and SPISIM_BACKEND_URL)
    #[arg(long, global = true)]
    backend: Option<String>,

    /// Use an in-memory simulated backend instead of HTTP
    #[arg(long, global = true)]
    mock: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show backend, UI server and driver status
    Status,

    /// Show the backend event log
    Logs {
        /// Keep printing new lines until Ctrl+C
        #[arg(long)]
        follow: bool,

        /// Clear the log instead of printing it
        #[arg(long, conflicts_with = "follow")]
        clear: bool,
    },

    /// Send one hex command to the loaded device
    Send {
        /// Command bytes, e.g. "9F" or "03 00 10"
        hex: String,
    },

    /// Load the driver with the configured device
    Start {
        /// Sequence table file to load with the driver
        #[arg(long)]
        sequences: Option<PathBuf>,
    },

    /// Unload the driver
    Stop,

    /// Send the configured device settings to the backend
    SaveConfig,

    /// Edit the sequence table
    Sequences {
        #[command(subcommand)]
        action: SequenceAction,
    },

    /// Follow driver state and logs until Ctrl+C
    Monitor,
}

#[derive(Subcommand)]
enum SequenceAction {
    /// Add a received→response pair
    Add {
        /// Bytes the device expects
        received: String,
        /// Bytes the device answers with
        response: String,
        /// Table file to read and update (created if missing)
        #[arg(long)]
        file: PathBuf,
    },
    /// Remove an entry by id
    Remove {
        /// Entry id as listed
        id: String,
        /// Table file to read and update
        #[arg(long)]
        file: PathBuf,
    },
    /// List entries in a table file
    List {
        /// Table file to read
        file: PathBuf,
    },
    /// Write a table file into the export directory under a dated name
    Export {
        /// Table file to read
        file: PathBuf,
    },
    /// Replace the backend table with the contents of a file
    Import {
        /// Table file to read
        file: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let settings = ClientSettings::load_from(&cli.config)
        .with_context(|| format!("failed to load settings from {}", cli.config.display()))?;
    settings.validate().map_err(anyhow::Error::msg)?;
    logging::init_from_settings(&settings.logging).map_err(anyhow::Error::msg)?;

    let session = if cli.mock {
        tracing::info!("Using in-memory simulated backend");
        Session::new(settings, Arc::new(MockBackend::new()))
    } else {
        Session::connect(settings, cli.backend.as_deref())?
    };

    match cli.command {
        Commands::Status => show_status(&session).await,
        Commands::Logs { follow, clear } => show_logs(&session, follow, clear).await,
        Commands::Send { hex } => send(&session, &hex).await,
        Commands::Start { sequences } => start(&session, sequences.as_deref()).await,
        Commands::Stop => stop(&session).await,
        Commands::SaveConfig => {
            session.config().save().await?;
            println!("✅ Configuration saved");
            Ok(())
        }
        Commands::Sequences { action } => sequences(&session, action).await,
        Commands::Monitor => monitor(&session).await,
    }
}

async fn show_status(session: &Session) -> Result<()> {
    let status = session.status().poll_once().await?;
    let mark = |up: bool| if up { "up" } else { "down" };
    println!(
        "Backend : {} (port {})",
        mark(status.backend.up),
        status.backend.port
    );
    println!(
        "Frontend: {} (port {})",
        mark(status.frontend.up),
        status.frontend.port
    );
    if status.driver.loaded {
        println!("Driver  : loaded ({})", status.driver.device);
    } else {
        println!("Driver  : not loaded");
    }
    Ok(())
}

async fn show_logs(session: &Session, follow: bool, clear: bool) -> Result<()> {
    let logs = session.logs();
    if clear {
        logs.clear().await?;
        println!("🧹 Logs cleared");
        return Ok(());
    }

    logs.poll_once().await?;
    let mut seen: HashSet<String> = HashSet::new();
    for entry in logs.entries().await {
        println!("{}", entry.message);
        seen.insert(entry.message);
    }
    if !follow {
        return Ok(());
    }

    let mut ticker = tokio::time::interval(session.settings().polling.log_interval());
    loop {
        tokio::select! {
            _ = ticker.tick() => {
                if let Err(e) = logs.poll_once().await {
                    tracing::warn!(error = %e, "Log poll failed");
                    continue;
                }
                let current = logs.entries().await;
                for entry in &current {
                    if !seen.contains(&entry.message) {
                        println!("{}", entry.message);
                    }
                }
                seen = current.into_iter().map(|e| e.message).collect();
            }
            _ = tokio::signal::ctrl_c() => break,
        }
    }
    Ok(())
}

async fn send(session: &Session, hex: &str) -> Result<()> {
    match session.send_command(hex).await? {
        Some(exchange) => {
            println!("→ {}", exchange.command_hex);
            println!("← {}", exchange.response_hex);
        }
        None => println!("Nothing to send"),
    }
    Ok(())
}

async fn start(session: &Session, sequences: Option<&Path>) -> Result<()> {
    if let Some(path) = sequences {
        let count = persist::import_sequences(session.sequences(), path)
            .await
            .with_context(|| format!("failed to read {}", path.display()))?;
        println!("📄 Loaded {count} sequences from {}", path.display());
    }
    let message = session.start_driver().await?;
    println!(
        "✅ {}",
        message.unwrap_or_else(|| "Driver loaded".to_string())
    );
    Ok(())
}

async fn stop(session: &Session) -> Result<()> {
    let result = session.stop_driver().await;
    println!("Driver state: {}", session.run_state());
    let message = result?;
    println!(
        "✅ {}",
        message.unwrap_or_else(|| "Driver unloaded".to_string())
    );
    Ok(())
}

async fn load_table(session: &Session, path: &Path) -> Result<()> {
    persist::import_sequences(session.sequences(), path)
        .await
        .with_context(|| format!("failed to read {}", path.display()))?;
    Ok(())
}

async fn print_table(session: &Session) {
    let entries = session.sequences().entries().await;
    if entries.is_empty() {
        println!("(no sequences)");
    }
    for entry in entries {
        println!("{}  {} → {}", entry.id, entry.received, entry.response);
    }
}

async fn sequences(session: &Session, action: SequenceAction) -> Result<()> {
    let store = session.sequences();
    match action {
        SequenceAction::Add {
            received,
            response,
            file,
        } => {
            let entry = persist::add_to_table_file(store, &file, &received, &response).await?;
            println!("✅ Added {} to {}", entry.id, file.display());
        }
        SequenceAction::Remove { id, file } => {
            let id: SequenceId = id.parse()?;
            persist::remove_from_table_file(store, &file, &id).await?;
            println!("✅ Removed {id} from {}", file.display());
        }
        SequenceAction::List { file } => {
            load_table(session, &file).await?;
            print_table(session).await;
        }
        SequenceAction::Export { file } => {
            load_table(session, &file).await?;
            let path =
                persist::export_sequences(store, &session.settings().export.directory).await?;
            println!("📄 Exported to {}", path.display());
        }
        SequenceAction::Import { file } => {
            let count = persist::import_sequences(store, &file).await?;
            store.save().await?;
            println!("✅ Imported {count} sequences and sent them to the backend");
        }
    }
    Ok(())
}

async fn monitor(session: &Session) -> Result<()> {
    let mut state = session.driver().subscribe();
    session.start_pollers().await;
    println!("📡 Monitoring - press Ctrl+C to stop");

    // Display ids are reassigned on every poll, so new lines are found by text.
    let mut seen: HashSet<String> = HashSet::new();
    let mut ticker = tokio::time::interval(session.settings().polling.log_interval());
    loop {
        tokio::select! {
            changed = state.changed() => {
                if changed.is_err() {
                    break;
                }
                println!("Driver state: {}", *state.borrow_and_update());
            }
            _ = ticker.tick() => {
                let current = session.logs().entries().await;
                for entry in &current {
                    if !seen.contains(&entry.message) {
                        println!("{}", entry.message);
                    }
                }
                seen = current.into_iter().map(|e| e.message).collect();
            }
            _ = tokio::signal::ctrl_c() => break,
        }
    }

    session.shutdown().await;
    Ok(())
}
