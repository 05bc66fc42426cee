//! Ledger Anchor CLI
//!
//! Anchors security-event digests on the ledger and checks stored entries
//! against claimed originals.

use anyhow::{anyhow, Context};
use clap::{Parser, Subcommand};
use ledger_anchor::hashing::hash_event_at;
use ledger_anchor::ledger::{JsonRpcConnection, LedgerLogClient};
use ledger_anchor::{
    AnchorConfig, AnchorRecord, AnchorWriter, EventDetails, EventRecord, EventTimestamp,
    TamperVerifier,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "ledger-anchor")]
#[command(about = "Anchor security event digests on an EVM ledger and detect tampering")]
#[command(version = "0.1.0")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// TOML configuration file (defaults to $LEDGER_ANCHOR_CONFIG)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Show connectivity, chain, contract and entry count
    Status,

    /// Compute an event digest without touching the ledger
    Hash {
        #[arg(long)]
        event_type: String,

        /// Event details as a JSON object
        #[arg(long)]
        details: String,

        /// RFC 3339 timestamp (defaults to now)
        #[arg(long)]
        timestamp: Option<String>,
    },

    /// Hash an event and anchor the digest
    Write {
        #[arg(long)]
        event_type: String,

        /// Event details as a JSON object
        #[arg(long)]
        details: String,

        /// Wait for inclusion and report the assigned log id
        #[arg(long)]
        wait: bool,
    },

    /// Check a stored entry against the claimed original event
    Verify {
        #[arg(long)]
        log_id: u64,

        /// JSON file written by `write`, or a bare event record
        #[arg(long, conflicts_with_all = ["event_type", "details", "timestamp"])]
        record: Option<PathBuf>,

        #[arg(long)]
        event_type: Option<String>,

        #[arg(long)]
        details: Option<String>,

        #[arg(long)]
        timestamp: Option<String>,

        /// Print the result as JSON
        #[arg(long)]
        json: bool,
    },

    /// List stored entries
    List {
        #[arg(long, default_value_t = 0)]
        start: u64,

        #[arg(long, default_value_t = 20)]
        limit: u64,
    },
}

/// What `write` prints; `verify --record` reads it back.
#[derive(Serialize, Deserialize)]
struct WriteOutput {
    record: EventRecord,
    anchor: AnchorRecord,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    log_id: Option<u64>,
}

/// Accept the output of `write` or a bare event record.
fn parse_record_file(text: &str) -> serde_json::Result<EventRecord> {
    let mut value: Value = serde_json::from_str(text)?;
    let record = match value.get_mut("record") {
        Some(record) => record.take(),
        None => value,
    };
    serde_json::from_value(record)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let default_filter = if cli.verbose {
        "ledger_anchor=debug"
    } else {
        "ledger_anchor=info"
    };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_filter.into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    match cli.command {
        Commands::Hash {
            event_type,
            details,
            timestamp,
        } => {
            let details = parse_details(&details)?;
            let timestamp = match timestamp {
                Some(text) => text.parse::<EventTimestamp>()?,
                None => EventTimestamp::now(),
            };
            let log_hash = hash_event_at(&event_type, &details, timestamp)?;
            println!("Log hash:  {}", log_hash);
            println!("Timestamp: {}", timestamp);
        }

        Commands::Status => {
            let config = load_config(cli.config.as_deref())?;
            let client = config.connect()?;

            let connected = client.is_connected().await;
            println!("Endpoint:    {}", client.connection().endpoint());
            println!("Connected:   {}", connected);
            println!("Contract:    {}", client.contract().to_checksum());
            match client.signer() {
                Some(signer) => println!("Signer:      {}", signer.to_checksum()),
                None => println!("Signer:      (read-only, PRIVATE_KEY not set)"),
            }
            if connected {
                println!("Chain ID:    {}", client.chain_id().await?);
                println!("Entries:     {}", client.entry_count().await?);
            }
        }

        Commands::Write {
            event_type,
            details,
            wait,
        } => {
            let details = parse_details(&details)?;
            let client = Arc::new(connect(cli.config.as_deref()).await?);
            let writer = AnchorWriter::new(Arc::clone(&client));

            let record = EventRecord::now(&event_type, details);
            let anchor = writer
                .write_record(&record)
                .await
                .context("Failed to anchor event")?;

            let log_id = if wait {
                info!("Waiting for {} to be mined", anchor.transaction);
                let anchored = client
                    .wait_for_entry(&anchor.transaction, Duration::from_secs(2), 90)
                    .await?
                    .ok_or_else(|| anyhow!("{} was not mined in time", anchor.transaction))?;
                Some(anchored.entry.log_id)
            } else {
                None
            };

            let output = WriteOutput {
                record,
                anchor,
                log_id,
            };
            println!("{}", serde_json::to_string_pretty(&output)?);
        }

        Commands::Verify {
            log_id,
            record,
            event_type,
            details,
            timestamp,
            json,
        } => {
            let claimed = match record {
                Some(path) => read_record(&path)?,
                None => {
                    let event_type =
                        event_type.context("--event-type is required without --record")?;
                    let details = details.context("--details is required without --record")?;
                    let timestamp =
                        timestamp.context("--timestamp is required without --record")?;
                    EventRecord::new(&event_type, parse_details(&details)?, timestamp.parse()?)
                }
            };

            let client = Arc::new(connect(cli.config.as_deref()).await?);
            let verifier = TamperVerifier::new(client);
            let result = verifier.verify_record(log_id, &claimed).await?;

            if json {
                println!("{}", serde_json::to_string_pretty(&result)?);
            } else {
                println!("{}", result);
            }
            if !result.is_valid {
                std::process::exit(1);
            }
        }

        Commands::List { start, limit } => {
            let client = connect(cli.config.as_deref()).await?;
            let entries = client.entries(start, limit).await?;
            if entries.is_empty() {
                println!("No entries");
            }
            for entry in entries {
                println!(
                    "#{:<6} {}  {}  {}",
                    entry.log_id, entry.block_timestamp, entry.log_hash, entry.log_type
                );
            }
        }
    }

    Ok(())
}

fn load_config(path: Option<&Path>) -> anyhow::Result<AnchorConfig> {
    AnchorConfig::load(path).context("Failed to load configuration")
}

async fn connect(path: Option<&Path>) -> anyhow::Result<LedgerLogClient<JsonRpcConnection>> {
    let client = load_config(path)?.connect()?;
    if !client.is_connected().await {
        warn!(
            "Ledger endpoint {} is not responding",
            client.connection().endpoint()
        );
    }
    Ok(client)
}

fn parse_details(text: &str) -> anyhow::Result<EventDetails> {
    EventDetails::from_json_str(text).context("--details must be a JSON object")
}

fn read_record(path: &Path) -> anyhow::Result<EventRecord> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    parse_record_file(&text)
        .with_context(|| format!("{} is not an event record", path.display()))
}
