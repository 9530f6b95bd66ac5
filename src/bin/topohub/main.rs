//! topohub CLI tool
//!
//! Command-line front end for exercising the hub core without a network transport.
//!
//! ## Commands
//!
//! - `replay <file>`: Drive a recorded agent session through an in-process hub
//! - `config <path>`: Write a default configuration file
//!
//! ## Session scripts
//!
//! A session script is JSON lines, one record per line. Blank lines and lines starting with `#`
//! are skipped. Every record names the connection it applies to:
//!
//! ```text
//! {"op": "connect", "conn": "a", "service_type": "agent", "host": "h1"}
//! {"op": "message", "conn": "a", "envelope": {"Namespace": "Graph", "Type": "Sync", "Obj": {"Nodes": []}}}
//! {"op": "flush", "conn": "a"}
//! {"op": "disconnect", "conn": "a"}
//! ```
//!
//! Connections still open at the end of the script are flushed, not closed, so the printed
//! statistics show what they contributed.

use clap::{Parser, Subcommand};
use serde::Deserialize;
use std::{collections::BTreeMap, fs, path::PathBuf};
use topohub_core::{
    backend::MemoryBackend,
    codec::StructMessage,
    config::HubConfig,
    hub::{Hub, HubStats},
    pool::Connection,
    TopologyError,
};

#[derive(Parser)]
#[command(name = "topohub")]
#[command(author, version, about = "Replay agent sessions against the topology hub core", long_about = None)]
struct Cli {
    /// Configuration file path (defaults are used when omitted or missing)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Replay a JSON-lines session script and print the resulting graph statistics
    Replay {
        /// Path to the session script
        file: PathBuf,

        /// Verbose output
        #[arg(short, long)]
        verbose: bool,
    },

    /// Write a default configuration file
    Config {
        /// Where to write the file
        path: PathBuf,

        /// Overwrite an existing file
        #[arg(short, long)]
        force: bool,
    },
}

#[derive(Debug, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
enum Record {
    Connect {
        conn: String,
        service_type: String,
        #[serde(default)]
        host: Option<String>,
    },
    Message {
        conn: String,
        envelope: StructMessage,
    },
    Flush {
        conn: String,
    },
    Disconnect {
        conn: String,
    },
}

fn parse_script(text: &str) -> Result<Vec<Record>, TopologyError> {
    let mut records = Vec::new();
    for (idx, line) in text.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let record = serde_json::from_str(line).map_err(|e| {
            TopologyError::Decode(format!("session script line {}: {e}", idx + 1))
        })?;
        records.push(record);
    }
    Ok(records)
}

fn connection<'a>(
    open: &'a BTreeMap<String, Connection>,
    conn: &str,
) -> Result<&'a Connection, TopologyError> {
    open.get(conn)
        .ok_or_else(|| TopologyError::NotFound(format!("connection '{conn}' is not open")))
}

async fn replay(
    hub: &Hub<MemoryBackend>,
    records: Vec<Record>,
    verbose: bool,
) -> Result<(), TopologyError> {
    let mut open: BTreeMap<String, Connection> = BTreeMap::new();

    for record in records {
        match record {
            Record::Connect {
                conn,
                service_type,
                host,
            } => {
                if open.contains_key(&conn) {
                    return Err(TopologyError::Conflict(format!(
                        "connection '{conn}' is already open"
                    )));
                }
                let handle = hub.connect(&service_type, host.as_deref());
                if verbose {
                    println!("connect {conn}: {}", handle.peer());
                }
                open.insert(conn, handle);
            }
            Record::Message { conn, envelope } => {
                if verbose {
                    println!("message {conn}: {} {}", envelope.namespace, envelope.msg_type);
                }
                connection(&open, &conn)?.send(envelope).await?;
            }
            Record::Flush { conn } => {
                connection(&open, &conn)?.flush().await?;
            }
            Record::Disconnect { conn } => {
                let handle = open.remove(&conn).ok_or_else(|| {
                    TopologyError::NotFound(format!("connection '{conn}' is not open"))
                })?;
                if verbose {
                    println!("disconnect {conn}: {}", handle.peer());
                }
                handle.close().await?;
            }
        }
    }

    for handle in open.values() {
        handle.flush().await?;
    }
    Ok(())
}

fn print_stats(stats: &HubStats) {
    println!("\n=== Hub Statistics ===");
    println!("Nodes: {}", stats.nodes);
    println!("Edges: {}", stats.edges);
    println!("Open connections: {}", stats.connections);
    println!("Origins: {}", stats.origins.len());
    for origin in stats.origins.iter() {
        println!("  {origin}");
    }
    println!(
        "Cache: {} hits, {} misses, {} nodes, {} edges",
        stats.cache.hits, stats.cache.misses, stats.cache.cached_nodes, stats.cache.cached_edges
    );
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => HubConfig::load(path)?,
        None => HubConfig::default(),
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&config.log_filter)),
        )
        .init();

    match cli.command {
        Commands::Replay { file, verbose } => {
            config.validate()?;
            let records = parse_script(&fs::read_to_string(&file)?)?;
            if verbose {
                println!("Replaying {} records from {:?}", records.len(), file);
            }

            let runtime = tokio::runtime::Builder::new_multi_thread()
                .enable_all()
                .build()?;
            let stats = runtime.block_on(async {
                let hub = Hub::new(config, MemoryBackend::new());
                replay(&hub, records, verbose).await?;
                Ok::<HubStats, TopologyError>(hub.stats())
            })?;
            print_stats(&stats);
            Ok(())
        }

        Commands::Config { path, force } => {
            if path.exists() && !force {
                return Err(format!("{path:?} already exists, pass --force to overwrite").into());
            }
            config.save(&path)?;
            println!("Wrote configuration to {:?}", path);
            Ok(())
        }
    }
}
