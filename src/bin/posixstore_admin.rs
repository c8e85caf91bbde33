//! CLI entry point for posixstore-admin: inspect and repair on-disk state.
//!
//! Works directly on the devices tree; no server needs to be running.

use std::path::PathBuf;

use anyhow::{anyhow, Context};
use clap::{Parser, Subcommand};
use serde_json::json;
use tracing_subscriber::EnvFilter;

use posixstore::config::{load_config, Config};
use posixstore::ring::Ring;
use posixstore::storage::backend::{ListParams, ListingEntry};
use posixstore::storage::diskfile::DiskFileManager;
use posixstore::storage::listing::ListingEngine;

#[derive(Parser)]
#[command(name = "posixstore-admin", about = "posixstore on-disk inspection and repair")]
struct Cli {
    #[arg(long, default_value = "posixstore.example.yaml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print account or container info as JSON, recomputed from disk
    Info {
        account: String,
        container: Option<String>,
    },
    /// Print listing rows of an account or container
    List {
        account: String,
        container: Option<String>,
        #[arg(long)]
        prefix: Option<String>,
        #[arg(long)]
        delimiter: Option<char>,
        #[arg(long)]
        marker: Option<String>,
        #[arg(long, default_value_t = 10_000)]
        limit: usize,
    },
    /// Discard an object's metadata and regenerate it from the file
    Repair {
        account: String,
        container: String,
        object: String,
    },
    /// Print the partition and node assigned to an account
    Ring { account: String },
}

struct Tool {
    ring: Ring,
    listing: ListingEngine,
}

impl Tool {
    fn new(config: &Config) -> anyhow::Result<Self> {
        let ring = Ring::load(&config.ring.path, &config.ring.reseller_prefix)?;
        let files = DiskFileManager::new(&config.storage, None);
        let listing = ListingEngine::new(files, config.storage.accurate_size_in_listing);
        Ok(Self { ring, listing })
    }

    fn device(&self, account: &str) -> anyhow::Result<String> {
        let (_, nodes) = self.ring.get_nodes(account, None, None);
        nodes
            .into_iter()
            .find(|node| !node.is_not_in_ring())
            .map(|node| node.device)
            .ok_or_else(|| anyhow!("account {account} has no device in the ring"))
    }

    fn info(&self, account: &str, container: Option<&str>) -> anyhow::Result<serde_json::Value> {
        let device = self.device(account)?;
        let value = match container {
            Some(container) => {
                let info = self.listing.container(&device, container).get_info(true)?;
                json!({
                    "name": info.name,
                    "object_count": info.object_count,
                    "bytes_used": info.bytes_used,
                    "put_timestamp": info.put_timestamp,
                    "created_at": info.created_at,
                    "metadata": info.metadata,
                })
            }
            None => {
                let info = self.listing.account(&device).get_info()?;
                json!({
                    "name": account,
                    "device": info.name,
                    "container_count": info.container_count,
                    "object_count": info.object_count,
                    "bytes_used": info.bytes_used,
                    "put_timestamp": info.put_timestamp,
                    "created_at": info.created_at,
                    "metadata": info.metadata,
                })
            }
        };
        Ok(value)
    }

    fn list(
        &self,
        account: &str,
        container: Option<&str>,
        params: &ListParams,
    ) -> anyhow::Result<Vec<String>> {
        let device = self.device(account)?;
        let lines = match container {
            Some(container) => self
                .listing
                .container(&device, container)
                .list_objects_iter(params)?
                .into_iter()
                .map(|row| match row {
                    ListingEntry::Item(o) => {
                        format!("{}\t{}\t{}\t{}", o.name, o.size, o.etag, o.timestamp)
                    }
                    ListingEntry::Subdir(name) => name,
                })
                .collect(),
            None => self
                .listing
                .account(&device)
                .list_containers_iter(params)?
                .into_iter()
                .map(|row| match row {
                    ListingEntry::Item(c) => {
                        format!("{}\t{}\t{}", c.name, c.object_count, c.bytes_used)
                    }
                    ListingEntry::Subdir(name) => name,
                })
                .collect(),
        };
        Ok(lines)
    }

    fn repair(&self, account: &str, container: &str, obj: &str) -> anyhow::Result<serde_json::Value> {
        let device = self.device(account)?;
        let diskfile = self.listing.files().diskfile(&device, container, obj)?;
        let metadata = diskfile
            .repair_metadata()
            .with_context(|| format!("repairing {}", diskfile.data_file().display()))?;
        Ok(json!(metadata))
    }
}

fn run(cli: Cli) -> anyhow::Result<()> {
    let config = load_config(&cli.config)
        .with_context(|| format!("Failed to load configuration from {}", cli.config.display()))?;
    let tool = Tool::new(&config)?;

    match cli.command {
        Commands::Info { account, container } => {
            let info = tool.info(&account, container.as_deref())?;
            println!("{}", serde_json::to_string_pretty(&info)?);
        }
        Commands::List {
            account,
            container,
            prefix,
            delimiter,
            marker,
            limit,
        } => {
            let params = ListParams {
                prefix,
                delimiter,
                marker,
                limit,
                ..ListParams::default()
            };
            for line in tool.list(&account, container.as_deref(), &params)? {
                println!("{line}");
            }
        }
        Commands::Repair {
            account,
            container,
            object,
        } => {
            let metadata = tool.repair(&account, &container, &object)?;
            println!("{}", serde_json::to_string_pretty(&metadata)?);
        }
        Commands::Ring { account } => {
            let (part, nodes) = tool.ring.get_nodes(&account, None, None);
            println!(
                "{}",
                serde_json::to_string_pretty(&json!({ "partition": part, "nodes": nodes }))?
            );
        }
    }
    Ok(())
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let rc = match run(cli) {
        Ok(()) => 0,
        Err(e) => {
            eprintln!("Error: {e:#}");
            1
        }
    };
    std::process::exit(rc);
}
