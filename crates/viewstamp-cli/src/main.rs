//! viewstamp command-line tools.
//!
//! # Quick Start
//!
//! ```bash
//! # Replicate 20 requests through an in-process group of 5
//! viewstamp demo --nodes 5 --requests 20
//!
//! # Same, persisting every node's records and cutting one node off
//! viewstamp demo --nodes 3 --requests 10 --data-dir ./data --partition
//!
//! # Dump what node 1 stored
//! viewstamp inspect --data-dir ./data/node-1 --from 1.3
//! ```

mod commands;

use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};
use viewstamp_types::ViewStamp;

/// viewstamp - viewstamped primary-backup replication.
#[derive(Parser)]
#[command(name = "viewstamp")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Directory holding viewstamp.toml and viewstamp.local.toml.
    #[arg(long, global = true, default_value = ".")]
    project_dir: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run an in-process replication group and submit requests to it.
    Demo {
        /// Number of replicas in the group.
        #[arg(short, long, default_value = "3")]
        nodes: usize,

        /// Number of requests the leader submits.
        #[arg(short, long, default_value = "10")]
        requests: u64,

        /// Persist each node's records under DIR/node-<id>.
        #[arg(long)]
        data_dir: Option<PathBuf>,

        /// Cut the highest-numbered node off from the rest of the group.
        #[arg(long)]
        partition: bool,
    },

    /// Print the records stored in a node's data directory.
    Inspect {
        /// A node data directory containing records.log.
        #[arg(long)]
        data_dir: PathBuf,

        /// First stamp to print, as VIEW.REQ.
        #[arg(long, value_parser = commands::inspect::parse_stamp)]
        from: Option<ViewStamp>,

        /// Last stamp to print, as VIEW.REQ.
        #[arg(long, value_parser = commands::inspect::parse_stamp)]
        to: Option<ViewStamp>,
    },

    /// Print the effective configuration as TOML.
    Config,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Demo {
            nodes,
            requests,
            data_dir,
            partition,
        } => commands::demo::run(&commands::demo::DemoOptions {
            project_dir: cli.project_dir,
            nodes,
            requests,
            data_dir,
            partition,
        }),
        Commands::Inspect { data_dir, from, to } => commands::inspect::run(&data_dir, from, to),
        Commands::Config => commands::config::show(&cli.project_dir),
    }
}
