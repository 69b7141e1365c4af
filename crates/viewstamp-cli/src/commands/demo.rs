//! In-process replication demo.
//!
//! Builds a whole group over a [`MemoryNetwork`], runs every replica's
//! accept loop on its own thread, and has node 0 (leader of view 1)
//! submit a batch of requests. Each node's committed records are drained
//! from its delivery queue by an application thread and printed at the
//! end.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use anyhow::{Context, Result};
use bytes::Bytes;
use signal_hook::consts::{SIGINT, SIGTERM};
use viewstamp_config::{ConfigLoader, NodeConfig, Paths, StoreKind};
use viewstamp_storage::{FileStore, MemoryStore, RecordStore};
use viewstamp_types::{NodeId, View, ViewStamp};
use viewstamp_vsr::{Delivered, MemoryNetwork, QueueDelivery, Replica, Shutdown, SubmitError};

pub struct DemoOptions {
    pub project_dir: PathBuf,
    pub nodes: usize,
    pub requests: u64,
    pub data_dir: Option<PathBuf>,
    pub partition: bool,
}

struct Node {
    replica: Arc<Replica>,
    output: Arc<QueueDelivery>,
}

pub fn run(options: &DemoOptions) -> Result<()> {
    let mut base = ConfigLoader::new()
        .with_project_dir(&options.project_dir)
        .load()
        .context("Failed to load configuration")?;
    base.group_size = options.nodes;
    if let Some(dir) = &options.data_dir {
        base.data_dir.clone_from(dir);
        base.store.kind = StoreKind::File;
    }
    base.validate()?;

    let shutdown = Shutdown::new();
    signal_hook::flag::register(SIGINT, shutdown.flag()).context("Failed to install SIGINT handler")?;
    signal_hook::flag::register(SIGTERM, shutdown.flag()).context("Failed to install SIGTERM handler")?;

    let network = MemoryNetwork::new(
        base.group_size,
        base.channel.ring_capacity,
        base.channel.max_message_size,
    );
    let nodes = (0..base.group_size)
        .map(|id| build_node(&base, id as u8, &network, &shutdown))
        .collect::<Result<Vec<_>>>()?;

    if options.partition && base.group_size > 1 {
        let cut = NodeId::new((base.group_size - 1) as u8);
        network.isolate(cut);
        println!("partition: {cut} is cut off from the group");
    }

    let timeout = base.timeout_config().quorum_timeout;
    let leader = &nodes[0].replica;
    let mut committed = Vec::new();
    let mut delivered: Vec<Vec<Delivered>> = vec![Vec::new(); nodes.len()];

    thread::scope(|s| {
        for node in &nodes {
            let replica = Arc::clone(&node.replica);
            s.spawn(move || replica.accept_loop());
        }
        let consumers: Vec<_> = nodes
            .iter()
            .map(|node| {
                let output = Arc::clone(&node.output);
                let shutdown = shutdown.clone();
                s.spawn(move || drain_until_shutdown(&output, &shutdown))
            })
            .collect();

        for i in 0..options.requests {
            if shutdown.is_triggered() {
                break;
            }
            let payload = Bytes::from(format!("request-{i}"));
            match leader.submit(payload, timeout) {
                Ok(stamp) => {
                    println!("committed {stamp}");
                    committed.push(stamp);
                }
                Err(e @ SubmitError::NoQuorum { .. }) => {
                    println!("request-{i}: {e}");
                    break;
                }
                Err(e) => {
                    println!("request-{i}: {e}");
                    if !e.is_uncertain() {
                        break;
                    }
                }
            }
        }

        // Let followers catch up on in-flight entries before stopping.
        thread::sleep(Duration::from_millis(50));
        shutdown.trigger();

        for (slot, consumer) in delivered.iter_mut().zip(consumers) {
            if let Ok(records) = consumer.join() {
                *slot = records;
            }
        }
    });

    print_summary(&nodes, &committed, &delivered);
    Ok(())
}

fn build_node(
    base: &NodeConfig,
    id: u8,
    network: &MemoryNetwork,
    shutdown: &Shutdown,
) -> Result<Node> {
    let node_config = NodeConfig {
        node_id: id,
        ..base.clone()
    };
    let cluster = node_config.cluster_config()?;
    let store = open_store(&node_config)?;
    let output = Arc::new(QueueDelivery::new(node_config.delivery.queue_capacity));

    let replica = Replica::new(
        cluster,
        View::initial(NodeId::new(0)),
        store,
        network.channels_for(NodeId::new(id)),
    )?
    .with_delivery(output.clone())
    .with_shutdown(shutdown.clone())
    .recover()?;

    Ok(Node {
        replica: Arc::new(replica),
        output,
    })
}

fn open_store(config: &NodeConfig) -> Result<Arc<dyn RecordStore>> {
    Ok(match config.store.kind {
        StoreKind::Memory => Arc::new(MemoryStore::new()),
        StoreKind::File => {
            let dir = Paths::node_data_dir(&config.data_dir, config.node_id);
            Arc::new(open_file_store(&dir)?)
        }
    })
}

fn open_file_store(dir: &Path) -> Result<FileStore> {
    FileStore::open(dir).with_context(|| format!("Failed to open record store in {}", dir.display()))
}

fn drain_until_shutdown(output: &QueueDelivery, shutdown: &Shutdown) -> Vec<Delivered> {
    let mut records = Vec::new();
    while !shutdown.is_triggered() {
        match output.try_pop() {
            Some(record) => records.push(record),
            None => thread::sleep(Duration::from_millis(1)),
        }
    }
    records.extend(output.drain());
    records
}

fn print_summary(nodes: &[Node], committed: &[ViewStamp], delivered: &[Vec<Delivered>]) {
    println!();
    println!("{} of the requested stamps committed", committed.len());

    for (node, records) in nodes.iter().zip(delivered) {
        let state = node.replica.state();
        let metrics = node.replica.metrics();
        let stamps: Vec<String> = records.iter().map(|d| d.stamp.to_string()).collect();

        println!(
            "{} {:<9} committed={} delivered={} dropped={} [{}]",
            state.node_id,
            state.role.to_string(),
            state.committed,
            records.len(),
            metrics.entries_dropped,
            stamps.join(" ")
        );
    }
}
