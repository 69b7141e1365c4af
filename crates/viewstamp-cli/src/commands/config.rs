//! Configuration display.

use std::path::Path;

use anyhow::{Context, Result};
use viewstamp_config::NodeConfig;

/// Prints the configuration after every layer has been applied.
pub fn show(project_dir: &Path) -> Result<()> {
    let config = NodeConfig::load_from_dir(project_dir).context("Failed to load configuration")?;
    let cluster = config.cluster_config()?;

    println!("# node {} of {}", config.node_id, config.group_size);
    println!("# quorum size {}", cluster.quorum_size());
    println!("{}", config.to_toml()?);
    Ok(())
}
