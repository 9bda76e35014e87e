/*
 * SPDX-FileCopyrightText: Copyright (c) 2025 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
 * SPDX-License-Identifier: LicenseRef-NvidiaProprietary
 *
 * NVIDIA CORPORATION, its affiliates and licensors retain all intellectual
 * property and proprietary rights in and to this material, related
 * documentation and any modifications thereto. Any use, reproduction,
 * disclosure or distribution of this material and related documentation
 * without an express license agreement from NVIDIA CORPORATION or
 * its affiliates is strictly prohibited.
 */
use std::path::{Path, PathBuf};

use carbide_ipam::{IpamConfig, NodeIpamSpec, PoolAllocator};
use clap::Parser;
use eyre::WrapErr;
use tracing::metadata::LevelFilter;
use tracing_subscriber::filter::EnvFilter;
use tracing_subscriber::fmt;
use tracing_subscriber::prelude::*;

fn main() -> Result<(), eyre::Report> {
    let options = Options::parse();

    let env_filter = EnvFilter::builder()
        .with_default_directive(LevelFilter::INFO.into())
        .from_env_lossy();
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(env_filter)
        .try_init()?;

    match options.command {
        Command::Allocate(allocate_command) => allocate(allocate_command),
    }
}

#[derive(Parser)]
pub struct Options {
    #[clap(subcommand)]
    pub command: Command,
}

#[derive(Parser)]
pub enum Command {
    #[clap(about = "Run one allocation pass over a set of node records")]
    Allocate(AllocateCommand),
}

#[derive(Parser)]
pub struct AllocateCommand {
    #[clap(long, short = 'c', help = "Path to the TOML pool configuration")]
    pub config: PathBuf,

    #[clap(
        required = true,
        help = "Paths to node records (JSON). Records are processed in the order given"
    )]
    pub nodes: Vec<PathBuf>,
}

fn allocate(command: AllocateCommand) -> eyre::Result<()> {
    let config = IpamConfig::load(&command.config)?;
    let allocator =
        PoolAllocator::from_config(&config).wrap_err("Failed to build IPAM pools from config")?;
    allocator.restore_finished();

    let mut nodes = command
        .nodes
        .iter()
        .map(|path| read_node(path))
        .collect::<eyre::Result<Vec<_>>>()?;

    for node in &mut nodes {
        if let Err(error) = allocator.allocate_to_node(node) {
            tracing::error!(node = %node.name, %error, "Allocation pass for node failed");
        }
        allocator.populate_node_spec(node);
    }

    println!("{}", serde_json::to_string_pretty(&nodes)?);
    Ok(())
}

fn read_node(path: &Path) -> eyre::Result<NodeIpamSpec> {
    let raw = std::fs::read_to_string(path)
        .wrap_err_with(|| format!("Could not read node record {}", path.display()))?;
    serde_json::from_str(&raw)
        .wrap_err_with(|| format!("Invalid node record {}", path.display()))
}
