// Copyright (C) 2024 shimfs authors
// SPDX-License-Identifier: MIT OR Apache-2.0
//
// Mount a host directory through the tracing passthrough shim.

use std::ffi::OsString;
use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;
use log::{debug, info};
use shimfs::passthrough::{Config, Passthrough};
use shimfs::server::{FuseBridge, clear_umask, mount_filesystem};
use tokio::signal;

#[derive(Parser, Debug)]
#[command(author, version, about = "Passthrough filesystem that traces every request")]
struct Args {
    /// Path to mount point
    #[arg(long)]
    mountpoint: String,
    /// Source directory to expose (overrides the config file)
    #[arg(long)]
    rootdir: Option<PathBuf>,
    /// JSON configuration file
    #[arg(long)]
    config: Option<PathBuf>,
    /// Mount directly instead of through fusermount3
    #[arg(long, default_value_t = false)]
    privileged: bool,
    /// Maximum number of entries per readdir reply
    #[arg(long)]
    readdir_batch: Option<usize>,
    /// Largest write request the kernel may send
    #[arg(long)]
    max_write: Option<u32>,
}

fn load_config(args: &Args) -> anyhow::Result<Config> {
    let mut config = match &args.config {
        Some(path) => Config::from_file(path)?,
        None => Config::default(),
    };
    if let Some(root) = &args.rootdir {
        config.root_dir = root.clone();
    }
    if let Some(batch) = args.readdir_batch {
        config.readdir_batch = batch;
    }
    if let Some(max_write) = args.max_write {
        config.max_write = max_write;
    }
    config.validate()?;
    Ok(config)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    let config = load_config(&args)?;
    let inherited = clear_umask();
    debug!("cleared inherited umask {:#o}", inherited.bits());
    info!(
        "exposing {} at {} (capabilities {:?})",
        config.root_dir.display(),
        args.mountpoint,
        config.capabilities()
    );

    let fs = FuseBridge::new(Passthrough::new(config));
    let mount_path = OsString::from(&args.mountpoint);
    let mut mount_handle = mount_filesystem(fs, &mount_path, args.privileged)
        .await
        .with_context(|| format!("failed to mount at {}", args.mountpoint))?;

    let handle = &mut mount_handle;
    tokio::select! {
        res = handle => res.context("fuse session ended with an error")?,
        _ = signal::ctrl_c() => {
            mount_handle.unmount().await.context("unmount failed")?;
        }
    }
    Ok(())
}
