use anyhow::Result;
use clap::Args;
use dbkeeper::config::format_size;
use dbkeeper::KeeperConfig;
use tracing::info;

use super::{print_json, TargetArgs};

/// Arguments for the Backup command
#[derive(Args)]
pub struct BackupArgs {
    #[clap(flatten)]
    pub target: TargetArgs,
}

/// Arguments for the Restore command
#[derive(Args)]
pub struct RestoreArgs {
    #[clap(flatten)]
    pub target: TargetArgs,

    /// Only restore when the integrity check fails
    #[clap(long)]
    pub if_corrupt: bool,
}

pub fn run_backup(config: &KeeperConfig, args: BackupArgs, json: bool) -> Result<()> {
    let mut keeper = args.target.coordinator(config)?;
    let manifest = keeper.backup_now()?;
    keeper.close()?;

    if json {
        print_json(&manifest);
    } else {
        println!(
            "Backed up {} to {} ({}, schema v{})",
            manifest.source,
            manifest.file_name,
            format_size(manifest.size_bytes),
            manifest.schema_version
        );
    }
    Ok(())
}

pub fn run_restore(config: &KeeperConfig, args: RestoreArgs, json: bool) -> Result<()> {
    let mut keeper = args.target.coordinator(config)?;

    if args.if_corrupt && keeper.check_integrity()? {
        info!(database = args.target.name.as_str(), "Integrity check passed, nothing to restore");
        keeper.close()?;
        if !json {
            println!("{}: integrity check passed, not restoring", args.target.name);
        }
        return Ok(());
    }

    keeper.restore_from_backup()?;
    let healthy = keeper.check_integrity()?;
    let manifest = keeper.backup_manifest()?;
    keeper.close()?;

    if json {
        print_json(&serde_json::json!({
            "restored": true,
            "healthy": healthy,
            "backup": manifest,
        }));
    } else {
        match manifest {
            Some(m) => println!(
                "Restored {} from {} captured {}",
                args.target.name,
                m.file_name,
                m.captured_at.format("%Y-%m-%d %H:%M:%S UTC")
            ),
            None => println!("Restored {}", args.target.name),
        }
        println!("Integrity after restore: {}", if healthy { "ok" } else { "FAILED" });
    }
    Ok(())
}
