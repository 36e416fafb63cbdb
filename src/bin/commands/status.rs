use anyhow::{anyhow, Result};
use clap::Args;
use dbkeeper::config::{format_size, get_database_info, DatabaseInfo};
use dbkeeper::KeeperConfig;

use super::{print_json, TargetArgs};

/// Arguments for the Status command
#[derive(Args)]
pub struct StatusArgs {
    #[clap(flatten)]
    pub target: TargetArgs,
}

pub fn run(config: &KeeperConfig, args: StatusArgs, json: bool) -> Result<()> {
    let descriptor = args.target.descriptor(config)?;
    let info = get_database_info(&descriptor)
        .ok_or_else(|| anyhow!("Database '{}' has no file to inspect", descriptor.name()))?;

    if json {
        print_json(&info);
    } else {
        print_status(&info);
    }
    Ok(())
}

fn print_status(info: &DatabaseInfo) {
    println!("Database: {}", info.name);
    println!("  Path:             {}", info.path);
    println!("  Status:           {}", info.status);
    if let Some(size) = info.size_bytes {
        println!("  Size:             {}", format_size(size));
    }
    match info.schema_version {
        Some(version) => println!(
            "  Schema Version:   {} (declared {})",
            version, info.declared_version
        ),
        None => println!("  Declared Version: {}", info.declared_version),
    }

    println!("\nBackup:");
    println!("  Path:             {}", info.backup_path);
    if !info.backup_exists {
        println!("  Status:           not created");
        return;
    }
    if let Some(size) = info.backup_size_bytes {
        println!("  Size:             {}", format_size(size));
    }
    match &info.backup_captured_at {
        Some(at) => println!("  Captured:         {}", at),
        None => println!("  Captured:         never"),
    }
}
