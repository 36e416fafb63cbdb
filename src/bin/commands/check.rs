use anyhow::{anyhow, Result};
use clap::Args;
use dbkeeper::database::CheckKind;
use dbkeeper::KeeperConfig;

use super::{print_json, TargetArgs};

/// Arguments for the Check command
#[derive(Args)]
pub struct CheckArgs {
    #[clap(flatten)]
    pub target: TargetArgs,

    /// Run the full integrity_check instead of the configured level
    #[clap(long)]
    pub full: bool,
}

pub fn run(config: &KeeperConfig, args: CheckArgs, json: bool) -> Result<()> {
    let mut options = config.coordinator_options();
    if args.full {
        options.integrity = CheckKind::Full;
    }
    let mut keeper = dbkeeper::database::LifecycleCoordinator::new(
        args.target.descriptor(config)?,
        args.target.schema()?,
        options,
    );

    let report = keeper.integrity_report()?;
    keeper.close()?;

    if json {
        print_json(&report);
    } else {
        println!(
            "{}: {} ({} ms)",
            report.kind,
            if report.ok { "ok" } else { "FAILED" },
            report.duration.as_millis()
        );
        if !report.ok {
            for line in &report.details {
                println!("  {}", line);
            }
        }
    }

    if report.ok {
        Ok(())
    } else {
        Err(anyhow!("integrity check failed for '{}'", args.target.name))
    }
}
