use anyhow::{anyhow, Result};
use clap::Args;
use dbkeeper::KeeperConfig;

use super::{print_json, TargetArgs};

/// Arguments for the Migrate command
#[derive(Args)]
pub struct MigrateArgs {
    #[clap(flatten)]
    pub target: TargetArgs,
}

pub fn run(config: &KeeperConfig, args: MigrateArgs, json: bool) -> Result<()> {
    let mut keeper = args.target.coordinator(config)?;
    keeper.get_primary()?;
    let transition = keeper
        .last_transition()
        .cloned()
        .ok_or_else(|| anyhow!("open of '{}' reported no transition", args.target.name))?;
    keeper.close()?;

    if json {
        print_json(&transition);
        return Ok(());
    }

    println!(
        "{}: {} v{} -> v{}",
        args.target.name, transition.kind, transition.from_version, transition.to_version
    );
    for (from, to) in &transition.hops {
        println!("  v{} -> v{}", from, to);
    }
    if !transition.applied.is_empty() {
        let applied: Vec<String> = transition.applied.iter().map(|v| v.to_string()).collect();
        println!("  applied steps: {}", applied.join(", "));
    }
    Ok(())
}
