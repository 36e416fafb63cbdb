use clap::{Parser, Subcommand};
use dbkeeper::KeeperConfig;
use tracing::Level;

mod commands;

use commands::backup::{BackupArgs, RestoreArgs};
use commands::check::CheckArgs;
use commands::migrate::MigrateArgs;
use commands::status::StatusArgs;

#[derive(Parser)]
#[clap(author, version, about, long_about = None)]
#[clap(propagate_version = true)]
struct Cli {
    /// configuration file path, by default $HOME/.dbkeeper/dbkeeper.toml is used
    #[clap(short, long)]
    config: Option<String>,

    /// Print debug information
    #[clap(long)]
    debug: bool,

    /// Output as JSON
    #[clap(long, global = true)]
    json: bool,

    #[clap(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show file and backup status of a database without opening it
    Status(StatusArgs),

    /// Open the database and run an integrity check
    Check(CheckArgs),

    /// Open the database, bringing its schema to the declared version
    Migrate(MigrateArgs),

    /// Copy the database over its temp- backup
    Backup(BackupArgs),

    /// Replace the database with its last backup
    Restore(RestoreArgs),

    /// Show the effective configuration
    Config,
}

fn main() {
    let cli = Cli::parse();

    if cli.debug {
        tracing_subscriber::fmt()
            // filter spans/events with level TRACE or higher.
            .with_max_level(Level::INFO)
            .init();
    }

    let config = match KeeperConfig::new(&cli.config) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("{e}");
            std::process::exit(1);
        }
    };

    let result = match cli.command {
        Commands::Status(args) => commands::status::run(&config, args, cli.json),
        Commands::Check(args) => commands::check::run(&config, args, cli.json),
        Commands::Migrate(args) => commands::migrate::run(&config, args, cli.json),
        Commands::Backup(args) => commands::backup::run_backup(&config, args, cli.json),
        Commands::Restore(args) => commands::backup::run_restore(&config, args, cli.json),
        Commands::Config => {
            println!("Config File:        {}", KeeperConfig::config_file_path());
            println!("{}", config.summary());
            Ok(())
        }
    };

    if let Err(e) = result {
        eprintln!("Error: {e:#}");
        std::process::exit(1);
    }
}
