//! `compactor` - dumps anonymized machine or instance event traces.
//!
//! Usage:
//!   compactor -s "$SALT" machine machine-events.csv
//!   compactor --jsons -s "$SALT" instance --database nova.sqlite --start 2016-01-01 instance-events.jsons

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use compactor_kernel::anonymize::MaskingMethod;
use compactor_kernel::cache::FlavorCache;
use compactor_kernel::config::{load_config, CompactorConfig};
use compactor_kernel::writer::OutputFormat;
use compactor_kernel::{run_instance_trace, run_machine_trace, SourceKind};
use std::path::PathBuf;
use tracing::{debug, info, Level};

#[derive(Parser, Debug)]
#[command(name = "compactor")]
#[command(about = "Host lifecycle trace compactor and anonymizer")]
struct Cli {
    /// YAML config file (defaults to $COMPACTOR_CONFIG or compactor.yaml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// User data mask type. "sha1-raw" is legacy and crackable, "none" is for debugging only
    #[arg(short = 'm', long, global = true)]
    hashed_masking_method: Option<MaskingMethod>,

    /// Salt of the masking method. Use the same salt for machine and instance traces
    #[arg(short = 's', long, global = true)]
    hashed_masking_salt: Option<String>,

    /// Epoch of the *_SEC columns
    #[arg(short = 'c', long, global = true)]
    epoch: Option<String>,

    /// vm or baremetal
    #[arg(long, global = true)]
    instance_type: Option<SourceKind>,

    /// One JSON object per line instead of CSV
    #[arg(short = 'j', long, global = true)]
    jsons: bool,

    /// Info-level logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Debug-level logging
    #[arg(long, global = true)]
    debug: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Machine lifecycle events reconstructed from snapshot backups
    Machine {
        /// File to dump results
        output_file: PathBuf,
    },
    /// Instance action events from a nova database
    Instance {
        /// File to dump results
        output_file: PathBuf,

        /// Nova SQLite database (overrides instances.database)
        #[arg(long)]
        database: Option<PathBuf>,

        #[arg(long)]
        start: Option<String>,

        #[arg(long)]
        end: Option<String>,
    },
}

impl Cli {
    fn log_level(&self) -> Level {
        if self.debug {
            Level::DEBUG
        } else if self.verbose {
            Level::INFO
        } else {
            Level::WARN
        }
    }

    fn apply(&self, config: &mut CompactorConfig) {
        if let Some(method) = self.hashed_masking_method {
            config.masking.method = method;
        }
        if let Some(salt) = &self.hashed_masking_salt {
            config.masking.salt = Some(salt.clone());
        }
        if let Some(epoch) = &self.epoch {
            config.epoch = epoch.clone();
        }
        if let Some(kind) = self.instance_type {
            config.source.kind = kind;
        }
        if self.jsons {
            config.output.format = OutputFormat::Jsons;
        }
        if let Command::Instance {
            database,
            start,
            end,
            ..
        } = &self.command
        {
            if let Some(database) = database {
                config.instances.database = database.clone();
            }
            if start.is_some() {
                config.instances.start = start.clone();
            }
            if end.is_some() {
                config.instances.end = end.clone();
            }
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_max_level(cli.log_level())
        .with_writer(std::io::stderr)
        .init();

    let mut config = load_config(cli.config.as_deref())
        .await
        .context("Failed to load config")?;
    cli.apply(&mut config);
    debug!("[main] masking {} on {} sources", config.masking.method, config.source.kind);

    match &cli.command {
        Command::Machine { output_file } => {
            let report = run_machine_trace(&config, output_file)
                .await
                .context("Machine trace failed")?;
            info!(
                "[main] {} machine events written to {} ({} snapshots failed)",
                report.emitted_records,
                output_file.display(),
                report.snapshots_failed()
            );
        }
        Command::Instance { output_file, .. } => {
            let flavors = FlavorCache::unbounded();
            let written = run_instance_trace(&config, output_file, &flavors)
                .context("Instance trace failed")?;
            info!("[main] {} instance events written to {}", written, output_file.display());
        }
    }
    Ok(())
}
