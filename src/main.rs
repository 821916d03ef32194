use clap::{Parser, Subcommand};
use rayon::ThreadPoolBuilder;
use std::path::PathBuf;
use std::process::exit;
use std::sync::Arc;
use tracing::error;
use tracing_subscriber::EnvFilter;
use volume_backup::backup::backup_config::BackupConfig;
use volume_backup::backup::metrics::{write_textfile, Metric};
use volume_backup::backup::notifications::notify_failure;
use volume_backup::backup::pipeline::{backup_requested, find_volume, restore_volume, Handler};
use volume_backup::backup::result_error::result::Result;
use volume_backup::backup::result_error::WithMsg;
use volume_backup::backup::runtime::docker::DockerRuntime;

/// Backs up container volumes with an external backup tool
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Args {
    /// Location of config file
    #[arg(short, long)]
    config: PathBuf,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Back up every discovered volume, or only the given ones
    Backup {
        #[arg(short, long)]
        volume: Vec<String>,
    },
    /// Restore one volume from its latest backup
    Restore {
        #[arg(short, long)]
        volume: String,
    },
}

fn backup(handler: &Handler, only: &[String]) -> (Vec<Metric>, Result<()>) {
    match ThreadPoolBuilder::new()
        .thread_name(|i| format!("volume-backup-{i}"))
        .build()
    {
        Ok(pool) => backup_requested(handler, only, &pool),
        Err(e) => (vec![], Err(e.into())),
    }
}

fn restore(handler: &Handler, volume: &str) -> (Vec<Metric>, Result<()>) {
    match find_volume(handler, volume).and_then(|v| restore_volume(handler, v)) {
        Ok(metrics) => (metrics, Ok(())),
        Err(e) => (vec![], Err(e)),
    }
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();
    let args = Args::parse();

    let config = match BackupConfig::load(&args.config) {
        Ok(config) => Arc::new(config),
        Err(e) => {
            error!("{e}");
            exit(2);
        }
    };

    let runtime = match DockerRuntime::connect(config.container_timeout) {
        Ok(runtime) => runtime,
        Err(e) => {
            error!("{e}");
            exit(2);
        }
    };
    let handler = Handler::new(Arc::new(runtime), config.clone());

    let (metrics, result) = match &args.command {
        None => backup(&handler, &[]),
        Some(Command::Backup { volume }) => backup(&handler, volume),
        Some(Command::Restore { volume }) => restore(&handler, volume),
    };

    for metric in &metrics {
        println!("{metric}");
    }

    if let Some(path) = &config.metrics_file {
        if let Err(e) = write_textfile(path, &metrics).with_msg("Metrics were not published") {
            error!("{e}");
        }
    }

    if let Err(e) = result {
        error!("{e}");
        if let Some(notification) = &config.notification {
            notify_failure(notification, handler.hostname(), &e);
        }
        exit(1);
    }
}
