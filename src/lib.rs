//! # volume_backup
//!
//! Backs up the data volumes of a container host by running an external
//! backup tool in short-lived containers, one pipeline per volume.
//!
//! ## Features
//!
//! - **Duplicity**: backup, retention, cleanup, verification and status per volume
//! - **Restic**: backup into one repository per volume
//! - **Per-volume overrides**: thresholds and verification set through volume labels
//! - **Metrics**: Prometheus text lines, optionally published for a textfile collector
//! - **Notifications**: SMTP report when a volume fails
//!
//! ## Quick Start
//!
//! ```no_run
//! use std::sync::Arc;
//! use volume_backup::backup::backup_config::BackupConfig;
//! use volume_backup::backup::pipeline::{backup_volumes, discover_volumes, Handler};
//! use volume_backup::backup::runtime::docker::DockerRuntime;
//!
//! let config = Arc::new(BackupConfig::load("config.yml")?);
//! let runtime = DockerRuntime::connect(config.container_timeout)?;
//! let handler = Handler::new(Arc::new(runtime), config);
//!
//! let pool = rayon::ThreadPoolBuilder::new().build()?;
//! let volumes = discover_volumes(&handler)?;
//! let (metrics, result) = backup_volumes(&handler, volumes, &pool);
//! metrics.iter().for_each(|m| println!("{m}"));
//! result?;
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

pub mod backup;
