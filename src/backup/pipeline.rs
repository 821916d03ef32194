//! Per-volume entry points.
//!
//! Every pipeline gets the shared [`Handler`] by reference and owns nothing but
//! its [`ResolvedVolume`], so pipelines of different volumes run side by side
//! without coordination.

use crate::backup::backup_config::BackupConfig;
use crate::backup::metrics::Metric;
use crate::backup::result_error::error::Error;
use crate::backup::result_error::result::{convert_error_vec, Result};
use crate::backup::result_error::WithMsg;
use crate::backup::runtime::ContainerRuntime;
use crate::backup::volume::{select_volumes, ResolvedVolume, Volume};
use getset::Getters;
use itertools::Itertools;
use rayon::prelude::*;
use rayon::ThreadPool;
use std::sync::Arc;

/// Context shared by all pipelines of one run.
#[derive(Clone, Getters)]
#[getset(get = "pub")]
pub struct Handler {
    runtime: Arc<dyn ContainerRuntime>,
    config: Arc<BackupConfig>,
    /// Host component of every remote target
    hostname: Arc<str>,
}

impl Handler {
    /// Uses the configured hostname, or the OS one when unset.
    pub fn new(runtime: Arc<dyn ContainerRuntime>, config: Arc<BackupConfig>) -> Self {
        let hostname = config.hostname.clone().unwrap_or_else(|| {
            Arc::from(gethostname::gethostname().to_string_lossy().into_owned())
        });
        Self {
            runtime,
            config,
            hostname,
        }
    }
}

/// Volumes of the host that take part in a backup run, sorted by name.
pub fn discover_volumes(handler: &Handler) -> Result<Vec<Volume>> {
    let volumes = handler
        .runtime
        .list_volumes()
        .with_msg("Failed to list volumes")?;
    tracing::debug!("Found {} volumes", volumes.len());
    Ok(select_volumes(volumes, &handler.config))
}

/// Looks a volume up by name, regardless of blacklist or ignore label.
pub fn find_volume(handler: &Handler, name: &str) -> Result<Volume> {
    handler
        .runtime
        .list_volumes()
        .with_msg("Failed to list volumes")?
        .into_iter()
        .find(|v| v.name().as_ref() == name)
        .ok_or_else(|| Error::VolumeNotFound(name.to_string()))
}

/// Runs the configured engine's full pipeline for one volume.
///
/// Returns the metrics of every completed stage in stage order, or the first
/// fatal failure.
pub fn backup_volume(handler: &Handler, volume: Volume) -> Result<Vec<Metric>> {
    let volume = ResolvedVolume::resolve(volume, &handler.config, &handler.hostname);
    let engine = handler.config.engine.build(handler, &volume);
    tracing::info!(
        volume = %volume.name(),
        engine = engine.name(),
        target = %volume.target(),
        "Backing up volume"
    );
    engine
        .backup()
        .with_msg(format!("Backup of volume {} failed", volume.name()))
}

pub fn restore_volume(handler: &Handler, volume: Volume) -> Result<Vec<Metric>> {
    let volume = ResolvedVolume::resolve(volume, &handler.config, &handler.hostname);
    let engine = handler.config.engine.build(handler, &volume);
    engine
        .restore()
        .with_msg(format!("Restore of volume {} failed", volume.name()))
}

/// Backs up `volumes` concurrently on `pool`.
///
/// Returns the metrics of the volumes that succeeded, in the order of
/// `volumes`, along with the failures of the others.
pub fn backup_volumes(
    handler: &Handler,
    volumes: Vec<Volume>,
    pool: &ThreadPool,
) -> (Vec<Metric>, Result<()>) {
    let results = pool.install(|| {
        volumes
            .into_par_iter()
            .map(|volume| backup_volume(handler, volume))
            .collect::<Vec<_>>()
    });

    let (metrics, errors): (Vec<Vec<Metric>>, Vec<Error>) = results.into_iter().partition_result();
    for error in &errors {
        tracing::error!("{error}");
    }
    (metrics.into_iter().flatten().collect_vec(), convert_error_vec(errors))
}

/// Keeps the volumes named in `requested`, or all of them when it is empty.
///
/// Requested names missing from `volumes` (unknown, blacklisted or ignored)
/// are reported as [`Error::VolumeNotFound`].
pub fn select_requested(volumes: Vec<Volume>, requested: &[String]) -> (Vec<Volume>, Result<()>) {
    if requested.is_empty() {
        return (volumes, Ok(()));
    }
    let missing = requested
        .iter()
        .filter(|name| !volumes.iter().any(|v| v.name().as_ref() == name.as_str()))
        .map(|name| {
            tracing::warn!(volume = %name, "Requested volume was not discovered");
            Error::VolumeNotFound(name.clone())
        })
        .collect_vec();
    let selected = volumes
        .into_iter()
        .filter(|v| requested.iter().any(|name| name.as_str() == v.name().as_ref()))
        .collect_vec();
    (selected, convert_error_vec(missing))
}

/// Discovers the volumes, keeps the requested ones and backs them up on
/// `pool`. Unknown names and failed volumes end up in the same error.
pub fn backup_requested(
    handler: &Handler,
    requested: &[String],
    pool: &ThreadPool,
) -> (Vec<Metric>, Result<()>) {
    let volumes = match discover_volumes(handler) {
        Ok(volumes) => volumes,
        Err(e) => return (vec![], Err(e)),
    };
    let (volumes, selected) = select_requested(volumes, requested);
    let (metrics, result) = backup_volumes(handler, volumes, pool);
    let result = match (selected, result) {
        (Err(missing), Err(failed)) => Err(missing.chain(failed)),
        (selected, result) => selected.and(result),
    };
    (metrics, result)
}
