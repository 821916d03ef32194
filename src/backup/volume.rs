//! Volumes as discovered on the host, and their per-run resolved parameters.
//!
//! Every tunable follows the same precedence: a non-empty label on the volume
//! (`<label_prefix>.<key>`) wins over the global configuration value.

use crate::backup::backup_config::BackupConfig;
use bon::Builder;
use getset::Getters;
use itertools::Itertools;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;

pub static FULL_IF_OLDER_THAN_LABEL: &str = "full_if_older_than";
pub static REMOVE_OLDER_THAN_LABEL: &str = "remove_older_than";
pub static NO_VERIFY_LABEL: &str = "no_verify";
pub static BACKUP_DIR_LABEL: &str = "backup_dir";
pub static IGNORE_LABEL: &str = "ignore";

/// Backends whose object names cannot hold nested pseudo-directories get `_`
/// between path components.
static FLAT_NAMESPACE_SCHEMES: [&str; 1] = ["swift://"];

/// A data volume as reported by the container runtime inventory.
#[derive(Clone, Debug, Serialize, Deserialize, Builder, PartialEq, Eq, Getters)]
#[getset(get = "pub")]
pub struct Volume {
    #[builder(into)]
    name: Arc<str>,
    #[builder(into, default = Arc::from("local"))]
    driver: Arc<str>,
    #[builder(into)]
    mountpoint: Arc<str>,
    #[builder(default)]
    labels: HashMap<String, String>,
}

impl Volume {
    /// Label value, `None` when missing or empty.
    pub fn label(&self, key: &str) -> Option<&str> {
        self.labels
            .get(key)
            .map(String::as_str)
            .filter(|v| !v.is_empty())
    }
}

/// Parameters of one pipeline run for one volume.
///
/// Only obtainable through [`ResolvedVolume::resolve`], so every field is set
/// before a stage is built.
#[derive(Clone, Debug, PartialEq, Eq, Getters)]
#[getset(get = "pub")]
pub struct ResolvedVolume {
    volume: Volume,
    /// Remote location of this volume's backup chain
    target: String,
    /// Directory inside the container that gets backed up
    backup_dir: String,
    /// Read-only bind of the volume at its host mountpoint
    mount: String,
    full_if_older_than: String,
    remove_older_than: String,
    no_verify: bool,
}

impl ResolvedVolume {
    pub fn resolve(volume: Volume, config: &BackupConfig, hostname: &str) -> Self {
        let full_if_older_than = volume
            .label(&config.label_key(FULL_IF_OLDER_THAN_LABEL))
            .unwrap_or(config.full_if_older_than.as_ref())
            .to_string();
        let remove_older_than = volume
            .label(&config.label_key(REMOVE_OLDER_THAN_LABEL))
            .unwrap_or(config.remove_older_than.as_ref())
            .to_string();
        let no_verify = config.no_verify
            || volume.label(&config.label_key(NO_VERIFY_LABEL)) == Some("true");
        let backup_dir = format!(
            "{}/{}",
            volume.mountpoint,
            volume
                .label(&config.label_key(BACKUP_DIR_LABEL))
                .unwrap_or("")
        );
        let target = target_url(&config.target_url, hostname, &volume.name);
        let mount = format!("{}:{}:ro", volume.name, volume.mountpoint);

        Self {
            volume,
            target,
            backup_dir,
            mount,
            full_if_older_than,
            remove_older_than,
            no_verify,
        }
    }

    pub fn name(&self) -> &str {
        &self.volume.name
    }

    /// Writable bind of the volume, for restores.
    pub fn rw_mount(&self) -> String {
        format!("{}:{}", self.volume.name, self.volume.mountpoint)
    }
}

pub fn path_separator(base_url: &str) -> &'static str {
    if FLAT_NAMESPACE_SCHEMES
        .iter()
        .any(|scheme| base_url.starts_with(scheme))
    {
        "_"
    } else {
        "/"
    }
}

pub fn target_url(base_url: &str, hostname: &str, volume_name: &str) -> String {
    let separator = path_separator(base_url);
    format!("{base_url}{separator}{hostname}{separator}{volume_name}")
}

/// Whether a discovered volume takes part in the run.
pub fn is_backed_up(volume: &Volume, config: &BackupConfig) -> bool {
    if config
        .volumes_blacklist
        .iter()
        .any(|name| name.as_str() == volume.name.as_ref())
    {
        tracing::info!(volume = %volume.name, "Ignoring blacklisted volume");
        return false;
    }
    if volume.label(&config.label_key(IGNORE_LABEL)) == Some("true") {
        tracing::info!(volume = %volume.name, "Ignoring volume labelled to be ignored");
        return false;
    }
    true
}

/// Keeps the volumes to back up, sorted by name.
pub fn select_volumes<I: IntoIterator<Item = Volume>>(
    volumes: I,
    config: &BackupConfig,
) -> Vec<Volume> {
    volumes
        .into_iter()
        .filter(|v| is_backed_up(v, config))
        .sorted_unstable_by(|a, b| a.name.cmp(&b.name))
        .collect_vec()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backup::backup_config::tests::test_config;

    fn volume_with_labels(labels: &[(&str, &str)]) -> Volume {
        Volume::builder()
            .name("db1")
            .mountpoint("/var/lib/docker/volumes/db1/_data")
            .labels(
                labels
                    .iter()
                    .map(|(k, v)| (k.to_string(), v.to_string()))
                    .collect(),
            )
            .build()
    }

    #[test]
    fn test_resolve_uses_global_defaults() {
        let mut config = test_config();
        config.full_if_older_than = "1M".into();
        config.remove_older_than = "7D".into();

        let resolved = ResolvedVolume::resolve(volume_with_labels(&[]), &config, "node-1");

        assert_eq!(resolved.full_if_older_than(), "1M");
        assert_eq!(resolved.remove_older_than(), "7D");
        assert!(!resolved.no_verify());
        assert_eq!(
            resolved.target(),
            "s3://s3-eu-west-1.amazonaws.com/backups/node-1/db1"
        );
        assert_eq!(resolved.backup_dir(), "/var/lib/docker/volumes/db1/_data/");
        assert_eq!(resolved.mount(), "db1:/var/lib/docker/volumes/db1/_data:ro");
        assert_eq!(resolved.rw_mount(), "db1:/var/lib/docker/volumes/db1/_data");
    }

    #[test]
    fn test_resolve_prefers_volume_labels() {
        let mut config = test_config();
        config.full_if_older_than = "30D".into();

        let volume = volume_with_labels(&[
            ("io.volume_backup.full_if_older_than", "3D"),
            ("io.volume_backup.remove_older_than", "2M"),
            ("io.volume_backup.backup_dir", "dumps"),
        ]);
        let resolved = ResolvedVolume::resolve(volume, &config, "node-1");

        assert_eq!(resolved.full_if_older_than(), "3D");
        assert_eq!(resolved.remove_older_than(), "2M");
        assert_eq!(resolved.backup_dir(), "/var/lib/docker/volumes/db1/_data/dumps");
    }

    #[test]
    fn test_resolve_ignores_empty_labels() {
        let config = test_config();
        let volume = volume_with_labels(&[("io.volume_backup.full_if_older_than", "")]);
        let resolved = ResolvedVolume::resolve(volume, &config, "node-1");
        assert_eq!(resolved.full_if_older_than(), config.full_if_older_than.as_ref());
    }

    #[test]
    fn test_no_verify_from_label_or_global() {
        let config = test_config();
        let labelled = volume_with_labels(&[("io.volume_backup.no_verify", "true")]);
        assert!(*ResolvedVolume::resolve(labelled, &config, "h").no_verify());

        let other_value = volume_with_labels(&[("io.volume_backup.no_verify", "yes")]);
        assert!(!*ResolvedVolume::resolve(other_value, &config, "h").no_verify());

        let mut config = test_config();
        config.no_verify = true;
        assert!(*ResolvedVolume::resolve(volume_with_labels(&[]), &config, "h").no_verify());
    }

    #[test]
    fn test_target_separator() {
        assert_eq!(target_url("swift://backups", "node-1", "db1"), "swift://backups_node-1_db1");
        assert_eq!(target_url("s3://host/bucket", "node-1", "db1"), "s3://host/bucket/node-1/db1");
        assert_eq!(target_url("file:///srv", "node-1", "db1"), "file:///srv/node-1/db1");
    }

    #[test]
    fn test_select_volumes() {
        let mut config = test_config();
        config.volumes_blacklist = vec!["cache".to_string()].into();

        let volumes = vec![
            Volume::builder().name("web").mountpoint("/v/web").build(),
            Volume::builder().name("cache").mountpoint("/v/cache").build(),
            Volume::builder()
                .name("scratch")
                .mountpoint("/v/scratch")
                .labels(HashMap::from([(
                    "io.volume_backup.ignore".to_string(),
                    "true".to_string(),
                )]))
                .build(),
            Volume::builder().name("db").mountpoint("/v/db").build(),
        ];

        let selected = select_volumes(volumes, &config);
        let names = selected.iter().map(|v| v.name().to_string()).collect_vec();
        assert_eq!(names, vec!["db", "web"]);
    }
}
