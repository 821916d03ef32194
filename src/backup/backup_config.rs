use crate::backup::engine::EngineConfig;
use crate::backup::notifications::NotificationConfig;
use crate::backup::redacted::RedactedString;
use crate::backup::result_error::error::Error;
use crate::backup::result_error::result::Result;
use crate::backup::result_error::WithMsg;
use crate::backup::validate::{validate_parent_dir_exist, validate_target_url, validate_time_spec};
use serde::{Deserialize, Serialize};
use serde_with::skip_serializing_none;
use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use validator::Validate;

pub static DEFAULT_FULL_IF_OLDER_THAN: &str = "15D";
pub static DEFAULT_REMOVE_OLDER_THAN: &str = "30D";
pub static DEFAULT_LABEL_PREFIX: &str = "io.volume_backup";
static DEFAULT_CONTAINER_TIMEOUT: Duration = Duration::from_secs(24 * 60 * 60);

/// Global settings shared by every volume pipeline.
///
/// Loaded once, validated, then handed to the pipelines behind an `Arc` and
/// never mutated again.
#[skip_serializing_none]
#[derive(Clone, Serialize, Deserialize, Debug, Validate)]
#[serde(deny_unknown_fields)]
pub struct BackupConfig {
    /// Base URL every volume target is derived from
    #[validate(custom(function = validate_target_url))]
    pub target_url: Arc<str>,
    #[serde(default = "default_full_if_older_than")]
    #[validate(custom(function = validate_time_spec))]
    pub full_if_older_than: Arc<str>,
    #[serde(default = "default_remove_older_than")]
    #[validate(custom(function = validate_time_spec))]
    pub remove_older_than: Arc<str>,
    #[serde(default)]
    pub no_verify: bool,
    /// Overrides the OS hostname in remote targets
    pub hostname: Option<Arc<str>>,
    #[serde(default = "default_label_prefix")]
    pub label_prefix: Arc<str>,
    #[serde(default)]
    pub volumes_blacklist: Arc<Vec<String>>,
    /// Upper bound for one stage container to exit
    #[serde(default = "default_container_timeout", with = "humantime_serde")]
    pub container_timeout: Duration,
    #[validate(nested)]
    pub engine: EngineConfig,
    #[serde(default)]
    pub aws: Arc<AwsConfig>,
    #[serde(default)]
    pub swift: Arc<SwiftConfig>,
    /// Prometheus textfile the run's metrics are written to
    #[validate(custom(function = validate_parent_dir_exist))]
    pub metrics_file: Option<PathBuf>,
    #[validate(nested)]
    pub notification: Option<NotificationConfig>,
}

fn default_full_if_older_than() -> Arc<str> {
    DEFAULT_FULL_IF_OLDER_THAN.into()
}

fn default_remove_older_than() -> Arc<str> {
    DEFAULT_REMOVE_OLDER_THAN.into()
}

fn default_label_prefix() -> Arc<str> {
    DEFAULT_LABEL_PREFIX.into()
}

fn default_container_timeout() -> Duration {
    DEFAULT_CONTAINER_TIMEOUT
}

#[derive(Clone, Default, Serialize, Deserialize, Debug)]
#[serde(deny_unknown_fields)]
pub struct AwsConfig {
    #[serde(default)]
    pub access_key_id: String,
    #[serde(default)]
    pub secret_access_key: RedactedString,
}

#[derive(Clone, Default, Serialize, Deserialize, Debug)]
#[serde(deny_unknown_fields)]
pub struct SwiftConfig {
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub password: RedactedString,
    #[serde(default)]
    pub auth_url: String,
    #[serde(default)]
    pub tenant_name: String,
    #[serde(default)]
    pub region_name: String,
}

impl BackupConfig {
    /// Reads and validates a YAML configuration file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let config = File::open(path)
            .map_err(Error::from)
            .and_then(|f| serde_yml::from_reader::<_, BackupConfig>(f).map_err(Error::from))
            .with_msg(format!("Parse YAML config failed: {:?}", path))?;
        config
            .validate()
            .map_err(Error::from)
            .with_msg(format!("Config validation failed: {:?}", path))?;
        Ok(config)
    }

    /// Label key `<label_prefix>.<suffix>` on a volume.
    pub fn label_key(&self, suffix: &str) -> String {
        format!("{}.{}", self.label_prefix, suffix)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::backup::engine::duplicity::DuplicityConfig;
    use std::io::Write;
    use tempfile::NamedTempFile;

    static MINIMAL_YAML: &str = r#"
target_url: s3://s3-eu-west-1.amazonaws.com/backups
engine:
  type: duplicity
"#;

    pub(crate) fn test_config() -> BackupConfig {
        serde_yml::from_str(MINIMAL_YAML).unwrap()
    }

    #[test]
    fn test_defaults() {
        let config = test_config();
        assert_eq!(config.full_if_older_than.as_ref(), DEFAULT_FULL_IF_OLDER_THAN);
        assert_eq!(config.remove_older_than.as_ref(), DEFAULT_REMOVE_OLDER_THAN);
        assert_eq!(config.label_prefix.as_ref(), DEFAULT_LABEL_PREFIX);
        assert_eq!(config.container_timeout, DEFAULT_CONTAINER_TIMEOUT);
        assert!(!config.no_verify);
        assert!(config.volumes_blacklist.is_empty());
        assert!(config.aws.secret_access_key.is_empty());
        assert!(matches!(&config.engine, EngineConfig::Duplicity(DuplicityConfig { .. })));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_full_config() {
        let yaml = r#"
target_url: swift://backups
full_if_older_than: 1M
remove_older_than: 6M
no_verify: true
hostname: node-1
label_prefix: io.conplicity
volumes_blacklist: [tmp_cache]
container_timeout: 90m
engine:
  type: restic
  image: restic/restic:0.16.0
  password: repo-password
swift:
  username: user
  password: pass
  auth_url: https://auth.example.com/v2.0
  tenant_name: tenant
  region_name: region
"#;
        let config: BackupConfig = serde_yml::from_str(yaml).unwrap();
        assert_eq!(config.container_timeout, Duration::from_secs(90 * 60));
        assert_eq!(config.hostname.as_deref(), Some("node-1"));
        assert_eq!(config.swift.password.inner(), "pass");
        assert_eq!(config.label_key("no_verify"), "io.conplicity.no_verify");
        assert!(matches!(&config.engine, EngineConfig::Restic(_)));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_invalid_values_fail_validation() {
        let mut config = test_config();
        config.full_if_older_than = "thirty days".into();
        assert!(config.validate().is_err());

        let mut config = test_config();
        config.target_url = "/not/a/url".into();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_unknown_field_rejected() {
        let yaml = format!("{MINIMAL_YAML}\nunknown_field: 1\n");
        assert!(serde_yml::from_str::<BackupConfig>(&yaml).is_err());
    }

    #[test]
    fn test_serialize_redacts_secrets() {
        let yaml = format!(
            "{MINIMAL_YAML}aws:\n  access_key_id: AKIA\n  secret_access_key: topsecret\n"
        );
        let config: BackupConfig = serde_yml::from_str(&yaml).unwrap();
        let serialized = serde_yml::to_string(&config).unwrap();
        assert!(!serialized.contains("topsecret"));
        assert!(serialized.contains("AKIA"));
    }

    #[test]
    fn test_load_from_file() {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(MINIMAL_YAML.as_bytes()).unwrap();
        let config = BackupConfig::load(file.path()).unwrap();
        assert_eq!(config.target_url.as_ref(), "s3://s3-eu-west-1.amazonaws.com/backups");

        let mut bad = NamedTempFile::new().unwrap();
        bad.write_all(b"target_url: nope\nengine:\n  type: duplicity\n").unwrap();
        let err = BackupConfig::load(bad.path()).unwrap_err();
        assert!(err.to_string().contains("Config validation failed"));
    }
}
