//! Bindings to the external backup tools.
//!
//! An [`Engine`] knows the argument vectors of one tool and sequences its
//! stages for a single resolved volume. [`EngineConfig`] selects the tool, the
//! pipeline controller never names a concrete engine.

use crate::backup::backup_config::BackupConfig;
use crate::backup::engine::duplicity::{DuplicityConfig, DuplicityEngine};
use crate::backup::engine::restic::{ResticConfig, ResticEngine};
use crate::backup::metrics::Metric;
use crate::backup::pipeline::Handler;
use crate::backup::result_error::error::Error;
use crate::backup::result_error::result::Result;
use crate::backup::runtime::EnvVar;
use crate::backup::volume::ResolvedVolume;
use derive_more::From;
use serde::{Deserialize, Serialize};
use std::result;
use validator::{Validate, ValidationErrors};

pub mod duplicity;
pub mod restic;

/// Capabilities of a backup tool for one volume.
///
/// Only [`Engine::backup`] is mandatory, the other capabilities report
/// [`Error::Unsupported`] unless the tool implements them.
pub trait Engine {
    fn name(&self) -> &'static str;

    /// Runs the whole backup pipeline and returns its metrics in stage order.
    fn backup(&self) -> Result<Vec<Metric>>;

    fn restore(&self) -> Result<Vec<Metric>> {
        Err(Error::Unsupported {
            engine: self.name(),
            operation: "restore",
        })
    }

    fn verify(&self) -> Result<Vec<Metric>> {
        Err(Error::Unsupported {
            engine: self.name(),
            operation: "verify",
        })
    }

    fn status(&self) -> Result<Vec<Metric>> {
        Err(Error::Unsupported {
            engine: self.name(),
            operation: "status",
        })
    }
}

#[derive(Clone, From, Serialize, Deserialize, Debug)]
#[serde(tag = "type")]
#[serde(rename_all = "snake_case")]
#[serde(deny_unknown_fields)]
pub enum EngineConfig {
    Duplicity(DuplicityConfig),
    Restic(ResticConfig),
}

impl Validate for EngineConfig {
    fn validate(&self) -> result::Result<(), ValidationErrors> {
        match self {
            Self::Duplicity(inner) => inner.validate(),
            Self::Restic(inner) => inner.validate(),
        }
    }
}

impl EngineConfig {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Duplicity(_) => duplicity::ENGINE_NAME,
            Self::Restic(_) => restic::ENGINE_NAME,
        }
    }

    pub fn image(&self) -> &str {
        match self {
            Self::Duplicity(inner) => inner.image(),
            Self::Restic(inner) => inner.image(),
        }
    }

    /// Binds the configured tool to one volume of the current run.
    pub fn build<'a>(
        &'a self,
        handler: &'a Handler,
        volume: &'a ResolvedVolume,
    ) -> Box<dyn Engine + 'a> {
        match self {
            Self::Duplicity(config) => Box::new(DuplicityEngine::new(config, handler, volume)),
            Self::Restic(config) => Box::new(ResticEngine::new(config, handler, volume)),
        }
    }
}

/// Scheme components of a target, `boto3+s3://b` gives `["boto3", "s3"]`.
///
/// The scheme ends at the first `:` so restic's `s3:host/bucket` and
/// `swift:container:/path` forms are covered as well as URLs.
fn target_scheme(target: &str) -> Vec<&str> {
    target
        .split_once(':')
        .map(|(scheme, _)| scheme.split('+').collect())
        .unwrap_or_default()
}

/// Storage backend credentials for a container working on `target`.
///
/// Only the backend the target points at gets its credentials: `s3` schemes
/// (including `boto3+s3` and `s3+http`) receive the AWS keys and `swift`
/// schemes the Swift account.
pub fn credential_env(config: &BackupConfig, target: &str) -> Vec<EnvVar> {
    let scheme = target_scheme(target);
    let mut env = vec![];
    if scheme.contains(&"s3") {
        env.push(EnvVar::plain("AWS_ACCESS_KEY_ID", config.aws.access_key_id.as_str()));
        env.push(EnvVar::secret(
            "AWS_SECRET_ACCESS_KEY",
            &config.aws.secret_access_key,
        ));
    }
    if scheme.contains(&"swift") {
        let swift = &config.swift;
        env.push(EnvVar::plain("SWIFT_USERNAME", swift.username.as_str()));
        env.push(EnvVar::secret("SWIFT_PASSWORD", &swift.password));
        env.push(EnvVar::plain("SWIFT_AUTHURL", swift.auth_url.as_str()));
        env.push(EnvVar::plain("SWIFT_TENANTNAME", swift.tenant_name.as_str()));
        env.push(EnvVar::plain("SWIFT_REGIONNAME", swift.region_name.as_str()));
        env.push(EnvVar::plain("SWIFT_AUTHVERSION", "2"));
    }
    env
}

/// Logs non-zero exits of stages whose exit code is not exported.
pub(crate) fn warn_on_failure(stage: &str, volume: &str, exit_code: i64) {
    if exit_code != 0 {
        tracing::warn!(volume, exit_code, "{stage} exited with a non-zero code");
    }
}
