use crate::backup::engine::{credential_env, warn_on_failure, Engine};
use crate::backup::function_path;
use crate::backup::launcher::{launch, OperationResult};
use crate::backup::metrics::{Metric, MetricKind};
use crate::backup::parse::parse_collection_status;
use crate::backup::pipeline::Handler;
use crate::backup::result_error::result::{Result, TolerateErrors};
use crate::backup::result_error::WithMsg;
use crate::backup::runtime::ContainerSpec;
use crate::backup::validate::validate_image_ref;
use crate::backup::volume::ResolvedVolume;
use function_name::named;
use getset::Getters;
use serde::{Deserialize, Serialize};
use validator::Validate;

pub static ENGINE_NAME: &str = "duplicity";
pub static DEFAULT_IMAGE: &str = "camptocamp/duplicity:latest";
/// Named volume holding duplicity's archive dir, shared by all runs.
pub static CACHE_MOUNT: &str = "duplicity_cache:/root/.cache/duplicity";

#[derive(Clone, Debug, Serialize, Deserialize, Validate, Getters)]
#[serde(deny_unknown_fields)]
#[getset(get = "pub")]
pub struct DuplicityConfig {
    #[serde(default = "default_image")]
    #[validate(custom(function = validate_image_ref))]
    image: String,
}

fn default_image() -> String {
    DEFAULT_IMAGE.to_string()
}

impl Default for DuplicityConfig {
    fn default() -> Self {
        Self {
            image: default_image(),
        }
    }
}

pub struct DuplicityEngine<'a> {
    config: &'a DuplicityConfig,
    handler: &'a Handler,
    volume: &'a ResolvedVolume,
}

impl<'a> DuplicityEngine<'a> {
    pub fn new(
        config: &'a DuplicityConfig,
        handler: &'a Handler,
        volume: &'a ResolvedVolume,
    ) -> Self {
        Self {
            config,
            handler,
            volume,
        }
    }

    /// Options passed to every duplicity action.
    fn args<I: IntoIterator<Item = S>, S: Into<String>>(&self, action: I) -> Vec<String> {
        let mut args: Vec<String> = action.into_iter().map(Into::into).collect();
        args.extend(
            [
                "--s3-use-new-style",
                "--ssh-options",
                "-oStrictHostKeyChecking=no",
                "--no-encryption",
            ]
            .map(String::from),
        );
        args
    }

    fn run(&self, cmd: Vec<String>, binds: Vec<String>) -> Result<OperationResult> {
        let spec = ContainerSpec::builder()
            .image(self.config.image.as_str())
            .cmd(cmd)
            .env(credential_env(self.handler.config(), self.volume.target()))
            .binds(binds)
            .build();
        launch(
            self.handler.runtime().as_ref(),
            &spec,
            self.handler.config().container_timeout,
        )
    }

    fn metric(&self, kind: MetricKind, value: i64) -> Metric {
        Metric::new(self.volume.name(), kind, value)
    }

    fn run_backup(&self) -> Result<Vec<Metric>> {
        let v = self.volume;
        tracing::debug!(
            volume = %v.name(),
            backup_dir = %v.backup_dir(),
            full_if_older_than = %v.full_if_older_than(),
            target = %v.target(),
            mount = %v.mount(),
            "Starting volume backup"
        );

        let mut cmd = self.args(["--full-if-older-than", v.full_if_older_than().as_str()]);
        cmd.extend(
            [
                "--allow-source-mismatch",
                "--name",
                v.name(),
                v.backup_dir().as_str(),
                v.target().as_str(),
            ]
            .map(String::from),
        );
        let result = self.run(cmd, vec![v.mount().clone(), CACHE_MOUNT.to_string()])?;
        Ok(vec![self.metric(MetricKind::BackupExitCode, result.exit_code)])
    }

    fn remove_older_than(&self) -> Result<()> {
        let v = self.volume;
        let mut cmd = self.args(["remove-older-than", v.remove_older_than().as_str()]);
        cmd.extend(["--force", "--name", v.name(), v.target().as_str()].map(String::from));
        let result = self.run(cmd, vec![CACHE_MOUNT.to_string()])?;
        warn_on_failure("remove-older-than", v.name(), result.exit_code);
        Ok(())
    }

    fn cleanup(&self) -> Result<()> {
        let v = self.volume;
        let mut cmd = self.args(["cleanup"]);
        cmd.extend(
            [
                "--force",
                "--extra-clean",
                "--name",
                v.name(),
                v.target().as_str(),
            ]
            .map(String::from),
        );
        let result = self.run(cmd, vec![CACHE_MOUNT.to_string()])?;
        warn_on_failure("cleanup", v.name(), result.exit_code);
        Ok(())
    }
}

impl Engine for DuplicityEngine<'_> {
    fn name(&self) -> &'static str {
        ENGINE_NAME
    }

    /// Backup, retention, cleanup, verification unless disabled, then status.
    ///
    /// Status failures of [`Severity::Error`](crate::backup::result_error::Severity::Error)
    /// only drop the two timestamp metrics.
    #[named]
    fn backup(&self) -> Result<Vec<Metric>> {
        let v = self.volume;
        tracing::info!(
            volume = %v.name(),
            driver = %v.volume().driver(),
            mountpoint = %v.volume().mountpoint(),
            "Creating duplicity container"
        );

        let mut metrics = self
            .run_backup()
            .with_msg(format!("Failed to backup volume {}", v.name()))?;

        self.remove_older_than()
            .with_msg(format!("Failed to remove old backups for volume {}", v.name()))?;

        self.cleanup().with_msg(format!(
            "Failed to cleanup extraneous duplicity files for volume {}",
            v.name()
        ))?;

        if *v.no_verify() {
            tracing::info!(volume = %v.name(), "Skipping verification");
        } else {
            metrics.extend(
                self.verify()
                    .with_msg(format!("Failed to verify backup for volume {}", v.name()))?,
            );
        }

        let status = self
            .status()
            .with_msg(format!("Failed to retrieve last backup info for volume {}", v.name()))
            .tolerate_errors(function_path!())?;
        metrics.extend(status.unwrap_or_default());

        Ok(metrics)
    }

    /// Restores the latest backup over the volume content.
    fn restore(&self) -> Result<Vec<Metric>> {
        let v = self.volume;
        tracing::info!(volume = %v.name(), target = %v.target(), "Restoring volume");
        let mut cmd = self.args(["restore"]);
        cmd.extend(
            [
                "--force",
                "--name",
                v.name(),
                v.target().as_str(),
                v.backup_dir().as_str(),
            ]
            .map(String::from),
        );
        let result = self
            .run(cmd, vec![v.rw_mount(), CACHE_MOUNT.to_string()])
            .with_msg(format!("Failed to restore volume {}", v.name()))?;
        Ok(vec![self.metric(MetricKind::RestoreExitCode, result.exit_code)])
    }

    /// Compares the backup against the source, the exit code is the verdict.
    fn verify(&self) -> Result<Vec<Metric>> {
        let v = self.volume;
        let mut cmd = self.args(["verify"]);
        cmd.extend(
            [
                "--allow-source-mismatch",
                "--name",
                v.name(),
                v.target().as_str(),
                v.backup_dir().as_str(),
            ]
            .map(String::from),
        );
        let result = self.run(cmd, vec![v.mount().clone(), CACHE_MOUNT.to_string()])?;
        Ok(vec![self.metric(MetricKind::VerifyExitCode, result.exit_code)])
    }

    fn status(&self) -> Result<Vec<Metric>> {
        let v = self.volume;
        let mut cmd = self.args(["collection-status"]);
        cmd.extend(["--name", v.name(), v.target().as_str()].map(String::from));
        let result = self.run(cmd, vec![v.mount().clone(), CACHE_MOUNT.to_string()])?;

        let status = parse_collection_status(&result.output)?;
        Ok(vec![
            self.metric(MetricKind::LastBackup, status.chain_end_time.timestamp()),
            self.metric(MetricKind::LastFullBackup, status.last_full_backup.timestamp()),
        ])
    }
}
