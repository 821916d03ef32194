use crate::backup::engine::{credential_env, Engine};
use crate::backup::launcher::{launch, OperationResult};
use crate::backup::metrics::{Metric, MetricKind};
use crate::backup::parse::parse_restic_summary;
use crate::backup::pipeline::Handler;
use crate::backup::redacted::RedactedString;
use crate::backup::result_error::result::Result;
use crate::backup::result_error::WithMsg;
use crate::backup::runtime::{ContainerSpec, EnvVar};
use crate::backup::validate::validate_image_ref;
use crate::backup::volume::ResolvedVolume;
use getset::Getters;
use serde::{Deserialize, Serialize};
use validator::{Validate, ValidationError};

pub static ENGINE_NAME: &str = "restic";
pub static DEFAULT_IMAGE: &str = "restic/restic:latest";

#[derive(Clone, Debug, Serialize, Deserialize, Validate, Getters)]
#[serde(deny_unknown_fields)]
#[getset(get = "pub")]
pub struct ResticConfig {
    #[serde(default = "default_image")]
    #[validate(custom(function = validate_image_ref))]
    image: String,
    /// Repository password, handed over as `RESTIC_PASSWORD`
    #[validate(custom(function = validate_password))]
    password: RedactedString,
}

fn default_image() -> String {
    DEFAULT_IMAGE.to_string()
}

fn validate_password(password: &RedactedString) -> std::result::Result<(), ValidationError> {
    if password.is_empty() {
        return Err(ValidationError::new("restic repository password must not be empty"));
    }
    Ok(())
}

/// Backup only binding to restic. Each volume gets its own repository at the
/// volume target.
pub struct ResticEngine<'a> {
    config: &'a ResticConfig,
    handler: &'a Handler,
    volume: &'a ResolvedVolume,
}

impl<'a> ResticEngine<'a> {
    pub fn new(config: &'a ResticConfig, handler: &'a Handler, volume: &'a ResolvedVolume) -> Self {
        Self {
            config,
            handler,
            volume,
        }
    }

    fn args(&self, command: &[&str]) -> Vec<String> {
        ["--no-cache", "--json", "-r", self.volume.target().as_str()]
            .iter()
            .chain(command)
            .map(|s| s.to_string())
            .collect()
    }

    fn run(&self, cmd: Vec<String>) -> Result<OperationResult> {
        let mut env = vec![EnvVar::secret("RESTIC_PASSWORD", &self.config.password)];
        env.extend(credential_env(self.handler.config(), self.volume.target()));
        let spec = ContainerSpec::builder()
            .image(self.config.image.as_str())
            .cmd(cmd)
            .env(env)
            .binds(vec![self.volume.mount().clone()])
            .build();
        launch(
            self.handler.runtime().as_ref(),
            &spec,
            self.handler.config().container_timeout,
        )
    }

    /// Creates the repository. Fails on an existing one, which is expected on
    /// every run after the first.
    fn init(&self) -> Result<()> {
        let result = self.run(self.args(&["init"]))?;
        if result.exit_code != 0 {
            tracing::info!(
                volume = %self.volume.name(),
                exit_code = result.exit_code,
                "Repository not initialized, assuming it already exists"
            );
        }
        Ok(())
    }
}

impl Engine for ResticEngine<'_> {
    fn name(&self) -> &'static str {
        ENGINE_NAME
    }

    fn backup(&self) -> Result<Vec<Metric>> {
        let v = self.volume;
        tracing::info!(volume = %v.name(), target = %v.target(), "Creating restic container");

        self.init()
            .with_msg(format!("Failed to initialize repository for volume {}", v.name()))?;

        let hostname: &str = self.handler.hostname();
        let result = self
            .run(self.args(&["backup", v.backup_dir().as_str(), "--host", hostname]))
            .with_msg(format!("Failed to backup volume {}", v.name()))?;

        match parse_restic_summary(&result.output) {
            Ok(summary) => tracing::info!(
                volume = %v.name(),
                snapshot = summary.snapshot_id.as_deref().unwrap_or("-"),
                files_new = summary.files_new,
                files_changed = summary.files_changed,
                data_added = summary.data_added,
                "Backup finished"
            ),
            Err(e) => tracing::warn!(volume = %v.name(), "No backup summary: {e}"),
        }

        Ok(vec![Metric::new(
            v.name(),
            MetricKind::BackupExitCode,
            result.exit_code,
        )])
    }
}
