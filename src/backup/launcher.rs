//! Runs one pipeline stage as an ephemeral container.
//!
//! Each call pulls the image if needed, creates and starts exactly one
//! container, waits for it to exit within the configured timeout, collects its
//! output and removes it again, whatever happens in between.

use crate::backup::function_path;
use crate::backup::result_error::error::Error;
use crate::backup::result_error::result::{Result, TolerateErrors};
use crate::backup::result_error::{Severity, WithMsg, WithSeverity};
use crate::backup::runtime::{ContainerRuntime, ContainerSpec, ContainerStatus};
use function_name::named;
use itertools::Itertools;
use std::time::{Duration, Instant};

static INITIAL_POLL_DELAY: Duration = Duration::from_millis(100);
static MAX_POLL_DELAY: Duration = Duration::from_secs(10);

/// Exit code and combined output of one finished container.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OperationResult {
    pub exit_code: i64,
    pub output: String,
}

/// Removes the wrapped container when dropped.
struct ContainerGuard<'a> {
    runtime: &'a dyn ContainerRuntime,
    id: String,
}

impl Drop for ContainerGuard<'_> {
    fn drop(&mut self) {
        tracing::debug!(container = %self.id, "Removing container");
        if let Err(e) = self.runtime.remove(&self.id) {
            tracing::error!(container = %self.id, "Failed to remove container: {e}");
        }
    }
}

/// Runs `spec` to completion.
///
/// Pull, create, start and wait failures are fatal. Log retrieval failures
/// are logged and yield an empty output.
#[named]
pub fn launch(
    runtime: &dyn ContainerRuntime,
    spec: &ContainerSpec,
    timeout: Duration,
) -> Result<OperationResult> {
    runtime
        .ensure_image(spec.image())
        .with_msg(format!("Failed to pull image {}", spec.image()))
        .with_severity(Severity::Fatal)?;

    tracing::debug!(
        image = %spec.image(),
        command = %spec.cmd().join(" "),
        environment = ?spec.env(),
        binds = %spec.binds().iter().join(", "),
        "Creating container"
    );
    let id = runtime
        .create(spec)
        .with_msg("Failed to create container")
        .with_severity(Severity::Fatal)?;
    let container = ContainerGuard {
        runtime,
        id: id.clone(),
    };

    tracing::debug!(container = %id, "Launching '{}'", spec.cmd().join(" "));
    runtime
        .start(&container.id)
        .with_msg("Failed to start container")
        .with_severity(Severity::Fatal)?;

    let exit_code = wait_for_exit(runtime, &container.id, timeout)?;

    let output = runtime
        .logs(&container.id)
        .with_msg(format!("Failed to retrieve logs of container {}", container.id))
        .with_severity(Severity::Error)
        .tolerate_errors(function_path!())?
        .unwrap_or_default();
    tracing::debug!(container = %id, exit_code, "{output}");

    Ok(OperationResult { exit_code, output })
}

/// Blocks until the container exits or `timeout` elapses.
///
/// Uses the runtime's blocking wait. When a wait call fails for another
/// reason than the deadline, falls back to inspecting the container with
/// exponential backoff.
fn wait_for_exit(runtime: &dyn ContainerRuntime, id: &str, timeout: Duration) -> Result<i64> {
    let deadline = Instant::now() + timeout;
    let mut delay = INITIAL_POLL_DELAY;

    loop {
        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            return Err::<i64, _>(Error::Timeout {
                container: id.to_string(),
                timeout,
            })
            .with_msg("Operation timed out")
            .with_severity(Severity::Fatal);
        }

        match runtime.wait(id, remaining) {
            Ok(code) => return Ok(code),
            Err(e) if e.is_timeout() => {
                return Err::<i64, _>(e)
                    .with_msg("Operation timed out")
                    .with_severity(Severity::Fatal)
            }
            Err(e) => tracing::error!(container = %id, "Failed to wait for container: {e}"),
        }

        match runtime.inspect(id) {
            Ok(ContainerStatus::Exited(code)) => return Ok(code),
            Ok(ContainerStatus::Running) => {}
            Err(e) => tracing::error!(container = %id, "Failed to inspect container: {e}"),
        }

        std::thread::sleep(delay.min(deadline.saturating_duration_since(Instant::now())));
        delay = (delay * 2).min(MAX_POLL_DELAY);
    }
}
