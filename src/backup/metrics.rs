//! Prometheus text exposition of pipeline results.

use crate::backup::function_path;
use crate::backup::result_error::error::Error;
use crate::backup::result_error::result::Result;
use crate::backup::result_error::{WithDebugObjectAndFnName, WithMsg};
use derive_more::Display;
use function_name::named;
use std::fmt::{Display, Formatter};
use std::io::Write;
use std::path::Path;
use std::sync::Arc;
use tempfile::NamedTempFile;

pub static METRIC_NAME: &str = "volume_backup";

#[derive(Clone, Copy, Debug, Display, PartialEq, Eq, Hash)]
pub enum MetricKind {
    #[display("backupExitCode")]
    BackupExitCode,
    #[display("verifyExitCode")]
    VerifyExitCode,
    #[display("restoreExitCode")]
    RestoreExitCode,
    /// Chain end time, in Unix seconds
    #[display("lastBackup")]
    LastBackup,
    #[display("lastFullBackup")]
    LastFullBackup,
}

/// One sample line: `volume_backup{volume="<v>",what="<kind>"} <value>`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Metric {
    pub volume: Arc<str>,
    pub kind: MetricKind,
    pub value: i64,
}

impl Metric {
    pub fn new<V: Into<Arc<str>>>(volume: V, kind: MetricKind, value: i64) -> Self {
        Self {
            volume: volume.into(),
            kind,
            value,
        }
    }
}

fn escape_label_value(value: &str) -> String {
    value
        .replace('\\', "\\\\")
        .replace('"', "\\\"")
        .replace('\n', "\\n")
}

impl Display for Metric {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{METRIC_NAME}{{volume=\"{}\",what=\"{}\"}} {}",
            escape_label_value(&self.volume),
            self.kind,
            self.value
        )
    }
}

/// Replaces `path` with the given metric lines.
///
/// Lines are written to a temporary file next to `path` which is then renamed
/// over it, so a textfile collector never reads a partial file.
#[named]
pub fn write_textfile<P: AsRef<Path>>(path: P, metrics: &[Metric]) -> Result<()> {
    let path = path.as_ref();
    let dir = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or(Path::new("."));

    let write = || -> Result<()> {
        let mut file = NamedTempFile::new_in(dir)?;
        for metric in metrics {
            writeln!(file, "{metric}")?;
        }
        file.flush()?;
        file.persist(path).map_err(Error::from)?;
        Ok(())
    };

    write()
        .map(|_| tracing::debug!("Wrote {} metrics to {:?}", metrics.len(), path))
        .with_msg(format!("Failed to write metrics to {:?}", path))
        .with_debug_object_and_fn_name(path.to_path_buf(), function_path!())
}
