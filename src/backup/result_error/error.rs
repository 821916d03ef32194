use crate::backup::result_error::{Severity, WithDebugObjectAndFnName, WithMsg, WithSeverity};
use itertools::Itertools;
use std::fmt::Debug;
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Bollard(#[from] bollard::errors::Error),
    #[error(transparent)]
    ValidationError(#[from] validator::ValidationErrors),
    #[error(transparent)]
    ThreadPoolBuildError(#[from] rayon::ThreadPoolBuildError),
    #[error(transparent)]
    SerdeYml(#[from] serde_yml::Error),
    #[error(transparent)]
    SerdeJson(#[from] serde_json::Error),
    #[error(transparent)]
    DateParse(#[from] chrono::ParseError),
    #[error(transparent)]
    Persist(#[from] tempfile::PersistError),
    #[error(transparent)]
    EmailBuild(#[from] lettre::error::Error),
    #[error(transparent)]
    SmtpTransport(#[from] lettre::transport::smtp::Error),
    #[error("SMTP server rejected message: {0}")]
    SmtpSendError(String),
    #[error("Missing {field:?} in {tool} output")]
    MissingField {
        tool: &'static str,
        field: &'static str,
    },
    #[error("{engine} engine does not support {operation}")]
    Unsupported {
        engine: &'static str,
        operation: &'static str,
    },
    #[error("Container {container} did not exit within {}", format_duration(.timeout))]
    Timeout {
        container: String,
        timeout: Duration,
    },
    #[error("Volume not found: {0}")]
    VolumeNotFound(String),
    #[error("{}:\n{}", msg, indent::indent_all_with("  ", error.to_string()))]
    WithMsg { msg: String, error: Box<Error> },
    #[error("{:?} {} failed:\n{}", obj_debug, fn_name, indent::indent_all_with("  ", error.to_string()))]
    WithDebugObjAndFnName {
        error: Box<Error>,
        obj_debug: Box<dyn Debug + Send>,
        fn_name: String,
    },
    #[error("[{severity}] {error}")]
    WithSeverity { severity: Severity, error: Box<Error> },
    #[error("{}", itertools::join(.0, "\n\n"))]
    LotsOfError(Vec<Error>),
}

fn format_duration(duration: &Duration) -> humantime_serde::re::humantime::FormattedDuration {
    humantime_serde::re::humantime::format_duration(*duration)
}

impl<S: Into<String>, O: Debug + Send + 'static> WithDebugObjectAndFnName<S, O> for Error {
    fn with_debug_object_and_fn_name(self, obj: O, fn_name: S) -> Self {
        Error::WithDebugObjAndFnName {
            error: Box::new(self),
            obj_debug: Box::new(obj),
            fn_name: fn_name.into(),
        }
    }
}

impl<S: Into<String>> WithMsg<S> for Error {
    fn with_msg(self, msg: S) -> Self {
        Self::WithMsg {
            msg: msg.into(),
            error: Box::new(self),
        }
    }
}

impl WithSeverity for Error {
    fn with_severity(self, severity: Severity) -> Self {
        Self::WithSeverity {
            severity,
            error: Box::new(self),
        }
    }
}

impl From<Vec<Error>> for Error {
    fn from(errors: Vec<Error>) -> Self {
        if errors.is_empty() {
            panic!("Should not create lots of errors when error is empty")
        }
        Self::LotsOfError(errors.into_iter().flat_map(|e| e.into_iter()).collect_vec())
    }
}

impl Error {
    pub fn into_iter(self) -> Box<dyn Iterator<Item = Error>> {
        match self {
            Error::LotsOfError(v) => Box::new(v.into_iter().flat_map(|e| e.into_iter())),
            e => Box::new(std::iter::once(e)),
        }
    }

    pub fn chain(self, other: Error) -> Error {
        Error::LotsOfError(self.into_iter().chain(other.into_iter()).collect_vec())
    }

    /// Outermost severity tag. Untagged errors are fatal, an aggregate is fatal
    /// as soon as one of its members is.
    pub fn severity(&self) -> Severity {
        match self {
            Error::WithSeverity { severity, .. } => *severity,
            Error::WithMsg { error, .. } | Error::WithDebugObjAndFnName { error, .. } => {
                error.severity()
            }
            Error::LotsOfError(errors) => errors
                .iter()
                .map(Error::severity)
                .max()
                .unwrap_or(Severity::Fatal),
            _ => Severity::Fatal,
        }
    }

    pub fn is_timeout(&self) -> bool {
        match self {
            Error::Timeout { .. } => true,
            Error::WithSeverity { error, .. }
            | Error::WithMsg { error, .. }
            | Error::WithDebugObjAndFnName { error, .. } => error.is_timeout(),
            _ => false,
        }
    }
}
