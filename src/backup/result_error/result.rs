use crate::backup::result_error::error::Error;
use crate::backup::result_error::{Severity, WithDebugObjectAndFnName, WithMsg, WithSeverity};
use std::fmt::{Debug, Display};

pub type Result<T> = std::result::Result<T, Error>;

impl<S: Into<String>, O: Debug + Send + 'static, R> WithDebugObjectAndFnName<S, O> for Result<R> {
    fn with_debug_object_and_fn_name(self, obj: O, fn_name: S) -> Self {
        self.map_err(|e| e.with_debug_object_and_fn_name(obj, fn_name))
    }
}

impl<R, S: Into<String>> WithMsg<S> for Result<R> {
    fn with_msg(self, msg: S) -> Self {
        self.map_err(|e| e.with_msg(msg))
    }
}

impl<R> WithSeverity for Result<R> {
    fn with_severity(self, severity: Severity) -> Self {
        self.map_err(|e| e.with_severity(severity))
    }
}

/// Halt-or-continue decision for one step of a pipeline.
pub trait TolerateErrors<T> {
    /// Fatal errors are returned as is. Errors of [`Severity::Error`] are logged
    /// with `context` and turned into `Ok(None)`.
    fn tolerate_errors<D: Display>(self, context: D) -> Result<Option<T>>;
}

impl<T> TolerateErrors<T> for Result<T> {
    fn tolerate_errors<D: Display>(self, context: D) -> Result<Option<T>> {
        match self {
            Ok(v) => Ok(Some(v)),
            Err(e) => match e.severity() {
                Severity::Fatal => Err(e),
                Severity::Error => {
                    tracing::error!("{context}: {e}");
                    Ok(None)
                }
            },
        }
    }
}

pub fn convert_error_vec(errors: Vec<Error>) -> Result<()> {
    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors.into())
    }
}
