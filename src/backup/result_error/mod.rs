use derive_more::Display;
use std::fmt::Debug;
pub mod error;
pub mod result;

/// How far a failure reaches.
///
/// `Fatal` ends the pipeline of the volume being processed, `Error` is logged
/// and only drops the metrics of the step that failed.
#[derive(Clone, Copy, Debug, Display, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Severity {
    #[display("error")]
    Error,
    #[display("fatal")]
    Fatal,
}

pub trait WithDebugObjectAndFnName<S: Into<String>, O: Debug + 'static> {
    fn with_debug_object_and_fn_name(self, obj: O, fn_name: S) -> Self;
}

pub trait WithMsg<S: Into<String>> {
    fn with_msg(self, msg: S) -> Self;
}

pub trait WithSeverity {
    fn with_severity(self, severity: Severity) -> Self;
}
