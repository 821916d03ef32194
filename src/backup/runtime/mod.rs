//! Boundary to the container runtime.
//!
//! The pipeline only talks to [`ContainerRuntime`]; [`docker::DockerRuntime`]
//! is the implementation used in production.

pub mod docker;

use crate::backup::redacted::RedactedString;
use crate::backup::result_error::result::Result;
use crate::backup::volume::Volume;
use bon::Builder;
use getset::Getters;
use std::fmt::{Debug, Formatter};
use std::time::Duration;

/// Environment variable handed to a container.
#[derive(Clone, PartialEq, Eq)]
pub enum EnvVar {
    Plain { name: String, value: String },
    Secret { name: String, value: RedactedString },
}

impl EnvVar {
    pub fn plain<N: Into<String>, V: Into<String>>(name: N, value: V) -> Self {
        EnvVar::Plain {
            name: name.into(),
            value: value.into(),
        }
    }

    pub fn secret<N: Into<String>>(name: N, value: &RedactedString) -> Self {
        EnvVar::Secret {
            name: name.into(),
            value: value.clone(),
        }
    }

    pub fn name(&self) -> &str {
        match self {
            EnvVar::Plain { name, .. } | EnvVar::Secret { name, .. } => name,
        }
    }

    /// `NAME=value` as the runtime API expects it. Reveals secrets.
    pub fn to_assignment(&self) -> String {
        match self {
            EnvVar::Plain { name, value } => format!("{name}={value}"),
            EnvVar::Secret { name, value } => format!("{name}={}", value.inner()),
        }
    }
}

impl Debug for EnvVar {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            EnvVar::Plain { name, value } => write!(f, "{name}={value}"),
            EnvVar::Secret { name, value } => write!(f, "{name}={value:?}"),
        }
    }
}

/// Everything needed to create one ephemeral container.
#[derive(Clone, Debug, Builder, Getters, PartialEq, Eq)]
#[getset(get = "pub")]
pub struct ContainerSpec {
    #[builder(into)]
    image: String,
    #[builder(default)]
    cmd: Vec<String>,
    #[builder(default)]
    env: Vec<EnvVar>,
    /// `source:destination[:mode]` bind specifications
    #[builder(default)]
    binds: Vec<String>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ContainerStatus {
    Running,
    Exited(i64),
}

/// Operations of the container runtime API the pipeline relies on.
///
/// Implementations are shared between concurrently running pipelines.
pub trait ContainerRuntime: Send + Sync {
    /// Pulls `image` unless it is already present locally.
    fn ensure_image(&self, image: &str) -> Result<()>;

    /// Creates a container and returns its identifier.
    fn create(&self, spec: &ContainerSpec) -> Result<String>;

    fn start(&self, id: &str) -> Result<()>;

    /// Blocks until the container exits, for at most `timeout`.
    ///
    /// Returns the exit code, or [`Error::Timeout`](crate::backup::result_error::error::Error::Timeout).
    fn wait(&self, id: &str, timeout: Duration) -> Result<i64>;

    fn inspect(&self, id: &str) -> Result<ContainerStatus>;

    /// Combined stdout and stderr of an exited container.
    fn logs(&self, id: &str) -> Result<String>;

    /// Force-removes the container along with its anonymous volumes.
    fn remove(&self, id: &str) -> Result<()>;

    fn list_volumes(&self) -> Result<Vec<Volume>>;
}

#[cfg(test)]
pub(crate) mod fake {
    //! In-memory runtime recording every call, for pipeline tests.

    use super::*;
    use crate::backup::result_error::error::Error;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    #[derive(Clone, Debug, PartialEq, Eq)]
    pub enum Call {
        EnsureImage(String),
        Create(ContainerSpec),
        Start(String),
        Wait(String),
        Inspect(String),
        Logs(String),
        Remove(String),
    }

    /// Result of one container run as the fake should report it.
    #[derive(Clone, Debug)]
    pub struct Outcome {
        pub exit_code: i64,
        pub output: String,
    }

    type Responder = Box<dyn Fn(&ContainerSpec) -> Outcome + Send + Sync>;

    pub struct FakeRuntime {
        pub calls: Mutex<Vec<Call>>,
        pub volumes: Vec<Volume>,
        responder: Responder,
        outcomes: Mutex<Vec<(String, Outcome)>>,
        pub fail_pull: bool,
        pub fail_start: bool,
        /// Fails `start` only for containers whose first argument matches
        pub fail_start_for: Option<&'static str>,
        doomed: Mutex<Vec<String>>,
        pub fail_logs: bool,
        /// Number of `wait` calls that fail before exits are reported
        pub wait_failures: Mutex<usize>,
        pub never_exits: bool,
        /// Scripted inspect answers consumed before the real status is reported
        pub inspect_script: Mutex<VecDeque<ContainerStatus>>,
    }

    impl FakeRuntime {
        pub fn new<F: Fn(&ContainerSpec) -> Outcome + Send + Sync + 'static>(responder: F) -> Self {
            Self {
                calls: Mutex::new(vec![]),
                volumes: vec![],
                responder: Box::new(responder),
                outcomes: Mutex::new(vec![]),
                fail_pull: false,
                fail_start: false,
                fail_start_for: None,
                doomed: Mutex::new(vec![]),
                fail_logs: false,
                wait_failures: Mutex::new(0),
                never_exits: false,
                inspect_script: Mutex::new(VecDeque::new()),
            }
        }

        pub fn succeeding() -> Self {
            Self::new(|_| Outcome {
                exit_code: 0,
                output: String::new(),
            })
        }

        pub fn calls(&self) -> Vec<Call> {
            self.calls.lock().unwrap().clone()
        }

        /// Specs of all created containers, in creation order.
        pub fn created(&self) -> Vec<ContainerSpec> {
            self.calls()
                .into_iter()
                .filter_map(|c| match c {
                    Call::Create(spec) => Some(spec),
                    _ => None,
                })
                .collect()
        }

        pub fn removed(&self) -> Vec<String> {
            self.calls()
                .into_iter()
                .filter_map(|c| match c {
                    Call::Remove(id) => Some(id),
                    _ => None,
                })
                .collect()
        }

        fn record(&self, call: Call) {
            self.calls.lock().unwrap().push(call);
        }

        fn outcome(&self, id: &str) -> Outcome {
            self.outcomes
                .lock()
                .unwrap()
                .iter()
                .find(|(cid, _)| cid == id)
                .map(|(_, o)| o.clone())
                .unwrap()
        }
    }

    impl ContainerRuntime for FakeRuntime {
        fn ensure_image(&self, image: &str) -> Result<()> {
            self.record(Call::EnsureImage(image.to_string()));
            if self.fail_pull {
                return Err(std::io::Error::other("pull refused").into());
            }
            Ok(())
        }

        fn create(&self, spec: &ContainerSpec) -> Result<String> {
            self.record(Call::Create(spec.clone()));
            let mut outcomes = self.outcomes.lock().unwrap();
            let id = format!("container-{}", outcomes.len());
            outcomes.push((id.clone(), (self.responder)(spec)));
            let stage = spec.cmd().first().map(String::as_str);
            if self.fail_start_for.is_some() && stage == self.fail_start_for {
                self.doomed.lock().unwrap().push(id.clone());
            }
            Ok(id)
        }

        fn start(&self, id: &str) -> Result<()> {
            self.record(Call::Start(id.to_string()));
            if self.fail_start || self.doomed.lock().unwrap().iter().any(|d| d == id) {
                return Err(std::io::Error::other("start refused").into());
            }
            Ok(())
        }

        fn wait(&self, id: &str, timeout: Duration) -> Result<i64> {
            self.record(Call::Wait(id.to_string()));
            if self.never_exits {
                return Err(Error::Timeout {
                    container: id.to_string(),
                    timeout,
                });
            }
            let mut failures = self.wait_failures.lock().unwrap();
            if *failures > 0 {
                *failures -= 1;
                return Err(std::io::Error::other("connection reset").into());
            }
            Ok(self.outcome(id).exit_code)
        }

        fn inspect(&self, id: &str) -> Result<ContainerStatus> {
            self.record(Call::Inspect(id.to_string()));
            if let Some(status) = self.inspect_script.lock().unwrap().pop_front() {
                return Ok(status);
            }
            if self.never_exits {
                return Ok(ContainerStatus::Running);
            }
            Ok(ContainerStatus::Exited(self.outcome(id).exit_code))
        }

        fn logs(&self, id: &str) -> Result<String> {
            self.record(Call::Logs(id.to_string()));
            if self.fail_logs {
                return Err(std::io::Error::other("logs unavailable").into());
            }
            Ok(self.outcome(id).output)
        }

        fn remove(&self, id: &str) -> Result<()> {
            self.record(Call::Remove(id.to_string()));
            Ok(())
        }

        fn list_volumes(&self) -> Result<Vec<Volume>> {
            Ok(self.volumes.clone())
        }
    }
}
