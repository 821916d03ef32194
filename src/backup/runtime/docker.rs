use crate::backup::function_path;
use crate::backup::result_error::error::Error;
use crate::backup::result_error::result::Result;
use crate::backup::result_error::{WithDebugObjectAndFnName, WithMsg};
use crate::backup::runtime::{ContainerRuntime, ContainerSpec, ContainerStatus};
use crate::backup::volume::Volume;
use bollard::container::{
    Config, CreateContainerOptions, InspectContainerOptions, LogsOptions,
    RemoveContainerOptions, StartContainerOptions, WaitContainerOptions,
};
use bollard::errors::Error as BollardError;
use bollard::image::CreateImageOptions;
use bollard::models::{ContainerStateStatusEnum, HostConfig};
use bollard::volume::ListVolumesOptions;
use bollard::Docker;
use function_name::named;
use futures_util::{StreamExt, TryStreamExt};
use std::time::Duration;
use tokio::runtime::Runtime;

/// Slack added to the client request timeout so the container deadline fires
/// first.
static REQUEST_TIMEOUT_MARGIN: Duration = Duration::from_secs(60);

/// [`ContainerRuntime`] on top of the Docker Engine API.
///
/// The API client is asynchronous. Calls are driven to completion on an owned
/// tokio runtime, so pipelines keep a plain blocking call sequence.
pub struct DockerRuntime {
    docker: Docker,
    rt: Runtime,
}

impl DockerRuntime {
    /// Connects with the local defaults (`DOCKER_HOST` or the unix socket).
    ///
    /// Requests may block up to `container_timeout`, which matters for `wait`.
    pub fn connect(container_timeout: Duration) -> Result<Self> {
        let rt = tokio::runtime::Builder::new_multi_thread()
            .enable_all()
            .thread_name("docker-client")
            .build()?;
        let docker = Docker::connect_with_local_defaults()
            .map_err(Error::from)
            .with_msg("Failed to connect to the docker daemon")?
            .with_timeout(container_timeout + REQUEST_TIMEOUT_MARGIN);
        Ok(Self { docker, rt })
    }
}

fn is_not_found(e: &BollardError) -> bool {
    matches!(
        e,
        BollardError::DockerResponseServerError {
            status_code: 404,
            ..
        }
    )
}

impl ContainerRuntime for DockerRuntime {
    #[named]
    fn ensure_image(&self, image: &str) -> Result<()> {
        self.rt.block_on(async {
            match self.docker.inspect_image(image).await {
                Ok(_) => {
                    tracing::debug!(image, "Image already present");
                    return Ok(());
                }
                Err(e) if is_not_found(&e) => {}
                Err(e) => return Err(Error::from(e)),
            }

            tracing::info!(image, "Pulling image");
            let options = CreateImageOptions {
                from_image: image,
                ..Default::default()
            };
            self.docker
                .create_image(Some(options), None, None)
                .try_for_each(|info| async move {
                    if let Some(status) = info.status {
                        tracing::debug!("{status}");
                    }
                    Ok(())
                })
                .await
                .map_err(Error::from)
        })
        .with_debug_object_and_fn_name(image.to_string(), function_path!())
    }

    #[named]
    fn create(&self, spec: &ContainerSpec) -> Result<String> {
        let config = Config {
            image: Some(spec.image().clone()),
            cmd: Some(spec.cmd().clone()),
            env: Some(spec.env().iter().map(|e| e.to_assignment()).collect()),
            open_stdin: Some(true),
            stdin_once: Some(true),
            attach_stdin: Some(true),
            attach_stdout: Some(true),
            attach_stderr: Some(true),
            tty: Some(true),
            host_config: Some(HostConfig {
                binds: Some(spec.binds().clone()),
                ..Default::default()
            }),
            ..Default::default()
        };

        self.rt
            .block_on(
                self.docker
                    .create_container(None::<CreateContainerOptions<String>>, config),
            )
            .map(|response| {
                for warning in response.warnings {
                    tracing::warn!(container = %response.id, "{warning}");
                }
                response.id
            })
            .map_err(Error::from)
            .with_debug_object_and_fn_name(spec.clone(), function_path!())
    }

    #[named]
    fn start(&self, id: &str) -> Result<()> {
        self.rt
            .block_on(
                self.docker
                    .start_container(id, None::<StartContainerOptions<String>>),
            )
            .map_err(Error::from)
            .with_debug_object_and_fn_name(id.to_string(), function_path!())
    }

    #[named]
    fn wait(&self, id: &str, timeout: Duration) -> Result<i64> {
        let options = WaitContainerOptions {
            condition: "not-running",
        };
        let waited = self.rt.block_on(async {
            let mut stream = Box::pin(self.docker.wait_container(id, Some(options)));
            tokio::time::timeout(timeout, stream.next()).await
        });

        match waited {
            Err(_elapsed) => Err(Error::Timeout {
                container: id.to_string(),
                timeout,
            }),
            Ok(Some(Ok(response))) => Ok(response.status_code),
            // Non-zero exits surface as an error carrying the exit code
            Ok(Some(Err(BollardError::DockerContainerWaitError { code, .. }))) => Ok(code),
            Ok(Some(Err(e))) => Err(Error::from(e)),
            Ok(None) => Err(Error::from(std::io::Error::other(
                "wait stream ended without a status",
            ))),
        }
        .with_debug_object_and_fn_name(id.to_string(), function_path!())
    }

    #[named]
    fn inspect(&self, id: &str) -> Result<ContainerStatus> {
        self.rt
            .block_on(
                self.docker
                    .inspect_container(id, None::<InspectContainerOptions>),
            )
            .map(|response| {
                let state = response.state.unwrap_or_default();
                match state.status {
                    Some(ContainerStateStatusEnum::EXITED)
                    | Some(ContainerStateStatusEnum::DEAD) => {
                        ContainerStatus::Exited(state.exit_code.unwrap_or_default())
                    }
                    _ => ContainerStatus::Running,
                }
            })
            .map_err(Error::from)
            .with_debug_object_and_fn_name(id.to_string(), function_path!())
    }

    #[named]
    fn logs(&self, id: &str) -> Result<String> {
        let options = LogsOptions::<String> {
            stdout: true,
            stderr: true,
            follow: false,
            tail: "all".to_string(),
            ..Default::default()
        };
        self.rt
            .block_on(async {
                self.docker
                    .logs(id, Some(options))
                    .try_fold(String::new(), |mut acc, chunk| async move {
                        acc.push_str(&String::from_utf8_lossy(&chunk.into_bytes()));
                        Ok(acc)
                    })
                    .await
            })
            .map_err(Error::from)
            .with_debug_object_and_fn_name(id.to_string(), function_path!())
    }

    #[named]
    fn remove(&self, id: &str) -> Result<()> {
        let options = RemoveContainerOptions {
            force: true,
            v: true,
            ..Default::default()
        };
        self.rt
            .block_on(self.docker.remove_container(id, Some(options)))
            .map_err(Error::from)
            .with_debug_object_and_fn_name(id.to_string(), function_path!())
    }

    #[named]
    fn list_volumes(&self) -> Result<Vec<Volume>> {
        self.rt
            .block_on(
                self.docker
                    .list_volumes(None::<ListVolumesOptions<String>>),
            )
            .map(|response| {
                response
                    .volumes
                    .unwrap_or_default()
                    .into_iter()
                    .map(|v| {
                        Volume::builder()
                            .name(v.name)
                            .driver(v.driver)
                            .mountpoint(v.mountpoint)
                            .labels(v.labels)
                            .build()
                    })
                    .collect()
            })
            .map_err(Error::from)
            .with_debug_object_and_fn_name((), function_path!())
    }
}
