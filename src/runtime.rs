use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use bollard::container::{
    Config, LogsOptions, RemoveContainerOptions, WaitContainerOptions,
};
use bollard::models::{HostConfig, Mount, MountTypeEnum};
use bollard::volume::RemoveVolumeOptions;
use bollard::Docker;
use futures_util::StreamExt;

use crate::error::{RuntimeError, RuntimeResult};

/// Everything the Orchestrator needs from a container runtime: accepts an
/// image, mounts, and a runtime name, and returns an exit code.
/// `BollardRuntime` is the only implementation; the trait
/// exists so job-scheduling logic can be tested without a Docker daemon.
#[async_trait]
pub trait ContainerRuntime: Send + Sync {
    async fn ensure_volume(&self, name: &str) -> RuntimeResult<()>;
    async fn remove_volume(&self, name: &str) -> RuntimeResult<()>;

    /// Runs `image` to completion with the given mounts and resource caps,
    /// waits up to `timeout`, and returns (exit_code, combined stdout+stderr).
    /// The container is always removed before returning, success or not.
    async fn run_to_completion(&self, spec: RunSpec<'_>) -> RuntimeResult<RunOutcome>;

    /// Spawns a long-lived container (used for the per-job ephemeral CAD
    /// sidecar) and returns its id without waiting on it.
    async fn spawn_detached(&self, spec: RunSpec<'_>) -> RuntimeResult<String>;
    async fn kill_and_remove(&self, container_id: &str);
}

pub struct VolumeMount<'a> {
    pub volume_name: &'a str,
    pub target: &'a str,
    pub read_only: bool,
    /// `true` mounts `volume_name` as a host path bind mount instead of a
    /// named Docker volume. The Orchestrator's stage volumes
    /// (input/output/status) are plain host directories; only the per-job
    /// work volume and the two sidecar exchange volumes are real Docker
    /// volumes.
    pub bind: bool,
}

pub struct RunSpec<'a> {
    pub image: &'a str,
    pub command: Option<Vec<&'a str>>,
    pub entrypoint: Option<Vec<&'a str>>,
    pub mounts: Vec<VolumeMount<'a>>,
    pub network_disabled: bool,
    pub read_only_rootfs: bool,
    pub memory_limit_bytes: Option<i64>,
    pub cpu_quota: Option<i64>,
    pub pids_limit: Option<i64>,
    pub tmpfs_size_bytes: Option<i64>,
    pub runtime: Option<&'a str>,
    pub timeout: Duration,
}

pub struct RunOutcome {
    pub exit_code: i64,
    pub logs: String,
    pub timed_out: bool,
}

pub struct BollardRuntime {
    docker: Docker,
}

impl BollardRuntime {
    pub fn connect() -> RuntimeResult<Self> {
        let docker = Docker::connect_with_local_defaults().map_err(RuntimeError::Docker)?;
        Ok(Self { docker })
    }

    fn host_config(spec: &RunSpec<'_>) -> HostConfig {
        let mounts = spec
            .mounts
            .iter()
            .map(|mount| Mount {
                target: Some(mount.target.to_string()),
                source: Some(mount.volume_name.to_string()),
                typ: Some(if mount.bind {
                    MountTypeEnum::BIND
                } else {
                    MountTypeEnum::VOLUME
                }),
                read_only: Some(mount.read_only),
                ..Default::default()
            })
            .collect();

        let mut tmpfs = HashMap::new();
        if let Some(size) = spec.tmpfs_size_bytes {
            tmpfs.insert("/tmp".to_string(), format!("size={size},mode=1777"));
        }

        HostConfig {
            mounts: Some(mounts),
            network_mode: if spec.network_disabled {
                Some("none".to_string())
            } else {
                None
            },
            readonly_rootfs: Some(spec.read_only_rootfs),
            memory: spec.memory_limit_bytes,
            cpu_quota: spec.cpu_quota,
            pids_limit: spec.pids_limit,
            tmpfs: if tmpfs.is_empty() { None } else { Some(tmpfs) },
            runtime: spec.runtime.map(|r| r.to_string()),
            ..Default::default()
        }
    }

    async fn create(&self, spec: &RunSpec<'_>) -> RuntimeResult<String> {
        let config = Config {
            image: Some(spec.image.to_string()),
            cmd: spec.command.as_ref().map(|cmd| cmd.iter().map(|s| s.to_string()).collect()),
            entrypoint: spec
                .entrypoint
                .as_ref()
                .map(|ep| ep.iter().map(|s| s.to_string()).collect()),
            host_config: Some(Self::host_config(spec)),
            ..Default::default()
        };

        let created = self
            .docker
            .create_container::<&str, String>(None, config)
            .await
            .map_err(RuntimeError::Docker)?;

        self.docker
            .start_container::<String>(&created.id, None)
            .await
            .map_err(RuntimeError::Docker)?;

        Ok(created.id)
    }

    async fn fetch_logs(&self, container_id: &str) -> String {
        let options = Some(LogsOptions::<String> {
            stdout: true,
            stderr: true,
            ..Default::default()
        });
        let mut stream = self.docker.logs(container_id, options);
        let mut out = String::new();
        while let Some(chunk) = stream.next().await {
            if let Ok(log) = chunk {
                out.push_str(&log.to_string());
            }
        }
        out
    }
}

#[async_trait]
impl ContainerRuntime for BollardRuntime {
    async fn ensure_volume(&self, name: &str) -> RuntimeResult<()> {
        if self.docker.inspect_volume(name).await.is_ok() {
            return Ok(());
        }
        let options = bollard::volume::CreateVolumeOptions {
            name: name.to_string(),
            ..Default::default()
        };
        self.docker
            .create_volume(options)
            .await
            .map_err(RuntimeError::Docker)?;
        Ok(())
    }

    async fn remove_volume(&self, name: &str) -> RuntimeResult<()> {
        let options = Some(RemoveVolumeOptions { force: true });
        match self.docker.remove_volume(name, options).await {
            Ok(()) => Ok(()),
            Err(bollard::errors::Error::DockerResponseServerError {
                status_code: 404, ..
            }) => Ok(()),
            Err(err) => Err(RuntimeError::Docker(err)),
        }
    }

    async fn run_to_completion(&self, spec: RunSpec<'_>) -> RuntimeResult<RunOutcome> {
        let timeout = spec.timeout;
        let container_id = self.create(&spec).await?;

        let wait_options = Some(WaitContainerOptions {
            condition: "not-running",
        });
        let mut waiter = self.docker.wait_container(&container_id, wait_options);

        let (exit_code, timed_out) =
            match tokio::time::timeout(timeout, waiter.next()).await {
                Ok(Some(Ok(result))) => (result.status_code, false),
                Ok(Some(Err(err))) => {
                    self.kill_and_remove(&container_id).await;
                    return Err(RuntimeError::Docker(err));
                }
                Ok(None) => (-1, false),
                Err(_) => (-1, true),
            };

        let logs = self.fetch_logs(&container_id).await;

        let remove_options = Some(RemoveContainerOptions {
            force: true,
            ..Default::default()
        });
        let _ = self.docker.remove_container(&container_id, remove_options).await;

        Ok(RunOutcome {
            exit_code,
            logs,
            timed_out,
        })
    }

    async fn spawn_detached(&self, spec: RunSpec<'_>) -> RuntimeResult<String> {
        self.create(&spec).await
    }

    async fn kill_and_remove(&self, container_id: &str) {
        let _ = self.docker.kill_container::<String>(container_id, None).await;
        let options = Some(RemoveContainerOptions {
            force: true,
            ..Default::default()
        });
        let _ = self.docker.remove_container(container_id, options).await;
    }
}
