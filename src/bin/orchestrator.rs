use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::signal::unix::{signal, SignalKind};
use tokio::time::sleep;
use tracing::{error, info, warn};

use pipeline_core::config::OrchestratorConfig;
use pipeline_core::init_tracing;
use pipeline_core::models::{DoneMarker, FailedMarker, JobMetadata};
use pipeline_core::runtime::{BollardRuntime, ContainerRuntime, RunSpec, VolumeMount};
use pipeline_core::stage::StageDir;

const CAD_EXTENSIONS: &[&str] = &["dwg", "dxf"];

#[tokio::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();
    init_tracing();

    let config = OrchestratorConfig::from_env()?;
    info!(
        component = "orchestrator",
        input_dir = %config.input_dir.display(),
        output_dir = %config.output_dir.display(),
        status_dir = %config.status_dir.display(),
        processor_image = %config.processor_image,
        "loaded orchestrator configuration"
    );

    let runtime = BollardRuntime::connect().context("failed to reach container runtime socket")?;

    let input = StageDir::new(config.input_dir.clone());
    let output = StageDir::new(config.output_dir.clone());
    let status = StageDir::new(config.status_dir.clone());
    for dir in [&input, &output, &status] {
        dir.ensure_exists().await?;
    }
    runtime.ensure_volume(&config.cad_sidecar_volume).await?;
    runtime.ensure_volume(&config.ocr_sidecar_volume).await?;

    let running = Arc::new(AtomicBool::new(true));
    spawn_signal_watcher(running.clone());

    info!(component = "orchestrator", "entering poll loop");
    while running.load(Ordering::SeqCst) {
        match input.list_with_suffix("ready").await {
            Ok(ready_hashes) => {
                for hash in ready_hashes {
                    if !running.load(Ordering::SeqCst) {
                        break;
                    }
                    if let Err(err) =
                        handle_job(&runtime, &config, &input, &output, &status, &hash).await
                    {
                        error!(component = "orchestrator", content_hash = %hash, error = %err, "job handling failed unexpectedly");
                    }
                }
            }
            Err(err) => {
                error!(component = "orchestrator", error = %err, "failed to list ready markers");
            }
        }
        sleep(config.poll_interval).await;
    }

    info!(component = "orchestrator", "shutdown signal observed, exiting");
    Ok(())
}

/// Drives one job from `.ready` to `.done`/`.failed`. Every exit path
/// removes the job's input artifacts, the job volume, and any CAD sidecar
/// container it spawned — that cleanup is inline below rather than in a
/// separate "on all exit paths" helper so there is exactly one place that
/// can forget it.
async fn handle_job(
    runtime: &BollardRuntime,
    config: &OrchestratorConfig,
    input: &StageDir,
    output: &StageDir,
    status: &StageDir,
    hash: &str,
) -> Result<()> {
    info!(component = "orchestrator", content_hash = %hash, "picked up ready job");

    let metadata: JobMetadata = match input.read_json(hash, "json").await {
        Ok(metadata) => metadata,
        Err(err) => {
            warn!(component = "orchestrator", content_hash = %hash, error = %err, "unreadable job metadata, failing job");
            write_failed(&status, hash, &format!("unreadable job metadata: {err}"), 0).await?;
            input.remove_all_with_stem_prefix(hash).await?;
            return Ok(());
        }
    };

    let job_volume = format!("job-{hash}");
    runtime.ensure_volume(&job_volume).await?;

    let result = run_job(runtime, config, input, output, &metadata, hash, &job_volume).await;

    if let Err(err) = &result {
        warn!(component = "orchestrator", content_hash = %hash, error = %err, "job failed");
        write_failed(&status, hash, &err.to_string(), metadata.try_count).await?;
    }

    let _ = runtime.remove_volume(&job_volume).await;
    input.remove_all_with_stem_prefix(hash).await?;
    Ok(())
}

async fn run_job(
    runtime: &BollardRuntime,
    config: &OrchestratorConfig,
    input: &StageDir,
    output: &StageDir,
    metadata: &JobMetadata,
    hash: &str,
    job_volume: &str,
) -> Result<()> {
    copy_inputs_into_job_volume(runtime, config, input, metadata, hash, job_volume).await?;

    let cad_container_id = if config.ephemeral_cad_sidecar
        && CAD_EXTENSIONS.contains(&metadata.original_extension.as_str())
    {
        Some(spawn_cad_sidecar(runtime, config).await?)
    } else {
        None
    };

    let processor_result = run_processor(runtime, config, job_volume).await;

    if let Some(container_id) = &cad_container_id {
        runtime.kill_and_remove(container_id).await;
    }
    let cad_sweep = StageDir::new(std::path::PathBuf::from(&config.cad_sidecar_volume));
    let _ = cad_sweep.remove_all_with_stem_prefix(hash).await;

    let outcome = processor_result?;

    if outcome.timed_out {
        anyhow::bail!("processor container exceeded {:?} timeout", config.job_timeout);
    }
    if outcome.exit_code != 0 {
        anyhow::bail!(
            "processor exited with code {} (expected 0 if a result file was written)",
            outcome.exit_code
        );
    }

    copy_outputs_to_stage(runtime, config, output, hash, job_volume, &outcome.logs).await?;

    let status = StageDir::new(config.status_dir.clone());
    status
        .write_json(
            hash,
            "done",
            &DoneMarker {
                content_hash: hash.to_string(),
                result_file: format!("{hash}.result.json"),
                thumbnail_file: Some(format!("{hash}.thumbnail.png")),
                log_file: Some(format!("{hash}.log")),
                try_count: metadata.try_count,
            },
        )
        .await?;

    Ok(())
}

async fn copy_inputs_into_job_volume(
    runtime: &BollardRuntime,
    config: &OrchestratorConfig,
    input: &StageDir,
    metadata: &JobMetadata,
    hash: &str,
    job_volume: &str,
) -> Result<()> {
    let ext = &metadata.original_extension;
    let input_host_dir = input.root().display().to_string();

    let script = format!(
        "cp /input_host/{hash}.bin /work/input.{ext} && cp /input_host/{hash}.json /work/job.json"
    );

    let outcome = runtime
        .run_to_completion(RunSpec {
            image: &config.copier_image,
            command: Some(vec!["sh", "-c", &script]),
            entrypoint: None,
            mounts: vec![
                VolumeMount {
                    volume_name: &input_host_dir,
                    target: "/input_host",
                    read_only: true,
                    bind: true,
                },
                VolumeMount {
                    volume_name: job_volume,
                    target: "/work",
                    read_only: false,
                    bind: false,
                },
            ],
            network_disabled: true,
            read_only_rootfs: false,
            memory_limit_bytes: None,
            cpu_quota: None,
            pids_limit: None,
            tmpfs_size_bytes: None,
            runtime: None,
            timeout: std::time::Duration::from_secs(30),
        })
        .await
        .context("copy-in container failed")?;

    if outcome.exit_code != 0 {
        anyhow::bail!("copy-in container exited with code {}", outcome.exit_code);
    }
    Ok(())
}

async fn spawn_cad_sidecar(runtime: &BollardRuntime, config: &OrchestratorConfig) -> Result<String> {
    let container_id = runtime
        .spawn_detached(RunSpec {
            image: &config.cad_sidecar_image,
            command: None,
            entrypoint: None,
            mounts: vec![VolumeMount {
                volume_name: &config.cad_sidecar_volume,
                target: "/cad-exchange",
                read_only: false,
                bind: false,
            }],
            network_disabled: true,
            read_only_rootfs: true,
            memory_limit_bytes: Some(config.cad_memory_limit_bytes),
            cpu_quota: None,
            pids_limit: Some(config.cad_pids_limit),
            tmpfs_size_bytes: Some(config.cad_tmpfs_size_bytes),
            runtime: config.sandbox_runtime.as_deref(),
            timeout: config.job_timeout,
        })
        .await
        .context("failed to spawn per-job cad sidecar")?;
    Ok(container_id)
}

async fn run_processor(
    runtime: &BollardRuntime,
    config: &OrchestratorConfig,
    job_volume: &str,
) -> Result<pipeline_core::runtime::RunOutcome> {
    let outcome = runtime
        .run_to_completion(RunSpec {
            image: &config.processor_image,
            command: None,
            entrypoint: None,
            mounts: vec![
                VolumeMount { volume_name: job_volume, target: "/work", read_only: false, bind: false },
                VolumeMount {
                    volume_name: &config.cad_sidecar_volume,
                    target: "/cad-exchange",
                    read_only: false,
                    bind: false,
                },
                VolumeMount {
                    volume_name: &config.ocr_sidecar_volume,
                    target: "/ocr-exchange",
                    read_only: false,
                    bind: false,
                },
            ],
            network_disabled: true,
            read_only_rootfs: true,
            memory_limit_bytes: Some(config.memory_limit_bytes),
            cpu_quota: Some(config.cpu_quota),
            pids_limit: Some(config.pids_limit),
            tmpfs_size_bytes: Some(config.tmpfs_size_bytes),
            runtime: config.sandbox_runtime.as_deref(),
            timeout: config.job_timeout,
        })
        .await
        .context("processor container failed to run")?;
    Ok(outcome)
}

async fn copy_outputs_to_stage(
    runtime: &BollardRuntime,
    config: &OrchestratorConfig,
    output: &StageDir,
    hash: &str,
    job_volume: &str,
    logs: &str,
) -> Result<()> {
    output.ensure_exists().await?;
    let output_host_dir = output.root().display().to_string();

    let script = format!(
        "cp /work/result.json /output_host/{hash}.result.json 2>/dev/null; \
         cp /work/thumbnail.png /output_host/{hash}.thumbnail.png 2>/dev/null; \
         true"
    );

    let outcome = runtime
        .run_to_completion(RunSpec {
            image: &config.copier_image,
            command: Some(vec!["sh", "-c", &script]),
            entrypoint: None,
            mounts: vec![
                VolumeMount { volume_name: job_volume, target: "/work", read_only: true, bind: false },
                VolumeMount {
                    volume_name: &output_host_dir,
                    target: "/output_host",
                    read_only: false,
                    bind: true,
                },
            ],
            network_disabled: true,
            read_only_rootfs: false,
            memory_limit_bytes: None,
            cpu_quota: None,
            pids_limit: None,
            tmpfs_size_bytes: None,
            runtime: None,
            timeout: std::time::Duration::from_secs(30),
        })
        .await
        .context("copy-out container failed")?;

    if outcome.exit_code != 0 {
        anyhow::bail!("copy-out container exited with code {}", outcome.exit_code);
    }

    output.write_text(hash, "log", logs).await?;

    let result_exists = output.exists(hash, "result.json").await;
    if !result_exists {
        anyhow::bail!("processor exited 0 but wrote no result.json");
    }

    Ok(())
}

async fn write_failed(status: &StageDir, hash: &str, error: &str, try_count: i32) -> Result<()> {
    status
        .write_json(
            hash,
            "failed",
            &FailedMarker {
                content_hash: hash.to_string(),
                error: error.to_string(),
                try_count,
            },
        )
        .await?;
    Ok(())
}

fn spawn_signal_watcher(running: Arc<AtomicBool>) {
    tokio::spawn(async move {
        let mut sigterm = match signal(SignalKind::terminate()) {
            Ok(sig) => sig,
            Err(err) => {
                warn!(component = "orchestrator", error = %err, "failed to install SIGTERM handler");
                return;
            }
        };
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {}
            _ = sigterm.recv() => {}
        }
        info!(component = "orchestrator", "received shutdown signal");
        running.store(false, Ordering::SeqCst);
    });
}
