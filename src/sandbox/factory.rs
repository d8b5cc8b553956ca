use std::sync::Arc;

use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::config::types::{ExecboxConfig, RuntimeType};
use crate::error::{ExecboxError, Result};
use crate::sandbox::backends::{DockerRunner, FallbackRunner};
use crate::sandbox::traits::Runner;

/// Create the runner for this process.
///
/// Called once at startup. With `runtime = "auto"` the Docker daemon is
/// probed and the fallback runner is used only if the probe fails. The
/// returned runner is fixed for the lifetime of the engine.
pub async fn create_runner(config: &ExecboxConfig) -> Result<Arc<dyn Runner>> {
    let runtime = resolve_runtime(config).await?;
    let max_output = config.engine.max_output_length;

    match runtime {
        RuntimeType::Docker => {
            info!("Docker is available, using secure Docker execution");
            Ok(Arc::new(DockerRunner::new(&config.sandbox, max_output)))
        }
        RuntimeType::Fallback => {
            warn!("Docker not available, using fallback executor (less secure)");
            Ok(Arc::new(FallbackRunner::new(&config.fallback, max_output)))
        }
        RuntimeType::Auto => {
            // Already resolved by resolve_runtime
            unreachable!()
        }
    }
}

/// Resolve the runtime type, handling Auto selection.
async fn resolve_runtime(config: &ExecboxConfig) -> Result<RuntimeType> {
    let docker = DockerRunner::new(&config.sandbox, config.engine.max_output_length);

    match config.sandbox.runtime {
        RuntimeType::Auto => {
            if docker.is_available().await {
                Ok(RuntimeType::Docker)
            } else {
                Ok(RuntimeType::Fallback)
            }
        }
        RuntimeType::Docker => {
            if !docker.is_available().await {
                return Err(ExecboxError::BackendNotAvailable {
                    backend: "docker".to_string(),
                    reason: "Docker daemon is not accessible. Ensure Docker is installed and running."
                        .to_string(),
                });
            }
            Ok(RuntimeType::Docker)
        }
        RuntimeType::Fallback => Ok(RuntimeType::Fallback),
    }
}

/// Pull `images` in the background.
///
/// Fire and forget: nothing waits on the handle during normal operation and
/// a failed pull is only logged.
pub fn spawn_prefetch(docker: DockerRunner, images: Vec<String>) -> JoinHandle<()> {
    tokio::spawn(async move {
        match docker.pull_images(&images).await {
            Ok(()) => info!(count = images.len(), "Image pre-fetch complete"),
            Err(e) => error!(error = %e, "Failed to pull Docker images"),
        }
    })
}

/// Probe every runtime on this system through its health check.
pub async fn probe_runtimes(config: &ExecboxConfig) -> Vec<RuntimeInfo> {
    let max_output = config.engine.max_output_length;
    let runtimes: [(Arc<dyn Runner>, &'static str, &'static str); 2] = [
        (
            Arc::new(DockerRunner::new(&config.sandbox, max_output)),
            "Docker container per request",
            "Docker daemon not accessible",
        ),
        (
            Arc::new(FallbackRunner::new(&config.fallback, max_output)),
            "Host interpreters, javascript and python only (development)",
            "Host interpreters not usable",
        ),
    ];

    let mut infos = Vec::with_capacity(runtimes.len());
    for (runner, description, reason) in runtimes {
        let available = match runner.health_check().await {
            Ok(healthy) => healthy,
            Err(e) => {
                warn!(runner = %runner.name(), error = %e, "Health check failed");
                false
            }
        };
        let capabilities = runner.capabilities();

        infos.push(RuntimeInfo {
            name: runner.name().to_string(),
            available,
            isolated: capabilities.isolated,
            networking: capabilities.networking,
            description,
            unavailable_reason: if available { None } else { Some(reason) },
        });
    }
    infos
}

/// Information about an execution runtime.
pub struct RuntimeInfo {
    pub name: String,
    pub available: bool,
    pub isolated: bool,
    /// Guest code can reach the network
    pub networking: bool,
    pub description: &'static str,
    pub unavailable_reason: Option<&'static str>,
}
