use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::{debug, error, info, warn};

use crate::config::types::SandboxConfig;
use crate::error::{ExecboxError, Result};
use crate::language::{Language, Pipeline, GUEST_SOURCE_DIR};
use crate::sandbox::capture::{run_captured, CaptureSpec};
use crate::sandbox::traits::{Runner, RunnerCapabilities};
use crate::sandbox::CommandResult;
use crate::session::ExecutionSession;

/// Size of the writable scratch tmpfs mounted at /tmp
const TMPFS_SPEC: &str = "/tmp:rw,exec,nosuid,size=64m";

/// Docker sandbox runner.
///
/// Every request gets a fresh `docker run --rm` container with no network,
/// capped memory and CPU, a non-root user, all capabilities dropped and the
/// session directory mounted read-only. The container is named after the
/// session so it can be killed by name when the timer fires.
#[derive(Debug, Clone)]
pub struct DockerRunner {
    binary: String,
    memory_limit_mb: u64,
    cpus: f64,
    pids_limit: u32,
    user: String,
    timeout: Duration,
    probe_timeout: Duration,
    max_output_chars: usize,
}

impl DockerRunner {
    /// Create a new Docker runner.
    pub fn new(config: &SandboxConfig, max_output_chars: usize) -> Self {
        Self {
            binary: config.docker_binary.clone(),
            memory_limit_mb: config.memory_limit_mb,
            cpus: config.cpus,
            pids_limit: config.pids_limit,
            user: config.user.clone(),
            timeout: config.timeout(),
            probe_timeout: config.probe_timeout(),
            max_output_chars,
        }
    }

    fn command(&self) -> Command {
        Command::new(&self.binary)
    }

    /// Check if the Docker daemon is reachable.
    ///
    /// Runs `docker info`, which fails when the CLI is present but the
    /// daemon is not. The probe is bounded by the configured probe timeout.
    pub async fn is_available(&self) -> bool {
        let mut cmd = self.command();
        cmd.arg("info")
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true);

        match tokio::time::timeout(self.probe_timeout, cmd.status()).await {
            Ok(Ok(status)) => status.success(),
            Ok(Err(e)) => {
                debug!(binary = %self.binary, error = %e, "docker CLI not found");
                false
            }
            Err(_) => {
                warn!(timeout = ?self.probe_timeout, "docker info did not answer in time");
                false
            }
        }
    }

    /// Pull every image in `images`, one at a time.
    ///
    /// Keeps going after a failure and reports all failed images at the end.
    pub async fn pull_images(&self, images: &[String]) -> Result<()> {
        let mut failed = Vec::new();

        for image in images {
            info!(image = %image, "Pulling Docker image");

            let output = self
                .command()
                .args(["pull", image.as_str()])
                .stdin(Stdio::null())
                .stdout(Stdio::null())
                .stderr(Stdio::piped())
                .output()
                .await;

            match output {
                Ok(output) if output.status.success() => {
                    info!(image = %image, "Successfully pulled image");
                }
                Ok(output) => {
                    let stderr = String::from_utf8_lossy(&output.stderr);
                    error!(image = %image, error = %stderr.trim(), "Failed to pull image");
                    failed.push(image.clone());
                }
                Err(e) => {
                    error!(image = %image, error = %e, "Error pulling image");
                    failed.push(image.clone());
                }
            }
        }

        if failed.is_empty() {
            Ok(())
        } else {
            Err(ExecboxError::SandboxInit(format!(
                "Failed to pull {}",
                failed.join(", ")
            )))
        }
    }

    /// Arguments for `docker run` for this pipeline and session.
    fn run_args(&self, pipeline: &Pipeline, session: &ExecutionSession) -> Vec<String> {
        let mut args: Vec<String> = vec![
            "run".into(),
            "--rm".into(),
            "--name".into(),
            session.container_name(),
            // Isolation
            "--network=none".into(),
            "--read-only".into(),
            "--tmpfs".into(),
            TMPFS_SPEC.into(),
            // Resource ceilings
            format!("--memory={}m", self.memory_limit_mb),
            format!("--memory-swap={}m", self.memory_limit_mb),
            format!("--cpus={}", self.cpus),
            format!("--pids-limit={}", self.pids_limit),
            // Privileges
            "--user".into(),
            self.user.clone(),
            "--security-opt=no-new-privileges".into(),
            "--cap-drop=ALL".into(),
            // Session sources, read-only
            "-v".into(),
            format!("{}:{}:ro", session.dir().display(), GUEST_SOURCE_DIR),
            "-w".into(),
            "/tmp".into(),
            pipeline.image.clone(),
        ];
        args.extend(pipeline.command.iter().cloned());
        args
    }

    /// Kill the session's container by name.
    ///
    /// Killing the `docker run` client does not stop the container, so this
    /// is needed after a timeout. `--rm` removes it once it has stopped.
    /// Bounded by the probe timeout; a stalled daemon is logged and left.
    async fn kill_container(&self, name: &str) {
        let mut cmd = self.command();
        cmd.args(["kill", name])
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        match tokio::time::timeout(self.probe_timeout, cmd.output()).await {
            Ok(Ok(output)) if output.status.success() => {
                debug!(container = %name, "Killed timed out container");
            }
            Ok(Ok(output)) => {
                // Usually the container already exited
                let stderr = String::from_utf8_lossy(&output.stderr);
                debug!(container = %name, error = %stderr.trim(), "docker kill failed");
            }
            Ok(Err(e)) => {
                warn!(container = %name, error = %e, "Failed to run docker kill");
            }
            Err(_) => {
                warn!(
                    container = %name,
                    timeout = ?self.probe_timeout,
                    "docker kill did not finish in time, container may still be running"
                );
            }
        }
    }
}

#[async_trait]
impl Runner for DockerRunner {
    fn name(&self) -> &str {
        "docker"
    }

    fn capabilities(&self) -> RunnerCapabilities {
        RunnerCapabilities {
            isolated: true,
            networking: false,
            languages: Language::ALL.to_vec(),
        }
    }

    async fn run(
        &self,
        pipeline: &Pipeline,
        code: &str,
        session: &ExecutionSession,
    ) -> Result<CommandResult> {
        session.materialize(&pipeline.source_file, code).await?;

        let args = self.run_args(pipeline, session);
        debug!(
            session = %session.id(),
            image = %pipeline.image,
            command = ?pipeline.command,
            "Executing in Docker sandbox"
        );

        let mut cmd = self.command();
        cmd.args(&args);

        let spec = CaptureSpec {
            timeout: self.timeout,
            max_output_chars: self.max_output_chars,
            timeout_notice: format!(
                "\nExecution timed out ({} second limit)",
                self.timeout.as_secs()
            ),
        };

        match run_captured(cmd, None, &spec).await {
            Ok(result) => {
                if result.timed_out {
                    self.kill_container(&session.container_name()).await;
                }
                Ok(result)
            }
            Err(e) => {
                error!(session = %session.id(), error = %e, "Failed to launch docker");
                Ok(CommandResult {
                    stdout: String::new(),
                    stderr: format!("Docker execution failed: {}", e),
                    exit_code: Some(1),
                    timed_out: false,
                })
            }
        }
    }

    async fn health_check(&self) -> Result<bool> {
        Ok(self.is_available().await)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::types::ImagesConfig;
    use crate::language::PipelineRegistry;
    use std::path::Path;

    #[test]
    fn test_run_args_enforce_isolation() {
        let runner = DockerRunner::new(&SandboxConfig::default(), 10_000);
        let session = ExecutionSession::new(Path::new("/var/lib/execbox"));
        let pipeline = PipelineRegistry::new(&ImagesConfig::default())
            .resolve(Language::Python, "print(1)", session.id())
            .unwrap();

        let args = runner.run_args(&pipeline, &session);
        let has = |flag: &str| args.iter().any(|a| a == flag);

        assert_eq!(&args[..2], &["run".to_string(), "--rm".to_string()]);
        assert!(has("--network=none"));
        assert!(has("--memory=128m"));
        assert!(has("--cpus=0.5"));
        assert!(has("--cap-drop=ALL"));
        assert!(has("--security-opt=no-new-privileges"));
        assert!(has("--read-only"));
        assert!(has("1000:1000"));
        assert!(has(&session.container_name()));
        assert!(has(&format!("/var/lib/execbox/{}:/app:ro", session.id())));

        // Image comes right before the guest command
        let image_pos = args.iter().position(|a| a == "python:3.11-alpine").unwrap();
        assert_eq!(&args[image_pos + 1..], pipeline.command.as_slice());
    }

    #[cfg(unix)]
    fn stub_docker(dir: &Path, script: &str) -> String {
        use std::os::unix::fs::PermissionsExt;

        let path = dir.join("docker");
        std::fs::write(&path, format!("#!/bin/sh\n{script}\n")).unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        path.to_string_lossy().into_owned()
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_launch_failure_reported_in_result() {
        let root = tempfile::tempdir().unwrap();
        let config = SandboxConfig {
            docker_binary: "/no/such/docker".to_string(),
            ..SandboxConfig::default()
        };
        let runner = DockerRunner::new(&config, 10_000);
        let session = ExecutionSession::new(root.path());
        let pipeline = PipelineRegistry::new(&ImagesConfig::default())
            .resolve(Language::Python, "print(1)", session.id())
            .unwrap();

        let result = runner.run(&pipeline, "print(1)", &session).await.unwrap();

        let reason = std::io::Error::from_raw_os_error(libc::ENOENT);
        assert_eq!(result.stderr, format!("Docker execution failed: {reason}"));
        assert!(result.stdout.is_empty());
        assert_eq!(result.exit_code, Some(1));
        assert!(!result.timed_out);
        assert!(!runner.is_available().await);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_timeout_returns_even_if_kill_stalls() {
        let root = tempfile::tempdir().unwrap();
        let bin = tempfile::tempdir().unwrap();
        // Both `docker run` and `docker kill` hang, like a wedged daemon
        let config = SandboxConfig {
            docker_binary: stub_docker(bin.path(), "exec sleep 1000"),
            timeout_seconds: 1,
            probe_timeout_seconds: 1,
            ..SandboxConfig::default()
        };
        let runner = DockerRunner::new(&config, 10_000);
        let session = ExecutionSession::new(root.path());
        let pipeline = PipelineRegistry::new(&ImagesConfig::default())
            .resolve(Language::Python, "while True: pass", session.id())
            .unwrap();

        let start = std::time::Instant::now();
        let result = tokio::time::timeout(
            Duration::from_secs(10),
            runner.run(&pipeline, "while True: pass", &session),
        )
        .await
        .expect("run must return after the timeout")
        .unwrap();

        assert!(result.timed_out);
        assert_eq!(result.stderr, "Execution timed out (1 second limit)");
        assert!(result.stdout.is_empty());
        assert!(start.elapsed() < Duration::from_secs(6), "{:?}", start.elapsed());
        assert!(session.dir().join(&pipeline.source_file).exists());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_health_check_uses_configured_binary() {
        let bin = tempfile::tempdir().unwrap();
        let config = SandboxConfig {
            docker_binary: stub_docker(bin.path(), "exit 0"),
            ..SandboxConfig::default()
        };
        let runner = DockerRunner::new(&config, 10_000);
        assert!(runner.health_check().await.unwrap());

        let stalled = tempfile::tempdir().unwrap();
        let config = SandboxConfig {
            docker_binary: stub_docker(stalled.path(), "exec sleep 1000"),
            probe_timeout_seconds: 1,
            ..SandboxConfig::default()
        };
        let runner = DockerRunner::new(&config, 10_000);
        let start = std::time::Instant::now();
        assert!(!runner.health_check().await.unwrap());
        assert!(start.elapsed() < Duration::from_secs(5));
    }

    #[test]
    fn test_capabilities() {
        let runner = DockerRunner::new(&SandboxConfig::default(), 10_000);
        let caps = runner.capabilities();
        assert!(caps.isolated);
        assert!(!caps.networking);
        for lang in Language::ALL {
            assert!(runner.supports(lang));
        }
    }
}
