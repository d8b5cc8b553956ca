//! The execution entry point.
//!
//! [`Engine::execute_code`] takes untrusted `(code, language)` and always
//! comes back with an [`ExecutionResult`]. Validation failures, denylist
//! hits, runner errors, timeouts and even panics inside a runner all end up
//! as `status: Error` with a message.

use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use serde::{Deserialize, Serialize};
use tokio::sync::Semaphore;
use tracing::{debug, error, info};

use crate::config::loader::get_work_dir;
use crate::config::types::ExecboxConfig;
use crate::error::{ExecboxError, Result};
use crate::language::{Language, PipelineRegistry};
use crate::sandbox::{create_runner, spawn_prefetch, CommandResult, DockerRunner, Runner};
use crate::security::{Screening, SecurityScreener};
use crate::session::ExecutionSession;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExecutionStatus {
    Success,
    Error,
}

/// What the caller gets back for every request.
///
/// `status` is `Error` exactly when `error` is non-empty.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionResult {
    pub output: String,
    pub error: String,
    /// Milliseconds from acceptance to result assembly
    pub execution_time: u64,
    pub status: ExecutionStatus,
}

impl ExecutionResult {
    fn new(output: String, error: String, execution_time: u64) -> Self {
        let status = if error.is_empty() {
            ExecutionStatus::Success
        } else {
            ExecutionStatus::Error
        };
        Self {
            output,
            error,
            execution_time,
            status,
        }
    }

    fn failure(message: String, execution_time: u64) -> Self {
        Self::new(String::new(), message, execution_time)
    }

    pub fn is_success(&self) -> bool {
        self.status == ExecutionStatus::Success
    }
}

/// Lifecycle of one request, logged at debug level.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Stage {
    Received,
    Validated,
    Screened,
    Executing,
    Completed,
    Rejected,
    TimedOut,
    Failed,
    CleanedUp,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

struct EngineInner {
    runner: Arc<dyn Runner>,
    screener: SecurityScreener,
    pipelines: PipelineRegistry,
    work_dir: PathBuf,
    max_code_length: usize,
    admission: Option<Arc<Semaphore>>,
}

/// Execution engine: decides the runner once and serves every request.
///
/// Cheap to clone; clones share the same runner, policies and limits.
#[derive(Clone)]
pub struct Engine {
    inner: Arc<EngineInner>,
}

impl Engine {
    /// Probe the isolation runtime, pick a runner and build the engine.
    ///
    /// When Docker is selected and `prefetch_images` is set, image pulls
    /// start in the background; requests do not wait for them.
    pub async fn initialize(config: &ExecboxConfig) -> Result<Self> {
        let runner = create_runner(config).await?;
        let engine = Self::with_runner(config, runner);

        if wants_prefetch(config, engine.inner.runner.as_ref()) {
            let docker = DockerRunner::new(&config.sandbox, config.engine.max_output_length);
            spawn_prefetch(docker, engine.inner.pipelines.images());
        }

        info!(
            runner = %engine.runner_name(),
            work_dir = %engine.inner.work_dir.display(),
            "Execution engine ready"
        );
        Ok(engine)
    }

    /// Build an engine around an already chosen runner.
    pub fn with_runner(config: &ExecboxConfig, runner: Arc<dyn Runner>) -> Self {
        let admission = config
            .engine
            .max_concurrent
            .map(|n| Arc::new(Semaphore::new(n)));

        Self {
            inner: Arc::new(EngineInner {
                runner,
                screener: SecurityScreener::default(),
                pipelines: PipelineRegistry::new(&config.sandbox.images),
                work_dir: get_work_dir(config),
                max_code_length: config.engine.max_code_length,
                admission,
            }),
        }
    }

    pub fn runner_name(&self) -> &str {
        self.inner.runner.name()
    }

    /// Execute `code` as `language` and report what happened.
    ///
    /// Never fails: every error, including a panic inside the runner, is
    /// folded into an `ExecutionResult` with `status: Error`.
    pub async fn execute_code(&self, code: &str, language: &str) -> ExecutionResult {
        let started = Instant::now();
        let inner = Arc::clone(&self.inner);
        let code = code.to_string();
        let language = language.to_string();

        let handle = tokio::spawn(async move { inner.execute(&code, &language, started).await });

        match handle.await {
            Ok(result) => result,
            Err(e) => {
                error!(error = %e, "Execution task failed");
                ExecutionResult::failure(
                    "Execution failed: internal error".to_string(),
                    elapsed_ms(started),
                )
            }
        }
    }
}

/// Images are only worth pulling for a runner that executes in containers.
fn wants_prefetch(config: &ExecboxConfig, runner: &dyn Runner) -> bool {
    config.sandbox.prefetch_images && runner.capabilities().isolated
}

impl EngineInner {
    async fn execute(&self, code: &str, language: &str, started: Instant) -> ExecutionResult {
        let mut session = ExecutionSession::new(&self.work_dir);
        trace_stage(&session, Stage::Received);

        let outcome = self.execute_in_session(code, language, &session).await;

        let stage = match &outcome {
            Ok(result) if result.timed_out => Stage::TimedOut,
            Ok(_) => Stage::Completed,
            Err(e) if e.is_rejection() => Stage::Rejected,
            Err(_) => Stage::Failed,
        };
        trace_stage(&session, stage);

        let result = match outcome {
            Ok(cmd) => ExecutionResult::new(cmd.stdout, cmd.stderr, elapsed_ms(started)),
            Err(e) => ExecutionResult::failure(e.to_string(), elapsed_ms(started)),
        };

        session.cleanup().await;
        trace_stage(&session, Stage::CleanedUp);

        debug!(
            session = %session.id(),
            status = ?result.status,
            execution_time_ms = result.execution_time,
            "Execution finished"
        );
        result
    }

    async fn execute_in_session(
        &self,
        code: &str,
        language: &str,
        session: &ExecutionSession,
    ) -> Result<CommandResult> {
        let language = self.validate(code, language)?;
        trace_stage(session, Stage::Validated);

        if let Screening::Denied { .. } = self.screener.screen(code, language) {
            return Err(ExecboxError::SecurityViolation);
        }
        trace_stage(session, Stage::Screened);

        if !self.runner.supports(language) {
            return Err(ExecboxError::FallbackUnsupported {
                language: language.to_string(),
            });
        }

        let pipeline = self
            .pipelines
            .resolve(language, code, session.id())
            .ok_or_else(|| ExecboxError::UnsupportedLanguage {
                language: language.to_string(),
            })?;

        let _permit = match &self.admission {
            Some(semaphore) => Some(Arc::clone(semaphore).acquire_owned().await.map_err(|e| {
                ExecboxError::SandboxExecution(format!("Admission closed: {}", e))
            })?),
            None => None,
        };

        trace_stage(session, Stage::Executing);
        self.runner.run(&pipeline, code, session).await
    }

    fn validate(&self, code: &str, language: &str) -> Result<Language> {
        if code.is_empty() || language.is_empty() {
            return Err(ExecboxError::MissingInput);
        }

        let language: Language = language.parse()?;

        let length = code.chars().count();
        if length > self.max_code_length {
            return Err(ExecboxError::CodeTooLarge {
                length,
                max: self.max_code_length,
            });
        }

        Ok(language)
    }
}

fn trace_stage(session: &ExecutionSession, stage: Stage) {
    debug!(session = %session.id(), stage = %stage, "Execution stage");
}

fn elapsed_ms(started: Instant) -> u64 {
    u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX)
}
