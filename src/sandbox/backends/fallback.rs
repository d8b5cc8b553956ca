use std::time::Duration;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::{debug, warn};

use crate::config::types::FallbackConfig;
use crate::error::{ExecboxError, Result};
use crate::language::{Language, Pipeline};
use crate::sandbox::capture::{run_captured, CaptureSpec};
use crate::sandbox::traits::{Runner, RunnerCapabilities};
use crate::sandbox::CommandResult;
use crate::session::ExecutionSession;

const SUPPORTED: [Language; 2] = [Language::Javascript, Language::Python];

/// Node program that evaluates stdin inside a fresh `vm` context.
///
/// The context only has console output and clamped timers: no `require`,
/// no `process`, no filesystem. `vm` is not a security boundary; this only
/// keeps honest code from wandering off.
const NODE_BOOTSTRAP: &str = r#"
const vm = require('vm');
let source = '';
process.stdin.setEncoding('utf8');
process.stdin.on('data', (chunk) => { source += chunk; });
process.stdin.on('end', () => {
    const emit = (prefix, args) => process.stdout.write(prefix + args.join(' ') + '\n');
    const context = {
        console: {
            log: (...args) => emit('', args),
            error: (...args) => emit('ERROR: ', args),
        },
        setTimeout: (fn, delay) => setTimeout(fn, Math.min(Number(delay) || 0, 1000)),
        setInterval: (fn, delay) => setInterval(fn, Math.max(Number(delay) || 0, 100)),
        clearTimeout: (id) => clearTimeout(id),
        clearInterval: (id) => clearInterval(id),
    };
    try {
        vm.runInNewContext(source, context, { timeout: __VM_TIMEOUT_MS__, displayErrors: true });
    } catch (err) {
        process.stderr.write(String(err && err.message !== undefined ? err.message : err));
        process.exitCode = 1;
    }
});
"#;

/// Degraded runner used when no isolation runtime is reachable.
///
/// Runs javascript through the host's `node` (inside a `vm` context) and
/// python through the host's interpreter as a plain subprocess. The only
/// enforcement is the timeout kill. Development use only.
pub struct FallbackRunner {
    node_binary: String,
    python_binary: String,
    timeout: Duration,
    max_output_chars: usize,
}

impl FallbackRunner {
    pub fn new(config: &FallbackConfig, max_output_chars: usize) -> Self {
        Self {
            node_binary: config.node_binary.clone(),
            python_binary: config.python_binary.clone(),
            timeout: config.timeout(),
            max_output_chars,
        }
    }

    fn command_for(&self, language: Language) -> Result<Command> {
        match language {
            Language::Javascript => {
                let bootstrap = NODE_BOOTSTRAP
                    .replace("__VM_TIMEOUT_MS__", &self.timeout.as_millis().to_string());
                let mut cmd = Command::new(&self.node_binary);
                cmd.arg("-e").arg(&bootstrap);
                Ok(cmd)
            }
            Language::Python => {
                let mut cmd = Command::new(&self.python_binary);
                // Program text comes from stdin
                cmd.arg("-");
                cmd.env("PYTHONDONTWRITEBYTECODE", "1");
                cmd.env("PYTHONUNBUFFERED", "1");
                Ok(cmd)
            }
            other => Err(ExecboxError::FallbackUnsupported {
                language: other.to_string(),
            }),
        }
    }
}

#[async_trait]
impl Runner for FallbackRunner {
    fn name(&self) -> &str {
        "fallback"
    }

    fn capabilities(&self) -> RunnerCapabilities {
        RunnerCapabilities {
            isolated: false,
            networking: true,
            languages: SUPPORTED.to_vec(),
        }
    }

    async fn run(
        &self,
        pipeline: &Pipeline,
        code: &str,
        session: &ExecutionSession,
    ) -> Result<CommandResult> {
        warn!(
            session = %session.id(),
            language = %pipeline.language,
            "Using fallback executor - this is less secure and should only be used for development"
        );

        let mut cmd = self.command_for(pipeline.language)?;
        cmd.current_dir(std::env::temp_dir());

        let spec = CaptureSpec {
            timeout: self.timeout,
            max_output_chars: self.max_output_chars,
            timeout_notice: "\nExecution timed out".to_string(),
        };

        match run_captured(cmd, Some(code.to_string()), &spec).await {
            Ok(result) => Ok(result),
            Err(e) => {
                debug!(session = %session.id(), error = %e, "Failed to launch interpreter");
                let interpreter = match pipeline.language {
                    Language::Javascript => "JavaScript",
                    _ => "Python",
                };
                Ok(CommandResult {
                    stdout: String::new(),
                    stderr: format!("{} execution failed: {}", interpreter, e),
                    exit_code: Some(1),
                    timed_out: false,
                })
            }
        }
    }
}
