mod backends;
mod capture;
mod factory;
mod traits;

pub use backends::{DockerRunner, FallbackRunner};
pub use capture::{run_captured, truncate_stream, CaptureSpec, ERROR_TRUNCATED, OUTPUT_TRUNCATED};
pub use factory::{create_runner, probe_runtimes, spawn_prefetch, RuntimeInfo};
pub use traits::{Runner, RunnerCapabilities};

/// Result of executing a guest program.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandResult {
    pub stdout: String,
    pub stderr: String,
    /// Exit code of the launched process, `None` if it was killed by a signal
    pub exit_code: Option<i32>,
    /// Whether the wall-clock timer fired
    pub timed_out: bool,
}
