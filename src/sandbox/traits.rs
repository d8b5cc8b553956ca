use async_trait::async_trait;

use crate::error::Result;
use crate::language::{Language, Pipeline};
use crate::sandbox::CommandResult;
use crate::session::ExecutionSession;

/// Capability flags indicating what the runner provides
#[derive(Debug, Clone, Default)]
pub struct RunnerCapabilities {
    /// Guest code runs behind an OS-level isolation boundary
    pub isolated: bool,
    /// Guest code can reach the network
    pub networking: bool,
    /// Languages this runner can execute
    pub languages: Vec<Language>,
}

/// Trait for execution runners.
///
/// A runner takes a resolved [`Pipeline`] plus the guest source and turns
/// it into captured output. Runners own the process lifecycle: timeouts,
/// stream limits and killing whatever they launched. Session artifacts are
/// cleaned up by the caller.
#[async_trait]
pub trait Runner: Send + Sync {
    /// Returns the runner name (e.g., "docker", "fallback")
    fn name(&self) -> &str;

    /// Returns the capabilities of this runner
    fn capabilities(&self) -> RunnerCapabilities;

    /// Whether `language` can be executed by this runner
    fn supports(&self, language: Language) -> bool {
        self.capabilities().languages.contains(&language)
    }

    /// Execute `code` according to `pipeline` inside `session`
    async fn run(
        &self,
        pipeline: &Pipeline,
        code: &str,
        session: &ExecutionSession,
    ) -> Result<CommandResult>;

    /// Check if the runner is healthy and ready to accept work.
    /// Default implementation assumes it is.
    async fn health_check(&self) -> Result<bool> {
        Ok(true)
    }
}
