use clap::ValueEnum;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use crate::language::Language;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecboxConfig {
    pub engine: EngineConfig,
    pub sandbox: SandboxConfig,
    pub fallback: FallbackConfig,
}

/// Request-level limits enforced by the engine regardless of runner.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Maximum accepted source length, in characters
    pub max_code_length: usize,
    /// Maximum length of each captured stream, in characters
    pub max_output_length: usize,
    /// Cap on simultaneous executions (unset = unbounded)
    pub max_concurrent: Option<usize>,
    /// Root directory for per-session source files
    pub work_dir: Option<PathBuf>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_code_length: 100_000,
            max_output_length: 10_000,
            max_concurrent: None,
            work_dir: None,
        }
    }
}

/// Which runner the engine should use.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum RuntimeType {
    /// Docker container per request
    Docker,
    /// Unisolated interpreters on the host (development only)
    Fallback,
    /// Probe Docker at startup, fall back if it is not reachable
    #[default]
    Auto,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SandboxConfig {
    /// Which runner to use
    pub runtime: RuntimeType,
    /// Memory ceiling in MB (swap is capped to the same value)
    pub memory_limit_mb: u64,
    /// Fractional CPU share
    pub cpus: f64,
    /// Maximum number of processes inside the container
    pub pids_limit: u32,
    /// Wall-clock timeout in seconds
    pub timeout_seconds: u64,
    /// uid:gid the guest runs as
    pub user: String,
    /// Pull images in the background at startup
    pub prefetch_images: bool,
    /// How long the health probe and `docker kill` may take
    pub probe_timeout_seconds: u64,
    /// Docker CLI used to drive containers
    pub docker_binary: String,
    /// Container image per language
    pub images: ImagesConfig,
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self {
            runtime: RuntimeType::default(),
            memory_limit_mb: 128,
            cpus: 0.5,
            pids_limit: 64,
            timeout_seconds: 10,
            user: "1000:1000".to_string(),
            prefetch_images: true,
            probe_timeout_seconds: 5,
            docker_binary: "docker".to_string(),
            images: ImagesConfig::default(),
        }
    }
}

impl SandboxConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_seconds)
    }

    pub fn probe_timeout(&self) -> Duration {
        Duration::from_secs(self.probe_timeout_seconds)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ImagesConfig {
    pub javascript: String,
    pub python: String,
    pub java: String,
    pub cpp: String,
}

impl Default for ImagesConfig {
    fn default() -> Self {
        Self {
            javascript: "node:18-alpine".to_string(),
            python: "python:3.11-alpine".to_string(),
            java: "eclipse-temurin:17-jdk-alpine".to_string(),
            cpp: "gcc:latest".to_string(),
        }
    }
}

impl ImagesConfig {
    pub fn image_for(&self, language: Language) -> &str {
        match language {
            Language::Javascript => &self.javascript,
            Language::Python => &self.python,
            Language::Java => &self.java,
            Language::Cpp => &self.cpp,
        }
    }
}

/// Settings for the unisolated fallback runner.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FallbackConfig {
    /// Wall-clock timeout in seconds
    pub timeout_seconds: u64,
    /// Node.js binary used for javascript
    pub node_binary: String,
    /// Python interpreter used for python
    pub python_binary: String,
}

impl Default for FallbackConfig {
    fn default() -> Self {
        Self {
            timeout_seconds: 5,
            node_binary: "node".to_string(),
            python_binary: "python3".to_string(),
        }
    }
}

impl FallbackConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_seconds)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_documented_limits() {
        let config = ExecboxConfig::default();
        assert_eq!(config.engine.max_code_length, 100_000);
        assert_eq!(config.engine.max_output_length, 10_000);
        assert_eq!(config.sandbox.memory_limit_mb, 128);
        assert_eq!(config.sandbox.cpus, 0.5);
        assert_eq!(config.sandbox.timeout(), Duration::from_secs(10));
        assert_eq!(config.fallback.timeout(), Duration::from_secs(5));
        assert_eq!(config.sandbox.runtime, RuntimeType::Auto);
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let config: ExecboxConfig = toml::from_str(
            r#"
            [sandbox]
            runtime = "fallback"
            timeout_seconds = 3

            [sandbox.images]
            cpp = "gcc:13"
            "#,
        )
        .unwrap();

        assert_eq!(config.sandbox.runtime, RuntimeType::Fallback);
        assert_eq!(config.sandbox.timeout_seconds, 3);
        assert_eq!(config.sandbox.memory_limit_mb, 128);
        assert_eq!(config.sandbox.images.cpp, "gcc:13");
        assert_eq!(config.sandbox.images.python, "python:3.11-alpine");
        assert_eq!(config.engine.max_code_length, 100_000);
    }

    #[test]
    fn test_default_config_round_trips_through_toml() {
        let rendered = toml::to_string_pretty(&ExecboxConfig::default()).unwrap();
        let parsed: ExecboxConfig = toml::from_str(&rendered).unwrap();
        assert_eq!(parsed.fallback.python_binary, "python3");
    }
}
