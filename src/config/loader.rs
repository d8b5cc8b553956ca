use std::path::{Path, PathBuf};

use crate::config::types::ExecboxConfig;
use crate::error::{ExecboxError, Result};

/// Get the default configuration file path
pub fn get_config_path() -> PathBuf {
    if let Some(proj_dirs) = directories::ProjectDirs::from("com", "execbox", "execbox") {
        proj_dirs.config_dir().join("config.toml")
    } else {
        // Fallback to home directory
        dirs_fallback().join(".execbox").join("config.toml")
    }
}

fn dirs_fallback() -> PathBuf {
    std::env::var("HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("."))
}

/// Load configuration from file, with defaults for missing values
pub fn load_config(config_path: Option<&Path>) -> Result<ExecboxConfig> {
    let path = config_path
        .map(PathBuf::from)
        .unwrap_or_else(get_config_path);

    if !path.exists() {
        // An explicitly requested file must exist
        if config_path.is_some() {
            return Err(ExecboxError::Config(format!(
                "Configuration file not found: {}",
                path.display()
            )));
        }
        return Ok(ExecboxConfig::default());
    }

    let content = std::fs::read_to_string(&path)?;
    let config: ExecboxConfig =
        toml::from_str(&content).map_err(|e| ExecboxError::TomlParse(e.to_string()))?;

    validate(&config)?;
    Ok(config)
}

fn validate(config: &ExecboxConfig) -> Result<()> {
    if config.engine.max_code_length == 0 {
        return Err(ExecboxError::Config(
            "engine.max_code_length must be greater than 0".to_string(),
        ));
    }
    if config.sandbox.timeout_seconds == 0 || config.fallback.timeout_seconds == 0 {
        return Err(ExecboxError::Config(
            "timeout_seconds must be greater than 0".to_string(),
        ));
    }
    if config.sandbox.cpus <= 0.0 {
        return Err(ExecboxError::Config(
            "sandbox.cpus must be positive".to_string(),
        ));
    }
    if config.engine.max_concurrent == Some(0) {
        return Err(ExecboxError::Config(
            "engine.max_concurrent must be at least 1 when set".to_string(),
        ));
    }
    Ok(())
}

/// Root directory for per-session source files
pub fn get_work_dir(config: &ExecboxConfig) -> PathBuf {
    if let Some(dir) = &config.engine.work_dir {
        return dir.clone();
    }
    if let Some(proj_dirs) = directories::ProjectDirs::from("com", "execbox", "execbox") {
        proj_dirs.cache_dir().join("sessions")
    } else {
        std::env::temp_dir().join("execbox").join("sessions")
    }
}
