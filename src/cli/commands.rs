use std::path::Path;

use tokio::io::AsyncReadExt;
use tracing::info;

use crate::cli::args::{ConfigAction, ConfigArgs, InitArgs, OutputFormat, RunArgs};
use crate::config::loader::get_config_path;
use crate::config::types::ExecboxConfig;
use crate::engine::{Engine, ExecutionResult};
use crate::error::{ExecboxError, Result};
use crate::language::{Language, PipelineRegistry};
use crate::sandbox::{probe_runtimes, DockerRunner, FallbackRunner, Runner};

// ============================================================================
// Execution Commands
// ============================================================================

/// Execute a source file and print the result
pub async fn run(args: RunArgs, mut config: ExecboxConfig, format: OutputFormat) -> Result<()> {
    let language = match args.language {
        Some(lang) => lang,
        None => infer_language(&args.file)?,
    };
    let code = read_source(&args.file).await?;

    if let Some(runtime) = args.runtime {
        config.sandbox.runtime = runtime;
    }
    // A one-shot run should not kick off image pulls
    config.sandbox.prefetch_images = false;

    info!(file = %args.file.display(), language = %language, "Executing source file");

    let engine = Engine::initialize(&config).await?;
    let result = engine.execute_code(&code, language.as_str()).await;

    output_execution_result(&result, format)
}

/// List supported languages
pub async fn languages(config: ExecboxConfig, format: OutputFormat) -> Result<()> {
    let registry = PipelineRegistry::new(&config.sandbox.images);
    let fallback = FallbackRunner::new(&config.fallback, config.engine.max_output_length);

    let rows: Vec<_> = Language::ALL
        .iter()
        .filter_map(|lang| registry.profile(*lang))
        .map(|profile| {
            (
                profile.language,
                profile.image.clone(),
                profile.extension,
                profile.build.is_some(),
                fallback.supports(profile.language),
            )
        })
        .collect();

    match format {
        OutputFormat::Text => {
            println!(
                "{:<12} {:<32} {:<6} {:<9} FALLBACK",
                "LANGUAGE", "IMAGE", "EXT", "COMPILED"
            );
            println!("{}", "-".repeat(70));
            for (lang, image, ext, compiled, fallback) in rows {
                println!(
                    "{:<12} {:<32} {:<6} {:<9} {}",
                    lang,
                    image,
                    ext,
                    if compiled { "yes" } else { "no" },
                    if fallback { "yes" } else { "no" }
                );
            }
        }
        OutputFormat::Json => {
            let json: Vec<_> = rows
                .into_iter()
                .map(|(lang, image, ext, compiled, fallback)| {
                    serde_json::json!({
                        "language": lang,
                        "image": image,
                        "extension": ext,
                        "compiled": compiled,
                        "fallback": fallback,
                    })
                })
                .collect();
            println!("{}", serde_json::to_string_pretty(&json)?);
        }
    }

    Ok(())
}

/// Report which runtimes are available and which one would be used
pub async fn health(config: ExecboxConfig, format: OutputFormat) -> Result<()> {
    let runtimes = probe_runtimes(&config).await;
    let selected = runtimes
        .iter()
        .find(|r| r.available && r.isolated)
        .or_else(|| runtimes.iter().find(|r| r.available))
        .map(|r| r.name.as_str())
        .unwrap_or("none");

    match format {
        OutputFormat::Text => {
            for runtime in &runtimes {
                let status = if runtime.available {
                    "available".to_string()
                } else {
                    format!(
                        "unavailable ({})",
                        runtime.unavailable_reason.unwrap_or("unknown")
                    )
                };
                let network = if runtime.networking { "network" } else { "no network" };
                println!(
                    "{:<10} {:<60} {:<11} {}",
                    runtime.name, runtime.description, network, status
                );
            }
            println!();
            println!("Selected runtime: {}", selected);
        }
        OutputFormat::Json => {
            let json: Vec<_> = runtimes
                .iter()
                .map(|r| {
                    serde_json::json!({
                        "name": r.name,
                        "available": r.available,
                        "isolated": r.isolated,
                        "networking": r.networking,
                        "description": r.description,
                        "reason": r.unavailable_reason,
                    })
                })
                .collect();
            println!(
                "{}",
                serde_json::to_string_pretty(&serde_json::json!({
                    "runtimes": json,
                    "selected": selected,
                }))?
            );
        }
    }

    Ok(())
}

/// Pull every configured image in the foreground
pub async fn pull(config: ExecboxConfig) -> Result<()> {
    let images = PipelineRegistry::new(&config.sandbox.images).images();
    let docker = DockerRunner::new(&config.sandbox, config.engine.max_output_length);
    docker.pull_images(&images).await?;
    println!("Pulled {} images", images.len());
    Ok(())
}

// ============================================================================
// Config Commands
// ============================================================================

pub async fn init(args: InitArgs) -> Result<()> {
    let config_path = get_config_path();

    if config_path.exists() && !args.force {
        println!("Configuration already exists at: {}", config_path.display());
        println!("Use --force to overwrite");
        return Ok(());
    }

    // Create parent directories if needed
    if let Some(parent) = config_path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    // Write default configuration
    let default_config = ExecboxConfig::default();
    let toml_str = toml::to_string_pretty(&default_config)
        .map_err(|e| ExecboxError::Config(e.to_string()))?;

    std::fs::write(&config_path, toml_str)?;

    println!("Created configuration at: {}", config_path.display());
    println!("\nQuick start:");
    println!("  # Check that Docker is reachable");
    println!("  execbox health");
    println!();
    println!("  # Pre-fetch the language images");
    println!("  execbox pull");
    println!();
    println!("  # Run a file");
    println!("  execbox run hello.py");

    Ok(())
}

pub async fn config(args: ConfigArgs, config: ExecboxConfig) -> Result<()> {
    match args.action {
        ConfigAction::Show => {
            let toml_str =
                toml::to_string_pretty(&config).map_err(|e| ExecboxError::Config(e.to_string()))?;
            println!("{}", toml_str);
        }
        ConfigAction::Path => {
            println!("{}", get_config_path().display());
        }
    }
    Ok(())
}

// ============================================================================
// Helper Functions
// ============================================================================

fn infer_language(file: &Path) -> Result<Language> {
    let ext = file.extension().and_then(|e| e.to_str()).unwrap_or_default();
    Language::from_extension(ext).ok_or_else(|| {
        ExecboxError::Config(format!(
            "Cannot infer language for '{}', pass --language",
            file.display()
        ))
    })
}

async fn read_source(file: &Path) -> Result<String> {
    if file.as_os_str() == "-" {
        let mut code = String::new();
        tokio::io::stdin().read_to_string(&mut code).await?;
        return Ok(code);
    }
    Ok(tokio::fs::read_to_string(file).await?)
}

fn output_execution_result(result: &ExecutionResult, format: OutputFormat) -> Result<()> {
    match format {
        OutputFormat::Text => {
            if !result.output.is_empty() {
                println!("{}", result.output);
            }
            if !result.error.is_empty() {
                eprintln!("{}", result.error);
            }
            eprintln!("({} ms)", result.execution_time);
            if !result.is_success() {
                std::process::exit(1);
            }
        }
        OutputFormat::Json => {
            println!("{}", serde_json::to_string(result)?);
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn test_infer_language() {
        assert_eq!(
            infer_language(&PathBuf::from("src/Main.java")).unwrap(),
            Language::Java
        );
        assert_eq!(
            infer_language(&PathBuf::from("a.js")).unwrap(),
            Language::Javascript
        );
        assert!(infer_language(&PathBuf::from("-")).is_err());
        assert!(infer_language(&PathBuf::from("Makefile")).is_err());
    }

    #[tokio::test]
    async fn test_read_source_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("hello.py");
        std::fs::write(&path, "print('hi')").unwrap();
        assert_eq!(read_source(&path).await.unwrap(), "print('hi')");
    }
}
