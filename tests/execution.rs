//! End-to-end runs against real runtimes.
//!
//! These need a Docker daemon (and pulled images) or host interpreters, so
//! they are ignored by default: `cargo test -- --ignored`.

use std::sync::Arc;
use std::time::Duration;

use execbox::config::types::{ExecboxConfig, RuntimeType};
use execbox::sandbox::{DockerRunner, FallbackRunner};
use execbox::{Engine, ExecutionStatus};

fn config(work_dir: &std::path::Path) -> ExecboxConfig {
    let mut config = ExecboxConfig::default();
    config.engine.work_dir = Some(work_dir.to_path_buf());
    config.sandbox.prefetch_images = false;
    config
}

fn docker_engine(work_dir: &std::path::Path) -> Engine {
    let config = config(work_dir);
    let runner = DockerRunner::new(&config.sandbox, config.engine.max_output_length);
    Engine::with_runner(&config, Arc::new(runner))
}

fn fallback_engine(work_dir: &std::path::Path) -> Engine {
    let mut config = config(work_dir);
    config.sandbox.runtime = RuntimeType::Fallback;
    let runner = FallbackRunner::new(&config.fallback, config.engine.max_output_length);
    Engine::with_runner(&config, Arc::new(runner))
}

#[tokio::test]
#[ignore = "requires docker"]
async fn docker_hello_world_in_every_language() {
    let work = tempfile::tempdir().unwrap();
    let engine = docker_engine(work.path());

    let programs = [
        ("javascript", "console.log('Hello, World!');"),
        ("python", "print('Hello, World!')"),
        (
            "java",
            "public class Hello {\n    public static void main(String[] args) {\n        System.out.println(\"Hello, World!\");\n    }\n}",
        ),
        (
            "cpp",
            "#include <iostream>\nint main() {\n    std::cout << \"Hello, World!\" << std::endl;\n    return 0;\n}",
        ),
    ];

    for (language, code) in programs {
        let result = engine.execute_code(code, language).await;
        assert_eq!(result.status, ExecutionStatus::Success, "{language}: {}", result.error);
        assert_eq!(result.output, "Hello, World!", "{language}");
        assert!(result.error.is_empty());
    }

    assert_eq!(std::fs::read_dir(work.path()).unwrap().count(), 0);
}

#[tokio::test]
#[ignore = "requires docker"]
async fn docker_compile_error_is_reported_like_runtime_error() {
    let work = tempfile::tempdir().unwrap();
    let engine = docker_engine(work.path());

    let result = engine
        .execute_code("int main() { return undefined_symbol; }", "cpp")
        .await;

    assert_eq!(result.status, ExecutionStatus::Error);
    assert!(result.error.contains("undefined_symbol"));
}

#[tokio::test]
#[ignore = "requires docker"]
async fn docker_infinite_loop_is_killed() {
    let work = tempfile::tempdir().unwrap();
    let engine = docker_engine(work.path());

    let result = engine.execute_code("while True:\n    pass", "python").await;

    assert_eq!(result.status, ExecutionStatus::Error);
    assert!(result.error.contains("Execution timed out (10 second limit)"));
    // Timeout plus container startup and kill overhead
    assert!(result.execution_time < 20_000, "{}", result.execution_time);
}

#[tokio::test]
#[ignore = "requires docker"]
async fn docker_has_no_network() {
    let work = tempfile::tempdir().unwrap();
    let engine = docker_engine(work.path());

    let code = "fetch('http://example.com').then(() => console.log('reached')).catch(() => console.log('blocked'));";
    let result = engine.execute_code(code, "javascript").await;
    assert_eq!(result.output, "blocked");
}

#[tokio::test]
#[ignore = "requires node and python3 on the host"]
async fn fallback_runs_interpreted_languages() {
    let work = tempfile::tempdir().unwrap();
    let engine = fallback_engine(work.path());

    let result = engine.execute_code("print('Hello, World!')", "python").await;
    assert_eq!(result.output, "Hello, World!");
    assert_eq!(result.status, ExecutionStatus::Success);

    let result = engine
        .execute_code("console.log('a', 1); console.error('b');", "javascript")
        .await;
    assert_eq!(result.output, "a 1\nERROR: b");
    assert!(result.error.is_empty());

    let result = engine
        .execute_code("console.log(typeof require, typeof process);", "javascript")
        .await;
    assert_eq!(result.output, "undefined undefined");

    let result = engine.execute_code("throw new Error('bad')", "javascript").await;
    assert_eq!(result.error, "bad");
}

#[tokio::test]
#[ignore = "requires python3 on the host"]
async fn fallback_timeout_is_five_seconds() {
    let work = tempfile::tempdir().unwrap();
    let engine = fallback_engine(work.path());

    let started = std::time::Instant::now();
    let result = engine.execute_code("while True:\n    pass", "python").await;

    assert_eq!(result.error, "Execution timed out");
    assert!(started.elapsed() < Duration::from_secs(8));
}

#[tokio::test]
async fn fallback_rejects_compiled_languages() {
    let work = tempfile::tempdir().unwrap();
    let engine = fallback_engine(work.path());

    let result = engine
        .execute_code("public class Main { public static void main(String[] a) {} }", "java")
        .await;
    assert_eq!(result.status, ExecutionStatus::Error);
    assert_eq!(result.error, "Fallback execution not supported for java");

    let result = engine.execute_code("int main() { return 0; }", "cpp").await;
    assert_eq!(result.error, "Fallback execution not supported for cpp");
}
