pub mod cli;
pub mod config;
pub mod engine;
pub mod error;
pub mod language;
pub mod sandbox;
pub mod security;
pub mod session;

pub use engine::{Engine, ExecutionResult, ExecutionStatus};
pub use error::{ExecboxError, Result};
pub use language::Language;
