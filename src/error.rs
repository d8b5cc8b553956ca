use thiserror::Error;

#[derive(Error, Debug)]
pub enum ExecboxError {
    // Validation errors
    #[error("Code and language are required")]
    MissingInput,

    #[error("Unsupported language: {language}")]
    UnsupportedLanguage { language: String },

    #[error("Code too large")]
    CodeTooLarge { length: usize, max: usize },

    // Screening errors
    #[error("Code contains potentially dangerous operations")]
    SecurityViolation,

    // Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("TOML parse error: {0}")]
    TomlParse(String),

    // Runner errors
    #[error("Fallback execution not supported for {language}")]
    FallbackUnsupported { language: String },

    #[error("Backend '{backend}' not available: {reason}")]
    BackendNotAvailable { backend: String, reason: String },

    #[error("Sandbox initialization failed: {0}")]
    SandboxInit(String),

    #[error("Command execution failed in sandbox: {0}")]
    SandboxExecution(String),

    // IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    // Serialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    // Generic wrapper
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl ExecboxError {
    /// True for failures raised before any process is spawned.
    pub fn is_rejection(&self) -> bool {
        matches!(
            self,
            Self::MissingInput
                | Self::UnsupportedLanguage { .. }
                | Self::CodeTooLarge { .. }
                | Self::SecurityViolation
                | Self::FallbackUnsupported { .. }
        )
    }
}

pub type Result<T> = std::result::Result<T, ExecboxError>;
