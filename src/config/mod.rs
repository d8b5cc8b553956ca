pub mod loader;
pub mod types;

pub use loader::{get_config_path, get_work_dir, load_config};
pub use types::{
    EngineConfig, ExecboxConfig, FallbackConfig, ImagesConfig, RuntimeType, SandboxConfig,
};
