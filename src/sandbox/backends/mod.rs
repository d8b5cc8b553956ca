mod docker;
mod fallback;

pub use docker::DockerRunner;
pub use fallback::FallbackRunner;
