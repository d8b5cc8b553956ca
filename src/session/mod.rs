use std::path::{Path, PathBuf};

use tokio::fs;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::error::Result;

/// Prefix for container names, followed by the session id.
const CONTAINER_PREFIX: &str = "execbox-";

/// Ephemeral scope of a single execution request.
///
/// Owns `<root>/<id>/` exclusively. Nothing is written until
/// [`materialize`](Self::materialize) is called, so requests rejected
/// before dispatch leave no trace on disk. The directory is removed by
/// [`cleanup`](Self::cleanup), or on drop if the request future was
/// cancelled or panicked before getting there.
#[derive(Debug)]
pub struct ExecutionSession {
    id: String,
    dir: PathBuf,
    cleaned: bool,
}

impl ExecutionSession {
    /// Mint a fresh session under `root`.
    pub fn new(root: &Path) -> Self {
        let id = Uuid::new_v4().to_string();
        let dir = root.join(&id);
        Self {
            id,
            dir,
            cleaned: false,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// Session-scoped directory on the host
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Name given to this session's container
    pub fn container_name(&self) -> String {
        format!("{}{}", CONTAINER_PREFIX, self.id)
    }

    /// Write the guest source into the session directory.
    pub async fn materialize(&self, file_name: &str, code: &str) -> Result<PathBuf> {
        fs::create_dir_all(&self.dir).await?;

        #[cfg(unix)]
        {
            // The container user is not the host user; it only needs to read.
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(&self.dir, std::fs::Permissions::from_mode(0o755)).await?;
        }

        let path = self.dir.join(file_name);
        fs::write(&path, code).await?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(&path, std::fs::Permissions::from_mode(0o644)).await?;
        }

        debug!(session = %self.id, path = %path.display(), "Materialized source file");
        Ok(path)
    }

    /// Remove every artifact owned by this session.
    ///
    /// Failures are logged and swallowed; cleanup never fails a request.
    pub async fn cleanup(&mut self) {
        self.cleaned = true;
        match fs::remove_dir_all(&self.dir).await {
            Ok(()) => debug!(session = %self.id, "Cleaned up session artifacts"),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => {
                warn!(session = %self.id, error = %e, "Cleanup error");
            }
        }
    }
}

impl Drop for ExecutionSession {
    fn drop(&mut self) {
        if self.cleaned {
            return;
        }
        match std::fs::remove_dir_all(&self.dir) {
            Ok(()) => debug!(session = %self.id, "Cleaned up session artifacts on drop"),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => warn!(session = %self.id, error = %e, "Cleanup error on drop"),
        }
    }
}
