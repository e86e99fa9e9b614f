use std::io::{self, ErrorKind};
use std::path::{Component, Path, PathBuf};

use async_trait::async_trait;

/// Where office images live. Only release is needed by the engine.
#[async_trait]
pub trait ImageStorage: Send + Sync {
    /// Remove a stored file. Removing a file that is already gone succeeds.
    async fn delete(&self, path: &str) -> io::Result<()>;
}

/// Images stored as plain files under a root directory.
pub struct LocalImageStorage {
    root: PathBuf,
}

impl LocalImageStorage {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Resolve a stored path under the root, refusing anything that could escape it.
    fn resolve(&self, path: &str) -> io::Result<PathBuf> {
        let relative = Path::new(path.trim_start_matches('/'));
        let safe = relative
            .components()
            .all(|c| matches!(c, Component::Normal(_)));
        if !safe || relative.as_os_str().is_empty() {
            return Err(io::Error::new(
                ErrorKind::InvalidInput,
                format!("refusing to touch path outside storage root: {path}"),
            ));
        }
        Ok(self.root.join(relative))
    }
}

#[async_trait]
impl ImageStorage for LocalImageStorage {
    async fn delete(&self, path: &str) -> io::Result<()> {
        let full = self.resolve(path)?;
        match tokio::fs::remove_file(&full).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e),
        }
    }
}
