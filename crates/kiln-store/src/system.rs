use crate::layout::{AssemblyLayout, LibraryKind};
use crate::{write_atomic, StoreError};
use kiln_schema::path_from_maven;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::debug;

/// The maven-layout artifact tree under `system/`.
///
/// Copies into the same destination are serialized per path, so many
/// features referencing a popular artifact never race on one file.
#[derive(Debug)]
pub struct SystemRepository {
    layout: AssemblyLayout,
    path_locks: Mutex<HashMap<PathBuf, Arc<Mutex<()>>>>,
}

impl SystemRepository {
    pub fn new(layout: AssemblyLayout) -> Self {
        Self {
            layout,
            path_locks: Mutex::new(HashMap::new()),
        }
    }

    pub fn layout(&self) -> &AssemblyLayout {
        &self.layout
    }

    /// Copy a fetched `mvn:` artifact into `system/<maven path>`.
    pub fn install(&self, location: &str, source: &Path) -> Result<PathBuf, StoreError> {
        let relative = path_from_maven(location)?;
        let dest = self.layout.system_path(&relative)?;
        self.copy_locked(source, &dest)?;
        debug!("installed {location} -> {}", dest.display());
        Ok(dest)
    }

    /// Copy a fetched library into one of the `lib/` directories.
    pub fn install_library(
        &self,
        kind: LibraryKind,
        source: &Path,
    ) -> Result<PathBuf, StoreError> {
        let name = source
            .file_name()
            .ok_or_else(|| StoreError::InvalidPath(source.display().to_string()))?;
        let dest = self.layout.lib_dir(kind).join(name);
        self.copy_locked(source, &dest)?;
        debug!("installed library {}", dest.display());
        Ok(dest)
    }

    /// Whether an artifact has already been copied into `system/`.
    pub fn contains(&self, location: &str) -> bool {
        path_from_maven(location)
            .ok()
            .and_then(|rel| self.layout.system_path(&rel).ok())
            .is_some_and(|p| p.is_file())
    }

    fn copy_locked(&self, source: &Path, dest: &Path) -> Result<(), StoreError> {
        let lock = {
            let mut locks = self.path_locks.lock();
            Arc::clone(locks.entry(dest.to_path_buf()).or_default())
        };
        let _guard = lock.lock();
        let data = fs::read(source)?;
        write_atomic(dest, &data)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rayon::prelude::*;

    fn repo() -> (tempfile::TempDir, SystemRepository) {
        let dir = tempfile::tempdir().unwrap();
        let layout = AssemblyLayout::new(dir.path().join("home"));
        layout.initialize().unwrap();
        (dir, SystemRepository::new(layout))
    }

    #[test]
    fn install_uses_maven_layout() {
        let (dir, repo) = repo();
        let src = dir.path().join("core.jar");
        fs::write(&src, b"jar").unwrap();

        let dest = repo.install("mvn:org.example/core/1.0", &src).unwrap();
        assert!(dest.ends_with("system/org/example/core/1.0/core-1.0.jar"));
        assert_eq!(fs::read(dest).unwrap(), b"jar");
        assert!(repo.contains("mvn:org.example/core/1.0"));
        assert!(!repo.contains("mvn:org.example/core/2.0"));
    }

    #[test]
    fn install_rejects_non_maven() {
        let (dir, repo) = repo();
        let src = dir.path().join("x.jar");
        fs::write(&src, b"x").unwrap();
        assert!(matches!(
            repo.install("http://example.com/x.jar", &src),
            Err(StoreError::InvalidCoordinate(_))
        ));
    }

    #[test]
    fn concurrent_installs_of_one_artifact() {
        let (dir, repo) = repo();
        let src = dir.path().join("shared.jar");
        fs::write(&src, b"shared").unwrap();

        (0..32).into_par_iter().for_each(|_| {
            repo.install("mvn:g/shared/1.0", &src).unwrap();
        });

        let dest = repo.layout().system_dir().join("g/shared/1.0/shared-1.0.jar");
        assert_eq!(fs::read(dest).unwrap(), b"shared");
    }

    #[test]
    fn install_library_keeps_file_name() {
        let (dir, repo) = repo();
        let src = dir.path().join("endorsed-api.jar");
        fs::write(&src, b"api").unwrap();
        let dest = repo.install_library(LibraryKind::Endorsed, &src).unwrap();
        assert!(dest.ends_with("lib/endorsed/endorsed-api.jar"));
    }
}
