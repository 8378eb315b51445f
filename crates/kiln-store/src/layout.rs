use crate::StoreError;
use std::fs;
use std::path::{Component, Path, PathBuf};

const LOCK_FILE: &str = ".kiln.lock";

/// The four library directories fed from the overall profile.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LibraryKind {
    Library,
    Endorsed,
    Extension,
    Boot,
}

impl LibraryKind {
    pub const ALL: [LibraryKind; 4] = [
        LibraryKind::Library,
        LibraryKind::Endorsed,
        LibraryKind::Extension,
        LibraryKind::Boot,
    ];

    fn relative_dir(self) -> &'static str {
        match self {
            Self::Library => "lib",
            Self::Endorsed => "lib/endorsed",
            Self::Extension => "lib/ext",
            Self::Boot => "lib/boot",
        }
    }
}

/// Directory layout of an assembled home.
///
/// All subdirectories are created lazily on [`initialize`](Self::initialize).
#[derive(Debug, Clone)]
pub struct AssemblyLayout {
    home: PathBuf,
}

impl AssemblyLayout {
    pub fn new(home: impl Into<PathBuf>) -> Self {
        Self { home: home.into() }
    }

    #[inline]
    pub fn home(&self) -> &Path {
        &self.home
    }

    #[inline]
    pub fn etc_dir(&self) -> PathBuf {
        self.home.join("etc")
    }

    #[inline]
    pub fn system_dir(&self) -> PathBuf {
        self.home.join("system")
    }

    #[inline]
    pub fn lib_dir(&self, kind: LibraryKind) -> PathBuf {
        self.home.join(kind.relative_dir())
    }

    #[inline]
    pub fn lock_file(&self) -> PathBuf {
        self.home.join(LOCK_FILE)
    }

    /// Path of a file under `etc/`. Rejects names that leave the directory.
    pub fn etc_path(&self, name: &str) -> Result<PathBuf, StoreError> {
        Ok(self.etc_dir().join(checked_relative(name)?))
    }

    /// Path of a maven-layout entry under `system/`.
    pub fn system_path(&self, relative: &str) -> Result<PathBuf, StoreError> {
        Ok(self.system_dir().join(checked_relative(relative)?))
    }

    pub fn initialize(&self) -> Result<(), StoreError> {
        fs::create_dir_all(self.etc_dir())?;
        fs::create_dir_all(self.system_dir())?;
        for kind in LibraryKind::ALL {
            fs::create_dir_all(self.lib_dir(kind))?;
        }
        Ok(())
    }
}

fn checked_relative(name: &str) -> Result<&Path, StoreError> {
    let path = Path::new(name);
    let escapes = name.is_empty()
        || path
            .components()
            .any(|c| !matches!(c, Component::Normal(_) | Component::CurDir));
    if escapes {
        return Err(StoreError::InvalidPath(name.to_owned()));
    }
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn layout_paths_are_correct() {
        let layout = AssemblyLayout::new("/tmp/kiln-test");
        assert_eq!(layout.etc_dir(), PathBuf::from("/tmp/kiln-test/etc"));
        assert_eq!(layout.system_dir(), PathBuf::from("/tmp/kiln-test/system"));
        assert_eq!(
            layout.lib_dir(LibraryKind::Endorsed),
            PathBuf::from("/tmp/kiln-test/lib/endorsed")
        );
        assert_eq!(
            layout.lib_dir(LibraryKind::Extension),
            PathBuf::from("/tmp/kiln-test/lib/ext")
        );
        assert_eq!(
            layout.lock_file(),
            PathBuf::from("/tmp/kiln-test/.kiln.lock")
        );
    }

    #[test]
    fn initialize_creates_directories() {
        let dir = tempfile::tempdir().unwrap();
        let layout = AssemblyLayout::new(dir.path());
        layout.initialize().unwrap();

        assert!(layout.etc_dir().is_dir());
        assert!(layout.system_dir().is_dir());
        for kind in LibraryKind::ALL {
            assert!(layout.lib_dir(kind).is_dir());
        }
    }

    #[test]
    fn initialize_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let layout = AssemblyLayout::new(dir.path());
        layout.initialize().unwrap();
        layout.initialize().unwrap();
    }

    #[test]
    fn etc_path_rejects_escapes() {
        let layout = AssemblyLayout::new("/tmp/kiln-test");
        assert_eq!(
            layout.etc_path("jetty/jetty.xml").unwrap(),
            PathBuf::from("/tmp/kiln-test/etc/jetty/jetty.xml")
        );
        assert!(layout.etc_path("../escape.cfg").is_err());
        assert!(layout.etc_path("/etc/passwd").is_err());
        assert!(layout.etc_path("").is_err());
    }
}
