//! On-disk assembly layout for kiln.
//!
//! This crate provides the storage layer: `AssemblyLayout` for the directory
//! structure of an assembled home (`etc/`, `system/`, `lib/...`), atomic file
//! writers for configuration output, and `SystemRepository`, which copies
//! materialized artifacts into the maven-style `system/` tree.

pub mod etc;
pub mod layout;
pub mod system;

pub use etc::{merge_properties, write_etc_file, write_properties};
pub use layout::{AssemblyLayout, LibraryKind};
pub use system::SystemRepository;

use std::fs;
use std::io::Write;
use std::path::Path;
use tempfile::NamedTempFile;
use thiserror::Error;

/// Fsync a directory to ensure that a preceding `rename()` is durable.
pub(crate) fn fsync_dir(dir: &Path) -> Result<(), std::io::Error> {
    let f = fs::File::open(dir)?;
    f.sync_all()
}

/// Write `data` to `dest` through a temp file in the same directory.
///
/// Readers never observe a partially written file.
pub fn write_atomic(dest: &Path, data: &[u8]) -> Result<(), StoreError> {
    let dir = dest
        .parent()
        .ok_or_else(|| StoreError::InvalidPath(dest.display().to_string()))?;
    fs::create_dir_all(dir)?;
    let mut tmp = NamedTempFile::new_in(dir)?;
    tmp.write_all(data)?;
    tmp.as_file().sync_all()?;
    tmp.persist(dest).map_err(|e| StoreError::Io(e.error))?;
    fsync_dir(dir)?;
    Ok(())
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("invalid properties file: {0}")]
    Properties(#[from] kiln_schema::PropertiesError),
    #[error("cannot install artifact: {0}")]
    InvalidCoordinate(#[from] kiln_schema::CoordinateError),
    #[error("path '{0}' escapes the assembly home")]
    InvalidPath(String),
}
