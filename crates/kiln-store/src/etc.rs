//! Writers for files under `etc/`.

use crate::layout::AssemblyLayout;
use crate::{write_atomic, StoreError};
use kiln_schema::Properties;
use std::path::PathBuf;
use tracing::debug;

/// Write a file under `etc/` verbatim.
pub fn write_etc_file(
    layout: &AssemblyLayout,
    name: &str,
    data: &[u8],
) -> Result<PathBuf, StoreError> {
    let path = layout.etc_path(name)?;
    write_atomic(&path, data)?;
    debug!("wrote {}", path.display());
    Ok(path)
}

/// Replace a properties file under `etc/`.
pub fn write_properties(
    layout: &AssemblyLayout,
    name: &str,
    props: &Properties,
) -> Result<PathBuf, StoreError> {
    write_etc_file(layout, name, &props.to_bytes())
}

/// Merge `props` over the existing file, keeping keys and order already there.
pub fn merge_properties(
    layout: &AssemblyLayout,
    name: &str,
    props: &Properties,
) -> Result<PathBuf, StoreError> {
    let path = layout.etc_path(name)?;
    let mut existing = Properties::load_or_default(&path)?;
    existing.extend(props.iter());
    write_atomic(&path, &existing.to_bytes())?;
    debug!("merged {} keys into {}", props.len(), path.display());
    Ok(path)
}
