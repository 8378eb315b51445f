//! Loading profiles from `*.profile` directory trees.

use crate::profile::{Profile, ProfileError, INTERNAL_PID, PARENTS, PROPERTIES_SUFFIX};
use crate::properties::Properties;
use indexmap::IndexMap;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;
use walkdir::WalkDir;

const PROFILE_DIR_SUFFIX: &str = ".profile";

/// Load every profile under `root`.
///
/// A directory named `<x>.profile` is a profile whose id is its path relative
/// to `root` without the suffix and with `/` replaced by `-`. Files inside it,
/// but not inside a nested profile directory, are its file configurations.
pub fn load_profiles(root: &Path) -> Result<BTreeMap<String, Profile>, ProfileError> {
    let mut raw: BTreeMap<String, IndexMap<String, Vec<u8>>> = BTreeMap::new();

    for entry in WalkDir::new(root)
        .follow_links(true)
        .sort_by_file_name()
    {
        let entry = entry.map_err(|e| ProfileError::Walk {
            path: root.display().to_string(),
            reason: e.to_string(),
        })?;
        let rel = entry.path().strip_prefix(root).unwrap_or(entry.path());
        let parts: Vec<String> = rel
            .components()
            .map(|c| c.as_os_str().to_string_lossy().into_owned())
            .collect();

        let Some(owner) = parts.iter().rposition(|p| p.ends_with(PROFILE_DIR_SUFFIX)) else {
            continue;
        };
        let id = profile_id(&parts[..=owner]);

        if entry.file_type().is_dir() {
            raw.entry(id).or_default();
            continue;
        }
        if !entry.file_type().is_file() {
            continue;
        }
        let name = parts[owner + 1..].join("/");
        let bytes = fs::read(entry.path())?;
        raw.entry(id).or_default().insert(name, bytes);
    }

    let mut profiles = BTreeMap::new();
    for (id, files) in raw {
        let parents = parents_of(&files)?;
        debug!("loaded profile {id} ({} files)", files.len());
        let profile = Profile::new(id.clone(), parents, files, false)?;
        profiles.insert(id, profile);
    }
    Ok(profiles)
}

/// Load several roots; a profile found in a later root replaces an earlier one.
pub fn load_profile_sources(roots: &[PathBuf]) -> Result<BTreeMap<String, Profile>, ProfileError> {
    let mut profiles = BTreeMap::new();
    for root in roots {
        profiles.extend(load_profiles(root)?);
    }
    Ok(profiles)
}

/// Only the trailing `.profile` is dropped; outer profile dirs keep theirs.
fn profile_id(parts: &[String]) -> String {
    let joined = parts.join("-");
    joined
        .strip_suffix(PROFILE_DIR_SUFFIX)
        .unwrap_or(&joined)
        .to_owned()
}

fn parents_of(files: &IndexMap<String, Vec<u8>>) -> Result<Vec<String>, ProfileError> {
    let Some(bytes) = files.get(&format!("{INTERNAL_PID}{PROPERTIES_SUFFIX}")) else {
        return Ok(Vec::new());
    };
    let props = Properties::parse_bytes(bytes)?;
    Ok(props
        .get(PARENTS)
        .map(|p| p.split_whitespace().map(str::to_owned).collect())
        .unwrap_or_default())
}
