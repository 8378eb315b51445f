use crate::{file_name_for, ArtifactSource, FetchError};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

/// In-memory artifact source for tests.
///
/// Records how often each location was fetched.
#[derive(Default)]
pub struct MemorySource {
    artifacts: Mutex<HashMap<String, Vec<u8>>>,
    fetches: Mutex<HashMap<String, usize>>,
}

impl MemorySource {
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with(self, location: &str, data: impl Into<Vec<u8>>) -> Self {
        self.insert(location, data);
        self
    }

    pub fn insert(&self, location: &str, data: impl Into<Vec<u8>>) {
        self.artifacts.lock().insert(location.to_owned(), data.into());
    }

    pub fn fetch_count(&self, location: &str) -> usize {
        self.fetches.lock().get(location).copied().unwrap_or(0)
    }
}

impl ArtifactSource for MemorySource {
    fn fetch(&self, location: &str, dest_dir: &Path) -> Result<PathBuf, FetchError> {
        *self.fetches.lock().entry(location.to_owned()).or_default() += 1;
        let data = self
            .artifacts
            .lock()
            .get(location)
            .cloned()
            .ok_or_else(|| FetchError::NotFound(location.to_owned()))?;
        let dest = dest_dir.join(file_name_for(location));
        fs::write(&dest, data)?;
        Ok(dest)
    }
}
