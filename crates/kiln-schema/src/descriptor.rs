use crate::types::Stage;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use thiserror::Error;

pub const DEFAULT_JAVASE: &str = "1.8";
pub const DEFAULT_START_LEVEL: u32 = 50;
pub const DEFAULT_FETCH_THREADS: usize = 8;

#[derive(Debug, Error)]
pub enum DescriptorError {
    #[error("failed to read assembly descriptor: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse assembly descriptor: {0}")]
    ParseToml(#[from] toml::de::Error),
    #[error("unsupported assembly_version: {0}, expected 1")]
    UnsupportedVersion(u32),
    #[error("home must not be empty")]
    EmptyHome,
    #[error("default_start_level must be greater than 0")]
    InvalidStartLevel,
    #[error("fetch.threads must be greater than 0")]
    InvalidThreads,
    #[error("{section} entry must not be empty")]
    EmptyEntry { section: &'static str },
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct AssemblyDescriptor {
    pub assembly_version: u32,
    pub home: String,
    #[serde(default = "default_javase")]
    pub javase: String,
    #[serde(default)]
    pub environment: Option<String>,
    #[serde(default)]
    pub default_stage: Stage,
    #[serde(default = "default_true")]
    pub default_add_all: bool,
    #[serde(default = "default_start_level")]
    pub default_start_level: u32,
    #[serde(default)]
    pub use_reference_urls: bool,
    #[serde(default)]
    pub legacy_syntax: bool,
    #[serde(default)]
    pub ignore_dependency_flag: bool,
    #[serde(default)]
    pub profile_sources: Vec<String>,
    #[serde(default)]
    pub fetch: FetchSection,
    #[serde(default, rename = "profile")]
    pub profiles: Vec<NamedEntry>,
    #[serde(default, rename = "repository")]
    pub repositories: Vec<RepositoryEntry>,
    #[serde(default, rename = "feature")]
    pub features: Vec<NamedEntry>,
    #[serde(default, rename = "bundle")]
    pub bundles: Vec<LocationEntry>,
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct FetchSection {
    #[serde(default)]
    pub local_repository: Option<String>,
    #[serde(default)]
    pub remote_repositories: Vec<String>,
    #[serde(default = "default_threads")]
    pub threads: usize,
}

impl Default for FetchSection {
    fn default() -> Self {
        Self {
            local_repository: None,
            remote_repositories: Vec::new(),
            threads: default_threads(),
        }
    }
}

/// A `[[profile]]` or `[[feature]]` entry.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct NamedEntry {
    pub name: String,
    #[serde(default)]
    pub stage: Option<Stage>,
}

/// A `[[bundle]]` entry.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct LocationEntry {
    pub location: String,
    #[serde(default)]
    pub stage: Option<Stage>,
}

/// A `[[repository]]` entry.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct RepositoryEntry {
    pub location: String,
    #[serde(default)]
    pub stage: Option<Stage>,
    #[serde(default)]
    pub add_all: Option<bool>,
}

fn default_javase() -> String {
    DEFAULT_JAVASE.to_owned()
}

fn default_true() -> bool {
    true
}

fn default_start_level() -> u32 {
    DEFAULT_START_LEVEL
}

fn default_threads() -> usize {
    DEFAULT_FETCH_THREADS
}

pub fn parse_descriptor_str(input: &str) -> Result<AssemblyDescriptor, DescriptorError> {
    Ok(toml::from_str(input)?)
}

pub fn parse_descriptor_file(path: impl AsRef<Path>) -> Result<AssemblyDescriptor, DescriptorError> {
    let content = fs::read_to_string(path)?;
    parse_descriptor_str(&content)
}
