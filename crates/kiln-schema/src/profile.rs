use crate::properties::{Properties, PropertiesError};
use indexmap::IndexMap;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::OnceLock;
use thiserror::Error;

/// Namespace holding the profile's own settings (lists, attributes, config).
pub const INTERNAL_PID: &str = "profile";
/// File names with this suffix are parsed into a configuration namespace.
pub const PROPERTIES_SUFFIX: &str = ".cfg";
pub const ATTRIBUTE_PREFIX: &str = "attribute.";
pub const CONFIG_PREFIX: &str = "config.";
pub const SYSTEM_PREFIX: &str = "system.";
pub const PARENTS: &str = "attribute.parents";
pub const ABSTRACT: &str = "abstract";
pub const HIDDEN: &str = "hidden";

#[derive(Debug, Error)]
pub enum ProfileError {
    #[error("profile id must not be empty")]
    EmptyId,
    #[error(
        "profile id '{0}' is invalid, expected letters, digits, '.', '_' or '-' \
         starting with a letter or digit"
    )]
    InvalidId(String),
    #[error("invalid configuration file: {0}")]
    Properties(#[from] PropertiesError),
    #[error("profile I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("profile '{profile}' references missing parent '{parent}'")]
    MissingParent { profile: String, parent: String },
    #[error("unresolved placeholder '{placeholder}' in {pid}/{key}")]
    UnresolvedPlaceholder {
        pid: String,
        key: String,
        placeholder: String,
    },
    #[error("failed to walk profile source {path}: {reason}")]
    Walk { path: String, reason: String },
}

/// Check a profile id against `^[A-Za-z0-9][.A-Za-z0-9_-]*$`.
pub fn validate_profile_id(id: &str) -> Result<(), ProfileError> {
    let Some(first) = id.bytes().next() else {
        return Err(ProfileError::EmptyId);
    };
    let valid = first.is_ascii_alphanumeric()
        && id
            .bytes()
            .skip(1)
            .all(|b| b.is_ascii_alphanumeric() || matches!(b, b'.' | b'_' | b'-'));
    if valid {
        Ok(())
    } else {
        Err(ProfileError::InvalidId(id.to_owned()))
    }
}

/// List-valued settings stored in the internal namespace as `<prefix>.<item>`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigListType {
    Bundles,
    Features,
    Endorsed,
    Extensions,
    Boot,
    Libraries,
    Optionals,
    Overrides,
    Repositories,
}

impl ConfigListType {
    pub fn prefix(self) -> &'static str {
        match self {
            Self::Bundles => "bundle.",
            Self::Features => "feature.",
            Self::Endorsed => "endorsed.",
            Self::Extensions => "extension.",
            Self::Boot => "boot.",
            Self::Libraries => "library.",
            Self::Optionals => "optional.",
            Self::Overrides => "override.",
            Self::Repositories => "repository.",
        }
    }
}

/// Immutable, inheritable bag of configuration files.
///
/// Every file whose name ends in [`PROPERTIES_SUFFIX`] is also parsed into a
/// configuration namespace named after the file. Typed views (bundle list,
/// feature list, config properties, ...) are derived on access from the
/// [`INTERNAL_PID`] namespace. Equality covers the id and the raw file map.
#[derive(Clone)]
pub struct Profile {
    id: String,
    parents: Vec<String>,
    files: IndexMap<String, Vec<u8>>,
    configurations: IndexMap<String, IndexMap<String, String>>,
    overlay: bool,
    checksum: OnceLock<u64>,
}

impl Profile {
    pub fn new(
        id: impl Into<String>,
        parents: Vec<String>,
        files: IndexMap<String, Vec<u8>>,
        overlay: bool,
    ) -> Result<Self, ProfileError> {
        let id = id.into();
        validate_profile_id(&id)?;

        let mut configurations = IndexMap::new();
        for (name, bytes) in &files {
            if let Some(pid) = name.strip_suffix(PROPERTIES_SUFFIX) {
                let props = Properties::parse_bytes(bytes)?;
                configurations.insert(pid.to_owned(), props.into_map());
            }
        }

        Ok(Self {
            id,
            parents,
            files,
            configurations,
            overlay,
            checksum: OnceLock::new(),
        })
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn parent_ids(&self) -> &[String] {
        &self.parents
    }

    pub fn is_overlay(&self) -> bool {
        self.overlay
    }

    pub fn file_configurations(&self) -> &IndexMap<String, Vec<u8>> {
        &self.files
    }

    pub fn file_configuration(&self, name: &str) -> Option<&[u8]> {
        self.files.get(name).map(Vec::as_slice)
    }

    pub fn configuration_file_names(&self) -> impl Iterator<Item = &str> {
        self.files.keys().map(String::as_str)
    }

    pub fn configurations(&self) -> &IndexMap<String, IndexMap<String, String>> {
        &self.configurations
    }

    /// Configuration for a namespace; empty when the namespace is unknown.
    pub fn configuration(&self, pid: &str) -> IndexMap<String, String> {
        self.configurations.get(pid).cloned().unwrap_or_default()
    }

    pub fn attributes(&self) -> IndexMap<String, String> {
        self.prefixed_map(ATTRIBUTE_PREFIX)
    }

    /// Framework properties destined for `config.properties`.
    pub fn config(&self) -> IndexMap<String, String> {
        self.prefixed_map(CONFIG_PREFIX)
    }

    /// JVM system properties destined for `system.properties`.
    pub fn system(&self) -> IndexMap<String, String> {
        self.prefixed_map(SYSTEM_PREFIX)
    }

    pub fn bundles(&self) -> Vec<String> {
        self.container_list(ConfigListType::Bundles)
    }

    pub fn features(&self) -> Vec<String> {
        self.container_list(ConfigListType::Features)
    }

    pub fn repositories(&self) -> Vec<String> {
        self.container_list(ConfigListType::Repositories)
    }

    pub fn overrides(&self) -> Vec<String> {
        self.container_list(ConfigListType::Overrides)
    }

    pub fn optionals(&self) -> Vec<String> {
        self.container_list(ConfigListType::Optionals)
    }

    pub fn libraries(&self) -> Vec<String> {
        self.container_list(ConfigListType::Libraries)
    }

    pub fn endorsed_libraries(&self) -> Vec<String> {
        self.container_list(ConfigListType::Endorsed)
    }

    pub fn extension_libraries(&self) -> Vec<String> {
        self.container_list(ConfigListType::Extensions)
    }

    pub fn boot_libraries(&self) -> Vec<String> {
        self.container_list(ConfigListType::Boot)
    }

    pub fn is_abstract(&self) -> bool {
        self.attribute_flag(ABSTRACT)
    }

    pub fn is_hidden(&self) -> bool {
        self.attribute_flag(HIDDEN)
    }

    /// Checksum over the id and the sorted file map. Computed once.
    pub fn checksum(&self) -> u64 {
        *self.checksum.get_or_init(|| {
            let mut hasher = blake3::Hasher::new();
            hasher.update(self.id.as_bytes());
            let mut names: Vec<&String> = self.files.keys().collect();
            names.sort();
            for name in names {
                hasher.update(name.as_bytes());
                hasher.update(&self.files[name]);
            }
            let digest = hasher.finalize();
            let mut head = [0u8; 8];
            head.copy_from_slice(&digest.as_bytes()[..8]);
            u64::from_le_bytes(head)
        })
    }

    pub fn container_list(&self, kind: ConfigListType) -> Vec<String> {
        let prefix = kind.prefix();
        self.configurations
            .get(INTERNAL_PID)
            .map(|config| {
                config
                    .iter()
                    .filter(|(k, _)| k.starts_with(prefix))
                    .map(|(_, v)| v.clone())
                    .collect()
            })
            .unwrap_or_default()
    }

    fn prefixed_map(&self, prefix: &str) -> IndexMap<String, String> {
        self.configurations
            .get(INTERNAL_PID)
            .map(|config| {
                config
                    .iter()
                    .filter_map(|(k, v)| k.strip_prefix(prefix).map(|s| (s.to_owned(), v.clone())))
                    .collect()
            })
            .unwrap_or_default()
    }

    fn attribute_flag(&self, name: &str) -> bool {
        self.attributes()
            .get(name)
            .is_some_and(|v| v.trim().eq_ignore_ascii_case("true"))
    }
}

impl PartialEq for Profile {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id && self.files == other.files
    }
}

impl Eq for Profile {}

impl Hash for Profile {
    fn hash<H: Hasher>(&self, state: &mut H) {
        state.write_u64(self.checksum());
    }
}

impl fmt::Debug for Profile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Profile")
            .field("id", &self.id)
            .field("parents", &self.parents)
            .field("files", &self.files.keys().collect::<Vec<_>>())
            .field("overlay", &self.overlay)
            .finish()
    }
}

impl fmt::Display for Profile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Profile[id={},attrs={:?}]", self.id, self.attributes())
    }
}

/// Assembles a new [`Profile`]; the only way to obtain a modified profile.
#[derive(Debug, Clone)]
pub struct ProfileBuilder {
    id: String,
    parents: Vec<String>,
    files: IndexMap<String, Vec<u8>>,
    internal: Properties,
    overlay: bool,
}

impl ProfileBuilder {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            parents: Vec::new(),
            files: IndexMap::new(),
            internal: Properties::new(),
            overlay: false,
        }
    }

    /// Start from an existing profile's id, parents and files.
    pub fn from_profile(profile: &Profile) -> Self {
        let internal = profile
            .configurations
            .get(INTERNAL_PID)
            .cloned()
            .map(Properties::from)
            .unwrap_or_default();
        let mut files = profile.files.clone();
        files.shift_remove(&internal_file_name());
        Self {
            id: profile.id.clone(),
            parents: profile.parents.clone(),
            files,
            internal,
            overlay: profile.overlay,
        }
    }

    #[must_use]
    pub fn id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }

    #[must_use]
    pub fn parents(mut self, parents: Vec<String>) -> Self {
        if parents.is_empty() {
            self.internal.remove(PARENTS);
        } else {
            self.internal.insert(PARENTS, parents.join(" "));
        }
        self.parents = parents;
        self
    }

    #[must_use]
    pub fn overlay(mut self, overlay: bool) -> Self {
        self.overlay = overlay;
        self
    }

    #[must_use]
    pub fn repositories(self, values: Vec<String>) -> Self {
        self.container_list(ConfigListType::Repositories, values)
    }

    #[must_use]
    pub fn features(self, values: Vec<String>) -> Self {
        self.container_list(ConfigListType::Features, values)
    }

    #[must_use]
    pub fn bundles(self, values: Vec<String>) -> Self {
        self.container_list(ConfigListType::Bundles, values)
    }

    #[must_use]
    pub fn container_list(mut self, kind: ConfigListType, values: Vec<String>) -> Self {
        let prefix = kind.prefix();
        let stale: Vec<String> = self
            .internal
            .iter()
            .filter(|(k, _)| k.starts_with(prefix))
            .map(|(k, _)| k.to_owned())
            .collect();
        for key in stale {
            self.internal.remove(&key);
        }
        for value in values {
            self.internal.insert(format!("{prefix}{value}"), value);
        }
        self
    }

    /// Set a single key in the internal namespace.
    #[must_use]
    pub fn internal_property(mut self, key: &str, value: &str) -> Self {
        self.internal.insert(key, value);
        self
    }

    /// Add or replace a raw file. A `profile.cfg` replaces the internal namespace.
    pub fn file(mut self, name: impl Into<String>, bytes: Vec<u8>) -> Result<Self, ProfileError> {
        let name = name.into();
        if name == internal_file_name() {
            self.internal = Properties::parse_bytes(&bytes)?;
        } else {
            self.files.insert(name, bytes);
        }
        Ok(self)
    }

    /// Replace a configuration namespace with the given properties.
    #[must_use]
    pub fn configuration(mut self, pid: &str, props: &Properties) -> Self {
        if pid == INTERNAL_PID {
            self.internal = props.clone();
        } else {
            self.files
                .insert(format!("{pid}{PROPERTIES_SUFFIX}"), props.to_bytes());
        }
        self
    }

    pub fn build(self) -> Result<Profile, ProfileError> {
        let mut files = IndexMap::with_capacity(self.files.len() + 1);
        if !self.internal.is_empty() {
            files.insert(internal_file_name(), self.internal.to_bytes());
        }
        files.extend(self.files);
        Profile::new(self.id, self.parents, files, self.overlay)
    }
}

fn internal_file_name() -> String {
    format!("{INTERNAL_PID}{PROPERTIES_SUFFIX}")
}
