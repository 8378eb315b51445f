//! Feature repository model and its two manifest dialects.

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const FEATURES_NS_CURRENT: &str = "http://karaf.apache.org/xmlns/features/v1.3.0";
pub const FEATURES_NS_LEGACY: &str = "http://karaf.apache.org/xmlns/features/v1.2.0";
pub const DEFAULT_FEATURE_VERSION: &str = "0.0.0";

#[derive(Debug, Error)]
pub enum FeaturesError {
    #[error("failed to parse features repository '{source_name}': {reason}")]
    Parse { source_name: String, reason: String },
    #[error("failed to serialize features repository: {0}")]
    Serialize(String),
}

/// Output dialect for a serialized features repository.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Dialect {
    /// Older loaders: v1.2.0 namespace, no `dependency`/`prerequisite` attributes.
    Legacy,
    #[default]
    Current,
}

impl Dialect {
    pub fn from_legacy_flag(legacy: bool) -> Self {
        if legacy {
            Self::Legacy
        } else {
            Self::Current
        }
    }

    pub fn namespace(self) -> &'static str {
        match self {
            Self::Legacy => FEATURES_NS_LEGACY,
            Self::Current => FEATURES_NS_CURRENT,
        }
    }
}

/// A features repository: named features plus references to other repositories.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename = "features")]
pub struct FeaturesRepository {
    #[serde(rename = "@xmlns", default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
    #[serde(rename = "@name", default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(rename = "repository", default)]
    pub repositories: Vec<String>,
    #[serde(rename = "feature", default)]
    pub features: Vec<Feature>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Feature {
    #[serde(rename = "@name")]
    pub name: String,
    #[serde(rename = "@version", default = "default_version")]
    pub version: String,
    #[serde(rename = "@description", default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(rename = "@start-level", default, skip_serializing_if = "Option::is_none")]
    pub start_level: Option<u32>,
    #[serde(rename = "feature", default)]
    pub dependencies: Vec<Dependency>,
    #[serde(rename = "bundle", default)]
    pub bundles: Vec<BundleInfo>,
    #[serde(rename = "configfile", default)]
    pub config_files: Vec<ConfigFile>,
    #[serde(rename = "conditional", default)]
    pub conditionals: Vec<Conditional>,
}

/// Reference from one feature to another.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Dependency {
    #[serde(rename = "$text")]
    pub name: String,
    #[serde(rename = "@dependency", default, skip_serializing_if = "Option::is_none")]
    pub dependency: Option<bool>,
    #[serde(rename = "@prerequisite", default, skip_serializing_if = "Option::is_none")]
    pub prerequisite: Option<bool>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct BundleInfo {
    #[serde(rename = "$text")]
    pub location: String,
    #[serde(rename = "@start-level", default, skip_serializing_if = "Option::is_none")]
    pub start_level: Option<u32>,
    #[serde(rename = "@dependency", default, skip_serializing_if = "Option::is_none")]
    pub dependency: Option<bool>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ConfigFile {
    #[serde(rename = "$text")]
    pub location: String,
    #[serde(rename = "@finalname", default, skip_serializing_if = "Option::is_none")]
    pub final_name: Option<String>,
}

/// Bundles and config files that apply only when other features are present.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct Conditional {
    #[serde(rename = "condition", default)]
    pub conditions: Vec<String>,
    #[serde(rename = "bundle", default)]
    pub bundles: Vec<BundleInfo>,
    #[serde(rename = "configfile", default)]
    pub config_files: Vec<ConfigFile>,
}

fn default_version() -> String {
    DEFAULT_FEATURE_VERSION.to_owned()
}

impl Feature {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            version: default_version(),
            description: None,
            start_level: None,
            dependencies: Vec::new(),
            bundles: Vec::new(),
            config_files: Vec::new(),
            conditionals: Vec::new(),
        }
    }

    /// `name/version`, the form used for exact matches.
    pub fn id(&self) -> String {
        format!("{}/{}", self.name, self.version)
    }

    /// Whether `target` names this feature, either bare or as `name/version`.
    pub fn matches(&self, target: &str) -> bool {
        match target.split_once('/') {
            Some((name, version)) => self.name == name && self.version == version,
            None => self.name == target,
        }
    }

    /// Every bundle, including conditional ones.
    pub fn all_bundles(&self) -> impl Iterator<Item = &BundleInfo> {
        self.bundles
            .iter()
            .chain(self.conditionals.iter().flat_map(|c| c.bundles.iter()))
    }

    /// Every config file, including conditional ones.
    pub fn all_config_files(&self) -> impl Iterator<Item = &ConfigFile> {
        self.config_files
            .iter()
            .chain(self.conditionals.iter().flat_map(|c| c.config_files.iter()))
    }

    pub fn dependency(&self, name: &str) -> Option<&Dependency> {
        self.dependencies.iter().find(|d| d.name == name)
    }

    /// Add a dependency unless one with the same name exists; return it either way.
    pub fn dependency_mut_or_insert(&mut self, name: &str) -> &mut Dependency {
        let idx = match self.dependencies.iter().position(|d| d.name == name) {
            Some(idx) => idx,
            None => {
                self.dependencies.push(Dependency::new(name));
                self.dependencies.len() - 1
            }
        };
        &mut self.dependencies[idx]
    }
}

impl Dependency {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            dependency: None,
            prerequisite: None,
        }
    }

    pub fn is_dependency(&self) -> bool {
        self.dependency.unwrap_or(false)
    }

    pub fn is_prerequisite(&self) -> bool {
        self.prerequisite.unwrap_or(false)
    }
}

impl BundleInfo {
    pub fn new(location: impl Into<String>) -> Self {
        Self {
            location: location.into(),
            start_level: None,
            dependency: None,
        }
    }

    pub fn is_dependency(&self) -> bool {
        self.dependency.unwrap_or(false)
    }
}

impl FeaturesRepository {
    pub fn parse(source_name: &str, input: &str) -> Result<Self, FeaturesError> {
        quick_xml::de::from_str(input).map_err(|e| FeaturesError::Parse {
            source_name: source_name.to_owned(),
            reason: e.to_string(),
        })
    }

    pub fn parse_bytes(source_name: &str, bytes: &[u8]) -> Result<Self, FeaturesError> {
        Self::parse(source_name, &String::from_utf8_lossy(bytes))
    }

    pub fn feature(&self, name: &str) -> Option<&Feature> {
        self.features.iter().find(|f| f.name == name)
    }

    /// Serialize in the given dialect.
    ///
    /// The legacy dialect downgrades the namespace and drops every
    /// `dependency` and `prerequisite` attribute from the written document.
    pub fn to_xml(&self, dialect: Dialect) -> Result<String, FeaturesError> {
        let mut doc = self.clone();
        doc.namespace = Some(dialect.namespace().to_owned());
        if dialect == Dialect::Legacy {
            for feature in &mut doc.features {
                strip_flags(feature);
            }
        }

        let mut body = String::new();
        let mut ser = quick_xml::se::Serializer::new(&mut body);
        ser.indent(' ', 4);
        doc.serialize(ser)
            .map_err(|e| FeaturesError::Serialize(e.to_string()))?;

        Ok(format!(
            "<?xml version=\"1.0\" encoding=\"UTF-8\" standalone=\"yes\"?>\n{body}\n"
        ))
    }
}

fn strip_flags(feature: &mut Feature) {
    for dep in &mut feature.dependencies {
        dep.dependency = None;
        dep.prerequisite = None;
    }
    for bundle in &mut feature.bundles {
        bundle.dependency = None;
    }
    for cond in &mut feature.conditionals {
        for bundle in &mut cond.bundles {
            bundle.dependency = None;
        }
    }
}
