use crate::descriptor::{
    AssemblyDescriptor, DescriptorError, DEFAULT_FETCH_THREADS, DEFAULT_JAVASE,
    DEFAULT_START_LEVEL,
};
use crate::features::Dialect;
use crate::types::{RepositoryInfo, Stage};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Validated assembly inputs with every default resolved.
///
/// Staged collections keep descriptor order. A name declared twice keeps its
/// first position and takes the later stage. This is the input to identity
/// hashing and to the assembly orchestrator.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AssemblyPlan {
    pub assembly_version: u32,
    pub home: PathBuf,
    pub javase: String,
    pub environment: Option<String>,
    pub default_start_level: u32,
    pub use_reference_urls: bool,
    pub legacy_syntax: bool,
    pub ignore_dependency_flag: bool,
    pub profile_sources: Vec<PathBuf>,
    pub fetch: FetchPlan,
    pub profiles: IndexMap<String, Stage>,
    pub repositories: IndexMap<String, RepositoryInfo>,
    pub features: IndexMap<String, Stage>,
    pub bundles: IndexMap<String, Stage>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct FetchPlan {
    pub local_repository: Option<PathBuf>,
    pub remote_repositories: Vec<String>,
    pub threads: usize,
}

impl Default for FetchPlan {
    fn default() -> Self {
        Self {
            local_repository: None,
            remote_repositories: Vec::new(),
            threads: DEFAULT_FETCH_THREADS,
        }
    }
}

impl AssemblyDescriptor {
    /// Validate the descriptor and resolve defaults into an [`AssemblyPlan`].
    pub fn normalize(&self) -> Result<AssemblyPlan, DescriptorError> {
        if self.assembly_version != 1 {
            return Err(DescriptorError::UnsupportedVersion(self.assembly_version));
        }

        let home = self.home.trim();
        if home.is_empty() {
            return Err(DescriptorError::EmptyHome);
        }
        if self.default_start_level == 0 {
            return Err(DescriptorError::InvalidStartLevel);
        }
        if self.fetch.threads == 0 {
            return Err(DescriptorError::InvalidThreads);
        }

        let mut plan = AssemblyPlan::new(home);
        plan.javase = non_empty_or(&self.javase, DEFAULT_JAVASE);
        plan.environment = self
            .environment
            .as_deref()
            .map(str::trim)
            .filter(|e| !e.is_empty())
            .map(str::to_owned);
        plan.default_start_level = self.default_start_level;
        plan.use_reference_urls = self.use_reference_urls;
        plan.legacy_syntax = self.legacy_syntax;
        plan.ignore_dependency_flag = self.ignore_dependency_flag;
        plan.profile_sources = self
            .profile_sources
            .iter()
            .map(|s| s.trim())
            .filter(|s| !s.is_empty())
            .map(expand_home)
            .collect();
        plan.fetch = FetchPlan {
            local_repository: self
                .fetch
                .local_repository
                .as_deref()
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(expand_home),
            remote_repositories: self
                .fetch
                .remote_repositories
                .iter()
                .map(|r| r.trim().trim_end_matches('/').to_owned())
                .filter(|r| !r.is_empty())
                .collect(),
            threads: self.fetch.threads,
        };

        let default_stage = self.default_stage;
        for entry in &self.profiles {
            let name = required(&entry.name, "profile")?;
            plan.profiles
                .insert(name, entry.stage.unwrap_or(default_stage));
        }
        for entry in &self.repositories {
            let location = required(&entry.location, "repository")?;
            plan.repositories.insert(
                location,
                RepositoryInfo {
                    stage: entry.stage.unwrap_or(default_stage),
                    add_all: entry.add_all.unwrap_or(self.default_add_all),
                },
            );
        }
        for entry in &self.features {
            let name = required(&entry.name, "feature")?;
            plan.features
                .insert(name, entry.stage.unwrap_or(default_stage));
        }
        for entry in &self.bundles {
            let location = required(&entry.location, "bundle")?;
            plan.bundles
                .insert(location, entry.stage.unwrap_or(default_stage));
        }

        Ok(plan)
    }
}

impl AssemblyPlan {
    /// An empty plan writing to `home`, with every setting at its default.
    pub fn new(home: impl Into<PathBuf>) -> Self {
        Self {
            assembly_version: 1,
            home: home.into(),
            javase: DEFAULT_JAVASE.to_owned(),
            environment: None,
            default_start_level: DEFAULT_START_LEVEL,
            use_reference_urls: false,
            legacy_syntax: false,
            ignore_dependency_flag: false,
            profile_sources: Vec::new(),
            fetch: FetchPlan::default(),
            profiles: IndexMap::new(),
            repositories: IndexMap::new(),
            features: IndexMap::new(),
            bundles: IndexMap::new(),
        }
    }

    /// Resolve relative paths against the directory holding the descriptor.
    #[must_use]
    pub fn rebase(mut self, base: &Path) -> Self {
        self.home = rebase_path(base, self.home);
        self.profile_sources = self
            .profile_sources
            .into_iter()
            .map(|p| rebase_path(base, p))
            .collect();
        self.fetch.local_repository = self
            .fetch
            .local_repository
            .map(|p| rebase_path(base, p));
        self
    }

    pub fn dialect(&self) -> Dialect {
        Dialect::from_legacy_flag(self.legacy_syntax)
    }

    pub fn canonical_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

fn required(value: &str, section: &'static str) -> Result<String, DescriptorError> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(DescriptorError::EmptyEntry { section });
    }
    Ok(trimmed.to_owned())
}

fn non_empty_or(value: &str, fallback: &str) -> String {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        fallback.to_owned()
    } else {
        trimmed.to_owned()
    }
}

fn expand_home(path: &str) -> PathBuf {
    match (path.strip_prefix("~/"), std::env::var_os("HOME")) {
        (Some(rest), Some(home)) => PathBuf::from(home).join(rest),
        _ => PathBuf::from(path),
    }
}

fn rebase_path(base: &Path, path: PathBuf) -> PathBuf {
    if path.is_absolute() {
        path
    } else {
        base.join(path)
    }
}

#[cfg(test)]
mod tests {
    use crate::descriptor::parse_descriptor_str;
    use crate::types::Stage;
    use std::path::{Path, PathBuf};

    #[test]
    fn normalizes_with_defaults_and_order() {
        let input = r#"
assembly_version = 1
home = " out "
default_stage = "installed"

[[feature]]
name = "zeta"

[[feature]]
name = " alpha "
stage = "startup"

[[repository]]
location = "mvn:g/features/1.0/xml/features"
"#;
        let plan = parse_descriptor_str(input).unwrap().normalize().unwrap();
        assert_eq!(plan.home, PathBuf::from("out"));
        let names: Vec<_> = plan.features.keys().cloned().collect();
        assert_eq!(names, vec!["zeta", "alpha"]);
        assert_eq!(plan.features["zeta"], Stage::Installed);
        assert_eq!(plan.features["alpha"], Stage::Startup);
        let repo = plan.repositories["mvn:g/features/1.0/xml/features"];
        assert_eq!(repo.stage, Stage::Installed);
        assert!(repo.add_all);
    }

    #[test]
    fn duplicate_keeps_position_and_takes_later_stage() {
        let input = r#"
assembly_version = 1
home = "out"

[[bundle]]
location = "mvn:g/a/1.0"
stage = "startup"

[[bundle]]
location = "mvn:g/b/1.0"

[[bundle]]
location = "mvn:g/a/1.0"
stage = "installed"
"#;
        let plan = parse_descriptor_str(input).unwrap().normalize().unwrap();
        let entries: Vec<_> = plan.bundles.iter().map(|(k, v)| (k.as_str(), *v)).collect();
        assert_eq!(
            entries,
            vec![
                ("mvn:g/a/1.0", Stage::Installed),
                ("mvn:g/b/1.0", Stage::Startup)
            ]
        );
    }

    #[test]
    fn rejects_bad_version_home_and_level() {
        for input in [
            "assembly_version = 2\nhome = \"out\"\n",
            "assembly_version = 1\nhome = \"   \"\n",
            "assembly_version = 1\nhome = \"out\"\ndefault_start_level = 0\n",
            "assembly_version = 1\nhome = \"out\"\n[fetch]\nthreads = 0\n",
            "assembly_version = 1\nhome = \"out\"\n[[feature]]\nname = \" \"\n",
        ] {
            let d = parse_descriptor_str(input).unwrap();
            assert!(d.normalize().is_err(), "accepted: {input}");
        }
    }

    #[test]
    fn rebase_resolves_relative_paths_only() {
        let input = r#"
assembly_version = 1
home = "out"
profile_sources = ["profiles", "/abs/profiles"]
"#;
        let plan = parse_descriptor_str(input)
            .unwrap()
            .normalize()
            .unwrap()
            .rebase(Path::new("/work"));
        assert_eq!(plan.home, PathBuf::from("/work/out"));
        assert_eq!(
            plan.profile_sources,
            vec![PathBuf::from("/work/profiles"), PathBuf::from("/abs/profiles")]
        );
    }

    #[test]
    fn equivalent_descriptors_produce_same_canonical_json() {
        let a = parse_descriptor_str("assembly_version = 1\nhome = \"out\"\n")
            .unwrap()
            .normalize()
            .unwrap();
        let b = parse_descriptor_str(
            "assembly_version = 1\nhome = \"out\"\njavase = \"1.8\"\ndefault_start_level = 50\n",
        )
        .unwrap()
        .normalize()
        .unwrap();
        assert_eq!(a.canonical_json().unwrap(), b.canonical_json().unwrap());
    }
}
