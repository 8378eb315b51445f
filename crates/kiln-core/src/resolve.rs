//! Staged resolution: request building, the retry loop on missing
//! prerequisites, and the default wiring resolver.

use crate::closure::FeatureClosure;
use crate::CoreError;
use indexmap::{IndexMap, IndexSet};
use kiln_fetch::DownloadManager;
use kiln_schema::{strip_url, BundleInfo, Feature, MavenCoordinate, MVN_SCHEME};
use parking_lot::Mutex;
use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::path::PathBuf;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info};

/// The single region every requirement is placed in.
pub const ROOT_REGION: &str = "root";
/// Prefix turning a bundle location into a requirement.
pub const BUNDLE_REQUIREMENT_PREFIX: &str = "bundle:";
pub const DEFAULT_BUNDLE_UPDATE_RANGE: &str = "${range;[==,=+)}";
pub const DEFAULT_FEATURE_RESOLUTION_RANGE: &str = "${range;[====,====]}";

/// An optional artifact fetched ahead of resolution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resource {
    pub location: String,
    pub path: PathBuf,
}

/// Input to one resolution attempt.
#[derive(Debug, Clone)]
pub struct DeploymentRequest {
    pub overrides: IndexSet<String>,
    pub requirements: BTreeMap<String, IndexSet<String>>,
    pub bundle_update_range: String,
    pub feature_resolution_range: String,
    pub options: BTreeSet<String>,
    pub global_repository: Vec<Resource>,
}

impl Default for DeploymentRequest {
    fn default() -> Self {
        Self {
            overrides: IndexSet::new(),
            requirements: BTreeMap::new(),
            bundle_update_range: DEFAULT_BUNDLE_UPDATE_RANGE.to_owned(),
            feature_resolution_range: DEFAULT_FEATURE_RESOLUTION_RANGE.to_owned(),
            options: BTreeSet::new(),
            global_repository: Vec::new(),
        }
    }
}

impl DeploymentRequest {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a requirement to the root region.
    pub fn require(&mut self, requirement: impl Into<String>) {
        self.requirements
            .entry(ROOT_REGION.to_owned())
            .or_default()
            .insert(requirement.into());
    }

    pub fn require_bundle(&mut self, location: &str) {
        self.require(format!("{BUNDLE_REQUIREMENT_PREFIX}{location}"));
    }

    pub fn root_requirements(&self) -> impl Iterator<Item = &str> {
        self.requirements
            .get(ROOT_REGION)
            .into_iter()
            .flat_map(|r| r.iter().map(String::as_str))
    }
}

/// What a resolver has installed so far, carried across attempts.
#[derive(Debug, Clone, Default)]
pub struct DeploymentState {
    /// Installed feature ids (`name/version`).
    pub features: IndexSet<String>,
    pub bundles: IndexMap<String, u32>,
}

impl DeploymentState {
    /// Whether a feature named `name` (bare or `name/version`) is installed.
    pub fn has_feature(&self, name: &str) -> bool {
        self.features.iter().any(|id| {
            id == name || id.split_once('/').is_some_and(|(bare, _)| bare == name)
        })
    }
}

#[derive(Debug, Error)]
pub enum WiringError {
    #[error("missing prerequisites: {}", join(.missing))]
    Partial { missing: BTreeSet<String> },
    #[error(transparent)]
    Failed(#[from] CoreError),
}

fn join(names: &BTreeSet<String>) -> String {
    names.iter().cloned().collect::<Vec<_>>().join(", ")
}

/// Computes the artifacts to deploy for a request.
///
/// On success returns every artifact location of the deployment with its
/// start level. [`WiringError::Partial`] names prerequisites that have to be
/// added to the request before the deployment can proceed.
pub trait WiringResolver: Send + Sync {
    fn resolve(
        &self,
        state: &mut DeploymentState,
        universe: &[Feature],
        request: &DeploymentRequest,
    ) -> Result<BTreeMap<String, u32>, WiringError>;
}

/// Run one stage's resolution to completion.
///
/// Optional resources are fetched once, concurrently, before the first
/// attempt. Each partial result adds its missing prerequisites to the
/// requirements; a partial result that names nothing new aborts with
/// [`CoreError::PrerequisiteLoop`].
pub fn resolve_stage(
    resolver: &dyn WiringResolver,
    universe: &[Feature],
    downloads: &DownloadManager,
    features: &[String],
    bundles: &[String],
    overrides: &[String],
    optionals: &[String],
) -> Result<BTreeMap<String, u32>, CoreError> {
    let global_repository = fetch_optionals(downloads, optionals)?;

    let mut state = DeploymentState::default();
    let mut prerequisites: BTreeSet<String> = BTreeSet::new();
    loop {
        let mut request = DeploymentRequest::new();
        request.overrides.extend(overrides.iter().cloned());
        request.global_repository.clone_from(&global_repository);
        for feature in features.iter().chain(prerequisites.iter()) {
            request.require(feature.clone());
        }
        for bundle in bundles {
            request.require_bundle(bundle);
        }

        match resolver.resolve(&mut state, universe, &request) {
            Ok(resolved) => return Ok(resolved),
            Err(WiringError::Partial { missing }) => {
                if missing.is_subset(&prerequisites) {
                    return Err(CoreError::PrerequisiteLoop(missing.into_iter().collect()));
                }
                debug!("retrying with prerequisites: {}", join(&missing));
                prerequisites.extend(missing);
            }
            Err(WiringError::Failed(e)) => return Err(e),
        }
    }
}

fn fetch_optionals(
    downloads: &DownloadManager,
    optionals: &[String],
) -> Result<Vec<Resource>, CoreError> {
    if optionals.is_empty() {
        return Ok(Vec::new());
    }
    info!("downloading {} optional resources", optionals.len());
    let collected = Arc::new(Mutex::new(Vec::with_capacity(optionals.len())));
    let downloader = downloads.downloader();
    for (index, location) in optionals.iter().enumerate() {
        let collected = Arc::clone(&collected);
        downloader.download(location, move |_, artifact| {
            collected.lock().push((
                index,
                Resource {
                    location: artifact.location.clone(),
                    path: artifact.path.clone(),
                },
            ));
            Ok(())
        });
    }
    downloader.await_all()?;

    let mut resources = std::mem::take(&mut *collected.lock());
    resources.sort_by_key(|(index, _)| *index);
    Ok(resources.into_iter().map(|(_, r)| r).collect())
}

/// Resolver working directly on feature descriptors.
///
/// Requested features are closed over their dependencies. Requested features
/// that other features name as prerequisites are installed first, in rounds,
/// once their own prerequisites are installed. A prerequisite that is neither
/// installed nor requested is reported missing. Dependency-flagged bundles
/// are skipped when a bundle with the same maven group and artifact is
/// already selected, and overrides replace bundles by group and artifact.
#[derive(Debug, Clone)]
pub struct FeatureWiringResolver {
    default_start_level: u32,
}

impl FeatureWiringResolver {
    pub fn new(default_start_level: u32) -> Self {
        Self {
            default_start_level,
        }
    }
}

impl WiringResolver for FeatureWiringResolver {
    fn resolve(
        &self,
        state: &mut DeploymentState,
        universe: &[Feature],
        request: &DeploymentRequest,
    ) -> Result<BTreeMap<String, u32>, WiringError> {
        let prerequisite_names: HashSet<&str> = universe
            .iter()
            .flat_map(|f| f.dependencies.iter())
            .filter(|d| d.is_prerequisite())
            .map(|d| d.name.as_str())
            .collect();

        let mut feature_requirements = Vec::new();
        let mut bundle_requirements = Vec::new();
        for requirement in request.root_requirements() {
            match requirement.strip_prefix(BUNDLE_REQUIREMENT_PREFIX) {
                Some(location) => bundle_requirements.push(location),
                None => feature_requirements.push(requirement),
            }
        }
        let (mut pending_prerequisites, regular): (Vec<&str>, Vec<&str>) = feature_requirements
            .into_iter()
            .partition(|r| prerequisite_names.contains(r));

        let mut missing = BTreeSet::new();

        // Install requested prerequisites in rounds until no more can go in.
        loop {
            let mut progressed = false;
            let mut blocked = Vec::new();
            for requirement in pending_prerequisites {
                if state.has_feature(requirement) {
                    continue;
                }
                let mut closure = FeatureClosure::new(universe);
                closure.add(requirement)?;
                let unmet = unmet_prerequisites(closure.features(), state, &[]);
                if unmet.is_empty() {
                    self.install(state, closure.features(), request)?;
                    progressed = true;
                } else {
                    blocked.push(requirement);
                }
            }
            pending_prerequisites = blocked;
            if !progressed || pending_prerequisites.is_empty() {
                break;
            }
        }
        for requirement in &pending_prerequisites {
            let mut closure = FeatureClosure::new(universe);
            closure.add(requirement)?;
            missing.extend(unmet_prerequisites(closure.features(), state, &[]));
        }

        let mut closure = FeatureClosure::new(universe);
        for requirement in &regular {
            closure.add(requirement)?;
        }
        let selected: Vec<&Feature> = closure
            .features()
            .iter()
            .copied()
            .filter(|f| !state.features.contains(&f.id()))
            .collect();
        missing.extend(unmet_prerequisites(&selected, state, &pending_prerequisites));

        if !missing.is_empty() {
            return Err(WiringError::Partial { missing });
        }

        self.install(state, &selected, request)?;
        for location in bundle_requirements {
            state
                .bundles
                .entry(location.to_owned())
                .or_insert(self.default_start_level);
        }
        apply_overrides(state, &request.overrides)?;

        Ok(state
            .bundles
            .iter()
            .map(|(location, level)| (location.clone(), *level))
            .collect())
    }
}

impl FeatureWiringResolver {
    fn install(
        &self,
        state: &mut DeploymentState,
        features: &[&Feature],
        request: &DeploymentRequest,
    ) -> Result<(), CoreError> {
        for feature in features {
            state.features.insert(feature.id());
        }
        for feature in features {
            let level = feature.start_level.unwrap_or(self.default_start_level);
            for bundle in active_bundles(feature, state) {
                let level = bundle.start_level.unwrap_or(level);
                let Some(location) = select_bundle(bundle, state, request)? else {
                    continue;
                };
                state.bundles.entry(location).or_insert(level);
            }
        }
        Ok(())
    }
}

/// Prerequisites of `features` that are neither installed nor in `requested`.
fn unmet_prerequisites(
    features: &[&Feature],
    state: &DeploymentState,
    requested: &[&str],
) -> BTreeSet<String> {
    features
        .iter()
        .flat_map(|f| f.dependencies.iter())
        .filter(|d| d.is_prerequisite())
        .filter(|d| !state.has_feature(&d.name) && !requested.contains(&d.name.as_str()))
        .map(|d| d.name.clone())
        .collect()
}

/// Unconditional bundles plus those of conditionals whose conditions are
/// all installed.
fn active_bundles<'f>(feature: &'f Feature, state: &DeploymentState) -> Vec<&'f BundleInfo> {
    let conditional = feature
        .conditionals
        .iter()
        .filter(|c| c.conditions.iter().all(|name| state.has_feature(name)))
        .flat_map(|c| c.bundles.iter());
    feature.bundles.iter().chain(conditional).collect()
}

fn select_bundle(
    bundle: &BundleInfo,
    state: &DeploymentState,
    request: &DeploymentRequest,
) -> Result<Option<String>, CoreError> {
    if !bundle.is_dependency() {
        return Ok(Some(bundle.location.clone()));
    }
    let key = artifact_key(&bundle.location)?;
    for location in state.bundles.keys() {
        if artifact_key(location)? == key {
            return Ok(None);
        }
    }
    for resource in &request.global_repository {
        if artifact_key(&resource.location)? == key {
            return Ok(Some(resource.location.clone()));
        }
    }
    Ok(Some(bundle.location.clone()))
}

fn apply_overrides(
    state: &mut DeploymentState,
    overrides: &IndexSet<String>,
) -> Result<(), CoreError> {
    for replacement in overrides {
        let key = artifact_key(replacement)?;
        let mut replaced = Vec::new();
        for location in state.bundles.keys() {
            if location != replacement && artifact_key(location)? == key {
                replaced.push(location.clone());
            }
        }
        for location in replaced {
            if let Some(level) = state.bundles.shift_remove(&location) {
                debug!("overriding {location} with {replacement}");
                state.bundles.entry(replacement.clone()).or_insert(level);
            }
        }
    }
    Ok(())
}

/// Group and artifact of a maven location, or the location itself.
fn artifact_key(location: &str) -> Result<String, CoreError> {
    let stripped = strip_url(location);
    if !stripped.starts_with(MVN_SCHEME) {
        return Ok(stripped);
    }
    MavenCoordinate::parse(&stripped)
        .map(|c| c.key())
        .map_err(|e| CoreError::Unresolvable(format!("{location}: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use kiln_fetch::MemorySource;
    use kiln_schema::{Conditional, Dependency};

    fn feature(name: &str, bundles: &[&str], deps: &[&str]) -> Feature {
        let mut f = Feature::new(name);
        f.bundles = bundles.iter().map(|b| BundleInfo::new(*b)).collect();
        f.dependencies = deps.iter().map(|d| Dependency::new(*d)).collect();
        f
    }

    fn prerequisite(f: &mut Feature, name: &str) {
        let dep = f.dependency_mut_or_insert(name);
        dep.prerequisite = Some(true);
    }

    fn downloads() -> DownloadManager {
        DownloadManager::new(Arc::new(MemorySource::new()), 2).unwrap()
    }

    fn resolve(
        universe: &[Feature],
        features: &[&str],
        bundles: &[&str],
        overrides: &[&str],
    ) -> Result<BTreeMap<String, u32>, CoreError> {
        let owned = |v: &[&str]| v.iter().map(|s| (*s).to_owned()).collect::<Vec<_>>();
        resolve_stage(
            &FeatureWiringResolver::new(50),
            universe,
            &downloads(),
            &owned(features),
            &owned(bundles),
            &owned(overrides),
            &[],
        )
    }

    #[test]
    fn single_feature_resolves_to_its_bundle() {
        let universe = vec![feature("core", &["mvn:g/a/1.0"], &[])];
        let resolved = resolve(&universe, &["core"], &[], &[]).unwrap();
        assert_eq!(resolved.len(), 1);
        assert_eq!(resolved["mvn:g/a/1.0"], 50);
    }

    #[test]
    fn start_levels_fall_back_from_bundle_to_feature_to_default() {
        let mut f = feature("core", &["mvn:g/a/1.0", "mvn:g/b/1.0"], &[]);
        f.start_level = Some(20);
        f.bundles[0].start_level = Some(5);
        let plain = feature("plain", &["mvn:g/c/1.0"], &[]);
        let universe = vec![f, plain];

        let resolved = resolve(&universe, &["core", "plain"], &["mvn:g/d/1.0"], &[]).unwrap();
        assert_eq!(resolved["mvn:g/a/1.0"], 5);
        assert_eq!(resolved["mvn:g/b/1.0"], 20);
        assert_eq!(resolved["mvn:g/c/1.0"], 50);
        assert_eq!(resolved["mvn:g/d/1.0"], 50);
    }

    #[test]
    fn missing_prerequisites_are_added_and_retried() {
        let mut web = feature("web", &["mvn:g/web/1.0"], &[]);
        prerequisite(&mut web, "deployer");
        let deployer = feature("deployer", &["mvn:g/deployer/1.0"], &[]);
        let universe = vec![web, deployer];

        let resolved = resolve(&universe, &["web"], &[], &[]).unwrap();
        assert!(resolved.contains_key("mvn:g/web/1.0"));
        assert!(resolved.contains_key("mvn:g/deployer/1.0"));
    }

    #[test]
    fn prerequisite_chains_install_in_rounds() {
        let mut web = feature("web", &["mvn:g/web/1.0"], &[]);
        prerequisite(&mut web, "a");
        let mut a = feature("a", &["mvn:g/a/1.0"], &[]);
        prerequisite(&mut a, "b");
        let b = feature("b", &["mvn:g/b/1.0"], &[]);
        let universe = vec![web, a, b];

        let resolved = resolve(&universe, &["web"], &[], &[]).unwrap();
        assert_eq!(resolved.len(), 3);
    }

    #[test]
    fn circular_prerequisites_abort() {
        let mut web = feature("web", &[], &[]);
        prerequisite(&mut web, "a");
        let mut a = feature("a", &[], &[]);
        prerequisite(&mut a, "b");
        let mut b = feature("b", &[], &[]);
        prerequisite(&mut b, "a");
        let universe = vec![web, a, b];

        let err = resolve(&universe, &["web"], &[], &[]).unwrap_err();
        match err {
            CoreError::PrerequisiteLoop(names) => assert_eq!(names, vec!["a", "b"]),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn unknown_feature_fails() {
        let universe = vec![feature("core", &[], &[])];
        assert!(matches!(
            resolve(&universe, &["nope"], &[], &[]),
            Err(CoreError::UnresolvedReference(_))
        ));
    }

    #[test]
    fn overrides_replace_by_group_and_artifact() {
        let universe = vec![feature("core", &["mvn:g/a/1.0", "mvn:g/b/1.0"], &[])];
        let resolved = resolve(&universe, &["core"], &[], &["mvn:g/a/1.1"]).unwrap();
        assert!(!resolved.contains_key("mvn:g/a/1.0"));
        assert_eq!(resolved["mvn:g/a/1.1"], 50);
        assert!(resolved.contains_key("mvn:g/b/1.0"));
    }

    #[test]
    fn dependency_bundles_are_deduplicated_by_artifact() {
        let mut api = feature("api", &["mvn:g/api/1.0"], &[]);
        let mut dep = BundleInfo::new("mvn:g/api/1.1");
        dep.dependency = Some(true);
        let mut user = feature("user", &["mvn:g/user/1.0"], &["api"]);
        user.bundles.push(dep);
        api.start_level = Some(10);
        let universe = vec![api, user];

        let resolved = resolve(&universe, &["user"], &[], &[]).unwrap();
        assert!(resolved.contains_key("mvn:g/api/1.0"));
        assert!(!resolved.contains_key("mvn:g/api/1.1"));
    }

    #[test]
    fn conditionals_apply_when_conditions_are_installed() {
        let mut core = feature("core", &["mvn:g/core/1.0"], &["shell"]);
        core.conditionals.push(Conditional {
            conditions: vec!["shell".to_owned()],
            bundles: vec![BundleInfo::new("mvn:g/core-shell/1.0")],
            config_files: Vec::new(),
        });
        core.conditionals.push(Conditional {
            conditions: vec!["webconsole".to_owned()],
            bundles: vec![BundleInfo::new("mvn:g/core-web/1.0")],
            config_files: Vec::new(),
        });
        let shell = feature("shell", &["mvn:g/shell/1.0"], &[]);
        let universe = vec![core, shell];

        let resolved = resolve(&universe, &["core"], &[], &[]).unwrap();
        assert!(resolved.contains_key("mvn:g/core-shell/1.0"));
        assert!(!resolved.contains_key("mvn:g/core-web/1.0"));
    }

    #[test]
    fn optionals_are_fetched_once_into_the_global_repository() {
        let source = Arc::new(MemorySource::new().with("mvn:g/opt/1.0", "opt"));
        let downloads = DownloadManager::new(source.clone(), 2).unwrap();

        struct Recording(Mutex<Vec<Vec<String>>>);
        impl WiringResolver for Recording {
            fn resolve(
                &self,
                _state: &mut DeploymentState,
                _universe: &[Feature],
                request: &DeploymentRequest,
            ) -> Result<BTreeMap<String, u32>, WiringError> {
                let mut calls = self.0.lock();
                calls.push(
                    request
                        .global_repository
                        .iter()
                        .map(|r| r.location.clone())
                        .collect(),
                );
                if calls.len() == 1 {
                    return Err(WiringError::Partial {
                        missing: BTreeSet::from(["x".to_owned()]),
                    });
                }
                Ok(BTreeMap::new())
            }
        }

        let resolver = Recording(Mutex::new(Vec::new()));
        resolve_stage(&resolver, &[], &downloads, &[], &[], &[], &["mvn:g/opt/1.0".to_owned()])
            .unwrap();

        assert_eq!(resolver.0.lock().len(), 2);
        assert!(resolver.0.lock().iter().all(|r| r == &vec!["mvn:g/opt/1.0".to_owned()]));
        assert_eq!(source.fetch_count("mvn:g/opt/1.0"), 1);
    }

    #[test]
    fn no_progress_is_reported_as_a_loop() {
        struct AlwaysMissing;
        impl WiringResolver for AlwaysMissing {
            fn resolve(
                &self,
                _state: &mut DeploymentState,
                _universe: &[Feature],
                _request: &DeploymentRequest,
            ) -> Result<BTreeMap<String, u32>, WiringError> {
                Err(WiringError::Partial {
                    missing: BTreeSet::from(["p".to_owned()]),
                })
            }
        }

        let err = resolve_stage(&AlwaysMissing, &[], &downloads(), &[], &[], &[], &[]).unwrap_err();
        assert!(matches!(err, CoreError::PrerequisiteLoop(ref m) if m == &vec!["p".to_owned()]));
    }

    #[test]
    fn request_defaults() {
        let mut request = DeploymentRequest::new();
        request.require("ssh");
        request.require_bundle("mvn:g/a/1.0");
        assert_eq!(request.bundle_update_range, DEFAULT_BUNDLE_UPDATE_RANGE);
        assert!(request.options.is_empty());
        assert_eq!(
            request.root_requirements().collect::<Vec<_>>(),
            vec!["ssh", "bundle:mvn:g/a/1.0"]
        );
    }
}
