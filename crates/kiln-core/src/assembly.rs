//! The assembly orchestrator: shared configuration, then the startup, boot
//! and installed stages, in that order.

use crate::boot::{
    boot_configuration, build_boot_feature, BootConfiguration, FEATURES_BOOT, FEATURES_CFG,
    FEATURES_REPOSITORIES,
};
use crate::closure::FeatureClosure;
use crate::concurrency::{check_interrupted, AssemblyLock};
use crate::overlay::{effective, overlay};
use crate::resolve::{resolve_stage, FeatureWiringResolver, WiringResolver};
use crate::stage::{staged, staged_repositories};
use crate::CoreError;
use chrono::{DateTime, Utc};
use indexmap::{IndexMap, IndexSet};
use kiln_fetch::{ArtifactSource, DefaultSource, DownloadManager, Downloader, FetchConfig};
use kiln_schema::profile::{INTERNAL_PID, PROPERTIES_SUFFIX};
use kiln_schema::{
    compute_assembly_id, load_profile_sources, strip_url, AssemblyId, AssemblyPlan, Feature,
    FeaturesRepository, Profile, ProfileBuilder, Properties, ShortId, Stage, MVN_SCHEME,
};
use kiln_store::{
    merge_properties, write_etc_file, write_properties, AssemblyLayout, LibraryKind,
    SystemRepository,
};
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet, HashMap, VecDeque};
use std::fs;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

pub const CONFIG_PROPERTIES: &str = "config.properties";
pub const SYSTEM_PROPERTIES: &str = "system.properties";
pub const STARTUP_PROPERTIES: &str = "startup.properties";
const STARTUP_HEADER: &str = "# Bundles to be started on startup, with startlevel";

const PAX_MVN_PID: &str = "org.ops4j.pax.url.mvn";
const PAX_MVN_REPOSITORIES: &str = "org.ops4j.pax.url.mvn.repositories";
const JAVA_SPEC_PLACEHOLDER: &str = "${java.specification.version}";

/// Summary of a finished assembly.
#[derive(Debug, Clone, Serialize)]
pub struct AssemblyReport {
    pub assembly_id: AssemblyId,
    pub short_id: ShortId,
    pub home: PathBuf,
    pub generated_at: DateTime<Utc>,
    pub startup_bundles: usize,
    pub boot: BootSummary,
    pub installed_artifacts: usize,
    pub skipped_locations: Vec<String>,
}

/// The features configuration written by the boot stage.
#[derive(Debug, Clone, Serialize)]
pub struct BootSummary {
    pub repositories: String,
    pub features: String,
    pub generated_feature: String,
    pub manifest: Option<String>,
    /// Legacy dialect only: prerequisites written without their flag.
    pub unstarted_prerequisites: Vec<String>,
}

/// Runs assemblies for one plan.
pub struct Assembler {
    plan: AssemblyPlan,
    source: Arc<dyn ArtifactSource>,
    resolver: Arc<dyn WiringResolver>,
    profiles: BTreeMap<String, Profile>,
}

impl Assembler {
    /// An assembler fetching through the default source configured by the plan.
    pub fn new(plan: AssemblyPlan) -> Self {
        let source = Arc::new(DefaultSource::new(&FetchConfig::from_plan(&plan.fetch)));
        Self::with_source(plan, source)
    }

    pub fn with_source(plan: AssemblyPlan, source: Arc<dyn ArtifactSource>) -> Self {
        let resolver = Arc::new(FeatureWiringResolver::new(plan.default_start_level));
        Self {
            plan,
            source,
            resolver,
            profiles: BTreeMap::new(),
        }
    }

    /// Profiles available in addition to those under the plan's profile sources.
    #[must_use]
    pub fn with_profiles(mut self, profiles: BTreeMap<String, Profile>) -> Self {
        self.profiles.extend(profiles);
        self
    }

    #[must_use]
    pub fn with_resolver(mut self, resolver: Arc<dyn WiringResolver>) -> Self {
        self.resolver = resolver;
        self
    }

    pub fn plan(&self) -> &AssemblyPlan {
        &self.plan
    }

    /// Build the assembly under the plan's home directory.
    pub fn assemble(&self) -> Result<AssemblyReport, CoreError> {
        let layout = AssemblyLayout::new(&self.plan.home);
        layout.initialize()?;
        let identity = compute_assembly_id(&self.plan);
        let _lock = AssemblyLock::acquire(&layout, identity.short_id.as_str())?;

        info!("generating assembly: {}", self.plan.home.display());
        let ctx = AssemblyContext::new(self, layout)?;
        let prepared = ctx.prepare()?;

        ctx.write_shared(&prepared.overall)?;

        check_interrupted()?;
        let startup = ctx.startup_stage(&prepared)?;
        check_interrupted()?;
        let boot = ctx.boot_stage(&prepared, &startup.features)?;
        check_interrupted()?;
        ctx.installed_stage(&prepared, &boot.all_features)?;

        let installed_artifacts = ctx.installer.installed.lock().len();
        let skipped_locations = ctx.installer.skipped.lock().iter().cloned().collect();
        info!(
            "assembly {} complete: {} startup bundles, {installed_artifacts} artifacts",
            identity.short_id, startup.bundles
        );

        Ok(AssemblyReport {
            assembly_id: identity.assembly_id,
            short_id: identity.short_id,
            home: self.plan.home.clone(),
            generated_at: Utc::now(),
            startup_bundles: startup.bundles,
            boot: BootSummary {
                repositories: boot.configuration.repositories,
                features: boot.configuration.boot,
                generated_feature: boot.generated,
                manifest: boot.configuration.manifest.map(|m| m.file_name),
                unstarted_prerequisites: boot.configuration.unstarted_prerequisites,
            },
            installed_artifacts,
            skipped_locations,
        })
    }

    /// The overlaid, substituted profile of one stage, or of the whole
    /// assembly when `stage` is `None`. Nothing is written to the home.
    pub fn effective_profile(&self, stage: Option<Stage>) -> Result<Profile, CoreError> {
        let ctx = AssemblyContext::new(self, AssemblyLayout::new(&self.plan.home))?;
        let prepared = ctx.prepare()?;
        match stage {
            None => Ok(prepared.overall),
            Some(stage) => ctx.stage_effective(&prepared, stage),
        }
    }

    /// Features a stage would pull in for `targets`, dependencies first.
    ///
    /// With no targets, the stage's own feature list is closed over.
    pub fn feature_closure(&self, stage: Stage, targets: &[String]) -> Result<Vec<Feature>, CoreError> {
        let ctx = AssemblyContext::new(self, AssemblyLayout::new(&self.plan.home))?;
        let prepared = ctx.prepare()?;
        let profile = ctx.stage_effective(&prepared, stage)?;
        let repositories = ctx.load_repositories(&profile.repositories(), false)?;
        let universe = features_of(&repositories);

        let targets = if targets.is_empty() {
            profile.features()
        } else {
            targets.to_vec()
        };
        let mut closure = FeatureClosure::new(&universe);
        for target in &targets {
            closure.add(target)?;
        }
        Ok(closure.features().iter().map(|f| (*f).clone()).collect())
    }
}

/// Installs artifacts into `system/` from download callbacks.
#[derive(Clone)]
struct Installer {
    system: Arc<SystemRepository>,
    installed: Arc<Mutex<IndexSet<String>>>,
    skipped: Arc<Mutex<IndexSet<String>>>,
}

impl Installer {
    /// Queue `location` for copying into `system/`. Only maven locations are
    /// materialized; anything else is skipped with a warning.
    fn install_artifact(&self, downloader: &Downloader, location: &str) {
        info!("installing artifact {location}");
        let mut location = strip_url(location);
        if !location.starts_with(MVN_SCHEME) {
            warn!("ignoring artifact {location}");
            self.skipped.lock().insert(location);
            return;
        }
        if location.ends_with('/') {
            location.pop();
        }
        let installer = self.clone();
        downloader.download(&location, move |_, artifact| {
            installer.system.install(&artifact.location, &artifact.path)?;
            installer.installed.lock().insert(artifact.location.clone());
            Ok(())
        });
    }
}

struct Prepared {
    profiles: BTreeMap<String, Profile>,
    stages: BTreeMap<Stage, Profile>,
    overall: Profile,
}

struct StartupOutcome {
    bundles: usize,
    features: Vec<String>,
}

struct BootOutcome {
    configuration: BootConfiguration,
    generated: String,
    all_features: Vec<Feature>,
}

/// State owned by one run: the layout, the worker pool and what has been
/// installed so far.
struct AssemblyContext<'a> {
    plan: &'a AssemblyPlan,
    extra_profiles: &'a BTreeMap<String, Profile>,
    resolver: &'a dyn WiringResolver,
    layout: AssemblyLayout,
    downloads: DownloadManager,
    installer: Installer,
}

impl<'a> AssemblyContext<'a> {
    fn new(assembler: &'a Assembler, layout: AssemblyLayout) -> Result<Self, CoreError> {
        let downloads =
            DownloadManager::new(Arc::clone(&assembler.source), assembler.plan.fetch.threads)?;
        let installer = Installer {
            system: Arc::new(SystemRepository::new(layout.clone())),
            installed: Arc::new(Mutex::new(IndexSet::new())),
            skipped: Arc::new(Mutex::new(IndexSet::new())),
        };
        Ok(Self {
            plan: &assembler.plan,
            extra_profiles: &assembler.profiles,
            resolver: assembler.resolver.as_ref(),
            layout,
            downloads,
            installer,
        })
    }

    /// Load inputs and build the three stage profiles plus the overall one.
    fn prepare(&self) -> Result<Prepared, CoreError> {
        let mut features = self.plan.features.clone();
        let declared: Vec<String> = self.plan.repositories.keys().cloned().collect();
        let repositories = self.load_repositories(&declared, false)?;
        for (location, info) in &self.plan.repositories {
            if !info.add_all {
                continue;
            }
            if let Some(repository) = repositories.get(location) {
                for feature in &repository.features {
                    features.insert(feature.id(), info.stage);
                }
            }
        }

        info!("loading profiles");
        let mut profiles = load_profile_sources(&self.plan.profile_sources)?;
        profiles.extend(
            self.extra_profiles
                .iter()
                .map(|(id, p)| (id.clone(), p.clone())),
        );

        let mut stages = BTreeMap::new();
        for stage in Stage::ALL {
            let profile = ProfileBuilder::new(Uuid::new_v4().to_string())
                .parents(staged(stage, &self.plan.profiles))
                .repositories(staged_repositories(stage, &self.plan.repositories))
                .features(staged(stage, &features))
                .bundles(staged(stage, &self.plan.bundles))
                .build()?;
            debug!("{stage} stage profile is {}", profile.id());
            profiles.insert(profile.id().to_owned(), profile.clone());
            stages.insert(stage, profile);
        }

        let overall = ProfileBuilder::new(Uuid::new_v4().to_string())
            .parents(stages.values().map(|p| p.id().to_owned()).collect())
            .build()?;
        let overall = effective(
            &overlay(&overall, &profiles, self.plan.environment.as_deref(), false)?,
            false,
        )?;

        let remotes: Vec<String> = overall
            .configuration(PAX_MVN_PID)
            .get(PAX_MVN_REPOSITORIES)
            .map(|list| {
                list.split(',')
                    .map(str::trim)
                    .filter(|r| r.starts_with("http://") || r.starts_with("https://"))
                    .map(str::to_owned)
                    .collect()
            })
            .unwrap_or_default();
        if !remotes.is_empty() {
            self.downloads.source().add_remote_repositories(&remotes);
        }

        Ok(Prepared {
            profiles,
            stages,
            overall,
        })
    }

    fn stage_effective(&self, prepared: &Prepared, stage: Stage) -> Result<Profile, CoreError> {
        let Some(profile) = prepared.stages.get(&stage) else {
            return Err(CoreError::Unresolvable(format!("no {stage} stage profile")));
        };
        let flat = overlay(
            profile,
            &prepared.profiles,
            self.plan.environment.as_deref(),
            false,
        )?;
        Ok(effective(&flat, false)?)
    }

    /// Properties files, libraries and configuration files shared by all stages.
    fn write_shared(&self, overall: &Profile) -> Result<(), CoreError> {
        merge_properties(
            &self.layout,
            CONFIG_PROPERTIES,
            &self.java_properties(overall.config()),
        )?;
        merge_properties(
            &self.layout,
            SYSTEM_PROPERTIES,
            &self.java_properties(overall.system()),
        )?;

        info!("downloading libraries");
        let downloader = self.downloads.downloader();
        for (kind, libraries) in [
            (LibraryKind::Library, overall.libraries()),
            (LibraryKind::Endorsed, overall.endorsed_libraries()),
            (LibraryKind::Extension, overall.extension_libraries()),
            (LibraryKind::Boot, overall.boot_libraries()),
        ] {
            for library in libraries {
                let location = library.split(';').next().unwrap_or(&library).trim().to_owned();
                let system = Arc::clone(&self.installer.system);
                downloader.download(&location, move |_, artifact| {
                    system.install_library(kind, &artifact.path)?;
                    Ok(())
                });
            }
        }
        downloader.await_all()?;

        let internal = format!("{INTERNAL_PID}{PROPERTIES_SUFFIX}");
        for (name, bytes) in overall.file_configurations() {
            if *name != internal {
                write_etc_file(&self.layout, name, bytes)?;
            }
        }
        Ok(())
    }

    fn java_properties(&self, values: IndexMap<String, String>) -> Properties {
        values
            .into_iter()
            .map(|(k, v)| (k, v.replace(JAVA_SPEC_PLACEHOLDER, &self.plan.javase)))
            .collect()
    }

    fn startup_stage(&self, prepared: &Prepared) -> Result<StartupOutcome, CoreError> {
        let profile = self.stage_effective(prepared, Stage::Startup)?;
        info!("loading repositories");
        let repositories = self.load_repositories(&profile.repositories(), false)?;
        let universe = features_of(&repositories);

        info!("resolving features");
        let features = profile.features();
        let bundles = resolve_stage(
            self.resolver,
            &universe,
            &self.downloads,
            &features,
            &profile.bundles(),
            &profile.overrides(),
            &profile.optionals(),
        )?;

        let downloader = self.downloads.downloader();
        for location in bundles.keys() {
            self.installer.install_artifact(&downloader, location);
        }
        downloader.await_all()?;

        let startup = startup_properties(
            &bundles,
            self.plan.use_reference_urls,
            self.plan.legacy_syntax,
        );
        write_properties(&self.layout, STARTUP_PROPERTIES, &startup)?;

        Ok(StartupOutcome {
            bundles: bundles.len(),
            features,
        })
    }

    fn boot_stage(
        &self,
        prepared: &Prepared,
        startup_features: &[String],
    ) -> Result<BootOutcome, CoreError> {
        let profile = self.stage_effective(prepared, Stage::Boot)?;
        let repositories = self.load_repositories(&profile.repositories(), true)?;
        let available = features_of(&repositories);

        let boot = build_boot_feature(
            &profile.features(),
            &profile.bundles(),
            &profile.repositories(),
            &available,
            self.plan.ignore_dependency_flag,
        )?;

        let downloader = self.downloads.downloader();
        for location in boot.bundle_locations.iter().chain(&boot.config_locations) {
            self.installer.install_artifact(&downloader, location);
        }
        downloader.await_all()?;

        let configuration = boot_configuration(&boot, self.plan.dialect(), startup_features)?;
        if let Some(manifest) = &configuration.manifest {
            write_etc_file(&self.layout, &manifest.file_name, manifest.content.as_bytes())?;
        }
        let mut settings = Properties::new();
        settings.insert(FEATURES_REPOSITORIES, configuration.repositories.clone());
        settings.insert(FEATURES_BOOT, configuration.boot.clone());
        merge_properties(&self.layout, FEATURES_CFG, &settings)?;

        let mut all_features = available;
        all_features.push(boot.generated.clone());
        Ok(BootOutcome {
            configuration,
            generated: boot.generated.name,
            all_features,
        })
    }

    fn installed_stage(&self, prepared: &Prepared, boot_features: &[Feature]) -> Result<(), CoreError> {
        let profile = self.stage_effective(prepared, Stage::Installed)?;
        let repositories = self.load_repositories(&profile.repositories(), true)?;
        let mut universe = features_of(&repositories);
        universe.extend(boot_features.iter().cloned());

        let mut closure = FeatureClosure::new(&universe);
        for feature in profile.features() {
            closure.add(&feature)?;
        }

        let downloader = self.downloads.downloader();
        for feature in closure.features() {
            for bundle in feature.all_bundles() {
                if !self.plan.ignore_dependency_flag || !bundle.is_dependency() {
                    self.installer
                        .install_artifact(&downloader, bundle.location.trim());
                }
            }
            for config in feature.all_config_files() {
                self.installer
                    .install_artifact(&downloader, config.location.trim());
            }
        }
        for location in profile.bundles() {
            self.installer.install_artifact(&downloader, &location);
        }
        downloader.await_all()?;
        Ok(())
    }

    /// Fetch and parse repositories, following their nested repository
    /// references. With `install`, maven manifests are also copied into
    /// `system/`. The result lists declared repositories first, then nested
    /// ones breadth-first.
    fn load_repositories(
        &self,
        locations: &[String],
        install: bool,
    ) -> Result<IndexMap<String, FeaturesRepository>, CoreError> {
        let loaded: Loaded = Arc::new(Mutex::new(HashMap::new()));
        let downloader = self.downloads.downloader();
        for location in locations {
            queue_repository(
                &downloader,
                location.trim(),
                install.then(|| self.installer.clone()),
                &loaded,
            );
        }
        downloader.await_all()?;

        let mut loaded = std::mem::take(&mut *loaded.lock());
        let mut ordered = IndexMap::new();
        let mut queue: VecDeque<String> = locations.iter().map(|l| l.trim().to_owned()).collect();
        while let Some(location) = queue.pop_front() {
            if ordered.contains_key(&location) {
                continue;
            }
            if let Some(Some(repository)) = loaded.remove(&location) {
                queue.extend(repository.repositories.iter().map(|r| r.trim().to_owned()));
                ordered.insert(location, repository);
            }
        }
        Ok(ordered)
    }
}

/// Repositories by location; `None` while a fetch is in flight.
type Loaded = Arc<Mutex<HashMap<String, Option<FeaturesRepository>>>>;

fn queue_repository(
    downloader: &Downloader,
    location: &str,
    installer: Option<Installer>,
    loaded: &Loaded,
) {
    {
        let mut guard = loaded.lock();
        if guard.contains_key(location) {
            return;
        }
        guard.insert(location.to_owned(), None);
    }

    let loaded = Arc::clone(loaded);
    downloader.download(location, move |downloader, artifact| {
        if let Some(installer) = &installer {
            if artifact.location.starts_with(MVN_SCHEME) {
                installer.system.install(&artifact.location, &artifact.path)?;
                installer
                    .installed
                    .lock()
                    .insert(artifact.location.clone());
            }
        }
        let bytes = fs::read(&artifact.path)?;
        let repository = FeaturesRepository::parse_bytes(&artifact.location, &bytes)?;
        let nested = repository.repositories.clone();
        loaded
            .lock()
            .insert(artifact.location.clone(), Some(repository));
        for inner in nested {
            queue_repository(downloader, inner.trim(), installer.clone(), &loaded);
        }
        Ok(())
    });
}

fn features_of(repositories: &IndexMap<String, FeaturesRepository>) -> Vec<Feature> {
    repositories
        .values()
        .flat_map(|r| r.features.iter().cloned())
        .collect()
}

/// `startup.properties`: locations grouped by ascending start level, sorted
/// within a level.
fn startup_properties(
    bundles: &BTreeMap<String, u32>,
    use_reference_urls: bool,
    legacy_syntax: bool,
) -> Properties {
    let mut by_level: BTreeMap<u32, BTreeSet<&str>> = BTreeMap::new();
    for (location, level) in bundles {
        by_level.entry(*level).or_default().insert(location);
    }

    let mut startup = Properties::new().with_header(&[STARTUP_HEADER]);
    for (level, locations) in by_level {
        for location in locations {
            let mut entry = location.to_owned();
            if entry.starts_with("file:") && use_reference_urls {
                entry = format!("reference:{entry}");
            }
            if legacy_syntax {
                if let Some(rest) = entry.strip_prefix("file:") {
                    entry = rest.to_owned();
                }
            }
            startup.insert(entry, level.to_string());
        }
    }
    startup
}
