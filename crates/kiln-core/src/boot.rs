//! The generated boot feature and the features configuration it produces.

use crate::closure::FeatureClosure;
use crate::CoreError;
use indexmap::IndexSet;
use kiln_schema::{BundleInfo, Dialect, Feature, FeaturesRepository};
use tracing::{info, warn};
use uuid::Uuid;

pub const FEATURES_CFG: &str = "org.apache.karaf.features.cfg";
pub const FEATURES_REPOSITORIES: &str = "featuresRepositories";
pub const FEATURES_BOOT: &str = "featuresBoot";

const PROFILE_SCHEME: &str = "profile:";
const PROFILE_SCHEME_TARGET: &str = "file:etc/";

/// Features that must be running before bundles with these schemes install.
const INSTALLER_PREREQUISITES: &[(&str, &[&str])] = &[
    ("blueprint:", &["deployer", "aries-blueprint"]),
    ("spring:", &["deployer", "spring"]),
    ("wrap:", &["wrap"]),
    ("war:", &["war"]),
];

/// The boot stage folded into one generated feature.
#[derive(Debug, Clone)]
pub struct BootFeature {
    /// Depends on every boot feature and carries every boot bundle, plus
    /// prerequisites implied by bundle schemes.
    pub generated: Feature,
    /// Synthetic repository holding `generated` and the boot repositories.
    pub repository: FeaturesRepository,
    /// The closure of `generated`, dependencies first.
    pub features: Vec<Feature>,
    pub bundle_locations: Vec<String>,
    pub config_locations: Vec<String>,
}

/// Build the generated boot feature and compute what it pulls in.
///
/// `available` holds the features of the boot repositories. The closure of
/// the generated feature decides the boot set: every bundle and config file
/// of every feature in it is collected for installation. Dependency-flagged
/// bundles are left out when `ignore_dependency_flag` is set.
pub fn build_boot_feature(
    features: &[String],
    bundles: &[String],
    repositories: &[String],
    available: &[Feature],
    ignore_dependency_flag: bool,
) -> Result<BootFeature, CoreError> {
    let mut generated = Feature::new(Uuid::new_v4().to_string());
    for name in features {
        generated.dependency_mut_or_insert(name).dependency = Some(false);
    }
    for location in bundles {
        generated.bundles.push(BundleInfo::new(
            location.replace(PROFILE_SCHEME, PROFILE_SCHEME_TARGET),
        ));
    }

    let mut universe = available.to_vec();
    universe.push(generated.clone());
    let mut closure = FeatureClosure::new(&universe);
    closure.add(&generated.name)?;
    let closed: Vec<Feature> = closure.features().iter().map(|f| (*f).clone()).collect();

    let mut bundle_locations = IndexSet::new();
    let mut config_locations = IndexSet::new();
    for feature in &closed {
        info!("feature {} is defined as a boot feature", feature.name);
        for bundle in feature.all_bundles() {
            if !ignore_dependency_flag || !bundle.is_dependency() {
                bundle_locations.insert(bundle.location.trim().to_owned());
            }
        }
        for config in feature.all_config_files() {
            config_locations.insert(config.location.trim().to_owned());
        }
    }

    for location in &bundle_locations {
        for (scheme, names) in INSTALLER_PREREQUISITES {
            if location.starts_with(scheme) {
                for name in *names {
                    generated.dependency_mut_or_insert(name).prerequisite = Some(true);
                }
            }
        }
    }

    let repository = FeaturesRepository {
        namespace: None,
        name: Some(Uuid::new_v4().to_string()),
        repositories: repositories.to_vec(),
        features: vec![generated.clone()],
    };

    Ok(BootFeature {
        generated,
        repository,
        features: closed,
        bundle_locations: bundle_locations.into_iter().collect(),
        config_locations: config_locations.into_iter().collect(),
    })
}

/// A serialized repository to be written under `etc/`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BootManifest {
    pub file_name: String,
    pub content: String,
}

/// The two features configuration settings, plus the manifest they point
/// at when the generated feature carries bundles of its own.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BootConfiguration {
    pub repositories: String,
    pub boot: String,
    pub manifest: Option<BootManifest>,
    /// Prerequisites whose flag the legacy dialect dropped although they are
    /// not startup features.
    pub unstarted_prerequisites: Vec<String>,
}

/// Decide how the loader finds the boot features.
///
/// With bundles on the generated feature, its repository is serialized in
/// `dialect` and referenced by file. Otherwise the boot features are written
/// inline: prerequisites in parentheses first, then the plain dependencies.
/// The legacy dialect drops prerequisite flags from the written manifest;
/// each prerequisite missing from `startup_features` is logged.
pub fn boot_configuration(
    boot: &BootFeature,
    dialect: Dialect,
    startup_features: &[String],
) -> Result<BootConfiguration, CoreError> {
    let generated = &boot.generated;

    if !generated.bundles.is_empty() {
        let file_name = format!(
            "{}.xml",
            boot.repository.name.as_deref().unwrap_or(&generated.name)
        );
        let mut unstarted_prerequisites = Vec::new();
        let repositories = match dialect {
            Dialect::Legacy => {
                for dep in boot
                    .repository
                    .features
                    .iter()
                    .flat_map(|f| f.dependencies.iter())
                {
                    if dep.is_prerequisite() && !startup_features.contains(&dep.name) {
                        warn!(
                            "feature {} is a prerequisite and should be installed as a startup feature",
                            dep.name
                        );
                        unstarted_prerequisites.push(dep.name.clone());
                    }
                }
                format!("file:etc/{file_name}")
            }
            Dialect::Current => format!("file:${{karaf.home}}/etc/{file_name}"),
        };
        let content = boot.repository.to_xml(dialect)?;
        return Ok(BootConfiguration {
            repositories,
            boot: generated.name.clone(),
            manifest: Some(BootManifest { file_name, content }),
            unstarted_prerequisites,
        });
    }

    let prerequisites: Vec<&str> = generated
        .dependencies
        .iter()
        .filter(|d| d.is_prerequisite())
        .map(|d| d.name.as_str())
        .collect();
    let mut entries = Vec::new();
    if !prerequisites.is_empty() {
        entries.push(format!("({})", prerequisites.join(",")));
    }
    entries.extend(
        generated
            .dependencies
            .iter()
            .filter(|d| !d.is_prerequisite() && !d.is_dependency())
            .map(|d| d.name.clone()),
    );

    let repositories: IndexSet<&str> = boot
        .repository
        .repositories
        .iter()
        .map(String::as_str)
        .collect();

    Ok(BootConfiguration {
        repositories: repositories.into_iter().collect::<Vec<_>>().join(","),
        boot: entries.join(","),
        manifest: None,
        unstarted_prerequisites: Vec::new(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use kiln_schema::{ConfigFile, Dependency};

    fn owned(values: &[&str]) -> Vec<String> {
        values.iter().map(|s| (*s).to_owned()).collect()
    }

    fn feature(name: &str, bundles: &[&str], deps: &[&str]) -> Feature {
        let mut f = Feature::new(name);
        f.bundles = bundles.iter().map(|b| BundleInfo::new(*b)).collect();
        f.dependencies = deps.iter().map(|d| Dependency::new(*d)).collect();
        f
    }

    #[test]
    fn scheme_prerequisites_are_injected() {
        let available = vec![feature("f1", &["blueprint:mvn:g/a/1.0"], &[])];
        let boot =
            build_boot_feature(&owned(&["f1"]), &[], &[], &available, false).unwrap();

        let deployer = boot.generated.dependency("deployer").unwrap();
        let blueprint = boot.generated.dependency("aries-blueprint").unwrap();
        assert!(deployer.is_prerequisite());
        assert!(blueprint.is_prerequisite());
        assert!(!boot.generated.dependency("f1").unwrap().is_prerequisite());
        assert_eq!(boot.bundle_locations, vec!["blueprint:mvn:g/a/1.0"]);
    }

    #[test]
    fn existing_dependency_is_flagged_not_duplicated() {
        let available = vec![
            feature("wrap", &[], &[]),
            feature("legacy", &["wrap:mvn:g/old/1.0"], &[]),
        ];
        let boot = build_boot_feature(&owned(&["wrap", "legacy", "wrap"]), &[], &[], &available, false)
            .unwrap();
        let wraps: Vec<_> = boot
            .generated
            .dependencies
            .iter()
            .filter(|d| d.name == "wrap")
            .collect();
        assert_eq!(wraps.len(), 1);
        assert!(wraps[0].is_prerequisite());
    }

    #[test]
    fn profile_bundles_are_rewritten_and_closure_is_collected() {
        let mut f1 = feature("f1", &["mvn:g/a/1.0"], &["f2"]);
        f1.config_files.push(ConfigFile {
            location: " mvn:g/cfg/1.0/cfg ".to_owned(),
            final_name: None,
        });
        let mut dep_bundle = BundleInfo::new("mvn:g/dep/1.0");
        dep_bundle.dependency = Some(true);
        let mut f2 = feature("f2", &["mvn:g/b/1.0"], &[]);
        f2.bundles.push(dep_bundle);
        let available = vec![f1, f2];

        let boot = build_boot_feature(
            &owned(&["f1"]),
            &owned(&["profile:jetty.xml"]),
            &owned(&["mvn:g/r/1.0/xml/features"]),
            &available,
            true,
        )
        .unwrap();

        assert_eq!(boot.generated.bundles[0].location, "file:etc/jetty.xml");
        assert_eq!(
            boot.features.iter().map(|f| f.name.as_str()).collect::<Vec<_>>(),
            vec!["f2", "f1", boot.generated.name.as_str()]
        );
        assert_eq!(
            boot.bundle_locations,
            vec!["mvn:g/b/1.0", "mvn:g/a/1.0", "file:etc/jetty.xml"]
        );
        assert_eq!(boot.config_locations, vec!["mvn:g/cfg/1.0/cfg"]);
        assert_eq!(boot.repository.repositories, vec!["mvn:g/r/1.0/xml/features"]);
    }

    #[test]
    fn dependency_bundles_kept_without_ignore_flag() {
        let mut f = feature("f", &[], &[]);
        let mut b = BundleInfo::new("mvn:g/dep/1.0");
        b.dependency = Some(true);
        f.bundles.push(b);
        let boot = build_boot_feature(&owned(&["f"]), &[], &[], &[f], false).unwrap();
        assert_eq!(boot.bundle_locations, vec!["mvn:g/dep/1.0"]);
    }

    #[test]
    fn unknown_boot_feature_is_fatal() {
        assert!(matches!(
            build_boot_feature(&owned(&["ghost"]), &[], &[], &[], false),
            Err(CoreError::UnresolvedReference(ref n)) if n == "ghost"
        ));
    }

    #[test]
    fn inline_expression_without_bundles() {
        let available = vec![
            feature("ssh", &["blueprint:mvn:g/ssh/1.0"], &[]),
            feature("shell", &[], &[]),
        ];
        let boot = build_boot_feature(
            &owned(&["ssh", "shell"]),
            &[],
            &owned(&["mvn:g/r1/1.0/xml/features", "mvn:g/r2/1.0/xml/features", "mvn:g/r1/1.0/xml/features"]),
            &available,
            false,
        )
        .unwrap();
        let config = boot_configuration(&boot, Dialect::Current, &[]).unwrap();

        assert!(config.manifest.is_none());
        assert_eq!(config.boot, "(deployer,aries-blueprint),ssh,shell");
        assert_eq!(
            config.repositories,
            "mvn:g/r1/1.0/xml/features,mvn:g/r2/1.0/xml/features"
        );
    }

    #[test]
    fn inline_expression_without_prerequisites() {
        let available = vec![feature("shell", &[], &[])];
        let boot = build_boot_feature(&owned(&["shell"]), &[], &[], &available, false).unwrap();
        let config = boot_configuration(&boot, Dialect::Current, &[]).unwrap();
        assert_eq!(config.boot, "shell");
        assert_eq!(config.repositories, "");
    }

    #[test]
    fn current_manifest_keeps_flags_and_uses_home_placeholder() {
        let available = vec![feature("f1", &["blueprint:mvn:g/a/1.0"], &[])];
        let boot = build_boot_feature(
            &owned(&["f1"]),
            &owned(&["mvn:g/extra/1.0"]),
            &[],
            &available,
            false,
        )
        .unwrap();
        let config = boot_configuration(&boot, Dialect::Current, &[]).unwrap();

        let manifest = config.manifest.unwrap();
        let repo_name = boot.repository.name.clone().unwrap();
        assert_eq!(manifest.file_name, format!("{repo_name}.xml"));
        assert_eq!(
            config.repositories,
            format!("file:${{karaf.home}}/etc/{repo_name}.xml")
        );
        assert_eq!(config.boot, boot.generated.name);
        assert!(manifest.content.contains("v1.3.0"));
        assert!(manifest.content.contains("prerequisite=\"true\""));
    }

    #[test]
    fn legacy_manifest_strips_flags_and_uses_relative_path() {
        let available = vec![feature("f1", &["spring:mvn:g/a/1.0"], &[])];
        let boot = build_boot_feature(
            &owned(&["f1"]),
            &owned(&["mvn:g/extra/1.0"]),
            &[],
            &available,
            false,
        )
        .unwrap();
        let config = boot_configuration(&boot, Dialect::Legacy, &owned(&["deployer"])).unwrap();

        let manifest = config.manifest.unwrap();
        assert!(config.repositories.starts_with("file:etc/"));
        assert!(manifest.content.contains("v1.2.0"));
        assert!(!manifest.content.contains("prerequisite="));
        assert!(!manifest.content.contains("dependency="));
        assert!(manifest.content.contains(">spring<"));
        assert_eq!(config.unstarted_prerequisites, vec!["spring".to_owned()]);
    }

    #[test]
    fn current_manifest_keeps_prerequisites_without_warning() {
        let available = vec![feature("f1", &["spring:mvn:g/a/1.0"], &[])];
        let boot = build_boot_feature(
            &owned(&["f1"]),
            &owned(&["mvn:g/extra/1.0"]),
            &[],
            &available,
            false,
        )
        .unwrap();
        let config = boot_configuration(&boot, Dialect::Current, &[]).unwrap();

        assert!(config.unstarted_prerequisites.is_empty());
    }
}
