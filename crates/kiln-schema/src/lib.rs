//! Profiles, feature repositories and assembly descriptors for kiln.
//!
//! This crate defines the schema layer: the immutable [`Profile`] value object
//! and its loader, the `.cfg` properties codec, the feature repository model
//! with its two manifest [`Dialect`]s, maven coordinates, and the TOML
//! assembly descriptor normalized into an [`AssemblyPlan`] with a
//! deterministic identity (`compute_assembly_id`).

pub mod descriptor;
pub mod features;
pub mod identity;
pub mod loader;
pub mod maven;
pub mod normalize;
pub mod profile;
pub mod properties;
pub mod types;

pub use descriptor::{
    parse_descriptor_file, parse_descriptor_str, AssemblyDescriptor, DescriptorError,
    FetchSection, LocationEntry, NamedEntry, RepositoryEntry,
};
pub use features::{
    BundleInfo, ConfigFile, Conditional, Dependency, Dialect, Feature, FeaturesError,
    FeaturesRepository,
};
pub use identity::{compute_assembly_id, AssemblyIdentity};
pub use loader::{load_profile_sources, load_profiles};
pub use maven::{path_from_maven, strip_url, CoordinateError, MavenCoordinate, MVN_SCHEME};
pub use normalize::{AssemblyPlan, FetchPlan};
pub use profile::{ConfigListType, Profile, ProfileBuilder, ProfileError};
pub use properties::{Properties, PropertiesError};
pub use types::{AssemblyId, RepositoryInfo, ShortId, Stage};

use thiserror::Error;

/// Failures decoding repository manifests or artifact coordinates.
#[derive(Debug, Error)]
pub enum SchemaError {
    #[error(transparent)]
    Features(#[from] FeaturesError),
    #[error(transparent)]
    Coordinate(#[from] CoordinateError),
}
