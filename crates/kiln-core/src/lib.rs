//! Staged assembly engine for kiln.
//!
//! This crate ties together profiles, feature repositories, the artifact
//! transport and the on-disk layout into the `Assembler`, which runs the
//! startup, boot and installed stages in order. It also provides the
//! overlay/effective profile resolver, the stage partitioner, the feature
//! dependency closure, the retrying resolution engine with its default wiring
//! resolver, the boot synthetic-feature builder, and assembly locking.

pub mod assembly;
pub mod boot;
pub mod closure;
pub mod concurrency;
pub mod overlay;
pub mod resolve;
pub mod stage;

pub use assembly::{Assembler, AssemblyReport, BootSummary};
pub use boot::{
    boot_configuration, build_boot_feature, BootConfiguration, BootFeature, BootManifest,
};
pub use closure::{close_features, FeatureClosure};
pub use concurrency::{install_signal_handler, shutdown_requested, AssemblyLock};
pub use overlay::{effective, overlay};
pub use resolve::{
    resolve_stage, DeploymentRequest, DeploymentState, FeatureWiringResolver, Resource,
    WiringError, WiringResolver,
};
pub use stage::{staged, staged_repositories};

use thiserror::Error;

#[derive(Debug, Error)]
pub enum CoreError {
    #[error("descriptor error: {0}")]
    Descriptor(#[from] kiln_schema::DescriptorError),
    #[error("profile error: {0}")]
    Profile(#[from] kiln_schema::ProfileError),
    #[error("schema error: {0}")]
    Schema(#[from] kiln_schema::SchemaError),
    #[error("store error: {0}")]
    Store(#[from] kiln_store::StoreError),
    #[error("fetch error: {0}")]
    Fetch(#[from] kiln_fetch::FetchError),
    #[error("could not find matching feature for '{0}'")]
    UnresolvedReference(String),
    #[error("deployment aborted due to loop in missing prerequisites: {}", .0.join(", "))]
    PrerequisiteLoop(Vec<String>),
    #[error("unresolvable requirement: {0}")]
    Unresolvable(String),
    #[error("assembly home {home} is locked by {holder}")]
    Locked { home: String, holder: String },
    #[error("assembly interrupted")]
    Interrupted,
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl From<kiln_schema::FeaturesError> for CoreError {
    fn from(e: kiln_schema::FeaturesError) -> Self {
        Self::Schema(e.into())
    }
}

impl From<kiln_schema::CoordinateError> for CoreError {
    fn from(e: kiln_schema::CoordinateError) -> Self {
        Self::Schema(e.into())
    }
}
