use crate::normalize::AssemblyPlan;
use crate::types::{AssemblyId, ShortId};
use serde::Serialize;

/// Deterministic identity for an assembly, derived from its normalized plan.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct AssemblyIdentity {
    pub assembly_id: AssemblyId,
    pub short_id: ShortId,
}

/// Hash the staged inputs and output-mode flags of a plan.
///
/// The home directory and fetch settings are left out: the same inputs
/// assembled elsewhere, or fetched from a different mirror, share an id.
pub fn compute_assembly_id(plan: &AssemblyPlan) -> AssemblyIdentity {
    let mut hasher = blake3::Hasher::new();

    hasher.update(format!("version:{}", plan.assembly_version).as_bytes());
    hasher.update(format!("javase:{}", plan.javase).as_bytes());
    if let Some(env) = &plan.environment {
        hasher.update(format!("env:{env}").as_bytes());
    }
    hasher.update(format!("start-level:{}", plan.default_start_level).as_bytes());
    if plan.use_reference_urls {
        hasher.update(b"mode:reference");
    }
    if plan.legacy_syntax {
        hasher.update(b"mode:legacy");
    }
    if plan.ignore_dependency_flag {
        hasher.update(b"mode:ignore-dependency");
    }

    for (name, stage) in &plan.profiles {
        hasher.update(format!("profile:{stage}:{name}").as_bytes());
    }
    for (location, info) in &plan.repositories {
        hasher.update(format!("repo:{}:{}:{location}", info.stage, info.add_all).as_bytes());
    }
    for (name, stage) in &plan.features {
        hasher.update(format!("feature:{stage}:{name}").as_bytes());
    }
    for (location, stage) in &plan.bundles {
        hasher.update(format!("bundle:{stage}:{location}").as_bytes());
    }

    let hex = hasher.finalize().to_hex().to_string();
    let short = hex[..12].to_owned();

    AssemblyIdentity {
        assembly_id: AssemblyId::new(hex),
        short_id: ShortId::new(short),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::descriptor::parse_descriptor_str;

    fn plan(input: &str) -> AssemblyPlan {
        parse_descriptor_str(input).unwrap().normalize().unwrap()
    }

    #[test]
    fn stable_id_across_homes() {
        let a = plan("assembly_version = 1\nhome = \"a\"\n[[feature]]\nname = \"ssh\"\n");
        let b = plan("assembly_version = 1\nhome = \"b\"\n[[feature]]\nname = \"ssh\"\n");
        assert_eq!(compute_assembly_id(&a), compute_assembly_id(&b));
    }

    #[test]
    fn input_order_changes_id() {
        let a = plan(
            "assembly_version = 1\nhome = \"a\"\n[[feature]]\nname = \"x\"\n[[feature]]\nname = \"y\"\n",
        );
        let b = plan(
            "assembly_version = 1\nhome = \"a\"\n[[feature]]\nname = \"y\"\n[[feature]]\nname = \"x\"\n",
        );
        assert_ne!(compute_assembly_id(&a), compute_assembly_id(&b));
    }

    #[test]
    fn stage_change_changes_id() {
        let a = plan("assembly_version = 1\nhome = \"a\"\n[[feature]]\nname = \"ssh\"\nstage = \"boot\"\n");
        let b = plan(
            "assembly_version = 1\nhome = \"a\"\n[[feature]]\nname = \"ssh\"\nstage = \"installed\"\n",
        );
        assert_ne!(compute_assembly_id(&a), compute_assembly_id(&b));
    }

    #[test]
    fn dialect_changes_id() {
        let a = plan("assembly_version = 1\nhome = \"a\"\n");
        let b = plan("assembly_version = 1\nhome = \"a\"\nlegacy_syntax = true\n");
        assert_ne!(compute_assembly_id(&a), compute_assembly_id(&b));
    }

    #[test]
    fn short_id_is_12_chars() {
        let id = compute_assembly_id(&plan("assembly_version = 1\nhome = \"a\"\n"));
        assert_eq!(id.short_id.as_str().len(), 12);
        assert!(id.assembly_id.as_str().starts_with(id.short_id.as_str()));
    }
}
