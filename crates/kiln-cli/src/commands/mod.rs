pub mod assemble;
pub mod closure;
pub mod completions;
pub mod effective;
pub mod man_pages;
pub mod plan;

use indicatif::{ProgressBar, ProgressStyle};
use kiln_core::CoreError;
use kiln_schema::{parse_descriptor_file, AssemblyPlan};
use std::path::Path;
use std::time::Duration;
use tracing::debug;

pub const EXIT_SUCCESS: u8 = 0;
pub const EXIT_FAILURE: u8 = 1;
pub const EXIT_DESCRIPTOR_ERROR: u8 = 2;
pub const EXIT_RESOLUTION_ERROR: u8 = 3;

pub fn json_pretty(value: &impl serde::Serialize) -> Result<String, String> {
    serde_json::to_string_pretty(value).map_err(|e| format!("JSON serialization failed: {e}"))
}

/// Parse, validate and normalize a descriptor. Relative paths in it are
/// taken relative to the descriptor's directory.
pub fn load_plan(descriptor: &Path) -> Result<AssemblyPlan, String> {
    let plan = parse_descriptor_file(descriptor)
        .and_then(|d| d.normalize())
        .map_err(|e| format!("descriptor error: {e}"))?;
    let base = descriptor.parent().unwrap_or_else(|| Path::new(""));
    debug!("loaded descriptor {}", descriptor.display());
    Ok(plan.rebase(base))
}

/// Render an engine failure with the prefix `main` maps to an exit code.
pub fn core_error(e: &CoreError) -> String {
    match e {
        CoreError::UnresolvedReference(_)
        | CoreError::PrerequisiteLoop(_)
        | CoreError::Unresolvable(_) => format!("resolution error: {e}"),
        CoreError::Profile(inner) => format!("descriptor error: {inner}"),
        _ => e.to_string(),
    }
}

pub fn spinner(msg: &str) -> ProgressBar {
    let pb = ProgressBar::new_spinner();
    pb.set_style(
        ProgressStyle::with_template("{spinner:.cyan} {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner())
            .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏"]),
    );
    pb.set_message(msg.to_owned());
    pb.enable_steady_tick(Duration::from_millis(80));
    pb
}

pub fn spin_ok(pb: &ProgressBar, msg: &str) {
    finish(pb, &console::style("✓").green().to_string(), msg);
}

pub fn spin_fail(pb: &ProgressBar, msg: &str) {
    finish(pb, &console::style("✗").red().to_string(), msg);
}

fn finish(pb: &ProgressBar, mark: &str, msg: &str) {
    if let Ok(style) = ProgressStyle::with_template("{msg}") {
        pb.set_style(style);
    }
    pb.finish_with_message(format!("{mark} {msg}"));
}

/// `startup` in cyan, `boot` in yellow, `installed` in green.
pub fn colorize_stage(stage: &str) -> String {
    use console::Style;
    match stage {
        "startup" => Style::new().cyan().apply_to(stage).to_string(),
        "boot" => Style::new().yellow().apply_to(stage).to_string(),
        "installed" => Style::new().green().apply_to(stage).to_string(),
        other => other.to_owned(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn json_pretty_serializes_object() {
        let val = serde_json::json!({"key": "value"});
        let result = json_pretty(&val).unwrap();
        assert!(result.contains("\"key\""));
        assert!(result.contains("\"value\""));
    }

    #[test]
    fn exit_codes_are_distinct() {
        assert_ne!(EXIT_SUCCESS, EXIT_FAILURE);
        assert_ne!(EXIT_FAILURE, EXIT_DESCRIPTOR_ERROR);
        assert_ne!(EXIT_DESCRIPTOR_ERROR, EXIT_RESOLUTION_ERROR);
    }

    #[test]
    fn load_plan_rebases_on_descriptor_dir() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("kiln.toml");
        fs::write(&path, "assembly_version = 1\nhome = \"out\"\n").unwrap();
        let plan = load_plan(&path).unwrap();
        assert_eq!(plan.home, dir.path().join("out"));
    }

    #[test]
    fn load_plan_prefixes_descriptor_errors() {
        let dir = tempfile::tempdir().unwrap();
        let err = load_plan(&dir.path().join("missing.toml")).unwrap_err();
        assert!(err.starts_with("descriptor error:"), "{err}");
    }

    #[test]
    fn resolution_failures_get_their_own_prefix() {
        let msg = core_error(&CoreError::UnresolvedReference("ssh".to_owned()));
        assert!(msg.starts_with("resolution error:"));
        assert!(msg.contains("ssh"));
        assert!(!core_error(&CoreError::Interrupted).starts_with("resolution error:"));
    }

    #[test]
    fn colorize_stage_keeps_text() {
        for stage in ["startup", "boot", "installed", "other"] {
            assert!(colorize_stage(stage).contains(stage));
        }
    }

    #[test]
    fn spinner_finishes() {
        let pb = spinner("testing...");
        spin_ok(&pb, "done");
        let pb = spinner("testing...");
        spin_fail(&pb, "failed");
    }
}
