use super::{colorize_stage, json_pretty, load_plan, EXIT_SUCCESS};
use kiln_schema::{compute_assembly_id, Stage};
use std::path::Path;

pub fn run(descriptor: &Path, json: bool) -> Result<u8, String> {
    let plan = load_plan(descriptor)?;
    let identity = compute_assembly_id(&plan);

    if json {
        let payload = serde_json::json!({
            "assembly_id": identity.assembly_id,
            "short_id": identity.short_id,
            "plan": plan,
        });
        println!("{}", json_pretty(&payload)?);
        return Ok(EXIT_SUCCESS);
    }

    println!("assembly_id: {}", identity.assembly_id);
    println!("home:        {}", plan.home.display());
    println!("dialect:     {:?}", plan.dialect());
    for stage in Stage::ALL {
        let profiles = plan.profiles.values().filter(|s| **s == stage).count();
        let repositories = plan
            .repositories
            .values()
            .filter(|info| info.stage == stage)
            .count();
        let features = plan.features.values().filter(|s| **s == stage).count();
        let bundles = plan.bundles.values().filter(|s| **s == stage).count();
        println!(
            "{:<10} profiles={profiles} repositories={repositories} features={features} bundles={bundles}",
            colorize_stage(&stage.to_string()),
        );
    }
    Ok(EXIT_SUCCESS)
}
