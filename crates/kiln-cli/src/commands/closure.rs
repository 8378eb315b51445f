use super::{core_error, json_pretty, load_plan, EXIT_SUCCESS};
use kiln_core::Assembler;
use kiln_schema::Stage;
use std::path::Path;

pub fn run(descriptor: &Path, stage: Stage, targets: &[String], json: bool) -> Result<u8, String> {
    let plan = load_plan(descriptor)?;
    let features = Assembler::new(plan)
        .feature_closure(stage, targets)
        .map_err(|e| core_error(&e))?;

    if json {
        let payload: Vec<_> = features
            .iter()
            .map(|f| {
                serde_json::json!({
                    "name": f.name,
                    "version": f.version,
                    "bundles": f.all_bundles().count(),
                })
            })
            .collect();
        println!("{}", json_pretty(&payload)?);
    } else {
        for feature in &features {
            println!("{}", feature.id());
        }
    }
    Ok(EXIT_SUCCESS)
}
