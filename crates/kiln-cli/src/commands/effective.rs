use super::{core_error, json_pretty, load_plan, EXIT_SUCCESS};
use kiln_core::Assembler;
use kiln_schema::profile::PROPERTIES_SUFFIX;
use kiln_schema::{Properties, Stage};
use std::path::Path;

pub fn run(descriptor: &Path, stage: Option<Stage>, json: bool) -> Result<u8, String> {
    let plan = load_plan(descriptor)?;
    let profile = Assembler::new(plan)
        .effective_profile(stage)
        .map_err(|e| core_error(&e))?;

    let files: Vec<&str> = profile
        .file_configurations()
        .keys()
        .map(String::as_str)
        .filter(|name| !name.ends_with(PROPERTIES_SUFFIX))
        .collect();

    if json {
        let payload = serde_json::json!({
            "stage": stage,
            "configurations": profile.configurations(),
            "files": files,
        });
        println!("{}", json_pretty(&payload)?);
        return Ok(EXIT_SUCCESS);
    }

    for (pid, config) in profile.configurations() {
        println!("[{pid}]");
        print!("{}", Properties::from(config.clone()).to_text());
        println!();
    }
    for name in files {
        println!("file: {name}");
    }
    Ok(EXIT_SUCCESS)
}
