use super::{
    colorize_stage, core_error, json_pretty, load_plan, spin_fail, spin_ok, spinner, EXIT_SUCCESS,
};
use kiln_core::Assembler;
use std::path::{Path, PathBuf};

pub fn run(
    descriptor: &Path,
    home: Option<PathBuf>,
    threads: Option<usize>,
    json: bool,
) -> Result<u8, String> {
    let mut plan = load_plan(descriptor)?;
    if let Some(home) = home {
        plan.home = home;
    }
    if let Some(threads) = threads {
        plan.fetch.threads = threads.max(1);
    }

    let pb = if json {
        None
    } else {
        Some(spinner("assembling..."))
    };
    let report = match Assembler::new(plan).assemble() {
        Ok(r) => {
            if let Some(ref pb) = pb {
                spin_ok(pb, "assembly complete");
            }
            r
        }
        Err(e) => {
            if let Some(ref pb) = pb {
                spin_fail(pb, "assembly failed");
            }
            return Err(core_error(&e));
        }
    };

    if json {
        println!("{}", json_pretty(&report)?);
        return Ok(EXIT_SUCCESS);
    }

    println!("assembled {} into {}", report.short_id, report.home.display());
    println!("assembly_id:          {}", report.assembly_id);
    println!(
        "{} bundles:      {}",
        colorize_stage("startup"),
        report.startup_bundles
    );
    println!("{} features:        {}", colorize_stage("boot"), report.boot.features);
    println!("{} repositories:    {}", colorize_stage("boot"), report.boot.repositories);
    println!(
        "{} artifacts: {}",
        colorize_stage("installed"),
        report.installed_artifacts
    );
    for location in &report.skipped_locations {
        println!("skipped:              {location}");
    }
    for name in &report.boot.unstarted_prerequisites {
        println!("not a startup feature: {name}");
    }
    Ok(EXIT_SUCCESS)
}
