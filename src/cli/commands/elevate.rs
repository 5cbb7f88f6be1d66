use console::style;
use serde_json::json;

use bootkit::{Orchestrator, Result};

use crate::cli::render;

pub fn check(orchestrator: &Orchestrator, json: bool) -> Result<()> {
    let elevated = orchestrator.check_elevated();
    if json {
        render::emit(&json!({ "elevated": elevated }));
    } else if elevated {
        println!("{} Running with administrator privileges", style("✓").green().bold());
    } else {
        println!("{} Not elevated", style("!").yellow().bold());
    }
    Ok(())
}

pub fn relaunch(orchestrator: &Orchestrator, json: bool) -> Result<()> {
    if orchestrator.check_elevated() {
        if !json {
            println!("{}", style("Already elevated, nothing to do.").dim());
        }
        render::report(json, "relaunch_elevated", &Ok::<(), bootkit::BootError>(()));
        return Ok(());
    }

    let result = orchestrator.relaunch_elevated();
    render::report(json, "relaunch_elevated", &result);
    result?;

    // The elevated instance takes over from here.
    std::process::exit(0)
}
