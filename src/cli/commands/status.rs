use console::style;

use bootkit::{Orchestrator, Result};

use crate::cli::render;

pub fn execute(orchestrator: &Orchestrator, json: bool) -> Result<()> {
    let status = orchestrator.check_status();

    if json {
        render::emit(&status);
        return Ok(());
    }

    let target = &orchestrator.context().target;
    println!(
        "  {} {}",
        if status.is_ready {
            style("●").green().bold()
        } else {
            style("●").yellow().bold()
        },
        style(target.root().display()).white().bold()
    );
    println!();

    let rows = [
        ("Toolchain", status.toolchain_present, target.toolchain_dir()),
        ("VCS client", status.vcs_present, target.vcs_dir()),
        ("Source tree", status.source_tree_present, target.source_marker()),
        ("Dependencies", status.dependencies_installed, target.manifest_path()),
    ];
    for (name, present, path) in rows {
        let mark = if present {
            style("✓").green()
        } else {
            style("✕").red()
        };
        println!("  {} {:<13} {}", mark, name, style(path.display()).dim());
    }

    println!();
    if status.is_ready {
        println!("  {}", style("Ready to start the backend.").green());
    } else {
        println!(
            "  Run {} to provision the missing parts.",
            style("bootkit bootstrap").cyan()
        );
    }

    Ok(())
}
