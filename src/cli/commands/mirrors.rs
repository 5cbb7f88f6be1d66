use console::style;

use bootkit::mirrors::{MirrorKind, RankedMirror};
use bootkit::{Orchestrator, Result};

use crate::cli::render;

pub fn list(orchestrator: &Orchestrator, kind: &str, json: bool) -> Result<()> {
    let kind: MirrorKind = kind.parse()?;
    let mirrors = orchestrator.list_mirrors(kind);
    print_mirrors(orchestrator, kind, &mirrors, json);
    Ok(())
}

pub async fn rank(orchestrator: &Orchestrator, kind: &str, json: bool) -> Result<()> {
    let kind: MirrorKind = kind.parse()?;
    if !json {
        println!("{}", style(format!("Probing {} mirrors...", kind)).dim());
    }
    let mirrors = orchestrator.rank_mirrors(kind).await;
    print_mirrors(orchestrator, kind, &mirrors, json);
    Ok(())
}

fn print_mirrors(orchestrator: &Orchestrator, kind: MirrorKind, mirrors: &[RankedMirror], json: bool) {
    if json {
        render::emit(&mirrors);
        return;
    }

    let default_key = orchestrator
        .context()
        .catalog
        .default_entry(kind)
        .map(|e| e.key.clone());

    println!("{}", style(format!("{} mirrors", kind)).bold().cyan());
    println!();
    for mirror in mirrors {
        let marker = if Some(&mirror.entry.key) == default_key.as_ref() {
            style("*").green().bold()
        } else {
            style(" ")
        };
        let latency = match mirror.latency_ms {
            Some(ms) => style(format!("{:>6}ms", ms)).yellow(),
            None => style(format!("{:>8}", "-")).dim(),
        };
        println!(
            "  {} {:<20} {} {}",
            marker,
            mirror.entry.key,
            latency,
            style(&mirror.entry.url).dim()
        );
    }
}
