use console::style;
use tokio_util::sync::CancellationToken;

use bootkit::mirrors::MirrorKind;
use bootkit::{BootstrapOptions, Orchestrator, Result};

use super::choose_mirror;
use super::install::with_progress;

pub struct Choices {
    pub toolchain_mirror: Option<String>,
    pub vcs_mirror: Option<String>,
    pub package_mirror: Option<String>,
    pub repo: Option<String>,
    pub update: bool,
    pub start: bool,
    pub detach: bool,
}

pub async fn execute(
    orchestrator: &Orchestrator,
    choices: Choices,
    json: bool,
    cancel: &CancellationToken,
) -> Result<()> {
    let options = BootstrapOptions {
        toolchain_mirror: choose_mirror(orchestrator, MirrorKind::Toolchain, choices.toolchain_mirror, json)?,
        vcs_mirror: choose_mirror(orchestrator, MirrorKind::Vcs, choices.vcs_mirror, json)?,
        package_mirror: choose_mirror(orchestrator, MirrorKind::PackageIndex, choices.package_mirror, json)?,
        repository: choose_mirror(orchestrator, MirrorKind::Repository, choices.repo, json)?,
        update: choices.update,
        start_backend: choices.start,
    };

    if !json {
        println!(
            "{} {}",
            style("Bootstrapping").cyan().bold(),
            style(orchestrator.context().target.root().display()).white()
        );
        println!();
    }

    let outcome = with_progress(orchestrator, json, "bootstrap", orchestrator.bootstrap(&options)).await?;

    if !json && outcome.ran.is_empty() {
        println!("  {}", style("Everything already provisioned.").dim());
    }

    match outcome.backend {
        Some(backend) => super::start::supervise(backend, choices.detach, json, cancel).await,
        None => Ok(()),
    }
}
