use std::future::Future;

use bootkit::mirrors::MirrorKind;
use bootkit::{Orchestrator, Result};

use super::choose_mirror;
use crate::cli::render::{self, Mode, Renderer};

/// Run one operation with progress rendering and a final result line.
pub async fn with_progress<T, F>(orchestrator: &Orchestrator, json: bool, operation: &str, step: F) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    let renderer = Renderer::start(orchestrator.subscribe(), Mode::detect(json));
    let result = step.await;
    renderer.finish().await;
    render::report(json, operation, &result);
    result
}

pub async fn toolchain(orchestrator: &Orchestrator, mirror: Option<String>, json: bool) -> Result<()> {
    let mirror = choose_mirror(orchestrator, MirrorKind::Toolchain, mirror, json)?;
    with_progress(
        orchestrator,
        json,
        "install_toolchain",
        orchestrator.install_toolchain(mirror.as_deref()),
    )
    .await
}

pub async fn vcs(orchestrator: &Orchestrator, mirror: Option<String>, json: bool) -> Result<()> {
    let mirror = choose_mirror(orchestrator, MirrorKind::Vcs, mirror, json)?;
    with_progress(orchestrator, json, "install_vcs", orchestrator.install_vcs(mirror.as_deref())).await
}

pub async fn package_manager(orchestrator: &Orchestrator, json: bool) -> Result<()> {
    with_progress(
        orchestrator,
        json,
        "install_package_manager",
        orchestrator.install_package_manager(),
    )
    .await
}

pub async fn dependencies(orchestrator: &Orchestrator, mirror: Option<String>, json: bool) -> Result<()> {
    let mirror = choose_mirror(orchestrator, MirrorKind::PackageIndex, mirror, json)?;
    with_progress(
        orchestrator,
        json,
        "install_dependencies",
        orchestrator.install_dependencies(mirror.as_deref()),
    )
    .await
}

pub async fn sync(orchestrator: &Orchestrator, repo: Option<String>, json: bool) -> Result<()> {
    let repo = choose_mirror(orchestrator, MirrorKind::Repository, repo, json)?;
    with_progress(
        orchestrator,
        json,
        "sync_repository",
        orchestrator.sync_repository(repo.as_deref()),
    )
    .await
}
