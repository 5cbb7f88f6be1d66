//! Third-party package installation from the manifest.

use crate::context::Context;
use crate::error::{BootError, Result};
use crate::mirrors::MirrorKind;
use crate::probe::manifest_digest;
use crate::process::CommandSpec;
use crate::progress::{Stage, StageReporter};

/// Stamp content while an install is in flight.
const PENDING_STAMP: &str = "pending";

pub async fn install(ctx: &Context, mirror: Option<&str>) -> Result<()> {
    let reporter = ctx.bus.reporter(Stage::Dependencies);
    match install_steps(ctx, mirror, &reporter).await {
        Ok(()) => {
            reporter.completed("Dependencies installed");
            Ok(())
        }
        Err(e) => {
            reporter.error(format!("Dependency installation failed: {}", e));
            Err(e)
        }
    }
}

async fn install_steps(ctx: &Context, mirror: Option<&str>, reporter: &StageReporter) -> Result<()> {
    let target = &ctx.target;

    let python = target.toolchain_executable();
    if !python.is_file() {
        return Err(BootError::precondition("Toolchain executable", python));
    }
    let manifest = target.manifest_path();
    if !manifest.is_file() {
        return Err(BootError::precondition("Dependency manifest", manifest));
    }
    let pip = target
        .package_manager_executable()
        .ok_or_else(|| BootError::precondition("Package manager", target.toolchain_scripts_dir()))?;

    let index = ctx
        .catalog
        .resolve_url(MirrorKind::PackageIndex, mirror)
        .ok_or_else(|| BootError::Config("No package index configured".to_string()))?;
    let host = trusted_host(&index)?;

    // Until pip succeeds the stamp matches no digest, so a failed run reads as
    // not installed instead of falling back to the package-count heuristic.
    let stamp = target.dependency_stamp();
    tokio::fs::create_dir_all(target.environment_dir()).await?;
    tokio::fs::write(&stamp, PENDING_STAMP).await?;

    let spec = CommandSpec::new(&pip)
        .arg("install")
        .arg("-r")
        .path_arg(&manifest)
        .args(["-i", index.as_str(), "--trusted-host", host.as_str()])
        .current_dir(target.root());

    reporter.installing(0, format!("Installing dependencies from {}...", host));
    let mut announced = false;
    ctx.runner
        .run(
            &spec,
            &mut |_| {
                if !announced {
                    announced = true;
                    reporter.installing(50, "Installing dependencies...");
                }
            },
            &ctx.cancel,
        )
        .await?
        .check(&spec.program_name())?;

    match manifest_digest(&manifest) {
        Some(digest) => tokio::fs::write(&stamp, digest).await?,
        None => tracing::warn!("Manifest {} vanished during install", manifest.display()),
    }
    Ok(())
}

/// Host of the index URL, passed to `--trusted-host` so plain-HTTP mirrors work.
fn trusted_host(index: &str) -> Result<String> {
    let url = reqwest::Url::parse(index)
        .map_err(|e| BootError::Config(format!("Invalid package index URL '{}': {}", index, e)))?;
    url.host_str()
        .map(str::to_string)
        .ok_or_else(|| BootError::Config(format!("Package index URL '{}' has no host", index)))
}
