//! Operations exposed to a user interface, and the full bootstrap pipeline.
//!
//! Every operation returns a typed `Result`; [`OperationResult`] is the flat
//! `{success, error}` shape a front end reports. Progress for all of them
//! flows through the shared [`ProgressBus`](crate::progress::ProgressBus).

use serde::Serialize;
use tokio::sync::mpsc;

use crate::backend::{self, RunningBackend};
use crate::context::Context;
use crate::error::{BootError, Result};
use crate::lock::ProvisionLock;
use crate::mirrors::{MirrorKind, RankedMirror};
use crate::probe::{self, EnvironmentStatus};
use crate::progress::{ProgressEvent, Stage};
use crate::{deps, elevation, repo, toolchain, vcs};

/// Timeout for a single mirror latency probe.
const MIRROR_PROBE_TIMEOUT: std::time::Duration = std::time::Duration::from_secs(5);

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OperationResult {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl OperationResult {
    pub fn ok() -> Self {
        Self {
            success: true,
            error: None,
        }
    }

    pub fn failed(error: &BootError) -> Self {
        Self {
            success: false,
            error: Some(error.to_string()),
        }
    }

    pub fn of<T>(result: &Result<T>) -> Self {
        match result {
            Ok(_) => Self::ok(),
            Err(e) => Self::failed(e),
        }
    }
}

/// Mirror choices for one bootstrap run. `None` uses the catalog default.
#[derive(Debug, Clone, Default)]
pub struct BootstrapOptions {
    pub toolchain_mirror: Option<String>,
    pub vcs_mirror: Option<String>,
    pub package_mirror: Option<String>,
    pub repository: Option<String>,
    /// Pull the source tree even when it is already present.
    pub update: bool,
    pub start_backend: bool,
}

#[derive(Debug)]
pub struct BootstrapOutcome {
    /// Stages that had work to do, in execution order.
    pub ran: Vec<Stage>,
    pub status: EnvironmentStatus,
    pub backend: Option<RunningBackend>,
}

#[derive(Debug, Clone)]
pub struct Orchestrator {
    ctx: Context,
}

impl Orchestrator {
    pub fn new(ctx: Context) -> Self {
        Self { ctx }
    }

    pub fn context(&self) -> &Context {
        &self.ctx
    }

    pub fn subscribe(&self) -> mpsc::UnboundedReceiver<ProgressEvent> {
        self.ctx.bus.subscribe()
    }

    pub fn check_status(&self) -> EnvironmentStatus {
        probe::probe(&self.ctx.target)
    }

    pub async fn install_toolchain(&self, mirror: Option<&str>) -> Result<()> {
        toolchain::install(&self.ctx, mirror).await
    }

    pub async fn install_package_manager(&self) -> Result<()> {
        toolchain::bootstrap_package_manager(&self.ctx).await
    }

    pub async fn install_vcs(&self, mirror: Option<&str>) -> Result<()> {
        vcs::install(&self.ctx, mirror).await
    }

    pub async fn sync_repository(&self, repository: Option<&str>) -> Result<()> {
        repo::sync(&self.ctx, repository).await
    }

    pub async fn install_dependencies(&self, mirror: Option<&str>) -> Result<()> {
        deps::install(&self.ctx, mirror).await
    }

    pub async fn start_backend(&self) -> Result<RunningBackend> {
        backend::start(&self.ctx).await
    }

    pub fn check_elevated(&self) -> bool {
        elevation::is_elevated()
    }

    /// Spawn an elevated instance. The caller is expected to exit afterwards.
    pub fn relaunch_elevated(&self) -> Result<()> {
        elevation::spawn_elevated()
    }

    pub fn list_mirrors(&self, kind: MirrorKind) -> Vec<RankedMirror> {
        self.ctx.catalog.ranked(kind)
    }

    pub async fn rank_mirrors(&self, kind: MirrorKind) -> Vec<RankedMirror> {
        self.ctx
            .catalog
            .measure(self.ctx.downloader.client(), kind, MIRROR_PROBE_TIMEOUT)
            .await
    }

    /// Run every step the probe reports missing, in dependency order, under
    /// the provisioning lock; then optionally start the backend.
    pub async fn bootstrap(&self, options: &BootstrapOptions) -> Result<BootstrapOutcome> {
        let ctx = &self.ctx;
        let lock = ProvisionLock::acquire(&ctx.target, ctx.config.lock_stale_after())?;
        tracing::debug!("Holding {}", lock.path().display());

        let mut ran = Vec::new();
        let initial = self.check_status();
        tracing::info!("Environment status: {:?}", initial);

        if !initial.toolchain_present {
            self.install_toolchain(options.toolchain_mirror.as_deref()).await?;
            ran.push(Stage::Toolchain);
        } else if ctx.target.package_manager_executable().is_none() {
            self.install_package_manager().await?;
            ran.push(Stage::Toolchain);
        }

        if !initial.vcs_present {
            self.install_vcs(options.vcs_mirror.as_deref()).await?;
            ran.push(Stage::Vcs);
        }

        if !initial.source_tree_present || options.update {
            self.sync_repository(options.repository.as_deref()).await?;
            ran.push(Stage::SourceTree);
        }

        // A pulled tree may carry a new manifest, so dependencies are re-probed.
        if !self.check_status().dependencies_installed {
            self.install_dependencies(options.package_mirror.as_deref()).await?;
            ran.push(Stage::Dependencies);
        }

        let status = self.check_status();
        if !status.is_ready {
            return Err(BootError::Other(anyhow::anyhow!(
                "environment still incomplete after provisioning: {:?}",
                status
            )));
        }

        let backend = if options.start_backend {
            ran.push(Stage::Backend);
            Some(self.start_backend().await?)
        } else {
            None
        };

        drop(lock);
        Ok(BootstrapOutcome { ran, status, backend })
    }
}
