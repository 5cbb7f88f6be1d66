//! Shared collaborators handed to every installer.

use std::path::PathBuf;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::config::AppConfig;
use crate::download::Downloader;
use crate::error::Result;
use crate::layout::ProvisioningTarget;
use crate::mirrors::{MirrorCatalog, MirrorKind};
use crate::process::{CommandRunner, TokioRunner};
use crate::progress::ProgressBus;

#[derive(Clone)]
pub struct Context {
    pub config: AppConfig,
    pub target: ProvisioningTarget,
    pub catalog: Arc<MirrorCatalog>,
    pub downloader: Downloader,
    pub runner: Arc<dyn CommandRunner>,
    pub bus: ProgressBus,
    pub cancel: CancellationToken,
}

impl Context {
    /// Production context: built-in mirrors with the configured defaults,
    /// a real HTTP client and real subprocesses.
    pub fn new(config: AppConfig, root: impl Into<PathBuf>) -> Result<Self> {
        let mut catalog = MirrorCatalog::with_defaults();
        catalog.set_default(MirrorKind::Toolchain, &config.toolchain_mirror);
        catalog.set_default(MirrorKind::Vcs, &config.vcs_mirror);
        catalog.set_default(MirrorKind::PackageIndex, &config.package_mirror);
        catalog.set_default(MirrorKind::Repository, &config.repository);

        let target = ProvisioningTarget::new(root)
            .with_manifest(config.manifest.clone())
            .with_entry_point(config.entry_point.clone());
        let downloader = Downloader::new(config.connect_timeout())?;

        Ok(Self {
            config,
            target,
            catalog: Arc::new(catalog),
            downloader,
            runner: Arc::new(TokioRunner),
            bus: ProgressBus::new(),
            cancel: CancellationToken::new(),
        })
    }

    pub fn with_catalog(mut self, catalog: MirrorCatalog) -> Self {
        self.catalog = Arc::new(catalog);
        self
    }

    pub fn with_runner(mut self, runner: Arc<dyn CommandRunner>) -> Self {
        self.runner = runner;
        self
    }

    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }
}

impl std::fmt::Debug for Context {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Context")
            .field("root", &self.target.root())
            .field("catalog", &self.catalog)
            .finish_non_exhaustive()
    }
}
