//! Bundled version-control client installation.

use crate::archive;
use crate::context::Context;
use crate::download::ensure_min_size;
use crate::error::{BootError, Result};
use crate::mirrors::MirrorKind;
use crate::progress::{Stage, StageReporter};

/// Download and unpack the VCS client into `environment/vcs`.
pub async fn install(ctx: &Context, mirror: Option<&str>) -> Result<()> {
    let reporter = ctx.bus.reporter(Stage::Vcs);
    match install_steps(ctx, mirror, &reporter).await {
        Ok(()) => {
            reporter.completed("VCS client installed");
            Ok(())
        }
        Err(e) => {
            reporter.error(format!("VCS client installation failed: {}", e));
            Err(e)
        }
    }
}

async fn install_steps(ctx: &Context, mirror: Option<&str>, reporter: &StageReporter) -> Result<()> {
    let target = &ctx.target;
    let url = ctx
        .catalog
        .resolve_url(MirrorKind::Vcs, mirror)
        .ok_or_else(|| BootError::Config("No VCS client mirror configured".to_string()))?;

    tokio::fs::create_dir_all(target.environment_dir()).await?;
    let archive_path = target.vcs_archive();

    reporter.downloading(Some(0), "Downloading VCS client...");
    ctx.downloader
        .download(&url, &archive_path, reporter, &ctx.cancel)
        .await?;
    ensure_min_size(&archive_path, ctx.config.min_vcs_bytes, "VCS client archive").await?;

    reporter.extracting(0, "Extracting VCS client...");
    let extracted = archive::extract(&archive_path, &target.vcs_dir()).await;
    if let Err(e) = tokio::fs::remove_file(&archive_path).await {
        tracing::warn!("Could not remove {}: {}", archive_path.display(), e);
    }
    extracted?;

    let executable = target.vcs_executable();
    if !executable.is_file() {
        return Err(BootError::integrity(
            "VCS client archive",
            format!("expected executable missing: {}", executable.display()),
        ));
    }

    tracing::info!("VCS client available at {}", executable.display());
    Ok(())
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::archive::tests::write_zip;
    use crate::context::testing::context;
    use crate::process::testing::RecordingRunner;
    use crate::progress::Status;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    pub(crate) fn vcs_zip(dir: &std::path::Path, executable: &str) -> Vec<u8> {
        let zip_path = dir.join("vcs-fixture.zip");
        let padding = "p".repeat(4096);
        write_zip(
            &zip_path,
            &[
                (executable, "#!git"),
                ("PortableGit/mingw64/share/doc.txt", padding.as_str()),
            ],
        );
        std::fs::read(&zip_path).unwrap()
    }

    pub(crate) fn executable_entry() -> &'static str {
        if cfg!(windows) {
            "PortableGit/bin/git.exe"
        } else {
            "PortableGit/bin/git"
        }
    }

    #[tokio::test]
    async fn test_install_normalizes_wrapping_folder() {
        let server = MockServer::start().await;
        let fixtures = tempfile::tempdir().unwrap();
        Mock::given(method("GET"))
            .and(path("/vcs.zip"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(vcs_zip(fixtures.path(), executable_entry())))
            .mount(&server)
            .await;

        let root = tempfile::tempdir().unwrap();
        let ctx = context(root.path(), &server.uri(), RecordingRunner::new());
        let mut events = ctx.bus.subscribe();

        install(&ctx, Some("test")).await.unwrap();

        assert!(ctx.target.vcs_executable().is_file());
        assert!(!ctx.target.vcs_dir().join("PortableGit").exists());
        assert!(!ctx.target.vcs_archive().exists());

        let statuses: Vec<Status> = std::iter::from_fn(|| events.try_recv().ok()).map(|e| e.status).collect();
        assert!(statuses.contains(&Status::Downloading));
        assert!(statuses.contains(&Status::Extracting));
        assert_eq!(statuses.last(), Some(&Status::Completed));
    }

    #[tokio::test]
    async fn test_archive_without_executable_is_integrity_error() {
        let server = MockServer::start().await;
        let fixtures = tempfile::tempdir().unwrap();
        Mock::given(method("GET"))
            .and(path("/vcs.zip"))
            .respond_with(
                ResponseTemplate::new(200).set_body_bytes(vcs_zip(fixtures.path(), "PortableGit/README.txt")),
            )
            .mount(&server)
            .await;

        let root = tempfile::tempdir().unwrap();
        let ctx = context(root.path(), &server.uri(), RecordingRunner::new());

        let err = install(&ctx, None).await.unwrap_err();
        assert!(matches!(err, BootError::Integrity { .. }));
        assert!(err.to_string().contains("expected executable missing"));

        // The partial tree stays on disk but must not count as installed.
        assert!(ctx.target.vcs_dir().is_dir());
        assert!(!crate::probe::probe(&ctx.target).vcs_present);
    }

    #[tokio::test]
    async fn test_server_error_is_network_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let root = tempfile::tempdir().unwrap();
        let ctx = context(root.path(), &server.uri(), RecordingRunner::new());

        let err = install(&ctx, Some("test")).await.unwrap_err();
        assert!(matches!(err, BootError::Network { .. }));
        assert!(!ctx.target.vcs_archive().exists());
        assert!(!ctx.target.vcs_dir().exists());
    }
}
