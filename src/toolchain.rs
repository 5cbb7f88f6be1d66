//! Interpreter toolchain installation and package-manager bootstrap.

use std::path::Path;

use regex_lite::Regex;

use crate::archive;
use crate::context::Context;
use crate::download::ensure_min_size;
use crate::error::{BootError, Result};
use crate::mirrors::MirrorKind;
use crate::process::CommandSpec;
use crate::progress::{Stage, StageReporter};

const BOOTSTRAP_SCRIPT: &str = "get-pip.py";

/// Download, verify and unpack the toolchain, then make sure it has a package manager.
///
/// An unknown `mirror` key falls back to the catalog default. On failure an
/// error event is published for the toolchain stage and the error returned.
pub async fn install(ctx: &Context, mirror: Option<&str>) -> Result<()> {
    let reporter = ctx.bus.reporter(Stage::Toolchain);
    match install_steps(ctx, mirror, &reporter).await {
        Ok(()) => {
            reporter.completed("Toolchain installed");
            Ok(())
        }
        Err(e) => {
            reporter.error(format!("Toolchain installation failed: {}", e));
            Err(e)
        }
    }
}

/// Run only the package-manager bootstrap against an existing toolchain.
pub async fn bootstrap_package_manager(ctx: &Context) -> Result<()> {
    let reporter = ctx.bus.reporter(Stage::Toolchain);
    match ensure_package_manager(ctx, &reporter).await {
        Ok(()) => {
            reporter.completed("Package manager ready");
            Ok(())
        }
        Err(e) => {
            reporter.error(format!("Package manager bootstrap failed: {}", e));
            Err(e)
        }
    }
}

async fn install_steps(ctx: &Context, mirror: Option<&str>, reporter: &StageReporter) -> Result<()> {
    let target = &ctx.target;
    let url = ctx
        .catalog
        .resolve_url(MirrorKind::Toolchain, mirror)
        .ok_or_else(|| BootError::Config("No toolchain mirror configured".to_string()))?;

    tokio::fs::create_dir_all(target.environment_dir()).await?;
    let archive_path = target.toolchain_archive();

    reporter.downloading(Some(0), "Downloading toolchain...");
    ctx.downloader
        .download(&url, &archive_path, reporter, &ctx.cancel)
        .await?;
    ensure_min_size(&archive_path, ctx.config.min_toolchain_bytes, "toolchain archive").await?;

    reporter.extracting(0, "Extracting toolchain...");
    let extracted = archive::extract(&archive_path, &target.toolchain_dir()).await;
    if let Err(e) = tokio::fs::remove_file(&archive_path).await {
        tracing::warn!("Could not remove {}: {}", archive_path.display(), e);
    }
    extracted?;
    reporter.extracting(100, "Toolchain extracted");

    let patched = patch_site_files(&target.toolchain_dir()).await?;
    tracing::debug!("Enabled site imports in {} file(s)", patched);

    ensure_package_manager(ctx, reporter).await
}

/// Rewrite `#import site` to `import site` in every `*._pth` file.
///
/// Embeddable distributions ship with site imports disabled, which hides
/// anything the package manager installs.
async fn patch_site_files(toolchain_dir: &Path) -> Result<usize> {
    let pattern = Regex::new(r"(?m)^#\s*import site")
        .map_err(|e| BootError::Other(anyhow::anyhow!("invalid site pattern: {}", e)))?;

    let mut patched = 0;
    let mut entries = tokio::fs::read_dir(toolchain_dir).await?;
    while let Some(entry) = entries.next_entry().await? {
        let path = entry.path();
        if path.extension().and_then(|e| e.to_str()) != Some("_pth") {
            continue;
        }

        let content = tokio::fs::read_to_string(&path).await?;
        let updated = pattern.replace_all(&content, "import site");
        if updated.as_ref() != content.as_str() {
            tokio::fs::write(&path, updated.as_bytes()).await?;
            tracing::info!("Enabled site imports in {}", path.display());
            patched += 1;
        }
    }

    Ok(patched)
}

async fn ensure_package_manager(ctx: &Context, reporter: &StageReporter) -> Result<()> {
    let target = &ctx.target;

    let python = target.toolchain_executable();
    if !python.is_file() {
        return Err(BootError::precondition("Toolchain executable", python));
    }

    if let Some(pip) = target.package_manager_executable() {
        tracing::info!("Package manager already present at {}", pip.display());
        return Ok(());
    }

    let script = target.environment_dir().join(BOOTSTRAP_SCRIPT);
    let result = run_bootstrap(ctx, reporter, &python, &script).await;

    match tokio::fs::remove_file(&script).await {
        Ok(()) => {}
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => tracing::warn!("Could not remove {}: {}", script.display(), e),
    }

    result
}

async fn run_bootstrap(
    ctx: &Context,
    reporter: &StageReporter,
    python: &Path,
    script: &Path,
) -> Result<()> {
    reporter.installing(0, "Downloading package manager bootstrap...");
    ctx.downloader
        .download(&ctx.config.bootstrap_url, script, reporter, &ctx.cancel)
        .await?;
    ensure_min_size(script, ctx.config.min_bootstrap_bytes, BOOTSTRAP_SCRIPT).await?;

    reporter.installing(50, "Installing package manager...");
    let install = CommandSpec::new(python)
        .path_arg(script)
        .current_dir(ctx.target.toolchain_dir());
    ctx.runner
        .run(&install, &mut |_| {}, &ctx.cancel)
        .await?
        .check(&install.program_name())?;

    reporter.installing(90, "Verifying package manager...");
    let verify = CommandSpec::new(python)
        .args(["-m", "pip", "--version"])
        .current_dir(ctx.target.toolchain_dir());
    let mut version = None;
    ctx.runner
        .run(
            &verify,
            &mut |line| {
                if version.is_none() && !line.text.trim().is_empty() {
                    version = Some(line.text.trim().to_string());
                }
            },
            &ctx.cancel,
        )
        .await?
        .check(&verify.program_name())?;

    tracing::info!("Package manager ready: {}", version.as_deref().unwrap_or("unknown version"));
    Ok(())
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::archive::tests::write_zip;
    use crate::context::testing::context;
    use crate::layout::ProvisioningTarget;
    use crate::probe::probe;
    use crate::process::testing::{RecordingRunner, Scripted};
    use crate::progress::Status;
    use std::fs;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn relative(path: &Path, base: &Path) -> String {
        path.strip_prefix(base)
            .unwrap()
            .components()
            .map(|c| c.as_os_str().to_string_lossy().into_owned())
            .collect::<Vec<_>>()
            .join("/")
    }

    /// Zip of a toolchain wrapped in one folder, optionally shipping a package manager.
    pub(crate) fn toolchain_zip(dir: &Path, with_pip: bool) -> Vec<u8> {
        let layout = ProvisioningTarget::new("/layout");
        let base = layout.toolchain_dir();
        let python = format!("python-3.12/{}", relative(&layout.toolchain_executable(), &base));
        let pip = format!(
            "python-3.12/{}",
            relative(&layout.package_manager_candidates()[0], &base)
        );
        let padding = "x".repeat(4096);

        let mut files = vec![
            (python, "#!interpreter".to_string()),
            ("python-3.12/python312._pth".to_string(), "python312.zip\n.\n#import site\n".to_string()),
            ("python-3.12/LICENSE.txt".to_string(), padding),
        ];
        if with_pip {
            files.push((pip, "#!pip".to_string()));
        }

        let zip_path = dir.join("fixture.zip");
        let refs: Vec<(&str, &str)> = files.iter().map(|(n, c)| (n.as_str(), c.as_str())).collect();
        write_zip(&zip_path, &refs);
        fs::read(&zip_path).unwrap()
    }

    async fn serve(server: &MockServer, route: &str, body: Vec<u8>, expected_calls: u64) {
        Mock::given(method("GET"))
            .and(path(route))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(body))
            .expect(expected_calls)
            .mount(server)
            .await;
    }

    #[tokio::test]
    async fn test_install_bootstraps_package_manager() {
        let server = MockServer::start().await;
        let fixtures = tempfile::tempdir().unwrap();
        serve(&server, "/toolchain.zip", toolchain_zip(fixtures.path(), false), 1).await;
        serve(&server, "/get-pip.py", vec![b'#'; 512], 1).await;

        let root = tempfile::tempdir().unwrap();
        let runner = RecordingRunner::new().then(Scripted::ok().with_effect(|spec| {
            let scripts = spec.cwd.as_ref().unwrap().join(if cfg!(windows) { "Scripts" } else { "bin" });
            fs::create_dir_all(&scripts).unwrap();
            fs::write(scripts.join(if cfg!(windows) { "pip.exe" } else { "pip" }), "").unwrap();
        }));
        let ctx = context(root.path(), &server.uri(), runner.clone());
        let mut events = ctx.bus.subscribe();

        install(&ctx, Some("test")).await.unwrap();

        let target = &ctx.target;
        assert!(target.toolchain_executable().is_file());
        assert!(!target.toolchain_archive().exists());
        assert!(!target.environment_dir().join(BOOTSTRAP_SCRIPT).exists());
        let pth = fs::read_to_string(target.toolchain_dir().join("python312._pth")).unwrap();
        assert!(pth.contains("\nimport site"));
        assert!(!pth.contains("#import site"));

        let calls = runner.calls();
        assert_eq!(calls.len(), 2);
        assert!(calls[0].args[0].ends_with(BOOTSTRAP_SCRIPT));
        assert_eq!(calls[1].args, vec!["-m", "pip", "--version"]);

        let last = std::iter::from_fn(|| events.try_recv().ok()).last().unwrap();
        assert_eq!(last.status, Status::Completed);
        assert_eq!(last.percent, Some(100));
    }

    #[tokio::test]
    async fn test_second_install_skips_bootstrap() {
        let server = MockServer::start().await;
        let fixtures = tempfile::tempdir().unwrap();
        serve(&server, "/toolchain.zip", toolchain_zip(fixtures.path(), true), 2).await;
        serve(&server, "/get-pip.py", vec![b'#'; 512], 0).await;

        let root = tempfile::tempdir().unwrap();
        let runner = RecordingRunner::new();
        let ctx = context(root.path(), &server.uri(), runner.clone());

        install(&ctx, None).await.unwrap();
        install(&ctx, None).await.unwrap();

        assert!(runner.calls().is_empty());
        assert!(ctx.target.package_manager_executable().is_some());
    }

    #[tokio::test]
    async fn test_undersized_archive_is_rejected() {
        let server = MockServer::start().await;
        serve(&server, "/toolchain.zip", b"<html>busy</html>".to_vec(), 1).await;

        let root = tempfile::tempdir().unwrap();
        let ctx = context(root.path(), &server.uri(), RecordingRunner::new());
        let mut events = ctx.bus.subscribe();

        let err = install(&ctx, Some("test")).await.unwrap_err();

        assert!(matches!(err, BootError::Integrity { .. }));
        assert!(!ctx.target.toolchain_archive().exists());
        assert!(!ctx.target.toolchain_dir().exists());

        let last = std::iter::from_fn(|| events.try_recv().ok()).last().unwrap();
        assert_eq!(last.status, Status::Error);
        assert!(last.message.contains("Integrity"));

        let status = probe(&ctx.target);
        assert!(!status.toolchain_present);
        assert!(!status.is_ready);
    }

    #[tokio::test]
    async fn test_archive_without_interpreter_is_not_present() {
        let server = MockServer::start().await;
        let fixtures = tempfile::tempdir().unwrap();
        let zip_path = fixtures.path().join("no-interpreter.zip");
        let padding = "x".repeat(4096);
        write_zip(&zip_path, &[("python-3.12/LICENSE.txt", padding.as_str())]);
        serve(&server, "/toolchain.zip", fs::read(&zip_path).unwrap(), 1).await;

        let root = tempfile::tempdir().unwrap();
        let runner = RecordingRunner::new();
        let ctx = context(root.path(), &server.uri(), runner.clone());

        let err = install(&ctx, Some("test")).await.unwrap_err();

        assert!(matches!(err, BootError::Precondition { .. }));
        assert!(ctx.target.toolchain_dir().is_dir());
        assert!(!probe(&ctx.target).toolchain_present);
        assert!(runner.calls().is_empty());
    }

    #[tokio::test]
    async fn test_undersized_bootstrap_script_is_rejected() {
        let server = MockServer::start().await;
        let fixtures = tempfile::tempdir().unwrap();
        serve(&server, "/toolchain.zip", toolchain_zip(fixtures.path(), false), 1).await;
        serve(&server, "/get-pip.py", b"404".to_vec(), 1).await;

        let root = tempfile::tempdir().unwrap();
        let runner = RecordingRunner::new();
        let ctx = context(root.path(), &server.uri(), runner.clone());

        let err = install(&ctx, None).await.unwrap_err();

        assert!(matches!(err, BootError::Integrity { .. }));
        assert!(runner.calls().is_empty());
        assert!(!ctx.target.environment_dir().join(BOOTSTRAP_SCRIPT).exists());
    }

    #[tokio::test]
    async fn test_failed_verification_is_subprocess_error() {
        let server = MockServer::start().await;
        let fixtures = tempfile::tempdir().unwrap();
        serve(&server, "/toolchain.zip", toolchain_zip(fixtures.path(), false), 1).await;
        serve(&server, "/get-pip.py", vec![b'#'; 512], 1).await;

        let root = tempfile::tempdir().unwrap();
        let runner = RecordingRunner::new()
            .then(Scripted::ok())
            .then(Scripted::exit(1, &["No module named pip"]));
        let ctx = context(root.path(), &server.uri(), runner);

        let err = install(&ctx, None).await.unwrap_err();
        assert!(matches!(err, BootError::Subprocess { code: Some(1), .. }));
        assert!(!ctx.target.environment_dir().join(BOOTSTRAP_SCRIPT).exists());
    }

    #[tokio::test]
    async fn test_bootstrap_requires_toolchain() {
        let root = tempfile::tempdir().unwrap();
        let ctx = context(root.path(), "http://127.0.0.1:9", RecordingRunner::new());

        let err = bootstrap_package_manager(&ctx).await.unwrap_err();
        assert!(matches!(err, BootError::Precondition { .. }));
    }

    #[tokio::test]
    async fn test_patch_site_files_leaves_enabled_files_alone() {
        let temp = tempfile::tempdir().unwrap();
        fs::write(temp.path().join("a._pth"), "import site\n").unwrap();
        fs::write(temp.path().join("b._pth"), "# import site\n").unwrap();
        fs::write(temp.path().join("notes.txt"), "#import site\n").unwrap();

        assert_eq!(patch_site_files(temp.path()).await.unwrap(), 1);
        assert_eq!(fs::read_to_string(temp.path().join("b._pth")).unwrap(), "import site\n");
        assert_eq!(fs::read_to_string(temp.path().join("notes.txt")).unwrap(), "#import site\n");
    }
}
