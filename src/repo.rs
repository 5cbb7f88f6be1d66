//! Application source tree synchronization through the bundled VCS client.
//!
//! An existing checkout is updated in place. A fresh root is populated by
//! cloning into a scratch directory and copying the result over the root,
//! which may already hold the `environment/` directory and other files that
//! a direct clone would refuse to overwrite.

use std::ffi::OsString;
use std::path::Path;

use crate::archive::{self, MergeMode};
use crate::context::Context;
use crate::error::{BootError, Result};
use crate::layout::ProvisioningTarget;
use crate::mirrors::MirrorKind;
use crate::process::CommandSpec;
use crate::progress::{Stage, StageReporter};

/// Clone or update the source tree. `repo` is a catalog key or a literal URL.
pub async fn sync(ctx: &Context, repo: Option<&str>) -> Result<()> {
    let reporter = ctx.bus.reporter(Stage::SourceTree);
    match sync_steps(ctx, repo, &reporter).await {
        Ok(()) => {
            reporter.completed("Source tree up to date");
            Ok(())
        }
        Err(e) => {
            reporter.error(format!("Repository sync failed: {}", e));
            Err(e)
        }
    }
}

async fn sync_steps(ctx: &Context, repo: Option<&str>, reporter: &StageReporter) -> Result<()> {
    let target = &ctx.target;
    let git = target.vcs_executable();
    if !git.is_file() {
        return Err(BootError::precondition("VCS executable", git));
    }

    let url = ctx
        .catalog
        .resolve_url(MirrorKind::Repository, repo)
        .ok_or_else(|| BootError::Config("No repository configured".to_string()))?;

    tokio::fs::create_dir_all(target.root()).await?;
    let env = vcs_environment(target);

    reporter.downloading(Some(0), "Checking VCS client...");
    run_git(ctx, &env, ["--version"]).await?;

    if target.vcs_metadata_dir().is_dir() {
        reporter.downloading(Some(0), "Pulling latest changes...");
        run_git(ctx, &env, ["pull"]).await?;
    } else {
        reporter.downloading(Some(0), "Cloning repository...");
        clone_into_root(ctx, &env, &url).await?;
    }

    Ok(())
}

async fn clone_into_root(ctx: &Context, env: &[(String, String)], url: &str) -> Result<()> {
    let target = &ctx.target;
    let scratch = target.clone_scratch_dir();
    archive::remove_existing(&scratch)?;

    let args = [
        "clone",
        "--progress",
        "--verbose",
        "--single-branch",
        "--depth",
        "1",
        "--branch",
        ctx.config.branch.as_str(),
        url,
    ]
    .map(String::from)
    .into_iter()
    .chain(std::iter::once(scratch.to_string_lossy().into_owned()));

    let result = match run_git(ctx, env, args).await {
        Ok(()) => copy_checkout(&scratch, target.root()).await,
        Err(e) => Err(e),
    };

    if let Err(e) = archive::remove_existing(&scratch) {
        tracing::warn!("Could not remove clone scratch {}: {}", scratch.display(), e);
    }

    result
}

async fn copy_checkout(scratch: &Path, root: &Path) -> Result<()> {
    let (src, dst) = (scratch.to_path_buf(), root.to_path_buf());
    let placed = tokio::task::spawn_blocking(move || archive::merge_entries(&src, &dst, MergeMode::Copy))
        .await
        .map_err(|e| BootError::Other(anyhow::anyhow!("copy task failed: {}", e)))??;
    tracing::info!("Copied {} entries into {}", placed.len(), root.display());
    Ok(())
}

async fn run_git<I, S>(ctx: &Context, env: &[(String, String)], args: I) -> Result<()>
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    let mut spec = CommandSpec::new(ctx.target.vcs_executable())
        .args(args)
        .current_dir(ctx.target.root());
    spec.env.extend(env.iter().cloned());

    ctx.runner
        .run(&spec, &mut |_| {}, &ctx.cancel)
        .await?
        .check(&spec.program_name())?;
    Ok(())
}

/// Environment for every VCS invocation: bundled binaries first on `PATH`,
/// no system config, and nothing that could block on a credential prompt.
pub fn vcs_environment(target: &ProvisioningTarget) -> Vec<(String, String)> {
    let mut dirs: Vec<OsString> = target
        .vcs_path_dirs()
        .into_iter()
        .map(|p| p.into_os_string())
        .collect();
    if let Some(existing) = std::env::var_os("PATH") {
        dirs.extend(std::env::split_paths(&existing).map(|p| p.into_os_string()));
    }
    let path = std::env::join_paths(dirs)
        .map(|p| p.to_string_lossy().into_owned())
        .unwrap_or_default();

    let mut env = vec![("PATH".to_string(), path)];
    if let Some(exec_path) = target.vcs_exec_path() {
        env.push(("GIT_EXEC_PATH".to_string(), exec_path.to_string_lossy().into_owned()));
    }
    if let Some(templates) = target.vcs_template_dir() {
        env.push(("GIT_TEMPLATE_DIR".to_string(), templates.to_string_lossy().into_owned()));
    }
    for (key, value) in [
        ("GIT_CONFIG_NOSYSTEM", "1"),
        ("GIT_TERMINAL_PROMPT", "0"),
        ("GIT_ASKPASS", ""),
        ("GIT_HTTP_LOW_SPEED_LIMIT", "0"),
        ("GIT_HTTP_LOW_SPEED_TIME", "0"),
    ] {
        env.push((key.to_string(), value.to_string()));
    }
    env
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::testing::context;
    use crate::process::testing::{RecordingRunner, Scripted};
    use crate::progress::Status;
    use std::fs;
    use std::path::Path;

    fn install_fake_vcs(root: &Path) {
        let target = ProvisioningTarget::new(root);
        let exe = target.vcs_executable();
        fs::create_dir_all(exe.parent().unwrap()).unwrap();
        fs::write(&exe, "").unwrap();
    }

    fn env_value<'a>(spec: &'a CommandSpec, key: &str) -> Option<&'a str> {
        spec.env.iter().find(|(k, _)| k == key).map(|(_, v)| v.as_str())
    }

    #[tokio::test]
    async fn test_missing_vcs_is_precondition() {
        let root = tempfile::tempdir().unwrap();
        let runner = RecordingRunner::new();
        let ctx = context(root.path(), "http://127.0.0.1:9", runner.clone());

        let err = sync(&ctx, None).await.unwrap_err();
        assert!(matches!(err, BootError::Precondition { .. }));
        assert!(runner.calls().is_empty());
    }

    #[tokio::test]
    async fn test_existing_checkout_only_pulls() {
        let root = tempfile::tempdir().unwrap();
        install_fake_vcs(root.path());
        fs::create_dir_all(root.path().join(".git")).unwrap();

        let runner = RecordingRunner::new();
        let ctx = context(root.path(), "http://127.0.0.1:9", runner.clone());

        sync(&ctx, None).await.unwrap();

        let calls = runner.calls();
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[0].args, vec!["--version"]);
        assert_eq!(calls[1].args, vec!["pull"]);
        assert_eq!(calls[1].cwd.as_deref(), Some(root.path()));
        assert!(!ctx.target.clone_scratch_dir().exists());
    }

    #[tokio::test]
    async fn test_fresh_root_clones_into_scratch_and_copies() {
        let root = tempfile::tempdir().unwrap();
        install_fake_vcs(root.path());
        fs::write(root.path().join("main.py"), "stale").unwrap();

        let runner = RecordingRunner::new()
            .then(Scripted::ok())
            .then(Scripted::ok().with_effect(|spec| {
                let scratch = Path::new(spec.args.last().unwrap());
                fs::create_dir_all(scratch.join(".git")).unwrap();
                fs::write(scratch.join(".git").join("HEAD"), "ref: refs/heads/x").unwrap();
                fs::write(scratch.join("main.py"), "fresh").unwrap();
            }));
        let ctx = context(root.path(), "http://127.0.0.1:9", runner.clone());
        let mut events = ctx.bus.subscribe();

        sync(&ctx, Some("test")).await.unwrap();

        let calls = runner.calls();
        assert_eq!(calls.len(), 2);
        let clone = &calls[1];
        assert_eq!(clone.args[0], "clone");
        assert!(!clone.args.iter().any(|a| a == "pull"));
        for flag in ["--single-branch", "--depth", "--branch", "--progress", "--verbose"] {
            assert!(clone.args.contains(&flag.to_string()), "missing {}", flag);
        }
        assert!(clone.args.contains(&ctx.config.branch));
        assert!(clone.args.contains(&"https://git.example.org/app.git".to_string()));
        assert_eq!(env_value(clone, "GIT_TERMINAL_PROMPT"), Some("0"));
        assert_eq!(env_value(clone, "GIT_ASKPASS"), Some(""));
        assert_eq!(env_value(clone, "GIT_CONFIG_NOSYSTEM"), Some("1"));

        assert_eq!(fs::read_to_string(root.path().join("main.py")).unwrap(), "fresh");
        assert!(root.path().join(".git").join("HEAD").is_file());
        assert!(ctx.target.vcs_executable().is_file());
        assert!(!ctx.target.clone_scratch_dir().exists());

        let percents: Vec<Option<u8>> = std::iter::from_fn(|| events.try_recv().ok()).map(|e| e.percent).collect();
        assert_eq!(percents.first(), Some(&Some(0)));
        assert_eq!(percents.last(), Some(&Some(100)));
    }

    #[tokio::test]
    async fn test_failed_clone_reports_exit_code_and_cleans_scratch() {
        let root = tempfile::tempdir().unwrap();
        install_fake_vcs(root.path());

        let runner = RecordingRunner::new()
            .then(Scripted::ok())
            .then(
                Scripted::exit(128, &["fatal: unable to access repository"]).with_effect(|spec| {
                    fs::create_dir_all(spec.args.last().unwrap()).unwrap();
                }),
            );
        let ctx = context(root.path(), "http://127.0.0.1:9", runner);
        let mut events = ctx.bus.subscribe();

        let err = sync(&ctx, None).await.unwrap_err();

        assert!(matches!(err, BootError::Subprocess { code: Some(128), .. }));
        assert!(!ctx.target.clone_scratch_dir().exists());
        assert!(!root.path().join(".git").exists());
        let last = std::iter::from_fn(|| events.try_recv().ok()).last().unwrap();
        assert_eq!(last.status, Status::Error);
    }

    #[tokio::test]
    async fn test_failed_version_check_stops_sync() {
        let root = tempfile::tempdir().unwrap();
        install_fake_vcs(root.path());

        let runner = RecordingRunner::new().then(Scripted::exit(1, &[]));
        let ctx = context(root.path(), "http://127.0.0.1:9", runner.clone());

        assert!(sync(&ctx, None).await.is_err());
        assert_eq!(runner.calls().len(), 1);
    }

    #[test]
    fn test_environment_prepends_bundled_dirs() {
        let target = ProvisioningTarget::new("/srv/app");
        let env = vcs_environment(&target);
        let path = &env.iter().find(|(k, _)| k == "PATH").unwrap().1;
        let first = std::env::split_paths(path).next().unwrap();
        assert_eq!(first, target.vcs_dir().join("bin"));
        assert!(env.iter().any(|(k, v)| k == "GIT_HTTP_LOW_SPEED_LIMIT" && v == "0"));
    }

    #[test]
    fn test_environment_sets_exec_path_when_bundled() {
        let temp = tempfile::tempdir().unwrap();
        let target = ProvisioningTarget::new(temp.path());
        assert!(!vcs_environment(&target).iter().any(|(k, _)| k == "GIT_EXEC_PATH"));

        let core = target.vcs_dir().join("mingw64").join("libexec").join("git-core");
        fs::create_dir_all(&core).unwrap();
        let env = vcs_environment(&target);
        assert!(env
            .iter()
            .any(|(k, v)| k == "GIT_EXEC_PATH" && Path::new(v) == core.as_path()));
    }
}
