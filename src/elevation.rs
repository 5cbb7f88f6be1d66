//! Privilege detection and elevated relaunch.
//!
//! Detection writes and removes a marker file in a directory only an
//! administrator can modify. Relaunch starts a new copy of the current
//! executable through the platform's elevation prompt.

use std::path::{Path, PathBuf};

use crate::error::{BootError, Result};
use crate::process::CommandSpec;

/// Whether this process can write to a protected system directory.
pub fn is_elevated() -> bool {
    match protected_dir() {
        Some(dir) => can_write(&dir),
        None => true,
    }
}

fn protected_dir() -> Option<PathBuf> {
    if cfg!(windows) {
        let root = std::env::var_os("SystemRoot").unwrap_or_else(|| "C:\\Windows".into());
        Some(PathBuf::from(root))
    } else if cfg!(unix) {
        Some(PathBuf::from("/etc"))
    } else {
        None
    }
}

fn can_write(dir: &Path) -> bool {
    let marker = dir.join(format!(".bootkit-elevation-{}", std::process::id()));
    match std::fs::write(&marker, b"") {
        Ok(()) => {
            if let Err(e) = std::fs::remove_file(&marker) {
                tracing::warn!("Could not remove elevation marker {}: {}", marker.display(), e);
            }
            true
        }
        Err(e) => {
            tracing::debug!("{} is not writable: {}", dir.display(), e);
            false
        }
    }
}

/// The command that starts `exe args...` under an elevation request.
pub fn elevation_command(exe: &Path, args: &[String]) -> Result<CommandSpec> {
    if cfg!(windows) {
        let mut script = format!(
            "Start-Process -FilePath {} -Verb RunAs",
            powershell_quote(&exe.to_string_lossy())
        );
        if !args.is_empty() {
            let list: Vec<String> = args.iter().map(|a| powershell_quote(a)).collect();
            script.push_str(&format!(" -ArgumentList {}", list.join(",")));
        }
        return Ok(CommandSpec::new("powershell")
            .args(["-NoProfile", "-NonInteractive", "-Command"])
            .arg(script));
    }

    if cfg!(unix) {
        let helper = ["pkexec", "sudo"]
            .iter()
            .find_map(|name| which::which(name).ok())
            .ok_or_else(|| BootError::Privilege("neither pkexec nor sudo found on PATH".to_string()))?;
        return Ok(CommandSpec::new(helper)
            .path_arg(exe)
            .args(args.iter().cloned()));
    }

    Err(BootError::Privilege("elevation is not supported on this platform".to_string()))
}

fn powershell_quote(value: &str) -> String {
    format!("'{}'", value.replace('\'', "''"))
}

/// Start an elevated copy of the current executable with the same arguments.
///
/// Returns once the new instance is spawned; it is not waited on. Ending the
/// current instance is left to the caller so it can report the outcome first.
pub fn spawn_elevated() -> Result<()> {
    if protected_dir().is_none() {
        tracing::info!("No privilege model on this platform, nothing to relaunch");
        return Ok(());
    }

    let exe = std::env::current_exe()?;
    let args: Vec<String> = std::env::args().skip(1).collect();
    let spec = elevation_command(&exe, &args)?;
    tracing::info!("Relaunching elevated: {}", spec.display());

    let mut cmd = std::process::Command::new(&spec.program);
    cmd.args(&spec.args);
    cmd.spawn()
        .map_err(|e| BootError::Privilege(format!("could not start {}: {}", spec.program_name(), e)))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_can_write_tempdir() {
        let temp = tempfile::tempdir().unwrap();
        assert!(can_write(temp.path()));
        assert_eq!(std::fs::read_dir(temp.path()).unwrap().count(), 0);
    }

    #[test]
    fn test_cannot_write_missing_dir() {
        let temp = tempfile::tempdir().unwrap();
        assert!(!can_write(&temp.path().join("missing")));
    }

    #[test]
    fn test_powershell_quote_escapes_single_quotes() {
        assert_eq!(powershell_quote("C:\\it's here"), "'C:\\it''s here'");
    }

    #[cfg(windows)]
    #[test]
    fn test_windows_command_uses_runas() {
        let spec = elevation_command(Path::new("C:\\app\\bootkit.exe"), &["bootstrap".to_string()]).unwrap();
        assert_eq!(spec.program_name(), "powershell");
        let script = spec.args.last().unwrap();
        assert!(script.contains("-Verb RunAs"));
        assert!(script.contains("-ArgumentList 'bootstrap'"));
    }

    #[cfg(unix)]
    #[test]
    fn test_unix_command_wraps_executable() {
        let args = vec!["install".to_string(), "toolchain".to_string()];
        match elevation_command(Path::new("/opt/app/bootkit"), &args) {
            Ok(spec) => {
                assert!(["pkexec", "sudo"].contains(&spec.program_name().as_str()));
                assert_eq!(spec.args, vec!["/opt/app/bootkit", "install", "toolchain"]);
            }
            Err(e) => assert!(matches!(e, BootError::Privilege(_))),
        }
    }
}
