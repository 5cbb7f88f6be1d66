//! Filesystem layout of a provisioning target.
//!
//! Every installer resolves its paths through [`ProvisioningTarget`], so the
//! layout below is the single source of truth for where artifacts live:
//!
//! ```text
//! <root>/                      application source tree (VCS checkout)
//! <root>/environment/toolchain interpreter distribution
//! <root>/environment/vcs       version-control client
//! <root>/environment/*.zip     transient downloads
//! ```

use std::path::{Path, PathBuf};

/// Directory under the root that holds provisioned tools.
pub const ENVIRONMENT_DIR: &str = "environment";

/// Metadata directory that marks an existing checkout.
pub const VCS_METADATA_DIR: &str = ".git";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProvisioningTarget {
    root: PathBuf,
    manifest: String,
    entry_point: String,
}

impl ProvisioningTarget {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            manifest: "requirements.txt".to_string(),
            entry_point: "main.py".to_string(),
        }
    }

    pub fn with_manifest(mut self, manifest: impl Into<String>) -> Self {
        self.manifest = manifest.into();
        self
    }

    pub fn with_entry_point(mut self, entry_point: impl Into<String>) -> Self {
        self.entry_point = entry_point.into();
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn environment_dir(&self) -> PathBuf {
        self.root.join(ENVIRONMENT_DIR)
    }

    pub fn toolchain_dir(&self) -> PathBuf {
        self.environment_dir().join("toolchain")
    }

    pub fn toolchain_archive(&self) -> PathBuf {
        self.environment_dir().join("toolchain.zip")
    }

    pub fn vcs_dir(&self) -> PathBuf {
        self.environment_dir().join("vcs")
    }

    pub fn vcs_archive(&self) -> PathBuf {
        self.environment_dir().join("vcs.zip")
    }

    pub fn lock_file(&self) -> PathBuf {
        self.environment_dir().join(".bootkit.lock")
    }

    /// Combined stdout/stderr of the backend process.
    pub fn backend_log(&self) -> PathBuf {
        self.environment_dir().join("backend.log")
    }

    pub fn dependency_stamp(&self) -> PathBuf {
        self.environment_dir().join(".dependencies.sha256")
    }

    /// Interpreter executable inside the toolchain.
    pub fn toolchain_executable(&self) -> PathBuf {
        if cfg!(windows) {
            self.toolchain_dir().join("python.exe")
        } else {
            self.toolchain_dir().join("bin").join("python3")
        }
    }

    /// Directory the package manager's launcher scripts are installed into.
    pub fn toolchain_scripts_dir(&self) -> PathBuf {
        if cfg!(windows) {
            self.toolchain_dir().join("Scripts")
        } else {
            self.toolchain_dir().join("bin")
        }
    }

    /// Candidate package-manager executables, preferred first.
    pub fn package_manager_candidates(&self) -> Vec<PathBuf> {
        let scripts = self.toolchain_scripts_dir();
        if cfg!(windows) {
            vec![scripts.join("pip.exe"), scripts.join("pip3.exe")]
        } else {
            vec![scripts.join("pip"), scripts.join("pip3")]
        }
    }

    /// First package-manager executable that exists on disk.
    pub fn package_manager_executable(&self) -> Option<PathBuf> {
        self.package_manager_candidates().into_iter().find(|p| p.is_file())
    }

    /// Third-party package directory, used by the readiness heuristic.
    pub fn packages_dir(&self) -> PathBuf {
        if cfg!(windows) {
            return self.toolchain_dir().join("Lib").join("site-packages");
        }

        // Unix distributions nest site-packages under a versioned lib dir.
        let lib = self.toolchain_dir().join("lib");
        if let Ok(entries) = std::fs::read_dir(&lib) {
            let mut versioned: Vec<PathBuf> = entries
                .filter_map(|e| e.ok())
                .map(|e| e.path())
                .filter(|p| {
                    p.file_name()
                        .and_then(|n| n.to_str())
                        .is_some_and(|n| n.starts_with("python"))
                })
                .collect();
            versioned.sort();
            if let Some(dir) = versioned.pop() {
                return dir.join("site-packages");
            }
        }
        lib.join("site-packages")
    }

    /// VCS executable RepositorySync invokes.
    pub fn vcs_executable(&self) -> PathBuf {
        if cfg!(windows) {
            self.vcs_dir().join("bin").join("git.exe")
        } else {
            self.vcs_dir().join("bin").join("git")
        }
    }

    /// Directories prepended to `PATH` for VCS subprocesses.
    pub fn vcs_path_dirs(&self) -> Vec<PathBuf> {
        let vcs = self.vcs_dir();
        vec![
            vcs.join("bin"),
            vcs.join("mingw64").join("bin"),
            vcs.join("mingw64").join("libexec").join("git-core"),
        ]
    }

    /// Helper-program directory of a bundled client, when the layout ships one.
    pub fn vcs_exec_path(&self) -> Option<PathBuf> {
        let vcs = self.vcs_dir();
        [
            vcs.join("mingw64").join("libexec").join("git-core"),
            vcs.join("libexec").join("git-core"),
        ]
        .into_iter()
        .find(|p| p.is_dir())
    }

    /// Template directory of a bundled client, when the layout ships one.
    pub fn vcs_template_dir(&self) -> Option<PathBuf> {
        let vcs = self.vcs_dir();
        [
            vcs.join("mingw64").join("share").join("git-core").join("templates"),
            vcs.join("share").join("git-core").join("templates"),
        ]
        .into_iter()
        .find(|p| p.is_dir())
    }

    pub fn vcs_metadata_dir(&self) -> PathBuf {
        self.root.join(VCS_METADATA_DIR)
    }

    /// Scratch directory for clone-then-merge.
    pub fn clone_scratch_dir(&self) -> PathBuf {
        self.root.join(".bootkit_clone_tmp")
    }

    pub fn manifest_path(&self) -> PathBuf {
        self.root.join(&self.manifest)
    }

    pub fn entry_point_path(&self) -> PathBuf {
        self.root.join(&self.entry_point)
    }

    /// File whose presence marks a usable source tree.
    pub fn source_marker(&self) -> PathBuf {
        self.entry_point_path()
    }
}
