//! Filesystem readiness probe.
//!
//! Nothing here is cached: every call re-reads the disk, so a status taken
//! after a crashed or half-finished install reflects exactly what is there.

use std::path::Path;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::layout::ProvisioningTarget;

/// Packages directories with at most this many entries count as empty.
/// A fresh toolchain already ships a handful of bundled entries.
const PACKAGES_HEURISTIC_THRESHOLD: usize = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EnvironmentStatus {
    pub toolchain_present: bool,
    pub vcs_present: bool,
    pub source_tree_present: bool,
    pub dependencies_installed: bool,
    pub is_ready: bool,
}

impl EnvironmentStatus {
    fn new(toolchain: bool, vcs: bool, source_tree: bool, dependencies: bool) -> Self {
        Self {
            toolchain_present: toolchain,
            vcs_present: vcs,
            source_tree_present: source_tree,
            dependencies_installed: dependencies,
            is_ready: toolchain && vcs && source_tree && dependencies,
        }
    }
}

pub fn probe(target: &ProvisioningTarget) -> EnvironmentStatus {
    // Executables, not directories: a failed extraction can leave a partial tree.
    let toolchain = target.toolchain_executable().is_file();
    let vcs = target.vcs_executable().is_file();
    let source_tree = target.source_marker().is_file();
    let dependencies = toolchain && dependencies_installed(target);

    let status = EnvironmentStatus::new(toolchain, vcs, source_tree, dependencies);
    tracing::debug!("Probed {}: {:?}", target.root().display(), status);
    status
}

fn dependencies_installed(target: &ProvisioningTarget) -> bool {
    let stamp = target.dependency_stamp();
    if let Ok(recorded) = std::fs::read_to_string(&stamp) {
        return match manifest_digest(&target.manifest_path()) {
            Some(current) => recorded.trim() == current,
            None => false,
        };
    }

    count_entries(&target.packages_dir()) > PACKAGES_HEURISTIC_THRESHOLD
}

fn count_entries(dir: &Path) -> usize {
    std::fs::read_dir(dir)
        .map(|entries| entries.filter_map(|e| e.ok()).count())
        .unwrap_or(0)
}

/// Hex SHA-256 of the manifest, or `None` when it cannot be read.
pub fn manifest_digest(manifest: &Path) -> Option<String> {
    let bytes = std::fs::read(manifest).ok()?;
    Some(format!("{:x}", Sha256::digest(&bytes)))
}
