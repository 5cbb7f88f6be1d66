//! Archive extraction with payload-root normalization and overwrite-merge.
//!
//! Archives are never unpacked straight into their destination. They land in a
//! scratch directory next to the target first; if that scratch directory holds
//! a single wrapping folder, the folder's contents are the payload. Each
//! payload entry then replaces the same-named entry in the target, so a
//! re-run over a half-finished install converges instead of failing.

use std::fs::{self, File};
use std::io::BufReader;
use std::path::{Path, PathBuf};

use crate::error::{BootError, Result};

/// How [`merge_entries`] places entries into the destination.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeMode {
    /// Rename into place, copying only when rename crosses filesystems.
    Move,
    /// Copy into place and leave the source untouched.
    Copy,
}

/// Extract `archive` into `target`, returning the names placed at its top level.
pub async fn extract(archive: &Path, target: &Path) -> Result<Vec<String>> {
    let archive = archive.to_path_buf();
    let target = target.to_path_buf();

    tokio::task::spawn_blocking(move || extract_blocking(&archive, &target))
        .await
        .map_err(|e| BootError::Other(anyhow::anyhow!("extraction task failed: {}", e)))?
}

fn extract_blocking(archive: &Path, target: &Path) -> Result<Vec<String>> {
    if !archive.is_file() {
        return Err(BootError::precondition("Archive", archive));
    }

    fs::create_dir_all(target)?;
    let scratch_parent = target.parent().unwrap_or(target);

    // Dropped on every return path, which removes the scratch tree.
    let scratch = tempfile::Builder::new()
        .prefix(".extract-")
        .tempdir_in(scratch_parent)?;

    tracing::debug!("Unpacking {} into {}", archive.display(), scratch.path().display());
    unpack_zip(archive, scratch.path())?;

    let payload = payload_root(scratch.path())?;
    if payload != scratch.path() {
        tracing::debug!("Archive wraps its payload in {}", payload.display());
    }

    let placed = merge_entries(&payload, target, MergeMode::Move)?;
    tracing::info!(
        "Extracted {} entries from {} into {}",
        placed.len(),
        archive.display(),
        target.display()
    );
    Ok(placed)
}

fn unpack_zip(archive_path: &Path, dest: &Path) -> Result<()> {
    let file = File::open(archive_path)?;
    let mut archive = zip::ZipArchive::new(BufReader::new(file))?;

    for i in 0..archive.len() {
        let mut entry = archive.by_index(i)?;
        let Some(relative) = entry.enclosed_name() else {
            tracing::warn!("Skipping archive entry with unsafe path: {}", entry.name());
            continue;
        };
        let output_path = dest.join(relative);

        if entry.is_dir() {
            fs::create_dir_all(&output_path)?;
            continue;
        }

        if let Some(parent) = output_path.parent() {
            fs::create_dir_all(parent)?;
        }
        let mut outfile = File::create(&output_path)?;
        std::io::copy(&mut entry, &mut outfile)?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            if let Some(mode) = entry.unix_mode() {
                fs::set_permissions(&output_path, fs::Permissions::from_mode(mode & 0o7777))?;
            }
        }
    }

    Ok(())
}

/// The directory holding the real payload: the only child when the top level
/// is exactly one directory, otherwise `dir` itself.
pub fn payload_root(dir: &Path) -> Result<PathBuf> {
    let mut entries = fs::read_dir(dir)?.collect::<std::io::Result<Vec<_>>>()?;
    if entries.len() == 1 {
        let only = entries.remove(0);
        if only.file_type()?.is_dir() {
            return Ok(only.path());
        }
    }
    Ok(dir.to_path_buf())
}

/// Place every entry of `src` into `dst`, deleting same-named entries first.
pub fn merge_entries(src: &Path, dst: &Path, mode: MergeMode) -> Result<Vec<String>> {
    fs::create_dir_all(dst)?;
    let mut placed = Vec::new();

    for entry in fs::read_dir(src)? {
        let entry = entry?;
        let name = entry.file_name();
        let from = entry.path();
        let to = dst.join(&name);

        remove_existing(&to)?;

        match mode {
            MergeMode::Move => {
                if let Err(e) = fs::rename(&from, &to) {
                    tracing::debug!("rename {} failed ({}), copying instead", from.display(), e);
                    copy_recursive(&from, &to)?;
                }
            }
            MergeMode::Copy => copy_recursive(&from, &to)?,
        }

        placed.push(name.to_string_lossy().into_owned());
    }

    placed.sort();
    Ok(placed)
}

/// Delete a file or directory tree if present.
pub fn remove_existing(path: &Path) -> Result<()> {
    let meta = match fs::symlink_metadata(path) {
        Ok(meta) => meta,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
        Err(e) => return Err(e.into()),
    };

    let result = if meta.is_dir() {
        fs::remove_dir_all(path)
    } else {
        fs::remove_file(path)
    };

    match result {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::PermissionDenied => {
            // VCS object files are commonly read-only.
            clear_readonly(path)?;
            if meta.is_dir() {
                fs::remove_dir_all(path)?;
            } else {
                fs::remove_file(path)?;
            }
            Ok(())
        }
        Err(e) => Err(e.into()),
    }
}

#[allow(clippy::permissions_set_readonly_false)]
fn clear_readonly(path: &Path) -> Result<()> {
    let meta = fs::symlink_metadata(path)?;
    if meta.file_type().is_symlink() {
        return Ok(());
    }

    let mut perms = meta.permissions();
    if perms.readonly() {
        perms.set_readonly(false);
        fs::set_permissions(path, perms)?;
    }

    if meta.is_dir() {
        for entry in fs::read_dir(path)? {
            clear_readonly(&entry?.path())?;
        }
    }
    Ok(())
}

fn copy_recursive(from: &Path, to: &Path) -> Result<()> {
    let meta = fs::symlink_metadata(from)?;

    if meta.is_dir() {
        fs::create_dir_all(to)?;
        for entry in fs::read_dir(from)? {
            let entry = entry?;
            copy_recursive(&entry.path(), &to.join(entry.file_name()))?;
        }
    } else if meta.file_type().is_symlink() {
        #[cfg(unix)]
        {
            let link = fs::read_link(from)?;
            std::os::unix::fs::symlink(link, to)?;
        }
        #[cfg(not(unix))]
        {
            fs::copy(from, to)?;
        }
    } else {
        fs::copy(from, to)?;
    }

    Ok(())
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::io::Write;
    use zip::write::SimpleFileOptions;

    /// Build a zip at `path` from `(name, contents)` pairs; names ending in `/` are directories.
    pub(crate) fn write_zip(path: &Path, files: &[(&str, &str)]) {
        let file = File::create(path).unwrap();
        let mut writer = zip::ZipWriter::new(file);
        let options = SimpleFileOptions::default().compression_method(zip::CompressionMethod::Stored);
        for (name, contents) in files {
            if name.ends_with('/') {
                writer.add_directory(*name, options).unwrap();
            } else {
                writer.start_file(*name, options).unwrap();
                writer.write_all(contents.as_bytes()).unwrap();
            }
        }
        writer.finish().unwrap();
    }

    fn leftover_scratch(dir: &Path) -> Vec<String> {
        fs::read_dir(dir)
            .unwrap()
            .filter_map(|e| e.ok())
            .map(|e| e.file_name().to_string_lossy().into_owned())
            .filter(|n| n.starts_with(".extract-"))
            .collect()
    }

    #[tokio::test]
    async fn test_single_wrapping_folder_is_stripped() {
        let temp = tempfile::tempdir().unwrap();
        let archive = temp.path().join("pkg.zip");
        write_zip(&archive, &[("payload/", ""), ("payload/a.txt", "new")]);
        let target = temp.path().join("target");

        let placed = extract(&archive, &target).await.unwrap();

        assert_eq!(placed, vec!["a.txt"]);
        assert_eq!(fs::read_to_string(target.join("a.txt")).unwrap(), "new");
        assert!(!target.join("payload").exists());
    }

    #[tokio::test]
    async fn test_flat_archive_is_kept_as_is() {
        let temp = tempfile::tempdir().unwrap();
        let archive = temp.path().join("pkg.zip");
        write_zip(&archive, &[("a.txt", "1"), ("lib/b.txt", "2")]);
        let target = temp.path().join("target");

        extract(&archive, &target).await.unwrap();

        assert!(target.join("a.txt").is_file());
        assert!(target.join("lib").join("b.txt").is_file());
    }

    #[tokio::test]
    async fn test_single_top_level_file_is_not_treated_as_wrapper() {
        let temp = tempfile::tempdir().unwrap();
        let archive = temp.path().join("pkg.zip");
        write_zip(&archive, &[("only.txt", "x")]);
        let target = temp.path().join("target");

        extract(&archive, &target).await.unwrap();
        assert!(target.join("only.txt").is_file());
    }

    #[tokio::test]
    async fn test_merge_overwrites_stale_entries() {
        let temp = tempfile::tempdir().unwrap();
        let archive = temp.path().join("pkg.zip");
        write_zip(&archive, &[("payload/a.txt", "fresh"), ("payload/dir/c.txt", "c")]);

        let target = temp.path().join("target");
        fs::create_dir_all(target.join("dir")).unwrap();
        fs::write(target.join("a.txt"), "stale").unwrap();
        fs::write(target.join("dir").join("old.txt"), "old").unwrap();
        fs::write(target.join("untouched.txt"), "keep").unwrap();

        extract(&archive, &target).await.unwrap();

        assert_eq!(fs::read_to_string(target.join("a.txt")).unwrap(), "fresh");
        assert!(target.join("dir").join("c.txt").is_file());
        assert!(!target.join("dir").join("old.txt").exists());
        assert_eq!(fs::read_to_string(target.join("untouched.txt")).unwrap(), "keep");
        assert!(leftover_scratch(temp.path()).is_empty());
    }

    #[tokio::test]
    async fn test_corrupt_archive_cleans_scratch() {
        let temp = tempfile::tempdir().unwrap();
        let archive = temp.path().join("pkg.zip");
        fs::write(&archive, "<html>502 Bad Gateway</html>").unwrap();
        let target = temp.path().join("target");

        let err = extract(&archive, &target).await.unwrap_err();

        assert!(matches!(err, BootError::Archive(_)));
        assert!(leftover_scratch(temp.path()).is_empty());
    }

    #[tokio::test]
    async fn test_missing_archive_is_precondition() {
        let temp = tempfile::tempdir().unwrap();
        let err = extract(&temp.path().join("nope.zip"), &temp.path().join("t"))
            .await
            .unwrap_err();
        assert!(matches!(err, BootError::Precondition { .. }));
    }

    #[test]
    fn test_merge_entries_copy_leaves_source() {
        let temp = tempfile::tempdir().unwrap();
        let src = temp.path().join("src");
        let dst = temp.path().join("dst");
        fs::create_dir_all(src.join(".git")).unwrap();
        fs::write(src.join(".git").join("HEAD"), "ref: refs/heads/main").unwrap();
        fs::write(src.join("main.py"), "print()").unwrap();
        fs::create_dir_all(&dst).unwrap();
        fs::write(dst.join("main.py"), "old").unwrap();

        let placed = merge_entries(&src, &dst, MergeMode::Copy).unwrap();

        assert_eq!(placed, vec![".git", "main.py"]);
        assert_eq!(fs::read_to_string(dst.join("main.py")).unwrap(), "print()");
        assert!(dst.join(".git").join("HEAD").is_file());
        assert!(src.join("main.py").is_file());
    }

    #[cfg(unix)]
    #[test]
    fn test_remove_existing_handles_readonly_tree() {
        use std::os::unix::fs::PermissionsExt;

        let temp = tempfile::tempdir().unwrap();
        let dir = temp.path().join("objects");
        fs::create_dir_all(&dir).unwrap();
        let file = dir.join("pack");
        fs::write(&file, "x").unwrap();
        fs::set_permissions(&file, fs::Permissions::from_mode(0o444)).unwrap();

        remove_existing(&dir).unwrap();
        assert!(!dir.exists());
        remove_existing(&dir).unwrap();
    }
}
