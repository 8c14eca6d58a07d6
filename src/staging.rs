//! Staging copies of the module tree
//!
//! Repairs can run against a staging copy instead of the tree a live
//! service imports from. `promote` is the explicit step that carries
//! repaired entry files back; nothing else writes to the live tree.

use crate::error::{MendError, Result};
use crate::util::hash_bytes;
use crate::workspace::{write_atomic, FileLocks};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{info, warn};
use walkdir::WalkDir;

fn skip_entry(entry: &walkdir::DirEntry) -> bool {
    let name = entry.file_name().to_string_lossy();
    entry.depth() > 0 && (name == "__pycache__" || name.ends_with(".pyc"))
}

/// Absolute form of `path` with symlinks resolved, for paths that may not
/// exist yet: the deepest existing ancestor is canonicalized and the rest
/// appended.
fn resolve(path: &Path) -> PathBuf {
    if let Ok(real) = fs::canonicalize(path) {
        return real;
    }
    match (path.parent(), path.file_name()) {
        (Some(parent), Some(name)) if !parent.as_os_str().is_empty() => resolve(parent).join(name),
        _ => std::env::current_dir()
            .and_then(fs::canonicalize)
            .map(|cwd| cwd.join(path))
            .unwrap_or_else(|_| path.to_path_buf()),
    }
}

/// The staging tree is wiped and rewritten, so it must not overlap the
/// live tree in either direction.
fn ensure_disjoint(live_root: &Path, staging_root: &Path) -> Result<()> {
    let live = resolve(live_root);
    let staging = resolve(staging_root);
    if staging.starts_with(&live) || live.starts_with(&staging) {
        return Err(MendError::Config(format!(
            "Staging directory {} overlaps module root {}",
            staging.display(),
            live.display()
        )));
    }
    Ok(())
}

/// Copy every file under `live_root` into `staging_root`, replacing what
/// was staged before. Returns the staged paths.
pub fn stage(live_root: &Path, staging_root: &Path) -> Result<Vec<PathBuf>> {
    fs::read_dir(live_root).map_err(|source| MendError::Discovery {
        path: live_root.to_path_buf(),
        source,
    })?;
    ensure_disjoint(live_root, staging_root)?;
    if staging_root.exists() {
        fs::remove_dir_all(staging_root).map_err(|e| MendError::io(staging_root, e))?;
    }

    let mut staged = Vec::new();
    for entry in WalkDir::new(live_root)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|e| !skip_entry(e))
    {
        let entry = match entry {
            Ok(entry) => entry,
            Err(err) => {
                warn!("Skipping unreadable path while staging: {}", err);
                continue;
            }
        };
        let Ok(rel) = entry.path().strip_prefix(live_root) else {
            continue;
        };
        let dest = staging_root.join(rel);
        if entry.file_type().is_dir() {
            fs::create_dir_all(&dest).map_err(|e| MendError::io(&dest, e))?;
        } else if entry.file_type().is_file() {
            fs::copy(entry.path(), &dest).map_err(|e| MendError::io(&dest, e))?;
            staged.push(dest);
        }
    }

    info!("Staged {} files into {}", staged.len(), staging_root.display());
    Ok(staged)
}

/// Copy changed `<module>/<entry_file>` files from staging back to live.
///
/// Each live file is written under `locks`, the same locks a running
/// server takes. All-or-nothing: if any write fails, files already
/// promoted get their previous content back.
pub fn promote(
    staging_root: &Path,
    live_root: &Path,
    entry_file: &str,
    locks: &FileLocks,
) -> Result<Vec<PathBuf>> {
    ensure_disjoint(live_root, staging_root)?;
    let mut pending = Vec::new();
    for entry in WalkDir::new(staging_root)
        .min_depth(2)
        .max_depth(2)
        .sort_by_file_name()
        .into_iter()
        .filter_map(|e| e.ok())
    {
        if !entry.file_type().is_file() || entry.file_name().to_string_lossy() != entry_file {
            continue;
        }
        let Ok(rel) = entry.path().strip_prefix(staging_root) else {
            continue;
        };
        let staged = fs::read_to_string(entry.path()).map_err(|e| MendError::io(entry.path(), e))?;
        let dest = live_root.join(rel);
        let previous = match fs::read(&dest) {
            Ok(bytes) => Some(bytes),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => None,
            Err(err) => return Err(MendError::io(&dest, err)),
        };
        if previous.as_deref().map(hash_bytes) == Some(hash_bytes(staged.as_bytes())) {
            continue;
        }
        pending.push((dest, staged, previous));
    }

    let mut promoted: Vec<(PathBuf, Option<Vec<u8>>)> = Vec::new();
    for (dest, staged, previous) in pending {
        let written = dest
            .parent()
            .map_or(Ok(()), |parent| {
                fs::create_dir_all(parent).map_err(|e| MendError::io(parent, e))
            })
            .and_then(|_| locks.with_file(&dest, || write_atomic(&dest, &staged)));
        if let Err(err) = written {
            rollback(&promoted);
            return Err(err);
        }
        promoted.push((dest, previous));
    }

    info!("Promoted {} changed files into {}", promoted.len(), live_root.display());
    Ok(promoted.into_iter().map(|(path, _)| path).collect())
}

fn rollback(promoted: &[(PathBuf, Option<Vec<u8>>)]) {
    for (path, previous) in promoted {
        let restored = match previous {
            Some(bytes) => fs::write(path, bytes),
            None => fs::remove_file(path),
        };
        if let Err(err) = restored {
            warn!("Rollback of {} failed: {}", path.display(), err);
        }
    }
}
