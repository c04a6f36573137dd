use std::ffi::OsString;
use std::fs::File;
use std::path::{Path, PathBuf};

use crate::error::PatchError;

pub const BACKUP_SUFFIX: &str = ".bak";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BackupOutcome {
    Created(PathBuf),
    Existing(PathBuf),
}

impl BackupOutcome {
    pub fn path(&self) -> &Path {
        match self {
            BackupOutcome::Created(p) | BackupOutcome::Existing(p) => p,
        }
    }
}

fn with_suffix(path: &Path, suffix: &str) -> PathBuf {
    let mut s = OsString::from(path.as_os_str());
    s.push(suffix);
    PathBuf::from(s)
}

pub fn backup_path(binary: &Path) -> PathBuf {
    with_suffix(binary, BACKUP_SUFFIX)
}

/// Make sure `<binary>.bak` exists. An existing backup is never replaced.
///
/// The copy goes to a temporary sibling, is synced, then renamed into place
/// and the directory entry synced, so a backup that exists is always complete
/// and survives a crash right after this returns.
pub fn ensure_backup(binary: &Path) -> Result<BackupOutcome, PatchError> {
    let backup = backup_path(binary);
    if backup.exists() {
        log::debug!("Backup already present: {}", backup.display());
        return Ok(BackupOutcome::Existing(backup));
    }

    let tmp = with_suffix(&backup, ".tmp");
    let fail = |source| PatchError::BackupFailed {
        path: binary.to_path_buf(),
        backup: backup.clone(),
        source,
    };

    let result = std::fs::copy(binary, &tmp)
        .and_then(|_| File::open(&tmp)?.sync_all())
        .and_then(|_| std::fs::rename(&tmp, &backup))
        .and_then(|_| sync_parent(&backup));
    if let Err(e) = result {
        let _ = std::fs::remove_file(&tmp);
        return Err(fail(e));
    }

    log::info!("Backup written: {}", backup.display());
    Ok(BackupOutcome::Created(backup))
}

/// Flush the directory entry of `path` to disk.
#[cfg(unix)]
fn sync_parent(path: &Path) -> std::io::Result<()> {
    let parent = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };
    File::open(parent)?.sync_all()
}

// Directories cannot be opened as files here; rename is durable once it returns.
#[cfg(not(unix))]
fn sync_parent(_path: &Path) -> std::io::Result<()> {
    Ok(())
}

/// Copy `<binary>.bak` back over the binary. The backup is kept.
pub fn restore(binary: &Path) -> Result<PathBuf, PatchError> {
    let backup = backup_path(binary);
    if !backup.exists() {
        return Err(PatchError::NoBackup(backup));
    }
    std::fs::copy(&backup, binary).map_err(|e| PatchError::io(binary, e))?;
    File::options()
        .write(true)
        .open(binary)
        .and_then(|f| f.sync_all())
        .map_err(|e| PatchError::io(binary, e))?;
    log::info!("Restored {} from {}", binary.display(), backup.display());
    Ok(backup)
}
