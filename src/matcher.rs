//! Content-based patch matching and in-place application.
//!
//! A target is matched against catalogue candidates in catalogue order. Each
//! candidate is checked first by whole-file fingerprint, then window by window,
//! so a binary that differs from the catalogued build only outside the patch
//! windows still matches. Applying re-checks every window inside the write
//! session, which makes re-runs and interrupted runs safe.

use log::{debug, info, warn};
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::Path;

use crate::backup::{self, BackupOutcome};
use crate::catalogue::{CatalogueEntry, FilePatchSet, PatchCatalogue};
use crate::error::PatchError;
use crate::fingerprint::FileDigest;
use crate::util;
use crate::window::{self, SetClassification, WindowState};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Detection {
    /// Whole-file digest equals the catalogued patched fingerprint.
    Fingerprint,
    /// Every patch window holds its patched bytes.
    Windows,
}

/// What the catalogue says about a target, before anything is written.
#[derive(Debug, Clone)]
pub enum Verdict<'a> {
    AlreadyPatched {
        entry: &'a CatalogueEntry,
        detection: Detection,
    },
    /// All windows recognized and at least one still vanilla.
    Applicable {
        entry: &'a CatalogueEntry,
        already_patched: usize,
    },
    Unrecognized,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApplyReport {
    pub version: String,
    /// Offsets physically overwritten in this run.
    pub written: Vec<u64>,
    /// Offsets that already held their patched bytes.
    pub skipped: Vec<u64>,
    pub backup: BackupOutcome,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MatchResult {
    AlreadyPatched {
        version: String,
        detection: Detection,
    },
    Applied(ApplyReport),
    /// Only produced in strict mode: some windows patched, some still vanilla.
    Partial {
        version: String,
        patched: usize,
        total: usize,
    },
    Unrecognized,
}

#[derive(Debug, Clone)]
pub struct PatchOptions {
    pub platform: String,
    /// Report partially patched targets instead of completing them.
    pub strict: bool,
}

impl Default for PatchOptions {
    fn default() -> Self {
        Self {
            platform: crate::catalogue::current_platform().to_string(),
            strict: false,
        }
    }
}

/// Pick the first catalogue candidate that fits `data`. Pure; no I/O.
pub fn inspect<'a>(
    data: &[u8],
    digest: &FileDigest,
    catalogue: &'a PatchCatalogue,
    platform: &str,
) -> Verdict<'a> {
    for entry in catalogue.for_platform(platform) {
        let set = &entry.set;

        if digest.matches(&set.patched_fingerprint) {
            return Verdict::AlreadyPatched {
                entry,
                detection: Detection::Fingerprint,
            };
        }

        // Without windows there is nothing to confirm by content.
        if set.patches.is_empty() {
            continue;
        }

        let classes = SetClassification::of(data, set);
        debug!(
            "Candidate {} ({}, {}): {:?}",
            entry.version, set.file_name, set.patched_fingerprint, classes.states
        );

        if !classes.all_recognized() {
            continue;
        }
        if !classes.any_vanilla() {
            return Verdict::AlreadyPatched {
                entry,
                detection: Detection::Windows,
            };
        }
        return Verdict::Applicable {
            entry,
            already_patched: classes.patched_count(),
        };
    }

    Verdict::Unrecognized
}

/// Read-only inspection of a file on disk.
pub fn inspect_file<'a>(
    binary: &Path,
    catalogue: &'a PatchCatalogue,
    platform: &str,
) -> Result<(FileDigest, Verdict<'a>), PatchError> {
    let digest = FileDigest::of_file(binary)?;
    info!("Target {}: {}", binary.display(), digest);

    let map = util::mmap_file(binary).map_err(|e| PatchError::io(binary, e))?;
    let verdict = inspect(&map, &digest, catalogue, platform);
    Ok((digest, verdict))
}

/// Match `binary` against the catalogue and patch it in place when a
/// candidate fits. Creates `<binary>.bak` before the first write.
pub fn apply(
    binary: &Path,
    catalogue: &PatchCatalogue,
    options: &PatchOptions,
) -> Result<MatchResult, PatchError> {
    // The mapping is dropped inside inspect_file, before the write session opens.
    let (_, verdict) = inspect_file(binary, catalogue, &options.platform)?;

    let (entry, already_patched) = match verdict {
        Verdict::Unrecognized => return Ok(MatchResult::Unrecognized),
        Verdict::AlreadyPatched { entry, detection } => {
            return Ok(MatchResult::AlreadyPatched {
                version: entry.version.clone(),
                detection,
            })
        }
        Verdict::Applicable {
            entry,
            already_patched,
        } => (entry, already_patched),
    };

    let total = entry.set.patches.len();
    if already_patched > 0 {
        if options.strict {
            warn!(
                "{}: {already_patched} of {total} windows already patched, refusing in strict mode",
                entry.version
            );
            return Ok(MatchResult::Partial {
                version: entry.version.clone(),
                patched: already_patched,
                total,
            });
        }
        warn!(
            "{}: resuming partial patch ({already_patched} of {total} windows already patched)",
            entry.version
        );
    }

    let backup = backup::ensure_backup(binary)?;
    let (written, skipped) = write_session(binary, &entry.set)?;

    Ok(MatchResult::Applied(ApplyReport {
        version: entry.version.clone(),
        written,
        skipped,
        backup,
    }))
}

/// Read up to `len` bytes at `offset`; fewer at end of file.
fn read_window(file: &mut File, offset: u64, len: usize, buf: &mut Vec<u8>) -> std::io::Result<()> {
    buf.clear();
    file.seek(SeekFrom::Start(offset))?;
    Read::take(&mut *file, len as u64).read_to_end(buf)?;
    Ok(())
}

/// Verify every window, then overwrite the vanilla ones. Nothing is written
/// unless all windows are still vanilla or patched.
fn write_session(binary: &Path, set: &FilePatchSet) -> Result<(Vec<u64>, Vec<u64>), PatchError> {
    let io_err = |e| PatchError::io(binary, e);

    let mut file = OpenOptions::new()
        .read(true)
        .write(true)
        .open(binary)
        .map_err(io_err)?;

    let mut buf = Vec::new();
    let mut needs_write = Vec::with_capacity(set.patches.len());
    for op in &set.patches {
        read_window(&mut file, op.offset, op.vanilla.len(), &mut buf).map_err(io_err)?;
        match window::classify(&buf, &op.vanilla, &op.patched) {
            WindowState::Vanilla => needs_write.push(true),
            WindowState::Patched => needs_write.push(false),
            WindowState::Unknown => return Err(PatchError::WindowChanged { offset: op.offset }),
        }
    }

    let mut written = Vec::new();
    let mut skipped = Vec::new();
    for (op, write) in set.patches.iter().zip(needs_write) {
        if write {
            file.seek(SeekFrom::Start(op.offset)).map_err(io_err)?;
            file.write_all(&op.patched).map_err(io_err)?;
            debug!("Patched offset 0x{:X}", op.offset);
            written.push(op.offset);
        } else {
            debug!("Offset 0x{:X} already patched", op.offset);
            skipped.push(op.offset);
        }
    }

    file.sync_all().map_err(io_err)?;
    Ok((written, skipped))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalogue::PatchOp;
    use crate::fingerprint::Fingerprint;

    const NEVER: Fingerprint = Fingerprint::Md5([0xEE; 16]);

    fn entry(version: &str, platform: &str, patches: Vec<PatchOp>) -> CatalogueEntry {
        CatalogueEntry {
            version: version.to_string(),
            platform: platform.to_string(),
            set: FilePatchSet {
                file_name: "bin".to_string(),
                patched_fingerprint: NEVER,
                patches,
            },
        }
    }

    fn op(offset: u64, vanilla: &[u8], patched: &[u8]) -> PatchOp {
        PatchOp {
            offset,
            vanilla: vanilla.to_vec(),
            patched: patched.to_vec(),
        }
    }

    fn options() -> PatchOptions {
        PatchOptions {
            platform: "linux".to_string(),
            strict: false,
        }
    }

    fn target(dir: &Path, data: &[u8]) -> std::path::PathBuf {
        let path = dir.join("bin");
        std::fs::write(&path, data).unwrap();
        path
    }

    #[test]
    fn test_inspect_first_match_wins() {
        let data = [0u8, 1, 2, 3, 4, 5];
        let catalogue = PatchCatalogue::new(vec![
            entry("v0", "linux", vec![op(0, &[9, 9], &[8, 8])]),
            entry("v1", "linux", vec![op(2, &[2, 3], &[7, 7])]),
            entry("v2", "linux", vec![op(4, &[4, 5], &[6, 6])]),
        ]);
        let digest = FileDigest::of_bytes(&data);
        match inspect(&data, &digest, &catalogue, "linux") {
            Verdict::Applicable {
                entry,
                already_patched,
            } => {
                assert_eq!(entry.version, "v1");
                assert_eq!(already_patched, 0);
            }
            other => panic!("unexpected verdict: {other:?}"),
        }
    }

    #[test]
    fn test_inspect_ignores_other_platforms() {
        let data = [0u8, 1];
        let catalogue = PatchCatalogue::new(vec![entry("v1", "windows", vec![op(0, &[0, 1], &[2, 3])])]);
        let digest = FileDigest::of_bytes(&data);
        assert!(matches!(
            inspect(&data, &digest, &catalogue, "linux"),
            Verdict::Unrecognized
        ));
    }

    #[test]
    fn test_inspect_fingerprint_fast_path() {
        let data = b"anything at all";
        let mut e = entry("v1", "linux", vec![op(0, b"zz", b"yy")]);
        e.set.patched_fingerprint = Fingerprint::Md5(FileDigest::of_bytes(data).md5);
        let catalogue = PatchCatalogue::new(vec![e]);
        let digest = FileDigest::of_bytes(data);
        assert!(matches!(
            inspect(data, &digest, &catalogue, "linux"),
            Verdict::AlreadyPatched {
                detection: Detection::Fingerprint,
                ..
            }
        ));
    }

    #[test]
    fn test_empty_patch_list_needs_fingerprint() {
        let data = [1u8, 2, 3];
        let catalogue = PatchCatalogue::new(vec![entry("v1", "linux", vec![])]);
        let digest = FileDigest::of_bytes(&data);
        assert!(matches!(
            inspect(&data, &digest, &catalogue, "linux"),
            Verdict::Unrecognized
        ));
    }

    #[test]
    fn test_apply_vanilla() {
        let dir = tempfile::tempdir().unwrap();
        let mut data = vec![0xAAu8; 64];
        data[0x10] = 0x00;
        data[0x11] = 0x01;
        let bin = target(dir.path(), &data);

        let catalogue = PatchCatalogue::new(vec![entry("v1", "linux", vec![op(0x10, &[0, 1], &[2, 3])])]);
        let result = apply(&bin, &catalogue, &options()).unwrap();

        let MatchResult::Applied(report) = result else {
            panic!("expected Applied");
        };
        assert_eq!(report.version, "v1");
        assert_eq!(report.written, vec![0x10]);
        assert!(report.skipped.is_empty());
        assert_eq!(report.backup, BackupOutcome::Created(dir.path().join("bin.bak")));

        let mut expected = data.clone();
        expected[0x10] = 0x02;
        expected[0x11] = 0x03;
        assert_eq!(std::fs::read(&bin).unwrap(), expected);
        assert_eq!(std::fs::read(dir.path().join("bin.bak")).unwrap(), data);
    }

    #[test]
    fn test_apply_twice_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let bin = target(dir.path(), &[0, 1, 0, 1, 9]);
        let catalogue = PatchCatalogue::new(vec![entry(
            "v1",
            "linux",
            vec![op(0, &[0, 1], &[5, 5]), op(2, &[0, 1], &[6, 6])],
        )]);

        assert!(matches!(
            apply(&bin, &catalogue, &options()).unwrap(),
            MatchResult::Applied(_)
        ));
        let after_first = std::fs::read(&bin).unwrap();

        assert_eq!(
            apply(&bin, &catalogue, &options()).unwrap(),
            MatchResult::AlreadyPatched {
                version: "v1".to_string(),
                detection: Detection::Windows,
            }
        );
        assert_eq!(std::fs::read(&bin).unwrap(), after_first);
        assert_eq!(std::fs::read(dir.path().join("bin.bak")).unwrap(), vec![0, 1, 0, 1, 9]);
    }

    #[test]
    fn test_partial_patch_resumes() {
        let dir = tempfile::tempdir().unwrap();
        let bin = target(dir.path(), &[5, 5, 0, 1, 9]);
        let catalogue = PatchCatalogue::new(vec![entry(
            "v1",
            "linux",
            vec![op(0, &[0, 1], &[5, 5]), op(2, &[0, 1], &[6, 6])],
        )]);

        let MatchResult::Applied(report) = apply(&bin, &catalogue, &options()).unwrap() else {
            panic!("expected Applied");
        };
        assert_eq!(report.written, vec![2]);
        assert_eq!(report.skipped, vec![0]);
        assert_eq!(std::fs::read(&bin).unwrap(), vec![5, 5, 6, 6, 9]);
    }

    #[test]
    fn test_partial_patch_strict() {
        let dir = tempfile::tempdir().unwrap();
        let bin = target(dir.path(), &[5, 5, 0, 1, 9]);
        let catalogue = PatchCatalogue::new(vec![entry(
            "v1",
            "linux",
            vec![op(0, &[0, 1], &[5, 5]), op(2, &[0, 1], &[6, 6])],
        )]);
        let strict = PatchOptions {
            strict: true,
            ..options()
        };

        assert_eq!(
            apply(&bin, &catalogue, &strict).unwrap(),
            MatchResult::Partial {
                version: "v1".to_string(),
                patched: 1,
                total: 2,
            }
        );
        assert_eq!(std::fs::read(&bin).unwrap(), vec![5, 5, 0, 1, 9]);
        assert!(!dir.path().join("bin.bak").exists());
    }

    #[test]
    fn test_unknown_binary_untouched() {
        let dir = tempfile::tempdir().unwrap();
        let bin = target(dir.path(), &[7, 7, 7, 7]);
        let catalogue = PatchCatalogue::new(vec![
            entry("v1", "linux", vec![op(0, &[0, 1], &[2, 3])]),
            entry("v2", "linux", vec![op(1, &[7, 7], &[1, 1]), op(2, &[0, 0], &[9, 9])]),
        ]);

        assert_eq!(apply(&bin, &catalogue, &options()).unwrap(), MatchResult::Unrecognized);
        assert_eq!(std::fs::read(&bin).unwrap(), vec![7, 7, 7, 7]);
        assert!(!dir.path().join("bin.bak").exists());
    }

    #[test]
    fn test_truncated_file_is_unknown() {
        let dir = tempfile::tempdir().unwrap();
        let bin = target(dir.path(), &[0, 1, 2]);
        let catalogue = PatchCatalogue::new(vec![
            entry("short", "linux", vec![op(2, &[2, 3], &[4, 4])]),
            entry("fits", "linux", vec![op(0, &[0, 1], &[4, 4])]),
        ]);

        let MatchResult::Applied(report) = apply(&bin, &catalogue, &options()).unwrap() else {
            panic!("expected Applied");
        };
        assert_eq!(report.version, "fits");
        assert_eq!(std::fs::read(&bin).unwrap(), vec![4, 4, 2]);
    }

    #[test]
    fn test_backup_failure_writes_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let data = [0u8, 1, 9, 9];
        let bin = target(dir.path(), &data);
        // A directory in the temp slot makes the backup copy fail.
        std::fs::create_dir(dir.path().join("bin.bak.tmp")).unwrap();
        let catalogue = PatchCatalogue::new(vec![entry("v1", "linux", vec![op(0, &[0, 1], &[2, 3])])]);

        let err = apply(&bin, &catalogue, &options()).unwrap_err();
        assert!(matches!(err, PatchError::BackupFailed { .. }));
        assert_eq!(std::fs::read(&bin).unwrap(), data);
        assert!(!dir.path().join("bin.bak").exists());
    }

    #[test]
    fn test_session_rejects_changed_window() {
        let dir = tempfile::tempdir().unwrap();
        let bin = target(dir.path(), &[0, 1, 5, 5, 7, 7]);
        let set = entry(
            "v1",
            "linux",
            vec![op(0, &[0, 1], &[2, 3]), op(2, &[0, 1], &[5, 5]), op(4, &[0, 1], &[6, 6])],
        )
        .set;

        let err = write_session(&bin, &set).unwrap_err();
        assert!(matches!(err, PatchError::WindowChanged { offset: 4 }));
        assert_eq!(std::fs::read(&bin).unwrap(), vec![0, 1, 5, 5, 7, 7]);
    }

    #[test]
    fn test_missing_binary_is_io_error() {
        let dir = tempfile::tempdir().unwrap();
        let catalogue = PatchCatalogue::default();
        let err = apply(&dir.path().join("missing"), &catalogue, &options()).unwrap_err();
        assert!(matches!(err, PatchError::Io { .. }));
    }
}
