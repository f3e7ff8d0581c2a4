//! Conflict detection against the on-disk target.
//!
//! Detection order:
//!
//! 1. target is a directory → conflict
//! 2. both modes known and different → conflict
//! 3. proposed deletion of an existing file → conflict
//! 4. either side binary → conflict iff bytes differ
//! 5. text → conflict iff bytes differ, or with `ignore_whitespace`, iff the
//!    whitespace-separated token sequences differ

use std::fmt;
use std::fs;
use std::io;
use std::path::Path;

use serde::Serialize;

use super::candidate::{Candidate, looks_binary};

// ---------------------------------------------------------------------------
// DiskState
// ---------------------------------------------------------------------------

/// What currently sits at a candidate's path.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum DiskState {
    /// Nothing there.
    Absent,
    /// A directory.
    Directory,
    /// A regular file (or symlink target) with its bytes.
    File {
        /// Current bytes.
        bytes: Vec<u8>,
        /// Permission bits, where the platform has them.
        mode: Option<u32>,
    },
}

impl DiskState {
    /// Read the state of `path`.
    ///
    /// # Errors
    /// Propagates any I/O error other than not-found.
    pub fn read(path: &Path) -> io::Result<Self> {
        let meta = match fs::metadata(path) {
            Ok(meta) => meta,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Self::Absent),
            Err(e) => return Err(e),
        };
        if meta.is_dir() {
            return Ok(Self::Directory);
        }
        let bytes = fs::read(path)?;
        Ok(Self::File {
            bytes,
            mode: permission_bits(&meta),
        })
    }

    /// The on-disk bytes, if this is a file.
    #[must_use]
    pub fn bytes(&self) -> Option<&[u8]> {
        match self {
            Self::File { bytes, .. } => Some(bytes),
            Self::Absent | Self::Directory => None,
        }
    }
}

#[cfg(unix)]
fn permission_bits(meta: &fs::Metadata) -> Option<u32> {
    use std::os::unix::fs::PermissionsExt as _;
    Some(meta.permissions().mode() & 0o7777)
}

#[cfg(not(unix))]
fn permission_bits(_meta: &fs::Metadata) -> Option<u32> {
    None
}

// ---------------------------------------------------------------------------
// ConflictKind
// ---------------------------------------------------------------------------

/// Why a candidate conflicts with the disk.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ConflictKind {
    /// The target path is a directory.
    Directory,
    /// Permission bits differ.
    Mode {
        /// Bits on disk.
        disk: u32,
        /// Proposed bits.
        proposed: u32,
    },
    /// The candidate deletes an existing file.
    Deletion,
    /// Binary contents differ.
    Binary,
    /// Text contents differ.
    Content,
}

impl fmt::Display for ConflictKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Directory => write!(f, "a directory exists at this path"),
            Self::Mode { disk, proposed } => {
                write!(f, "mode differs (disk {disk:o}, proposed {proposed:o})")
            }
            Self::Deletion => write!(f, "file would be deleted"),
            Self::Binary => write!(f, "binary contents differ"),
            Self::Content => write!(f, "contents differ"),
        }
    }
}

/// Compare a candidate against the disk. `None` means no conflict.
///
/// An [`DiskState::Absent`] target never conflicts; callers handle creation
/// before calling this.
#[must_use]
pub fn detect(candidate: &Candidate, disk: &DiskState, ignore_whitespace: bool) -> Option<ConflictKind> {
    let (bytes, disk_mode) = match disk {
        DiskState::Absent => return None,
        DiskState::Directory => return Some(ConflictKind::Directory),
        DiskState::File { bytes, mode } => (bytes, *mode),
    };

    if let (Some(disk), Some(proposed)) = (disk_mode, candidate.mode())
        && disk != proposed
    {
        return Some(ConflictKind::Mode { disk, proposed });
    }

    let Some(proposed) = candidate.contents() else {
        return Some(ConflictKind::Deletion);
    };

    if candidate.is_binary() || looks_binary(bytes) {
        return (proposed != bytes.as_slice()).then_some(ConflictKind::Binary);
    }

    let differs = if ignore_whitespace {
        !same_ignoring_whitespace(bytes, proposed)
    } else {
        proposed != bytes.as_slice()
    };
    differs.then_some(ConflictKind::Content)
}

/// Whether two texts differ only in whitespace: every change between them
/// is an insertion or deletion of whitespace.
#[must_use]
pub fn same_ignoring_whitespace(a: &[u8], b: &[u8]) -> bool {
    let a = String::from_utf8_lossy(a);
    let b = String::from_utf8_lossy(b);
    a.split_whitespace().eq(b.split_whitespace())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn file(bytes: &str) -> DiskState {
        DiskState::File {
            bytes: bytes.as_bytes().to_vec(),
            mode: None,
        }
    }

    #[test]
    fn equal_text_does_not_conflict() {
        let c = Candidate::write("/x", "hi");
        assert_eq!(detect(&c, &file("hi"), false), None);
    }

    #[test]
    fn different_text_conflicts() {
        let c = Candidate::write("/x", "new");
        assert_eq!(detect(&c, &file("old"), false), Some(ConflictKind::Content));
    }

    #[test]
    fn whitespace_only_change_respects_policy() {
        let c = Candidate::write("/x", "fn main() {\n    run();\n}\n");
        let disk = file("fn main() {\n\trun();\n}");
        assert_eq!(detect(&c, &disk, false), Some(ConflictKind::Content));
        assert_eq!(detect(&c, &disk, true), None);
    }

    #[test]
    fn token_change_conflicts_even_when_ignoring_whitespace() {
        let c = Candidate::write("/x", "let a = 1;");
        assert_eq!(detect(&c, &file("let  a = 2;"), true), Some(ConflictKind::Content));
    }

    #[test]
    fn directory_always_conflicts() {
        let c = Candidate::write("/x", "hi");
        assert_eq!(detect(&c, &DiskState::Directory, false), Some(ConflictKind::Directory));
    }

    #[test]
    fn mode_mismatch_conflicts_before_content() {
        let c = Candidate::write("/x", "hi").with_mode(0o755);
        let disk = DiskState::File {
            bytes: b"hi".to_vec(),
            mode: Some(0o644),
        };
        assert_eq!(
            detect(&c, &disk, false),
            Some(ConflictKind::Mode {
                disk: 0o644,
                proposed: 0o755
            })
        );
    }

    #[test]
    fn unknown_mode_is_not_compared() {
        let c = Candidate::write("/x", "hi");
        let disk = DiskState::File {
            bytes: b"hi".to_vec(),
            mode: Some(0o600),
        };
        assert_eq!(detect(&c, &disk, false), None);
    }

    #[test]
    fn deletion_of_existing_file_conflicts() {
        let c = Candidate::delete("/x");
        assert_eq!(detect(&c, &file("hi"), false), Some(ConflictKind::Deletion));
    }

    #[test]
    fn binary_compares_raw_bytes_even_with_whitespace_policy() {
        let c = Candidate::write("/x", b"\0a b".to_vec());
        let same = DiskState::File {
            bytes: b"\0a b".to_vec(),
            mode: None,
        };
        let spaced = DiskState::File {
            bytes: b"\0a  b".to_vec(),
            mode: None,
        };
        assert_eq!(detect(&c, &same, true), None);
        assert_eq!(detect(&c, &spaced, true), Some(ConflictKind::Binary));
    }

    #[test]
    fn absent_never_conflicts() {
        assert_eq!(detect(&Candidate::write("/x", "a"), &DiskState::Absent, false), None);
    }

    #[test]
    fn read_reports_absent_directory_and_file() {
        let dir = tempfile::tempdir().unwrap();
        assert_eq!(DiskState::read(&dir.path().join("nope")).unwrap(), DiskState::Absent);
        assert_eq!(DiskState::read(dir.path()).unwrap(), DiskState::Directory);
        std::fs::write(dir.path().join("f.txt"), "x").unwrap();
        let state = DiskState::read(&dir.path().join("f.txt")).unwrap();
        assert_eq!(state.bytes(), Some(b"x".as_slice()));
    }
}

// ---------------------------------------------------------------------------
// Property tests
// ---------------------------------------------------------------------------
