//! Writing settled candidates to disk.
//!
//! Only `create` and `force` touch the disk. Writes go to a temp file in the
//! target's directory and are renamed into place, so a reader never sees a
//! half-written file. A forced deletion removes the target.

use std::fs;
use std::io::{self, Write as _};
use std::path::Path;

use serde::Serialize;

use crate::conflict::candidate::{Candidate, Disposition};
use crate::error::JobError;

/// What materialization did to one path.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum WriteAction {
    /// Bytes were written.
    Written,
    /// The file was removed.
    Removed,
    /// The disk was left alone.
    Untouched,
}

/// Apply `disposition` for `candidate`.
///
/// # Errors
/// [`JobError::Io`] naming the path when writing or removing fails. Files
/// written earlier in the run stay written.
pub fn materialize(candidate: &Candidate, disposition: Disposition) -> Result<WriteAction, JobError> {
    if !disposition.writes() {
        return Ok(WriteAction::Untouched);
    }
    let path = candidate.path();
    let io_err = |source: io::Error| JobError::Io {
        path: path.to_path_buf(),
        source,
    };

    let Some(bytes) = candidate.contents() else {
        return match fs::remove_file(path) {
            Ok(()) => {
                tracing::info!(path = %path.display(), "removed");
                Ok(WriteAction::Removed)
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(WriteAction::Untouched),
            Err(e) => Err(io_err(e)),
        };
    };

    write_atomic(path, bytes, candidate.mode()).map_err(io_err)?;
    tracing::info!(path = %path.display(), bytes = bytes.len(), %disposition, "written");
    Ok(WriteAction::Written)
}

fn write_atomic(path: &Path, bytes: &[u8], mode: Option<u32>) -> io::Result<()> {
    let dir = path
        .parent()
        .ok_or_else(|| io::Error::other(format!("no parent directory for {}", path.display())))?;
    fs::create_dir_all(dir)?;

    let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
    tmp.write_all(bytes)?;
    tmp.as_file().sync_all()?;
    if let Some(mode) = mode {
        set_mode(tmp.as_file(), mode)?;
    }
    tmp.persist(path).map_err(|e| e.error)?;
    Ok(())
}

#[cfg(unix)]
fn set_mode(file: &fs::File, mode: u32) -> io::Result<()> {
    use std::os::unix::fs::PermissionsExt as _;
    file.set_permissions(fs::Permissions::from_mode(mode))
}

#[cfg(not(unix))]
fn set_mode(_file: &fs::File, _mode: u32) -> io::Result<()> {
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn skip_and_identical_leave_disk_alone() {
        let dir = tempfile::tempdir().unwrap();
        let c = Candidate::write(dir.path().join("a.txt"), "x");
        assert_eq!(materialize(&c, Disposition::Skip).unwrap(), WriteAction::Untouched);
        assert_eq!(materialize(&c, Disposition::Identical).unwrap(), WriteAction::Untouched);
        assert!(!dir.path().join("a.txt").exists());
    }

    #[test]
    fn create_makes_parent_directories() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("deep/nested/a.txt");
        let c = Candidate::write(&target, "hello");
        assert_eq!(materialize(&c, Disposition::Create).unwrap(), WriteAction::Written);
        assert_eq!(fs::read_to_string(&target).unwrap(), "hello");
        // No temp files left behind.
        assert_eq!(fs::read_dir(target.parent().unwrap()).unwrap().count(), 1);
    }

    #[test]
    fn force_overwrites() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("a.txt");
        fs::write(&target, "old").unwrap();
        materialize(&Candidate::write(&target, "new"), Disposition::Force).unwrap();
        assert_eq!(fs::read_to_string(&target).unwrap(), "new");
    }

    #[test]
    fn forced_deletion_removes_file() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("gone.txt");
        fs::write(&target, "x").unwrap();
        let c = Candidate::delete(&target);
        assert_eq!(materialize(&c, Disposition::Force).unwrap(), WriteAction::Removed);
        assert!(!target.exists());
        assert_eq!(materialize(&c, Disposition::Force).unwrap(), WriteAction::Untouched);
    }

    #[cfg(unix)]
    #[test]
    fn mode_is_applied() {
        use std::os::unix::fs::PermissionsExt as _;
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("run.sh");
        let c = Candidate::write(&target, "#!/bin/sh\n").with_mode(0o755);
        materialize(&c, Disposition::Create).unwrap();
        let mode = fs::metadata(&target).unwrap().permissions().mode() & 0o777;
        assert_eq!(mode, 0o755);
    }

    #[test]
    fn write_failure_names_the_path() {
        let dir = tempfile::tempdir().unwrap();
        let blocker = dir.path().join("file");
        fs::write(&blocker, "not a dir").unwrap();
        let c = Candidate::write(blocker.join("child.txt"), "x");
        let err = materialize(&c, Disposition::Create).unwrap_err();
        assert!(matches!(err, JobError::Io { ref path, .. } if path.ends_with("child.txt")));
    }
}
