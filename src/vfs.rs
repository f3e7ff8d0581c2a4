//! In-memory file system of pending writes.
//!
//! Generators write into a [`MemFs`] instead of the destination directory.
//! Nothing reaches the disk until the commit job settles each pending entry
//! through the conflict engine. Reads see pending entries first and fall
//! through to the disk otherwise.
//!
//! Paths are stored relative to the destination root, normalized: `.` is
//! dropped and `..` pops a component. Paths that would leave the root are
//! rejected.

use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::{Component, Path, PathBuf};

use crate::conflict::candidate::{Candidate, Disposition};
use crate::conflict::policy::ForceScope;

/// One file the run has touched.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Entry {
    contents: Option<Vec<u8>>,
    mode: Option<u32>,
    scope: Option<ForceScope>,
    disposition: Option<Disposition>,
    committed: bool,
}

impl Entry {
    /// Proposed bytes; `None` is a deletion.
    #[must_use]
    pub fn contents(&self) -> Option<&[u8]> {
        self.contents.as_deref()
    }

    /// Proposed permission bits.
    #[must_use]
    pub const fn mode(&self) -> Option<u32> {
        self.mode
    }

    /// Force scope of the writer.
    #[must_use]
    pub const fn scope(&self) -> Option<ForceScope> {
        self.scope
    }

    /// Verdict recorded at commit.
    #[must_use]
    pub const fn disposition(&self) -> Option<Disposition> {
        self.disposition
    }

    /// Whether the commit job already handled this entry.
    #[must_use]
    pub const fn is_committed(&self) -> bool {
        self.committed
    }
}

/// Extra attributes for [`MemFs::write_with`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct WriteOptions {
    /// Permission bits to apply on disk.
    pub mode: Option<u32>,
    /// Force scope of the writing generator.
    pub scope: Option<ForceScope>,
}

/// Pending file state for one destination root.
#[derive(Clone, Debug)]
pub struct MemFs {
    root: PathBuf,
    entries: BTreeMap<PathBuf, Entry>,
}

impl MemFs {
    /// Empty file system over the destination `root`.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            entries: BTreeMap::new(),
        }
    }

    /// Destination root.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Root-relative normalized form of `path`.
    ///
    /// Absolute paths must lie under the root.
    ///
    /// # Errors
    /// `InvalidInput` for paths outside the root or naming the root itself.
    pub fn normalize(&self, path: &Path) -> io::Result<PathBuf> {
        let relative = if path.is_absolute() {
            path.strip_prefix(&self.root).map_err(|_| {
                io::Error::new(
                    io::ErrorKind::InvalidInput,
                    format!("{} is outside {}", path.display(), self.root.display()),
                )
            })?
        } else {
            path
        };

        let mut out = PathBuf::new();
        for component in relative.components() {
            match component {
                Component::CurDir | Component::RootDir | Component::Prefix(_) => {}
                Component::ParentDir => {
                    if !out.pop() {
                        return Err(io::Error::new(
                            io::ErrorKind::InvalidInput,
                            format!("{} escapes the destination root", path.display()),
                        ));
                    }
                }
                Component::Normal(s) => out.push(s),
            }
        }
        if out.as_os_str().is_empty() {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("{} does not name a file", path.display()),
            ));
        }
        Ok(out)
    }

    /// Absolute on-disk path for a root-relative one.
    #[must_use]
    pub fn absolute(&self, relative: &Path) -> PathBuf {
        self.root.join(relative)
    }

    /// Stage `contents` at `path`.
    ///
    /// # Errors
    /// See [`MemFs::normalize`].
    pub fn write(&mut self, path: impl AsRef<Path>, contents: impl Into<Vec<u8>>) -> io::Result<()> {
        self.write_with(path, contents, WriteOptions::default())
    }

    /// Stage `contents` at `path` with a mode and force scope.
    ///
    /// Overwriting an entry that was already committed makes it pending again.
    ///
    /// # Errors
    /// See [`MemFs::normalize`].
    pub fn write_with(
        &mut self,
        path: impl AsRef<Path>,
        contents: impl Into<Vec<u8>>,
        options: WriteOptions,
    ) -> io::Result<()> {
        let rel = self.normalize(path.as_ref())?;
        self.stage(rel, Some(contents.into()), options);
        Ok(())
    }

    /// Stage the removal of `path`.
    ///
    /// # Errors
    /// See [`MemFs::normalize`].
    pub fn delete(&mut self, path: impl AsRef<Path>) -> io::Result<()> {
        self.delete_with(path, WriteOptions::default())
    }

    /// Stage the removal of `path` under a force scope.
    ///
    /// # Errors
    /// See [`MemFs::normalize`].
    pub fn delete_with(&mut self, path: impl AsRef<Path>, options: WriteOptions) -> io::Result<()> {
        let rel = self.normalize(path.as_ref())?;
        self.stage(rel, None, options);
        Ok(())
    }

    fn stage(&mut self, rel: PathBuf, contents: Option<Vec<u8>>, options: WriteOptions) {
        tracing::trace!(path = %rel.display(), delete = contents.is_none(), "vfs write");
        self.entries.insert(
            rel,
            Entry {
                contents,
                mode: options.mode,
                scope: options.scope,
                disposition: None,
                committed: false,
            },
        );
    }

    /// Current bytes at `path`: the staged entry if any, else the disk.
    /// `None` when the file does not exist (or is staged for deletion).
    ///
    /// # Errors
    /// Invalid paths, and disk reads failing for reasons other than
    /// not-found.
    pub fn read(&self, path: impl AsRef<Path>) -> io::Result<Option<Vec<u8>>> {
        let rel = self.normalize(path.as_ref())?;
        if let Some(entry) = self.entries.get(&rel) {
            return Ok(entry.contents.clone());
        }
        match fs::read(self.absolute(&rel)) {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// [`MemFs::read`] decoded as UTF-8.
    ///
    /// # Errors
    /// As [`MemFs::read`], plus `InvalidData` for non-UTF-8 content.
    pub fn read_string(&self, path: impl AsRef<Path>) -> io::Result<Option<String>> {
        self.read(path)?
            .map(|bytes| String::from_utf8(bytes).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e)))
            .transpose()
    }

    /// Whether `path` exists in the staged view.
    ///
    /// # Errors
    /// See [`MemFs::read`].
    pub fn exists(&self, path: impl AsRef<Path>) -> io::Result<bool> {
        let rel = self.normalize(path.as_ref())?;
        if let Some(entry) = self.entries.get(&rel) {
            return Ok(entry.contents.is_some());
        }
        match fs::symlink_metadata(self.absolute(&rel)) {
            Ok(_) => Ok(true),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e),
        }
    }

    /// The entry at `path`, if the run touched it.
    #[must_use]
    pub fn entry(&self, path: impl AsRef<Path>) -> Option<&Entry> {
        let rel = self.normalize(path.as_ref()).ok()?;
        self.entries.get(&rel)
    }

    /// Every touched entry in path order.
    pub fn entries(&self) -> impl Iterator<Item = (&Path, &Entry)> {
        self.entries.iter().map(|(p, e)| (p.as_path(), e))
    }

    /// Root-relative paths of uncommitted entries, in path order.
    #[must_use]
    pub fn pending(&self) -> Vec<PathBuf> {
        self.entries
            .iter()
            .filter(|(_, e)| !e.committed)
            .map(|(p, _)| p.clone())
            .collect()
    }

    /// Number of uncommitted entries.
    #[must_use]
    pub fn pending_count(&self) -> usize {
        self.entries.values().filter(|e| !e.committed).count()
    }

    /// Conflict-engine candidate for the pending entry at `rel`.
    #[must_use]
    pub fn candidate(&self, rel: &Path) -> Option<Candidate> {
        let entry = self.entries.get(rel).filter(|e| !e.committed)?;
        let path = self.absolute(rel);
        let candidate = match &entry.contents {
            Some(bytes) => Candidate::write(path, bytes.clone()),
            None => Candidate::delete(path),
        };
        let candidate = candidate.with_scope(entry.scope);
        Some(match entry.mode {
            Some(mode) => candidate.with_mode(mode),
            None => candidate,
        })
    }

    /// Record the verdict for `rel` and mark it committed.
    pub fn mark_committed(&mut self, rel: &Path, disposition: Disposition) {
        if let Some(entry) = self.entries.get_mut(rel) {
            entry.disposition = Some(disposition);
            entry.committed = true;
        }
    }
}
