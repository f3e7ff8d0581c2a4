//! Candidate files and their dispositions.

use std::cell::OnceCell;
use std::fmt;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use super::policy::ForceScope;

/// How many leading bytes the binary sniff looks at.
const SNIFF_LEN: usize = 8000;

/// Share of suspicious bytes (per mille) above which content is binary.
const SUSPICIOUS_PER_MILLE: usize = 300;

// ---------------------------------------------------------------------------
// Disposition
// ---------------------------------------------------------------------------

/// Final verdict for a candidate file.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Disposition {
    /// Target absent on disk; write it.
    Create,
    /// Disk already holds the proposed content; leave it.
    Identical,
    /// Leave the disk untouched.
    Skip,
    /// Write unconditionally.
    Force,
}

impl Disposition {
    /// Whether materialization touches the disk for this verdict.
    #[must_use]
    pub const fn writes(self) -> bool {
        matches!(self, Self::Create | Self::Force)
    }

    /// Parse the lowercase name used in answers and rule files.
    #[must_use]
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "create" => Some(Self::Create),
            "identical" => Some(Self::Identical),
            "skip" => Some(Self::Skip),
            "force" => Some(Self::Force),
            _ => None,
        }
    }
}

impl fmt::Display for Disposition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Create => write!(f, "create"),
            Self::Identical => write!(f, "identical"),
            Self::Skip => write!(f, "skip"),
            Self::Force => write!(f, "force"),
        }
    }
}

// ---------------------------------------------------------------------------
// Candidate
// ---------------------------------------------------------------------------

/// A proposed write (or deletion) waiting for approval.
#[derive(Clone, Debug)]
pub struct Candidate {
    path: PathBuf,
    contents: Option<Vec<u8>>,
    mode: Option<u32>,
    scope: Option<ForceScope>,
    binary: OnceCell<bool>,
    disposition: Option<Disposition>,
}

impl Candidate {
    /// Propose writing `contents` at the absolute `path`.
    pub fn write(path: impl Into<PathBuf>, contents: impl Into<Vec<u8>>) -> Self {
        Self::new(path.into(), Some(contents.into()))
    }

    /// Propose deleting the absolute `path`.
    pub fn delete(path: impl Into<PathBuf>) -> Self {
        Self::new(path.into(), None)
    }

    fn new(path: PathBuf, contents: Option<Vec<u8>>) -> Self {
        Self {
            path,
            contents,
            mode: None,
            scope: None,
            binary: OnceCell::new(),
            disposition: None,
        }
    }

    /// Attach the proposed file mode (permission bits).
    #[must_use]
    pub const fn with_mode(mut self, mode: u32) -> Self {
        self.mode = Some(mode);
        self
    }

    /// Attach the force scope of the generator that proposed this file.
    #[must_use]
    pub const fn with_scope(mut self, scope: Option<ForceScope>) -> Self {
        self.scope = scope;
        self
    }

    /// Absolute target path.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Proposed bytes; `None` proposes a deletion.
    #[must_use]
    pub fn contents(&self) -> Option<&[u8]> {
        self.contents.as_deref()
    }

    /// Proposed permission bits.
    #[must_use]
    pub const fn mode(&self) -> Option<u32> {
        self.mode
    }

    /// Force scope, if the proposing generator has one.
    #[must_use]
    pub const fn scope(&self) -> Option<ForceScope> {
        self.scope
    }

    /// Whether the proposed bytes look binary. Computed once.
    #[must_use]
    pub fn is_binary(&self) -> bool {
        *self
            .binary
            .get_or_init(|| self.contents.as_deref().is_some_and(looks_binary))
    }

    /// The settled verdict, if any.
    #[must_use]
    pub const fn disposition(&self) -> Option<Disposition> {
        self.disposition
    }

    /// Record the verdict. The first verdict wins.
    pub(crate) fn settle(&mut self, disposition: Disposition) -> Disposition {
        *self.disposition.get_or_insert(disposition)
    }

    /// Replace the proposed bytes (after an edit) and drop the cached sniff.
    pub(crate) fn replace_contents(&mut self, contents: Vec<u8>) {
        self.contents = Some(contents);
        self.binary = OnceCell::new();
    }
}

/// Content sniff: a NUL byte, or too many control bytes, in the first
/// [`SNIFF_LEN`] bytes.
#[must_use]
pub fn looks_binary(bytes: &[u8]) -> bool {
    let sample = &bytes[..bytes.len().min(SNIFF_LEN)];
    if sample.is_empty() {
        return false;
    }
    if sample.contains(&0) {
        return true;
    }
    let suspicious = sample
        .iter()
        .filter(|&&b| (b < 0x20 && !matches!(b, b'\t' | b'\n' | b'\r' | 0x0c | 0x1b)) || b == 0x7f)
        .count();
    suspicious * 1000 / sample.len() > SUSPICIOUS_PER_MILLE
}
