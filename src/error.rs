//! Error types for scaffolding runs.
//!
//! [`JobError`] is what a single job body fails with. [`ScaffoldError`] is
//! what the caller of a whole run sees. Messages are written for whoever
//! drives the run: each one says what went wrong and, where there is
//! something to do about it, how to fix it.

use std::fmt;
use std::path::PathBuf;

use crate::config::ConfigError;
use crate::conflict::policy::PolicyError;
use crate::conflict::resolver::ConflictError;
use crate::conflict::rules::RulesError;
use crate::queue::{JobFailure, QueueError};

// ---------------------------------------------------------------------------
// LateWrite
// ---------------------------------------------------------------------------

/// A generator staged a file after the commit job already ran.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LateWrite {
    /// Destination-relative path of the rejected write or removal.
    pub path: String,
    /// The commit stage that already ran.
    pub commit_stage: String,
}

impl fmt::Display for LateWrite {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "cannot stage {}: the '{}' stage already committed this run's files\n  To fix: stage files from a task that runs before '{}'.",
            self.path, self.commit_stage, self.commit_stage
        )
    }
}

impl std::error::Error for LateWrite {}

// ---------------------------------------------------------------------------
// JobError
// ---------------------------------------------------------------------------

/// Why a job body stopped the run.
#[derive(Debug)]
pub enum JobError {
    /// The conflict engine refused to continue.
    Conflict(ConflictError),
    /// The job tried to queue work it is not allowed to.
    Queue(QueueError),
    /// The job staged a file after the commit.
    LateWrite(LateWrite),
    /// Writing or removing a file failed.
    Io {
        /// The file being written.
        path: PathBuf,
        /// Underlying error.
        source: std::io::Error,
    },
    /// A generator task failed.
    Task(anyhow::Error),
}

impl fmt::Display for JobError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Conflict(e) => write!(f, "{e}"),
            Self::Queue(e) => write!(f, "{e}"),
            Self::LateWrite(e) => write!(f, "{e}"),
            Self::Io { path, source } => write!(f, "could not write {}: {source}", path.display()),
            Self::Task(e) => write!(f, "{e:#}"),
        }
    }
}

impl std::error::Error for JobError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Conflict(e) => Some(e),
            Self::Queue(e) => Some(e),
            Self::LateWrite(e) => Some(e),
            Self::Io { source, .. } => Some(source),
            Self::Task(e) => Some(e.as_ref()),
        }
    }
}

impl From<ConflictError> for JobError {
    fn from(e: ConflictError) -> Self {
        Self::Conflict(e)
    }
}

impl From<QueueError> for JobError {
    fn from(e: QueueError) -> Self {
        Self::Queue(e)
    }
}

impl From<LateWrite> for JobError {
    fn from(e: LateWrite) -> Self {
        Self::LateWrite(e)
    }
}

impl From<anyhow::Error> for JobError {
    fn from(e: anyhow::Error) -> Self {
        Self::Task(e)
    }
}

// ---------------------------------------------------------------------------
// ScaffoldError
// ---------------------------------------------------------------------------

/// Why a run did not complete.
#[derive(Debug)]
pub enum ScaffoldError {
    /// The user chose to abort at a conflict prompt.
    AbortedByUser {
        /// Destination-relative path being resolved.
        path: String,
    },
    /// The `bail` policy stopped the run.
    AbortedByConflict {
        /// Destination-relative path that triggered it.
        path: String,
    },
    /// A conflict prompt never settled.
    RecursionExceeded {
        /// Destination-relative path being resolved.
        path: String,
        /// The round limit.
        limit: u32,
    },
    /// Any other job failure.
    Job {
        /// Failing job id.
        job: String,
        /// Stage it ran in.
        stage: String,
        /// The job's error.
        source: JobError,
    },
    /// The run ended with staged files that were never committed.
    Uncommitted {
        /// Destination-relative paths, sorted.
        paths: Vec<String>,
    },
    /// Work could not be queued from outside a job.
    Queue(QueueError),
    /// The run configuration is unusable.
    Config(ConfigError),
    /// The resolution policy is contradictory.
    Policy(PolicyError),
    /// The resolve rule file is unreadable or malformed.
    Rules(RulesError),
    /// I/O outside any job.
    Io(std::io::Error),
}

impl ScaffoldError {
    /// Whether the run stopped on purpose (user abort or bail policy).
    #[must_use]
    pub const fn is_abort(&self) -> bool {
        matches!(self, Self::AbortedByUser { .. } | Self::AbortedByConflict { .. })
    }
}

impl fmt::Display for ScaffoldError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::AbortedByUser { path } => {
                write!(f, "run aborted by user at {path}")
            }
            Self::AbortedByConflict { path } => write!(
                f,
                "run aborted: {path} conflicts with the existing file\n  To fix: resolve it by hand, add a rule for it, or rerun without `bail`."
            ),
            Self::RecursionExceeded { path, limit } => write!(
                f,
                "conflict on {path} was not settled after {limit} prompts\n  To fix: check the adapter; it must eventually answer write, skip, force or abort."
            ),
            Self::Job { job, stage, source } => {
                write!(f, "job '{job}' failed in stage '{stage}': {source}")
            }
            Self::Uncommitted { paths } => write!(
                f,
                "run ended with {} uncommitted file(s): {}\n  To fix: stage files before the commit stage runs.",
                paths.len(),
                paths.join(", ")
            ),
            Self::Queue(e) => write!(
                f,
                "{e}\n  To fix: queue work into the current stage or a later one."
            ),
            Self::Config(e) => write!(
                f,
                "{e}\n  To fix: edit the config file and correct the issue."
            ),
            Self::Policy(e) => write!(f, "{e}\n  To fix: pick either force or bail."),
            Self::Rules(e) => write!(
                f,
                "{e}\n  To fix: each rule line is `<glob> skip` or `<glob> force`."
            ),
            Self::Io(e) => write!(
                f,
                "I/O error: {e}\n  To fix: check file permissions and disk space."
            ),
        }
    }
}

impl std::error::Error for ScaffoldError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Job { source, .. } => Some(source),
            Self::Queue(e) => Some(e),
            Self::Config(e) => Some(e),
            Self::Policy(e) => Some(e),
            Self::Rules(e) => Some(e),
            Self::Io(e) => Some(e),
            Self::AbortedByUser { .. }
            | Self::AbortedByConflict { .. }
            | Self::RecursionExceeded { .. }
            | Self::Uncommitted { .. } => None,
        }
    }
}

impl From<JobFailure> for ScaffoldError {
    fn from(failure: JobFailure) -> Self {
        let JobFailure { job, stage, error } = failure;
        match error {
            JobError::Conflict(ConflictError::AbortedByUser { path }) => Self::AbortedByUser { path },
            JobError::Conflict(ConflictError::AbortedByConflict { path }) => {
                Self::AbortedByConflict { path }
            }
            JobError::Conflict(ConflictError::RecursionExceeded { path, limit }) => {
                Self::RecursionExceeded { path, limit }
            }
            source => Self::Job { job, stage, source },
        }
    }
}

impl From<QueueError> for ScaffoldError {
    fn from(e: QueueError) -> Self {
        Self::Queue(e)
    }
}

impl From<ConfigError> for ScaffoldError {
    fn from(e: ConfigError) -> Self {
        Self::Config(e)
    }
}

impl From<PolicyError> for ScaffoldError {
    fn from(e: PolicyError) -> Self {
        Self::Policy(e)
    }
}

impl From<RulesError> for ScaffoldError {
    fn from(e: RulesError) -> Self {
        Self::Rules(e)
    }
}

impl From<std::io::Error> for ScaffoldError {
    fn from(e: std::io::Error) -> Self {
        Self::Io(e)
    }
}
