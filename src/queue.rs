//! Staged task queue group.
//!
//! A [`QueueGroup`] owns an ordered list of named stages, each with a FIFO of
//! [`Job`]s. Stages drain strictly in declaration order:
//!
//! ```text
//! initializing → prompting → configuring → default → writing
//!     → transform → conflicts → install → end
//! ```
//!
//! Exactly one job body runs at a time. A running job may add jobs to the
//! current stage or any later one through its [`JobContext`]; jobs added to
//! the current stage run before the group advances. Adding to a stage that
//! has already drained is rejected with [`QueueError::StageCompleted`].
//!
//! The stage cursor only moves forward. The first job that fails stops the
//! whole group; no further job in any stage runs.

use std::collections::{HashMap, VecDeque};
use std::fmt;

use crate::error::JobError;

/// The default pipeline, in execution order.
pub const DEFAULT_STAGES: &[&str] = &[
    "initializing",
    "prompting",
    "configuring",
    "default",
    "writing",
    "transform",
    "conflicts",
    "install",
    "end",
];

// ---------------------------------------------------------------------------
// Job
// ---------------------------------------------------------------------------

/// Outcome of a job body: `Ok` finishes the job, `Err` aborts the run.
pub type JobResult = Result<(), JobError>;

type JobBody<C> = Box<dyn FnOnce(&mut JobContext<'_, C>) -> JobResult>;

/// One unit of work queued into a stage.
///
/// `C` is the run state handed to every job body.
pub struct Job<C> {
    id: String,
    run_once: Option<String>,
    body: JobBody<C>,
}

impl<C> Job<C> {
    /// Create a job with a descriptive id.
    pub fn new(
        id: impl Into<String>,
        body: impl FnOnce(&mut JobContext<'_, C>) -> JobResult + 'static,
    ) -> Self {
        Self {
            id: id.into(),
            run_once: None,
            body: Box::new(body),
        }
    }

    /// Register this job under a run-once key. A later job with the same key
    /// is ignored for the rest of the run.
    #[must_use]
    pub fn run_once(mut self, key: impl Into<String>) -> Self {
        self.run_once = Some(key.into());
        self
    }

    /// The job id.
    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    /// The run-once key, if any.
    #[must_use]
    pub fn run_once_key(&self) -> Option<&str> {
        self.run_once.as_deref()
    }
}

impl<C> fmt::Debug for Job<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Job")
            .field("id", &self.id)
            .field("run_once", &self.run_once)
            .finish_non_exhaustive()
    }
}

/// Where a job ended up after [`QueueGroup::add_job`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Registration {
    /// Stage the job was queued into.
    pub stage: String,
    /// Id of the registered job. For a deduplicated run-once job this is the
    /// id of the first registration, not of the rejected one.
    pub job_id: String,
    /// `false` when the call was a no-op because the run-once key was
    /// already taken.
    pub fresh: bool,
}

// ---------------------------------------------------------------------------
// QueueError
// ---------------------------------------------------------------------------

/// Programming errors when registering jobs.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum QueueError {
    /// The stage name is not part of this group.
    UnknownStage {
        /// The requested stage.
        stage: String,
    },
    /// The stage already drained; the job could never run in order.
    StageCompleted {
        /// The requested stage.
        stage: String,
        /// The stage the group is currently on (`None` once the group ended).
        current: Option<String>,
    },
    /// The group was built with no stages or with a repeated stage name.
    InvalidStages {
        /// What is wrong with the stage list.
        detail: String,
    },
}

impl fmt::Display for QueueError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UnknownStage { stage } => write!(f, "unknown stage '{stage}'"),
            Self::StageCompleted { stage, current } => {
                write!(f, "stage '{stage}' has already completed")?;
                match current {
                    Some(current) => write!(f, " (currently running '{current}')"),
                    None => write!(f, " (the run has ended)"),
                }
            }
            Self::InvalidStages { detail } => write!(f, "invalid stage list: {detail}"),
        }
    }
}

impl std::error::Error for QueueError {}

// ---------------------------------------------------------------------------
// RunStatus / JobFailure
// ---------------------------------------------------------------------------

/// Where [`QueueGroup::start`] or [`QueueGroup::resume`] stopped.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RunStatus {
    /// The group is already running (re-entrant call); nothing was done.
    Running,
    /// A job paused the group; call [`QueueGroup::resume`] to continue.
    Paused,
    /// Every stage drained.
    Ended,
    /// A job failed earlier in this run; the group will not run again.
    Aborted,
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Running => write!(f, "running"),
            Self::Paused => write!(f, "paused"),
            Self::Ended => write!(f, "ended"),
            Self::Aborted => write!(f, "aborted"),
        }
    }
}

/// The job failure that stopped a run.
#[derive(Debug)]
pub struct JobFailure {
    /// Id of the failing job.
    pub job: String,
    /// Stage the job ran in.
    pub stage: String,
    /// The error the job returned.
    pub error: JobError,
}

impl fmt::Display for JobFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "job '{}' in stage '{}' failed: {}", self.job, self.stage, self.error)
    }
}

impl std::error::Error for JobFailure {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&self.error)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Phase {
    Idle,
    Running,
    Paused,
    Ended,
    Aborted,
}

// ---------------------------------------------------------------------------
// QueueGroup
// ---------------------------------------------------------------------------

/// An ordered set of named FIFO queues drained one stage at a time.
pub struct QueueGroup<C> {
    stages: Vec<String>,
    queues: Vec<VecDeque<Job<C>>>,
    /// Index of the stage being drained. `None` before start; equal to
    /// `stages.len()` once every stage drained.
    cursor: Option<usize>,
    phase: Phase,
    pause_requested: bool,
    run_once: HashMap<String, Registration>,
    jobs_run: usize,
    /// Stages that ran at least one job, in order.
    visited: Vec<usize>,
}

impl<C> QueueGroup<C> {
    /// Build a group from an ordered, non-empty list of unique stage names.
    ///
    /// # Errors
    /// Returns [`QueueError::InvalidStages`] for an empty list or duplicates.
    pub fn new<S: AsRef<str>>(stages: &[S]) -> Result<Self, QueueError> {
        if stages.is_empty() {
            return Err(QueueError::InvalidStages {
                detail: "at least one stage is required".to_owned(),
            });
        }
        let mut names: Vec<String> = Vec::with_capacity(stages.len());
        for stage in stages {
            let stage = stage.as_ref();
            if names.iter().any(|s| s == stage) {
                return Err(QueueError::InvalidStages {
                    detail: format!("stage '{stage}' is listed twice"),
                });
            }
            names.push(stage.to_owned());
        }
        let queues = names.iter().map(|_| VecDeque::new()).collect();
        Ok(Self {
            stages: names,
            queues,
            cursor: None,
            phase: Phase::Idle,
            pause_requested: false,
            run_once: HashMap::new(),
            jobs_run: 0,
            visited: Vec::new(),
        })
    }

    /// The stage names in execution order.
    #[must_use]
    pub fn stages(&self) -> &[String] {
        &self.stages
    }

    /// Name of the stage being drained, if the group is mid-run.
    #[must_use]
    pub fn current_stage(&self) -> Option<&str> {
        self.cursor
            .and_then(|idx| self.stages.get(idx))
            .map(String::as_str)
    }

    /// Number of jobs waiting in `stage`.
    #[must_use]
    pub fn pending(&self, stage: &str) -> usize {
        self.index_of(stage).map_or(0, |idx| self.queues[idx].len())
    }

    /// Total number of jobs waiting across all stages.
    #[must_use]
    pub fn pending_total(&self) -> usize {
        self.queues.iter().map(VecDeque::len).sum()
    }

    /// Whether a run-once key has been registered in this run.
    #[must_use]
    pub fn has_run_once(&self, key: &str) -> bool {
        self.run_once.contains_key(key)
    }

    /// Number of job bodies executed so far.
    #[must_use]
    pub const fn jobs_run(&self) -> usize {
        self.jobs_run
    }

    /// Names of the stages that ran at least one job, in run order.
    #[must_use]
    pub fn visited_stages(&self) -> Vec<&str> {
        self.visited.iter().map(|&idx| self.stages[idx].as_str()).collect()
    }

    /// `true` once a job paused the group (or [`pause`](Self::pause) was
    /// called) and it has not been resumed yet.
    #[must_use]
    pub fn is_paused(&self) -> bool {
        self.pause_requested || self.phase == Phase::Paused
    }

    /// `true` once every stage drained.
    #[must_use]
    pub fn has_ended(&self) -> bool {
        self.phase == Phase::Ended
    }

    /// Whether `stage` is at or after the stage being drained.
    #[must_use]
    pub fn accepts(&self, stage: &str) -> bool {
        self.index_of(stage)
            .is_some_and(|idx| self.cursor.is_none_or(|cursor| idx >= cursor))
    }

    /// Whether a job could be queued into `stage` right now.
    ///
    /// # Errors
    /// [`QueueError::UnknownStage`] or [`QueueError::StageCompleted`], the
    /// same errors [`add_job`](Self::add_job) would return.
    pub fn check_stage(&self, stage: &str) -> Result<(), QueueError> {
        let idx = self.index_of(stage).ok_or_else(|| QueueError::UnknownStage {
            stage: stage.to_owned(),
        })?;
        match self.cursor {
            Some(cursor) if idx < cursor => Err(QueueError::StageCompleted {
                stage: stage.to_owned(),
                current: self.stages.get(cursor).cloned(),
            }),
            _ => Ok(()),
        }
    }

    /// Append `job` to `stage`.
    ///
    /// If the job carries a run-once key that was already registered in this
    /// run (pending or finished), nothing is queued and the first
    /// registration is returned with `fresh == false`.
    ///
    /// # Errors
    /// [`QueueError::UnknownStage`] for a stage not in this group, and
    /// [`QueueError::StageCompleted`] for a stage that already drained.
    pub fn add_job(&mut self, stage: &str, job: Job<C>) -> Result<Registration, QueueError> {
        let idx = self.index_of(stage).ok_or_else(|| QueueError::UnknownStage {
            stage: stage.to_owned(),
        })?;

        if let Some(key) = job.run_once_key()
            && let Some(existing) = self.run_once.get(key)
        {
            tracing::debug!(key, job = job.id(), "run-once job already registered");
            return Ok(Registration {
                fresh: false,
                ..existing.clone()
            });
        }

        self.check_stage(stage)?;

        let registration = Registration {
            stage: stage.to_owned(),
            job_id: job.id.clone(),
            fresh: true,
        };
        if let Some(key) = &job.run_once {
            self.run_once.insert(key.clone(), registration.clone());
        }
        tracing::trace!(stage, job = job.id(), "job queued");
        self.queues[idx].push_back(job);
        Ok(registration)
    }

    /// Ask the group to stop dequeuing once the current job returns.
    pub fn pause(&mut self) {
        self.pause_requested = true;
    }

    /// Begin draining stage 0.
    ///
    /// Re-entrant calls return [`RunStatus::Running`]; calls after the group
    /// ended or aborted return that status without running anything. A group
    /// that is paused stays paused until [`resume`](Self::resume).
    ///
    /// # Errors
    /// Returns the [`JobFailure`] of the first job that failed.
    pub fn start(&mut self, state: &mut C) -> Result<RunStatus, JobFailure> {
        match self.phase {
            Phase::Running => Ok(RunStatus::Running),
            Phase::Paused => Ok(RunStatus::Paused),
            Phase::Ended => Ok(RunStatus::Ended),
            Phase::Aborted => Ok(RunStatus::Aborted),
            Phase::Idle => {
                self.cursor = Some(0);
                self.drive(state)
            }
        }
    }

    /// Continue a paused group from where it stopped. Resuming a group that
    /// never started starts it.
    ///
    /// # Errors
    /// Returns the [`JobFailure`] of the first job that failed.
    pub fn resume(&mut self, state: &mut C) -> Result<RunStatus, JobFailure> {
        self.pause_requested = false;
        match self.phase {
            Phase::Paused => self.drive(state),
            Phase::Idle => self.start(state),
            Phase::Running => Ok(RunStatus::Running),
            Phase::Ended => Ok(RunStatus::Ended),
            Phase::Aborted => Ok(RunStatus::Aborted),
        }
    }

    fn drive(&mut self, state: &mut C) -> Result<RunStatus, JobFailure> {
        self.phase = Phase::Running;
        loop {
            if self.pause_requested {
                self.pause_requested = false;
                self.phase = Phase::Paused;
                tracing::debug!(stage = ?self.current_stage(), "queue group paused");
                return Ok(RunStatus::Paused);
            }

            let idx = self.cursor.unwrap_or(0);
            if idx >= self.stages.len() {
                self.phase = Phase::Ended;
                tracing::debug!(jobs = self.jobs_run, "queue group ended");
                return Ok(RunStatus::Ended);
            }

            let Some(job) = self.queues[idx].pop_front() else {
                tracing::debug!(stage = %self.stages[idx], "stage drained");
                self.cursor = Some(idx + 1);
                continue;
            };

            let Job { id, body, .. } = job;
            if self.visited.last() != Some(&idx) {
                self.visited.push(idx);
            }
            tracing::debug!(stage = %self.stages[idx], job = %id, "job started");
            let result = {
                let mut cx = JobContext {
                    state: &mut *state,
                    queues: &mut *self,
                    stage: idx,
                    job: &id,
                };
                body(&mut cx)
            };
            self.jobs_run += 1;

            if let Err(error) = result {
                self.phase = Phase::Aborted;
                let stage = self.stages[idx].clone();
                tracing::warn!(stage = %stage, job = %id, error = %error, "job failed, aborting run");
                return Err(JobFailure {
                    job: id,
                    stage,
                    error,
                });
            }
        }
    }

    fn index_of(&self, stage: &str) -> Option<usize> {
        self.stages.iter().position(|s| s == stage)
    }
}

impl<C> fmt::Debug for QueueGroup<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QueueGroup")
            .field("stages", &self.stages)
            .field("current", &self.current_stage())
            .field("phase", &self.phase)
            .field("pending", &self.pending_total())
            .finish_non_exhaustive()
    }
}

// ---------------------------------------------------------------------------
// JobContext
// ---------------------------------------------------------------------------

/// What a running job body can reach: the run state and the queue group
/// that is executing it.
pub struct JobContext<'a, C> {
    /// Mutable run state shared by every job.
    pub state: &'a mut C,
    queues: &'a mut QueueGroup<C>,
    stage: usize,
    job: &'a str,
}

impl<C> JobContext<'_, C> {
    /// Queue another job. Valid for the current stage or any later one.
    ///
    /// # Errors
    /// See [`QueueGroup::add_job`].
    pub fn add_job(&mut self, stage: &str, job: Job<C>) -> Result<Registration, QueueError> {
        self.queues.add_job(stage, job)
    }

    /// Pause the group once this job returns.
    pub fn pause(&mut self) {
        self.queues.pause();
    }

    /// Name of the stage this job runs in.
    #[must_use]
    pub fn stage(&self) -> &str {
        &self.queues.stages[self.stage]
    }

    /// Id of the running job.
    #[must_use]
    pub const fn job_id(&self) -> &str {
        self.job
    }

    /// Read-only view of the queue group.
    #[must_use]
    pub fn queues(&self) -> &QueueGroup<C> {
        &*self.queues
    }

    /// Split borrow of the run state and the queue group.
    pub fn parts(&mut self) -> (&mut C, &mut QueueGroup<C>) {
        (&mut *self.state, &mut *self.queues)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    type Trace = Vec<String>;

    fn record(id: &str) -> Job<Trace> {
        let id = id.to_owned();
        Job::new(id.clone(), move |cx: &mut JobContext<'_, Trace>| {
            cx.state.push(id);
            Ok(())
        })
    }

    fn group() -> QueueGroup<Trace> {
        QueueGroup::new(DEFAULT_STAGES).unwrap()
    }

    #[test]
    fn rejects_empty_and_duplicate_stage_lists() {
        let empty: &[&str] = &[];
        assert!(matches!(
            QueueGroup::<Trace>::new(empty),
            Err(QueueError::InvalidStages { .. })
        ));
        assert!(matches!(
            QueueGroup::<Trace>::new(&["a", "b", "a"]),
            Err(QueueError::InvalidStages { .. })
        ));
    }

    #[test]
    fn runs_stages_in_declaration_order_and_fifo_within() {
        let mut q = group();
        q.add_job("writing", record("w1")).unwrap();
        q.add_job("initializing", record("i1")).unwrap();
        q.add_job("writing", record("w2")).unwrap();
        q.add_job("end", record("e1")).unwrap();
        q.add_job("configuring", record("c1")).unwrap();

        let mut trace = Trace::new();
        assert_eq!(q.start(&mut trace).unwrap(), RunStatus::Ended);
        assert_eq!(trace, vec!["i1", "c1", "w1", "w2", "e1"]);
        assert_eq!(q.jobs_run(), 5);
        assert_eq!(q.visited_stages(), vec!["initializing", "configuring", "writing", "end"]);
        assert!(q.has_ended());
    }

    #[test]
    fn job_added_to_current_stage_runs_before_advancing() {
        let mut q = group();
        q.add_job(
            "configuring",
            Job::new("c1", |cx: &mut JobContext<'_, Trace>| {
                cx.state.push("c1".into());
                cx.add_job("configuring", record("c1-child"))?;
                cx.add_job("writing", record("w-from-c1"))?;
                Ok(())
            }),
        )
        .unwrap();
        q.add_job("configuring", record("c2")).unwrap();
        q.add_job("conflicts", record("x1")).unwrap();

        let mut trace = Trace::new();
        q.start(&mut trace).unwrap();
        assert_eq!(trace, vec!["c1", "c2", "c1-child", "w-from-c1", "x1"]);
    }

    #[test]
    fn adding_to_completed_stage_is_rejected() {
        let mut q = group();
        q.add_job(
            "writing",
            Job::new("late", |cx| {
                let err = cx.add_job("prompting", record("never")).unwrap_err();
                assert_eq!(
                    err,
                    QueueError::StageCompleted {
                        stage: "prompting".into(),
                        current: Some("writing".into()),
                    }
                );
                cx.state.push("late".into());
                Ok(())
            }),
        )
        .unwrap();

        let mut trace = Trace::new();
        q.start(&mut trace).unwrap();
        assert_eq!(trace, vec!["late"]);
        assert!(!q.accepts("prompting"));
    }

    #[test]
    fn adding_after_end_is_rejected() {
        let mut q = group();
        let mut trace = Trace::new();
        q.start(&mut trace).unwrap();
        let err = q.add_job("end", record("x")).unwrap_err();
        assert_eq!(
            err,
            QueueError::StageCompleted {
                stage: "end".into(),
                current: None,
            }
        );
    }

    #[test]
    fn unknown_stage_is_rejected() {
        let mut q = group();
        let err = q.add_job("deploy", record("x")).unwrap_err();
        assert_eq!(err, QueueError::UnknownStage { stage: "deploy".into() });
        assert!(err.to_string().contains("deploy"));
    }

    #[test]
    fn run_once_key_registers_only_first_job() {
        let mut q = group();
        let first = q
            .add_job("install", record("install-a").run_once("pm:install"))
            .unwrap();
        let second = q
            .add_job("install", record("install-b").run_once("pm:install"))
            .unwrap();
        assert!(first.fresh);
        assert!(!second.fresh);
        assert_eq!(second.job_id, "install-a");
        assert_eq!(q.pending("install"), 1);
        assert!(q.has_run_once("pm:install"));

        let mut trace = Trace::new();
        q.start(&mut trace).unwrap();
        assert_eq!(trace, vec!["install-a"]);
    }

    #[test]
    fn run_once_key_stays_taken_after_the_job_ran() {
        let mut q = group();
        q.add_job("writing", record("commit").run_once("commit"))
            .unwrap();
        q.add_job(
            "end",
            Job::new("again", |cx| {
                let reg = cx.add_job("writing", record("commit-2").run_once("commit"))?;
                assert!(!reg.fresh);
                Ok(())
            }),
        )
        .unwrap();

        let mut trace = Trace::new();
        q.start(&mut trace).unwrap();
        assert_eq!(trace, vec!["commit"]);
    }

    #[test]
    fn pause_stops_after_current_job_and_resume_continues() {
        let mut q = group();
        q.add_job(
            "initializing",
            Job::new("pauser", |cx: &mut JobContext<'_, Trace>| {
                cx.state.push("pauser".into());
                cx.pause();
                Ok(())
            }),
        )
        .unwrap();
        q.add_job("initializing", record("after")).unwrap();
        q.add_job("end", record("last")).unwrap();

        let mut trace = Trace::new();
        assert_eq!(q.start(&mut trace).unwrap(), RunStatus::Paused);
        assert_eq!(trace, vec!["pauser"]);
        assert!(q.is_paused());
        assert_eq!(q.start(&mut trace).unwrap(), RunStatus::Paused);

        assert_eq!(q.resume(&mut trace).unwrap(), RunStatus::Ended);
        assert_eq!(trace, vec!["pauser", "after", "last"]);
    }

    #[test]
    fn pause_before_start_holds_the_group() {
        let mut q = group();
        q.add_job("default", record("d")).unwrap();
        q.pause();

        let mut trace = Trace::new();
        assert_eq!(q.start(&mut trace).unwrap(), RunStatus::Paused);
        assert!(trace.is_empty());
        assert_eq!(q.resume(&mut trace).unwrap(), RunStatus::Ended);
        assert_eq!(trace, vec!["d"]);
    }

    #[test]
    fn failing_job_stops_every_later_job() {
        let mut q = group();
        q.add_job("writing", record("w1")).unwrap();
        q.add_job(
            "writing",
            Job::new("boom", |_cx| {
                Err(JobError::Task(anyhow::anyhow!("template missing")))
            }),
        )
        .unwrap();
        q.add_job("writing", record("w3")).unwrap();
        q.add_job("end", record("e")).unwrap();

        let mut trace = Trace::new();
        let failure = q.start(&mut trace).unwrap_err();
        assert_eq!(failure.job, "boom");
        assert_eq!(failure.stage, "writing");
        assert!(failure.to_string().contains("template missing"));
        assert_eq!(trace, vec!["w1"]);
        assert_eq!(q.start(&mut trace).unwrap(), RunStatus::Aborted);
        assert_eq!(q.resume(&mut trace).unwrap(), RunStatus::Aborted);
        assert_eq!(trace, vec!["w1"]);
    }

    #[test]
    fn restart_after_end_does_nothing() {
        let mut q = group();
        q.add_job("default", record("d")).unwrap();
        let mut trace = Trace::new();
        q.start(&mut trace).unwrap();
        assert_eq!(q.start(&mut trace).unwrap(), RunStatus::Ended);
        assert_eq!(trace, vec!["d"]);
    }

    #[test]
    fn job_context_reports_stage_and_id() {
        let mut q = group();
        q.add_job(
            "transform",
            Job::new("inspect", |cx: &mut JobContext<'_, Trace>| {
                let line = format!("{}:{}", cx.stage(), cx.job_id());
                cx.state.push(line);
                assert_eq!(cx.queues().current_stage(), Some("transform"));
                Ok(())
            }),
        )
        .unwrap();
        let mut trace = Trace::new();
        q.start(&mut trace).unwrap();
        assert_eq!(trace, vec!["transform:inspect"]);
    }

    #[test]
    fn current_stage_is_none_before_start_and_after_end() {
        let mut q = group();
        assert_eq!(q.current_stage(), None);
        assert!(q.accepts("initializing"));
        let mut trace = Trace::new();
        q.start(&mut trace).unwrap();
        assert_eq!(q.current_stage(), None);
        assert!(!q.accepts("end"));
    }

    #[test]
    fn check_stage_matches_add_job_without_queueing() {
        let mut q = group();
        assert!(q.check_stage("writing").is_ok());
        assert!(matches!(q.check_stage("nope"), Err(QueueError::UnknownStage { .. })));
        let mut trace = Trace::new();
        q.start(&mut trace).unwrap();
        assert!(matches!(
            q.check_stage("writing"),
            Err(QueueError::StageCompleted { ref stage, current: None }) if stage == "writing"
        ));
        assert_eq!(q.pending_total(), 0);
    }
}

// ---------------------------------------------------------------------------
// Property tests
// ---------------------------------------------------------------------------
