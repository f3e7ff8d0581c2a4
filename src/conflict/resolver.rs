//! The conflict engine.
//!
//! [`Conflicter`] decides the [`Disposition`] of each [`Candidate`]:
//!
//! ```text
//! preset (rule or earlier check) ─────────────────────────────► verdict
//! target absent ───────────────► create   (bail_on_create: abort, dry run: skip)
//! forced (policy or force-all) ► force    (dry run: skip)
//! no conflict ─────────────────► identical (regenerate: force)
//! conflict ────────────────────► bail: abort │ dry run: skip │ prompt loop
//! ```
//!
//! Batches go through two lanes. Detection runs for every candidate first and
//! queues status lines on the log lane and conflicts on the conflict lane.
//! The log lane is flushed, then conflicts are prompted one at a time, so
//! prompts never interleave with each other or with status lines.

use std::collections::VecDeque;
use std::fmt;
use std::io;
use std::path::{Path, PathBuf};

use super::adapter::{
    Adapter, AdapterError, Answer, Choice, ConflictQuestion, LogLevel, render_binary_summary,
};
use super::candidate::{Candidate, Disposition, looks_binary};
use super::detect::{ConflictKind, DiskState, detect};
use super::policy::{ForceState, ResolutionPolicy};
use super::rules::{ResolveRules, RulesError};

/// Prompt rounds allowed per file before the engine gives up.
pub const MAX_PROMPT_ROUNDS: u32 = 5;

// ---------------------------------------------------------------------------
// ConflictError
// ---------------------------------------------------------------------------

/// Why the engine could not settle a candidate.
#[derive(Debug)]
pub enum ConflictError {
    /// The user picked "abort".
    AbortedByUser {
        /// Destination-relative path being resolved.
        path: String,
    },
    /// The `bail` policy hit a conflict (or a create, with `bail_on_create`).
    AbortedByConflict {
        /// Destination-relative path that triggered the abort.
        path: String,
    },
    /// The prompt loop did not settle within its round limit.
    RecursionExceeded {
        /// Destination-relative path being resolved.
        path: String,
        /// The round limit.
        limit: u32,
    },
    /// Reading the on-disk target failed.
    Io {
        /// Absolute path that could not be read.
        path: PathBuf,
        /// Underlying error.
        source: io::Error,
    },
    /// The adapter failed to answer or edit.
    Adapter(AdapterError),
    /// The resolve rule file could not be updated.
    Rules(RulesError),
}

impl fmt::Display for ConflictError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::AbortedByUser { path } => write!(f, "aborted by user while resolving {path}"),
            Self::AbortedByConflict { path } => write!(
                f,
                "aborted on conflict at {path}\n  To fix: resolve the file by hand, or rerun without `bail`."
            ),
            Self::RecursionExceeded { path, limit } => write!(
                f,
                "no decision for {path} after {limit} prompt rounds\n  To fix: answer with write, skip, force or abort."
            ),
            Self::Io { path, source } => {
                write!(f, "could not read {}: {source}", path.display())
            }
            Self::Adapter(e) => write!(f, "{e}"),
            Self::Rules(e) => write!(f, "resolve rules: {e}"),
        }
    }
}

impl std::error::Error for ConflictError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io { source, .. } => Some(source),
            Self::Adapter(e) => Some(e),
            Self::Rules(e) => Some(e),
            Self::AbortedByUser { .. }
            | Self::AbortedByConflict { .. }
            | Self::RecursionExceeded { .. } => None,
        }
    }
}

impl From<AdapterError> for ConflictError {
    fn from(e: AdapterError) -> Self {
        Self::Adapter(e)
    }
}

impl From<RulesError> for ConflictError {
    fn from(e: RulesError) -> Self {
        Self::Rules(e)
    }
}

// ---------------------------------------------------------------------------
// CustomAction
// ---------------------------------------------------------------------------

type ActionHandler = Box<dyn FnMut(&Candidate) -> Option<Disposition>>;

/// A caller-supplied prompt choice.
///
/// The handler returns the disposition to settle on, or `None` to ask again.
pub struct CustomAction {
    key: char,
    name: String,
    value: String,
    handler: ActionHandler,
}

impl CustomAction {
    /// Build an action shown as `key) name` and answered as `value`.
    pub fn new(
        key: char,
        name: impl Into<String>,
        value: impl Into<String>,
        handler: impl FnMut(&Candidate) -> Option<Disposition> + 'static,
    ) -> Self {
        Self {
            key,
            name: name.into(),
            value: value.into(),
            handler: Box::new(handler),
        }
    }

    /// The answer value.
    #[must_use]
    pub fn value(&self) -> &str {
        &self.value
    }
}

impl fmt::Debug for CustomAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CustomAction")
            .field("key", &self.key)
            .field("value", &self.value)
            .finish_non_exhaustive()
    }
}

// ---------------------------------------------------------------------------
// Conflicter
// ---------------------------------------------------------------------------

enum Step {
    Settled,
    Conflict { disk: DiskState, kind: ConflictKind },
}

/// Decides what happens to each candidate file of a run.
pub struct Conflicter {
    adapter: Box<dyn Adapter>,
    policy: ResolutionPolicy,
    force: ForceState,
    root: PathBuf,
    rules: Option<ResolveRules>,
    actions: Vec<CustomAction>,
    log_lane: VecDeque<(LogLevel, String)>,
}

impl Conflicter {
    /// Engine for files under `root`.
    pub fn new(root: impl Into<PathBuf>, policy: ResolutionPolicy, adapter: Box<dyn Adapter>) -> Self {
        Self {
            adapter,
            policy,
            force: ForceState::default(),
            root: root.into(),
            rules: None,
            actions: Vec::new(),
            log_lane: VecDeque::new(),
        }
    }

    /// Use `rules` for preset verdicts and "ignore and remember".
    #[must_use]
    pub fn with_rules(mut self, rules: ResolveRules) -> Self {
        self.rules = Some(rules);
        self
    }

    /// Offer an extra prompt choice.
    pub fn add_action(&mut self, action: CustomAction) {
        self.actions.push(action);
    }

    /// The run's policy.
    #[must_use]
    pub const fn policy(&self) -> &ResolutionPolicy {
        &self.policy
    }

    /// The force-all switches flipped so far.
    #[must_use]
    pub const fn force_state(&self) -> &ForceState {
        &self.force
    }

    /// The loaded rule file, if any.
    #[must_use]
    pub const fn rules(&self) -> Option<&ResolveRules> {
        self.rules.as_ref()
    }

    /// Emit a user-visible line through the adapter.
    pub fn log(&mut self, level: LogLevel, message: &str) {
        self.adapter.log(level, message);
    }

    /// Destination-relative, `/`-separated form of `path`.
    #[must_use]
    pub fn relative(&self, path: &Path) -> String {
        path.strip_prefix(&self.root)
            .unwrap_or(path)
            .to_string_lossy()
            .replace('\\', "/")
    }

    /// Settle one candidate. A candidate that already has a disposition
    /// returns it without any disk access or prompt.
    ///
    /// # Errors
    /// Aborts, unreadable targets, adapter failures and runaway prompt loops.
    pub fn check(&mut self, candidate: &mut Candidate) -> Result<Disposition, ConflictError> {
        if let Some(done) = candidate.disposition() {
            return Ok(done);
        }
        let step = self.classify(candidate);
        self.flush_logs();
        if let Step::Conflict { disk, kind } = step? {
            self.resolve(candidate, disk, kind)?;
        }
        Ok(self.settled(candidate))
    }

    /// Settle a batch: detect everything, flush status lines, then prompt
    /// conflicts in order.
    ///
    /// # Errors
    /// Stops at the first error; candidates settled before it keep their
    /// dispositions.
    pub fn check_all(&mut self, candidates: &mut [Candidate]) -> Result<Vec<Disposition>, ConflictError> {
        let mut conflicts = VecDeque::new();
        for (idx, candidate) in candidates.iter_mut().enumerate() {
            if candidate.disposition().is_some() {
                continue;
            }
            match self.classify(candidate) {
                Ok(Step::Settled) => {}
                Ok(Step::Conflict { disk, kind }) => conflicts.push_back((idx, disk, kind)),
                Err(e) => {
                    self.flush_logs();
                    return Err(e);
                }
            }
        }
        self.flush_logs();

        while let Some((idx, disk, kind)) = conflicts.pop_front() {
            let candidate = &mut candidates[idx];
            if self.force.is_forced(candidate.scope()) {
                let rel = self.relative(candidate.path());
                self.settle(candidate, &rel, Disposition::Force);
                self.flush_logs();
                continue;
            }
            self.resolve(candidate, disk, kind)?;
        }

        Ok(candidates.iter_mut().map(|c| self.settled(c)).collect())
    }

    fn settled(&self, candidate: &mut Candidate) -> Disposition {
        candidate
            .disposition()
            .unwrap_or_else(|| candidate.settle(Disposition::Skip))
    }

    /// Detection half: everything that needs no prompt. Status lines go to
    /// the log lane.
    fn classify(&mut self, candidate: &mut Candidate) -> Result<Step, ConflictError> {
        let rel = self.relative(candidate.path());
        let policy = self.policy;

        if let Some(verdict) = self.rules.as_ref().and_then(|r| r.lookup(&rel)) {
            tracing::debug!(path = %rel, verdict = %verdict, "resolve rule matched");
            let preset = self.dry(verdict.disposition());
            self.settle(candidate, &rel, preset);
            return Ok(Step::Settled);
        }

        let disk = DiskState::read(candidate.path()).map_err(|source| ConflictError::Io {
            path: candidate.path().to_path_buf(),
            source,
        })?;

        if disk == DiskState::Absent {
            if candidate.contents().is_none() {
                self.settle(candidate, &rel, Disposition::Identical);
                return Ok(Step::Settled);
            }
            if policy.bail && policy.bail_on_create {
                self.lane(LogLevel::Error, format!("Aborting: {rel} does not exist yet"));
                return Err(ConflictError::AbortedByConflict { path: rel });
            }
            if policy.dry_run {
                self.lane(LogLevel::Create, rel.clone());
                candidate.settle(Disposition::Skip);
            } else {
                self.settle(candidate, &rel, Disposition::Create);
            }
            return Ok(Step::Settled);
        }

        if policy.force || self.force.is_forced(candidate.scope()) {
            let forced = self.dry(Disposition::Force);
            self.settle(candidate, &rel, forced);
            return Ok(Step::Settled);
        }

        match detect(candidate, &disk, policy.ignore_whitespace) {
            None => {
                let verdict = if policy.regenerate {
                    self.dry(Disposition::Force)
                } else {
                    Disposition::Identical
                };
                self.settle(candidate, &rel, verdict);
                Ok(Step::Settled)
            }
            Some(kind) => Ok(Step::Conflict { disk, kind }),
        }
    }

    /// Prompting half, for one conflicting candidate.
    fn resolve(&mut self, candidate: &mut Candidate, mut disk: DiskState, mut kind: ConflictKind) -> Result<(), ConflictError> {
        let rel = self.relative(candidate.path());
        self.adapter.log(LogLevel::Conflict, &rel);
        tracing::info!(path = %rel, kind = %kind, "conflict detected");

        if self.policy.bail {
            self.show_diff(&rel, candidate, &disk, kind);
            self.adapter.log(LogLevel::Error, &format!("Aborting: {rel} conflicts ({kind})"));
            return Err(ConflictError::AbortedByConflict { path: rel });
        }
        if self.policy.dry_run {
            self.show_diff(&rel, candidate, &disk, kind);
            self.settle(candidate, &rel, Disposition::Skip);
            self.flush_logs();
            return Ok(());
        }

        for round in 1..=MAX_PROMPT_ROUNDS {
            let question = self.question(&rel, kind, round);
            let answer = self.adapter.prompt(&question)?;
            tracing::debug!(path = %rel, round, answer = %answer, "conflict answer");

            let verdict = match Answer::from_value(&answer) {
                Answer::Abort => {
                    self.adapter.log(LogLevel::Error, &format!("Aborting: stopped at {rel}"));
                    return Err(ConflictError::AbortedByUser { path: rel });
                }
                Answer::Write => Some(Disposition::Force),
                Answer::Force => {
                    self.force.force_remaining(candidate.scope());
                    Some(Disposition::Force)
                }
                Answer::Skip => Some(Disposition::Skip),
                Answer::Diff => {
                    self.show_diff(&rel, candidate, &disk, kind);
                    None
                }
                Answer::Reload => {
                    disk = DiskState::read(candidate.path()).map_err(|source| ConflictError::Io {
                        path: candidate.path().to_path_buf(),
                        source,
                    })?;
                    if disk == DiskState::Absent {
                        Some(if candidate.contents().is_some() {
                            Disposition::Create
                        } else {
                            Disposition::Identical
                        })
                    } else {
                        match detect(candidate, &disk, self.policy.ignore_whitespace) {
                            None => Some(Disposition::Identical),
                            Some(next) => {
                                kind = next;
                                None
                            }
                        }
                    }
                }
                Answer::Edit => {
                    let current = candidate.contents().unwrap_or_default().to_vec();
                    let edited = self.adapter.edit(Path::new(&rel), &current)?;
                    candidate.replace_contents(edited);
                    match detect(candidate, &disk, self.policy.ignore_whitespace) {
                        None => Some(Disposition::Skip),
                        Some(next) => {
                            kind = next;
                            None
                        }
                    }
                }
                Answer::Ignore => match self.rules.as_mut() {
                    Some(rules) => {
                        rules.remember(&rel)?;
                        Some(Disposition::Skip)
                    }
                    None => None,
                },
                Answer::Custom(value) => match self.actions.iter_mut().find(|a| a.value == value) {
                    Some(action) => (action.handler)(&*candidate),
                    None => {
                        tracing::warn!(path = %rel, answer = %value, "unknown conflict answer");
                        None
                    }
                },
            };

            if let Some(verdict) = verdict {
                self.settle(candidate, &rel, verdict);
                self.flush_logs();
                return Ok(());
            }
        }

        Err(ConflictError::RecursionExceeded {
            path: rel,
            limit: MAX_PROMPT_ROUNDS,
        })
    }

    fn question(&self, rel: &str, kind: ConflictKind, round: u32) -> ConflictQuestion {
        let mut choices = vec![
            Choice::new('y', "overwrite", "write"),
            Choice::new('n', "do not overwrite", "skip"),
            Choice::new('a', "overwrite this and all others", "force"),
            Choice::new('r', "reload file (experimental)", "reload"),
            Choice::new('x', "abort", "abort"),
            Choice::new('d', "show the differences between the old and the new", "diff"),
            Choice::new('e', "edit file (experimental)", "edit"),
        ];
        if self.rules.is_some() {
            choices.push(Choice::new('i', "ignore, do not overwrite and remember", "ignore"));
        }
        choices.extend(
            self.actions
                .iter()
                .map(|a| Choice::new(a.key, a.name.clone(), a.value.clone())),
        );
        ConflictQuestion {
            path: rel.to_owned(),
            kind,
            round,
            choices,
        }
    }

    fn show_diff(&mut self, rel: &str, candidate: &Candidate, disk: &DiskState, kind: ConflictKind) {
        if let ConflictKind::Directory | ConflictKind::Mode { .. } = kind {
            self.adapter.log(LogLevel::Info, &format!("{rel}: {kind}"));
            return;
        }
        let before = disk.bytes();
        let after = candidate.contents();
        if kind == ConflictKind::Binary || candidate.is_binary() || before.is_some_and(looks_binary) {
            let summary = render_binary_summary(rel, before.map(<[u8]>::len), after.map(<[u8]>::len));
            self.adapter.log(LogLevel::Info, &summary);
        } else {
            let before = String::from_utf8_lossy(before.unwrap_or_default());
            let after = String::from_utf8_lossy(after.unwrap_or_default());
            self.adapter.diff(rel, &before, &after);
        }
    }

    const fn dry(&self, verdict: Disposition) -> Disposition {
        if self.policy.dry_run && verdict.writes() {
            Disposition::Skip
        } else {
            verdict
        }
    }

    /// Record `verdict` and queue its status line.
    fn settle(&mut self, candidate: &mut Candidate, rel: &str, verdict: Disposition) {
        let verdict = candidate.settle(verdict);
        let level = match verdict {
            Disposition::Create => LogLevel::Create,
            Disposition::Identical => LogLevel::Identical,
            Disposition::Skip => LogLevel::Skip,
            Disposition::Force => LogLevel::Force,
        };
        tracing::debug!(path = rel, disposition = %verdict, "candidate settled");
        self.lane(level, rel.to_owned());
    }

    fn lane(&mut self, level: LogLevel, message: String) {
        self.log_lane.push_back((level, message));
    }

    fn flush_logs(&mut self) {
        while let Some((level, message)) = self.log_lane.pop_front() {
            self.adapter.log(level, &message);
        }
    }
}

impl fmt::Debug for Conflicter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Conflicter")
            .field("root", &self.root)
            .field("policy", &self.policy)
            .field("force", &self.force)
            .field("actions", &self.actions)
            .finish_non_exhaustive()
    }
}


// ---------------------------------------------------------------------------
// Property tests
// ---------------------------------------------------------------------------
