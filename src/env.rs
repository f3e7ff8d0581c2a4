//! Run coordinator.
//!
//! An [`Environment`] owns one scaffolding run: the [`QueueGroup`] that
//! orders the work, the [`MemFs`] generators write into, and the
//! [`Conflicter`] that approves every file before it reaches the disk.
//!
//! Generators are composed into the run. Composition is idempotent per
//! unique key, so two callers composing the same sub-generator share one
//! instance. A composed generator's tasks are queued into the stages they
//! name; scheduled compositions defer that to a job in the compose stage.
//!
//! Two run-once jobs close every run: the commit job in the commit stage,
//! which settles every pending file as one batch and writes them in path
//! order, and the install job in the install stage. Once the commit job ran,
//! generators can no longer stage files.

use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};

use serde::Serialize;

use crate::config::RunConfig;
use crate::conflict::adapter::{Adapter, LogLevel};
use crate::conflict::candidate::Disposition;
use crate::conflict::policy::ForceScope;
use crate::conflict::resolver::{Conflicter, CustomAction};
use crate::conflict::rules::ResolveRules;
use crate::error::{JobError, LateWrite, ScaffoldError};
use crate::materialize::{WriteAction, materialize};
use crate::queue::{Job, JobContext, JobFailure, JobResult, QueueError, QueueGroup, Registration, RunStatus};
use crate::vfs::{MemFs, WriteOptions};

/// Run-once key and job id of the commit job.
pub const COMMIT_JOB: &str = "scaffold:commit";

/// Run-once key and job id of the install job.
pub const INSTALL_JOB: &str = "scaffold:install";

// ---------------------------------------------------------------------------
// Generator
// ---------------------------------------------------------------------------

/// How composition deduplicates a generator.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Uniqueness {
    /// Every composition creates a new instance.
    #[default]
    None,
    /// One instance per run, keyed by namespace.
    Global,
    /// One instance per destination directory, keyed by namespace and
    /// destination.
    PerDirectory,
}

/// One unit of a generator's work, run as a job in `stage`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Task {
    /// Task name, passed back to [`Generator::run_task`].
    pub name: String,
    /// Stage the task runs in.
    pub stage: String,
    /// Queue the task at most once per run, however often it is registered.
    pub run_once: bool,
}

impl Task {
    /// A task named `name` running in `stage`.
    pub fn new(name: impl Into<String>, stage: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            stage: stage.into(),
            run_once: false,
        }
    }

    /// Mark the task run-once.
    #[must_use]
    pub const fn once(mut self) -> Self {
        self.run_once = true;
        self
    }
}

/// A unit of scaffolding work.
pub trait Generator {
    /// Stable name, used for dedup keys, job ids and compose events.
    fn namespace(&self) -> &str;

    /// Dedup behavior for [`Environment::compose_with`].
    fn uniqueness(&self) -> Uniqueness {
        Uniqueness::None
    }

    /// Tasks to queue, in order.
    fn tasks(&self) -> Vec<Task>;

    /// Run the task named `task`.
    ///
    /// # Errors
    /// Any error stops the whole run.
    fn run_task(&mut self, task: &str, cx: &mut TaskContext<'_>) -> anyhow::Result<()>;
}

/// Runs the package-manager step once the files are on disk.
pub trait Installer {
    /// Install dependencies for `root`; `written` lists the files the run
    /// wrote, destination-relative.
    ///
    /// # Errors
    /// Any error stops the run.
    fn install(&mut self, root: &Path, written: &[String]) -> anyhow::Result<()>;
}

impl<F> Installer for F
where
    F: FnMut(&Path, &[String]) -> anyhow::Result<()>,
{
    fn install(&mut self, root: &Path, written: &[String]) -> anyhow::Result<()> {
        self(root, written)
    }
}

// ---------------------------------------------------------------------------
// Composition
// ---------------------------------------------------------------------------

/// Options for composing a generator.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ComposeOptions {
    /// Queue the generator's tasks from a job in the compose stage instead
    /// of right away.
    pub schedule: bool,
    /// Destination directory, relative to the run root.
    pub destination: Option<PathBuf>,
    /// Give the generator its own "overwrite all" switch.
    pub isolate_force: bool,
}

impl Default for ComposeOptions {
    fn default() -> Self {
        Self {
            schedule: true,
            destination: None,
            isolate_force: false,
        }
    }
}

impl ComposeOptions {
    /// Queue tasks right away.
    #[must_use]
    pub const fn immediate(mut self) -> Self {
        self.schedule = false;
        self
    }

    /// Write under `dir` (relative to the run root).
    #[must_use]
    pub fn at(mut self, dir: impl Into<PathBuf>) -> Self {
        self.destination = Some(dir.into());
        self
    }

    /// Isolate the generator's force-all switch.
    #[must_use]
    pub const fn isolated(mut self) -> Self {
        self.isolate_force = true;
        self
    }
}

/// Handle on a composed generator.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct GeneratorHandle(usize);

impl GeneratorHandle {
    /// Index in composition order.
    #[must_use]
    pub const fn index(self) -> usize {
        self.0
    }
}

impl fmt::Display for GeneratorHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Sent to compose observers when a new generator joins the run.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ComposeEvent {
    /// The new generator.
    pub handle: GeneratorHandle,
    /// Its namespace.
    pub namespace: String,
    /// Its dedup key, if it has one.
    pub key: Option<String>,
}

type ComposeObserver = Box<dyn FnMut(&ComposeEvent)>;

struct Slot {
    namespace: String,
    key: Option<String>,
    destination: PathBuf,
    scope: Option<ForceScope>,
    generator: Option<Box<dyn Generator>>,
}

// ---------------------------------------------------------------------------
// RunReport
// ---------------------------------------------------------------------------

/// One committed file.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct FileReport {
    /// Destination-relative path.
    pub path: String,
    /// Final verdict.
    pub disposition: Disposition,
    /// What happened on disk.
    pub action: WriteAction,
}

/// One composed generator.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct ComposedReport {
    /// Its handle.
    pub handle: GeneratorHandle,
    /// Its namespace.
    pub namespace: String,
    /// Its dedup key.
    pub key: Option<String>,
    /// Its destination, relative to the run root.
    pub destination: String,
}

/// Summary of a run, serializable to JSON.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct RunReport {
    /// Where the queue group stopped, if it ran.
    pub status: Option<String>,
    /// Stages that ran at least one job, in order.
    pub stages: Vec<String>,
    /// Job bodies executed.
    pub jobs_run: usize,
    /// Generators in composition order.
    pub composed: Vec<ComposedReport>,
    /// Committed files in commit order.
    pub files: Vec<FileReport>,
    /// Files still waiting for a commit.
    pub pending: usize,
}

impl RunReport {
    /// Pretty JSON rendering.
    ///
    /// # Errors
    /// Propagates serializer errors.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }

    /// Files with a given verdict.
    pub fn with_disposition(&self, disposition: Disposition) -> impl Iterator<Item = &FileReport> {
        self.files.iter().filter(move |f| f.disposition == disposition)
    }
}

// ---------------------------------------------------------------------------
// RunState
// ---------------------------------------------------------------------------

/// Everything jobs of a run share.
pub struct RunState {
    config: RunConfig,
    fs: MemFs,
    conflicter: Conflicter,
    slots: Vec<Slot>,
    unique: HashMap<String, GeneratorHandle>,
    observers: Vec<ComposeObserver>,
    keyed_observers: HashMap<String, Vec<ComposeObserver>>,
    installer: Option<Box<dyn Installer>>,
    files: Vec<FileReport>,
    next_scope: u32,
    committed: bool,
}

impl RunState {
    /// The run's file system.
    #[must_use]
    pub const fn fs(&self) -> &MemFs {
        &self.fs
    }

    /// Mutable access to the run's file system.
    pub const fn fs_mut(&mut self) -> &mut MemFs {
        &mut self.fs
    }

    /// Destination root.
    #[must_use]
    pub fn root(&self) -> &Path {
        self.fs.root()
    }

    /// The run configuration.
    #[must_use]
    pub const fn config(&self) -> &RunConfig {
        &self.config
    }

    /// Emit a user-visible line.
    pub fn log(&mut self, level: LogLevel, message: &str) {
        self.conflicter.log(level, message);
    }

    fn unique_key(namespace: &str, uniqueness: Uniqueness, destination: &Path) -> Option<String> {
        match uniqueness {
            Uniqueness::None => None,
            Uniqueness::Global => Some(namespace.to_owned()),
            Uniqueness::PerDirectory => Some(format!(
                "{namespace}@{}",
                destination.to_string_lossy().replace('\\', "/")
            )),
        }
    }

    fn emit(&mut self, event: &ComposeEvent) {
        for observer in &mut self.observers {
            observer(event);
        }
        let mut keys = vec![event.namespace.as_str()];
        if let Some(key) = event.key.as_deref()
            && key != event.namespace
        {
            keys.push(key);
        }
        for key in keys {
            if let Some(observers) = self.keyed_observers.get_mut(key) {
                for observer in observers {
                    observer(event);
                }
            }
        }
    }

    /// Settle every pending file as one batch, then write them in path
    /// order.
    ///
    /// When the batch stops early, files settled ahead of the first
    /// unsettled one are still written before the error is returned.
    fn commit(&mut self) -> JobResult {
        self.committed = true;
        let (paths, mut candidates): (Vec<PathBuf>, Vec<_>) = self
            .fs
            .pending()
            .into_iter()
            .filter_map(|rel| self.fs.candidate(&rel).map(|c| (rel, c)))
            .unzip();
        tracing::info!(files = candidates.len(), "committing pending files");

        let checked = self.conflicter.check_all(&mut candidates);
        for (rel, candidate) in paths.iter().zip(&candidates) {
            let Some(disposition) = candidate.disposition() else {
                break;
            };
            let action = materialize(candidate, disposition)?;
            self.fs.mark_committed(rel, disposition);
            self.files.push(FileReport {
                path: rel_string(rel),
                disposition,
                action,
            });
        }
        checked?;
        Ok(())
    }

    fn install(&mut self) -> JobResult {
        if self.conflicter.policy().dry_run {
            self.log(LogLevel::Info, "Skipping install (dry run)");
            return Ok(());
        }
        let Some(mut installer) = self.installer.take() else {
            return Ok(());
        };
        let written: Vec<String> = self
            .files
            .iter()
            .filter(|f| f.action == WriteAction::Written)
            .map(|f| f.path.clone())
            .collect();
        self.log(LogLevel::Info, "Running install");
        tracing::info!(files = written.len(), "running installer");
        let result = installer.install(self.fs.root(), &written);
        self.installer = Some(installer);
        result.map_err(JobError::Task)
    }
}

fn rel_string(rel: &Path) -> String {
    rel.to_string_lossy().replace('\\', "/")
}

impl fmt::Debug for RunState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RunState")
            .field("root", &self.fs.root())
            .field("generators", &self.slots.len())
            .field("pending", &self.fs.pending_count())
            .field("files", &self.files.len())
            .finish_non_exhaustive()
    }
}

/// Register `generator`, or return the instance already registered under
/// its unique key.
///
/// Nothing is registered unless every stage the composition queues into
/// still accepts work. A generator composed without its own force switch
/// shares `inherited`, the switch of whoever composed it.
fn compose(
    state: &mut RunState,
    queues: &mut QueueGroup<RunState>,
    generator: Box<dyn Generator>,
    options: ComposeOptions,
    inherited: Option<ForceScope>,
) -> Result<GeneratorHandle, QueueError> {
    let namespace = generator.namespace().to_owned();
    let destination = options.destination.clone().unwrap_or_default();
    let key = RunState::unique_key(&namespace, generator.uniqueness(), &destination);

    if let Some(key) = &key
        && let Some(&existing) = state.unique.get(key)
    {
        tracing::debug!(%namespace, key = %key, handle = %existing, "generator already composed");
        return Ok(existing);
    }

    let scheduled_in = if options.schedule {
        let compose_stage = state.config.pipeline.compose_stage.clone();
        let stage = if queues.accepts(&compose_stage) {
            compose_stage
        } else {
            queues.current_stage().unwrap_or(&compose_stage).to_owned()
        };
        queues.check_stage(&stage)?;
        Some(stage)
    } else {
        for task in generator.tasks() {
            queues.check_stage(&task.stage)?;
        }
        None
    };

    let scope = if options.isolate_force {
        state.next_scope += 1;
        Some(ForceScope(state.next_scope))
    } else {
        inherited
    };
    let handle = GeneratorHandle(state.slots.len());
    state.slots.push(Slot {
        namespace: namespace.clone(),
        key: key.clone(),
        destination,
        scope,
        generator: Some(generator),
    });
    if let Some(key) = &key {
        state.unique.insert(key.clone(), handle);
    }
    tracing::info!(%namespace, %handle, schedule = options.schedule, "generator composed");

    if let Some(stage) = scheduled_in {
        let job = Job::new(format!("{namespace}:queue-tasks"), move |cx: &mut JobContext<'_, RunState>| {
            let (state, queues) = cx.parts();
            queue_tasks(state, queues, handle).map_err(JobError::from)
        });
        queues.add_job(&stage, job)?;
    } else {
        queue_tasks(state, queues, handle)?;
    }

    state.emit(&ComposeEvent {
        handle,
        namespace,
        key,
    });
    Ok(handle)
}

fn queue_tasks(
    state: &mut RunState,
    queues: &mut QueueGroup<RunState>,
    handle: GeneratorHandle,
) -> Result<(), QueueError> {
    let Some(slot) = state.slots.get(handle.0) else {
        return Ok(());
    };
    let Some(generator) = slot.generator.as_ref() else {
        return Ok(());
    };
    let namespace = slot.namespace.clone();
    for task in generator.tasks() {
        let id = format!("{namespace}:{}", task.name);
        let name = task.name;
        let mut job = Job::new(id.clone(), move |cx: &mut JobContext<'_, RunState>| {
            run_task(cx, handle, &name)
        });
        if task.run_once {
            job = job.run_once(id);
        }
        queues.add_job(&task.stage, job)?;
    }
    Ok(())
}

fn run_task(cx: &mut JobContext<'_, RunState>, handle: GeneratorHandle, name: &str) -> JobResult {
    let stage = cx.stage().to_owned();
    let (state, queues) = cx.parts();
    let mut generator = state
        .slots
        .get_mut(handle.0)
        .and_then(|slot| slot.generator.take())
        .ok_or_else(|| JobError::Task(anyhow::anyhow!("generator {handle} is already running")))?;

    let result = {
        let mut tcx = TaskContext {
            state: &mut *state,
            queues: &mut *queues,
            handle,
            stage,
        };
        generator.run_task(name, &mut tcx)
    };
    if let Some(slot) = state.slots.get_mut(handle.0) {
        slot.generator = Some(generator);
    }

    result.map_err(|e| {
        let e = match e.downcast::<QueueError>() {
            Ok(queue) => return JobError::Queue(queue),
            Err(e) => e,
        };
        match e.downcast::<LateWrite>() {
            Ok(late) => JobError::LateWrite(late),
            Err(e) => JobError::Task(e),
        }
    })
}

fn commit_job() -> Job<RunState> {
    Job::new(COMMIT_JOB, |cx: &mut JobContext<'_, RunState>| cx.state.commit()).run_once(COMMIT_JOB)
}

fn install_job() -> Job<RunState> {
    Job::new(INSTALL_JOB, |cx: &mut JobContext<'_, RunState>| cx.state.install()).run_once(INSTALL_JOB)
}

// ---------------------------------------------------------------------------
// TaskContext
// ---------------------------------------------------------------------------

/// What a generator task can do while it runs.
///
/// Paths are relative to the generator's destination directory.
pub struct TaskContext<'a> {
    state: &'a mut RunState,
    queues: &'a mut QueueGroup<RunState>,
    handle: GeneratorHandle,
    stage: String,
}

impl TaskContext<'_> {
    /// The running generator.
    #[must_use]
    pub const fn handle(&self) -> GeneratorHandle {
        self.handle
    }

    /// Stage this task runs in.
    #[must_use]
    pub fn stage(&self) -> &str {
        &self.stage
    }

    fn slot(&self) -> Option<&Slot> {
        self.state.slots.get(self.handle.0)
    }

    /// Destination directory, relative to the run root.
    #[must_use]
    pub fn destination(&self) -> &Path {
        self.slot().map_or(Path::new(""), |s| s.destination.as_path())
    }

    fn target(&self, path: &Path) -> PathBuf {
        self.destination().join(path)
    }

    fn ensure_open(&self, target: &Path) -> Result<(), LateWrite> {
        if self.state.committed {
            return Err(LateWrite {
                path: rel_string(target),
                commit_stage: self.state.config.pipeline.commit_stage.clone(),
            });
        }
        Ok(())
    }

    fn options(&self, mode: Option<u32>) -> WriteOptions {
        WriteOptions {
            mode,
            scope: self.slot().and_then(|s| s.scope),
        }
    }

    /// Stage a file write.
    ///
    /// # Errors
    /// Paths that leave the destination root, and [`LateWrite`] once the
    /// commit job ran.
    pub fn write(&mut self, path: impl AsRef<Path>, contents: impl Into<Vec<u8>>) -> anyhow::Result<()> {
        let target = self.target(path.as_ref());
        self.ensure_open(&target)?;
        let options = self.options(None);
        self.state.fs.write_with(target, contents, options)?;
        Ok(())
    }

    /// Stage a file write with permission bits.
    ///
    /// # Errors
    /// As [`write`](Self::write).
    pub fn write_mode(
        &mut self,
        path: impl AsRef<Path>,
        contents: impl Into<Vec<u8>>,
        mode: u32,
    ) -> anyhow::Result<()> {
        let target = self.target(path.as_ref());
        self.ensure_open(&target)?;
        let options = self.options(Some(mode));
        self.state.fs.write_with(target, contents, options)?;
        Ok(())
    }

    /// Stage a file removal.
    ///
    /// # Errors
    /// As [`write`](Self::write).
    pub fn delete(&mut self, path: impl AsRef<Path>) -> anyhow::Result<()> {
        let target = self.target(path.as_ref());
        self.ensure_open(&target)?;
        let options = self.options(None);
        self.state.fs.delete_with(target, options)?;
        Ok(())
    }

    /// Read through the staged view.
    ///
    /// # Errors
    /// Invalid paths, unreadable files or non-UTF-8 content.
    pub fn read(&self, path: impl AsRef<Path>) -> anyhow::Result<Option<String>> {
        Ok(self.state.fs.read_string(self.target(path.as_ref()))?)
    }

    /// Whether `path` exists in the staged view.
    ///
    /// # Errors
    /// Invalid or unreadable paths.
    pub fn exists(&self, path: impl AsRef<Path>) -> anyhow::Result<bool> {
        Ok(self.state.fs.exists(self.target(path.as_ref()))?)
    }

    /// Compose another generator into the run. Unless it is isolated, the
    /// child shares this generator's force-all switch.
    ///
    /// # Errors
    /// [`QueueError`] when its tasks target stages that already ran.
    pub fn compose_with(
        &mut self,
        generator: Box<dyn Generator>,
        options: ComposeOptions,
    ) -> anyhow::Result<GeneratorHandle> {
        let inherited = self.slot().and_then(|s| s.scope);
        Ok(compose(self.state, self.queues, generator, options, inherited)?)
    }

    /// Queue an arbitrary job.
    ///
    /// # Errors
    /// See [`QueueGroup::add_job`].
    pub fn add_job(&mut self, stage: &str, job: Job<RunState>) -> anyhow::Result<Registration> {
        Ok(self.queues.add_job(stage, job)?)
    }

    /// Make sure the commit job is queued. Safe to call any number of times.
    ///
    /// # Errors
    /// When the commit stage already ran.
    pub fn schedule_commit(&mut self) -> anyhow::Result<Registration> {
        let stage = self.state.config.pipeline.commit_stage.clone();
        Ok(self.queues.add_job(&stage, commit_job())?)
    }

    /// Pause the run once this task returns.
    pub fn pause(&mut self) {
        self.queues.pause();
    }

    /// Emit a user-visible line.
    pub fn log(&mut self, level: LogLevel, message: &str) {
        self.state.log(level, message);
    }
}

// ---------------------------------------------------------------------------
// Environment
// ---------------------------------------------------------------------------

/// One scaffolding run.
pub struct Environment {
    queues: QueueGroup<RunState>,
    state: RunState,
    finals_queued: bool,
    last_status: Option<RunStatus>,
}

impl Environment {
    /// Load `<root>/.scaffold/config.toml` and build a run.
    ///
    /// # Errors
    /// See [`Environment::new`].
    pub fn load(root: impl Into<PathBuf>, adapter: Box<dyn Adapter>) -> Result<Self, ScaffoldError> {
        let root = root.into();
        let config = RunConfig::load_for(&root)?;
        Self::new(root, config, adapter)
    }

    /// Build a run writing under `root`.
    ///
    /// # Errors
    /// Inconsistent configuration, contradictory policy or an unreadable
    /// rule file.
    pub fn new(root: impl Into<PathBuf>, config: RunConfig, adapter: Box<dyn Adapter>) -> Result<Self, ScaffoldError> {
        let root = root.into();
        config.validate()?;
        let policy = config.policy()?;
        let queues = QueueGroup::new(&config.pipeline.stages)?;

        let mut conflicter = Conflicter::new(&root, policy, adapter);
        if !config.conflicts.resolve_file.is_empty() {
            let rules = ResolveRules::load(config.resolve_file(&root))?;
            conflicter = conflicter.with_rules(rules);
        }
        tracing::debug!(root = %root.display(), ?policy, "environment created");

        Ok(Self {
            queues,
            state: RunState {
                config,
                fs: MemFs::new(root),
                conflicter,
                slots: Vec::new(),
                unique: HashMap::new(),
                observers: Vec::new(),
                keyed_observers: HashMap::new(),
                installer: None,
                files: Vec::new(),
                next_scope: 0,
                committed: false,
            },
            finals_queued: false,
            last_status: None,
        })
    }

    /// Run `installer` in the install stage.
    #[must_use]
    pub fn with_installer(mut self, installer: impl Installer + 'static) -> Self {
        self.state.installer = Some(Box::new(installer));
        self
    }

    /// Offer an extra choice at conflict prompts.
    #[must_use]
    pub fn with_action(mut self, action: CustomAction) -> Self {
        self.state.conflicter.add_action(action);
        self
    }

    /// Call `observer` for every newly composed generator.
    pub fn on_compose(&mut self, observer: impl FnMut(&ComposeEvent) + 'static) {
        self.state.observers.push(Box::new(observer));
    }

    /// Call `observer` when a generator is composed whose namespace or
    /// unique key equals `key`.
    pub fn on_compose_key(&mut self, key: &str, observer: impl FnMut(&ComposeEvent) + 'static) {
        self.state
            .keyed_observers
            .entry(key.to_owned())
            .or_default()
            .push(Box::new(observer));
    }

    /// Compose a generator into the run.
    ///
    /// # Errors
    /// [`ScaffoldError::Queue`] when its tasks cannot be queued.
    pub fn compose_with(
        &mut self,
        generator: impl Generator + 'static,
        options: ComposeOptions,
    ) -> Result<GeneratorHandle, ScaffoldError> {
        Ok(compose(&mut self.state, &mut self.queues, Box::new(generator), options, None)?)
    }

    /// Queue an arbitrary job.
    ///
    /// # Errors
    /// See [`QueueGroup::add_job`].
    pub fn add_job(&mut self, stage: &str, job: Job<RunState>) -> Result<Registration, ScaffoldError> {
        Ok(self.queues.add_job(stage, job)?)
    }

    /// Run the pipeline until it ends, pauses or fails.
    ///
    /// The commit and install jobs are queued on the first call. Calling
    /// again after the run ended does nothing.
    ///
    /// # Errors
    /// The first job failure, mapped to [`ScaffoldError`].
    /// [`ScaffoldError::Uncommitted`] when the run ended with staged files
    /// that never reached the commit job.
    pub fn start(&mut self) -> Result<RunStatus, ScaffoldError> {
        self.queue_finals()?;
        let result = self.queues.start(&mut self.state);
        self.settle(result)
    }

    /// Continue a paused run.
    ///
    /// # Errors
    /// The first job failure, mapped to [`ScaffoldError`].
    pub fn resume(&mut self) -> Result<RunStatus, ScaffoldError> {
        self.queue_finals()?;
        let result = self.queues.resume(&mut self.state);
        self.settle(result)
    }

    fn queue_finals(&mut self) -> Result<(), ScaffoldError> {
        if self.finals_queued {
            return Ok(());
        }
        let pipeline = &self.state.config.pipeline;
        let (commit_stage, install_stage) = (pipeline.commit_stage.clone(), pipeline.install_stage.clone());
        let skip_install = pipeline.skip_install;
        self.queues.add_job(&commit_stage, commit_job())?;
        if !skip_install && self.state.installer.is_some() {
            self.queues.add_job(&install_stage, install_job())?;
        }
        self.finals_queued = true;
        Ok(())
    }

    fn settle(&mut self, result: Result<RunStatus, JobFailure>) -> Result<RunStatus, ScaffoldError> {
        match result {
            Ok(status) => {
                self.last_status = Some(status);
                let pending = self.state.fs.pending();
                if status == RunStatus::Ended && !pending.is_empty() {
                    tracing::warn!(pending = pending.len(), "run ended with uncommitted files");
                    return Err(ScaffoldError::Uncommitted {
                        paths: pending.iter().map(|p| rel_string(p)).collect(),
                    });
                }
                Ok(status)
            }
            Err(failure) => {
                self.last_status = Some(RunStatus::Aborted);
                Err(failure.into())
            }
        }
    }

    /// The run's file system.
    #[must_use]
    pub const fn fs(&self) -> &MemFs {
        &self.state.fs
    }

    /// Mutable access to the run's file system.
    pub const fn fs_mut(&mut self) -> &mut MemFs {
        &mut self.state.fs
    }

    /// The queue group driving the run.
    #[must_use]
    pub const fn queues(&self) -> &QueueGroup<RunState> {
        &self.queues
    }

    /// Number of distinct generators composed.
    #[must_use]
    pub fn composed(&self) -> usize {
        self.state.slots.len()
    }

    /// Summary of the run so far.
    #[must_use]
    pub fn report(&self) -> RunReport {
        RunReport {
            status: self.last_status.map(|s| s.to_string()),
            stages: self
                .queues
                .visited_stages()
                .into_iter()
                .map(str::to_owned)
                .collect(),
            jobs_run: self.queues.jobs_run(),
            composed: self
                .state
                .slots
                .iter()
                .enumerate()
                .map(|(idx, slot)| ComposedReport {
                    handle: GeneratorHandle(idx),
                    namespace: slot.namespace.clone(),
                    key: slot.key.clone(),
                    destination: slot.destination.to_string_lossy().replace('\\', "/"),
                })
                .collect(),
            files: self.state.files.clone(),
            pending: self.state.fs.pending_count(),
        }
    }
}

impl fmt::Debug for Environment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Environment")
            .field("queues", &self.queues)
            .field("state", &self.state)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;
    use std::rc::Rc;

    use super::*;
    use crate::conflict::adapter::AnswerTable;

    type Trace = Rc<RefCell<Vec<String>>>;

    /// Writes one file per task and records every task it runs.
    struct Recorder {
        namespace: String,
        uniqueness: Uniqueness,
        tasks: Vec<Task>,
        trace: Trace,
    }

    impl Recorder {
        fn new(namespace: &str, trace: &Trace, tasks: &[(&str, &str)]) -> Self {
            Self {
                namespace: namespace.to_owned(),
                uniqueness: Uniqueness::None,
                tasks: tasks.iter().map(|(n, s)| Task::new(*n, *s)).collect(),
                trace: Rc::clone(trace),
            }
        }

        fn unique(mut self, uniqueness: Uniqueness) -> Self {
            self.uniqueness = uniqueness;
            self
        }
    }

    impl Generator for Recorder {
        fn namespace(&self) -> &str {
            &self.namespace
        }

        fn uniqueness(&self) -> Uniqueness {
            self.uniqueness
        }

        fn tasks(&self) -> Vec<Task> {
            self.tasks.clone()
        }

        fn run_task(&mut self, task: &str, cx: &mut TaskContext<'_>) -> anyhow::Result<()> {
            self.trace.borrow_mut().push(format!("{}:{task}", self.namespace));
            if cx.stage() == "writing" {
                cx.write(format!("{}-{task}.txt", self.namespace), task)?;
            }
            Ok(())
        }
    }

    fn env(root: &Path) -> Environment {
        Environment::new(root, RunConfig::default(), Box::new(AnswerTable::new())).unwrap()
    }

    #[test]
    fn unique_generators_are_composed_once() {
        let dir = tempfile::tempdir().unwrap();
        let trace = Trace::default();
        let mut env = env(dir.path());

        let a = env
            .compose_with(
                Recorder::new("app", &trace, &[("files", "writing")]).unique(Uniqueness::Global),
                ComposeOptions::default(),
            )
            .unwrap();
        let b = env
            .compose_with(
                Recorder::new("app", &trace, &[("files", "writing")]).unique(Uniqueness::Global),
                ComposeOptions::default(),
            )
            .unwrap();
        assert_eq!(a, b);
        assert_eq!(env.composed(), 1);

        assert_eq!(env.start().unwrap(), RunStatus::Ended);
        assert_eq!(*trace.borrow(), vec!["app:files"]);
    }

    #[test]
    fn per_directory_uniqueness_keys_on_destination() {
        let dir = tempfile::tempdir().unwrap();
        let trace = Trace::default();
        let mut env = env(dir.path());
        let gen_at = |d: &str| {
            (
                Recorder::new("lib", &trace, &[("files", "writing")]).unique(Uniqueness::PerDirectory),
                ComposeOptions::default().at(d),
            )
        };
        let (g, o) = gen_at("a");
        let first = env.compose_with(g, o).unwrap();
        let (g, o) = gen_at("b");
        let second = env.compose_with(g, o).unwrap();
        let (g, o) = gen_at("a");
        let again = env.compose_with(g, o).unwrap();
        assert_ne!(first, second);
        assert_eq!(first, again);

        env.start().unwrap();
        assert!(dir.path().join("a/lib-files.txt").exists());
        assert!(dir.path().join("b/lib-files.txt").exists());
        let report = env.report();
        assert_eq!(report.composed[0].key.as_deref(), Some("lib@a"));
    }

    #[test]
    fn compose_events_fire_once_per_new_generator() {
        let dir = tempfile::tempdir().unwrap();
        let trace = Trace::default();
        let seen = Rc::new(RefCell::new(Vec::new()));
        let keyed = Rc::new(RefCell::new(0));
        let mut env = env(dir.path());
        {
            let seen = Rc::clone(&seen);
            env.on_compose(move |e| seen.borrow_mut().push(e.namespace.clone()));
            let keyed = Rc::clone(&keyed);
            env.on_compose_key("child", move |_| *keyed.borrow_mut() += 1);
        }
        for ns in ["parent", "child", "child"] {
            env.compose_with(
                Recorder::new(ns, &trace, &[]).unique(Uniqueness::Global),
                ComposeOptions::default(),
            )
            .unwrap();
        }
        assert_eq!(*seen.borrow(), vec!["parent", "child"]);
        assert_eq!(*keyed.borrow(), 1);
    }

    /// Composes a child from its `initializing` task.
    struct Parent {
        trace: Trace,
        child_schedule: bool,
    }

    impl Generator for Parent {
        fn namespace(&self) -> &str {
            "parent"
        }

        fn tasks(&self) -> Vec<Task> {
            vec![Task::new("init", "initializing"), Task::new("files", "writing")]
        }

        fn run_task(&mut self, task: &str, cx: &mut TaskContext<'_>) -> anyhow::Result<()> {
            self.trace.borrow_mut().push(format!("parent:{task}"));
            if task == "init" {
                let child = Recorder::new("child", &self.trace, &[("setup", "configuring"), ("files", "writing")]);
                let options = ComposeOptions {
                    schedule: self.child_schedule,
                    ..ComposeOptions::default()
                };
                cx.compose_with(Box::new(child), options)?;
            } else {
                cx.write("parent.txt", "p")?;
            }
            Ok(())
        }
    }

    #[test]
    fn composed_children_keep_stage_order() {
        for schedule in [true, false] {
            let dir = tempfile::tempdir().unwrap();
            let trace = Trace::default();
            let mut env = env(dir.path());
            env.compose_with(
                Parent {
                    trace: Rc::clone(&trace),
                    child_schedule: schedule,
                },
                ComposeOptions::default(),
            )
            .unwrap();
            assert_eq!(env.start().unwrap(), RunStatus::Ended);
            assert_eq!(
                *trace.borrow(),
                vec!["parent:init", "child:setup", "parent:files", "child:files"],
                "schedule = {schedule}"
            );
            let report = env.report();
            assert_eq!(report.files.len(), 2);
            assert!(report.files.iter().all(|f| f.disposition == Disposition::Create));
            assert_eq!(report.stages, vec!["initializing", "configuring", "writing", "conflicts"]);
        }
    }

    /// Tries to queue work into a stage that already ran.
    struct Late;

    impl Generator for Late {
        fn namespace(&self) -> &str {
            "late"
        }

        fn tasks(&self) -> Vec<Task> {
            vec![Task::new("go", "writing")]
        }

        fn run_task(&mut self, _task: &str, cx: &mut TaskContext<'_>) -> anyhow::Result<()> {
            cx.add_job("configuring", Job::new("too-late", |_| Ok(())))?;
            Ok(())
        }
    }

    #[test]
    fn queueing_into_a_finished_stage_fails_the_run() {
        let dir = tempfile::tempdir().unwrap();
        let mut env = env(dir.path());
        env.compose_with(Late, ComposeOptions::default()).unwrap();
        let err = env.start().unwrap_err();
        assert!(matches!(
            err,
            ScaffoldError::Job {
                source: JobError::Queue(QueueError::StageCompleted { .. }),
                ..
            }
        ));
    }

    #[test]
    fn composing_into_finished_stages_registers_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let trace = Trace::default();
        let events = Rc::new(RefCell::new(0));
        let mut env = env(dir.path());
        {
            let events = Rc::clone(&events);
            env.on_compose(move |_| *events.borrow_mut() += 1);
        }
        assert_eq!(env.start().unwrap(), RunStatus::Ended);

        for options in [ComposeOptions::default(), ComposeOptions::default().immediate()] {
            for _ in 0..2 {
                let generator = Recorder::new("app", &trace, &[("files", "writing")]).unique(Uniqueness::Global);
                let err = env.compose_with(generator, options.clone()).unwrap_err();
                assert!(matches!(err, ScaffoldError::Queue(QueueError::StageCompleted { .. })), "{err}");
            }
        }
        assert_eq!(env.composed(), 0);
        assert!(env.report().composed.is_empty());
        assert_eq!(*events.borrow(), 0);
        assert!(trace.borrow().is_empty());
    }

    #[test]
    fn restart_after_end_does_not_commit_twice() {
        let dir = tempfile::tempdir().unwrap();
        let trace = Trace::default();
        let mut env = env(dir.path());
        env.compose_with(Recorder::new("app", &trace, &[("files", "writing")]), ComposeOptions::default())
            .unwrap();
        assert_eq!(env.start().unwrap(), RunStatus::Ended);
        let jobs = env.report().jobs_run;
        assert_eq!(env.start().unwrap(), RunStatus::Ended);
        assert_eq!(env.report().jobs_run, jobs);
        assert_eq!(env.report().files.len(), 1);
    }

    #[test]
    fn installer_runs_once_with_written_files() {
        let dir = tempfile::tempdir().unwrap();
        let trace = Trace::default();
        let calls = Rc::new(RefCell::new(Vec::new()));
        let sink = Rc::clone(&calls);
        let mut env = env(dir.path()).with_installer(move |_root: &Path, written: &[String]| -> anyhow::Result<()> {
            sink.borrow_mut().push(written.to_vec());
            Ok(())
        });
        env.compose_with(Recorder::new("app", &trace, &[("files", "writing")]), ComposeOptions::default())
            .unwrap();
        env.start().unwrap();
        assert_eq!(*calls.borrow(), vec![vec!["app-files.txt".to_owned()]]);
        assert!(env.report().stages.contains(&"install".to_owned()));
    }

    #[test]
    fn report_serializes_to_json() {
        let dir = tempfile::tempdir().unwrap();
        let trace = Trace::default();
        let mut env = env(dir.path());
        env.compose_with(Recorder::new("app", &trace, &[("files", "writing")]), ComposeOptions::default())
            .unwrap();
        env.start().unwrap();
        let json: serde_json::Value = serde_json::from_str(&env.report().to_json().unwrap()).unwrap();
        assert_eq!(json["status"], "ended");
        assert_eq!(json["files"][0]["path"], "app-files.txt");
        assert_eq!(json["files"][0]["disposition"], "create");
        assert_eq!(json["files"][0]["action"], "written");
    }

    #[test]
    fn contradictory_policy_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = RunConfig::default();
        config.conflicts.force = true;
        config.conflicts.bail = true;
        let err = Environment::new(dir.path(), config, Box::new(AnswerTable::new())).unwrap_err();
        assert!(matches!(err, ScaffoldError::Policy(_)));
    }
}
