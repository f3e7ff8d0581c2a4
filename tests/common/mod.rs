//! Shared test helpers for scaffold integration tests.
//!
//! All tests write into temp directories, never the real tree. Each test
//! builds its own [`Environment`] over a fresh destination via [`run_env`].

#![allow(dead_code)]

use std::cell::RefCell;
use std::path::Path;
use std::rc::Rc;

use scaffold::conflict::Transcript;
use scaffold::{AnswerTable, Environment, Generator, RunConfig, Task, TaskContext, Uniqueness};
use tempfile::TempDir;

/// Fresh, empty destination directory.
pub fn dest() -> TempDir {
    TempDir::new().expect("failed to create temp dir")
}

/// Put `contents` at `rel` under `root`, creating parents.
pub fn seed(root: &Path, rel: &str, contents: &str) {
    let path = root.join(rel);
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).expect("failed to create parent");
    }
    std::fs::write(path, contents).expect("failed to seed file");
}

/// Contents of `rel` under `root`, if it exists.
pub fn read(root: &Path, rel: &str) -> Option<String> {
    std::fs::read_to_string(root.join(rel)).ok()
}

/// Environment over `root` with `config`, answering prompts from `table`.
/// The returned transcript records every prompt and log line.
pub fn run_env(root: &Path, config: RunConfig, table: AnswerTable) -> (Environment, Transcript) {
    let transcript = table.transcript();
    let env = Environment::new(root, config, Box::new(table)).expect("environment should build");
    (env, transcript)
}

/// One step a [`Scripted`] generator takes.
#[derive(Clone, Debug)]
pub enum Op {
    /// Stage a write.
    Write(String, String),
    /// Stage a removal.
    Delete(String),
    /// Record a marker in the shared trace.
    Mark(String),
    /// Pause the run after this task.
    Pause,
}

/// Shared, ordered record of what scripted generators did.
pub type Trace = Rc<RefCell<Vec<String>>>;

/// Generator driven by a list of `(stage, ops)` tasks.
pub struct Scripted {
    namespace: String,
    uniqueness: Uniqueness,
    tasks: Vec<(String, Vec<Op>)>,
    trace: Trace,
}

impl Scripted {
    pub fn new(namespace: &str, trace: &Trace) -> Self {
        Self {
            namespace: namespace.to_owned(),
            uniqueness: Uniqueness::None,
            tasks: Vec::new(),
            trace: Rc::clone(trace),
        }
    }

    /// Add a task in `stage` running `ops`.
    pub fn task(mut self, stage: &str, ops: Vec<Op>) -> Self {
        self.tasks.push((stage.to_owned(), ops));
        self
    }

    /// Add a `writing` task that writes each `(path, contents)` pair.
    pub fn writes(self, files: &[(&str, &str)]) -> Self {
        let ops = files
            .iter()
            .map(|(p, c)| Op::Write((*p).to_owned(), (*c).to_owned()))
            .collect();
        self.task("writing", ops)
    }

    pub fn unique(mut self, uniqueness: Uniqueness) -> Self {
        self.uniqueness = uniqueness;
        self
    }
}

impl Generator for Scripted {
    fn namespace(&self) -> &str {
        &self.namespace
    }

    fn uniqueness(&self) -> Uniqueness {
        self.uniqueness
    }

    fn tasks(&self) -> Vec<Task> {
        self.tasks
            .iter()
            .enumerate()
            .map(|(idx, (stage, _))| Task::new(format!("task{idx}"), stage.as_str()))
            .collect()
    }

    fn run_task(&mut self, task: &str, cx: &mut TaskContext<'_>) -> anyhow::Result<()> {
        let idx: usize = task.trim_start_matches("task").parse()?;
        let ops = self.tasks.get(idx).map(|(_, ops)| ops.clone()).unwrap_or_default();
        for op in ops {
            match op {
                Op::Write(path, contents) => cx.write(&path, contents)?,
                Op::Delete(path) => cx.delete(&path)?,
                Op::Mark(mark) => self.trace.borrow_mut().push(format!("{}:{mark}", self.namespace)),
                Op::Pause => cx.pause(),
            }
        }
        Ok(())
    }
}
