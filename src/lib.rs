//! scaffold library crate.
//!
//! Runs scaffolding generators through a staged job pipeline and writes the
//! files they produce only after each one has been checked against what is
//! already on disk.
//!
//! - [`queue`]: the staged queue group that orders every job.
//! - [`conflict`]: the engine that decides create, identical, skip or force
//!   for each file, prompting through an [`Adapter`] when it must.
//! - [`env`]: the run coordinator that composes generators and commits
//!   their files.
//!
//! ```no_run
//! use scaffold::{AnswerTable, ComposeOptions, Environment, Generator, Task, TaskContext};
//!
//! struct Readme;
//!
//! impl Generator for Readme {
//!     fn namespace(&self) -> &str {
//!         "readme"
//!     }
//!
//!     fn tasks(&self) -> Vec<Task> {
//!         vec![Task::new("write", "writing")]
//!     }
//!
//!     fn run_task(&mut self, _task: &str, cx: &mut TaskContext<'_>) -> anyhow::Result<()> {
//!         cx.write("README.md", "# hello\n")
//!     }
//! }
//!
//! # fn main() -> Result<(), scaffold::ScaffoldError> {
//! let mut env = Environment::load("/tmp/project", Box::new(AnswerTable::new()))?;
//! env.compose_with(Readme, ComposeOptions::default())?;
//! env.start()?;
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod conflict;
pub mod env;
pub mod error;
pub mod materialize;
pub mod queue;
pub mod telemetry;
pub mod vfs;

pub use config::{ConfigError, RunConfig};
pub use conflict::{
    Adapter, AnswerTable, Candidate, ConflictError, Conflicter, CustomAction, Disposition, LogLevel,
    ResolutionPolicy, TerminalAdapter,
};
pub use env::{
    ComposeEvent, ComposeOptions, Environment, Generator, GeneratorHandle, Installer, RunReport, RunState,
    Task, TaskContext, Uniqueness,
};
pub use error::{JobError, LateWrite, ScaffoldError};
pub use queue::{DEFAULT_STAGES, Job, JobContext, QueueError, QueueGroup, RunStatus};
