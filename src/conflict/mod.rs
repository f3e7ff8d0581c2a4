//! Conflict engine: decides what happens to every file a run proposes.
//!
//! - [`policy`]: run-wide flags and force-all scopes.
//! - [`candidate`]: proposed writes and their dispositions.
//! - [`detect`]: comparison against the on-disk target.
//! - [`adapter`] / [`terminal`]: the user-interaction seam.
//! - [`rules`]: persisted per-path verdicts.
//! - [`resolver`]: the [`Conflicter`] tying it together.

pub mod adapter;
pub mod candidate;
pub mod detect;
pub mod policy;
pub mod resolver;
pub mod rules;
pub mod terminal;

pub use adapter::{Adapter, AdapterError, Answer, AnswerTable, Choice, ConflictQuestion, LogLevel, Transcript};
pub use candidate::{Candidate, Disposition};
pub use detect::{ConflictKind, DiskState};
pub use policy::{ForceScope, ForceState, PolicyError, ResolutionPolicy};
pub use resolver::{ConflictError, Conflicter, CustomAction, MAX_PROMPT_ROUNDS};
pub use rules::{DEFAULT_RESOLVE_FILE, ResolveRules, RuleVerdict, RulesError};
pub use terminal::TerminalAdapter;
