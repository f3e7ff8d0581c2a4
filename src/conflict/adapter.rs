//! The user-interaction seam.
//!
//! The conflict engine never talks to a terminal directly. It asks an
//! [`Adapter`] to prompt, log, show diffs and edit content. Two adapters ship
//! with the crate:
//!
//! - [`TerminalAdapter`](super::terminal::TerminalAdapter) for humans.
//! - [`AnswerTable`] for fully automated runs and tests.

use std::cell::RefCell;
use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::path::Path;
use std::rc::Rc;

use similar::{ChangeTag, TextDiff};

use super::detect::ConflictKind;

// ---------------------------------------------------------------------------
// LogLevel
// ---------------------------------------------------------------------------

/// Kind of a user-visible log line.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum LogLevel {
    /// A file will be created.
    Create,
    /// A file already matches.
    Identical,
    /// A file conflicts.
    Conflict,
    /// A file will be overwritten.
    Force,
    /// A file is left untouched.
    Skip,
    /// Free-form information (diffs, notices).
    Info,
    /// Something worth a second look.
    Warn,
    /// A failure the user should see before the run stops.
    Error,
}

impl LogLevel {
    /// Short label used as the status column.
    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            Self::Create => "create",
            Self::Identical => "identical",
            Self::Conflict => "conflict",
            Self::Force => "force",
            Self::Skip => "skip",
            Self::Info => "info",
            Self::Warn => "warn",
            Self::Error => "error",
        }
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

// ---------------------------------------------------------------------------
// Questions and answers
// ---------------------------------------------------------------------------

/// One selectable option of a conflict prompt.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Choice {
    /// Single-key shortcut.
    pub key: char,
    /// Human-readable description.
    pub name: String,
    /// Value the adapter returns when this choice is picked.
    pub value: String,
}

impl Choice {
    /// Build a choice.
    pub fn new(key: char, name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key,
            name: name.into(),
            value: value.into(),
        }
    }
}

/// A conflict prompt for one file.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ConflictQuestion {
    /// Destination-relative path, `/`-separated.
    pub path: String,
    /// Why the file conflicts.
    pub kind: ConflictKind,
    /// 1-based prompt round for this file.
    pub round: u32,
    /// Options in display order; the first is the default.
    pub choices: Vec<Choice>,
}

impl ConflictQuestion {
    /// Message shown above the choices.
    #[must_use]
    pub fn message(&self) -> String {
        format!("Overwrite {}? ({})", self.path, self.kind)
    }

    /// Find the choice matching `input` by value or key.
    #[must_use]
    pub fn lookup(&self, input: &str) -> Option<&Choice> {
        let input = input.trim();
        self.choices.iter().find(|c| c.value == input).or_else(|| {
            let mut chars = input.chars();
            match (chars.next(), chars.next()) {
                (Some(key), None) => self
                    .choices
                    .iter()
                    .find(|c| c.key.eq_ignore_ascii_case(&key)),
                _ => None,
            }
        })
    }
}

/// The built-in answers, plus caller-supplied extension actions.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Answer {
    /// Overwrite this file.
    Write,
    /// Leave this file alone.
    Skip,
    /// Overwrite this and every remaining conflict.
    Force,
    /// Re-read the disk and check again.
    Reload,
    /// Stop the run.
    Abort,
    /// Show the differences.
    Diff,
    /// Edit the proposed content, then check again.
    Edit,
    /// Skip and remember to skip this path on future runs.
    Ignore,
    /// An extension action, by value.
    Custom(String),
}

impl Answer {
    /// Map a choice value to an answer.
    #[must_use]
    pub fn from_value(value: &str) -> Self {
        match value {
            "write" => Self::Write,
            "skip" => Self::Skip,
            "force" => Self::Force,
            "reload" => Self::Reload,
            "abort" => Self::Abort,
            "diff" => Self::Diff,
            "edit" => Self::Edit,
            "ignore" => Self::Ignore,
            other => Self::Custom(other.to_owned()),
        }
    }
}

// ---------------------------------------------------------------------------
// AdapterError
// ---------------------------------------------------------------------------

/// Failure inside an adapter.
#[derive(Debug)]
pub enum AdapterError {
    /// No answer is available for this prompt.
    NoAnswer {
        /// The prompted path.
        path: String,
    },
    /// The adapter could not read input or launch an editor.
    Io(std::io::Error),
}

impl fmt::Display for AdapterError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NoAnswer { path } => write!(f, "no answer available for conflict on {path}"),
            Self::Io(e) => write!(f, "adapter I/O error: {e}"),
        }
    }
}

impl std::error::Error for AdapterError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io(e) => Some(e),
            Self::NoAnswer { .. } => None,
        }
    }
}

impl From<std::io::Error> for AdapterError {
    fn from(e: std::io::Error) -> Self {
        Self::Io(e)
    }
}

// ---------------------------------------------------------------------------
// Adapter trait
// ---------------------------------------------------------------------------

/// User-interaction capability consumed by the conflict engine.
pub trait Adapter {
    /// Ask the user to pick one of `question.choices`; returns its value.
    ///
    /// # Errors
    /// Returns [`AdapterError`] when no answer can be obtained.
    fn prompt(&mut self, question: &ConflictQuestion) -> Result<String, AdapterError>;

    /// Emit one user-visible line.
    fn log(&mut self, level: LogLevel, message: &str);

    /// Show the difference between the on-disk text and the proposed text.
    fn diff(&mut self, path: &str, before: &str, after: &str) {
        let rendered = render_diff(path, before, after, false);
        self.log(LogLevel::Info, &rendered);
    }

    /// Let the user edit `contents`; returns the replacement bytes.
    ///
    /// # Errors
    /// Returns [`AdapterError`] when editing is not possible.
    fn edit(&mut self, path: &Path, contents: &[u8]) -> Result<Vec<u8>, AdapterError>;
}

/// Unified diff of two texts, optionally with ANSI colors.
#[must_use]
pub fn render_diff(path: &str, before: &str, after: &str, color: bool) -> String {
    let diff = TextDiff::from_lines(before, after);
    if !color {
        return diff
            .unified_diff()
            .context_radius(3)
            .header(&format!("a/{path}"), &format!("b/{path}"))
            .to_string();
    }

    let mut out = format!("\x1b[1m--- a/{path}\x1b[0m\n\x1b[1m+++ b/{path}\x1b[0m\n");
    for group in diff.grouped_ops(3) {
        for op in group {
            for change in diff.iter_changes(&op) {
                let (sign, style) = match change.tag() {
                    ChangeTag::Equal => (' ', ""),
                    ChangeTag::Delete => ('-', "\x1b[31m"),
                    ChangeTag::Insert => ('+', "\x1b[32m"),
                };
                out.push_str(style);
                out.push(sign);
                out.push_str(change.value());
                if !style.is_empty() {
                    out.push_str("\x1b[0m");
                }
                if change.missing_newline() {
                    out.push('\n');
                }
            }
        }
    }
    out
}

/// Size summary for binary files, which are never diffed line by line.
#[must_use]
pub fn render_binary_summary(path: &str, before: Option<usize>, after: Option<usize>) -> String {
    let size = |n: Option<usize>| n.map_or_else(|| "absent".to_owned(), |n| format!("{n} bytes"));
    format!(
        "Binary file {path} differs\n  existing: {}\n  proposed: {}",
        size(before),
        size(after)
    )
}

// ---------------------------------------------------------------------------
// AnswerTable
// ---------------------------------------------------------------------------

/// One recorded adapter interaction.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Event {
    /// A prompt was issued for this path.
    Prompt {
        /// Prompted path.
        path: String,
        /// Answer returned.
        answer: String,
    },
    /// A log line.
    Log {
        /// Line kind.
        level: LogLevel,
        /// Line text.
        message: String,
    },
    /// An edit was requested for this path.
    Edit {
        /// Edited path.
        path: String,
    },
}

/// Shared record of everything an [`AnswerTable`] saw.
#[derive(Clone, Debug, Default)]
pub struct Transcript(Rc<RefCell<Vec<Event>>>);

impl Transcript {
    fn push(&self, event: Event) {
        self.0.borrow_mut().push(event);
    }

    /// Every event so far, in order.
    #[must_use]
    pub fn events(&self) -> Vec<Event> {
        self.0.borrow().clone()
    }

    /// Paths that were prompted, in order.
    #[must_use]
    pub fn prompts(&self) -> Vec<String> {
        self.0
            .borrow()
            .iter()
            .filter_map(|e| match e {
                Event::Prompt { path, .. } => Some(path.clone()),
                _ => None,
            })
            .collect()
    }

    /// Log lines of one kind, in order.
    #[must_use]
    pub fn logs(&self, level: LogLevel) -> Vec<String> {
        self.0
            .borrow()
            .iter()
            .filter_map(|e| match e {
                Event::Log { level: l, message } if *l == level => Some(message.clone()),
                _ => None,
            })
            .collect()
    }
}

/// Fully automated adapter answering from a table.
///
/// Answers queued for a path are consumed in order; once a path has no
/// queued answers the default answer is used. Edits return the scripted
/// replacement for the path, if any.
#[derive(Debug, Default)]
pub struct AnswerTable {
    answers: HashMap<String, VecDeque<String>>,
    default: Option<String>,
    edits: HashMap<String, Vec<u8>>,
    transcript: Transcript,
}

impl AnswerTable {
    /// An empty table; every prompt fails with [`AdapterError::NoAnswer`].
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue `answer` for the destination-relative `path`.
    #[must_use]
    pub fn answer(mut self, path: &str, answer: &str) -> Self {
        self.answers
            .entry(path.to_owned())
            .or_default()
            .push_back(answer.to_owned());
        self
    }

    /// Answer used when a path has nothing queued.
    #[must_use]
    pub fn default_answer(mut self, answer: &str) -> Self {
        self.default = Some(answer.to_owned());
        self
    }

    /// Replacement content returned when `path` is edited.
    #[must_use]
    pub fn edit_to(mut self, path: &str, contents: impl Into<Vec<u8>>) -> Self {
        self.edits.insert(path.to_owned(), contents.into());
        self
    }

    /// Handle on the interaction record. Stays valid after the table is
    /// boxed and handed to the engine.
    #[must_use]
    pub fn transcript(&self) -> Transcript {
        self.transcript.clone()
    }
}

impl Adapter for AnswerTable {
    fn prompt(&mut self, question: &ConflictQuestion) -> Result<String, AdapterError> {
        let answer = self
            .answers
            .get_mut(&question.path)
            .and_then(VecDeque::pop_front)
            .or_else(|| self.default.clone())
            .ok_or_else(|| AdapterError::NoAnswer {
                path: question.path.clone(),
            })?;
        self.transcript.push(Event::Prompt {
            path: question.path.clone(),
            answer: answer.clone(),
        });
        Ok(answer)
    }

    fn log(&mut self, level: LogLevel, message: &str) {
        self.transcript.push(Event::Log {
            level,
            message: message.to_owned(),
        });
    }

    fn edit(&mut self, path: &Path, contents: &[u8]) -> Result<Vec<u8>, AdapterError> {
        let key = path.to_string_lossy().replace('\\', "/");
        self.transcript.push(Event::Edit { path: key.clone() });
        Ok(self
            .edits
            .get(&key)
            .cloned()
            .unwrap_or_else(|| contents.to_vec()))
    }
}
