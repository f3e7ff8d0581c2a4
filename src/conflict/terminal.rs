//! Line-oriented terminal adapter.

use std::ffi::OsString;
use std::io::{self, BufRead, Write};
use std::path::Path;
use std::process::Command;

use super::adapter::{Adapter, AdapterError, ConflictQuestion, LogLevel, render_diff};

/// How many unreadable answers are tolerated before giving up on a prompt.
const MAX_INVALID_INPUT: usize = 10;

/// Prompts on a writer and reads answers line by line from a reader.
///
/// An empty answer picks the first choice. `h` prints the choice list.
pub struct TerminalAdapter<R, W> {
    input: R,
    output: W,
    color: bool,
    editor: Option<OsString>,
}

impl TerminalAdapter<io::StdinLock<'static>, io::Stderr> {
    /// Adapter on the process's stdin and stderr.
    #[must_use]
    pub fn stdio() -> Self {
        Self::new(io::stdin().lock(), io::stderr())
    }
}

impl<R: BufRead, W: Write> TerminalAdapter<R, W> {
    /// Adapter on arbitrary streams, without colors.
    pub fn new(input: R, output: W) -> Self {
        Self {
            input,
            output,
            color: false,
            editor: None,
        }
    }

    /// Enable ANSI colors for status labels and diffs.
    #[must_use]
    pub const fn with_color(mut self, color: bool) -> Self {
        self.color = color;
        self
    }

    /// Editor command used for `edit`; defaults to `$VISUAL`, then
    /// `$EDITOR`, then `vi`.
    #[must_use]
    pub fn with_editor(mut self, editor: impl Into<OsString>) -> Self {
        self.editor = Some(editor.into());
        self
    }

    /// Give back the output stream.
    pub fn into_output(self) -> W {
        self.output
    }

    fn write_line(&mut self, line: &str) {
        if let Err(e) = writeln!(self.output, "{line}") {
            tracing::warn!("terminal adapter write failed: {e}");
        }
    }

    fn status_style(&self, level: LogLevel) -> &'static str {
        if !self.color {
            return "";
        }
        match level {
            LogLevel::Create => "\x1b[32m",
            LogLevel::Force | LogLevel::Warn => "\x1b[33m",
            LogLevel::Conflict | LogLevel::Error => "\x1b[31m",
            LogLevel::Identical => "\x1b[36m",
            LogLevel::Skip | LogLevel::Info => "",
        }
    }

    fn print_help(&mut self, question: &ConflictQuestion) {
        for choice in &question.choices {
            let line = format!("  {}) {}", choice.key, choice.name);
            self.write_line(&line);
        }
        self.write_line("  h) help, list options");
    }

    fn editor_command(&self) -> OsString {
        self.editor
            .clone()
            .or_else(|| std::env::var_os("VISUAL"))
            .or_else(|| std::env::var_os("EDITOR"))
            .unwrap_or_else(|| OsString::from("vi"))
    }
}

impl<R: BufRead, W: Write> Adapter for TerminalAdapter<R, W> {
    fn prompt(&mut self, question: &ConflictQuestion) -> Result<String, AdapterError> {
        let keys: String = question
            .choices
            .iter()
            .enumerate()
            .map(|(i, c)| if i == 0 { c.key.to_ascii_uppercase() } else { c.key })
            .chain(std::iter::once('h'))
            .collect();

        for _ in 0..MAX_INVALID_INPUT {
            write!(self.output, "{} [{keys}] ", question.message())?;
            self.output.flush()?;

            let mut line = String::new();
            if self.input.read_line(&mut line)? == 0 {
                return Err(AdapterError::NoAnswer {
                    path: question.path.clone(),
                });
            }

            let input = line.trim();
            if input.is_empty() {
                if let Some(first) = question.choices.first() {
                    return Ok(first.value.clone());
                }
            } else if input.eq_ignore_ascii_case("h") {
                self.print_help(question);
                continue;
            } else if let Some(choice) = question.lookup(input) {
                return Ok(choice.value.clone());
            }
            self.write_line("Please enter a valid command");
            self.print_help(question);
        }
        Err(AdapterError::NoAnswer {
            path: question.path.clone(),
        })
    }

    fn log(&mut self, level: LogLevel, message: &str) {
        match level {
            LogLevel::Info => self.write_line(message),
            _ => {
                let style = self.status_style(level);
                let reset = if style.is_empty() { "" } else { "\x1b[0m" };
                let line = format!("{style}{:>10}{reset} {message}", level.label());
                self.write_line(&line);
            }
        }
    }

    fn diff(&mut self, path: &str, before: &str, after: &str) {
        let rendered = render_diff(path, before, after, self.color);
        self.write_line(&rendered);
    }

    fn edit(&mut self, path: &Path, contents: &[u8]) -> Result<Vec<u8>, AdapterError> {
        let suffix = path
            .extension()
            .map(|ext| format!(".{}", ext.to_string_lossy()))
            .unwrap_or_default();
        let mut file = tempfile::Builder::new()
            .prefix("scaffold-edit-")
            .suffix(&suffix)
            .tempfile()?;
        file.write_all(contents)?;
        file.flush()?;

        let editor = self.editor_command();
        let status = Command::new(&editor).arg(file.path()).status()?;
        if !status.success() {
            return Err(AdapterError::Io(io::Error::other(format!(
                "editor {} exited with {status}",
                editor.to_string_lossy()
            ))));
        }
        Ok(std::fs::read(file.path())?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::conflict::adapter::Choice;
    use crate::conflict::detect::ConflictKind;

    fn question() -> ConflictQuestion {
        ConflictQuestion {
            path: "src/app.js".to_owned(),
            kind: ConflictKind::Content,
            round: 1,
            choices: vec![
                Choice::new('y', "overwrite", "write"),
                Choice::new('n', "do not overwrite", "skip"),
                Choice::new('x', "abort", "abort"),
            ],
        }
    }

    fn adapter(input: &str) -> TerminalAdapter<&[u8], Vec<u8>> {
        TerminalAdapter::new(input.as_bytes(), Vec::new())
    }

    #[test]
    fn empty_answer_picks_first_choice() {
        let mut a = adapter("\n");
        assert_eq!(a.prompt(&question()).unwrap(), "write");
        let out = String::from_utf8(a.into_output()).unwrap();
        assert!(out.contains("Overwrite src/app.js?"));
        assert!(out.contains("[Ynxh]"));
    }

    #[test]
    fn key_answer_is_mapped_to_value() {
        let mut a = adapter("n\n");
        assert_eq!(a.prompt(&question()).unwrap(), "skip");
    }

    #[test]
    fn invalid_and_help_answers_reprompt() {
        let mut a = adapter("?\nh\nx\n");
        assert_eq!(a.prompt(&question()).unwrap(), "abort");
        let out = String::from_utf8(a.into_output()).unwrap();
        assert!(out.contains("Please enter a valid command"));
        assert!(out.contains("n) do not overwrite"));
    }

    #[test]
    fn end_of_input_is_no_answer() {
        let mut a = adapter("");
        assert!(matches!(
            a.prompt(&question()),
            Err(AdapterError::NoAnswer { .. })
        ));
    }

    #[test]
    fn status_lines_are_right_aligned() {
        let mut a = adapter("");
        a.log(LogLevel::Create, "src/app.js");
        a.log(LogLevel::Info, "plain");
        let out = String::from_utf8(a.into_output()).unwrap();
        assert!(out.contains("    create src/app.js"));
        assert!(out.contains("plain\n"));
    }

    #[cfg(unix)]
    #[test]
    fn edit_runs_the_configured_editor() {
        // `true` leaves the temp file as written.
        let mut a = adapter("").with_editor("true");
        let edited = a.edit(Path::new("x.txt"), b"keep me").unwrap();
        assert_eq!(edited, b"keep me");
    }
}
