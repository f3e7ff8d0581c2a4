//! Persistent per-path verdicts (`.scaffold-resolve`).
//!
//! One rule per line: a glob matched against the destination-relative path,
//! then an optional verdict (`skip` or `force`, default `skip`). Blank lines
//! and lines starting with `#` are ignored. The first matching rule wins.
//!
//! ```text
//! # keep local edits to the readme
//! README.md skip
//! generated/** force
//! ```

use std::fmt;
use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use glob::{MatchOptions, Pattern};

use super::candidate::Disposition;

/// Default rule file name, relative to the destination root.
pub const DEFAULT_RESOLVE_FILE: &str = ".scaffold-resolve";

const MATCH_OPTIONS: MatchOptions = MatchOptions {
    case_sensitive: true,
    require_literal_separator: true,
    require_literal_leading_dot: false,
};

// ---------------------------------------------------------------------------
// Rule
// ---------------------------------------------------------------------------

/// The verdict a rule assigns.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RuleVerdict {
    /// Leave matching files untouched.
    Skip,
    /// Overwrite matching files without asking.
    Force,
}

impl RuleVerdict {
    /// The disposition this verdict maps to.
    #[must_use]
    pub const fn disposition(self) -> Disposition {
        match self {
            Self::Skip => Disposition::Skip,
            Self::Force => Disposition::Force,
        }
    }
}

impl fmt::Display for RuleVerdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Skip => write!(f, "skip"),
            Self::Force => write!(f, "force"),
        }
    }
}

#[derive(Clone, Debug)]
struct Rule {
    pattern: Pattern,
    verdict: RuleVerdict,
}

// ---------------------------------------------------------------------------
// RulesError
// ---------------------------------------------------------------------------

/// A rule file that could not be read, parsed or appended to.
#[derive(Debug)]
pub struct RulesError {
    /// The rule file.
    pub path: PathBuf,
    /// 1-based line number, for parse errors.
    pub line: Option<usize>,
    /// What went wrong.
    pub message: String,
}

impl fmt::Display for RulesError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.line {
            Some(line) => write!(f, "{}:{line}: {}", self.path.display(), self.message),
            None => write!(f, "{}: {}", self.path.display(), self.message),
        }
    }
}

impl std::error::Error for RulesError {}

// ---------------------------------------------------------------------------
// ResolveRules
// ---------------------------------------------------------------------------

/// The parsed rule file for one destination root.
#[derive(Clone, Debug)]
pub struct ResolveRules {
    file: PathBuf,
    rules: Vec<Rule>,
}

impl ResolveRules {
    /// Load `file`. A missing file yields an empty rule set.
    ///
    /// # Errors
    /// Returns [`RulesError`] on unreadable files, unknown verdicts or
    /// invalid globs.
    pub fn load(file: impl Into<PathBuf>) -> Result<Self, RulesError> {
        let file = file.into();
        let text = match fs::read_to_string(&file) {
            Ok(text) => text,
            Err(e) if e.kind() == io::ErrorKind::NotFound => String::new(),
            Err(e) => {
                return Err(RulesError {
                    path: file,
                    line: None,
                    message: format!("could not read file: {e}"),
                });
            }
        };
        let rules = parse(&text).map_err(|(line, message)| RulesError {
            path: file.clone(),
            line: Some(line),
            message,
        })?;
        Ok(Self { file, rules })
    }

    /// Path of the backing file.
    #[must_use]
    pub fn file(&self) -> &Path {
        &self.file
    }

    /// Number of rules loaded or remembered.
    #[must_use]
    pub fn len(&self) -> usize {
        self.rules.len()
    }

    /// `true` when no rule is known.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// Verdict of the first rule matching `relative`.
    #[must_use]
    pub fn lookup(&self, relative: &str) -> Option<RuleVerdict> {
        self.rules
            .iter()
            .find(|r| r.pattern.matches_with(relative, MATCH_OPTIONS))
            .map(|r| r.verdict)
    }

    /// Append a skip rule matching exactly `relative` to the file and to this
    /// rule set. Glob characters in the path are escaped.
    ///
    /// # Errors
    /// Returns [`RulesError`] when the file cannot be written.
    pub fn remember(&mut self, relative: &str) -> Result<(), RulesError> {
        let io_err = |e: io::Error| RulesError {
            path: self.file.clone(),
            line: None,
            message: format!("could not append rule: {e}"),
        };

        let needs_newline = fs::read(&self.file)
            .map(|bytes| bytes.last().is_some_and(|&b| b != b'\n'))
            .unwrap_or(false);
        if let Some(parent) = self.file.parent() {
            fs::create_dir_all(parent).map_err(io_err)?;
        }
        let mut out = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.file)
            .map_err(io_err)?;
        // Stored escaped so the path only ever matches itself when reloaded.
        let literal = Pattern::escape(relative);
        let pattern = Pattern::new(&literal).map_err(|e| RulesError {
            path: self.file.clone(),
            line: None,
            message: format!("invalid path '{relative}': {e}"),
        })?;
        let prefix = if needs_newline { "\n" } else { "" };
        writeln!(out, "{prefix}{literal} {}", RuleVerdict::Skip).map_err(io_err)?;

        self.rules.push(Rule {
            pattern,
            verdict: RuleVerdict::Skip,
        });
        tracing::info!(path = relative, file = %self.file.display(), "remembered skip rule");
        Ok(())
    }
}

fn parse(text: &str) -> Result<Vec<Rule>, (usize, String)> {
    let mut rules = Vec::new();
    for (idx, raw) in text.lines().enumerate() {
        let line = raw.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let (glob, verdict) = match line.rsplit_once(char::is_whitespace) {
            Some((glob, "skip")) => (glob.trim_end(), RuleVerdict::Skip),
            Some((glob, "force")) => (glob.trim_end(), RuleVerdict::Force),
            Some((_, other)) if other.chars().all(|c| c.is_ascii_alphabetic()) && !other.contains('.') => {
                return Err((idx + 1, format!("unknown verdict '{other}' (expected skip or force)")));
            }
            _ => (line, RuleVerdict::Skip),
        };
        let pattern =
            Pattern::new(glob).map_err(|e| (idx + 1, format!("invalid glob '{glob}': {e}")))?;
        rules.push(Rule { pattern, verdict });
    }
    Ok(rules)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_verdicts_comments_and_defaults() {
        let rules = parse("# comment\n\nREADME.md skip\ngenerated/** force\nLICENSE\n").unwrap();
        assert_eq!(rules.len(), 3);
        assert_eq!(rules[0].verdict, RuleVerdict::Skip);
        assert_eq!(rules[1].verdict, RuleVerdict::Force);
        assert_eq!(rules[2].verdict, RuleVerdict::Skip);
    }

    #[test]
    fn unknown_verdict_reports_line() {
        let err = parse("a.txt skip\nb.txt overwrite\n").unwrap_err();
        assert_eq!(err.0, 2);
        assert!(err.1.contains("overwrite"));
    }

    #[test]
    fn invalid_glob_reports_line() {
        let err = parse("[oops skip\n").unwrap_err();
        assert_eq!(err.0, 1);
    }

    #[test]
    fn path_with_spaces_keeps_verdict() {
        let rules = parse("docs/my notes.md force\n").unwrap();
        assert_eq!(rules[0].verdict, RuleVerdict::Force);
        assert!(rules[0].pattern.matches("docs/my notes.md"));
    }

    #[test]
    fn lookup_first_match_wins_and_respects_separators() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join(DEFAULT_RESOLVE_FILE);
        fs::write(&file, "src/*.rs skip\nsrc/** force\n").unwrap();
        let rules = ResolveRules::load(&file).unwrap();
        assert_eq!(rules.lookup("src/main.rs"), Some(RuleVerdict::Skip));
        assert_eq!(rules.lookup("src/bin/tool.rs"), Some(RuleVerdict::Force));
        assert_eq!(rules.lookup("Cargo.toml"), None);
    }

    #[test]
    fn missing_file_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let rules = ResolveRules::load(dir.path().join("absent")).unwrap();
        assert!(rules.is_empty());
    }

    #[test]
    fn load_error_names_file_and_line() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join(DEFAULT_RESOLVE_FILE);
        fs::write(&file, "ok.txt\nbad.txt maybe\n").unwrap();
        let err = ResolveRules::load(&file).unwrap_err();
        assert_eq!(err.line, Some(2));
        assert!(err.to_string().contains(":2:"));
    }

    #[test]
    fn remember_appends_line_and_applies_immediately() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join(DEFAULT_RESOLVE_FILE);
        fs::write(&file, "# rules\nkeep.txt force").unwrap();
        let mut rules = ResolveRules::load(&file).unwrap();

        rules.remember("notes.md").unwrap();
        assert_eq!(rules.lookup("notes.md"), Some(RuleVerdict::Skip));

        let text = fs::read_to_string(&file).unwrap();
        assert_eq!(text, "# rules\nkeep.txt force\nnotes.md skip\n");

        let reloaded = ResolveRules::load(&file).unwrap();
        assert_eq!(reloaded.len(), 2);
        assert_eq!(reloaded.lookup("notes.md"), Some(RuleVerdict::Skip));
    }

    #[test]
    fn remembered_glob_characters_match_only_that_path_after_reload() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join(DEFAULT_RESOLVE_FILE);
        let mut rules = ResolveRules::load(&file).unwrap();

        rules.remember("src/[id].js").unwrap();
        rules.remember("pages/*.html").unwrap();
        assert_eq!(rules.lookup("src/[id].js"), Some(RuleVerdict::Skip));
        assert_eq!(rules.lookup("src/i.js"), None);

        let reloaded = ResolveRules::load(&file).unwrap();
        assert_eq!(reloaded.lookup("src/[id].js"), Some(RuleVerdict::Skip));
        assert_eq!(reloaded.lookup("src/i.js"), None);
        assert_eq!(reloaded.lookup("src/d.js"), None);
        assert_eq!(reloaded.lookup("pages/*.html"), Some(RuleVerdict::Skip));
        assert_eq!(reloaded.lookup("pages/index.html"), None);
    }
}
