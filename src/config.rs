//! Run configuration (`.scaffold/config.toml`).
//!
//! Lives under the destination root. A missing file means all defaults.
//!
//! ```toml
//! [conflicts]
//! force = false
//! bail = false
//! dry_run = false
//! ignore_whitespace = true
//! resolve_file = ".scaffold-resolve"
//!
//! [pipeline]
//! stages = ["initializing", "writing", "conflicts", "install", "end"]
//! commit_stage = "conflicts"
//! install_stage = "install"
//! skip_install = true
//! ```

use std::fmt;
use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::conflict::policy::{PolicyError, ResolutionPolicy};
use crate::conflict::rules::DEFAULT_RESOLVE_FILE;
use crate::queue::DEFAULT_STAGES;

/// Config file location relative to the destination root.
pub const CONFIG_PATH: &str = ".scaffold/config.toml";

// ---------------------------------------------------------------------------
// Top-level config
// ---------------------------------------------------------------------------

/// Everything a run can be configured with.
#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RunConfig {
    /// Conflict resolution flags.
    #[serde(default)]
    pub conflicts: ConflictsConfig,

    /// Stage layout.
    #[serde(default)]
    pub pipeline: PipelineConfig,
}

// ---------------------------------------------------------------------------
// ConflictsConfig
// ---------------------------------------------------------------------------

/// The `[conflicts]` table.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
#[allow(clippy::struct_excessive_bools)]
pub struct ConflictsConfig {
    /// Always write, never prompt.
    #[serde(default)]
    pub force: bool,
    /// Abort on the first conflict.
    #[serde(default)]
    pub bail: bool,
    /// With `bail`, also abort on the first new file.
    #[serde(default)]
    pub bail_on_create: bool,
    /// Report what would happen without writing.
    #[serde(default)]
    pub dry_run: bool,
    /// Whitespace-only changes are not conflicts.
    #[serde(default)]
    pub ignore_whitespace: bool,
    /// Rewrite identical files too.
    #[serde(default)]
    pub regenerate: bool,
    /// Rule file, relative to the destination root. Empty disables rules.
    #[serde(default = "default_resolve_file")]
    pub resolve_file: String,
}

impl Default for ConflictsConfig {
    fn default() -> Self {
        Self {
            force: false,
            bail: false,
            bail_on_create: false,
            dry_run: false,
            ignore_whitespace: false,
            regenerate: false,
            resolve_file: default_resolve_file(),
        }
    }
}

fn default_resolve_file() -> String {
    DEFAULT_RESOLVE_FILE.to_owned()
}

// ---------------------------------------------------------------------------
// PipelineConfig
// ---------------------------------------------------------------------------

/// The `[pipeline]` table.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PipelineConfig {
    /// Stage names in run order.
    #[serde(default = "default_stages")]
    pub stages: Vec<String>,
    /// Stage that scheduled generators start in.
    #[serde(default = "default_compose_stage")]
    pub compose_stage: String,
    /// Stage that runs the commit job.
    #[serde(default = "default_commit_stage")]
    pub commit_stage: String,
    /// Stage that runs the install job.
    #[serde(default = "default_install_stage")]
    pub install_stage: String,
    /// Never queue the install job.
    #[serde(default)]
    pub skip_install: bool,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            stages: default_stages(),
            compose_stage: default_compose_stage(),
            commit_stage: default_commit_stage(),
            install_stage: default_install_stage(),
            skip_install: false,
        }
    }
}

fn default_stages() -> Vec<String> {
    DEFAULT_STAGES.iter().map(|s| (*s).to_owned()).collect()
}

fn default_compose_stage() -> String {
    "initializing".to_owned()
}

fn default_commit_stage() -> String {
    "conflicts".to_owned()
}

fn default_install_stage() -> String {
    "install".to_owned()
}

// ---------------------------------------------------------------------------
// Loading
// ---------------------------------------------------------------------------

/// A config file that could not be used.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigError {
    /// The path that was being loaded (if available).
    pub path: Option<PathBuf>,
    /// Human-readable message with line-level detail when possible.
    pub message: String,
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(p) = &self.path {
            write!(f, "{}: {}", p.display(), self.message)
        } else {
            write!(f, "config error: {}", self.message)
        }
    }
}

impl std::error::Error for ConfigError {}

impl RunConfig {
    /// Load `<root>/.scaffold/config.toml`.
    ///
    /// # Errors
    /// See [`RunConfig::load`].
    pub fn load_for(root: &Path) -> Result<Self, ConfigError> {
        Self::load(&root.join(CONFIG_PATH))
    }

    /// Load configuration from a TOML file.
    ///
    /// - If the file does not exist, returns all defaults (not an error).
    /// - If the file exists but contains invalid TOML, unknown fields or an
    ///   inconsistent pipeline, returns a [`ConfigError`].
    ///
    /// # Errors
    /// Returns `ConfigError` on I/O errors (other than not-found) or parse errors.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let contents = match std::fs::read_to_string(path) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!(path = %path.display(), "no config file, using defaults");
                return Ok(Self::default());
            }
            Err(e) => {
                return Err(ConfigError {
                    path: Some(path.to_owned()),
                    message: format!("could not read file: {e}"),
                });
            }
        };
        Self::parse(&contents).map_err(|mut e| {
            e.path = Some(path.to_owned());
            e
        })
    }

    /// Parse configuration from a TOML string.
    ///
    /// # Errors
    /// Returns `ConfigError` on invalid TOML, unknown fields or a pipeline
    /// that does not name its special stages.
    pub fn parse(toml_str: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(toml_str).map_err(|e| {
            let mut message = e.message().to_owned();
            if let Some(span) = e.span() {
                let line = toml_str[..span.start]
                    .chars()
                    .filter(|&c| c == '\n')
                    .count()
                    + 1;
                message = format!("line {line}: {message}");
            }
            ConfigError {
                path: None,
                message,
            }
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Check that the special stages are part of the pipeline.
    ///
    /// # Errors
    /// Returns `ConfigError` naming the missing stage.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let p = &self.pipeline;
        for (key, stage) in [
            ("compose_stage", &p.compose_stage),
            ("commit_stage", &p.commit_stage),
            ("install_stage", &p.install_stage),
        ] {
            if !p.stages.contains(stage) {
                return Err(ConfigError {
                    path: None,
                    message: format!("pipeline.{key} '{stage}' is not listed in pipeline.stages"),
                });
            }
        }
        Ok(())
    }

    /// The validated resolution policy from `[conflicts]`.
    ///
    /// # Errors
    /// Returns [`PolicyError`] when `force` and `bail` are both set.
    pub fn policy(&self) -> Result<ResolutionPolicy, PolicyError> {
        let c = &self.conflicts;
        ResolutionPolicy {
            force: c.force,
            bail: c.bail,
            bail_on_create: c.bail_on_create,
            dry_run: c.dry_run,
            ignore_whitespace: c.ignore_whitespace,
            regenerate: c.regenerate,
        }
        .validate()
    }

    /// Absolute path of the rule file for destination `root`.
    #[must_use]
    pub fn resolve_file(&self, root: &Path) -> PathBuf {
        root.join(&self.conflicts.resolve_file)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_empty_string() {
        let cfg = RunConfig::parse("").unwrap();
        assert_eq!(cfg, RunConfig::default());
        assert_eq!(cfg.pipeline.stages.len(), 9);
        assert_eq!(cfg.conflicts.resolve_file, ".scaffold-resolve");
    }

    #[test]
    fn parse_full_config() {
        let cfg = RunConfig::parse(
            r#"
[conflicts]
force = false
bail = true
bail_on_create = true
dry_run = false
ignore_whitespace = true
regenerate = false
resolve_file = ".keep"

[pipeline]
stages = ["initializing", "writing", "conflicts", "install", "end"]
compose_stage = "initializing"
commit_stage = "conflicts"
install_stage = "install"
skip_install = true
"#,
        )
        .unwrap();
        assert!(cfg.conflicts.bail);
        assert!(cfg.conflicts.ignore_whitespace);
        assert_eq!(cfg.pipeline.stages.len(), 5);
        assert!(cfg.pipeline.skip_install);
        let policy = cfg.policy().unwrap();
        assert!(policy.bail && policy.bail_on_create && policy.ignore_whitespace);
        assert_eq!(cfg.resolve_file(Path::new("/dst")), Path::new("/dst/.keep"));
    }

    #[test]
    fn parse_partial_config_uses_defaults() {
        let cfg = RunConfig::parse("[conflicts]\ndry_run = true\n").unwrap();
        assert!(cfg.conflicts.dry_run);
        assert_eq!(cfg.pipeline, PipelineConfig::default());
    }

    #[test]
    fn parse_rejects_unknown_nested_field() {
        let err = RunConfig::parse("[conflicts]\nyolo = true\n").unwrap_err();
        assert!(err.message.contains("yolo"), "{}", err.message);
    }

    #[test]
    fn parse_includes_line_number_on_error() {
        let err = RunConfig::parse("[conflicts]\n\nforce = \"yes\"\n").unwrap_err();
        assert!(err.message.contains("line 3"), "{}", err.message);
    }

    #[test]
    fn pipeline_must_name_its_special_stages() {
        let err = RunConfig::parse("[pipeline]\nstages = [\"initializing\", \"end\"]\n").unwrap_err();
        assert!(err.message.contains("commit_stage"), "{}", err.message);
    }

    #[test]
    fn force_and_bail_policy_is_rejected() {
        let cfg = RunConfig::parse("[conflicts]\nforce = true\nbail = true\n").unwrap();
        assert!(cfg.policy().is_err());
    }

    #[test]
    fn load_missing_file_returns_defaults() {
        let dir = tempfile::tempdir().unwrap();
        assert_eq!(RunConfig::load_for(dir.path()).unwrap(), RunConfig::default());
    }

    #[test]
    fn load_invalid_file_shows_path() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(dir.path().join(".scaffold")).unwrap();
        let path = dir.path().join(CONFIG_PATH);
        std::fs::write(&path, "not valid [[[toml").unwrap();
        let err = RunConfig::load_for(dir.path()).unwrap_err();
        assert_eq!(err.path.as_deref(), Some(path.as_path()));
        assert!(err.to_string().starts_with(&path.display().to_string()));
    }
}
