//! Run-wide resolution policy and force scopes.

use std::collections::BTreeSet;
use std::fmt;

use serde::Serialize;

/// Flags controlling how the conflict engine treats every file in a run.
///
/// Immutable once the run starts. The in-session "overwrite this and all
/// remaining" choice is tracked separately in [`ForceState`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
#[allow(clippy::struct_excessive_bools)]
pub struct ResolutionPolicy {
    /// Skip conflict checks and always write.
    pub force: bool,
    /// Abort the run on the first conflict.
    pub bail: bool,
    /// With `bail`, also abort on the first file that does not exist yet.
    pub bail_on_create: bool,
    /// Never prompt or write; conflicts are logged and skipped.
    pub dry_run: bool,
    /// Whitespace-only differences are not conflicts.
    pub ignore_whitespace: bool,
    /// Rewrite byte-identical files too.
    pub regenerate: bool,
}

impl ResolutionPolicy {
    /// Check flag combinations.
    ///
    /// # Errors
    /// Returns [`PolicyError`] when `force` and `bail` are both set.
    pub fn validate(self) -> Result<Self, PolicyError> {
        if self.force && self.bail {
            return Err(PolicyError {
                detail: "`force` and `bail` are mutually exclusive".to_owned(),
            });
        }
        Ok(self)
    }
}

/// An invalid [`ResolutionPolicy`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PolicyError {
    /// What is wrong.
    pub detail: String,
}

impl fmt::Display for PolicyError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid resolution policy: {}", self.detail)
    }
}

impl std::error::Error for PolicyError {}

// ---------------------------------------------------------------------------
// ForceScope / ForceState
// ---------------------------------------------------------------------------

/// Identifies a generator sub-tree whose files share a "force all" switch.
///
/// Files without a scope share the run-wide switch.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct ForceScope(pub u32);

impl fmt::Display for ForceScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "scope-{}", self.0)
    }
}

/// "Force all remaining" switches flipped during the run.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ForceState {
    all: bool,
    scopes: BTreeSet<ForceScope>,
}

impl ForceState {
    /// Flip the switch for `scope`, or the run-wide switch for `None`.
    pub fn force_remaining(&mut self, scope: Option<ForceScope>) {
        match scope {
            Some(scope) => {
                self.scopes.insert(scope);
            }
            None => self.all = true,
        }
    }

    /// Whether a file in `scope` should be written without asking.
    #[must_use]
    pub fn is_forced(&self, scope: Option<ForceScope>) -> bool {
        self.all || scope.is_some_and(|s| self.scopes.contains(&s))
    }
}
