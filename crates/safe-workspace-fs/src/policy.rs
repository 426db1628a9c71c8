//! Safety policy consulted before every mutation, and the dry-run plan it produces.

use crate::error::{Result, SafeFsError};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Kinds of operation the façade performs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Operation {
    Read,
    List,
    Write,
    Mkdir,
    Remove,
    /// Archive creation; a write of the destination file
    Snapshot,
    /// Reclaiming a temporary directory
    Cleanup,
}

impl Operation {
    /// Whether the operation changes the filesystem.
    #[must_use]
    pub const fn is_mutating(self) -> bool {
        !matches!(self, Self::Read | Self::List)
    }

    /// Whether the operation can destroy existing content and is previewed under dry-run.
    ///
    /// `Cleanup` is excluded: it only reclaims directories created under the
    /// reserved tmp root.
    #[must_use]
    pub const fn is_destructive(self) -> bool {
        matches!(self, Self::Write | Self::Remove | Self::Snapshot)
    }

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Read => "read",
            Self::List => "list",
            Self::Write => "write",
            Self::Mkdir => "mkdir",
            Self::Remove => "remove",
            Self::Snapshot => "snapshot",
            Self::Cleanup => "cleanup",
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What the caller should do after the policy has been consulted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Gate {
    /// Perform the operation.
    Execute,
    /// Compute and return a [`Plan`] instead.
    Preview,
}

/// Immutable readonly/dry-run configuration bound to a façade at construction.
///
/// The default policy allows everything and executes immediately; traversal
/// checks apply regardless.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PathSafetyPolicy {
    readonly: bool,
    dry_run: bool,
}

impl PathSafetyPolicy {
    #[must_use]
    pub const fn new(readonly: bool, dry_run: bool) -> Self {
        Self { readonly, dry_run }
    }

    #[must_use]
    pub const fn readonly() -> Self {
        Self::new(true, false)
    }

    #[must_use]
    pub const fn dry_run() -> Self {
        Self::new(false, true)
    }

    #[must_use]
    pub const fn is_readonly(&self) -> bool {
        self.readonly
    }

    #[must_use]
    pub const fn is_dry_run(&self) -> bool {
        self.dry_run
    }

    /// Applies the readonly gate, then the dry-run gate.
    ///
    /// `path` is the caller-facing relative path used in the error message.
    ///
    /// # Errors
    /// Returns `PathPolicy` when a mutating operation is attempted under `readonly`.
    pub fn check(&self, operation: Operation, path: &str) -> Result<Gate> {
        if self.readonly && operation.is_mutating() {
            tracing::debug!(%operation, path, "Blocked by readonly policy");
            return Err(SafeFsError::PathPolicy {
                operation,
                path: path.to_string(),
            });
        }

        if self.dry_run && operation.is_destructive() {
            return Ok(Gate::Preview);
        }

        Ok(Gate::Execute)
    }
}

/// Structured preview of a destructive operation.
///
/// Serializes as a mapping with a stable `would_delete` key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Plan {
    pub operation: Operation,
    pub target: String,
    pub would_delete: Vec<String>,
}

impl Plan {
    #[must_use]
    pub fn new(operation: Operation, target: impl Into<String>, would_delete: Vec<String>) -> Self {
        Self {
            operation,
            target: target.into(),
            would_delete,
        }
    }
}

/// Result of a policy-gated operation: either it ran, or only a plan was computed.
#[derive(Debug)]
#[must_use = "a Planned outcome means nothing was changed"]
pub enum Outcome<T> {
    Executed(T),
    Planned(Plan),
}

impl<T> Outcome<T> {
    pub const fn is_planned(&self) -> bool {
        matches!(self, Self::Planned(_))
    }

    pub fn plan(&self) -> Option<&Plan> {
        match self {
            Self::Planned(plan) => Some(plan),
            Self::Executed(_) => None,
        }
    }

    pub fn into_executed(self) -> Option<T> {
        match self {
            Self::Executed(value) => Some(value),
            Self::Planned(_) => None,
        }
    }

    pub fn into_plan(self) -> Option<Plan> {
        match self {
            Self::Planned(plan) => Some(plan),
            Self::Executed(_) => None,
        }
    }

    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Outcome<U> {
        match self {
            Self::Executed(value) => Outcome::Executed(f(value)),
            Self::Planned(plan) => Outcome::Planned(plan),
        }
    }
}
