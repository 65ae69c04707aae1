//! Identifier newtypes shared across the control plane.

use serde::{Deserialize, Serialize};
use std::borrow::Borrow;
use std::fmt;

/// Generate a string-backed identifier newtype with the common set of
/// conversions (`Display`, `From<String>`, `From<&str>`, `Borrow<str>`,
/// equality against `str`).
macro_rules! id_newtype {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        pub struct $name(pub String);

        impl $name {
            pub fn new(id: impl Into<String>) -> Self {
                Self(id.into())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }

            pub fn into_string(self) -> String {
                self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<String> for $name {
            fn from(s: String) -> Self {
                Self(s)
            }
        }

        impl From<&str> for $name {
            fn from(s: &str) -> Self {
                Self(s.to_string())
            }
        }

        impl PartialEq<str> for $name {
            fn eq(&self, other: &str) -> bool {
                self.0 == other
            }
        }

        impl PartialEq<&str> for $name {
            fn eq(&self, other: &&str) -> bool {
                self.0 == *other
            }
        }

        impl Borrow<str> for $name {
            fn borrow(&self) -> &str {
                &self.0
            }
        }
    };
}

id_newtype!(
    /// Identifier of a managed task-runtime container (`runtime_id`).
    ///
    /// Derived via [`RuntimeId::for_task`] from a prefix plus a sanitised
    /// task id; never longer than [`RuntimeId::MAX_LEN`] bytes.
    RuntimeId
);

impl RuntimeId {
    /// Maximum length, matching the container/network name limits of the
    /// engines this id ends up embedded into (container names, DNS labels).
    pub const MAX_LEN: usize = 60;

    /// Derive a stable runtime id for a task: `task-runtime-<sanitised task id>`,
    /// truncated to [`Self::MAX_LEN`] bytes.
    pub fn for_task(prefix: &str, task_id: &TaskId) -> Self {
        let sanitised = sanitise(task_id.as_str());
        let mut id = format!("{prefix}-{sanitised}");
        if id.len() > Self::MAX_LEN {
            id.truncate(Self::MAX_LEN);
        }
        Self(id)
    }
}

/// Lowercase and replace any byte outside `[a-z0-9._-]` with `-`, matching
/// the volume/network token convention used for generated container names.
pub fn sanitise(s: &str) -> String {
    s.to_lowercase()
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-') { c } else { '-' })
        .collect()
}

id_newtype!(
    /// Identifier of a task definition.
    TaskId
);

id_newtype!(
    /// Identifier of a repository.
    RepositoryId
);

id_newtype!(
    /// Identifier of a project.
    ProjectId
);

id_newtype!(
    /// Identifier of a run (one attempt of a task against a repository).
    RunId
);

id_newtype!(
    /// Image reference, e.g. `registry.internal/task-runtime:1.4.0`.
    ImageRef
);

#[cfg(test)]
#[path = "ids_tests.rs"]
mod tests;
