//! Deterministic sandbox naming.
//!
//! The i-th sandbox of a batch is named `{prefix}_{i}` with a 1-based index.
//! Allocation never talks to the runtime: whether a name is already taken is
//! decided by the create call itself.

use crate::error::ValidationError;
use serde::{Serialize, Serializer};
use std::fmt;

/// Separator between the batch prefix and the sandbox index.
pub const NAME_SEPARATOR: char = '_';

/// Name of a single sandbox within a batch.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SandboxName {
    index: u32,
    value: String,
}

impl SandboxName {
    /// Build the name for `index` under `prefix`.
    pub fn new(prefix: &str, index: u32) -> Self {
        Self {
            index,
            value: format!("{prefix}{NAME_SEPARATOR}{index}"),
        }
    }

    /// The 1-based position of this sandbox in its batch.
    pub fn index(&self) -> u32 {
        self.index
    }

    /// The full runtime identifier.
    pub fn as_str(&self) -> &str {
        &self.value
    }
}

impl fmt::Display for SandboxName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.value)
    }
}

impl AsRef<str> for SandboxName {
    fn as_ref(&self) -> &str {
        &self.value
    }
}

impl Serialize for SandboxName {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.value)
    }
}

/// Allocate the names for a batch of `count` sandboxes, in ascending index order.
pub fn allocate(prefix: &str, count: u32) -> Vec<SandboxName> {
    (1..=count).map(|i| SandboxName::new(prefix, i)).collect()
}

/// Check that `prefix` can start a container name (`[A-Za-z0-9][A-Za-z0-9_.-]*`).
pub fn validate_prefix(prefix: &str) -> Result<(), ValidationError> {
    let mut chars = prefix.chars();
    let Some(first) = chars.next() else {
        return Err(ValidationError::EmptyPrefix);
    };

    if !first.is_ascii_alphanumeric() {
        return Err(ValidationError::InvalidPrefix {
            prefix: prefix.to_string(),
            reason: "must start with an ASCII letter or digit",
        });
    }

    if !chars.all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '-')) {
        return Err(ValidationError::InvalidPrefix {
            prefix: prefix.to_string(),
            reason: "may only contain ASCII letters, digits, '_', '.' and '-'",
        });
    }

    Ok(())
}

/// Parse the batch index out of `name` if it belongs to `prefix`.
pub fn parse_index(prefix: &str, name: &str) -> Option<u32> {
    let rest = name.strip_prefix(prefix)?.strip_prefix(NAME_SEPARATOR)?;
    if rest.starts_with('0') || rest.starts_with('+') {
        return None;
    }
    rest.parse().ok()
}
