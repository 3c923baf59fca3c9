//! Strongly-typed identifiers for Switchyard entities.
//!
//! All identifiers are:
//! - **Strongly typed**: Prevents mixing up different id kinds at compile time
//! - **Lexicographically sortable**: `ExperimentId` is a ULID and sorts by
//!   creation time
//! - **Validated**: Application names and labels reject malformed input at
//!   the boundary, so the domain layer never sees a bad name
//!
//! # Example
//!
//! ```rust
//! use switchyard_core::id::{ApplicationName, ExperimentId, ExperimentLabel};
//!
//! let id = ExperimentId::generate();
//! let application = ApplicationName::new("shop").unwrap();
//! let label = ExperimentLabel::new("cart-cta").unwrap();
//! ```

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use ulid::Ulid;

use crate::error::{Error, Result};

/// Maximum length for application names and experiment labels.
const MAX_NAME_LEN: usize = 64;

/// A unique identifier for an experiment.
///
/// Opaque, unique, and immutable after creation. Ids of deleted experiments
/// are never reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ExperimentId(Ulid);

impl ExperimentId {
    /// Generates a new unique experiment id.
    ///
    /// Uses ULID generation which is:
    /// - Lexicographically sortable by creation time
    /// - Globally unique without coordination
    /// - URL-safe and case-insensitive
    #[must_use]
    pub fn generate() -> Self {
        Self(Ulid::new())
    }

    /// Creates an experiment id from a raw ULID.
    #[must_use]
    pub const fn from_ulid(ulid: Ulid) -> Self {
        Self(ulid)
    }

    /// Returns the underlying ULID.
    #[must_use]
    pub const fn as_ulid(&self) -> Ulid {
        self.0
    }
}

impl fmt::Display for ExperimentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for ExperimentId {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Ulid::from_string(s)
            .map(Self)
            .map_err(|e| Error::InvalidId {
                message: format!("invalid experiment id '{s}': {e}"),
            })
    }
}

/// The namespace an experiment belongs to.
///
/// Application names must be:
/// - Non-empty, at most 64 characters
/// - ASCII alphanumeric plus `-`, `_` and `.`
/// - Starting with an alphanumeric character
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ApplicationName(String);

impl ApplicationName {
    /// Creates a new application name after validating the format.
    ///
    /// # Errors
    ///
    /// Returns an error if the name is malformed.
    pub fn new(name: impl Into<String>) -> Result<Self> {
        let name = name.into();
        validate_name("application name", &name)?;
        Ok(Self(name))
    }

    /// Returns the application name as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ApplicationName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl AsRef<str> for ApplicationName {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl FromStr for ApplicationName {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::new(s)
    }
}

/// A human-readable experiment identifier, unique within an application.
///
/// Labels follow the same format rules as [`ApplicationName`].
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ExperimentLabel(String);

impl ExperimentLabel {
    /// Creates a new experiment label after validating the format.
    ///
    /// # Errors
    ///
    /// Returns an error if the label is malformed.
    pub fn new(label: impl Into<String>) -> Result<Self> {
        let label = label.into();
        validate_name("experiment label", &label)?;
        Ok(Self(label))
    }

    /// Returns the label as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ExperimentLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl AsRef<str> for ExperimentLabel {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl FromStr for ExperimentLabel {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::new(s)
    }
}

/// Validates an application name or experiment label.
fn validate_name(kind: &str, value: &str) -> Result<()> {
    if value.is_empty() {
        return Err(Error::invalid_id(format!("{kind} cannot be empty")));
    }

    if value.len() > MAX_NAME_LEN {
        return Err(Error::invalid_id(format!(
            "{kind} '{value}' is too long (maximum {MAX_NAME_LEN} characters)"
        )));
    }

    if !value
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_' || c == '.')
    {
        return Err(Error::invalid_id(format!(
            "{kind} '{value}' contains invalid characters (only ASCII letters, digits, '-', '_' and '.' allowed)"
        )));
    }

    let starts_alphanumeric = value.chars().next().is_some_and(|c| c.is_ascii_alphanumeric());
    if !starts_alphanumeric {
        return Err(Error::invalid_id(format!(
            "{kind} '{value}' must start with a letter or digit"
        )));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn experiment_id_roundtrip() {
        let id = ExperimentId::generate();
        let s = id.to_string();
        let parsed: ExperimentId = s.parse().unwrap();
        assert_eq!(id, parsed);
    }

    #[test]
    fn experiment_ids_are_unique() {
        let id1 = ExperimentId::generate();
        let id2 = ExperimentId::generate();
        assert_ne!(id1, id2);
    }

    #[test]
    fn invalid_experiment_id_returns_error() {
        let result: Result<ExperimentId> = "not-a-valid-ulid".parse();
        assert!(result.is_err());
    }

    #[test]
    fn valid_names() {
        assert!(ApplicationName::new("shop").is_ok());
        assert!(ApplicationName::new("shop-eu.prod").is_ok());
        assert!(ExperimentLabel::new("cart-cta").is_ok());
        assert!(ExperimentLabel::new("checkout_v2").is_ok());
        assert!(ExperimentLabel::new("9lives").is_ok());
    }

    #[test]
    fn invalid_names() {
        assert!(ApplicationName::new("").is_err());
        assert!(ApplicationName::new("has spaces").is_err());
        assert!(ApplicationName::new("-leading-hyphen").is_err());
        assert!(ExperimentLabel::new(".leading-dot").is_err());
        assert!(ExperimentLabel::new("a".repeat(65)).is_err());
        assert!(ExperimentLabel::new("emoji🦀").is_err());
    }

    #[test]
    fn name_serde_is_transparent() {
        let application = ApplicationName::new("shop").unwrap();
        let json = serde_json::to_string(&application).unwrap();
        assert_eq!(json, "\"shop\"");
    }
}
