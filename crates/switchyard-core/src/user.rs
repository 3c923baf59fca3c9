//! Caller identity attached to mutations.
//!
//! Authentication happens outside the core; by the time a request reaches
//! the service layer it carries a resolved [`UserInfo`] used for audit
//! records and domain events.

use serde::{Deserialize, Serialize};
use std::fmt;

/// The resolved identity of the caller performing an operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserInfo {
    /// Login name of the caller.
    pub username: String,

    /// Email address, when known.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
}

impl UserInfo {
    /// Creates a caller identity from a username.
    #[must_use]
    pub fn from_username(username: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            email: None,
        }
    }

    /// Sets the email address.
    #[must_use]
    pub fn with_email(mut self, email: impl Into<String>) -> Self {
        self.email = Some(email.into());
        self
    }
}

impl fmt::Display for UserInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.username)
    }
}
