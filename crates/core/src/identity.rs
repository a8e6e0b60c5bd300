//! Caller identity — who is making a request, as far as the pipeline cares.
//!
//! Credential issuance and verification belong to an [`AuthProvider`]; the
//! pipeline only ever sees the resolved [`RequestIdentity`].

use std::fmt;

use serde::{Deserialize, Serialize};

/// Identifier of a verified user.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(String);

impl UserId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for UserId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for UserId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// The authentication state of one request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RequestIdentity {
    /// Credentials were presented and verified.
    Verified(UserId),
    /// No credentials were presented.
    Anonymous,
}

impl RequestIdentity {
    pub fn user_id(&self) -> Option<&UserId> {
        match self {
            RequestIdentity::Verified(id) => Some(id),
            RequestIdentity::Anonymous => None,
        }
    }
}

/// Verifies a bearer credential and yields the user it belongs to.
pub trait AuthProvider: Send + Sync {
    /// A human-readable name for this provider (e.g., "static_tokens").
    fn name(&self) -> &str;

    /// Returns the user for a valid credential, `None` otherwise.
    fn identify(&self, bearer: &str) -> Option<UserId>;
}
