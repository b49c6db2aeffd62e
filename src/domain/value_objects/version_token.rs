//! Opaque version tokens for optimistic concurrency control
//!
//! The store mints a fresh token on every successful write. Callers round-trip
//! the token they last read; a mutating write that presents a stale token
//! fails with a version conflict instead of silently losing the other write.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Store-assigned version token. Opaque to callers; only equality matters.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct VersionToken(String);

impl VersionToken {
    /// Mint a new, unique token. Only store backends create tokens.
    pub(crate) fn mint() -> Self {
        Self(Uuid::new_v4().simple().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for VersionToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for VersionToken {
    fn from(raw: String) -> Self {
        Self(raw)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_minted_tokens_are_unique() {
        assert_ne!(VersionToken::mint(), VersionToken::mint());
    }
}
