//! Opaque keyset cursors for entity list pagination
//!
//! A cursor pins the position after the last row of a page in the stable
//! `(created_at, id)` order. It is handed to callers as a base64 string so
//! the encoding can change without breaking them.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine as _;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::errors::EntityError;
use crate::domain::value_objects::EntityId;

/// Position marker after the last entity of a page.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageCursor {
    created_at_us: i64,
    id: EntityId,
}

impl PageCursor {
    pub(crate) fn after(created_at: DateTime<Utc>, id: EntityId) -> Self {
        Self {
            created_at_us: created_at.timestamp_micros(),
            id,
        }
    }

    /// Creation timestamp of the last seen row, in microseconds since epoch.
    pub(crate) fn created_at_us(&self) -> i64 {
        self.created_at_us
    }

    pub(crate) fn id(&self) -> EntityId {
        self.id
    }

    /// Render the cursor as an opaque string for callers.
    pub fn encode(&self) -> String {
        let json = serde_json::to_vec(self).expect("cursor serialization is infallible");
        URL_SAFE_NO_PAD.encode(json)
    }

    /// Parse a caller-supplied cursor string.
    pub fn decode(raw: &str) -> Result<Self, EntityError> {
        let bytes = URL_SAFE_NO_PAD
            .decode(raw)
            .map_err(|_| EntityError::Validation("Invalid page cursor".to_string()))?;
        serde_json::from_slice(&bytes)
            .map_err(|_| EntityError::Validation("Invalid page cursor".to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cursor_round_trips_through_encoding() {
        let cursor = PageCursor::after(Utc::now(), EntityId::new());
        let decoded = PageCursor::decode(&cursor.encode()).unwrap();
        assert_eq!(cursor, decoded);
    }

    #[test]
    fn test_garbage_cursor_is_rejected() {
        assert!(PageCursor::decode("not a cursor").is_err());
        assert!(PageCursor::decode("bm90IGpzb24").is_err());
    }
}
