//! Connection identifier generation.

use std::fmt;

use axum::http::HeaderValue;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Opaque, globally unique token addressing one live connection.
///
/// Generated once per accepted connection attempt, before the transport is
/// upgraded, and used as the sole external handle for a session: as the
/// registry key, as the `/message/{connectionId}` path segment, and as the
/// `X-WSGW-CONNECTION-ID` header value. The rendered form contains only
/// ASCII hex digits and hyphens, so it is safe in both positions.
///
/// An identifier may be reused after its session has been removed; it never
/// collides with a currently live one.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConnectionId(String);

impl ConnectionId {
    /// Generate a fresh identifier. Infallible.
    ///
    /// UUIDv7, so identifiers sort lexically by creation time.
    pub fn generate() -> Self {
        Self(Uuid::now_v7().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Header form of the identifier. Backend calls only ever carry
    /// generated identifiers, which are UUID text and always legal; a
    /// caller-supplied token that is not falls back to empty, which the
    /// backend treats as unknown.
    pub(crate) fn header_value(&self) -> HeaderValue {
        HeaderValue::from_str(&self.0).unwrap_or_else(|_| HeaderValue::from_static(""))
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for ConnectionId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

// The push path must accept arbitrary tokens for lookup, not only values
// this process generated.
impl From<String> for ConnectionId {
    fn from(raw: String) -> Self {
        Self(raw)
    }
}

impl From<&str> for ConnectionId {
    fn from(raw: &str) -> Self {
        Self(raw.to_string())
    }
}
