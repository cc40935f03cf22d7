//! Represents a message tracked by the relay's index.

use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// Upload lifecycle of an index entry.
///
/// The only transition out of `Uploading` is either `Complete` (verified
/// EOF) or removal of the entry altogether (hash mismatch or expiry).
/// `Complete` entries never change state again.
#[derive(Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Debug, sqlx::Type)]
#[sqlx(rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum UploadState {
    Uploading,
    Complete,
}

/// A single index entry, keyed by the content digest of its payload.
///
/// The `Message` struct stores metadata only; payload bytes live in the
/// blob store under the same hash.
#[derive(Serialize, Deserialize, Clone, FromRow, Debug)]
pub struct Message {
    /// Lowercase hex SHA-256 of the complete payload. Doubles as the
    /// storage key and the integrity check at seal time.
    pub hash: String,

    /// Who sent the message. Free-form, never empty.
    pub author: String,

    /// Caller-supplied payload tag (e.g. "text", "image"). Not validated
    /// against the content.
    pub kind: String,

    /// Filename used for download disposition only.
    pub filename: String,

    /// Milliseconds since epoch at announce time. Non-decreasing across
    /// entries created by one process.
    pub timestamp: i64,

    /// Current upload lifecycle state.
    pub state: UploadState,
}
