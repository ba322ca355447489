// =============================================================================
// Error taxonomy for the ingestion pipeline
// =============================================================================
//
// Recovery policy per kind:
//   - DecodeError: drop the single frame, warn, keep streaming.
//   - StoreError:  drop the single write, error-log, keep streaming; a failed
//     candle sweep is retried at the next tick.
//   - Transport errors stay `anyhow::Error` inside the feed client and are
//     answered with a reconnect delay.
// =============================================================================

use thiserror::Error;

/// A frame that could not be turned into a typed feed event.
#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("frame is not valid JSON: {0}")]
    BadJson(#[from] serde_json::Error),

    #[error("missing required field `{0}`")]
    MissingField(&'static str),

    #[error("field `{field}` has an unexpected type: {detail}")]
    TypeMismatch {
        field: &'static str,
        detail: String,
    },

    #[error("malformed timestamp `{0}`")]
    MalformedTimestamp(String),
}

/// A failed store operation (insert or query).
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("unexpected row data: {0}")]
    BadRow(String),
}
