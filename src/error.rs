//! Error taxonomy shared by the catalog store and the pipeline stages.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, CatalogError>;

#[derive(Error, Debug)]
pub enum CatalogError {
    #[error("not found: {0}")]
    NotFound(String),

    /// Uniqueness violation, e.g. inserting a photo path twice.
    #[error("conflict: {0}")]
    Conflict(String),

    /// On-disk data violates an invariant (bad embedding blob, etc.).
    #[error("corrupt data: {0}")]
    Corrupt(String),

    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// Nested transaction, commit without begin, use after close.
    #[error("invalid state: {0}")]
    InvalidState(String),

    #[error("i/o error: {0}")]
    Io(String),

    #[error("operation cancelled")]
    Cancelled,
}

impl CatalogError {
    /// Short kind tag for user-facing diagnostics.
    pub fn kind(&self) -> &'static str {
        match self {
            CatalogError::NotFound(_) => "not-found",
            CatalogError::Conflict(_) => "conflict",
            CatalogError::Corrupt(_) => "corrupt",
            CatalogError::InvalidInput(_) => "invalid-input",
            CatalogError::InvalidState(_) => "invalid-state",
            CatalogError::Io(_) => "io",
            CatalogError::Cancelled => "cancelled",
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, CatalogError::Cancelled)
    }
}

impl From<std::io::Error> for CatalogError {
    fn from(err: std::io::Error) -> Self {
        CatalogError::Io(err.to_string())
    }
}

impl From<rusqlite::Error> for CatalogError {
    fn from(err: rusqlite::Error) -> Self {
        match err {
            rusqlite::Error::QueryReturnedNoRows => {
                CatalogError::NotFound("no matching row".to_string())
            }
            rusqlite::Error::SqliteFailure(e, msg)
                if e.code == rusqlite::ErrorCode::ConstraintViolation =>
            {
                CatalogError::Conflict(msg.unwrap_or_else(|| "constraint violation".to_string()))
            }
            // Carries a CatalogError raised while decoding a column (embedding
            // blobs); unwrap it so the original kind survives the round trip.
            rusqlite::Error::FromSqlConversionFailure(_, _, source) => {
                match source.downcast::<CatalogError>() {
                    Ok(inner) => *inner,
                    Err(source) => CatalogError::Corrupt(source.to_string()),
                }
            }
            other => CatalogError::Io(other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_no_rows_maps_to_not_found() {
        let err: CatalogError = rusqlite::Error::QueryReturnedNoRows.into();
        assert!(matches!(err, CatalogError::NotFound(_)));
    }

    #[test]
    fn test_kind_tags() {
        assert_eq!(CatalogError::Cancelled.kind(), "cancelled");
        assert_eq!(CatalogError::Conflict("x".into()).kind(), "conflict");
    }
}
