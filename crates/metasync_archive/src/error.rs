//! Error types for the archive codec.

use thiserror::Error;

/// Result type for archive operations.
pub type ArchiveResult<T> = Result<T, ArchiveError>;

/// Errors raised while decoding or encoding an archive.
#[derive(Error, Debug)]
pub enum ArchiveError {
    /// The payload is not valid base64.
    #[error("invalid base64 payload: {0}")]
    Base64(#[from] base64::DecodeError),

    /// The zip container is corrupt, or an entry failed its CRC check.
    #[error("zip error: {0}")]
    Zip(#[from] zip::result::ZipError),

    /// Reading or writing entry content failed.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Two entries share a path.
    #[error("duplicate entry path: {0}")]
    DuplicatePath(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display() {
        let err = ArchiveError::DuplicatePath("src/classes/Foo.cls".into());
        assert_eq!(err.to_string(), "duplicate entry path: src/classes/Foo.cls");
    }
}
