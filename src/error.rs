//! Error types for the streampgp library.
//!
//! Every failure mode of the pipelines surfaces through [`Error`]; nothing
//! is silently swallowed. Errors that occur mid-stream are carried across
//! the `io::Read` boundary inside an [`std::io::Error`] and can be
//! recovered with [`Error::from_io`].

use thiserror::Error;

/// The main error type for streampgp operations.
#[derive(Error, Debug)]
pub enum Error {
    /// Builder was used incorrectly (caller bug, not retriable)
    #[error("Incomplete pipeline configuration: {0}")]
    IncompleteConfiguration(&'static str),

    /// No qualifying key found for the requested purpose
    #[error("Key not found: {0}")]
    KeyNotFound(String),

    /// The session-key packet names a key that is not in the secret ring
    #[error("No matching secret key for {0}")]
    NoMatchingSecretKey(String),

    /// Wrong passphrase for a protected secret key
    #[error("Invalid passphrase for secret key")]
    WrongPassphrase,

    /// Secret key material is structurally broken
    #[error("Corrupt key material: {0}")]
    CorruptKeyMaterial(String),

    /// The packet stream is not valid OpenPGP data
    #[error("Malformed packet stream: {0}")]
    MalformedPacketStream(String),

    /// The modification detection code did not match; plaintext that was
    /// already delivered must be treated as untrusted
    #[error("Message integrity check failed")]
    IntegrityCheckFailed,

    /// The configured signature policy was violated
    #[error("Signature invalid: {0}")]
    SignatureInvalid(String),

    /// Cryptographic operation failed in the provider
    #[error("Cryptographic operation failed: {0}")]
    Crypto(String),

    /// Algorithm not supported
    #[error("Unsupported algorithm: {0}")]
    UnsupportedAlgorithm(String),

    /// Invalid input provided
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// File or stream I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// A specialized Result type for streampgp operations.
pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Wrap this error in an `io::Error` so it can cross a `Read` boundary.
    pub fn into_io(self) -> std::io::Error {
        match self {
            Error::Io(e) => e,
            other => std::io::Error::new(std::io::ErrorKind::InvalidData, other),
        }
    }

    /// Recover a streampgp error that crossed a `Read` boundary.
    ///
    /// Plain I/O errors come back as [`Error::Io`].
    pub fn from_io(err: std::io::Error) -> Self {
        if err.get_ref().is_some_and(|inner| inner.is::<Error>()) {
            let kind = err.kind();
            match err.into_inner().expect("checked above").downcast::<Error>() {
                Ok(e) => *e,
                Err(e) => Error::Io(std::io::Error::new(kind, e)),
            }
        } else {
            Error::Io(err)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_round_trip_through_io() {
        let io_err = Error::IntegrityCheckFailed.into_io();
        match Error::from_io(io_err) {
            Error::IntegrityCheckFailed => {}
            other => panic!("expected IntegrityCheckFailed, got {other:?}"),
        }
    }

    #[test]
    fn test_plain_io_error_stays_io() {
        let io_err = std::io::Error::new(std::io::ErrorKind::UnexpectedEof, "eof");
        match Error::from_io(io_err) {
            Error::Io(e) => assert_eq!(e.kind(), std::io::ErrorKind::UnexpectedEof),
            other => panic!("expected Io, got {other:?}"),
        }
    }
}
