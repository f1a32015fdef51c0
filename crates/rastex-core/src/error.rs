//! Error types for texture engine operations.
//!
//! Provides unified error handling for pixel conversion, codec and
//! registry operations across the rastex crates.

use std::io;
use thiserror::Error;

/// Result type alias using [`Error`] as the error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur during texture engine operations.
#[derive(Debug, Error)]
pub enum Error {
    /// File or stream I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// A caller-supplied value was rejected.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// No codec or provider is registered under the requested name.
    #[error("unknown format: {0}")]
    UnknownFormat(String),

    /// A type name is already taken in the target registry subtree.
    #[error("type name conflict: '{0}' is already registered")]
    TypeNameConflict(String),

    /// The stream ended before a complete structure could be read.
    #[error("stream truncated: {0}")]
    StreamTruncated(String),

    /// The stream contents do not form a valid structure.
    #[error("malformed stream: {0}")]
    StreamMalformed(String),

    /// A raster format, orientation or compression is not handled.
    #[error("unsupported: {0}")]
    Unsupported(String),

    /// A pixel or palette buffer could not be allocated.
    #[error("allocation of {0} bytes failed")]
    AllocationFailed(usize),

    /// `put_to_raster` was called on an image whose bytes belong to a raster.
    #[error("image data is already owned by a raster")]
    AlreadyOwned,

    /// Mipmap dimensions are disallowed by the platform's size rules.
    #[error("mipmap dimensions {width}x{height} violate platform size rules")]
    SizeRuleViolation {
        /// Offending layer width.
        width: u32,
        /// Offending layer height.
        height: u32,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_includes_context() {
        let err = Error::SizeRuleViolation {
            width: 3,
            height: 7,
        };
        assert!(err.to_string().contains("3x7"));

        let err = Error::TypeNameConflict("PVR".into());
        assert!(err.to_string().contains("PVR"));
    }

    #[test]
    fn io_error_converts() {
        fn truncated_read() -> Result<()> {
            Err(io::Error::new(io::ErrorKind::UnexpectedEof, "eof"))?;
            Ok(())
        }
        assert!(matches!(truncated_read(), Err(Error::Io(_))));
    }
}
