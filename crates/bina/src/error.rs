//! Error types for container reading and writing.

use std::{fmt, io};

/// Result type for codec operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while reading or writing a container.
#[derive(Debug)]
pub enum Error {
    /// The underlying stream failed.
    Io(io::Error),
    /// A magic value did not match.
    InvalidSignature {
        /// The signature the dialect requires.
        expected: String,
        /// The bytes found in the stream.
        actual: String,
    },
    /// A read ran past the end of the stream.
    UnexpectedEndOfData { context: &'static str },
    /// A patch was requested for an offset that was never reserved.
    UnknownOffsetName { name: String },
    /// An offset name was reserved twice without being patched in between.
    DuplicateOffsetName { name: String },
    /// A by-name field dispatch met a type with no wire representation.
    UnsupportedType { type_name: String },
    /// A value cannot be represented in the format.
    InvalidFormat {
        context: &'static str,
        detail: String,
    },
}

impl Error {
    pub(crate) fn invalid_format(context: &'static str, detail: impl Into<String>) -> Self {
        Self::InvalidFormat {
            context,
            detail: detail.into(),
        }
    }

    pub(crate) fn invalid_signature(expected: &[u8], actual: &[u8]) -> Self {
        Self::InvalidSignature {
            expected: escape_bytes(expected),
            actual: escape_bytes(actual),
        }
    }
}

/// Render signature bytes as text, escaping anything that is not printable.
fn escape_bytes(bytes: &[u8]) -> String {
    bytes.iter().flat_map(|b| b.escape_ascii()).map(char::from).collect()
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Io(e) => write!(f, "i/o error: {e}"),
            Self::InvalidSignature { expected, actual } => {
                write!(f, "invalid signature: expected \"{expected}\", got \"{actual}\"")
            }
            Self::UnexpectedEndOfData { context } => {
                write!(f, "unexpected end of data in {context}")
            }
            Self::UnknownOffsetName { name } => {
                write!(f, "no offset named \"{name}\" has been reserved")
            }
            Self::DuplicateOffsetName { name } => {
                write!(f, "offset \"{name}\" is already reserved and not yet patched")
            }
            Self::UnsupportedType { type_name } => {
                write!(f, "type \"{type_name}\" has no binary representation")
            }
            Self::InvalidFormat { context, detail } => {
                write!(f, "invalid format in {context}: {detail}")
            }
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<io::Error> for Error {
    fn from(e: io::Error) -> Self {
        if e.kind() == io::ErrorKind::UnexpectedEof {
            Self::UnexpectedEndOfData { context: "stream" }
        } else {
            Self::Io(e)
        }
    }
}
