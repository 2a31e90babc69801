//! Error types for wire encoding and decoding.

use std::io;

use thiserror::Error;

/// Errors surfaced while encoding or decoding FCP frames.
#[derive(Debug, Error)]
pub enum WireError {
    /// The underlying stream failed or closed mid-frame.
    #[error("IO error on FCP stream: {0}")]
    Io(#[from] io::Error),

    /// A body line carried no `=` separator.
    #[error("malformed field line: {line:?}")]
    MalformedField {
        /// The offending line text.
        line: String,
    },

    /// A header or field line was not valid UTF-8.
    #[error("frame line is not valid UTF-8: {bytes:?}")]
    InvalidEncoding {
        /// The raw bytes that failed UTF-8 decoding.
        bytes: Vec<u8>,
    },

    /// A `Data` marker arrived without a preceding `DataLength` field.
    #[error("Data marker without a DataLength declaration")]
    MissingDataLength,

    /// The declared payload length cannot index a buffer on this host.
    #[error("declared payload length {length} is not representable")]
    OversizedPayload {
        /// The declared payload length.
        length: i64,
    },

    /// The global-queue flag was set on a connection-scoped command.
    #[error("global commands require reboot or forever persistence")]
    GlobalRequiresPersistence,

    /// A key URI did not start with a recognised address form.
    #[error("unrecognised key address form: {uri:?}")]
    UnknownKeyKind {
        /// The unrecognised key URI.
        uri: String,
    },
}

impl WireError {
    /// Creates a malformed field error for the offending line.
    #[must_use]
    pub fn malformed_field(line: impl Into<String>) -> Self {
        Self::MalformedField { line: line.into() }
    }

    /// Creates an unknown key kind error for the offending URI.
    #[must_use]
    pub fn unknown_key_kind(uri: impl Into<String>) -> Self {
        Self::UnknownKeyKind { uri: uri.into() }
    }
}
