//! Wire-level data model and codec for the FCP line protocol.
//!
//! FCP frames are text with an optional raw binary tail: a header word on
//! its own line, zero or more `Key=Value` lines, then either a literal
//! `EndMessage` (or `End`) terminator, or `DataLength=<n>` followed by a
//! literal `Data` line and exactly `n` payload bytes with no trailing
//! delimiter. This crate owns that framing and the associated value model;
//! it knows nothing about sockets, jobs, or dispatch.

mod codec;
mod command;
mod errors;
mod keys;
mod message;

pub use self::codec::{decode, encode};
pub use self::command::{Command, Persistence};
pub use self::errors::WireError;
pub use self::keys::KeyKind;
pub use self::message::{FieldValue, Message};

/// Field name carrying the declared payload length.
pub const DATA_LENGTH_FIELD: &str = "DataLength";

/// Field name carrying the per-request identifier.
pub const IDENTIFIER_FIELD: &str = "Identifier";
