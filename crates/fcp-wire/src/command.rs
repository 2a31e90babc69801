//! Outbound command model.

use std::fmt;

use strum::{Display, EnumString};

use crate::errors::WireError;

/// Daemon-side durability of a queued request.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Display, EnumString)]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
pub enum Persistence {
    /// The request lives only as long as this connection.
    #[default]
    Connection,
    /// The request survives until the daemon restarts.
    Reboot,
    /// The request survives daemon restarts.
    Forever,
}

/// An outbound FCP command: header word, ordered unique fields, optional
/// raw payload.
///
/// Persistence and the global-queue flag travel as ordinary `Persistence`
/// and `Global` fields; the typed accessors below parse them back out so
/// the engine can reason about a command without duplicating state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Command {
    header: String,
    fields: Vec<(String, String)>,
    payload: Option<Vec<u8>>,
}

impl Command {
    /// Creates a command with the given header word.
    #[must_use]
    pub fn new(header: impl Into<String>) -> Self {
        Self {
            header: header.into(),
            fields: Vec::new(),
            payload: None,
        }
    }

    /// The header word naming the operation.
    #[must_use]
    pub fn header(&self) -> &str {
        &self.header
    }

    /// Sets or replaces a field, preserving first-insertion order.
    #[must_use]
    pub fn field(mut self, key: impl Into<String>, value: impl fmt::Display) -> Self {
        self.set_field(key, value);
        self
    }

    /// In-place variant of [`Command::field`] for post-construction edits.
    pub fn set_field(&mut self, key: impl Into<String>, value: impl fmt::Display) {
        let field_key = key.into();
        let field_value = value.to_string();
        if let Some(slot) = self
            .fields
            .iter_mut()
            .find(|(existing, _)| *existing == field_key)
        {
            slot.1 = field_value;
            return;
        }
        self.fields.push((field_key, field_value));
    }

    /// Sets the request identifier field.
    #[must_use]
    pub fn identifier(self, identifier: impl fmt::Display) -> Self {
        self.field(crate::IDENTIFIER_FIELD, identifier)
    }

    /// Sets the persistence class field.
    #[must_use]
    pub fn persistence(self, persistence: Persistence) -> Self {
        self.field("Persistence", persistence)
    }

    /// Sets the global-queue flag field.
    #[must_use]
    pub fn global(self, global: bool) -> Self {
        self.field("Global", global)
    }

    /// Attaches the raw payload. Encoding emits `DataLength`/`Data` instead
    /// of the `EndMessage` terminator when a payload is present.
    #[must_use]
    pub fn payload(mut self, payload: Vec<u8>) -> Self {
        self.payload = Some(payload);
        self
    }

    /// Looks up a field by key.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.fields
            .iter()
            .find(|(existing, _)| existing == key)
            .map(|(_, value)| value.as_str())
    }

    /// The request identifier, when one has been set.
    pub fn request_identifier(&self) -> Option<&str> {
        self.get(crate::IDENTIFIER_FIELD)
    }

    /// The persistence class, defaulting to connection scope.
    #[must_use]
    pub fn persistence_class(&self) -> Persistence {
        self.get("Persistence")
            .and_then(|value| value.parse().ok())
            .unwrap_or_default()
    }

    /// Whether the command targets the daemon's global queue.
    #[must_use]
    pub fn is_global(&self) -> bool {
        self.get("Global") == Some("true")
    }

    /// Whether the command outlives this connection on the daemon side.
    #[must_use]
    pub fn is_persistent(&self) -> bool {
        self.persistence_class() != Persistence::Connection
    }

    /// Ordered view of the fields.
    #[must_use]
    pub fn fields(&self) -> &[(String, String)] {
        &self.fields
    }

    /// The raw payload, if any.
    pub fn payload_bytes(&self) -> Option<&[u8]> {
        self.payload.as_deref()
    }

    /// Checks the queueing invariant: a global command must carry reboot or
    /// forever persistence.
    ///
    /// # Errors
    ///
    /// Returns [`WireError::GlobalRequiresPersistence`] when the invariant
    /// does not hold.
    pub fn validate(&self) -> Result<(), WireError> {
        if self.is_global() && !self.is_persistent() {
            return Err(WireError::GlobalRequiresPersistence);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use rstest::rstest;

    #[test]
    fn builder_round_trips_typed_fields() {
        let command = Command::new("ClientGet")
            .identifier("fcp-9")
            .persistence(Persistence::Reboot)
            .global(true)
            .field("URI", "KSK@sample");

        assert_eq!(command.request_identifier(), Some("fcp-9"));
        assert_eq!(command.persistence_class(), Persistence::Reboot);
        assert!(command.is_global());
        assert!(command.is_persistent());
        assert_eq!(command.get("URI"), Some("KSK@sample"));
    }

    #[test]
    fn later_fields_replace_earlier_values() {
        let command = Command::new("ClientGet")
            .field("URI", "KSK@old")
            .field("URI", "KSK@new");
        assert_eq!(command.get("URI"), Some("KSK@new"));
        assert_eq!(command.fields().len(), 1);
    }

    #[rstest]
    #[case(Persistence::Connection, false, true)]
    #[case(Persistence::Connection, true, false)]
    #[case(Persistence::Reboot, true, true)]
    #[case(Persistence::Forever, true, true)]
    fn validates_global_persistence_invariant(
        #[case] persistence: Persistence,
        #[case] global: bool,
        #[case] valid: bool,
    ) {
        let command = Command::new("ClientPut")
            .persistence(persistence)
            .global(global);
        assert_eq!(command.validate().is_ok(), valid);
    }

    #[rstest]
    #[case("connection", Persistence::Connection)]
    #[case("Reboot", Persistence::Reboot)]
    #[case("FOREVER", Persistence::Forever)]
    fn parses_persistence_case_insensitively(
        #[case] raw: &str,
        #[case] expected: Persistence,
    ) {
        assert_eq!(raw.parse::<Persistence>().ok(), Some(expected));
        assert_eq!(expected.to_string(), expected.to_string().to_lowercase());
    }
}
