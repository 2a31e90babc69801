//! Inbound message model: header word, ordered fields, optional payload.

use std::fmt;

/// A decoded field value.
///
/// FCP carries everything as text; values that parse as integers are
/// surfaced as [`FieldValue::Number`] so callers such as the payload reader
/// can consume them without re-parsing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FieldValue {
    /// Verbatim text value.
    Text(String),
    /// Value that parsed as a signed 64-bit integer.
    Number(i64),
}

impl FieldValue {
    /// Coerces raw line text into a field value, preferring integers.
    #[must_use]
    pub fn coerce(raw: &str) -> Self {
        raw.parse::<i64>()
            .map_or_else(|_| Self::Text(raw.to_owned()), Self::Number)
    }

    /// Returns the text form, if this value is textual.
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(value) => Some(value),
            Self::Number(_) => None,
        }
    }

    /// Returns the numeric form, if this value is an integer.
    pub const fn as_number(&self) -> Option<i64> {
        match self {
            Self::Text(_) => None,
            Self::Number(value) => Some(*value),
        }
    }
}

impl fmt::Display for FieldValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Text(value) => f.write_str(value),
            Self::Number(value) => write!(f, "{value}"),
        }
    }
}

impl From<&str> for FieldValue {
    fn from(value: &str) -> Self {
        Self::Text(value.to_owned())
    }
}

impl From<String> for FieldValue {
    fn from(value: String) -> Self {
        Self::Text(value)
    }
}

impl From<i64> for FieldValue {
    fn from(value: i64) -> Self {
        Self::Number(value)
    }
}

/// A decoded inbound FCP message.
///
/// Fields keep their arrival order and keys are unique: a repeated key
/// overwrites the earlier value, matching how the node emits frames.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Message {
    header: String,
    fields: Vec<(String, FieldValue)>,
    payload: Option<Vec<u8>>,
}

impl Message {
    /// Creates an empty message with the given header word.
    #[must_use]
    pub fn new(header: impl Into<String>) -> Self {
        Self {
            header: header.into(),
            fields: Vec::new(),
            payload: None,
        }
    }

    /// The header word naming the message type.
    #[must_use]
    pub fn header(&self) -> &str {
        &self.header
    }

    /// Inserts or replaces a field, preserving first-insertion order.
    pub fn set(&mut self, key: impl Into<String>, value: impl Into<FieldValue>) {
        let entry_key = key.into();
        let entry_value = value.into();
        if let Some(slot) = self
            .fields
            .iter_mut()
            .find(|(existing, _)| *existing == entry_key)
        {
            slot.1 = entry_value;
            return;
        }
        self.fields.push((entry_key, entry_value));
    }

    /// Attaches the raw payload bytes.
    pub fn set_payload(&mut self, payload: Vec<u8>) {
        self.payload = Some(payload);
    }

    /// Looks up a field by key.
    pub fn get(&self, key: &str) -> Option<&FieldValue> {
        self.fields
            .iter()
            .find(|(existing, _)| existing == key)
            .map(|(_, value)| value)
    }

    /// Looks up a textual field by key.
    pub fn text(&self, key: &str) -> Option<&str> {
        self.get(key).and_then(FieldValue::as_text)
    }

    /// Looks up a numeric field by key.
    pub fn number(&self, key: &str) -> Option<i64> {
        self.get(key).and_then(FieldValue::as_number)
    }

    /// The request identifier this message relates to, if any.
    pub fn identifier(&self) -> Option<&str> {
        self.text(crate::IDENTIFIER_FIELD)
    }

    /// Ordered view of the decoded fields.
    #[must_use]
    pub fn fields(&self) -> &[(String, FieldValue)] {
        &self.fields
    }

    /// The raw payload, when the frame carried a `Data` segment.
    pub fn payload(&self) -> Option<&[u8]> {
        self.payload.as_deref()
    }

    /// Consumes the message, returning the payload bytes if present.
    pub fn into_payload(self) -> Option<Vec<u8>> {
        self.payload
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use rstest::rstest;

    #[rstest]
    #[case("42", FieldValue::Number(42))]
    #[case("-7", FieldValue::Number(-7))]
    #[case("2.0", FieldValue::Text(String::from("2.0")))]
    #[case("CHK@abc", FieldValue::Text(String::from("CHK@abc")))]
    #[case("", FieldValue::Text(String::new()))]
    fn coerces_integer_looking_values(#[case] raw: &str, #[case] expected: FieldValue) {
        assert_eq!(FieldValue::coerce(raw), expected);
    }

    #[test]
    fn repeated_keys_overwrite_in_place() {
        let mut message = Message::new("NodeHello");
        message.set("Version", "Fred,0.7");
        message.set("Build", 1492_i64);
        message.set("Version", "Fred,0.8");

        assert_eq!(message.text("Version"), Some("Fred,0.8"));
        let keys: Vec<&str> = message
            .fields()
            .iter()
            .map(|(key, _)| key.as_str())
            .collect();
        assert_eq!(keys, ["Version", "Build"]);
    }

    #[test]
    fn identifier_reads_the_well_known_field() {
        let mut message = Message::new("DataFound");
        assert_eq!(message.identifier(), None);
        message.set("Identifier", "fcp-1-1");
        assert_eq!(message.identifier(), Some("fcp-1-1"));
    }
}
