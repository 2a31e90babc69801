//! Byte-exact encoder and decoder for FCP frames.

use std::io::{Read, Write};

use crate::errors::WireError;
use crate::message::{FieldValue, Message};
use crate::Command;

/// Line that terminates a payload-free frame on the way out.
const END_MESSAGE: &str = "EndMessage";
/// Alternative terminator the node is allowed to send.
const END: &str = "End";
/// Marker line preceding the raw payload bytes.
const DATA: &str = "Data";

/// Encodes a command onto the wire.
///
/// Emits the header line, each `Key=Value` line in insertion order, then
/// either `DataLength=<n>` + `Data` + the raw payload (no trailing
/// delimiter) or a literal `EndMessage` line.
///
/// # Errors
///
/// Returns [`WireError::Io`] when the writer fails.
pub fn encode(command: &Command, writer: &mut impl Write) -> Result<(), WireError> {
    let mut frame = Vec::new();
    frame.extend_from_slice(command.header().as_bytes());
    frame.push(b'\n');
    for (key, value) in command.fields() {
        frame.extend_from_slice(key.as_bytes());
        frame.push(b'=');
        frame.extend_from_slice(value.as_bytes());
        frame.push(b'\n');
    }
    match command.payload_bytes() {
        Some(payload) => {
            frame.extend_from_slice(format!("{}={}\n", crate::DATA_LENGTH_FIELD, payload.len()).as_bytes());
            frame.extend_from_slice(DATA.as_bytes());
            frame.push(b'\n');
            frame.extend_from_slice(payload);
        }
        None => {
            frame.extend_from_slice(END_MESSAGE.as_bytes());
            frame.push(b'\n');
        }
    }
    writer.write_all(&frame)?;
    writer.flush()?;
    Ok(())
}

/// Decodes one inbound frame.
///
/// Blank lines before the header are skipped. Body lines are consumed until
/// an `End`/`EndMessage` terminator, or a `Data` marker followed by exactly
/// the previously declared `DataLength` payload bytes.
///
/// # Errors
///
/// Returns [`WireError::MalformedField`] for a body line without `=`,
/// [`WireError::MissingDataLength`] for a `Data` marker with no declared
/// length, [`WireError::InvalidEncoding`] for a header or body line that is
/// not valid UTF-8, and [`WireError::Io`] when the stream fails or closes
/// mid-frame.
pub fn decode(reader: &mut impl Read) -> Result<Message, WireError> {
    let header = loop {
        let line = read_line(reader)?;
        if !line.is_empty() {
            break line;
        }
    };
    let mut message = Message::new(header);

    loop {
        let line = read_line(reader)?;
        if line == END || line == END_MESSAGE {
            break;
        }
        if line == DATA {
            let declared = message
                .number(crate::DATA_LENGTH_FIELD)
                .ok_or(WireError::MissingDataLength)?;
            let length = usize::try_from(declared)
                .map_err(|_| WireError::OversizedPayload { length: declared })?;
            let mut payload = vec![0_u8; length];
            reader.read_exact(&mut payload)?;
            message.set_payload(payload);
            break;
        }
        let (key, value) = line
            .split_once('=')
            .ok_or_else(|| WireError::malformed_field(&line))?;
        message.set(key, FieldValue::coerce(value));
    }

    Ok(message)
}

/// Reads a single `\n`-terminated line, byte at a time, and strips the
/// terminator and any trailing carriage return.
///
/// Byte-at-a-time reads keep the stream position exact so a following raw
/// payload segment is never swallowed by read-ahead buffering.
fn read_line(reader: &mut impl Read) -> Result<String, WireError> {
    let mut line = Vec::new();
    let mut byte = [0_u8; 1];
    loop {
        reader.read_exact(&mut byte)?;
        if byte == [b'\n'] {
            break;
        }
        line.extend_from_slice(&byte);
    }
    if line.last() == Some(&b'\r') {
        line.pop();
    }
    String::from_utf8(line).map_err(|error| WireError::InvalidEncoding {
        bytes: error.into_bytes(),
    })
}

#[cfg(test)]
mod tests {
    #![expect(clippy::expect_used, reason = "tests use expect for clarity")]

    use super::*;

    use std::io::Cursor;

    use rstest::rstest;

    use crate::Persistence;

    fn encode_to_vec(command: &Command) -> Vec<u8> {
        let mut buffer = Vec::new();
        encode(command, &mut buffer).expect("encode command");
        buffer
    }

    #[test]
    fn encodes_payload_free_command_with_terminator() {
        let command = Command::new("ClientHello")
            .field("Name", "session-1")
            .field("ExpectedVersion", "2.0");
        let bytes = encode_to_vec(&command);
        assert_eq!(
            bytes,
            b"ClientHello\nName=session-1\nExpectedVersion=2.0\nEndMessage\n"
        );
    }

    #[test]
    fn encodes_payload_with_declared_length_and_no_trailing_delimiter() {
        let command = Command::new("ClientPut")
            .field("URI", "CHK@")
            .payload(b"hello".to_vec());
        let bytes = encode_to_vec(&command);
        assert_eq!(bytes, b"ClientPut\nURI=CHK@\nDataLength=5\nData\nhello");
    }

    #[test]
    fn round_trips_header_fields_and_payload() {
        let command = Command::new("ClientPut")
            .identifier("fcp-3")
            .persistence(Persistence::Forever)
            .global(true)
            .field("Metadata.ContentType", "application/octet-stream")
            .field("MaxRetries", 3)
            .payload(vec![0, 159, 146, 150, b'\n', b'E']);

        let mut cursor = Cursor::new(encode_to_vec(&command));
        let message = decode(&mut cursor).expect("decode frame");

        assert_eq!(message.header(), "ClientPut");
        assert_eq!(message.identifier(), Some("fcp-3"));
        assert_eq!(message.text("Persistence"), Some("forever"));
        assert_eq!(message.text("Global"), Some("true"));
        assert_eq!(message.number("MaxRetries"), Some(3));
        assert_eq!(message.number("DataLength"), Some(6));
        assert_eq!(message.payload(), Some([0, 159, 146, 150, b'\n', b'E'].as_slice()));
        let consumed = usize::try_from(cursor.position()).expect("position fits");
        assert_eq!(consumed, cursor.get_ref().len());
    }

    #[rstest]
    #[case(b"NodeHello\nEndMessage\n".as_slice())]
    #[case(b"\n\nNodeHello\nEnd\n".as_slice())]
    fn decodes_terminators_and_leading_blank_lines(#[case] frame: &[u8]) {
        let message = decode(&mut Cursor::new(frame)).expect("decode frame");
        assert_eq!(message.header(), "NodeHello");
        assert!(message.payload().is_none());
    }

    #[test]
    fn decodes_consecutive_frames_from_one_stream() {
        let mut stream = Cursor::new(
            b"URIGenerated\nIdentifier=a\nEndMessage\nPutSuccessful\nIdentifier=a\nEndMessage\n"
                .to_vec(),
        );
        let first = decode(&mut stream).expect("first frame");
        let second = decode(&mut stream).expect("second frame");
        assert_eq!(first.header(), "URIGenerated");
        assert_eq!(second.header(), "PutSuccessful");
    }

    #[test]
    fn malformed_body_line_aborts_the_read() {
        let mut stream = Cursor::new(b"DataFound\nno separator here\nEndMessage\n".to_vec());
        let error = decode(&mut stream).expect_err("should reject line without =");
        assert!(matches!(error, WireError::MalformedField { line } if line == "no separator here"));
    }

    #[test]
    fn data_marker_without_length_is_rejected() {
        let mut stream = Cursor::new(b"AllData\nIdentifier=a\nData\nxxxx".to_vec());
        let error = decode(&mut stream).expect_err("should require DataLength");
        assert!(matches!(error, WireError::MissingDataLength));
    }

    #[test]
    fn truncated_payload_is_an_io_fault() {
        let mut stream = Cursor::new(b"AllData\nDataLength=10\nData\nshort".to_vec());
        let error = decode(&mut stream).expect_err("should fail on short payload");
        assert!(matches!(error, WireError::Io(_)));
    }

    #[test]
    fn invalid_utf8_in_a_line_is_a_decode_fault() {
        let mut stream = Cursor::new(b"Node\xffHello\nEndMessage\n".to_vec());
        let error = decode(&mut stream).expect_err("should reject invalid UTF-8");
        assert!(matches!(error, WireError::InvalidEncoding { bytes } if bytes.contains(&0xff)));
    }

    #[test]
    fn carriage_returns_are_stripped_from_lines() {
        let mut stream = Cursor::new(b"NodeHello\r\nVersion=Fred,0.7\r\nEndMessage\r\n".to_vec());
        let message = decode(&mut stream).expect("decode frame");
        assert_eq!(message.text("Version"), Some("Fred,0.7"));
    }
}
