//! Wire codec for the generator protocol.
//!
//! Inbound (commands channel): length-prefixed ASCII frames,
//! `[1-byte length N][N bytes payload]`. Outbound (results channel): exactly
//! four big-endian bytes per response, flushed immediately — the generator
//! blocks on each response before sending its next command, so batching
//! would stall the exchange.

use std::io::{self, Read, Write};

use thiserror::Error;

#[derive(Error, Debug)]
pub enum FrameError {
    #[error("channel I/O failed: {0}")]
    Io(#[from] io::Error),
    #[error("peer closed mid-frame after {got} of {want} payload bytes")]
    Truncated { got: usize, want: usize },
    #[error("frame payload is not ASCII: {0:?}")]
    NonAscii(Vec<u8>),
    #[error("unknown command {0:?}")]
    UnknownCommand(String),
}

/// One command received from the generator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Request for one 31-bit unsigned random value.
    Rand,
    /// Open a nested named region.
    Start(String),
    /// Close the most recently opened region.
    End,
    /// The generator has finished writing its output and is shutting down.
    Terminate,
}

impl Command {
    pub fn parse(text: &str) -> Result<Self, FrameError> {
        match text {
            "RAND" => Ok(Command::Rand),
            "END" => Ok(Command::End),
            "TERMINATE" => Ok(Command::Terminate),
            _ => {
                if let Some(label) = text.strip_prefix("START ") {
                    if !label.is_empty() && !label.contains(char::is_whitespace) {
                        return Ok(Command::Start(label.to_string()));
                    }
                }
                Err(FrameError::UnknownCommand(text.to_string()))
            }
        }
    }
}

/// Reads one length-prefixed frame. Returns `Ok(None)` on a clean EOF, i.e.
/// the peer closed before a length byte arrived; EOF inside a frame is
/// `FrameError::Truncated`. Short reads are re-driven until the frame is
/// whole, so a partial frame is never surfaced.
pub fn read_frame<R: Read>(reader: &mut R) -> Result<Option<String>, FrameError> {
    let mut len_byte = [0u8; 1];
    loop {
        match reader.read(&mut len_byte) {
            Ok(0) => return Ok(None),
            Ok(_) => break,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e.into()),
        }
    }
    let want = len_byte[0] as usize;
    let mut payload = vec![0u8; want];
    let mut got = 0;
    while got < want {
        match reader.read(&mut payload[got..]) {
            Ok(0) => return Err(FrameError::Truncated { got, want }),
            Ok(n) => got += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e.into()),
        }
    }
    if !payload.is_ascii() {
        return Err(FrameError::NonAscii(payload));
    }
    String::from_utf8(payload)
        .map(Some)
        .map_err(|e| FrameError::NonAscii(e.into_bytes()))
}

/// Encodes one frame as the generator would put it on the wire.
/// The payload must fit the single length byte.
pub fn write_frame<W: Write>(writer: &mut W, payload: &str) -> Result<(), FrameError> {
    assert!(payload.len() <= u8::MAX as usize, "frame payload too long");
    writer.write_all(&[payload.len() as u8])?;
    writer.write_all(payload.as_bytes())?;
    writer.flush()?;
    Ok(())
}

/// Writes one 4-byte big-endian response and flushes it.
pub fn write_result<W: Write>(writer: &mut W, value: u32) -> Result<(), io::Error> {
    writer.write_all(&value.to_be_bytes())?;
    writer.flush()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    /// A reader that hands out at most one byte per call, to exercise
    /// partial-read reassembly.
    struct TrickleReader {
        bytes: Vec<u8>,
        pos: usize,
    }

    impl Read for TrickleReader {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            if self.pos >= self.bytes.len() || buf.is_empty() {
                return Ok(0);
            }
            buf[0] = self.bytes[self.pos];
            self.pos += 1;
            Ok(1)
        }
    }

    #[test]
    fn frame_round_trip() {
        for payload in ["RAND", "START block", "END", "TERMINATE", "", "x"] {
            let mut wire = Vec::new();
            write_frame(&mut wire, payload).unwrap();
            let mut cursor = Cursor::new(wire);
            assert_eq!(read_frame(&mut cursor).unwrap().as_deref(), Some(payload));
            assert_eq!(read_frame(&mut cursor).unwrap(), None);
        }
    }

    #[test]
    fn frame_round_trip_max_length() {
        let payload = "A".repeat(255);
        let mut wire = Vec::new();
        write_frame(&mut wire, &payload).unwrap();
        let mut cursor = Cursor::new(wire);
        assert_eq!(read_frame(&mut cursor).unwrap().as_deref(), Some(payload.as_str()));
    }

    #[test]
    fn frames_reassemble_across_short_reads() {
        let mut wire = Vec::new();
        write_frame(&mut wire, "START function_body").unwrap();
        write_frame(&mut wire, "RAND").unwrap();
        let mut reader = TrickleReader { bytes: wire, pos: 0 };
        assert_eq!(
            read_frame(&mut reader).unwrap().as_deref(),
            Some("START function_body")
        );
        assert_eq!(read_frame(&mut reader).unwrap().as_deref(), Some("RAND"));
        assert_eq!(read_frame(&mut reader).unwrap(), None);
    }

    #[test]
    fn truncated_payload_is_an_error() {
        let mut cursor = Cursor::new(vec![5u8, b'R', b'A']);
        match read_frame(&mut cursor) {
            Err(FrameError::Truncated { got: 2, want: 5 }) => {}
            other => panic!("expected Truncated, got {other:?}"),
        }
    }

    #[test]
    fn non_ascii_payload_is_an_error() {
        let mut cursor = Cursor::new(vec![2u8, 0xC3, 0xA9]);
        assert!(matches!(
            read_frame(&mut cursor),
            Err(FrameError::NonAscii(_))
        ));
    }

    #[test]
    fn results_are_big_endian() {
        let mut wire = Vec::new();
        write_result(&mut wire, 0x0934_5678).unwrap();
        assert_eq!(wire, vec![0x09, 0x34, 0x56, 0x78]);

        wire.clear();
        write_result(&mut wire, 0).unwrap();
        assert_eq!(wire, vec![0, 0, 0, 0]);
    }

    #[test]
    fn command_parse_table() {
        assert_eq!(Command::parse("RAND").unwrap(), Command::Rand);
        assert_eq!(Command::parse("END").unwrap(), Command::End);
        assert_eq!(Command::parse("TERMINATE").unwrap(), Command::Terminate);
        assert_eq!(
            Command::parse("START block").unwrap(),
            Command::Start("block".to_string())
        );
    }

    #[test]
    fn command_parse_rejects_malformed_input() {
        for bad in ["", "FOO", "rand", "START", "START ", "START a b", "END "] {
            match Command::parse(bad) {
                Err(FrameError::UnknownCommand(text)) => assert_eq!(text, bad),
                other => panic!("expected UnknownCommand for {bad:?}, got {other:?}"),
            }
        }
    }
}
