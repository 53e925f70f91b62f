//! Length-prefixed text frames used on the telemetry socket.
//!
//! A frame is a 10 byte ASCII header holding the decimal payload length,
//! left-justified and padded with spaces, followed by exactly that many payload
//! bytes. Readers must not assume a frame arrives in one `read`.

use std::io::{ErrorKind, Read, Write};

pub const HEADER_SIZE: usize = 10;
/// Largest payload length a 10 digit header can describe.
pub const MAX_PAYLOAD_LEN: u64 = 9_999_999_999;

#[derive(thiserror::Error, Debug)]
pub enum FrameError {
    #[error("Payload of {0} bytes does not fit into a 10 digit header")]
    TooLong(u64),
    #[error("Invalid frame header {0:?}")]
    InvalidHeader(String),
    #[error("Stream closed before all bytes were read ({received}/{expected})")]
    Truncated { received: u64, expected: u64 },
    #[error("Payload is not valid UTF-8: {0}")]
    InvalidUtf8(#[from] std::string::FromUtf8Error),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub fn encode(payload: &str) -> Result<Vec<u8>, FrameError> {
    let len = payload.len() as u64;
    if len > MAX_PAYLOAD_LEN {
        return Err(FrameError::TooLong(len));
    }
    let mut frame = Vec::with_capacity(HEADER_SIZE + payload.len());
    frame.extend_from_slice(format!("{len:<width$}", width = HEADER_SIZE).as_bytes());
    frame.extend_from_slice(payload.as_bytes());
    Ok(frame)
}

pub fn write_frame<W: Write>(writer: &mut W, payload: &str) -> Result<(), FrameError> {
    let frame = encode(payload)?;
    writer.write_all(&frame)?;
    writer.flush()?;
    Ok(())
}

pub fn decode<R: Read>(reader: &mut R) -> Result<String, FrameError> {
    let mut header = [0u8; HEADER_SIZE];
    let mut filled = 0;
    while filled < HEADER_SIZE {
        match reader.read(&mut header[filled..]) {
            Ok(0) => {
                return Err(FrameError::Truncated {
                    received: filled as u64,
                    expected: HEADER_SIZE as u64,
                });
            }
            Ok(n) => filled += n,
            Err(err) if err.kind() == ErrorKind::Interrupted => continue,
            Err(err) => return Err(err.into()),
        }
    }
    let expected = parse_header(&header)?;

    // Grows with the data that actually arrives, a bogus header cannot force a huge allocation.
    let mut payload = Vec::new();
    let received = (&mut *reader).take(expected).read_to_end(&mut payload)? as u64;
    if received < expected {
        return Err(FrameError::Truncated { received, expected });
    }
    Ok(String::from_utf8(payload)?)
}

fn parse_header(header: &[u8; HEADER_SIZE]) -> Result<u64, FrameError> {
    let text = match std::str::from_utf8(header) {
        Ok(text) => text,
        Err(_) => return Err(FrameError::InvalidHeader(String::from_utf8_lossy(header).into_owned())),
    };
    match text.trim().parse::<u64>() {
        Ok(len) => Ok(len),
        Err(_) => Err(FrameError::InvalidHeader(text.to_string())),
    }
}
