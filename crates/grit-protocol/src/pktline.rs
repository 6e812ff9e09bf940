//! pkt-line framing.
//!
//! Every protocol line is prefixed with a 4-hex-digit length that counts
//! the prefix itself. A length of `0000` is a flush packet separating
//! protocol phases. `ERR ` payloads carry a fatal message from the peer.

use std::io::{Read, Write};

use crate::error::{ProtocolError, ProtocolResult};

/// Largest payload one pkt-line can carry (0xFFFF minus the 4-byte prefix).
pub const MAX_PKT_PAYLOAD: usize = 65516;

/// One decoded frame.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Packet {
    Line(Vec<u8>),
    Flush,
}

impl Packet {
    /// Payload as text with one trailing newline stripped, for line-oriented
    /// negotiation messages.
    pub fn as_text(&self) -> ProtocolResult<&str> {
        match self {
            Packet::Flush => Err(ProtocolError::InvalidPktLine(
                "expected a data line, got flush".into(),
            )),
            Packet::Line(data) => {
                let text = std::str::from_utf8(data)
                    .map_err(|_| ProtocolError::InvalidPktLine("non-utf8 payload".into()))?;
                Ok(text.strip_suffix('\n').unwrap_or(text))
            }
        }
    }
}

/// Writes pkt-line frames to an underlying stream.
pub struct PktLineWriter<W> {
    out: W,
}

impl<W: Write> PktLineWriter<W> {
    pub fn new(out: W) -> Self {
        Self { out }
    }

    pub fn write_line(&mut self, payload: &[u8]) -> ProtocolResult<()> {
        if payload.len() > MAX_PKT_PAYLOAD {
            return Err(ProtocolError::PayloadTooLarge(payload.len()));
        }
        write!(self.out, "{:04x}", payload.len() + 4)?;
        self.out.write_all(payload)?;
        Ok(())
    }

    /// Convenience for text lines; a newline is appended per convention.
    pub fn write_text(&mut self, line: &str) -> ProtocolResult<()> {
        let mut payload = Vec::with_capacity(line.len() + 1);
        payload.extend_from_slice(line.as_bytes());
        payload.push(b'\n');
        self.write_line(&payload)
    }

    pub fn write_flush(&mut self) -> ProtocolResult<()> {
        self.out.write_all(b"0000")?;
        Ok(())
    }

    /// Report a fatal condition to the peer.
    pub fn write_error(&mut self, message: &str) -> ProtocolResult<()> {
        self.write_text(&format!("ERR {message}"))
    }

    /// Escape the framing: raw bytes, used for the pack stream.
    pub fn write_raw(&mut self, bytes: &[u8]) -> ProtocolResult<()> {
        self.out.write_all(bytes)?;
        Ok(())
    }

    pub fn flush(&mut self) -> ProtocolResult<()> {
        self.out.flush()?;
        Ok(())
    }

    pub fn into_inner(self) -> W {
        self.out
    }
}

/// Reads pkt-line frames from an underlying stream.
pub struct PktLineReader<R> {
    input: R,
}

impl<R: Read> PktLineReader<R> {
    pub fn new(input: R) -> Self {
        Self { input }
    }

    /// Read one frame. `Ok(None)` at a clean end of stream.
    pub fn read_packet(&mut self) -> ProtocolResult<Option<Packet>> {
        let mut prefix = [0u8; 4];
        if !read_exact_or_eof(&mut self.input, &mut prefix)? {
            return Ok(None);
        }

        let text = std::str::from_utf8(&prefix)
            .map_err(|_| ProtocolError::InvalidPktLine("non-hex length prefix".into()))?;
        let declared = usize::from_str_radix(text, 16)
            .map_err(|_| ProtocolError::InvalidPktLine(format!("bad length prefix {text:?}")))?;

        match declared {
            0 => Ok(Some(Packet::Flush)),
            1..=3 => Err(ProtocolError::InvalidPktLine(format!(
                "length {declared} is inside the prefix"
            ))),
            _ if declared - 4 > MAX_PKT_PAYLOAD => {
                Err(ProtocolError::PayloadTooLarge(declared - 4))
            }
            _ => {
                let mut payload = vec![0u8; declared - 4];
                self.input.read_exact(&mut payload)?;
                Ok(Some(Packet::Line(payload)))
            }
        }
    }

    /// Read a frame, treating end-of-stream and `ERR` payloads as errors.
    pub fn expect_packet(&mut self) -> ProtocolResult<Packet> {
        let packet = self.read_packet()?.ok_or_else(|| {
            ProtocolError::InvalidPktLine("unexpected end of stream".into())
        })?;
        if let Packet::Line(data) = &packet {
            if let Some(msg) = data.strip_prefix(b"ERR ") {
                let msg = String::from_utf8_lossy(msg).trim_end().to_string();
                return Err(ProtocolError::RemoteError(msg));
            }
        }
        Ok(packet)
    }

    /// Surrender the underlying stream, for reading raw bytes after the
    /// framed phase ends.
    pub fn into_inner(self) -> R {
        self.input
    }
}

/// `read_exact` that distinguishes a clean EOF before the first byte.
fn read_exact_or_eof(input: &mut impl Read, buf: &mut [u8]) -> ProtocolResult<bool> {
    let mut filled = 0;
    while filled < buf.len() {
        let n = input.read(&mut buf[filled..])?;
        if n == 0 {
            if filled == 0 {
                return Ok(false);
            }
            return Err(ProtocolError::InvalidPktLine(
                "truncated length prefix".into(),
            ));
        }
        filled += n;
    }
    Ok(true)
}
