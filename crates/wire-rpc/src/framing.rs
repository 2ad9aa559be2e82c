//! Length-prefixed framing codec (C2).
//!
//! Wire layout, byte-exact: `<decimal body-length>\r\n<body-bytes>\r\n`,
//! where `body-length = len(body-bytes) + 2` (the trailing CRLF of the body
//! counts toward the declared length).

use thiserror::Error;

/// Framing-level failure. Unlike dispatch errors these never carry an `id`
/// since they happen before a request is even parsed as JSON.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum FramingError {
    #[error("invalid message header")]
    BadHeader,
    #[error("message is too long ({len} bytes, max {max})")]
    TooLong { len: u32, max: u32 },
}

/// Encodes a serialized JSON body as a complete wire frame.
pub fn encode(body: &str) -> Vec<u8> {
    let mut out = Vec::with_capacity(body.len() + 16);
    let header_value = body.len() + 2;
    out.extend_from_slice(header_value.to_string().as_bytes());
    out.extend_from_slice(b"\r\n");
    out.extend_from_slice(body.as_bytes());
    out.extend_from_slice(b"\r\n");
    out
}

/// Outcome of trying to decode one frame out of a buffer.
#[derive(Debug, PartialEq, Eq)]
pub enum Decoded {
    /// A full frame was consumed; the body (without its trailing CRLF) is
    /// returned as an owned `String`.
    Frame(String),
    /// An isolated empty line (`\r\n` with nothing before it) was discarded.
    EmptyLine,
}

/// A growable read buffer that accumulates bytes from the transport and
/// yields complete frames as they become available. Stands in for the
/// `peek`/`findCRLF`/`retrieve`/`readableBytes`/`retrieveAsString` buffer API
/// named in spec.md §4.1/§6.
#[derive(Debug, Default)]
pub struct FrameDecoder {
    buf: Vec<u8>,
    max_message_len: u32,
}

impl FrameDecoder {
    /// `max_message_len` bounds the declared body length (not counting the
    /// header or the body's own trailing CRLF).
    pub fn new(max_message_len: u32) -> Self {
        Self {
            buf: Vec::new(),
            max_message_len,
        }
    }

    /// Appends freshly read bytes to the internal buffer.
    pub fn push_bytes(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    pub fn readable_bytes(&self) -> usize {
        self.buf.len()
    }

    fn find_crlf(&self) -> Option<usize> {
        self.buf.windows(2).position(|w| w == b"\r\n")
    }

    /// Attempts to decode the next frame. Returns `Ok(None)` when the buffer
    /// does not yet contain a complete frame ("need more bytes" — preferred
    /// over a hard error per spec.md §9's open question, on both server and
    /// client). Returns `Err` only when the header itself is malformed or
    /// the declared length exceeds the cap.
    pub fn decode_next(&mut self) -> Result<Option<Decoded>, FramingError> {
        let Some(crlf_pos) = self.find_crlf() else {
            return Ok(None);
        };

        if crlf_pos == 0 {
            self.buf.drain(0..2);
            return Ok(Some(Decoded::EmptyLine));
        }

        let header_len = crlf_pos + 2;
        let header_text = std::str::from_utf8(&self.buf[..crlf_pos]).ok();
        let header_value: Option<i64> = header_text.and_then(|s| s.parse().ok());

        let body_len = match header_value {
            Some(v) if v > 0 && v <= i64::from(u32::MAX) => v as u32,
            _ => return Err(FramingError::BadHeader),
        };

        if body_len > self.max_message_len {
            return Err(FramingError::TooLong {
                len: body_len,
                max: self.max_message_len,
            });
        }

        let total_len = header_len + body_len as usize;
        if self.buf.len() < total_len {
            return Ok(None);
        }

        let frame_bytes: Vec<u8> = self.buf.drain(0..total_len).collect();
        let body_with_crlf = &frame_bytes[header_len..];
        // The body's own trailing CRLF counts toward `body_len` but is not
        // part of the JSON document.
        let body = &body_with_crlf[..body_with_crlf.len().saturating_sub(2)];
        let text = String::from_utf8_lossy(body).into_owned();
        Ok(Some(Decoded::Frame(text)))
    }

    /// Drains every complete frame currently buffered, in arrival order.
    pub fn decode_all(&mut self) -> Result<Vec<String>, FramingError> {
        let mut frames = Vec::new();
        loop {
            match self.decode_next()? {
                Some(Decoded::Frame(body)) => frames.push(body),
                Some(Decoded::EmptyLine) => continue,
                None => break,
            }
        }
        Ok(frames)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_a_single_message() {
        let body = r#"{"jsonrpc":"2.0","id":0,"method":"Arith.Add"}"#;
        let wire = encode(body);
        let mut dec = FrameDecoder::new(1024);
        dec.push_bytes(&wire);
        let frames = dec.decode_all().unwrap();
        assert_eq!(frames, vec![body.to_string()]);
        assert_eq!(dec.readable_bytes(), 0);
    }

    #[test]
    fn decodes_across_arbitrary_byte_boundary_splits() {
        let body = r#"{"a":1}"#;
        let wire = encode(body);
        for split in 0..wire.len() {
            let mut dec = FrameDecoder::new(1024);
            dec.push_bytes(&wire[..split]);
            assert!(dec.decode_all().unwrap().is_empty() || split == wire.len());
            dec.push_bytes(&wire[split..]);
            let frames = dec.decode_all().unwrap();
            assert_eq!(frames, vec![body.to_string()], "split at {split}");
        }
    }

    #[test]
    fn concatenated_messages_decode_in_order() {
        let mut wire = encode("{\"a\":1}");
        wire.extend(encode("{\"a\":2}"));
        wire.extend(encode("{\"a\":3}"));
        let mut dec = FrameDecoder::new(1024);
        dec.push_bytes(&wire);
        let frames = dec.decode_all().unwrap();
        assert_eq!(frames, vec!["{\"a\":1}", "{\"a\":2}", "{\"a\":3}"]);
    }

    #[test]
    fn need_more_bytes_is_not_an_error() {
        let wire = encode("{\"a\":1}");
        let mut dec = FrameDecoder::new(1024);
        dec.push_bytes(&wire[..wire.len() - 3]);
        assert_eq!(dec.decode_next().unwrap(), None);
    }

    #[test]
    fn rejects_declared_length_over_the_cap() {
        let mut dec = FrameDecoder::new(4);
        dec.push_bytes(b"10\r\n0123456789\r\n");
        assert_eq!(
            dec.decode_next(),
            Err(FramingError::TooLong { len: 10, max: 4 })
        );
    }

    #[test]
    fn rejects_non_positive_or_unparseable_header() {
        let mut dec = FrameDecoder::new(1024);
        dec.push_bytes(b"-1\r\nx\r\n");
        assert_eq!(dec.decode_next(), Err(FramingError::BadHeader));

        let mut dec = FrameDecoder::new(1024);
        dec.push_bytes(b"not-a-number\r\n");
        assert_eq!(dec.decode_next(), Err(FramingError::BadHeader));
    }

    #[test]
    fn discards_an_isolated_empty_line() {
        let mut dec = FrameDecoder::new(1024);
        dec.push_bytes(b"\r\n");
        dec.push_bytes(&encode("{\"a\":1}"));
        let frames = dec.decode_all().unwrap();
        assert_eq!(frames, vec!["{\"a\":1}".to_string()]);
    }
}
