//! Newline-delimited JSON framing.

use bytes::{BufMut, Bytes, BytesMut};
use serde::Serialize;
use tokio_util::codec::{Decoder, Encoder};

use crate::error::{Result, ServerError};

/// Splits a byte stream into lines and writes values as compact JSON lines.
///
/// Decoded frames are the raw bytes of one line without its terminator;
/// a trailing `\r` is stripped and blank lines are skipped. A line longer
/// than `max_length` is an error and the stream should be closed.
#[derive(Debug, Clone)]
pub struct JsonLineCodec {
    max_length: usize,
    // Bytes already scanned for a newline in the current buffer.
    next_index: usize,
}

impl JsonLineCodec {
    pub fn new(max_length: usize) -> Self {
        Self {
            max_length,
            next_index: 0,
        }
    }

    pub fn max_length(&self) -> usize {
        self.max_length
    }
}

impl Default for JsonLineCodec {
    fn default() -> Self {
        Self::new(1024 * 1024)
    }
}

impl Decoder for JsonLineCodec {
    type Item = Bytes;
    type Error = ServerError;

    fn decode(&mut self, buf: &mut BytesMut) -> Result<Option<Bytes>> {
        loop {
            let Some(offset) = buf[self.next_index..].iter().position(|b| *b == b'\n') else {
                if buf.len() > self.max_length {
                    return Err(ServerError::FrameTooLong {
                        max: self.max_length,
                    });
                }
                self.next_index = buf.len();
                return Ok(None);
            };

            let newline = self.next_index + offset;
            self.next_index = 0;
            let mut line = buf.split_to(newline + 1);
            line.truncate(newline);
            if line.last() == Some(&b'\r') {
                line.truncate(line.len() - 1);
            }
            if line.len() > self.max_length {
                return Err(ServerError::FrameTooLong {
                    max: self.max_length,
                });
            }
            if line.iter().all(u8::is_ascii_whitespace) {
                continue;
            }
            return Ok(Some(line.freeze()));
        }
    }

    fn decode_eof(&mut self, buf: &mut BytesMut) -> Result<Option<Bytes>> {
        let frame = self.decode(buf)?;
        if frame.is_none() && !buf.is_empty() {
            // A message is complete only once its newline arrives.
            tracing::debug!(bytes = buf.len(), "discarding unterminated line at end of stream");
            buf.clear();
            self.next_index = 0;
        }
        Ok(frame)
    }
}

impl<T: Serialize> Encoder<T> for JsonLineCodec {
    type Error = ServerError;

    fn encode(&mut self, item: T, dst: &mut BytesMut) -> Result<()> {
        serde_json::to_writer(dst.writer(), &item)?;
        dst.put_u8(b'\n');
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn decode_all(codec: &mut JsonLineCodec, buf: &mut BytesMut) -> Vec<Bytes> {
        let mut frames = Vec::new();
        while let Some(frame) = codec.decode(buf).unwrap() {
            frames.push(frame);
        }
        frames
    }

    #[test]
    fn test_partial_line_waits_for_newline() {
        let mut codec = JsonLineCodec::default();
        let mut buf = BytesMut::from(&b"{\"action\":\"getPro"[..]);
        assert!(codec.decode(&mut buf).unwrap().is_none());

        buf.extend_from_slice(b"ducts\"}\n");
        let frame = codec.decode(&mut buf).unwrap().unwrap();
        assert_eq!(&frame[..], b"{\"action\":\"getProducts\"}");
        assert!(buf.is_empty());
    }

    #[test]
    fn test_multiple_lines_crlf_and_blank() {
        let mut codec = JsonLineCodec::default();
        let mut buf = BytesMut::from(&b"{\"a\":1}\r\n\n  \r\n{\"b\":2}\n{\"c\""[..]);
        let frames = decode_all(&mut codec, &mut buf);
        assert_eq!(frames.len(), 2);
        assert_eq!(&frames[0][..], b"{\"a\":1}");
        assert_eq!(&frames[1][..], b"{\"b\":2}");
        assert_eq!(&buf[..], b"{\"c\"");
    }

    #[test]
    fn test_oversized_line_is_fatal() {
        let mut codec = JsonLineCodec::new(8);
        let mut buf = BytesMut::from(&b"0123456789"[..]);
        assert!(matches!(
            codec.decode(&mut buf),
            Err(ServerError::FrameTooLong { max: 8 })
        ));

        let mut codec = JsonLineCodec::new(8);
        let mut buf = BytesMut::from(&b"012345678\n"[..]);
        assert!(codec.decode(&mut buf).is_err());
    }

    #[test]
    fn test_eof_drops_unterminated_line() {
        let mut codec = JsonLineCodec::default();
        let mut buf = BytesMut::from(&b"{\"a\":1}\n{\"half"[..]);
        assert!(codec.decode_eof(&mut buf).unwrap().is_some());
        assert!(codec.decode_eof(&mut buf).unwrap().is_none());
        assert!(buf.is_empty());
    }

    #[test]
    fn test_encode_appends_newline() {
        let mut codec = JsonLineCodec::default();
        let mut buf = BytesMut::new();
        codec
            .encode(json!({"status": "success"}), &mut buf)
            .unwrap();
        assert_eq!(&buf[..], b"{\"status\":\"success\"}\n");
    }
}
