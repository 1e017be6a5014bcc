//! Incremental decoding of whitespace-separated JSON object streams.
//!
//! The companion body is an unbounded sequence of JSON objects separated by
//! arbitrary whitespace (the reference client emits one object per line).
//! Decoding is incremental: bytes are appended as they arrive and complete
//! objects are popped off the front without ever buffering the whole body.

use bytes::{Buf, BytesMut};
use serde::de::DeserializeOwned;

/// A record could not be parsed; the decoder resynchronised past it.
#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    /// The skipped record and the underlying parse failure.
    #[error("skipping malformed object: {0}")]
    Malformed(#[source] serde_json::Error),
}

/// Pull-based decoder over an append-only byte buffer.
///
/// After a malformed record the decoder drops input up to and including the
/// next newline (the reference client's object separator) and keeps going, so
/// one bad record never poisons the stream.
#[derive(Debug, Default)]
pub struct JsonStreamDecoder {
    buf: BytesMut,
}

impl JsonStreamDecoder {
    /// Create an empty decoder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append bytes received from the stream.
    pub fn extend(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    /// Bytes currently buffered (incomplete trailing object).
    pub fn buffered(&self) -> usize {
        self.buf.len()
    }

    /// Pop the next complete object, if one is buffered.
    ///
    /// `Ok(None)` means more input is needed. `Err` reports a malformed
    /// record that has already been skipped; calling again continues with
    /// the following record.
    pub fn next<T: DeserializeOwned>(&mut self) -> Result<Option<T>, DecodeError> {
        let leading_ws = self
            .buf
            .iter()
            .take_while(|b| b.is_ascii_whitespace())
            .count();
        if leading_ws > 0 {
            self.buf.advance(leading_ws);
        }
        if self.buf.is_empty() {
            return Ok(None);
        }

        let mut iter = serde_json::Deserializer::from_slice(&self.buf).into_iter::<T>();
        match iter.next() {
            Some(Ok(value)) => {
                let consumed = iter.byte_offset();
                drop(iter);
                self.buf.advance(consumed);
                Ok(Some(value))
            }
            Some(Err(err)) if err.is_eof() => Ok(None),
            Some(Err(err)) => {
                drop(iter);
                // Resync at the next object separator; with none buffered yet
                // the rest of the bad record is still in flight, so drop it
                // all and let later input resync.
                match self.buf.iter().position(|&b| b == b'\n') {
                    Some(newline) => self.buf.advance(newline + 1),
                    None => self.buf.clear(),
                }
                Err(DecodeError::Malformed(err))
            }
            None => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::Value;

    fn drain(decoder: &mut JsonStreamDecoder) -> Vec<Value> {
        let mut out = Vec::new();
        loop {
            match decoder.next::<Value>() {
                Ok(Some(v)) => out.push(v),
                Ok(None) => return out,
                Err(_) => {}
            }
        }
    }

    #[test]
    fn single_object() {
        let mut dec = JsonStreamDecoder::new();
        dec.extend(br#"{"id":"q1","last":true}"#);
        let v: Value = dec.next().unwrap().unwrap();
        assert_eq!(v["id"], "q1");
        assert!(dec.next::<Value>().unwrap().is_none());
    }

    #[test]
    fn newline_separated_objects() {
        let mut dec = JsonStreamDecoder::new();
        dec.extend(b"{\"a\":1}\n{\"a\":2}\n{\"a\":3}\n");
        let values = drain(&mut dec);
        assert_eq!(values.len(), 3);
        assert_eq!(values[2]["a"], 3);
    }

    #[test]
    fn whitespace_separated_objects() {
        let mut dec = JsonStreamDecoder::new();
        dec.extend(b"  {\"a\":1}   {\"a\":2}\t{\"a\":3}");
        let values = drain(&mut dec);
        assert_eq!(values.len(), 3);
    }

    #[test]
    fn partial_object_waits_for_more_input() {
        let mut dec = JsonStreamDecoder::new();
        dec.extend(br#"{"id":"q1","chu"#);
        assert!(dec.next::<Value>().unwrap().is_none());
        dec.extend(br#"nk":[1,2],"last":false}"#);
        let v: Value = dec.next().unwrap().unwrap();
        assert_eq!(v["chunk"][1], 2);
    }

    #[test]
    fn byte_at_a_time_feed() {
        let raw = br#"{"id":"slow","last":true}"#;
        let mut dec = JsonStreamDecoder::new();
        let mut seen = None;
        for b in raw.iter() {
            dec.extend(&[*b]);
            if let Some(v) = dec.next::<Value>().unwrap() {
                seen = Some(v);
            }
        }
        assert_eq!(seen.unwrap()["id"], "slow");
    }

    #[test]
    fn malformed_record_is_skipped_at_newline() {
        let mut dec = JsonStreamDecoder::new();
        dec.extend(b"{\"a\":1}\nnot json at all\n{\"a\":2}\n");
        let first: Value = dec.next().unwrap().unwrap();
        assert_eq!(first["a"], 1);
        assert!(matches!(dec.next::<Value>(), Err(DecodeError::Malformed(_))));
        let second: Value = dec.next().unwrap().unwrap();
        assert_eq!(second["a"], 2);
    }

    #[test]
    fn wrong_shape_is_malformed_for_typed_decode() {
        #[derive(serde::Deserialize)]
        struct Typed {
            #[allow(dead_code)]
            id: String,
        }
        let mut dec = JsonStreamDecoder::new();
        dec.extend(b"{\"id\":42}\n{\"id\":\"ok\"}\n");
        assert!(dec.next::<Typed>().is_err());
        let ok = dec.next::<Typed>().unwrap().unwrap();
        assert_eq!(ok.id, "ok");
    }

    #[test]
    fn strings_with_escaped_newlines_survive() {
        let mut dec = JsonStreamDecoder::new();
        dec.extend(b"{\"log\":\"line one\\nline two\"}\n");
        let v: Value = dec.next().unwrap().unwrap();
        assert_eq!(v["log"], "line one\nline two");
    }

    #[test]
    fn buffered_tracks_pending_bytes() {
        let mut dec = JsonStreamDecoder::new();
        assert_eq!(dec.buffered(), 0);
        dec.extend(br#"{"part"#);
        assert!(dec.next::<Value>().unwrap().is_none());
        assert!(dec.buffered() > 0);
        dec.extend(br#"":1}"#);
        // Completing the object empties the buffer.
        let _ = dec.next::<Value>().unwrap().unwrap();
        assert_eq!(dec.buffered(), 0);
    }

    #[test]
    fn empty_and_whitespace_input_yield_nothing() {
        let mut dec = JsonStreamDecoder::new();
        assert!(dec.next::<Value>().unwrap().is_none());
        dec.extend(b"  \n\t \n");
        assert!(dec.next::<Value>().unwrap().is_none());
        assert_eq!(dec.buffered(), 0);
    }
}
