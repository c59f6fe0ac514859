//! RESP2 parser and encoder
//!
//! Implements parsing from bytes to RespValue and encoding from RespValue to bytes.
//! Parsing is incremental: a value is only consumed once all of its bytes are buffered.

use super::types::{RespValue, RespError};
use bytes::{Buf, BufMut, Bytes, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

const CRLF: &[u8] = b"\r\n";

/// Deepest array nesting accepted before the input is rejected
pub const MAX_DEPTH: usize = 512;

/// How much of a buffer the next value needs
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scan {
    /// A whole value occupies this many bytes
    Complete(usize),

    /// Nothing can be decoded before the buffer holds at least this many bytes
    Incomplete(usize),
}

/// RESP2 Parser
pub struct RespParser;

impl RespParser {
    /// Parse a RESP value from a buffer
    ///
    /// Returns Ok(Some(value)) if a complete value was parsed and consumed,
    /// Ok(None) if more data is needed (nothing is consumed),
    /// Err(e) if parsing failed
    pub fn parse(buf: &mut BytesMut) -> Result<Option<RespValue>, RespError> {
        match Self::decode(buf)? {
            Some((value, consumed)) => {
                buf.advance(consumed);
                Ok(Some(value))
            }
            None => Ok(None),
        }
    }

    /// Decode one value from the start of `src` without consuming anything
    ///
    /// Returns the value together with the number of bytes it occupies.
    pub fn decode(src: &[u8]) -> Result<Option<(RespValue, usize)>, RespError> {
        match Self::scan(src)? {
            Scan::Complete(_) => Self::decode_at(src, 0),
            Scan::Incomplete(_) => Ok(None),
        }
    }

    /// Check the framing of the value at the start of `src` without allocating
    pub fn scan(src: &[u8]) -> Result<Scan, RespError> {
        Self::scan_at(src, 0, 0)
    }

    fn scan_at(src: &[u8], pos: usize, depth: usize) -> Result<Scan, RespError> {
        if depth > MAX_DEPTH {
            return Err(RespError::InvalidProtocol(format!(
                "arrays nested deeper than {}",
                MAX_DEPTH
            )));
        }

        let prefix = match src.get(pos) {
            Some(&byte) => byte,
            None => return Ok(Scan::Incomplete(pos + 1)),
        };
        Self::check_prefix(prefix)?;

        let (line, next) = match Self::find_line(src, pos + 1) {
            Some(found) => found,
            None => return Ok(Scan::Incomplete(src.len() + 1)),
        };

        match prefix {
            b'+' | b'-' => Ok(Scan::Complete(next)),
            b':' => {
                Self::decimal(line)?;
                Ok(Scan::Complete(next))
            }
            b'$' => match Self::length(line, "bulk string")? {
                None => Ok(Scan::Complete(next)),
                Some(len) => {
                    let end = next.saturating_add(len);
                    if src.len() < end.saturating_add(2) {
                        Ok(Scan::Incomplete(end.saturating_add(2)))
                    } else if &src[end..end + 2] != CRLF {
                        Err(RespError::InvalidProtocol(
                            "missing CRLF after bulk string data".to_string(),
                        ))
                    } else {
                        Ok(Scan::Complete(end + 2))
                    }
                }
            },
            _ => match Self::length(line, "array")? {
                None => Ok(Scan::Complete(next)),
                Some(count) => {
                    let mut cursor = next;
                    for _ in 0..count {
                        match Self::scan_at(src, cursor, depth + 1)? {
                            Scan::Complete(end) => cursor = end,
                            incomplete => return Ok(incomplete),
                        }
                    }
                    Ok(Scan::Complete(cursor))
                }
            },
        }
    }

    /// Build the value starting at `pos`, returning it and the position right after it
    ///
    /// Only called once `scan` has accepted the buffer, so nesting is bounded.
    fn decode_at(src: &[u8], pos: usize) -> Result<Option<(RespValue, usize)>, RespError> {
        let prefix = match src.get(pos) {
            Some(&byte) => byte,
            None => return Ok(None),
        };
        Self::check_prefix(prefix)?;

        let (line, next) = match Self::find_line(src, pos + 1) {
            Some(found) => found,
            None => return Ok(None),
        };

        match prefix {
            b'+' => Ok(Some((RespValue::SimpleString(Self::utf8(line)?), next))),
            b'-' => Ok(Some((RespValue::Error(Self::utf8(line)?), next))),
            b':' => Ok(Some((RespValue::Integer(Self::decimal(line)?), next))),
            b'$' => Self::decode_bulk_string(src, line, next),
            _ => Self::decode_array(src, line, next),
        }
    }

    /// Bulk string body: $6\r\nfoobar\r\n or $-1\r\n (null)
    fn decode_bulk_string(
        src: &[u8],
        line: &[u8],
        start: usize,
    ) -> Result<Option<(RespValue, usize)>, RespError> {
        let len = match Self::length(line, "bulk string")? {
            Some(len) => len,
            None => return Ok(Some((RespValue::Null, start))),
        };

        let end = start.saturating_add(len);
        match src.get(start..end) {
            Some(data) => Ok(Some((RespValue::BulkString(Bytes::copy_from_slice(data)), end + 2))),
            None => Ok(None),
        }
    }

    /// Array body: *2\r\n$3\r\nfoo\r\n$3\r\nbar\r\n or *-1\r\n (null)
    fn decode_array(
        src: &[u8],
        line: &[u8],
        start: usize,
    ) -> Result<Option<(RespValue, usize)>, RespError> {
        let count = match Self::length(line, "array")? {
            Some(count) => count,
            None => return Ok(Some((RespValue::Null, start))),
        };

        let mut elements = Vec::with_capacity(count.min(1024));
        let mut cursor = start;

        for _ in 0..count {
            match Self::decode_at(src, cursor)? {
                Some((value, next)) => {
                    elements.push(value);
                    cursor = next;
                }
                None => return Ok(None),
            }
        }

        Ok(Some((RespValue::Array(elements), cursor)))
    }

    /// Decode a full-resync snapshot frame: $<len>\r\n followed by exactly len raw bytes
    ///
    /// Unlike a bulk string the payload is not terminated by CRLF; `RespCodec`
    /// drops one if the master sends it.
    pub fn parse_snapshot(buf: &mut BytesMut) -> Result<Option<RespValue>, RespError> {
        let prefix = match buf.first() {
            Some(&byte) => byte,
            None => return Ok(None),
        };

        if prefix != b'$' {
            return Err(RespError::InvalidProtocol(format!(
                "expected snapshot bulk string, got type byte 0x{:02x}",
                prefix
            )));
        }

        let (line, start) = match Self::find_line(buf, 1) {
            Some(found) => found,
            None => return Ok(None),
        };

        let len = match Self::length(line, "snapshot")? {
            Some(len) => len,
            None => {
                return Err(RespError::InvalidProtocol(
                    "invalid snapshot length: -1".to_string(),
                ))
            }
        };

        if buf.len() < start.saturating_add(len) {
            return Ok(None);
        }

        buf.advance(start);
        let payload = buf.split_to(len).freeze();

        Ok(Some(RespValue::BulkString(payload)))
    }

    fn check_prefix(prefix: u8) -> Result<(), RespError> {
        if matches!(prefix, b'+' | b'-' | b':' | b'$' | b'*') {
            Ok(())
        } else {
            Err(RespError::InvalidProtocol(format!(
                "unknown type byte 0x{:02x}",
                prefix
            )))
        }
    }

    /// Length or count field; -1 is the null marker
    fn length(line: &[u8], what: &str) -> Result<Option<usize>, RespError> {
        match Self::decimal(line)? {
            -1 => Ok(None),
            n if n < 0 => Err(RespError::InvalidProtocol(format!(
                "invalid {} length: {}",
                what, n
            ))),
            n => Ok(Some(n as usize)),
        }
    }

    /// Find the CRLF-terminated line starting at `pos`
    ///
    /// Returns the line without its CRLF and the position right after the CRLF.
    fn find_line(src: &[u8], pos: usize) -> Option<(&[u8], usize)> {
        if pos > src.len() {
            return None;
        }

        src[pos..]
            .windows(2)
            .position(|window| window == CRLF)
            .map(|offset| (&src[pos..pos + offset], pos + offset + 2))
    }

    fn utf8(line: &[u8]) -> Result<String, RespError> {
        String::from_utf8(line.to_vec()).map_err(|_| RespError::InvalidUtf8)
    }

    fn decimal(line: &[u8]) -> Result<i64, RespError> {
        let text = std::str::from_utf8(line).map_err(|_| RespError::InvalidUtf8)?;
        text.parse::<i64>()
            .map_err(|_| RespError::InvalidInteger(text.to_string()))
    }
}

/// RESP2 Encoder
pub struct RespEncoder;

impl RespEncoder {
    /// Encode a RESP value to bytes
    pub fn encode(value: &RespValue) -> Bytes {
        let mut buf = BytesMut::new();
        Self::encode_to(&mut buf, value);
        buf.freeze()
    }

    /// Encode a RESP value into an existing buffer
    pub fn encode_to(buf: &mut BytesMut, value: &RespValue) {
        match value {
            RespValue::SimpleString(s) => {
                buf.put_u8(b'+');
                buf.put_slice(s.as_bytes());
                buf.put_slice(CRLF);
            }
            RespValue::Error(e) => {
                buf.put_u8(b'-');
                buf.put_slice(e.as_bytes());
                buf.put_slice(CRLF);
            }
            RespValue::Integer(i) => {
                buf.put_u8(b':');
                buf.put_slice(i.to_string().as_bytes());
                buf.put_slice(CRLF);
            }
            RespValue::BulkString(bytes) => {
                buf.put_u8(b'$');
                buf.put_slice(bytes.len().to_string().as_bytes());
                buf.put_slice(CRLF);
                buf.put_slice(bytes);
                buf.put_slice(CRLF);
            }
            RespValue::Null => {
                buf.put_slice(b"$-1\r\n");
            }
            RespValue::Array(arr) => {
                buf.put_u8(b'*');
                buf.put_slice(arr.len().to_string().as_bytes());
                buf.put_slice(CRLF);
                for elem in arr {
                    Self::encode_to(buf, elem);
                }
            }
        }
    }

    /// Frame a snapshot payload for a full resync: $<len>\r\n<payload>, no trailing CRLF
    pub fn encode_snapshot(payload: &[u8]) -> Bytes {
        let mut buf = BytesMut::with_capacity(payload.len() + 16);
        buf.put_u8(b'$');
        buf.put_slice(payload.len().to_string().as_bytes());
        buf.put_slice(CRLF);
        buf.put_slice(payload);
        buf.freeze()
    }
}

/// Stream codec used with `tokio_util::codec::Framed`
///
/// The framed reader keeps unconsumed bytes between reads, so values split across
/// socket reads (or several values in one read) are handled transparently. The
/// buffer is only scanned again once it has grown to the size the last scan asked for.
#[derive(Debug, Default)]
pub struct RespCodec {
    snapshot_pending: bool,

    /// A CRLF may still follow the snapshot payload
    after_snapshot: bool,

    /// Buffer length needed before scanning again
    need: usize,
}

impl RespCodec {
    pub fn new() -> Self {
        Self::default()
    }

    /// Read the next frame as a snapshot transfer instead of a regular value
    pub fn expect_snapshot(&mut self) {
        self.snapshot_pending = true;
    }
}

impl Decoder for RespCodec {
    type Item = RespValue;
    type Error = RespError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<RespValue>, RespError> {
        if self.snapshot_pending {
            let snapshot = RespParser::parse_snapshot(src)?;
            if snapshot.is_some() {
                self.snapshot_pending = false;
                self.after_snapshot = true;
            }
            return Ok(snapshot);
        }

        if self.after_snapshot {
            if src.is_empty() || &src[..] == b"\r" {
                return Ok(None);
            }
            if src.starts_with(CRLF) {
                src.advance(2);
            }
            self.after_snapshot = false;
        }

        if src.len() < self.need {
            return Ok(None);
        }

        self.need = 0;
        match RespParser::scan(src)? {
            Scan::Incomplete(need) => {
                self.need = need;
                Ok(None)
            }
            Scan::Complete(_) => RespParser::parse(src),
        }
    }
}

impl Encoder<RespValue> for RespCodec {
    type Error = RespError;

    fn encode(&mut self, item: RespValue, dst: &mut BytesMut) -> Result<(), RespError> {
        RespEncoder::encode_to(dst, &item);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_values() -> Vec<RespValue> {
        vec![
            RespValue::simple_string("OK"),
            RespValue::error("ERR: Unknown command"),
            RespValue::Integer(-42),
            RespValue::bulk_string("foo\r\nbar"),
            RespValue::bulk_string(""),
            RespValue::Null,
            RespValue::array(vec![]),
            RespValue::array(vec![
                RespValue::command(["SET", "foo", "bar"]),
                RespValue::Integer(7),
                RespValue::Null,
            ]),
        ]
    }

    #[test]
    fn test_parse_simple_string() {
        let mut buf = BytesMut::from("+OK\r\n");
        let result = RespParser::parse(&mut buf).unwrap();
        assert_eq!(result, Some(RespValue::SimpleString("OK".to_string())));
        assert!(buf.is_empty());
    }

    #[test]
    fn test_parse_error() {
        let mut buf = BytesMut::from("-Error message\r\n");
        let result = RespParser::parse(&mut buf).unwrap();
        assert_eq!(result, Some(RespValue::Error("Error message".to_string())));
    }

    #[test]
    fn test_parse_integer() {
        let mut buf = BytesMut::from(":1000\r\n");
        let result = RespParser::parse(&mut buf).unwrap();
        assert_eq!(result, Some(RespValue::Integer(1000)));
    }

    #[test]
    fn test_parse_bulk_string() {
        let mut buf = BytesMut::from("$6\r\nfoobar\r\n");
        let result = RespParser::parse(&mut buf).unwrap();
        assert_eq!(result, Some(RespValue::BulkString(Bytes::from("foobar"))));
    }

    #[test]
    fn test_parse_null() {
        let mut buf = BytesMut::from("$-1\r\n*-1\r\n");
        assert_eq!(RespParser::parse(&mut buf).unwrap(), Some(RespValue::Null));
        assert_eq!(RespParser::parse(&mut buf).unwrap(), Some(RespValue::Null));
    }

    #[test]
    fn test_parse_array() {
        let mut buf = BytesMut::from("*2\r\n$3\r\nfoo\r\n$3\r\nbar\r\n");
        let result = RespParser::parse(&mut buf).unwrap();
        assert_eq!(result, Some(RespValue::Array(vec![
            RespValue::BulkString(Bytes::from("foo")),
            RespValue::BulkString(Bytes::from("bar")),
        ])));
    }

    #[test]
    fn test_decode_reports_consumed_bytes() {
        let input = b"*1\r\n$4\r\nPING\r\n+OK\r\n";
        let (value, consumed) = RespParser::decode(input).unwrap().unwrap();
        assert_eq!(value, RespValue::command(["PING"]));
        assert_eq!(consumed, 14);
    }

    #[test]
    fn test_empty_buffer_needs_more_data() {
        let mut buf = BytesMut::new();
        assert_eq!(RespParser::parse(&mut buf).unwrap(), None);
    }

    #[test]
    fn test_incomplete_input_consumes_nothing() {
        let mut buf = BytesMut::from("*2\r\n$3\r\nfoo\r\n$3\r\nba");
        assert_eq!(RespParser::parse(&mut buf).unwrap(), None);
        assert_eq!(buf.len(), 19);
    }

    #[test]
    fn test_split_at_every_offset() {
        let encoded = RespEncoder::encode(&RespValue::command(["SET", "foo", "bar", "px", "100"]));
        let expected = RespParser::decode(&encoded).unwrap().unwrap().0;

        for split in 0..encoded.len() {
            let mut codec = RespCodec::new();
            let mut buf = BytesMut::from(&encoded[..split]);
            assert_eq!(codec.decode(&mut buf).unwrap(), None, "split at {}", split);

            buf.extend_from_slice(&encoded[split..]);
            assert_eq!(codec.decode(&mut buf).unwrap(), Some(expected.clone()));
            assert!(buf.is_empty());
        }
    }

    #[test]
    fn test_pipelined_values() {
        let mut buf = BytesMut::from("+OK\r\n:1\r\n$3\r\nbar\r\n$2");
        assert_eq!(RespParser::parse(&mut buf).unwrap(), Some(RespValue::simple_string("OK")));
        assert_eq!(RespParser::parse(&mut buf).unwrap(), Some(RespValue::Integer(1)));
        assert_eq!(RespParser::parse(&mut buf).unwrap(), Some(RespValue::bulk_string("bar")));
        assert_eq!(RespParser::parse(&mut buf).unwrap(), None);
        assert_eq!(&buf[..], b"$2");
    }

    #[test]
    fn test_round_trip() {
        for value in sample_values() {
            let encoded = RespEncoder::encode(&value);
            let (decoded, consumed) = RespParser::decode(&encoded).unwrap().unwrap();
            assert_eq!(decoded, value);
            assert_eq!(consumed, encoded.len());
        }
    }

    #[test]
    fn test_malformed_input() {
        let inputs: [&[u8]; 6] = [
            b"?foo\r\n",
            b"$abc\r\n",
            b"*x\r\n",
            b"$3\r\nfoobar\r\n",
            b":12a\r\n",
            b"$-5\r\n",
        ];
        for input in inputs {
            assert!(RespParser::decode(input).is_err(), "{:?}", input);
        }
    }

    #[test]
    fn test_snapshot_frame_keeps_trailing_commands() {
        let mut codec = RespCodec::new();
        let mut buf = BytesMut::from(&b"$5\r\nREDIS*1\r\n$4\r\nPING\r\n"[..]);

        codec.expect_snapshot();
        assert_eq!(codec.decode(&mut buf).unwrap(), Some(RespValue::bulk_string("REDIS")));
        assert_eq!(codec.decode(&mut buf).unwrap(), Some(RespValue::command(["PING"])));
    }

    #[test]
    fn test_snapshot_frame_waits_for_payload() {
        let mut codec = RespCodec::new();
        codec.expect_snapshot();

        let mut buf = BytesMut::from(&b"$10\r\nREDIS"[..]);
        assert_eq!(codec.decode(&mut buf).unwrap(), None);

        buf.extend_from_slice(b"0011\xff\r\n+OK\r\n");
        assert_eq!(
            codec.decode(&mut buf).unwrap(),
            Some(RespValue::bulk_string(&b"REDIS0011\xff"[..]))
        );
        assert_eq!(codec.decode(&mut buf).unwrap(), Some(RespValue::simple_string("OK")));
    }

    #[test]
    fn test_crlf_after_snapshot_in_later_read() {
        let mut codec = RespCodec::new();
        codec.expect_snapshot();

        let mut buf = BytesMut::from(&b"$10\r\nREDIS0011\xff"[..]);
        assert_eq!(
            codec.decode(&mut buf).unwrap(),
            Some(RespValue::bulk_string(&b"REDIS0011\xff"[..]))
        );
        assert_eq!(codec.decode(&mut buf).unwrap(), None);

        buf.extend_from_slice(b"\r");
        assert_eq!(codec.decode(&mut buf).unwrap(), None);

        buf.extend_from_slice(b"\n*1\r\n$4\r\nPING\r\n");
        assert_eq!(codec.decode(&mut buf).unwrap(), Some(RespValue::command(["PING"])));
        assert!(buf.is_empty());
    }

    #[test]
    fn test_deep_nesting_is_rejected() {
        let nested = b"*1\r\n".repeat(200_000);
        assert!(matches!(
            RespParser::decode(&nested),
            Err(RespError::InvalidProtocol(_))
        ));

        let mut codec = RespCodec::new();
        let mut buf = BytesMut::from(&nested[..]);
        assert!(codec.decode(&mut buf).is_err());
    }

    #[test]
    fn test_nesting_within_limit() {
        let mut input = b"*1\r\n".repeat(MAX_DEPTH);
        input.extend_from_slice(b":1\r\n");

        let (mut value, consumed) = RespParser::decode(&input).unwrap().unwrap();
        assert_eq!(consumed, input.len());

        let mut depth = 0;
        while let RespValue::Array(mut items) = value {
            value = items.remove(0);
            depth += 1;
        }
        assert_eq!(depth, MAX_DEPTH);
        assert_eq!(value, RespValue::Integer(1));
    }

    #[test]
    fn test_scan_reports_needed_length() {
        assert_eq!(RespParser::scan(b"$10\r\nab").unwrap(), Scan::Incomplete(17));
        assert_eq!(RespParser::scan(b"*2\r\n$3\r\nfoo\r\n").unwrap(), Scan::Incomplete(14));
        assert_eq!(RespParser::scan(b"+OK").unwrap(), Scan::Incomplete(4));
        assert_eq!(RespParser::scan(b"+OK\r\n:1\r\n").unwrap(), Scan::Complete(5));
    }

    #[test]
    fn test_codec_waits_for_announced_length() {
        let mut codec = RespCodec::new();
        let mut buf = BytesMut::from(&b"$10\r\nab"[..]);
        assert_eq!(codec.decode(&mut buf).unwrap(), None);

        buf.extend_from_slice(b"cdefgh");
        assert_eq!(codec.decode(&mut buf).unwrap(), None);

        buf.extend_from_slice(b"ij\r\n");
        assert_eq!(codec.decode(&mut buf).unwrap(), Some(RespValue::bulk_string("abcdefghij")));
    }

    #[test]
    fn test_codec_recovers_after_error() {
        let mut codec = RespCodec::new();
        let mut buf = BytesMut::from(&b"$10\r\nab"[..]);
        assert_eq!(codec.decode(&mut buf).unwrap(), None);

        buf.extend_from_slice(b"cdefghijXX");
        assert!(codec.decode(&mut buf).is_err());

        buf.clear();
        buf.extend_from_slice(b"+OK\r\n");
        assert_eq!(codec.decode(&mut buf).unwrap(), Some(RespValue::simple_string("OK")));
    }

    #[test]
    fn test_encode_simple_string() {
        let value = RespValue::SimpleString("OK".to_string());
        let encoded = RespEncoder::encode(&value);
        assert_eq!(encoded, Bytes::from("+OK\r\n"));
    }

    #[test]
    fn test_encode_bulk_string() {
        let value = RespValue::BulkString(Bytes::from("foobar"));
        let encoded = RespEncoder::encode(&value);
        assert_eq!(encoded, Bytes::from("$6\r\nfoobar\r\n"));
    }

    #[test]
    fn test_encode_null_and_snapshot() {
        assert_eq!(RespEncoder::encode(&RespValue::Null), Bytes::from("$-1\r\n"));
        assert_eq!(RespEncoder::encode_snapshot(b"abc"), Bytes::from("$3\r\nabc"));
    }
}
