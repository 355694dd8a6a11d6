use thiserror::Error;

pub const TAG_NIL: u8 = 0x00;
pub const TAG_ERROR: u8 = 0x01;
pub const TAG_STRING: u8 = 0x02;
pub const TAG_INT: u8 = 0x03;
pub const TAG_ARRAY: u8 = 0x04;

/// Error code carried by every error frame. Only one exists today.
const ERROR_CODE: u32 = 1;

/// Appends typed reply frames to a connection's write buffer. Each
/// dispatched command writes exactly one top-level frame; an array header
/// promises `n` nested frames of any kind, written through the same writer.
#[derive(Debug)]
pub struct ReplyWriter<'a> {
    buf: &'a mut Vec<u8>,
}

impl<'a> ReplyWriter<'a> {
    pub fn new(buf: &'a mut Vec<u8>) -> Self {
        Self { buf }
    }

    #[inline]
    pub fn nil(&mut self) {
        self.buf.push(TAG_NIL);
    }

    pub fn error(&mut self, message: &str) {
        self.buf.push(TAG_ERROR);
        self.buf.extend_from_slice(&ERROR_CODE.to_le_bytes());
        self.buf.extend_from_slice(&(message.len() as u32).to_le_bytes());
        self.buf.extend_from_slice(message.as_bytes());
    }

    pub fn string(&mut self, payload: &[u8]) {
        self.buf.push(TAG_STRING);
        self.buf.extend_from_slice(&(payload.len() as u32).to_le_bytes());
        self.buf.extend_from_slice(payload);
    }

    pub fn int(&mut self, value: i64) {
        self.buf.push(TAG_INT);
        self.buf.extend_from_slice(&value.to_le_bytes());
    }

    pub fn array_header(&mut self, len: u32) {
        self.buf.push(TAG_ARRAY);
        self.buf.extend_from_slice(&len.to_le_bytes());
    }
}

/// Decoded reply frame. The server never reads these back; the CLI client
/// and the end-to-end tests do.
#[derive(Debug, Clone, PartialEq)]
pub enum Reply {
    Nil,
    Error { code: u32, message: Vec<u8> },
    String(Vec<u8>),
    Int(i64),
    Array(Vec<Reply>),
}

#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum ReplyError {
    #[error("unknown reply tag {0:#04x}")]
    UnknownTag(u8),
}

/// Decodes one reply frame from the front of `buf`, returning it with the
/// byte count it occupied, or `None` while bytes are still missing.
pub fn try_decode_reply(buf: &[u8]) -> Result<Option<(Reply, usize)>, ReplyError> {
    fn read_u32(buf: &[u8], pos: usize) -> Option<u32> {
        Some(u32::from_le_bytes(buf.get(pos..pos + 4)?.try_into().unwrap()))
    }

    fn decode(buf: &[u8], pos: usize) -> Result<Option<(Reply, usize)>, ReplyError> {
        let Some(&tag) = buf.get(pos) else { return Ok(None) };
        let body = pos + 1;
        match tag {
            TAG_NIL => Ok(Some((Reply::Nil, body))),
            TAG_ERROR => {
                let Some(code) = read_u32(buf, body) else { return Ok(None) };
                let Some(len) = read_u32(buf, body + 4) else { return Ok(None) };
                let start = body + 8;
                let end = start + len as usize;
                let Some(message) = buf.get(start..end) else { return Ok(None) };
                Ok(Some((Reply::Error { code, message: message.to_vec() }, end)))
            }
            TAG_STRING => {
                let Some(len) = read_u32(buf, body) else { return Ok(None) };
                let start = body + 4;
                let end = start + len as usize;
                let Some(payload) = buf.get(start..end) else { return Ok(None) };
                Ok(Some((Reply::String(payload.to_vec()), end)))
            }
            TAG_INT => {
                let Some(bytes) = buf.get(body..body + 8) else { return Ok(None) };
                Ok(Some((Reply::Int(i64::from_le_bytes(bytes.try_into().unwrap())), body + 8)))
            }
            TAG_ARRAY => {
                let Some(len) = read_u32(buf, body) else { return Ok(None) };
                let mut pos = body + 4;
                // Cap the pre-allocation; the claimed count is unvalidated.
                let mut items = Vec::with_capacity(len.min(1_024) as usize);
                for _ in 0..len {
                    match decode(buf, pos)? {
                        Some((item, next)) => {
                            items.push(item);
                            pos = next;
                        }
                        None => return Ok(None),
                    }
                }
                Ok(Some((Reply::Array(items), pos)))
            }
            other => Err(ReplyError::UnknownTag(other)),
        }
    }

    decode(buf, 0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exact_layouts() {
        let mut buf = Vec::new();
        ReplyWriter::new(&mut buf).nil();
        assert_eq!(buf, [0x00]);

        buf.clear();
        ReplyWriter::new(&mut buf).string(b"Tuan");
        assert_eq!(buf, [0x02, 0x04, 0x00, 0x00, 0x00, 0x54, 0x75, 0x61, 0x6e]);

        buf.clear();
        ReplyWriter::new(&mut buf).int(-2);
        assert_eq!(buf[0], TAG_INT);
        assert_eq!(i64::from_le_bytes(buf[1..9].try_into().unwrap()), -2);

        buf.clear();
        ReplyWriter::new(&mut buf).error("Unknown cmd");
        assert_eq!(buf[0], TAG_ERROR);
        assert_eq!(u32::from_le_bytes(buf[1..5].try_into().unwrap()), 1);
        assert_eq!(&buf[9..], b"Unknown cmd");
    }

    #[test]
    fn nested_array_round_trip() {
        let mut buf = Vec::new();
        let mut w = ReplyWriter::new(&mut buf);
        w.array_header(3);
        w.string(b"UserB");
        w.array_header(0);
        w.int(7);

        let (reply, consumed) = try_decode_reply(&buf).unwrap().unwrap();
        assert_eq!(consumed, buf.len());
        assert_eq!(
            reply,
            Reply::Array(vec![
                Reply::String(b"UserB".to_vec()),
                Reply::Array(Vec::new()),
                Reply::Int(7),
            ])
        );
    }

    #[test]
    fn decode_reports_missing_bytes_not_errors() {
        let mut buf = Vec::new();
        {
            let mut w = ReplyWriter::new(&mut buf);
            w.array_header(2);
            w.string(b"partial");
        }

        assert_eq!(try_decode_reply(&buf), Ok(None));
        for cut in 0..buf.len() {
            assert_eq!(try_decode_reply(&buf[..cut]), Ok(None));
        }

        ReplyWriter::new(&mut buf).nil();
        assert!(try_decode_reply(&buf).unwrap().is_some());
    }

    #[test]
    fn unknown_tag_is_an_error() {
        assert_eq!(try_decode_reply(&[0x09]), Err(ReplyError::UnknownTag(0x09)));
    }
}
