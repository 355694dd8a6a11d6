use thiserror::Error;

/// Hard safety cap on arguments per request frame.
pub const MAX_ARGS: u32 = 1024;

/// Ceiling on a single frame, matching the receive-buffer ceiling. A length
/// field that claims more than this can never complete and is treated as a
/// protocol violation rather than waited on.
pub const MAX_FRAME_BYTES: usize = 512 * 1024 * 1024;

const LEN_FIELD: usize = size_of::<u32>();

/// Framing violation. Fatal to the connection, never answered on the wire.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum FrameError {
    #[error("argument count {0} exceeds the cap of {MAX_ARGS}")]
    TooManyArgs(u32),
    #[error("frame claims {0} bytes, past the {MAX_FRAME_BYTES} ceiling")]
    Oversize(usize),
}

/// Outcome of one parse attempt over the unconsumed receive buffer.
#[derive(Debug, PartialEq, Eq)]
pub enum Parsed {
    /// One whole frame: its arguments and the exact byte count it occupied.
    Complete { args: Vec<Vec<u8>>, consumed: usize },
    /// Not enough bytes yet; nothing was consumed, read more and retry.
    Incomplete,
}

fn read_u32(buf: &[u8], pos: usize) -> Option<u32> {
    let bytes = buf.get(pos..pos + LEN_FIELD)?;
    Some(u32::from_le_bytes(bytes.try_into().unwrap()))
}

/// Decodes one request frame from the front of `buf`.
///
/// `buf` is the valid prefix of a receive buffer and may hold a partial
/// frame, exactly one frame, or several pipelined ones; only the first is
/// decoded. Arguments are copied out so the caller can compact the buffer
/// immediately.
pub fn try_parse(buf: &[u8]) -> Result<Parsed, FrameError> {
    let Some(arg_count) = read_u32(buf, 0) else { return Ok(Parsed::Incomplete) };
    if arg_count > MAX_ARGS {
        return Err(FrameError::TooManyArgs(arg_count));
    }

    let mut pos = LEN_FIELD;
    let mut args = Vec::with_capacity(arg_count as usize);
    for _ in 0..arg_count {
        let Some(arg_len) = read_u32(buf, pos) else { return Ok(Parsed::Incomplete) };
        pos += LEN_FIELD;

        let arg_len = arg_len as usize;
        let end = pos.saturating_add(arg_len);
        if end > MAX_FRAME_BYTES {
            return Err(FrameError::Oversize(end));
        }
        let Some(payload) = buf.get(pos..end) else { return Ok(Parsed::Incomplete) };
        args.push(payload.to_vec());
        pos = end;
    }

    Ok(Parsed::Complete { args, consumed: pos })
}

/// Encodes one request frame, appending to `out`. Used by the CLI client
/// and by tests; the server only ever decodes.
pub fn encode_request(args: &[&[u8]], out: &mut Vec<u8>) {
    out.extend_from_slice(&(args.len() as u32).to_le_bytes());
    for arg in args {
        out.extend_from_slice(&(arg.len() as u32).to_le_bytes());
        out.extend_from_slice(arg);
    }
}
