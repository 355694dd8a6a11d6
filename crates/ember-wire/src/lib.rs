//! The server's own wire format: little-endian length-prefixed request
//! frames in, typed reply frames out. Parsing is incremental so a single
//! TCP segment can carry any number of pipelined frames, or a fraction of
//! one.

mod command;
mod reply;
mod request;

pub use command::CommandName;
pub use reply::{
    Reply, ReplyError, ReplyWriter, TAG_ARRAY, TAG_ERROR, TAG_INT, TAG_NIL, TAG_STRING,
    try_decode_reply,
};
pub use request::{FrameError, MAX_ARGS, MAX_FRAME_BYTES, Parsed, encode_request, try_parse};
