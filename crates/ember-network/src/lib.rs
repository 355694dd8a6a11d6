//! Non-blocking socket front end: a `mio::Poll`-driven listener plus the
//! per-connection receive/send buffers. The event loop above decides what
//! the bytes mean; this crate only moves them and tracks which connections
//! are readable, flushable, or idle.

mod conn;
mod gateway;

pub use conn::{Connection, FlushState, RECV_BUF_INIT, RecvError, SEND_BUF_INIT, SocketRead};
pub use gateway::{Gateway, LISTEN_BACKLOG};
