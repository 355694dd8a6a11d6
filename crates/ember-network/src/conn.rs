use std::{
    io::{self, Read, Write},
    net::SocketAddr,
};

use ember::IdleHandle;
use ember_wire::MAX_FRAME_BYTES;
use mio::{Interest, Registry, Token};
use thiserror::Error;
use tracing::{debug, warn};

/// Initial receive buffer size. Grows by doubling up to the frame ceiling.
pub const RECV_BUF_INIT: usize = 4096;
/// Initial write buffer capacity; resets keep whatever it grew to.
pub const SEND_BUF_INIT: usize = 1024;

#[derive(Debug, Error)]
pub enum RecvError {
    #[error("receive buffer would exceed the {MAX_FRAME_BYTES} byte ceiling")]
    Overflow,
    #[error(transparent)]
    Io(#[from] io::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SocketRead {
    /// Bytes newly appended to the receive buffer (0 on a spurious wakeup).
    Data(usize),
    /// Orderly close by the peer.
    Closed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlushState {
    /// Write buffer fully handed to the kernel and reset.
    Flushed,
    /// Kernel took only part; retry on the next writable event.
    Pending,
}

/// One client connection: the socket, a growable receive buffer with a
/// `filled` watermark, and an append-only write buffer drained from
/// `send_cursor`.
///
/// Inbound: [`read_from_socket`] drains the socket until would-block,
/// growing the buffer *before* each read that would start on a full buffer.
/// Growing first matters: a read into a zero-length slice returns `Ok(0)`,
/// which is indistinguishable from the peer closing.
///
/// Outbound: replies accumulate in `tx`; [`flush`] pushes bytes from
/// `send_cursor` until done or would-block. A completed flush resets the
/// buffer in O(1). A fatal send error also resets it, and the connection is
/// left for the read path to observe and tear down.
#[derive(Debug)]
pub struct Connection {
    stream: mio::net::TcpStream,
    peer: SocketAddr,
    idle: IdleHandle,
    rx: Vec<u8>,
    rx_filled: usize,
    tx: Vec<u8>,
    send_cursor: usize,
}

impl Connection {
    pub fn new(stream: mio::net::TcpStream, peer: SocketAddr, idle: IdleHandle) -> Self {
        Self {
            stream,
            peer,
            idle,
            rx: vec![0; RECV_BUF_INIT],
            rx_filled: 0,
            tx: Vec::with_capacity(SEND_BUF_INIT),
            send_cursor: 0,
        }
    }

    pub fn peer(&self) -> SocketAddr {
        self.peer
    }

    pub fn idle_handle(&self) -> IdleHandle {
        self.idle
    }

    /// Unparsed bytes received so far.
    #[inline]
    pub fn frame_bytes(&self) -> &[u8] {
        &self.rx[..self.rx_filled]
    }

    /// Drops `n` parsed bytes from the front, moving the remainder to
    /// offset 0 (`copy_within` is overlap-safe).
    pub fn consume(&mut self, n: usize) {
        debug_assert!(n <= self.rx_filled);
        if n == 0 {
            return;
        }
        self.rx.copy_within(n..self.rx_filled, 0);
        self.rx_filled -= n;
    }

    /// Buffer replies are encoded into.
    #[inline]
    pub fn reply_buf(&mut self) -> &mut Vec<u8> {
        &mut self.tx
    }

    fn grow_rx(&mut self) -> Result<(), RecvError> {
        if self.rx.len() >= MAX_FRAME_BYTES {
            return Err(RecvError::Overflow);
        }
        let new_len = (self.rx.len() * 2).min(MAX_FRAME_BYTES);
        debug!(peer = %self.peer, new_len, "net: receive buffer grown");
        self.rx.resize(new_len, 0);
        Ok(())
    }

    /// Reads until would-block, growing on saturation.
    pub fn read_from_socket(&mut self) -> Result<SocketRead, RecvError> {
        let mut total = 0;
        loop {
            if self.rx_filled == self.rx.len() {
                self.grow_rx()?;
            }
            match self.stream.read(&mut self.rx[self.rx_filled..]) {
                Ok(0) => return Ok(SocketRead::Closed),
                Ok(n) => {
                    self.rx_filled += n;
                    total += n;
                }
                Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(ref e) if e.kind() == io::ErrorKind::Interrupted => {}
                Err(err) => return Err(err.into()),
            }
        }
        Ok(SocketRead::Data(total))
    }

    /// Sends buffered replies from the cursor onward.
    pub fn flush(&mut self) -> FlushState {
        while self.send_cursor < self.tx.len() {
            match self.stream.write(&self.tx[self.send_cursor..]) {
                Ok(0) => {
                    warn!(peer = %self.peer, "net: zero-byte send, dropping buffered replies");
                    break;
                }
                Ok(n) => self.send_cursor += n,
                Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => return FlushState::Pending,
                Err(ref e) if e.kind() == io::ErrorKind::Interrupted => {}
                Err(err) => {
                    // The next readable event on this socket surfaces the
                    // failure and tears the connection down.
                    debug!(peer = %self.peer, ?err, "net: send failed");
                    break;
                }
            }
        }
        self.tx.clear();
        self.send_cursor = 0;
        FlushState::Flushed
    }

    pub(crate) fn reregister(
        &mut self,
        registry: &Registry,
        token: Token,
        interests: Interest,
    ) -> io::Result<()> {
        registry.reregister(&mut self.stream, token, interests)
    }

    pub(crate) fn close(&mut self, registry: &Registry) {
        let _ = registry.deregister(&mut self.stream);
        let _ = self.stream.shutdown(std::net::Shutdown::Both);
    }
}
