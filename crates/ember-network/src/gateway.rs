use std::{
    collections::{HashMap, HashSet},
    io,
    net::SocketAddr,
    sync::Arc,
    time::Duration,
};

use ember::{IdleQueue, MonoMs};
use mio::{Events, Interest, Poll, Token, Waker, event::Event, net::TcpListener};
use tracing::{debug, error, info, warn};

use crate::conn::{Connection, FlushState, RecvError, SocketRead};

/// Listen backlog for the accept queue.
pub const LISTEN_BACKLOG: libc::c_int = 128;

const LISTENER: Token = Token(usize::MAX);
const WAKER: Token = Token(usize::MAX - 1);

/// Socket front end for the event loop. Owns the poller, the listener, the
/// token → connection registry, the pending-write set, and the idle queue.
///
/// Every connection is registered READABLE for its whole life; WRITABLE is
/// armed only while a flush is pending, which keeps the writable set equal
/// to the pending-write set. Teardown is idempotent and always clears all
/// three structures.
pub struct Gateway {
    events: Events,
    core: GatewayCore,
}

struct GatewayCore {
    poll: Poll,
    waker: Arc<Waker>,
    listener: TcpListener,
    local_addr: SocketAddr,
    conns: HashMap<Token, Connection>,
    pending_write: HashSet<Token>,
    idle: IdleQueue<Token>,
    next_token: usize,
    socket_buf_size: Option<usize>,
}

impl Gateway {
    pub fn bind(
        addr: SocketAddr,
        idle_timeout_ms: u64,
        socket_buf_size: Option<usize>,
    ) -> io::Result<Self> {
        let mut listener = bind_listener(addr)?;
        let local_addr = listener.local_addr()?;
        let poll = Poll::new()?;
        let waker = Arc::new(Waker::new(poll.registry(), WAKER)?);
        poll.registry().register(&mut listener, LISTENER, Interest::READABLE)?;
        info!(%local_addr, "net: listening");
        Ok(Self {
            events: Events::with_capacity(256),
            core: GatewayCore {
                poll,
                waker,
                listener,
                local_addr,
                conns: HashMap::new(),
                pending_write: HashSet::new(),
                idle: IdleQueue::new(idle_timeout_ms),
                next_token: 0,
                socket_buf_size,
            },
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.core.local_addr
    }

    pub fn connection_count(&self) -> usize {
        self.core.conns.len()
    }

    /// Handle that interrupts a sleeping [`poll_io`] from another thread.
    pub fn waker(&self) -> Arc<Waker> {
        Arc::clone(&self.core.waker)
    }

    /// One readiness wait plus event handling. Tokens that received new
    /// bytes are appended to `dataful` for the caller to parse.
    pub fn poll_io(
        &mut self,
        timeout: Option<Duration>,
        now: MonoMs,
        dataful: &mut Vec<Token>,
    ) -> io::Result<()> {
        if let Err(err) = self.core.poll.poll(&mut self.events, timeout) {
            if err.kind() == io::ErrorKind::Interrupted {
                return Ok(());
            }
            return Err(err);
        }
        for ev in self.events.iter() {
            self.core.handle_event(ev, now, dataful);
        }
        Ok(())
    }

    pub fn conn_mut(&mut self, token: Token) -> Option<&mut Connection> {
        self.core.conns.get_mut(&token)
    }

    /// Arms write-readiness for a connection with a pending flush.
    /// Idempotent.
    pub fn register_pending_write(&mut self, token: Token) {
        self.core.register_pending_write(token);
    }

    /// Closes and forgets a connection. Idempotent.
    pub fn disconnect(&mut self, token: Token) {
        self.core.teardown(token, true);
    }

    /// Evicts every connection idle past the timeout.
    pub fn close_idle(&mut self, now: MonoMs) -> usize {
        self.core.close_idle(now)
    }

    pub fn next_idle_deadline_ms(&self, now: MonoMs) -> u64 {
        self.core.idle.next_deadline_ms(now)
    }

    pub fn shutdown_all(&mut self) {
        let tokens: Vec<Token> = self.core.conns.keys().copied().collect();
        for token in tokens {
            self.core.teardown(token, true);
        }
    }
}

impl GatewayCore {
    fn handle_event(&mut self, ev: &Event, now: MonoMs, dataful: &mut Vec<Token>) {
        let token = ev.token();
        if token == WAKER {
            // Nothing to do; the point was ending the poll wait.
            return;
        }
        if token == LISTENER {
            self.accept_ready(now);
            return;
        }
        if ev.is_readable() {
            self.read_ready(token, now, dataful);
        }
        if ev.is_writable() {
            self.write_ready(token);
        }
    }

    fn accept_ready(&mut self, now: MonoMs) {
        loop {
            match self.listener.accept() {
                Ok((mut stream, peer)) => {
                    if let Err(err) = stream.set_nodelay(true) {
                        debug!(%peer, ?err, "net: couldn't set nodelay");
                    }
                    if let Some(size) = self.socket_buf_size {
                        set_socket_buf_size(&stream, size);
                    }
                    let token = Token(self.next_token);
                    self.next_token += 1;
                    if let Err(err) =
                        self.poll.registry().register(&mut stream, token, Interest::READABLE)
                    {
                        error!(%peer, ?err, "net: couldn't register client");
                        let _ = stream.shutdown(std::net::Shutdown::Both);
                        continue;
                    }
                    let handle = self.idle.insert(token, now);
                    self.conns.insert(token, Connection::new(stream, peer, handle));
                    info!(%peer, ?token, "net: client connected");
                }
                Err(ref err) if err.kind() == io::ErrorKind::WouldBlock => break,
                Err(ref err) if err.kind() == io::ErrorKind::Interrupted => {}
                Err(err) => {
                    // Resource exhaustion and transient accept failures are
                    // not fatal to the server.
                    warn!(?err, "net: accept failed");
                    break;
                }
            }
        }
    }

    fn read_ready(&mut self, token: Token, now: MonoMs, dataful: &mut Vec<Token>) {
        let Some(conn) = self.conns.get_mut(&token) else { return };
        self.idle.touch(conn.idle_handle(), now);
        match conn.read_from_socket() {
            Ok(SocketRead::Data(0)) => {}
            Ok(SocketRead::Data(_)) => dataful.push(token),
            Ok(SocketRead::Closed) => {
                debug!(?token, "net: peer closed");
                self.teardown(token, true);
            }
            Err(RecvError::Overflow) => {
                warn!(?token, "net: receive buffer ceiling exceeded");
                self.teardown(token, true);
            }
            Err(RecvError::Io(err)) => {
                debug!(?token, ?err, "net: read failed");
                self.teardown(token, true);
            }
        }
    }

    fn write_ready(&mut self, token: Token) {
        let Some(conn) = self.conns.get_mut(&token) else { return };
        match conn.flush() {
            FlushState::Flushed => self.unarm_write(token),
            FlushState::Pending => {}
        }
    }

    fn register_pending_write(&mut self, token: Token) {
        if self.pending_write.contains(&token) {
            return;
        }
        let Some(conn) = self.conns.get_mut(&token) else { return };
        self.pending_write.insert(token);
        if let Err(err) = conn.reregister(
            self.poll.registry(),
            token,
            Interest::READABLE | Interest::WRITABLE,
        ) {
            debug!(?token, ?err, "net: couldn't arm write interest");
            self.teardown(token, true);
        }
    }

    fn unarm_write(&mut self, token: Token) {
        if !self.pending_write.remove(&token) {
            return;
        }
        let Some(conn) = self.conns.get_mut(&token) else { return };
        if let Err(err) = conn.reregister(self.poll.registry(), token, Interest::READABLE) {
            debug!(?token, ?err, "net: couldn't drop write interest");
            self.teardown(token, true);
        }
    }

    /// Removes a connection from the registry, the idle queue, and the
    /// pending-write set, then closes the socket. Safe to call twice; safe
    /// to call for tokens whose idle node was already detached
    /// (`detach_idle = false`).
    fn teardown(&mut self, token: Token, detach_idle: bool) {
        let Some(mut conn) = self.conns.remove(&token) else { return };
        if detach_idle {
            self.idle.remove(conn.idle_handle());
        }
        self.pending_write.remove(&token);
        conn.close(self.poll.registry());
        info!(?token, peer = %conn.peer(), "net: disconnected");
    }

    fn close_idle(&mut self, now: MonoMs) -> usize {
        let victims = self.idle.collect_idle(now);
        let evicted = victims.len();
        for token in victims {
            debug!(?token, "net: idle timeout");
            self.teardown(token, false);
        }
        evicted
    }
}

/// Brings the listening socket up by hand so the backlog and options are
/// explicit: SO_REUSEADDR, non-blocking, backlog of [`LISTEN_BACKLOG`].
#[cfg(unix)]
fn bind_listener(addr: SocketAddr) -> io::Result<TcpListener> {
    use std::os::fd::{AsRawFd, FromRawFd, IntoRawFd, OwnedFd};

    let domain = if addr.is_ipv4() { libc::AF_INET } else { libc::AF_INET6 };
    let raw = unsafe { libc::socket(domain, libc::SOCK_STREAM, 0) };
    if raw < 0 {
        return Err(io::Error::last_os_error());
    }
    let fd = unsafe { OwnedFd::from_raw_fd(raw) };

    let one: libc::c_int = 1;
    let rc = unsafe {
        libc::setsockopt(
            fd.as_raw_fd(),
            libc::SOL_SOCKET,
            libc::SO_REUSEADDR,
            &one as *const _ as *const libc::c_void,
            size_of::<libc::c_int>() as libc::socklen_t,
        )
    };
    if rc != 0 {
        return Err(io::Error::last_os_error());
    }

    let flags = unsafe { libc::fcntl(fd.as_raw_fd(), libc::F_GETFL) };
    if flags < 0 {
        return Err(io::Error::last_os_error());
    }
    if unsafe { libc::fcntl(fd.as_raw_fd(), libc::F_SETFL, flags | libc::O_NONBLOCK) } < 0 {
        return Err(io::Error::last_os_error());
    }

    let rc = match addr {
        SocketAddr::V4(v4) => {
            let mut sin: libc::sockaddr_in = unsafe { std::mem::zeroed() };
            sin.sin_family = libc::AF_INET as libc::sa_family_t;
            sin.sin_port = v4.port().to_be();
            sin.sin_addr.s_addr = u32::from(*v4.ip()).to_be();
            unsafe {
                libc::bind(
                    fd.as_raw_fd(),
                    &sin as *const _ as *const libc::sockaddr,
                    size_of::<libc::sockaddr_in>() as libc::socklen_t,
                )
            }
        }
        SocketAddr::V6(v6) => {
            let mut sin6: libc::sockaddr_in6 = unsafe { std::mem::zeroed() };
            sin6.sin6_family = libc::AF_INET6 as libc::sa_family_t;
            sin6.sin6_port = v6.port().to_be();
            sin6.sin6_addr.s6_addr = v6.ip().octets();
            unsafe {
                libc::bind(
                    fd.as_raw_fd(),
                    &sin6 as *const _ as *const libc::sockaddr,
                    size_of::<libc::sockaddr_in6>() as libc::socklen_t,
                )
            }
        }
    };
    if rc != 0 {
        return Err(io::Error::last_os_error());
    }

    if unsafe { libc::listen(fd.as_raw_fd(), LISTEN_BACKLOG) } != 0 {
        return Err(io::Error::last_os_error());
    }

    Ok(unsafe { TcpListener::from_raw_fd(fd.into_raw_fd()) })
}

#[cfg(not(unix))]
fn bind_listener(addr: SocketAddr) -> io::Result<TcpListener> {
    TcpListener::bind(addr)
}

/// Sets kernel SO_SNDBUF and SO_RCVBUF on an accepted stream.
#[cfg(unix)]
fn set_socket_buf_size(stream: &mio::net::TcpStream, size: usize) {
    use std::os::fd::AsRawFd;

    let fd = stream.as_raw_fd();
    let size = size as libc::c_int;
    for opt in [libc::SO_SNDBUF, libc::SO_RCVBUF] {
        unsafe {
            libc::setsockopt(
                fd,
                libc::SOL_SOCKET,
                opt,
                &size as *const _ as *const libc::c_void,
                size_of::<libc::c_int>() as libc::socklen_t,
            );
        }
    }
}

#[cfg(not(unix))]
fn set_socket_buf_size(_stream: &mio::net::TcpStream, _size: usize) {}

#[cfg(test)]
mod tests {
    use std::{io::Write, thread, time::Duration};

    use super::*;

    fn gateway() -> Gateway {
        Gateway::bind("127.0.0.1:0".parse().unwrap(), 1_000, None).unwrap()
    }

    fn poll_once(gw: &mut Gateway, now: MonoMs) -> Vec<Token> {
        let mut dataful = Vec::new();
        gw.poll_io(Some(Duration::from_millis(50)), now, &mut dataful).unwrap();
        dataful
    }

    #[test]
    fn accepts_and_reports_readable_data() {
        let mut gw = gateway();
        let mut client = std::net::TcpStream::connect(gw.local_addr()).unwrap();

        // First wakeup accepts, second sees the client's bytes.
        poll_once(&mut gw, MonoMs(0));
        assert_eq!(gw.connection_count(), 1);

        client.write_all(b"hello").unwrap();
        let mut dataful = Vec::new();
        for _ in 0..20 {
            dataful = poll_once(&mut gw, MonoMs(1));
            if !dataful.is_empty() {
                break;
            }
        }
        assert_eq!(dataful.len(), 1);
        assert_eq!(gw.conn_mut(dataful[0]).unwrap().frame_bytes(), b"hello");
    }

    #[test]
    fn peer_close_tears_connection_down() {
        let mut gw = gateway();
        let client = std::net::TcpStream::connect(gw.local_addr()).unwrap();
        poll_once(&mut gw, MonoMs(0));
        assert_eq!(gw.connection_count(), 1);

        drop(client);
        for _ in 0..20 {
            poll_once(&mut gw, MonoMs(1));
            if gw.connection_count() == 0 {
                break;
            }
        }
        assert_eq!(gw.connection_count(), 0);
    }

    #[test]
    fn disconnect_is_idempotent() {
        let mut gw = gateway();
        let _client = std::net::TcpStream::connect(gw.local_addr()).unwrap();
        poll_once(&mut gw, MonoMs(0));

        let token = Token(0);
        assert!(gw.conn_mut(token).is_some());
        gw.disconnect(token);
        gw.disconnect(token);
        assert_eq!(gw.connection_count(), 0);
    }

    #[test]
    fn idle_eviction_uses_activity_order() {
        let mut gw = gateway();
        let _a = std::net::TcpStream::connect(gw.local_addr()).unwrap();
        poll_once(&mut gw, MonoMs(0));
        thread::sleep(Duration::from_millis(5));
        let _b = std::net::TcpStream::connect(gw.local_addr()).unwrap();
        for _ in 0..20 {
            poll_once(&mut gw, MonoMs(500));
            if gw.connection_count() == 2 {
                break;
            }
        }
        assert_eq!(gw.connection_count(), 2);

        // Only the first connection is past the 1000ms timeout.
        assert_eq!(gw.close_idle(MonoMs(1_100)), 1);
        assert_eq!(gw.connection_count(), 1);
        assert_eq!(gw.close_idle(MonoMs(10_000)), 1);
        assert_eq!(gw.connection_count(), 0);
    }
}
