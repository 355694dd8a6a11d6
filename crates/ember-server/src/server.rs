//! Event-loop orchestrator. Single-threaded: every iteration resumes
//! connections with buffered frames, waits for readiness no longer than the
//! nearest expiration or idle deadline, services the sockets that woke up,
//! and runs the maintenance sweeps.

use std::{
    collections::HashSet,
    io,
    net::SocketAddr,
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    time::Duration,
};

use ember::{MonoMs, Reclaimer, Store};
use ember_network::{FlushState, Gateway};
use ember_wire::{Parsed, try_parse};
use mio::Token;
use tracing::{info, warn};

use crate::{commands::dispatch, config::Opts};

/// Frames serviced per connection per iteration. Bounds one connection's
/// share of the loop; leftovers go through the resume set.
pub const MAX_COMMANDS_PER_ITER: usize = 16;

pub struct Server {
    // Declaration order doubles as drop order: the store (and its reclaim
    // handle) must go before the reclaimer joins its worker.
    store: Store,
    gateway: Gateway,
    resume: HashSet<Token>,
    shutdown: Arc<AtomicBool>,
    reclaimer: Reclaimer,
}

impl Server {
    pub fn bind(opts: &Opts) -> io::Result<Self> {
        let reclaimer = Reclaimer::spawn()?;
        let store = Store::new(reclaimer.handle());
        let gateway =
            Gateway::bind(opts.listen_addr(), opts.idle_timeout_ms(), opts.socket_buf_size)?;
        Ok(Self {
            store,
            gateway,
            resume: HashSet::new(),
            shutdown: Arc::new(AtomicBool::new(false)),
            reclaimer,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.gateway.local_addr()
    }

    /// Flag observed once per iteration; pair it with [`waker`] so a sleeping
    /// poll notices.
    pub fn shutdown_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.shutdown)
    }

    pub fn waker(&self) -> Arc<mio::Waker> {
        self.gateway.waker()
    }

    pub fn run(&mut self) -> io::Result<()> {
        info!("server: event loop running");
        let mut dataful: Vec<Token> = Vec::new();

        while !self.shutdown.load(Ordering::Relaxed) {
            let now = MonoMs::now();

            // Resume pass: connections that still had buffered frames when
            // last iteration's cap hit. The poller can't know about those
            // bytes, so without this pass they'd wait for unrelated traffic.
            if !self.resume.is_empty() {
                let batch: Vec<Token> = self.resume.drain().collect();
                for token in batch {
                    self.service(token, now);
                }
            }

            let timeout_ms = if self.resume.is_empty() {
                self.store
                    .next_expire_deadline_ms(now)
                    .min(self.gateway.next_idle_deadline_ms(now))
            } else {
                0
            };

            dataful.clear();
            self.gateway.poll_io(Some(Duration::from_millis(timeout_ms)), now, &mut dataful)?;

            // The wait may have lasted up to the full timeout.
            let now = MonoMs::now();
            for token in dataful.drain(..) {
                self.service(token, now);
            }

            self.store.sweep_expired(now);
            self.gateway.close_idle(now);
        }

        info!("server: shutting down");
        self.gateway.shutdown_all();
        Ok(())
    }

    /// Parses and dispatches up to [`MAX_COMMANDS_PER_ITER`] frames from one
    /// connection, then compacts, flushes, and updates the resume and
    /// pending-write bookkeeping.
    fn service(&mut self, token: Token, now: MonoMs) {
        let Some(conn) = self.gateway.conn_mut(token) else {
            // Disconnected since it was queued.
            self.resume.remove(&token);
            return;
        };

        let mut consumed = 0;
        let mut processed = 0;
        let mut fatal = None;
        while processed < MAX_COMMANDS_PER_ITER {
            match try_parse(&conn.frame_bytes()[consumed..]) {
                Ok(Parsed::Complete { args, consumed: frame_len }) => {
                    consumed += frame_len;
                    processed += 1;
                    dispatch(&args, &mut self.store, now, conn.reply_buf());
                }
                Ok(Parsed::Incomplete) => break,
                Err(err) => {
                    fatal = Some(err);
                    break;
                }
            }
        }
        conn.consume(consumed);

        if let Some(err) = fatal {
            warn!(?token, %err, "server: protocol error, disconnecting");
            // Frames accepted before the violation already produced replies;
            // push them out (best effort) before the socket goes away.
            conn.flush();
            self.gateway.disconnect(token);
            self.resume.remove(&token);
            return;
        }

        let has_more = processed == MAX_COMMANDS_PER_ITER && !conn.frame_bytes().is_empty();
        let flush = conn.flush();

        if has_more {
            self.resume.insert(token);
        } else {
            self.resume.remove(&token);
        }
        if flush == FlushState::Pending {
            self.gateway.register_pending_write(token);
        }
    }
}
