//! Size-adaptive value teardown. Dropping a big sorted set frees thousands
//! of nodes; doing that on the loop thread stalls every connection, so large
//! compound values are shipped to a single background worker. Small values
//! drop inline, where the channel hop would cost more than the teardown.

use std::{
    io,
    panic::{AssertUnwindSafe, catch_unwind},
    thread::{self, JoinHandle},
};

use crossbeam_channel::{Receiver, Sender, unbounded};
use tracing::{debug, error};

use crate::entry::Value;

/// Member count at which a sorted set is considered large.
pub const OFFLOAD_THRESHOLD: usize = 64;

type Job = Box<dyn FnOnce() + Send + 'static>;

fn should_offload(value: &Value) -> bool {
    match value {
        Value::Zset(zs) => zs.len() >= OFFLOAD_THRESHOLD,
        Value::Null | Value::Str(_) | Value::Int(_) | Value::Float(_) => false,
    }
}

/// Submission side of the reclaim queue. Cheap to clone; sends never block.
#[derive(Debug, Clone)]
pub struct ReclaimHandle {
    tx: Sender<Job>,
}

impl ReclaimHandle {
    /// Queues a job for the worker. Falls back to running it inline when the
    /// worker is already gone (shutdown races).
    pub fn submit(&self, job: impl FnOnce() + Send + 'static) {
        if let Err(err) = self.tx.send(Box::new(job)) {
            debug!("reclaim: worker gone, running job inline");
            (err.into_inner())();
        }
    }

    /// Destroys a value, offloading it when large. The job owns the value;
    /// once queued it counts as freed from the keyspace's point of view.
    pub fn dispose(&self, value: Value) {
        if should_offload(&value) {
            self.submit(move || drop(value));
        } else {
            drop(value);
        }
    }
}

/// Owns the worker thread. Dropping it closes the queue and joins the
/// worker, which drains every remaining job first.
#[derive(Debug)]
pub struct Reclaimer {
    tx: Option<Sender<Job>>,
    worker: Option<JoinHandle<()>>,
}

impl Reclaimer {
    pub fn spawn() -> io::Result<Self> {
        let (tx, rx) = unbounded::<Job>();
        let worker =
            thread::Builder::new().name("ember-reclaim".into()).spawn(move || worker_loop(&rx))?;
        Ok(Self { tx: Some(tx), worker: Some(worker) })
    }

    pub fn handle(&self) -> ReclaimHandle {
        // tx is only vacated by Drop.
        ReclaimHandle { tx: self.tx.clone().expect("reclaimer is live until drop") }
    }
}

impl Drop for Reclaimer {
    fn drop(&mut self) {
        drop(self.tx.take());
        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                error!("reclaim: worker thread panicked");
            }
        }
    }
}

fn worker_loop(rx: &Receiver<Job>) {
    while let Ok(job) = rx.recv() {
        if catch_unwind(AssertUnwindSafe(job)).is_err() {
            error!("reclaim: job panicked, value counted as freed");
        }
    }
    debug!("reclaim: queue drained, worker exiting");
}

#[cfg(test)]
mod tests {
    use std::sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    };

    use super::*;
    use crate::zset::SortedSet;

    fn big_zset() -> Value {
        let mut zs = SortedSet::new();
        for i in 0..OFFLOAD_THRESHOLD {
            zs.insert(format!("m{i}").as_bytes(), i as f64);
        }
        Value::Zset(zs)
    }

    #[test]
    fn offload_routing_follows_threshold() {
        assert!(should_offload(&big_zset()));

        let mut small = SortedSet::new();
        small.insert(b"m", 1.0);
        assert!(!should_offload(&Value::Zset(small)));
        assert!(!should_offload(&Value::Str(vec![0; 1 << 20])));
        assert!(!should_offload(&Value::Int(7)));
    }

    #[test]
    fn queue_is_drained_on_drop() {
        let ran = Arc::new(AtomicUsize::new(0));
        let reclaimer = Reclaimer::spawn().unwrap();
        let handle = reclaimer.handle();

        for _ in 0..16 {
            let ran = Arc::clone(&ran);
            handle.submit(move || {
                ran.fetch_add(1, Ordering::SeqCst);
            });
        }
        handle.dispose(big_zset());

        drop(handle);
        drop(reclaimer);
        assert_eq!(ran.load(Ordering::SeqCst), 16);
    }

    #[test]
    fn panicking_job_does_not_kill_the_worker() {
        let ran = Arc::new(AtomicUsize::new(0));
        let reclaimer = Reclaimer::spawn().unwrap();
        let handle = reclaimer.handle();

        handle.submit(|| panic!("boom"));
        let probe = Arc::clone(&ran);
        handle.submit(move || {
            probe.fetch_add(1, Ordering::SeqCst);
        });

        drop(handle);
        drop(reclaimer);
        assert_eq!(ran.load(Ordering::SeqCst), 1);
    }
}
