mod assert;
mod clock;
mod entry;
mod expire;
mod idle;
mod reclaim;
mod store;
mod zset;

pub use clock::{DEFAULT_POLL_TIMEOUT_MS, MonoMs};
pub use entry::{Entry, Key, Value, ValueKind};
pub use idle::{IDLE_TIMEOUT_MS, IdleHandle, IdleQueue};
pub use reclaim::{OFFLOAD_THRESHOLD, ReclaimHandle, Reclaimer};
pub use store::{IntUpdateError, Store, Ttl, WrongKind};
pub use zset::SortedSet;
