// live-sessions-service/src/sessions/mod.rs

pub mod recovery;
pub mod state;
pub mod store;

pub use state::{Session, SessionMatch, SessionTable};
pub use store::{MemorySnapshotStore, RedisSnapshotStore, SessionGuard, SessionStore, SnapshotStore};
