//! Offline-first synchronization with the remote site collection.

pub mod engine;
pub mod queue;
pub mod remote;
pub mod schema;

pub use engine::{backoff_delay, ConnectionState, SyncEngine, SyncEvent, WriteOutcome};
pub use queue::{FailureReason, PendingWrite, WriteState};
pub use remote::{InMemoryRemote, RemoteDocument, RemoteError, RemoteSnapshot, RemoteStore};
