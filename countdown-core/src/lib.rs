pub mod config;
pub mod db;
pub mod error;
pub mod ipc;
pub mod models;
pub mod sink;
pub mod store;

pub use config::CountdownConfig;
pub use error::CountdownError;
pub use models::{GroupState, Session, SessionStatus};
pub use sink::{MemorySink, NullSink, PgSnapshotSink, SinkError, SnapshotSink};
pub use store::{DurableStore, FileStore, MemoryStore, StoreError};
