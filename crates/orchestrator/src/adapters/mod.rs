//! Reference implementations of the three external ports (spec §6), so
//! the pipeline is runnable and testable end to end without the
//! production HTTP/DB stack those ports stand in for (spec §1).

pub mod memory;
pub mod sink;
pub mod sqlite;

pub use memory::{FilesystemBlobStore, InMemoryPersistence};
pub use sink::ChannelProgressSink;
pub use sqlite::SqlitePersistence;
