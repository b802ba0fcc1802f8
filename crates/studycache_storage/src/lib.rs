//! # studycache storage
//!
//! The persistent store capability used by the studycache engine.
//!
//! A store is an **opaque record store**: it keeps keyed byte values in named
//! tables, maintains string-valued secondary indexes, and applies write
//! batches atomically. It never interprets the values it stores.
//!
//! ## Design Principles
//!
//! - One capability trait ([`PersistentStore`]), several interchangeable
//!   backends
//! - Batches are all-or-nothing; readers see the state before or after a
//!   batch, never in between
//! - Backends must be `Send + Sync` so the cache, the queue and the sync
//!   orchestrator can share one store
//! - Backend selection happens once, at startup ([`open_store`])
//!
//! ## Available Backends
//!
//! - [`MemoryStore`] - For tests and platforms without writable storage
//! - [`FileStore`] - Durable store backed by a CRC-checked append log
//!
//! ## Example
//!
//! ```rust
//! use studycache_storage::{MemoryStore, PersistentStore, Record};
//!
//! let store = MemoryStore::new();
//! store
//!     .put("notes", Record::new("n1", b"hello".to_vec()).with_index("owner", "u1"))
//!     .unwrap();
//!
//! let hits = store.query("notes", "owner", "u1").unwrap();
//! assert_eq!(hits.len(), 1);
//! assert_eq!(hits[0].value, b"hello");
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod backend;
pub mod codec;
mod error;
mod file;
mod frame;
mod memory;
mod record;
mod select;
mod tables;

pub use backend::{CompactionStats, PersistentStore};
pub use error::{StorageError, StorageResult};
pub use file::{FileStore, FileStoreOptions, LOCK_FILE, LOG_FILE};
pub use memory::MemoryStore;
pub use record::{Record, WriteBatch, WriteOp};
pub use select::{detect_capability, open_store, StorageCapability, StorageConfig};
