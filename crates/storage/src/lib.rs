#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! barn-storage: the crash-safe, filesystem-backed job state layer.
//!
//! Every durable fact about a job lives as one file under
//! `jobs/<id>/`, written via temp-file-then-rename so a reader never
//! observes a torn write. This crate owns that layer end to end: the
//! atomic primitive, the directory layout, advisory locking, typed field
//! accessors, and the job repository built on top of them.

pub mod atomic;
pub mod error;
pub mod fields;
pub mod heartbeat;
pub mod layout;
pub mod lock;
pub mod repository;

pub use error::{Result, StorageError};
pub use heartbeat::is_stale;
pub use layout::DirLayout;
pub use lock::FileLock;
pub use repository::JobRepository;
