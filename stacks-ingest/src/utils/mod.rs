//! Utility modules for stacks-ingest

pub mod fs_ops;
pub mod retry;
pub mod sweeper;

pub use fs_ops::{is_disk_full, move_file, unique_path, FileMover, LocalMover};
pub use retry::{retry_store, retry_with_backoff, RetryPolicy};
pub use sweeper::{spawn_sweeper, SweeperHandle};
