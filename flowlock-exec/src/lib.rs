//! Executors for running closures and futures as forked logical flows.
//!
//! Every unit of work submitted to a [`ThreadPool`] runs as a fork of the submitting
//! logical flow: it starts with a snapshot of the submitter's flow-local
//! values under its own flow identity. Futures are re-queued whenever they
//! are woken, so successive polls of one future may happen on different
//! worker threads while remaining in the same flow.
//!
//! [`LocalPool`] is the single-threaded counterpart: tasks interleave
//! cooperatively on the thread driving the pool, each in its own flow.

#![warn(missing_docs, missing_debug_implementations, rust_2018_idioms)]

pub use self::join::{JoinError, JoinHandle};
pub use self::local::LocalPool;
pub use self::threadpool::{ThreadPool, ThreadPoolConfig};

mod join;

mod local;

mod task;

mod threadpool;
