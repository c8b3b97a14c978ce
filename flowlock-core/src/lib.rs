//! Core utilities for flow-scoped locking: storage attached to a logical
//! flow of execution, a binary admission permit, and primitives for
//! blocking a thread on a future.

#![warn(missing_docs, missing_debug_implementations, rust_2018_idioms)]

pub use self::error::{InvalidRelease, LockError};
pub use self::types::Expiry;

mod error;

pub mod flow;

pub mod permit;

pub mod thread;

pub mod timer;

mod types;
