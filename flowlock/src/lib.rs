//! A mutual-exclusion lock which may be held across suspension points and
//! re-acquired by the logical flow that already holds it.
//!
//! Ownership is tracked per logical flow rather than per thread (see
//! [`flowlock_core::flow`]), so a future holding the lock may be resumed on a
//! different worker thread and still acquire it again without blocking, while
//! concurrently forked flows remain mutually exclusive.
//!
//! ```
//! use flowlock::ReentrantMutex;
//!
//! let mutex = ReentrantMutex::default();
//! let outer = mutex.lock()?;
//! let inner = mutex.lock()?;
//! assert!(outer.is_active());
//! assert!(!inner.is_active());
//! drop(inner);
//! drop(outer);
//! assert!(!mutex.is_locked());
//! # Ok::<(), flowlock::LockError>(())
//! ```

#![warn(missing_docs, missing_debug_implementations, rust_2018_idioms)]

pub use flowlock_core::{flow, InvalidRelease, LockError};
pub use tokio_util::sync::CancellationToken;

pub use self::acquire::Acquire;
pub use self::mutex::{MutexConfig, ReentrantMutex};
pub use self::token::ReleaseToken;

mod acquire;

mod field;

mod mutex;

mod token;
