use core::{
    any::Any,
    fmt::{self, Debug, Formatter},
    future::Future,
    pin::Pin,
    task::{Context, Poll},
};

use flowlock_core::thread::block_on;
use futures_channel::oneshot;
use thiserror::Error;

pub(crate) type JoinResult<T> = Result<T, JoinError>;

/// The reasons a unit of work may fail to produce a result
#[derive(Error)]
pub enum JoinError {
    /// The work panicked; the payload is retained
    #[error("task panicked")]
    Panicked(Box<dyn Any + Send + 'static>),
    /// The pool was shut down before the work completed
    #[error("task was cancelled before completion")]
    Cancelled,
}

impl JoinError {
    /// Determine if the work panicked
    pub fn is_panic(&self) -> bool {
        matches!(self, Self::Panicked(_))
    }

    /// Extract the panic payload, if any
    pub fn into_panic(self) -> Option<Box<dyn Any + Send + 'static>> {
        match self {
            Self::Panicked(payload) => Some(payload),
            Self::Cancelled => None,
        }
    }
}

impl Debug for JoinError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Self::Panicked(_) => f.write_str("Panicked(..)"),
            Self::Cancelled => f.write_str("Cancelled"),
        }
    }
}

/// A handle for awaiting the result of work submitted to a
/// [`ThreadPool`](crate::ThreadPool)
#[derive(Debug)]
pub struct JoinHandle<T> {
    result: oneshot::Receiver<JoinResult<T>>,
}

impl<T> JoinHandle<T> {
    pub(crate) fn new_pair() -> (oneshot::Sender<JoinResult<T>>, Self) {
        let (sender, result) = oneshot::channel();
        (sender, Self { result })
    }

    /// Block the current thread until the result is available
    pub fn join(self) -> JoinResult<T> {
        block_on(self)
    }
}

impl<T> Future for JoinHandle<T> {
    type Output = JoinResult<T>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.result)
            .poll(cx)
            .map(|result| result.unwrap_or(Err(JoinError::Cancelled)))
    }
}
