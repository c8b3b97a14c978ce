//! Storage scoped to a logical flow of execution.
//!
//! A logical flow is a sequential chain of operations which may be suspended
//! and later resumed, possibly on a different worker thread. Values written
//! to a [`FlowLocal`] are visible to the rest of the same flow no matter which
//! thread it is running on, and are invisible to every other flow.
//!
//! Flows fork: a child created with [`fork`] or [`FlowContext::fork`]
//! receives a snapshot of its parent's values under a new [`FlowId`]. After
//! the fork the two diverge, and writes made by either are not observed by
//! the other.
//!
//! Each thread has a root flow which is used for code running outside of
//! any explicit scope. A future which may be polled from more than one
//! thread must be wrapped in a [`Flow`] so that its values travel with it.
//!
//! A flow is sequential. Futures which run concurrently must each be given
//! their own flow, either by [`fork`] or by composing them with [`zip`] or
//! [`or`]; otherwise they are indistinguishable from one another.

use core::{
    any::Any,
    cell::RefCell,
    fmt::{self, Debug, Display, Formatter},
    future::Future,
    marker::PhantomData,
    mem::{self, ManuallyDrop},
    pin::Pin,
    sync::atomic::{AtomicU64, Ordering},
    task::{Context, Poll},
};
use std::{collections::HashMap, sync::Arc};

use futures_lite::future;
use once_cell::sync::Lazy;

static NEXT_FLOW_ID: AtomicU64 = AtomicU64::new(1);

static NEXT_SLOT_KEY: AtomicU64 = AtomicU64::new(1);

type SlotValue = Arc<dyn Any + Send + Sync>;

type SlotMap = HashMap<u64, SlotValue>;

static EMPTY_SLOTS: Lazy<Arc<SlotMap>> = Lazy::new(|| Arc::new(SlotMap::new()));

thread_local! {
    static CURRENT: RefCell<Option<FlowContext>> = RefCell::new(None);
}

/// The identity of a logical flow. Identifiers are never reused within
/// a process.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct FlowId(u64);

impl FlowId {
    fn next() -> Self {
        Self(NEXT_FLOW_ID.fetch_add(1, Ordering::Relaxed))
    }

    /// Get the numeric value of the identifier
    #[inline]
    pub const fn as_u64(self) -> u64 {
        self.0
    }
}

impl Display for FlowId {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "flow-{}", self.0)
    }
}

/// A snapshot of the values stored in a logical flow.
///
/// Cloning a context is cheap, and writes performed while the context is
/// current copy the underlying map only when it is shared.
#[derive(Clone)]
pub struct FlowContext {
    id: FlowId,
    slots: Arc<SlotMap>,
}

impl FlowContext {
    /// Create a new, empty flow which is not derived from the current one.
    pub fn new() -> Self {
        Self {
            id: FlowId::next(),
            slots: Arc::new(SlotMap::new()),
        }
    }

    /// Take a snapshot of the current flow, keeping its identity. Running
    /// the snapshot resumes the same flow.
    pub fn current() -> Self {
        with_current(|ctx| ctx.clone())
    }

    /// Take a snapshot of the current flow's values under a new identity.
    pub fn fork() -> Self {
        let mut ctx = Self::current();
        ctx.id = FlowId::next();
        ctx
    }

    /// Get the identity of this flow
    #[inline]
    pub fn id(&self) -> FlowId {
        self.id
    }

    /// Read a value from this snapshot without entering it
    pub fn get<T>(&self, local: &FlowLocal<T>) -> Option<T>
    where
        T: Clone + Send + Sync + 'static,
    {
        self.slots
            .get(&local.key)
            .and_then(|value| value.downcast_ref::<T>())
            .cloned()
    }

    /// Wrap a future so that it is always polled as this flow
    #[inline]
    pub fn scope<F: Future>(self, future: F) -> Flow<F> {
        Flow {
            context: self,
            future: ManuallyDrop::new(future),
        }
    }

    /// Run a function as this flow. Values written by the function are
    /// retained in the context.
    pub fn run<R>(&mut self, f: impl FnOnce() -> R) -> R {
        enter(self, f)
    }
}

impl Default for FlowContext {
    fn default() -> Self {
        Self::new()
    }
}

impl Debug for FlowContext {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_struct("FlowContext")
            .field("id", &self.id)
            .field("slots", &self.slots.len())
            .finish()
    }
}

/// Get the identity of the current flow
#[inline]
pub fn current_id() -> FlowId {
    with_current(|ctx| ctx.id)
}

/// Wrap a future in a fork of the current flow. This is the way to hand
/// a future to an executor which may poll it from any thread.
#[inline]
pub fn fork<F: Future>(future: F) -> Flow<F> {
    FlowContext::fork().scope(future)
}

/// Wrap a function in a fork of the current flow, for handing off to
/// another thread.
pub fn fork_fn<F, R>(f: F) -> impl FnOnce() -> R + Send
where
    F: FnOnce() -> R + Send,
{
    let mut ctx = FlowContext::fork();
    move || ctx.run(f)
}

/// Run two futures concurrently, each as its own fork of the current flow,
/// and wait for both.
///
/// Futures joined with a plain combinator such as `futures_lite::future::zip`
/// are polled as one flow and share everything scoped to it, including
/// ownership of a re-entrant lock. Use this to keep concurrent branches
/// distinct.
pub fn zip<A, B>(a: A, b: B) -> impl Future<Output = (A::Output, B::Output)>
where
    A: Future,
    B: Future,
{
    future::zip(fork(a), fork(b))
}

/// Race two futures, each as its own fork of the current flow, returning
/// the output of the first to complete. The other is dropped.
pub fn or<T, A, B>(a: A, b: B) -> impl Future<Output = T>
where
    A: Future<Output = T>,
    B: Future<Output = T>,
{
    future::or(fork(a), fork(b))
}

fn with_current<R>(f: impl FnOnce(&mut FlowContext) -> R) -> R {
    CURRENT.with(|cell| {
        let mut current = cell.borrow_mut();
        f(current.get_or_insert_with(FlowContext::new))
    })
}

#[inline]
fn swap_current(ctx: Option<FlowContext>) -> Option<FlowContext> {
    CURRENT.with(|cell| mem::replace(&mut *cell.borrow_mut(), ctx))
}

fn enter<R>(ctx: &mut FlowContext, f: impl FnOnce() -> R) -> R {
    struct Restore<'c> {
        ctx: &'c mut FlowContext,
        prev: Option<FlowContext>,
    }

    impl Drop for Restore<'_> {
        fn drop(&mut self) {
            if let Some(updated) = swap_current(self.prev.take()) {
                *self.ctx = updated;
            }
        }
    }

    // move the context in so that writes do not copy a shared map
    let vacant = FlowContext {
        id: ctx.id,
        slots: EMPTY_SLOTS.clone(),
    };
    let prev = swap_current(Some(mem::replace(ctx, vacant)));
    let _restore = Restore { ctx, prev };
    f()
}

/// A variable with an independent value in each logical flow.
///
/// Values are stored behind an `Arc`, so reading clones the value out of
/// the current flow. Cheaply clonable values such as `Arc<T>` are a good
/// fit.
pub struct FlowLocal<T> {
    key: u64,
    _marker: PhantomData<fn() -> T>,
}

impl<T> FlowLocal<T>
where
    T: Clone + Send + Sync + 'static,
{
    /// Allocate a new flow-local variable
    pub fn new() -> Self {
        Self {
            key: NEXT_SLOT_KEY.fetch_add(1, Ordering::Relaxed),
            _marker: PhantomData,
        }
    }

    /// Get the value in the current flow, if any
    pub fn get(&self) -> Option<T> {
        self.with(|value| value.cloned())
    }

    /// Evaluate a function with a reference to the value in the current flow
    pub fn with<R>(&self, f: impl FnOnce(Option<&T>) -> R) -> R {
        // the thread-local borrow ends before calling out
        let value = with_current(|ctx| ctx.slots.get(&self.key).cloned());
        f(value.as_ref().and_then(|v| v.downcast_ref::<T>()))
    }

    /// Replace the value in the current flow
    pub fn set(&self, value: T) {
        let prev =
            with_current(|ctx| Arc::make_mut(&mut ctx.slots).insert(self.key, Arc::new(value)));
        drop(prev);
    }

    /// Remove the value from the current flow, returning it
    pub fn take(&self) -> Option<T> {
        let prev = with_current(|ctx| {
            if ctx.slots.contains_key(&self.key) {
                Arc::make_mut(&mut ctx.slots).remove(&self.key)
            } else {
                None
            }
        });
        prev.and_then(|v| v.downcast_ref::<T>().cloned())
    }

    /// Determine if the current flow has a value for this variable
    pub fn is_set(&self) -> bool {
        with_current(|ctx| ctx.slots.contains_key(&self.key))
    }
}

impl<T> Default for FlowLocal<T>
where
    T: Clone + Send + Sync + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Debug for FlowLocal<T> {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_tuple("FlowLocal").field(&self.key).finish()
    }
}

/// A future which is polled and dropped as a particular logical flow
pub struct Flow<F> {
    context: FlowContext,
    future: ManuallyDrop<F>,
}

impl<F> Flow<F> {
    /// Access the context of the flow, as of its last poll
    #[inline]
    pub fn context(&self) -> &FlowContext {
        &self.context
    }
}

impl<F: Future> Future for Flow<F> {
    type Output = F::Output;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        // the inner future is never moved out of the pinned wrapper
        let this = unsafe { self.get_unchecked_mut() };
        let future = unsafe { Pin::new_unchecked(&mut *this.future) };
        enter(&mut this.context, || future.poll(cx))
    }
}

impl<F> Drop for Flow<F> {
    fn drop(&mut self) {
        // values held by the future are released from within its own flow
        let future = &mut self.future;
        enter(&mut self.context, || unsafe { ManuallyDrop::drop(future) });
    }
}

impl<F> Debug for Flow<F> {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_struct("Flow")
            .field("context", &self.context)
            .finish()
    }
}
