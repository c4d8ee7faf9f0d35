//! # Promise
//!
//! A one-shot result cell with a queue of continuations.
//!
//! ## Invariants
//! - **One Transition**: a promise moves from pending to fulfilled or
//!   rejected exactly once. The move is claimed with a compare-and-swap, so
//!   when several threads settle concurrently exactly one wins and the rest
//!   are no-ops.
//! - **Adoption Locks**: resolving with another promise claims the
//!   transition immediately; the outcome arrives when that promise settles.
//! - **Asynchronous Continuations**: subscribers are scheduled in
//!   registration order, each on its own task, never on the settling stack.
//! - **No Cancellation**: rejecting a promise (for example on timeout) does
//!   not stop the work that would have settled it.

use std::future::Future;
use std::mem;
use std::panic::AssertUnwindSafe;
use std::panic::catch_unwind;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::Condvar;
use std::sync::Mutex;
use std::sync::MutexGuard;
use std::sync::PoisonError;
use std::sync::atomic::AtomicU8;
use std::sync::atomic::Ordering;
use std::task::Context;
use std::task::Poll;
use std::task::Waker;
use std::time::Duration;

use crate::error::Error;
use crate::error::Result;
use crate::scheduler;

const PENDING: u8 = 0;
const LOCKED: u8 = 1;
const FULFILLED: u8 = 2;
const REJECTED: u8 = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    Pending,
    Fulfilled,
    Rejected,
}

pub(crate) type Subscriber<T> = Box<dyn FnOnce(Result<T>) + Send>;

struct Slot<T> {
    outcome: Option<Result<T>>,
    subscribers: Vec<Subscriber<T>>,
    wakers: Vec<Waker>,
}

struct Inner<T> {
    state: AtomicU8,
    slot: Mutex<Slot<T>>,
    settled: Condvar,
}

/// A handle to an eventual `Result<T>`. Clones share the same cell.
pub struct Promise<T> {
    inner: Arc<Inner<T>>,
}

impl<T> Clone for Promise<T> {
    fn clone(&self) -> Self {
        Self { inner: self.inner.clone() }
    }
}

impl<T> std::fmt::Debug for Promise<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Promise")
            .field("state", &self.inner.state.load(Ordering::Acquire))
            .finish()
    }
}

/// What a promise can be resolved with.
pub enum Resolution<T> {
    Value(T),
    Rejected(Error),
    /// Take on the eventual state of another promise.
    Adopt(Promise<T>),
}

/// Conversion into a [`Resolution`]. Continuations return any of these.
pub trait IntoResolution: Send + 'static {
    type Value: Clone + Send + 'static;
    fn into_resolution(self) -> Resolution<Self::Value>;
}

impl<T: Clone + Send + 'static> IntoResolution for Result<T> {
    type Value = T;
    fn into_resolution(self) -> Resolution<T> {
        match self {
            Ok(v) => Resolution::Value(v),
            Err(e) => Resolution::Rejected(e),
        }
    }
}

impl<T: Clone + Send + 'static> IntoResolution for Promise<T> {
    type Value = T;
    fn into_resolution(self) -> Resolution<T> {
        Resolution::Adopt(self)
    }
}

impl<T: Clone + Send + 'static> IntoResolution for Resolution<T> {
    type Value = T;
    fn into_resolution(self) -> Resolution<T> {
        self
    }
}

impl<T: Clone + Send + 'static> Default for Promise<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Clone + Send + 'static> Promise<T> {
    /// A pending promise.
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Inner {
                state: AtomicU8::new(PENDING),
                slot: Mutex::new(Slot {
                    outcome: None,
                    subscribers: Vec::new(),
                    wakers: Vec::new(),
                }),
                settled: Condvar::new(),
            }),
        }
    }

    pub fn resolved(value: T) -> Self {
        let promise = Self::new();
        promise.fulfill(value);
        promise
    }

    pub fn rejected(reason: Error) -> Self {
        let promise = Self::new();
        promise.reject(reason);
        promise
    }

    /// Runs `f` on a task and resolves with what it returns. A panic in `f`
    /// rejects the promise.
    pub fn from_fn<F, R>(f: F) -> Self
    where
        F: FnOnce() -> R + Send + 'static,
        R: IntoResolution<Value = T>,
    {
        let promise = Self::new();
        let target = promise.clone();
        scheduler::spawn(move || target.resolve_guarded(f));
        promise
    }

    /// Drives `future` on a task and settles with its output.
    pub fn from_future<F>(future: F) -> Self
    where
        F: Future<Output = Result<T>> + Send + 'static,
    {
        let promise = Self::new();
        let target = promise.clone();
        scheduler::spawn_future(async move {
            let outcome = future.await;
            target.settle(outcome);
        });
        promise
    }

    /// Runs `f` after `delay` and resolves with its result.
    pub fn delayed<F, R>(delay: Duration, f: F) -> Self
    where
        F: FnOnce() -> R + Send + 'static,
        R: IntoResolution<Value = T>,
    {
        let promise = Self::new();
        let target = promise.clone();
        scheduler::spawn_future(async move {
            tokio::time::sleep(delay).await;
            target.resolve_guarded(f);
        });
        promise
    }

    fn lock(&self) -> MutexGuard<'_, Slot<T>> {
        self.inner.slot.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn state(&self) -> State {
        match self.inner.state.load(Ordering::Acquire) {
            FULFILLED => State::Fulfilled,
            REJECTED => State::Rejected,
            _ => State::Pending,
        }
    }

    pub fn is_pending(&self) -> bool {
        self.state() == State::Pending
    }

    /// The outcome, if settled.
    pub fn peek(&self) -> Option<Result<T>> {
        self.lock().outcome.clone()
    }

    fn claim(&self) -> bool {
        self.inner
            .state
            .compare_exchange(PENDING, LOCKED, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    /// Stores the outcome of a claimed promise and schedules subscribers.
    fn complete(&self, outcome: Result<T>) {
        let final_state = if outcome.is_ok() { FULFILLED } else { REJECTED };
        let (subscribers, wakers) = {
            let mut slot = self.lock();
            slot.outcome = Some(outcome.clone());
            self.inner.state.store(final_state, Ordering::Release);
            (mem::take(&mut slot.subscribers), mem::take(&mut slot.wakers))
        };
        self.inner.settled.notify_all();
        for subscriber in subscribers {
            let outcome = outcome.clone();
            scheduler::spawn(move || subscriber(outcome));
        }
        for waker in wakers {
            waker.wake();
        }
    }

    /// Settles with a final outcome. Returns false if already claimed.
    pub fn settle(&self, outcome: Result<T>) -> bool {
        if !self.claim() {
            return false;
        }
        self.complete(outcome);
        true
    }

    pub fn fulfill(&self, value: T) -> bool {
        self.settle(Ok(value))
    }

    pub fn reject(&self, reason: Error) -> bool {
        self.settle(Err(reason))
    }

    /// Resolves with a value, a rejection, or another promise to adopt.
    /// Resolving a promise with itself rejects it with `SelfResolution`.
    pub fn resolve(&self, resolution: impl IntoResolution<Value = T>) -> bool {
        if !self.claim() {
            return false;
        }
        match resolution.into_resolution() {
            Resolution::Value(v) => self.complete(Ok(v)),
            Resolution::Rejected(e) => self.complete(Err(e)),
            Resolution::Adopt(other) => {
                if Arc::ptr_eq(&other.inner, &self.inner) {
                    self.complete(Err(Error::SelfResolution));
                } else {
                    let this = self.clone();
                    other.subscribe(Box::new(move |outcome| this.complete(outcome)));
                }
            }
        }
        true
    }

    /// Runs `f`, resolving with its result or rejecting with its panic.
    fn resolve_guarded<F, R>(&self, f: F)
    where
        F: FnOnce() -> R,
        R: IntoResolution<Value = T>,
    {
        match catch_unwind(AssertUnwindSafe(f)) {
            Ok(resolution) => {
                self.resolve(resolution);
            }
            Err(payload) => {
                let error = Error::from_panic(payload);
                tracing::warn!(%error, "promise continuation panicked");
                self.reject(error);
            }
        }
    }

    pub(crate) fn subscribe(&self, subscriber: Subscriber<T>) {
        let mut slot = self.lock();
        match &slot.outcome {
            Some(outcome) => {
                let outcome = outcome.clone();
                drop(slot);
                scheduler::spawn(move || subscriber(outcome));
            }
            None => slot.subscribers.push(subscriber),
        }
    }

    // ========================================================================
    //  CHAINING
    // ========================================================================

    /// Continues with `on_fulfilled`; rejections pass through.
    pub fn then<F, R>(&self, on_fulfilled: F) -> Promise<R::Value>
    where
        F: FnOnce(T) -> R + Send + 'static,
        R: IntoResolution,
    {
        let next = Promise::new();
        let downstream = next.clone();
        self.subscribe(Box::new(move |outcome| match outcome {
            Ok(value) => downstream.resolve_guarded(move || on_fulfilled(value)),
            Err(reason) => {
                downstream.reject(reason);
            }
        }));
        next
    }

    /// Continues with one of two handlers, depending on the outcome.
    pub fn then_or_else<F, G, R>(&self, on_fulfilled: F, on_rejected: G) -> Promise<R::Value>
    where
        F: FnOnce(T) -> R + Send + 'static,
        G: FnOnce(Error) -> R + Send + 'static,
        R: IntoResolution,
    {
        self.complete_with(move |outcome| match outcome {
            Ok(value) => on_fulfilled(value),
            Err(reason) => on_rejected(reason),
        })
    }

    /// Continues with the whole outcome.
    pub fn complete_with<F, R>(&self, on_complete: F) -> Promise<R::Value>
    where
        F: FnOnce(Result<T>) -> R + Send + 'static,
        R: IntoResolution,
    {
        let next = Promise::new();
        let downstream = next.clone();
        self.subscribe(Box::new(move |outcome| {
            downstream.resolve_guarded(move || on_complete(outcome))
        }));
        next
    }

    /// Recovers from any rejection.
    pub fn catch<G, R>(&self, on_rejected: G) -> Promise<T>
    where
        G: FnOnce(Error) -> R + Send + 'static,
        R: IntoResolution<Value = T>,
    {
        self.catch_if(|_| true, on_rejected)
    }

    /// Recovers from rejections accepted by `test`. Declined rejections
    /// pass through unchanged.
    pub fn catch_if<P, G, R>(&self, test: P, on_rejected: G) -> Promise<T>
    where
        P: FnOnce(&Error) -> bool + Send + 'static,
        G: FnOnce(Error) -> R + Send + 'static,
        R: IntoResolution<Value = T>,
    {
        let next = Promise::new();
        let downstream = next.clone();
        self.subscribe(Box::new(move |outcome| match outcome {
            Ok(value) => {
                downstream.fulfill(value);
            }
            Err(reason) => match catch_unwind(AssertUnwindSafe(|| test(&reason))) {
                Ok(true) => downstream.resolve_guarded(move || on_rejected(reason)),
                Ok(false) => {
                    downstream.reject(reason);
                }
                Err(payload) => {
                    downstream.reject(Error::from_panic(payload));
                }
            },
        }));
        next
    }

    /// Runs `f` once settled, then passes the outcome through. A panic in
    /// `f` replaces the outcome with a panic rejection.
    pub fn when_complete<F>(&self, f: F) -> Promise<T>
    where
        F: FnOnce() + Send + 'static,
    {
        self.complete_with(move |outcome| {
            f();
            outcome
        })
    }

    /// Observes a fulfilled value without changing it.
    pub fn tap<F>(&self, f: F) -> Promise<T>
    where
        F: FnOnce(&T) + Send + 'static,
    {
        self.then(move |value| {
            f(&value);
            Ok(value)
        })
    }

    /// Ends a chain. A rejection reaching this point panics on its task,
    /// which is reported but does not unwind into the settling caller.
    pub fn done<F>(&self, on_fulfilled: F)
    where
        F: FnOnce(T) + Send + 'static,
    {
        self.subscribe(Box::new(move |outcome| match outcome {
            Ok(value) => on_fulfilled(value),
            Err(reason) => panic!("unhandled promise rejection: {}", reason),
        }));
    }

    /// Pipes this promise's outcome into `target`.
    pub fn fill(&self, target: &Promise<T>) {
        let target = target.clone();
        self.subscribe(Box::new(move |outcome| {
            target.settle(outcome);
        }));
    }

    // ========================================================================
    //  TIMING
    // ========================================================================

    /// Rejects with `reason` (or `Error::Timeout`) unless this promise
    /// settles within `duration`. The timer is cancelled once it does.
    pub fn timeout(&self, duration: Duration, reason: Option<Error>) -> Promise<T> {
        let next = Promise::new();
        let on_timeout = next.clone();
        let timer = scheduler::spawn_future(async move {
            tokio::time::sleep(duration).await;
            on_timeout.reject(reason.unwrap_or(Error::Timeout));
        });
        let downstream = next.clone();
        self.subscribe(Box::new(move |outcome| {
            timer.abort();
            downstream.settle(outcome);
        }));
        next
    }

    /// Fulfills `duration` after this promise fulfills. Rejections are not
    /// delayed.
    pub fn delay(&self, duration: Duration) -> Promise<T> {
        let next = Promise::new();
        let downstream = next.clone();
        self.subscribe(Box::new(move |outcome| match outcome {
            Ok(value) => {
                scheduler::spawn_future(async move {
                    tokio::time::sleep(duration).await;
                    downstream.fulfill(value);
                });
            }
            Err(reason) => {
                downstream.reject(reason);
            }
        }));
        next
    }

    // ========================================================================
    //  WAITING
    // ========================================================================

    /// Blocks the calling thread until settled.
    ///
    /// Must not be called from a continuation of this promise, nor from a
    /// thread that drives the runtime its continuations run on.
    pub fn get(&self) -> Result<T> {
        let mut slot = self.lock();
        loop {
            if let Some(outcome) = &slot.outcome {
                return outcome.clone();
            }
            slot = self
                .inner
                .settled
                .wait(slot)
                .unwrap_or_else(PoisonError::into_inner);
        }
    }

    /// Like `get`, giving up after `duration`.
    pub fn get_timeout(&self, duration: Duration) -> Result<T> {
        let slot = self.lock();
        let (slot, _) = self
            .inner
            .settled
            .wait_timeout_while(slot, duration, |slot| slot.outcome.is_none())
            .unwrap_or_else(PoisonError::into_inner);
        match &slot.outcome {
            Some(outcome) => outcome.clone(),
            None => Err(Error::Timeout),
        }
    }
}

impl<T: Clone + Send + 'static> Future for Promise<T> {
    type Output = Result<T>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let mut slot = self.lock();
        if let Some(outcome) = &slot.outcome {
            return Poll::Ready(outcome.clone());
        }
        if !slot.wakers.iter().any(|w| w.will_wake(cx.waker())) {
            slot.wakers.push(cx.waker().clone());
        }
        Poll::Pending
    }
}
