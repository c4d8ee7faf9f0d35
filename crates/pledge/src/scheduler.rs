//! Where continuations run.
//!
//! Continuations are never called on the stack that settled the promise.
//! Each one is spawned as its own task on the ambient tokio runtime, or on a
//! small fallback runtime when the caller has none (plain threads, blocking
//! `get` callers).

use std::future::Future;
use std::sync::OnceLock;

use tokio::runtime::Builder;
use tokio::runtime::Handle;
use tokio::runtime::Runtime;
use tokio::task::JoinHandle;

fn fallback() -> &'static Runtime {
    static RUNTIME: OnceLock<Runtime> = OnceLock::new();
    RUNTIME.get_or_init(|| {
        tracing::debug!("starting fallback promise runtime");
        Builder::new_multi_thread()
            .worker_threads(2)
            .thread_name("pledge-worker")
            .enable_all()
            .build()
            .expect("failed to start the fallback promise runtime")
    })
}

fn handle() -> Handle {
    match Handle::try_current() {
        Ok(handle) => handle,
        Err(_) => fallback().handle().clone(),
    }
}

/// Runs `f` on a fresh task.
pub(crate) fn spawn(f: impl FnOnce() + Send + 'static) {
    handle().spawn(async move { f() });
}

pub(crate) fn spawn_future<F>(future: F) -> JoinHandle<F::Output>
where
    F: Future + Send + 'static,
    F::Output: Send + 'static,
{
    handle().spawn(future)
}
