//! Backend-call contract consumed by the deferred bridge.
//!
//! A [`BackendCall`] is any handle that accepts a single completion callback
//! and hands back a cancellation hook. The core is transport-agnostic:
//! - [`SpawnedCall`]: any future (HTTP, SOAP, gRPC client) run on the tokio runtime
//! - [`ReadyCall`]: a result that is already known (cache hit)
//! - [`HttpBackend`]: JSON-over-HTTP calls via `reqwest`

use std::future::Future;

use crate::context::{self, ContextCarrier};
use crate::deferred::{self, Deferred};

mod http_client;

pub use http_client::HttpBackend;

/// Single completion callback invoked with the call's terminal result.
pub type Completion<T, E> = Box<dyn FnOnce(Result<T, E>) + Send + 'static>;

/// Aborts an in-flight call. Invoked at most once.
pub type CancelHook = Box<dyn FnOnce() + Send + 'static>;

/// Callback-driven asynchronous backend call.
pub trait BackendCall: Send + 'static {
    type Output: Send + 'static;
    type Error: Send + 'static;

    /// Begin the call, registering its single completion callback.
    ///
    /// The callback may fire on any thread, or synchronously before `start`
    /// returns. Dropping it without calling it reports the call as abandoned.
    fn start(self, completion: Completion<Self::Output, Self::Error>) -> CancelHook;
}

/// Runs a future on the tokio runtime inside a captured request context.
///
/// Cancelling aborts the task, which drops the future (and with it any
/// in-flight HTTP request).
pub struct SpawnedCall<F> {
    future: F,
    carrier: ContextCarrier,
}

impl<F> SpawnedCall<F> {
    /// Wrap `future`, capturing the current task's request context.
    pub fn new(future: F) -> Self {
        Self::with_carrier(future, ContextCarrier::capture())
    }

    pub fn with_carrier(future: F, carrier: ContextCarrier) -> Self {
        Self { future, carrier }
    }
}

impl<F, T, E> BackendCall for SpawnedCall<F>
where
    F: Future<Output = Result<T, E>> + Send + 'static,
    T: Send + 'static,
    E: Send + 'static,
{
    type Output = T;
    type Error = E;

    fn start(self, completion: Completion<T, E>) -> CancelHook {
        let Self { future, carrier } = self;
        let handle = tokio::spawn(context::run_with(carrier, async move {
            completion(future.await);
        }));
        Box::new(move || handle.abort())
    }
}

/// A result known at call time. Resolves synchronously during `start`.
pub struct ReadyCall<T, E> {
    result: Result<T, E>,
}

impl<T, E> ReadyCall<T, E> {
    pub fn new(result: Result<T, E>) -> Self {
        Self { result }
    }

    pub fn ok(value: T) -> Self {
        Self::new(Ok(value))
    }

    pub fn err(error: E) -> Self {
        Self::new(Err(error))
    }
}

impl<T, E> BackendCall for ReadyCall<T, E>
where
    T: Send + 'static,
    E: Send + 'static,
{
    type Output = T;
    type Error = E;

    fn start(self, completion: Completion<T, E>) -> CancelHook {
        completion(self.result);
        Box::new(|| {})
    }
}

/// Spawn `future` as a backend call and bridge it into a [`Deferred`].
pub fn spawn<F, T, E>(future: F) -> Deferred<T, E>
where
    F: Future<Output = Result<T, E>> + Send + 'static,
    T: Send + 'static,
    E: Send + 'static,
{
    deferred::bridge(SpawnedCall::new(future))
}
