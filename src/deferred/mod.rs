//! Single-value deferred results bridged from callback-style backend calls.
//!
//! [`bridge`] turns any [`BackendCall`] into a [`Deferred`]: a future that
//! resolves exactly once with the call's value or error. The request context
//! is captured when the bridge is created and re-installed on whichever
//! worker the completion callback fires, before the result is delivered.
//!
//! Dropping or cancelling a pending `Deferred` fires the call's cancellation
//! hook; a completion arriving afterwards is silently discarded.

use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::task::{Context, Poll};
use std::thread::{self, ThreadId};

use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{debug, trace};

use crate::backend::{BackendCall, CancelHook, Completion};
use crate::context::{self, ContextCarrier, Install, RequestContext};

/// The producer dropped its completion handle without delivering a result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("deferred result abandoned by its producer")]
pub struct Abandoned;

enum LinkState {
    Pending(Option<CancelHook>),
    Completed,
    Cancelled,
}

/// Shared between a `Deferred` and its completion callback.
///
/// Whichever of completion or cancellation gets here first wins.
struct Link {
    state: Mutex<LinkState>,
}

impl Link {
    fn new() -> Self {
        Self {
            state: Mutex::new(LinkState::Pending(None)),
        }
    }

    fn lock(&self) -> MutexGuard<'_, LinkState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Store the call's cancellation hook unless the call already finished.
    fn arm(&self, hook: CancelHook) {
        if let LinkState::Pending(slot) = &mut *self.lock() {
            *slot = Some(hook);
        }
    }

    /// Returns false if the deferred was cancelled first.
    fn complete(&self) -> bool {
        let mut state = self.lock();
        match *state {
            LinkState::Pending(_) => {
                *state = LinkState::Completed;
                true
            }
            LinkState::Completed | LinkState::Cancelled => false,
        }
    }

    /// Returns true if a still-pending call was cancelled.
    fn cancel(&self) -> bool {
        let hook = {
            let mut state = self.lock();
            match std::mem::replace(&mut *state, LinkState::Cancelled) {
                LinkState::Pending(hook) => hook,
                finished => {
                    *state = finished;
                    return false;
                }
            }
        };

        // Outside the lock: the hook may synchronously re-enter the completion.
        if let Some(hook) = hook {
            hook();
        }
        true
    }
}

/// A value that becomes available later, exactly once.
///
/// Await it directly, or hand it to [`Deferred::subscribe`] for callback-style
/// consumption.
#[must_use = "dropping a Deferred cancels the underlying call"]
pub struct Deferred<T, E> {
    rx: oneshot::Receiver<Result<T, E>>,
    link: Option<Arc<Link>>,
    carrier: ContextCarrier,
}

impl<T, E> std::fmt::Debug for Deferred<T, E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Deferred")
            .field("correlation_id", &self.carrier.correlation_id())
            .field("linked", &self.link.is_some())
            .finish()
    }
}

impl<T, E> Deferred<T, E> {
    /// An already-resolved deferred. No call is made and nothing is cancelled.
    pub fn ready(result: Result<T, E>) -> Self {
        let (tx, rx) = oneshot::channel();
        // rx is alive right here, so the send cannot fail.
        let _ = tx.send(result);
        Self {
            rx,
            link: None,
            carrier: ContextCarrier::capture(),
        }
    }

    /// The context snapshot taken when this deferred was created.
    pub fn carrier(&self) -> &ContextCarrier {
        &self.carrier
    }

    /// Cancel the underlying call if it has not completed yet.
    ///
    /// Returns true if a pending call was cancelled.
    pub fn cancel(mut self) -> bool {
        self.release()
    }

    fn release(&mut self) -> bool {
        match self.link.take() {
            Some(link) => {
                let cancelled = link.cancel();
                if cancelled {
                    debug!(
                        correlation_id = self.carrier.correlation_id().unwrap_or(""),
                        "cancelled in-flight backend call"
                    );
                }
                cancelled
            }
            None => false,
        }
    }
}

impl<T, E> Deferred<T, E>
where
    T: Send + 'static,
    E: From<Abandoned> + Send + 'static,
{
    /// Consume the result through callbacks.
    ///
    /// Exactly one of `on_value` or `on_error` runs, on a runtime worker, with
    /// this deferred's request context installed. Must be called within a
    /// tokio runtime.
    pub fn subscribe<V, R>(self, on_value: V, on_error: R) -> Subscription
    where
        V: FnOnce(T) + Send + 'static,
        R: FnOnce(E) + Send + 'static,
    {
        let carrier = self.carrier.clone();
        let handle = tokio::spawn(async move {
            let result = self.await;
            context::run_with_sync(&carrier, Install::Fresh, move || match result {
                Ok(value) => on_value(value),
                Err(error) => on_error(error),
            });
        });
        Subscription { handle }
    }
}

impl<T, E> Drop for Deferred<T, E> {
    fn drop(&mut self) {
        self.release();
    }
}

impl<T, E> Future for Deferred<T, E>
where
    E: From<Abandoned>,
{
    type Output = Result<T, E>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();
        match Pin::new(&mut this.rx).poll(cx) {
            Poll::Ready(Ok(result)) => Poll::Ready(result),
            Poll::Ready(Err(_)) => Poll::Ready(Err(E::from(Abandoned))),
            Poll::Pending => Poll::Pending,
        }
    }
}

/// Handle to callbacks registered with [`Deferred::subscribe`].
#[derive(Debug)]
pub struct Subscription {
    handle: JoinHandle<()>,
}

impl Subscription {
    /// Drop the pending result; neither callback will run.
    pub fn cancel(self) {
        self.handle.abort();
    }

    /// Wait for the subscription to finish. Returns false if it was cancelled.
    pub async fn finished(self) -> bool {
        self.handle.await.is_ok()
    }
}

/// Bridge a backend call, capturing the current task's request context.
pub fn bridge<C>(call: C) -> Deferred<C::Output, C::Error>
where
    C: BackendCall,
{
    bridge_with(ContextCarrier::capture(), call)
}

/// Bridge a backend call with an explicit context carrier.
///
/// When the call resolves synchronously on the registering thread while the
/// carrier's context is already current, it is not installed again.
pub fn bridge_with<C>(carrier: ContextCarrier, call: C) -> Deferred<C::Output, C::Error>
where
    C: BackendCall,
{
    let (tx, rx) = oneshot::channel();
    let link = Arc::new(Link::new());
    let registering = Arc::new(AtomicBool::new(true));
    let registering_thread: ThreadId = thread::current().id();

    let completion: Completion<C::Output, C::Error> = {
        let link = Arc::clone(&link);
        let registering = Arc::clone(&registering);
        let carrier = carrier.clone();
        Box::new(move |result: Result<C::Output, C::Error>| {
            if !link.complete() {
                trace!("completion arrived after cancellation, dropped");
                return;
            }

            let inline = registering.load(Ordering::Acquire)
                && thread::current().id() == registering_thread
                && RequestContext::current().as_ref() == carrier.context();
            let install = if inline {
                Install::AlreadyInstalled
            } else {
                Install::Fresh
            };

            context::run_with_sync(&carrier, install, move || {
                debug!(ok = result.is_ok(), inline, "backend call completed");
                // The consumer may have gone away after completion; nothing to deliver to.
                let _ = tx.send(result);
            });
        })
    };

    let hook = call.start(completion);
    registering.store(false, Ordering::Release);
    link.arm(hook);

    Deferred {
        rx,
        link: Some(link),
        carrier,
    }
}
