//! Request context propagation across async boundaries.
//!
//! A [`RequestContext`] is built once at the inbound boundary and is immutable
//! afterward. It travels explicitly as a [`ContextCarrier`] to every
//! operation the request fans out to. Wherever a continuation runs, the
//! carrier is re-installed as the task-local current context and as a
//! `request` tracing span, so log lines emitted on any worker carry the
//! originating request's correlation id and principal.
//!
//! # Example
//!
//! ```ignore
//! let ctx = RequestContext::from_headers(&headers).with_principal("alice");
//! let cards = context::run_with(ctx.into(), async {
//!     // ContextCarrier::capture() here yields the request context
//!     aggregator.aggregate(ids, |id| backend.fetch(id)).await
//! })
//! .await;
//! ```

use std::collections::BTreeMap;
use std::future::Future;
use std::sync::Arc;

use http::HeaderMap;
use tracing::field::Empty;
use tracing::{debug, Instrument, Span};

/// Header carrying the caller-supplied correlation id.
pub const CORRELATION_ID_HEADER: &str = "x-correlation-id";
/// Fallback header consulted when no correlation id is present.
pub const REQUEST_ID_HEADER: &str = "x-request-id";

tokio::task_local! {
    static CURRENT: RequestContext;
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
struct ContextInner {
    correlation_id: Option<String>,
    principal: Option<String>,
    tags: BTreeMap<String, String>,
}

/// Diagnostic and security metadata of one inbound request.
///
/// Cloning is cheap; all clones share the same snapshot.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RequestContext {
    inner: Arc<ContextInner>,
}

impl RequestContext {
    /// Create an empty context.
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a context from inbound request headers.
    ///
    /// Uses `x-correlation-id`, then `x-request-id`. When neither is present a
    /// fresh UUIDv4 is generated so every request stays traceable.
    pub fn from_headers(headers: &HeaderMap) -> Self {
        let correlation_id = [CORRELATION_ID_HEADER, REQUEST_ID_HEADER]
            .iter()
            .find_map(|name| {
                headers
                    .get(*name)
                    .and_then(|value| value.to_str().ok())
                    .map(str::trim)
                    .filter(|value| !value.is_empty())
                    .map(str::to_string)
            })
            .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());

        Self::new().with_correlation_id(correlation_id)
    }

    /// Set the correlation id.
    pub fn with_correlation_id(mut self, correlation_id: impl Into<String>) -> Self {
        Arc::make_mut(&mut self.inner).correlation_id = Some(correlation_id.into());
        self
    }

    /// Set the authenticated principal.
    pub fn with_principal(mut self, principal: impl Into<String>) -> Self {
        Arc::make_mut(&mut self.inner).principal = Some(principal.into());
        self
    }

    /// Add a diagnostic tag.
    pub fn with_tag(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        Arc::make_mut(&mut self.inner)
            .tags
            .insert(key.into(), value.into());
        self
    }

    pub fn correlation_id(&self) -> Option<&str> {
        self.inner.correlation_id.as_deref()
    }

    pub fn principal(&self) -> Option<&str> {
        self.inner.principal.as_deref()
    }

    pub fn tag(&self, key: &str) -> Option<&str> {
        self.inner.tags.get(key).map(String::as_str)
    }

    pub fn tags(&self) -> &BTreeMap<String, String> {
        &self.inner.tags
    }

    /// The context installed on the current task, if any.
    pub fn current() -> Option<RequestContext> {
        CURRENT.try_with(Clone::clone).ok()
    }

    /// Span that stamps this context onto every log line emitted within it.
    pub fn span(&self) -> Span {
        let span = tracing::info_span!("request", correlation_id = Empty, principal = Empty);
        if let Some(correlation_id) = self.correlation_id() {
            span.record("correlation_id", correlation_id);
        }
        if let Some(principal) = self.principal() {
            span.record("principal", principal);
        }
        span
    }
}

/// Snapshot of a request context taken when an async operation is launched.
///
/// A carrier without a context is *detached*: work still runs, only
/// correlation is lost. The loss is reported once per aggregate by
/// [`Aggregator::aggregate`](crate::aggregate::Aggregator::aggregate).
#[derive(Debug, Clone, Default)]
pub struct ContextCarrier {
    context: Option<RequestContext>,
}

impl ContextCarrier {
    /// Snapshot the context installed on the current task.
    pub fn capture() -> Self {
        Self {
            context: RequestContext::current(),
        }
    }

    /// Carrier that propagates no context.
    pub fn detached() -> Self {
        Self::default()
    }

    pub fn context(&self) -> Option<&RequestContext> {
        self.context.as_ref()
    }

    pub fn is_detached(&self) -> bool {
        self.context.is_none()
    }

    pub fn correlation_id(&self) -> Option<&str> {
        self.context.as_ref().and_then(RequestContext::correlation_id)
    }
}

impl From<RequestContext> for ContextCarrier {
    fn from(context: RequestContext) -> Self {
        Self {
            context: Some(context),
        }
    }
}

/// Whether the executing worker already runs in the carrier's context.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Install {
    /// Install the carrier before running and restore afterward.
    Fresh,
    /// The carrier's context is already current; run as-is.
    AlreadyInstalled,
}

/// Run a future with the carrier's context installed.
///
/// The previous task-local context is restored when the future completes,
/// fails, panics, or is dropped. Errors from `future` pass through untouched.
pub async fn run_with<F>(carrier: ContextCarrier, future: F) -> F::Output
where
    F: Future,
{
    match carrier.context {
        Some(context) => {
            let span = context.span();
            CURRENT.scope(context, future.instrument(span)).await
        }
        None => {
            debug!("request context unavailable, continuing without correlation");
            future.await
        }
    }
}

/// Run a closure with the carrier's context installed.
///
/// With [`Install::AlreadyInstalled`] the closure runs directly, leaving the
/// worker's current context untouched.
pub fn run_with_sync<R>(carrier: &ContextCarrier, install: Install, f: impl FnOnce() -> R) -> R {
    if install == Install::AlreadyInstalled {
        return f();
    }

    match carrier.context() {
        Some(context) => {
            let span = context.span();
            let _entered = span.enter();
            CURRENT.sync_scope(context.clone(), f)
        }
        None => {
            debug!("request context unavailable, continuing without correlation");
            f()
        }
    }
}
