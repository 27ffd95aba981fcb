//! Fan-out/collect aggregation.
//!
//! Given the work items of one inbound request (ticket ids, expense ids,
//! approval ids), the [`Aggregator`] launches one backend call per item,
//! classifies each outcome against the connector's [`SuppressionPolicy`], and
//! folds the successes into a single collection.
//!
//! # Semantics
//!
//! - Work items are deduplicated; an empty set resolves immediately to an
//!   empty collection without invoking the operation.
//! - Completions arrive in any order. Without [`Aggregator::ordered_by`] the
//!   output is in completion order.
//! - Suppressed items contribute nothing.
//! - The first fatal failure fails the aggregate. Items still in flight are
//!   cancelled and their results discarded.
//! - Cancelling or dropping the returned [`Deferred`] cancels every in-flight
//!   item.
//!
//! All outcomes are folded by a single driver task, so appends never race.

use std::cmp::Ordering;
use std::collections::HashSet;
use std::fmt;
use std::hash::Hash;
use std::sync::Arc;

use futures::stream::{FuturesUnordered, StreamExt};
use tracing::{debug, info, warn};

use crate::backend::SpawnedCall;
use crate::classify::{classify, BackendError, Outcome, SuppressionPolicy};
use crate::context::{self, ContextCarrier, Install};
use crate::deferred::{self, Abandoned, Deferred};

/// Failure of a whole aggregate.
#[derive(Debug, Clone, thiserror::Error)]
pub enum AggregateError {
    /// A work item failed with an error the policy does not suppress.
    #[error("work item '{item}' failed: {source}")]
    Backend {
        item: String,
        #[source]
        source: BackendError,
    },

    /// The aggregate's driver went away without producing a result.
    #[error("aggregate abandoned before completion")]
    Abandoned,
}

impl AggregateError {
    /// The backend error that failed the aggregate.
    pub fn backend_error(&self) -> Option<&BackendError> {
        match self {
            AggregateError::Backend { source, .. } => Some(source),
            AggregateError::Abandoned => None,
        }
    }

    /// The work item whose failure failed the aggregate.
    pub fn item(&self) -> Option<&str> {
        match self {
            AggregateError::Backend { item, .. } => Some(item),
            AggregateError::Abandoned => None,
        }
    }
}

impl From<Abandoned> for AggregateError {
    fn from(_: Abandoned) -> Self {
        AggregateError::Abandoned
    }
}

type OrderFn<P> = Arc<dyn Fn(&P, &P) -> Ordering + Send + Sync>;

/// Parameterised fan-out/collect over one request's work items.
pub struct Aggregator<P> {
    policy: SuppressionPolicy,
    order: Option<OrderFn<P>>,
    carrier: Option<ContextCarrier>,
}

impl<P> Clone for Aggregator<P> {
    fn clone(&self) -> Self {
        Self {
            policy: self.policy.clone(),
            order: self.order.clone(),
            carrier: self.carrier.clone(),
        }
    }
}

impl<P> fmt::Debug for Aggregator<P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Aggregator")
            .field("policy", &self.policy)
            .field("ordered", &self.order.is_some())
            .field("carrier", &self.carrier)
            .finish()
    }
}

impl<P> Aggregator<P>
where
    P: Send + 'static,
{
    pub fn new(policy: SuppressionPolicy) -> Self {
        Self {
            policy,
            order: None,
            carrier: None,
        }
    }

    /// Sort the collected payloads by a stable key before returning.
    pub fn ordered_by<K, F>(mut self, key: F) -> Self
    where
        K: Ord,
        F: Fn(&P) -> K + Send + Sync + 'static,
    {
        self.order = Some(Arc::new(move |a: &P, b: &P| key(a).cmp(&key(b))));
        self
    }

    /// Propagate this carrier instead of capturing the caller's context.
    pub fn with_context(mut self, carrier: ContextCarrier) -> Self {
        self.carrier = Some(carrier);
        self
    }

    pub fn policy(&self) -> &SuppressionPolicy {
        &self.policy
    }

    /// Launch `operation` for every distinct work item and collect the results.
    ///
    /// `operation` runs synchronously here, once per item, with the request
    /// context current; it should only start the backend call and return its
    /// [`Deferred`].
    pub fn aggregate<I, Op>(
        &self,
        items: impl IntoIterator<Item = I>,
        mut operation: Op,
    ) -> Deferred<Vec<P>, AggregateError>
    where
        I: Eq + Hash + Clone + fmt::Display + Send + 'static,
        Op: FnMut(I) -> Deferred<P, BackendError>,
    {
        let items = dedupe(items);
        if items.is_empty() {
            debug!("no work items, resolving empty collection");
            return Deferred::ready(Ok(Vec::new()));
        }

        let (carrier, install) = match &self.carrier {
            Some(carrier) => (carrier.clone(), Install::Fresh),
            None => (ContextCarrier::capture(), Install::AlreadyInstalled),
        };
        if carrier.is_detached() {
            warn!(
                count = items.len(),
                "request context unavailable, aggregating without correlation"
            );
        }

        let pending: Vec<(I, Deferred<P, BackendError>)> =
            context::run_with_sync(&carrier, install, || {
                items
                    .into_iter()
                    .map(|item| {
                        let deferred = operation(item.clone());
                        (item, deferred)
                    })
                    .collect()
            });

        let driver = collect(pending, self.policy.clone(), self.order.clone());
        deferred::bridge_with(
            carrier.clone(),
            SpawnedCall::with_carrier(driver, carrier),
        )
    }
}

/// Aggregate `items` with a one-off policy.
pub fn aggregate<I, P, Op>(
    items: impl IntoIterator<Item = I>,
    operation: Op,
    policy: &SuppressionPolicy,
) -> Deferred<Vec<P>, AggregateError>
where
    I: Eq + Hash + Clone + fmt::Display + Send + 'static,
    P: Send + 'static,
    Op: FnMut(I) -> Deferred<P, BackendError>,
{
    Aggregator::new(policy.clone()).aggregate(items, operation)
}

/// Deduplicate while keeping first-seen order.
fn dedupe<I>(items: impl IntoIterator<Item = I>) -> Vec<I>
where
    I: Eq + Hash + Clone,
{
    let mut seen = HashSet::new();
    items
        .into_iter()
        .filter(|item| seen.insert(item.clone()))
        .collect()
}

#[tracing::instrument(name = "aggregate.collect", skip_all, fields(count = pending.len()))]
async fn collect<I, P>(
    pending: Vec<(I, Deferred<P, BackendError>)>,
    policy: SuppressionPolicy,
    order: Option<OrderFn<P>>,
) -> Result<Vec<P>, AggregateError>
where
    I: fmt::Display,
{
    let requested = pending.len();
    let mut in_flight: FuturesUnordered<_> = pending
        .into_iter()
        .map(|(item, deferred)| async move { (item, deferred.await) })
        .collect();

    let mut payloads = Vec::with_capacity(requested);
    let mut suppressed = 0usize;

    while let Some((item, result)) = in_flight.next().await {
        match classify(result, &policy) {
            Outcome::Success(payload) => {
                debug!(%item, "work item resolved");
                payloads.push(payload);
            }
            Outcome::Suppressed(reason) => {
                suppressed += 1;
                debug!(%item, %reason, "work item suppressed");
            }
            Outcome::Failed(error) => {
                warn!(
                    %item,
                    error = %error,
                    in_flight = in_flight.len(),
                    "work item failed, failing aggregate"
                );
                // Dropping in_flight cancels the remaining items.
                return Err(AggregateError::Backend {
                    item: item.to_string(),
                    source: error,
                });
            }
        }
    }

    if let Some(order) = order {
        payloads.sort_by(|a, b| order(a, b));
    }

    info!(
        requested,
        succeeded = payloads.len(),
        suppressed,
        "aggregate collected"
    );
    Ok(payloads)
}
