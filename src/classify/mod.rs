//! Backend failure classification.
//!
//! Backends legitimately answer "this item no longer exists" with a 404, which
//! should simply drop the item from the response. Other statuses (401, 500,
//! transport failures) point at a systemic problem and must fail the whole
//! request. A [`SuppressionPolicy`] encodes which statuses a connector treats
//! as "no card for this item"; everything else is propagated.
//!
//! Policies compose by chaining:
//!
//! ```ignore
//! let policy = SuppressionPolicy::suppress_not_found()
//!     .or_bad_request()
//!     .or_status(StatusCode::GONE);
//! ```

use std::fmt;
use std::sync::Arc;

use http::StatusCode;

use crate::deferred::Abandoned;

/// Failure reported by a backend call.
#[derive(Debug, Clone, thiserror::Error)]
pub enum BackendError {
    /// The backend answered with a non-success status.
    #[error("backend responded with status {status}")]
    Status {
        status: StatusCode,
        body: Option<String>,
    },

    /// The call never produced a response (connect, TLS, decode failures).
    #[error("backend transport failed: {0}")]
    Transport(String),

    /// The completion handle was dropped without delivering a result.
    #[error("backend call abandoned before completion")]
    Abandoned,
}

impl BackendError {
    /// Status error without a body.
    pub fn status(status: StatusCode) -> Self {
        BackendError::Status { status, body: None }
    }

    /// Status error with the raw response body.
    pub fn with_body(status: StatusCode, body: impl Into<String>) -> Self {
        BackendError::Status {
            status,
            body: Some(body.into()),
        }
    }

    /// Returns the backend status if one was reported.
    pub fn status_code(&self) -> Option<StatusCode> {
        match self {
            BackendError::Status { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// Returns the raw response body if one was captured.
    pub fn body(&self) -> Option<&str> {
        match self {
            BackendError::Status { body, .. } => body.as_deref(),
            _ => None,
        }
    }

    pub fn is_not_found(&self) -> bool {
        self.status_code() == Some(StatusCode::NOT_FOUND)
    }

    pub fn is_unauthorized(&self) -> bool {
        self.status_code() == Some(StatusCode::UNAUTHORIZED)
    }
}

impl From<Abandoned> for BackendError {
    fn from(_: Abandoned) -> Self {
        BackendError::Abandoned
    }
}

/// Why a failed work item was dropped instead of failing the request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SuppressReason {
    /// Name of the policy rule that matched.
    pub rule: String,
    /// Status the backend reported.
    pub status: StatusCode,
}

impl fmt::Display for SuppressReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} suppressed by rule '{}'", self.status, self.rule)
    }
}

/// Terminal state of one work item.
#[derive(Debug)]
pub enum Outcome<P> {
    Success(P),
    Suppressed(SuppressReason),
    Failed(BackendError),
}

impl<P> Outcome<P> {
    pub fn is_success(&self) -> bool {
        matches!(self, Outcome::Success(_))
    }

    pub fn is_suppressed(&self) -> bool {
        matches!(self, Outcome::Suppressed(_))
    }

    pub fn is_failed(&self) -> bool {
        matches!(self, Outcome::Failed(_))
    }

    /// `Ok(Some)` for success, `Ok(None)` for suppressed, `Err` for fatal.
    pub fn into_result(self) -> Result<Option<P>, BackendError> {
        match self {
            Outcome::Success(payload) => Ok(Some(payload)),
            Outcome::Suppressed(_) => Ok(None),
            Outcome::Failed(error) => Err(error),
        }
    }
}

type StatusPredicate = Arc<dyn Fn(StatusCode) -> bool + Send + Sync>;

#[derive(Clone)]
enum Rule {
    Status { name: String, status: StatusCode },
    Predicate { name: String, predicate: StatusPredicate },
}

impl Rule {
    fn name(&self) -> &str {
        match self {
            Rule::Status { name, .. } | Rule::Predicate { name, .. } => name,
        }
    }

    fn matches(&self, status: StatusCode) -> bool {
        match self {
            Rule::Status { status: expected, .. } => *expected == status,
            Rule::Predicate { predicate, .. } => predicate(status),
        }
    }
}

/// Ordered chain of status rules; the first match suppresses.
///
/// The default policy suppresses nothing.
#[derive(Clone, Default)]
pub struct SuppressionPolicy {
    rules: Vec<Rule>,
}

impl fmt::Debug for SuppressionPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list()
            .entries(self.rules.iter().map(Rule::name))
            .finish()
    }
}

impl SuppressionPolicy {
    /// Policy that propagates every failure.
    pub fn propagate_all() -> Self {
        Self::default()
    }

    /// Suppress 404 Not Found.
    pub fn suppress_not_found() -> Self {
        Self::propagate_all().or_not_found()
    }

    /// Suppress 400 Bad Request.
    pub fn suppress_bad_request() -> Self {
        Self::propagate_all().or_bad_request()
    }

    /// Suppress exactly `status`.
    pub fn suppress_status(status: StatusCode) -> Self {
        Self::propagate_all().or_status(status)
    }

    /// Suppress statuses matching a named predicate.
    pub fn suppress_if<F>(name: impl Into<String>, predicate: F) -> Self
    where
        F: Fn(StatusCode) -> bool + Send + Sync + 'static,
    {
        Self::propagate_all().or_if(name, predicate)
    }

    pub fn or_not_found(self) -> Self {
        self.push_status("not-found", StatusCode::NOT_FOUND)
    }

    pub fn or_bad_request(self) -> Self {
        self.push_status("bad-request", StatusCode::BAD_REQUEST)
    }

    pub fn or_status(self, status: StatusCode) -> Self {
        let name = format!("status-{}", status.as_u16());
        self.push_status(name, status)
    }

    pub fn or_if<F>(mut self, name: impl Into<String>, predicate: F) -> Self
    where
        F: Fn(StatusCode) -> bool + Send + Sync + 'static,
    {
        self.rules.push(Rule::Predicate {
            name: name.into(),
            predicate: Arc::new(predicate),
        });
        self
    }

    /// Append every rule of `other` after this policy's rules.
    pub fn or(mut self, other: SuppressionPolicy) -> Self {
        self.rules.extend(other.rules);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// Returns true if `status` would be suppressed.
    pub fn suppresses(&self, status: StatusCode) -> bool {
        self.matching_rule(status).is_some()
    }

    fn matching_rule(&self, status: StatusCode) -> Option<&Rule> {
        self.rules.iter().find(|rule| rule.matches(status))
    }

    fn push_status(mut self, name: impl Into<String>, status: StatusCode) -> Self {
        self.rules.push(Rule::Status {
            name: name.into(),
            status,
        });
        self
    }
}

/// Suppress `error` if the policy matches its status, otherwise hand it back.
///
/// Errors that carry no status (transport, abandoned) are never suppressed.
pub fn classify_error(
    error: BackendError,
    policy: &SuppressionPolicy,
) -> Result<SuppressReason, BackendError> {
    let Some(status) = error.status_code() else {
        return Err(error);
    };

    match policy.matching_rule(status) {
        Some(rule) => Ok(SuppressReason {
            rule: rule.name().to_string(),
            status,
        }),
        None => Err(error),
    }
}

/// Fold a backend result into an [`Outcome`].
pub fn classify<P>(result: Result<P, BackendError>, policy: &SuppressionPolicy) -> Outcome<P> {
    match result {
        Ok(payload) => Outcome::Success(payload),
        Err(error) => match classify_error(error, policy) {
            Ok(reason) => Outcome::Suppressed(reason),
            Err(error) => Outcome::Failed(error),
        },
    }
}
