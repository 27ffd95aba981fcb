//! Host-facing response building.
//!
//! Translates an aggregate's outcome into what the connector hands back to
//! the notification hub: a [`Cards`] payload, or a single [`ErrorResponse`]
//! describing the first fatal backend failure.
//!
//! Status mapping:
//! - backend 401 → 400 "invalid credentials" (the caller's backend token is bad)
//! - any other backend status → 500, original status carried as metadata
//! - transport failure / abandoned → 500 without backend status
//! - host deadline exceeded → 504

use std::time::Duration;

use http::{HeaderMap, HeaderValue, StatusCode};
use serde::{Deserialize, Serialize, Serializer};
use tracing::{error, warn};

use crate::aggregate::AggregateError;
use crate::deferred::Deferred;

/// Response header carrying the backend's original status.
pub const BACKEND_STATUS_HEADER: &str = "x-backend-status";

/// Collection of cards returned to the hub.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Cards<P> {
    pub cards: Vec<P>,
}

impl<P> Cards<P> {
    pub fn len(&self) -> usize {
        self.cards.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cards.is_empty()
    }
}

impl<P> From<Vec<P>> for Cards<P> {
    fn from(cards: Vec<P>) -> Self {
        Self { cards }
    }
}

/// Client-visible error for a failed request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ErrorResponse {
    #[serde(serialize_with = "serialize_status")]
    pub status: StatusCode,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub backend_status: Option<u16>,
}

fn serialize_status<S: Serializer>(status: &StatusCode, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_u16(status.as_u16())
}

impl ErrorResponse {
    pub fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
            backend_status: None,
        }
    }

    /// Map an aggregate failure to the response the hub should see.
    pub fn from_aggregate_error(error: &AggregateError) -> Self {
        let backend_status = error
            .backend_error()
            .and_then(|e| e.status_code())
            .map(|s| s.as_u16());

        let (status, message) = match error.backend_error() {
            Some(e) if e.is_unauthorized() => {
                (StatusCode::BAD_REQUEST, "invalid credentials".to_string())
            }
            _ => (StatusCode::INTERNAL_SERVER_ERROR, error.to_string()),
        };

        Self {
            status,
            message,
            backend_status,
        }
    }

    /// The host gave up waiting for the backends.
    pub fn timeout(after: Duration) -> Self {
        Self::new(
            StatusCode::GATEWAY_TIMEOUT,
            format!("backends did not respond within {}ms", after.as_millis()),
        )
    }

    /// Headers to attach to the HTTP response.
    pub fn headers(&self) -> HeaderMap {
        let mut headers = HeaderMap::new();
        if let Some(status) = self.backend_status {
            headers.insert(BACKEND_STATUS_HEADER, HeaderValue::from(status));
        }
        headers
    }

    /// JSON response body.
    pub fn to_body(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }
}

impl From<&AggregateError> for ErrorResponse {
    fn from(error: &AggregateError) -> Self {
        Self::from_aggregate_error(error)
    }
}

impl From<AggregateError> for ErrorResponse {
    fn from(error: AggregateError) -> Self {
        Self::from_aggregate_error(&error)
    }
}

/// Await an aggregate and translate its outcome for the host.
///
/// With a `deadline`, an aggregate still running when it expires is dropped,
/// which cancels every in-flight backend call.
pub async fn respond<P>(
    aggregate: Deferred<Vec<P>, AggregateError>,
    deadline: Option<Duration>,
) -> Result<Cards<P>, ErrorResponse> {
    let result = match deadline {
        Some(limit) => match tokio::time::timeout(limit, aggregate).await {
            Ok(result) => result,
            Err(_) => {
                warn!(
                    deadline_ms = limit.as_millis() as u64,
                    "aggregate exceeded deadline, cancelling"
                );
                return Err(ErrorResponse::timeout(limit));
            }
        },
        None => aggregate.await,
    };

    result.map(Cards::from).map_err(|e| {
        error!(error = %e, item = e.item().unwrap_or(""), "aggregate failed");
        ErrorResponse::from_aggregate_error(&e)
    })
}
