//! JSON-over-HTTP backend calls.
//!
//! Requests carry the caller's correlation id so backend logs can be joined
//! with ours. Non-success statuses surface as [`BackendError::Status`] with
//! the response body attached, ready for the failure classifier.

use reqwest::header::{HeaderValue, AUTHORIZATION};
use reqwest::{Client, RequestBuilder, Response};
use serde::de::DeserializeOwned;
use tracing::debug;

use super::spawn;
use crate::classify::BackendError;
use crate::context::{RequestContext, CORRELATION_ID_HEADER};
use crate::deferred::Deferred;

/// HTTP client bound to one backend base URL.
#[derive(Debug, Clone)]
pub struct HttpBackend {
    client: Client,
    base_url: String,
    authorization: Option<HeaderValue>,
}

impl HttpBackend {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self::with_client(Client::new(), base_url)
    }

    /// Share an existing client (and its connection pool).
    pub fn with_client(client: Client, base_url: impl Into<String>) -> Self {
        Self {
            client,
            base_url: base_url.into(),
            authorization: None,
        }
    }

    /// Send `value` as the `Authorization` header on every request.
    pub fn with_authorization(mut self, value: HeaderValue) -> Self {
        self.authorization = Some(value);
        self
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Join `path` onto the base URL.
    pub fn url(&self, path: &str) -> String {
        format!(
            "{}/{}",
            self.base_url.trim_end_matches('/'),
            path.trim_start_matches('/')
        )
    }

    /// GET `path` and decode the JSON body.
    pub fn get_json<T>(&self, path: &str) -> Deferred<T, BackendError>
    where
        T: DeserializeOwned + Send + 'static,
    {
        let url = self.url(path);
        let request = self.decorate(self.client.get(&url));

        spawn(async move {
            debug!(%url, "backend GET");
            let response = request
                .send()
                .await
                .map_err(|e| BackendError::Transport(e.to_string()))?;
            read_json(response).await
        })
    }

    fn decorate(&self, mut request: RequestBuilder) -> RequestBuilder {
        if let Some(authorization) = &self.authorization {
            request = request.header(AUTHORIZATION, authorization.clone());
        }
        if let Some(correlation_id) =
            RequestContext::current().and_then(|c| c.correlation_id().map(str::to_string))
        {
            request = request.header(CORRELATION_ID_HEADER, correlation_id);
        }
        request
    }
}

async fn read_json<T: DeserializeOwned>(response: Response) -> Result<T, BackendError> {
    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.ok().filter(|body| !body.is_empty());
        return Err(BackendError::Status { status, body });
    }

    response
        .json::<T>()
        .await
        .map_err(|e| BackendError::Transport(e.to_string()))
}
