//! Shared utilities for integration tests.
//!
//! Provides a minimal ticket backend served over plain HTTP and helpers for
//! building request contexts.

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use cardhub::{ContextCarrier, RequestContext};
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

/// Card payload served by [`TicketServer`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ticket {
    pub id: String,
    pub title: String,
}

impl Ticket {
    pub fn new(id: &str) -> Self {
        Self {
            id: id.to_string(),
            title: format!("Ticket {id}"),
        }
    }
}

/// Context carrier with a fixed correlation id and principal.
pub fn ctx(correlation_id: &str) -> ContextCarrier {
    RequestContext::new()
        .with_correlation_id(correlation_id)
        .with_principal("alice@example.com")
        .into()
}

/// One request as the server saw it.
#[derive(Debug, Clone)]
pub struct SeenRequest {
    pub path: String,
    pub correlation_id: Option<String>,
    pub authorization: Option<String>,
}

#[derive(Clone)]
struct Route {
    status: u16,
    body: String,
    delay: Duration,
}

/// Scripted responses for a [`TicketServer`].
///
/// Any `/tickets/{id}` without a route answers 200 with [`Ticket::new`].
#[derive(Clone, Default)]
pub struct Routes {
    routes: HashMap<String, Route>,
}

impl Routes {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn status(mut self, id: &str, status: u16) -> Self {
        self.routes.insert(
            format!("/tickets/{id}"),
            Route {
                status,
                body: format!(r#"{{"error":"ticket {id} status {status}"}}"#),
                delay: Duration::ZERO,
            },
        );
        self
    }

    pub fn delay(mut self, id: &str, delay: Duration) -> Self {
        let path = format!("/tickets/{id}");
        let route = self.routes.entry(path).or_insert_with(|| Route {
            status: 200,
            body: ticket_body(id),
            delay: Duration::ZERO,
        });
        route.delay = delay;
        self
    }

    fn lookup(&self, path: &str) -> Route {
        if let Some(route) = self.routes.get(path) {
            return route.clone();
        }
        match path.strip_prefix("/tickets/") {
            Some(id) => Route {
                status: 200,
                body: ticket_body(id),
                delay: Duration::ZERO,
            },
            None => Route {
                status: 404,
                body: String::new(),
                delay: Duration::ZERO,
            },
        }
    }
}

fn ticket_body(id: &str) -> String {
    serde_json::to_string(&Ticket::new(id)).unwrap()
}

/// Ticket backend on an ephemeral localhost port.
pub struct TicketServer {
    base_url: String,
    seen: Arc<Mutex<Vec<SeenRequest>>>,
    handle: tokio::task::JoinHandle<()>,
}

impl TicketServer {
    pub async fn start(routes: Routes) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let base_url = format!("http://{}", listener.local_addr().unwrap());
        let seen = Arc::new(Mutex::new(Vec::new()));

        let handle = {
            let seen = Arc::clone(&seen);
            tokio::spawn(async move {
                loop {
                    let Ok((stream, _)) = listener.accept().await else {
                        return;
                    };
                    tokio::spawn(serve(stream, routes.clone(), Arc::clone(&seen)));
                }
            })
        };

        Self {
            base_url,
            seen,
            handle,
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn seen(&self) -> Vec<SeenRequest> {
        self.seen.lock().unwrap().clone()
    }
}

impl Drop for TicketServer {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

async fn serve(mut stream: TcpStream, routes: Routes, seen: Arc<Mutex<Vec<SeenRequest>>>) {
    let mut buf = Vec::new();
    let mut chunk = [0u8; 1024];
    while !buf.windows(4).any(|w| w == b"\r\n\r\n") {
        match stream.read(&mut chunk).await {
            Ok(0) | Err(_) => return,
            Ok(n) => buf.extend_from_slice(&chunk[..n]),
        }
    }

    let head = String::from_utf8_lossy(&buf).to_string();
    let mut lines = head.split("\r\n");
    let path = lines
        .next()
        .and_then(|line| line.split_whitespace().nth(1))
        .unwrap_or("/")
        .to_string();

    let mut headers = HashMap::new();
    for line in lines {
        if let Some((name, value)) = line.split_once(':') {
            headers.insert(name.trim().to_ascii_lowercase(), value.trim().to_string());
        }
    }

    seen.lock().unwrap().push(SeenRequest {
        path: path.clone(),
        correlation_id: headers.get("x-correlation-id").cloned(),
        authorization: headers.get("authorization").cloned(),
    });

    let route = routes.lookup(&path);
    if !route.delay.is_zero() {
        tokio::time::sleep(route.delay).await;
    }

    let response = format!(
        "HTTP/1.1 {} Scripted\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
        route.status,
        route.body.len(),
        route.body
    );
    let _ = stream.write_all(response.as_bytes()).await;
    let _ = stream.shutdown().await;
}
