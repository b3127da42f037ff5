use std::collections::HashMap;
use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;

use http::{header, Request, Response, StatusCode};
use hyper::service::{make_service_fn, service_fn};
use hyper::Body;
use parking_lot::Mutex;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

use crate::addr::get_unused_addr;

#[derive(Debug, Clone)]
/// What the mock node answers a `/localnodes` request with.
pub enum MockResponse {
    /// A `200` response with the hosts as a JSON array.
    Nodes(Vec<String>),
    /// An empty response with the given status.
    Status(StatusCode),
    /// A `200` response with the body as-is.
    Raw(String),
}

impl MockResponse {
    pub fn nodes<S: Into<String>>(hosts: impl IntoIterator<Item = S>) -> Self {
        Self::Nodes(hosts.into_iter().map(Into::into).collect())
    }
}

#[derive(Default)]
struct MockState {
    /// Responses keyed by the exact query string, `""` for no query.
    responses: Mutex<HashMap<String, MockResponse>>,
    /// The query string of every `/localnodes` request received.
    queries: Mutex<Vec<String>>,
}

/// A fake Alternator node serving `/localnodes`.
///
/// Queries without a scripted response get an empty node list.
pub struct MockLocalNodes {
    addr: SocketAddr,
    state: Arc<MockState>,
    shutdown: Option<oneshot::Sender<()>>,
    handle: JoinHandle<()>,
}

impl MockLocalNodes {
    /// Starts the mock node on an unused loopback port.
    pub fn start() -> Self {
        let addr = get_unused_addr();
        let state = Arc::new(MockState::default());
        let (tx, rx) = oneshot::channel();

        let make_service = {
            let state = state.clone();
            make_service_fn(move |_| {
                let state = state.clone();
                async move {
                    let service = move |req| handle_request(req, state.clone());
                    Ok::<_, Infallible>(service_fn(service))
                }
            })
        };

        // Binding happens here, the node accepts connections once this returns.
        let server = hyper::Server::bind(&addr)
            .serve(make_service)
            .with_graceful_shutdown(async move {
                let _ = rx.await;
            });

        let handle = tokio::spawn(async move {
            if let Err(e) = server.await {
                error!(error = ?e, "Mock node failed to handle requests.");
            }
        });

        Self {
            addr,
            state,
            shutdown: Some(tx),
            handle,
        }
    }

    #[inline]
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    #[inline]
    pub fn port(&self) -> u16 {
        self.addr.port()
    }

    /// Sets the response for requests without a query string.
    pub fn set_nodes<S: Into<String>>(&self, hosts: impl IntoIterator<Item = S>) {
        self.set_response("", MockResponse::nodes(hosts));
    }

    /// Sets the response for requests with exactly the given query string.
    pub fn set_response(&self, query: &str, response: MockResponse) {
        self.state
            .responses
            .lock()
            .insert(query.to_string(), response);
    }

    /// The query strings of the `/localnodes` requests received so far.
    pub fn queries(&self) -> Vec<String> {
        self.state.queries.lock().clone()
    }

    /// Stops the mock node and waits for the server to exit.
    pub async fn shutdown(mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
        let _ = (&mut self.handle).await;
    }
}

impl Drop for MockLocalNodes {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

async fn handle_request(
    req: Request<Body>,
    state: Arc<MockState>,
) -> Result<Response<Body>, Infallible> {
    if req.uri().path() != "/localnodes" {
        let mut response = Response::new(Body::empty());
        (*response.status_mut()) = StatusCode::NOT_FOUND;
        return Ok(response);
    }

    let query = req.uri().query().unwrap_or_default().to_string();
    state.queries.lock().push(query.clone());

    let scripted = state.responses.lock().get(&query).cloned();
    let response = match scripted.unwrap_or(MockResponse::Nodes(Vec::new())) {
        MockResponse::Nodes(hosts) => {
            let body = serde_json::to_string(&hosts).unwrap_or_default();
            json_response(body)
        },
        MockResponse::Raw(body) => json_response(body),
        MockResponse::Status(status) => {
            let mut response = Response::new(Body::empty());
            (*response.status_mut()) = status;
            response
        },
    };

    Ok(response)
}

fn json_response(body: String) -> Response<Body> {
    let mut response = Response::new(Body::from(body));
    response.headers_mut().insert(
        header::CONTENT_TYPE,
        header::HeaderValue::from_static("application/json"),
    );
    response
}
