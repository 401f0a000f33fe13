//! Bootstrap [axum] RPC servers

#![deny(unsafe_code, unused_crate_dependencies)]

use axum::{extract::Extension, routing::post, Router, Server};
use ethpool_rpc::{request::RpcMethodCall, response::RpcResponse};
use std::{collections::HashMap, future::Future, net::SocketAddr};
use tower_http::trace::TraceLayer;

/// handlers for axum server
mod handler;

/// Transport-level metadata forwarded to the handler with every call
#[derive(Debug, Clone, Default)]
pub struct RequestMeta {
    query: HashMap<String, String>,
}

// === impl RequestMeta ===

impl RequestMeta {
    /// Creates metadata from the request's decoded query parameters
    pub fn new(query: HashMap<String, String>) -> Self {
        Self { query }
    }

    /// Returns the query parameter `name`, if present
    pub fn query_param(&self, name: &str) -> Option<&str> {
        self.query.get(name).map(String::as_str)
    }
}

/// Configures an [axum::Server] that handles RPC-Calls listening for POST on
/// `/`, shutting down gracefully once `shutdown` resolves
pub fn serve_http<Http>(
    addr: SocketAddr,
    http: Http,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> impl Future<Output = hyper::Result<()>>
where
    Http: RpcHandler,
{
    let svc = Router::new()
        .route("/", post(handler::handle::<Http>))
        .layer(Extension(http))
        .layer(TraceLayer::new_for_http())
        .into_make_service();
    Server::bind(&addr).serve(svc).with_graceful_shutdown(shutdown)
}

/// Helper trait that is used to execute rpc calls
#[async_trait::async_trait]
pub trait RpcHandler: Clone + Send + Sync + 'static {
    /// Invoked for every incoming `RpcMethodCall`, together with the
    /// transport metadata of the carrying HTTP request
    async fn on_call(&self, call: RpcMethodCall, meta: RequestMeta) -> RpcResponse;
}
