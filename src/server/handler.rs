// src/server/handler.rs
use crate::pool::{BackendPool, BackendSnapshot};
use hyper::{Body, Request, Response, StatusCode};
use std::net::SocketAddr;
use std::sync::Arc;
use tower::Service;
use tracing::Instrument;

#[derive(Debug, thiserror::Error)]
pub enum ProxyError {
    #[error("no healthy backend available")]
    NoHealthyBackend,

    #[error("upstream request failed: {0}")]
    Upstream(String),
}

impl ProxyError {
    fn status(&self) -> StatusCode {
        match self {
            ProxyError::NoHealthyBackend => StatusCode::SERVICE_UNAVAILABLE,
            ProxyError::Upstream(_) => StatusCode::BAD_GATEWAY,
        }
    }

    fn into_response(self) -> Response<Body> {
        let status = self.status();
        let body = serde_json::json!({ "error": self.to_string() });
        Response::builder()
            .status(status)
            .header("Content-Type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }
}

/// Data-plane request handler: picks a backend, forwards the request with
/// its original method/headers/body, and relays the upstream response.
/// `release` runs on every exit path once a backend has been selected,
/// mirroring the original's `try/except/finally` — Rust has no generator
/// -closing `finally` to lean on here, so the call sites are explicit.
#[derive(Clone)]
pub struct RequestHandler {
    pool: Arc<BackendPool>,
    client: reqwest::Client,
}

impl RequestHandler {
    pub fn new(pool: Arc<BackendPool>) -> Self {
        Self {
            pool,
            client: reqwest::Client::new(),
        }
    }

    async fn select(&self, peer: Option<SocketAddr>) -> Result<BackendSnapshot, ProxyError> {
        if self.pool.source_hash_active().await {
            let ip = peer.map(|p| p.ip().to_string()).unwrap_or_default();
            self.pool
                .select_backend_by_ip(&ip)
                .await
                .ok_or(ProxyError::NoHealthyBackend)
        } else {
            self.pool
                .select_backend()
                .await
                .ok_or(ProxyError::NoHealthyBackend)
        }
    }

    async fn handle(&self, req: Request<Body>) -> Result<Response<Body>, ProxyError> {
        let peer = req.extensions().get::<SocketAddr>().copied();
        let method = req.method().clone();
        let headers = req.headers().clone();
        let path_and_query = req
            .uri()
            .path_and_query()
            .map(|p| p.as_str().to_string())
            .unwrap_or_else(|| "/".to_string());

        let backend = self.select(peer).await?;

        let body_bytes = hyper::body::to_bytes(req.into_body())
            .await
            .map_err(|e| ProxyError::Upstream(e.to_string()))?;

        let upstream_url = format!("{}{}", backend.url.trim_end_matches('/'), path_and_query);
        let upstream_method =
            reqwest::Method::from_bytes(method.as_str().as_bytes()).unwrap_or(reqwest::Method::GET);

        let mut request_builder = self.client.request(upstream_method, &upstream_url);
        for (name, value) in headers.iter() {
            request_builder = request_builder.header(name.as_str(), value.as_bytes());
        }

        let started = std::time::Instant::now();
        let outcome = request_builder.body(body_bytes).send().await;
        let latency_ms = started.elapsed().as_secs_f64() * 1000.0;
        self.pool.release(&backend).await;

        match outcome {
            Ok(upstream) => {
                self.pool.record_request(&backend.url).await;
                self.pool
                    .metrics()
                    .record_proxy_request(method.as_str(), &backend.url, upstream.status().as_str())
                    .await;
                self.pool
                    .metrics()
                    .record_backend_latency_ms(&backend.url, latency_ms)
                    .await;

                let status = upstream.status();
                let resp_headers = upstream.headers().clone();
                let body = upstream
                    .bytes()
                    .await
                    .map_err(|e| ProxyError::Upstream(e.to_string()))?;

                let mut response = Response::builder().status(status);
                for (name, value) in resp_headers.iter() {
                    response = response.header(name, value);
                }
                Ok(response.body(Body::from(body)).unwrap())
            }
            Err(e) => {
                self.pool.metrics().record_proxy_error(&backend.url).await;
                self.pool
                    .metrics()
                    .record_proxy_request(method.as_str(), &backend.url, "error")
                    .await;
                Err(ProxyError::Upstream(e.to_string()))
            }
        }
    }
}

impl Service<Request<Body>> for RequestHandler {
    type Response = Response<Body>;
    type Error = Box<dyn std::error::Error + Send + Sync>;
    type Future = futures::future::BoxFuture<'static, Result<Self::Response, Self::Error>>;

    fn poll_ready(
        &mut self,
        _cx: &mut std::task::Context<'_>,
    ) -> std::task::Poll<Result<(), Self::Error>> {
        std::task::Poll::Ready(Ok(()))
    }

    fn call(&mut self, req: Request<Body>) -> Self::Future {
        let this = self.clone();
        let request_id = uuid::Uuid::new_v4();
        Box::pin(
            async move {
                let mut response = match this.handle(req).await {
                    Ok(resp) => resp,
                    Err(e) => {
                        tracing::warn!(%e, "proxy error");
                        e.into_response()
                    }
                };
                response
                    .headers_mut()
                    .insert("X-Request-Id", request_id.to_string().parse().unwrap());
                Ok(response)
            }
            .instrument(tracing::info_span!("proxy_request", %request_id)),
        )
    }
}
