// src/server/metrics_server.rs
use crate::metrics::MetricsRegistry;
use hyper::{Body, Request, Response, StatusCode};
use std::sync::Arc;
use tower::Service;

/// `GET /metrics` content-negotiates on `Accept`: JSON if it contains
/// `application/json` or `/json`, Prometheus text otherwise. `GET
/// /metrics/json` always returns the structured snapshot, regardless of
/// `Accept`.
#[derive(Clone)]
pub struct MetricsEndpoint {
    registry: Arc<MetricsRegistry>,
}

impl MetricsEndpoint {
    pub fn new(registry: Arc<MetricsRegistry>) -> Self {
        Self { registry }
    }

    async fn handle(&self, req: Request<Body>) -> Response<Body> {
        match req.uri().path() {
            "/metrics/json" => self.json_response().await,
            "/metrics" => {
                let wants_json = req
                    .headers()
                    .get(hyper::header::ACCEPT)
                    .and_then(|v| v.to_str().ok())
                    .map(|v| v.contains("application/json") || v.contains("/json"))
                    .unwrap_or(false);

                if wants_json {
                    self.json_response().await
                } else {
                    let text = self.registry.export_prometheus().await;
                    Response::builder()
                        .status(StatusCode::OK)
                        .header("Content-Type", "text/plain; version=0.0.4")
                        .body(Body::from(text))
                        .unwrap()
                }
            }
            _ => Response::builder()
                .status(StatusCode::NOT_FOUND)
                .body(Body::from("not found"))
                .unwrap(),
        }
    }

    async fn json_response(&self) -> Response<Body> {
        let snapshot = self.registry.snapshot().await;
        Response::builder()
            .status(StatusCode::OK)
            .header("Content-Type", "application/json")
            .body(Body::from(snapshot.to_string()))
            .unwrap()
    }
}

impl Service<Request<Body>> for MetricsEndpoint {
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
        Box::pin(async move { Ok(this.handle(req).await) })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn plain_accept_gets_prometheus_text() {
        let registry = Arc::new(MetricsRegistry::new());
        registry.increment("backend.requests.total", &[], 1).await;
        let endpoint = MetricsEndpoint::new(registry);

        let req = Request::builder()
            .uri("/metrics")
            .header("Accept", "text/plain")
            .body(Body::empty())
            .unwrap();
        let resp = endpoint.handle(req).await;
        let content_type = resp.headers().get("Content-Type").unwrap().to_str().unwrap();
        assert!(content_type.starts_with("text/plain"));
    }

    #[tokio::test]
    async fn json_accept_gets_structured_snapshot() {
        let registry = Arc::new(MetricsRegistry::new());
        let endpoint = MetricsEndpoint::new(registry);

        let req = Request::builder()
            .uri("/metrics")
            .header("Accept", "application/json")
            .body(Body::empty())
            .unwrap();
        let resp = endpoint.handle(req).await;
        let content_type = resp.headers().get("Content-Type").unwrap().to_str().unwrap();
        assert_eq!(content_type, "application/json");
    }

    #[tokio::test]
    async fn metrics_json_path_always_returns_json() {
        let registry = Arc::new(MetricsRegistry::new());
        let endpoint = MetricsEndpoint::new(registry);

        let req = Request::builder()
            .uri("/metrics/json")
            .body(Body::empty())
            .unwrap();
        let resp = endpoint.handle(req).await;
        let content_type = resp.headers().get("Content-Type").unwrap().to_str().unwrap();
        assert_eq!(content_type, "application/json");
    }
}
