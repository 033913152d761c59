// src/server/control.rs
use crate::pool::BackendPool;
use hyper::{Body, Method, Request, Response, StatusCode};
use serde::Deserialize;
use std::sync::Arc;
use tower::Service;

#[derive(Deserialize)]
struct AddRequest {
    url: String,
    #[serde(default = "default_weight")]
    weight: u32,
}

fn default_weight() -> u32 {
    1
}

#[derive(Deserialize)]
struct RemoveRequest {
    url: String,
}

#[derive(Deserialize)]
struct SchedulerRequest {
    algorithm: String,
}

/// Operator-facing surface: add/remove backends, switch the scheduler,
/// inspect pool state and traffic statistics. Method + path dispatch, JSON
/// bodies in and out.
#[derive(Clone)]
pub struct ControlPlane {
    pool: Arc<BackendPool>,
}

impl ControlPlane {
    pub fn new(pool: Arc<BackendPool>) -> Self {
        Self { pool }
    }

    async fn handle(&self, req: Request<Body>) -> Response<Body> {
        let method = req.method().clone();
        let path = req.uri().path().to_string();
        let query = req.uri().query().unwrap_or("").to_string();

        match (method, path.as_str()) {
            (Method::POST, "/_control/add") => self.add(req).await,
            (Method::POST, "/_control/remove") => self.remove(req).await,
            (Method::POST, "/_control/scheduler") => self.set_scheduler(req).await,
            (Method::GET, "/_control/list") => self.list().await,
            (Method::GET, "/_control/stats") => self.stats(&query).await,
            _ => json_response(StatusCode::NOT_FOUND, serde_json::json!({ "error": "not found" })),
        }
    }

    async fn add(&self, req: Request<Body>) -> Response<Body> {
        let body = match read_json::<AddRequest>(req).await {
            Ok(b) => b,
            Err(resp) => return resp,
        };
        self.pool.add(body.url, body.weight).await;
        json_response(StatusCode::OK, serde_json::json!({ "status": "added" }))
    }

    async fn remove(&self, req: Request<Body>) -> Response<Body> {
        let body = match read_json::<RemoveRequest>(req).await {
            Ok(b) => b,
            Err(resp) => return resp,
        };
        self.pool.remove(&body.url).await;
        json_response(StatusCode::OK, serde_json::json!({ "status": "removed" }))
    }

    async fn set_scheduler(&self, req: Request<Body>) -> Response<Body> {
        let body = match read_json::<SchedulerRequest>(req).await {
            Ok(b) => b,
            Err(resp) => return resp,
        };
        match self.pool.set_scheduler(&body.algorithm).await {
            Ok(()) => json_response(
                StatusCode::OK,
                serde_json::json!({ "status": "scheduler_updated" }),
            ),
            Err(e) => json_response(StatusCode::BAD_REQUEST, serde_json::json!({ "error": e.to_string() })),
        }
    }

    async fn list(&self) -> Response<Body> {
        json_response(StatusCode::OK, self.pool.show().await)
    }

    async fn stats(&self, query: &str) -> Response<Body> {
        let periods: Vec<String> = query
            .split('&')
            .find_map(|pair| pair.strip_prefix("periods="))
            .map(|v| v.split(',').map(|s| s.to_string()).collect())
            .unwrap_or_default();

        let stats = self.pool.get_stats(&periods).await;
        json_response(StatusCode::OK, serde_json::json!(stats))
    }
}

async fn read_json<T: for<'de> Deserialize<'de>>(req: Request<Body>) -> Result<T, Response<Body>> {
    let bytes = match hyper::body::to_bytes(req.into_body()).await {
        Ok(b) => b,
        Err(e) => {
            return Err(json_response(
                StatusCode::BAD_REQUEST,
                serde_json::json!({ "error": format!("failed to read body: {e}") }),
            ))
        }
    };
    serde_json::from_slice(&bytes).map_err(|e| {
        json_response(
            StatusCode::BAD_REQUEST,
            serde_json::json!({ "error": format!("invalid request body: {e}") }),
        )
    })
}

fn json_response(status: StatusCode, body: impl serde::Serialize) -> Response<Body> {
    Response::builder()
        .status(status)
        .header("Content-Type", "application/json")
        .body(Body::from(serde_json::to_vec(&body).unwrap_or_default()))
        .unwrap()
}

impl Service<Request<Body>> for ControlPlane {
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
    use crate::metrics::MetricsRegistry;
    use hyper::body;

    fn pool() -> Arc<BackendPool> {
        Arc::new(BackendPool::new(Arc::new(MetricsRegistry::new()), 5.0))
    }

    #[tokio::test]
    async fn add_then_list_round_trips() {
        let cp = ControlPlane::new(pool());
        let req = Request::builder()
            .method(Method::POST)
            .uri("/_control/add")
            .body(Body::from(r#"{"url":"http://b1","weight":2}"#))
            .unwrap();
        let resp = cp.handle(req).await;
        assert_eq!(resp.status(), StatusCode::OK);

        let req = Request::builder()
            .method(Method::GET)
            .uri("/_control/list")
            .body(Body::empty())
            .unwrap();
        let resp = cp.handle(req).await;
        let bytes = body::to_bytes(resp.into_body()).await.unwrap();
        let value: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(value["http://b1"]["weight"], 2);
    }

    #[tokio::test]
    async fn unknown_scheduler_algorithm_returns_400() {
        let cp = ControlPlane::new(pool());
        let req = Request::builder()
            .method(Method::POST)
            .uri("/_control/scheduler")
            .body(Body::from(r#"{"algorithm":"coinflip"}"#))
            .unwrap();
        let resp = cp.handle(req).await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn unknown_route_returns_404() {
        let cp = ControlPlane::new(pool());
        let req = Request::builder()
            .method(Method::GET)
            .uri("/_control/nope")
            .body(Body::empty())
            .unwrap();
        let resp = cp.handle(req).await;
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }
}
