// src/server/router.rs
use crate::server::{ControlPlane, RequestHandler};
use hyper::{Body, Request, Response};
use tower::Service;

/// Single entrypoint for the main listener: `/_control/*` goes to the
/// operator-facing control plane, everything else is proxied to a backend.
/// Both surfaces share one `--port` — there is no separate control-plane
/// port.
#[derive(Clone)]
pub struct AppRouter {
    control: ControlPlane,
    proxy: RequestHandler,
}

impl AppRouter {
    pub fn new(control: ControlPlane, proxy: RequestHandler) -> Self {
        Self { control, proxy }
    }
}

impl Service<Request<Body>> for AppRouter {
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
        if req.uri().path().starts_with("/_control/") {
            self.control.call(req)
        } else {
            self.proxy.call(req)
        }
    }
}
