// demos/fake_upstream.rs
// Run with: cargo run --bin fake-upstream -- <port>
//
// A minimal upstream for exercising the proxy by hand: answers every
// request (including the bare HEAD the health-checker sends) with its own
// port and a running request count, and can be told to start failing via
// `POST /toggle-health`, so a `/_control/list` poll shows it flip healthy.

use hyper::service::{make_service_fn, service_fn};
use hyper::{Body, Request, Response, Server, StatusCode};
use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

#[derive(Clone)]
struct BackendState {
    port: u16,
    request_count: Arc<AtomicU64>,
    healthy: Arc<AtomicBool>,
}

async fn handle_request(
    req: Request<Body>,
    state: BackendState,
) -> Result<Response<Body>, Infallible> {
    let count = state.request_count.fetch_add(1, Ordering::SeqCst) + 1;
    let method = req.method().clone();
    let path = req.uri().path().to_string();

    println!("[fake-upstream {}] #{}: {} {}", state.port, count, method, path);

    if path == "/toggle-health" {
        let was_healthy = state.healthy.fetch_xor(true, Ordering::SeqCst);
        println!("[fake-upstream {}] healthy: {} -> {}", state.port, was_healthy, !was_healthy);
        return Ok(Response::new(Body::from("toggled")));
    }

    if !state.healthy.load(Ordering::SeqCst) {
        return Ok(Response::builder()
            .status(StatusCode::SERVICE_UNAVAILABLE)
            .body(Body::empty())
            .unwrap());
    }

    let body = if method == hyper::Method::HEAD {
        Body::empty()
    } else {
        Body::from(format!(
            r#"{{"backend_port":{},"request_count":{},"path":"{}"}}"#,
            state.port, count, path
        ))
    };

    Ok(Response::builder()
        .status(StatusCode::OK)
        .header("Content-Type", "application/json")
        .header("X-Backend-Port", state.port.to_string())
        .body(body)
        .unwrap())
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let port: u16 = std::env::args()
        .nth(1)
        .and_then(|s| s.parse().ok())
        .unwrap_or(9001);

    let addr = SocketAddr::from(([127, 0, 0, 1], port));
    let state = BackendState {
        port,
        request_count: Arc::new(AtomicU64::new(0)),
        healthy: Arc::new(AtomicBool::new(true)),
    };

    let make_svc = make_service_fn(move |_conn| {
        let state = state.clone();
        async move { Ok::<_, Infallible>(service_fn(move |req| handle_request(req, state.clone()))) }
    });

    let server = Server::bind(&addr).serve(make_svc);
    println!("fake-upstream listening on http://{addr}");

    if let Err(e) = server.await {
        eprintln!("fake-upstream error: {e}");
    }

    Ok(())
}
