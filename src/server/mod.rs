pub mod builder;
pub mod control;
pub mod handler;
pub mod listener;
pub mod metrics_server;
pub mod router;

pub use builder::ServerBuilder;
pub use control::ControlPlane;
pub use handler::RequestHandler;
pub use metrics_server::MetricsEndpoint;
pub use router::AppRouter;
