//! HTTP API: request pipeline, liveness/health endpoints and route mounting.

pub mod handlers;
pub mod middleware;
pub mod routes;

pub use handlers::AppState;
pub use routes::{create_router, RouteGroups};
