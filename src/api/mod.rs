//! HTTP surface
//! Mission: Versioned /v1 and /v2 routers over the domain services

pub mod context;
pub mod routes;
pub mod v1;
pub mod v2;

pub use context::AppState;
pub use routes::build_router;
