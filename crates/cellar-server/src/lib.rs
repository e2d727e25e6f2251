//! Cellar Server — the HTTP surface over tenant resolution, quotas,
//! rate limiting and the subscription lifecycle.

pub mod config;
pub mod error;
pub mod middleware;
pub mod routes;
pub mod state;

pub use config::ServerConfig;
pub use error::{ApiError, ApiResult};
pub use routes::app;
pub use state::AppState;
