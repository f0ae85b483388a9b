//! Colloquy API crate - axum HTTP server, route handlers, SSE streaming.
//!
//! Exposes the chat REST surface (owned and anonymous flavors), the SSE
//! send endpoints, bearer-token authentication, and the standard JSON
//! envelopes.

pub mod auth;
pub mod error;
pub mod handlers;
pub mod rate_limit;
pub mod routes;
pub mod state;

pub use error::ApiError;
pub use routes::create_router;
pub use state::AppState;
