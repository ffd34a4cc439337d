//! Clarity API crate - local HTTP command surface and SSE push.
//!
//! Exposes recording control, trace/summary queries, statistics, daily
//! summaries and runtime settings as JSON endpoints behind a bearer token,
//! plus a `statistics-updated` event stream.

pub mod auth;
pub mod error;
pub mod handlers;
pub mod routes;
pub mod state;

pub use error::ApiError;
pub use routes::{create_router, serve};
pub use state::AppState;
