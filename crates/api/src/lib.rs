// API crate clippy configuration
#![allow(clippy::needless_borrows_for_generic_args)] // Sometimes needed for clarity
// Test code patterns:
#![cfg_attr(test, allow(clippy::expect_used))]
#![cfg_attr(test, allow(clippy::unwrap_used))]

//! Event Desk API Library
//!
//! Identity webhook reconciler, session gate, analytics and proxy routes.

pub mod analytics;
pub mod auth;
pub mod config;
pub mod error;
pub mod routes;
pub mod security;
pub mod state;
pub mod webhooks;

pub use config::Config;
pub use error::{ApiError, ApiResult};
pub use routes::create_router;
pub use state::AppState;
