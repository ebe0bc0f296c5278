// Test code patterns (expected in test files):
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! Event Desk Billing Module
//!
//! Server-side Stripe client initialization. The API server builds one
//! [`StripeClient`] at startup when billing is enabled and shares it through
//! application state.

pub mod client;
pub mod error;

// Client
pub use client::{StripeClient, StripeConfig, STRIPE_API_VERSION};

// Error
pub use error::{BillingError, BillingResult};
