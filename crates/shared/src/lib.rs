// Test code patterns:
#![cfg_attr(test, allow(clippy::expect_used))]
#![cfg_attr(test, allow(clippy::unwrap_used))]

//! Event Desk shared crate
//!
//! Row models for the local identity mirror, the [`IdentityStore`] seam the
//! webhook reconciler writes through, and its PostgreSQL and in-memory
//! implementations.

pub mod db;
pub mod error;
pub mod models;
pub mod store;

pub use db::{create_migration_pool, create_pool, run_migrations};
pub use error::{StoreError, StoreResult};
pub use models::{
    Organization, OrganizationMember, OrganizationProfile, User, UserMembership, UserProfile,
};
pub use store::memory::{MemoryIdentityStore, Mutation};
pub use store::postgres::PgIdentityStore;
pub use store::IdentityStore;
