//! Identity mirror persistence
//!
//! The reconciler only talks to [`IdentityStore`]. Every operation is a single
//! statement keyed by the identity provider's id or by internal ids resolved
//! from it; ordering between statements is the caller's job.

pub mod memory;
pub mod postgres;


use async_trait::async_trait;
use uuid::Uuid;

use crate::error::StoreResult;
use crate::models::{
    Organization, OrganizationMember, OrganizationProfile, User, UserMembership, UserProfile,
};

#[async_trait]
pub trait IdentityStore: Send + Sync {
    /// Insert a new user. Fails with `Conflict` if the external id exists.
    async fn create_user(&self, clerk_id: &str, profile: &UserProfile) -> StoreResult<User>;

    /// Overwrite the profile of every user with this external id. Returns
    /// the number of rows touched; zero is not an error.
    async fn update_users(&self, clerk_id: &str, profile: &UserProfile) -> StoreResult<u64>;

    async fn find_user(&self, clerk_id: &str) -> StoreResult<Option<User>>;

    async fn find_user_id(&self, clerk_id: &str) -> StoreResult<Option<Uuid>>;

    /// Delete the user with this external id. Fails with `NotFound` if absent
    /// and with `ForeignKey` while memberships still reference it.
    async fn delete_user(&self, clerk_id: &str) -> StoreResult<()>;

    /// Create or update the organization keyed by external id.
    async fn upsert_organization(
        &self,
        clerk_id: &str,
        profile: &OrganizationProfile,
    ) -> StoreResult<Organization>;

    async fn update_organizations(
        &self,
        clerk_id: &str,
        profile: &OrganizationProfile,
    ) -> StoreResult<u64>;

    async fn find_organization_id(&self, clerk_id: &str) -> StoreResult<Option<Uuid>>;

    /// Create or update the (user, organization) link row.
    async fn upsert_membership(
        &self,
        user_id: Uuid,
        org_id: Uuid,
        role: Option<&str>,
    ) -> StoreResult<OrganizationMember>;

    async fn delete_membership(&self, user_id: Uuid, org_id: Uuid) -> StoreResult<u64>;

    async fn delete_memberships_for_user(&self, user_id: Uuid) -> StoreResult<u64>;

    async fn memberships_for_user(&self, user_id: Uuid) -> StoreResult<Vec<UserMembership>>;
}
