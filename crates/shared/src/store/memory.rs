//! In-memory [`IdentityStore`]
//!
//! Enforces the same unique and foreign-key constraints as the PostgreSQL
//! schema and keeps a journal of successful writes, so callers can assert on
//! the order of mutations. Writes can be switched off to simulate an outage.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use time::OffsetDateTime;
use uuid::Uuid;

use super::IdentityStore;
use crate::error::{StoreError, StoreResult};
use crate::models::{
    Organization, OrganizationMember, OrganizationProfile, User, UserMembership, UserProfile,
};

/// A successful write, in the order it was applied
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Mutation {
    CreateUser { clerk_id: String },
    UpdateUsers { clerk_id: String, rows: u64 },
    DeleteUser { clerk_id: String },
    UpsertOrganization { clerk_id: String },
    UpdateOrganizations { clerk_id: String, rows: u64 },
    UpsertMembership { user_id: Uuid, org_id: Uuid },
    DeleteMembership { user_id: Uuid, org_id: Uuid, rows: u64 },
    DeleteUserMemberships { user_id: Uuid, rows: u64 },
}

#[derive(Default)]
struct Tables {
    users: Vec<User>,
    organizations: Vec<Organization>,
    members: Vec<OrganizationMember>,
    journal: Vec<Mutation>,
}

#[derive(Default)]
pub struct MemoryIdentityStore {
    tables: Mutex<Tables>,
    writes_disabled: AtomicBool,
}

impl MemoryIdentityStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every write fail with `StoreError::Unavailable` until re-enabled
    pub fn set_writes_disabled(&self, disabled: bool) {
        self.writes_disabled.store(disabled, Ordering::SeqCst);
    }

    pub fn journal(&self) -> Vec<Mutation> {
        self.lock().map(|t| t.journal.clone()).unwrap_or_default()
    }

    pub fn users(&self) -> Vec<User> {
        self.lock().map(|t| t.users.clone()).unwrap_or_default()
    }

    pub fn organizations(&self) -> Vec<Organization> {
        self.lock()
            .map(|t| t.organizations.clone())
            .unwrap_or_default()
    }

    pub fn members(&self) -> Vec<OrganizationMember> {
        self.lock().map(|t| t.members.clone()).unwrap_or_default()
    }

    fn lock(&self) -> StoreResult<MutexGuard<'_, Tables>> {
        self.tables
            .lock()
            .map_err(|_| StoreError::Unavailable("memory store lock poisoned".to_string()))
    }

    fn lock_for_write(&self) -> StoreResult<MutexGuard<'_, Tables>> {
        if self.writes_disabled.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("writes disabled".to_string()));
        }
        self.lock()
    }
}

#[async_trait]
impl IdentityStore for MemoryIdentityStore {
    async fn create_user(&self, clerk_id: &str, profile: &UserProfile) -> StoreResult<User> {
        let mut tables = self.lock_for_write()?;
        if tables.users.iter().any(|u| u.clerk_id == clerk_id) {
            return Err(StoreError::Conflict(format!("users.clerk_id {clerk_id}")));
        }

        let now = OffsetDateTime::now_utc();
        let user = User {
            id: Uuid::new_v4(),
            clerk_id: clerk_id.to_string(),
            email: profile.email.clone(),
            first_name: profile.first_name.clone(),
            last_name: profile.last_name.clone(),
            image_url: profile.image_url.clone(),
            phone: profile.phone.clone(),
            created_at: now,
            updated_at: now,
        };
        tables.users.push(user.clone());
        tables.journal.push(Mutation::CreateUser {
            clerk_id: clerk_id.to_string(),
        });
        Ok(user)
    }

    async fn update_users(&self, clerk_id: &str, profile: &UserProfile) -> StoreResult<u64> {
        let mut tables = self.lock_for_write()?;
        let now = OffsetDateTime::now_utc();
        let mut rows = 0;
        for user in tables.users.iter_mut().filter(|u| u.clerk_id == clerk_id) {
            user.email = profile.email.clone();
            user.first_name = profile.first_name.clone();
            user.last_name = profile.last_name.clone();
            user.image_url = profile.image_url.clone();
            user.phone = profile.phone.clone();
            user.updated_at = now;
            rows += 1;
        }
        tables.journal.push(Mutation::UpdateUsers {
            clerk_id: clerk_id.to_string(),
            rows,
        });
        Ok(rows)
    }

    async fn find_user(&self, clerk_id: &str) -> StoreResult<Option<User>> {
        let tables = self.lock()?;
        Ok(tables.users.iter().find(|u| u.clerk_id == clerk_id).cloned())
    }

    async fn find_user_id(&self, clerk_id: &str) -> StoreResult<Option<Uuid>> {
        let tables = self.lock()?;
        Ok(tables
            .users
            .iter()
            .find(|u| u.clerk_id == clerk_id)
            .map(|u| u.id))
    }

    async fn delete_user(&self, clerk_id: &str) -> StoreResult<()> {
        let mut tables = self.lock_for_write()?;
        let Some(position) = tables.users.iter().position(|u| u.clerk_id == clerk_id) else {
            return Err(StoreError::NotFound(format!("user {clerk_id}")));
        };

        let user_id = tables.users[position].id;
        if tables.members.iter().any(|m| m.user_id == user_id) {
            return Err(StoreError::ForeignKey(format!(
                "organization_members still reference user {clerk_id}"
            )));
        }

        tables.users.remove(position);
        tables.journal.push(Mutation::DeleteUser {
            clerk_id: clerk_id.to_string(),
        });
        Ok(())
    }

    async fn upsert_organization(
        &self,
        clerk_id: &str,
        profile: &OrganizationProfile,
    ) -> StoreResult<Organization> {
        let mut tables = self.lock_for_write()?;
        let now = OffsetDateTime::now_utc();

        let organization = match tables
            .organizations
            .iter()
            .position(|o| o.clerk_id == clerk_id)
        {
            Some(index) => {
                let existing = &mut tables.organizations[index];
                existing.name = profile.name.clone();
                existing.image_url = profile.image_url.clone();
                existing.updated_at = now;
                existing.clone()
            }
            None => {
                let created = Organization {
                    id: Uuid::new_v4(),
                    clerk_id: clerk_id.to_string(),
                    name: profile.name.clone(),
                    image_url: profile.image_url.clone(),
                    created_at: now,
                    updated_at: now,
                };
                tables.organizations.push(created.clone());
                created
            }
        };

        tables.journal.push(Mutation::UpsertOrganization {
            clerk_id: clerk_id.to_string(),
        });
        Ok(organization)
    }

    async fn update_organizations(
        &self,
        clerk_id: &str,
        profile: &OrganizationProfile,
    ) -> StoreResult<u64> {
        let mut tables = self.lock_for_write()?;
        let now = OffsetDateTime::now_utc();
        let mut rows = 0;
        for organization in tables
            .organizations
            .iter_mut()
            .filter(|o| o.clerk_id == clerk_id)
        {
            organization.name = profile.name.clone();
            organization.image_url = profile.image_url.clone();
            organization.updated_at = now;
            rows += 1;
        }
        tables.journal.push(Mutation::UpdateOrganizations {
            clerk_id: clerk_id.to_string(),
            rows,
        });
        Ok(rows)
    }

    async fn find_organization_id(&self, clerk_id: &str) -> StoreResult<Option<Uuid>> {
        let tables = self.lock()?;
        Ok(tables
            .organizations
            .iter()
            .find(|o| o.clerk_id == clerk_id)
            .map(|o| o.id))
    }

    async fn upsert_membership(
        &self,
        user_id: Uuid,
        org_id: Uuid,
        role: Option<&str>,
    ) -> StoreResult<OrganizationMember> {
        let mut tables = self.lock_for_write()?;
        if !tables.users.iter().any(|u| u.id == user_id) {
            return Err(StoreError::ForeignKey(format!("users.id {user_id}")));
        }
        if !tables.organizations.iter().any(|o| o.id == org_id) {
            return Err(StoreError::ForeignKey(format!("organizations.id {org_id}")));
        }

        let now = OffsetDateTime::now_utc();
        let member = match tables
            .members
            .iter()
            .position(|m| m.user_id == user_id && m.org_id == org_id)
        {
            Some(index) => {
                let existing = &mut tables.members[index];
                existing.role = role.map(str::to_string);
                existing.updated_at = now;
                existing.clone()
            }
            None => {
                let created = OrganizationMember {
                    id: Uuid::new_v4(),
                    user_id,
                    org_id,
                    role: role.map(str::to_string),
                    created_at: now,
                    updated_at: now,
                };
                tables.members.push(created.clone());
                created
            }
        };

        tables
            .journal
            .push(Mutation::UpsertMembership { user_id, org_id });
        Ok(member)
    }

    async fn delete_membership(&self, user_id: Uuid, org_id: Uuid) -> StoreResult<u64> {
        let mut tables = self.lock_for_write()?;
        let before = tables.members.len();
        tables
            .members
            .retain(|m| !(m.user_id == user_id && m.org_id == org_id));
        let rows = (before - tables.members.len()) as u64;

        tables.journal.push(Mutation::DeleteMembership {
            user_id,
            org_id,
            rows,
        });
        Ok(rows)
    }

    async fn delete_memberships_for_user(&self, user_id: Uuid) -> StoreResult<u64> {
        let mut tables = self.lock_for_write()?;
        let before = tables.members.len();
        tables.members.retain(|m| m.user_id != user_id);
        let rows = (before - tables.members.len()) as u64;

        tables
            .journal
            .push(Mutation::DeleteUserMemberships { user_id, rows });
        Ok(rows)
    }

    async fn memberships_for_user(&self, user_id: Uuid) -> StoreResult<Vec<UserMembership>> {
        let tables = self.lock()?;
        let mut memberships: Vec<UserMembership> = tables
            .members
            .iter()
            .filter(|m| m.user_id == user_id)
            .filter_map(|m| {
                tables
                    .organizations
                    .iter()
                    .find(|o| o.id == m.org_id)
                    .map(|o| UserMembership {
                        org_id: o.id,
                        org_clerk_id: o.clerk_id.clone(),
                        org_name: o.name.clone(),
                        org_image_url: o.image_url.clone(),
                        role: m.role.clone(),
                    })
            })
            .collect();
        memberships.sort_by(|a, b| a.org_name.cmp(&b.org_name));
        Ok(memberships)
    }
}
