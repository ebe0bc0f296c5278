//! PostgreSQL implementation of [`IdentityStore`]

use async_trait::async_trait;
use sqlx::PgPool;
use uuid::Uuid;

use super::IdentityStore;
use crate::error::{StoreError, StoreResult};
use crate::models::{
    Organization, OrganizationMember, OrganizationProfile, User, UserMembership, UserProfile,
};

const USER_COLUMNS: &str =
    "id, clerk_id, email, first_name, last_name, image_url, phone, created_at, updated_at";

const ORGANIZATION_COLUMNS: &str = "id, clerk_id, name, image_url, created_at, updated_at";

const MEMBER_COLUMNS: &str = "id, user_id, org_id, role, created_at, updated_at";

#[derive(Clone)]
pub struct PgIdentityStore {
    pool: PgPool,
}

impl PgIdentityStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl IdentityStore for PgIdentityStore {
    async fn create_user(&self, clerk_id: &str, profile: &UserProfile) -> StoreResult<User> {
        let user: User = sqlx::query_as(&format!(
            r#"
            INSERT INTO users (clerk_id, email, first_name, last_name, image_url, phone)
            VALUES ($1, $2, $3, $4, $5, $6)
            RETURNING {USER_COLUMNS}
            "#
        ))
        .bind(clerk_id)
        .bind(&profile.email)
        .bind(&profile.first_name)
        .bind(&profile.last_name)
        .bind(&profile.image_url)
        .bind(&profile.phone)
        .fetch_one(&self.pool)
        .await?;

        Ok(user)
    }

    async fn update_users(&self, clerk_id: &str, profile: &UserProfile) -> StoreResult<u64> {
        let result = sqlx::query(
            r#"
            UPDATE users
            SET email = $2, first_name = $3, last_name = $4, image_url = $5, phone = $6,
                updated_at = NOW()
            WHERE clerk_id = $1
            "#,
        )
        .bind(clerk_id)
        .bind(&profile.email)
        .bind(&profile.first_name)
        .bind(&profile.last_name)
        .bind(&profile.image_url)
        .bind(&profile.phone)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected())
    }

    async fn find_user(&self, clerk_id: &str) -> StoreResult<Option<User>> {
        let user: Option<User> = sqlx::query_as(&format!(
            "SELECT {USER_COLUMNS} FROM users WHERE clerk_id = $1"
        ))
        .bind(clerk_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(user)
    }

    async fn find_user_id(&self, clerk_id: &str) -> StoreResult<Option<Uuid>> {
        let row: Option<(Uuid,)> = sqlx::query_as("SELECT id FROM users WHERE clerk_id = $1")
            .bind(clerk_id)
            .fetch_optional(&self.pool)
            .await?;

        Ok(row.map(|(id,)| id))
    }

    async fn delete_user(&self, clerk_id: &str) -> StoreResult<()> {
        let result = sqlx::query("DELETE FROM users WHERE clerk_id = $1")
            .bind(clerk_id)
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound(format!("user {clerk_id}")));
        }
        Ok(())
    }

    async fn upsert_organization(
        &self,
        clerk_id: &str,
        profile: &OrganizationProfile,
    ) -> StoreResult<Organization> {
        let organization: Organization = sqlx::query_as(&format!(
            r#"
            INSERT INTO organizations (clerk_id, name, image_url)
            VALUES ($1, $2, $3)
            ON CONFLICT (clerk_id) DO UPDATE SET
                name = EXCLUDED.name,
                image_url = EXCLUDED.image_url,
                updated_at = NOW()
            RETURNING {ORGANIZATION_COLUMNS}
            "#
        ))
        .bind(clerk_id)
        .bind(&profile.name)
        .bind(&profile.image_url)
        .fetch_one(&self.pool)
        .await?;

        Ok(organization)
    }

    async fn update_organizations(
        &self,
        clerk_id: &str,
        profile: &OrganizationProfile,
    ) -> StoreResult<u64> {
        let result = sqlx::query(
            r#"
            UPDATE organizations
            SET name = $2, image_url = $3, updated_at = NOW()
            WHERE clerk_id = $1
            "#,
        )
        .bind(clerk_id)
        .bind(&profile.name)
        .bind(&profile.image_url)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected())
    }

    async fn find_organization_id(&self, clerk_id: &str) -> StoreResult<Option<Uuid>> {
        let row: Option<(Uuid,)> =
            sqlx::query_as("SELECT id FROM organizations WHERE clerk_id = $1")
                .bind(clerk_id)
                .fetch_optional(&self.pool)
                .await?;

        Ok(row.map(|(id,)| id))
    }

    async fn upsert_membership(
        &self,
        user_id: Uuid,
        org_id: Uuid,
        role: Option<&str>,
    ) -> StoreResult<OrganizationMember> {
        let member: OrganizationMember = sqlx::query_as(&format!(
            r#"
            INSERT INTO organization_members (user_id, org_id, role)
            VALUES ($1, $2, $3)
            ON CONFLICT (user_id, org_id) DO UPDATE SET
                role = EXCLUDED.role,
                updated_at = NOW()
            RETURNING {MEMBER_COLUMNS}
            "#
        ))
        .bind(user_id)
        .bind(org_id)
        .bind(role)
        .fetch_one(&self.pool)
        .await?;

        Ok(member)
    }

    async fn delete_membership(&self, user_id: Uuid, org_id: Uuid) -> StoreResult<u64> {
        let result =
            sqlx::query("DELETE FROM organization_members WHERE user_id = $1 AND org_id = $2")
                .bind(user_id)
                .bind(org_id)
                .execute(&self.pool)
                .await?;

        Ok(result.rows_affected())
    }

    async fn delete_memberships_for_user(&self, user_id: Uuid) -> StoreResult<u64> {
        let result = sqlx::query("DELETE FROM organization_members WHERE user_id = $1")
            .bind(user_id)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected())
    }

    async fn memberships_for_user(&self, user_id: Uuid) -> StoreResult<Vec<UserMembership>> {
        let rows: Vec<UserMembership> = sqlx::query_as(
            r#"
            SELECT o.id AS org_id, o.clerk_id AS org_clerk_id, o.name AS org_name,
                   o.image_url AS org_image_url, m.role
            FROM organization_members m
            JOIN organizations o ON o.id = m.org_id
            WHERE m.user_id = $1
            ORDER BY o.name
            "#,
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows)
    }
}
