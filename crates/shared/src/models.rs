//! Rows of the local identity mirror

use serde::Serialize;
use sqlx::FromRow;
use time::OffsetDateTime;
use uuid::Uuid;

/// Mirrored identity-provider user
#[derive(Debug, Clone, PartialEq, Eq, Serialize, FromRow)]
pub struct User {
    pub id: Uuid,
    /// Identity provider's user id
    pub clerk_id: String,
    pub email: String,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub image_url: Option<String>,
    pub phone: Option<String>,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
}

/// Mirrored identity-provider organization
#[derive(Debug, Clone, PartialEq, Eq, Serialize, FromRow)]
pub struct Organization {
    pub id: Uuid,
    pub clerk_id: String,
    pub name: String,
    pub image_url: Option<String>,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
}

/// Link row between a user and an organization, unique per pair
#[derive(Debug, Clone, PartialEq, Eq, Serialize, FromRow)]
pub struct OrganizationMember {
    pub id: Uuid,
    pub user_id: Uuid,
    pub org_id: Uuid,
    pub role: Option<String>,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
}

/// A user's membership joined with its organization
#[derive(Debug, Clone, PartialEq, Eq, Serialize, FromRow)]
pub struct UserMembership {
    pub org_id: Uuid,
    pub org_clerk_id: String,
    pub org_name: String,
    pub org_image_url: Option<String>,
    pub role: Option<String>,
}

/// Mutable user columns, written on create and on update
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UserProfile {
    pub email: String,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub image_url: Option<String>,
    pub phone: Option<String>,
}

/// Mutable organization columns
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OrganizationProfile {
    pub name: String,
    pub image_url: Option<String>,
}
