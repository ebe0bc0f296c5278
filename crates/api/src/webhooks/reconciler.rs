//! Identity-event reconciler
//!
//! Each handler applies its database mutation, then the analytics identity
//! update, and always records the "event occurred" capture through a
//! [`CaptureOnDrop`] guard, whether or not the mutation succeeded.

use std::sync::Arc;

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
};
use eventdesk_shared::{IdentityStore, StoreError};
use serde_json::json;
use thiserror::Error;

use super::events::{
    DeletedObjectJson, OrganizationJson, OrganizationMembershipJson, UserJson, WebhookEvent,
};
use crate::analytics::{AnalyticsError, AnalyticsSink, CaptureOnDrop, GroupIdentify, Properties};

const GROUP_TYPE_COMPANY: &str = "company";

#[derive(Debug, Error)]
enum HandlerError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Analytics(#[from] AnalyticsError),
}

type HandlerResult = Result<(), HandlerError>;

/// Terminal status and plain-text body of a handled event
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Outcome {
    pub status: StatusCode,
    pub body: &'static str,
}

impl Outcome {
    fn created(body: &'static str) -> Self {
        Self {
            status: StatusCode::CREATED,
            body,
        }
    }

    fn failed(body: &'static str) -> Self {
        Self {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            body,
        }
    }
}

impl IntoResponse for Outcome {
    fn into_response(self) -> Response {
        (self.status, self.body).into_response()
    }
}

pub struct Reconciler {
    store: Arc<dyn IdentityStore>,
    analytics: Arc<dyn AnalyticsSink>,
}

impl Reconciler {
    pub fn new(store: Arc<dyn IdentityStore>, analytics: Arc<dyn AnalyticsSink>) -> Self {
        Self { store, analytics }
    }

    pub async fn dispatch(&self, event: &WebhookEvent) -> Outcome {
        match event {
            WebhookEvent::UserCreated(data) => self.handle_user_created(data).await,
            WebhookEvent::UserUpdated(data) => self.handle_user_updated(data).await,
            WebhookEvent::UserDeleted(data) => self.handle_user_deleted(data).await,
            WebhookEvent::OrganizationCreated(data) => self.handle_organization_created(data).await,
            WebhookEvent::OrganizationUpdated(data) => self.handle_organization_updated(data).await,
            WebhookEvent::MembershipCreated(data) => self.handle_membership_created(data).await,
            WebhookEvent::MembershipDeleted(data) => self.handle_membership_deleted(data).await,
            WebhookEvent::Unknown { event_type, .. } => {
                tracing::debug!(event_type = %event_type, "No handler for webhook event type");
                Outcome::created("")
            }
        }
    }

    fn capture_on_exit(&self, event: &'static str, distinct_id: Option<&str>) -> CaptureOnDrop {
        CaptureOnDrop::new(
            self.analytics.clone(),
            event,
            distinct_id.map(str::to_string),
        )
    }

    async fn handle_user_created(&self, data: &UserJson) -> Outcome {
        let _capture = self.capture_on_exit("User Created", Some(&data.id));

        match self.create_user(data).await {
            Ok(()) => Outcome::created("User created"),
            Err(e) => {
                tracing::error!(error = %e, user_id = %data.id, "Failed to create user in database");
                Outcome::failed("User creation failed")
            }
        }
    }

    async fn create_user(&self, data: &UserJson) -> HandlerResult {
        self.store.create_user(&data.id, &data.profile()).await?;
        self.analytics.identify(&data.id, data.identify_properties())?;
        Ok(())
    }

    async fn handle_user_updated(&self, data: &UserJson) -> Outcome {
        let _capture = self.capture_on_exit("User Updated", Some(&data.id));

        match self.update_user(data).await {
            Ok(()) => Outcome::created("User updated"),
            Err(e) => {
                tracing::error!(error = %e, user_id = %data.id, "Failed to update user in database");
                Outcome::failed("User update failed")
            }
        }
    }

    async fn update_user(&self, data: &UserJson) -> HandlerResult {
        let rows = self.store.update_users(&data.id, &data.profile()).await?;
        if rows == 0 {
            tracing::debug!(user_id = %data.id, "user.updated for a user that is not mirrored");
        }
        self.analytics.identify(&data.id, data.identify_properties())?;
        Ok(())
    }

    async fn handle_user_deleted(&self, data: &DeletedObjectJson) -> Outcome {
        let user_id = data.id.as_deref().filter(|id| !id.is_empty());
        let _capture = self.capture_on_exit("User Deleted", user_id);

        let Some(user_id) = user_id else {
            return Outcome::created("User deleted");
        };

        match self.delete_user(user_id).await {
            Ok(()) => Outcome::created("User deleted"),
            Err(e) => {
                tracing::error!(error = %e, user_id = %user_id, "Failed to hard-delete user");
                Outcome::failed("User delete failed")
            }
        }
    }

    /// Memberships go first so the user row is never referenced when deleted
    async fn delete_user(&self, clerk_id: &str) -> HandlerResult {
        if let Some(id) = self.store.find_user_id(clerk_id).await? {
            let removed = self.store.delete_memberships_for_user(id).await?;
            self.store.delete_user(clerk_id).await?;
            tracing::info!(user_id = %clerk_id, memberships = removed, "Deleted mirrored user");
        }

        let mut properties = Properties::new();
        properties.insert("deleted".to_string(), json!(chrono::Utc::now().to_rfc3339()));
        self.analytics.identify(clerk_id, properties)?;
        Ok(())
    }

    async fn handle_organization_created(&self, data: &OrganizationJson) -> Outcome {
        let _capture = self.capture_on_exit("Organization Created", data.creator());

        match self.upsert_organization(data).await {
            Ok(()) => Outcome::created("Organization created"),
            Err(e) => {
                tracing::error!(error = %e, org_id = %data.id, "Failed to upsert organization");
                Outcome::failed("Organization create failed")
            }
        }
    }

    async fn upsert_organization(&self, data: &OrganizationJson) -> HandlerResult {
        self.store.upsert_organization(&data.id, &data.profile()).await?;
        self.analytics.group_identify(organization_group(data))?;
        Ok(())
    }

    async fn handle_organization_updated(&self, data: &OrganizationJson) -> Outcome {
        let _capture = self.capture_on_exit("Organization Updated", data.creator());

        match self.update_organization(data).await {
            Ok(()) => Outcome::created("Organization updated"),
            Err(e) => {
                tracing::error!(error = %e, org_id = %data.id, "Failed to update organization");
                Outcome::failed("Organization update failed")
            }
        }
    }

    async fn update_organization(&self, data: &OrganizationJson) -> HandlerResult {
        self.store.update_organizations(&data.id, &data.profile()).await?;
        self.analytics.group_identify(organization_group(data))?;
        Ok(())
    }

    async fn handle_membership_created(&self, data: &OrganizationMembershipJson) -> Outcome {
        let user_id = &data.public_user_data.user_id;
        let org_id = &data.organization.id;
        let _capture = self.capture_on_exit("Organization Member Created", Some(user_id));

        match self.upsert_membership(data).await {
            Ok(()) => Outcome::created("Organization membership created"),
            Err(e) => {
                tracing::error!(
                    error = %e,
                    org_id = %org_id,
                    user_id = %user_id,
                    "Failed to upsert organization membership"
                );
                Outcome::failed("Organization membership create failed")
            }
        }
    }

    async fn upsert_membership(&self, data: &OrganizationMembershipJson) -> HandlerResult {
        let user_id = &data.public_user_data.user_id;
        let org_id = &data.organization.id;

        match self.resolve_membership(user_id, org_id).await? {
            Some((user, org)) => {
                self.store
                    .upsert_membership(user, org, data.role.as_deref())
                    .await?;
            }
            None => {
                tracing::info!(
                    org_id = %org_id,
                    user_id = %user_id,
                    "Membership references a user or organization that is not mirrored yet, skipping"
                );
            }
        }

        self.analytics.group_identify(GroupIdentify {
            group_type: GROUP_TYPE_COMPANY.to_string(),
            group_key: org_id.clone(),
            distinct_id: Some(user_id.clone()),
            properties: Properties::new(),
        })?;
        Ok(())
    }

    async fn handle_membership_deleted(&self, data: &OrganizationMembershipJson) -> Outcome {
        let user_id = &data.public_user_data.user_id;
        let org_id = &data.organization.id;
        let _capture = self.capture_on_exit("Organization Member Deleted", Some(user_id));

        match self.delete_membership(user_id, org_id).await {
            Ok(()) => Outcome::created("Organization membership deleted"),
            Err(e) => {
                tracing::error!(
                    error = %e,
                    org_id = %org_id,
                    user_id = %user_id,
                    "Failed to delete organization membership"
                );
                Outcome::failed("Organization membership delete failed")
            }
        }
    }

    async fn delete_membership(&self, user_id: &str, org_id: &str) -> HandlerResult {
        if let Some((user, org)) = self.resolve_membership(user_id, org_id).await? {
            self.store.delete_membership(user, org).await?;
        }
        Ok(())
    }

    /// Internal ids of both sides of a membership, if both are mirrored
    async fn resolve_membership(
        &self,
        user_id: &str,
        org_id: &str,
    ) -> Result<Option<(uuid::Uuid, uuid::Uuid)>, StoreError> {
        let user = self.store.find_user_id(user_id).await?;
        let org = self.store.find_organization_id(org_id).await?;
        Ok(user.zip(org))
    }
}

fn organization_group(data: &OrganizationJson) -> GroupIdentify {
    GroupIdentify {
        group_type: GROUP_TYPE_COMPANY.to_string(),
        group_key: data.id.clone(),
        distinct_id: data.creator().map(str::to_string),
        properties: data.group_properties(),
    }
}
