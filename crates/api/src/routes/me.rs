//! Signed-in user's mirrored profile

use axum::{extract::State, Extension, Json};
use eventdesk_shared::{User, UserMembership};
use serde::Serialize;

use crate::auth::Session;
use crate::error::{ApiError, ApiResult};
use crate::state::AppState;

#[derive(Debug, Serialize)]
pub struct MeResponse {
    pub user: User,
    pub active_org_id: Option<String>,
    pub memberships: Vec<UserMembership>,
}

/// Return the mirrored user row and its organization memberships
pub async fn get_me(
    State(state): State<AppState>,
    Extension(session): Extension<Session>,
) -> ApiResult<Json<MeResponse>> {
    let user = state
        .store
        .find_user(&session.user_id)
        .await?
        .ok_or_else(|| ApiError::NotFound("User".to_string()))?;
    let memberships = state.store.memberships_for_user(user.id).await?;

    Ok(Json(MeResponse {
        user,
        active_org_id: session.org_id,
        memberships,
    }))
}
