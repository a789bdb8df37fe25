use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::{delete, get, post},
    Json, Router,
};
use tracing::{info, instrument, warn};

use crate::{
    auth::services::{require_admin, CurrentUser, PublicUser},
    state::AppState,
    storage::types::{DeleteOutcome, InventoryItem, User, UserPatch},
};

use super::dto::AdminUserView;

type ApiError = (StatusCode, String);

pub fn admin_routes() -> Router<AppState> {
    Router::new()
        .route("/admin/users", get(list_users))
        .route("/admin/user/:id", delete(delete_user))
        .route("/admin/user/:id/toggle-status", post(toggle_status))
        .route("/admin/user/:id/unlock-unlimited", post(unlock_unlimited))
        .route("/admin/user/:id/items", get(user_items))
}

/// Target account for an admin action; guests are managed by their owners.
async fn target(state: &AppState, id: &str) -> Result<User, ApiError> {
    state
        .storage
        .find_user_by_id(id)
        .await?
        .filter(|u| !u.is_guest())
        .ok_or((StatusCode::NOT_FOUND, "User not found".to_string()))
}

#[instrument(skip_all, fields(admin_id = %admin.id))]
pub async fn list_users(
    State(state): State<AppState>,
    CurrentUser(admin): CurrentUser,
) -> Result<Json<Vec<AdminUserView>>, ApiError> {
    require_admin(&admin)?;
    let users = state.storage.list_users().await?;
    let counts = state.storage.count_items_by_owner().await?;
    let views = users
        .iter()
        .map(|u| AdminUserView {
            user: PublicUser::from(u),
            item_count: counts.get(&u.id).copied().unwrap_or(0),
        })
        .collect();
    Ok(Json(views))
}

#[instrument(skip(state, admin), fields(admin_id = %admin.id))]
pub async fn delete_user(
    State(state): State<AppState>,
    CurrentUser(admin): CurrentUser,
    Path(id): Path<String>,
) -> Result<Json<DeleteOutcome>, ApiError> {
    require_admin(&admin)?;
    if id == admin.id {
        return Err((StatusCode::BAD_REQUEST, "Cannot delete your own account".into()));
    }
    let user = target(&state, &id).await?;
    let outcome = state.storage.delete_user(&user.id).await?;
    if outcome.is_complete() {
        info!(user_id = %id, cascaded = outcome.cascaded, "user deleted by admin");
    } else {
        warn!(user_id = %id, failures = outcome.failures.len(), "user deleted with leftovers");
    }
    Ok(Json(outcome))
}

#[instrument(skip(state, admin), fields(admin_id = %admin.id))]
pub async fn toggle_status(
    State(state): State<AppState>,
    CurrentUser(admin): CurrentUser,
    Path(id): Path<String>,
) -> Result<Json<PublicUser>, ApiError> {
    require_admin(&admin)?;
    if id == admin.id {
        return Err((StatusCode::BAD_REQUEST, "Cannot deactivate your own account".into()));
    }
    let user = target(&state, &id).await?;
    let patch = UserPatch {
        is_active: Some(!user.is_active),
        ..Default::default()
    };
    let user = state.storage.update_user(&id, patch).await?;
    info!(user_id = %id, is_active = user.is_active, "user status toggled");
    Ok(Json(PublicUser::from(&user)))
}

#[instrument(skip(state, admin), fields(admin_id = %admin.id))]
pub async fn unlock_unlimited(
    State(state): State<AppState>,
    CurrentUser(admin): CurrentUser,
    Path(id): Path<String>,
) -> Result<Json<PublicUser>, ApiError> {
    require_admin(&admin)?;
    target(&state, &id).await?;
    let patch = UserPatch {
        has_unlimited: Some(true),
        ..Default::default()
    };
    let user = state.storage.update_user(&id, patch).await?;
    info!(user_id = %id, "unlimited items granted");
    Ok(Json(PublicUser::from(&user)))
}

#[instrument(skip(state, admin), fields(admin_id = %admin.id))]
pub async fn user_items(
    State(state): State<AppState>,
    CurrentUser(admin): CurrentUser,
    Path(id): Path<String>,
) -> Result<Json<Vec<InventoryItem>>, ApiError> {
    require_admin(&admin)?;
    let user = target(&state, &id).await?;
    Ok(Json(state.storage.get_inventory_by_owner(&user.id).await?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::services::ensure_default_admin;
    use crate::storage::types::{NewItem, NewUser, Role, UserKind};

    async fn setup() -> (AppState, User, User) {
        let state = AppState::fake();
        ensure_default_admin(&state.storage, &state.config.admin).await.unwrap();
        let admin = state
            .storage
            .find_user_by_username("admin")
            .await
            .unwrap()
            .unwrap();
        let alice = state
            .storage
            .create_user(NewUser {
                username: "alice".into(),
                email: "alice@x.com".into(),
                password_hash: "h".into(),
                is_active: true,
                kind: UserKind::Owner {
                    role: Role::User,
                    item_limit: 20,
                    has_unlimited: false,
                },
            })
            .await
            .unwrap();
        (state, admin, alice)
    }

    #[tokio::test]
    async fn lists_users_with_item_counts() {
        let (state, admin, alice) = setup().await;
        state
            .storage
            .create_item(
                &alice.id,
                NewItem {
                    name: "Widget".into(),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        let Json(views) = list_users(State(state), CurrentUser(admin)).await.unwrap();
        let row = views.iter().find(|v| v.user.id == alice.id).unwrap();
        assert_eq!(row.item_count, 1);
    }

    #[tokio::test]
    async fn non_admins_are_forbidden() {
        let (state, _, alice) = setup().await;
        let err = list_users(State(state), CurrentUser(alice)).await.unwrap_err();
        assert_eq!(err.0, StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn toggle_and_unlock() {
        let (state, admin, alice) = setup().await;
        let Json(view) = toggle_status(
            State(state.clone()),
            CurrentUser(admin.clone()),
            Path(alice.id.clone()),
        )
        .await
        .unwrap();
        assert!(!view.is_active);

        let Json(view) = unlock_unlimited(State(state), CurrentUser(admin), Path(alice.id))
            .await
            .unwrap();
        assert_eq!(view.has_unlimited, Some(true));
    }

    #[tokio::test]
    async fn delete_cascades_and_refuses_self() {
        let (state, admin, alice) = setup().await;
        let err = delete_user(
            State(state.clone()),
            CurrentUser(admin.clone()),
            Path(admin.id.clone()),
        )
        .await
        .unwrap_err();
        assert_eq!(err.0, StatusCode::BAD_REQUEST);

        let Json(outcome) = delete_user(State(state.clone()), CurrentUser(admin), Path(alice.id.clone()))
            .await
            .unwrap();
        assert_eq!(outcome.changed, 1);
        assert!(state.storage.find_user_by_id(&alice.id).await.unwrap().is_none());
    }
}
