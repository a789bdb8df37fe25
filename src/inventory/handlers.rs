use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::{get, post, put},
    Json, Router,
};
use tracing::{info, instrument, warn};

use crate::{
    auth::services::CurrentUser,
    state::AppState,
    storage::types::{Category, InventoryItem, InventoryStats, ItemPatch, NewItem, User, UserKind},
};

use super::dto::{AdjustRequest, AdjustResponse};

type ApiError = (StatusCode, String);

pub fn read_routes() -> Router<AppState> {
    Router::new()
        .route("/inventory", get(list_items).post(create_item))
        .route("/inventory/stats", get(get_stats))
        .route("/categories", get(list_categories))
}

pub fn write_routes() -> Router<AppState> {
    Router::new()
        .route("/inventory/:id", put(update_item).delete(delete_item))
        .route("/inventory/:id/adjust", post(adjust_item))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Access {
    Read,
    Edit,
    Delete,
}

/// Owner id whose inventory `user` may act on with `access`. Guests act on
/// their owner's inventory within their permission.
fn authorize(user: &User, access: Access) -> Result<&str, ApiError> {
    if let UserKind::Guest { permission, .. } = &user.kind {
        let allowed = match access {
            Access::Read => true,
            Access::Edit => permission.can_edit(),
            Access::Delete => permission.can_delete(),
        };
        if !allowed {
            warn!(user_id = %user.id, ?access, permission = permission.as_str(), "guest denied");
            return Err((StatusCode::FORBIDDEN, "Insufficient guest permission".into()));
        }
    }
    Ok(user.inventory_owner())
}

/// Item `id` if it belongs to `owner_id`; anything else is reported as
/// missing.
async fn owned_item(state: &AppState, owner_id: &str, id: &str) -> Result<InventoryItem, ApiError> {
    let item = state.storage.get_item(id).await?;
    if item.user_id != owner_id {
        warn!(item_id = %id, %owner_id, "item of another owner requested");
        return Err((StatusCode::NOT_FOUND, "Item not found".into()));
    }
    Ok(item)
}

#[instrument(skip_all, fields(user_id = %user.id))]
pub async fn list_items(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
) -> Result<Json<Vec<InventoryItem>>, ApiError> {
    let owner_id = authorize(&user, Access::Read)?;
    Ok(Json(state.storage.get_inventory_by_owner(owner_id).await?))
}

#[instrument(skip_all, fields(user_id = %user.id))]
pub async fn get_stats(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
) -> Result<Json<InventoryStats>, ApiError> {
    let owner_id = authorize(&user, Access::Read)?;
    Ok(Json(state.storage.get_stats(owner_id).await?))
}

#[instrument(skip_all, fields(user_id = %user.id))]
pub async fn list_categories(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
) -> Result<Json<Vec<Category>>, ApiError> {
    let owner_id = authorize(&user, Access::Read)?;
    Ok(Json(state.storage.list_categories(owner_id).await?))
}

#[instrument(skip(state, user, payload), fields(user_id = %user.id))]
pub async fn create_item(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Json(payload): Json<NewItem>,
) -> Result<(StatusCode, Json<InventoryItem>), ApiError> {
    let owner_id = authorize(&user, Access::Edit)?;
    let item = state.storage.create_item(owner_id, payload).await?;
    info!(item_id = %item.id, %owner_id, "item created");
    Ok((StatusCode::CREATED, Json(item)))
}

#[instrument(skip(state, user, payload), fields(user_id = %user.id))]
pub async fn update_item(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Path(id): Path<String>,
    Json(payload): Json<ItemPatch>,
) -> Result<Json<InventoryItem>, ApiError> {
    let owner_id = authorize(&user, Access::Edit)?;
    owned_item(&state, owner_id, &id).await?;
    Ok(Json(state.storage.update_item(&id, payload).await?))
}

#[instrument(skip(state, user), fields(user_id = %user.id))]
pub async fn delete_item(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Path(id): Path<String>,
) -> Result<StatusCode, ApiError> {
    let owner_id = authorize(&user, Access::Delete)?;
    owned_item(&state, owner_id, &id).await?;
    state.storage.delete_item(&id).await?;
    info!(item_id = %id, "item deleted");
    Ok(StatusCode::NO_CONTENT)
}

#[instrument(skip(state, user, payload), fields(user_id = %user.id, delta = payload.quantity))]
pub async fn adjust_item(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Path(id): Path<String>,
    Json(payload): Json<AdjustRequest>,
) -> Result<Json<AdjustResponse>, ApiError> {
    let owner_id = authorize(&user, Access::Edit)?;
    owned_item(&state, owner_id, &id).await?;
    let adj = state
        .storage
        .adjust_item_quantity(&id, payload.quantity)
        .await?;
    info!(
        item_id = %id,
        old = adj.old_quantity,
        new = adj.new_quantity,
        notes = payload.notes.as_deref().unwrap_or(""),
        "quantity adjusted"
    );
    Ok(Json(adj.into()))
}
