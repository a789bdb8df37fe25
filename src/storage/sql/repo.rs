use sqlx::AnyPool;

use super::repo_types::{CategoryRow, ItemRow, UserRow, GUEST_ROLE};
use crate::storage::error::StoreResult;

const USER_COLUMNS: &str = "id, username, email, password_hash, role, owner_id, permission, \
     item_limit, has_unlimited, is_active, created_at, last_login";

const ITEM_COLUMNS: &str = "id, user_id, name, description, category, sku, quantity, \
     used_quantity, unit, price, total_value, location, min_quantity, image_url, active, \
     created_at, updated_at";

// Owners sort ahead of guests so lookups that could hit either prefer
// the owner.
const OWNERS_FIRST: &str = "ORDER BY CASE WHEN role = 'guest' THEN 1 ELSE 0 END, created_at";

pub async fn find_user_by_id(db: &AnyPool, id: &str) -> StoreResult<Option<UserRow>> {
    let row = sqlx::query_as::<_, UserRow>(&format!(
        "SELECT {USER_COLUMNS} FROM users WHERE id = $1 {OWNERS_FIRST} LIMIT 1"
    ))
    .bind(id)
    .fetch_optional(db)
    .await?;
    Ok(row)
}

pub async fn find_user_by_username(db: &AnyPool, username: &str) -> StoreResult<Option<UserRow>> {
    let row = sqlx::query_as::<_, UserRow>(&format!(
        "SELECT {USER_COLUMNS} FROM users WHERE username = $1 {OWNERS_FIRST} LIMIT 1"
    ))
    .bind(username)
    .fetch_optional(db)
    .await?;
    Ok(row)
}

pub async fn find_user_by_email(db: &AnyPool, email: &str) -> StoreResult<Option<UserRow>> {
    let row = sqlx::query_as::<_, UserRow>(&format!(
        "SELECT {USER_COLUMNS} FROM users WHERE lower(email) = lower($1) {OWNERS_FIRST} LIMIT 1"
    ))
    .bind(email)
    .fetch_optional(db)
    .await?;
    Ok(row)
}

pub async fn list_owners(db: &AnyPool) -> StoreResult<Vec<UserRow>> {
    let rows = sqlx::query_as::<_, UserRow>(&format!(
        "SELECT {USER_COLUMNS} FROM users WHERE role <> $1 ORDER BY created_at, id"
    ))
    .bind(GUEST_ROLE)
    .fetch_all(db)
    .await?;
    Ok(rows)
}

pub async fn list_active_guests(db: &AnyPool, owner_id: &str) -> StoreResult<Vec<UserRow>> {
    let rows = sqlx::query_as::<_, UserRow>(&format!(
        "SELECT {USER_COLUMNS} FROM users \
         WHERE role = $1 AND owner_id = $2 AND is_active = 1 ORDER BY created_at, id"
    ))
    .bind(GUEST_ROLE)
    .bind(owner_id)
    .fetch_all(db)
    .await?;
    Ok(rows)
}

pub async fn insert_user(db: &AnyPool, row: &UserRow) -> StoreResult<()> {
    sqlx::query(&format!(
        "INSERT INTO users ({USER_COLUMNS}) \
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)"
    ))
    .bind(&row.id)
    .bind(&row.username)
    .bind(&row.email)
    .bind(&row.password_hash)
    .bind(&row.role)
    .bind(&row.owner_id)
    .bind(&row.permission)
    .bind(row.item_limit)
    .bind(row.has_unlimited)
    .bind(row.is_active)
    .bind(&row.created_at)
    .bind(&row.last_login)
    .execute(db)
    .await?;
    Ok(())
}

/// Rewrites every mutable column of the row with id `row.id`.
pub async fn save_user(db: &AnyPool, row: &UserRow) -> StoreResult<u64> {
    let done = sqlx::query(
        r#"
        UPDATE users
        SET username = $2, email = $3, password_hash = $4, role = $5, owner_id = $6,
            permission = $7, item_limit = $8, has_unlimited = $9, is_active = $10,
            last_login = $11
        WHERE id = $1
        "#,
    )
    .bind(&row.id)
    .bind(&row.username)
    .bind(&row.email)
    .bind(&row.password_hash)
    .bind(&row.role)
    .bind(&row.owner_id)
    .bind(&row.permission)
    .bind(row.item_limit)
    .bind(row.has_unlimited)
    .bind(row.is_active)
    .bind(&row.last_login)
    .execute(db)
    .await?;
    Ok(done.rows_affected())
}

pub async fn delete_user_row(db: &AnyPool, id: &str) -> StoreResult<u64> {
    let done = sqlx::query("DELETE FROM users WHERE id = $1")
        .bind(id)
        .execute(db)
        .await?;
    Ok(done.rows_affected())
}

pub async fn delete_guests_of(db: &AnyPool, owner_id: &str) -> StoreResult<u64> {
    let done = sqlx::query("DELETE FROM users WHERE role = $1 AND owner_id = $2")
        .bind(GUEST_ROLE)
        .bind(owner_id)
        .execute(db)
        .await?;
    Ok(done.rows_affected())
}

pub async fn delete_items_of(db: &AnyPool, owner_id: &str) -> StoreResult<u64> {
    let done = sqlx::query("DELETE FROM inventory_items WHERE user_id = $1")
        .bind(owner_id)
        .execute(db)
        .await?;
    Ok(done.rows_affected())
}

pub async fn delete_categories_of(db: &AnyPool, owner_id: &str) -> StoreResult<u64> {
    let done = sqlx::query("DELETE FROM categories WHERE user_id = $1")
        .bind(owner_id)
        .execute(db)
        .await?;
    Ok(done.rows_affected())
}

pub async fn list_active_items(db: &AnyPool, owner_id: &str) -> StoreResult<Vec<ItemRow>> {
    let rows = sqlx::query_as::<_, ItemRow>(&format!(
        "SELECT {ITEM_COLUMNS} FROM inventory_items \
         WHERE user_id = $1 AND active = 1 ORDER BY created_at, id"
    ))
    .bind(owner_id)
    .fetch_all(db)
    .await?;
    Ok(rows)
}

pub async fn find_item(db: &AnyPool, id: &str) -> StoreResult<Option<ItemRow>> {
    let row = sqlx::query_as::<_, ItemRow>(&format!(
        "SELECT {ITEM_COLUMNS} FROM inventory_items WHERE id = $1"
    ))
    .bind(id)
    .fetch_optional(db)
    .await?;
    Ok(row)
}

pub async fn insert_item(db: &AnyPool, row: &ItemRow) -> StoreResult<()> {
    sqlx::query(&format!(
        "INSERT INTO inventory_items ({ITEM_COLUMNS}) \
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17)"
    ))
    .bind(&row.id)
    .bind(&row.user_id)
    .bind(&row.name)
    .bind(&row.description)
    .bind(&row.category)
    .bind(&row.sku)
    .bind(row.quantity)
    .bind(row.used_quantity)
    .bind(&row.unit)
    .bind(row.price)
    .bind(row.total_value)
    .bind(&row.location)
    .bind(row.min_quantity)
    .bind(&row.image_url)
    .bind(row.active)
    .bind(&row.created_at)
    .bind(&row.updated_at)
    .execute(db)
    .await?;
    Ok(())
}

pub async fn save_item(db: &AnyPool, row: &ItemRow) -> StoreResult<u64> {
    let done = sqlx::query(
        r#"
        UPDATE inventory_items
        SET name = $2, description = $3, category = $4, sku = $5, quantity = $6,
            used_quantity = $7, unit = $8, price = $9, total_value = $10, location = $11,
            min_quantity = $12, image_url = $13, updated_at = $14
        WHERE id = $1
        "#,
    )
    .bind(&row.id)
    .bind(&row.name)
    .bind(&row.description)
    .bind(&row.category)
    .bind(&row.sku)
    .bind(row.quantity)
    .bind(row.used_quantity)
    .bind(&row.unit)
    .bind(row.price)
    .bind(row.total_value)
    .bind(&row.location)
    .bind(row.min_quantity)
    .bind(&row.image_url)
    .bind(&row.updated_at)
    .execute(db)
    .await?;
    Ok(done.rows_affected())
}

pub async fn delete_item_row(db: &AnyPool, id: &str) -> StoreResult<u64> {
    let done = sqlx::query("DELETE FROM inventory_items WHERE id = $1")
        .bind(id)
        .execute(db)
        .await?;
    Ok(done.rows_affected())
}

/// Active item owners, one entry per item.
pub async fn active_item_owners(db: &AnyPool) -> StoreResult<Vec<String>> {
    let owners = sqlx::query_scalar::<_, String>(
        "SELECT user_id FROM inventory_items WHERE active = 1",
    )
    .fetch_all(db)
    .await?;
    Ok(owners)
}

/// Registers `name` for the owner; an existing entry is left alone.
pub async fn register_category(
    db: &AnyPool,
    id: &str,
    owner_id: &str,
    name: &str,
    created_at: &str,
) -> StoreResult<()> {
    sqlx::query(
        r#"
        INSERT INTO categories (id, user_id, name, created_at)
        VALUES ($1, $2, $3, $4)
        ON CONFLICT (user_id, name) DO NOTHING
        "#,
    )
    .bind(id)
    .bind(owner_id)
    .bind(name)
    .bind(created_at)
    .execute(db)
    .await?;
    Ok(())
}

pub async fn list_category_names(db: &AnyPool, owner_id: &str) -> StoreResult<Vec<CategoryRow>> {
    let rows = sqlx::query_as::<_, CategoryRow>(
        "SELECT name FROM categories WHERE user_id = $1 ORDER BY name",
    )
    .bind(owner_id)
    .fetch_all(db)
    .await?;
    Ok(rows)
}
