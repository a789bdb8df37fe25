use sqlx::FromRow;

use crate::storage::types::{GuestPermission, InventoryItem, Role, User, UserKind};

pub const GUEST_ROLE: &str = "guest";

/// Row of `users`. Owners and guests share the table; `role` tells them
/// apart.
#[derive(Debug, Clone, FromRow)]
pub struct UserRow {
    pub id: String,
    pub username: String,
    pub email: String,
    pub password_hash: String,
    pub role: String,
    pub owner_id: String,     // '' for owners
    pub permission: String,   // ignored for owners
    pub item_limit: i64,
    pub has_unlimited: i64,   // 0/1
    pub is_active: i64,       // 0/1
    pub created_at: String,
    pub last_login: String,   // '' until first login
}

impl From<UserRow> for User {
    fn from(row: UserRow) -> Self {
        let kind = if row.role == GUEST_ROLE {
            UserKind::Guest {
                owner_id: row.owner_id,
                permission: GuestPermission::parse(&row.permission),
            }
        } else {
            UserKind::Owner {
                role: Role::parse(&row.role),
                item_limit: row.item_limit,
                has_unlimited: row.has_unlimited != 0,
            }
        };
        User {
            id: row.id,
            username: row.username,
            email: row.email,
            password_hash: row.password_hash,
            is_active: row.is_active != 0,
            created_at: row.created_at,
            last_login: (!row.last_login.is_empty()).then_some(row.last_login),
            kind,
        }
    }
}

impl From<&User> for UserRow {
    fn from(user: &User) -> Self {
        let (role, owner_id, permission, item_limit, has_unlimited) = match &user.kind {
            UserKind::Owner {
                role,
                item_limit,
                has_unlimited,
            } => (
                role.as_str(),
                String::new(),
                GuestPermission::default(),
                *item_limit,
                *has_unlimited,
            ),
            UserKind::Guest {
                owner_id,
                permission,
            } => (GUEST_ROLE, owner_id.clone(), *permission, 0, false),
        };
        UserRow {
            id: user.id.clone(),
            username: user.username.clone(),
            email: user.email.clone(),
            password_hash: user.password_hash.clone(),
            role: role.to_string(),
            owner_id,
            permission: permission.as_str().to_string(),
            item_limit,
            has_unlimited: has_unlimited as i64,
            is_active: user.is_active as i64,
            created_at: user.created_at.clone(),
            last_login: user.last_login.clone().unwrap_or_default(),
        }
    }
}

/// Row of `inventory_items`.
#[derive(Debug, Clone, FromRow)]
pub struct ItemRow {
    pub id: String,
    pub user_id: String,
    pub name: String,
    pub description: String,
    pub category: String,
    pub sku: String,
    pub quantity: f64,
    pub used_quantity: f64,
    pub unit: String,
    pub price: f64,
    pub total_value: f64,
    pub location: String,
    pub min_quantity: f64,
    pub image_url: String,
    pub active: i64,
    pub created_at: String,
    pub updated_at: String,
}

impl From<ItemRow> for InventoryItem {
    fn from(row: ItemRow) -> Self {
        InventoryItem {
            id: row.id,
            user_id: row.user_id,
            name: row.name,
            description: row.description,
            category: row.category,
            sku: row.sku,
            quantity: row.quantity,
            used_quantity: row.used_quantity,
            unit: row.unit,
            price: row.price,
            total_value: row.total_value,
            location: row.location,
            min_quantity: row.min_quantity,
            image_url: (!row.image_url.is_empty()).then_some(row.image_url),
            active: row.active != 0,
            created_at: row.created_at,
            updated_at: row.updated_at,
        }
    }
}

impl From<&InventoryItem> for ItemRow {
    fn from(item: &InventoryItem) -> Self {
        ItemRow {
            id: item.id.clone(),
            user_id: item.user_id.clone(),
            name: item.name.clone(),
            description: item.description.clone(),
            category: item.category.clone(),
            sku: item.sku.clone(),
            quantity: item.quantity,
            used_quantity: item.used_quantity,
            unit: item.unit.clone(),
            price: item.price,
            total_value: item.total_value,
            location: item.location.clone(),
            min_quantity: item.min_quantity,
            image_url: item.image_url.clone().unwrap_or_default(),
            active: item.active as i64,
            created_at: item.created_at.clone(),
            updated_at: item.updated_at.clone(),
        }
    }
}

#[derive(Debug, Clone, FromRow)]
pub struct CategoryRow {
    pub name: String,
}
