//! Relational backend: SQLite for the embedded file database, PostgreSQL
//! for a server, both behind one `AnyPool`.

pub mod repo;
pub mod repo_types;

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::Context;
use async_trait::async_trait;
use sqlx::any::AnyPoolOptions;
use sqlx::AnyPool;
use tracing::{info, instrument, warn};

use self::repo_types::{ItemRow, UserRow};
use super::error::{StoreError, StoreResult};
use super::ids::{iso_timestamp, new_id, Clock, IdKind};
use super::types::{
    total_value, CascadeFailure, Category, DeleteOutcome, InventoryItem, ItemPatch, NewItem,
    NewUser, User, UserKind, UserPatch,
};
use super::StorageBackend;

pub struct SqlStore {
    db: AnyPool,
    clock: Arc<dyn Clock>,
}

fn is_in_memory(url: &str) -> bool {
    url.contains(":memory:") || url.contains("mode=memory")
}

/// Creates the parent directory of a `sqlite://` file path.
fn prepare_sqlite_file(url: &str) -> anyhow::Result<()> {
    let Some(rest) = url.strip_prefix("sqlite://") else {
        return Ok(());
    };
    let path = std::path::Path::new(rest.split('?').next().unwrap_or(rest));
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("create database directory {}", parent.display()))?;
    }
    Ok(())
}

impl SqlStore {
    pub fn from_pool(db: AnyPool, clock: Arc<dyn Clock>) -> Self {
        Self { db, clock }
    }

    /// Connects and applies pending migrations.
    pub async fn connect(database_url: &str, clock: Arc<dyn Clock>) -> anyhow::Result<Self> {
        sqlx::any::install_default_drivers();

        let options = if is_in_memory(database_url) {
            // Every connection to `:memory:` is its own database.
            AnyPoolOptions::new()
                .max_connections(1)
                .idle_timeout(None)
                .max_lifetime(None)
        } else {
            prepare_sqlite_file(database_url)?;
            AnyPoolOptions::new().max_connections(10)
        };
        let db = options
            .connect(database_url)
            .await
            .context("connect to database")?;

        let store = Self::from_pool(db, clock);
        store.migrate().await?;
        Ok(store)
    }

    pub async fn migrate(&self) -> anyhow::Result<()> {
        sqlx::migrate!("./migrations")
            .run(&self.db)
            .await
            .context("run database migrations")?;
        info!("database migrations applied");
        Ok(())
    }

    fn stamp(&self) -> (time::OffsetDateTime, String) {
        let at = self.clock.now();
        (at, iso_timestamp(at))
    }

    async fn register_category(&self, owner_id: &str, name: &str) -> StoreResult<()> {
        let name = name.trim();
        if name.is_empty() {
            return Ok(());
        }
        let id = uuid::Uuid::new_v4().to_string();
        let (_, now) = self.stamp();
        repo::register_category(&self.db, &id, owner_id, name, &now).await
    }
}

fn apply_user_patch(user: &mut User, patch: UserPatch) {
    if let Some(v) = patch.username {
        user.username = v;
    }
    if let Some(v) = patch.email {
        user.email = v;
    }
    if let Some(v) = patch.password_hash {
        user.password_hash = v;
    }
    if let Some(v) = patch.is_active {
        user.is_active = v;
    }
    if let Some(v) = patch.last_login {
        user.last_login = Some(v);
    }
    match &mut user.kind {
        UserKind::Owner {
            role,
            item_limit,
            has_unlimited,
        } => {
            if let Some(v) = patch.role {
                *role = v;
            }
            if let Some(v) = patch.item_limit {
                *item_limit = v;
            }
            if let Some(v) = patch.has_unlimited {
                *has_unlimited = v;
            }
        }
        UserKind::Guest { permission, .. } => {
            if let Some(v) = patch.permission {
                *permission = v;
            }
        }
    }
}

fn apply_item_patch(item: &mut InventoryItem, patch: ItemPatch) {
    if let Some(v) = patch.name {
        item.name = v;
    }
    if let Some(v) = patch.description {
        item.description = v;
    }
    if let Some(v) = patch.category {
        item.category = v;
    }
    if let Some(v) = patch.sku {
        item.sku = v;
    }
    if let Some(v) = patch.quantity {
        item.quantity = v;
    }
    if let Some(v) = patch.used_quantity {
        item.used_quantity = v;
    }
    if let Some(v) = patch.unit {
        item.unit = v;
    }
    if let Some(v) = patch.price {
        item.price = v;
    }
    if let Some(v) = patch.location {
        item.location = v;
    }
    if let Some(v) = patch.min_quantity {
        item.min_quantity = v;
    }
    if let Some(v) = patch.image_url {
        item.image_url = (!v.is_empty()).then_some(v);
    }
    item.total_value = total_value(item.quantity, item.price);
}

fn cascade_step(outcome: &mut DeleteOutcome, entity: &'static str, id: &str, step: StoreResult<u64>) {
    match step {
        Ok(n) => outcome.cascaded += n,
        Err(e) => {
            warn!(entity, %id, error = %e, "cascade delete failed");
            outcome.failures.push(CascadeFailure {
                entity,
                id: id.to_string(),
                error: e.to_string(),
            });
        }
    }
}

#[async_trait]
impl StorageBackend for SqlStore {
    fn name(&self) -> &'static str {
        "sql"
    }

    async fn find_user_by_id(&self, id: &str) -> StoreResult<Option<User>> {
        Ok(repo::find_user_by_id(&self.db, id).await?.map(User::from))
    }

    async fn find_user_by_username(&self, username: &str) -> StoreResult<Option<User>> {
        Ok(repo::find_user_by_username(&self.db, username)
            .await?
            .map(User::from))
    }

    async fn find_user_by_email(&self, email: &str) -> StoreResult<Option<User>> {
        Ok(repo::find_user_by_email(&self.db, email).await?.map(User::from))
    }

    async fn list_users(&self) -> StoreResult<Vec<User>> {
        let rows = repo::list_owners(&self.db).await?;
        Ok(rows.into_iter().map(User::from).collect())
    }

    #[instrument(skip(self, user), fields(username = %user.username))]
    async fn create_user(&self, user: NewUser) -> StoreResult<User> {
        let (at, now) = self.stamp();
        let kind = match user.kind {
            UserKind::Owner { .. } => IdKind::User,
            UserKind::Guest { .. } => IdKind::Guest,
        };
        let created = User {
            id: new_id(kind, at),
            username: user.username,
            email: user.email,
            password_hash: user.password_hash,
            is_active: user.is_active,
            created_at: now,
            last_login: None,
            kind: user.kind,
        };
        repo::insert_user(&self.db, &UserRow::from(&created)).await?;
        info!(id = %created.id, "user created");
        Ok(created)
    }

    #[instrument(skip(self, patch))]
    async fn update_user(&self, id: &str, patch: UserPatch) -> StoreResult<User> {
        let mut user: User = repo::find_user_by_id(&self.db, id)
            .await?
            .ok_or_else(|| StoreError::not_found(format!("user {id}")))?
            .into();
        patch.check_applies_to(&user.kind)?;
        apply_user_patch(&mut user, patch);
        if repo::save_user(&self.db, &UserRow::from(&user)).await? == 0 {
            return Err(StoreError::not_found(format!("user {id}")));
        }
        Ok(user)
    }

    #[instrument(skip(self))]
    async fn delete_user(&self, id: &str) -> StoreResult<DeleteOutcome> {
        let Some(row) = repo::find_user_by_id(&self.db, id).await? else {
            return Ok(DeleteOutcome::missing());
        };
        let user = User::from(row);
        let mut outcome = DeleteOutcome::default();

        if !user.is_guest() {
            // Independent statements; no transaction spans the cascade.
            cascade_step(&mut outcome, "inventory_items", id, repo::delete_items_of(&self.db, id).await);
            cascade_step(&mut outcome, "categories", id, repo::delete_categories_of(&self.db, id).await);
            cascade_step(&mut outcome, "guests", id, repo::delete_guests_of(&self.db, id).await);
        }

        outcome.changed = repo::delete_user_row(&self.db, id).await?;
        info!(
            %id,
            cascaded = outcome.cascaded,
            failures = outcome.failures.len(),
            "user deleted"
        );
        Ok(outcome)
    }

    async fn list_guests(&self, owner_id: &str) -> StoreResult<Vec<User>> {
        let rows = repo::list_active_guests(&self.db, owner_id).await?;
        Ok(rows.into_iter().map(User::from).collect())
    }

    async fn list_items(&self, owner_id: &str) -> StoreResult<Vec<InventoryItem>> {
        let rows = repo::list_active_items(&self.db, owner_id).await?;
        Ok(rows.into_iter().map(InventoryItem::from).collect())
    }

    async fn get_item(&self, id: &str) -> StoreResult<Option<InventoryItem>> {
        Ok(repo::find_item(&self.db, id)
            .await?
            .filter(|r| r.active != 0)
            .map(InventoryItem::from))
    }

    #[instrument(skip(self, item), fields(name = %item.name))]
    async fn create_item(&self, owner_id: &str, item: NewItem) -> StoreResult<InventoryItem> {
        let (at, now) = self.stamp();
        let quantity = item.quantity.unwrap_or(0.0);
        let price = item.price.unwrap_or(0.0);
        let created = InventoryItem {
            id: new_id(IdKind::Item, at),
            user_id: owner_id.to_string(),
            name: item.name,
            description: item.description.unwrap_or_default(),
            category: item.category.unwrap_or_default(),
            sku: item.sku.unwrap_or_default(),
            quantity,
            used_quantity: item.used_quantity.unwrap_or(0.0),
            unit: item
                .unit
                .filter(|u| !u.trim().is_empty())
                .unwrap_or_else(|| "units".into()),
            price,
            total_value: total_value(quantity, price),
            location: item.location.unwrap_or_default(),
            min_quantity: item.min_quantity.unwrap_or(0.0),
            image_url: item.image_url.filter(|u| !u.is_empty()),
            active: true,
            created_at: now.clone(),
            updated_at: now,
        };
        repo::insert_item(&self.db, &ItemRow::from(&created)).await?;
        self.register_category(owner_id, &created.category).await?;
        info!(id = %created.id, owner_id, "item created");
        Ok(created)
    }

    #[instrument(skip(self, patch))]
    async fn update_item(&self, id: &str, patch: ItemPatch) -> StoreResult<InventoryItem> {
        let mut item: InventoryItem = repo::find_item(&self.db, id)
            .await?
            .ok_or_else(|| StoreError::not_found(format!("item {id}")))?
            .into();
        apply_item_patch(&mut item, patch);
        item.updated_at = self.stamp().1;

        if repo::save_item(&self.db, &ItemRow::from(&item)).await? == 0 {
            return Err(StoreError::not_found(format!("item {id}")));
        }
        self.register_category(&item.user_id, &item.category).await?;
        Ok(item)
    }

    #[instrument(skip(self))]
    async fn delete_item(&self, id: &str) -> StoreResult<u64> {
        repo::delete_item_row(&self.db, id).await
    }

    async fn list_categories(&self, owner_id: &str) -> StoreResult<Vec<Category>> {
        let names = repo::list_category_names(&self.db, owner_id).await?;
        let items = repo::list_active_items(&self.db, owner_id).await?;
        Ok(names
            .into_iter()
            .map(|c| {
                let item_count = items.iter().filter(|i| i.category.trim() == c.name).count();
                Category {
                    name: c.name,
                    item_count,
                }
            })
            .collect())
    }

    async fn count_items_by_owner(&self) -> StoreResult<HashMap<String, usize>> {
        let mut counts = HashMap::new();
        for owner in repo::active_item_owners(&self.db).await? {
            *counts.entry(owner).or_default() += 1;
        }
        Ok(counts)
    }

    async fn close(&self) {
        self.db.close().await;
    }
}
