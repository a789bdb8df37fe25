//! Backend-agnostic storage facade.
//!
//! [`Storage`] is built once at start-up around exactly one
//! [`StorageBackend`] and never re-selects per call. Rules that must hold
//! no matter where rows live (unique names, quota, non-negative stock)
//! are enforced here rather than in each backend.

pub mod error;
pub mod ids;
pub mod sql;
pub mod types;

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, info, instrument, warn};

use crate::config::StorageConfig;
use crate::sheets::{GoogleSheets, MemorySheets, SheetsStore};
use error::{StoreError, StoreResult};
use ids::{Clock, SystemClock};
use sql::SqlStore;
use types::{
    Category, DeleteOutcome, InventoryItem, InventoryStats, ItemPatch, NewItem, NewUser,
    QuantityAdjustment, User, UserKind, UserPatch,
};

/// Operations every backend provides. Lookups return `Ok(None)` on a
/// miss; only mutations of a missing row are `NotFound`.
#[async_trait]
pub trait StorageBackend: Send + Sync {
    fn name(&self) -> &'static str;

    /// Owners first, then guests.
    async fn find_user_by_id(&self, id: &str) -> StoreResult<Option<User>>;
    async fn find_user_by_username(&self, username: &str) -> StoreResult<Option<User>>;
    async fn find_user_by_email(&self, email: &str) -> StoreResult<Option<User>>;
    /// Owners and admins; guests are listed per owner.
    async fn list_users(&self) -> StoreResult<Vec<User>>;
    async fn create_user(&self, user: NewUser) -> StoreResult<User>;
    async fn update_user(&self, id: &str, patch: UserPatch) -> StoreResult<User>;
    /// Deleting an owner removes its items and guests first, best effort.
    async fn delete_user(&self, id: &str) -> StoreResult<DeleteOutcome>;
    /// Active guests of one owner.
    async fn list_guests(&self, owner_id: &str) -> StoreResult<Vec<User>>;

    /// Active items of one owner.
    async fn list_items(&self, owner_id: &str) -> StoreResult<Vec<InventoryItem>>;
    async fn get_item(&self, id: &str) -> StoreResult<Option<InventoryItem>>;
    async fn create_item(&self, owner_id: &str, item: NewItem) -> StoreResult<InventoryItem>;
    async fn update_item(&self, id: &str, patch: ItemPatch) -> StoreResult<InventoryItem>;
    async fn delete_item(&self, id: &str) -> StoreResult<u64>;
    async fn list_categories(&self, owner_id: &str) -> StoreResult<Vec<Category>>;
    async fn count_items_by_owner(&self) -> StoreResult<HashMap<String, usize>>;

    async fn close(&self);
}

#[derive(Clone)]
pub struct Storage {
    backend: Arc<dyn StorageBackend>,
}

impl Storage {
    pub fn new(backend: Arc<dyn StorageBackend>) -> Self {
        Self { backend }
    }

    /// Opens the configured backend. Failures here abort start-up.
    pub async fn connect(config: &StorageConfig) -> anyhow::Result<Self> {
        let clock: Arc<dyn Clock> = Arc::new(SystemClock);
        let backend: Arc<dyn StorageBackend> = match config {
            StorageConfig::Sql { database_url } => {
                Arc::new(SqlStore::connect(database_url, clock).await?)
            }
            StorageConfig::Sheets {
                spreadsheet_id,
                credentials,
            } => {
                let gateway = GoogleSheets::connect(spreadsheet_id, credentials).await?;
                Arc::new(SheetsStore::new(Arc::new(gateway), clock))
            }
            StorageConfig::Memory => {
                Arc::new(SheetsStore::new(Arc::new(MemorySheets::seeded()), clock))
            }
        };
        info!(backend = backend.name(), "storage ready");
        Ok(Self::new(backend))
    }

    /// In-process grid with a caller-supplied clock.
    pub fn memory(clock: Arc<dyn Clock>) -> Self {
        Self::new(Arc::new(SheetsStore::new(
            Arc::new(MemorySheets::seeded()),
            clock,
        )))
    }

    pub fn backend_name(&self) -> &'static str {
        self.backend.name()
    }

    pub async fn close(&self) {
        self.backend.close().await;
        info!(backend = self.backend.name(), "storage closed");
    }

    // ---- users ----

    /// Drops a guest whose owner is gone. A partial cascade can leave such
    /// rows behind; they are never handed out as accounts.
    async fn live(&self, user: Option<User>) -> StoreResult<Option<User>> {
        let Some(user) = user else {
            return Ok(None);
        };
        if let Some(owner_id) = user.owner_id() {
            if self.backend.find_user_by_id(owner_id).await?.is_none() {
                debug!(user_id = %user.id, %owner_id, "guest of a removed owner skipped");
                return Ok(None);
            }
        }
        Ok(Some(user))
    }

    pub async fn get_user(&self, id: &str) -> StoreResult<User> {
        self.find_user_by_id(id)
            .await?
            .ok_or_else(|| StoreError::not_found(format!("user {id}")))
    }

    pub async fn find_user_by_id(&self, id: &str) -> StoreResult<Option<User>> {
        let user = self.backend.find_user_by_id(id).await?;
        self.live(user).await
    }

    pub async fn find_user_by_username(&self, username: &str) -> StoreResult<Option<User>> {
        let user = self.backend.find_user_by_username(username).await?;
        self.live(user).await
    }

    pub async fn find_user_by_email(&self, email: &str) -> StoreResult<Option<User>> {
        let user = self.backend.find_user_by_email(email).await?;
        self.live(user).await
    }

    pub async fn list_users(&self) -> StoreResult<Vec<User>> {
        self.backend.list_users().await
    }

    async fn ensure_unique(
        &self,
        username: Option<&str>,
        email: Option<&str>,
        except: Option<&str>,
    ) -> StoreResult<()> {
        let other = |u: &User| except != Some(u.id.as_str());
        if let Some(name) = username {
            if self.find_user_by_username(name).await?.is_some_and(|u| other(&u)) {
                return Err(StoreError::Conflict(format!("username {name} is taken")));
            }
        }
        if let Some(email) = email {
            if self.find_user_by_email(email).await?.is_some_and(|u| other(&u)) {
                return Err(StoreError::Conflict(format!("email {email} is taken")));
            }
        }
        Ok(())
    }

    #[instrument(skip(self, user), fields(username = %user.username))]
    pub async fn create_user(&self, user: NewUser) -> StoreResult<User> {
        if user.username.trim().is_empty() || user.email.trim().is_empty() {
            return Err(StoreError::invalid("username and email are required"));
        }
        if let UserKind::Guest { owner_id, .. } = &user.kind {
            let owner = self.get_user(owner_id).await?;
            if owner.is_guest() {
                return Err(StoreError::invalid("guests cannot own guests"));
            }
        }
        self.ensure_unique(Some(&user.username), Some(&user.email), None)
            .await?;
        self.backend.create_user(user).await
    }

    #[instrument(skip(self, patch))]
    pub async fn update_user(&self, id: &str, patch: UserPatch) -> StoreResult<User> {
        self.ensure_unique(patch.username.as_deref(), patch.email.as_deref(), Some(id))
            .await?;
        self.backend.update_user(id, patch).await
    }

    #[instrument(skip(self))]
    pub async fn delete_user(&self, id: &str) -> StoreResult<DeleteOutcome> {
        let outcome = self.backend.delete_user(id).await?;
        if !outcome.is_complete() {
            warn!(
                %id,
                failures = ?outcome.failures,
                "user removed with dependents left behind"
            );
        }
        Ok(outcome)
    }

    /// Empty when the owner no longer exists, whatever dependents a
    /// partial cascade may have left behind.
    pub async fn list_guests_by_owner(&self, owner_id: &str) -> StoreResult<Vec<User>> {
        if self.backend.find_user_by_id(owner_id).await?.is_none() {
            return Ok(Vec::new());
        }
        self.backend.list_guests(owner_id).await
    }

    // ---- inventory ----

    pub async fn get_inventory_by_owner(&self, owner_id: &str) -> StoreResult<Vec<InventoryItem>> {
        if self.backend.find_user_by_id(owner_id).await?.is_none() {
            return Ok(Vec::new());
        }
        self.backend.list_items(owner_id).await
    }

    pub async fn get_item(&self, id: &str) -> StoreResult<InventoryItem> {
        self.backend
            .get_item(id)
            .await?
            .ok_or_else(|| StoreError::not_found(format!("item {id}")))
    }

    #[instrument(skip(self, item))]
    pub async fn create_item(&self, owner_id: &str, item: NewItem) -> StoreResult<InventoryItem> {
        item.validate()?;
        let owner = self.get_user(owner_id).await?;
        if let UserKind::Owner {
            item_limit,
            has_unlimited: false,
            ..
        } = owner.kind
        {
            let used = self.backend.list_items(owner_id).await?.len() as i64;
            if used >= item_limit {
                return Err(StoreError::invalid(format!(
                    "item limit of {item_limit} reached"
                )));
            }
        }
        self.backend.create_item(owner_id, item).await
    }

    #[instrument(skip(self, patch))]
    pub async fn update_item(&self, id: &str, patch: ItemPatch) -> StoreResult<InventoryItem> {
        patch.validate()?;
        self.backend.update_item(id, patch).await
    }

    pub async fn delete_item(&self, id: &str) -> StoreResult<()> {
        match self.backend.delete_item(id).await? {
            0 => Err(StoreError::not_found(format!("item {id}"))),
            _ => Ok(()),
        }
    }

    /// Applies `delta` to the stored quantity. A result below zero is
    /// rejected and nothing is written.
    #[instrument(skip(self))]
    pub async fn adjust_item_quantity(
        &self,
        id: &str,
        delta: f64,
    ) -> StoreResult<QuantityAdjustment> {
        if !delta.is_finite() {
            return Err(StoreError::invalid("delta must be a finite number"));
        }
        let item = self.get_item(id).await?;
        let new_quantity = item.quantity + delta;
        if new_quantity < 0.0 {
            return Err(StoreError::invalid(format!(
                "quantity would become {new_quantity}"
            )));
        }
        let patch = ItemPatch {
            quantity: Some(new_quantity),
            ..Default::default()
        };
        let updated = self.backend.update_item(id, patch).await?;
        Ok(QuantityAdjustment {
            item_id: updated.id,
            old_quantity: item.quantity,
            new_quantity: updated.quantity,
        })
    }

    pub async fn get_stats(&self, owner_id: &str) -> StoreResult<InventoryStats> {
        let items = self.get_inventory_by_owner(owner_id).await?;
        Ok(InventoryStats::from_items(&items))
    }

    pub async fn list_categories(&self, owner_id: &str) -> StoreResult<Vec<Category>> {
        if self.backend.find_user_by_id(owner_id).await?.is_none() {
            return Ok(Vec::new());
        }
        self.backend.list_categories(owner_id).await
    }

    pub async fn count_items_by_owner(&self) -> StoreResult<HashMap<String, usize>> {
        self.backend.count_items_by_owner().await
    }
}
