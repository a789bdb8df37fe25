//! Users, guests and inventory on top of the flat grid.
//!
//! Every lookup is a full-tab read followed by a client-side scan. Writes
//! address single rows by their 1-based sheet row number, which a scan
//! records alongside each decoded record.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, info, instrument, warn};

use super::codec::{decode, encode, encode_new, Cell, Patch, Record};
use super::gateway::{row_range, SheetGateway};
use super::schema::{SheetSchema, GUESTS, INVENTORY, USERS};
use crate::storage::error::{StoreError, StoreResult};
use crate::storage::ids::{iso_timestamp, new_id, Clock, IdKind};
use crate::storage::types::{
    distinct_categories, total_value, CascadeFailure, Category, DeleteOutcome, GuestPermission,
    InventoryItem, ItemPatch, NewItem, NewUser, Role, User, UserKind, UserPatch,
};
use crate::storage::StorageBackend;

/// A decoded data row and where it lives.
#[derive(Debug, Clone)]
struct Located {
    row: usize,
    record: Record,
}

#[derive(Debug)]
struct TabScan {
    header: Vec<String>,
    rows: Vec<Located>,
}

impl TabScan {
    fn find(&self, pred: impl Fn(&Record) -> bool) -> Option<&Located> {
        self.rows.iter().find(|l| pred(&l.record))
    }
}

pub struct SheetsStore {
    gateway: Arc<dyn SheetGateway>,
    clock: Arc<dyn Clock>,
}

fn owner_from(rec: &Record) -> Option<User> {
    // Guests are kept only in the guests tab; leftovers here are ignored.
    if rec.text("role").trim() == "guest" || rec.text("id").is_empty() {
        return None;
    }
    Some(User {
        id: rec.text("id").to_string(),
        username: rec.text("username").to_string(),
        email: rec.text("email").to_string(),
        password_hash: rec.text("password").to_string(),
        is_active: rec.flag("is_active"),
        created_at: rec.text("created_at").to_string(),
        last_login: rec.opt_text("last_login"),
        kind: UserKind::Owner {
            role: Role::parse(rec.text("role")),
            item_limit: rec.integer("item_limit"),
            has_unlimited: rec.flag("has_unlimited"),
        },
    })
}

fn guest_from(rec: &Record) -> Option<User> {
    if rec.text("id").is_empty() {
        return None;
    }
    Some(User {
        id: rec.text("id").to_string(),
        username: rec.text("username").to_string(),
        email: rec.text("email").to_string(),
        password_hash: rec.text("password").to_string(),
        is_active: rec.flag("is_active"),
        created_at: rec.text("created_at").to_string(),
        last_login: rec.opt_text("last_login"),
        kind: UserKind::Guest {
            owner_id: rec.text("owner_id").to_string(),
            permission: GuestPermission::parse(rec.text("permission")),
        },
    })
}

fn item_from(rec: &Record) -> InventoryItem {
    let quantity = rec.number("quantity");
    let price = rec.number("price");
    InventoryItem {
        id: rec.text("id").to_string(),
        user_id: rec.text("user_id").to_string(),
        name: rec.text("name").to_string(),
        description: rec.text("description").to_string(),
        category: rec.text("category").to_string(),
        sku: rec.text("sku").to_string(),
        quantity,
        used_quantity: rec.number("used_quantity"),
        unit: rec.text("unit").to_string(),
        price,
        total_value: total_value(quantity, price),
        location: rec.text("location").to_string(),
        min_quantity: rec.number("min_quantity"),
        image_url: None,
        active: rec.flag("active"),
        created_at: rec.text("created_at").to_string(),
        updated_at: rec.text("updated_at").to_string(),
    }
}

fn is_live_item(rec: &Record) -> bool {
    rec.flag("active") && !rec.text("id").is_empty()
}

fn put_text(patch: &mut Patch, field: &'static str, value: &Option<String>) {
    if let Some(v) = value {
        patch.insert(field, Cell::text(v.clone()));
    }
}

fn put_number(patch: &mut Patch, field: &'static str, value: Option<f64>) {
    if let Some(v) = value {
        patch.insert(field, Cell::Number(v));
    }
}

fn user_patch(patch: &UserPatch) -> Patch {
    let mut out = Patch::new();
    put_text(&mut out, "username", &patch.username);
    put_text(&mut out, "email", &patch.email);
    put_text(&mut out, "password", &patch.password_hash);
    put_text(&mut out, "last_login", &patch.last_login);
    if let Some(active) = patch.is_active {
        out.insert("is_active", Cell::Flag(active));
    }
    if let Some(role) = patch.role {
        out.insert("role", Cell::text(role.as_str()));
    }
    if let Some(limit) = patch.item_limit {
        out.insert("item_limit", Cell::Integer(limit));
    }
    if let Some(unlimited) = patch.has_unlimited {
        out.insert("has_unlimited", Cell::Flag(unlimited));
    }
    if let Some(permission) = patch.permission {
        out.insert("permission", Cell::text(permission.as_str()));
    }
    out
}

fn item_patch(patch: &ItemPatch) -> Patch {
    let mut out = Patch::new();
    put_text(&mut out, "name", &patch.name);
    put_text(&mut out, "description", &patch.description);
    put_text(&mut out, "category", &patch.category);
    put_text(&mut out, "sku", &patch.sku);
    put_text(&mut out, "unit", &patch.unit);
    put_text(&mut out, "location", &patch.location);
    put_number(&mut out, "quantity", patch.quantity);
    put_number(&mut out, "used_quantity", patch.used_quantity);
    put_number(&mut out, "price", patch.price);
    put_number(&mut out, "min_quantity", patch.min_quantity);
    out
}

impl SheetsStore {
    pub fn new(gateway: Arc<dyn SheetGateway>, clock: Arc<dyn Clock>) -> Self {
        Self { gateway, clock }
    }

    fn now(&self) -> time::OffsetDateTime {
        self.clock.now()
    }

    async fn scan(&self, schema: &SheetSchema) -> StoreResult<TabScan> {
        let mut data = self.gateway.read(schema.tab, None).await?.into_iter();
        let Some(header) = data.next() else {
            return Ok(TabScan {
                header: schema.headers(),
                rows: Vec::new(),
            });
        };
        let rows = data
            .enumerate()
            .filter(|(_, raw)| raw.iter().any(|c| !c.trim().is_empty()))
            .map(|(i, raw)| {
                let row = i + 2;
                let record = decode(schema, &header, &raw);
                if !record.defaulted().is_empty() {
                    debug!(
                        tab = schema.tab,
                        schema_version = schema.version,
                        row,
                        defaulted = ?record.defaulted(),
                        "row decoded with defaulted columns"
                    );
                }
                Located { row, record }
            })
            .collect();
        Ok(TabScan { header, rows })
    }

    /// Re-reads one row as the merge base, applies the patch built from it
    /// and overwrites only that row. Returns the written cells.
    async fn merge_row(
        &self,
        schema: &SheetSchema,
        header: &[String],
        row: usize,
        id: &str,
        build: impl FnOnce(&Record) -> Patch + Send,
    ) -> StoreResult<Vec<String>> {
        let range = row_range(row, header.len().max(schema.width()));
        let current = self
            .gateway
            .read(schema.tab, Some(&range))
            .await?
            .into_iter()
            .next()
            .unwrap_or_default();
        let base = decode(schema, header, &current);
        if base.text(schema.id_field) != id {
            warn!(tab = schema.tab, row, id, "row moved before update");
            return Err(StoreError::not_found(format!("{} {id}", schema.tab)));
        }

        let patch = build(&base);
        let merged = encode(schema, header, &patch, Some(&current));
        self.gateway
            .write(schema.tab, &range, vec![merged.clone()])
            .await?;
        debug!(tab = schema.tab, row, fields = patch.len(), "row updated");
        Ok(merged)
    }

    async fn delete_row(&self, schema: &SheetSchema, row: usize) -> StoreResult<()> {
        let meta = self.gateway.metadata().await?;
        let sheet_id = meta
            .sheet_id(schema.tab)
            .ok_or_else(|| StoreError::Internal(format!("{} tab missing from metadata", schema.tab)))?;
        self.gateway.delete_rows(sheet_id, row - 1, row).await?;
        debug!(tab = schema.tab, row, "row deleted");
        Ok(())
    }

    /// Deletes every row whose `field` equals `value`, bottom-up so that a
    /// failed delete does not shift the rows still to be removed. Each
    /// delete stands alone; failures are collected, not raised.
    async fn delete_matching(
        &self,
        schema: &SheetSchema,
        field: &str,
        value: &str,
        outcome: &mut DeleteOutcome,
    ) {
        let scan = match self.scan(schema).await {
            Ok(s) => s,
            Err(e) => {
                outcome.failures.push(CascadeFailure {
                    entity: schema.tab,
                    id: format!("{field}={value}"),
                    error: e.to_string(),
                });
                return;
            }
        };
        let mut targets: Vec<&Located> = scan
            .rows
            .iter()
            .filter(|l| l.record.text(field) == value)
            .collect();
        targets.sort_by(|a, b| b.row.cmp(&a.row));

        for target in targets {
            let id = target.record.text(schema.id_field).to_string();
            match self.delete_row(schema, target.row).await {
                Ok(()) => outcome.cascaded += 1,
                Err(e) => {
                    warn!(tab = schema.tab, row = target.row, %id, error = %e, "cascade delete failed");
                    outcome.failures.push(CascadeFailure {
                        entity: schema.tab,
                        id,
                        error: e.to_string(),
                    });
                }
            }
        }
    }

    fn owner_row(&self, user: &NewUser, id: &str, now: &str) -> StoreResult<Vec<String>> {
        let UserKind::Owner {
            role,
            item_limit,
            has_unlimited,
        } = &user.kind
        else {
            return Err(StoreError::Internal("owner row for guest".into()));
        };
        let mut patch = Patch::new();
        patch.insert("username", Cell::text(user.username.clone()));
        patch.insert("password", Cell::text(user.password_hash.clone()));
        patch.insert("email", Cell::text(user.email.clone()));
        patch.insert("id", Cell::text(id));
        patch.insert("inv_used", Cell::Integer(0));
        patch.insert("has_unlimited", Cell::Flag(*has_unlimited));
        patch.insert("created_at", Cell::text(now));
        patch.insert("last_login", Cell::text(""));
        patch.insert("is_active", Cell::Flag(user.is_active));
        patch.insert("role", Cell::text(role.as_str()));
        patch.insert("owner_id", Cell::text(""));
        patch.insert("item_limit", Cell::Integer(*item_limit));
        Ok(encode_new(&USERS, &patch))
    }

    fn guest_row(&self, user: &NewUser, id: &str, now: &str) -> StoreResult<Vec<String>> {
        let UserKind::Guest {
            owner_id,
            permission,
        } = &user.kind
        else {
            return Err(StoreError::Internal("guest row for owner".into()));
        };
        let mut patch = Patch::new();
        patch.insert("owner_id", Cell::text(owner_id.clone()));
        patch.insert("id", Cell::text(id));
        patch.insert("username", Cell::text(user.username.clone()));
        patch.insert("email", Cell::text(user.email.clone()));
        patch.insert("password", Cell::text(user.password_hash.clone()));
        patch.insert("created_at", Cell::text(now));
        patch.insert("is_active", Cell::Flag(user.is_active));
        patch.insert("permission", Cell::text(permission.as_str()));
        patch.insert("last_login", Cell::text(""));
        Ok(encode_new(&GUESTS, &patch))
    }

    async fn find_user(&self, pred: impl Fn(&User) -> bool) -> StoreResult<Option<User>> {
        let owners = self.scan(&USERS).await?;
        if let Some(user) = owners
            .rows
            .iter()
            .filter_map(|l| owner_from(&l.record))
            .find(|u| pred(u))
        {
            return Ok(Some(user));
        }
        let guests = self.scan(&GUESTS).await?;
        Ok(guests
            .rows
            .iter()
            .filter_map(|l| guest_from(&l.record))
            .find(|u| pred(u)))
    }
}

#[async_trait]
impl StorageBackend for SheetsStore {
    fn name(&self) -> &'static str {
        "sheets"
    }

    #[instrument(skip(self))]
    async fn find_user_by_id(&self, id: &str) -> StoreResult<Option<User>> {
        self.find_user(|u| u.id == id).await
    }

    #[instrument(skip(self))]
    async fn find_user_by_username(&self, username: &str) -> StoreResult<Option<User>> {
        self.find_user(|u| u.username == username).await
    }

    #[instrument(skip(self))]
    async fn find_user_by_email(&self, email: &str) -> StoreResult<Option<User>> {
        self.find_user(|u| u.email.eq_ignore_ascii_case(email)).await
    }

    async fn list_users(&self) -> StoreResult<Vec<User>> {
        let scan = self.scan(&USERS).await?;
        Ok(scan.rows.iter().filter_map(|l| owner_from(&l.record)).collect())
    }

    #[instrument(skip(self, user), fields(username = %user.username))]
    async fn create_user(&self, user: NewUser) -> StoreResult<User> {
        let at = self.now();
        let now = iso_timestamp(at);
        let (schema, id, row) = match &user.kind {
            UserKind::Owner { .. } => {
                let id = new_id(IdKind::User, at);
                let row = self.owner_row(&user, &id, &now)?;
                (&USERS, id, row)
            }
            UserKind::Guest { .. } => {
                let id = new_id(IdKind::Guest, at);
                let row = self.guest_row(&user, &id, &now)?;
                (&GUESTS, id, row)
            }
        };
        self.gateway.append(schema.tab, vec![row]).await?;
        info!(tab = schema.tab, %id, "user created");

        Ok(User {
            id,
            username: user.username,
            email: user.email,
            password_hash: user.password_hash,
            is_active: user.is_active,
            created_at: now,
            last_login: None,
            kind: user.kind,
        })
    }

    #[instrument(skip(self, patch))]
    async fn update_user(&self, id: &str, patch: UserPatch) -> StoreResult<User> {
        let owners = self.scan(&USERS).await?;
        if let Some(found) = owners.find(|r| r.text("id") == id && owner_from(r).is_some()) {
            if let Some(existing) = owner_from(&found.record) {
                patch.check_applies_to(&existing.kind)?;
            }
            let cells = self
                .merge_row(&USERS, &owners.header, found.row, id, |_| user_patch(&patch))
                .await?;
            return owner_from(&decode(&USERS, &owners.header, &cells))
                .ok_or_else(|| StoreError::Internal("updated user row unreadable".into()));
        }

        let guests = self.scan(&GUESTS).await?;
        let found = guests
            .find(|r| r.text("id") == id)
            .ok_or_else(|| StoreError::not_found(format!("user {id}")))?;
        if let Some(existing) = guest_from(&found.record) {
            patch.check_applies_to(&existing.kind)?;
        }
        let cells = self
            .merge_row(&GUESTS, &guests.header, found.row, id, |_| user_patch(&patch))
            .await?;
        guest_from(&decode(&GUESTS, &guests.header, &cells))
            .ok_or_else(|| StoreError::Internal("updated guest row unreadable".into()))
    }

    #[instrument(skip(self))]
    async fn delete_user(&self, id: &str) -> StoreResult<DeleteOutcome> {
        let owners = self.scan(&USERS).await?;
        if owners.find(|r| r.text("id") == id).is_some() {
            let mut outcome = DeleteOutcome::default();
            self.delete_matching(&INVENTORY, "user_id", id, &mut outcome).await;
            self.delete_matching(&GUESTS, "owner_id", id, &mut outcome).await;

            // Row numbers in the users tab are untouched by the cascade, but
            // another request may have moved them in the meantime.
            let owners = self.scan(&USERS).await?;
            let Some(found) = owners.find(|r| r.text("id") == id) else {
                return Ok(outcome);
            };
            self.delete_row(&USERS, found.row).await?;
            outcome.changed = 1;
            info!(
                %id,
                cascaded = outcome.cascaded,
                failures = outcome.failures.len(),
                "user deleted"
            );
            return Ok(outcome);
        }

        let guests = self.scan(&GUESTS).await?;
        match guests.find(|r| r.text("id") == id) {
            Some(found) => {
                self.delete_row(&GUESTS, found.row).await?;
                info!(%id, "guest deleted");
                Ok(DeleteOutcome {
                    changed: 1,
                    ..Default::default()
                })
            }
            None => Ok(DeleteOutcome::missing()),
        }
    }

    async fn list_guests(&self, owner_id: &str) -> StoreResult<Vec<User>> {
        let scan = self.scan(&GUESTS).await?;
        Ok(scan
            .rows
            .iter()
            .filter(|l| l.record.text("owner_id") == owner_id && l.record.flag("is_active"))
            .filter_map(|l| guest_from(&l.record))
            .collect())
    }

    async fn list_items(&self, owner_id: &str) -> StoreResult<Vec<InventoryItem>> {
        let scan = self.scan(&INVENTORY).await?;
        Ok(scan
            .rows
            .iter()
            .filter(|l| l.record.text("user_id") == owner_id && is_live_item(&l.record))
            .map(|l| item_from(&l.record))
            .collect())
    }

    async fn get_item(&self, id: &str) -> StoreResult<Option<InventoryItem>> {
        let scan = self.scan(&INVENTORY).await?;
        Ok(scan
            .find(|r| r.text("id") == id && is_live_item(r))
            .map(|l| item_from(&l.record)))
    }

    #[instrument(skip(self, item), fields(name = %item.name))]
    async fn create_item(&self, owner_id: &str, item: NewItem) -> StoreResult<InventoryItem> {
        let at = self.now();
        let now = iso_timestamp(at);
        let id = new_id(IdKind::Item, at);
        let quantity = item.quantity.unwrap_or(0.0);
        let price = item.price.unwrap_or(0.0);

        let mut patch = Patch::new();
        patch.insert("user_id", Cell::text(owner_id));
        patch.insert("description", Cell::text(item.description.unwrap_or_default()));
        patch.insert("name", Cell::text(item.name));
        patch.insert("category", Cell::text(item.category.unwrap_or_default()));
        patch.insert("sku", Cell::text(item.sku.unwrap_or_default()));
        patch.insert("quantity", Cell::Number(quantity));
        patch.insert("used_quantity", Cell::Number(item.used_quantity.unwrap_or(0.0)));
        patch.insert(
            "unit",
            Cell::text(item.unit.filter(|u| !u.trim().is_empty()).unwrap_or_else(|| "units".into())),
        );
        patch.insert("price", Cell::Number(price));
        patch.insert("total_value", Cell::text(format!("{:.2}", quantity * price)));
        patch.insert("location", Cell::text(item.location.unwrap_or_default()));
        patch.insert("min_quantity", Cell::Number(item.min_quantity.unwrap_or(0.0)));
        patch.insert("id", Cell::text(id.clone()));
        patch.insert("created_at", Cell::text(now.clone()));
        patch.insert("updated_at", Cell::text(now));
        patch.insert("active", Cell::Flag(true));

        let row = encode_new(&INVENTORY, &patch);
        self.gateway.append(INVENTORY.tab, vec![row.clone()]).await?;
        info!(%id, owner_id, "item created");
        Ok(item_from(&decode(&INVENTORY, &INVENTORY.headers(), &row)))
    }

    #[instrument(skip(self, patch))]
    async fn update_item(&self, id: &str, patch: ItemPatch) -> StoreResult<InventoryItem> {
        let scan = self.scan(&INVENTORY).await?;
        let found = scan
            .find(|r| r.text("id") == id)
            .ok_or_else(|| StoreError::not_found(format!("item {id}")))?;
        let updated_at = iso_timestamp(self.now());

        let cells = self
            .merge_row(&INVENTORY, &scan.header, found.row, id, |base| {
                let mut out = item_patch(&patch);
                let quantity = patch.quantity.unwrap_or_else(|| base.number("quantity"));
                let price = patch.price.unwrap_or_else(|| base.number("price"));
                out.insert("total_value", Cell::text(format!("{:.2}", quantity * price)));
                out.insert("updated_at", Cell::text(updated_at));
                out
            })
            .await?;
        Ok(item_from(&decode(&INVENTORY, &scan.header, &cells)))
    }

    #[instrument(skip(self))]
    async fn delete_item(&self, id: &str) -> StoreResult<u64> {
        let scan = self.scan(&INVENTORY).await?;
        let Some(found) = scan.find(|r| r.text("id") == id) else {
            return Ok(0);
        };
        self.delete_row(&INVENTORY, found.row).await?;
        info!(%id, "item deleted");
        Ok(1)
    }

    async fn list_categories(&self, owner_id: &str) -> StoreResult<Vec<Category>> {
        let items = self.list_items(owner_id).await?;
        Ok(distinct_categories(&items))
    }

    async fn count_items_by_owner(&self) -> StoreResult<HashMap<String, usize>> {
        let scan = self.scan(&INVENTORY).await?;
        let mut counts = HashMap::new();
        for l in scan.rows.iter().filter(|l| is_live_item(&l.record)) {
            *counts.entry(l.record.text("user_id").to_string()).or_default() += 1;
        }
        Ok(counts)
    }

    async fn close(&self) {
        self.gateway.close().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sheets::memory::MemorySheets;
    use crate::storage::ids::SteppingClock;
    use time::macros::datetime;

    fn store() -> (Arc<MemorySheets>, SheetsStore) {
        let sheets = Arc::new(MemorySheets::seeded());
        let clock = Arc::new(SteppingClock::new(datetime!(2024-03-01 12:00 UTC)));
        (sheets.clone(), SheetsStore::new(sheets, clock))
    }

    fn owner(username: &str) -> NewUser {
        NewUser {
            username: username.into(),
            email: format!("{username}@x.com"),
            password_hash: "hash".into(),
            is_active: true,
            kind: UserKind::Owner {
                role: Role::User,
                item_limit: 20,
                has_unlimited: false,
            },
        }
    }

    fn guest(username: &str, owner_id: &str) -> NewUser {
        NewUser {
            username: username.into(),
            email: format!("{username}@x.com"),
            password_hash: "hash".into(),
            is_active: true,
            kind: UserKind::Guest {
                owner_id: owner_id.into(),
                permission: GuestPermission::ReadOnly,
            },
        }
    }

    fn widget(name: &str) -> NewItem {
        NewItem {
            name: name.into(),
            category: Some("Tools".into()),
            sku: Some("SKU-1".into()),
            location: Some("Shelf A".into()),
            quantity: Some(10.0),
            price: Some(2.5),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn created_owner_row_follows_users_layout() {
        let (sheets, store) = store();
        let alice = store.create_user(owner("alice")).await.unwrap();
        assert!(alice.id.starts_with('U'));

        let rows = sheets.snapshot("USERS");
        assert_eq!(rows.len(), 2);
        let row = &rows[1];
        assert_eq!(row.len(), 12);
        assert_eq!(row[0], "alice");
        assert_eq!(row[3], alice.id);
        assert_eq!(row[5], "FALSE");
        assert_eq!(row[8], "ACTIVE");
        assert_eq!(row[9], "user");
        assert_eq!(row[11], "20");
    }

    #[tokio::test]
    async fn guest_lives_in_guest_tab_and_is_found_after_owners() {
        let (sheets, store) = store();
        let alice = store.create_user(owner("alice")).await.unwrap();
        let bob = store.create_user(guest("bob", &alice.id)).await.unwrap();
        assert!(bob.id.starts_with('G'));
        assert_eq!(sheets.snapshot("USERS").len(), 2);
        assert_eq!(sheets.snapshot("GUESTS")[1][7], "read-only");

        let found = store.find_user_by_username("bob").await.unwrap().unwrap();
        assert_eq!(found.owner_id(), Some(alice.id.as_str()));
        assert_eq!(store.list_guests(&alice.id).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn owner_wins_when_guest_shares_an_id() {
        let (sheets, store) = store();
        sheets
            .append("USERS", vec![vec!["owner".into(), "h".into(), "o@x".into(), "X1".into()]])
            .await
            .unwrap();
        sheets
            .append(
                "GUESTS",
                vec![vec!["X0".into(), "X1".into(), "guest".into(), "g@x".into()]],
            )
            .await
            .unwrap();
        let found = store.find_user_by_id("X1").await.unwrap().unwrap();
        assert_eq!(found.username, "owner");
        assert!(!found.is_guest());
    }

    #[tokio::test]
    async fn legacy_guest_rows_in_users_tab_are_ignored() {
        let (sheets, store) = store();
        let mut row = vec![String::new(); 12];
        row[0] = "ghost".into();
        row[3] = "U9".into();
        row[9] = "guest".into();
        sheets.append("USERS", vec![row]).await.unwrap();
        assert!(store.find_user_by_username("ghost").await.unwrap().is_none());
        assert!(store.list_users().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn update_merges_and_preserves_untouched_columns() {
        let (sheets, store) = store();
        let alice = store.create_user(owner("alice")).await.unwrap();
        let item = store.create_item(&alice.id, widget("Widget")).await.unwrap();
        let before = sheets.snapshot("INVENTORY")[1].clone();

        let updated = store
            .update_item(
                &item.id,
                ItemPatch {
                    quantity: Some(4.0),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(updated.quantity, 4.0);
        assert_eq!(updated.total_value, 10.0);

        let after = &sheets.snapshot("INVENTORY")[1];
        assert_eq!(after[5], "4");
        assert_eq!(after[9], "10.00");
        for col in [0, 1, 2, 3, 4, 6, 7, 8, 10, 11, 12, 13, 15] {
            assert_eq!(after[col], before[col], "column {col}");
        }
        assert_ne!(after[14], before[14], "DATE_UPDATED refreshed");
    }

    #[tokio::test]
    async fn comma_decimal_prices_survive_unrelated_updates() {
        let (sheets, store) = store();
        let mut row = vec![String::new(); 16];
        row[0] = "U1".into();
        row[2] = "Bolt".into();
        row[5] = "2".into();
        row[8] = "12,50".into();
        row[12] = "INV7".into();
        row[15] = "TRUE".into();
        sheets.append("INVENTORY", vec![row]).await.unwrap();

        let items = store.list_items("U1").await.unwrap();
        assert_eq!(items[0].price, 12.5);
        assert_eq!(items[0].total_value, 25.0);

        store
            .update_item(
                "INV7",
                ItemPatch {
                    location: Some("Bin 3".into()),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        let after = &sheets.snapshot("INVENTORY")[1];
        assert_eq!(after[8], "12,50");
        assert_eq!(after[9], "25.00");
        assert_eq!(after[10], "Bin 3");
    }

    #[tokio::test]
    async fn update_of_unknown_item_is_not_found() {
        let (_, store) = store();
        let err = store
            .update_item("INV0", ItemPatch::default())
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::NotFound(_)));
    }

    #[tokio::test]
    async fn inactive_and_foreign_items_are_filtered_out() {
        let (sheets, store) = store();
        let alice = store.create_user(owner("alice")).await.unwrap();
        store.create_item(&alice.id, widget("Mine")).await.unwrap();
        store.create_item("U-other", widget("Theirs")).await.unwrap();
        let mut dead = vec![String::new(); 16];
        dead[0] = alice.id.clone();
        dead[2] = "Old".into();
        dead[12] = "INV1".into();
        dead[15] = "FALSE".into();
        sheets.append("INVENTORY", vec![dead]).await.unwrap();

        let items = store.list_items(&alice.id).await.unwrap();
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].name, "Mine");
        assert!(store.get_item("INV1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn delete_item_removes_the_row_structurally() {
        let (sheets, store) = store();
        let a = store.create_item("U1", widget("A")).await.unwrap();
        let b = store.create_item("U1", widget("B")).await.unwrap();
        assert_eq!(store.delete_item(&a.id).await.unwrap(), 1);
        assert_eq!(store.delete_item(&a.id).await.unwrap(), 0);

        let rows = sheets.snapshot("INVENTORY");
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[1][12], b.id);
    }

    #[tokio::test]
    async fn deleting_owner_cascades_to_items_and_guests() {
        let (sheets, store) = store();
        let alice = store.create_user(owner("alice")).await.unwrap();
        let carol = store.create_user(owner("carol")).await.unwrap();
        store.create_user(guest("bob", &alice.id)).await.unwrap();
        store.create_item(&alice.id, widget("A")).await.unwrap();
        store.create_item(&carol.id, widget("C")).await.unwrap();
        store.create_item(&alice.id, widget("B")).await.unwrap();

        let outcome = store.delete_user(&alice.id).await.unwrap();
        assert_eq!(outcome.changed, 1);
        assert_eq!(outcome.cascaded, 3);
        assert!(outcome.is_complete());

        assert!(store.list_items(&alice.id).await.unwrap().is_empty());
        assert!(store.list_guests(&alice.id).await.unwrap().is_empty());
        assert!(store.find_user_by_username("bob").await.unwrap().is_none());
        assert_eq!(store.list_items(&carol.id).await.unwrap().len(), 1);
        assert_eq!(sheets.snapshot("GUESTS").len(), 1);
    }

    #[tokio::test]
    async fn cascade_continues_past_a_failed_dependent_delete() {
        let (sheets, store) = store();
        let alice = store.create_user(owner("alice")).await.unwrap();
        store.create_user(guest("bob", &alice.id)).await.unwrap();
        store.create_item(&alice.id, widget("A")).await.unwrap();
        sheets.fail_deletes_on("INVENTORY");

        let outcome = store.delete_user(&alice.id).await.unwrap();
        assert_eq!(outcome.changed, 1);
        assert_eq!(outcome.failures.len(), 1);
        assert_eq!(outcome.failures[0].entity, "INVENTORY");
        assert!(store.find_user_by_username("bob").await.unwrap().is_none());
        assert!(store.find_user_by_id(&alice.id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn deleting_a_guest_only_touches_its_row() {
        let (sheets, store) = store();
        let alice = store.create_user(owner("alice")).await.unwrap();
        let bob = store.create_user(guest("bob", &alice.id)).await.unwrap();
        let outcome = store.delete_user(&bob.id).await.unwrap();
        assert_eq!(outcome.changed, 1);
        assert_eq!(sheets.snapshot("USERS").len(), 2);
        assert_eq!(store.delete_user("G0").await.unwrap().changed, 0);
    }

    #[tokio::test]
    async fn guest_update_writes_permission_in_guest_layout() {
        let (sheets, store) = store();
        let alice = store.create_user(owner("alice")).await.unwrap();
        let bob = store.create_user(guest("bob", &alice.id)).await.unwrap();
        let updated = store
            .update_user(
                &bob.id,
                UserPatch {
                    permission: Some(GuestPermission::FullAccess),
                    is_active: Some(false),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert!(!updated.is_active);
        let row = &sheets.snapshot("GUESTS")[1];
        assert_eq!(row[6], "FALSE");
        assert_eq!(row[7], "full-access");
        assert_eq!(row[2], "bob");
    }

    #[tokio::test]
    async fn owner_status_uses_active_inactive_literals() {
        let (sheets, store) = store();
        let alice = store.create_user(owner("alice")).await.unwrap();
        store
            .update_user(
                &alice.id,
                UserPatch {
                    is_active: Some(false),
                    has_unlimited: Some(true),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        let row = &sheets.snapshot("USERS")[1];
        assert_eq!(row[8], "INACTIVE");
        assert_eq!(row[5], "TRUE");
        assert_eq!(row[1], "hash");
    }

    #[tokio::test]
    async fn per_owner_counts_and_categories() {
        let (_, store) = store();
        store.create_item("U1", widget("A")).await.unwrap();
        store.create_item("U1", widget("B")).await.unwrap();
        store.create_item("U2", widget("C")).await.unwrap();
        let counts = store.count_items_by_owner().await.unwrap();
        assert_eq!(counts.get("U1"), Some(&2));
        assert_eq!(counts.get("U2"), Some(&1));
        let cats = store.list_categories("U1").await.unwrap();
        assert_eq!(cats, vec![Category { name: "Tools".into(), item_count: 2 }]);
    }
}
