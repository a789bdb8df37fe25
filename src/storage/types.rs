use serde::{Deserialize, Serialize, Serializer};

use super::error::{StoreError, StoreResult};

/// Role of a non-guest account.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Admin,
    #[serde(alias = "owner")]
    User,
}

impl Role {
    pub fn as_str(self) -> &'static str {
        match self {
            Role::Admin => "admin",
            Role::User => "user",
        }
    }

    /// `owner`, `user` and anything unrecognised map to [`Role::User`].
    pub fn parse(raw: &str) -> Self {
        match raw.trim() {
            "admin" => Role::Admin,
            _ => Role::User,
        }
    }
}

/// What a guest may do against its owner's inventory.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
pub enum GuestPermission {
    #[default]
    #[serde(rename = "read-only")]
    ReadOnly,
    #[serde(rename = "edit-inv")]
    EditInventory,
    #[serde(rename = "full-access")]
    FullAccess,
}

impl GuestPermission {
    pub fn as_str(self) -> &'static str {
        match self {
            GuestPermission::ReadOnly => "read-only",
            GuestPermission::EditInventory => "edit-inv",
            GuestPermission::FullAccess => "full-access",
        }
    }

    /// Blank or unknown values fall back to read-only.
    pub fn parse(raw: &str) -> Self {
        match raw.trim() {
            "edit-inv" => GuestPermission::EditInventory,
            "full-access" => GuestPermission::FullAccess,
            _ => GuestPermission::ReadOnly,
        }
    }

    pub fn can_edit(self) -> bool {
        matches!(self, GuestPermission::EditInventory | GuestPermission::FullAccess)
    }

    pub fn can_delete(self) -> bool {
        matches!(self, GuestPermission::FullAccess)
    }
}

/// Items an owner may hold before `has_unlimited` is granted.
pub const ITEM_LIMIT_DEFAULT: i64 = 20;

/// The two account shapes. Owners hold their own quota; guests borrow
/// their owner's inventory view.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum UserKind {
    Owner {
        role: Role,
        item_limit: i64,
        has_unlimited: bool,
    },
    Guest {
        owner_id: String,
        permission: GuestPermission,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct User {
    pub id: String,
    pub username: String,
    pub email: String,
    #[serde(skip_serializing)]
    pub password_hash: String,
    pub is_active: bool,
    pub created_at: String,
    pub last_login: Option<String>,
    #[serde(flatten)]
    pub kind: UserKind,
}

impl User {
    pub fn is_guest(&self) -> bool {
        matches!(self.kind, UserKind::Guest { .. })
    }

    pub fn is_admin(&self) -> bool {
        matches!(self.kind, UserKind::Owner { role: Role::Admin, .. })
    }

    /// Role label as the rest of the system spells it.
    pub fn role_name(&self) -> &'static str {
        match &self.kind {
            UserKind::Owner { role, .. } => role.as_str(),
            UserKind::Guest { .. } => "guest",
        }
    }

    pub fn owner_id(&self) -> Option<&str> {
        match &self.kind {
            UserKind::Owner { .. } => None,
            UserKind::Guest { owner_id, .. } => Some(owner_id),
        }
    }

    /// The account whose inventory this user works on.
    pub fn inventory_owner(&self) -> &str {
        self.owner_id().unwrap_or(&self.id)
    }
}

/// Payload for creating an account.
#[derive(Debug, Clone)]
pub struct NewUser {
    pub username: String,
    pub email: String,
    pub password_hash: String,
    pub is_active: bool,
    pub kind: UserKind,
}

/// Partial account update; `None` leaves the stored value untouched.
#[derive(Debug, Clone, Default)]
pub struct UserPatch {
    pub username: Option<String>,
    pub email: Option<String>,
    pub password_hash: Option<String>,
    pub is_active: Option<bool>,
    pub last_login: Option<String>,
    pub role: Option<Role>,
    pub item_limit: Option<i64>,
    pub has_unlimited: Option<bool>,
    pub permission: Option<GuestPermission>,
}

impl UserPatch {
    /// Rejects fields that do not exist on the target account shape.
    pub fn check_applies_to(&self, kind: &UserKind) -> StoreResult<()> {
        match kind {
            UserKind::Owner { .. } if self.permission.is_some() => {
                Err(StoreError::invalid("permission applies to guests only"))
            }
            UserKind::Guest { .. }
                if self.role.is_some() || self.item_limit.is_some() || self.has_unlimited.is_some() =>
            {
                Err(StoreError::invalid("role and quota do not apply to guests"))
            }
            _ => Ok(()),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct InventoryItem {
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
    pub image_url: Option<String>,
    pub active: bool,
    pub created_at: String,
    pub updated_at: String,
}

/// `quantity * price`, rounded to cents.
pub fn total_value(quantity: f64, price: f64) -> f64 {
    (quantity * price * 100.0).round() / 100.0
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct NewItem {
    pub name: String,
    pub description: Option<String>,
    pub category: Option<String>,
    pub sku: Option<String>,
    pub quantity: Option<f64>,
    pub used_quantity: Option<f64>,
    pub unit: Option<String>,
    pub price: Option<f64>,
    pub location: Option<String>,
    pub min_quantity: Option<f64>,
    pub image_url: Option<String>,
}

impl NewItem {
    pub fn validate(&self) -> StoreResult<()> {
        if self.name.trim().is_empty() {
            return Err(StoreError::invalid("item name is required"));
        }
        check_non_negative("quantity", self.quantity)?;
        check_non_negative("price", self.price)?;
        check_non_negative("min_quantity", self.min_quantity)
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ItemPatch {
    pub name: Option<String>,
    pub description: Option<String>,
    pub category: Option<String>,
    pub sku: Option<String>,
    pub quantity: Option<f64>,
    pub used_quantity: Option<f64>,
    pub unit: Option<String>,
    pub price: Option<f64>,
    pub location: Option<String>,
    pub min_quantity: Option<f64>,
    pub image_url: Option<String>,
}

impl ItemPatch {
    pub fn validate(&self) -> StoreResult<()> {
        if matches!(&self.name, Some(n) if n.trim().is_empty()) {
            return Err(StoreError::invalid("item name cannot be blank"));
        }
        check_non_negative("quantity", self.quantity)?;
        check_non_negative("price", self.price)?;
        check_non_negative("min_quantity", self.min_quantity)
    }
}

fn check_non_negative(field: &str, value: Option<f64>) -> StoreResult<()> {
    match value {
        Some(v) if !v.is_finite() || v < 0.0 => {
            Err(StoreError::invalid(format!("{field} must be a non-negative number")))
        }
        _ => Ok(()),
    }
}

/// Category summary for one owner.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct Category {
    pub name: String,
    pub item_count: usize,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct InventoryStats {
    pub total_items: usize,
    #[serde(serialize_with = "as_cents")]
    pub total_value: f64,
    pub low_stock_items: usize,
    pub total_categories: usize,
}

fn as_cents<S: Serializer>(v: &f64, s: S) -> Result<S::Ok, S::Error> {
    s.serialize_str(&format!("{v:.2}"))
}

impl InventoryStats {
    /// Folds a live item set. Low stock means `quantity <= min_quantity`
    /// with a positive threshold.
    pub fn from_items(items: &[InventoryItem]) -> Self {
        let value: f64 = items.iter().map(|i| i.quantity * i.price).sum();
        let low_stock_items = items
            .iter()
            .filter(|i| i.min_quantity > 0.0 && i.quantity <= i.min_quantity)
            .count();
        let total_categories = distinct_categories(items).len();
        Self {
            total_items: items.len(),
            total_value: (value * 100.0).round() / 100.0,
            low_stock_items,
            total_categories,
        }
    }
}

/// Distinct non-empty categories with their item counts, sorted by name.
pub fn distinct_categories(items: &[InventoryItem]) -> Vec<Category> {
    let mut counts = std::collections::BTreeMap::<&str, usize>::new();
    for item in items {
        let name = item.category.trim();
        if !name.is_empty() {
            *counts.entry(name).or_default() += 1;
        }
    }
    counts
        .into_iter()
        .map(|(name, item_count)| Category {
            name: name.to_string(),
            item_count,
        })
        .collect()
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct QuantityAdjustment {
    pub item_id: String,
    pub old_quantity: f64,
    pub new_quantity: f64,
}

/// One dependent deletion that did not go through during a cascade.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct CascadeFailure {
    pub entity: &'static str,
    pub id: String,
    pub error: String,
}

/// Result of a (possibly cascading) delete: `changed` is 0 when the
/// target did not exist.
#[derive(Debug, Clone, Default, Serialize, PartialEq)]
pub struct DeleteOutcome {
    pub changed: u64,
    pub cascaded: u64,
    pub failures: Vec<CascadeFailure>,
}

impl DeleteOutcome {
    pub fn missing() -> Self {
        Self::default()
    }

    pub fn is_complete(&self) -> bool {
        self.failures.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn item(qty: f64, price: f64, min: f64, category: &str) -> InventoryItem {
        InventoryItem {
            id: "INV1".into(),
            user_id: "U1".into(),
            name: "x".into(),
            description: String::new(),
            category: category.into(),
            sku: String::new(),
            quantity: qty,
            used_quantity: 0.0,
            unit: "units".into(),
            price,
            total_value: total_value(qty, price),
            location: String::new(),
            min_quantity: min,
            image_url: None,
            active: true,
            created_at: String::new(),
            updated_at: String::new(),
        }
    }

    #[test]
    fn stats_fold_matches_expected_aggregates() {
        let items = vec![item(5.0, 2.0, 2.0, "Tools"), item(1.0, 10.0, 5.0, "")];
        let stats = InventoryStats::from_items(&items);
        assert_eq!(stats.total_items, 2);
        assert_eq!(stats.total_value, 20.0);
        assert_eq!(stats.low_stock_items, 1);
        assert_eq!(stats.total_categories, 1);

        let json = serde_json::to_value(&stats).unwrap();
        assert_eq!(json["totalValue"], "20.00");
        assert_eq!(json["lowStockItems"], 1);
    }

    #[test]
    fn zero_threshold_is_never_low_stock() {
        let stats = InventoryStats::from_items(&[item(0.0, 1.0, 0.0, "a")]);
        assert_eq!(stats.low_stock_items, 0);
    }

    #[test]
    fn categories_are_distinct_and_counted() {
        let items = vec![
            item(1.0, 1.0, 0.0, "b"),
            item(1.0, 1.0, 0.0, "a"),
            item(1.0, 1.0, 0.0, "b"),
        ];
        let cats = distinct_categories(&items);
        assert_eq!(cats.len(), 2);
        assert_eq!(cats[0].name, "a");
        assert_eq!(cats[1].item_count, 2);
    }

    #[test]
    fn permission_parse_defaults_to_read_only() {
        assert_eq!(GuestPermission::parse(""), GuestPermission::ReadOnly);
        assert_eq!(GuestPermission::parse("edit-inv"), GuestPermission::EditInventory);
        assert!(GuestPermission::FullAccess.can_delete());
        assert!(!GuestPermission::EditInventory.can_delete());
    }

    #[test]
    fn new_item_requires_name_and_non_negative_numbers() {
        let mut payload = NewItem::default();
        assert!(matches!(payload.validate(), Err(StoreError::InvalidArgument(_))));
        payload.name = "Widget".into();
        payload.price = Some(-1.0);
        assert!(matches!(payload.validate(), Err(StoreError::InvalidArgument(_))));
        payload.price = Some(2.5);
        assert!(payload.validate().is_ok());
    }

    #[test]
    fn guest_patch_rejects_owner_only_fields() {
        let guest = UserKind::Guest {
            owner_id: "U1".into(),
            permission: GuestPermission::ReadOnly,
        };
        let patch = UserPatch {
            has_unlimited: Some(true),
            ..Default::default()
        };
        assert!(patch.check_applies_to(&guest).is_err());
    }
}
