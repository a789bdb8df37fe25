//! Declared tab layouts.
//!
//! Each tab is an ordered list of `(header, field, kind, default)` tuples.
//! Column order here is the physical order new rows are written in.

/// How a boolean column spells its two states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlagStyle {
    TrueFalse,
    ActiveInactive,
}

impl FlagStyle {
    pub fn encode(self, value: bool) -> &'static str {
        match (self, value) {
            (FlagStyle::TrueFalse, true) => "TRUE",
            (FlagStyle::TrueFalse, false) => "FALSE",
            (FlagStyle::ActiveInactive, true) => "ACTIVE",
            (FlagStyle::ActiveInactive, false) => "INACTIVE",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnKind {
    Text,
    Flag(FlagStyle),
    /// Decimal with `.` or `,` separator; unparsable cells read as 0.
    Number,
    /// Whole number; unparsable cells read as the column default.
    Integer,
}

#[derive(Debug, Clone, Copy)]
pub struct Column {
    pub header: &'static str,
    pub field: &'static str,
    pub kind: ColumnKind,
    /// Raw cell text used when the cell is missing or blank.
    pub default: Option<&'static str>,
}

const fn col(header: &'static str, field: &'static str, kind: ColumnKind) -> Column {
    Column {
        header,
        field,
        kind,
        default: None,
    }
}

const fn col_or(
    header: &'static str,
    field: &'static str,
    kind: ColumnKind,
    default: &'static str,
) -> Column {
    Column {
        header,
        field,
        kind,
        default: Some(default),
    }
}

#[derive(Debug)]
pub struct SheetSchema {
    pub tab: &'static str,
    pub version: u32,
    pub columns: &'static [Column],
    /// Field holding the row's own id.
    pub id_field: &'static str,
}

impl SheetSchema {
    pub fn column_by_header(&self, header: &str) -> Option<&Column> {
        self.columns.iter().find(|c| c.header == header.trim())
    }

    pub fn headers(&self) -> Vec<String> {
        self.columns.iter().map(|c| c.header.to_string()).collect()
    }

    pub fn width(&self) -> usize {
        self.columns.len()
    }
}

use ColumnKind::{Flag, Integer, Number, Text};
use FlagStyle::{ActiveInactive, TrueFalse};

pub static USERS: SheetSchema = SheetSchema {
    tab: "USERS",
    version: 3,
    id_field: "id",
    columns: &[
        col("USER_NAME", "username", Text),
        col("PASSCODE", "password", Text),
        col("EMAIL", "email", Text),
        col("USER_ID", "id", Text),
        col_or("INV_USED", "inv_used", Integer, "0"),
        col("USER_UNLIMITID", "has_unlimited", Flag(TrueFalse)),
        col("CREATED", "created_at", Text),
        col("LAST_LOGGED_IN", "last_login", Text),
        col_or("STATUS", "is_active", Flag(ActiveInactive), "ACTIVE"),
        col_or("ROLE", "role", Text, "user"),
        col("OWNER_ID", "owner_id", Text),
        col_or("ITEM_LIMIT", "item_limit", Integer, "20"),
    ],
};

pub static GUESTS: SheetSchema = SheetSchema {
    tab: "GUESTS",
    version: 2,
    id_field: "id",
    columns: &[
        col("USER_ID", "owner_id", Text),
        col("GUEST_ID", "id", Text),
        col("GUEST_NAME", "username", Text),
        col("EMAIL", "email", Text),
        col("PASSCODE", "password", Text),
        col("ADDED_DATE", "created_at", Text),
        col("ACTIVE", "is_active", Flag(TrueFalse)),
        col_or("RANK", "permission", Text, "read-only"),
        col("LAST_LOGGED_IN", "last_login", Text),
    ],
};

pub static INVENTORY: SheetSchema = SheetSchema {
    tab: "INVENTORY",
    version: 2,
    id_field: "id",
    columns: &[
        col("USER_ID", "user_id", Text),
        col("DESCRIPTION", "description", Text),
        col("ITEM_NAME", "name", Text),
        col("CATEGORY", "category", Text),
        col("SKU", "sku", Text),
        col("QUANTITY", "quantity", Number),
        col_or("USED_QUANTITY", "used_quantity", Number, "0"),
        col_or("UNIT", "unit", Text, "units"),
        col("PRICE", "price", Number),
        col("TOTAL_VALUE", "total_value", Number),
        col("LOCATION", "location", Text),
        col("MINIMUM_QUANTITY", "min_quantity", Number),
        col("INV_NUMMER", "id", Text),
        col("DATE_ADDED", "created_at", Text),
        col("DATE_UPDATED", "updated_at", Text),
        col("ACTIVE", "active", Flag(TrueFalse)),
    ],
};

pub static ALL: [&SheetSchema; 3] = [&USERS, &GUESTS, &INVENTORY];

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn layouts_have_expected_widths() {
        assert_eq!(USERS.width(), 12);
        assert_eq!(GUESTS.width(), 9);
        assert_eq!(INVENTORY.width(), 16);
    }

    #[test]
    fn inventory_column_order_is_fixed() {
        let headers = INVENTORY.headers();
        assert_eq!(headers[0], "USER_ID");
        assert_eq!(headers[2], "ITEM_NAME");
        assert_eq!(headers[12], "INV_NUMMER");
        assert_eq!(headers[15], "ACTIVE");
    }

    #[test]
    fn lookup_trims_header_whitespace() {
        let c = USERS.column_by_header(" ITEM_LIMIT ").unwrap();
        assert_eq!(c.field, "item_limit");
        assert!(USERS.column_by_header("NOPE").is_none());
    }
}
