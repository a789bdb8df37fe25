//! Header-driven conversion between raw grid rows and typed field maps.

use std::collections::{BTreeMap, BTreeSet};

use lazy_static::lazy_static;
use regex::Regex;

use super::schema::{ColumnKind, SheetSchema};
use crate::storage::types::ITEM_LIMIT_DEFAULT;

/// A typed cell value.
#[derive(Debug, Clone, PartialEq)]
pub enum Cell {
    Text(String),
    Flag(bool),
    Number(f64),
    Integer(i64),
}

impl Cell {
    pub fn text(s: impl Into<String>) -> Self {
        Cell::Text(s.into())
    }
}

/// A decoded row: typed values keyed by field name, plus the fields that
/// were filled from defaults rather than read from a cell.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Record {
    values: BTreeMap<String, Cell>,
    defaulted: BTreeSet<String>,
}

impl Record {
    pub fn get(&self, field: &str) -> Option<&Cell> {
        self.values.get(field)
    }

    pub fn text(&self, field: &str) -> &str {
        match self.values.get(field) {
            Some(Cell::Text(s)) => s,
            _ => "",
        }
    }

    /// Text with blanks mapped to `None`.
    pub fn opt_text(&self, field: &str) -> Option<String> {
        let s = self.text(field).trim();
        (!s.is_empty()).then(|| s.to_string())
    }

    pub fn flag(&self, field: &str) -> bool {
        match self.values.get(field) {
            Some(Cell::Flag(b)) => *b,
            Some(Cell::Text(s)) => parse_flag(s),
            _ => false,
        }
    }

    pub fn number(&self, field: &str) -> f64 {
        match self.values.get(field) {
            Some(Cell::Number(n)) => *n,
            Some(Cell::Integer(i)) => *i as f64,
            Some(Cell::Text(s)) => parse_number(s),
            _ => 0.0,
        }
    }

    pub fn integer(&self, field: &str) -> i64 {
        match self.values.get(field) {
            Some(Cell::Integer(i)) => *i,
            Some(Cell::Number(n)) => n.trunc() as i64,
            _ => 0,
        }
    }

    pub fn defaulted(&self) -> &BTreeSet<String> {
        &self.defaulted
    }

    pub fn was_defaulted(&self, field: &str) -> bool {
        self.defaulted.contains(field)
    }
}

/// `TRUE`, `ACTIVE` and `1` are true; anything else is false.
pub fn parse_flag(raw: &str) -> bool {
    matches!(raw.trim(), "TRUE" | "ACTIVE" | "1")
}

/// Accepts `,` as decimal separator and reads the leading number of a cell
/// such as `5 pcs`. Input without a leading number, or non-finite, is 0.
pub fn parse_number(raw: &str) -> f64 {
    lazy_static! {
        static ref LEADING_NUMBER: Regex =
            Regex::new(r"^[+-]?(\d+\.?\d*|\.\d+)([eE][+-]?\d+)?").unwrap();
    }
    let normalized = raw.trim().replacen(',', ".", 1);
    match LEADING_NUMBER
        .find(&normalized)
        .and_then(|m| m.as_str().parse::<f64>().ok())
    {
        Some(n) if n.is_finite() => n,
        _ => 0.0,
    }
}

/// Whole-number parse that tolerates a fractional part (`"15.7"` is 15).
pub fn parse_integer(raw: &str) -> Option<i64> {
    let trimmed = raw.trim();
    if let Ok(i) = trimmed.parse::<i64>() {
        return Some(i);
    }
    let n = trimmed.replacen(',', ".", 1).parse::<f64>().ok()?;
    n.is_finite().then(|| n.trunc() as i64)
}

/// Renders a number the way a person would type it: no trailing `.0`.
pub fn format_number(n: f64) -> String {
    if n.fract() == 0.0 && n.abs() < 1e15 {
        format!("{}", n as i64)
    } else {
        format!("{n}")
    }
}

/// Last-resort field name for a header the schema does not declare.
pub fn fallback_field(header: &str) -> String {
    header.trim().to_lowercase().replace('_', "")
}

fn decode_cell(kind: ColumnKind, raw: &str) -> Cell {
    match kind {
        ColumnKind::Text => Cell::Text(raw.to_string()),
        ColumnKind::Flag(_) => Cell::Flag(parse_flag(raw)),
        ColumnKind::Number => Cell::Number(parse_number(raw)),
        ColumnKind::Integer => Cell::Integer(parse_integer(raw).unwrap_or(ITEM_LIMIT_DEFAULT)),
    }
}

/// Decodes one data row against the tab's header row.
///
/// Rows shorter than the header are allowed; missing cells take the
/// column default (recorded in [`Record::defaulted`]) or decode as blank.
/// Schema columns absent from the header are filled the same way.
pub fn decode(schema: &SheetSchema, header: &[String], row: &[String]) -> Record {
    let mut record = Record::default();

    for (i, h) in header.iter().enumerate() {
        let raw = row.get(i).map(String::as_str).unwrap_or("");
        match schema.column_by_header(h) {
            Some(column) => {
                let raw = if raw.trim().is_empty() {
                    match column.default {
                        Some(d) => {
                            record.defaulted.insert(column.field.to_string());
                            d
                        }
                        None => raw,
                    }
                } else {
                    raw
                };
                let cell = match column.kind {
                    ColumnKind::Integer => match parse_integer(raw) {
                        Some(i) => Cell::Integer(i),
                        None => {
                            record.defaulted.insert(column.field.to_string());
                            decode_cell(column.kind, column.default.unwrap_or(""))
                        }
                    },
                    kind => decode_cell(kind, raw),
                };
                record.values.insert(column.field.to_string(), cell);
            }
            None if !h.trim().is_empty() => {
                record
                    .values
                    .insert(fallback_field(h), Cell::Text(raw.to_string()));
            }
            None => {}
        }
    }

    for column in schema.columns {
        if !record.values.contains_key(column.field) {
            let raw = column.default.unwrap_or("");
            if column.default.is_some() {
                record.defaulted.insert(column.field.to_string());
            }
            record
                .values
                .insert(column.field.to_string(), decode_cell(column.kind, raw));
        }
    }

    record
}

/// Field updates keyed by field name.
pub type Patch = BTreeMap<&'static str, Cell>;

fn encode_cell(kind: ColumnKind, cell: &Cell) -> String {
    match (kind, cell) {
        (ColumnKind::Flag(style), Cell::Flag(b)) => style.encode(*b).to_string(),
        (ColumnKind::Flag(style), Cell::Text(s)) => style.encode(parse_flag(s)).to_string(),
        (_, Cell::Flag(b)) => if *b { "TRUE" } else { "FALSE" }.to_string(),
        (_, Cell::Text(s)) => s.clone(),
        (_, Cell::Number(n)) => format_number(*n),
        (_, Cell::Integer(i)) => i.to_string(),
    }
}

/// Builds a row laid out by `header`.
///
/// Columns named in `patch` are encoded from it; every other position
/// keeps the `previous` cell verbatim, or the column default when there is
/// no previous row. Cells past the header are carried over untouched.
pub fn encode(
    schema: &SheetSchema,
    header: &[String],
    patch: &Patch,
    previous: Option<&[String]>,
) -> Vec<String> {
    let width = header.len().max(previous.map_or(0, <[String]>::len));
    (0..width)
        .map(|i| {
            let column = header.get(i).and_then(|h| schema.column_by_header(h));
            let patched = column.and_then(|c| patch.get(c.field).map(|cell| (c, cell)));
            match (patched, previous) {
                (Some((c, cell)), _) => encode_cell(c.kind, cell),
                (None, Some(prev)) => prev.get(i).cloned().unwrap_or_default(),
                (None, None) => column
                    .and_then(|c| c.default)
                    .unwrap_or_default()
                    .to_string(),
            }
        })
        .collect()
}

/// A brand-new row in the schema's own column order.
pub fn encode_new(schema: &SheetSchema, patch: &Patch) -> Vec<String> {
    encode(schema, &schema.headers(), patch, None)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sheets::schema::{GUESTS, INVENTORY, USERS};

    fn strings(cells: &[&str]) -> Vec<String> {
        cells.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn comma_and_dot_decimals_decode_equal() {
        assert_eq!(parse_number("12,50"), parse_number("12.50"));
        assert_eq!(parse_number("12,50"), 12.5);
        assert_eq!(parse_number("abc"), 0.0);
        assert_eq!(parse_number("5 pcs"), 5.0);
        assert_eq!(parse_number(" 12,50 EUR"), 12.5);
        assert_eq!(parse_number("-3"), -3.0);
        assert_eq!(parse_number("pcs 5"), 0.0);
        assert_eq!(parse_number(""), 0.0);
    }

    #[test]
    fn flags_accept_true_active_and_one() {
        assert!(parse_flag("TRUE"));
        assert!(parse_flag("ACTIVE"));
        assert!(parse_flag("1"));
        assert!(!parse_flag("true"));
        assert!(!parse_flag("INACTIVE"));
        assert!(!parse_flag(""));
    }

    #[test]
    fn short_user_row_fills_documented_defaults() {
        let header = USERS.headers();
        let row = strings(&["alice", "hash", "alice@x.com", "U1"]);
        let rec = decode(&USERS, &header, &row);
        assert_eq!(rec.text("username"), "alice");
        assert_eq!(rec.integer("item_limit"), 20);
        assert!(rec.flag("is_active"));
        assert!(!rec.flag("has_unlimited"));
        assert!(rec.was_defaulted("item_limit"));
        assert!(rec.was_defaulted("is_active"));
        assert!(!rec.was_defaulted("username"));
    }

    #[test]
    fn unparsable_item_limit_falls_back() {
        let header = USERS.headers();
        let mut row = vec![String::new(); 12];
        row[11] = "lots".into();
        let rec = decode(&USERS, &header, &row);
        assert_eq!(rec.integer("item_limit"), 20);
        assert!(rec.was_defaulted("item_limit"));

        row[11] = "15".into();
        assert_eq!(decode(&USERS, &header, &row).integer("item_limit"), 15);
    }

    #[test]
    fn unknown_header_uses_fallback_name() {
        let header = strings(&["GUEST_NAME", "FAV_COLOR"]);
        let row = strings(&["bob", "blue"]);
        let rec = decode(&GUESTS, &header, &row);
        assert_eq!(rec.text("username"), "bob");
        assert_eq!(rec.text("favcolor"), "blue");
        assert_eq!(fallback_field("LAST_SEEN_AT"), "lastseenat");
    }

    #[test]
    fn schema_columns_missing_from_header_are_defaulted() {
        let header = strings(&["USER_ID", "GUEST_ID", "GUEST_NAME"]);
        let rec = decode(&GUESTS, &header, &strings(&["U1", "G1", "bob"]));
        assert_eq!(rec.text("permission"), "read-only");
        assert!(rec.was_defaulted("permission"));
        assert!(!rec.flag("is_active"));
    }

    #[test]
    fn item_round_trips_through_codec() {
        let mut patch = Patch::new();
        patch.insert("user_id", Cell::text("U1"));
        patch.insert("name", Cell::text("Widget"));
        patch.insert("category", Cell::text("Tools"));
        patch.insert("quantity", Cell::Number(10.0));
        patch.insert("price", Cell::Number(2.5));
        patch.insert("min_quantity", Cell::Number(3.0));
        patch.insert("id", Cell::text("INV1"));
        patch.insert("active", Cell::Flag(true));

        let row = encode_new(&INVENTORY, &patch);
        assert_eq!(row.len(), 16);
        assert_eq!(row[5], "10");
        assert_eq!(row[8], "2.5");
        assert_eq!(row[7], "units");
        assert_eq!(row[15], "TRUE");

        let rec = decode(&INVENTORY, &INVENTORY.headers(), &row);
        for (field, cell) in &patch {
            assert_eq!(rec.get(field), Some(cell), "field {field}");
        }
    }

    #[test]
    fn merge_keeps_untouched_cells_verbatim() {
        let header = INVENTORY.headers();
        let previous = strings(&[
            "U1", "desc", "Widget", " Tools ", "SKU-01", "5", "0", "pcs", "12,50", "62.50",
            "Shelf A", "2", "INV1", "2024-01-01", "2024-01-01", "TRUE",
        ]);
        let mut patch = Patch::new();
        patch.insert("quantity", Cell::Number(7.0));

        let row = encode(&INVENTORY, &header, &patch, Some(&previous));
        assert_eq!(row[5], "7");
        for i in (0..16).filter(|i| *i != 5) {
            assert_eq!(row[i], previous[i], "column {i}");
        }
    }

    #[test]
    fn flag_columns_use_their_own_spelling() {
        let header = USERS.headers();
        let mut patch = Patch::new();
        patch.insert("is_active", Cell::Flag(false));
        patch.insert("has_unlimited", Cell::Flag(true));
        let row = encode(&USERS, &header, &patch, None);
        assert_eq!(row[8], "INACTIVE");
        assert_eq!(row[5], "TRUE");
    }

    #[test]
    fn trailing_cells_past_header_survive_merge() {
        let header = strings(&["USER_ID", "GUEST_ID"]);
        let previous = strings(&["U1", "G1", "note"]);
        let row = encode(&GUESTS, &header, &Patch::new(), Some(&previous));
        assert_eq!(row, previous);
    }

    #[test]
    fn numbers_format_without_trailing_zero() {
        assert_eq!(format_number(10.0), "10");
        assert_eq!(format_number(2.5), "2.5");
        assert_eq!(format_number(0.0), "0");
    }
}
