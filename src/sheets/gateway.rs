use async_trait::async_trait;
use serde::Deserialize;

use crate::storage::error::StoreResult;

pub type Rows = Vec<Vec<String>>;

/// One tab of the spreadsheet document.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TabInfo {
    pub sheet_id: i64,
    pub title: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SpreadsheetMetadata {
    pub tabs: Vec<TabInfo>,
}

impl SpreadsheetMetadata {
    pub fn sheet_id(&self, tab: &str) -> Option<i64> {
        self.tabs.iter().find(|t| t.title == tab).map(|t| t.sheet_id)
    }
}

/// The only component that talks to the remote grid.
///
/// Ranges are A1 notation relative to `tab` (`A2:L2`); `None` addresses
/// the whole tab. Implementations never retry.
#[async_trait]
pub trait SheetGateway: Send + Sync {
    /// Rows in the range; an empty range is an empty vec, not an error.
    async fn read(&self, tab: &str, range: Option<&str>) -> StoreResult<Rows>;

    /// Overwrites exactly the addressed cells.
    async fn write(&self, tab: &str, range: &str, rows: Rows) -> StoreResult<()>;

    /// Adds rows after the last populated row of the tab.
    async fn append(&self, tab: &str, rows: Rows) -> StoreResult<()>;

    /// Blanks cells without removing rows.
    async fn clear(&self, tab: &str, range: &str) -> StoreResult<()>;

    async fn metadata(&self) -> StoreResult<SpreadsheetMetadata>;

    /// Structurally removes rows `[start, end)` (0-based) of the tab with
    /// the given numeric id.
    async fn delete_rows(&self, sheet_id: i64, start: usize, end: usize) -> StoreResult<()>;

    /// Releases whatever the gateway holds (cached credentials, etc.).
    async fn close(&self) {}
}

/// Column letter for a 1-based column number (`1` → `A`, `27` → `AA`).
pub fn column_letter(mut n: usize) -> String {
    let mut out = Vec::new();
    while n > 0 {
        let rem = (n - 1) % 26;
        out.push(b'A' + rem as u8);
        n = (n - 1) / 26;
    }
    out.reverse();
    String::from_utf8(out).unwrap_or_default()
}

/// `A{row}:{last}{row}` for a 1-based sheet row spanning `width` columns.
pub fn row_range(row: usize, width: usize) -> String {
    format!("A{row}:{}{row}", column_letter(width.max(1)))
}

/// A parsed `A1:B2` style rectangle, 0-based and end-exclusive.
/// Open-ended forms (`A:C`, `A2:L`) leave the row bounds unset.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct A1Range {
    pub col_start: usize,
    pub col_end: usize,
    pub row_start: usize,
    pub row_end: Option<usize>,
}

fn parse_cell_ref(s: &str) -> Option<(usize, Option<usize>)> {
    let split = s.find(|c: char| c.is_ascii_digit()).unwrap_or(s.len());
    let (letters, digits) = s.split_at(split);
    if letters.is_empty() || !letters.chars().all(|c| c.is_ascii_alphabetic()) {
        return None;
    }
    let col = letters
        .to_ascii_uppercase()
        .bytes()
        .fold(0usize, |acc, b| acc * 26 + (b - b'A' + 1) as usize);
    let row = if digits.is_empty() {
        None
    } else {
        Some(digits.parse::<usize>().ok().filter(|r| *r > 0)?)
    };
    Some((col, row))
}

impl A1Range {
    pub fn parse(range: &str) -> Option<Self> {
        let (a, b) = range.split_once(':').unwrap_or((range, range));
        let (c1, r1) = parse_cell_ref(a.trim())?;
        let (c2, r2) = parse_cell_ref(b.trim())?;
        Some(Self {
            col_start: c1 - 1,
            col_end: c2,
            row_start: r1.map_or(0, |r| r - 1),
            row_end: r2,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn column_letters() {
        assert_eq!(column_letter(1), "A");
        assert_eq!(column_letter(12), "L");
        assert_eq!(column_letter(16), "P");
        assert_eq!(column_letter(27), "AA");
    }

    #[test]
    fn row_ranges_span_the_layout() {
        assert_eq!(row_range(2, 12), "A2:L2");
        assert_eq!(row_range(7, 9), "A7:I7");
    }

    #[test]
    fn parses_closed_and_open_ranges() {
        let r = A1Range::parse("A2:L2").unwrap();
        assert_eq!((r.col_start, r.col_end, r.row_start, r.row_end), (0, 12, 1, Some(2)));
        let open = A1Range::parse("A:C").unwrap();
        assert_eq!((open.row_start, open.row_end), (0, None));
        assert!(A1Range::parse("2:3").is_none());
    }

    #[test]
    fn metadata_resolves_sheet_ids_by_title() {
        let meta = SpreadsheetMetadata {
            tabs: vec![TabInfo {
                sheet_id: 42,
                title: "INVENTORY".into(),
            }],
        };
        assert_eq!(meta.sheet_id("INVENTORY"), Some(42));
        assert_eq!(meta.sheet_id("USERS"), None);
    }
}
