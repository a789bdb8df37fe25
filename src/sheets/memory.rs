//! In-process grid implementing the gateway contract.

use std::collections::HashSet;
use std::sync::Mutex;

use async_trait::async_trait;

use super::gateway::{A1Range, Rows, SheetGateway, SpreadsheetMetadata, TabInfo};
use super::schema;
use crate::storage::error::{StoreError, StoreResult};

#[derive(Debug)]
struct Tab {
    sheet_id: i64,
    title: String,
    rows: Rows,
}

#[derive(Debug, Default)]
pub struct MemorySheets {
    tabs: Mutex<Vec<Tab>>,
    failing_deletes: Mutex<HashSet<i64>>,
}

fn is_blank(row: &[String]) -> bool {
    row.iter().all(|c| c.is_empty())
}

fn trim_row(mut row: Vec<String>) -> Vec<String> {
    while row.last().is_some_and(|c| c.is_empty()) {
        row.pop();
    }
    row
}

impl MemorySheets {
    pub fn new() -> Self {
        Self::default()
    }

    /// A document with every known tab and its header row in place.
    pub fn seeded() -> Self {
        let sheets = Self::new();
        for (i, s) in schema::ALL.iter().enumerate() {
            sheets.add_tab(i as i64 * 1000, s.tab, vec![s.headers()]);
        }
        sheets
    }

    pub fn add_tab(&self, sheet_id: i64, title: &str, rows: Rows) {
        self.lock().push(Tab {
            sheet_id,
            title: title.to_string(),
            rows,
        });
    }

    /// Makes every later structural delete on `tab` fail as unavailable.
    pub fn fail_deletes_on(&self, tab: &str) {
        let id = self.lock().iter().find(|t| t.title == tab).map(|t| t.sheet_id);
        if let Some(id) = id {
            self.failing_deletes
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .insert(id);
        }
    }

    /// Raw copy of a tab, header included.
    pub fn snapshot(&self, tab: &str) -> Rows {
        self.lock()
            .iter()
            .find(|t| t.title == tab)
            .map(|t| t.rows.clone())
            .unwrap_or_default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<Tab>> {
        self.tabs.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn with_tab<T>(&self, tab: &str, f: impl FnOnce(&mut Tab) -> T) -> StoreResult<T> {
        let mut tabs = self.lock();
        let found = tabs
            .iter_mut()
            .find(|t| t.title == tab)
            .ok_or_else(|| StoreError::Internal(format!("unable to parse range: {tab}")))?;
        Ok(f(found))
    }
}

fn parse_range(range: &str) -> StoreResult<A1Range> {
    A1Range::parse(range).ok_or_else(|| StoreError::Internal(format!("bad range {range}")))
}

#[async_trait]
impl SheetGateway for MemorySheets {
    async fn read(&self, tab: &str, range: Option<&str>) -> StoreResult<Rows> {
        let area = range.map(parse_range).transpose()?;
        self.with_tab(tab, |t| {
            let mut rows: Rows = match area {
                None => t.rows.clone(),
                Some(a) => {
                    let end = a.row_end.unwrap_or(t.rows.len()).min(t.rows.len());
                    t.rows
                        .get(a.row_start.min(end)..end)
                        .unwrap_or_default()
                        .iter()
                        .map(|r| {
                            let stop = a.col_end.min(r.len());
                            r.get(a.col_start.min(stop)..stop).unwrap_or_default().to_vec()
                        })
                        .collect()
                }
            };
            while rows.last().is_some_and(|r| is_blank(r)) {
                rows.pop();
            }
            rows.into_iter().map(trim_row).collect()
        })
    }

    async fn write(&self, tab: &str, range: &str, rows: Rows) -> StoreResult<()> {
        let area = parse_range(range)?;
        self.with_tab(tab, |t| {
            for (dr, values) in rows.into_iter().enumerate() {
                let r = area.row_start + dr;
                if t.rows.len() <= r {
                    t.rows.resize(r + 1, Vec::new());
                }
                let row = &mut t.rows[r];
                for (dc, value) in values.into_iter().enumerate() {
                    let c = area.col_start + dc;
                    if row.len() <= c {
                        row.resize(c + 1, String::new());
                    }
                    row[c] = value;
                }
            }
        })
    }

    async fn append(&self, tab: &str, rows: Rows) -> StoreResult<()> {
        self.with_tab(tab, |t| {
            let used = t.rows.iter().rposition(|r| !is_blank(r)).map_or(0, |i| i + 1);
            t.rows.truncate(used);
            t.rows.extend(rows);
        })
    }

    async fn clear(&self, tab: &str, range: &str) -> StoreResult<()> {
        let area = parse_range(range)?;
        self.with_tab(tab, |t| {
            let end = area.row_end.unwrap_or(t.rows.len()).min(t.rows.len());
            for row in t.rows.iter_mut().take(end).skip(area.row_start) {
                let stop = area.col_end.min(row.len());
                for cell in row.iter_mut().take(stop).skip(area.col_start) {
                    cell.clear();
                }
            }
        })
    }

    async fn metadata(&self) -> StoreResult<SpreadsheetMetadata> {
        let tabs = self
            .lock()
            .iter()
            .map(|t| TabInfo {
                sheet_id: t.sheet_id,
                title: t.title.clone(),
            })
            .collect();
        Ok(SpreadsheetMetadata { tabs })
    }

    async fn delete_rows(&self, sheet_id: i64, start: usize, end: usize) -> StoreResult<()> {
        let failing = self
            .failing_deletes
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .contains(&sheet_id);
        if failing {
            return Err(StoreError::Unavailable(format!(
                "deleteDimension rejected for sheet {sheet_id}"
            )));
        }
        let mut tabs = self.lock();
        let tab = tabs
            .iter_mut()
            .find(|t| t.sheet_id == sheet_id)
            .ok_or_else(|| StoreError::Internal(format!("no sheet with id {sheet_id}")))?;
        if start >= end || end > tab.rows.len() {
            return Err(StoreError::Internal(format!(
                "row range {start}..{end} out of bounds for {}",
                tab.title
            )));
        }
        tab.rows.drain(start..end);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(cells: &[&str]) -> Vec<String> {
        cells.iter().map(|s| s.to_string()).collect()
    }

    #[tokio::test]
    async fn append_lands_after_last_populated_row() {
        let sheets = MemorySheets::new();
        sheets.add_tab(7, "T", vec![row(&["H1", "H2"]), row(&["a", "b"]), row(&["", ""])]);
        sheets.append("T", vec![row(&["c", "d"])]).await.unwrap();
        let all = sheets.read("T", None).await.unwrap();
        assert_eq!(all, vec![row(&["H1", "H2"]), row(&["a", "b"]), row(&["c", "d"])]);
    }

    #[tokio::test]
    async fn range_read_and_write_address_exact_cells() {
        let sheets = MemorySheets::new();
        sheets.add_tab(7, "T", vec![row(&["H1", "H2", "H3"]), row(&["a", "b", "c"])]);
        sheets.write("T", "A2:C2", vec![row(&["x", "y", "z"])]).await.unwrap();
        assert_eq!(sheets.read("T", Some("B2:C2")).await.unwrap(), vec![row(&["y", "z"])]);
        assert!(sheets.read("T", Some("A9:C9")).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn clear_blanks_but_keeps_the_row() {
        let sheets = MemorySheets::new();
        sheets.add_tab(7, "T", vec![row(&["H"]), row(&["a"]), row(&["b"])]);
        sheets.clear("T", "A2:A2").await.unwrap();
        assert_eq!(sheets.snapshot("T").len(), 3);
        assert_eq!(sheets.read("T", None).await.unwrap()[1], Vec::<String>::new());
    }

    #[tokio::test]
    async fn delete_rows_removes_structurally() {
        let sheets = MemorySheets::new();
        sheets.add_tab(7, "T", vec![row(&["H"]), row(&["a"]), row(&["b"])]);
        sheets.delete_rows(7, 1, 2).await.unwrap();
        assert_eq!(sheets.snapshot("T"), vec![row(&["H"]), row(&["b"])]);
    }

    #[tokio::test]
    async fn injected_delete_failure_is_unavailable() {
        let sheets = MemorySheets::seeded();
        sheets.fail_deletes_on("GUESTS");
        let id = sheets.metadata().await.unwrap().sheet_id("GUESTS").unwrap();
        let err = sheets.delete_rows(id, 0, 1).await.unwrap_err();
        assert!(matches!(err, StoreError::Unavailable(_)));
    }

    #[tokio::test]
    async fn unknown_tab_is_an_error() {
        let sheets = MemorySheets::new();
        assert!(sheets.read("NOPE", None).await.is_err());
    }
}
