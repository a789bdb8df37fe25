//! Spreadsheet-backed storage: a remote grid of three tabs accessed
//! through a narrow gateway, with all typing done client-side.

pub mod codec;
pub mod gateway;
pub mod google;
pub mod memory;
pub mod repo;
pub mod schema;

pub use google::GoogleSheets;
pub use memory::MemorySheets;
pub use repo::SheetsStore;
