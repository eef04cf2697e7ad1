//! Persistence layer: whole-collection record tables.

pub mod libsql_backend;
pub mod memory;
pub mod migrations;
pub mod traits;

pub use libsql_backend::LibSqlRecordStore;
pub use memory::MemoryRecordStore;
pub use traits::{Collection, RecordStore, Row};
