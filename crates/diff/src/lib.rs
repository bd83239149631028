//! Semantic spreadsheet diff engine.
//!
//! Compares two keyed tables and emits a three-sheet workbook:
//! rows added in file 2, rows removed from file 1, and side-by-side changed
//! rows with differing cells highlighted. Readers and writers stream row by
//! row; only the `key -> row` maps are held in memory.

pub mod compare;
pub mod convert;
pub mod error;
pub mod export;
pub mod keycol;
pub mod normalize;
pub mod reader;
pub mod sheetname;
mod table;

pub use compare::Artifacts;
pub use convert::{convert_legacy_if_needed, sniff_format, ConverterConfig, SniffedFormat};
pub use error::DiffError;
pub use export::generate_compare_workbook;
