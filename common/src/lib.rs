//! BOQ Cost Common Library
//!
//! CLIとHTTPサーバーで共有される型とユーティリティ

pub mod types;
pub mod layout;
pub mod markup;
pub mod matching;
pub mod catalog;
pub mod error;
pub mod export;

pub use types::{BoqLineItem, MasterItem, MatchStatus, SessionSummary, SkippedSheet};
pub use layout::{ColumnMap, LayoutKind, MarkupColumn, SheetLayout, INTERIOR_COLUMNS, SYSTEM_COLUMNS};
pub use markup::{markup_value, parse_markup_header, scale_value, total_cost};
pub use matching::{is_structural_row, normalize_name, MatchPolicy, STRUCTURAL_KEYWORDS};
pub use catalog::MasterCatalog;
pub use error::{Error, Result};
pub use rust_decimal::Decimal;
