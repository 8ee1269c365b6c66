//! ワークブック読み込みとシート解析

pub mod grid;
pub mod locator;

pub use grid::{Cell, CellGrid, MemoryGrid};
pub use locator::{locate, LocatorOptions};

use crate::error::{BoqError, Result};
use calamine::{open_workbook, Data, Range, Reader, Xlsx};
use std::path::Path;

/// 全シートを (シート名, セル範囲) の順序付きリストで読み込む
pub fn read_sheets(path: &Path) -> Result<Vec<(String, Range<Data>)>> {
    if !path.exists() {
        return Err(BoqError::FileNotFound(path.display().to_string()));
    }

    let mut workbook: Xlsx<_> = open_workbook(path)?;
    let mut sheets = Vec::new();
    for name in workbook.sheet_names() {
        let range = workbook.worksheet_range(&name)?;
        sheets.push((name, range));
    }
    Ok(sheets)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_read_missing_workbook() {
        let result = read_sheets(Path::new("/nonexistent/boq_12345.xlsx"));
        assert!(matches!(result, Err(BoqError::FileNotFound(_))));
    }
}
