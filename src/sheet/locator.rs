//! ヘッダー行と列配置の特定

use crate::config::{Config, LayoutConfig};
use crate::error::{BoqError, Result};
use crate::sheet::grid::CellGrid;
use boq_cost_common::markup::parse_markup_header;
use boq_cost_common::{LayoutKind, MarkupColumn, SheetLayout};

/// ロケーターの設定値
#[derive(Debug, Clone)]
pub struct LocatorOptions {
    pub header_marker: String,
    pub header_scan_rows: u32,
    pub interior_marker: String,
    pub layouts: LayoutConfig,
}

impl Default for LocatorOptions {
    fn default() -> Self {
        Self::from_config(&Config::default())
    }
}

impl LocatorOptions {
    pub fn from_config(config: &Config) -> Self {
        Self {
            header_marker: config.matching.header_marker.clone(),
            header_scan_rows: config.matching.header_scan_rows,
            interior_marker: config.matching.interior_marker.clone(),
            layouts: config.layouts.clone(),
        }
    }
}

/// A列の先頭 scan_rows 行からマーカーを含む最初の行を探す
pub fn find_header_row<G: CellGrid + ?Sized>(grid: &G, marker: &str, scan_rows: u32) -> Option<u32> {
    let marker = marker.trim();
    if marker.is_empty() {
        return None;
    }
    let last = scan_rows.min(grid.max_row());
    (1..=last).find(|&row| grid.text(row, 1).contains(marker))
}

/// ヘッダー行のうち material 列以降で "markup" を含む列
pub fn discover_markup_columns<G: CellGrid + ?Sized>(grid: &G, header_row: u32, from_col: u32) -> Vec<MarkupColumn> {
    let last = grid.max_col();
    if from_col == 0 || from_col > last {
        return Vec::new();
    }
    (from_col..=last)
        .filter_map(|col| {
            parse_markup_header(&grid.text(header_row, col)).map(|percent| MarkupColumn { column: col, percent })
        })
        .collect()
}

/// シートの列配置を特定
pub fn locate<G: CellGrid + ?Sized>(grid: &G, sheet_name: &str, options: &LocatorOptions) -> Result<SheetLayout> {
    let header_row = find_header_row(grid, &options.header_marker, options.header_scan_rows)
        .ok_or_else(|| BoqError::NoHeaderFound(sheet_name.to_string()))?;

    let kind = LayoutKind::classify(sheet_name, &options.interior_marker);
    let columns = options.layouts.columns_for(kind);
    let markup_columns = discover_markup_columns(grid, header_row, columns.material);

    tracing::debug!(
        sheet = sheet_name,
        header_row,
        layout = %kind,
        markup_columns = markup_columns.len(),
        "sheet located"
    );

    Ok(SheetLayout {
        sheet_name: sheet_name.to_string(),
        kind,
        header_row,
        columns,
        markup_columns,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sheet::grid::MemoryGrid;
    use boq_cost_common::Decimal;

    fn interior_grid(header_row: u32) -> MemoryGrid {
        let mut grid = MemoryGrid::new();
        grid.set_text(1, 1, "BOQ งานตกแต่งภายใน");
        grid.set_text(header_row, 1, "ลำดับ")
            .set_text(header_row, 2, "รหัส")
            .set_text(header_row, 3, "รายการ")
            .set_text(header_row, 6, "ค่าวัสดุ")
            .set_text(header_row, 9, "Markup 100%")
            .set_text(header_row, 10, "markup")
            .set_text(header_row, 11, "หมายเหตุ");
        grid
    }

    #[test]
    fn test_locate_interior() {
        let grid = interior_grid(5);
        let layout = locate(&grid, "Int-1", &LocatorOptions::default()).unwrap();

        assert_eq!(layout.header_row, 5);
        assert_eq!(layout.kind, LayoutKind::Interior);
        assert_eq!(layout.columns.total, 8);
        assert_eq!(
            layout.markup_columns,
            vec![
                MarkupColumn { column: 9, percent: Decimal::from(100) },
                MarkupColumn { column: 10, percent: Decimal::from(100) },
            ]
        );
        assert!(grid.text(layout.header_row, 1).contains("ลำดับ"));
    }

    #[test]
    fn test_locate_system_layout() {
        let grid = interior_grid(7);
        let layout = locate(&grid, "EE", &LocatorOptions::default()).unwrap();
        assert_eq!(layout.kind, LayoutKind::System);
        assert_eq!(layout.columns.material, 8);
        // H列(8)以降のみ対象
        assert_eq!(layout.markup_columns.len(), 2);
    }

    #[test]
    fn test_markup_before_material_column_ignored() {
        let mut grid = interior_grid(5);
        grid.set_text(5, 4, "Markup 50%");
        let layout = locate(&grid, "Int", &LocatorOptions::default()).unwrap();
        assert!(layout.markup_columns.iter().all(|m| m.column >= 6));
    }

    #[test]
    fn test_no_header_found() {
        let mut grid = MemoryGrid::new();
        grid.set_text(1, 1, "No.");
        grid.set_text(25, 1, "ลำดับ");
        let result = locate(&grid, "Int", &LocatorOptions::default());
        assert!(matches!(result, Err(BoqError::NoHeaderFound(name)) if name == "Int"));
    }

    #[test]
    fn test_custom_marker_and_window() {
        let mut grid = MemoryGrid::new();
        grid.set_text(25, 1, "No.");
        let options = LocatorOptions {
            header_marker: "No.".into(),
            header_scan_rows: 30,
            ..LocatorOptions::default()
        };
        assert_eq!(locate(&grid, "FP", &options).unwrap().header_row, 25);
    }
}
