//! Excelからのマスタ取り込み
//!
//! 2種類の形式を受け付ける:
//! - 一覧形式: 先頭付近に "name" / "material_cost" 等の見出し行がある（エクスポート結果）
//! - BOQ形式: ヘッダーマーカー行があり、内装/設備の列配置で材料費・労務費が入っている

use super::{MasterStore, NewMasterItem};
use crate::error::Result;
use crate::matcher::read_row;
use crate::sheet::{locate, read_sheets, CellGrid, LocatorOptions};
use boq_cost_common::layout::is_summary_sheet;
use boq_cost_common::{is_structural_row, Decimal};
use std::collections::HashMap;
use std::path::Path;

/// 一覧形式の見出しを探す行数
const CATALOG_HEADER_SCAN_ROWS: u32 = 5;

struct CatalogColumns {
    header_row: u32,
    code: Option<u32>,
    name: u32,
    material: Option<u32>,
    labor: Option<u32>,
}

fn find_catalog_columns<G: CellGrid + ?Sized>(grid: &G) -> Option<CatalogColumns> {
    for row in 1..=CATALOG_HEADER_SCAN_ROWS.min(grid.max_row()) {
        let mut columns = CatalogColumns {
            header_row: row,
            code: None,
            name: 0,
            material: None,
            labor: None,
        };
        for col in 1..=grid.max_col() {
            match grid.text(row, col).to_lowercase().as_str() {
                "code" => columns.code = Some(col),
                "name" => columns.name = col,
                "material_cost" | "material" => columns.material = Some(col),
                "labor_cost" | "labor" | "labour" => columns.labor = Some(col),
                _ => {}
            }
        }
        if columns.name > 0 && (columns.material.is_some() || columns.labor.is_some()) {
            return Some(columns);
        }
    }
    None
}

fn read_catalog_rows<G: CellGrid + ?Sized>(grid: &G, columns: &CatalogColumns) -> Vec<NewMasterItem> {
    let cost = |row: u32, col: Option<u32>| col.and_then(|c| grid.number(row, c)).unwrap_or(Decimal::ZERO);

    ((columns.header_row + 1)..=grid.max_row())
        .filter_map(|row| {
            let name = grid.text(row, columns.name);
            if name.is_empty() {
                return None;
            }
            let mut item = NewMasterItem::new(name, cost(row, columns.material), cost(row, columns.labor));
            if let Some(code_col) = columns.code {
                let code = grid.text(row, code_col);
                if !code.is_empty() {
                    item = item.with_code(code);
                }
            }
            Some(item)
        })
        .collect()
}

fn read_boq_rows<G: CellGrid + ?Sized>(grid: &G, sheet_name: &str, options: &LocatorOptions) -> Vec<NewMasterItem> {
    let layout = match locate(grid, sheet_name, options) {
        Ok(layout) => layout,
        Err(_) => {
            tracing::warn!(sheet = sheet_name, "master sheet skipped: no header row");
            return Vec::new();
        }
    };

    ((layout.header_row + 1)..=grid.max_row())
        .filter_map(|row| read_row(grid, row, layout.kind, &layout.columns))
        .filter(|fields| !is_structural_row(&fields.name))
        .map(|fields| {
            let mut item = NewMasterItem::new(
                fields.name,
                fields.material_cost.unwrap_or(Decimal::ZERO),
                fields.labor_cost.unwrap_or(Decimal::ZERO),
            );
            if !fields.code.is_empty() {
                item = item.with_code(fields.code);
            }
            item
        })
        .collect()
}

/// 同名は後勝ち（ただし費用ゼロの行では上書きしない）、負の費用は除外
fn dedupe(items: Vec<NewMasterItem>) -> Vec<NewMasterItem> {
    let mut order: Vec<NewMasterItem> = Vec::new();
    let mut index: HashMap<String, usize> = HashMap::new();

    for item in items {
        if item.validate().is_err() {
            tracing::warn!(name = %item.name, "master row skipped: invalid name or cost");
            continue;
        }
        let key = item.name.trim().to_lowercase();
        match index.get(&key) {
            Some(&pos) => {
                if item.total_cost().is_ok_and(|total| total > Decimal::ZERO) {
                    order[pos] = item;
                }
            }
            None => {
                index.insert(key, order.len());
                order.push(item);
            }
        }
    }
    order
}

/// マスタ用Excelを読み込む
pub fn read_master_workbook(path: &Path, options: &LocatorOptions) -> Result<Vec<NewMasterItem>> {
    let mut items = Vec::new();
    for (sheet_name, range) in read_sheets(path)? {
        if let Some(columns) = find_catalog_columns(&range) {
            items.extend(read_catalog_rows(&range, &columns));
        } else if !is_summary_sheet(&sheet_name) {
            items.extend(read_boq_rows(&range, &sheet_name, options));
        }
    }
    Ok(dedupe(items))
}

/// マスタ用Excelを取り込み、書き込んだ件数を返す
pub fn import_master_workbook(store: &dyn MasterStore, path: &Path, options: &LocatorOptions) -> Result<usize> {
    let items = read_master_workbook(path, options)?;
    let count = store.upsert_many(&items)?;
    tracing::info!(path = %path.display(), count, "master workbook imported");
    Ok(count)
}
