//! BOQ行とマスタの照合

pub mod types;

pub use types::{ProcessedSheet, RowFields};

use crate::sheet::CellGrid;
use boq_cost_common::{is_structural_row, BoqLineItem, ColumnMap, LayoutKind, MasterCatalog, MatchStatus, SheetLayout};

/// 1行分の値を読み取る（品名もコードも空なら None）
pub fn read_row<G: CellGrid + ?Sized>(grid: &G, row: u32, kind: LayoutKind, columns: &ColumnMap) -> Option<RowFields> {
    let code = grid.text(row, columns.code);
    let mut name = grid.text(row, columns.name);

    // 設備シートは品名が空（または "-"）なら説明列を使う
    if kind == LayoutKind::System && (name.is_empty() || name == "-") {
        if let Some(description) = columns.description {
            let fallback = grid.text(row, description);
            if !fallback.is_empty() {
                name = fallback;
            }
        }
    }
    if name == "-" {
        name.clear();
    }

    if name.is_empty() && code.is_empty() {
        return None;
    }
    if name.is_empty() {
        name = code.clone();
    }

    Some(RowFields {
        row,
        code,
        name,
        quantity: grid.number(row, columns.quantity),
        material_cost: grid.number(row, columns.material),
        labor_cost: grid.number(row, columns.labor),
    })
}

/// 読み取った行を分類・照合
pub fn match_row(fields: RowFields, catalog: &MasterCatalog) -> BoqLineItem {
    let RowFields { row, code, name, quantity, .. } = fields;

    if is_structural_row(&name) {
        return BoqLineItem::unpriced(row, code, name, quantity, MatchStatus::SkippedHeader);
    }

    match catalog.lookup(&name) {
        Some(master) => BoqLineItem::matched(row, code, name, quantity, master),
        None => BoqLineItem::unpriced(row, code, name, quantity, MatchStatus::Unmatched),
    }
}

/// ヘッダー行より下の全行を照合
pub fn match_sheet<G: CellGrid + ?Sized>(grid: &G, layout: &SheetLayout, catalog: &MasterCatalog) -> Vec<BoqLineItem> {
    let items: Vec<BoqLineItem> = ((layout.header_row + 1)..=grid.max_row())
        .filter_map(|row| read_row(grid, row, layout.kind, &layout.columns))
        .map(|fields| match_row(fields, catalog))
        .collect();

    tracing::debug!(
        sheet = %layout.sheet_name,
        rows = items.len(),
        matched = items.iter().filter(|i| i.is_matched()).count(),
        "sheet matched"
    );
    items
}
