//! Excel生成（共通ライブラリ）
//!
//! 原価マスタを一覧形式のExcelに書き出す。
//! 1行目が見出し、2行目以降がマスタ項目。一括インポートでそのまま読み戻せる。

use crate::types::MasterItem;
use rust_decimal::prelude::ToPrimitive;
use rust_xlsxwriter::*;

/// マスタ一覧シート名
pub const CATALOG_SHEET_NAME: &str = "master_items";

/// 見出し（インポート側もこの名前で列を探す）
pub const CATALOG_HEADERS: [&str; 6] = ["id", "code", "name", "material_cost", "labor_cost", "total_cost"];

const COLUMN_WIDTHS: [f64; 6] = [8.0, 14.0, 48.0, 16.0, 16.0, 16.0];

/// マスタ一覧をバッファに生成
pub fn generate_catalog_buffer(items: &[MasterItem]) -> Result<Vec<u8>, String> {
    let mut workbook = Workbook::new();

    let header_format = Format::new()
        .set_bold()
        .set_background_color(Color::RGB(0xF5F5F5))
        .set_align(FormatAlign::Center)
        .set_border(FormatBorder::Thin)
        .set_border_color(Color::RGB(0xAAAAAA));

    let money_format = Format::new().set_num_format("#,##0.00");

    let worksheet = workbook.add_worksheet();
    worksheet.set_name(CATALOG_SHEET_NAME)
        .map_err(|e| format!("シート名設定エラー: {}", e))?;

    for (col, width) in COLUMN_WIDTHS.iter().enumerate() {
        worksheet.set_column_width(col as u16, *width)
            .map_err(|e| format!("列幅設定エラー: {}", e))?;
    }

    for (col, header) in CATALOG_HEADERS.iter().enumerate() {
        worksheet.write_string_with_format(0, col as u16, *header, &header_format)
            .map_err(|e| format!("見出し書き込みエラー: {}", e))?;
    }

    for (index, item) in items.iter().enumerate() {
        let row = index as u32 + 1;
        worksheet.write_number(row, 0, item.id as f64)
            .map_err(|e| format!("ID書き込みエラー: {}", e))?;
        worksheet.write_string(row, 1, item.code.as_deref().unwrap_or(""))
            .map_err(|e| format!("コード書き込みエラー: {}", e))?;
        worksheet.write_string(row, 2, &item.name)
            .map_err(|e| format!("品名書き込みエラー: {}", e))?;

        let costs = [item.material_cost, item.labor_cost, item.total_cost];
        for (offset, cost) in costs.iter().enumerate() {
            let value = cost.to_f64().unwrap_or(0.0);
            worksheet.write_number_with_format(row, 3 + offset as u16, value, &money_format)
                .map_err(|e| format!("金額書き込みエラー: {}", e))?;
        }
    }

    worksheet.set_freeze_panes(1, 0)
        .map_err(|e| format!("ウィンドウ枠固定エラー: {}", e))?;

    workbook.save_to_buffer()
        .map_err(|e| format!("Excel保存エラー: {}", e))
}
