//! BOQ出力
//!
//! いずれも元ブックのコピーに値を書き込むだけで、シート構成や書式は変えない。
//! - 最終BOQ: 照合済み行に材料費・労務費・合計とマークアップ値
//! - マークアップ適用: 照合済み行の費用を (1 + p/100) 倍
//! - 単純マークアップ: 費用列の数値をすべて (1 + p/100) 倍

use super::patch::{patch_workbook, CellWrite, SheetPatch};
use crate::error::Result;
use crate::matcher::{read_row, ProcessedSheet};
use crate::sheet::{read_sheets, CellGrid};
use boq_cost_common::markup::{markup_header_label, markup_value, scale_value};
use boq_cost_common::{Decimal, MatchStatus, SheetLayout};
use serde::Serialize;
use std::path::Path;

/// 最終BOQの書き込み結果
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct FinalReport {
    /// 費用を書き込んだ照合済み行
    pub items_processed: usize,
    /// 未照合行
    pub items_failed: usize,
    pub items_with_zero_cost: usize,
    pub items_with_zero_qty: usize,
    pub markup_values_written: usize,
}

impl FinalReport {
    fn merge(&mut self, other: FinalReport) {
        self.items_processed += other.items_processed;
        self.items_failed += other.items_failed;
        self.items_with_zero_cost += other.items_with_zero_cost;
        self.items_with_zero_qty += other.items_with_zero_qty;
        self.markup_values_written += other.markup_values_written;
    }
}

/// マークアップ出力の書き込み結果
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct MarkupReport {
    pub items_processed: usize,
    pub items_failed: usize,
}

/// 追加マークアップ列の開始位置（使用済み列の右隣）
fn appended_markup_start(sheet: &ProcessedSheet) -> u32 {
    sheet.used_columns.max(sheet.layout.columns.last_column()) + 1
}

/// 1シート分の最終BOQ書き込み内容を組み立てる
///
/// シートに既存のマークアップ列が無く extra_percents が指定されていれば、
/// 使用済み列の右に "Markup {p}%" 列を追加して埋める。
pub fn plan_final_sheet(sheet: &ProcessedSheet, extra_percents: &[Decimal]) -> Result<(SheetPatch, FinalReport)> {
    let layout = &sheet.layout;
    let [material_col, labor_col, total_col] = layout.columns.cost_columns();
    let mut cells = Vec::new();
    let mut report = FinalReport::default();

    let mut markup_columns: Vec<(u32, Decimal)> =
        layout.markup_columns.iter().map(|m| (m.column, m.percent)).collect();
    if markup_columns.is_empty() && !extra_percents.is_empty() {
        let start = appended_markup_start(sheet);
        for (offset, percent) in extra_percents.iter().enumerate() {
            let column = start + offset as u32;
            cells.push(CellWrite::text(layout.header_row, column, markup_header_label(*percent)));
            markup_columns.push((column, *percent));
        }
    }

    for item in &sheet.items {
        match item.status {
            MatchStatus::Unmatched => {
                report.items_failed += 1;
                continue;
            }
            MatchStatus::SkippedHeader => continue,
            MatchStatus::Matched => {}
        }

        cells.push(CellWrite::number(item.row, material_col, item.material_cost));
        cells.push(CellWrite::number(item.row, labor_col, item.labor_cost));
        cells.push(CellWrite::number(item.row, total_col, item.total_cost));
        report.items_processed += 1;

        if item.total_cost.is_zero() {
            report.items_with_zero_cost += 1;
        }
        if item.quantity.map_or(true, |q| q.is_zero()) {
            report.items_with_zero_qty += 1;
        }

        for (column, percent) in &markup_columns {
            if let Some(value) = markup_value(item.total_cost, *percent)? {
                cells.push(CellWrite::number(item.row, *column, value));
                report.markup_values_written += 1;
            }
        }
    }

    let patch = SheetPatch {
        sheet_name: layout.sheet_name.clone(),
        cells,
    };
    Ok((patch, report))
}

/// 最終BOQを書き出す
pub fn write_final_boq(
    source: &Path,
    output: &Path,
    sheets: &[ProcessedSheet],
    extra_percents: &[Decimal],
) -> Result<FinalReport> {
    let mut report = FinalReport::default();
    let mut patches = Vec::with_capacity(sheets.len());
    for sheet in sheets {
        let (patch, sheet_report) = plan_final_sheet(sheet, extra_percents)?;
        report.merge(sheet_report);
        patches.push(patch);
    }

    patch_workbook(source, output, &patches)?;
    tracing::info!(
        output = %output.display(),
        processed = report.items_processed,
        failed = report.items_failed,
        markup = report.markup_values_written,
        "final BOQ written"
    );
    Ok(report)
}

/// 照合済み行の費用に percent を上乗せした内容を組み立てる
pub fn plan_markup_sheet(sheet: &ProcessedSheet, percent: Decimal) -> Result<(SheetPatch, MarkupReport)> {
    let [material_col, labor_col, total_col] = sheet.layout.columns.cost_columns();
    let mut cells = Vec::new();
    let mut report = MarkupReport::default();

    for item in &sheet.items {
        match item.status {
            MatchStatus::Matched => {
                cells.push(CellWrite::number(item.row, material_col, scale_value(item.material_cost, percent)?));
                cells.push(CellWrite::number(item.row, labor_col, scale_value(item.labor_cost, percent)?));
                cells.push(CellWrite::number(item.row, total_col, scale_value(item.total_cost, percent)?));
                report.items_processed += 1;
            }
            MatchStatus::Unmatched => report.items_failed += 1,
            MatchStatus::SkippedHeader => {}
        }
    }

    let patch = SheetPatch {
        sheet_name: sheet.layout.sheet_name.clone(),
        cells,
    };
    Ok((patch, report))
}

/// 照合結果にマークアップを適用して書き出す
pub fn write_markup_applied(
    source: &Path,
    output: &Path,
    sheets: &[ProcessedSheet],
    percent: Decimal,
) -> Result<MarkupReport> {
    let mut report = MarkupReport::default();
    let mut patches = Vec::with_capacity(sheets.len());
    for sheet in sheets {
        let (patch, sheet_report) = plan_markup_sheet(sheet, percent)?;
        report.items_processed += sheet_report.items_processed;
        report.items_failed += sheet_report.items_failed;
        patches.push(patch);
    }

    patch_workbook(source, output, &patches)?;
    tracing::info!(output = %output.display(), %percent, processed = report.items_processed, "markup applied");
    Ok(report)
}

/// 費用列の0でない数値をすべて percent 分増やす
///
/// 品名があるのに費用が1つも無い行は items_failed に数える。
pub fn plan_pure_markup<G: CellGrid + ?Sized>(
    grid: &G,
    layout: &SheetLayout,
    percent: Decimal,
) -> Result<(SheetPatch, MarkupReport)> {
    let mut cells = Vec::new();
    let mut report = MarkupReport::default();

    for row in (layout.header_row + 1)..=grid.max_row() {
        let mut scaled = 0;
        for column in layout.columns.cost_columns() {
            if let Some(value) = grid.number(row, column).filter(|v| !v.is_zero()) {
                cells.push(CellWrite::number(row, column, scale_value(value, percent)?));
                scaled += 1;
            }
        }
        if scaled > 0 {
            report.items_processed += 1;
        } else if read_row(grid, row, layout.kind, &layout.columns).is_some() {
            report.items_failed += 1;
        }
    }

    let patch = SheetPatch {
        sheet_name: layout.sheet_name.clone(),
        cells,
    };
    Ok((patch, report))
}

/// 元ブックの費用列に単純マークアップを掛けて書き出す
pub fn write_pure_markup(
    source: &Path,
    output: &Path,
    layouts: &[SheetLayout],
    percent: Decimal,
) -> Result<MarkupReport> {
    let sheets = read_sheets(source)?;
    let mut report = MarkupReport::default();
    let mut patches = Vec::with_capacity(layouts.len());

    for layout in layouts {
        let Some((_, range)) = sheets.iter().find(|(name, _)| *name == layout.sheet_name) else {
            tracing::warn!(sheet = %layout.sheet_name, "sheet missing from workbook, skipped");
            continue;
        };
        let (patch, sheet_report) = plan_pure_markup(range, layout, percent)?;
        report.items_processed += sheet_report.items_processed;
        report.items_failed += sheet_report.items_failed;
        patches.push(patch);
    }

    patch_workbook(source, output, &patches)?;
    tracing::info!(output = %output.display(), %percent, processed = report.items_processed, "pure markup written");
    Ok(report)
}
