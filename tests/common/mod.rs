//! 統合テスト用のフィクスチャ

#![allow(dead_code)]

use boq_cost_common::Decimal;
use boq_cost_rust::config::Config;
use boq_cost_rust::master::{InMemoryMasterStore, NewMasterItem};
use boq_cost_rust::workflow::BoqWorkflow;
use calamine::{open_workbook, Data, Range, Reader, Xlsx};
use rust_xlsxwriter::Workbook;
use std::path::Path;
use std::sync::Arc;

pub const PAINTING: &str = "งานทาสีภายใน";

/// 内装シート（マーカーは5行目、I列が Markup 100%）
///
/// - 6行目: マスタにある項目
/// - 7行目: 合計行
/// - 8行目: マスタに無い項目
/// - 9行目: マスタに無いが費用が入っている項目
pub fn build_boq(path: &Path) {
    let mut workbook = Workbook::new();

    let sheet = workbook.add_worksheet();
    sheet.set_name("Int-Floor1").unwrap();
    sheet.write_string(0, 0, "BOQ งานตกแต่งภายใน").unwrap();
    sheet.write_string(4, 0, "ลำดับ").unwrap();
    sheet.write_string(4, 2, "รายการ").unwrap();
    sheet.write_string(4, 3, "จำนวน").unwrap();
    sheet.write_string(4, 4, "หน่วย").unwrap();
    sheet.write_string(4, 5, "ค่าวัสดุ").unwrap();
    sheet.write_string(4, 6, "ค่าแรง").unwrap();
    sheet.write_string(4, 7, "รวม").unwrap();
    sheet.write_string(4, 8, "Markup 100%").unwrap();

    sheet.write_number(5, 0, 1.0).unwrap();
    sheet.write_string(5, 2, PAINTING).unwrap();
    sheet.write_number(5, 3, 10.0).unwrap();
    sheet.write_string(5, 4, "ตร.ม.").unwrap();

    sheet.write_string(6, 2, "รวมงานทาสี").unwrap();

    sheet.write_number(7, 0, 2.0).unwrap();
    sheet.write_string(7, 2, "งานที่ไม่มีในมาสเตอร์").unwrap();
    sheet.write_number(7, 3, 5.0).unwrap();

    sheet.write_number(8, 0, 3.0).unwrap();
    sheet.write_string(8, 2, "งานเดิม").unwrap();
    sheet.write_number(8, 5, 100.0).unwrap();
    sheet.write_number(8, 6, 50.0).unwrap();
    sheet.write_number(8, 7, 150.0).unwrap();

    let summary = workbook.add_worksheet();
    summary.set_name("Summary").unwrap();
    summary.write_string(0, 0, "ลำดับ").unwrap();

    let notes = workbook.add_worksheet();
    notes.set_name("Notes").unwrap();
    notes.write_string(0, 0, "หมายเหตุ").unwrap();

    workbook.save(path).unwrap();
}

pub fn test_config(root: &Path) -> Config {
    let mut config = Config::default();
    config.storage.upload_dir = root.join("uploads");
    config.storage.output_dir = root.join("output");
    config.storage.database_path = root.join("master.db");
    config.storage.master_workbook = None;
    config
}

pub fn painting_store() -> Arc<InMemoryMasterStore> {
    let store = InMemoryMasterStore::with_items(&[
        NewMasterItem::new(PAINTING, Decimal::from(500), Decimal::from(300)).with_code("INT001"),
        NewMasterItem::new("Door Installation - Wooden", Decimal::from(800), Decimal::from(400)),
    ])
    .expect("store");
    Arc::new(store)
}

pub fn workflow(root: &Path) -> BoqWorkflow {
    BoqWorkflow::new(painting_store(), test_config(root))
}

pub fn read_sheet(path: &Path, sheet: &str) -> Range<Data> {
    let mut workbook: Xlsx<_> = open_workbook(path).expect("open output");
    workbook.worksheet_range(sheet).expect("sheet")
}

/// 1始まりの行・列で数値を読む
pub fn number_at(range: &Range<Data>, row: u32, col: u32) -> Option<f64> {
    match range.get_value((row - 1, col - 1)) {
        Some(Data::Float(v)) => Some(*v),
        Some(Data::Int(v)) => Some(*v as f64),
        _ => None,
    }
}

pub fn text_at(range: &Range<Data>, row: u32, col: u32) -> Option<String> {
    match range.get_value((row - 1, col - 1)) {
        Some(Data::String(s)) => Some(s.clone()),
        _ => None,
    }
}
