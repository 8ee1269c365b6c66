//! BOQ処理の型定義
//!
//! CLIとHTTPサーバーで共有される型:
//! - MasterItem: 原価マスタの1行
//! - BoqLineItem: BOQシート1行の照合結果
//! - SessionSummary: 処理結果の集計

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// 原価マスタ項目
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MasterItem {
    pub id: i64,
    #[serde(default)]
    pub code: Option<String>,
    pub name: String,
    pub material_cost: Decimal,
    pub labor_cost: Decimal,
    /// 常に material_cost + labor_cost
    pub total_cost: Decimal,
}

impl MasterItem {
    /// 合計を材料費+労務費から導出して生成
    ///
    /// 書き込み側で合計の範囲は検証済み。読み込んだ値が範囲外でも panic しない。
    pub fn new(id: i64, code: Option<String>, name: impl Into<String>, material_cost: Decimal, labor_cost: Decimal) -> Self {
        Self {
            id,
            code,
            name: name.into(),
            material_cost,
            labor_cost,
            total_cost: material_cost.saturating_add(labor_cost),
        }
    }
}

/// 照合ステータス
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchStatus {
    Matched,
    Unmatched,
    /// 合計行・セクション見出し（照合対象外）
    SkippedHeader,
}

/// BOQシートの1行
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BoqLineItem {
    /// 行番号（1始まり）
    pub row: u32,
    pub code: String,
    pub name: String,
    pub quantity: Option<Decimal>,
    pub material_cost: Decimal,
    pub labor_cost: Decimal,
    pub total_cost: Decimal,
    pub status: MatchStatus,
    #[serde(default)]
    pub master_id: Option<i64>,
}

impl BoqLineItem {
    /// 未照合・費用ゼロの行
    pub fn unpriced(row: u32, code: String, name: String, quantity: Option<Decimal>, status: MatchStatus) -> Self {
        Self {
            row,
            code,
            name,
            quantity,
            material_cost: Decimal::ZERO,
            labor_cost: Decimal::ZERO,
            total_cost: Decimal::ZERO,
            status,
            master_id: None,
        }
    }

    /// マスタの費用で照合済みの行
    pub fn matched(row: u32, code: String, name: String, quantity: Option<Decimal>, master: &MasterItem) -> Self {
        Self {
            row,
            code,
            name,
            quantity,
            material_cost: master.material_cost,
            labor_cost: master.labor_cost,
            total_cost: master.total_cost,
            status: MatchStatus::Matched,
            master_id: Some(master.id),
        }
    }

    pub fn is_matched(&self) -> bool {
        self.status == MatchStatus::Matched
    }

    /// マークアップ対象（照合済みかつ合計 > 0）
    pub fn is_markup_eligible(&self) -> bool {
        self.is_matched() && self.total_cost > Decimal::ZERO
    }
}

/// 処理対象外になったシート
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SkippedSheet {
    pub sheet: String,
    pub reason: String,
}

/// 処理結果サマリー
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SessionSummary {
    /// 照合対象行（Matched + Unmatched）
    pub total_items: usize,
    pub matched_items: usize,
    pub unmatched_items: usize,
    /// 合計行・見出し行
    pub skipped_rows: usize,
    /// 照合率（%）
    pub match_rate: f64,
    pub sheets_processed: usize,
    #[serde(default)]
    pub sheets_skipped: Vec<SkippedSheet>,
}

impl SessionSummary {
    /// 処理済みシート1枚分を集計
    pub fn record_sheet(&mut self, items: &[BoqLineItem]) {
        self.sheets_processed += 1;
        for item in items {
            match item.status {
                MatchStatus::Matched => self.matched_items += 1,
                MatchStatus::Unmatched => self.unmatched_items += 1,
                MatchStatus::SkippedHeader => self.skipped_rows += 1,
            }
        }
        self.total_items = self.matched_items + self.unmatched_items;
        self.match_rate = if self.total_items > 0 {
            self.matched_items as f64 / self.total_items as f64 * 100.0
        } else {
            0.0
        };
    }

    pub fn record_skipped(&mut self, sheet: impl Into<String>, reason: impl Into<String>) {
        self.sheets_skipped.push(SkippedSheet {
            sheet: sheet.into(),
            reason: reason.into(),
        });
    }
}
