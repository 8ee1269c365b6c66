//! シートレイアウト定義
//!
//! BOQシートは2種類の固定列配置のどちらかに従う:
//! - Interior: 内装工事シート（シート名に "Int" を含む）
//! - System: 電気・空調・消防などの設備シート
//!
//! 列番号はすべて1始まり（A=1）。

use crate::error::{Error, Result};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// 論理フィールド → 列番号
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnMap {
    pub code: u32,
    pub name: u32,
    /// 品名が空のときに参照する説明列
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<u32>,
    pub quantity: u32,
    pub unit: u32,
    pub material: u32,
    pub labor: u32,
    pub total: u32,
}

/// 内装シート: B=コード, C=品名, D=数量, E=単位, F=材料費, G=労務費, H=合計
pub const INTERIOR_COLUMNS: ColumnMap = ColumnMap {
    code: 2,
    name: 3,
    description: None,
    quantity: 4,
    unit: 5,
    material: 6,
    labor: 7,
    total: 8,
};

/// 設備シート: B=コード, C=品名, D=説明, F=単位, G=数量, H=材料費, J=労務費, L=合計
pub const SYSTEM_COLUMNS: ColumnMap = ColumnMap {
    code: 2,
    name: 3,
    description: Some(4),
    quantity: 7,
    unit: 6,
    material: 8,
    labor: 10,
    total: 12,
};

impl ColumnMap {
    /// 0列（存在しない列）を含まないか検証
    pub fn validate(&self) -> Result<()> {
        let fields = [
            ("code", self.code),
            ("name", self.name),
            ("quantity", self.quantity),
            ("unit", self.unit),
            ("material", self.material),
            ("labor", self.labor),
            ("total", self.total),
        ];
        for (field, column) in fields {
            if column == 0 {
                return Err(Error::InvalidLayout(format!("column '{}' must be >= 1", field)));
            }
        }
        if self.description == Some(0) {
            return Err(Error::InvalidLayout("column 'description' must be >= 1".into()));
        }
        Ok(())
    }

    /// フィールド名で列番号を更新（設定API用）
    pub fn set_field(&mut self, field: &str, column: u32) -> Result<()> {
        if column == 0 {
            return Err(Error::InvalidLayout(format!("column '{}' must be >= 1", field)));
        }
        match field {
            "code" => self.code = column,
            "name" => self.name = column,
            "description" => self.description = Some(column),
            "quantity" => self.quantity = column,
            "unit" => self.unit = column,
            "material" | "material_cost" => self.material = column,
            "labor" | "labor_cost" => self.labor = column,
            "total" | "total_cost" => self.total = column,
            other => return Err(Error::InvalidLayout(format!("unknown column field '{}'", other))),
        }
        Ok(())
    }

    /// 材料費・労務費・合計の列
    pub fn cost_columns(&self) -> [u32; 3] {
        [self.material, self.labor, self.total]
    }

    /// 定義済み列の最大値
    pub fn last_column(&self) -> u32 {
        [
            self.code,
            self.name,
            self.description.unwrap_or(0),
            self.quantity,
            self.unit,
            self.material,
            self.labor,
            self.total,
        ]
        .into_iter()
        .max()
        .unwrap_or(0)
    }
}

/// シートの種類
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LayoutKind {
    Interior,
    System,
}

impl LayoutKind {
    /// シート名から種類を判定
    ///
    /// マーカー（通常 "Int"）をそのまま、または大文字化して含めば Interior。
    /// それ以外はすべて System。
    pub fn classify(sheet_name: &str, interior_marker: &str) -> Self {
        if !interior_marker.is_empty()
            && (sheet_name.contains(interior_marker)
                || sheet_name.contains(&interior_marker.to_uppercase()))
        {
            LayoutKind::Interior
        } else {
            LayoutKind::System
        }
    }

    pub fn default_columns(&self) -> ColumnMap {
        match self {
            LayoutKind::Interior => INTERIOR_COLUMNS,
            LayoutKind::System => SYSTEM_COLUMNS,
        }
    }
}

impl std::fmt::Display for LayoutKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LayoutKind::Interior => write!(f, "interior"),
            LayoutKind::System => write!(f, "system"),
        }
    }
}

impl std::str::FromStr for LayoutKind {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "interior" | "int" => Ok(LayoutKind::Interior),
            "system" | "sys" => Ok(LayoutKind::System),
            _ => Err(format!("Unknown layout: {}. Use interior or system", s)),
        }
    }
}

/// 集計シート（シート名に "sum" を含む）は処理しない
pub fn is_summary_sheet(sheet_name: &str) -> bool {
    sheet_name.to_lowercase().contains("sum")
}

/// マークアップ列
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MarkupColumn {
    pub column: u32,
    /// 100 = 2倍
    pub percent: Decimal,
}

/// シートごとの列配置（処理リクエストごとに導出）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SheetLayout {
    pub sheet_name: String,
    pub kind: LayoutKind,
    /// ヘッダー行（1始まり）
    pub header_row: u32,
    pub columns: ColumnMap,
    pub markup_columns: Vec<MarkupColumn>,
}

/// 列番号をExcelの列記号に変換（1 → "A", 28 → "AB"）
pub fn column_letter(mut column: u32) -> String {
    let mut letters = Vec::new();
    while column > 0 {
        let rem = (column - 1) % 26;
        letters.push(b'A' + rem as u8);
        column = (column - 1) / 26;
    }
    letters.reverse();
    String::from_utf8(letters).unwrap_or_default()
}
