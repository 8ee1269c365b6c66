use boq_cost_common::{BoqLineItem, Decimal, SheetLayout};
use serde::{Deserialize, Serialize};

/// BOQ行から読み取った生の値
#[derive(Debug, Clone, PartialEq)]
pub struct RowFields {
    pub row: u32,
    pub code: String,
    /// 説明列・コードへのフォールバック適用後の品名
    pub name: String,
    pub quantity: Option<Decimal>,
    pub material_cost: Option<Decimal>,
    pub labor_cost: Option<Decimal>,
}

/// 照合済みシート
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessedSheet {
    pub layout: SheetLayout,
    pub items: Vec<BoqLineItem>,
    /// 元シートの使用列数（追加マークアップ列の開始位置に使う）
    #[serde(default)]
    pub used_columns: u32,
}

impl ProcessedSheet {
    pub fn matched_items(&self) -> impl Iterator<Item = &BoqLineItem> {
        self.items.iter().filter(|item| item.is_matched())
    }
}
