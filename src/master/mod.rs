//! 原価マスタ
//!
//! 照合処理はこのトレイト越しにマスタを参照する。
//! 本番は SQLite、テストや一括処理ではメモリ実装を使う。

pub mod sqlite;
pub mod memory;
pub mod import;
pub mod seed;

pub use sqlite::SqliteMasterStore;
pub use memory::InMemoryMasterStore;

use crate::error::{BoqError, Result};
use boq_cost_common::{markup, Decimal, MasterCatalog, MasterItem, MatchPolicy};
use serde::{Deserialize, Serialize};

/// 登録・更新用のマスタ項目（合計は常に導出）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewMasterItem {
    #[serde(default)]
    pub code: Option<String>,
    pub name: String,
    #[serde(default)]
    pub material_cost: Decimal,
    #[serde(default)]
    pub labor_cost: Decimal,
}

impl NewMasterItem {
    pub fn new(name: impl Into<String>, material_cost: Decimal, labor_cost: Decimal) -> Self {
        Self {
            code: None,
            name: name.into(),
            material_cost,
            labor_cost,
        }
    }

    pub fn with_code(mut self, code: impl Into<String>) -> Self {
        self.code = Some(code.into());
        self
    }

    pub fn total_cost(&self) -> Result<Decimal> {
        markup::total_cost(self.material_cost, self.labor_cost)
            .map_err(|_| BoqError::InvalidRequest("total cost is out of range".into()))
    }

    /// 品名の前後空白を除き、空コードを None にする
    pub fn normalized(&self) -> Self {
        Self {
            code: self
                .code
                .as_deref()
                .map(str::trim)
                .filter(|c| !c.is_empty())
                .map(str::to_string),
            name: self.name.trim().to_string(),
            material_cost: self.material_cost,
            labor_cost: self.labor_cost,
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(BoqError::InvalidRequest("name must not be empty".into()));
        }
        if self.material_cost.is_sign_negative() || self.labor_cost.is_sign_negative() {
            return Err(BoqError::InvalidRequest("costs must be >= 0".into()));
        }
        self.total_cost()?;
        Ok(())
    }

    pub fn into_master(self, id: i64) -> MasterItem {
        MasterItem::new(id, self.code, self.name, self.material_cost, self.labor_cost)
    }
}

/// マスタの保存先
pub trait MasterStore: Send + Sync {
    /// id 昇順で全件
    fn list(&self) -> Result<Vec<MasterItem>>;

    fn get(&self, id: i64) -> Result<Option<MasterItem>>;

    /// 同名が既に存在すれば InvalidRequest
    fn create(&self, item: &NewMasterItem) -> Result<MasterItem>;

    fn update(&self, id: i64, item: &NewMasterItem) -> Result<MasterItem>;

    fn delete(&self, id: i64) -> Result<()>;

    /// 品名をキーに追加または上書きし、処理件数を返す
    fn upsert_many(&self, items: &[NewMasterItem]) -> Result<usize>;

    fn count(&self) -> Result<usize>;

    /// 照合用スナップショット
    fn snapshot(&self, policy: MatchPolicy) -> Result<MasterCatalog> {
        Ok(MasterCatalog::new(self.list()?, policy))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_item_validate() {
        assert!(NewMasterItem::new("Painting", Decimal::from(1), Decimal::ZERO).validate().is_ok());
        assert!(NewMasterItem::new("  ", Decimal::from(1), Decimal::ZERO).validate().is_err());
        assert!(NewMasterItem::new("X", Decimal::from(-1), Decimal::ZERO).validate().is_err());
        assert!(matches!(
            NewMasterItem::new("Huge", Decimal::MAX, Decimal::ONE).validate(),
            Err(BoqError::InvalidRequest(_))
        ));
    }

    #[test]
    fn test_normalized_trims() {
        let item = NewMasterItem::new("  งานทาสี ", Decimal::from(1), Decimal::from(2)).with_code(" ");
        let normalized = item.normalized();
        assert_eq!(normalized.name, "งานทาสี");
        assert_eq!(normalized.code, None);
        assert_eq!(normalized.total_cost().unwrap(), Decimal::from(3));
    }

    #[test]
    fn test_deserialize_defaults_costs() {
        let item: NewMasterItem = serde_json::from_str(r#"{"name": "Door", "material_cost": 1200.5}"#).unwrap();
        assert_eq!(item.material_cost, Decimal::new(12005, 1));
        assert_eq!(item.labor_cost, Decimal::ZERO);
    }
}
