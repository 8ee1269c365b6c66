//! マスタのスナップショット索引
//!
//! 処理開始時にマスタ全件を読み込み、以降の照合はこの索引だけを参照する。

use crate::matching::{normalize_name, MatchPolicy};
use crate::types::MasterItem;
use std::collections::HashMap;

/// 照合キー → マスタ項目
#[derive(Debug, Clone, Default)]
pub struct MasterCatalog {
    policy: MatchPolicy,
    by_key: HashMap<String, MasterItem>,
}

impl MasterCatalog {
    /// 同じキーが重複した場合は先の項目（id の小さい方）を優先
    pub fn new(items: Vec<MasterItem>, policy: MatchPolicy) -> Self {
        let mut by_key = HashMap::with_capacity(items.len());
        for item in items {
            let key = normalize_name(&item.name, policy);
            if key.is_empty() {
                continue;
            }
            by_key.entry(key).or_insert(item);
        }
        Self { policy, by_key }
    }

    pub fn policy(&self) -> MatchPolicy {
        self.policy
    }

    pub fn len(&self) -> usize {
        self.by_key.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_key.is_empty()
    }

    /// 品名で検索
    pub fn lookup(&self, name: &str) -> Option<&MasterItem> {
        let key = normalize_name(name, self.policy);
        if key.is_empty() {
            return None;
        }
        self.by_key.get(&key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal::Decimal;

    fn catalog(policy: MatchPolicy) -> MasterCatalog {
        MasterCatalog::new(
            vec![
                MasterItem::new(1, Some("INT001".into()), "Painting - Interior Wall", Decimal::from(150), Decimal::from(100)),
                MasterItem::new(2, None, "งานทาสีภายใน", Decimal::from(500), Decimal::from(300)),
                MasterItem::new(3, None, "painting - interior wall", Decimal::from(1), Decimal::from(1)),
            ],
            policy,
        )
    }

    #[test]
    fn test_lookup_case_insensitive() {
        let catalog = catalog(MatchPolicy::Exact);
        let item = catalog.lookup("PAINTING - INTERIOR WALL").unwrap();
        assert_eq!(item.id, 1);
        assert_eq!(catalog.len(), 2);
    }

    #[test]
    fn test_lookup_thai() {
        let catalog = catalog(MatchPolicy::Exact);
        assert_eq!(catalog.lookup(" งานทาสีภายใน ").unwrap().total_cost, Decimal::from(800));
    }

    #[test]
    fn test_lookup_miss() {
        let catalog = catalog(MatchPolicy::Exact);
        assert!(catalog.lookup("Painting Interior Wall").is_none());
        assert!(catalog.lookup("").is_none());
    }

    #[test]
    fn test_normalized_policy_lookup() {
        let catalog = catalog(MatchPolicy::Normalized);
        assert!(catalog.lookup("Painting  -  Interior\u{00A0}Wall").is_some());
        assert_eq!(catalog.policy(), MatchPolicy::Normalized);
    }
}
