//! メモリ上のマスタ（テスト・一括処理用）

use super::{MasterStore, NewMasterItem};
use crate::error::{BoqError, Result};
use boq_cost_common::MasterItem;
use std::sync::{Mutex, MutexGuard};

#[derive(Default)]
pub struct InMemoryMasterStore {
    state: Mutex<State>,
}

#[derive(Default)]
struct State {
    next_id: i64,
    items: Vec<MasterItem>,
}

impl InMemoryMasterStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// 初期データ付きで生成
    pub fn with_items(items: &[NewMasterItem]) -> Result<Self> {
        let store = Self::new();
        store.upsert_many(items)?;
        Ok(store)
    }

    fn state(&self) -> Result<MutexGuard<'_, State>> {
        self.state
            .lock()
            .map_err(|_| BoqError::DatabaseUnavailable("store lock poisoned".into()))
    }
}

impl State {
    fn allocate_id(&mut self) -> i64 {
        self.next_id += 1;
        self.next_id
    }

    fn position_by_name(&self, name: &str) -> Option<usize> {
        self.items.iter().position(|i| i.name == name)
    }
}

impl MasterStore for InMemoryMasterStore {
    fn list(&self) -> Result<Vec<MasterItem>> {
        Ok(self.state()?.items.clone())
    }

    fn get(&self, id: i64) -> Result<Option<MasterItem>> {
        Ok(self.state()?.items.iter().find(|i| i.id == id).cloned())
    }

    fn create(&self, item: &NewMasterItem) -> Result<MasterItem> {
        item.validate()?;
        let item = item.normalized();
        let mut state = self.state()?;
        if state.position_by_name(&item.name).is_some() {
            return Err(BoqError::InvalidRequest(format!("master item '{}' already exists", item.name)));
        }
        let id = state.allocate_id();
        let master = item.into_master(id);
        state.items.push(master.clone());
        Ok(master)
    }

    fn update(&self, id: i64, item: &NewMasterItem) -> Result<MasterItem> {
        item.validate()?;
        let item = item.normalized();
        let mut state = self.state()?;
        if let Some(pos) = state.position_by_name(&item.name) {
            if state.items[pos].id != id {
                return Err(BoqError::InvalidRequest(format!("master item '{}' already exists", item.name)));
            }
        }
        let slot = state
            .items
            .iter_mut()
            .find(|i| i.id == id)
            .ok_or(BoqError::MasterItemNotFound(id))?;
        *slot = item.into_master(id);
        Ok(slot.clone())
    }

    fn delete(&self, id: i64) -> Result<()> {
        let mut state = self.state()?;
        let before = state.items.len();
        state.items.retain(|i| i.id != id);
        if state.items.len() == before {
            return Err(BoqError::MasterItemNotFound(id));
        }
        Ok(())
    }

    fn upsert_many(&self, items: &[NewMasterItem]) -> Result<usize> {
        for item in items {
            item.validate()?;
        }
        let mut state = self.state()?;
        for item in items.iter().map(NewMasterItem::normalized) {
            match state.position_by_name(&item.name) {
                Some(pos) => {
                    let existing = &state.items[pos];
                    let code = item.code.clone().or_else(|| existing.code.clone());
                    let id = existing.id;
                    state.items[pos] = MasterItem::new(id, code, item.name, item.material_cost, item.labor_cost);
                }
                None => {
                    let id = state.allocate_id();
                    state.items.push(item.into_master(id));
                }
            }
        }
        Ok(items.len())
    }

    fn count(&self) -> Result<usize> {
        Ok(self.state()?.items.len())
    }
}
