//! SQLite 実装（master_items テーブル1つ）
//!
//! 金額は精度を保つため10進文字列で保存する。
//! 既存DBの INTEGER / REAL 列も読み込める。

use super::{MasterStore, NewMasterItem};
use crate::error::{BoqError, Result};
use boq_cost_common::{Decimal, MasterItem};
use rusqlite::types::ValueRef;
use rusqlite::{params, Connection, ErrorCode, OptionalExtension, Row};
use rust_decimal::prelude::FromPrimitive;
use std::path::Path;
use std::sync::{Mutex, MutexGuard};

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS master_items (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    code TEXT,
    name TEXT NOT NULL UNIQUE,
    material_cost TEXT NOT NULL DEFAULT '0',
    labor_cost TEXT NOT NULL DEFAULT '0',
    total_cost TEXT NOT NULL DEFAULT '0'
);
";

const SELECT_COLUMNS: &str = "SELECT id, code, name, material_cost, labor_cost, total_cost FROM master_items";

pub struct SqliteMasterStore {
    conn: Mutex<Connection>,
}

impl SqliteMasterStore {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let conn = Connection::open(path)?;
        Self::bootstrap(&conn)?;
        Ok(Self { conn: Mutex::new(conn) })
    }

    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        Self::bootstrap(&conn)?;
        Ok(Self { conn: Mutex::new(conn) })
    }

    fn bootstrap(conn: &Connection) -> Result<()> {
        conn.execute_batch(SCHEMA)?;
        Ok(())
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| BoqError::DatabaseUnavailable("connection lock poisoned".into()))
    }

    fn map_row(row: &Row<'_>) -> rusqlite::Result<MasterItem> {
        let material = decimal_at(row, 3)?;
        let labor = decimal_at(row, 4)?;
        Ok(MasterItem::new(row.get(0)?, row.get(1)?, row.get::<_, String>(2)?, material, labor))
    }

    fn fetch(conn: &Connection, id: i64) -> Result<Option<MasterItem>> {
        let item = conn
            .query_row(&format!("{} WHERE id = ?1", SELECT_COLUMNS), params![id], Self::map_row)
            .optional()?;
        Ok(item)
    }
}

/// 金額列を Decimal として読む
fn decimal_at(row: &Row<'_>, index: usize) -> rusqlite::Result<Decimal> {
    let value = match row.get_ref(index)? {
        ValueRef::Null => Decimal::ZERO,
        ValueRef::Integer(i) => Decimal::from(i),
        ValueRef::Real(f) => Decimal::from_f64(f).unwrap_or(Decimal::ZERO),
        ValueRef::Text(bytes) => std::str::from_utf8(bytes)
            .ok()
            .and_then(|s| s.trim().parse::<Decimal>().ok())
            .unwrap_or(Decimal::ZERO),
        ValueRef::Blob(_) => Decimal::ZERO,
    };
    Ok(value)
}

/// UNIQUE制約違反を利用者向けのエラーに変換
fn map_write_error(err: rusqlite::Error, name: &str) -> BoqError {
    match &err {
        rusqlite::Error::SqliteFailure(e, _) if e.code == ErrorCode::ConstraintViolation => {
            BoqError::InvalidRequest(format!("master item '{}' already exists", name))
        }
        _ => BoqError::from(err),
    }
}

impl MasterStore for SqliteMasterStore {
    fn list(&self) -> Result<Vec<MasterItem>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(&format!("{} ORDER BY id ASC", SELECT_COLUMNS))?;
        let rows = stmt.query_map([], Self::map_row)?;
        let items = rows.collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(items)
    }

    fn get(&self, id: i64) -> Result<Option<MasterItem>> {
        let conn = self.conn()?;
        Self::fetch(&conn, id)
    }

    fn create(&self, item: &NewMasterItem) -> Result<MasterItem> {
        item.validate()?;
        let item = item.normalized();
        let total = item.total_cost()?;
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO master_items (code, name, material_cost, labor_cost, total_cost)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                item.code,
                item.name,
                item.material_cost.to_string(),
                item.labor_cost.to_string(),
                total.to_string(),
            ],
        )
        .map_err(|err| map_write_error(err, &item.name))?;
        let id = conn.last_insert_rowid();
        Ok(item.into_master(id))
    }

    fn update(&self, id: i64, item: &NewMasterItem) -> Result<MasterItem> {
        item.validate()?;
        let item = item.normalized();
        let total = item.total_cost()?;
        let conn = self.conn()?;
        let changed = conn
            .execute(
                "UPDATE master_items
                 SET code = ?1, name = ?2, material_cost = ?3, labor_cost = ?4, total_cost = ?5
                 WHERE id = ?6",
                params![
                    item.code,
                    item.name,
                    item.material_cost.to_string(),
                    item.labor_cost.to_string(),
                    total.to_string(),
                    id,
                ],
            )
            .map_err(|err| map_write_error(err, &item.name))?;
        if changed == 0 {
            return Err(BoqError::MasterItemNotFound(id));
        }
        Ok(item.into_master(id))
    }

    fn delete(&self, id: i64) -> Result<()> {
        let conn = self.conn()?;
        let changed = conn.execute("DELETE FROM master_items WHERE id = ?1", params![id])?;
        if changed == 0 {
            return Err(BoqError::MasterItemNotFound(id));
        }
        Ok(())
    }

    fn upsert_many(&self, items: &[NewMasterItem]) -> Result<usize> {
        let rows = items
            .iter()
            .map(|item| {
                item.validate()?;
                let item = item.normalized();
                let total = item.total_cost()?;
                Ok((item, total))
            })
            .collect::<Result<Vec<_>>>()?;

        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        let mut written = 0;
        {
            let mut stmt = tx.prepare(
                "INSERT INTO master_items (code, name, material_cost, labor_cost, total_cost)
                 VALUES (?1, ?2, ?3, ?4, ?5)
                 ON CONFLICT(name) DO UPDATE SET
                    code = COALESCE(excluded.code, master_items.code),
                    material_cost = excluded.material_cost,
                    labor_cost = excluded.labor_cost,
                    total_cost = excluded.total_cost",
            )?;
            for (item, total) in &rows {
                written += stmt.execute(params![
                    item.code,
                    item.name,
                    item.material_cost.to_string(),
                    item.labor_cost.to_string(),
                    total.to_string(),
                ])?;
            }
        }
        tx.commit()?;
        Ok(written)
    }

    fn count(&self) -> Result<usize> {
        let conn = self.conn()?;
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM master_items", [], |row| row.get(0))?;
        Ok(usize::try_from(count).unwrap_or(0))
    }
}
