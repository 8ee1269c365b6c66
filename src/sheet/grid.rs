//! セル格子の抽象化
//!
//! 行・列はすべて1始まり。calamine の Range と、テストや組み立て用の
//! MemoryGrid の両方で同じロケーター・照合処理を動かす。

use boq_cost_common::Decimal;
use calamine::{Data, Range};
use rust_decimal::prelude::FromPrimitive;
use std::collections::BTreeMap;

/// セル値
#[derive(Debug, Clone, PartialEq)]
pub enum Cell {
    Empty,
    Text(String),
    Number(Decimal),
    Bool(bool),
}

pub trait CellGrid {
    fn cell(&self, row: u32, col: u32) -> Cell;

    /// 最終使用行（空なら0）
    fn max_row(&self) -> u32;

    /// 最終使用列（空なら0）
    fn max_col(&self) -> u32;

    /// 文字列として取得（前後空白除去、数値は末尾の .0 を付けない）
    fn text(&self, row: u32, col: u32) -> String {
        match self.cell(row, col) {
            Cell::Text(s) => s.trim().to_string(),
            Cell::Number(n) => n.normalize().to_string(),
            Cell::Bool(b) => b.to_string(),
            Cell::Empty => String::new(),
        }
    }

    /// 数値として取得（"1,250.50" のような文字列も解釈）
    fn number(&self, row: u32, col: u32) -> Option<Decimal> {
        match self.cell(row, col) {
            Cell::Number(n) => Some(n),
            Cell::Text(s) => s.trim().replace(',', "").parse::<Decimal>().ok(),
            _ => None,
        }
    }
}

impl CellGrid for Range<Data> {
    fn cell(&self, row: u32, col: u32) -> Cell {
        if row == 0 || col == 0 {
            return Cell::Empty;
        }
        match self.get_value((row - 1, col - 1)) {
            Some(Data::String(s)) => Cell::Text(s.clone()),
            Some(Data::Int(i)) => Cell::Number(Decimal::from(*i)),
            Some(Data::Float(f)) => Decimal::from_f64(*f).map(Cell::Number).unwrap_or(Cell::Empty),
            Some(Data::Bool(b)) => Cell::Bool(*b),
            Some(Data::DateTime(dt)) => Decimal::from_f64(dt.as_f64()).map(Cell::Number).unwrap_or(Cell::Empty),
            Some(Data::DateTimeIso(s)) | Some(Data::DurationIso(s)) => Cell::Text(s.clone()),
            Some(Data::Error(_)) | Some(Data::Empty) | None => Cell::Empty,
        }
    }

    fn max_row(&self) -> u32 {
        self.end().map(|(row, _)| row + 1).unwrap_or(0)
    }

    fn max_col(&self) -> u32 {
        self.end().map(|(_, col)| col + 1).unwrap_or(0)
    }
}

/// メモリ上のセル格子
#[derive(Debug, Clone, Default)]
pub struct MemoryGrid {
    cells: BTreeMap<(u32, u32), Cell>,
}

impl MemoryGrid {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&mut self, row: u32, col: u32, cell: Cell) -> &mut Self {
        if cell == Cell::Empty {
            self.cells.remove(&(row, col));
        } else {
            self.cells.insert((row, col), cell);
        }
        self
    }

    pub fn set_text(&mut self, row: u32, col: u32, text: impl Into<String>) -> &mut Self {
        self.set(row, col, Cell::Text(text.into()))
    }

    pub fn set_number(&mut self, row: u32, col: u32, value: Decimal) -> &mut Self {
        self.set(row, col, Cell::Number(value))
    }
}

impl CellGrid for MemoryGrid {
    fn cell(&self, row: u32, col: u32) -> Cell {
        self.cells.get(&(row, col)).cloned().unwrap_or(Cell::Empty)
    }

    fn max_row(&self) -> u32 {
        self.cells.keys().map(|(row, _)| *row).max().unwrap_or(0)
    }

    fn max_col(&self) -> u32 {
        self.cells.keys().map(|(_, col)| *col).max().unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_memory_grid_text_and_number() {
        let mut grid = MemoryGrid::new();
        grid.set_text(2, 3, "  Painting  ")
            .set_number(2, 4, Decimal::new(120, 1))
            .set_text(2, 5, "1,250.50");

        assert_eq!(grid.text(2, 3), "Painting");
        assert_eq!(grid.text(2, 4), "12");
        assert_eq!(grid.number(2, 5), Some(Decimal::new(125050, 2)));
        assert_eq!(grid.number(2, 3), None);
        assert_eq!(grid.max_row(), 2);
        assert_eq!(grid.max_col(), 5);
    }

    #[test]
    fn test_memory_grid_empty() {
        let grid = MemoryGrid::new();
        assert_eq!(grid.cell(1, 1), Cell::Empty);
        assert_eq!(grid.text(1, 1), "");
        assert_eq!(grid.max_row(), 0);
    }

    #[test]
    fn test_calamine_range_is_one_based() {
        let mut range: Range<Data> = Range::new((0, 0), (2, 3));
        range.set_value((1, 2), Data::Float(1600.0));
        range.set_value((0, 0), Data::String("ลำดับ".into()));

        assert_eq!(range.text(1, 1), "ลำดับ");
        assert_eq!(range.number(2, 3), Some(Decimal::from(1600)));
        assert_eq!(range.text(2, 3), "1600");
        assert_eq!(range.cell(0, 1), Cell::Empty);
        assert_eq!(range.max_row(), 3);
        assert_eq!(range.max_col(), 4);
    }
}
