//! マークアップ計算
//!
//! 金額は rust_decimal で扱い、小数第2位で丸める（0.5は0から遠い方へ）。

use crate::error::{Error, Result};
use lazy_static::lazy_static;
use regex::Regex;
use rust_decimal::{Decimal, RoundingStrategy};

lazy_static! {
    static ref DIGITS: Regex = Regex::new(r"[0-9]+").unwrap();
}

/// 金額の小数桁
pub const MONEY_SCALE: u32 = 2;

/// 金額を小数第2位に丸める
pub fn round_money(value: Decimal) -> Decimal {
    value.round_dp_with_strategy(MONEY_SCALE, RoundingStrategy::MidpointAwayFromZero)
}

/// 材料費 + 労務費
pub fn total_cost(material_cost: Decimal, labor_cost: Decimal) -> Result<Decimal> {
    material_cost
        .checked_add(labor_cost)
        .ok_or_else(|| Error::AmountOverflow(format!("{} + {}", material_cost, labor_cost)))
}

/// value × (1 + percent/100)
pub fn scale_value(value: Decimal, percent: Decimal) -> Result<Decimal> {
    let scaled = percent
        .checked_div(Decimal::ONE_HUNDRED)
        .and_then(|rate| Decimal::ONE.checked_add(rate))
        .and_then(|factor| value.checked_mul(factor))
        .ok_or_else(|| Error::AmountOverflow(format!("{} × {}%", value, percent)))?;
    Ok(round_money(scaled))
}

/// 合計費用にマークアップを適用（合計が0以下なら None）
pub fn markup_value(total_cost: Decimal, percent: Decimal) -> Result<Option<Decimal>> {
    if total_cost <= Decimal::ZERO {
        return Ok(None);
    }
    scale_value(total_cost, percent).map(Some)
}

/// ヘッダー文字列からマークアップ率を取得
///
/// "markup" を含まなければ None。最初の数字列を率とし、数字が無ければ100。
pub fn parse_markup_header(text: &str) -> Option<Decimal> {
    if !text.to_lowercase().contains("markup") {
        return None;
    }
    let percent = DIGITS
        .find(text)
        .and_then(|m| m.as_str().parse::<Decimal>().ok())
        .unwrap_or(Decimal::ONE_HUNDRED);
    Some(percent)
}

/// 追加するマークアップ列の見出し
pub fn markup_header_label(percent: Decimal) -> String {
    format!("Markup {}%", percent.normalize())
}
