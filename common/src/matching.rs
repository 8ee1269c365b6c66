//! 品名の照合ポリシー
//!
//! 照合は品名のみで行う。ポリシーは明示的に選択する:
//! - Exact: 前後空白を除き、大文字小文字を無視した完全一致（既定）
//! - Normalized: さらに引用符の統一・空白の圧縮・ゼロ幅文字の除去を行う

use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};

lazy_static! {
    static ref WHITESPACE: Regex = Regex::new(r"\s+").unwrap();
}

/// 合計行・セクション見出しを示すキーワード
pub const STRUCTURAL_KEYWORDS: &[&str] = &["total", "sum", "รวม", "system", "ระบบ"];

/// 照合ポリシー
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchPolicy {
    #[default]
    Exact,
    Normalized,
}

impl std::str::FromStr for MatchPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "exact" => Ok(MatchPolicy::Exact),
            "normalized" | "normalize" => Ok(MatchPolicy::Normalized),
            _ => Err(format!("Unknown match policy: {}. Use exact or normalized", s)),
        }
    }
}

impl std::fmt::Display for MatchPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MatchPolicy::Exact => write!(f, "exact"),
            MatchPolicy::Normalized => write!(f, "normalized"),
        }
    }
}

/// ポリシーに従って照合キーを生成
pub fn normalize_name(name: &str, policy: MatchPolicy) -> String {
    match policy {
        MatchPolicy::Exact => name.trim().to_lowercase(),
        MatchPolicy::Normalized => {
            let unified: String = name
                .chars()
                .filter(|c| !matches!(c, '\u{200B}' | '\u{200C}' | '\u{200D}' | '\u{FEFF}'))
                .map(|c| match c {
                    '\u{2018}' | '\u{2019}' | '\u{201B}' | '`' | '\u{00B4}' => '\'',
                    '\u{201C}' | '\u{201D}' | '\u{201F}' => '"',
                    '\u{00A0}' => ' ',
                    other => other,
                })
                .collect();
            WHITESPACE.replace_all(unified.trim(), " ").to_lowercase()
        }
    }
}

/// 合計行・見出し行か判定（部分一致、大文字小文字無視）
pub fn is_structural_row(name: &str) -> bool {
    let lower = name.to_lowercase();
    STRUCTURAL_KEYWORDS.iter().any(|keyword| lower.contains(keyword))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exact_policy_case_insensitive() {
        assert_eq!(normalize_name("  Painting - Interior Wall ", MatchPolicy::Exact), "painting - interior wall");
    }

    #[test]
    fn test_exact_policy_keeps_inner_spaces() {
        assert_ne!(
            normalize_name("Painting  Wall", MatchPolicy::Exact),
            normalize_name("Painting Wall", MatchPolicy::Exact)
        );
    }

    #[test]
    fn test_normalized_policy() {
        assert_eq!(
            normalize_name("Door \u{201C}A\u{201D}\u{00A0} 90\u{200B}cm", MatchPolicy::Normalized),
            "door \"a\" 90cm"
        );
        assert_eq!(
            normalize_name("Painting  Wall", MatchPolicy::Normalized),
            normalize_name("painting wall", MatchPolicy::Normalized)
        );
    }

    #[test]
    fn test_thai_text_unchanged() {
        assert_eq!(normalize_name("งานทาสี", MatchPolicy::Normalized), "งานทาสี");
    }

    #[test]
    fn test_structural_rows() {
        assert!(is_structural_row("รวมงานทาสี"));
        assert!(is_structural_row("Sub TOTAL"));
        assert!(is_structural_row("ระบบไฟฟ้า"));
        assert!(is_structural_row("Electrical System"));
        assert!(!is_structural_row("Painting - Interior Wall"));
    }

    #[test]
    fn test_policy_from_str() {
        assert_eq!("Normalized".parse::<MatchPolicy>().unwrap(), MatchPolicy::Normalized);
        assert!("fuzzy".parse::<MatchPolicy>().is_err());
    }
}
