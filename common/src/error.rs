//! エラー型定義

use thiserror::Error;

/// 共通エラー型
#[derive(Error, Debug)]
pub enum Error {
    #[error("Invalid layout: {0}")]
    InvalidLayout(String),

    /// 金額計算が Decimal の範囲を超えた
    #[error("Amount overflow: {0}")]
    AmountOverflow(String),
}

/// Result型エイリアス
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display_invalid_layout() {
        let error = Error::InvalidLayout("column 'name' must be >= 1".to_string());
        assert_eq!(format!("{}", error), "Invalid layout: column 'name' must be >= 1");
    }

    #[test]
    fn test_error_display_overflow() {
        let error = Error::AmountOverflow("1 + 2".to_string());
        assert_eq!(format!("{}", error), "Amount overflow: 1 + 2");
    }
}
