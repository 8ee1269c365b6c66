//! 出力ファイルの生成
//!
//! - patch: 元ブックのコピーにセル値を書き込む
//! - boq: 最終BOQ・マークアップ出力
//! - 原価マスタのExcelエクスポート

pub mod boq;
pub mod patch;

use crate::error::{BoqError, Result};
use boq_cost_common::export::excel_core;
use boq_cost_common::{Decimal, MasterItem};
use std::fs::OpenOptions;
use std::path::{Path, PathBuf};

/// 出力ファイル名に付けるタイムスタンプ
pub fn timestamp() -> String {
    chrono::Local::now().format("%Y%m%d_%H%M%S").to_string()
}

/// ファイル名に使えない文字を "_" に置き換える
pub fn sanitize_file_name(name: &str) -> String {
    let base = Path::new(name)
        .file_name()
        .and_then(|s| s.to_str())
        .unwrap_or(name);
    let sanitized: String = base
        .chars()
        .map(|c| if c.is_alphanumeric() || matches!(c, '-' | '_' | '.') { c } else { '_' })
        .collect();
    let trimmed = sanitized.trim_start_matches('.');
    if trimmed.is_empty() {
        "upload.xlsx".to_string()
    } else {
        trimmed.to_string()
    }
}

/// 拡張子を除いたファイル名
pub fn file_stem(path: &Path) -> String {
    path.file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("boq")
        .to_string()
}

/// 出力先のファイル名を確保する
///
/// 同名ファイルがあれば `_1`, `_2` ... を付ける。`create_new` で空ファイルを作って
/// 名前を予約するので、同時に呼ばれても同じパスが二度返ることはない。
pub fn reserve_output_path(dir: &Path, file_name: &str) -> Result<PathBuf> {
    let path = Path::new(file_name);
    let stem = file_stem(path);
    let extension = path
        .extension()
        .and_then(|s| s.to_str())
        .map(|e| format!(".{}", e))
        .unwrap_or_default();

    let mut n = 0u32;
    loop {
        let candidate = if n == 0 {
            dir.join(file_name)
        } else {
            dir.join(format!("{}_{}{}", stem, n, extension))
        };
        match OpenOptions::new().write(true).create_new(true).open(&candidate) {
            Ok(_) => return Ok(candidate),
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => n += 1,
            Err(e) => return Err(e.into()),
        }
    }
}

pub fn final_boq_name() -> String {
    format!("final_boq_{}.xlsx", timestamp())
}

pub fn markup_name(percent: Decimal, source_stem: &str) -> String {
    format!("{}%_{}_{}.xlsx", percent.normalize(), source_stem, timestamp())
}

pub fn pure_markup_name(percent: Decimal, source_stem: &str) -> String {
    format!("{}%_markup_{}_{}.xlsx", percent.normalize(), source_stem, timestamp())
}

pub fn catalog_export_name() -> String {
    format!("{}_{}.xlsx", excel_core::CATALOG_SHEET_NAME, timestamp())
}

/// 原価マスタを一覧形式のExcelに書き出す
pub fn write_catalog_export(items: &[MasterItem], output_dir: &Path) -> Result<PathBuf> {
    std::fs::create_dir_all(output_dir)?;
    let buffer = excel_core::generate_catalog_buffer(items).map_err(BoqError::WorkbookWrite)?;
    let path = reserve_output_path(output_dir, &catalog_export_name())?;
    std::fs::write(&path, buffer)?;
    tracing::info!(path = %path.display(), count = items.len(), "master catalog exported");
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_sanitize_file_name() {
        assert_eq!(sanitize_file_name("BOQ งาน 1.xlsx"), "BOQ_งาน_1.xlsx");
        assert_eq!(sanitize_file_name("../../etc/passwd"), "passwd");
        assert_eq!(sanitize_file_name("a;b&c.xlsx"), "a_b_c.xlsx");
        assert_eq!(sanitize_file_name(".."), "upload.xlsx");
    }

    #[test]
    fn test_reserve_output_path() {
        let dir = tempdir().expect("Failed to create temp dir");
        let first = reserve_output_path(dir.path(), "final_boq.xlsx").unwrap();
        assert_eq!(first, dir.path().join("final_boq.xlsx"));
        assert!(first.exists());

        let second = reserve_output_path(dir.path(), "final_boq.xlsx").unwrap();
        assert_eq!(second, dir.path().join("final_boq_1.xlsx"));
    }

    #[test]
    fn test_reserve_output_path_concurrent() {
        let dir = tempdir().expect("Failed to create temp dir");
        let barrier = std::sync::Barrier::new(8);

        let mut paths: Vec<PathBuf> = std::thread::scope(|scope| {
            let handles: Vec<_> = (0..8)
                .map(|_| {
                    scope.spawn(|| {
                        barrier.wait();
                        reserve_output_path(dir.path(), "final_boq.xlsx").unwrap()
                    })
                })
                .collect();
            handles.into_iter().map(|h| h.join().unwrap()).collect()
        });

        paths.sort();
        paths.dedup();
        assert_eq!(paths.len(), 8);
    }

    #[test]
    fn test_output_names() {
        assert!(final_boq_name().starts_with("final_boq_"));
        let name = markup_name(Decimal::new(150, 1), "project");
        assert!(name.starts_with("15%_project_"), "{}", name);
        assert!(pure_markup_name(Decimal::from(20), "project").starts_with("20%_markup_project_"));
        assert!(catalog_export_name().starts_with("master_items_"));
    }

    #[test]
    fn test_write_catalog_export() {
        let dir = tempdir().expect("Failed to create temp dir");
        let items = vec![MasterItem::new(1, Some("INT001".into()), "Painting", Decimal::from(150), Decimal::from(100))];
        let path = write_catalog_export(&items, dir.path()).unwrap();
        assert!(path.exists());
        assert_eq!(path.extension().and_then(|e| e.to_str()), Some("xlsx"));
    }
}
