use crate::error::{BoqError, Result};
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

const WORKBOOK_EXTENSIONS: &[&str] = &["xlsx", "XLSX"];

fn is_workbook(path: &Path) -> bool {
    let is_xlsx = path
        .extension()
        .map(|ext| WORKBOOK_EXTENSIONS.iter().any(|&e| e == ext.to_string_lossy()))
        .unwrap_or(false);
    // Excelのロックファイル（~$xxx.xlsx）は除外
    let is_lock = path
        .file_name()
        .map(|n| n.to_string_lossy().starts_with("~$"))
        .unwrap_or(false);
    is_xlsx && !is_lock
}

/// ファイル・フォルダの指定から処理対象の .xlsx を集める
pub fn collect_workbooks(inputs: &[PathBuf], recursive: bool) -> Result<Vec<PathBuf>> {
    let mut workbooks = Vec::new();

    for input in inputs {
        if !input.exists() {
            return Err(BoqError::FileNotFound(input.display().to_string()));
        }
        if input.is_file() {
            workbooks.push(input.clone());
            continue;
        }

        let max_depth = if recursive { usize::MAX } else { 1 };
        let mut found: Vec<PathBuf> = WalkDir::new(input)
            .max_depth(max_depth)
            .into_iter()
            .filter_map(|e| e.ok())
            .map(|e| e.into_path())
            .filter(|p| p.is_file() && is_workbook(p))
            .collect();
        // ファイル名でソート
        found.sort();
        workbooks.extend(found);
    }

    Ok(workbooks)
}
