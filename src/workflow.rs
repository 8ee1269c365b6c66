//! BOQ処理フロー
//!
//! アップロード → 照合 → 最終BOQ / マークアップ出力 → 後片付け。
//! HTTP とCLIの両方からこの型を通して処理する。

use crate::config::{Config, ConfigUpdate};
use crate::error::{BoqError, Result};
use crate::export::boq::{write_final_boq, write_markup_applied, write_pure_markup, FinalReport, MarkupReport};
use crate::export::{self, file_stem, reserve_output_path, sanitize_file_name};
use crate::master::import::import_master_workbook;
use crate::master::seed::seed_if_empty;
use crate::master::{MasterStore, NewMasterItem};
use crate::matcher::{match_sheet, ProcessedSheet};
use crate::session::{Session, SessionState, SessionStore};
use crate::sheet::{locate, read_sheets, CellGrid, LocatorOptions};
use boq_cost_common::layout::is_summary_sheet;
use boq_cost_common::{Decimal, MasterCatalog, MasterItem, SessionSummary, SheetLayout};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock, RwLockReadGuard};

const SUMMARY_SHEET_REASON: &str = "summary sheet";
const NO_HEADER_REASON: &str = "header row not found";

/// 出力ファイルの情報
#[derive(Debug, Clone)]
pub struct OutputFile {
    pub path: PathBuf,
    pub file_name: String,
}

impl OutputFile {
    fn new(path: PathBuf) -> Self {
        let file_name = path
            .file_name()
            .and_then(|s| s.to_str())
            .unwrap_or_default()
            .to_string();
        Self { path, file_name }
    }
}

#[derive(Debug, Clone)]
pub struct FinalOutput {
    pub file: OutputFile,
    pub report: FinalReport,
}

#[derive(Debug, Clone)]
pub struct MarkupOutput {
    pub file: OutputFile,
    pub percent: Decimal,
    pub report: MarkupReport,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct CleanupReport {
    pub session_cleaned: bool,
    pub files_deleted: usize,
    pub deleted_files: Vec<String>,
    pub errors: Vec<String>,
}

/// ブック1冊を照合する（集計シート・ヘッダー無しシートは飛ばして記録）
pub fn process_workbook(
    path: &Path,
    options: &LocatorOptions,
    catalog: &MasterCatalog,
) -> Result<(Vec<ProcessedSheet>, SessionSummary)> {
    let mut sheets = Vec::new();
    let mut summary = SessionSummary::default();

    for (sheet_name, range) in read_sheets(path)? {
        if is_summary_sheet(&sheet_name) {
            summary.record_skipped(&sheet_name, SUMMARY_SHEET_REASON);
            continue;
        }
        let layout = match locate(&range, &sheet_name, options) {
            Ok(layout) => layout,
            Err(BoqError::NoHeaderFound(_)) => {
                tracing::warn!(sheet = %sheet_name, "sheet skipped: header row not found");
                summary.record_skipped(&sheet_name, NO_HEADER_REASON);
                continue;
            }
            Err(e) => return Err(e),
        };

        let items = match_sheet(&range, &layout, catalog);
        summary.record_sheet(&items);
        sheets.push(ProcessedSheet {
            layout,
            items,
            used_columns: range.max_col(),
        });
    }

    tracing::info!(
        path = %path.display(),
        sheets = summary.sheets_processed,
        matched = summary.matched_items,
        unmatched = summary.unmatched_items,
        "workbook processed"
    );
    Ok((sheets, summary))
}

/// 照合なしで各シートの列配置だけを求める
pub fn locate_workbook(path: &Path, options: &LocatorOptions) -> Result<Vec<SheetLayout>> {
    let mut layouts = Vec::new();
    for (sheet_name, range) in read_sheets(path)? {
        if is_summary_sheet(&sheet_name) {
            continue;
        }
        match locate(&range, &sheet_name, options) {
            Ok(layout) => layouts.push(layout),
            Err(BoqError::NoHeaderFound(_)) => {
                tracing::warn!(sheet = %sheet_name, "sheet skipped: header row not found");
            }
            Err(e) => return Err(e),
        }
    }
    Ok(layouts)
}

fn ensure_xlsx(name: &str) -> Result<()> {
    let is_xlsx = Path::new(name)
        .extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| e.eq_ignore_ascii_case("xlsx"));
    if is_xlsx {
        Ok(())
    } else {
        Err(BoqError::InvalidRequest(format!("only .xlsx files are supported: {}", name)))
    }
}

fn ensure_percent(percent: Decimal) -> Result<()> {
    if percent.is_sign_negative() {
        return Err(BoqError::InvalidRequest("markup_percent must be >= 0".into()));
    }
    Ok(())
}

fn remove_quietly(path: &Path) {
    if let Err(e) = std::fs::remove_file(path) {
        if e.kind() != std::io::ErrorKind::NotFound {
            tracing::warn!(path = %path.display(), error = %e, "failed to remove file");
        }
    }
}

pub struct BoqWorkflow {
    store: Arc<dyn MasterStore>,
    sessions: SessionStore,
    config: RwLock<Config>,
    /// 設定更新の保存先（None なら保存しない）
    config_path: Option<PathBuf>,
}

impl BoqWorkflow {
    pub fn new(store: Arc<dyn MasterStore>, config: Config) -> Self {
        Self {
            store,
            sessions: SessionStore::new(),
            config: RwLock::new(config),
            config_path: None,
        }
    }

    pub fn with_config_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.config_path = Some(path.into());
        self
    }

    fn config_guard(&self) -> Result<RwLockReadGuard<'_, Config>> {
        self.config
            .read()
            .map_err(|_| BoqError::Config("config lock poisoned".into()))
    }

    pub fn config(&self) -> Result<Config> {
        Ok(self.config_guard()?.clone())
    }

    pub fn output_dir(&self) -> Result<PathBuf> {
        Ok(self.config_guard()?.storage.output_dir.clone())
    }

    pub fn sessions(&self) -> &SessionStore {
        &self.sessions
    }

    // ---- 起動時 ----

    /// マスタが空なら、マスタ用Excel（あれば）かサンプルを投入する
    pub fn bootstrap(&self) -> Result<usize> {
        let config = self.config()?;
        config.ensure_storage_dirs()?;
        if self.store.count()? > 0 {
            return Ok(0);
        }

        if let Some(workbook) = config.storage.master_workbook.as_deref().filter(|p| p.exists()) {
            let options = LocatorOptions::from_config(&config);
            match import_master_workbook(self.store.as_ref(), workbook, &options) {
                Ok(count) if count > 0 => return Ok(count),
                Ok(_) => tracing::warn!(path = %workbook.display(), "master workbook had no items"),
                Err(e) => tracing::warn!(path = %workbook.display(), error = %e, "master workbook import failed"),
            }
        }
        seed_if_empty(self.store.as_ref())
    }

    // ---- セッション ----

    /// アップロードを保存してセッションを作る
    pub fn register_upload(&self, bytes: &[u8], original_name: &str) -> Result<String> {
        ensure_xlsx(original_name)?;
        let upload_dir = self.config_guard()?.storage.upload_dir.clone();
        std::fs::create_dir_all(&upload_dir)?;

        let stored_name = format!("{}_{}", export::timestamp(), sanitize_file_name(original_name));
        let path = reserve_output_path(&upload_dir, &stored_name)?;
        std::fs::write(&path, bytes)?;

        let session = Session::new(path, original_name);
        let id = self.sessions.insert(session)?;
        tracing::info!(session = %id, file = original_name, "upload registered");
        Ok(id)
    }

    /// ローカルファイルからセッションを作る
    pub fn register_file(&self, path: &Path) -> Result<String> {
        if !path.exists() {
            return Err(BoqError::FileNotFound(path.display().to_string()));
        }
        let name = path
            .file_name()
            .and_then(|s| s.to_str())
            .unwrap_or("upload.xlsx")
            .to_string();
        let bytes = std::fs::read(path)?;
        self.register_upload(&bytes, &name)
    }

    /// セッションのブックを照合する
    ///
    /// 失敗した場合（処理可能なシートが無い場合を含む）はセッションとアップロードを破棄する。
    pub fn process(&self, id: &str) -> Result<SessionSummary> {
        let session = self.sessions.get(id)?;
        session.ensure_created()?;

        let result = self.process_session(&session);
        if result.is_err() {
            if let Ok(discarded) = self.sessions.remove(id) {
                remove_quietly(&discarded.source_path);
            }
        }
        result
    }

    fn process_session(&self, session: &Session) -> Result<SessionSummary> {
        let config = self.config()?;
        let catalog = self.store.snapshot(config.matching.policy)?;
        let options = LocatorOptions::from_config(&config);

        let (sheets, summary) = process_workbook(&session.source_path, &options, &catalog)?;
        if sheets.is_empty() {
            return Err(BoqError::NoProcessableSheet(session.original_name.clone()));
        }

        let result = summary.clone();
        self.sessions.update(&session.id, move |s| {
            s.ensure_created()?;
            s.sheets = sheets;
            s.summary = summary;
            s.state = SessionState::Processed;
            Ok(())
        })?;
        Ok(result)
    }

    /// アップロードして照合まで行う
    pub fn process_upload(&self, bytes: &[u8], original_name: &str) -> Result<(String, SessionSummary)> {
        let id = self.register_upload(bytes, original_name)?;
        let summary = self.process(&id)?;
        Ok((id, summary))
    }

    /// 最終BOQを生成して確定状態にする
    pub fn generate_final(&self, id: &str, markup_options: Option<Vec<Decimal>>) -> Result<FinalOutput> {
        let session = self.sessions.get(id)?;
        session.ensure_processed()?;

        let extra = match markup_options {
            Some(options) => options,
            None => self.config_guard()?.markup.options.clone(),
        };
        for percent in &extra {
            ensure_percent(*percent)?;
        }

        let output_dir = self.output_dir()?;
        std::fs::create_dir_all(&output_dir)?;
        let path = reserve_output_path(&output_dir, &export::final_boq_name())?;
        let report = write_final_boq(&session.source_path, &path, &session.sheets, &extra)
            .inspect_err(|_| remove_quietly(&path))?;

        let committed = self.sessions.update(id, |s| {
            s.ensure_processed()?;
            s.state = SessionState::Finalized { output: path.clone() };
            s.outputs.push(path.clone());
            Ok(())
        });
        if let Err(e) = committed {
            remove_quietly(&path);
            return Err(e);
        }

        Ok(FinalOutput { file: OutputFile::new(path), report })
    }

    fn record_output(&self, id: &str, path: &Path) -> Result<()> {
        let committed = self.sessions.update(id, |s| {
            s.ensure_priced()?;
            s.outputs.push(path.to_path_buf());
            Ok(())
        });
        if committed.is_err() {
            remove_quietly(path);
        }
        committed
    }

    /// 照合済み行の費用にマークアップを掛けたブックを出力
    pub fn apply_markup(&self, id: &str, percent: Decimal) -> Result<MarkupOutput> {
        ensure_percent(percent)?;
        let session = self.sessions.get(id)?;
        session.ensure_priced()?;

        let output_dir = self.output_dir()?;
        std::fs::create_dir_all(&output_dir)?;
        let stem = file_stem(Path::new(&session.original_name));
        let path = reserve_output_path(&output_dir, &export::markup_name(percent, &stem))?;
        let report = write_markup_applied(&session.source_path, &path, &session.sheets, percent)
            .inspect_err(|_| remove_quietly(&path))?;
        self.record_output(id, &path)?;

        Ok(MarkupOutput { file: OutputFile::new(path), percent, report })
    }

    /// セッションのブックの費用列をすべて percent 分増やす
    pub fn pure_markup_session(&self, id: &str, percent: Decimal) -> Result<MarkupOutput> {
        ensure_percent(percent)?;
        let session = self.sessions.get(id)?;
        session.ensure_priced()?;

        let layouts: Vec<SheetLayout> = session.sheets.iter().map(|s| s.layout.clone()).collect();
        let stem = file_stem(Path::new(&session.original_name));
        let output = self.write_pure(&session.source_path, &stem, &layouts, percent)?;
        self.record_output(id, &output.file.path)?;
        Ok(output)
    }

    /// アップロードされたブックに直接単純マークアップを掛ける（セッションは作らない）
    pub fn pure_markup_upload(&self, bytes: &[u8], original_name: &str, percent: Decimal) -> Result<MarkupOutput> {
        ensure_percent(percent)?;
        ensure_xlsx(original_name)?;
        let config = self.config()?;
        std::fs::create_dir_all(&config.storage.upload_dir)?;

        let stored_name = format!("{}_{}", export::timestamp(), sanitize_file_name(original_name));
        let source = reserve_output_path(&config.storage.upload_dir, &stored_name)?;
        std::fs::write(&source, bytes)?;

        let result = locate_workbook(&source, &LocatorOptions::from_config(&config)).and_then(|layouts| {
            if layouts.is_empty() {
                return Err(BoqError::NoProcessableSheet(original_name.to_string()));
            }
            let stem = file_stem(Path::new(original_name));
            self.write_pure(&source, &stem, &layouts, percent)
        });
        remove_quietly(&source);
        result
    }

    fn write_pure(&self, source: &Path, stem: &str, layouts: &[SheetLayout], percent: Decimal) -> Result<MarkupOutput> {
        let output_dir = self.output_dir()?;
        std::fs::create_dir_all(&output_dir)?;
        let path = reserve_output_path(&output_dir, &export::pure_markup_name(percent, stem))?;
        let report = write_pure_markup(source, &path, layouts, percent).inspect_err(|_| remove_quietly(&path))?;
        Ok(MarkupOutput { file: OutputFile::new(path), percent, report })
    }

    /// セッションのアップロードと生成物を削除してセッションを破棄する
    pub fn cleanup(&self, id: &str) -> Result<CleanupReport> {
        let mut session = self.sessions.remove(id)?;
        let mut report = CleanupReport::default();

        let files = std::iter::once(session.source_path.clone()).chain(session.outputs.iter().cloned());
        for path in files {
            match std::fs::remove_file(&path) {
                Ok(()) => {
                    report.files_deleted += 1;
                    report.deleted_files.push(path.display().to_string());
                }
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "cleanup failed");
                    report.errors.push(format!("{}: {}", path.display(), e));
                }
            }
        }

        session.state = SessionState::Cleaned;
        report.session_cleaned = true;
        tracing::info!(session = %session.id, deleted = report.files_deleted, state = %session.state, "session cleaned");
        Ok(report)
    }

    /// ダウンロード対象のパス（出力ディレクトリ直下のみ）
    pub fn resolve_download(&self, file_name: &str) -> Result<PathBuf> {
        if file_name.is_empty() || file_name.contains('/') || file_name.contains('\\') || file_name.contains("..") {
            return Err(BoqError::InvalidRequest(format!("invalid file name: {}", file_name)));
        }
        let path = self.output_dir()?.join(file_name);
        if !path.is_file() {
            return Err(BoqError::FileNotFound(file_name.to_string()));
        }
        Ok(path)
    }

    // ---- 設定 ----

    /// 設定を部分更新し、保存先があれば書き込む
    pub fn update_config(&self, update: ConfigUpdate) -> Result<Config> {
        let mut config = self
            .config
            .write()
            .map_err(|_| BoqError::Config("config lock poisoned".into()))?;
        let mut next = config.clone();
        next.apply_update(update)?;
        if let Some(path) = &self.config_path {
            next.save_to(path)?;
        }
        *config = next.clone();
        tracing::info!("config updated");
        Ok(next)
    }

    // ---- マスタ ----

    pub fn list_master(&self) -> Result<Vec<MasterItem>> {
        self.store.list()
    }

    pub fn get_master(&self, id: i64) -> Result<MasterItem> {
        self.store.get(id)?.ok_or(BoqError::MasterItemNotFound(id))
    }

    pub fn create_master(&self, item: &NewMasterItem) -> Result<MasterItem> {
        self.store.create(item)
    }

    pub fn update_master(&self, id: i64, item: &NewMasterItem) -> Result<MasterItem> {
        self.store.update(id, item)
    }

    pub fn delete_master(&self, id: i64) -> Result<()> {
        self.store.delete(id)
    }

    /// アップロードされたマスタ用Excelを取り込む
    pub fn import_master_upload(&self, bytes: &[u8], original_name: &str) -> Result<usize> {
        ensure_xlsx(original_name)?;
        let config = self.config()?;
        std::fs::create_dir_all(&config.storage.upload_dir)?;
        let stored_name = format!("master_{}_{}", export::timestamp(), sanitize_file_name(original_name));
        let path = reserve_output_path(&config.storage.upload_dir, &stored_name)?;
        std::fs::write(&path, bytes)?;

        let result = import_master_workbook(self.store.as_ref(), &path, &LocatorOptions::from_config(&config));
        remove_quietly(&path);
        result
    }

    pub fn import_master_file(&self, path: &Path) -> Result<usize> {
        let options = LocatorOptions::from_config(&self.config()?);
        import_master_workbook(self.store.as_ref(), path, &options)
    }

    /// マスタ一覧を出力ディレクトリに書き出す
    pub fn export_master(&self) -> Result<(OutputFile, usize)> {
        let items = self.store.list()?;
        let path = export::write_catalog_export(&items, &self.output_dir()?)?;
        Ok((OutputFile::new(path), items.len()))
    }

    pub fn seed_master(&self) -> Result<usize> {
        seed_if_empty(self.store.as_ref())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::master::InMemoryMasterStore;
    use tempfile::{tempdir, TempDir};

    fn workflow() -> (BoqWorkflow, TempDir) {
        let dir = tempdir().expect("Failed to create temp dir");
        let mut config = Config::default();
        config.storage.upload_dir = dir.path().join("uploads");
        config.storage.output_dir = dir.path().join("output");
        config.storage.database_path = dir.path().join("master.db");
        config.storage.master_workbook = None;
        let store = Arc::new(InMemoryMasterStore::new());
        (BoqWorkflow::new(store, config), dir)
    }

    #[test]
    fn test_upload_rejects_non_xlsx() {
        let (workflow, _dir) = workflow();
        let result = workflow.register_upload(b"a,b", "boq.csv");
        assert!(matches!(result, Err(BoqError::InvalidRequest(_))));
    }

    #[test]
    fn test_unknown_session() {
        let (workflow, _dir) = workflow();
        let err = workflow.generate_final("nope", None).unwrap_err();
        assert_eq!(err.to_string(), "session not found");
        assert!(matches!(workflow.cleanup("nope"), Err(BoqError::SessionNotFound(_))));
    }

    #[test]
    fn test_generate_requires_processed() {
        let (workflow, _dir) = workflow();
        let id = workflow.register_upload(b"not really xlsx", "boq.xlsx").unwrap();
        let result = workflow.generate_final(&id, None);
        assert!(matches!(result, Err(BoqError::InvalidSessionState { .. })));
        let result = workflow.apply_markup(&id, Decimal::from(10));
        assert!(matches!(result, Err(BoqError::InvalidSessionState { .. })));
    }

    #[test]
    fn test_failed_process_discards_session() {
        let (workflow, _dir) = workflow();
        let id = workflow.register_upload(b"not really xlsx", "boq.xlsx").unwrap();
        let source = workflow.sessions().get(&id).unwrap().source_path;
        assert!(source.exists());

        assert!(workflow.process(&id).is_err());
        assert!(workflow.sessions().is_empty());
        assert!(!source.exists());
    }

    #[test]
    fn test_resolve_download_rejects_traversal() {
        let (workflow, _dir) = workflow();
        for name in ["../secret.xlsx", "a/b.xlsx", "a\\b.xlsx", ".."] {
            assert!(matches!(workflow.resolve_download(name), Err(BoqError::InvalidRequest(_))), "{}", name);
        }
        assert!(matches!(workflow.resolve_download("missing.xlsx"), Err(BoqError::FileNotFound(_))));
    }

    #[test]
    fn test_bootstrap_seeds_empty_store() {
        let (workflow, _dir) = workflow();
        assert_eq!(workflow.bootstrap().unwrap(), 40);
        assert_eq!(workflow.bootstrap().unwrap(), 0);
        assert_eq!(workflow.list_master().unwrap().len(), 40);
    }

    #[test]
    fn test_update_config_persists() {
        let (workflow, dir) = workflow();
        let path = dir.path().join("config.json");
        let workflow = workflow.with_config_path(&path);

        let update = ConfigUpdate {
            header_marker: Some("No.".into()),
            ..Default::default()
        };
        let config = workflow.update_config(update).unwrap();
        assert_eq!(config.matching.header_marker, "No.");
        assert_eq!(Config::load_from(&path).unwrap().matching.header_marker, "No.");

        let bad = ConfigUpdate {
            header_scan_rows: Some(0),
            ..Default::default()
        };
        assert!(workflow.update_config(bad).is_err());
        assert_eq!(workflow.config().unwrap().matching.header_scan_rows, 20);
    }

    #[test]
    fn test_get_missing_master() {
        let (workflow, _dir) = workflow();
        assert!(matches!(workflow.get_master(5), Err(BoqError::MasterItemNotFound(5))));
    }
}
