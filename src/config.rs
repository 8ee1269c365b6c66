use crate::error::{BoqError, Result};
use boq_cost_common::{ColumnMap, Decimal, LayoutKind, MatchPolicy, INTERIOR_COLUMNS, SYSTEM_COLUMNS};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

/// 設定ファイルの場所を上書きする環境変数
pub const CONFIG_ENV: &str = "BOQ_COST_CONFIG";

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub storage: StorageConfig,
    pub matching: MatchingConfig,
    pub markup: MarkupConfig,
    pub layouts: LayoutConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".into(),
            port: 5000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub upload_dir: PathBuf,
    pub output_dir: PathBuf,
    pub database_path: PathBuf,
    /// マスタDBが空のとき取り込むExcel
    pub master_workbook: Option<PathBuf>,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            upload_dir: PathBuf::from("storage/uploads"),
            output_dir: PathBuf::from("storage/output"),
            database_path: PathBuf::from("data/master_data.db"),
            master_workbook: Some(PathBuf::from("master_data/master.xlsx")),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MatchingConfig {
    pub policy: MatchPolicy,
    /// ヘッダー行のA列に現れる文字列
    pub header_marker: String,
    /// ヘッダーを探す行数
    pub header_scan_rows: u32,
    /// シート名にこれを含めば内装レイアウト
    pub interior_marker: String,
}

impl Default for MatchingConfig {
    fn default() -> Self {
        Self {
            policy: MatchPolicy::Exact,
            header_marker: "ลำดับ".into(),
            header_scan_rows: 20,
            interior_marker: "Int".into(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct MarkupConfig {
    /// マークアップ列が無いシートに追加する率（空なら追加しない）
    pub options: Vec<Decimal>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LayoutConfig {
    pub interior: ColumnMap,
    pub system: ColumnMap,
}

impl Default for LayoutConfig {
    fn default() -> Self {
        Self {
            interior: INTERIOR_COLUMNS,
            system: SYSTEM_COLUMNS,
        }
    }
}

impl LayoutConfig {
    pub fn columns_for(&self, kind: LayoutKind) -> ColumnMap {
        match kind {
            LayoutKind::Interior => self.interior,
            LayoutKind::System => self.system,
        }
    }

    fn columns_for_mut(&mut self, kind: LayoutKind) -> &mut ColumnMap {
        match kind {
            LayoutKind::Interior => &mut self.interior,
            LayoutKind::System => &mut self.system,
        }
    }
}

/// 設定APIからの部分更新
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ConfigUpdate {
    pub match_policy: Option<MatchPolicy>,
    pub header_marker: Option<String>,
    pub header_scan_rows: Option<u32>,
    pub interior_marker: Option<String>,
    pub markup_options: Option<Vec<Decimal>>,
    /// column_mapping の対象レイアウト
    pub layout: Option<LayoutKind>,
    pub column_mapping: Option<HashMap<String, u32>>,
}

impl Config {
    pub fn load() -> Result<Self> {
        let config_path = Self::config_path()?;
        Self::load_from(&config_path)
    }

    /// 指定パスから読み込み（無ければ既定値）
    pub fn load_from(path: &Path) -> Result<Self> {
        if path.exists() {
            let content = std::fs::read_to_string(path)?;
            let config: Config = serde_json::from_str(&content)?;
            config.validate()?;
            Ok(config)
        } else {
            Ok(Self::default())
        }
    }

    pub fn save(&self) -> Result<()> {
        let config_path = Self::config_path()?;
        self.save_to(&config_path)
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    pub fn config_path() -> Result<PathBuf> {
        // 環境変数を優先
        if let Ok(path) = std::env::var(CONFIG_ENV) {
            return Ok(PathBuf::from(path));
        }

        let home = dirs::home_dir()
            .ok_or_else(|| BoqError::Config("home directory not found".into()))?;
        Ok(home.join(".config").join("boq-cost").join("config.json"))
    }

    pub fn validate(&self) -> Result<()> {
        if self.matching.header_marker.trim().is_empty() {
            return Err(BoqError::Config("header_marker must not be empty".into()));
        }
        if self.matching.header_scan_rows == 0 {
            return Err(BoqError::Config("header_scan_rows must be >= 1".into()));
        }
        if self.markup.options.iter().any(|p| p.is_sign_negative()) {
            return Err(BoqError::Config("markup options must not be negative".into()));
        }
        self.layouts.interior.validate()?;
        self.layouts.system.validate()?;
        Ok(())
    }

    /// 部分更新を適用（検証に失敗したら何も変更しない）
    pub fn apply_update(&mut self, update: ConfigUpdate) -> Result<()> {
        let mut next = self.clone();

        if let Some(policy) = update.match_policy {
            next.matching.policy = policy;
        }
        if let Some(marker) = update.header_marker {
            next.matching.header_marker = marker;
        }
        if let Some(rows) = update.header_scan_rows {
            next.matching.header_scan_rows = rows;
        }
        if let Some(marker) = update.interior_marker {
            next.matching.interior_marker = marker;
        }
        if let Some(options) = update.markup_options {
            next.markup.options = options;
        }
        if let Some(mapping) = update.column_mapping {
            let kind = update.layout.ok_or_else(|| {
                BoqError::InvalidRequest("column_mapping requires layout (interior/system)".into())
            })?;
            let columns = next.layouts.columns_for_mut(kind);
            for (field, column) in mapping {
                columns.set_field(&field, column)?;
            }
        }

        next.validate().map_err(|e| match e {
            BoqError::Config(message) => BoqError::InvalidRequest(message),
            other => other,
        })?;
        *self = next;
        Ok(())
    }

    /// 必要なディレクトリを作成
    pub fn ensure_storage_dirs(&self) -> Result<()> {
        std::fs::create_dir_all(&self.storage.upload_dir)?;
        std::fs::create_dir_all(&self.storage.output_dir)?;
        if let Some(parent) = self.storage.database_path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_default_config_is_valid() {
        let config = Config::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.matching.header_marker, "ลำดับ");
        assert_eq!(config.matching.policy, MatchPolicy::Exact);
        assert_eq!(config.layouts.system.total, 12);
    }

    #[test]
    fn test_save_and_load_roundtrip() {
        let dir = tempdir().expect("Failed to create temp dir");
        let path = dir.path().join("nested").join("config.json");

        let mut config = Config::default();
        config.server.port = 8080;
        config.markup.options = vec![Decimal::from(30), Decimal::from(100)];
        config.save_to(&path).unwrap();

        let loaded = Config::load_from(&path).unwrap();
        assert_eq!(loaded.server.port, 8080);
        assert_eq!(loaded.markup.options, vec![Decimal::from(30), Decimal::from(100)]);
    }

    #[test]
    fn test_load_missing_returns_default() {
        let dir = tempdir().expect("Failed to create temp dir");
        let config = Config::load_from(&dir.path().join("none.json")).unwrap();
        assert_eq!(config.server.port, 5000);
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let config: Config = serde_json::from_str(r#"{"matching": {"policy": "normalized"}}"#).unwrap();
        assert_eq!(config.matching.policy, MatchPolicy::Normalized);
        assert_eq!(config.matching.header_scan_rows, 20);
    }

    #[test]
    fn test_apply_update_column_mapping() {
        let mut config = Config::default();
        let update = ConfigUpdate {
            layout: Some(LayoutKind::Interior),
            column_mapping: Some(HashMap::from([("material".to_string(), 9)])),
            ..Default::default()
        };
        config.apply_update(update).unwrap();
        assert_eq!(config.layouts.interior.material, 9);
        assert_eq!(config.layouts.system.material, 8);
    }

    #[test]
    fn test_apply_update_rejects_zero_column() {
        let mut config = Config::default();
        let update = ConfigUpdate {
            header_marker: Some("No.".into()),
            layout: Some(LayoutKind::System),
            column_mapping: Some(HashMap::from([("name".to_string(), 0)])),
            ..Default::default()
        };
        assert!(config.apply_update(update).is_err());
        // 失敗時は変更なし
        assert_eq!(config.matching.header_marker, "ลำดับ");
    }

    #[test]
    fn test_apply_update_requires_layout_for_mapping() {
        let mut config = Config::default();
        let update = ConfigUpdate {
            column_mapping: Some(HashMap::from([("code".to_string(), 1)])),
            ..Default::default()
        };
        assert!(matches!(config.apply_update(update), Err(BoqError::InvalidRequest(_))));
    }

    #[test]
    fn test_update_rejects_unknown_field() {
        let result: std::result::Result<ConfigUpdate, _> = serde_json::from_str(r#"{"api_key": "x"}"#);
        assert!(result.is_err());
    }
}
