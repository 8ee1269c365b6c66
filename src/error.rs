use thiserror::Error;

#[derive(Error, Debug)]
pub enum BoqError {
    #[error("config error: {0}")]
    Config(String),

    #[error("file not found: {0}")]
    FileNotFound(String),

    #[error("no header row found in sheet '{0}'")]
    NoHeaderFound(String),

    #[error("no processable sheet in workbook: {0}")]
    NoProcessableSheet(String),

    /// 表示文字列はAPIレスポンスにそのまま使われる
    #[error("session not found")]
    SessionNotFound(String),

    #[error("invalid session state: expected {expected}, found {actual}")]
    InvalidSessionState { expected: String, actual: String },

    #[error("database unavailable: {0}")]
    DatabaseUnavailable(String),

    #[error("master item not found: {0}")]
    MasterItemNotFound(i64),

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("workbook read error: {0}")]
    WorkbookRead(String),

    #[error("workbook write error: {0}")]
    WorkbookWrite(String),

    #[error("JSON error: {0}")]
    JsonParse(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Common(#[from] boq_cost_common::Error),
}

impl From<rusqlite::Error> for BoqError {
    fn from(err: rusqlite::Error) -> Self {
        BoqError::DatabaseUnavailable(err.to_string())
    }
}

impl From<calamine::XlsxError> for BoqError {
    fn from(err: calamine::XlsxError) -> Self {
        BoqError::WorkbookRead(err.to_string())
    }
}

impl From<zip::result::ZipError> for BoqError {
    fn from(err: zip::result::ZipError) -> Self {
        BoqError::WorkbookWrite(err.to_string())
    }
}

impl From<quick_xml::Error> for BoqError {
    fn from(err: quick_xml::Error) -> Self {
        BoqError::WorkbookWrite(format!("xml: {}", err))
    }
}

impl From<quick_xml::events::attributes::AttrError> for BoqError {
    fn from(err: quick_xml::events::attributes::AttrError) -> Self {
        BoqError::WorkbookWrite(format!("xml attribute: {}", err))
    }
}

pub type Result<T> = std::result::Result<T, BoqError>;
