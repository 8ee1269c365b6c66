//! 処理セッション
//!
//! 状態は Created → Processed → Finalized → Cleaned の順にしか進まない。
//! ロックは読み取り（複製）と遷移の確定にだけ使い、Excelの読み書き中は保持しない。

use crate::error::{BoqError, Result};
use crate::matcher::ProcessedSheet;
use boq_cost_common::SessionSummary;
use chrono::{DateTime, Local};
use std::collections::HashMap;
use std::fmt;
use std::path::PathBuf;
use std::sync::{Mutex, MutexGuard};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionState {
    Created,
    Processed,
    Finalized { output: PathBuf },
    Cleaned,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SessionState::Created => "created",
            SessionState::Processed => "processed",
            SessionState::Finalized { .. } => "finalized",
            SessionState::Cleaned => "cleaned",
        };
        write!(f, "{}", s)
    }
}

#[derive(Debug, Clone)]
pub struct Session {
    pub id: String,
    /// アップロードの保存先
    pub source_path: PathBuf,
    pub original_name: String,
    pub state: SessionState,
    pub sheets: Vec<ProcessedSheet>,
    pub summary: SessionSummary,
    /// このセッションが生成したファイル
    pub outputs: Vec<PathBuf>,
    pub created_at: DateTime<Local>,
}

impl Session {
    pub fn new(source_path: PathBuf, original_name: impl Into<String>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            source_path,
            original_name: original_name.into(),
            state: SessionState::Created,
            sheets: Vec::new(),
            summary: SessionSummary::default(),
            outputs: Vec::new(),
            created_at: Local::now(),
        }
    }

    fn invalid_state(&self, expected: &str) -> BoqError {
        BoqError::InvalidSessionState {
            expected: expected.to_string(),
            actual: self.state.to_string(),
        }
    }

    pub fn ensure_created(&self) -> Result<()> {
        match self.state {
            SessionState::Created => Ok(()),
            _ => Err(self.invalid_state("created")),
        }
    }

    pub fn ensure_processed(&self) -> Result<()> {
        match self.state {
            SessionState::Processed => Ok(()),
            _ => Err(self.invalid_state("processed")),
        }
    }

    /// マークアップ系は処理済み・確定済みのどちらでも可
    pub fn ensure_priced(&self) -> Result<()> {
        match self.state {
            SessionState::Processed | SessionState::Finalized { .. } => Ok(()),
            _ => Err(self.invalid_state("processed or finalized")),
        }
    }
}

/// セッション置き場
#[derive(Default)]
pub struct SessionStore {
    sessions: Mutex<HashMap<String, Session>>,
}

impl SessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<MutexGuard<'_, HashMap<String, Session>>> {
        self.sessions
            .lock()
            .map_err(|_| BoqError::Config("session lock poisoned".into()))
    }

    pub fn insert(&self, session: Session) -> Result<String> {
        let id = session.id.clone();
        self.lock()?.insert(id.clone(), session);
        Ok(id)
    }

    /// 現在の内容の複製
    pub fn get(&self, id: &str) -> Result<Session> {
        self.lock()?
            .get(id)
            .cloned()
            .ok_or_else(|| BoqError::SessionNotFound(id.to_string()))
    }

    /// ロックを取ったまま遷移を確定する
    pub fn update<T, F>(&self, id: &str, f: F) -> Result<T>
    where
        F: FnOnce(&mut Session) -> Result<T>,
    {
        let mut sessions = self.lock()?;
        let session = sessions
            .get_mut(id)
            .ok_or_else(|| BoqError::SessionNotFound(id.to_string()))?;
        f(session)
    }

    pub fn remove(&self, id: &str) -> Result<Session> {
        self.lock()?
            .remove(id)
            .ok_or_else(|| BoqError::SessionNotFound(id.to_string()))
    }

    pub fn len(&self) -> usize {
        self.lock().map(|s| s.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_checks() {
        let mut session = Session::new(PathBuf::from("a.xlsx"), "a.xlsx");
        assert!(session.ensure_created().is_ok());
        assert!(session.ensure_priced().is_err());

        session.state = SessionState::Processed;
        assert!(session.ensure_processed().is_ok());
        assert!(session.ensure_priced().is_ok());

        session.state = SessionState::Finalized { output: PathBuf::from("out.xlsx") };
        assert!(session.ensure_priced().is_ok());
        match session.ensure_processed() {
            Err(BoqError::InvalidSessionState { expected, actual }) => {
                assert_eq!(expected, "processed");
                assert_eq!(actual, "finalized");
            }
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[test]
    fn test_store_update_and_remove() {
        let store = SessionStore::new();
        let id = store.insert(Session::new(PathBuf::from("a.xlsx"), "a.xlsx")).unwrap();
        assert_eq!(store.len(), 1);

        store
            .update(&id, |s| {
                s.ensure_created()?;
                s.state = SessionState::Processed;
                Ok(())
            })
            .unwrap();
        assert_eq!(store.get(&id).unwrap().state, SessionState::Processed);

        // 2回目の確定は状態チェックで失敗する
        let second = store.update(&id, |s| s.ensure_created());
        assert!(matches!(second, Err(BoqError::InvalidSessionState { .. })));

        store.remove(&id).unwrap();
        assert!(store.is_empty());
        let err = store.get(&id).unwrap_err();
        assert_eq!(err.to_string(), "session not found");
    }
}
