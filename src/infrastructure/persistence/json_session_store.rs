//! JSON Session Store - 阅读进度文件存储
//!
//! 所有文本的进度存在一个 JSON 文件中（key -> SessionRecord），
//! 写入时先写临时文件再重命名

use async_trait::async_trait;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::sync::Mutex;

use crate::application::ports::{SessionRecord, SessionStoreError, SessionStorePort};

type SessionMap = BTreeMap<String, SessionRecord>;

/// JSON 文件会话存储
pub struct JsonSessionStore {
    path: PathBuf,
    /// 串行化读改写
    write_lock: Mutex<()>,
}

impl JsonSessionStore {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            write_lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn read_all(&self) -> Result<SessionMap, SessionStoreError> {
        let data = match fs::read(&self.path).await {
            Ok(data) => data,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(SessionMap::new()),
            Err(e) => return Err(SessionStoreError::Io(e.to_string())),
        };
        if data.is_empty() {
            return Ok(SessionMap::new());
        }
        serde_json::from_slice(&data).map_err(|e| SessionStoreError::Corrupt(e.to_string()))
    }

    async fn write_all(&self, sessions: &SessionMap) -> Result<(), SessionStoreError> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)
                .await
                .map_err(|e| SessionStoreError::Io(e.to_string()))?;
        }

        let data = serde_json::to_vec_pretty(sessions)
            .map_err(|e| SessionStoreError::Corrupt(e.to_string()))?;
        let tmp_path = self.path.with_extension("json.tmp");
        fs::write(&tmp_path, data)
            .await
            .map_err(|e| SessionStoreError::Io(e.to_string()))?;
        fs::rename(&tmp_path, &self.path)
            .await
            .map_err(|e| SessionStoreError::Io(e.to_string()))
    }
}

#[async_trait]
impl SessionStorePort for JsonSessionStore {
    async fn load(&self, key: &str) -> Result<Option<SessionRecord>, SessionStoreError> {
        let mut sessions = self.read_all().await?;
        Ok(sessions.remove(key))
    }

    async fn save(&self, record: &SessionRecord) -> Result<(), SessionStoreError> {
        let _guard = self.write_lock.lock().await;
        let mut sessions = match self.read_all().await {
            Ok(sessions) => sessions,
            Err(SessionStoreError::Corrupt(e)) => {
                tracing::warn!(path = %self.path.display(), error = %e, "Session file corrupt, starting fresh");
                SessionMap::new()
            }
            Err(e) => return Err(e),
        };
        sessions.insert(record.key.clone(), record.clone());
        self.write_all(&sessions).await?;

        tracing::debug!(key = %record.key, char_offset = record.char_offset, "Session saved");
        Ok(())
    }
}
