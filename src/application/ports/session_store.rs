//! Session Store Port - 阅读进度持久化抽象
//!
//! 核心只提供字符偏移，存储格式由适配器决定

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// 会话存储错误
#[derive(Debug, Error)]
pub enum SessionStoreError {
    #[error("IO error: {0}")]
    Io(String),

    #[error("Corrupt session data: {0}")]
    Corrupt(String),
}

/// 阅读进度记录
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionRecord {
    /// 文本标识（通常是文件路径）
    pub key: String,
    /// 原文字符偏移
    pub char_offset: usize,
    /// 原文字符总数
    pub total_chars: usize,
    pub updated_at: DateTime<Utc>,
}

impl SessionRecord {
    pub fn new(key: impl Into<String>, char_offset: usize, total_chars: usize) -> Self {
        Self {
            key: key.into(),
            char_offset,
            total_chars,
            updated_at: Utc::now(),
        }
    }

    /// 是否已读完
    pub fn is_finished(&self) -> bool {
        self.char_offset >= self.total_chars
    }
}

/// Session Store Port
#[async_trait]
pub trait SessionStorePort: Send + Sync {
    /// 读取某个文本的进度
    async fn load(&self, key: &str) -> Result<Option<SessionRecord>, SessionStoreError>;

    /// 保存进度（同一 key 覆盖）
    async fn save(&self, record: &SessionRecord) -> Result<(), SessionStoreError>;
}
