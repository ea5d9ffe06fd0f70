//! Persistence Layer - 数据持久化
//!
//! 阅读进度的 JSON 文件存储

mod json_session_store;

pub use json_session_store::JsonSessionStore;
