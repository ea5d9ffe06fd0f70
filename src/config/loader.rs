//! Configuration Loader
//!
//! 实现多源配置加载与合并逻辑
//!
//! 优先级（从高到低）：
//! 1. 环境变量
//! 2. 配置文件（config.toml）
//! 3. 默认值

use config::{Config, ConfigError as ConfigCrateError, Environment, File};
use std::path::Path;
use thiserror::Error;

use super::types::AppConfig;

/// 配置加载错误
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to load configuration: {0}")]
    LoadError(String),

    #[error("Failed to parse configuration: {0}")]
    ParseError(String),

    #[error("Configuration validation failed: {0}")]
    ValidationError(String),
}

impl From<ConfigCrateError> for ConfigError {
    fn from(err: ConfigCrateError) -> Self {
        ConfigError::LoadError(err.to_string())
    }
}

/// 配置文件搜索路径
const CONFIG_FILE_NAMES: &[&str] = &["config", "config.local"];

/// 加载应用配置
///
/// 按优先级从高到低合并配置：
/// 1. 环境变量（前缀 `NARRATE_`，层级分隔符 `__`）
/// 2. 配置文件（config.toml 或 config.local.toml）
/// 3. 默认值
///
/// # 环境变量示例
/// - `NARRATE_TTS__URL=http://tts-server:8000`
/// - `NARRATE_TTS__ENGINE=fake`
/// - `NARRATE_PLAYBACK__OUTPUT=device`
/// - `NARRATE_SYNTHESIS__WORKERS=4`
pub fn load_config() -> Result<AppConfig, ConfigError> {
    load_config_from_path(None)
}

/// 从指定路径加载配置
///
/// # 参数
/// - `config_path` - 可选的配置文件路径，如果为 None 则使用默认搜索路径
pub fn load_config_from_path(config_path: Option<&Path>) -> Result<AppConfig, ConfigError> {
    let mut builder = Config::builder();

    // 1. 默认值（最低优先级）
    builder = builder
        .set_default("chunking.target_words", 150)?
        .set_default("chunking.threshold_words", 200)?
        .set_default("chunking.max_chunks", 10_000)?
        .set_default("synthesis.workers", 2)?
        .set_default("synthesis.max_attempts", 2)?
        .set_default("synthesis.max_consecutive_failures", 3)?
        .set_default("synthesis.queue_depth", 4)?
        .set_default("buffer.capacity", 10)?
        .set_default("playback.seek_secs", 5)?
        .set_default("playback.debounce_ms", 100)?
        .set_default("playback.frame_ms", 20)?
        .set_default("playback.history_chunks", 2)?
        .set_default("playback.lead_frames", 3)?
        .set_default("playback.join_timeout_ms", 2000)?
        .set_default("playback.output", "null")?
        .set_default("tts.engine", "http")?
        .set_default("tts.url", "http://localhost:8000")?
        .set_default("tts.timeout_secs", 120)?
        .set_default("session.enabled", true)?
        .set_default("session.path", "data/sessions.json")?
        .set_default("session.interval_secs", 5)?
        .set_default("log.level", "info")?;

    // 2. 配置文件（如果存在）
    if let Some(path) = config_path {
        builder = builder.add_source(File::from(path).required(true));
    } else {
        for name in CONFIG_FILE_NAMES {
            builder = builder.add_source(File::with_name(name).required(false));
        }
    }

    // 3. 环境变量（最高优先级），例如 NARRATE_TTS__URL
    builder = builder.add_source(
        Environment::with_prefix("NARRATE")
            .prefix_separator("_")
            .separator("__")
            .try_parsing(true),
    );

    let config = builder.build()?;

    let app_config: AppConfig = config.try_deserialize().map_err(|e| {
        ConfigError::ParseError(format!("Failed to deserialize config: {}", e))
    })?;

    validate_config(&app_config)?;

    Ok(app_config)
}

/// 验证配置有效性
fn validate_config(config: &AppConfig) -> Result<(), ConfigError> {
    if config.chunking.target_words == 0 {
        return Err(ConfigError::ValidationError(
            "chunking.target_words cannot be 0".to_string(),
        ));
    }

    if config.chunking.max_chunks == 0 {
        return Err(ConfigError::ValidationError(
            "chunking.max_chunks cannot be 0".to_string(),
        ));
    }

    if config.synthesis.workers == 0 {
        return Err(ConfigError::ValidationError(
            "synthesis.workers cannot be 0".to_string(),
        ));
    }

    if config.synthesis.max_attempts == 0 {
        return Err(ConfigError::ValidationError(
            "synthesis.max_attempts cannot be 0".to_string(),
        ));
    }

    if config.buffer.capacity == 0 {
        return Err(ConfigError::ValidationError(
            "buffer.capacity cannot be 0".to_string(),
        ));
    }

    if config.playback.frame_ms == 0 {
        return Err(ConfigError::ValidationError(
            "playback.frame_ms cannot be 0".to_string(),
        ));
    }

    if config.tts.url.is_empty() {
        return Err(ConfigError::ValidationError(
            "TTS URL cannot be empty".to_string(),
        ));
    }

    if config.session.enabled && config.session.interval_secs == 0 {
        return Err(ConfigError::ValidationError(
            "Session interval cannot be 0 when sessions are enabled".to_string(),
        ));
    }

    Ok(())
}

/// 打印配置信息（用于启动时日志）
pub fn print_config(config: &AppConfig) {
    tracing::info!("=== Application Configuration ===");
    tracing::info!(
        "Chunking: target {} words, threshold {} words, max {} chunks",
        config.chunking.target_words,
        config.chunking.threshold_words,
        config.chunking.max_chunks
    );
    tracing::info!(
        "Synthesis: {} workers, {} attempts, queue depth {}",
        config.synthesis.workers,
        config.synthesis.max_attempts,
        config.synthesis.queue_depth
    );
    tracing::info!("Buffer Capacity: {} chunks", config.buffer.capacity);
    tracing::info!(
        "Playback: seek {}s, debounce {}ms, frame {}ms, lead {} frames, output {:?}",
        config.playback.seek_secs,
        config.playback.debounce_ms,
        config.playback.frame_ms,
        config.playback.lead_frames,
        config.playback.output
    );
    tracing::info!("TTS Engine: {:?}", config.tts.engine);
    tracing::info!("TTS URL: {}", config.tts.url);
    tracing::info!("TTS Timeout: {}s", config.tts.timeout_secs);
    tracing::info!("Session Enabled: {}", config.session.enabled);
    if config.session.enabled {
        tracing::info!("Session File: {:?}", config.session.path);
        tracing::info!("Session Interval: {}s", config.session.interval_secs);
    }
    tracing::info!("Log Level: {}", config.log.level);
    tracing::info!("=================================");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::types::{OutputMode, TtsEngineKind};
    use tempfile::TempDir;

    #[test]
    fn test_load_from_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("narrate.toml");
        std::fs::write(
            &path,
            r#"
[tts]
engine = "fake"
voice = "narrator"

[playback]
output = "device"
seek_secs = 10

[buffer]
capacity = 4
"#,
        )
        .unwrap();

        let config = load_config_from_path(Some(&path)).unwrap();
        assert_eq!(config.tts.engine, TtsEngineKind::Fake);
        assert_eq!(config.tts.voice.as_deref(), Some("narrator"));
        assert_eq!(config.playback.output, OutputMode::Device);
        assert_eq!(config.playback.seek_secs, 10);
        assert_eq!(config.buffer.capacity, 4);
        // 未设置的字段使用默认值
        assert_eq!(config.playback.frame_ms, 20);
        assert_eq!(config.chunking.target_words, 150);
    }

    #[test]
    fn test_missing_required_file_fails() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("absent.toml");
        assert!(load_config_from_path(Some(&path)).is_err());
    }

    #[test]
    fn test_validation_passes_for_valid_config() {
        let config = AppConfig::default();
        assert!(validate_config(&config).is_ok());
    }

    #[test]
    fn test_validation_error_for_zero_capacity() {
        let mut config = AppConfig::default();
        config.buffer.capacity = 0;
        assert!(validate_config(&config).is_err());
    }

    #[test]
    fn test_validation_error_for_zero_workers() {
        let mut config = AppConfig::default();
        config.synthesis.workers = 0;
        assert!(validate_config(&config).is_err());
    }

    #[test]
    fn test_validation_error_for_empty_tts_url() {
        let mut config = AppConfig::default();
        config.tts.url = String::new();
        assert!(validate_config(&config).is_err());
    }
}
