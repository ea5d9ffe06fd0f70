//! Narrate - 流式 TTS 朗读
//!
//! 用法: `narrate <FILE>`
//!
//! 按键: 空格 暂停/继续，←/→ 跳转，q 退出

use anyhow::Context;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use narrate::application::ports::{AudioOutputPort, SessionStorePort, TtsEnginePort};
use narrate::config::{load_config, print_config, OutputMode, TtsEngineKind};
use narrate::infrastructure::adapters::{
    FakeTtsClient, HttpTtsClient, HttpTtsClientConfig, MemoryOutput,
};
use narrate::infrastructure::events::EventPublisher;
use narrate::infrastructure::input::KeyboardListener;
use narrate::infrastructure::persistence::JsonSessionStore;
use narrate::infrastructure::pipeline::{PipelineConfig, ReadAloudPipeline};
use narrate::infrastructure::session::SessionRecorder;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // 加载配置（优先级：环境变量 > 配置文件 > 默认值）
    let config = load_config().map_err(|e| anyhow::anyhow!("Failed to load config: {}", e))?;

    // 初始化日志（输出到 stderr，终端留给按键）
    let log_filter = format!("{},narrate={}", config.log.level, config.log.level);
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&log_filter)),
        )
        .with_writer(std::io::stderr)
        .init();

    let path = std::env::args_os()
        .nth(1)
        .map(PathBuf::from)
        .context("usage: narrate <FILE>")?;
    let text = tokio::fs::read_to_string(&path)
        .await
        .with_context(|| format!("Failed to read {}", path.display()))?;
    let text: Arc<str> = Arc::from(text);
    let total_chars = text.chars().count();
    let key = std::fs::canonicalize(&path)
        .unwrap_or_else(|_| path.clone())
        .display()
        .to_string();

    tracing::info!("Narrate - 流式 TTS 朗读");
    print_config(&config);

    // 阅读进度
    let store: Option<Arc<dyn SessionStorePort>> = if config.session.enabled {
        Some(Arc::new(JsonSessionStore::new(&config.session.path)))
    } else {
        None
    };
    let start_offset = match &store {
        Some(store) => resume_offset(store.as_ref(), &key, total_chars).await,
        None => 0,
    };

    // 合成后端
    let tts_engine: Arc<dyn TtsEnginePort> = match config.tts.engine {
        TtsEngineKind::Http => {
            let client = HttpTtsClient::new(
                HttpTtsClientConfig::new(&config.tts.url).with_timeout(config.tts.timeout_secs),
            )?;
            if !client.health_check().await {
                tracing::warn!(url = %config.tts.url, "TTS service health check failed");
            }
            Arc::new(client)
        }
        TtsEngineKind::Fake => Arc::new(FakeTtsClient::with_defaults()),
    };

    let output = open_output(config.playback.output)?;

    // 事件只用于诊断日志
    let event_publisher = Arc::new(EventPublisher::new());
    let mut events = event_publisher.subscribe();
    tokio::spawn(async move {
        while let Ok(event) = events.recv().await {
            tracing::debug!(event = ?event, "Pipeline event");
        }
    });

    let pipeline = ReadAloudPipeline::new(
        PipelineConfig::from(&config),
        tts_engine,
        event_publisher,
    );
    let running = pipeline.start(text, start_offset, output);

    let recorder = store.map(|store| {
        let recorder = SessionRecorder::new(store, key.clone(), total_chars, running.watcher())
            .with_interval(Duration::from_secs(config.session.interval_secs));
        tokio::spawn(recorder.run())
    });

    let listener = KeyboardListener::new(running.handle());
    tokio::spawn(async move {
        if let Err(e) = listener.run().await {
            tracing::warn!(error = %e, "Keyboard input unavailable");
        }
    });

    let signal_handle = running.handle();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("Received shutdown signal");
            signal_handle.quit().await;
        }
    });

    let outcome = running.wait().await;

    if let Some(recorder) = recorder {
        if let Ok(Some(offset)) = recorder.await {
            tracing::info!(key = %key, char_offset = offset, "Progress saved");
        }
    }

    let report = outcome?;
    tracing::info!(
        reason = report.reason.as_str(),
        played = report.played,
        gaps = ?report.gaps,
        final_offset = report.final_offset,
        "Narration finished"
    );

    Ok(())
}

/// 读取上次的进度；读完或损坏时从头开始
async fn resume_offset(store: &dyn SessionStorePort, key: &str, total_chars: usize) -> usize {
    match store.load(key).await {
        Ok(Some(record)) if !record.is_finished() && record.char_offset < total_chars => {
            tracing::info!(
                key = %key,
                char_offset = record.char_offset,
                updated_at = %record.updated_at,
                "Resuming from saved progress"
            );
            record.char_offset
        }
        Ok(_) => 0,
        Err(e) => {
            tracing::warn!(key = %key, error = %e, "Failed to load progress, starting from the beginning");
            0
        }
    }
}

fn open_output(mode: OutputMode) -> anyhow::Result<Box<dyn AudioOutputPort>> {
    match mode {
        OutputMode::Null => Ok(Box::new(MemoryOutput::new())),
        #[cfg(feature = "device")]
        OutputMode::Device => Ok(Box::new(
            narrate::infrastructure::adapters::CpalOutput::new(),
        )),
        #[cfg(not(feature = "device"))]
        OutputMode::Device => {
            anyhow::bail!("playback.output = \"device\" requires building with the `device` feature")
        }
    }
}
