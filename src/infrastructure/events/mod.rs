//! Events Layer - 流水线事件广播

mod publisher;

pub use publisher::{EventPublisher, PipelineEvent};
