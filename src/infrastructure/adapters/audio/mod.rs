//! Audio Output Adapters

mod memory_output;
#[cfg(feature = "device")]
mod cpal_output;

pub use memory_output::{MemoryOutput, OutputLog};
#[cfg(feature = "device")]
pub use cpal_output::CpalOutput;
