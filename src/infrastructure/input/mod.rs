//! Input - 用户命令来源

mod keyboard;

pub use keyboard::{map_key, InputError, KeyboardListener};
