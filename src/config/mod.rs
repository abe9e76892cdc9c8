// src/config/mod.rs
pub mod refresh;

pub use refresh::{FallbackKind, FallbackSetting, FallbackTable, RefreshConfig};
