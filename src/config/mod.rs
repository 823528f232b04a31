// src/config/mod.rs
// Configuration surface: environment, ignore lists.

pub mod env;

pub use env::{ConfigValidation, EmbeddingConfig, EnvConfig, IndexerConfig, SyncConfig, log_level_override};
