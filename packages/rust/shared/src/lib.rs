//! Shared types, error model, and configuration for Ragline.
//!
//! This crate is the foundation depended on by all other Ragline crates.
//! It provides:
//! - [`RaglineError`]: the unified error type
//! - Domain types ([`SourceCandidate`], [`Fragment`], [`FragmentSet`], [`PersistedEvent`])
//! - Configuration ([`AppConfig`], [`PipelineConfig`], config loading)

pub mod config;
pub mod error;
pub mod types;

// Re-export public API at crate root for ergonomic imports.
pub use config::{
    AppConfig, OpenAiConfig, PipelineConfig, PipelineSection, SearchConfig, StorageConfig,
    api_key, config_dir, config_file_path, init_config, load_config, load_config_from,
    resolve_db_path,
};
pub use error::{RaglineError, Result};
pub use types::{
    EventId, EventKind, EventPayload, Fragment, FragmentSet, MAX_SOURCES, PersistedEvent, RunId,
    SourceCandidate, VECTOR_CREATION_DONE,
};
