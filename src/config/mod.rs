// src/config/mod.rs

//! Configuration loading and validation for minion.
//!
//! Responsibilities:
//! - Define the TOML-backed data model (`model.rs`).
//! - Load a config file from disk (`loader.rs`).
//! - Validate intervals, page queries and pool entries (`validate.rs`).

pub mod loader;
pub mod model;
pub mod validate;

pub use loader::{load_and_validate, load_from_path};
pub use model::{
    AccountSection, ConfigFile, CycleConfig, MinionSection, PageConfig, PoolEntryConfig,
    ProbeConfig, RawConfigFile,
};
