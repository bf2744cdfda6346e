// src/errors.rs

//! Crate-wide error aliases and helpers.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum MinionError {
    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("TOML parsing error: {0}")]
    TomlError(#[from] toml::de::Error),

    #[error("Data store value error: {0}")]
    Data(#[from] serde_json::Error),

    #[error("Invalid task state: {0}")]
    InvalidState(String),

    #[error("Step not registered: {0}")]
    UnknownStep(String),

    #[error("Task has no registered steps: {0}")]
    NoSteps(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub type Result<T> = std::result::Result<T, MinionError>;
