// src/tasks/mod.rs

//! Built-in tasks and the mapping from `[[pool]]` entries to factories.

use tracing::debug;

use crate::config::{ConfigFile, PoolEntryConfig};
use crate::data::DataStore;
use crate::errors::{MinionError, Result};
use crate::minion::SharedFactory;
use crate::page::PageQuery;
use crate::task::step_factory;

pub mod cycle;
pub mod probe;

pub use cycle::{Cycle, CycleStats, CycleStep, DATA_KEY_CYCLE};
pub use probe::{Probe, ProbeStep};

/// Build the factory for one pool entry.
pub fn factory_for(entry: &PoolEntryConfig) -> Result<SharedFactory> {
    let query = PageQuery::parse(entry.query()).map_err(|e| {
        MinionError::ConfigError(format!("invalid query '{}': {e}", entry.query()))
    })?;
    let name = entry.name().to_string();

    let factory = match entry {
        PoolEntryConfig::Probe(cfg) => {
            let cfg = cfg.clone();
            let task_name = name.clone();
            step_factory(name, move || Probe::new(task_name.clone(), query.clone(), cfg.clone()))
        }
        PoolEntryConfig::Cycle(cfg) => {
            let cfg = cfg.clone();
            let task_name = name.clone();
            step_factory(name, move || Cycle::new(task_name.clone(), query.clone(), cfg.clone()))
        }
    };
    Ok(factory)
}

/// One-time setup of shared task state before the pool starts.
pub fn initialize(cfg: &ConfigFile, data: &DataStore) -> Result<()> {
    if cfg
        .pool
        .iter()
        .any(|e| matches!(e, PoolEntryConfig::Cycle(_)))
    {
        cycle::initialize(data)?;
        debug!("cycle counters reset");
    }
    Ok(())
}
