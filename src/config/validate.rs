// src/config/validate.rs

use crate::config::model::{ConfigFile, PoolEntryConfig, RawConfigFile};
use crate::errors::{MinionError, Result};
use crate::page::PageQuery;

impl TryFrom<RawConfigFile> for ConfigFile {
    type Error = MinionError;

    fn try_from(raw: RawConfigFile) -> std::result::Result<Self, Self::Error> {
        validate_raw_config(&raw)?;
        Ok(ConfigFile::new_unchecked(raw))
    }
}

fn config_error(msg: impl Into<String>) -> MinionError {
    MinionError::ConfigError(msg.into())
}

fn validate_raw_config(cfg: &RawConfigFile) -> Result<()> {
    ensure_has_pool(cfg)?;
    validate_minion_section(cfg)?;
    validate_pages(cfg)?;
    for (index, entry) in cfg.pool.iter().enumerate() {
        validate_pool_entry(index, entry)?;
    }
    Ok(())
}

fn ensure_has_pool(cfg: &RawConfigFile) -> Result<()> {
    if cfg.pool.is_empty() {
        return Err(config_error(
            "config must contain at least one [[pool]] entry",
        ));
    }
    Ok(())
}

fn validate_minion_section(cfg: &RawConfigFile) -> Result<()> {
    let m = &cfg.minion;
    for (key, value) in [
        ("poll_interval_ms", m.poll_interval_ms),
        ("tick_interval_ms", m.tick_interval_ms),
        ("page_retry_ms", m.page_retry_ms),
    ] {
        if value == 0 {
            return Err(config_error(format!(
                "[minion].{key} must be >= 1 (got 0)"
            )));
        }
    }

    if m.user_agent.as_deref().is_some_and(|ua| ua.trim().is_empty()) {
        return Err(config_error("[minion].user_agent must not be empty"));
    }

    Ok(())
}

fn validate_pages(cfg: &RawConfigFile) -> Result<()> {
    for (index, page) in cfg.page.iter().enumerate() {
        if page.url.trim().is_empty() {
            return Err(config_error(format!("[[page]] #{index} has an empty url")));
        }
    }
    Ok(())
}

fn validate_pool_entry(index: usize, entry: &PoolEntryConfig) -> Result<()> {
    let label = format!("[[pool]] #{index} ({})", entry.name());

    let query = entry.query();
    if query.trim().is_empty() {
        return Err(config_error(format!("{label}: `query` must not be empty")));
    }
    PageQuery::parse(query)
        .map_err(|e| config_error(format!("{label}: invalid query pattern '{query}': {e}")))?;

    match entry {
        PoolEntryConfig::Probe(cfg) => {
            if cfg.selector.as_deref().is_some_and(|s| s.trim().is_empty()) {
                return Err(config_error(format!(
                    "{label}: `selector` must not be empty when set"
                )));
            }
        }
        PoolEntryConfig::Cycle(cfg) => {
            let required = [
                ("action", cfg.action.as_str()),
                ("countdown", cfg.countdown.as_str()),
                ("confirm_url", cfg.confirm_url.as_str()),
            ];
            for (key, value) in required {
                if value.trim().is_empty() {
                    return Err(config_error(format!("{label}: `{key}` must not be empty")));
                }
            }
            let optional = [
                ("claim", cfg.claim.as_deref()),
                ("approve", cfg.approve.as_deref()),
                ("balance_url", cfg.balance_url.as_deref()),
            ];
            for (key, value) in optional {
                if value.is_some_and(|v| v.trim().is_empty()) {
                    return Err(config_error(format!(
                        "{label}: `{key}` must not be empty when set"
                    )));
                }
            }
        }
    }

    Ok(())
}
