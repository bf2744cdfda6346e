// src/config/model.rs

use std::collections::BTreeMap;
use std::time::Duration;

use serde::Deserialize;

use crate::data::AccountInfo;
use crate::minion::MinionSettings;
use crate::page::PageFallback;
use crate::task::TickPolicy;
use crate::user_agent::resolve_user_agent;

/// Top-level configuration as read from a TOML file, before validation.
///
/// ```toml
/// [minion]
/// poll_interval_ms = 500
/// task_interval_secs = 5
///
/// [account]
/// account = "abcde.wam"
///
/// [[page]]
/// title = "Home"
/// url = "https://example.test/"
///
/// [[pool]]
/// kind = "probe"
/// query = "Home"
/// ```
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawConfigFile {
    #[serde(default)]
    pub minion: MinionSection,

    #[serde(default)]
    pub account: AccountSection,

    /// Pages pre-opened in the in-memory browser.
    #[serde(default)]
    pub page: Vec<PageConfig>,

    /// Pool entries in the order they are added.
    #[serde(default)]
    pub pool: Vec<PoolEntryConfig>,
}

/// Validated configuration. Build it with `ConfigFile::try_from(raw)`.
#[derive(Debug, Clone)]
pub struct ConfigFile {
    pub minion: MinionSection,
    pub account: AccountSection,
    pub page: Vec<PageConfig>,
    pub pool: Vec<PoolEntryConfig>,
}

impl ConfigFile {
    pub(crate) fn new_unchecked(raw: RawConfigFile) -> Self {
        Self {
            minion: raw.minion,
            account: raw.account,
            page: raw.page,
            pool: raw.pool,
        }
    }
}

/// `[minion]` section.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MinionSection {
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    /// Pool-wide pause after every settled run.
    #[serde(default = "default_task_interval_secs")]
    pub task_interval_secs: u64,

    #[serde(default = "default_tick_interval_ms")]
    pub tick_interval_ms: u64,

    /// Consecutive ticks before a step gives up; `0` never gives up.
    #[serde(default)]
    pub max_ticks: u32,

    #[serde(default = "default_page_retry_ms")]
    pub page_retry_ms: u64,

    /// Random built-in agent when unset.
    #[serde(default)]
    pub user_agent: Option<String>,
}

fn default_poll_interval_ms() -> u64 {
    500
}

fn default_task_interval_secs() -> u64 {
    5
}

fn default_tick_interval_ms() -> u64 {
    3_000
}

fn default_page_retry_ms() -> u64 {
    500
}

impl Default for MinionSection {
    fn default() -> Self {
        Self {
            poll_interval_ms: default_poll_interval_ms(),
            task_interval_secs: default_task_interval_secs(),
            tick_interval_ms: default_tick_interval_ms(),
            max_ticks: 0,
            page_retry_ms: default_page_retry_ms(),
            user_agent: None,
        }
    }
}

impl MinionSection {
    pub fn settings(&self) -> MinionSettings {
        MinionSettings {
            poll_interval: Duration::from_millis(self.poll_interval_ms),
            task_interval: Duration::from_secs(self.task_interval_secs),
            tick: TickPolicy::new(
                Duration::from_millis(self.tick_interval_ms),
                (self.max_ticks > 0).then_some(self.max_ticks),
            ),
            page_retry: Duration::from_millis(self.page_retry_ms),
            user_agent: resolve_user_agent(self.user_agent.as_deref()),
        }
    }
}

/// `[account]` section.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AccountSection {
    #[serde(default)]
    pub account: String,
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub password: String,
}

impl AccountSection {
    pub fn is_configured(&self) -> bool {
        !self.account.trim().is_empty()
    }

    pub fn to_account_info(&self) -> AccountInfo {
        AccountInfo::new(&self.account, &self.username, &self.password)
    }
}

/// `[[page]]` table.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PageConfig {
    #[serde(default)]
    pub title: String,
    pub url: String,
    /// `selector -> text` present on the page.
    #[serde(default)]
    pub elements: BTreeMap<String, String>,
}

/// `[[pool]]` table, tagged by `kind`.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum PoolEntryConfig {
    Probe(ProbeConfig),
    Cycle(CycleConfig),
}

impl PoolEntryConfig {
    pub fn kind(&self) -> &'static str {
        match self {
            PoolEntryConfig::Probe(_) => "probe",
            PoolEntryConfig::Cycle(_) => "cycle",
        }
    }

    pub fn name(&self) -> &str {
        let name = match self {
            PoolEntryConfig::Probe(cfg) => cfg.name.as_deref(),
            PoolEntryConfig::Cycle(cfg) => cfg.name.as_deref(),
        };
        name.unwrap_or(self.kind())
    }

    pub fn life(&self) -> u32 {
        match self {
            PoolEntryConfig::Probe(cfg) => cfg.life,
            PoolEntryConfig::Cycle(cfg) => cfg.life,
        }
    }

    pub fn query(&self) -> &str {
        match self {
            PoolEntryConfig::Probe(cfg) => &cfg.query,
            PoolEntryConfig::Cycle(cfg) => &cfg.query,
        }
    }
}

/// Locate a page, optionally wait for a selector, report what was found.
#[derive(Debug, Clone, Deserialize)]
pub struct ProbeConfig {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub life: u32,
    /// Title/URL substring, or `/regex/`.
    pub query: String,
    /// Navigate a blank page here when nothing matches.
    #[serde(default)]
    pub url: String,
    /// Keep searching until a matching page exists.
    #[serde(default)]
    pub wait: bool,
    #[serde(default)]
    pub selector: Option<String>,
    #[serde(default = "default_probe_interval_secs")]
    pub interval_secs: u64,
}

fn default_probe_interval_secs() -> u64 {
    60
}

impl ProbeConfig {
    pub fn fallback(&self) -> PageFallback {
        if self.wait {
            PageFallback::Wait
        } else {
            PageFallback::from(self.url.as_str())
        }
    }
}

/// Act / claim / approve / confirm loop with a cooldown read from the page.
#[derive(Debug, Clone, Deserialize)]
pub struct CycleConfig {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub life: u32,
    pub query: String,
    #[serde(default)]
    pub url: String,
    /// Button that starts a cycle.
    pub action: String,
    /// Optional second button clicked after `action`.
    #[serde(default)]
    pub claim: Option<String>,
    /// Button in the popup window opened by the last click. The run waits
    /// for the popup and clicks it until it succeeds or the popup closes.
    #[serde(default)]
    pub approve: Option<String>,
    /// Element holding the `HH:MM:SS` countdown until the next cycle.
    pub countdown: String,
    /// Substring of the response URL that confirms a cycle.
    pub confirm_url: String,
    /// Substring of the response URL that reports `{"balance": ...}`.
    #[serde(default)]
    pub balance_url: Option<String>,
    #[serde(default = "default_jitter_secs")]
    pub jitter_secs: u64,
    /// Retry delay after a failed confirmation.
    #[serde(default = "default_failure_cooldown_secs")]
    pub failure_cooldown_secs: u64,
}

fn default_jitter_secs() -> u64 {
    180
}

fn default_failure_cooldown_secs() -> u64 {
    3_600
}

impl CycleConfig {
    pub fn fallback(&self) -> PageFallback {
        PageFallback::from(self.url.as_str())
    }
}
