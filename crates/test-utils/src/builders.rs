#![allow(dead_code)]

use std::collections::BTreeMap;

use minion::config::{
    AccountSection, ConfigFile, CycleConfig, MinionSection, PageConfig, PoolEntryConfig,
    ProbeConfig, RawConfigFile,
};

/// Builder for `ConfigFile` to simplify test setup.
pub struct ConfigFileBuilder {
    config: RawConfigFile,
}

impl ConfigFileBuilder {
    pub fn new() -> Self {
        Self {
            config: RawConfigFile::default(),
        }
    }

    pub fn with_minion(mut self, minion: MinionSection) -> Self {
        self.config.minion = minion;
        self
    }

    pub fn with_account(mut self, account: &str) -> Self {
        self.config.account = AccountSection {
            account: account.to_string(),
            ..AccountSection::default()
        };
        self
    }

    pub fn with_page(mut self, title: &str, url: &str, elements: &[(&str, &str)]) -> Self {
        self.config.page.push(PageConfig {
            title: title.to_string(),
            url: url.to_string(),
            elements: elements
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect::<BTreeMap<_, _>>(),
        });
        self
    }

    pub fn with_entry(mut self, entry: PoolEntryConfig) -> Self {
        self.config.pool.push(entry);
        self
    }

    pub fn raw(self) -> RawConfigFile {
        self.config
    }

    pub fn build(self) -> ConfigFile {
        ConfigFile::try_from(self.config).expect("Failed to build valid config from builder")
    }
}

impl Default for ConfigFileBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Builder for a `kind = "probe"` pool entry.
pub struct ProbeEntryBuilder {
    cfg: ProbeConfig,
}

impl ProbeEntryBuilder {
    pub fn new(query: &str) -> Self {
        Self {
            cfg: ProbeConfig {
                name: None,
                life: 0,
                query: query.to_string(),
                url: String::new(),
                wait: false,
                selector: None,
                interval_secs: 60,
            },
        }
    }

    pub fn name(mut self, name: &str) -> Self {
        self.cfg.name = Some(name.to_string());
        self
    }

    pub fn life(mut self, life: u32) -> Self {
        self.cfg.life = life;
        self
    }

    pub fn url(mut self, url: &str) -> Self {
        self.cfg.url = url.to_string();
        self
    }

    pub fn wait(mut self) -> Self {
        self.cfg.wait = true;
        self
    }

    pub fn selector(mut self, selector: &str) -> Self {
        self.cfg.selector = Some(selector.to_string());
        self
    }

    pub fn interval_secs(mut self, secs: u64) -> Self {
        self.cfg.interval_secs = secs;
        self
    }

    pub fn build(self) -> PoolEntryConfig {
        PoolEntryConfig::Probe(self.cfg)
    }
}

/// Builder for a `kind = "cycle"` pool entry.
pub struct CycleEntryBuilder {
    cfg: CycleConfig,
}

impl CycleEntryBuilder {
    pub fn new(query: &str, action: &str, countdown: &str, confirm_url: &str) -> Self {
        Self {
            cfg: CycleConfig {
                name: None,
                life: 0,
                query: query.to_string(),
                url: String::new(),
                action: action.to_string(),
                claim: None,
                approve: None,
                countdown: countdown.to_string(),
                confirm_url: confirm_url.to_string(),
                balance_url: None,
                jitter_secs: 180,
                failure_cooldown_secs: 3_600,
            },
        }
    }

    pub fn life(mut self, life: u32) -> Self {
        self.cfg.life = life;
        self
    }

    pub fn claim(mut self, selector: &str) -> Self {
        self.cfg.claim = Some(selector.to_string());
        self
    }

    pub fn approve(mut self, selector: &str) -> Self {
        self.cfg.approve = Some(selector.to_string());
        self
    }

    pub fn balance_url(mut self, url: &str) -> Self {
        self.cfg.balance_url = Some(url.to_string());
        self
    }

    pub fn build(self) -> PoolEntryConfig {
        PoolEntryConfig::Cycle(self.cfg)
    }
}
