// src/lib.rs

pub mod cli;
pub mod clock;
pub mod config;
pub mod data;
pub mod errors;
pub mod logging;
pub mod minion;
pub mod page;
pub mod pool;
pub mod task;
pub mod tasks;
pub mod timing;
pub mod user_agent;

use std::future::Future;
use std::path::PathBuf;
use std::pin::Pin;
use std::sync::Arc;

use anyhow::Result;
use tracing::{debug, info};

use crate::cli::CliArgs;
use crate::config::loader::load_and_validate;
use crate::config::model::{ConfigFile, PageConfig, PoolEntryConfig};
use crate::minion::Minion;
use crate::page::MemoryBrowser;

pub use crate::minion::{EntrySnapshot, MinionSettings};
pub use crate::pool::{EntryId, MinionState};

/// Boxed, `Send` future used at trait-object seams.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// High-level entry point used by `main.rs`.
///
/// This wires together:
/// - config loading
/// - the browser session seeded from `[[page]]`
/// - the minion and its pool
/// - Ctrl-C handling
pub async fn run(args: CliArgs) -> Result<()> {
    let config_path = PathBuf::from(&args.config);
    let cfg = load_and_validate(&config_path)?;

    if args.dry_run {
        print_dry_run(&cfg);
        return Ok(());
    }

    let browser = seed_browser(&cfg.page);
    let minion = Minion::new(Arc::new(browser), cfg.minion.settings());

    if cfg.account.is_configured() {
        minion.set_account(&cfg.account.to_account_info())?;
    }
    tasks::initialize(&cfg, minion.data())?;

    for entry in &cfg.pool {
        let factory = tasks::factory_for(entry)?;
        minion.add_task(factory, entry.life());
    }

    info!(
        pool = minion.len(),
        user_agent = %minion.user_agent(),
        "minion starting"
    );
    minion.start();

    tokio::signal::ctrl_c().await?;
    info!("Ctrl-C received; stopping");

    minion.stop().await;
    minion.wait_idle().await;
    info!(
        polls = minion.poll_count(),
        runs = minion.run_count(),
        "minion stopped"
    );
    Ok(())
}

fn seed_browser(pages: &[PageConfig]) -> MemoryBrowser {
    let browser = MemoryBrowser::new();
    for cfg in pages {
        let page = browser.open(&cfg.title, &cfg.url);
        for (selector, text) in &cfg.elements {
            page.set_element(selector, text);
        }
    }
    browser
}

/// Simple dry-run output: print settings, pages and the pool.
fn print_dry_run(cfg: &ConfigFile) {
    let m = &cfg.minion;
    println!("minion dry-run");
    println!("  minion.poll_interval_ms = {}", m.poll_interval_ms);
    println!("  minion.task_interval_secs = {}", m.task_interval_secs);
    println!("  minion.tick_interval_ms = {}", m.tick_interval_ms);
    if m.max_ticks > 0 {
        println!("  minion.max_ticks = {}", m.max_ticks);
    }
    if cfg.account.is_configured() {
        println!("  account = {}", cfg.account.account.trim());
    }
    println!();

    if !cfg.page.is_empty() {
        println!("pages ({}):", cfg.page.len());
        for page in &cfg.page {
            println!("  - {:?} {}", page.title, page.url);
        }
        println!();
    }

    println!("pool ({}):", cfg.pool.len());
    for entry in &cfg.pool {
        let life = match entry.life() {
            0 => "unlimited".to_string(),
            n => n.to_string(),
        };
        println!("  - {} [{}]", entry.name(), entry.kind());
        println!("      life: {life}");
        println!("      query: {}", entry.query());
        match entry {
            PoolEntryConfig::Probe(p) => {
                println!("      fallback: {:?}", p.fallback());
                if let Some(ref s) = p.selector {
                    println!("      selector: {s}");
                }
                println!("      interval_secs: {}", p.interval_secs);
            }
            PoolEntryConfig::Cycle(c) => {
                println!("      action: {}", c.action);
                if let Some(ref s) = c.claim {
                    println!("      claim: {s}");
                }
                if let Some(ref s) = c.approve {
                    println!("      approve: {s}");
                }
                println!("      countdown: {}", c.countdown);
                println!("      confirm_url: {}", c.confirm_url);
            }
        }
    }

    debug!("dry-run complete (no execution)");
}
