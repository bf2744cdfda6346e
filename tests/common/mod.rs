#![allow(dead_code, unused_imports)]

use std::sync::Arc;
use std::time::Duration;

use minion::MinionSettings;
use minion::clock::ManualClock;
use minion::minion::Minion;
use minion::page::MemoryBrowser;
use minion::task::TickPolicy;

pub use minion_test_utils::{init_tracing, with_timeout};

/// Settings tuned for tests: fast polling, no pool-wide pause.
pub fn fast_settings() -> MinionSettings {
    MinionSettings {
        poll_interval: Duration::from_millis(5),
        task_interval: Duration::ZERO,
        tick: TickPolicy::new(Duration::from_millis(2), None),
        page_retry: Duration::from_millis(5),
        user_agent: "minion-tests".to_string(),
    }
}

/// A minion on a manual clock and an empty in-memory browser.
pub fn manual_minion(start_ms: i64) -> (Minion, ManualClock, MemoryBrowser) {
    let clock = ManualClock::new(start_ms);
    let browser = MemoryBrowser::new();
    let minion = Minion::with_clock(
        Arc::new(browser.clone()),
        fast_settings(),
        Arc::new(clock.clone()),
    );
    (minion, clock, browser)
}

/// Poll once and wait for the started run, if any, to settle.
pub async fn run_once(minion: &Minion) -> bool {
    let started = minion.poll_once().is_some();
    minion.wait_idle().await;
    started
}
