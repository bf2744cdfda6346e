// src/tasks/cycle.rs

//! `cycle`: a repeating act / claim / confirm job paced by an on-page
//! countdown.
//!
//! One run goes through:
//! - `Detect`: find the page. A visible action button means work to do; a
//!   visible claim button means a previous run stopped halfway; a countdown
//!   means the job is cooling down and the run is canceled with an awake time
//!   after the countdown.
//! - `Act`: listen for page responses, then click the action button.
//! - `Claim`: click the claim button once it shows up (skipped when not
//!   configured).
//! - `Approve`: wait for the popup opened by the last click and press its
//!   approve button until that works or the popup closes (skipped when not
//!   configured).
//! - `Confirm`: wait for the confirming response and the new countdown, update
//!   the counters in the data store and schedule the next run.
//!
//! A failed confirmation schedules a retry after `failure_cooldown_secs`.

use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tracing::{debug, info, warn};

use crate::BoxFuture;
use crate::config::CycleConfig;
use crate::data::{AccountInfo, DATA_KEY_ACCOUNT_INFO, DataStore};
use crate::errors::Result;
use crate::page::{Page, PageEvent, PageEventKind, PageQuery, ResponseEvent};
use crate::task::{StepRegistry, StepResult, StepTask, TaskContext, TaskResult, Transition};
use crate::timing::{awake_time, format_timestamp, parse_countdown};

/// Data store key holding [`CycleStats`].
pub const DATA_KEY_CYCLE: &str = "cycle";

/// Counters kept across runs.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CycleStats {
    pub counter: u64,
    pub total: f64,
    pub rewards: f64,
}

/// Reset the per-process run counter, keeping totals.
pub fn initialize(data: &DataStore) -> Result<()> {
    let mut stats: CycleStats = data.get(DATA_KEY_CYCLE)?;
    stats.counter = 0;
    data.set(DATA_KEY_CYCLE, &stats)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CycleStep {
    Detect,
    Act,
    Claim,
    Approve,
    Confirm,
}

/// What the response listener has seen so far.
#[derive(Debug, Default)]
struct Observed {
    confirmed: Option<bool>,
    balance: Option<f64>,
    change: f64,
    popup: Option<Arc<dyn Page>>,
}

impl Observed {
    fn record_balance(&mut self, balance: f64) {
        match self.balance {
            Some(previous) if balance > previous => {
                self.change = balance - previous;
                self.balance = Some(balance);
            }
            Some(_) => {}
            None => self.balance = Some(balance),
        }
    }
}

fn parse_balance(body: &Value) -> Option<f64> {
    match body.get("balance")? {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.split_whitespace().next()?.parse().ok(),
        _ => None,
    }
}

fn round4(x: f64) -> f64 {
    (x * 10_000.0).round() / 10_000.0
}

fn secs_to_ms(secs: u64) -> i64 {
    i64::try_from(secs.saturating_mul(1_000)).unwrap_or(i64::MAX)
}

#[derive(Debug)]
pub struct Cycle {
    name: String,
    query: PageQuery,
    config: CycleConfig,
    account: AccountInfo,
    observed: Arc<Mutex<Observed>>,
    listening: bool,
}

impl Cycle {
    pub fn new(name: impl Into<String>, query: PageQuery, config: CycleConfig) -> Self {
        Self {
            name: name.into(),
            query,
            config,
            account: AccountInfo::default(),
            observed: Arc::new(Mutex::new(Observed::default())),
            listening: false,
        }
    }

    fn observed(&self) -> MutexGuard<'_, Observed> {
        self.observed
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    async fn page(&self, ctx: &TaskContext) -> anyhow::Result<Arc<dyn Page>> {
        ctx.get_page(self.query.clone(), self.config.fallback()).await
    }

    async fn countdown(&self, page: &dyn Page) -> anyhow::Result<Option<Duration>> {
        let text = page.text(&self.config.countdown).await?;
        Ok(text.as_deref().and_then(parse_countdown))
    }

    fn jitter_ms(&self) -> i64 {
        secs_to_ms(self.config.jitter_secs)
    }

    /// Step following the last configured click.
    fn after_claim(&self) -> CycleStep {
        match self.config.approve {
            Some(_) => CycleStep::Approve,
            None => CycleStep::Confirm,
        }
    }

    fn detect<'a>(&'a mut self, ctx: &'a mut TaskContext) -> BoxFuture<'a, StepResult<CycleStep>> {
        Box::pin(async move {
            let stats: CycleStats = ctx.get_data(DATA_KEY_CYCLE)?;
            info!(task = %self.name, attempt = stats.counter + 1, "ready for next cycle");

            let page = self.page(ctx).await?;
            if page.exists(&self.config.action).await? {
                return Ok(Transition::Next(CycleStep::Act));
            }
            if let Some(claim) = self.config.claim.as_deref() {
                if page.exists(claim).await? {
                    return Ok(Transition::Next(CycleStep::Claim));
                }
            }
            if let Some(cooldown) = self.countdown(page.as_ref()).await? {
                let delay = i64::try_from(cooldown.as_millis()).unwrap_or(i64::MAX);
                let at = awake_time(ctx.now_ms(), delay, self.jitter_ms());
                info!(task = %self.name, awake_at = %format_timestamp(at), "cooling down");
                return Ok(Transition::Complete(
                    TaskResult::canceled("Cooldown").with_awake_time(at),
                ));
            }

            Ok(Transition::Tick(CycleStep::Detect))
        })
    }

    /// Subscribe to page responses once per run.
    fn listen(&mut self, ctx: &mut TaskContext, page: &Arc<dyn Page>) {
        if self.listening {
            return;
        }
        self.listening = true;

        let observed = Arc::clone(&self.observed);
        let confirm_url = self.config.confirm_url.clone();
        let balance_url = self.config.balance_url.clone();
        let listener = Arc::new(move |event: &PageEvent| {
            let PageEvent::Response(ResponseEvent { url, ok, body }) = event else {
                return;
            };
            let mut seen = observed
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            if url.contains(confirm_url.as_str()) {
                seen.confirmed = Some(*ok);
            } else if *ok && balance_url.as_deref().is_some_and(|b| url.contains(b)) {
                if let Some(balance) = parse_balance(body) {
                    seen.record_balance(balance);
                }
            }
        });
        ctx.subscribe(page, PageEventKind::Response, listener);

        if self.config.approve.is_some() {
            let observed = Arc::clone(&self.observed);
            let on_popup = Arc::new(move |event: &PageEvent| {
                if let PageEvent::Popup(popup) = event {
                    observed
                        .lock()
                        .unwrap_or_else(|poisoned| poisoned.into_inner())
                        .popup = Some(Arc::clone(popup));
                }
            });
            ctx.subscribe(page, PageEventKind::Popup, on_popup);
        }
    }

    fn act<'a>(&'a mut self, ctx: &'a mut TaskContext) -> BoxFuture<'a, StepResult<CycleStep>> {
        Box::pin(async move {
            let page = self.page(ctx).await?;
            self.listen(ctx, &page);

            info!(task = %self.name, account = %self.account.account, "acting");
            page.click(&self.config.action).await?;

            match self.config.claim {
                Some(_) => Ok(Transition::Next(CycleStep::Claim)),
                None => Ok(Transition::Next(self.after_claim())),
            }
        })
    }

    fn claim<'a>(&'a mut self, ctx: &'a mut TaskContext) -> BoxFuture<'a, StepResult<CycleStep>> {
        Box::pin(async move {
            let Some(claim) = self.config.claim.clone() else {
                return Ok(Transition::Next(self.after_claim()));
            };

            let page = self.page(ctx).await?;
            if !page.exists(&claim).await? {
                return Ok(Transition::Tick(CycleStep::Claim));
            }

            self.listen(ctx, &page);
            info!(task = %self.name, "claiming");
            page.click(&claim).await?;
            Ok(Transition::Next(self.after_claim()))
        })
    }

    fn approve<'a>(
        &'a mut self,
        _ctx: &'a mut TaskContext,
    ) -> BoxFuture<'a, StepResult<CycleStep>> {
        Box::pin(async move {
            let Some(approve) = self.config.approve.clone() else {
                return Ok(Transition::Next(CycleStep::Confirm));
            };
            let popup = self.observed().popup.clone();
            let Some(popup) = popup else {
                return Ok(Transition::Tick(CycleStep::Approve));
            };

            if popup.is_closed() {
                debug!(task = %self.name, "approval popup already closed");
                return Ok(Transition::Next(CycleStep::Confirm));
            }
            match popup.exists(&approve).await {
                Ok(true) => {}
                Ok(false) => return Ok(Transition::Tick(CycleStep::Approve)),
                Err(err) => {
                    debug!(task = %self.name, error = %err, "approval popup not ready");
                    return Ok(Transition::Tick(CycleStep::Approve));
                }
            }

            match popup.click(&approve).await {
                Ok(()) => {
                    info!(task = %self.name, "approved");
                    Ok(Transition::Next(CycleStep::Confirm))
                }
                Err(_) if popup.is_closed() => Ok(Transition::Next(CycleStep::Confirm)),
                Err(err) => {
                    debug!(task = %self.name, error = %err, "approve click failed; retrying");
                    Ok(Transition::Tick(CycleStep::Approve))
                }
            }
        })
    }

    fn confirm<'a>(&'a mut self, ctx: &'a mut TaskContext) -> BoxFuture<'a, StepResult<CycleStep>> {
        Box::pin(async move {
            let confirmed = self.observed().confirmed;
            let cooldown_ms = match confirmed {
                None => return Ok(Transition::Tick(CycleStep::Confirm)),
                Some(false) => secs_to_ms(self.config.failure_cooldown_secs),
                Some(true) => {
                    let page = self.page(ctx).await?;
                    match self.countdown(page.as_ref()).await? {
                        Some(cd) => i64::try_from(cd.as_millis()).unwrap_or(i64::MAX),
                        None => return Ok(Transition::Tick(CycleStep::Confirm)),
                    }
                }
            };

            let stats: CycleStats = ctx.get_data(DATA_KEY_CYCLE)?;
            let (total, reward) = {
                let seen = self.observed();
                (seen.balance.unwrap_or(stats.total), round4(seen.change))
            };

            let stats = CycleStats {
                counter: stats.counter + 1,
                total,
                rewards: round4(stats.rewards + reward),
            };
            ctx.set_data(DATA_KEY_CYCLE, &stats)?;

            let at = awake_time(ctx.now_ms(), cooldown_ms, self.jitter_ms());
            let success = confirmed == Some(true);
            if success {
                info!(
                    task = %self.name,
                    reward,
                    total,
                    awake_at = %format_timestamp(at),
                    "cycle confirmed"
                );
            } else {
                warn!(
                    task = %self.name,
                    total,
                    awake_at = %format_timestamp(at),
                    "cycle was not confirmed; retrying later"
                );
            }

            let result = TaskResult::completed(if success { "Success" } else { "Retry" })
                .with_result(json!({
                    "success": success,
                    "next_attempt_at": at,
                    "total": total,
                    "reward": reward,
                }))
                .with_awake_time(at);
            Ok(Transition::Complete(result))
        })
    }
}

impl StepTask for Cycle {
    type Step = CycleStep;

    fn name(&self) -> &str {
        &self.name
    }

    fn register_steps(&self, steps: &mut StepRegistry<Self>) {
        steps
            .register_initial(CycleStep::Detect, Self::detect)
            .register(CycleStep::Act, Self::act)
            .register(CycleStep::Confirm, Self::confirm);
        if self.config.claim.is_some() {
            steps.register(CycleStep::Claim, Self::claim);
        }
        if self.config.approve.is_some() {
            steps.register(CycleStep::Approve, Self::approve);
        }
    }

    fn prepare(&mut self, ctx: &mut TaskContext) -> bool {
        match ctx.get_data::<AccountInfo>(DATA_KEY_ACCOUNT_INFO) {
            Ok(account) if !account.account.is_empty() => {
                self.account = account;
                true
            }
            Ok(_) => {
                warn!(task = %self.name, "no account configured");
                false
            }
            Err(err) => {
                warn!(task = %self.name, error = %err, "account info unreadable");
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use crate::clock::ManualClock;
    use crate::page::{MemoryBrowser, MemoryPage, PageResolver};
    use crate::task::{StepMachine, Task, TaskState, TerminalState, TickPolicy};
    use crate::timing::MIN_JITTER_MS;

    const NOW: i64 = 1_000_000;

    fn config(claim: Option<&str>) -> CycleConfig {
        CycleConfig {
            name: None,
            life: 0,
            query: "Game".into(),
            url: String::new(),
            action: "button.act".into(),
            claim: claim.map(str::to_string),
            approve: None,
            countdown: ".countdown".into(),
            confirm_url: "push_transaction".into(),
            balance_url: Some("get_table_rows".into()),
            jitter_secs: 180,
            failure_cooldown_secs: 3_600,
        }
    }

    fn machine(browser: &MemoryBrowser, data: &DataStore, cfg: CycleConfig) -> StepMachine<Cycle> {
        let resolver = PageResolver::new(
            Arc::new(browser.clone()),
            "agent",
            Duration::from_millis(2),
        );
        let ctx = TaskContext::new(
            Arc::new(resolver),
            data.clone(),
            Arc::new(ManualClock::new(NOW)),
            TickPolicy::new(Duration::from_millis(2), Some(500)),
        );
        StepMachine::new(Cycle::new("cycle", PageQuery::text("Game"), cfg), ctx)
    }

    fn with_account() -> DataStore {
        let data = DataStore::new();
        data.set(DATA_KEY_ACCOUNT_INFO, &AccountInfo::new("acc.wam", "", ""))
            .unwrap();
        data
    }

    fn respond(page: &MemoryPage, url: &str, ok: bool, body: Value) {
        page.emit(PageEvent::Response(ResponseEvent {
            url: url.to_string(),
            ok,
            body,
        }));
    }

    /// Simulate the site: clicking `action` reports balances and (after the
    /// optional claim) confirms the transaction and shows a countdown.
    fn script_site(page: &Arc<MemoryPage>, claim: Option<&str>, tx_ok: bool) {
        page.set_element("button.act", "Act");
        let finish = move |p: &MemoryPage| {
            respond(p, "https://api.test/get_table_rows", true, json!({ "balance": "12.5 TLM" }));
            respond(p, "https://api.test/push_transaction", tx_ok, json!({}));
            p.set_element(".countdown", "00:10:00");
        };

        match claim {
            Some(claim) => {
                let shown = claim.to_string();
                page.on_click("button.act", move |p| {
                    respond(p, "https://api.test/get_table_rows", true, json!({ "balance": 10.0 }));
                    p.remove_element("button.act");
                    p.set_element(&shown, "Claim");
                });
                page.on_click(claim, finish);
            }
            None => {
                page.on_click("button.act", move |p| {
                    respond(p, "https://api.test/get_table_rows", true, json!({ "balance": 10.0 }));
                    p.remove_element("button.act");
                    finish(p);
                });
            }
        }
    }

    #[test]
    fn balance_tracking_only_counts_increases() {
        let mut seen = Observed::default();
        seen.record_balance(10.0);
        seen.record_balance(9.0);
        assert_eq!(seen.change, 0.0);
        seen.record_balance(12.5);
        assert_eq!(seen.change, 2.5);
        assert_eq!(seen.balance, Some(12.5));

        assert_eq!(parse_balance(&json!({ "balance": "3.25 TLM" })), Some(3.25));
        assert_eq!(parse_balance(&json!({ "balance": 4 })), Some(4.0));
        assert_eq!(parse_balance(&json!({})), None);
    }

    #[test]
    fn prepare_requires_account() {
        let browser = MemoryBrowser::new();
        let mut m = machine(&browser, &DataStore::new(), config(None));
        assert!(!m.prepare());

        let mut m = machine(&browser, &with_account(), config(None));
        assert!(m.prepare());
    }

    #[test]
    fn initialize_resets_counter_only() {
        let data = DataStore::new();
        let before = CycleStats {
            counter: 7,
            total: 3.0,
            rewards: 1.5,
        };
        data.set(DATA_KEY_CYCLE, &before).unwrap();
        initialize(&data).unwrap();

        let stats: CycleStats = data.get(DATA_KEY_CYCLE).unwrap();
        let expected = CycleStats {
            counter: 0,
            total: 3.0,
            rewards: 1.5,
        };
        assert_eq!(stats, expected);
    }

    #[tokio::test]
    async fn cooldown_cancels_with_awake_time() {
        let browser = MemoryBrowser::new();
        let page = browser.open("Game", "https://game.test/");
        page.set_element(".countdown", "01:00:00");

        let data = with_account();
        let mut m = machine(&browser, &data, config(None));
        assert!(m.prepare());
        let result = m.start().await.unwrap();

        assert_eq!(result.state, TerminalState::Canceled);
        assert_eq!(result.message, "Cooldown");
        let at = result.awake_time.unwrap();
        let base = NOW + 3_600_000;
        assert!(at >= base + MIN_JITTER_MS / 4 && at < base + MIN_JITTER_MS);
        assert!(page.clicks().is_empty());
    }

    #[tokio::test]
    async fn full_cycle_with_claim_updates_counters() {
        let browser = MemoryBrowser::new();
        let page = browser.open("Game", "https://game.test/");
        script_site(&page, Some(".claim"), true);

        let data = with_account();
        initialize(&data).unwrap();
        let mut m = machine(&browser, &data, config(Some(".claim")));
        assert!(m.prepare());
        let result = m.start().await.unwrap();

        assert_eq!(result.state, TerminalState::Completed);
        assert_eq!(result.message, "Success");
        assert_eq!(page.clicks(), vec!["button.act".to_string(), ".claim".to_string()]);

        let body = result.result.unwrap();
        assert_eq!(body["reward"], json!(2.5));
        assert_eq!(body["total"], json!(12.5));

        let base = NOW + 600_000;
        let at = result.awake_time.unwrap();
        assert!(at >= base + MIN_JITTER_MS / 4 && at < base + MIN_JITTER_MS);

        let stats: CycleStats = data.get(DATA_KEY_CYCLE).unwrap();
        assert_eq!(stats.counter, 1);
        assert_eq!(stats.rewards, 2.5);

        // Listeners registered during the run are released by destroy().
        assert_eq!(page.listener_count(), 1);
        m.destroy();
        assert_eq!(page.listener_count(), 0);
        assert_eq!(m.state(), TaskState::Completed);
    }

    #[tokio::test]
    async fn failed_confirmation_retries_after_failure_cooldown() {
        let browser = MemoryBrowser::new();
        let page = browser.open("Game", "https://game.test/");
        script_site(&page, None, false);

        let data = with_account();
        let mut m = machine(&browser, &data, config(None));
        assert!(m.prepare());
        let result = m.start().await.unwrap();

        assert_eq!(result.state, TerminalState::Completed);
        assert_eq!(result.message, "Retry");
        assert_eq!(result.result.as_ref().unwrap()["success"], json!(false));
        let base = NOW + 3_600_000;
        let at = result.awake_time.unwrap();
        assert!(at >= base + MIN_JITTER_MS / 4 && at < base + MIN_JITTER_MS);
    }

    #[tokio::test]
    async fn resumes_at_claim_when_action_already_done() {
        let browser = MemoryBrowser::new();
        let page = browser.open("Game", "https://game.test/");
        page.set_element(".claim", "Claim");
        page.on_click(".claim", |p| {
            respond(p, "https://api.test/push_transaction", true, json!({}));
            p.set_element(".countdown", "00:00:30");
        });

        let data = with_account();
        let before = CycleStats {
            counter: 2,
            total: 40.0,
            rewards: 4.0,
        };
        data.set(DATA_KEY_CYCLE, &before).unwrap();
        let mut m = machine(&browser, &data, config(Some(".claim")));
        assert!(m.prepare());
        let result = m.start().await.unwrap();

        assert_eq!(page.clicks(), vec![".claim".to_string()]);
        assert_eq!(result.state, TerminalState::Completed);
        assert_eq!(m.current_step(), Some(CycleStep::Confirm));

        // No balance was observed, so the stored total carries over.
        let stats: CycleStats = data.get(DATA_KEY_CYCLE).unwrap();
        let expected = CycleStats {
            counter: 3,
            total: 40.0,
            rewards: 4.0,
        };
        assert_eq!(stats, expected);
    }

    fn approving() -> CycleConfig {
        CycleConfig {
            approve: Some("button.approve".into()),
            ..config(Some(".claim"))
        }
    }

    /// Game page whose claim click opens `popup`.
    fn open_popup_on_claim(page: &Arc<MemoryPage>, popup: &Arc<MemoryPage>) {
        page.set_element("button.act", "Act");
        page.on_click("button.act", |p| {
            p.remove_element("button.act");
            p.set_element(".claim", "Claim");
        });
        let opened: Arc<dyn Page> = popup.clone();
        page.on_click(".claim", move |p| {
            p.emit(PageEvent::Popup(Arc::clone(&opened)));
        });
    }

    #[tokio::test]
    async fn approves_in_popup_before_confirming() {
        let browser = MemoryBrowser::new();
        let page = browser.open("Game", "https://game.test/");
        let popup = browser.open("Wallet", "https://wallet.test/sign");
        popup.set_element("button.approve", "Approve");
        popup.fail_next_queries(2);
        open_popup_on_claim(&page, &popup);

        let game = Arc::clone(&page);
        popup.on_click("button.approve", move |w| {
            respond(&game, "https://api.test/push_transaction", true, json!({}));
            game.set_element(".countdown", "00:05:00");
            w.close();
        });

        let data = with_account();
        let mut m = machine(&browser, &data, approving());
        assert!(m.prepare());
        let result = m.start().await.unwrap();

        assert_eq!(result.state, TerminalState::Completed);
        assert_eq!(result.message, "Success");
        assert_eq!(popup.clicks(), vec!["button.approve".to_string()]);
        assert!(popup.is_closed());
        assert_eq!(m.current_step(), Some(CycleStep::Confirm));

        let base = NOW + 300_000;
        let at = result.awake_time.unwrap();
        assert!(at >= base + MIN_JITTER_MS / 4 && at < base + MIN_JITTER_MS);

        // Response and popup listeners.
        assert_eq!(page.listener_count(), 2);
        m.destroy();
        assert_eq!(page.listener_count(), 0);
    }

    #[tokio::test]
    async fn popup_closed_before_approval_moves_on_to_confirm() {
        let browser = MemoryBrowser::new();
        let page = browser.open("Game", "https://game.test/");
        let popup = browser.open("Wallet", "https://wallet.test/sign");
        popup.set_element("button.approve", "Approve");
        open_popup_on_claim(&page, &popup);

        let closing = Arc::clone(&popup);
        page.on_click(".claim", move |p| {
            p.emit(PageEvent::Popup(closing.clone() as Arc<dyn Page>));
            closing.close();
            respond(p, "https://api.test/push_transaction", true, json!({}));
            p.set_element(".countdown", "00:01:00");
        });

        let data = with_account();
        let mut m = machine(&browser, &data, approving());
        assert!(m.prepare());
        let result = m.start().await.unwrap();

        assert_eq!(result.state, TerminalState::Completed);
        assert!(popup.clicks().is_empty());
        assert_eq!(page.clicks(), vec!["button.act".to_string(), ".claim".to_string()]);
    }

    #[tokio::test]
    async fn approval_gives_up_when_no_popup_opens() {
        let browser = MemoryBrowser::new();
        let page = browser.open("Game", "https://game.test/");
        page.set_element("button.act", "Act");
        page.on_click("button.act", |p| p.remove_element("button.act"));

        let resolver = PageResolver::new(
            Arc::new(browser.clone()),
            "agent",
            Duration::from_millis(2),
        );
        let ctx = TaskContext::new(
            Arc::new(resolver),
            with_account(),
            Arc::new(ManualClock::new(NOW)),
            TickPolicy::new(Duration::from_millis(1), Some(3)),
        );
        let cfg = CycleConfig {
            approve: Some("button.approve".into()),
            ..config(None)
        };
        let mut m = StepMachine::new(Cycle::new("cycle", PageQuery::text("Game"), cfg), ctx);
        assert!(m.prepare());
        let result = m.start().await.unwrap();

        assert_eq!(result.state, TerminalState::Canceled);
        assert_eq!(m.current_step(), Some(CycleStep::Approve));
    }

    #[tokio::test]
    async fn gives_up_when_page_never_settles() {
        let browser = MemoryBrowser::new();
        browser.open("Game", "https://game.test/");

        let data = with_account();
        let resolver = PageResolver::new(
            Arc::new(browser.clone()),
            "agent",
            Duration::from_millis(2),
        );
        let ctx = TaskContext::new(
            Arc::new(resolver),
            data,
            Arc::new(ManualClock::new(NOW)),
            TickPolicy::new(Duration::from_millis(1), Some(3)),
        );
        let mut m = StepMachine::new(
            Cycle::new("cycle", PageQuery::text("Game"), config(None)),
            ctx,
        );
        assert!(m.prepare());
        let result = m.start().await.unwrap();

        assert_eq!(result.state, TerminalState::Canceled);
        assert_eq!(result.awake_time, None);
        assert_eq!(m.current_step(), Some(CycleStep::Detect));
    }
}
