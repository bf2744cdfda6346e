// src/tasks/probe.rs

//! `probe`: find a page, optionally wait for a selector on it, and report the
//! page's title and URL. Reschedules itself `interval_secs` later.

use std::sync::Arc;

use serde_json::json;
use tracing::info;

use crate::BoxFuture;
use crate::config::ProbeConfig;
use crate::page::{Page, PageQuery};
use crate::task::{StepRegistry, StepResult, StepTask, TaskContext, TaskResult, Transition};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProbeStep {
    Locate,
    Inspect,
}

#[derive(Debug)]
pub struct Probe {
    name: String,
    query: PageQuery,
    config: ProbeConfig,
    page: Option<Arc<dyn Page>>,
}

impl Probe {
    pub fn new(name: impl Into<String>, query: PageQuery, config: ProbeConfig) -> Self {
        Self {
            name: name.into(),
            query,
            config,
            page: None,
        }
    }

    fn locate<'a>(&'a mut self, ctx: &'a mut TaskContext) -> BoxFuture<'a, StepResult<ProbeStep>> {
        Box::pin(async move {
            let page = ctx
                .get_page(self.query.clone(), self.config.fallback())
                .await?;
            self.page = Some(page);
            Ok(Transition::Next(ProbeStep::Inspect))
        })
    }

    fn inspect<'a>(&'a mut self, ctx: &'a mut TaskContext) -> BoxFuture<'a, StepResult<ProbeStep>> {
        Box::pin(async move {
            let Some(page) = self.page.clone() else {
                return Ok(Transition::Next(ProbeStep::Locate));
            };

            if let Some(selector) = self.config.selector.as_deref() {
                if !page.exists(selector).await? {
                    return Ok(Transition::Tick(ProbeStep::Inspect));
                }
            }

            let title = page.title().await?;
            let url = page.url().await?;
            info!(task = %self.name, %title, %url, "page probed");

            let interval_ms = i64::try_from(self.config.interval_secs.saturating_mul(1_000))
                .unwrap_or(i64::MAX);
            let result = TaskResult::completed("Probed")
                .with_result(json!({ "title": title, "url": url }))
                .with_awake_time(ctx.now_ms().saturating_add(interval_ms));
            Ok(Transition::Complete(result))
        })
    }
}

impl StepTask for Probe {
    type Step = ProbeStep;

    fn name(&self) -> &str {
        &self.name
    }

    fn register_steps(&self, steps: &mut StepRegistry<Self>) {
        steps
            .register_initial(ProbeStep::Locate, Self::locate)
            .register(ProbeStep::Inspect, Self::inspect);
    }
}
