// src/page/resolver.rs

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use tokio::time::sleep;
use tracing::{debug, trace};

use crate::BoxFuture;

use super::{Browser, Page, PageFallback, PageProvider, PageQuery};

/// Resolves page queries against one shared browser session.
///
/// - A matching open page wins.
/// - Otherwise the fallback decides: wait and search again, or reuse a blank
///   page (opening one if none exists) and optionally navigate it.
/// - Errors while inspecting pages (a page navigating mid-check, a closed
///   target) are retried after `retry`, never returned.
/// - The chosen page always gets the session user agent and is brought to
///   the front.
pub struct PageResolver {
    browser: Arc<dyn Browser>,
    user_agent: String,
    retry: Duration,
}

impl fmt::Debug for PageResolver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PageResolver")
            .field("user_agent", &self.user_agent)
            .field("retry", &self.retry)
            .finish_non_exhaustive()
    }
}

struct Scan {
    matched: Option<Arc<dyn Page>>,
    blank: Option<Arc<dyn Page>>,
}

impl PageResolver {
    pub fn new(browser: Arc<dyn Browser>, user_agent: impl Into<String>, retry: Duration) -> Self {
        Self {
            browser,
            user_agent: user_agent.into(),
            retry,
        }
    }

    pub fn user_agent(&self) -> &str {
        &self.user_agent
    }

    pub fn browser(&self) -> &Arc<dyn Browser> {
        &self.browser
    }

    pub async fn resolve(
        &self,
        query: &PageQuery,
        fallback: &PageFallback,
    ) -> anyhow::Result<Arc<dyn Page>> {
        let mut attempts: u64 = 0;
        loop {
            attempts += 1;
            let scan = match self.scan(query).await {
                Ok(scan) => scan,
                Err(err) => {
                    debug!(?query, attempts, error = %err, "page search failed; retrying");
                    sleep(self.retry).await;
                    continue;
                }
            };

            let page = match (scan.matched, fallback) {
                (Some(page), _) => page,
                (None, PageFallback::Wait) => {
                    trace!(?query, attempts, "no matching page yet");
                    sleep(self.retry).await;
                    continue;
                }
                (None, PageFallback::Navigate(url)) => {
                    let page = self.blank_or_new(scan.blank).await?;
                    debug!(?query, %url, "no matching page; navigating");
                    page.goto(url).await?;
                    page
                }
                (None, PageFallback::Blank) => {
                    debug!(?query, "no matching page; using a blank one");
                    self.blank_or_new(scan.blank).await?
                }
            };

            page.set_user_agent(&self.user_agent).await?;
            page.bring_to_front().await?;
            return Ok(page);
        }
    }

    async fn scan(&self, query: &PageQuery) -> anyhow::Result<Scan> {
        let mut scan = Scan {
            matched: None,
            blank: None,
        };

        for page in self.browser.pages().await? {
            if page.is_closed() {
                continue;
            }
            if query.matches(page.as_ref()).await? {
                scan.matched = Some(page);
                break;
            }
            if scan.blank.is_none() && is_blank(page.as_ref()).await? {
                scan.blank = Some(page);
            }
        }

        Ok(scan)
    }

    async fn blank_or_new(&self, blank: Option<Arc<dyn Page>>) -> anyhow::Result<Arc<dyn Page>> {
        match blank {
            Some(page) => Ok(page),
            None => self.browser.new_page().await,
        }
    }
}

async fn is_blank(page: &dyn Page) -> anyhow::Result<bool> {
    Ok(page.url().await? == "about:blank" && page.title().await?.is_empty())
}

impl PageProvider for PageResolver {
    fn get_page(
        &self,
        query: PageQuery,
        fallback: PageFallback,
    ) -> BoxFuture<'_, anyhow::Result<Arc<dyn Page>>> {
        Box::pin(async move { self.resolve(&query, &fallback).await })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::page::MemoryBrowser;
    use tokio::time::timeout;

    fn resolver(browser: &MemoryBrowser) -> PageResolver {
        PageResolver::new(Arc::new(browser.clone()), "minion-test", Duration::from_millis(5))
    }

    #[tokio::test]
    async fn returns_matching_page_with_agent_and_focus() {
        let browser = MemoryBrowser::new();
        browser.open("Other", "https://other.test/");
        let target = browser.open("Dashboard", "https://app.test/home");

        let page = resolver(&browser)
            .resolve(&PageQuery::text("app.test"), &PageFallback::Blank)
            .await
            .unwrap();

        assert_eq!(page.title().await.unwrap(), "Dashboard");
        assert_eq!(target.user_agent().as_deref(), Some("minion-test"));
        assert_eq!(browser.front_page().unwrap().id(), target.id());
        assert_eq!(browser.len(), 2);
    }

    #[tokio::test]
    async fn wait_blocks_until_page_appears() {
        let browser = MemoryBrowser::new();
        let r = resolver(&browser);

        let opener = {
            let browser = browser.clone();
            tokio::spawn(async move {
                sleep(Duration::from_millis(30)).await;
                browser.open("Late Page", "https://late.test/");
            })
        };

        let page = timeout(
            Duration::from_secs(2),
            r.resolve(&PageQuery::text("Late"), &PageFallback::Wait),
        )
        .await
        .expect("resolver should find the late page")
        .unwrap();

        opener.await.unwrap();
        assert_eq!(page.url().await.unwrap(), "https://late.test/");
        // Waiting never creates pages of its own.
        assert_eq!(browser.len(), 1);
    }

    #[tokio::test]
    async fn wait_without_match_keeps_searching() {
        let browser = MemoryBrowser::new();
        let r = resolver(&browser);

        let outcome = timeout(
            Duration::from_millis(50),
            r.resolve(&PageQuery::text("never"), &PageFallback::Wait),
        )
        .await;

        assert!(outcome.is_err());
        assert!(browser.is_empty());
    }

    #[tokio::test]
    async fn navigate_reuses_blank_page() {
        let browser = MemoryBrowser::new();
        let blank = browser.open("", "about:blank");

        let page = resolver(&browser)
            .resolve(
                &PageQuery::text("shop"),
                &PageFallback::from("https://shop.test/"),
            )
            .await
            .unwrap();

        assert_eq!(page.url().await.unwrap(), "https://shop.test/");
        assert_eq!(blank.current_url(), "https://shop.test/");
        assert_eq!(browser.len(), 1);
    }

    #[tokio::test]
    async fn blank_fallback_opens_new_page_when_none_is_blank() {
        let browser = MemoryBrowser::new();
        browser.open("Busy", "https://busy.test/");

        let page = resolver(&browser)
            .resolve(&PageQuery::text("missing"), &PageFallback::Blank)
            .await
            .unwrap();

        assert_eq!(page.url().await.unwrap(), "about:blank");
        assert_eq!(browser.len(), 2);
    }

    #[tokio::test]
    async fn transient_query_errors_are_retried() {
        let browser = MemoryBrowser::new();
        let target = browser.open("Wallet", "https://wallet.test/");
        target.fail_next_queries(3);

        let page = timeout(
            Duration::from_secs(2),
            resolver(&browser).resolve(&PageQuery::text("Wallet"), &PageFallback::Wait),
        )
        .await
        .expect("transient errors must not stall the resolver")
        .unwrap();

        assert_eq!(page.title().await.unwrap(), "Wallet");
    }

    #[tokio::test]
    async fn closed_pages_are_ignored() {
        let browser = MemoryBrowser::new();
        let stale = browser.open("Game", "https://game.test/");
        stale.close();
        browser.open("Game", "https://game.test/?fresh");

        let page = resolver(&browser)
            .resolve(&PageQuery::text("Game"), &PageFallback::Blank)
            .await
            .unwrap();
        assert_eq!(page.url().await.unwrap(), "https://game.test/?fresh");
    }

    #[tokio::test]
    async fn provider_accepts_pattern_and_predicate_queries() {
        let browser = MemoryBrowser::new();
        browser.open("Alpha", "https://a.test/");
        let beta = browser.open("Beta", "https://b.test/");
        beta.set_element("#marker", "here");
        let r = resolver(&browser);

        let by_pattern = r
            .get_page(PageQuery::pattern(r"^Be").unwrap(), PageFallback::Blank)
            .await
            .unwrap();
        assert_eq!(by_pattern.title().await.unwrap(), "Beta");

        let by_predicate = r
            .get_page(
                PageQuery::predicate(|p| Box::pin(async move { p.exists("#marker").await })),
                PageFallback::Blank,
            )
            .await
            .unwrap();
        assert_eq!(by_predicate.title().await.unwrap(), "Beta");
    }
}
