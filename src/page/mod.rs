// src/page/mod.rs

//! Page provider contract.
//!
//! The browser itself is an external collaborator. This module only fixes the
//! narrow surface the scheduler and tasks need:
//!
//! - [`Browser`] / [`Page`]: what a backend must implement.
//! - [`PageQuery`] / [`PageFallback`]: how a task asks for a page.
//! - [`PageProvider`]: the capability handed to tasks (implemented by
//!   [`resolver::PageResolver`], which the scheduler owns).
//! - [`memory`]: an in-process backend used by the CLI and by tests.

use std::fmt;
use std::sync::Arc;

use regex::Regex;
use serde_json::Value;

use crate::BoxFuture;

pub mod memory;
pub mod resolver;

pub use memory::{MemoryBrowser, MemoryPage};
pub use resolver::PageResolver;

/// A browser session holding zero or more open pages.
pub trait Browser: Send + Sync + fmt::Debug {
    fn pages(&self) -> BoxFuture<'_, anyhow::Result<Vec<Arc<dyn Page>>>>;
    fn new_page(&self) -> BoxFuture<'_, anyhow::Result<Arc<dyn Page>>>;
}

/// One open page (tab) of the browser.
pub trait Page: Send + Sync + fmt::Debug {
    fn title(&self) -> BoxFuture<'_, anyhow::Result<String>>;
    fn url(&self) -> BoxFuture<'_, anyhow::Result<String>>;
    fn goto<'a>(&'a self, url: &'a str) -> BoxFuture<'a, anyhow::Result<()>>;
    fn bring_to_front(&self) -> BoxFuture<'_, anyhow::Result<()>>;
    fn set_user_agent<'a>(&'a self, user_agent: &'a str) -> BoxFuture<'a, anyhow::Result<()>>;

    /// Whether at least one element matches `selector`.
    fn exists<'a>(&'a self, selector: &'a str) -> BoxFuture<'a, anyhow::Result<bool>>;
    fn click<'a>(&'a self, selector: &'a str) -> BoxFuture<'a, anyhow::Result<()>>;
    /// Text content of the first element matching `selector`, if any.
    fn text<'a>(&'a self, selector: &'a str) -> BoxFuture<'a, anyhow::Result<Option<String>>>;

    fn is_closed(&self) -> bool;

    fn subscribe(&self, kind: PageEventKind, listener: PageListener) -> SubscriptionId;
    /// Returns `false` if the subscription was already gone.
    fn unsubscribe(&self, id: SubscriptionId) -> bool;
}

/// Identifier of a listener registered on a page.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriptionId(pub u64);

pub type PageListener = Arc<dyn Fn(&PageEvent) + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PageEventKind {
    Response,
    Popup,
    Close,
    DomContentLoaded,
}

/// A network response observed by a page.
#[derive(Debug, Clone, PartialEq)]
pub struct ResponseEvent {
    pub url: String,
    pub ok: bool,
    pub body: Value,
}

#[derive(Debug, Clone)]
pub enum PageEvent {
    Response(ResponseEvent),
    Popup(Arc<dyn Page>),
    Close,
    DomContentLoaded,
}

impl PageEvent {
    pub fn kind(&self) -> PageEventKind {
        match self {
            PageEvent::Response(_) => PageEventKind::Response,
            PageEvent::Popup(_) => PageEventKind::Popup,
            PageEvent::Close => PageEventKind::Close,
            PageEvent::DomContentLoaded => PageEventKind::DomContentLoaded,
        }
    }
}

/// Custom per-page match, evaluated against each open page in turn.
pub type PagePredicate =
    Arc<dyn for<'a> Fn(&'a dyn Page) -> BoxFuture<'a, anyhow::Result<bool>> + Send + Sync>;

/// How to find a page among the open ones.
#[derive(Clone)]
pub enum PageQuery {
    /// Substring of the page title or URL.
    Text(String),
    /// Regular expression tested against the title, then the URL.
    Pattern(Regex),
    Predicate(PagePredicate),
}

impl PageQuery {
    pub fn text(text: impl Into<String>) -> Self {
        PageQuery::Text(text.into())
    }

    pub fn pattern(pattern: &str) -> Result<Self, regex::Error> {
        Ok(PageQuery::Pattern(Regex::new(pattern)?))
    }

    pub fn predicate<F>(f: F) -> Self
    where
        F: for<'a> Fn(&'a dyn Page) -> BoxFuture<'a, anyhow::Result<bool>> + Send + Sync + 'static,
    {
        PageQuery::Predicate(Arc::new(f))
    }

    /// Parse the config form: `/.../` is a pattern, anything else is text.
    pub fn parse(raw: &str) -> Result<Self, regex::Error> {
        match raw.strip_prefix('/').and_then(|r| r.strip_suffix('/')) {
            Some(pattern) if !pattern.is_empty() => Self::pattern(pattern),
            _ => Ok(Self::text(raw)),
        }
    }

    pub async fn matches(&self, page: &dyn Page) -> anyhow::Result<bool> {
        match self {
            PageQuery::Text(text) => {
                let title = page.title().await?;
                let url = page.url().await?;
                Ok(title.contains(text.as_str()) || url.contains(text.as_str()))
            }
            PageQuery::Pattern(re) => {
                let title = page.title().await?;
                let url = page.url().await?;
                Ok(re.is_match(&title) || re.is_match(&url))
            }
            PageQuery::Predicate(f) => f(page).await,
        }
    }
}

impl fmt::Debug for PageQuery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PageQuery::Text(text) => f.debug_tuple("Text").field(text).finish(),
            PageQuery::Pattern(re) => f.debug_tuple("Pattern").field(&re.as_str()).finish(),
            PageQuery::Predicate(_) => f.write_str("Predicate(..)"),
        }
    }
}

impl From<&str> for PageQuery {
    fn from(text: &str) -> Self {
        PageQuery::text(text)
    }
}

impl From<String> for PageQuery {
    fn from(text: String) -> Self {
        PageQuery::Text(text)
    }
}

impl From<Regex> for PageQuery {
    fn from(re: Regex) -> Self {
        PageQuery::Pattern(re)
    }
}

/// What to do when no open page matches the query.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum PageFallback {
    /// Reuse a blank page (or open one) and navigate it to this URL.
    Navigate(String),
    /// Keep searching until a match appears. Never creates a page.
    Wait,
    /// Reuse a blank page or open a new one.
    #[default]
    Blank,
}

impl From<&str> for PageFallback {
    fn from(url: &str) -> Self {
        if url.is_empty() {
            PageFallback::Blank
        } else {
            PageFallback::Navigate(url.to_string())
        }
    }
}

impl From<String> for PageFallback {
    fn from(url: String) -> Self {
        PageFallback::from(url.as_str())
    }
}

impl From<bool> for PageFallback {
    fn from(wait: bool) -> Self {
        if wait { PageFallback::Wait } else { PageFallback::Blank }
    }
}

/// Capability handed to tasks for obtaining pages.
pub trait PageProvider: Send + Sync {
    fn get_page(
        &self,
        query: PageQuery,
        fallback: PageFallback,
    ) -> BoxFuture<'_, anyhow::Result<Arc<dyn Page>>>;
}
