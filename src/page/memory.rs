// src/page/memory.rs

//! In-process browser backend.
//!
//! Pages hold a title, a URL and a flat map of `selector -> text` standing in
//! for the DOM. Tests script site behavior with click hooks and emitted
//! events; the CLI seeds pages from the `[[page]]` config tables.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::future::ready;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, Weak};

use anyhow::anyhow;

use crate::BoxFuture;

use super::{Browser, Page, PageEvent, PageEventKind, PageListener, SubscriptionId};

/// Runs when an element is clicked, after the click is recorded.
pub type ClickHook = Arc<dyn Fn(&MemoryPage) + Send + Sync>;

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[derive(Default)]
struct Session {
    pages: Mutex<Vec<Arc<MemoryPage>>>,
    front: Mutex<Option<u64>>,
    next_page: AtomicU64,
}

/// Shared handle to an in-memory browser session. Clones see the same pages.
#[derive(Clone, Default)]
pub struct MemoryBrowser {
    session: Arc<Session>,
}

impl fmt::Debug for MemoryBrowser {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemoryBrowser")
            .field("pages", &self.len())
            .finish()
    }
}

impl MemoryBrowser {
    pub fn new() -> Self {
        Self::default()
    }

    /// Open a page with the given title and URL.
    pub fn open(&self, title: &str, url: &str) -> Arc<MemoryPage> {
        let id = self.session.next_page.fetch_add(1, Ordering::SeqCst);
        let page = Arc::new(MemoryPage::build(id, Arc::downgrade(&self.session), title, url));
        lock(&self.session.pages).push(Arc::clone(&page));
        page
    }

    /// First open page with exactly this title.
    pub fn find(&self, title: &str) -> Option<Arc<MemoryPage>> {
        lock(&self.session.pages)
            .iter()
            .find(|p| !p.is_closed() && lock(&p.state).title == title)
            .cloned()
    }

    pub fn front_page(&self) -> Option<Arc<MemoryPage>> {
        let front = (*lock(&self.session.front))?;
        lock(&self.session.pages)
            .iter()
            .find(|p| p.id == front)
            .cloned()
    }

    pub fn len(&self) -> usize {
        lock(&self.session.pages).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Browser for MemoryBrowser {
    fn pages(&self) -> BoxFuture<'_, anyhow::Result<Vec<Arc<dyn Page>>>> {
        let pages = lock(&self.session.pages)
            .iter()
            .map(|p| Arc::clone(p) as Arc<dyn Page>)
            .collect();
        Box::pin(ready(Ok(pages)))
    }

    fn new_page(&self) -> BoxFuture<'_, anyhow::Result<Arc<dyn Page>>> {
        let page: Arc<dyn Page> = self.open("", "about:blank");
        Box::pin(ready(Ok(page)))
    }
}

#[derive(Debug, Default)]
struct PageState {
    title: String,
    url: String,
    elements: BTreeMap<String, String>,
    user_agent: Option<String>,
    clicks: Vec<String>,
    closed: bool,
}

struct Listener {
    id: SubscriptionId,
    kind: PageEventKind,
    callback: PageListener,
}

/// One in-memory page.
pub struct MemoryPage {
    id: u64,
    session: Weak<Session>,
    state: Mutex<PageState>,
    listeners: Mutex<Vec<Listener>>,
    click_hooks: Mutex<HashMap<String, ClickHook>>,
    failing_queries: AtomicU32,
    next_subscription: AtomicU64,
}

impl fmt::Debug for MemoryPage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = lock(&self.state);
        f.debug_struct("MemoryPage")
            .field("id", &self.id)
            .field("title", &state.title)
            .field("url", &state.url)
            .field("closed", &state.closed)
            .finish_non_exhaustive()
    }
}

impl MemoryPage {
    fn build(id: u64, session: Weak<Session>, title: &str, url: &str) -> Self {
        Self {
            id,
            session,
            state: Mutex::new(PageState {
                title: title.to_string(),
                url: url.to_string(),
                ..PageState::default()
            }),
            listeners: Mutex::new(Vec::new()),
            click_hooks: Mutex::new(HashMap::new()),
            failing_queries: AtomicU32::new(0),
            next_subscription: AtomicU64::new(0),
        }
    }

    /// A page outside of any browser session.
    pub fn new(title: &str, url: &str) -> Arc<Self> {
        Arc::new(Self::build(0, Weak::new(), title, url))
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn set_title(&self, title: &str) {
        lock(&self.state).title = title.to_string();
    }

    pub fn current_url(&self) -> String {
        lock(&self.state).url.clone()
    }

    pub fn set_element(&self, selector: &str, text: &str) {
        lock(&self.state)
            .elements
            .insert(selector.to_string(), text.to_string());
    }

    pub fn remove_element(&self, selector: &str) {
        lock(&self.state).elements.remove(selector);
    }

    pub fn user_agent(&self) -> Option<String> {
        lock(&self.state).user_agent.clone()
    }

    /// Selectors clicked so far, in order.
    pub fn clicks(&self) -> Vec<String> {
        lock(&self.state).clicks.clone()
    }

    pub fn on_click(&self, selector: &str, hook: impl Fn(&MemoryPage) + Send + Sync + 'static) {
        lock(&self.click_hooks).insert(selector.to_string(), Arc::new(hook));
    }

    /// Make the next `n` title/URL reads fail, as a navigating page would.
    pub fn fail_next_queries(&self, n: u32) {
        self.failing_queries.store(n, Ordering::SeqCst);
    }

    pub fn listener_count(&self) -> usize {
        lock(&self.listeners).len()
    }

    /// Deliver `event` to every listener subscribed to its kind.
    pub fn emit(&self, event: PageEvent) {
        let kind = event.kind();
        let targets: Vec<PageListener> = lock(&self.listeners)
            .iter()
            .filter(|l| l.kind == kind)
            .map(|l| Arc::clone(&l.callback))
            .collect();
        for callback in targets {
            callback(&event);
        }
    }

    pub fn close(&self) {
        lock(&self.state).closed = true;
        self.emit(PageEvent::Close);
    }

    fn take_failure(&self) -> bool {
        self.failing_queries
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }

    fn read<T>(&self, f: impl FnOnce(&PageState) -> T) -> anyhow::Result<T> {
        if self.take_failure() {
            return Err(anyhow!("execution context was destroyed"));
        }
        let state = lock(&self.state);
        if state.closed {
            return Err(anyhow!("page {} is closed", self.id));
        }
        Ok(f(&state))
    }

    fn click_now(&self, selector: &str) -> anyhow::Result<()> {
        {
            let mut state = lock(&self.state);
            if state.closed {
                return Err(anyhow!("page {} is closed", self.id));
            }
            if !state.elements.contains_key(selector) {
                return Err(anyhow!("no element matches selector '{selector}'"));
            }
            state.clicks.push(selector.to_string());
        }

        let hook = lock(&self.click_hooks).get(selector).cloned();
        if let Some(hook) = hook {
            hook(self);
        }
        Ok(())
    }
}

impl Page for MemoryPage {
    fn title(&self) -> BoxFuture<'_, anyhow::Result<String>> {
        Box::pin(ready(self.read(|s| s.title.clone())))
    }

    fn url(&self) -> BoxFuture<'_, anyhow::Result<String>> {
        Box::pin(ready(self.read(|s| s.url.clone())))
    }

    fn goto<'a>(&'a self, url: &'a str) -> BoxFuture<'a, anyhow::Result<()>> {
        let outcome = {
            let mut state = lock(&self.state);
            if state.closed {
                Err(anyhow!("page {} is closed", self.id))
            } else {
                state.url = url.to_string();
                Ok(())
            }
        };
        if outcome.is_ok() {
            self.emit(PageEvent::DomContentLoaded);
        }
        Box::pin(ready(outcome))
    }

    fn bring_to_front(&self) -> BoxFuture<'_, anyhow::Result<()>> {
        if let Some(session) = self.session.upgrade() {
            *lock(&session.front) = Some(self.id);
        }
        Box::pin(ready(Ok(())))
    }

    fn set_user_agent<'a>(&'a self, user_agent: &'a str) -> BoxFuture<'a, anyhow::Result<()>> {
        lock(&self.state).user_agent = Some(user_agent.to_string());
        Box::pin(ready(Ok(())))
    }

    fn exists<'a>(&'a self, selector: &'a str) -> BoxFuture<'a, anyhow::Result<bool>> {
        Box::pin(ready(self.read(|s| s.elements.contains_key(selector))))
    }

    fn click<'a>(&'a self, selector: &'a str) -> BoxFuture<'a, anyhow::Result<()>> {
        Box::pin(ready(self.click_now(selector)))
    }

    fn text<'a>(&'a self, selector: &'a str) -> BoxFuture<'a, anyhow::Result<Option<String>>> {
        Box::pin(ready(self.read(|s| s.elements.get(selector).cloned())))
    }

    fn is_closed(&self) -> bool {
        lock(&self.state).closed
    }

    fn subscribe(&self, kind: PageEventKind, listener: PageListener) -> SubscriptionId {
        let id = SubscriptionId(self.next_subscription.fetch_add(1, Ordering::SeqCst));
        lock(&self.listeners).push(Listener {
            id,
            kind,
            callback: listener,
        });
        id
    }

    fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut listeners = lock(&self.listeners);
        let before = listeners.len();
        listeners.retain(|l| l.id != id);
        listeners.len() != before
    }
}
