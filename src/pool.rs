// src/pool.rs

//! Pure task-pool core.
//!
//! This module owns the scheduling decisions of the minion without any Tokio
//! types, tasks, or clocks:
//! - which pool entry runs next (round-robin from a cursor, skipping entries
//!   whose awake time is in the future)
//! - the Idle/Busy flag and the "current" entry, flipped together
//! - the pool-wide cooldown gate after every settled run
//! - life accounting and removal of exhausted entries
//!
//! The async shell (`minion::Minion`) feeds it the current time and the
//! outcome of each run. Everything here is unit tested synchronously.

use std::fmt;
use std::time::Duration;

/// Stable identifier of a pool entry. Never reused within one pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EntryId(pub u64);

impl fmt::Display for EntryId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MinionState {
    Idle,
    Busy,
}

#[derive(Debug, Clone)]
pub struct PoolEntry<F> {
    pub id: EntryId,
    pub factory: F,
    /// Remaining runs; `0` means unlimited.
    pub life: u32,
    /// Epoch milliseconds before which the entry is skipped.
    pub awake_time: i64,
}

impl<F> PoolEntry<F> {
    pub fn is_awake(&self, now_ms: i64) -> bool {
        self.awake_time <= now_ms
    }
}

/// Entry chosen by [`TaskPool::select`]. The pool is Busy until it is settled.
#[derive(Debug, Clone)]
pub struct Selection<F> {
    pub entry: EntryId,
    pub factory: F,
}

/// Bookkeeping outcome of [`TaskPool::settle`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Settlement {
    pub entry: EntryId,
    /// `None` when the entry was removed (life exhausted) or already gone.
    pub remaining_life: Option<u32>,
    pub removed: bool,
    pub awake_time: Option<i64>,
    pub next_eligible_at: i64,
}

/// Why a call to [`TaskPool::select`] returned nothing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Skip {
    Busy,
    Empty,
    CoolingDown { until: i64 },
    NoneAwake,
}

pub struct TaskPool<F> {
    entries: Vec<PoolEntry<F>>,
    cursor: usize,
    next_eligible_at: i64,
    task_interval: Duration,
    state: MinionState,
    current: Option<EntryId>,
    next_id: u64,
}

impl<F> fmt::Debug for TaskPool<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskPool")
            .field("len", &self.entries.len())
            .field("cursor", &self.cursor)
            .field("next_eligible_at", &self.next_eligible_at)
            .field("state", &self.state)
            .field("current", &self.current)
            .finish_non_exhaustive()
    }
}

impl<F: Clone> TaskPool<F> {
    pub fn new(task_interval: Duration) -> Self {
        Self {
            entries: Vec::new(),
            cursor: 0,
            next_eligible_at: 0,
            task_interval,
            state: MinionState::Idle,
            current: None,
            next_id: 0,
        }
    }

    /// Append an entry that is eligible immediately.
    pub fn add(&mut self, factory: F, life: u32) -> EntryId {
        let id = EntryId(self.next_id);
        self.next_id += 1;
        self.entries.push(PoolEntry {
            id,
            factory,
            life,
            awake_time: 0,
        });
        id
    }

    /// Pick the next runnable entry and mark the pool Busy.
    ///
    /// Scans at most one full pass starting at the cursor. The cursor itself
    /// only moves on [`settle`](Self::settle).
    pub fn select(&mut self, now_ms: i64) -> Result<Selection<F>, Skip> {
        if self.state == MinionState::Busy || self.current.is_some() {
            return Err(Skip::Busy);
        }
        if self.entries.is_empty() {
            return Err(Skip::Empty);
        }
        if now_ms < self.next_eligible_at {
            return Err(Skip::CoolingDown {
                until: self.next_eligible_at,
            });
        }

        let len = self.entries.len();
        let start = self.cursor % len;
        let index = (0..len)
            .map(|offset| (start + offset) % len)
            .find(|&i| self.entries[i].is_awake(now_ms))
            .ok_or(Skip::NoneAwake)?;

        let entry = &self.entries[index];
        self.state = MinionState::Busy;
        self.current = Some(entry.id);

        Ok(Selection {
            entry: entry.id,
            factory: entry.factory.clone(),
        })
    }

    /// Record the end of a run for `entry` and return the pool to Idle.
    ///
    /// `awake_time` replaces the entry's awake time when present. When the
    /// entry's life drops to zero it is removed and the cursor stays on the
    /// slot it occupied, which now holds its successor. Otherwise the cursor
    /// moves one past the entry that ran.
    pub fn settle(&mut self, entry: EntryId, awake_time: Option<i64>, now_ms: i64) -> Settlement {
        let mut remaining_life = None;
        let mut removed = false;

        if let Some(index) = self.position(entry) {
            let slot = &mut self.entries[index];
            if let Some(at) = awake_time {
                slot.awake_time = at;
            }

            let exhausted = if slot.life > 0 {
                slot.life -= 1;
                slot.life == 0
            } else {
                false
            };

            if exhausted {
                self.entries.remove(index);
                removed = true;
                self.cursor = if self.entries.is_empty() {
                    0
                } else {
                    index % self.entries.len()
                };
            } else {
                remaining_life = Some(slot.life);
                self.cursor = (index + 1) % self.entries.len();
            }
        }

        if self.current == Some(entry) {
            self.current = None;
        }
        self.state = MinionState::Idle;
        self.next_eligible_at = now_ms.saturating_add(duration_ms(self.task_interval));

        Settlement {
            entry,
            remaining_life,
            removed,
            awake_time,
            next_eligible_at: self.next_eligible_at,
        }
    }

    fn position(&self, entry: EntryId) -> Option<usize> {
        self.entries.iter().position(|e| e.id == entry)
    }

    pub fn get(&self, entry: EntryId) -> Option<&PoolEntry<F>> {
        self.entries.iter().find(|e| e.id == entry)
    }

    pub fn entries(&self) -> &[PoolEntry<F>] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn state(&self) -> MinionState {
        self.state
    }

    pub fn current(&self) -> Option<EntryId> {
        self.current
    }

    pub fn cursor(&self) -> usize {
        self.cursor
    }

    pub fn next_eligible_at(&self) -> i64 {
        self.next_eligible_at
    }

    pub fn task_interval(&self) -> Duration {
        self.task_interval
    }
}

fn duration_ms(d: Duration) -> i64 {
    i64::try_from(d.as_millis()).unwrap_or(i64::MAX)
}
