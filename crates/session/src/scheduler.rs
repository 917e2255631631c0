//! Deferred work on the update thread.
//!
//! Tasks fall due after a delay in seconds or after a number of updates.
//! Nothing runs on its own: the owner calls [`Scheduler::advance`] once per
//! update and runs whatever comes back, in scheduling order.

use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Deadline {
    At(Duration),
    Update(u64),
}

#[derive(Debug, Clone)]
struct Entry<T> {
    deadline: Deadline,
    task: T,
}

#[derive(Debug, Clone)]
pub struct Scheduler<T> {
    entries: Vec<Entry<T>>,
    now: Duration,
    updates: u64,
}

impl<T> Default for Scheduler<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Scheduler<T> {
    pub fn new() -> Self {
        Self {
            entries: Vec::new(),
            now: Duration::ZERO,
            updates: 0,
        }
    }

    /// Time of the last [`Scheduler::advance`].
    pub fn now(&self) -> Duration {
        self.now
    }

    /// Updates counted so far.
    pub fn updates(&self) -> u64 {
        self.updates
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Run `task` once `secs` have passed. Negative or non-finite delays run
    /// on the next update.
    pub fn run_in_seconds(&mut self, secs: f32, task: T) {
        let delay = Duration::try_from_secs_f32(secs).unwrap_or_default();
        self.entries.push(Entry {
            deadline: Deadline::At(self.now + delay),
            task,
        });
    }

    /// Run `task` on the `updates`-th update from now.
    pub fn run_in_updates(&mut self, updates: u32, task: T) {
        self.entries.push(Entry {
            deadline: Deadline::Update(self.updates + u64::from(updates)),
            task,
        });
    }

    /// Count one update at time `now` and hand back every task now due.
    ///
    /// Time never runs backwards: an earlier `now` than last time is ignored.
    pub fn advance(&mut self, now: Duration) -> Vec<T> {
        self.now = self.now.max(now);
        self.updates += 1;

        let (now, updates) = (self.now, self.updates);
        let (due, pending): (Vec<_>, Vec<_>) =
            std::mem::take(&mut self.entries)
                .into_iter()
                .partition(|entry| match entry.deadline {
                    Deadline::At(at) => at <= now,
                    Deadline::Update(update) => update <= updates,
                });
        self.entries = pending;
        due.into_iter().map(|entry| entry.task).collect()
    }

    /// Drop every pending task `keep` rejects.
    pub fn retain(&mut self, mut keep: impl FnMut(&T) -> bool) {
        self.entries.retain(|entry| keep(&entry.task));
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}
