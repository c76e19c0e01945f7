use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

use tokio::sync::Notify;

/// Counts outstanding work and lets one task wait for it to reach zero.
///
/// The session adds before it enqueues; whoever finishes a unit calls
/// [`done`](Self::done) exactly once, success or failure. Lifetime totals are
/// kept so the add/done balance can be checked after a campaign.
#[derive(Debug, Default)]
pub struct CompletionCounter {
    outstanding: AtomicUsize,
    added: AtomicU64,
    completed: AtomicU64,
    zero: Notify,
}

impl CompletionCounter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&self, n: usize) {
        if n == 0 {
            return;
        }
        self.added.fetch_add(n as u64, Ordering::SeqCst);
        self.outstanding.fetch_add(n, Ordering::SeqCst);
    }

    pub fn done(&self) {
        let prev = self
            .outstanding
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1));
        match prev {
            Ok(prev) => {
                self.completed.fetch_add(1, Ordering::SeqCst);
                if prev == 1 {
                    self.zero.notify_waiters();
                }
            }
            Err(_) => tracing::error!("Completion counter decremented below zero"),
        }
    }

    pub fn outstanding(&self) -> usize {
        self.outstanding.load(Ordering::SeqCst)
    }

    /// Total adds and total completions since creation.
    pub fn totals(&self) -> (u64, u64) {
        (
            self.added.load(Ordering::SeqCst),
            self.completed.load(Ordering::SeqCst),
        )
    }

    /// Resolve once nothing is outstanding.
    pub async fn wait_zero(&self) {
        loop {
            let notified = self.zero.notified();
            tokio::pin!(notified);
            // Register before checking so a concurrent final `done` can't be missed.
            notified.as_mut().enable();
            if self.outstanding() == 0 {
                return;
            }
            notified.await;
        }
    }
}
