//! One cancellable timer task per pending payment.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use common::PaymentId;
use parking_lot::Mutex;
use tokio::task::JoinHandle;

#[derive(Debug)]
struct Entry {
    handle: JoinHandle<()>,
    /// Set once the delay elapsed and the work started. Running work is
    /// never aborted.
    running: bool,
}

type Tasks = Arc<Mutex<HashMap<PaymentId, Entry>>>;

/// Tracks the settlement task of each payment so it can be cancelled while
/// it waits, and drained on shutdown. Finished tasks remove themselves.
#[derive(Debug, Clone, Default)]
pub struct SettlementScheduler {
    tasks: Tasks,
}

impl SettlementScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Runs `work` on its own task once `delay` has elapsed. A task already
    /// scheduled for the same payment is replaced.
    pub fn schedule<F>(&self, payment_id: PaymentId, delay: Duration, work: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let tasks = self.tasks.clone();
        // The map lock is held until the handle is stored, so the task
        // always finds its own entry.
        let mut guard = self.tasks.lock();
        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if !start_running(&tasks, payment_id) {
                return;
            }
            work.await;
            let mut tasks = tasks.lock();
            if tasks
                .get(&payment_id)
                .is_some_and(|entry| entry.handle.id() == tokio::task::id())
            {
                tasks.remove(&payment_id);
            }
        });
        let entry = Entry {
            handle,
            running: false,
        };
        if let Some(previous) = guard.insert(payment_id, entry) {
            previous.handle.abort();
        }
    }

    /// Aborts the settlement of a payment that is still waiting. Returns
    /// false if none was waiting.
    pub fn cancel(&self, payment_id: PaymentId) -> bool {
        let mut tasks = self.tasks.lock();
        match tasks.get(&payment_id) {
            Some(entry) if !entry.running => {
                if let Some(entry) = tasks.remove(&payment_id) {
                    entry.handle.abort();
                }
                true
            }
            _ => false,
        }
    }

    pub fn is_pending(&self, payment_id: PaymentId) -> bool {
        self.tasks.lock().contains_key(&payment_id)
    }

    pub fn pending(&self) -> usize {
        self.tasks.lock().len()
    }

    /// Aborts every waiting settlement and waits for the running ones to
    /// finish.
    pub async fn shutdown(&self) {
        let running: Vec<JoinHandle<()>> = {
            let mut tasks = self.tasks.lock();
            let mut running = Vec::new();
            let mut aborted = 0usize;
            for (_, entry) in tasks.drain() {
                if entry.running {
                    running.push(entry.handle);
                } else {
                    entry.handle.abort();
                    aborted += 1;
                }
            }
            if aborted > 0 || !running.is_empty() {
                tracing::info!(
                    aborted,
                    running = running.len(),
                    "stopping settlement scheduler"
                );
            }
            running
        };

        for handle in running {
            if let Err(e) = handle.await {
                tracing::warn!(error = %e, "settlement task ended abnormally");
            }
        }
    }
}

/// Flips the task's entry to running. Returns false if the entry is gone,
/// meaning the settlement was cancelled after its timer fired.
fn start_running(tasks: &Tasks, payment_id: PaymentId) -> bool {
    let mut tasks = tasks.lock();
    match tasks.get_mut(&payment_id) {
        Some(entry) if entry.handle.id() == tokio::task::id() => {
            entry.running = true;
            true
        }
        _ => false,
    }
}
