//! ContactDispatcher: serial, coalescing driver for `ReconciliationEngine`.
//!
//! At most one engine run is in flight at a time. `schedule_run` requests
//! that arrive while a dispatch is running are folded into a single follow-up
//! pass, so a burst of mutations triggers at most two passes. A folded
//! `Backoff` keeps its delay: the follow-up waits for the largest attempt
//! requested. Each pass keeps calling the engine while it reports more work,
//! sleeping a capped exponential backoff between retries.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;

use crate::config::DispatchConfig;

use super::engine::ReconciliationEngine;
use super::types::{ErrorKind, RunStatus};

/// Why a run is being requested.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScheduleRequest {
    /// New work was appended; run as soon as possible.
    Immediate,
    /// The previous run failed transiently; `attempt` is 1-based.
    Backoff { attempt: u32 },
}

/// Host hook for executing engine runs. Implementations must never run two
/// engine runs concurrently.
pub trait RunScheduler: Send + Sync {
    fn schedule_run(&self, request: ScheduleRequest);
}

/// Totals for one `dispatch` pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DispatchReport {
    /// Engine runs performed.
    pub runs: usize,
    /// Operations that completed successfully.
    pub executed: usize,
    /// Operations dropped, either rejected by the server or out of retries.
    pub dropped: usize,
    /// Transient failures that were retried.
    pub retries: usize,
}

struct DispatchSlot {
    running: bool,
    /// Follow-up requested while a pass was running.
    rerun: Option<ScheduleRequest>,
}

impl ScheduleRequest {
    /// Fold two pending requests into one, keeping the longer wait.
    fn merge(self, other: ScheduleRequest) -> ScheduleRequest {
        match (self, other) {
            (Self::Backoff { attempt: a }, Self::Backoff { attempt: b }) => {
                Self::Backoff { attempt: a.max(b) }
            }
            (Self::Backoff { attempt }, Self::Immediate)
            | (Self::Immediate, Self::Backoff { attempt }) => Self::Backoff { attempt },
            (Self::Immediate, Self::Immediate) => Self::Immediate,
        }
    }
}

struct DispatcherInner {
    engine: Arc<ReconciliationEngine>,
    config: DispatchConfig,
    run_lock: tokio::sync::Mutex<()>,
    slot: Mutex<DispatchSlot>,
    disposed: AtomicBool,
}

#[derive(Clone)]
pub struct ContactDispatcher {
    inner: Arc<DispatcherInner>,
}

impl ContactDispatcher {
    pub fn new(engine: Arc<ReconciliationEngine>, config: DispatchConfig) -> Self {
        Self {
            inner: Arc::new(DispatcherInner {
                engine,
                config,
                run_lock: tokio::sync::Mutex::new(()),
                slot: Mutex::new(DispatchSlot {
                    running: false,
                    rerun: None,
                }),
                disposed: AtomicBool::new(false),
            }),
        }
    }

    pub fn engine(&self) -> &Arc<ReconciliationEngine> {
        &self.inner.engine
    }

    /// Drain the operation log: run the engine until it reports no more
    /// work, the channel id is missing, or the dispatcher is disposed.
    pub async fn dispatch(&self) -> DispatchReport {
        let _guard = self.inner.run_lock.lock().await;
        let engine = &self.inner.engine;
        let config = &self.inner.config;

        let mut report = DispatchReport::default();
        let mut attempt: u32 = 0;

        while !self.is_disposed() {
            let outcome = engine.run().await;
            report.runs += 1;

            match outcome.status {
                RunStatus::Completed => {
                    attempt = 0;
                    match &outcome.error {
                        Some(e) if e.kind == ErrorKind::Permanent => report.dropped += 1,
                        _ if outcome.operation.is_some() => report.executed += 1,
                        _ => {}
                    }
                }
                RunStatus::RetryScheduled => {
                    attempt += 1;
                    if attempt >= config.max_attempts {
                        match engine.give_up(attempt, &outcome) {
                            Ok(dropped) => report.dropped += usize::from(dropped.is_some()),
                            Err(_) => break,
                        }
                        attempt = 0;
                        continue;
                    }
                    report.retries += 1;
                    tokio::time::sleep(config.backoff_delay(attempt)).await;
                    continue;
                }
            }

            if !outcome.has_more {
                break;
            }
        }

        report
    }

    /// Stop dispatching. A pass in progress finishes its current run, then
    /// exits; later requests are ignored.
    pub fn dispose(&self) {
        self.inner.disposed.store(true, Ordering::SeqCst);
    }

    pub fn is_disposed(&self) -> bool {
        self.inner.disposed.load(Ordering::SeqCst)
    }

    // -----------------------------------------------------------------------
    // Internal
    // -----------------------------------------------------------------------

    /// Mark the slot running, or record `request` as a follow-up if it
    /// already is. Returns whether the caller should start a pass.
    fn claim_slot(&self, request: ScheduleRequest) -> bool {
        let mut slot = self.inner.slot.lock();
        if slot.running {
            slot.rerun = Some(match slot.rerun {
                Some(pending) => pending.merge(request),
                None => request,
            });
            false
        } else {
            slot.running = true;
            true
        }
    }

    /// Release the slot, or hand back the follow-up requested meanwhile.
    fn release_slot(&self) -> Option<ScheduleRequest> {
        let mut slot = self.inner.slot.lock();
        match slot.rerun.take() {
            Some(next) if !self.is_disposed() => Some(next),
            _ => {
                slot.running = false;
                None
            }
        }
    }

    fn delay_for(&self, request: ScheduleRequest) -> Option<Duration> {
        match request {
            ScheduleRequest::Immediate => None,
            ScheduleRequest::Backoff { attempt } => Some(self.inner.config.backoff_delay(attempt)),
        }
    }
}

impl RunScheduler for ContactDispatcher {
    fn schedule_run(&self, request: ScheduleRequest) {
        if self.is_disposed() {
            return;
        }
        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            tracing::warn!(
                ?request,
                "no tokio runtime available, contact operations stay queued"
            );
            return;
        };
        if !self.claim_slot(request) {
            return;
        }

        let dispatcher = self.clone();
        handle.spawn(async move {
            let mut request = request;
            loop {
                if let Some(delay) = dispatcher.delay_for(request) {
                    tokio::time::sleep(delay).await;
                }
                let report = dispatcher.dispatch().await;
                tracing::debug!(?report, "contact dispatch pass finished");
                match dispatcher.release_slot() {
                    Some(next) => request = next,
                    None => break,
                }
            }
        });
    }
}
