//! Watch loop - drives scanning, grouping and dispatch
//!
//! The loop is responsible for:
//! - Scanning the WARC directory on a fixed interval
//! - Feeding new files through the item assembler
//! - Handing each task to the dispatcher, in listing order
//! - The drain on the first shutdown request, and giving up on the second
//!
//! Assembler state lives here and is only touched by the loop's own task.

use crate::config::JobContext;
use crate::item::ItemAssembler;
use crate::upload::{Dispatch, DispatchSnapshot, UploadDispatcher};
use crate::watcher::scan::scan_directory;
use crate::watcher::shutdown::{ShutdownListener, ShutdownRequest};
use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

/// Lifecycle of the loop
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchState {
    /// Scanning and dispatching
    Running,
    /// No new work, waiting for uploads to finish
    Draining,
    /// Done
    Stopped,
}

/// How the loop ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchOutcome {
    /// Every dispatched upload finished
    Drained,
    /// Forced shutdown with uploads still running
    Abandoned { outstanding: usize },
}

/// Whether a tick ran to the end
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickFlow {
    Continue,
    /// Shutdown arrived mid-tick, or the dispatcher was closed
    Interrupted,
}

/// Result of a watch run
#[derive(Debug)]
pub struct WatchResult {
    /// How the run ended
    pub outcome: WatchOutcome,

    /// Directory scans performed
    pub ticks: u64,

    /// Items opened by the assembler
    pub items: u64,

    /// Upload counters at exit
    pub uploads: DispatchSnapshot,

    /// When the loop started
    pub started_at: DateTime<Utc>,

    /// Time from start to exit
    pub duration: Duration,
}

/// Timer-driven control loop over one WARC directory
pub struct WatchLoop {
    context: Arc<JobContext>,
    assembler: ItemAssembler,
    dispatcher: UploadDispatcher,
    state: WatchState,
    ticks: u64,
}

impl WatchLoop {
    pub fn new(context: Arc<JobContext>, dispatcher: UploadDispatcher) -> Self {
        let assembler = ItemAssembler::new(context.config.naming, context.config.item_size_bytes);
        Self {
            context,
            assembler,
            dispatcher,
            state: WatchState::Running,
            ticks: 0,
        }
    }

    pub fn state(&self) -> WatchState {
        self.state
    }

    pub fn assembler(&self) -> &ItemAssembler {
        &self.assembler
    }

    /// Run until shutdown
    ///
    /// The first scan happens one interval after start. Returns
    /// [`WatchOutcome::Drained`] once a graceful shutdown has let every upload
    /// finish, or [`WatchOutcome::Abandoned`] if a second request arrives first.
    pub async fn run(&mut self, mut shutdown: ShutdownListener) -> WatchResult {
        let started_at = Utc::now();
        let start = Instant::now();
        let period = self.context.config.scan_interval;

        let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        info!(
            dir = %self.context.config.warcs_dir.display(),
            interval_secs = period.as_secs_f64(),
            item_bytes = self.assembler.max_item_bytes(),
            threads = self.dispatcher.capacity(),
            naming = %self.context.config.naming,
            "Watching for WARCs"
        );

        loop {
            tokio::select! {
                biased;
                _ = shutdown.reached(ShutdownRequest::Graceful) => break,
                _ = ticker.tick() => {
                    if self.tick(&mut shutdown).await == TickFlow::Interrupted {
                        break;
                    }
                }
            }
        }

        self.state = WatchState::Draining;
        info!(
            in_flight = self.dispatcher.in_flight(),
            "Stopping watcher, waiting for uploads to finish"
        );

        let outcome = tokio::select! {
            biased;
            _ = self.dispatcher.wait_idle() => {
                info!("All uploads finished");
                WatchOutcome::Drained
            }
            _ = shutdown.reached(ShutdownRequest::Forced) => {
                self.dispatcher.close();
                let outstanding = self.dispatcher.in_flight();
                warn!(outstanding, "Forced shutdown, abandoning running uploads");
                WatchOutcome::Abandoned { outstanding }
            }
        };

        self.state = WatchState::Stopped;

        WatchResult {
            outcome,
            ticks: self.ticks,
            items: self.assembler.item_count(),
            uploads: self.dispatcher.snapshot(),
            started_at,
            duration: start.elapsed(),
        }
    }

    /// One scan: list, group, dispatch
    ///
    /// A listing error is logged and the tick ends early. Once a graceful
    /// shutdown is seen no further task is dispatched, including one already
    /// waiting for a free slot.
    pub async fn tick(&mut self, shutdown: &mut ShutdownListener) -> TickFlow {
        self.ticks += 1;
        let dir = &self.context.config.warcs_dir;

        let scan = match scan_directory(dir, self.dispatcher.registry()).await {
            Ok(scan) => scan,
            Err(e) => {
                error!(dir = %dir.display(), error = %e, "Failed to list WARC directory");
                return TickFlow::Continue;
            }
        };

        debug!(
            tick = self.ticks,
            candidates = scan.candidates.len(),
            known = scan.known,
            stat_failures = scan.stat_failures,
            forgotten = scan.forgotten,
            "Scanned WARC directory"
        );

        for candidate in &scan.candidates {
            let task = match self.assembler.assign(candidate) {
                Ok(task) => task,
                Err(e) => {
                    warn!(file = %candidate.filename, error = %e, "Cannot parse filename, skipping this scan");
                    continue;
                }
            };

            tokio::select! {
                biased;
                _ = shutdown.reached(ShutdownRequest::Graceful) => return TickFlow::Interrupted,
                dispatched = self.dispatcher.dispatch(task) => match dispatched {
                    Dispatch::Started => {}
                    Dispatch::Duplicate => {
                        debug!(file = %candidate.filename, "Already uploading, skipped");
                    }
                    Dispatch::Closed => return TickFlow::Interrupted,
                },
            }
        }

        TickFlow::Continue
    }
}
