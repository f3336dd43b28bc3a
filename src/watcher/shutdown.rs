//! Two-stage shutdown signalling
//!
//! The first request asks for a graceful drain, any later one forces exit.
//! The controller side is cheap to clone and safe to call from a signal
//! handler thread.

use std::sync::Arc;
use tokio::sync::watch;

/// How far shutdown has progressed
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ShutdownRequest {
    /// Keep running
    None,
    /// Stop scanning, finish running uploads
    Graceful,
    /// Stop now
    Forced,
}

/// Sending half: raises the shutdown level
#[derive(Debug, Clone)]
pub struct ShutdownController {
    tx: Arc<watch::Sender<ShutdownRequest>>,
}

/// Receiving half, held by the watch loop
#[derive(Debug, Clone)]
pub struct ShutdownListener {
    rx: watch::Receiver<ShutdownRequest>,
}

/// Create a connected controller/listener pair
pub fn channel() -> (ShutdownController, ShutdownListener) {
    let (tx, rx) = watch::channel(ShutdownRequest::None);
    (
        ShutdownController { tx: Arc::new(tx) },
        ShutdownListener { rx },
    )
}

impl ShutdownController {
    /// Escalate one step and return the new level
    pub fn signal(&self) -> ShutdownRequest {
        let mut level = ShutdownRequest::None;
        self.tx.send_modify(|current| {
            *current = match *current {
                ShutdownRequest::None => ShutdownRequest::Graceful,
                _ => ShutdownRequest::Forced,
            };
            level = *current;
        });
        level
    }

    /// Current level
    pub fn current(&self) -> ShutdownRequest {
        *self.tx.borrow()
    }
}

impl ShutdownListener {
    /// Current level
    pub fn current(&self) -> ShutdownRequest {
        *self.rx.borrow()
    }

    /// Resolve once shutdown reaches at least `level`
    ///
    /// Never resolves if every controller is dropped first.
    pub async fn reached(&mut self, level: ShutdownRequest) {
        let reached = self.rx.wait_for(|current| *current >= level).await.is_ok();
        if !reached {
            std::future::pending::<()>().await;
        }
    }
}
