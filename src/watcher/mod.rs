//! Directory watching
//!
//! - `scan`: one listing of the WARC directory
//! - `shutdown`: graceful/forced shutdown signalling
//! - `watch_loop`: the timer-driven control loop

pub mod scan;
pub mod shutdown;
pub mod watch_loop;

pub use scan::{scan_directory, Scan};
pub use shutdown::{ShutdownController, ShutdownListener, ShutdownRequest};
pub use watch_loop::{TickFlow, WatchLoop, WatchOutcome, WatchResult, WatchState};
