//! warc-drain - WARC Directory Uploader
//!
//! Watches a crawler's output directory for finished WARC files, groups them
//! into size-bounded Internet Archive items and uploads them with a bounded
//! number of concurrent transfers.
//!
//! # Features
//!
//! - **Two filename conventions**: simple (`{TLA}-{ts}-{serial}-{fqdn}`) and
//!   process-qualified (`{TLA}-{ts}-{serial}-{pid}~{fqdn}~{port}`) names are
//!   decoded into the item name and per-file metadata.
//!
//! - **Size-bounded items**: files are appended to the open item in listing
//!   order until the next one would overflow the budget.
//!
//! - **Bounded concurrency with backpressure**: at most N uploads run at once;
//!   the scanner waits for a free slot instead of queueing.
//!
//! - **No double uploads**: files in flight, or already uploaded this run, are
//!   skipped by later scans.
//!
//! - **Graceful shutdown**: the first Ctrl+C stops scanning and waits for
//!   running uploads, the second exits at once.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                    WARC directory                             │
//! │        *.warc.gz / *.warc.zst written by the crawler          │
//! └─────────────────────────────┬────────────────────────────────┘
//!                               │ scan every interval
//!                               ▼
//! ┌──────────────────────────────────────────────────────────────┐
//! │  WatchLoop (one control task)                                 │
//! │   scan_directory ──► ItemAssembler ──► UploadDispatcher       │
//! │        ▲                                   │                  │
//! │        │ skip known      ┌─────────────────┘                  │
//! │        │                 ▼                                    │
//! │   ┌────────────────────────────┐   ┌──────────────────────┐  │
//! │   │     InFlightRegistry       │◄──│  Upload tasks (≤ N)   │  │
//! │   │ in flight + uploaded files │   │  semaphore permits    │  │
//! │   └────────────────────────────┘   └──────────┬───────────┘  │
//! └───────────────────────────────────────────────┼──────────────┘
//!                                                 │ PUT
//!                                                 ▼
//!                                   ┌──────────────────────────┐
//!                                   │  Internet Archive S3     │
//!                                   └──────────────────────────┘
//! ```
//!
//! # Example
//!
//! ```bash
//! # Native JSON job config, 8 concurrent uploads
//! warc-drain -c job.json -t 8
//!
//! # Legacy draintasker config, remove files once uploaded
//! warc-drain -c draintasker.yaml --delete-uploaded
//! ```

pub mod config;
pub mod credentials;
pub mod error;
pub mod item;
pub mod progress;
pub mod upload;
pub mod watcher;

pub use config::{CliArgs, DrainConfig, JobConfig, JobContext};
pub use error::{DrainError, Result};
pub use item::{ItemAssembler, NamingConvention, ParsedFilename, UploadTask};
pub use upload::{InFlightRegistry, ObjectStoreClient, UploadDispatcher};
pub use watcher::{WatchLoop, WatchOutcome, WatchResult};
