//! Progress reporting for the uploader
//!
//! Provides a live status line using indicatif, plus the startup header and
//! exit summary. Log lines share the terminal with the spinner through
//! [`LogWriter`].

use crate::upload::DispatchSnapshot;
use console::style;
use humansize::{format_size, BINARY};
use indicatif::{ProgressBar, ProgressStyle};
use parking_lot::Mutex;
use std::io::{self, Write};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::fmt::MakeWriter;

/// Spinner showing upload counters
pub struct ProgressReporter {
    bar: ProgressBar,
}

impl ProgressReporter {
    /// Create a new progress reporter
    pub fn new() -> Self {
        Self::with_bar(ProgressBar::new_spinner())
    }

    fn with_bar(bar: ProgressBar) -> Self {
        if let Ok(style) = ProgressStyle::default_spinner().template("{spinner:.green} [{elapsed_precise}] {msg}") {
            bar.set_style(style.tick_chars("⠋⠙⠹⠸⠼⠴⠦⠧⠇⠏"));
        }

        bar.enable_steady_tick(Duration::from_millis(100));

        Self { bar }
    }

    /// Update the progress display
    pub fn update(&self, snapshot: &DispatchSnapshot) {
        self.bar.set_message(status_line(snapshot));
    }

    /// Set a status message
    pub fn set_status(&self, status: &str) {
        self.bar.set_message(status.to_string());
    }

    /// Finish and clear the progress display
    pub fn finish_and_clear(&self) {
        self.bar.finish_and_clear();
    }
}

impl Default for ProgressReporter {
    fn default() -> Self {
        Self::new()
    }
}

/// Log sink on stderr that clears the spinner around each write
///
/// Installed as the tracing writer before any spinner exists; a reporter is
/// attached once the display starts and detached before it is cleared.
#[derive(Clone, Default)]
pub struct LogWriter {
    bar: Arc<Mutex<Option<ProgressBar>>>,
}

impl LogWriter {
    pub fn attach(&self, reporter: &ProgressReporter) {
        *self.bar.lock() = Some(reporter.bar.clone());
    }

    pub fn detach(&self) {
        *self.bar.lock() = None;
    }
}

impl<'a> MakeWriter<'a> for LogWriter {
    type Writer = SuspendingWriter;

    fn make_writer(&'a self) -> Self::Writer {
        SuspendingWriter {
            bar: self.bar.lock().clone(),
        }
    }
}

/// One log event's writer, see [`LogWriter`]
pub struct SuspendingWriter {
    bar: Option<ProgressBar>,
}

impl Write for SuspendingWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match &self.bar {
            Some(bar) => bar.suspend(|| io::stderr().write(buf)),
            None => io::stderr().write(buf),
        }
    }

    fn write_all(&mut self, buf: &[u8]) -> io::Result<()> {
        match &self.bar {
            Some(bar) => bar.suspend(|| io::stderr().lock().write_all(buf)),
            None => io::stderr().lock().write_all(buf),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        io::stderr().flush()
    }
}

fn status_line(snapshot: &DispatchSnapshot) -> String {
    let mut msg = format!(
        "Uploading: {}/{} | Uploaded: {} | Size: {}",
        snapshot.in_flight,
        snapshot.capacity,
        format_number(snapshot.succeeded),
        format_size(snapshot.bytes_uploaded, BINARY),
    );
    if snapshot.failed > 0 {
        msg.push_str(&format!(" | Failed: {}", format_number(snapshot.failed)));
    }
    msg
}

/// Format a number with thousands separators
fn format_number(n: u64) -> String {
    let s = n.to_string();
    let bytes: Vec<_> = s.bytes().rev().collect();

    let chunks: Vec<String> = bytes
        .chunks(3)
        .map(|chunk| chunk.iter().rev().map(|&b| b as char).collect::<String>())
        .collect();

    chunks.into_iter().rev().collect::<Vec<_>>().join(",")
}

/// Print a summary of the run
pub fn print_summary(snapshot: &DispatchSnapshot, items: u64, duration: Duration, forced: bool) {
    let duration_secs = duration.as_secs_f64();
    let rate = if duration_secs > 0.0 {
        snapshot.bytes_uploaded as f64 / duration_secs
    } else {
        0.0
    };

    println!();
    if forced {
        println!("{}", style("Upload Interrupted").yellow().bold());
    } else {
        println!("{}", style("Upload Stopped").green().bold());
    }
    println!("{}", style("─".repeat(50)).dim());
    println!("  {} {}", style("Files:").bold(), format_number(snapshot.succeeded));
    println!("  {} {}", style("Items:").bold(), format_number(items));
    println!(
        "  {} {}",
        style("Total Size:").bold(),
        format_size(snapshot.bytes_uploaded, BINARY)
    );
    println!(
        "  {} {:.1}s ({}/s)",
        style("Duration:").bold(),
        duration_secs,
        format_size(rate as u64, BINARY)
    );
    if snapshot.deleted > 0 {
        println!("  {} {}", style("Deleted:").bold(), format_number(snapshot.deleted));
    }
    if snapshot.failed > 0 {
        println!(
            "  {} {}",
            style("Failed attempts:").yellow().bold(),
            format_number(snapshot.failed)
        );
    }
    if forced && snapshot.in_flight > 0 {
        println!(
            "  {} {}",
            style("Abandoned:").red().bold(),
            snapshot.in_flight
        );
    }
    println!();
}

/// Print a header at startup
pub fn print_header(dir: &Path, job: &str, threads: usize, item_bytes: u64, endpoint: &str) {
    println!();
    println!(
        "{} {}",
        style("warc-drain").cyan().bold(),
        env!("CARGO_PKG_VERSION")
    );
    println!("{}", style("─".repeat(50)).dim());
    println!("  {} {}", style("Job:").bold(), job);
    println!("  {} {}", style("Watching:").bold(), dir.display());
    println!("  {} {}", style("Item size:").bold(), format_size(item_bytes, BINARY));
    println!("  {} {}", style("Threads:").bold(), threads);
    println!("  {} {}", style("Endpoint:").bold(), endpoint);
    println!();
}
