//! Directory listing for the watch loop

use crate::item::filename::has_warc_suffix;
use crate::item::Candidate;
use crate::upload::InFlightRegistry;
use std::collections::HashSet;
use std::io;
use std::path::Path;
use tracing::{debug, warn};

/// Files found by one scan
#[derive(Debug, Default)]
pub struct Scan {
    /// Upload candidates, sorted by filename
    pub candidates: Vec<Candidate>,
    /// WARCs skipped because they are uploading or already uploaded
    pub known: usize,
    /// WARCs skipped because they could not be stat'ed
    pub stat_failures: usize,
    /// Uploaded files forgotten because they left the directory
    pub forgotten: usize,
}

/// List upload candidates in a flat WARC directory
///
/// Keeps non-directory entries with a WARC suffix that the registry does not
/// know about, sized with a stat that follows symlinks. Listing order is by
/// filename; downstream grouping takes it as given.
///
/// After a complete listing, uploaded files that were not seen are dropped
/// from the registry's completed set.
pub async fn scan_directory(dir: &Path, registry: &InFlightRegistry) -> io::Result<Scan> {
    let mut entries = tokio::fs::read_dir(dir).await?;
    let mut scan = Scan::default();
    let mut listed = HashSet::new();

    while let Some(entry) = entries.next_entry().await? {
        let Some(name) = entry.file_name().to_str().map(str::to_string) else {
            debug!(path = %entry.path().display(), "Skipping non-UTF-8 filename");
            continue;
        };

        if !has_warc_suffix(&name) {
            continue;
        }
        listed.insert(name.clone());

        if registry.is_known(&name) {
            scan.known += 1;
            continue;
        }

        match tokio::fs::metadata(entry.path()).await {
            Ok(meta) if meta.is_dir() => continue,
            Ok(meta) => scan.candidates.push(Candidate::new(name, meta.len())),
            Err(e) => {
                warn!(file = %name, error = %e, "Cannot stat file, skipping this scan");
                scan.stat_failures += 1;
            }
        }
    }

    scan.forgotten = registry.retain_completed(&listed);
    if scan.forgotten > 0 {
        debug!(forgotten = scan.forgotten, "Forgot uploaded files no longer in the directory");
    }

    scan.candidates.sort_by(|a, b| a.filename.cmp(&b.filename));
    Ok(scan)
}
