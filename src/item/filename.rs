//! WARC filename parsing
//!
//! Crawlers encode the job tag, capture time, serial and crawling host in the
//! WARC filename. Two layouts are in use:
//!
//! ```text
//! Simple (Zeno):              {TLA}-{timestamp}-{serial}-{fqdn}.warc.gz
//! ProcessQualified (Heritrix): {TLA}-{timestamp}-{serial}-{pid}~{fqdn}~{port}.warc.gz
//! ```

use crate::error::{FilenameError, FilenameResult};
use std::fmt;

/// Compressed WARC suffixes we pick up from the watch directory
pub const WARC_SUFFIXES: [&str; 2] = [".warc.zst", ".warc.gz"];

/// Length of the canonical (truncated) timestamp: YYYYMMDDhhmmss
const TIMESTAMP_LEN: usize = 14;

/// Minimum dash-separated segments in a valid stem
const MIN_SEGMENTS: usize = 4;

/// Filename grammar used by the crawler that wrote the WARCs
///
/// Decoded from the numeric `warc_naming` config value: `1` is the simple
/// layout, `2` the process-qualified one. Anything else is kept as
/// `Unknown` so the error surfaces per file instead of at startup.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NamingConvention {
    /// `{TLA}-{timestamp}-{serial}-{fqdn}`
    Simple,
    /// `{TLA}-{timestamp}-{serial}-{pid}~{fqdn}~{port}`
    ProcessQualified,
    /// Unrecognized config value
    Unknown(u8),
}

impl NamingConvention {
    /// Crawler label recorded in item metadata
    pub fn crawler(&self) -> Option<&'static str> {
        match self {
            NamingConvention::Simple => Some("Zeno"),
            NamingConvention::ProcessQualified => Some("Heritrix"),
            NamingConvention::Unknown(_) => None,
        }
    }
}

impl From<u8> for NamingConvention {
    fn from(value: u8) -> Self {
        match value {
            1 => NamingConvention::Simple,
            2 => NamingConvention::ProcessQualified,
            other => NamingConvention::Unknown(other),
        }
    }
}

impl From<NamingConvention> for u8 {
    fn from(value: NamingConvention) -> Self {
        match value {
            NamingConvention::Simple => 1,
            NamingConvention::ProcessQualified => 2,
            NamingConvention::Unknown(other) => other,
        }
    }
}

impl fmt::Display for NamingConvention {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NamingConvention::Simple => write!(f, "simple"),
            NamingConvention::ProcessQualified => write!(f, "process-qualified"),
            NamingConvention::Unknown(n) => write!(f, "unknown({})", n),
        }
    }
}

/// Identity fields decoded from a WARC filename
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedFilename {
    /// Job tag prefix
    pub tla: String,

    /// First 14 characters of the timestamp
    pub timestamp: String,

    /// Timestamp segment as written
    pub full_timestamp: String,

    /// Serial number segment
    pub serial: String,

    /// Crawler process ID (process-qualified names only)
    pub pid: Option<String>,

    /// Fully qualified name of the crawling host
    pub fqdn: String,

    /// First label of the FQDN
    pub host: String,

    /// Crawler port (process-qualified names only)
    pub port: Option<String>,

    /// Crawler label implied by the naming convention
    pub crawler: &'static str,

    /// Filename without its WARC suffix
    pub stem: String,

    /// Filename as listed in the directory
    pub filename: String,
}

impl ParsedFilename {
    /// Canonical item name: `{TLA}-{timestamp14}-{fqdn}`
    ///
    /// Every file whose name yields the same key may share an item.
    pub fn item_name(&self) -> String {
        format!("{}-{}-{}", self.tla, self.timestamp, self.fqdn)
    }

    /// Capture year, taken from the full timestamp
    pub fn year(&self) -> &str {
        char_prefix(&self.full_timestamp, 4).unwrap_or(&self.full_timestamp)
    }
}

/// First `n` characters of `s`, or None if it has fewer
fn char_prefix(s: &str, n: usize) -> Option<&str> {
    match s.char_indices().nth(n) {
        Some((end, _)) => Some(&s[..end]),
        None if s.chars().count() == n => Some(s),
        None => None,
    }
}

/// Check if a filename carries one of the recognized WARC suffixes
pub fn has_warc_suffix(filename: &str) -> bool {
    WARC_SUFFIXES.iter().any(|suffix| filename.ends_with(suffix))
}

/// Strip the first matching WARC suffix, if any
fn strip_warc_suffix(filename: &str) -> &str {
    WARC_SUFFIXES
        .iter()
        .find_map(|suffix| filename.strip_suffix(suffix))
        .unwrap_or(filename)
}

/// Decode a filename under the given naming convention
pub fn parse(filename: &str, convention: NamingConvention) -> FilenameResult<ParsedFilename> {
    let crawler = match convention.crawler() {
        Some(label) => label,
        None => return Err(FilenameError::UnknownNamingConvention(convention.into())),
    };

    let stem = strip_warc_suffix(filename);
    let parts: Vec<&str> = stem.split('-').collect();
    if parts.len() < MIN_SEGMENTS {
        return Err(FilenameError::MalformedFilename {
            filename: filename.to_string(),
            reason: format!(
                "expected at least {} dash-separated segments, found {}",
                MIN_SEGMENTS,
                parts.len()
            ),
        });
    }

    let tla = parts[0];
    let full_timestamp = parts[1];
    let serial = parts[2];
    let tail = parts[3];

    let timestamp = match char_prefix(full_timestamp, TIMESTAMP_LEN) {
        Some(ts) => ts,
        None => {
            return Err(FilenameError::TimestampTooShort {
                filename: filename.to_string(),
                timestamp: full_timestamp.to_string(),
            })
        }
    };

    let (pid, fqdn, port) = match convention {
        NamingConvention::Simple => (None, tail.to_string(), None),
        NamingConvention::ProcessQualified => {
            let subparts: Vec<&str> = tail.split('~').collect();
            if subparts.len() != 3 {
                return Err(FilenameError::MalformedFilename {
                    filename: filename.to_string(),
                    reason: format!(
                        "expected {{pid}}~{{fqdn}}~{{port}}, found '{}'",
                        tail
                    ),
                });
            }
            (
                Some(subparts[0].to_string()),
                subparts[1].to_string(),
                Some(subparts[2].to_string()),
            )
        }
        NamingConvention::Unknown(n) => return Err(FilenameError::UnknownNamingConvention(n)),
    };

    let host = fqdn.split('.').next().unwrap_or_default().to_string();

    Ok(ParsedFilename {
        tla: tla.to_string(),
        timestamp: timestamp.to_string(),
        full_timestamp: full_timestamp.to_string(),
        serial: serial.to_string(),
        pid,
        fqdn,
        host,
        port,
        crawler,
        stem: stem.to_string(),
        filename: filename.to_string(),
    })
}

/// Derive the item name for a filename in one step
pub fn item_name(filename: &str, convention: NamingConvention) -> FilenameResult<String> {
    parse(filename, convention).map(|parsed| parsed.item_name())
}
