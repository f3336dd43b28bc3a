//! Configuration types for warc-drain
//!
//! This module defines:
//! - CLI argument parsing using clap derive macros
//! - Job configuration, loaded from either the native JSON format or the
//!   legacy draintasker YAML format
//! - Runtime configuration with validation

use crate::credentials::Credentials;
use crate::error::ConfigError;
use crate::item::filename::NamingConvention;
use clap::Parser;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Maximum reasonable upload thread count
pub const MAX_THREADS: usize = 256;

/// Default number of concurrent uploads
pub const DEFAULT_THREADS: usize = 4;

/// Default Internet Archive S3 endpoint
pub const DEFAULT_ENDPOINT: &str = "https://s3.us.archive.org";

/// One gibibyte, the unit of the `item_size` config value
const GIB: u64 = 1024 * 1024 * 1024;

/// Watch a WARC directory and upload finished files to the Internet Archive
#[derive(Parser, Debug, Clone)]
#[command(
    name = "warc-drain",
    version,
    about = "Watch a WARC directory and upload finished files to the Internet Archive",
    long_about = "Scans a crawler's WARC output directory on a fixed interval, groups new\n\
                  .warc.gz/.warc.zst files into size-bounded items and uploads them to the\n\
                  Internet Archive S3 endpoint with bounded concurrency.\n\n\
                  Press Ctrl+C once to stop scanning and wait for running uploads,\n\
                  twice to exit immediately.",
    after_help = "EXAMPLES:\n    \
        warc-drain -c job.json\n    \
        warc-drain -c draintasker.yaml -t 8 --delete-uploaded\n    \
        warc-drain -c job.json --item-size 10GB --interval 60\n    \
        warc-drain -c job.json --dry-run -v"
)]
pub struct CliArgs {
    /// Job configuration file (JSON, or legacy draintasker YAML)
    #[arg(short = 'c', long, value_name = "FILE")]
    pub config: PathBuf,

    /// Number of concurrent uploads
    #[arg(short = 't', long, default_value_t = DEFAULT_THREADS, value_name = "NUM")]
    pub threads: usize,

    /// IA S3 access key (overrides the credentials file)
    #[arg(long, env = "IA_S3_ACCESS_KEY", value_name = "KEY")]
    pub s3_access_key: Option<String>,

    /// IA S3 secret key (overrides the credentials file)
    #[arg(long, env = "IA_S3_SECRET_KEY", value_name = "KEY", hide_env_values = true)]
    pub s3_secret_key: Option<String>,

    /// Credentials file [default: $HOME/.ias3cfg]
    #[arg(long, value_name = "FILE")]
    pub s3_creds_file: Option<PathBuf>,

    /// Item size budget, overrides the config (e.g. 50GB, 500MB)
    #[arg(long, value_name = "SIZE")]
    pub item_size: Option<String>,

    /// Scan interval in seconds, overrides the config
    #[arg(long, value_name = "SECS")]
    pub interval: Option<u64>,

    /// Delete local files after a successful upload
    #[arg(long)]
    pub delete_uploaded: bool,

    /// Log what would be uploaded without contacting the archive
    #[arg(long)]
    pub dry_run: bool,

    /// S3 endpoint
    #[arg(long, default_value = DEFAULT_ENDPOINT, value_name = "URL")]
    pub endpoint: String,

    /// Quiet mode - suppress progress output
    #[arg(short = 'q', long)]
    pub quiet: bool,

    /// Verbose output (debug logging)
    #[arg(short = 'v', long)]
    pub verbose: bool,

    /// Emit logs as JSON lines
    #[arg(long)]
    pub json_logs: bool,
}

/// On-disk layout of a job config file
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigFormat {
    /// Native JSON config
    Json,
    /// Legacy draintasker YAML config
    Yaml,
}

/// Sniff the format of a config file's contents
///
/// JSON is tried first since every JSON document is also YAML. A YAML
/// document only counts if it is a mapping; a bare scalar is garbage.
pub fn detect_format(content: &str) -> Option<ConfigFormat> {
    if serde_json::from_str::<serde_json::Value>(content).is_ok() {
        return Some(ConfigFormat::Json);
    }
    match serde_yaml::from_str::<serde_yaml::Value>(content) {
        Ok(value) if value.is_mapping() => Some(ConfigFormat::Yaml),
        _ => None,
    }
}

/// Native JSON job config as written on disk
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct NativeConfig {
    job: String,
    warcs: Option<PathBuf>,
    scan_interval: u64,
    item_size: u64,
    warc_naming: u8,
    description: String,
    operator: String,
    collections: Vec<String>,
    title_prefix: String,
    subject: BTreeMap<String, Vec<String>>,
    derive: u8,
}

/// Legacy draintasker YAML job config
///
/// Keys draintasker used for its own bookkeeping (`xfer_dir`, `block_delay`,
/// ...) are accepted and ignored.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct DraintaskerConfig {
    crawljob: String,
    job_dir: Option<PathBuf>,
    sleep_time: u64,
    max_size: u64,
    #[serde(rename = "WARC_naming")]
    warc_naming: u8,
    description: String,
    operator: String,
    collections: Vec<String>,
    title_prefix: String,
    creator: String,
    sponsor: String,
    contributor: String,
    scanningcenter: String,
    metadata: Option<BTreeMap<String, Vec<String>>>,
    derive: u8,
}

/// Validated job configuration shared by every upload
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobConfig {
    /// Crawl job name
    pub job: String,

    /// Directory the crawler writes finished WARCs into
    pub warcs_dir: PathBuf,

    /// Time between directory scans
    pub scan_interval: Duration,

    /// Item size budget in bytes
    pub item_size_bytes: u64,

    /// Filename grammar of the WARCs
    pub naming: NamingConvention,

    /// Item description
    pub description: String,

    /// Operator recorded on every item
    pub operator: String,

    /// Target collections, in order
    pub collections: Vec<String>,

    /// Prefix used as the item title
    pub title_prefix: String,

    /// Free-form metadata, key -> values
    pub metadata: BTreeMap<String, Vec<String>>,

    /// Queue a derive task after upload
    pub derive: bool,
}

impl JobConfig {
    /// Load and validate a job config file of either format
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Unreadable {
            path: path.to_path_buf(),
            source,
        })?;

        match detect_format(&content) {
            Some(ConfigFormat::Json) => Self::from_json_str(&content, path),
            Some(ConfigFormat::Yaml) => Self::from_yaml_str(&content, path),
            None => Err(ConfigError::UnknownFormat {
                path: path.to_path_buf(),
            }),
        }
    }

    /// Decode a native JSON config; `path` is only used in errors
    pub fn from_json_str(content: &str, path: &Path) -> Result<Self, ConfigError> {
        let raw: NativeConfig =
            serde_json::from_str(content).map_err(|source| ConfigError::Json {
                path: path.to_path_buf(),
                source,
            })?;

        Self::validated(JobConfigParts {
            job: raw.job,
            warcs_dir: raw.warcs,
            scan_interval_secs: raw.scan_interval,
            item_size_gib: raw.item_size,
            naming: raw.warc_naming,
            description: raw.description,
            operator: raw.operator,
            collections: raw.collections,
            title_prefix: raw.title_prefix,
            metadata: raw.subject,
            derive: raw.derive != 0,
        })
    }

    /// Decode a legacy draintasker YAML config; `path` is only used in errors
    pub fn from_yaml_str(content: &str, path: &Path) -> Result<Self, ConfigError> {
        let raw: DraintaskerConfig =
            serde_yaml::from_str(content).map_err(|source| ConfigError::Yaml {
                path: path.to_path_buf(),
                source,
            })?;

        let mut metadata = raw.metadata.unwrap_or_default();
        for (key, value) in [
            ("creator", raw.creator),
            ("sponsor", raw.sponsor),
            ("contributor", raw.contributor),
            ("scanningcenter", raw.scanningcenter),
        ] {
            if !value.is_empty() {
                metadata.entry(key.to_string()).or_default().push(value);
            }
        }

        Self::validated(JobConfigParts {
            job: raw.crawljob,
            warcs_dir: raw.job_dir,
            scan_interval_secs: raw.sleep_time,
            item_size_gib: raw.max_size,
            naming: raw.warc_naming,
            description: raw.description,
            operator: raw.operator,
            collections: raw.collections,
            title_prefix: raw.title_prefix,
            metadata,
            derive: raw.derive != 0,
        })
    }

    fn validated(parts: JobConfigParts) -> Result<Self, ConfigError> {
        let warcs_dir = parts
            .warcs_dir
            .filter(|p| !p.as_os_str().is_empty())
            .ok_or(ConfigError::MissingRequired("WARC directory"))?;

        if parts.scan_interval_secs == 0 {
            return Err(ConfigError::InvalidScanInterval);
        }

        let item_size_bytes = parts
            .item_size_gib
            .checked_mul(GIB)
            .filter(|bytes| *bytes > 0)
            .ok_or(ConfigError::InvalidItemSize)?;

        Ok(Self {
            job: parts.job,
            warcs_dir,
            scan_interval: Duration::from_secs(parts.scan_interval_secs),
            item_size_bytes,
            naming: NamingConvention::from(parts.naming),
            description: parts.description,
            operator: parts.operator,
            collections: parts.collections,
            title_prefix: parts.title_prefix,
            metadata: parts.metadata,
            derive: parts.derive,
        })
    }
}

/// Format-independent fields handed to validation
struct JobConfigParts {
    job: String,
    warcs_dir: Option<PathBuf>,
    scan_interval_secs: u64,
    item_size_gib: u64,
    naming: u8,
    description: String,
    operator: String,
    collections: Vec<String>,
    title_prefix: String,
    metadata: BTreeMap<String, Vec<String>>,
    derive: bool,
}

/// Immutable per-run context shared by every upload task
#[derive(Debug)]
pub struct JobContext {
    /// Job settings
    pub config: JobConfig,

    /// Archive credentials
    pub credentials: Credentials,
}

impl JobContext {
    pub fn new(config: JobConfig, credentials: Credentials) -> Self {
        Self {
            config,
            credentials,
        }
    }
}

/// Validated runtime configuration
#[derive(Debug, Clone)]
pub struct DrainConfig {
    /// Job config with CLI overrides applied
    pub job: JobConfig,

    /// Maximum concurrent uploads
    pub threads: usize,

    /// S3 endpoint base URL
    pub endpoint: String,

    /// Remove files after they are uploaded
    pub delete_uploaded: bool,

    /// Use the logging store instead of the archive
    pub dry_run: bool,

    /// Show progress indicator
    pub show_progress: bool,
}

impl DrainConfig {
    /// Create and validate configuration from CLI arguments
    pub fn from_args(args: &CliArgs) -> Result<Self, ConfigError> {
        if args.threads == 0 || args.threads > MAX_THREADS {
            return Err(ConfigError::InvalidThreadCount {
                count: args.threads,
                max: MAX_THREADS,
            });
        }

        let mut job = JobConfig::load(&args.config)?;

        if let Some(size) = &args.item_size {
            let bytes = parse_size(size)?;
            if bytes == 0 {
                return Err(ConfigError::InvalidItemSize);
            }
            job.item_size_bytes = bytes;
        }

        if let Some(secs) = args.interval {
            if secs == 0 {
                return Err(ConfigError::InvalidScanInterval);
            }
            job.scan_interval = Duration::from_secs(secs);
        }

        if !job.warcs_dir.is_dir() {
            return Err(ConfigError::InvalidWatchDir {
                path: job.warcs_dir.clone(),
                reason: "does not exist or is not a directory".to_string(),
            });
        }

        Ok(Self {
            job,
            threads: args.threads,
            endpoint: args.endpoint.trim_end_matches('/').to_string(),
            delete_uploaded: args.delete_uploaded,
            dry_run: args.dry_run,
            show_progress: !args.quiet,
        })
    }
}

/// Parse a human-readable size string (e.g., "50GB", "500MB", "1.5TB")
///
/// Suffixes are binary multiples. A bare number is bytes.
pub fn parse_size(s: &str) -> Result<u64, ConfigError> {
    let upper = s.trim().to_uppercase();

    let (num_str, multiplier) = if let Some(n) = upper.strip_suffix("TB") {
        (n, 1024u64 * GIB)
    } else if let Some(n) = upper.strip_suffix("GB") {
        (n, GIB)
    } else if let Some(n) = upper.strip_suffix("MB") {
        (n, 1024u64 * 1024)
    } else if let Some(n) = upper.strip_suffix("KB") {
        (n, 1024u64)
    } else if let Some(n) = upper.strip_suffix('B') {
        (n, 1u64)
    } else {
        (upper.as_str(), 1u64)
    };

    let num: f64 = num_str
        .trim()
        .parse()
        .map_err(|_| ConfigError::InvalidSize(s.to_string()))?;

    if !num.is_finite() || num < 0.0 {
        return Err(ConfigError::InvalidSize(s.to_string()));
    }

    Ok((num * multiplier as f64) as u64)
}
