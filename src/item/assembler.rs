//! Size-bounded grouping of WARCs into items
//!
//! Files are taken in directory-listing order and appended to the open item
//! until the next file would push it over the byte budget. The file that
//! overflows opens (and names) the next item. A file bigger than the whole
//! budget still becomes its own single-file item.

use crate::error::FilenameError;
use crate::item::filename::{self, NamingConvention};
use tracing::info;

/// A file found in the watch directory, with its on-disk size
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Candidate {
    /// Bare filename (no directory)
    pub filename: String,
    /// Size in bytes
    pub size: u64,
}

impl Candidate {
    pub fn new(filename: impl Into<String>, size: u64) -> Self {
        Self {
            filename: filename.into(),
            size,
        }
    }
}

/// One file bound to the item it will be uploaded under
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadTask {
    /// Bare filename, also used as the remote key
    pub filename: String,
    /// Target item name
    pub item: String,
    /// Size in bytes at scan time
    pub size: u64,
}

/// The item currently accepting files
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Item {
    /// Name derived from the item's first file
    pub name: String,
    /// Bytes assigned so far
    pub size: u64,
    /// Files assigned so far
    pub files: u64,
}

impl Item {
    fn open(name: String) -> Self {
        Self {
            name,
            size: 0,
            files: 0,
        }
    }
}

/// Groups candidate files into items under a byte budget
///
/// The open item survives across scans, so files arriving over several ticks
/// keep filling the same item until it overflows.
#[derive(Debug)]
pub struct ItemAssembler {
    convention: NamingConvention,
    max_item_bytes: u64,
    current: Option<Item>,
    item_count: u64,
}

impl ItemAssembler {
    /// Create an assembler with no open item
    pub fn new(convention: NamingConvention, max_item_bytes: u64) -> Self {
        Self {
            convention,
            max_item_bytes,
            current: None,
            item_count: 0,
        }
    }

    /// Bind one candidate to an item
    ///
    /// A filename that does not parse is returned as an error and leaves the
    /// assembler untouched, so the caller can skip it and move on.
    pub fn assign(&mut self, candidate: &Candidate) -> Result<UploadTask, FilenameError> {
        let parsed = filename::parse(&candidate.filename, self.convention)?;

        let mut item = match self.current.take() {
            Some(item) if item.size.saturating_add(candidate.size) <= self.max_item_bytes => item,
            closed => {
                if let Some(closed) = closed {
                    info!(
                        item = %closed.name,
                        bytes = closed.size,
                        files = closed.files,
                        "Item size limit reached, starting new item"
                    );
                }
                self.item_count += 1;
                Item::open(parsed.item_name())
            }
        };

        item.size += candidate.size;
        item.files += 1;

        let task = UploadTask {
            filename: candidate.filename.clone(),
            item: item.name.clone(),
            size: candidate.size,
        };
        self.current = Some(item);

        Ok(task)
    }

    /// Assign a whole listing, keeping per-file failures separate
    pub fn assemble<'a, I>(&mut self, candidates: I) -> Assembly
    where
        I: IntoIterator<Item = &'a Candidate>,
    {
        let mut assembly = Assembly::default();
        for candidate in candidates {
            match self.assign(candidate) {
                Ok(task) => assembly.tasks.push(task),
                Err(e) => assembly.rejected.push((candidate.filename.clone(), e)),
            }
        }
        assembly
    }

    /// The item currently accepting files, if any
    pub fn current(&self) -> Option<&Item> {
        self.current.as_ref()
    }

    /// Number of items opened since start
    pub fn item_count(&self) -> u64 {
        self.item_count
    }

    /// Byte budget per item
    pub fn max_item_bytes(&self) -> u64 {
        self.max_item_bytes
    }
}

/// Outcome of assembling one listing
#[derive(Debug, Default)]
pub struct Assembly {
    /// Tasks in listing order
    pub tasks: Vec<UploadTask>,
    /// Files skipped for this scan
    pub rejected: Vec<(String, FilenameError)>,
}
