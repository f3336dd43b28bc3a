//! Item assembly
//!
//! Decodes WARC filenames and groups files into size-bounded items.

pub mod assembler;
pub mod filename;
pub mod metadata;

pub use assembler::{Assembly, Candidate, Item, ItemAssembler, UploadTask};
pub use filename::{NamingConvention, ParsedFilename};
pub use metadata::ItemMetadata;
