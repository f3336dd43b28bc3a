//! Upload scheduling and the archive client
//!
//! - `registry`: files currently in flight, plus those already uploaded
//! - `dispatcher`: bounded pool of upload tasks
//! - `store`: object store traits and the dry-run store
//! - `ias3`: Internet Archive S3 client

pub mod dispatcher;
pub mod ias3;
pub mod registry;
pub mod store;

pub use dispatcher::{Dispatch, DispatchSnapshot, UploadDispatcher};
pub use ias3::IaS3Client;
pub use registry::InFlightRegistry;
pub use store::{DryRunStore, ObjectStoreClient, UploadReceipt, UploadSession};
