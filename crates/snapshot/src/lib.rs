//! Site scanning and snapshot pipeline for the Snapgate visual review
//! service.
//!
//! The pipeline, end to end:
//! 1. Scan a directory of rendered pages and static assets.
//! 2. Create a build, sending the asset list along.
//! 3. Upload only the bytes the server has not seen before.
//! 4. Snapshot every page concurrently, draining each snapshot's own
//!    missing list the same way.
//! 5. Finalize the build, unless a snapshot branch failed.
//!
//! [`SnapshotRunner`] drives the whole pipeline; the lower layers are
//! exported for callers that want to compose them differently.

pub mod classifier;
pub mod error;
pub mod runner;
pub mod types;
pub mod uploader;

pub use classifier::{Inventory, classify};
pub use error::RunnerError;
pub use runner::SnapshotRunner;
pub use types::{DEFAULT_WORKERS, MAX_WORKERS, ProgressEvent, RunReport, SnapshotConfig};
pub use uploader::{UploadCoordinator, UploadResources};
