//! API client for the Snapgate visual review service.
//!
//! This crate owns everything that talks to the server: the retrying
//! HTTP [`Transport`], the typed build/snapshot/resource services on top
//! of it, and the environment detection that fills a build's commit and
//! CI metadata. It knows nothing about directories or pipelines — the
//! `snapgate-snapshot` crate composes these pieces into a run.
//!
//! Uploads are content-addressed: every payload is identified by its
//! SHA-256 digest and only hashes the server reports missing are sent.

pub mod builds;
pub mod config;
pub mod env;
pub mod environment;
pub mod error;
pub mod hash;
pub mod resource;
pub mod resources;
pub mod snapshots;
pub mod transport;
pub mod wire;

// Re-export primary types for convenience.
pub use builds::{Build, BuildService};
pub use config::Config;
pub use env::{EnvReader, ProcessEnv};
pub use environment::{BuildEnvironment, CiService, CommitInfo, GitCli, GitProbe};
pub use error::{ClientError, HttpErrorKind};
pub use hash::{checksum_bytes, file_checksum};
pub use resource::Resource;
pub use resources::ResourceUploader;
pub use snapshots::{Snapshot, SnapshotOptions, SnapshotService};
pub use transport::{RetryPolicy, Transport, user_agent};
