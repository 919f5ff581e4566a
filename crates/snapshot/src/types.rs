use std::path::PathBuf;

/// Upper bound on concurrent workers, matching the server's fair-use limit.
pub const MAX_WORKERS: usize = 10;

/// Default number of concurrent workers for snapshots and uploads.
pub const DEFAULT_WORKERS: usize = 10;

/// Options controlling how a site directory is scanned and snapshotted.
#[derive(Debug, Clone)]
pub struct SnapshotConfig {
    /// URL prefix the site is served under. Must start with a slash.
    pub baseurl: String,
    /// Local path prefix to strip when deriving resource URLs.
    /// Defaults to the scanned root directory.
    pub strip_prefix: Option<PathBuf>,
    /// Pattern selecting which files are snapshotted as pages.
    /// Defaults to names ending in `.html` or `.htm`.
    pub snapshots_regex: Option<String>,
    /// Pattern excluding matching pages from the snapshot list.
    pub ignore_regex: Option<String>,
    /// Rendering widths requested for every snapshot.
    pub widths: Option<Vec<u32>>,
    /// Stop after this many snapshots. Useful for smoke-testing large sites.
    pub snapshot_limit: Option<usize>,
    pub enable_javascript: bool,
    /// Treat every file as a build resource instead of only known
    /// static asset extensions.
    pub include_all: bool,
    /// Concurrent snapshot branches and uploads. Clamped to [`MAX_WORKERS`].
    pub workers: usize,
}

impl Default for SnapshotConfig {
    fn default() -> Self {
        Self {
            baseurl: "/".to_string(),
            strip_prefix: None,
            snapshots_regex: None,
            ignore_regex: None,
            widths: None,
            snapshot_limit: None,
            enable_javascript: false,
            include_all: false,
            workers: DEFAULT_WORKERS,
        }
    }
}

/// Progress notifications emitted while a run is in flight.
///
/// Events are advisory. They are delivered on a bounded channel and
/// dropped when no one is listening, so workers never block on them.
#[derive(Debug, Clone)]
pub enum ProgressEvent {
    BuildCreated {
        build_id: String,
        web_url: Option<String>,
    },
    ResourceUploaded {
        url: String,
        completed: usize,
        total: usize,
    },
    SnapshotStarted {
        url: String,
        index: usize,
        total: usize,
    },
    SnapshotFailed {
        url: String,
        error: String,
    },
    BuildFinalized {
        web_url: Option<String>,
    },
}

/// Outcome of a completed run.
#[derive(Debug, Clone)]
pub struct RunReport {
    pub build_id: String,
    pub web_url: Option<String>,
    pub total_snapshots: usize,
    /// True when at least one snapshot branch failed. The build is left
    /// unfinalized in that case.
    pub failed: bool,
}
