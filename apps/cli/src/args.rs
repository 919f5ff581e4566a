//! Command-line interface definitions.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Snapgate visual review CLI
#[derive(Parser, Debug, Clone)]
#[command(name = "snapgate", version, about, long_about = None, arg_required_else_help = true)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

/// Available subcommands
#[derive(Subcommand, Debug, Clone)]
pub enum Commands {
    /// Snapshot a directory of rendered pages and upload it for review
    Snapshot {
        /// Directory containing the static site
        #[arg(value_hint = clap::ValueHint::DirPath)]
        root_dir: PathBuf,

        /// URL prefix the site is served under (must start with a slash)
        #[arg(long, default_value = "/")]
        baseurl: String,

        /// Local path prefix to strip when deriving resource URLs
        #[arg(long = "strip_prefix", value_hint = clap::ValueHint::DirPath)]
        strip_prefix: Option<PathBuf>,

        /// Pattern selecting which files are snapshotted as pages
        #[arg(long = "snapshots_regex")]
        snapshots_regex: Option<String>,

        /// Pattern excluding matching pages from the snapshot list
        #[arg(long = "ignore_regex")]
        ignore_regex: Option<String>,

        /// Comma-separated render widths in pixels
        #[arg(long, value_delimiter = ',')]
        widths: Vec<u32>,

        /// Stop after this many snapshots
        #[arg(long = "snapshot_limit")]
        snapshot_limit: Option<usize>,

        /// Render pages with JavaScript enabled
        #[arg(long = "enable_javascript")]
        enable_javascript: bool,

        /// Upload every file as a resource, not only known static assets
        #[arg(long = "include_all")]
        include_all: bool,

        /// Concurrent snapshot and upload workers, capped at 10
        #[arg(long)]
        threads: Option<usize>,
    },
}
