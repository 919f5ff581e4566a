//! Scans a site directory and sorts files into pages to snapshot and
//! static assets to upload alongside them.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use percent_encoding::{AsciiSet, CONTROLS, utf8_percent_encode};
use regex::Regex;
use snapgate_client::{Resource, file_checksum};
use tracing::{debug, warn};

use crate::error::RunnerError;
use crate::types::SnapshotConfig;

/// File extensions treated as uploadable static assets.
const STATIC_RESOURCE_EXTENSIONS: &[&str] = &[
    "css", "js", "jpg", "jpeg", "gif", "ico", "png", "bmp", "pict", "tif",
    "tiff", "ttf", "eot", "woff", "otf", "svg", "svgz", "webp", "ps",
];

/// Files at or above this size are never uploaded.
const MAX_FILE_SIZE_BYTES: u64 = 15 * 1024 * 1024;

const DEFAULT_SNAPSHOTS_REGEX: &str = r"\.(html|htm)$";

/// Characters escaped when a file path becomes a resource URL.
/// Slashes stay literal so the path keeps its shape.
const URL_PATH_ENCODE: &AsciiSet = &CONTROLS
    .add(b' ')
    .add(b'"')
    .add(b'#')
    .add(b'%')
    .add(b'<')
    .add(b'>')
    .add(b'?')
    .add(b'[')
    .add(b']')
    .add(b'\\')
    .add(b'^')
    .add(b'`')
    .add(b'{')
    .add(b'|')
    .add(b'}');

/// Everything a scan found. Root resources are the pages that get their
/// own snapshots, build resources are uploaded once for the whole build.
#[derive(Debug, Default)]
pub struct Inventory {
    pub root_resources: Vec<Resource>,
    pub build_resources: Vec<Resource>,
}

/// Walks `root_dir` and classifies every file it can reach.
///
/// Pages are files matching the snapshot pattern and not the ignore
/// pattern. Assets are files with a known static extension, or every
/// file when `include_all` is set. The ignore pattern never applies to
/// assets. A file can be both, in which case it appears in both lists.
pub fn classify(root_dir: &Path, config: &SnapshotConfig) -> Result<Inventory, RunnerError> {
    if !config.baseurl.starts_with('/') {
        return Err(RunnerError::InvalidBaseUrl(config.baseurl.clone()));
    }
    let snapshots_regex = Regex::new(
        config
            .snapshots_regex
            .as_deref()
            .unwrap_or(DEFAULT_SNAPSHOTS_REGEX),
    )?;
    let ignore_regex = config.ignore_regex.as_deref().and_then(|pattern| {
        match Regex::new(pattern) {
            Ok(regex) => Some(regex),
            Err(error) => {
                warn!(pattern, %error, "invalid ignore pattern, nothing will be ignored");
                None
            }
        }
    });

    let root_dir = std::fs::canonicalize(root_dir)?;
    let strip_prefix = match &config.strip_prefix {
        Some(prefix) => std::fs::canonicalize(prefix)?,
        None => root_dir.clone(),
    };

    let mut files = Vec::new();
    let mut visited = HashSet::new();
    collect_files(&root_dir, &mut visited, &mut files)?;

    let mut inventory = Inventory::default();
    for path in files {
        let absolute = path.to_string_lossy();
        let is_root = snapshots_regex.is_match(&absolute)
            && !ignore_regex
                .as_ref()
                .is_some_and(|regex| regex.is_match(&absolute));
        let is_asset = config.include_all || has_static_extension(&path);
        if !is_root && !is_asset {
            continue;
        }

        let size = std::fs::metadata(&path)?.len();
        if size >= MAX_FILE_SIZE_BYTES {
            debug!(path = %path.display(), size, "skipping file above the upload size limit");
            continue;
        }

        let sha = file_checksum(&path)?;
        let resource_url = resource_url(&config.baseurl, &path, &strip_prefix, &root_dir);
        debug!(%resource_url, "discovered resource");
        if is_root {
            inventory.root_resources.push(
                Resource::from_file(sha.clone(), resource_url.clone(), path.clone()).as_root(),
            );
        }
        if is_asset {
            inventory
                .build_resources
                .push(Resource::from_file(sha, resource_url, path));
        }
    }
    Ok(inventory)
}

/// Depth-first walk following symlinks, entries sorted by name so runs
/// are deterministic. Directories named `.git` are not entered.
fn collect_files(
    dir: &Path,
    visited: &mut HashSet<PathBuf>,
    files: &mut Vec<PathBuf>,
) -> Result<(), std::io::Error> {
    let canonical = std::fs::canonicalize(dir)?;
    // Symlinked directories can form cycles, visit each real one once.
    if !visited.insert(canonical) {
        return Ok(());
    }

    let mut entries = std::fs::read_dir(dir)?.collect::<Result<Vec<_>, _>>()?;
    entries.sort_by_key(|entry| entry.file_name());
    for entry in entries {
        let path = entry.path();
        let metadata = match std::fs::metadata(&path) {
            Ok(metadata) => metadata,
            Err(error) => {
                // Dangling symlinks have no target to stat, skip them.
                if path
                    .symlink_metadata()
                    .is_ok_and(|meta| meta.file_type().is_symlink())
                {
                    debug!(path = %path.display(), "skipping dangling symlink");
                    continue;
                }
                return Err(error);
            }
        };
        if metadata.is_dir() {
            if entry.file_name() == ".git" {
                continue;
            }
            collect_files(&path, visited, files)?;
        } else if metadata.is_file() {
            files.push(path);
        }
    }
    Ok(())
}

fn has_static_extension(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| {
            let ext = ext.to_ascii_lowercase();
            STATIC_RESOURCE_EXTENSIONS.iter().any(|known| *known == ext)
        })
}

/// Strips the configured prefix from the file path, joins the remainder
/// onto the base URL and percent-encodes the result in one pass.
fn resource_url(baseurl: &str, path: &Path, strip_prefix: &Path, root_dir: &Path) -> String {
    let relative = path
        .strip_prefix(strip_prefix)
        .or_else(|_| path.strip_prefix(root_dir))
        .unwrap_or(path);
    let mut joined = String::from(baseurl.trim_end_matches('/'));
    joined.push('/');
    joined.push_str(&relative.to_string_lossy().replace('\\', "/"));
    utf8_percent_encode(&joined, URL_PATH_ENCODE).to_string()
}
