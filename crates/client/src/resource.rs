//! Content-addressed resource descriptors.

use std::hash::{Hash, Hasher};
use std::path::PathBuf;

use crate::hash::checksum_bytes;
use crate::wire::{ResourceAttributes, ResourceData};

/// A single file the server may need: a page (root) or an asset.
///
/// Identity is the content hash plus the logical URL, so the same bytes
/// can appear at several URLs and the same URL can change bytes between
/// builds. The local source (`path` or `content`, never both) is only
/// read if the server reports the hash as missing.
#[derive(Debug, Clone)]
pub struct Resource {
    /// Hex SHA-256 of the full byte content.
    pub sha: String,
    /// Root-relative, percent-encoded URL the server will serve this at.
    pub resource_url: String,
    /// Whether this is a renderable page rather than a subresource.
    pub is_root: bool,
    pub mimetype: Option<String>,
    /// Local file to read on upload.
    pub path: Option<PathBuf>,
    /// In-memory bytes to upload.
    pub content: Option<Vec<u8>>,
}

impl Resource {
    /// Describes an on-disk file with a precomputed content hash.
    pub fn from_file(sha: String, resource_url: String, path: PathBuf) -> Self {
        Self {
            sha,
            resource_url,
            is_root: false,
            mimetype: None,
            path: Some(path),
            content: None,
        }
    }

    /// Describes in-memory content, hashing it on construction.
    pub fn from_content(resource_url: String, content: Vec<u8>) -> Self {
        Self {
            sha: checksum_bytes(&content),
            resource_url,
            is_root: false,
            mimetype: None,
            path: None,
            content: Some(content),
        }
    }

    /// Marks this resource as a renderable root page.
    pub fn as_root(mut self) -> Self {
        self.is_root = true;
        self
    }

    pub fn with_mimetype(mut self, mimetype: &str) -> Self {
        self.mimetype = Some(mimetype.to_string());
        self
    }

    /// Wire representation for relationship lists.
    pub fn to_wire(&self) -> ResourceData {
        ResourceData {
            kind: "resources",
            id: self.sha.clone(),
            attributes: ResourceAttributes {
                resource_url: self.resource_url.clone(),
                mimetype: self.mimetype.clone(),
                is_root: self.is_root,
            },
        }
    }
}

// Local source and root flag are delivery details, not identity.
impl PartialEq for Resource {
    fn eq(&self, other: &Self) -> bool {
        self.sha == other.sha
            && self.resource_url == other.resource_url
            && self.mimetype == other.mimetype
    }
}

impl Eq for Resource {}

impl Hash for Resource {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.sha.hash(state);
        self.resource_url.hash(state);
        self.mimetype.hash(state);
    }
}
