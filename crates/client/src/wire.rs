//! JSON:API document shapes for the Snapgate API.
//!
//! Attribute keys are kebab-case on the wire. Request attributes are
//! always serialized in full, with `null` for absent values, because the
//! server distinguishes "field sent as null" from malformed documents.

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Request documents
// ---------------------------------------------------------------------------

/// Envelope wrapping every request document.
#[derive(Debug, Clone, Serialize)]
pub struct Document<T> {
    pub data: T,
}

/// `type: "builds"` request payload.
#[derive(Debug, Clone, Serialize)]
pub struct BuildData {
    #[serde(rename = "type")]
    pub kind: &'static str,
    pub attributes: BuildAttributes,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub relationships: Option<Relationships>,
}

#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "kebab-case")]
pub struct BuildAttributes {
    pub branch: Option<String>,
    pub target_branch: Option<String>,
    pub target_commit_sha: Option<String>,
    pub commit_sha: Option<String>,
    pub commit_committed_at: Option<String>,
    pub commit_author_name: Option<String>,
    pub commit_author_email: Option<String>,
    pub commit_committer_name: Option<String>,
    pub commit_committer_email: Option<String>,
    pub commit_message: Option<String>,
    pub pull_request_number: Option<String>,
    pub parallel_nonce: Option<String>,
    pub parallel_total_shards: Option<i64>,
}

/// `type: "snapshots"` request payload.
#[derive(Debug, Clone, Serialize)]
pub struct SnapshotData {
    #[serde(rename = "type")]
    pub kind: &'static str,
    pub attributes: SnapshotAttributes,
    pub relationships: Relationships,
}

#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "kebab-case")]
pub struct SnapshotAttributes {
    pub name: Option<String>,
    pub enable_javascript: Option<bool>,
    pub minimum_height: Option<u32>,
    pub widths: Option<Vec<u32>>,
}

/// `type: "resources"` entry, used both in relationship lists and as the
/// body of an upload.
#[derive(Debug, Clone, Serialize)]
pub struct ResourceData {
    #[serde(rename = "type")]
    pub kind: &'static str,
    /// Content hash; the server's dedup key.
    pub id: String,
    pub attributes: ResourceAttributes,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "kebab-case")]
pub struct ResourceAttributes {
    pub resource_url: String,
    pub mimetype: Option<String>,
    pub is_root: bool,
}

/// Upload payload: the raw bytes, base64-encoded on the wire.
#[derive(Debug, Clone, Serialize)]
pub struct UploadData {
    #[serde(rename = "type")]
    pub kind: &'static str,
    pub id: String,
    pub attributes: UploadAttributes,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "kebab-case")]
pub struct UploadAttributes {
    #[serde(with = "base64_bytes")]
    pub base64_content: Vec<u8>,
}

/// Relationships block carrying a list of resources.
#[derive(Debug, Clone, Serialize)]
pub struct Relationships {
    pub resources: RelationshipList,
}

#[derive(Debug, Clone, Serialize)]
pub struct RelationshipList {
    pub data: Vec<ResourceData>,
}

// ---------------------------------------------------------------------------
// Response documents
// ---------------------------------------------------------------------------

/// Envelope for create-build and create-snapshot responses.
#[derive(Debug, Clone, Deserialize)]
pub struct ResponseDocument {
    pub data: ResponseData,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ResponseData {
    pub id: String,
    #[serde(default)]
    pub attributes: ResponseAttributes,
    #[serde(default)]
    pub relationships: ResponseRelationships,
}

impl ResponseData {
    /// Content hashes the server reported as missing.
    pub fn missing_shas(&self) -> Vec<String> {
        self.relationships
            .missing_resources
            .data
            .iter()
            .map(|identifier| identifier.id.clone())
            .collect()
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct ResponseAttributes {
    #[serde(default)]
    pub web_url: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct ResponseRelationships {
    #[serde(default)]
    pub missing_resources: IdentifierList,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct IdentifierList {
    #[serde(default)]
    pub data: Vec<Identifier>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Identifier {
    pub id: String,
}

/// Serde module encoding `Vec<u8>` as standard base64 on the wire.
mod base64_bytes {
    use base64::{Engine, engine::general_purpose::STANDARD};
    use serde::{Serialize, Serializer};

    pub fn serialize<S: Serializer>(data: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        STANDARD.encode(data).serialize(serializer)
    }
}
