//! Resource content upload.

use std::sync::Arc;

use tracing::warn;

use crate::error::{ClientError, HttpErrorKind};
use crate::hash::checksum_bytes;
use crate::transport::Transport;
use crate::wire::{Document, UploadAttributes, UploadData};

/// Uploads raw resource bytes keyed by their content hash.
pub struct ResourceUploader {
    transport: Arc<Transport>,
}

impl ResourceUploader {
    pub fn new(transport: Arc<Transport>) -> Self {
        Self { transport }
    }

    /// Uploads `content` to the build's resource store.
    ///
    /// The hash is recomputed here so the stored key always matches the
    /// uploaded bytes. A 409 means another shard won the race for the
    /// same hash; the content is already stored, so that is a success.
    pub async fn upload_resource(
        &self,
        build_id: &str,
        content: &[u8],
    ) -> Result<(), ClientError> {
        let sha = checksum_bytes(content);
        let document = Document {
            data: UploadData {
                kind: "resources",
                id: sha.clone(),
                attributes: UploadAttributes {
                    base64_content: content.to_vec(),
                },
            },
        };

        let result = self
            .transport
            .post(
                &format!("/builds/{build_id}/resources/"),
                &serde_json::to_value(&document)?,
            )
            .await;

        match result {
            Ok(_) => Ok(()),
            Err(ClientError::Api {
                kind: HttpErrorKind::Conflict,
                ..
            }) => {
                warn!(%sha, "resource already exists, skipping upload");
                Ok(())
            }
            Err(err) => Err(err),
        }
    }
}
