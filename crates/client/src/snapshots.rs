//! Snapshot creation and finalization.

use std::sync::Arc;

use crate::error::ClientError;
use crate::resource::Resource;
use crate::transport::Transport;
use crate::wire::{
    Document, RelationshipList, Relationships, ResponseDocument, SnapshotAttributes, SnapshotData,
};

/// Per-snapshot rendering options.
#[derive(Debug, Clone, Default)]
pub struct SnapshotOptions {
    /// Display name; the server derives one from the root URL if unset.
    pub name: Option<String>,
    /// Render widths; `None` leaves the choice to the server.
    pub widths: Option<Vec<u32>>,
    pub enable_javascript: bool,
    pub minimum_height: Option<u32>,
}

/// A created snapshot.
#[derive(Debug, Clone)]
pub struct Snapshot {
    pub id: String,
    /// Content hashes the server wants uploaded for this snapshot.
    pub missing_resources: Vec<String>,
}

/// Creates and finalizes snapshots within a build.
pub struct SnapshotService {
    transport: Arc<Transport>,
}

impl SnapshotService {
    pub fn new(transport: Arc<Transport>) -> Self {
        Self { transport }
    }

    /// Registers a snapshot of `resources` (at least the root page)
    /// under `build_id`.
    ///
    /// An empty resource list is rejected before any network traffic: a
    /// snapshot with nothing to render is always a caller bug.
    pub async fn create_snapshot(
        &self,
        build_id: &str,
        resources: &[Resource],
        options: &SnapshotOptions,
    ) -> Result<Snapshot, ClientError> {
        if resources.is_empty() {
            return Err(ClientError::InvalidRequest(
                "a snapshot requires at least one resource".into(),
            ));
        }

        let document = Document {
            data: SnapshotData {
                kind: "snapshots",
                attributes: SnapshotAttributes {
                    name: options.name.clone(),
                    // False reads as "unset" server-side, like absent.
                    enable_javascript: options.enable_javascript.then_some(true),
                    minimum_height: options.minimum_height,
                    widths: options.widths.clone(),
                },
                relationships: Relationships {
                    resources: RelationshipList {
                        data: resources.iter().map(Resource::to_wire).collect(),
                    },
                },
            },
        };

        let response = self
            .transport
            .post(
                &format!("/builds/{build_id}/snapshots/"),
                &serde_json::to_value(&document)?,
            )
            .await?;
        let parsed: ResponseDocument = serde_json::from_value(response)?;

        Ok(Snapshot {
            id: parsed.data.id.clone(),
            missing_resources: parsed.data.missing_shas(),
        })
    }

    /// Marks the snapshot's resources complete.
    pub async fn finalize_snapshot(&self, snapshot_id: &str) -> Result<(), ClientError> {
        self.transport
            .post(
                &format!("/snapshots/{snapshot_id}/finalize"),
                &serde_json::json!({}),
            )
            .await?;
        Ok(())
    }
}
