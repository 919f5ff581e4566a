//! Build creation and finalization.

use std::sync::Arc;

use tracing::debug;

use crate::environment::BuildEnvironment;
use crate::error::ClientError;
use crate::resource::Resource;
use crate::transport::Transport;
use crate::wire::{
    BuildAttributes, BuildData, Document, RelationshipList, Relationships, ResponseDocument,
};

/// A created build, as the server sees it.
#[derive(Debug, Clone)]
pub struct Build {
    pub id: String,
    /// Browser URL where the comparisons will appear.
    pub web_url: Option<String>,
    /// Content hashes the server wants uploaded at build level.
    pub missing_resources: Vec<String>,
}

/// Creates and finalizes builds over a shared transport.
pub struct BuildService {
    transport: Arc<Transport>,
}

impl BuildService {
    pub fn new(transport: Arc<Transport>) -> Self {
        Self { transport }
    }

    /// Registers a new build from the resolved environment metadata.
    ///
    /// When `resources` is given the build-level resource list rides
    /// along, and the response already names the missing hashes.
    pub async fn create_build(
        &self,
        environment: &BuildEnvironment,
        resources: Option<&[Resource]>,
    ) -> Result<Build, ClientError> {
        // Shard metadata only makes sense for a parallel run: a nonce to
        // group the shards and a count above one (or -1 when the total
        // is not known upfront).
        let shards = environment.parallel_total_shards;
        let in_parallel_environment = environment.parallel_nonce.is_some()
            && matches!(shards, Some(n) if n > 1 || n == -1);
        let (parallel_nonce, parallel_total_shards) = if in_parallel_environment {
            (environment.parallel_nonce.clone(), shards)
        } else {
            (None, None)
        };

        let attributes = BuildAttributes {
            branch: environment.branch.clone(),
            target_branch: environment.target_branch.clone(),
            target_commit_sha: environment.target_commit_sha.clone(),
            commit_sha: environment.commit.sha.clone(),
            commit_committed_at: environment.commit.committed_at.clone(),
            commit_author_name: environment.commit.author_name.clone(),
            commit_author_email: environment.commit.author_email.clone(),
            commit_committer_name: environment.commit.committer_name.clone(),
            commit_committer_email: environment.commit.committer_email.clone(),
            commit_message: environment.commit.message.clone(),
            pull_request_number: environment.pull_request_number.clone(),
            parallel_nonce: parallel_nonce.clone(),
            parallel_total_shards,
        };

        let relationships = resources.map(|resources| Relationships {
            resources: RelationshipList {
                data: resources.iter().map(Resource::to_wire).collect(),
            },
        });

        let document = Document {
            data: BuildData {
                kind: "builds",
                attributes,
                relationships,
            },
        };

        let response = self
            .transport
            .post("/builds/", &serde_json::to_value(&document)?)
            .await?;
        let parsed: ResponseDocument = serde_json::from_value(response)?;

        debug!(build_id = %parsed.data.id, "build created");
        match parallel_total_shards {
            Some(total) => debug!(
                total,
                nonce = parallel_nonce.as_deref().unwrap_or(""),
                "parallel test environment detected"
            ),
            None => debug!("parallel test environment: not detected"),
        }

        Ok(Build {
            id: parsed.data.id.clone(),
            web_url: parsed.data.attributes.web_url.clone(),
            missing_resources: parsed.data.missing_shas(),
        })
    }

    /// Marks the build complete so the server starts rendering.
    pub async fn finalize_build(&self, build_id: &str) -> Result<(), ClientError> {
        self.transport
            .post(&format!("/builds/{build_id}/finalize"), &serde_json::json!({}))
            .await?;
        Ok(())
    }
}
