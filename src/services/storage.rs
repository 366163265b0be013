use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use reqwest::Method;

use crate::services::supabase::Supabase;

/// Capability to store and remove binary objects under a path, and to
/// derive their public URL.
#[async_trait]
pub trait AvatarStore: Send + Sync {
    async fn upload(&self, path: &str, bytes: Bytes, content_type: &str) -> anyhow::Result<()>;

    /// Pure URL construction; the platform serves public objects at a
    /// well-known prefix, so no round trip is needed.
    fn public_url(&self, path: &str) -> String;

    async fn remove(&self, path: &str) -> anyhow::Result<()>;
}

/// Storage API client scoped to one bucket.
pub struct BucketStore {
    supabase: Arc<Supabase>,
    bucket: String,
}

impl BucketStore {
    pub fn new(supabase: Arc<Supabase>, bucket: &str) -> Self {
        Self {
            supabase,
            bucket: bucket.to_string(),
        }
    }
}

#[async_trait]
impl AvatarStore for BucketStore {
    async fn upload(&self, path: &str, bytes: Bytes, content_type: &str) -> anyhow::Result<()> {
        let response = self
            .supabase
            .request(
                Method::POST,
                &format!("storage/v1/object/{}/{path}", self.bucket),
            )
            .header("Content-Type", content_type)
            // Overwrite on re-provision attempts against a leftover object.
            .header("x-upsert", "true")
            .body(bytes)
            .send()
            .await?;

        if !response.status().is_success() {
            anyhow::bail!("{}", Supabase::error_message(response).await);
        }
        Ok(())
    }

    fn public_url(&self, path: &str) -> String {
        format!(
            "{}/storage/v1/object/public/{}/{path}",
            self.supabase.base_url(),
            self.bucket
        )
    }

    async fn remove(&self, path: &str) -> anyhow::Result<()> {
        let response = self
            .supabase
            .request(
                Method::DELETE,
                &format!("storage/v1/object/{}/{path}", self.bucket),
            )
            .send()
            .await?;

        if !response.status().is_success() {
            anyhow::bail!("{}", Supabase::error_message(response).await);
        }
        Ok(())
    }
}
