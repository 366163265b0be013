use std::sync::Arc;

use async_trait::async_trait;
use reqwest::Method;
use serde_json::Value;

use crate::models::user::{ProfileRow, UpdateUserRequest};
use crate::services::supabase::Supabase;

/// Capability over the user-profile relation.
#[async_trait]
pub trait ProfileStore: Send + Sync {
    async fn insert(&self, row: &ProfileRow) -> anyhow::Result<()>;

    /// Raw rows, newest first. Normalization happens in the caller; the
    /// store does not interpret row shapes.
    async fn list(&self) -> anyhow::Result<Vec<Value>>;

    async fn fetch(&self, id: &str) -> anyhow::Result<Option<Value>>;

    async fn update(&self, id: &str, changes: &UpdateUserRequest) -> anyhow::Result<()>;

    async fn delete(&self, id: &str) -> anyhow::Result<()>;
}

/// PostgREST client scoped to one table.
pub struct RestTable {
    supabase: Arc<Supabase>,
    table: String,
}

impl RestTable {
    pub fn new(supabase: Arc<Supabase>, table: &str) -> Self {
        Self {
            supabase,
            table: table.to_string(),
        }
    }

    fn path(&self, suffix: &str) -> String {
        format!("rest/v1/{}{suffix}", self.table)
    }
}

#[async_trait]
impl ProfileStore for RestTable {
    async fn insert(&self, row: &ProfileRow) -> anyhow::Result<()> {
        let response = self
            .supabase
            .request(Method::POST, &self.path(""))
            .header("Prefer", "return=minimal")
            .json(row)
            .send()
            .await?;

        if !response.status().is_success() {
            anyhow::bail!("{}", Supabase::error_message(response).await);
        }
        Ok(())
    }

    async fn list(&self) -> anyhow::Result<Vec<Value>> {
        let response = self
            .supabase
            .request(Method::GET, &self.path("?select=*&order=created_at.desc"))
            .send()
            .await?;

        if !response.status().is_success() {
            anyhow::bail!("{}", Supabase::error_message(response).await);
        }
        Ok(response.json().await?)
    }

    async fn fetch(&self, id: &str) -> anyhow::Result<Option<Value>> {
        let response = self
            .supabase
            .request(Method::GET, &self.path(&format!("?select=*&id=eq.{id}&limit=1")))
            .send()
            .await?;

        if !response.status().is_success() {
            anyhow::bail!("{}", Supabase::error_message(response).await);
        }
        let rows: Vec<Value> = response.json().await?;
        Ok(rows.into_iter().next())
    }

    async fn update(&self, id: &str, changes: &UpdateUserRequest) -> anyhow::Result<()> {
        let response = self
            .supabase
            .request(Method::PATCH, &self.path(&format!("?id=eq.{id}")))
            .header("Prefer", "return=minimal")
            .json(changes)
            .send()
            .await?;

        if !response.status().is_success() {
            anyhow::bail!("{}", Supabase::error_message(response).await);
        }
        Ok(())
    }

    async fn delete(&self, id: &str) -> anyhow::Result<()> {
        let response = self
            .supabase
            .request(Method::DELETE, &self.path(&format!("?id=eq.{id}")))
            .send()
            .await?;

        if !response.status().is_success() {
            anyhow::bail!("{}", Supabase::error_message(response).await);
        }
        Ok(())
    }
}
