use std::sync::Arc;

use async_trait::async_trait;
use reqwest::Method;
use serde_json::{json, Value};

use crate::services::supabase::Supabase;

/// An authentication-service account record.
#[derive(Debug, Clone)]
pub struct Identity {
    /// Assigned by the provider; opaque to this server.
    pub id: String,
    pub email: String,
}

/// Capability to create and delete auth identities. The provisioning
/// service only ever sees this trait, so tests substitute recorders.
#[async_trait]
pub trait IdentityProvider: Send + Sync {
    /// Create an identity with the email pre-confirmed and the role stored
    /// as user metadata.
    async fn create_identity(
        &self,
        email: &str,
        password: &str,
        role: &str,
    ) -> anyhow::Result<Identity>;

    async fn delete_identity(&self, id: &str) -> anyhow::Result<()>;
}

/// GoTrue admin API client.
pub struct GoTrueAdmin {
    supabase: Arc<Supabase>,
}

impl GoTrueAdmin {
    pub fn new(supabase: Arc<Supabase>) -> Self {
        Self { supabase }
    }
}

#[async_trait]
impl IdentityProvider for GoTrueAdmin {
    async fn create_identity(
        &self,
        email: &str,
        password: &str,
        role: &str,
    ) -> anyhow::Result<Identity> {
        let response = self
            .supabase
            .request(Method::POST, "auth/v1/admin/users")
            .json(&json!({
                "email": email,
                "password": password,
                "email_confirm": true,
                "user_metadata": { "role": role },
            }))
            .send()
            .await?;

        if !response.status().is_success() {
            anyhow::bail!("{}", Supabase::error_message(response).await);
        }

        let body: Value = response.json().await?;
        // Older GoTrue versions nest the record under "user".
        let id = body
            .get("id")
            .or_else(|| body.pointer("/user/id"))
            .and_then(Value::as_str)
            .ok_or_else(|| anyhow::anyhow!("identity provider returned no user id"))?;

        Ok(Identity {
            id: id.to_string(),
            email: email.to_string(),
        })
    }

    async fn delete_identity(&self, id: &str) -> anyhow::Result<()> {
        let response = self
            .supabase
            .request(Method::DELETE, &format!("auth/v1/admin/users/{id}"))
            .send()
            .await?;

        if !response.status().is_success() {
            anyhow::bail!("{}", Supabase::error_message(response).await);
        }
        Ok(())
    }
}
