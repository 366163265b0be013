//! Call-recording fakes for the three backend capabilities, shared by the
//! service and route tests.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use bytes::Bytes;
use serde_json::Value;

use crate::models::user::{ProfileRow, UpdateUserRequest};
use crate::services::identity::{Identity, IdentityProvider};
use crate::services::profiles::ProfileStore;
use crate::services::storage::AvatarStore;

/// Deterministic UUID-shaped id for the nth created identity.
pub fn fake_id(n: usize) -> String {
    uuid::Uuid::from_u128(n as u128).to_string()
}

#[derive(Default)]
pub struct FakeIdentities {
    pub fail_create: Option<String>,
    pub fail_delete: bool,
    pub reject_duplicates: bool,
    pub created: Mutex<Vec<String>>,
    pub passwords: Mutex<Vec<String>>,
    pub deleted: Mutex<Vec<String>>,
    pub counter: AtomicUsize,
}

#[async_trait]
impl IdentityProvider for FakeIdentities {
    async fn create_identity(
        &self,
        email: &str,
        password: &str,
        _role: &str,
    ) -> anyhow::Result<Identity> {
        if let Some(message) = &self.fail_create {
            anyhow::bail!("{message}");
        }
        if self.reject_duplicates && self.created.lock().unwrap().iter().any(|e| e == email) {
            anyhow::bail!("A user with this email address has already been registered");
        }
        let n = self.counter.fetch_add(1, Ordering::SeqCst);
        self.created.lock().unwrap().push(email.to_string());
        self.passwords.lock().unwrap().push(password.to_string());
        Ok(Identity {
            id: fake_id(n),
            email: email.to_string(),
        })
    }

    async fn delete_identity(&self, id: &str) -> anyhow::Result<()> {
        if self.fail_delete {
            anyhow::bail!("identity delete refused");
        }
        self.deleted.lock().unwrap().push(id.to_string());
        Ok(())
    }
}

#[derive(Default)]
pub struct FakeAvatars {
    pub fail_upload: bool,
    pub fail_remove: bool,
    /// (path, content_type) per upload call.
    pub uploads: Mutex<Vec<(String, String)>>,
    pub removed: Mutex<Vec<String>>,
}

#[async_trait]
impl AvatarStore for FakeAvatars {
    async fn upload(&self, path: &str, _bytes: Bytes, content_type: &str) -> anyhow::Result<()> {
        if self.fail_upload {
            anyhow::bail!("storage unavailable");
        }
        self.uploads
            .lock()
            .unwrap()
            .push((path.to_string(), content_type.to_string()));
        Ok(())
    }

    fn public_url(&self, path: &str) -> String {
        format!("https://cdn.test/{path}")
    }

    async fn remove(&self, path: &str) -> anyhow::Result<()> {
        if self.fail_remove {
            anyhow::bail!("storage unavailable");
        }
        self.removed.lock().unwrap().push(path.to_string());
        Ok(())
    }
}

#[derive(Default)]
pub struct FakeProfiles {
    pub fail_insert: Option<String>,
    pub rows: Mutex<Vec<ProfileRow>>,
}

#[async_trait]
impl ProfileStore for FakeProfiles {
    async fn insert(&self, row: &ProfileRow) -> anyhow::Result<()> {
        if let Some(message) = &self.fail_insert {
            anyhow::bail!("{message}");
        }
        self.rows.lock().unwrap().push(row.clone());
        Ok(())
    }

    async fn list(&self) -> anyhow::Result<Vec<Value>> {
        Ok(self
            .rows
            .lock()
            .unwrap()
            .iter()
            .map(|r| serde_json::to_value(r).unwrap())
            .collect())
    }

    async fn fetch(&self, id: &str) -> anyhow::Result<Option<Value>> {
        Ok(self
            .rows
            .lock()
            .unwrap()
            .iter()
            .find(|r| r.id == id)
            .map(|r| serde_json::to_value(r).unwrap()))
    }

    async fn update(&self, id: &str, changes: &UpdateUserRequest) -> anyhow::Result<()> {
        let mut rows = self.rows.lock().unwrap();
        if let Some(row) = rows.iter_mut().find(|r| r.id == id) {
            if let Some(full_name) = &changes.full_name {
                row.full_name = full_name.clone();
            }
            if let Some(role) = &changes.role {
                row.role = role.clone();
            }
            if let Some(avatar_url) = &changes.avatar_url {
                row.avatar_url = Some(avatar_url.clone());
            }
        }
        Ok(())
    }

    async fn delete(&self, id: &str) -> anyhow::Result<()> {
        self.rows.lock().unwrap().retain(|r| r.id != id);
        Ok(())
    }
}
