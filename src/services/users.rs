use std::sync::Arc;

use base64::prelude::{Engine, BASE64_STANDARD};
use bytes::Bytes;
use serde_json::Value;
use thiserror::Error;
use tracing::warn;

use crate::config::{AvatarFailurePolicy, Config};
use crate::models::user::{
    CreateUserRequest, NormalizedUser, ProfileRow, ProvisionedUser, UpdateUserRequest,
};
use crate::services::identity::{GoTrueAdmin, IdentityProvider};
use crate::services::profiles::{ProfileStore, RestTable};
use crate::services::storage::{AvatarStore, BucketStore};
use crate::services::supabase::Supabase;

/// Classified provisioning failures. Display strings are part of the API
/// contract; callers serialize them verbatim into `{"error": …}` bodies.
#[derive(Debug, Error)]
pub enum ProvisionError {
    #[error("Missing required fields: full_name, email, role")]
    MissingFields,
    #[error("Failed to create user: {0}")]
    IdentityCreation(String),
    // The cause is carried for logs/Debug only; the public message stays
    // fixed so storage details never leak to callers.
    #[error("Avatar upload failed")]
    AvatarUpload(String),
    #[error("Failed to insert user record: {0}")]
    ProfileInsert(String),
}

/// User lifecycle against the three backend services. Creation is the
/// interesting part: auth identity, optional avatar object and profile row
/// must end up either all present or all absent, and the services offer no
/// transaction spanning them, so later failures compensate by deleting
/// what earlier steps created. Compensation is best-effort and single
/// attempt; its own failures are logged and never mask the primary error.
pub struct UserService {
    identity: Arc<dyn IdentityProvider>,
    avatars: Arc<dyn AvatarStore>,
    profiles: Arc<dyn ProfileStore>,
    avatar_failure_policy: AvatarFailurePolicy,
}

impl UserService {
    pub fn new(
        identity: Arc<dyn IdentityProvider>,
        avatars: Arc<dyn AvatarStore>,
        profiles: Arc<dyn ProfileStore>,
        avatar_failure_policy: AvatarFailurePolicy,
    ) -> Self {
        Self {
            identity,
            avatars,
            profiles,
            avatar_failure_policy,
        }
    }

    /// Build the real Supabase-backed service, or None when the project
    /// URL / service key are not configured.
    pub fn from_config(config: &Config) -> Option<Self> {
        let (url, key) = match (&config.supabase_url, &config.service_role_key) {
            (Some(url), Some(key)) => (url, key),
            _ => return None,
        };
        let supabase = Arc::new(Supabase::new(url, key));
        Some(Self::new(
            Arc::new(GoTrueAdmin::new(supabase.clone())),
            Arc::new(BucketStore::new(supabase.clone(), &config.avatar_bucket)),
            Arc::new(RestTable::new(supabase, &config.users_table)),
            config.avatar_failure_policy,
        ))
    }

    /// Create identity → optional avatar → profile row, strictly in that
    /// order (each step consumes the identity id from the first). Any
    /// failure after identity creation deletes it again before returning.
    pub async fn provision(
        &self,
        request: CreateUserRequest,
    ) -> Result<ProvisionedUser, ProvisionError> {
        let (full_name, email, role) = match (
            non_empty(request.full_name.as_deref()),
            non_empty(request.email.as_deref()),
            non_empty(request.role.as_deref()),
        ) {
            (Some(f), Some(e), Some(r)) => (f, e, r),
            _ => return Err(ProvisionError::MissingFields),
        };

        let password = match non_empty(request.password.as_deref()) {
            Some(supplied) => supplied.to_string(),
            None => generate_temp_password(),
        };

        let identity = self
            .identity
            .create_identity(email, &password, role)
            .await
            .map_err(|e| ProvisionError::IdentityCreation(e.to_string()))?;

        let mut avatar_url = None;
        let mut avatar_path = None;
        if let Some(encoded) = non_empty(request.avatar_base64.as_deref()) {
            match self
                .store_avatar(&identity.id, encoded, request.avatar_name.as_deref())
                .await
            {
                Ok((path, url)) => {
                    avatar_path = Some(path);
                    avatar_url = Some(url);
                }
                Err(e) => match self.avatar_failure_policy {
                    AvatarFailurePolicy::Abort => {
                        warn!("avatar upload failed for {}: {e:#}", identity.id);
                        if let Err(rollback) = self.identity.delete_identity(&identity.id).await {
                            warn!(
                                "compensating identity delete failed for {}: {rollback:#}",
                                identity.id
                            );
                        }
                        return Err(ProvisionError::AvatarUpload(e.to_string()));
                    }
                    AvatarFailurePolicy::Continue => {
                        warn!(
                            "avatar upload failed for {}, continuing without avatar: {e:#}",
                            identity.id
                        );
                    }
                },
            }
        }

        let row = ProfileRow {
            id: identity.id.clone(),
            full_name: full_name.to_string(),
            email: email.to_string(),
            role: role.to_string(),
            phone: request.phone.clone(),
            avatar_url: avatar_url.clone(),
        };

        if let Err(e) = self.profiles.insert(&row).await {
            // Identity first, then blob. A failed identity delete must not
            // stop the blob cleanup.
            if let Err(rollback) = self.identity.delete_identity(&identity.id).await {
                warn!(
                    "compensating identity delete failed for {}: {rollback:#}",
                    identity.id
                );
            }
            if let Some(path) = &avatar_path {
                if let Err(rollback) = self.avatars.remove(path).await {
                    warn!("compensating avatar delete failed for {path}: {rollback:#}");
                }
            }
            return Err(ProvisionError::ProfileInsert(e.to_string()));
        }

        Ok(ProvisionedUser {
            id: identity.id,
            full_name: row.full_name,
            email: row.email,
            role: row.role,
            phone: row.phone,
            temp_password: password,
            avatar_url,
        })
    }

    async fn store_avatar(
        &self,
        identity_id: &str,
        encoded: &str,
        name_hint: Option<&str>,
    ) -> anyhow::Result<(String, String)> {
        let (bytes, declared) = decode_avatar(encoded)?;
        let extension = avatar_extension(declared.as_deref(), name_hint);
        let content_type = avatar_content_type(declared.as_deref(), name_hint);
        let path = format!("avatars/{identity_id}.{extension}");
        self.avatars.upload(&path, bytes, &content_type).await?;
        let url = self.avatars.public_url(&path);
        Ok((path, url))
    }

    pub async fn list(&self) -> anyhow::Result<Vec<NormalizedUser>> {
        let rows = self.profiles.list().await?;
        Ok(rows.iter().map(NormalizedUser::from_row).collect())
    }

    pub async fn fetch(&self, id: &str) -> anyhow::Result<Option<NormalizedUser>> {
        let row = self.profiles.fetch(id).await?;
        Ok(row.map(|r| NormalizedUser::from_row(&r)))
    }

    pub async fn update(&self, id: &str, changes: &UpdateUserRequest) -> anyhow::Result<()> {
        self.profiles.update(id, changes).await
    }

    /// Delete the profile row, then clean up the auth identity and the
    /// stored avatar. The row deletion is the authoritative outcome; the
    /// cleanups are logged-not-fatal.
    pub async fn remove(&self, id: &str) -> anyhow::Result<()> {
        let row = match self.profiles.fetch(id).await {
            Ok(row) => row,
            Err(e) => {
                warn!("could not read profile {id} before delete: {e:#}");
                None
            }
        };

        self.profiles.delete(id).await?;

        if let Err(e) = self.identity.delete_identity(id).await {
            warn!("identity cleanup failed for {id}: {e:#}");
        }

        if let Some(url) = row
            .as_ref()
            .and_then(|r| r.get("avatar_url"))
            .and_then(Value::as_str)
        {
            let public_prefix = self.avatars.public_url("");
            if let Some(path) = url.strip_prefix(&public_prefix) {
                if let Err(e) = self.avatars.remove(path).await {
                    warn!("avatar cleanup failed for {id}: {e:#}");
                }
            }
        }

        Ok(())
    }
}

fn non_empty(value: Option<&str>) -> Option<&str> {
    value.filter(|s| !s.trim().is_empty())
}

/// 16 random bytes, hex-encoded, truncated to 12 characters. The caller is
/// expected to force a password change out-of-band.
fn generate_temp_password() -> String {
    use rand::Rng;
    let mut raw = [0u8; 16];
    rand::thread_rng().fill(&mut raw);
    let mut password = hex::encode(raw);
    password.truncate(12);
    password
}

/// Accepts `data:<mediatype>;base64,<payload>` or bare base64. Returns the
/// decoded bytes and the declared media type, if any.
fn decode_avatar(encoded: &str) -> anyhow::Result<(Bytes, Option<String>)> {
    let (declared, payload) = match encoded
        .strip_prefix("data:")
        .and_then(|rest| rest.split_once(";base64,"))
    {
        Some((media_type, payload)) => (Some(media_type.to_string()), payload),
        None => (None, encoded),
    };
    let bytes = BASE64_STANDARD.decode(payload.trim())?;
    Ok((Bytes::from(bytes), declared))
}

/// Declared media type → filename hint → "jpg".
fn avatar_extension(declared: Option<&str>, name_hint: Option<&str>) -> String {
    declared
        .and_then(|m| m.parse::<mime::Mime>().ok())
        .map(|m| m.subtype().as_str().to_string())
        .or_else(|| {
            name_hint.and_then(|name| name.rsplit_once('.').map(|(_, ext)| ext.to_string()))
        })
        .filter(|ext| !ext.is_empty())
        .unwrap_or_else(|| "jpg".to_string())
}

fn avatar_content_type(declared: Option<&str>, name_hint: Option<&str>) -> String {
    declared
        .map(str::to_string)
        .or_else(|| {
            name_hint.and_then(|name| mime_guess::from_path(name).first().map(|m| m.to_string()))
        })
        .unwrap_or_else(|| "image/jpeg".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::testutil::{fake_id, FakeAvatars, FakeIdentities, FakeProfiles};

    // Decodes to the 8-byte PNG signature.
    const PNG_DATA_URI: &str = "data:image/png;base64,iVBORw0KGgo=";

    fn valid_request() -> CreateUserRequest {
        CreateUserRequest {
            full_name: Some("Ada Lovelace".into()),
            email: Some("ada@example.com".into()),
            role: Some("voter".into()),
            ..Default::default()
        }
    }

    fn service(
        identities: &Arc<FakeIdentities>,
        avatars: &Arc<FakeAvatars>,
        profiles: &Arc<FakeProfiles>,
        policy: AvatarFailurePolicy,
    ) -> UserService {
        UserService::new(
            identities.clone(),
            avatars.clone(),
            profiles.clone(),
            policy,
        )
    }

    #[tokio::test]
    async fn missing_fields_are_rejected_before_any_side_effect() {
        let identities = Arc::new(FakeIdentities::default());
        let avatars = Arc::new(FakeAvatars::default());
        let profiles = Arc::new(FakeProfiles::default());
        let svc = service(&identities, &avatars, &profiles, AvatarFailurePolicy::Abort);

        for request in [
            CreateUserRequest {
                full_name: None,
                ..valid_request()
            },
            CreateUserRequest {
                email: Some("".into()),
                ..valid_request()
            },
            CreateUserRequest {
                role: Some("   ".into()),
                ..valid_request()
            },
        ] {
            let err = svc.provision(request).await.unwrap_err();
            assert_eq!(
                err.to_string(),
                "Missing required fields: full_name, email, role"
            );
        }

        assert!(identities.created.lock().unwrap().is_empty());
        assert!(avatars.uploads.lock().unwrap().is_empty());
        assert!(profiles.rows.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn generated_password_is_twelve_lowercase_hex_chars() {
        let identities = Arc::new(FakeIdentities::default());
        let avatars = Arc::new(FakeAvatars::default());
        let profiles = Arc::new(FakeProfiles::default());
        let svc = service(&identities, &avatars, &profiles, AvatarFailurePolicy::Abort);

        let created = svc.provision(valid_request()).await.unwrap();
        assert_eq!(created.temp_password.len(), 12);
        assert!(created
            .temp_password
            .chars()
            .all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
        assert_eq!(
            identities.passwords.lock().unwrap().as_slice(),
            &[created.temp_password.clone()]
        );
    }

    #[tokio::test]
    async fn supplied_password_is_used_verbatim() {
        let identities = Arc::new(FakeIdentities::default());
        let avatars = Arc::new(FakeAvatars::default());
        let profiles = Arc::new(FakeProfiles::default());
        let svc = service(&identities, &avatars, &profiles, AvatarFailurePolicy::Abort);

        let created = svc
            .provision(CreateUserRequest {
                password: Some("hunter2hunter2".into()),
                ..valid_request()
            })
            .await
            .unwrap();
        assert_eq!(created.temp_password, "hunter2hunter2");
        assert_eq!(
            identities.passwords.lock().unwrap().as_slice(),
            &["hunter2hunter2".to_string()]
        );
    }

    #[tokio::test]
    async fn identity_failure_stops_before_storage_and_profiles() {
        let identities = Arc::new(FakeIdentities {
            fail_create: Some("duplicate email".into()),
            ..Default::default()
        });
        let avatars = Arc::new(FakeAvatars::default());
        let profiles = Arc::new(FakeProfiles::default());
        let svc = service(&identities, &avatars, &profiles, AvatarFailurePolicy::Abort);

        let err = svc
            .provision(CreateUserRequest {
                avatar_base64: Some(PNG_DATA_URI.into()),
                ..valid_request()
            })
            .await
            .unwrap_err();

        assert!(matches!(err, ProvisionError::IdentityCreation(_)));
        assert_eq!(err.to_string(), "Failed to create user: duplicate email");
        assert!(avatars.uploads.lock().unwrap().is_empty());
        assert!(profiles.rows.lock().unwrap().is_empty());
        assert!(identities.deleted.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn avatar_failure_deletes_the_identity_under_abort_policy() {
        let identities = Arc::new(FakeIdentities::default());
        let avatars = Arc::new(FakeAvatars {
            fail_upload: true,
            ..Default::default()
        });
        let profiles = Arc::new(FakeProfiles::default());
        let svc = service(&identities, &avatars, &profiles, AvatarFailurePolicy::Abort);

        let err = svc
            .provision(CreateUserRequest {
                avatar_base64: Some(PNG_DATA_URI.into()),
                ..valid_request()
            })
            .await
            .unwrap_err();

        assert!(matches!(err, ProvisionError::AvatarUpload(_)));
        assert_eq!(err.to_string(), "Avatar upload failed");
        assert_eq!(identities.deleted.lock().unwrap().as_slice(), &[fake_id(0)]);
        assert!(profiles.rows.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn avatar_failure_degrades_under_continue_policy() {
        let identities = Arc::new(FakeIdentities::default());
        let avatars = Arc::new(FakeAvatars {
            fail_upload: true,
            ..Default::default()
        });
        let profiles = Arc::new(FakeProfiles::default());
        let svc = service(&identities, &avatars, &profiles, AvatarFailurePolicy::Continue);

        let created = svc
            .provision(CreateUserRequest {
                avatar_base64: Some(PNG_DATA_URI.into()),
                ..valid_request()
            })
            .await
            .unwrap();

        assert!(created.avatar_url.is_none());
        assert!(identities.deleted.lock().unwrap().is_empty());
        let rows = profiles.rows.lock().unwrap();
        assert_eq!(rows.len(), 1);
        assert!(rows[0].avatar_url.is_none());
    }

    #[tokio::test]
    async fn profile_failure_rolls_back_identity_and_avatar() {
        let identities = Arc::new(FakeIdentities::default());
        let avatars = Arc::new(FakeAvatars::default());
        let profiles = Arc::new(FakeProfiles {
            fail_insert: Some("row exists".into()),
            ..Default::default()
        });
        let svc = service(&identities, &avatars, &profiles, AvatarFailurePolicy::Abort);

        let err = svc
            .provision(CreateUserRequest {
                avatar_base64: Some(PNG_DATA_URI.into()),
                ..valid_request()
            })
            .await
            .unwrap_err();

        assert!(matches!(err, ProvisionError::ProfileInsert(_)));
        assert_eq!(err.to_string(), "Failed to insert user record: row exists");
        assert_eq!(identities.deleted.lock().unwrap().as_slice(), &[fake_id(0)]);
        assert_eq!(
            avatars.removed.lock().unwrap().as_slice(),
            &[format!("avatars/{}.png", fake_id(0))]
        );
    }

    #[tokio::test]
    async fn failed_identity_compensation_does_not_stop_avatar_cleanup() {
        let identities = Arc::new(FakeIdentities {
            fail_delete: true,
            ..Default::default()
        });
        let avatars = Arc::new(FakeAvatars::default());
        let profiles = Arc::new(FakeProfiles {
            fail_insert: Some("down for maintenance".into()),
            ..Default::default()
        });
        let svc = service(&identities, &avatars, &profiles, AvatarFailurePolicy::Abort);

        let err = svc
            .provision(CreateUserRequest {
                avatar_base64: Some(PNG_DATA_URI.into()),
                ..valid_request()
            })
            .await
            .unwrap_err();

        // The primary error survives and the blob is still cleaned up.
        assert!(matches!(err, ProvisionError::ProfileInsert(_)));
        assert_eq!(
            avatars.removed.lock().unwrap().as_slice(),
            &[format!("avatars/{}.png", fake_id(0))]
        );
    }

    #[tokio::test]
    async fn second_provision_with_same_email_fails_leaving_one_pair() {
        let identities = Arc::new(FakeIdentities {
            reject_duplicates: true,
            ..Default::default()
        });
        let avatars = Arc::new(FakeAvatars::default());
        let profiles = Arc::new(FakeProfiles::default());
        let svc = service(&identities, &avatars, &profiles, AvatarFailurePolicy::Abort);

        svc.provision(valid_request()).await.unwrap();
        let err = svc.provision(valid_request()).await.unwrap_err();

        assert!(matches!(err, ProvisionError::IdentityCreation(_)));
        assert_eq!(identities.created.lock().unwrap().len(), 1);
        assert_eq!(profiles.rows.lock().unwrap().len(), 1);
        assert!(identities.deleted.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn avatar_path_and_url_derive_from_declared_media_type() {
        let identities = Arc::new(FakeIdentities::default());
        let avatars = Arc::new(FakeAvatars::default());
        let profiles = Arc::new(FakeProfiles::default());
        let svc = service(&identities, &avatars, &profiles, AvatarFailurePolicy::Abort);

        let created = svc
            .provision(CreateUserRequest {
                avatar_base64: Some(PNG_DATA_URI.into()),
                avatar_name: Some("ignored.gif".into()),
                ..valid_request()
            })
            .await
            .unwrap();

        assert_eq!(
            avatars.uploads.lock().unwrap().as_slice(),
            &[(format!("avatars/{}.png", fake_id(0)), "image/png".to_string())]
        );
        assert_eq!(
            created.avatar_url.as_deref(),
            Some(format!("https://cdn.test/avatars/{}.png", fake_id(0)).as_str())
        );
        let rows = profiles.rows.lock().unwrap();
        assert_eq!(rows[0].avatar_url, created.avatar_url);
    }

    #[tokio::test]
    async fn remove_deletes_row_then_cleans_up_identity_and_avatar() {
        let identities = Arc::new(FakeIdentities::default());
        let avatars = Arc::new(FakeAvatars::default());
        let profiles = Arc::new(FakeProfiles::default());
        let svc = service(&identities, &avatars, &profiles, AvatarFailurePolicy::Abort);

        let created = svc
            .provision(CreateUserRequest {
                avatar_base64: Some(PNG_DATA_URI.into()),
                ..valid_request()
            })
            .await
            .unwrap();

        svc.remove(&created.id).await.unwrap();

        assert!(profiles.rows.lock().unwrap().is_empty());
        assert_eq!(identities.deleted.lock().unwrap().as_slice(), &[fake_id(0)]);
        assert_eq!(
            avatars.removed.lock().unwrap().as_slice(),
            &[format!("avatars/{}.png", fake_id(0))]
        );
    }

    #[test]
    fn decode_accepts_bare_base64_without_media_type() {
        let (bytes, declared) = decode_avatar("iVBORw0KGgo=").unwrap();
        assert_eq!(&bytes[..4], b"\x89PNG");
        assert!(declared.is_none());
    }

    #[test]
    fn decode_rejects_invalid_base64() {
        assert!(decode_avatar("data:image/png;base64,@@@").is_err());
    }

    #[test]
    fn extension_precedence_is_media_type_then_hint_then_jpg() {
        assert_eq!(avatar_extension(Some("image/webp"), Some("x.png")), "webp");
        assert_eq!(avatar_extension(None, Some("portrait.png")), "png");
        assert_eq!(avatar_extension(None, Some("no-extension")), "jpg");
        assert_eq!(avatar_extension(None, None), "jpg");
    }

    #[test]
    fn content_type_falls_back_to_filename_guess_then_jpeg() {
        assert_eq!(avatar_content_type(Some("image/webp"), None), "image/webp");
        assert_eq!(avatar_content_type(None, Some("a.png")), "image/png");
        assert_eq!(avatar_content_type(None, None), "image/jpeg");
    }

    #[test]
    fn temp_passwords_are_twelve_hex_chars() {
        for _ in 0..16 {
            let pw = generate_temp_password();
            assert_eq!(pw.len(), 12);
            assert!(pw.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
        }
    }
}
