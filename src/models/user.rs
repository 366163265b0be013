use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Inbound body for user creation. Required fields are validated by the
/// provisioning service so that a missing field yields the contract error
/// instead of a deserialization rejection.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct CreateUserRequest {
    pub full_name: Option<String>,
    pub email: Option<String>,
    pub role: Option<String>,
    pub password: Option<String>,
    pub phone: Option<String>,
    /// Either a `data:<mediatype>;base64,<payload>` URI or bare base64.
    #[serde(rename = "avatarBase64")]
    pub avatar_base64: Option<String>,
    /// Filename hint, used only when the data URI carries no media type.
    #[serde(rename = "avatarName")]
    pub avatar_name: Option<String>,
}

/// Partial update for a profile row. Serialized as the PATCH body, so
/// absent fields must not appear at all.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UpdateUserRequest {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub full_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub avatar_url: Option<String>,
}

impl UpdateUserRequest {
    pub fn is_empty(&self) -> bool {
        self.full_name.is_none() && self.role.is_none() && self.avatar_url.is_none()
    }
}

/// The durable profile record, keyed by the auth identity id.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProfileRow {
    pub id: String,
    pub full_name: String,
    pub email: String,
    pub role: String,
    pub phone: Option<String>,
    pub avatar_url: Option<String>,
}

/// Successful provisioning result. `temp_password` is returned exactly
/// once and never stored by this server.
#[derive(Debug, Clone, Serialize)]
pub struct ProvisionedUser {
    pub id: String,
    pub full_name: String,
    pub email: String,
    pub role: String,
    pub phone: Option<String>,
    #[serde(rename = "tempPassword")]
    pub temp_password: String,
    pub avatar_url: Option<String>,
}

/// A profile row normalized for the dashboard, tolerating the several row
/// shapes that exist upstream.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NormalizedUser {
    pub id: String,
    pub name: String,
    pub email: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub avatar_url: Option<String>,
    pub access: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_active: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub date_added: Option<DateTime<Utc>>,
}

impl NormalizedUser {
    /// Field precedence:
    /// - name: `full_name` → `name` → `first_name last_name` → ""
    /// - email: `email` → `user_email` → ""
    /// - avatar: `avatar_url` → `avatar` → `avatarUrl`
    /// - access: `access` array → `[role]` → `[]`
    /// - last_active: `last_active` → `lastActive` → `updated_at` → `last_login_at`
    /// - date_added: `created_at` → `dateAdded` → `inserted_at`
    pub fn from_row(row: &Value) -> Self {
        let str_field = |keys: &[&str]| -> Option<String> {
            keys.iter()
                .filter_map(|k| row.get(*k).and_then(Value::as_str))
                .find(|s| !s.is_empty())
                .map(str::to_string)
        };

        let name = str_field(&["full_name", "name"]).unwrap_or_else(|| {
            match (
                row.get("first_name").and_then(Value::as_str),
                row.get("last_name").and_then(Value::as_str),
            ) {
                (Some(f), Some(l)) => format!("{f} {l}"),
                _ => String::new(),
            }
        });

        let access = match row.get("access").and_then(Value::as_array) {
            Some(tags) => tags
                .iter()
                .filter_map(Value::as_str)
                .map(str::to_string)
                .collect(),
            None => str_field(&["role"]).map(|r| vec![r]).unwrap_or_default(),
        };

        let ts_field = |keys: &[&str]| -> Option<DateTime<Utc>> {
            keys.iter()
                .filter_map(|k| row.get(*k).and_then(Value::as_str))
                .find_map(parse_timestamp)
        };

        Self {
            // Missing ids do not occur upstream, but an empty string beats
            // dropping the row on the floor.
            id: row
                .get("id")
                .map(|v| match v {
                    Value::String(s) => s.clone(),
                    other => other.to_string(),
                })
                .unwrap_or_default(),
            name,
            email: str_field(&["email", "user_email"]).unwrap_or_default(),
            avatar_url: str_field(&["avatar_url", "avatar", "avatarUrl"]),
            access,
            last_active: ts_field(&["last_active", "lastActive", "updated_at", "last_login_at"]),
            date_added: ts_field(&["created_at", "dateAdded", "inserted_at"]),
        }
    }
}

/// PostgREST emits RFC 3339; some upstream writers drop the offset.
/// Naive timestamps are taken as UTC. Anything else becomes None.
fn parse_timestamp(s: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .map(|d| d.with_timezone(&Utc))
        .or_else(|_| {
            NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S%.f").map(|n| n.and_utc())
        })
        .ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn normalizes_canonical_row() {
        let row = json!({
            "id": "u-1",
            "full_name": "Ada Lovelace",
            "email": "ada@example.com",
            "role": "voter",
            "avatar_url": "https://cdn.example/a.png",
            "created_at": "2026-01-02T03:04:05+00:00",
            "updated_at": "2026-01-03T03:04:05Z",
        });
        let user = NormalizedUser::from_row(&row);
        assert_eq!(user.id, "u-1");
        assert_eq!(user.name, "Ada Lovelace");
        assert_eq!(user.email, "ada@example.com");
        assert_eq!(user.access, vec!["voter".to_string()]);
        assert_eq!(user.avatar_url.as_deref(), Some("https://cdn.example/a.png"));
        assert!(user.last_active.is_some());
        assert!(user.date_added.is_some());
    }

    #[test]
    fn full_name_wins_over_name_and_split_names() {
        let row = json!({
            "id": "u-2",
            "full_name": "Grace Hopper",
            "name": "G. Hopper",
            "first_name": "Grace",
            "last_name": "Hopper",
        });
        assert_eq!(NormalizedUser::from_row(&row).name, "Grace Hopper");
    }

    #[test]
    fn split_names_are_joined_when_nothing_else_exists() {
        let row = json!({ "id": "u-3", "first_name": "Alan", "last_name": "Turing" });
        assert_eq!(NormalizedUser::from_row(&row).name, "Alan Turing");
    }

    #[test]
    fn access_array_wins_over_role() {
        let row = json!({ "id": "u-4", "access": ["admin", "auditor"], "role": "voter" });
        assert_eq!(
            NormalizedUser::from_row(&row).access,
            vec!["admin".to_string(), "auditor".to_string()]
        );
    }

    #[test]
    fn missing_everything_degrades_to_empties() {
        let user = NormalizedUser::from_row(&json!({}));
        assert_eq!(user.id, "");
        assert_eq!(user.name, "");
        assert_eq!(user.email, "");
        assert!(user.access.is_empty());
        assert!(user.avatar_url.is_none());
        assert!(user.last_active.is_none());
    }

    #[test]
    fn naive_timestamps_parse_as_utc() {
        let row = json!({ "id": "u-5", "created_at": "2026-02-03T10:20:30.123456" });
        let user = NormalizedUser::from_row(&row);
        assert_eq!(
            user.date_added.unwrap().to_rfc3339(),
            "2026-02-03T10:20:30.123456+00:00"
        );
    }

    #[test]
    fn garbage_timestamps_become_none() {
        let row = json!({ "id": "u-6", "created_at": "yesterday-ish" });
        assert!(NormalizedUser::from_row(&row).date_added.is_none());
    }
}
