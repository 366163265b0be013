use std::env;
use std::str::FromStr;

/// What to do when the avatar upload step fails after the auth identity
/// already exists.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AvatarFailurePolicy {
    /// Delete the just-created identity and fail the whole operation.
    Abort,
    /// Log the failure and insert the profile row with a null avatar URL.
    Continue,
}

impl FromStr for AvatarFailurePolicy {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "abort" => Ok(AvatarFailurePolicy::Abort),
            "continue" => Ok(AvatarFailurePolicy::Continue),
            _ => Err(anyhow::anyhow!("Unknown avatar failure policy: {s}")),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    /// Supabase project base URL. Optional: without it (or the key) the
    /// server still boots, but user-management routes answer 500.
    pub supabase_url: Option<String>,
    pub service_role_key: Option<String>,
    pub avatar_bucket: String,
    pub users_table: String,
    pub provision_timeout_secs: u64,
    pub avatar_failure_policy: AvatarFailurePolicy,
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        Ok(Self {
            host: env::var("HOST").unwrap_or_else(|_| "0.0.0.0".into()),
            port: env::var("PORT")
                .unwrap_or_else(|_| "8080".into())
                .parse()?,
            supabase_url: env::var("SUPABASE_URL").ok().filter(|s| !s.is_empty()),
            service_role_key: env::var("SUPABASE_SERVICE_ROLE_KEY")
                .ok()
                .filter(|s| !s.is_empty()),
            avatar_bucket: env::var("AVATAR_BUCKET").unwrap_or_else(|_| "avatars".into()),
            users_table: env::var("USERS_TABLE").unwrap_or_else(|_| "users".into()),
            provision_timeout_secs: env::var("PROVISION_TIMEOUT_SECS")
                .unwrap_or_else(|_| "15".into())
                .parse()?,
            avatar_failure_policy: env::var("AVATAR_FAILURE_POLICY")
                .unwrap_or_else(|_| "abort".into())
                .parse()?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn avatar_policy_parses() {
        assert_eq!(
            "abort".parse::<AvatarFailurePolicy>().unwrap(),
            AvatarFailurePolicy::Abort
        );
        assert_eq!(
            "continue".parse::<AvatarFailurePolicy>().unwrap(),
            AvatarFailurePolicy::Continue
        );
        assert!("retry".parse::<AvatarFailurePolicy>().is_err());
    }
}
