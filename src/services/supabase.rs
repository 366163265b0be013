use reqwest::{Client, Method, RequestBuilder, Response};
use serde_json::Value;

/// Shared handle for the Supabase HTTP surface. All three backend services
/// (GoTrue, PostgREST, Storage) hang off the same base URL and authenticate
/// with the privileged service-role key.
pub struct Supabase {
    http: Client,
    base_url: String,
    service_key: String,
}

impl Supabase {
    pub fn new(base_url: &str, service_key: &str) -> Self {
        Self {
            http: Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            service_key: service_key.to_string(),
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// A request against `{base_url}/{path}` carrying the service-role
    /// credentials the way the platform expects them (both headers).
    pub fn request(&self, method: Method, path: &str) -> RequestBuilder {
        self.http
            .request(method, format!("{}/{}", self.base_url, path))
            .header("apikey", &self.service_key)
            .bearer_auth(&self.service_key)
    }

    /// Pull a human-readable message out of a failed response. The three
    /// services disagree on the field name, so try them in turn before
    /// falling back to the status line.
    pub async fn error_message(response: Response) -> String {
        let status = response.status();
        let fallback = || format!("{} {}", status.as_u16(), status.canonical_reason().unwrap_or("error"));
        match response.json::<Value>().await {
            Ok(body) => ["msg", "message", "error_description", "error"]
                .iter()
                .filter_map(|k| body.get(*k).and_then(Value::as_str))
                .next()
                .map(str::to_string)
                .unwrap_or_else(fallback),
            Err(_) => fallback(),
        }
    }
}
