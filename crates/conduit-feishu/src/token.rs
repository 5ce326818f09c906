//! Tenant access token acquisition and caching.
//!
//! Feishu's bot API requires a `tenant_access_token` on every outbound call.
//! Tokens are valid for two hours; we refresh a little early and cache the
//! result behind a mutex since request volume is low (one send = one lookup).

use std::sync::Mutex;
use std::time::{Duration, Instant};

use serde::Deserialize;

use crate::error::FeishuError;

const TOKEN_URL: &str = "https://open.feishu.cn/open-apis/auth/v3/tenant_access_token/internal";
/// Refresh five minutes before the token's reported expiry.
const REFRESH_SLACK: Duration = Duration::from_secs(300);

#[derive(Debug, Deserialize)]
struct TokenResponse {
    code: i64,
    msg: String,
    #[serde(default)]
    tenant_access_token: String,
    #[serde(default)]
    expire: u64,
}

struct Cached {
    token: String,
    expires_at: Instant,
}

pub struct TokenCache {
    app_id: String,
    app_secret: String,
    cached: Mutex<Option<Cached>>,
}

impl TokenCache {
    pub fn new(app_id: impl Into<String>, app_secret: impl Into<String>) -> Self {
        Self {
            app_id: app_id.into(),
            app_secret: app_secret.into(),
            cached: Mutex::new(None),
        }
    }

    /// Return a valid tenant access token, fetching a fresh one if the
    /// cached value is missing or within `REFRESH_SLACK` of expiry.
    pub async fn get(&self, client: &reqwest::Client) -> Result<String, FeishuError> {
        if let Some(cached) = self.cached.lock().unwrap().as_ref() {
            if cached.expires_at > Instant::now() {
                return Ok(cached.token.clone());
            }
        }

        let resp: TokenResponse = client
            .post(TOKEN_URL)
            .json(&serde_json::json!({"app_id": self.app_id, "app_secret": self.app_secret}))
            .send()
            .await?
            .json()
            .await?;

        if resp.code != 0 {
            return Err(FeishuError::Api { code: resp.code, msg: resp.msg });
        }

        let ttl = Duration::from_secs(resp.expire).saturating_sub(REFRESH_SLACK);
        let expires_at = Instant::now() + ttl;
        *self.cached.lock().unwrap() = Some(Cached { token: resp.tenant_access_token.clone(), expires_at });

        Ok(resp.tenant_access_token)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_cache_is_empty() {
        let cache = TokenCache::new("app", "secret");
        assert!(cache.cached.lock().unwrap().is_none());
    }
}
