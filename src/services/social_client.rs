//! HTTP client for the platform social API: friendship/blacklist policy
//! checks and profile lookups. The DM core only ever talks to it through the
//! `AccessPolicy` and `UserDirectory` traits.

use async_trait::async_trait;
use serde::Deserialize;
use uuid::Uuid;

use crate::error::{AppError, AppResult};
use crate::policy::{AccessPolicy, PolicyAction, UserDirectory, UserProfile};

pub struct SocialClient {
    http: reqwest::Client,
    base_url: String,
}

impl SocialClient {
    pub fn new(base_url: &str) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    fn upstream(e: reqwest::Error) -> AppError {
        AppError::Upstream(e.to_string())
    }
}

#[derive(Deserialize)]
struct AllowedResponse {
    allowed: bool,
}

#[derive(Deserialize)]
struct BlockedResponse {
    blocked: bool,
}

#[async_trait]
impl AccessPolicy for SocialClient {
    async fn is_allowed(
        &self,
        action: PolicyAction,
        actor: Uuid,
        target: Uuid,
    ) -> AppResult<bool> {
        let url = format!("{}/api/v1/policy/allowed", self.base_url);
        let body: AllowedResponse = self
            .http
            .get(&url)
            .query(&[
                ("action", action.as_str().to_string()),
                ("actor", actor.to_string()),
                ("target", target.to_string()),
            ])
            .send()
            .await
            .map_err(Self::upstream)?
            .error_for_status()
            .map_err(Self::upstream)?
            .json()
            .await
            .map_err(Self::upstream)?;
        Ok(body.allowed)
    }

    async fn is_blocked(&self, a: Uuid, b: Uuid) -> AppResult<bool> {
        let url = format!("{}/api/v1/policy/blocked", self.base_url);
        let body: BlockedResponse = self
            .http
            .get(&url)
            .query(&[("a", a.to_string()), ("b", b.to_string())])
            .send()
            .await
            .map_err(Self::upstream)?
            .error_for_status()
            .map_err(Self::upstream)?
            .json()
            .await
            .map_err(Self::upstream)?;
        Ok(body.blocked)
    }

    async fn block(&self, actor: Uuid, target: Uuid) -> AppResult<()> {
        let url = format!("{}/api/v1/blacklist", self.base_url);
        self.http
            .post(&url)
            .json(&serde_json::json!({ "actor": actor, "target": target }))
            .send()
            .await
            .map_err(Self::upstream)?
            .error_for_status()
            .map_err(Self::upstream)?;
        Ok(())
    }
}

#[async_trait]
impl UserDirectory for SocialClient {
    async fn profile(&self, user: Uuid) -> AppResult<UserProfile> {
        let url = format!("{}/api/v1/users/{}/profile", self.base_url, user);
        let response = self.http.get(&url).send().await.map_err(Self::upstream)?;
        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Err(AppError::NotFound);
        }
        let profile: UserProfile = response
            .error_for_status()
            .map_err(Self::upstream)?
            .json()
            .await
            .map_err(Self::upstream)?;
        Ok(profile)
    }
}
