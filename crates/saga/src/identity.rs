//! Recipient identity lookup against the user service.

use std::time::Duration;

use async_trait::async_trait;
use common::UserId;
use serde::{Deserialize, Serialize};

use crate::error::{Result, SagaError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UserRole {
    Client,
    Supplier,
    #[serde(other)]
    Other,
}

/// Contact details of a user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserInfo {
    pub id: UserId,
    pub username: String,
    #[serde(default)]
    pub email: String,
    pub role: UserRole,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phone: Option<String>,
}

impl UserInfo {
    /// Stand-in used when the identity service cannot answer.
    pub fn placeholder(id: UserId) -> Self {
        let raw = id.as_i64();
        Self {
            id,
            username: format!("user{raw}"),
            email: format!("user{raw}@example.com"),
            role: UserRole::Client,
            phone: Some(format!("+79001{raw:06}")),
        }
    }

    /// Phone number, if present and non-empty.
    pub fn phone(&self) -> Option<&str> {
        self.phone.as_deref().filter(|p| !p.is_empty())
    }
}

/// Resolves user ids to contact details.
#[async_trait]
pub trait IdentityLookup: Send + Sync {
    async fn lookup(&self, id: UserId) -> Result<UserInfo>;
}

/// Looks a user up, falling back to [`UserInfo::placeholder`] on any failure.
pub async fn resolve_user(identity: &dyn IdentityLookup, id: UserId) -> UserInfo {
    match identity.lookup(id).await {
        Ok(user) => user,
        Err(e) => {
            tracing::warn!(user_id = %id, error = %e, "identity lookup failed, using placeholder");
            metrics::counter!("identity_fallbacks_total").increment(1);
            UserInfo::placeholder(id)
        }
    }
}

/// HTTP client for `GET {base}/user/{id}`.
#[derive(Clone)]
pub struct HttpIdentityClient {
    client: reqwest::Client,
    base_url: String,
}

impl HttpIdentityClient {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| SagaError::DownstreamUnavailable(format!("identity client: {e}")))?;

        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }
}

#[async_trait]
impl IdentityLookup for HttpIdentityClient {
    #[tracing::instrument(skip(self))]
    async fn lookup(&self, id: UserId) -> Result<UserInfo> {
        let url = format!("{}/user/{}", self.base_url, id);
        let unavailable = |e: reqwest::Error| SagaError::DownstreamUnavailable(e.to_string());

        let response = self.client.get(&url).send().await.map_err(unavailable)?;
        if response.status() != reqwest::StatusCode::OK {
            return Err(SagaError::DownstreamUnavailable(format!(
                "identity service returned {} for user {id}",
                response.status()
            )));
        }
        response.json::<UserInfo>().await.map_err(unavailable)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Down;

    #[async_trait]
    impl IdentityLookup for Down {
        async fn lookup(&self, id: UserId) -> Result<UserInfo> {
            Err(SagaError::DownstreamUnavailable(format!("no route to user {id}")))
        }
    }

    #[test]
    fn placeholder_shape() {
        let user = UserInfo::placeholder(UserId::new(7));
        assert_eq!(user.username, "user7");
        assert_eq!(user.email, "user7@example.com");
        assert_eq!(user.role, UserRole::Client);
        assert_eq!(user.phone(), Some("+79001000007"));
    }

    #[test]
    fn user_info_decodes_with_optional_phone_and_unknown_role() {
        let user: UserInfo =
            serde_json::from_str(r#"{"id":3,"username":"bob","email":"b@x.io","role":"admin"}"#)
                .unwrap();
        assert_eq!(user.role, UserRole::Other);
        assert_eq!(user.phone(), None);

        let user: UserInfo = serde_json::from_str(
            r#"{"id":3,"username":"bob","email":"b@x.io","role":"supplier","phone":""}"#,
        )
        .unwrap();
        assert_eq!(user.phone(), None);
    }

    #[tokio::test]
    async fn resolve_falls_back_to_placeholder() {
        let user = resolve_user(&Down, UserId::new(7)).await;
        assert_eq!(user, UserInfo::placeholder(UserId::new(7)));
    }

    #[tokio::test]
    async fn http_client_reports_unreachable_service() {
        let client =
            HttpIdentityClient::new("http://127.0.0.1:9", Duration::from_millis(200)).unwrap();
        let err = client.lookup(UserId::new(1)).await.unwrap_err();
        assert!(matches!(err, SagaError::DownstreamUnavailable(_)));
    }
}
