//! Google 服务账号认证
//!
//! 读取 Firebase 服务账号 JSON，签发 RS256 断言并在 `token_uri` 换取 OAuth2 access token。
//! token 在过期前 60 秒内刷新，FCM 与 Firestore 共用同一个来源。

use std::path::Path;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::Utc;
use jsonwebtoken::{encode, Algorithm, EncodingKey, Header};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::error::AuthError;

pub const SCOPE_FIREBASE_MESSAGING: &str = "https://www.googleapis.com/auth/firebase.messaging";
pub const SCOPE_DATASTORE: &str = "https://www.googleapis.com/auth/datastore";

const JWT_BEARER_GRANT: &str = "urn:ietf:params:oauth:grant-type:jwt-bearer";
const ASSERTION_LIFETIME_SECS: i64 = 3600;
const REFRESH_MARGIN: Duration = Duration::from_secs(60);

fn default_token_uri() -> String {
    "https://oauth2.googleapis.com/token".to_string()
}

/// 服务账号密钥文件中用到的字段
#[derive(Debug, Clone, Deserialize)]
pub struct ServiceAccountKey {
    #[serde(default)]
    pub project_id: Option<String>,
    pub client_email: String,
    pub private_key: String,
    #[serde(default = "default_token_uri")]
    pub token_uri: String,
}

impl ServiceAccountKey {
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, AuthError> {
        let content = std::fs::read_to_string(path.as_ref()).map_err(|e| {
            AuthError::InvalidCredentials(format!("cannot read {:?}: {}", path.as_ref(), e))
        })?;
        Self::from_json(&content)
    }

    pub fn from_json(json: &str) -> Result<Self, AuthError> {
        serde_json::from_str(json).map_err(|e| AuthError::InvalidCredentials(e.to_string()))
    }
}

/// access token 来源
#[async_trait]
pub trait AccessTokenSource: Send + Sync {
    async fn access_token(&self) -> Result<String, AuthError>;
}

/// 配置中直接给出的 token
pub struct StaticTokenSource {
    token: String,
}

impl StaticTokenSource {
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: token.into(),
        }
    }
}

#[async_trait]
impl AccessTokenSource for StaticTokenSource {
    async fn access_token(&self) -> Result<String, AuthError> {
        Ok(self.token.clone())
    }
}

#[derive(Serialize)]
struct AssertionClaims<'a> {
    iss: &'a str,
    scope: String,
    aud: &'a str,
    iat: i64,
    exp: i64,
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default = "default_expires_in")]
    expires_in: u64,
}

fn default_expires_in() -> u64 {
    3600
}

struct CachedToken {
    token: String,
    expires_at: Instant,
}

/// 服务账号 token 来源（带缓存）
pub struct ServiceAccountTokenSource {
    key: ServiceAccountKey,
    encoding_key: EncodingKey,
    scopes: Vec<String>,
    client: Client,
    cached: Mutex<Option<CachedToken>>,
}

impl ServiceAccountTokenSource {
    pub fn new(key: ServiceAccountKey, scopes: &[&str]) -> Result<Self, AuthError> {
        let encoding_key = EncodingKey::from_rsa_pem(key.private_key.as_bytes())
            .map_err(|e| AuthError::InvalidCredentials(format!("invalid private key: {}", e)))?;

        Ok(Self {
            key,
            encoding_key,
            scopes: scopes.iter().map(|s| s.to_string()).collect(),
            client: Client::new(),
            cached: Mutex::new(None),
        })
    }

    pub fn project_id(&self) -> Option<&str> {
        self.key.project_id.as_deref()
    }

    fn sign_assertion(&self) -> Result<String, AuthError> {
        let now = Utc::now().timestamp();
        let claims = AssertionClaims {
            iss: &self.key.client_email,
            scope: self.scopes.join(" "),
            aud: &self.key.token_uri,
            iat: now,
            exp: now + ASSERTION_LIFETIME_SECS,
        };

        encode(&Header::new(Algorithm::RS256), &claims, &self.encoding_key)
            .map_err(|e| AuthError::Signing(e.to_string()))
    }

    async fn exchange(&self) -> Result<CachedToken, AuthError> {
        let assertion = self.sign_assertion()?;

        let response = self
            .client
            .post(&self.key.token_uri)
            .form(&[("grant_type", JWT_BEARER_GRANT), ("assertion", assertion.as_str())])
            .send()
            .await
            .map_err(|e| AuthError::TokenExchange(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(AuthError::TokenExchange(format!(
                "status={}, body={}",
                status, body
            )));
        }

        let token: TokenResponse = response
            .json()
            .await
            .map_err(|e| AuthError::TokenExchange(e.to_string()))?;

        info!(
            "[AUTH] Access token refreshed for {}, expires in {}s",
            self.key.client_email, token.expires_in
        );

        Ok(CachedToken {
            token: token.access_token,
            expires_at: Instant::now() + Duration::from_secs(token.expires_in),
        })
    }
}

#[async_trait]
impl AccessTokenSource for ServiceAccountTokenSource {
    async fn access_token(&self) -> Result<String, AuthError> {
        // 持锁刷新，避免并发投递时重复换取
        let mut cached = self.cached.lock().await;
        if let Some(token) = cached.as_ref() {
            if token.expires_at > Instant::now() + REFRESH_MARGIN {
                return Ok(token.token.clone());
            }
            debug!("[AUTH] Cached access token is about to expire, refreshing");
        }

        let fresh = self.exchange().await?;
        let value = fresh.token.clone();
        *cached = Some(fresh);
        Ok(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_string_contains, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const TEST_KEY: &str = include_str!("../../tests/fixtures/test_service_account_key.pem");

    fn test_key(token_uri: String) -> ServiceAccountKey {
        ServiceAccountKey {
            project_id: Some("demo-project".to_string()),
            client_email: "bridge@demo-project.iam.gserviceaccount.com".to_string(),
            private_key: TEST_KEY.to_string(),
            token_uri,
        }
    }

    #[test]
    fn test_parse_service_account_json() {
        let json = serde_json::json!({
            "type": "service_account",
            "project_id": "demo-project",
            "client_email": "bridge@demo-project.iam.gserviceaccount.com",
            "private_key": TEST_KEY,
        })
        .to_string();

        let key = ServiceAccountKey::from_json(&json).unwrap();
        assert_eq!(key.project_id.as_deref(), Some("demo-project"));
        assert_eq!(key.token_uri, "https://oauth2.googleapis.com/token");
    }

    #[test]
    fn test_invalid_private_key_rejected() {
        let mut key = test_key("http://localhost/token".to_string());
        key.private_key = "not a pem".to_string();
        assert!(matches!(
            ServiceAccountTokenSource::new(key, &[SCOPE_FIREBASE_MESSAGING]),
            Err(AuthError::InvalidCredentials(_))
        ));
    }

    #[tokio::test]
    async fn test_access_token_is_cached() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/token"))
            .and(body_string_contains("jwt-bearer"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "access_token": "ya29.test",
                "expires_in": 3600,
                "token_type": "Bearer"
            })))
            .expect(1)
            .mount(&server)
            .await;

        let source = ServiceAccountTokenSource::new(
            test_key(format!("{}/token", server.uri())),
            &[SCOPE_FIREBASE_MESSAGING, SCOPE_DATASTORE],
        )
        .unwrap();

        assert_eq!(source.access_token().await.unwrap(), "ya29.test");
        assert_eq!(source.access_token().await.unwrap(), "ya29.test");
    }

    #[tokio::test]
    async fn test_token_exchange_failure() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/token"))
            .respond_with(ResponseTemplate::new(400).set_body_string("invalid_grant"))
            .mount(&server)
            .await;

        let source = ServiceAccountTokenSource::new(
            test_key(format!("{}/token", server.uri())),
            &[SCOPE_FIREBASE_MESSAGING],
        )
        .unwrap();

        let err = source.access_token().await.unwrap_err();
        assert!(matches!(err, AuthError::TokenExchange(msg) if msg.contains("invalid_grant")));
    }

    #[tokio::test]
    async fn test_static_token_source() {
        let source = StaticTokenSource::new("fixed");
        assert_eq!(source.access_token().await.unwrap(), "fixed");
    }
}
