use std::sync::Arc;

use async_trait::async_trait;
use reqwest::header::RETRY_AFTER;
use reqwest::Client;
use serde::Deserialize;
use serde_json::json;
use tracing::{debug, warn};

use crate::auth::AccessTokenSource;
use crate::error::ProviderError;
use crate::push::provider::provider_trait::PushProvider;
use crate::push::types::{Priority, PushMessage};

/// FCM (Firebase Cloud Messaging) Provider
///
/// 使用 FCM HTTP v1 API，只发送 data 消息：title / body 放在 data 中，由客户端渲染。
pub struct FcmProvider {
    client: Client,
    endpoint: String,
    project_id: String,
    tokens: Arc<dyn AccessTokenSource>,
}

#[derive(Debug, Default, Deserialize)]
struct FcmErrorResponse {
    error: Option<FcmErrorBody>,
}

#[derive(Debug, Default, Deserialize)]
struct FcmErrorBody {
    #[serde(default)]
    message: String,
    #[serde(default)]
    status: String,
    #[serde(default)]
    details: Vec<FcmErrorDetail>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct FcmErrorDetail {
    error_code: Option<String>,
}

impl FcmProvider {
    /// 创建新的 FCM Provider
    ///
    /// # 参数
    /// - endpoint: API 根地址（默认 `https://fcm.googleapis.com`）
    /// - project_id: Firebase 项目 ID
    /// - tokens: OAuth 2.0 access token 来源
    pub fn new(
        endpoint: impl Into<String>,
        project_id: impl Into<String>,
        tokens: Arc<dyn AccessTokenSource>,
    ) -> Self {
        Self {
            client: Client::new(),
            endpoint: endpoint.into().trim_end_matches('/').to_string(),
            project_id: project_id.into(),
            tokens,
        }
    }

    fn send_url(&self) -> String {
        format!(
            "{}/v1/projects/{}/messages:send",
            self.endpoint, self.project_id
        )
    }

    /// 构建 FCM 消息 payload（不含 notification 块）
    fn build_fcm_payload(message: &PushMessage) -> serde_json::Value {
        let apns_priority = match message.priority {
            Priority::High => "10",
            Priority::Normal => "5",
        };

        json!({
            "message": {
                "token": message.token,
                "data": message.data,
                "android": {
                    "priority": message.priority.as_str(),
                    "ttl": format!("{}s", message.ttl_secs)
                },
                "apns": {
                    "headers": {
                        "apns-priority": apns_priority
                    }
                }
            }
        })
    }
}

/// 将 FCM 错误响应映射为 ProviderError
fn map_fcm_error(status: u16, retry_after: Option<u64>, body: &str) -> ProviderError {
    let parsed: FcmErrorResponse = serde_json::from_str(body).unwrap_or_default();
    let error = parsed.error.unwrap_or_default();
    let error_code = error
        .details
        .iter()
        .find_map(|d| d.error_code.clone())
        .unwrap_or_else(|| error.status.clone());
    let message = if error.message.is_empty() {
        body.to_string()
    } else {
        error.message.clone()
    };

    match error_code.as_str() {
        "UNREGISTERED" => return ProviderError::Unregistered(message),
        "SENDER_ID_MISMATCH" => return ProviderError::InvalidToken(message),
        // INVALID_ARGUMENT 也可能是 payload 问题，只有提到 token 时才算 token 无效
        "INVALID_ARGUMENT" if message.to_lowercase().contains("registration token") => {
            return ProviderError::InvalidToken(message)
        }
        "QUOTA_EXCEEDED" => return ProviderError::RateLimited(retry_after),
        "UNAVAILABLE" | "INTERNAL" => return ProviderError::Unavailable(message),
        "THIRD_PARTY_AUTH_ERROR" | "UNAUTHENTICATED" | "PERMISSION_DENIED" => {
            return ProviderError::Auth(message)
        }
        _ => {}
    }

    match status {
        404 => ProviderError::Unregistered(message),
        429 => ProviderError::RateLimited(retry_after),
        401 | 403 => ProviderError::Auth(message),
        500..=599 => ProviderError::Unavailable(message),
        _ => ProviderError::Rejected { status, message },
    }
}

#[async_trait]
impl PushProvider for FcmProvider {
    async fn send(&self, message: &PushMessage) -> Result<(), ProviderError> {
        let access_token = self.tokens.access_token().await?;
        let payload = Self::build_fcm_payload(message);

        debug!(
            "[FCM] Sending push: priority={}, ttl={}s, data_keys={}",
            message.priority.as_str(),
            message.ttl_secs,
            message.data.len()
        );

        let response = self
            .client
            .post(self.send_url())
            .bearer_auth(access_token)
            .json(&payload)
            .send()
            .await?;

        let status = response.status();
        if status.is_success() {
            debug!("[FCM] Push accepted");
            return Ok(());
        }

        let retry_after = response
            .headers()
            .get(RETRY_AFTER)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse().ok());
        let error_text = response.text().await.unwrap_or_default();
        warn!(
            "[FCM] Push failed: status={}, error={}",
            status, error_text
        );

        Err(map_fcm_error(status.as_u16(), retry_after, &error_text))
    }

    fn name(&self) -> &'static str {
        "fcm"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::StaticTokenSource;
    use std::collections::HashMap;
    use wiremock::matchers::{body_partial_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn message(token: &str) -> PushMessage {
        let mut data = HashMap::new();
        data.insert("title".to_string(), "T".to_string());
        data.insert("body".to_string(), "B".to_string());
        PushMessage {
            token: token.to_string(),
            data,
            priority: Priority::High,
            ttl_secs: 600,
        }
    }

    fn provider(server: &MockServer) -> FcmProvider {
        FcmProvider::new(
            server.uri(),
            "demo",
            Arc::new(StaticTokenSource::new("fcm-token")),
        )
    }

    fn fcm_error(code: u16, status: &str, error_code: &str, message: &str) -> String {
        json!({
            "error": {
                "code": code,
                "message": message,
                "status": status,
                "details": [{
                    "@type": "type.googleapis.com/google.firebase.fcm.v1.FcmError",
                    "errorCode": error_code
                }]
            }
        })
        .to_string()
    }

    #[test]
    fn test_payload_is_data_only() {
        let payload = FcmProvider::build_fcm_payload(&message("tok"));
        let msg = &payload["message"];
        assert_eq!(msg["token"], "tok");
        assert!(msg.get("notification").is_none());
        assert_eq!(msg["data"]["title"], "T");
        assert_eq!(msg["android"]["priority"], "high");
        assert_eq!(msg["android"]["ttl"], "600s");
        assert_eq!(msg["apns"]["headers"]["apns-priority"], "10");
    }

    #[test]
    fn test_map_fcm_error_codes() {
        let body = fcm_error(404, "NOT_FOUND", "UNREGISTERED", "Requested entity was not found.");
        assert!(matches!(map_fcm_error(404, None, &body), ProviderError::Unregistered(_)));

        let body = fcm_error(
            400,
            "INVALID_ARGUMENT",
            "INVALID_ARGUMENT",
            "The registration token is not a valid FCM registration token",
        );
        assert!(matches!(map_fcm_error(400, None, &body), ProviderError::InvalidToken(_)));

        let body = fcm_error(400, "INVALID_ARGUMENT", "INVALID_ARGUMENT", "Invalid TTL value");
        assert!(matches!(
            map_fcm_error(400, None, &body),
            ProviderError::Rejected { status: 400, .. }
        ));

        let body = fcm_error(429, "RESOURCE_EXHAUSTED", "QUOTA_EXCEEDED", "quota");
        assert_eq!(map_fcm_error(429, Some(30), &body), ProviderError::RateLimited(Some(30)));

        let body = fcm_error(503, "UNAVAILABLE", "UNAVAILABLE", "try later");
        assert!(matches!(map_fcm_error(503, None, &body), ProviderError::Unavailable(_)));
    }

    #[test]
    fn test_map_fcm_error_falls_back_to_status() {
        assert!(matches!(map_fcm_error(502, None, "<html>"), ProviderError::Unavailable(_)));
        assert_eq!(map_fcm_error(429, None, ""), ProviderError::RateLimited(None));
        assert!(matches!(map_fcm_error(401, None, ""), ProviderError::Auth(_)));
        assert!(matches!(
            map_fcm_error(418, None, "teapot"),
            ProviderError::Rejected { status: 418, .. }
        ));
    }

    #[tokio::test]
    async fn test_send_success() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/projects/demo/messages:send"))
            .and(header("authorization", "Bearer fcm-token"))
            .and(body_partial_json(json!({"message": {"token": "tok"}})))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "name": "projects/demo/messages/0:1"
            })))
            .expect(1)
            .mount(&server)
            .await;

        provider(&server).send(&message("tok")).await.unwrap();
    }

    #[tokio::test]
    async fn test_send_unregistered() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(404).set_body_string(fcm_error(
                404,
                "NOT_FOUND",
                "UNREGISTERED",
                "Requested entity was not found.",
            )))
            .mount(&server)
            .await;

        let err = provider(&server).send(&message("stale")).await.unwrap_err();
        assert!(matches!(err, ProviderError::Unregistered(_)));
    }

    #[tokio::test]
    async fn test_send_rate_limited_reads_retry_after() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(429).insert_header("retry-after", "12"))
            .mount(&server)
            .await;

        let err = provider(&server).send(&message("tok")).await.unwrap_err();
        assert_eq!(err, ProviderError::RateLimited(Some(12)));
    }
}
