use std::sync::Arc;

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::{json, Map, Value};
use tracing::{debug, info, warn};

use crate::auth::AccessTokenSource;
use crate::error::DirectoryError;
use crate::repository::{DirectoryEntry, DirectoryReader, TokenDirectory};

const PAGE_SIZE: u32 = 300;

/// Firestore Token 目录
///
/// 使用 Firestore REST v1 API：
/// - 列表：`GET {documents}/{collection}`（分页）
/// - 按 token 查找：`POST {documents}:runQuery`（`ARRAY_CONTAINS`）
/// - 移除 token：`POST {documents}:commit`（`removeAllFromArray` 字段变换，天然幂等）
pub struct FirestoreDirectory {
    client: Client,
    endpoint: String,
    project_id: String,
    collection: String,
    tokens: Arc<dyn AccessTokenSource>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ListDocumentsResponse {
    #[serde(default)]
    documents: Vec<Document>,
    next_page_token: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Document {
    name: String,
    #[serde(default)]
    fields: Map<String, Value>,
}

#[derive(Debug, Deserialize)]
struct RunQueryItem {
    document: Option<Document>,
}

impl FirestoreDirectory {
    pub fn new(
        endpoint: impl Into<String>,
        project_id: impl Into<String>,
        collection: impl Into<String>,
        tokens: Arc<dyn AccessTokenSource>,
    ) -> Self {
        Self {
            client: Client::new(),
            endpoint: endpoint.into().trim_end_matches('/').to_string(),
            project_id: project_id.into(),
            collection: collection.into(),
            tokens,
        }
    }

    /// `projects/{p}/databases/(default)/documents`
    fn database_path(&self) -> String {
        format!("projects/{}/databases/(default)/documents", self.project_id)
    }

    fn documents_url(&self) -> String {
        format!("{}/{}", self.endpoint, self.database_path())
    }

    fn document_name(&self, entry_id: &str) -> String {
        format!("{}/{}/{}", self.database_path(), self.collection, entry_id)
    }

    async fn post_json(&self, url: &str, body: &Value) -> Result<reqwest::Response, DirectoryError> {
        let token = self.tokens.access_token().await?;
        let response = self
            .client
            .post(url)
            .bearer_auth(token)
            .json(body)
            .send()
            .await?;
        check_status(response).await
    }

    async fn list_page(&self, page_token: Option<&str>) -> Result<ListDocumentsResponse, DirectoryError> {
        let token = self.tokens.access_token().await?;
        let url = format!("{}/{}", self.documents_url(), self.collection);
        let page_size = PAGE_SIZE.to_string();

        let mut query: Vec<(&str, &str)> = vec![("pageSize", page_size.as_str())];
        if let Some(page_token) = page_token {
            query.push(("pageToken", page_token));
        }

        let response = self
            .client
            .get(&url)
            .bearer_auth(token)
            .query(&query)
            .send()
            .await?;

        Ok(check_status(response).await?.json().await?)
    }
}

async fn check_status(response: reqwest::Response) -> Result<reqwest::Response, DirectoryError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let body = response.text().await.unwrap_or_default();
    Err(match status.as_u16() {
        401 | 403 => DirectoryError::Auth(format!("status={}, body={}", status, body)),
        404 => DirectoryError::NotFound(body),
        // precondition `exists: true` 未满足
        400 if body.contains("FAILED_PRECONDITION") || body.contains("NOT_FOUND") => {
            DirectoryError::NotFound(body)
        }
        _ => DirectoryError::Unavailable(format!("status={}, body={}", status, body)),
    })
}

/// 将 Firestore 文档转换为目录条目
fn decode_document(doc: &Document) -> DirectoryEntry {
    let id = doc
        .name
        .rsplit('/')
        .next()
        .unwrap_or(doc.name.as_str())
        .to_string();

    let tokens = doc
        .fields
        .get("tokens")
        .and_then(|v| v.pointer("/arrayValue/values"))
        .and_then(Value::as_array)
        .map(|values| {
            values
                .iter()
                .filter_map(|v| v.get("stringValue").and_then(Value::as_str))
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default();

    let admin = doc
        .fields
        .get("admin")
        .and_then(|v| v.get("booleanValue"))
        .and_then(Value::as_bool)
        .unwrap_or(false);

    let display_name = doc
        .fields
        .get("displayName")
        .and_then(|v| v.get("stringValue"))
        .and_then(Value::as_str)
        .map(str::to_string);

    DirectoryEntry {
        id,
        tokens,
        admin,
        display_name,
    }
}

#[async_trait]
impl DirectoryReader for FirestoreDirectory {
    async fn list_entries(&self, admin_only: bool) -> Result<Vec<DirectoryEntry>, DirectoryError> {
        let mut entries = Vec::new();
        let mut page_token: Option<String> = None;

        loop {
            let page = self.list_page(page_token.as_deref()).await?;
            for doc in &page.documents {
                let entry = decode_document(doc);
                if admin_only && !entry.admin {
                    debug!("[DIRECTORY] Skipped non-admin entry: {}", entry.label());
                    continue;
                }
                entries.push(entry);
            }

            match page.next_page_token {
                Some(next) if !next.is_empty() => page_token = Some(next),
                _ => break,
            }
        }

        info!(
            "[DIRECTORY] Retrieved {} entries from collection '{}' (admin_only={})",
            entries.len(),
            self.collection,
            admin_only
        );
        Ok(entries)
    }
}

#[async_trait]
impl TokenDirectory for FirestoreDirectory {
    async fn remove_token(&self, entry_id: &str, token: &str) -> Result<(), DirectoryError> {
        let url = format!("{}:commit", self.documents_url());
        let body = json!({
            "writes": [{
                "transform": {
                    "document": self.document_name(entry_id),
                    "fieldTransforms": [{
                        "fieldPath": "tokens",
                        "removeAllFromArray": { "values": [{ "stringValue": token }] }
                    }]
                },
                "currentDocument": { "exists": true }
            }]
        });

        self.post_json(&url, &body).await?;
        info!("[DIRECTORY] Removed invalid token from entry {}", entry_id);
        Ok(())
    }

    async fn entries_containing(&self, token: &str) -> Result<Vec<String>, DirectoryError> {
        let url = format!("{}:runQuery", self.documents_url());
        let body = json!({
            "structuredQuery": {
                "from": [{ "collectionId": self.collection }],
                "where": {
                    "fieldFilter": {
                        "field": { "fieldPath": "tokens" },
                        "op": "ARRAY_CONTAINS",
                        "value": { "stringValue": token }
                    }
                }
            }
        });

        let items: Vec<RunQueryItem> = self.post_json(&url, &body).await?.json().await?;
        let ids: Vec<String> = items
            .iter()
            .filter_map(|item| item.document.as_ref())
            .map(|doc| decode_document(doc).id)
            .collect();

        if ids.is_empty() {
            warn!("[DIRECTORY] Token not found in any entry, nothing to prune");
        }
        Ok(ids)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::StaticTokenSource;
    use wiremock::matchers::{body_partial_json, header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const DOCS_PATH: &str = "/projects/demo/databases/(default)/documents";

    fn directory(server: &MockServer) -> FirestoreDirectory {
        FirestoreDirectory::new(
            server.uri(),
            "demo",
            "notification",
            Arc::new(StaticTokenSource::new("test-token")),
        )
    }

    fn doc(id: &str, tokens: &[&str], admin: Option<bool>) -> Value {
        let mut fields = json!({
            "tokens": {
                "arrayValue": {
                    "values": tokens.iter().map(|t| json!({"stringValue": t})).collect::<Vec<_>>()
                }
            },
            "displayName": {"stringValue": format!("user {}", id)}
        });
        if let Some(admin) = admin {
            fields["admin"] = json!({"booleanValue": admin});
        }
        json!({
            "name": format!("projects/demo/databases/(default)/documents/notification/{}", id),
            "fields": fields
        })
    }

    #[test]
    fn test_decode_document_defaults() {
        let doc = Document {
            name: "projects/demo/databases/(default)/documents/notification/u9".to_string(),
            fields: json!({"tokens": {"arrayValue": {}}}).as_object().cloned().unwrap(),
        };
        let entry = decode_document(&doc);
        assert_eq!(entry.id, "u9");
        assert!(entry.tokens.is_empty());
        assert!(!entry.admin);
        assert!(entry.display_name.is_none());
    }

    #[tokio::test]
    async fn test_list_entries_follows_pages_and_filters_admin() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path(format!("{}/notification", DOCS_PATH)))
            .and(query_param("pageToken", "p2"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "documents": [doc("u3", &["c"], Some(true))]
            })))
            .with_priority(1)
            .mount(&server)
            .await;

        Mock::given(method("GET"))
            .and(path(format!("{}/notification", DOCS_PATH)))
            .and(header("authorization", "Bearer test-token"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "documents": [doc("u1", &["a"], None), doc("u2", &["b"], Some(true))],
                "nextPageToken": "p2"
            })))
            .mount(&server)
            .await;

        let dir = directory(&server);

        let all = dir.list_entries(false).await.unwrap();
        let ids: Vec<_> = all.iter().map(|e| e.id.as_str()).collect();
        assert_eq!(ids, vec!["u1", "u2", "u3"]);
        assert!(!all[0].admin);

        let admins = dir.list_entries(true).await.unwrap();
        let ids: Vec<_> = admins.iter().map(|e| e.id.as_str()).collect();
        assert_eq!(ids, vec!["u2", "u3"]);
    }

    #[tokio::test]
    async fn test_list_entries_server_error_is_unavailable() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(503).set_body_string("backend down"))
            .mount(&server)
            .await;

        let err = directory(&server).list_entries(false).await.unwrap_err();
        assert!(matches!(err, DirectoryError::Unavailable(_)));
    }

    #[tokio::test]
    async fn test_remove_token_commits_array_transform() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path(format!("{}:commit", DOCS_PATH)))
            .and(body_partial_json(json!({
                "writes": [{
                    "transform": {
                        "document": "projects/demo/databases/(default)/documents/notification/u1",
                        "fieldTransforms": [{
                            "fieldPath": "tokens",
                            "removeAllFromArray": {"values": [{"stringValue": "z"}]}
                        }]
                    },
                    "currentDocument": {"exists": true}
                }]
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"writeResults": [{}]})))
            .expect(1)
            .mount(&server)
            .await;

        directory(&server).remove_token("u1", "z").await.unwrap();
    }

    #[tokio::test]
    async fn test_entries_containing_runs_array_contains_query() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path(format!("{}:runQuery", DOCS_PATH)))
            .and(body_partial_json(json!({
                "structuredQuery": {"where": {"fieldFilter": {"op": "ARRAY_CONTAINS"}}}
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([
                {"document": doc("u1", &["z"], None), "readTime": "2024-01-01T00:00:00Z"},
                {"document": doc("u4", &["z", "q"], Some(true)), "readTime": "2024-01-01T00:00:00Z"}
            ])))
            .mount(&server)
            .await;

        let ids = directory(&server).entries_containing("z").await.unwrap();
        assert_eq!(ids, vec!["u1".to_string(), "u4".to_string()]);
    }

    #[tokio::test]
    async fn test_entries_containing_empty_result() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path(format!("{}:runQuery", DOCS_PATH)))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([
                {"readTime": "2024-01-01T00:00:00Z"}
            ])))
            .mount(&server)
            .await;

        assert!(directory(&server).entries_containing("z").await.unwrap().is_empty());
    }
}
