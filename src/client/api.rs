//! HTTP client for the vault server.
//!
//! Thin typed wrapper over reqwest. Every method takes the session token
//! explicitly; the caller owns login state. Errors split into three
//! camps so the shell can word things sensibly: the server was never
//! reached, the server said no, or the server answered garbage.

use std::time::Duration;

use serde::Deserialize;
use serde_json::Value;

use crate::model::{
    AuthRequest, CollectionKind, DeleteRequest, DeviceRequest, Metadata, Record, StoreRequest,
    SyncBundle, UpdateRequest,
};

/// How long any single request may take end to end.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// What went wrong talking to the server.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    /// The server could not be reached at all.
    #[error("cannot reach server: {0}")]
    Connect(reqwest::Error),
    /// The server answered with a non-success status.
    #[error("server rejected the request ({status}): {message}")]
    Rejected {
        status: reqwest::StatusCode,
        message: String,
    },
    /// The response body did not parse as expected.
    #[error("malformed server response: {0}")]
    Malformed(reqwest::Error),
}

pub type ApiResult<T> = Result<T, ApiError>;

#[derive(Debug, Deserialize)]
struct SessionResponse {
    token: String,
}

#[derive(Debug, Deserialize)]
struct StoredResponse {
    id: String,
}

/// Typed client for the vault's HTTP API.
pub struct ApiClient {
    http: reqwest::Client,
    base_url: String,
}

impl ApiClient {
    pub fn new(base_url: &str) -> anyhow::Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()?;

        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    /// Base URL this client talks to, without a trailing slash.
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    fn store_url(&self, kind: CollectionKind) -> String {
        self.url(&format!("/api/store/{}", kind.as_str()))
    }

    /// Turn a non-success response into a [`ApiError::Rejected`],
    /// preferring the server's `error` field over the raw body.
    async fn rejection(resp: reqwest::Response) -> ApiError {
        let status = resp.status();
        let body = resp.text().await.unwrap_or_default();
        let message = serde_json::from_str::<Value>(&body)
            .ok()
            .and_then(|v| v.get("error").and_then(|e| e.as_str()).map(str::to_string))
            .unwrap_or(body);
        ApiError::Rejected { status, message }
    }

    /// Check if the server is reachable.
    pub async fn ping(&self) -> bool {
        matches!(
            self.http.get(self.url("/api/ping")).send().await,
            Ok(resp) if resp.status().is_success()
        )
    }

    // ── Accounts ────────────────────────────────────────────────

    /// Create an account. Returns a fresh session token.
    pub async fn register_user(&self, username: &str, password: &str) -> ApiResult<String> {
        let resp = self
            .http
            .put(self.url("/api/user/register"))
            .json(&AuthRequest {
                username: username.to_string(),
                password: password.to_string(),
            })
            .send()
            .await
            .map_err(ApiError::Connect)?;

        if !resp.status().is_success() {
            return Err(Self::rejection(resp).await);
        }
        let session: SessionResponse = resp.json().await.map_err(ApiError::Malformed)?;
        Ok(session.token)
    }

    /// Log in. Returns a session token.
    pub async fn login(&self, username: &str, password: &str) -> ApiResult<String> {
        let resp = self
            .http
            .put(self.url("/api/user/login"))
            .json(&AuthRequest {
                username: username.to_string(),
                password: password.to_string(),
            })
            .send()
            .await
            .map_err(ApiError::Connect)?;

        if !resp.status().is_success() {
            return Err(Self::rejection(resp).await);
        }
        let session: SessionResponse = resp.json().await.map_err(ApiError::Malformed)?;
        Ok(session.token)
    }

    // ── Records ─────────────────────────────────────────────────

    /// Fetch all records in one collection.
    pub async fn pull(&self, token: &str, kind: CollectionKind) -> ApiResult<Vec<Record>> {
        let resp = self
            .http
            .get(self.store_url(kind))
            .bearer_auth(token)
            .send()
            .await
            .map_err(ApiError::Connect)?;

        if !resp.status().is_success() {
            return Err(Self::rejection(resp).await);
        }
        resp.json().await.map_err(ApiError::Malformed)
    }

    /// Fetch every collection into one bundle.
    pub async fn pull_all(&self, token: &str) -> ApiResult<SyncBundle> {
        let mut bundle = SyncBundle::default();
        for kind in CollectionKind::ALL {
            *bundle.collection_mut(kind) = self.pull(token, kind).await?;
        }
        Ok(bundle)
    }

    /// Store a new record. Returns the server-assigned id.
    pub async fn add_record(
        &self,
        token: &str,
        kind: CollectionKind,
        data: Value,
        metadata: Metadata,
    ) -> ApiResult<String> {
        let resp = self
            .http
            .put(self.store_url(kind))
            .bearer_auth(token)
            .json(&StoreRequest { data, metadata })
            .send()
            .await
            .map_err(ApiError::Connect)?;

        if !resp.status().is_success() {
            return Err(Self::rejection(resp).await);
        }
        let stored: StoredResponse = resp.json().await.map_err(ApiError::Malformed)?;
        Ok(stored.id)
    }

    /// Replace an existing record's data and metadata.
    pub async fn update_record(
        &self,
        token: &str,
        kind: CollectionKind,
        record_id: &str,
        data: Value,
        metadata: Metadata,
    ) -> ApiResult<()> {
        let resp = self
            .http
            .post(self.store_url(kind))
            .bearer_auth(token)
            .json(&UpdateRequest {
                record_id: record_id.to_string(),
                data,
                metadata,
            })
            .send()
            .await
            .map_err(ApiError::Connect)?;

        if !resp.status().is_success() {
            return Err(Self::rejection(resp).await);
        }
        Ok(())
    }

    /// Delete a record by id.
    pub async fn delete_record(
        &self,
        token: &str,
        kind: CollectionKind,
        record_id: &str,
    ) -> ApiResult<()> {
        let resp = self
            .http
            .delete(self.store_url(kind))
            .bearer_auth(token)
            .json(&DeleteRequest {
                record_id: record_id.to_string(),
            })
            .send()
            .await
            .map_err(ApiError::Connect)?;

        if !resp.status().is_success() {
            return Err(Self::rejection(resp).await);
        }
        Ok(())
    }

    // ── Device fan-out ──────────────────────────────────────────

    /// Tell the server where this device listens for change signals.
    pub async fn register_device(&self, token: &str, socket_addr: &str) -> ApiResult<()> {
        let resp = self
            .http
            .post(self.url("/api/sync/register"))
            .bearer_auth(token)
            .json(&DeviceRequest {
                socket_addr: socket_addr.to_string(),
            })
            .send()
            .await
            .map_err(ApiError::Connect)?;

        if !resp.status().is_success() {
            return Err(Self::rejection(resp).await);
        }
        Ok(())
    }

    /// Remove this device's listener address from the server.
    pub async fn unregister_device(&self, token: &str, socket_addr: &str) -> ApiResult<()> {
        let resp = self
            .http
            .post(self.url("/api/sync/unregister"))
            .bearer_auth(token)
            .json(&DeviceRequest {
                socket_addr: socket_addr.to_string(),
            })
            .send()
            .await
            .map_err(ApiError::Connect)?;

        if !resp.status().is_success() {
            return Err(Self::rejection(resp).await);
        }
        Ok(())
    }
}

// ── Tests ────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{body_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[test]
    fn base_url_trailing_slash_is_trimmed() {
        let client = ApiClient::new("http://localhost:8080/").unwrap();
        assert_eq!(client.base_url(), "http://localhost:8080");
        assert_eq!(client.url("/api/ping"), "http://localhost:8080/api/ping");
        assert_eq!(
            client.store_url(CollectionKind::Card),
            "http://localhost:8080/api/store/cards"
        );
    }

    #[tokio::test]
    async fn ping_reports_a_live_server() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/ping"))
            .respond_with(ResponseTemplate::new(200).set_body_string("pong"))
            .expect(1)
            .mount(&server)
            .await;

        let client = ApiClient::new(&server.uri()).unwrap();
        assert!(client.ping().await);
    }

    #[tokio::test]
    async fn ping_is_false_when_nothing_listens() {
        let client = ApiClient::new("http://127.0.0.1:9").unwrap();
        assert!(!client.ping().await);
    }

    #[tokio::test]
    async fn login_sends_put_and_returns_token() {
        let server = MockServer::start().await;
        Mock::given(method("PUT"))
            .and(path("/api/user/login"))
            .and(body_json(json!({"username": "alice", "password": "pw12345678"})))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "status": "authenticated",
                "username": "alice",
                "token": "tok-abc",
            })))
            .expect(1)
            .mount(&server)
            .await;

        let client = ApiClient::new(&server.uri()).unwrap();
        let token = client.login("alice", "pw12345678").await.unwrap();
        assert_eq!(token, "tok-abc");
    }

    #[tokio::test]
    async fn register_conflict_surfaces_the_server_message() {
        let server = MockServer::start().await;
        Mock::given(method("PUT"))
            .and(path("/api/user/register"))
            .respond_with(
                ResponseTemplate::new(409)
                    .set_body_json(json!({"error": "Username 'alice' is already taken"})),
            )
            .mount(&server)
            .await;

        let client = ApiClient::new(&server.uri()).unwrap();
        let err = client.register_user("alice", "pw12345678").await.unwrap_err();
        match err {
            ApiError::Rejected { status, message } => {
                assert_eq!(status.as_u16(), 409);
                assert!(message.contains("already taken"));
            }
            other => panic!("expected Rejected, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn pull_sends_bearer_token_and_parses_records() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/store/text"))
            .and(header("authorization", "Bearer tok-abc"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([{
                "id": "11111111-1111-4111-8111-111111111111",
                "username": "alice",
                "data": "hello",
                "metadata": {"label": "greeting"},
            }])))
            .expect(1)
            .mount(&server)
            .await;

        let client = ApiClient::new(&server.uri()).unwrap();
        let records = client.pull("tok-abc", CollectionKind::Text).await.unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].data, json!("hello"));
        assert_eq!(records[0].metadata.get("label").unwrap(), "greeting");
    }

    #[tokio::test]
    async fn pull_all_gathers_every_collection() {
        let server = MockServer::start().await;
        for (name, data) in [
            ("text", json!("note")),
            ("binary", json!("aGk=")),
            ("cards", json!({"number": "4111"})),
            ("credentials", json!({"login": "alice"})),
        ] {
            Mock::given(method("GET"))
                .and(path(format!("/api/store/{name}")))
                .respond_with(ResponseTemplate::new(200).set_body_json(json!([{
                    "id": format!("id-{name}"),
                    "username": "alice",
                    "data": data,
                }])))
                .mount(&server)
                .await;
        }

        let client = ApiClient::new(&server.uri()).unwrap();
        let bundle = client.pull_all("tok-abc").await.unwrap();
        assert_eq!(bundle.len(), 4);
        assert_eq!(bundle.text[0].id, "id-text");
        assert_eq!(bundle.cards[0].id, "id-cards");
    }

    #[tokio::test]
    async fn add_record_sends_put_with_data_and_metadata() {
        let server = MockServer::start().await;
        Mock::given(method("PUT"))
            .and(path("/api/store/credentials"))
            .and(body_json(json!({
                "data": {"login": "alice", "password": "pw"},
                "metadata": {"site": "example.com"},
            })))
            .respond_with(ResponseTemplate::new(202).set_body_json(json!({
                "status": "stored",
                "collection": "credentials",
                "id": "new-id",
            })))
            .expect(1)
            .mount(&server)
            .await;

        let client = ApiClient::new(&server.uri()).unwrap();
        let id = client
            .add_record(
                "tok-abc",
                CollectionKind::Credential,
                json!({"login": "alice", "password": "pw"}),
                [("site".to_string(), "example.com".to_string())]
                    .into_iter()
                    .collect(),
            )
            .await
            .unwrap();
        assert_eq!(id, "new-id");
    }

    #[tokio::test]
    async fn delete_sends_delete_with_record_id() {
        let server = MockServer::start().await;
        Mock::given(method("DELETE"))
            .and(path("/api/store/text"))
            .and(body_json(json!({"record_id": "id-1"})))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"status": "deleted"})))
            .expect(1)
            .mount(&server)
            .await;

        let client = ApiClient::new(&server.uri()).unwrap();
        client
            .delete_record("tok-abc", CollectionKind::Text, "id-1")
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn device_registration_posts_the_socket_addr() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/sync/register"))
            .and(body_json(json!({"socket_addr": "127.0.0.1:4123"})))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"status": "registered"})))
            .expect(1)
            .mount(&server)
            .await;

        let client = ApiClient::new(&server.uri()).unwrap();
        client
            .register_device("tok-abc", "127.0.0.1:4123")
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn unreachable_server_is_a_connect_error() {
        // Nothing listens on this port.
        let client = ApiClient::new("http://127.0.0.1:9").unwrap();
        let err = client.login("alice", "pw12345678").await.unwrap_err();
        assert!(matches!(err, ApiError::Connect(_)));
    }

    #[tokio::test]
    async fn garbage_body_is_a_malformed_error() {
        let server = MockServer::start().await;
        Mock::given(method("PUT"))
            .and(path("/api/user/login"))
            .respond_with(ResponseTemplate::new(200).set_body_string("not json"))
            .mount(&server)
            .await;

        let client = ApiClient::new(&server.uri()).unwrap();
        let err = client.login("alice", "pw12345678").await.unwrap_err();
        assert!(matches!(err, ApiError::Malformed(_)));
    }
}
