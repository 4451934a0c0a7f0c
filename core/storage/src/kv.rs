//! Versioned KV secret store over HTTP.
//!
//! Speaks the KV version 2 secrets-engine API:
//!
//! | Operation | Request |
//! |---|---|
//! | get | `GET /v1/{mount}/data/{path}` |
//! | put | `POST /v1/{mount}/data/{path}` with `{"options": {"cas": n}, "data": ...}` |
//! | delete | `DELETE /v1/{mount}/data/{path}` |
//! | destroy | `DELETE /v1/{mount}/metadata/{path}` |
//! | list | `GET /v1/{mount}/metadata/{path}?list=true` |

use async_trait::async_trait;
use reqwest::{Client, Method, RequestBuilder, Response, StatusCode};
use serde::Deserialize;
use serde_json::{json, Value};
use std::fmt;
use tracing::debug;
use url::Url;

use crate::store::{SecretStore, Versioned, WriteGuard};
use keybundle_common::{Error, Result, StorePath};

const TOKEN_HEADER: &str = "X-Vault-Token";

#[derive(Debug, Deserialize)]
struct ReadResponse {
    data: ReadData,
}

#[derive(Debug, Deserialize)]
struct ReadData {
    data: Option<Value>,
    metadata: VersionMetadata,
}

#[derive(Debug, Deserialize)]
struct VersionMetadata {
    version: u64,
    #[serde(default)]
    deletion_time: String,
    #[serde(default)]
    destroyed: bool,
}

#[derive(Debug, Deserialize)]
struct WriteResponse {
    data: VersionMetadata,
}

#[derive(Debug, Deserialize)]
struct ListResponse {
    data: ListData,
}

#[derive(Debug, Deserialize)]
struct ListData {
    keys: Vec<String>,
}

/// Secret store backed by a remote KV v2 engine.
pub struct KvStore {
    http: Client,
    base: Url,
    mount: String,
    token: String,
}

impl KvStore {
    /// Create a store for one mount of the engine at `address`.
    ///
    /// # Errors
    /// - `InvalidInput` if the address is not a URL or the mount is empty
    /// - `Transient` if the HTTP client cannot be built
    pub fn new(address: &str, mount: &str, token: impl Into<String>) -> Result<Self> {
        let mut base = Url::parse(address)
            .map_err(|e| Error::InvalidInput(format!("Invalid store address: {}", e)))?;
        if !base.path().ends_with('/') {
            let path = format!("{}/", base.path());
            base.set_path(&path);
        }

        let mount = mount.trim_matches('/').to_string();
        if mount.is_empty() {
            return Err(Error::InvalidInput("Mount cannot be empty".to_string()));
        }

        let http = Client::builder()
            .user_agent("keybundle/0.1")
            .build()
            .map_err(|e| Error::Transient(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            http,
            base,
            mount,
            token: token.into(),
        })
    }

    /// Mount name, also used as the 2SKD account scope.
    pub fn mount(&self) -> &str {
        &self.mount
    }

    fn url(&self, section: &str, path: &StorePath) -> Result<Url> {
        self.base
            .join(&format!("v1/{}/{}/{}", self.mount, section, path))
            .map_err(|e| Error::InvalidInput(format!("Invalid store path {}: {}", path, e)))
    }

    fn request(&self, method: Method, section: &str, path: &StorePath) -> Result<RequestBuilder> {
        Ok(self
            .http
            .request(method, self.url(section, path)?)
            .header(TOKEN_HEADER, &self.token))
    }

    fn read_request(&self, path: &StorePath) -> Result<RequestBuilder> {
        self.request(Method::GET, "data", path)
    }

    fn write_request(&self, path: &StorePath, data: Value, guard: WriteGuard) -> Result<RequestBuilder> {
        let body = json!({
            "options": { "cas": guard.cas() },
            "data": data,
        });
        Ok(self.request(Method::POST, "data", path)?.json(&body))
    }

    fn delete_request(&self, path: &StorePath) -> Result<RequestBuilder> {
        self.request(Method::DELETE, "data", path)
    }

    fn destroy_request(&self, path: &StorePath) -> Result<RequestBuilder> {
        self.request(Method::DELETE, "metadata", path)
    }

    fn list_request(&self, prefix: &StorePath) -> Result<RequestBuilder> {
        Ok(self
            .request(Method::GET, "metadata", prefix)?
            .query(&[("list", "true")]))
    }

    async fn send(&self, request: RequestBuilder, path: &StorePath) -> Result<Response> {
        let response = request
            .send()
            .await
            .map_err(|e| Error::Transient(format!("Request for {} failed: {}", path, e)))?;

        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        Err(status_error(status, &body, path))
    }
}

impl fmt::Debug for KvStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KvStore")
            .field("base", &self.base.as_str())
            .field("mount", &self.mount)
            .field("token", &"[REDACTED]")
            .finish()
    }
}

/// Map a non-success status onto the error taxonomy.
fn status_error(status: StatusCode, body: &str, path: &StorePath) -> Error {
    match status {
        StatusCode::NOT_FOUND => Error::NotFound(format!("Key not found: {}", path)),
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
            Error::NoAccess(format!("Store denied access to {}", path))
        }
        StatusCode::BAD_REQUEST if body.contains("check-and-set") => Error::Conflict(format!(
            "Check-and-set mismatch on {}",
            path
        )),
        StatusCode::TOO_MANY_REQUESTS => Error::Transient(format!("Rate limited on {}", path)),
        s if s.is_server_error() => {
            Error::Transient(format!("Store error {} on {}: {}", s, path, body))
        }
        s => Error::InvalidInput(format!("Store rejected request {} on {}: {}", s, path, body)),
    }
}

fn parse_read(body: Value, path: &StorePath) -> Result<Versioned> {
    let response: ReadResponse = serde_json::from_value(body)
        .map_err(|e| Error::Corrupt(format!("Malformed read response for {}: {}", path, e)))?;
    let meta = response.data.metadata;

    if meta.destroyed || !meta.deletion_time.is_empty() {
        return Err(Error::NotFound(format!("{} is deleted", path)));
    }
    let data = response
        .data
        .data
        .ok_or_else(|| Error::NotFound(format!("{} has no data", path)))?;

    Ok(Versioned {
        data,
        version: meta.version,
    })
}

fn parse_write(body: Value, path: &StorePath) -> Result<u64> {
    let response: WriteResponse = serde_json::from_value(body)
        .map_err(|e| Error::Corrupt(format!("Malformed write response for {}: {}", path, e)))?;
    Ok(response.data.version)
}

fn parse_list(body: Value, path: &StorePath) -> Result<Vec<String>> {
    let response: ListResponse = serde_json::from_value(body)
        .map_err(|e| Error::Corrupt(format!("Malformed list response for {}: {}", path, e)))?;
    Ok(response.data.keys)
}

async fn json_body(response: Response, path: &StorePath) -> Result<Value> {
    response
        .json()
        .await
        .map_err(|e| Error::Corrupt(format!("Unreadable response for {}: {}", path, e)))
}

#[async_trait]
impl SecretStore for KvStore {
    fn name(&self) -> &str {
        "kv"
    }

    async fn get(&self, path: &StorePath) -> Result<Versioned> {
        let response = self.send(self.read_request(path)?, path).await?;
        parse_read(json_body(response, path).await?, path)
    }

    async fn put(&self, path: &StorePath, data: Value, guard: WriteGuard) -> Result<u64> {
        let response = self.send(self.write_request(path, data, guard)?, path).await?;
        let version = parse_write(json_body(response, path).await?, path)?;

        debug!(path = %path, version, "Wrote secret");
        Ok(version)
    }

    async fn delete(&self, path: &StorePath) -> Result<()> {
        self.send(self.delete_request(path)?, path).await?;
        Ok(())
    }

    async fn destroy(&self, path: &StorePath) -> Result<()> {
        self.send(self.destroy_request(path)?, path).await?;
        Ok(())
    }

    async fn list(&self, prefix: &StorePath) -> Result<Vec<String>> {
        match self.send(self.list_request(prefix)?, prefix).await {
            Ok(response) => parse_list(json_body(response, prefix).await?, prefix),
            Err(Error::NotFound(_)) => Ok(Vec::new()),
            Err(e) => Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn path() -> StorePath {
        StorePath::parse("bundles/b1/metadata").unwrap()
    }

    #[test]
    fn test_url_layout() {
        let store = KvStore::new("https://vault.example.com:8200", "/pwmanager/", "t").unwrap();
        assert_eq!(store.mount(), "pwmanager");
        assert_eq!(
            store.url("data", &path()).unwrap().as_str(),
            "https://vault.example.com:8200/v1/pwmanager/data/bundles/b1/metadata"
        );
        assert_eq!(
            store.url("metadata", &path()).unwrap().as_str(),
            "https://vault.example.com:8200/v1/pwmanager/metadata/bundles/b1/metadata"
        );
    }

    #[test]
    fn test_url_keeps_address_prefix() {
        let store = KvStore::new("http://localhost/proxy", "kv", "t").unwrap();
        assert_eq!(
            store.url("data", &path()).unwrap().as_str(),
            "http://localhost/proxy/v1/kv/data/bundles/b1/metadata"
        );
    }

    fn store() -> KvStore {
        KvStore::new("http://localhost:8200", "kv", "s.token").unwrap()
    }

    fn body_of(request: &reqwest::Request) -> Value {
        serde_json::from_slice(request.body().unwrap().as_bytes().unwrap()).unwrap()
    }

    #[test]
    fn test_write_request_carries_cas() {
        let store = store();
        let data = json!({"ciphertext": "ab", "iv": "cd"});

        let create = store
            .write_request(&path(), data.clone(), WriteGuard::CreateOnly)
            .unwrap()
            .build()
            .unwrap();
        assert_eq!(create.method(), &Method::POST);
        assert_eq!(
            create.url().as_str(),
            "http://localhost:8200/v1/kv/data/bundles/b1/metadata"
        );
        assert_eq!(create.headers()[TOKEN_HEADER], "s.token");
        let body = body_of(&create);
        assert_eq!(body["options"]["cas"], 0);
        assert_eq!(body["data"], data);

        let update = store
            .write_request(&path(), data, WriteGuard::expecting(3))
            .unwrap()
            .build()
            .unwrap();
        assert_eq!(body_of(&update)["options"]["cas"], 3);
    }

    #[test]
    fn test_read_delete_destroy_list_requests() {
        let store = store();
        let p = path();

        let read = store.read_request(&p).unwrap().build().unwrap();
        assert_eq!(read.method(), &Method::GET);
        assert_eq!(read.url().path(), "/v1/kv/data/bundles/b1/metadata");
        assert_eq!(read.headers()[TOKEN_HEADER], "s.token");

        // Soft delete hits the data section, destroy the metadata section.
        let delete = store.delete_request(&p).unwrap().build().unwrap();
        assert_eq!(delete.method(), &Method::DELETE);
        assert_eq!(delete.url().path(), "/v1/kv/data/bundles/b1/metadata");
        let destroy = store.destroy_request(&p).unwrap().build().unwrap();
        assert_eq!(destroy.method(), &Method::DELETE);
        assert_eq!(destroy.url().path(), "/v1/kv/metadata/bundles/b1/metadata");
        assert_eq!(destroy.headers()[TOKEN_HEADER], "s.token");

        let prefix = StorePath::parse("bundles/b1/entries").unwrap();
        let list = store.list_request(&prefix).unwrap().build().unwrap();
        assert_eq!(list.method(), &Method::GET);
        assert_eq!(list.url().path(), "/v1/kv/metadata/bundles/b1/entries");
        assert_eq!(list.url().query(), Some("list=true"));
    }

    #[test]
    fn test_rejects_bad_config() {
        assert!(KvStore::new("not a url", "kv", "t").is_err());
        assert!(KvStore::new("http://localhost", "/", "t").is_err());
    }

    #[test]
    fn test_debug_redacts_token() {
        let store = KvStore::new("http://localhost", "kv", "s.secrettoken").unwrap();
        assert!(!format!("{:?}", store).contains("secrettoken"));
    }

    #[test]
    fn test_status_mapping() {
        let p = path();
        assert!(matches!(
            status_error(StatusCode::NOT_FOUND, "", &p),
            Error::NotFound(_)
        ));
        assert!(matches!(
            status_error(StatusCode::FORBIDDEN, "permission denied", &p),
            Error::NoAccess(_)
        ));
        assert!(status_error(
            StatusCode::BAD_REQUEST,
            r#"{"errors":["check-and-set parameter did not match the current version"]}"#,
            &p
        )
        .is_conflict());
        assert!(matches!(
            status_error(StatusCode::BAD_REQUEST, "bad json", &p),
            Error::InvalidInput(_)
        ));
        assert!(status_error(StatusCode::SERVICE_UNAVAILABLE, "sealed", &p).is_retryable());
        assert!(status_error(StatusCode::TOO_MANY_REQUESTS, "", &p).is_retryable());
    }

    #[test]
    fn test_parse_read() {
        let body = json!({
            "data": {
                "data": {"ciphertext": "ab", "iv": "cd"},
                "metadata": {"version": 4, "deletion_time": "", "destroyed": false}
            }
        });
        let doc = parse_read(body, &path()).unwrap();
        assert_eq!(doc.version, 4);
        assert_eq!(doc.data["ciphertext"], "ab");
    }

    #[test]
    fn test_parse_read_of_deleted_version() {
        let body = json!({
            "data": {
                "data": null,
                "metadata": {"version": 2, "deletion_time": "2024-01-01T00:00:00Z", "destroyed": false}
            }
        });
        assert!(matches!(parse_read(body, &path()), Err(Error::NotFound(_))));
        assert!(matches!(
            parse_read(json!({"data": 1}), &path()),
            Err(Error::Corrupt(_))
        ));
    }

    #[test]
    fn test_parse_write_and_list() {
        let written = json!({"data": {"version": 7, "created_time": "2024-01-01T00:00:00Z"}});
        assert_eq!(parse_write(written, &path()).unwrap(), 7);

        let listed = json!({"data": {"keys": ["info", "keys/"]}});
        assert_eq!(parse_list(listed, &path()).unwrap(), vec!["info", "keys/"]);
    }
}
