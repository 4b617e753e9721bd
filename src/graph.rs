//! Microsoft Graph client for the SharePoint endpoints this tool uses.
//!
//! The resolver and lister only see the [`StorageApi`] trait; [`GraphClient`]
//! is its HTTP implementation. Every call fetches a bearer token from the
//! shared [`CredentialProvider`], which hands back the cached token while it
//! is valid.
//!
//! # Endpoints
//!
//! | Call | Request |
//! |------|---------|
//! | Site lookup | `GET /sites/{hostname}:{path}` |
//! | Libraries | `GET /sites/{site_id}/drives` |
//! | Folder lookup | `GET /drives/{drive}/root:/{path}` |
//! | Children | `GET /drives/{drive}/root/children`, `GET /drives/{drive}/items/{id}/children` |
//! | Download | `GET /drives/{drive}/items/{id}/content` |
//! | Site permissions | `GET`/`POST /sites/{site_id}/permissions`, `DELETE .../permissions/{id}` |
//!
//! Site permission calls are operator tooling (`spsum grant`); the
//! summarization run never issues them, but its own app-only calls only
//! succeed once such a grant exists.

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::io::Write;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

use crate::auth::CredentialProvider;
use crate::config::Config;
use crate::error::StorageError;

// ============ Wire types ============

#[derive(Debug, Clone, Deserialize)]
pub struct SiteRecord {
    /// Composite `hostname,siteGuid,webGuid`.
    pub id: String,
    #[serde(default, rename = "displayName")]
    pub display_name: Option<String>,
    #[serde(default, rename = "webUrl")]
    pub web_url: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DriveRecord {
    pub id: String,
    pub name: String,
}

#[derive(Debug, Clone, Deserialize)]
struct DriveList {
    #[serde(default)]
    value: Vec<DriveRecord>,
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct FolderFacet {
    #[serde(default, rename = "childCount")]
    pub child_count: Option<i64>,
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct FileFacet {
    #[serde(default, rename = "mimeType")]
    pub mime_type: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DriveItem {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub size: Option<u64>,
    #[serde(default)]
    pub folder: Option<FolderFacet>,
    #[serde(default)]
    pub file: Option<FileFacet>,
    #[serde(default, rename = "lastModifiedDateTime")]
    pub last_modified: Option<DateTime<Utc>>,
}

/// One page of a children listing.
#[derive(Debug, Clone, Deserialize)]
pub struct ChildrenPage {
    #[serde(default)]
    pub value: Vec<DriveItem>,
    #[serde(default, rename = "@odata.nextLink")]
    pub next_link: Option<String>,
}

/// Application identity inside a permission grant.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct GrantedApplication {
    pub id: String,
    #[serde(rename = "displayName", default)]
    pub display_name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct GrantedIdentity {
    pub application: GrantedApplication,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SitePermission {
    pub id: String,
    #[serde(default)]
    pub roles: Vec<String>,
    #[serde(default, rename = "grantedToIdentities")]
    pub granted_to_identities: Vec<GrantedIdentity>,
}

#[derive(Debug, Clone, Deserialize)]
struct PermissionList {
    #[serde(default)]
    value: Vec<SitePermission>,
}

#[derive(Debug, Serialize)]
struct PermissionRequest<'a> {
    roles: &'a [String],
    #[serde(rename = "grantedToIdentities")]
    granted_to_identities: Vec<GrantedIdentity>,
}

/// Roles a site permission grant may carry.
pub const SITE_ROLES: &[&str] = &["read", "write", "manage", "fullcontrol"];

// ============ Trait ============

/// The document-storage REST surface used by the pipeline.
#[async_trait]
pub trait StorageApi: Send + Sync {
    async fn get_site(&self, hostname: &str, path: &str) -> Result<SiteRecord, StorageError>;

    async fn list_drives(&self, site_id: &str) -> Result<Vec<DriveRecord>, StorageError>;

    /// Look up an item by its path relative to the drive root.
    async fn get_item_by_path(&self, drive_id: &str, path: &str)
        -> Result<DriveItem, StorageError>;

    /// Children of the drive root (`folder_id = None`) or of a folder.
    /// `page` is a `@odata.nextLink` from a previous page.
    async fn list_children(
        &self,
        drive_id: &str,
        folder_id: Option<&str>,
        page: Option<&str>,
    ) -> Result<ChildrenPage, StorageError>;

    /// Stream an item's content into `sink`, failing once more than `limit`
    /// bytes arrive. Returns the number of bytes written.
    async fn download(
        &self,
        drive_id: &str,
        item_id: &str,
        limit: u64,
        sink: &mut (dyn Write + Send),
    ) -> Result<u64, StorageError>;
}

// ============ HTTP implementation ============

pub struct GraphClient {
    http: reqwest::Client,
    base_url: String,
    credentials: Arc<CredentialProvider>,
}

impl GraphClient {
    pub fn new(config: &Config, credentials: Arc<CredentialProvider>) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.graph.timeout_secs))
            .build()?;
        Ok(Self {
            http,
            base_url: config.graph.base_url.trim_end_matches('/').to_string(),
            credentials,
        })
    }

    async fn send(&self, req: reqwest::RequestBuilder) -> Result<reqwest::Response, StorageError> {
        let token = self.credentials.get_token().await?;
        let resp = req
            .bearer_auth(token.bearer())
            .header(reqwest::header::ACCEPT, "application/json")
            .send()
            .await
            .map_err(|e| StorageError::Transport(e.to_string()))?;
        check_status(resp).await
    }

    async fn get_json<T: DeserializeOwned>(&self, url: &str) -> Result<T, StorageError> {
        debug!(url, "GET");
        let resp = self.send(self.http.get(url)).await?;
        resp.json::<T>()
            .await
            .map_err(|e| StorageError::Malformed(e.to_string()))
    }

    /// `GET /sites/{site_id}/permissions`.
    pub async fn list_permissions(
        &self,
        site_id: &str,
    ) -> Result<Vec<SitePermission>, StorageError> {
        let url = format!("{}/sites/{}/permissions", self.base_url, site_id);
        let list: PermissionList = self.get_json(&url).await?;
        Ok(list.value)
    }

    /// `POST /sites/{site_id}/permissions` granting `roles` to an application.
    pub async fn grant_permission(
        &self,
        site_id: &str,
        roles: &[String],
        app_id: &str,
        display_name: &str,
    ) -> Result<SitePermission, StorageError> {
        let url = format!("{}/sites/{}/permissions", self.base_url, site_id);
        let body = PermissionRequest {
            roles,
            granted_to_identities: vec![GrantedIdentity {
                application: GrantedApplication {
                    id: app_id.to_string(),
                    display_name: display_name.to_string(),
                },
            }],
        };
        debug!(url = %url, app_id, ?roles, "POST permission");
        let resp = self.send(self.http.post(&url).json(&body)).await?;
        resp.json::<SitePermission>()
            .await
            .map_err(|e| StorageError::Malformed(e.to_string()))
    }

    /// `DELETE /sites/{site_id}/permissions/{permission_id}`.
    pub async fn delete_permission(
        &self,
        site_id: &str,
        permission_id: &str,
    ) -> Result<(), StorageError> {
        let url = format!(
            "{}/sites/{}/permissions/{}",
            self.base_url,
            site_id,
            encode_segment(permission_id)
        );
        debug!(url = %url, "DELETE permission");
        self.send(self.http.delete(&url)).await?;
        Ok(())
    }
}

#[async_trait]
impl StorageApi for GraphClient {
    async fn get_site(&self, hostname: &str, path: &str) -> Result<SiteRecord, StorageError> {
        let url = format!(
            "{}/sites/{}:{}",
            self.base_url,
            hostname,
            encode_path(path, true)
        );
        self.get_json(&url).await
    }

    async fn list_drives(&self, site_id: &str) -> Result<Vec<DriveRecord>, StorageError> {
        let url = format!("{}/sites/{}/drives", self.base_url, site_id);
        let list: DriveList = self.get_json(&url).await?;
        Ok(list.value)
    }

    async fn get_item_by_path(
        &self,
        drive_id: &str,
        path: &str,
    ) -> Result<DriveItem, StorageError> {
        let url = format!(
            "{}/drives/{}/root:{}",
            self.base_url,
            drive_id,
            encode_path(path, true)
        );
        self.get_json(&url).await
    }

    async fn list_children(
        &self,
        drive_id: &str,
        folder_id: Option<&str>,
        page: Option<&str>,
    ) -> Result<ChildrenPage, StorageError> {
        let url = match (page, folder_id) {
            (Some(next), _) => next.to_string(),
            (None, Some(id)) => format!(
                "{}/drives/{}/items/{}/children",
                self.base_url,
                drive_id,
                encode_segment(id)
            ),
            (None, None) => format!("{}/drives/{}/root/children", self.base_url, drive_id),
        };
        self.get_json(&url).await
    }

    async fn download(
        &self,
        drive_id: &str,
        item_id: &str,
        limit: u64,
        sink: &mut (dyn Write + Send),
    ) -> Result<u64, StorageError> {
        let url = format!(
            "{}/drives/{}/items/{}/content",
            self.base_url,
            drive_id,
            encode_segment(item_id)
        );
        debug!(url = %url, "GET content");
        let mut resp = self.send(self.http.get(&url)).await?;

        let mut written: u64 = 0;
        while let Some(chunk) = resp
            .chunk()
            .await
            .map_err(|e| StorageError::Transport(e.to_string()))?
        {
            written += chunk.len() as u64;
            if written > limit {
                return Err(StorageError::TooLarge {
                    received: written,
                    limit,
                });
            }
            sink.write_all(&chunk)
                .map_err(|e| StorageError::Transport(e.to_string()))?;
        }
        sink.flush()
            .map_err(|e| StorageError::Transport(e.to_string()))?;
        Ok(written)
    }
}

/// Turn a non-success response into [`StorageError::Status`], preferring the
/// Graph `error.message` over the raw body.
async fn check_status(resp: reqwest::Response) -> Result<reqwest::Response, StorageError> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }
    let body = resp.text().await.unwrap_or_default();
    Err(StorageError::Status {
        status: status.as_u16(),
        message: graph_error_message(&body),
    })
}

fn graph_error_message(body: &str) -> String {
    #[derive(Deserialize)]
    struct Envelope {
        error: Inner,
    }
    #[derive(Deserialize)]
    struct Inner {
        #[serde(default)]
        code: String,
        #[serde(default)]
        message: String,
    }

    match serde_json::from_str::<Envelope>(body) {
        Ok(env) if !env.error.code.is_empty() => {
            format!("{}: {}", env.error.code, env.error.message)
        }
        Ok(env) => env.error.message,
        Err(_) => body.chars().take(500).collect(),
    }
}

/// Percent-encode a path segment per RFC 3986, leaving unreserved
/// characters (`A-Z a-z 0-9 - _ . ~`) as is.
pub fn encode_segment(s: &str) -> String {
    let mut result = String::new();
    for byte in s.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => {
                result.push(byte as char);
            }
            _ => {
                result.push_str(&format!("%{:02X}", byte));
            }
        }
    }
    result
}

/// Encode each `/`-separated segment, dropping empty ones. With
/// `leading_slash` the result starts with `/` (or is empty).
pub fn encode_path(path: &str, leading_slash: bool) -> String {
    let joined = path
        .split('/')
        .filter(|seg| !seg.is_empty())
        .map(encode_segment)
        .collect::<Vec<_>>()
        .join("/");
    if leading_slash && !joined.is_empty() {
        format!("/{}", joined)
    } else {
        joined
    }
}
