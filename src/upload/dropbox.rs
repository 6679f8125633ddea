//! Dropbox HTTP transport.
//!
//! Content endpoints take their JSON arguments in the `Dropbox-API-Arg`
//! header and the raw bytes as the body; RPC endpoints take a JSON body.

use crate::config::{remote_join, AuthConfig};
use crate::error::{Error, Result};
use crate::upload::session::{CommitInfo, UploadCursor};
use crate::upload::transport::{RemoteCopy, RemoteFile, RemoteSource, UploadTransport};
use async_trait::async_trait;
use bytes::Bytes;
use reqwest::header::CONTENT_TYPE;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tracing::debug;

pub const API_HOST: &str = "https://api.dropboxapi.com";
pub const CONTENT_HOST: &str = "https://content.dropboxapi.com";
pub const AUTHORIZE_URL: &str = "https://www.dropbox.com/oauth2/authorize";

const API_ARG_HEADER: &str = "Dropbox-API-Arg";
const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

/// Logged-in account, as reported by `users/get_current_account`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Account {
    pub account_id: String,
    pub email: String,
    pub name: String,
}

#[derive(Deserialize)]
struct TokenResponse {
    #[serde(default)]
    access_token: String,
    #[serde(default)]
    refresh_token: String,
}

#[derive(Deserialize)]
struct SessionStartResponse {
    #[serde(default)]
    session_id: String,
}

#[derive(Deserialize)]
struct AccountResponse {
    #[serde(default)]
    account_id: String,
    #[serde(default)]
    email: String,
    name: AccountName,
}

#[derive(Deserialize)]
struct AccountName {
    #[serde(default)]
    display_name: String,
}

#[derive(Serialize)]
struct SessionStartArg {
    close: bool,
}

#[derive(Serialize)]
struct AppendArg<'a> {
    cursor: &'a UploadCursor,
    close: bool,
}

#[derive(Serialize)]
struct FinishArg<'a> {
    cursor: &'a UploadCursor,
    commit: &'a CommitInfo,
}

#[derive(Serialize)]
struct CopyArg<'a> {
    from_path: &'a str,
    to_path: &'a str,
}

#[derive(Serialize)]
struct PathArg<'a> {
    path: &'a str,
}

#[derive(Serialize)]
struct CursorArg<'a> {
    cursor: &'a str,
}

#[derive(Deserialize)]
struct ListFolderResponse {
    #[serde(default)]
    entries: Vec<ListEntry>,
    #[serde(default)]
    cursor: String,
    #[serde(default)]
    has_more: bool,
}

#[derive(Deserialize)]
struct ListEntry {
    #[serde(rename = ".tag")]
    tag: String,
    name: String,
    #[serde(default)]
    path_lower: String,
    #[serde(default)]
    size: u64,
}

/// Authenticated Dropbox client.
#[derive(Debug, Clone)]
pub struct DropboxClient {
    http: reqwest::Client,
    api_host: String,
    content_host: String,
    access_token: String,
}

impl DropboxClient {
    /// Exchange the refresh token for an access token against the public API.
    pub async fn connect(auth: &AuthConfig) -> Result<Self> {
        Self::connect_to(auth, API_HOST, CONTENT_HOST).await
    }

    /// Same as [`connect`](Self::connect) against explicit hosts.
    pub async fn connect_to(
        auth: &AuthConfig,
        api_host: &str,
        content_host: &str,
    ) -> Result<Self> {
        let http = build_http_client()?;
        let access_token = refresh_access_token(&http, api_host, auth).await?;
        Ok(Self {
            http,
            api_host: api_host.trim_end_matches('/').to_string(),
            content_host: content_host.trim_end_matches('/').to_string(),
            access_token,
        })
    }

    /// Client with an already-issued access token.
    pub fn with_access_token(
        access_token: impl Into<String>,
        api_host: &str,
        content_host: &str,
    ) -> Result<Self> {
        Ok(Self {
            http: build_http_client()?,
            api_host: api_host.trim_end_matches('/').to_string(),
            content_host: content_host.trim_end_matches('/').to_string(),
            access_token: access_token.into(),
        })
    }

    pub async fn current_account(&self) -> Result<Account> {
        let body = self
            .rpc_request("/2/users/get_current_account", None::<&()>)
            .await?;
        let payload: AccountResponse = serde_json::from_slice(&body)?;
        if payload.account_id.is_empty() {
            return Err(Error::Api {
                endpoint: "/2/users/get_current_account",
                status: StatusCode::OK,
                body: "response missing account_id".to_string(),
            });
        }
        Ok(Account {
            account_id: payload.account_id,
            email: payload.email,
            name: payload.name.display_name,
        })
    }

    /// Server-side copy.
    pub async fn copy(&self, from_path: &str, to_path: &str) -> Result<()> {
        self.rpc_request("/2/files/copy_v2", Some(&CopyArg { from_path, to_path }))
            .await?;
        debug!(from = from_path, to = to_path, "Copied");
        Ok(())
    }

    /// Files directly inside `folder`, following `has_more` until the
    /// listing is exhausted. Sub-folders are left out.
    pub async fn list_folder(&self, folder: &str) -> Result<Vec<RemoteFile>> {
        const CONTINUE: &str = "/2/files/list_folder/continue";
        // the root folder is spelled "" in the API
        let folder = folder.trim_end_matches('/');

        let body = self
            .rpc_request("/2/files/list_folder", Some(&PathArg { path: folder }))
            .await?;
        let mut page: ListFolderResponse = serde_json::from_slice(&body)?;
        let mut files = Vec::new();

        loop {
            files.extend(
                page.entries
                    .into_iter()
                    .filter(|entry| entry.tag == "file")
                    .map(|entry| RemoteFile {
                        path: if entry.path_lower.is_empty() {
                            remote_join(folder, &entry.name)
                        } else {
                            entry.path_lower
                        },
                        name: entry.name,
                        size: entry.size,
                    }),
            );
            if !page.has_more {
                break;
            }
            if page.cursor.is_empty() {
                return Err(Error::Api {
                    endpoint: CONTINUE,
                    status: StatusCode::OK,
                    body: "has_more set without a cursor".to_string(),
                });
            }
            let body = self
                .rpc_request(CONTINUE, Some(&CursorArg { cursor: &page.cursor }))
                .await?;
            page = serde_json::from_slice(&body)?;
        }

        debug!(folder, files = files.len(), "Listed folder");
        Ok(files)
    }

    /// Download `remote_path` into `local_path`, streaming the body to disk.
    pub async fn download(&self, remote_path: &str, local_path: &Path) -> Result<u64> {
        const ENDPOINT: &str = "/2/files/download";
        let response = self
            .http
            .post(format!("{}{}", self.content_host, ENDPOINT))
            .bearer_auth(&self.access_token)
            .header(API_ARG_HEADER, header_safe_json(&PathArg { path: remote_path })?)
            .send()
            .await?;
        let mut response = check_status(ENDPOINT, response).await?;

        let mut file = tokio::fs::File::create(local_path).await?;
        let mut written = 0u64;
        while let Some(chunk) = response.chunk().await? {
            file.write_all(&chunk).await?;
            written += chunk.len() as u64;
        }
        file.flush().await?;

        debug!(
            remote_path,
            local_path = %local_path.display(),
            bytes = written,
            "Downloaded"
        );
        Ok(written)
    }

    async fn rpc_request<A: Serialize + ?Sized>(
        &self,
        endpoint: &'static str,
        arg: Option<&A>,
    ) -> Result<Bytes> {
        let mut request = self
            .http
            .post(format!("{}{}", self.api_host, endpoint))
            .bearer_auth(&self.access_token);
        if let Some(arg) = arg {
            request = request.json(arg);
        }
        let response = request.send().await?;
        check_status(endpoint, response).await?.bytes().await.map_err(Error::from)
    }

    async fn content_request<A: Serialize + ?Sized>(
        &self,
        endpoint: &'static str,
        arg: &A,
        body: Bytes,
    ) -> Result<Bytes> {
        debug!(endpoint, bytes = body.len(), "Content request");
        let response = self
            .http
            .post(format!("{}{}", self.content_host, endpoint))
            .bearer_auth(&self.access_token)
            .header(API_ARG_HEADER, header_safe_json(arg)?)
            .header(CONTENT_TYPE, "application/octet-stream")
            .body(body)
            .send()
            .await?;
        check_status(endpoint, response).await?.bytes().await.map_err(Error::from)
    }
}

#[async_trait]
impl UploadTransport for DropboxClient {
    async fn upload(&self, commit: &CommitInfo, data: Bytes) -> Result<()> {
        self.content_request("/2/files/upload", commit, data).await?;
        Ok(())
    }

    async fn start_session(&self, data: Bytes) -> Result<String> {
        let body = self
            .content_request(
                "/2/files/upload_session/start",
                &SessionStartArg { close: false },
                data,
            )
            .await?;
        let payload: SessionStartResponse = serde_json::from_slice(&body)?;
        if payload.session_id.is_empty() {
            return Err(Error::Api {
                endpoint: "/2/files/upload_session/start",
                status: StatusCode::OK,
                body: "response missing session_id".to_string(),
            });
        }
        Ok(payload.session_id)
    }

    async fn append(&self, cursor: &UploadCursor, data: Bytes) -> Result<()> {
        let arg = AppendArg {
            cursor,
            close: false,
        };
        self.content_request("/2/files/upload_session/append_v2", &arg, data)
            .await?;
        Ok(())
    }

    async fn finish(&self, cursor: &UploadCursor, commit: &CommitInfo, data: Bytes) -> Result<()> {
        let arg = FinishArg { cursor, commit };
        self.content_request("/2/files/upload_session/finish", &arg, data)
            .await?;
        Ok(())
    }
}

#[async_trait]
impl RemoteCopy for DropboxClient {
    async fn copy(&self, from_path: &str, to_path: &str) -> Result<()> {
        DropboxClient::copy(self, from_path, to_path).await
    }
}

#[async_trait]
impl RemoteSource for DropboxClient {
    async fn list_files(&self, folder: &str) -> Result<Vec<RemoteFile>> {
        self.list_folder(folder).await
    }

    async fn download(&self, remote_path: &str, local_path: &Path) -> Result<u64> {
        DropboxClient::download(self, remote_path, local_path).await
    }
}

/// Page where the account owner grants this app offline access and is shown
/// a one-time authorization code.
pub fn authorize_url(app_key: &str) -> Result<String> {
    let url = reqwest::Url::parse_with_params(
        AUTHORIZE_URL,
        &[
            ("client_id", app_key),
            ("token_access_type", "offline"),
            ("response_type", "code"),
        ],
    )
    .map_err(|e| Error::Config(format!("invalid app key: {}", e)))?;
    Ok(url.into())
}

/// Trade a one-time authorization code for a long-lived refresh token.
pub async fn exchange_auth_code(
    api_host: &str,
    app_key: &str,
    app_secret: &str,
    code: &str,
) -> Result<String> {
    let http = build_http_client()?;
    let payload = request_token(
        &http,
        api_host,
        app_key,
        app_secret,
        &[("grant_type", "authorization_code"), ("code", code.trim())],
    )
    .await?;
    if payload.refresh_token.is_empty() {
        return Err(Error::Api {
            endpoint: TOKEN_ENDPOINT,
            status: StatusCode::OK,
            body: "token response missing refresh_token".to_string(),
        });
    }
    debug!("Authorization code exchanged");
    Ok(payload.refresh_token)
}

const TOKEN_ENDPOINT: &str = "/oauth2/token";

fn build_http_client() -> Result<reqwest::Client> {
    Ok(reqwest::Client::builder()
        .connect_timeout(CONNECT_TIMEOUT)
        .build()?)
}

async fn refresh_access_token(
    http: &reqwest::Client,
    api_host: &str,
    auth: &AuthConfig,
) -> Result<String> {
    let payload = request_token(
        http,
        api_host,
        &auth.app_key,
        &auth.app_secret,
        &[
            ("grant_type", "refresh_token"),
            ("refresh_token", auth.refresh_token.as_str()),
        ],
    )
    .await?;
    if payload.access_token.is_empty() {
        return Err(Error::Api {
            endpoint: TOKEN_ENDPOINT,
            status: StatusCode::OK,
            body: "token response missing access_token".to_string(),
        });
    }
    debug!("Access token refreshed");
    Ok(payload.access_token)
}

async fn request_token(
    http: &reqwest::Client,
    api_host: &str,
    app_key: &str,
    app_secret: &str,
    form: &[(&str, &str)],
) -> Result<TokenResponse> {
    let response = http
        .post(format!("{}{}", api_host.trim_end_matches('/'), TOKEN_ENDPOINT))
        .basic_auth(app_key, Some(app_secret))
        .form(form)
        .send()
        .await?;
    let body = check_status(TOKEN_ENDPOINT, response).await?.bytes().await?;
    Ok(serde_json::from_slice(&body)?)
}

async fn check_status(
    endpoint: &'static str,
    response: reqwest::Response,
) -> Result<reqwest::Response> {
    let status = response.status();
    if status == StatusCode::OK {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(Error::Api {
        endpoint,
        status,
        body: body.trim().to_string(),
    })
}

/// JSON for an HTTP header: everything outside ASCII is `\u` escaped.
fn header_safe_json<A: Serialize + ?Sized>(arg: &A) -> Result<String> {
    let json = serde_json::to_string(arg)?;
    let mut out = String::with_capacity(json.len());
    for c in json.chars() {
        if c.is_ascii() {
            out.push(c);
        } else {
            let mut units = [0u16; 2];
            for unit in c.encode_utf16(&mut units) {
                out.push_str(&format!("\\u{:04x}", unit));
            }
        }
    }
    Ok(out)
}
