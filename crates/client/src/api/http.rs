// Copyright 2025 Crrow
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//      http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use bytes::Bytes;
use futures::TryStreamExt;
use reqwest::{RequestBuilder, Response, header::HeaderMap};
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use serde_json::{Value, json};
use snafu::{IntoError, OptionExt, ResultExt};
use tracing::debug;

use super::{
    ApiConnector, BatchJobStatus, BatchLaunch, ByteStream, JobId, ListFolderArg, SessionAuth,
    StorageApi, error_from_summary,
};
use crate::{
    account::{Account, FullAccount, LinkSettings, RawSpaceUsage, SharedLinkMetadata},
    config::ClientConfig,
    error::{
        ApiSnafu, AuthSnafu, BadInputSnafu, Error, IncorrectOffsetSnafu, JsonSnafu, NetworkSnafu,
        RateLimitedSnafu, Result,
    },
    types::{
        CommitInfo, Cursor, DeleteArg, FileMetadata, FolderMetadata, LongpollResult, Metadata,
        PageResult,
    },
};

const API_ARG_HEADER: &str = "Dropbox-API-Arg";
const API_RESULT_HEADER: &str = "dropbox-api-result";
const PATH_ROOT_HEADER: &str = "Dropbox-API-Path-Root";
/// Extra time granted to a long-poll request on top of its own timeout, the
/// server adds random jitter of up to 90 seconds.
const LONGPOLL_GRACE: Duration = Duration::from_secs(90);

/// Builds [`HttpApi`] sessions that share one connection pool.
#[derive(Debug, Clone)]
pub struct HttpConnector {
    client:        reqwest::Client,
    notify_client: reqwest::Client,
    config:        Arc<ClientConfig>,
}

impl HttpConnector {
    /// # Panics
    ///
    /// Panics if the HTTP client fails to build (should never happen with a
    /// valid config)
    #[must_use]
    pub fn new(config: Arc<ClientConfig>) -> Self {
        let client = reqwest::Client::builder()
            .user_agent(&config.user_agent)
            .connect_timeout(config.timeout)
            .read_timeout(config.timeout)
            .build()
            .expect("Failed to build HTTP client");
        // Long-poll requests carry their own deadline, a read timeout would cut
        // them short.
        let notify_client = reqwest::Client::builder()
            .user_agent(&config.user_agent)
            .connect_timeout(config.timeout)
            .build()
            .expect("Failed to build HTTP client");

        Self {
            client,
            notify_client,
            config,
        }
    }
}

impl ApiConnector for HttpConnector {
    fn connect(&self, auth: &SessionAuth) -> Result<Arc<dyn StorageApi>> {
        Ok(Arc::new(HttpApi {
            client:        self.client.clone(),
            notify_client: self.notify_client.clone(),
            config:        self.config.clone(),
            auth:          auth.clone(),
        }))
    }
}

/// [`StorageApi`] over HTTP.
///
/// RPC endpoints take and return JSON bodies. Content endpoints carry their
/// JSON argument in the `Dropbox-API-Arg` header, with the payload as the
/// body, and downloads return their metadata in the `Dropbox-API-Result`
/// header.
pub struct HttpApi {
    client:        reqwest::Client,
    notify_client: reqwest::Client,
    config:        Arc<ClientConfig>,
    auth:          SessionAuth,
}

#[derive(Deserialize)]
struct ErrorBody {
    error_summary: String,
    #[serde(default)]
    error:         Value,
}

#[derive(Serialize)]
struct SessionCursor<'a> {
    session_id: &'a str,
    offset:     u64,
}

#[derive(Deserialize)]
struct SessionStartResult {
    session_id: String,
}

#[derive(Deserialize)]
struct CursorResult {
    cursor: Cursor,
}

#[derive(Deserialize)]
struct MetadataResult<T> {
    metadata: T,
}

#[derive(Deserialize)]
struct RevisionsResult {
    entries: Vec<FileMetadata>,
}

#[derive(Deserialize)]
struct SharedLinksResult {
    links:    Vec<SharedLinkMetadata>,
    #[serde(default)]
    has_more: bool,
    #[serde(default)]
    cursor:   Option<Cursor>,
}

impl HttpApi {
    fn url(base: &str, endpoint: &str) -> String {
        format!("{}/2/{endpoint}", base.trim_end_matches('/'))
    }

    fn authorized(&self, builder: RequestBuilder) -> RequestBuilder {
        let builder = builder.bearer_auth(&self.auth.token);
        match &self.auth.path_root {
            Some(namespace_id) => builder.header(
                PATH_ROOT_HEADER,
                json!({".tag": "root", "root": namespace_id}).to_string(),
            ),
            None => builder,
        }
    }

    async fn rpc<A, R>(&self, endpoint: &str, arg: &A, path: Option<&str>) -> Result<R>
    where
        A: Serialize + ?Sized + Sync,
        R: DeserializeOwned,
    {
        debug!(endpoint, "rpc request");
        // Content transfers grow with the payload and only get the read
        // timeout, a JSON exchange also gets an overall deadline.
        let request = self
            .client
            .post(Self::url(&self.config.api_base_url, endpoint))
            .timeout(self.config.timeout)
            .json(arg);
        let response = self
            .authorized(request)
            .send()
            .await
            .context(NetworkSnafu)?;
        let response = check(endpoint, path, response).await?;
        let body = response.bytes().await.context(NetworkSnafu)?;
        decode(endpoint, &body)
    }

    async fn content<A>(
        &self,
        endpoint: &str,
        arg: &A,
        data: Option<Bytes>,
        path: Option<&str>,
    ) -> Result<Response>
    where
        A: Serialize + ?Sized + Sync,
    {
        debug!(endpoint, bytes = data.as_ref().map_or(0, Bytes::len), "content request");
        let mut request = self
            .client
            .post(Self::url(&self.config.content_base_url, endpoint))
            .header(API_ARG_HEADER, header_safe_json(endpoint, arg)?);
        if let Some(data) = data {
            request = request
                .header(reqwest::header::CONTENT_TYPE, "application/octet-stream")
                .body(data);
        }
        let response = self
            .authorized(request)
            .send()
            .await
            .context(NetworkSnafu)?;
        check(endpoint, path, response).await
    }

    async fn upload_content<A, R>(
        &self,
        endpoint: &str,
        arg: &A,
        data: Bytes,
        path: Option<&str>,
    ) -> Result<R>
    where
        A: Serialize + ?Sized + Sync,
        R: DeserializeOwned,
    {
        let response = self.content(endpoint, arg, Some(data), path).await?;
        let body = response.bytes().await.context(NetworkSnafu)?;
        decode(endpoint, &body)
    }
}

fn decode<R: DeserializeOwned>(endpoint: &str, body: &[u8]) -> Result<R> {
    // Endpoints without a result reply with an empty body.
    let body: &[u8] = if body.is_empty() { b"null" } else { body };
    serde_json::from_slice(body).context(JsonSnafu { endpoint })
}

/// Serialize an argument for use as a header value. Non-ASCII characters are
/// escaped so the value stays a valid header.
fn header_safe_json<A: Serialize + ?Sized>(endpoint: &str, arg: &A) -> Result<String> {
    let raw = serde_json::to_string(arg).context(JsonSnafu { endpoint })?;
    let mut escaped = String::with_capacity(raw.len());
    for ch in raw.chars() {
        if ch.is_ascii() && ch != '\u{7f}' {
            escaped.push(ch);
        } else {
            let mut units = [0u16; 2];
            for unit in ch.encode_utf16(&mut units) {
                escaped.push_str(&format!("\\u{unit:04x}"));
            }
        }
    }
    Ok(escaped)
}

fn retry_after(headers: &HeaderMap) -> Option<Duration> {
    headers
        .get(reqwest::header::RETRY_AFTER)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse().ok())
        .map(Duration::from_secs)
}

/// Find a server reported `correct_offset` anywhere in a structured error.
fn correct_offset(error: &Value) -> Option<u64> {
    match error {
        Value::Object(map) => {
            if map.get(".tag").and_then(Value::as_str) == Some("incorrect_offset") {
                if let Some(offset) = map.get("correct_offset").and_then(Value::as_u64) {
                    return Some(offset);
                }
            }
            map.values().find_map(correct_offset)
        }
        _ => None,
    }
}

async fn check(endpoint: &str, path: Option<&str>, response: Response) -> Result<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let retry_after = retry_after(response.headers());
    let body = response.text().await.context(NetworkSnafu)?;
    debug!(endpoint, status = status.as_u16(), %body, "request failed");
    Err(error_for_status(
        endpoint,
        status.as_u16(),
        path,
        &body,
        retry_after,
    ))
}

fn error_for_status(
    endpoint: &str,
    status: u16,
    path: Option<&str>,
    body: &str,
    retry_after: Option<Duration>,
) -> Error {
    let parsed = serde_json::from_str::<ErrorBody>(body).ok();
    match status {
        400 => BadInputSnafu { message: body }.build(),
        401 => AuthSnafu {
            message: parsed.map_or_else(|| body.to_string(), |e| e.error_summary),
        }
        .build(),
        409 => match parsed {
            Some(parsed) => match correct_offset(&parsed.error) {
                Some(correct_offset) => IncorrectOffsetSnafu { correct_offset }.build(),
                None => error_from_summary(endpoint, status, path, &parsed.error_summary),
            },
            None => ApiSnafu {
                endpoint,
                status,
                summary: body,
            }
            .build(),
        },
        429 | 503 => RateLimitedSnafu { retry_after }.build(),
        _ => ApiSnafu {
            endpoint,
            status,
            summary: body,
        }
        .build(),
    }
}

#[async_trait]
impl StorageApi for HttpApi {
    async fn get_metadata(&self, path: &str) -> Result<Metadata> {
        self.rpc("files/get_metadata", &json!({ "path": path }), Some(path))
            .await
    }

    async fn upload(
        &self,
        commit: &CommitInfo,
        content_hash: &str,
        data: Bytes,
    ) -> Result<FileMetadata> {
        #[derive(Serialize)]
        struct UploadArg<'a> {
            #[serde(flatten)]
            commit:       &'a CommitInfo,
            content_hash: &'a str,
        }

        let arg = UploadArg {
            commit,
            content_hash,
        };
        self.upload_content("files/upload", &arg, data, Some(&commit.path))
            .await
    }

    async fn upload_session_start(&self, content_hash: &str, data: Bytes) -> Result<String> {
        let result: SessionStartResult = self
            .upload_content(
                "files/upload_session/start",
                &json!({ "content_hash": content_hash }),
                data,
                None,
            )
            .await?;
        Ok(result.session_id)
    }

    async fn upload_session_append(
        &self,
        session_id: &str,
        offset: u64,
        content_hash: &str,
        data: Bytes,
    ) -> Result<()> {
        let cursor = SessionCursor { session_id, offset };
        let arg = json!({ "cursor": cursor, "content_hash": content_hash });
        self.content("files/upload_session/append_v2", &arg, Some(data), None)
            .await?;
        Ok(())
    }

    async fn upload_session_finish(
        &self,
        session_id: &str,
        offset: u64,
        content_hash: &str,
        data: Bytes,
        commit: &CommitInfo,
    ) -> Result<FileMetadata> {
        let cursor = SessionCursor { session_id, offset };
        let arg = json!({ "cursor": cursor, "commit": commit, "content_hash": content_hash });
        self.upload_content(
            "files/upload_session/finish",
            &arg,
            data,
            Some(&commit.path),
        )
        .await
    }

    async fn download(&self, path: &str) -> Result<(FileMetadata, ByteStream)> {
        const ENDPOINT: &str = "files/download";

        let response = self
            .content(ENDPOINT, &json!({ "path": path }), None, Some(path))
            .await?;
        let raw = response
            .headers()
            .get(API_RESULT_HEADER)
            .and_then(|v| v.to_str().ok())
            .context(ApiSnafu {
                endpoint: ENDPOINT,
                status:   response.status().as_u16(),
                summary:  "missing Dropbox-API-Result header",
            })?;
        let metadata: FileMetadata =
            serde_json::from_str(raw).context(JsonSnafu { endpoint: ENDPOINT })?;
        let body: ByteStream = Box::pin(
            response
                .bytes_stream()
                .map_err(|source| NetworkSnafu.into_error(source)),
        );
        Ok((metadata, body))
    }

    async fn list_folder(&self, arg: &ListFolderArg) -> Result<PageResult<Metadata>> {
        self.rpc("files/list_folder", arg, Some(&arg.path)).await
    }

    async fn list_folder_continue(&self, cursor: &Cursor) -> Result<PageResult<Metadata>> {
        self.rpc(
            "files/list_folder/continue",
            &json!({ "cursor": cursor }),
            None,
        )
        .await
    }

    async fn get_latest_cursor(&self, arg: &ListFolderArg) -> Result<Cursor> {
        let result: CursorResult = self
            .rpc("files/list_folder/get_latest_cursor", arg, Some(&arg.path))
            .await?;
        Ok(result.cursor)
    }

    async fn longpoll(&self, cursor: &Cursor, timeout_secs: u64) -> Result<LongpollResult> {
        const ENDPOINT: &str = "files/list_folder/longpoll";

        let response = self
            .notify_client
            .post(Self::url(&self.config.notify_base_url, ENDPOINT))
            .timeout(Duration::from_secs(timeout_secs) + LONGPOLL_GRACE)
            .json(&json!({ "cursor": cursor, "timeout": timeout_secs }))
            .send()
            .await
            .context(NetworkSnafu)?;
        let response = check(ENDPOINT, None, response).await?;
        let body = response.bytes().await.context(NetworkSnafu)?;
        decode(ENDPOINT, &body)
    }

    async fn delete_batch(&self, entries: &[DeleteArg]) -> Result<BatchLaunch> {
        self.rpc("files/delete_batch", &json!({ "entries": entries }), None)
            .await
    }

    async fn delete_batch_check(&self, job: &JobId) -> Result<BatchJobStatus> {
        self.rpc(
            "files/delete_batch/check",
            &json!({ "async_job_id": job }),
            None,
        )
        .await
    }

    async fn create_folder_batch(
        &self,
        paths: &[String],
        autorename: bool,
    ) -> Result<BatchLaunch> {
        self.rpc(
            "files/create_folder_batch",
            &json!({ "paths": paths, "autorename": autorename, "force_async": false }),
            None,
        )
        .await
    }

    async fn create_folder_batch_check(&self, job: &JobId) -> Result<BatchJobStatus> {
        self.rpc(
            "files/create_folder_batch/check",
            &json!({ "async_job_id": job }),
            None,
        )
        .await
    }

    async fn delete(&self, arg: &DeleteArg) -> Result<Metadata> {
        let result: MetadataResult<Metadata> =
            self.rpc("files/delete_v2", arg, Some(&arg.path)).await?;
        Ok(result.metadata)
    }

    async fn move_entry(&self, from: &str, to: &str, autorename: bool) -> Result<Metadata> {
        let arg = json!({
            "from_path": from,
            "to_path": to,
            "autorename": autorename,
            "allow_shared_folder": true,
        });
        let result: MetadataResult<Metadata> = self.rpc("files/move_v2", &arg, Some(from)).await?;
        Ok(result.metadata)
    }

    async fn create_folder(&self, path: &str, autorename: bool) -> Result<FolderMetadata> {
        let arg = json!({ "path": path, "autorename": autorename });
        let result: MetadataResult<FolderMetadata> = self
            .rpc("files/create_folder_v2", &arg, Some(path))
            .await?;
        Ok(result.metadata)
    }

    async fn list_revisions(&self, path: &str, limit: u32) -> Result<Vec<FileMetadata>> {
        let arg = json!({ "path": path, "limit": limit });
        let result: RevisionsResult = self.rpc("files/list_revisions", &arg, Some(path)).await?;
        Ok(result.entries)
    }

    async fn restore(&self, path: &str, rev: &str) -> Result<FileMetadata> {
        self.rpc(
            "files/restore",
            &json!({ "path": path, "rev": rev }),
            Some(path),
        )
        .await
    }

    async fn create_shared_link(
        &self,
        path: &str,
        settings: &LinkSettings,
    ) -> Result<SharedLinkMetadata> {
        self.rpc(
            "sharing/create_shared_link_with_settings",
            &json!({ "path": path, "settings": settings }),
            Some(path),
        )
        .await
    }

    async fn list_shared_links(
        &self,
        path: Option<&str>,
        cursor: Option<&Cursor>,
    ) -> Result<PageResult<SharedLinkMetadata>> {
        let mut arg = serde_json::Map::new();
        if let Some(path) = path {
            arg.insert("path".to_string(), json!(path));
        }
        if let Some(cursor) = cursor {
            arg.insert("cursor".to_string(), json!(cursor));
        }
        let result: SharedLinksResult = self
            .rpc("sharing/list_shared_links", &Value::Object(arg), path)
            .await?;
        Ok(PageResult {
            entries:  result.links,
            has_more: result.has_more,
            cursor:   result.cursor.unwrap_or_default(),
        })
    }

    async fn revoke_shared_link(&self, url: &str) -> Result<()> {
        self.rpc("sharing/revoke_shared_link", &json!({ "url": url }), None)
            .await
    }

    async fn get_current_account(&self) -> Result<FullAccount> {
        self.rpc("users/get_current_account", &(), None).await
    }

    async fn get_account(&self, account_id: &str) -> Result<Account> {
        self.rpc(
            "users/get_account",
            &json!({ "account_id": account_id }),
            None,
        )
        .await
    }

    async fn get_space_usage(&self) -> Result<RawSpaceUsage> {
        self.rpc("users/get_space_usage", &(), None).await
    }

    async fn revoke_token(&self) -> Result<()> { self.rpc("auth/token/revoke", &(), None).await }
}
