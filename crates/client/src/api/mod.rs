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

//! The narrow interface to the remote storage service.

mod http;
#[cfg(test)]
pub(crate) mod mock;

use std::{fmt, sync::Arc};

use async_trait::async_trait;
use bon::Builder;
use bytes::Bytes;
use futures::stream::BoxStream;
pub use http::{HttpApi, HttpConnector};
use serde::{Deserialize, Deserializer, Serialize};

use crate::{
    account::{Account, FullAccount, LinkSettings, RawSpaceUsage, SharedLinkMetadata},
    credentials::TokenType,
    error::{Error, Result},
    types::{
        CommitInfo, Cursor, DeleteArg, FileMetadata, FolderMetadata, LongpollResult, Metadata,
        PageResult,
    },
};

/// Body of a download, yielded as the network delivers it.
pub type ByteStream = BoxStream<'static, Result<Bytes>>;

/// Identifier of a server side batch job.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(pub String);

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { f.write_str(&self.0) }
}

/// Response to a batch submission.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = ".tag", rename_all = "snake_case")]
pub enum BatchLaunch {
    /// The server finished the work within the request.
    Complete { entries: Vec<BatchEntry> },
    /// The work was deferred to a job that must be polled.
    AsyncJob { async_job_id: JobId },
}

/// Status of a deferred batch job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = ".tag", rename_all = "snake_case")]
pub enum BatchJobStatus {
    InProgress,
    Complete { entries: Vec<BatchEntry> },
    Failed { reason: BatchFailure },
}

/// Why a whole batch job failed.
///
/// Any reason other than the capacity ones decodes as `Other`, carrying the
/// server's message when it sends one and the reason tag otherwise.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = ".tag", content = "message", rename_all = "snake_case")]
pub enum BatchFailure {
    TooManyWriteOperations,
    TooManyFiles,
    Other(String),
}

impl<'de> Deserialize<'de> for BatchFailure {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        #[derive(Deserialize)]
        struct Raw {
            #[serde(rename = ".tag")]
            tag:     String,
            #[serde(default)]
            message: Option<String>,
        }

        let Raw { tag, message } = Raw::deserialize(deserializer)?;
        Ok(match tag.as_str() {
            "too_many_write_operations" => Self::TooManyWriteOperations,
            "too_many_files" => Self::TooManyFiles,
            _ => Self::Other(message.unwrap_or(tag)),
        })
    }
}

impl BatchFailure {
    /// Capacity failures go away when less work is submitted at once.
    #[must_use]
    pub const fn is_capacity(&self) -> bool {
        matches!(self, Self::TooManyWriteOperations | Self::TooManyFiles)
    }
}

impl fmt::Display for BatchFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::TooManyWriteOperations => f.write_str("too_many_write_operations"),
            Self::TooManyFiles => f.write_str("too_many_files"),
            Self::Other(message) => f.write_str(message),
        }
    }
}

/// Outcome for one item of a batch, addressed by its position in the
/// submitted chunk.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchEntry {
    pub index:   usize,
    #[serde(flatten)]
    pub outcome: BatchOutcome,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = ".tag", rename_all = "snake_case")]
pub enum BatchOutcome {
    Success { metadata: Metadata },
    Failure { error_summary: String },
}

/// Arguments of a folder listing.
#[derive(Debug, Clone, PartialEq, Eq, Builder, Serialize, Deserialize)]
pub struct ListFolderArg {
    #[builder(into)]
    pub path:            String,
    #[builder(default)]
    pub recursive:       bool,
    #[builder(default)]
    pub include_deleted: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub limit:           Option<u32>,
}

/// Remote storage operations the client is built from.
///
/// Implementations perform exactly one request per call and never retry.
#[async_trait]
pub trait StorageApi: Send + Sync {
    async fn get_metadata(&self, path: &str) -> Result<Metadata>;

    /// Upload a payload that fits in one request.
    async fn upload(&self, commit: &CommitInfo, content_hash: &str, data: Bytes)
    -> Result<FileMetadata>;

    /// Open an upload session with its first chunk and return the session id.
    async fn upload_session_start(&self, content_hash: &str, data: Bytes) -> Result<String>;

    async fn upload_session_append(
        &self,
        session_id: &str,
        offset: u64,
        content_hash: &str,
        data: Bytes,
    ) -> Result<()>;

    async fn upload_session_finish(
        &self,
        session_id: &str,
        offset: u64,
        content_hash: &str,
        data: Bytes,
        commit: &CommitInfo,
    ) -> Result<FileMetadata>;

    /// Start a download of a path or of a `rev:` revision.
    async fn download(&self, path: &str) -> Result<(FileMetadata, ByteStream)>;

    async fn list_folder(&self, arg: &ListFolderArg) -> Result<PageResult<Metadata>>;

    async fn list_folder_continue(&self, cursor: &Cursor) -> Result<PageResult<Metadata>>;

    async fn get_latest_cursor(&self, arg: &ListFolderArg) -> Result<Cursor>;

    /// Hold the request open until changes arrive or `timeout_secs` pass.
    async fn longpoll(&self, cursor: &Cursor, timeout_secs: u64) -> Result<LongpollResult>;

    async fn delete_batch(&self, entries: &[DeleteArg]) -> Result<BatchLaunch>;

    async fn delete_batch_check(&self, job: &JobId) -> Result<BatchJobStatus>;

    async fn create_folder_batch(&self, paths: &[String], autorename: bool)
    -> Result<BatchLaunch>;

    async fn create_folder_batch_check(&self, job: &JobId) -> Result<BatchJobStatus>;

    async fn delete(&self, arg: &DeleteArg) -> Result<Metadata>;

    async fn move_entry(&self, from: &str, to: &str, autorename: bool) -> Result<Metadata>;

    async fn create_folder(&self, path: &str, autorename: bool) -> Result<FolderMetadata>;

    async fn list_revisions(&self, path: &str, limit: u32) -> Result<Vec<FileMetadata>>;

    async fn restore(&self, path: &str, rev: &str) -> Result<FileMetadata>;

    async fn create_shared_link(
        &self,
        path: &str,
        settings: &LinkSettings,
    ) -> Result<SharedLinkMetadata>;

    async fn list_shared_links(
        &self,
        path: Option<&str>,
        cursor: Option<&Cursor>,
    ) -> Result<PageResult<SharedLinkMetadata>>;

    async fn revoke_shared_link(&self, url: &str) -> Result<()>;

    async fn get_current_account(&self) -> Result<FullAccount>;

    async fn get_account(&self, account_id: &str) -> Result<Account>;

    async fn get_space_usage(&self) -> Result<RawSpaceUsage>;

    async fn revoke_token(&self) -> Result<()>;
}

/// What a session is authenticated with.
#[derive(Clone, PartialEq, Eq)]
pub struct SessionAuth {
    pub token:      String,
    pub token_type: TokenType,
    /// Namespace id sent as the path root, if any.
    pub path_root:  Option<String>,
}

impl fmt::Debug for SessionAuth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionAuth")
            .field("token", &"<redacted>")
            .field("token_type", &self.token_type)
            .field("path_root", &self.path_root)
            .finish()
    }
}

/// Builds authenticated sessions. One connector is shared by every clone of a
/// client so they reuse the same connection pool.
pub trait ApiConnector: Send + Sync {
    fn connect(&self, auth: &SessionAuth) -> Result<Arc<dyn StorageApi>>;
}

/// Map a server error summary such as `path_lookup/not_found/..` onto the
/// error taxonomy.
pub(crate) fn error_from_summary(
    endpoint: &str,
    status: u16,
    path: Option<&str>,
    summary: &str,
) -> Error {
    use crate::error::{
        ApiSnafu, NotFoundSnafu, PathSnafu, TooManyOperationsSnafu, UploadCorruptedSnafu,
    };

    let path = path.unwrap_or_default();
    let tags: Vec<&str> = summary
        .split('/')
        .map(|tag| tag.trim_end_matches('.').trim())
        .filter(|tag| !tag.is_empty())
        .collect();
    let has = |name: &str| tags.contains(&name);

    if has("not_found") {
        NotFoundSnafu { path }.build()
    } else if has("too_many_write_operations") || has("too_many_files") {
        TooManyOperationsSnafu { message: summary }.build()
    } else if has("content_hash_mismatch") {
        UploadCorruptedSnafu { path }.build()
    } else if tags.first().is_some_and(|first| {
        matches!(
            *first,
            "path"
                | "path_lookup"
                | "path_write"
                | "from_lookup"
                | "from_write"
                | "to"
                | "conflict"
                | "malformed_path"
                | "insufficient_space"
                | "no_write_permission"
                | "disallowed_name"
                | "restricted_content"
        )
    }) {
        PathSnafu {
            path,
            message: summary,
        }
        .build()
    } else {
        ApiSnafu {
            endpoint,
            status,
            summary,
        }
        .build()
    }
}
