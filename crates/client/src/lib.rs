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

//! Resilient client for a remote file storage service.
//!
//! Large uploads are split into resumable chunk sessions, downloads are
//! verified against the server's content hash, bulk deletes and folder
//! creation run as polled batch jobs, and listings are exposed as lazy page
//! streams next to a long-poll change notification that honors the server's
//! backoff requests.

mod account;
mod api;
mod batch;
mod client;
mod config;
mod credentials;
mod error;
mod hashing;
mod pagination;
mod retry;
mod transfer;
mod types;

pub use account::{
    Account, AccountType, FullAccount, LinkAccessLevel, LinkAudience, LinkPermissions,
    LinkSettings, RawSpaceUsage, RootInfo, SharedLinkMetadata, SpaceAllocation, SpaceUsage, Team,
    TeamSpaceUsage,
};
pub use api::{
    ApiConnector, BatchEntry, BatchFailure, BatchJobStatus, BatchLaunch, BatchOutcome, ByteStream,
    HttpApi, HttpConnector, JobId, ListFolderArg, SessionAuth, StorageApi,
};
pub use batch::ItemResult;
pub use client::StorageClient;
pub use config::{
    ClientConfig, MAX_BATCH_SIZE, MAX_UPLOAD_CHUNK_SIZE, MIN_BATCH_SIZE, MIN_UPLOAD_CHUNK_SIZE,
    clamp_batch_size, clamp_chunk_size,
};
pub use credentials::{CredentialStore, MemoryCredentials, TokenType};
pub use error::{Error, ErrorKind, Result};
pub use hashing::{ContentHasher, HASH_BLOCK_SIZE, HashingWriter, content_hash};
pub use pagination::{BackoffState, LONGPOLL_TIMEOUT_RANGE, PageStream, collect_pages, page_stream};
pub use retry::RetryPolicy;
pub use transfer::DOWNLOAD_CHUNK_SIZE;
pub use types::{
    CommitInfo, Cursor, DeleteArg, DeletedMetadata, FileMetadata, FolderMetadata, LongpollResult,
    Metadata, PageResult, ProgressSink, TransferProgress, WriteMode,
};
