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

use std::time::Duration;

use bon::Builder;
use serde::{Deserialize, Serialize};
use smart_default::SmartDefault;

/// Smallest chunk an upload session will send.
pub const MIN_UPLOAD_CHUNK_SIZE: u64 = 100_000;
/// Largest chunk a single request may carry.
pub const MAX_UPLOAD_CHUNK_SIZE: u64 = 150_000_000;
/// Smallest number of entries per batch submission.
pub const MIN_BATCH_SIZE: usize = 1;
/// Largest number of entries per batch submission.
pub const MAX_BATCH_SIZE: usize = 1000;

/// Configuration for [`StorageClient`](crate::StorageClient).
///
/// Every field has a default, so a config file only needs to name what it
/// overrides.
#[derive(Debug, Clone, PartialEq, Eq, SmartDefault, Builder, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Name used to tell client instances apart in logs.
    #[default = "driftbox"]
    #[builder(default = "driftbox".to_string(), into)]
    pub config_name: String,

    /// Base URL for RPC style endpoints.
    #[default = "https://api.dropboxapi.com"]
    #[builder(default = "https://api.dropboxapi.com".to_string(), into)]
    pub api_base_url: String,

    /// Base URL for content upload and download endpoints.
    #[default = "https://content.dropboxapi.com"]
    #[builder(default = "https://content.dropboxapi.com".to_string(), into)]
    pub content_base_url: String,

    /// Base URL for the long-poll endpoint.
    #[default = "https://notify.dropboxapi.com"]
    #[builder(default = "https://notify.dropboxapi.com".to_string(), into)]
    pub notify_base_url: String,

    /// Overall deadline of an RPC request, and the longest silence tolerated
    /// while a content transfer is in flight. The long-poll call has its own.
    #[default(Duration::from_secs(100))]
    #[builder(default = Duration::from_secs(100))]
    pub timeout: Duration,

    /// Custom User-Agent header.
    #[default(concat!("driftbox/", env!("CARGO_PKG_VERSION")).to_string())]
    #[builder(default = concat!("driftbox/", env!("CARGO_PKG_VERSION")).to_string(), into)]
    pub user_agent: String,

    /// Requested upload chunk size, clamped on use.
    #[default = 5_000_000]
    #[builder(default = 5_000_000)]
    pub upload_chunk_size: u64,

    /// Requested batch size for delete and create-folder batches, clamped on
    /// use.
    #[default = 900]
    #[builder(default = 900)]
    pub batch_size: usize,

    /// Retries for hash mismatches and offset corrections during transfers.
    #[default = 3]
    #[builder(default = 3)]
    pub max_transfer_retries: usize,

    /// Retries for connection failures while paging through a listing.
    #[default = 3]
    #[builder(default = 3)]
    pub max_list_folder_retries: usize,

    #[default(Duration::from_secs(3))]
    #[builder(default = Duration::from_secs(3))]
    pub list_folder_retry_backoff: Duration,

    /// Retries for the stale token class of bad input errors.
    #[default = 5]
    #[builder(default = 5)]
    pub bad_input_retries: usize,

    #[default(Duration::from_secs(2))]
    #[builder(default = Duration::from_secs(2))]
    pub bad_input_backoff: Duration,

    /// Server message that marks a bad input error as retryable.
    #[default = "v1_retired"]
    #[builder(default = "v1_retired".to_string(), into)]
    pub bad_input_message: String,
}

impl ClientConfig {
    #[must_use]
    pub const fn chunk_size(&self) -> u64 { clamp_chunk_size(self.upload_chunk_size) }

    #[must_use]
    pub const fn effective_batch_size(&self) -> usize { clamp_batch_size(self.batch_size) }
}

/// Clamp a requested upload chunk size into the range the server accepts.
#[must_use]
pub const fn clamp_chunk_size(requested: u64) -> u64 {
    if requested < MIN_UPLOAD_CHUNK_SIZE {
        MIN_UPLOAD_CHUNK_SIZE
    } else if requested > MAX_UPLOAD_CHUNK_SIZE {
        MAX_UPLOAD_CHUNK_SIZE
    } else {
        requested
    }
}

#[must_use]
pub const fn clamp_batch_size(requested: usize) -> usize {
    if requested < MIN_BATCH_SIZE {
        MIN_BATCH_SIZE
    } else if requested > MAX_BATCH_SIZE {
        MAX_BATCH_SIZE
    } else {
        requested
    }
}
