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

use std::{
    fmt,
    sync::atomic::{AtomicU64, Ordering},
};

use jiff::Timestamp;
use serde::{Deserialize, Serialize};

/// Opaque continuation token for a listing or a change stream.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Cursor(String);

impl Cursor {
    pub fn new(value: impl Into<String>) -> Self { Self(value.into()) }

    #[must_use]
    pub fn as_str(&self) -> &str { &self.0 }
}

impl fmt::Display for Cursor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { f.write_str(&self.0) }
}

impl From<String> for Cursor {
    fn from(value: String) -> Self { Self(value) }
}

impl From<&str> for Cursor {
    fn from(value: &str) -> Self { Self(value.to_string()) }
}

/// One page of a paginated listing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageResult<T> {
    pub entries:  Vec<T>,
    pub has_more: bool,
    pub cursor:   Cursor,
}

impl<T> Default for PageResult<T> {
    fn default() -> Self {
        Self {
            entries:  Vec::new(),
            has_more: false,
            cursor:   Cursor::default(),
        }
    }
}

impl<T> PageResult<T> {
    /// Combine pages into one logical result: entries in page order, the
    /// cursor of the last page, and nothing more to fetch.
    ///
    /// Returns `None` when there are no pages at all.
    pub fn flatten<I>(pages: I) -> Option<Self>
    where
        I: IntoIterator<Item = Self>,
    {
        pages.into_iter().fold(None, |acc, page| {
            Some(match acc {
                None => Self {
                    has_more: false,
                    ..page
                },
                Some(mut merged) => {
                    merged.entries.extend(page.entries);
                    merged.cursor = page.cursor;
                    merged
                }
            })
        })
    }
}

/// Metadata of a file, folder or deleted entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = ".tag", rename_all = "snake_case")]
pub enum Metadata {
    File(FileMetadata),
    Folder(FolderMetadata),
    Deleted(DeletedMetadata),
}

impl Metadata {
    #[must_use]
    pub fn name(&self) -> &str {
        match self {
            Self::File(md) => &md.name,
            Self::Folder(md) => &md.name,
            Self::Deleted(md) => &md.name,
        }
    }

    #[must_use]
    pub fn path_lower(&self) -> &str {
        match self {
            Self::File(md) => &md.path_lower,
            Self::Folder(md) => &md.path_lower,
            Self::Deleted(md) => &md.path_lower,
        }
    }

    #[must_use]
    pub fn path_display(&self) -> &str {
        match self {
            Self::File(md) => &md.path_display,
            Self::Folder(md) => &md.path_display,
            Self::Deleted(md) => &md.path_display,
        }
    }

    #[must_use]
    pub const fn as_file(&self) -> Option<&FileMetadata> {
        match self {
            Self::File(md) => Some(md),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileMetadata {
    pub name:            String,
    pub path_lower:      String,
    pub path_display:    String,
    pub id:              String,
    #[serde(with = "utc_timestamp")]
    pub client_modified: Timestamp,
    #[serde(with = "utc_timestamp")]
    pub server_modified: Timestamp,
    pub rev:             String,
    pub size:            u64,
    #[serde(default)]
    pub content_hash:    Option<String>,
    /// Target of the link when the remote item is a symbolic link.
    #[serde(default)]
    pub symlink_target:  Option<String>,
    #[serde(default)]
    pub shared:          bool,
    #[serde(default)]
    pub modified_by:     Option<String>,
    #[serde(default = "default_true")]
    pub is_downloadable: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FolderMetadata {
    pub name:         String,
    pub path_lower:   String,
    pub path_display: String,
    pub id:           String,
    #[serde(default)]
    pub shared:       bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeletedMetadata {
    pub name:         String,
    pub path_lower:   String,
    pub path_display: String,
}

const fn default_true() -> bool { true }

/// How an upload treats an existing item at the destination.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = ".tag", content = "update", rename_all = "snake_case")]
pub enum WriteMode {
    /// Never overwrite, conflicts are resolved by the autorename flag.
    #[default]
    Add,
    /// Always overwrite.
    Overwrite,
    /// Overwrite only if the remote item is still at the given revision.
    Update(String),
}

/// Commit parameters shared by single-shot uploads and session finishes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommitInfo {
    pub path:            String,
    pub mode:            WriteMode,
    pub autorename:      bool,
    #[serde(with = "utc_timestamp")]
    pub client_modified: Timestamp,
}

/// A deletion target with an optional revision guard.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeleteArg {
    pub path:       String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_rev: Option<String>,
}

impl DeleteArg {
    pub fn new(path: impl Into<String>) -> Self {
        Self {
            path:       path.into(),
            parent_rev: None,
        }
    }

    #[must_use]
    pub fn with_parent_rev(mut self, rev: impl Into<String>) -> Self {
        self.parent_rev = Some(rev.into());
        self
    }
}

/// Result of a long-poll request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LongpollResult {
    pub changes: bool,
    /// Seconds the server asks clients to wait before polling again.
    #[serde(default)]
    pub backoff: Option<u64>,
}

/// Receives byte counts while a transfer runs.
///
/// A finished upload is reported as `total()` completed bytes, or as the
/// file size when `total()` is zero.
pub trait ProgressSink: Send + Sync {
    fn set_completed(&self, bytes: u64);

    /// Size the transfer was declared with, zero if unknown.
    fn total(&self) -> u64;
}

/// Shared progress counter for one transfer.
#[derive(Debug, Default)]
pub struct TransferProgress {
    completed: AtomicU64,
    total:     AtomicU64,
}

impl TransferProgress {
    #[must_use]
    pub const fn new(total: u64) -> Self {
        Self {
            completed: AtomicU64::new(0),
            total:     AtomicU64::new(total),
        }
    }

    #[must_use]
    pub fn completed(&self) -> u64 { self.completed.load(Ordering::Acquire) }

    #[must_use]
    pub fn total(&self) -> u64 { self.total.load(Ordering::Acquire) }

    pub fn set_total(&self, total: u64) { self.total.store(total, Ordering::Release); }
}

impl ProgressSink for TransferProgress {
    fn set_completed(&self, bytes: u64) { self.completed.store(bytes, Ordering::Release); }

    fn total(&self) -> u64 { self.total.load(Ordering::Acquire) }
}

/// Serde adapter for server timestamps: RFC 3339 on the way out, and values
/// without an offset are read as UTC.
pub mod utc_timestamp {
    use jiff::{Timestamp, civil::DateTime, tz::TimeZone};
    use serde::{Deserialize, Deserializer, Serializer, de};

    pub fn serialize<S: Serializer>(ts: &Timestamp, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(ts)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Timestamp, D::Error> {
        let raw = String::deserialize(deserializer)?;
        parse(&raw).map_err(de::Error::custom)
    }

    pub fn parse(raw: &str) -> Result<Timestamp, jiff::Error> {
        raw.parse::<Timestamp>().or_else(|_| {
            raw.parse::<DateTime>()?
                .to_zoned(TimeZone::UTC)
                .map(|zoned| zoned.timestamp())
        })
    }
}
