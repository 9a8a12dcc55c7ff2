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

//! Scripted in-memory storage service for unit tests.
//!
//! Behaves like a small remote store (files, folders, upload sessions) and
//! lets tests queue canned responses or inject failures for the next call of
//! a given operation.

use std::{
    collections::{BTreeMap, BTreeSet, HashMap, VecDeque},
    sync::{Arc, Mutex},
};

use async_trait::async_trait;
use bytes::Bytes;
use futures::stream;
use jiff::Timestamp;

use super::{
    ApiConnector, BatchEntry, BatchJobStatus, BatchLaunch, BatchOutcome, ByteStream, JobId,
    ListFolderArg, SessionAuth, StorageApi,
};
use crate::{
    account::{
        Account, AccountType, FullAccount, LinkPermissions, LinkSettings, RawSpaceUsage, RootInfo,
        SharedLinkMetadata, SpaceAllocation,
    },
    error::{
        BadInputSnafu, DisconnectedSnafu, Error, IncorrectOffsetSnafu, NotFoundSnafu, PathSnafu,
        Result, TooManyOperationsSnafu, UploadCorruptedSnafu,
    },
    hashing::content_hash,
    types::{
        CommitInfo, Cursor, DeleteArg, DeletedMetadata, FileMetadata, FolderMetadata,
        LongpollResult, Metadata, PageResult, WriteMode,
    },
};

/// Operations a failure can be injected into.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) enum Op {
    GetMetadata,
    Upload,
    SessionStart,
    SessionAppend,
    SessionFinish,
    Download,
    ListFolder,
    ListFolderContinue,
    Longpoll,
    DeleteBatch,
    CreateFolderBatch,
    CurrentAccount,
    RevokeToken,
}

/// Injected failure for the next call of an [`Op`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Failure {
    BadInput(String),
    Disconnected,
    NotFound,
    Path,
    TooManyOperations,
    /// Report a hash mismatch without applying the request.
    Corrupted,
    /// Apply the request, then claim the offset was wrong, as if the
    /// acknowledgement was lost on the way back.
    ApplyThenIncorrectOffset,
}

impl Failure {
    fn into_error(self, path: &str) -> Error {
        match self {
            Self::BadInput(message) => BadInputSnafu { message }.build(),
            Self::Disconnected => DisconnectedSnafu { message: "connection reset" }.build(),
            Self::NotFound => NotFoundSnafu { path }.build(),
            Self::Path => PathSnafu {
                path,
                message: "path/malformed_path/",
            }
            .build(),
            Self::TooManyOperations => TooManyOperationsSnafu {
                message: "too_many_write_operations",
            }
            .build(),
            Self::Corrupted | Self::ApplyThenIncorrectOffset => UploadCorruptedSnafu { path }.build(),
        }
    }
}

/// Every request the mock received, in order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Call {
    GetMetadata(String),
    Upload { path: String, len: usize },
    SessionStart { len: usize },
    SessionAppend { offset: u64, len: usize },
    SessionFinish { offset: u64, len: usize },
    Download(String),
    ListFolder(String),
    ListFolderContinue(Cursor),
    LatestCursor(String),
    Longpoll(Cursor),
    DeleteBatch(usize),
    DeleteBatchCheck(JobId),
    CreateFolderBatch(usize),
    CreateFolderBatchCheck(JobId),
    Delete(String),
    Move { from: String, to: String },
    CreateFolder(String),
    ListRevisions(String),
    Restore { path: String, rev: String },
    CreateSharedLink(String),
    ListSharedLinks(Option<Cursor>),
    RevokeSharedLink(String),
    CurrentAccount,
    Account(String),
    SpaceUsage,
    RevokeToken,
}

#[derive(Debug, Clone)]
struct StoredFile {
    display:         String,
    data:            Vec<u8>,
    rev:             String,
    client_modified: Timestamp,
    server_modified: Timestamp,
    symlink_target:  Option<String>,
}

#[derive(Debug, Default)]
struct MockInner {
    files:             BTreeMap<String, StoredFile>,
    history:           HashMap<String, Vec<StoredFile>>,
    folders:           BTreeSet<String>,
    sessions:          HashMap<String, Vec<u8>>,
    next_id:           u64,
    calls:             Vec<Call>,
    failures:          VecDeque<(Op, Failure)>,
    corrupt_downloads: usize,
    server_clock:      Option<Timestamp>,
    list_pages:        VecDeque<PageResult<Metadata>>,
    link_pages:        VecDeque<PageResult<SharedLinkMetadata>>,
    longpolls:         VecDeque<LongpollResult>,
    delete_launches:   VecDeque<BatchLaunch>,
    delete_statuses:   VecDeque<BatchJobStatus>,
    create_launches:   VecDeque<BatchLaunch>,
    create_statuses:   VecDeque<BatchJobStatus>,
    reverse_entries:   bool,
    root_info:         Option<RootInfo>,
    space_usage:       Option<RawSpaceUsage>,
    connections:       Vec<SessionAuth>,
}

#[derive(Debug, Clone, Default)]
pub(crate) struct MockApi {
    inner: Arc<Mutex<MockInner>>,
}

fn key(path: &str) -> String { path.to_lowercase() }

fn file_name(path: &str) -> String { path.rsplit('/').next().unwrap_or_default().to_string() }

impl StoredFile {
    fn metadata(&self) -> FileMetadata {
        FileMetadata {
            name:            file_name(&self.display),
            path_lower:      key(&self.display),
            path_display:    self.display.clone(),
            id:              format!("id:{}", key(&self.display)),
            client_modified: self.client_modified,
            server_modified: self.server_modified,
            rev:             self.rev.clone(),
            size:            self.data.len() as u64,
            content_hash:    Some(content_hash(&self.data)),
            symlink_target:  self.symlink_target.clone(),
            shared:          false,
            modified_by:     None,
            is_downloadable: true,
        }
    }
}

fn folder_metadata(path: &str) -> FolderMetadata {
    FolderMetadata {
        name:         file_name(path),
        path_lower:   key(path),
        path_display: path.to_string(),
        id:           format!("id:{}", key(path)),
        shared:       false,
    }
}

impl MockApi {
    pub(crate) fn new() -> Self { Self::default() }

    fn with_inner<T>(&self, f: impl FnOnce(&mut MockInner) -> T) -> T {
        let mut inner = self.inner.lock().unwrap();
        f(&mut inner)
    }

    /// Fail the next call of `op`.
    pub(crate) fn fail_next(&self, op: Op, failure: Failure) {
        self.with_inner(|inner| inner.failures.push_back((op, failure)));
    }

    /// Serve the next `count` downloads with a wrong declared hash.
    pub(crate) fn corrupt_next_downloads(&self, count: usize) {
        self.with_inner(|inner| inner.corrupt_downloads = count);
    }

    /// Pin the server clock used for `server_modified`.
    pub(crate) fn set_server_clock(&self, now: Timestamp) {
        self.with_inner(|inner| inner.server_clock = Some(now));
    }

    pub(crate) fn queue_list_page(&self, page: PageResult<Metadata>) {
        self.with_inner(|inner| inner.list_pages.push_back(page));
    }

    pub(crate) fn queue_link_page(&self, page: PageResult<SharedLinkMetadata>) {
        self.with_inner(|inner| inner.link_pages.push_back(page));
    }

    pub(crate) fn queue_longpoll(&self, result: LongpollResult) {
        self.with_inner(|inner| inner.longpolls.push_back(result));
    }

    pub(crate) fn queue_delete_launch(&self, launch: BatchLaunch) {
        self.with_inner(|inner| inner.delete_launches.push_back(launch));
    }

    pub(crate) fn queue_delete_status(&self, status: BatchJobStatus) {
        self.with_inner(|inner| inner.delete_statuses.push_back(status));
    }

    pub(crate) fn queue_create_launch(&self, launch: BatchLaunch) {
        self.with_inner(|inner| inner.create_launches.push_back(launch));
    }

    pub(crate) fn queue_create_status(&self, status: BatchJobStatus) {
        self.with_inner(|inner| inner.create_statuses.push_back(status));
    }

    /// Return immediate batch entries in reverse order.
    pub(crate) fn reverse_batch_entries(&self) {
        self.with_inner(|inner| inner.reverse_entries = true);
    }

    pub(crate) fn set_root_info(&self, root_info: RootInfo) {
        self.with_inner(|inner| inner.root_info = Some(root_info));
    }

    pub(crate) fn set_space_usage(&self, usage: RawSpaceUsage) {
        self.with_inner(|inner| inner.space_usage = Some(usage));
    }

    /// Store a file directly, bypassing the upload path.
    pub(crate) fn put_file(&self, path: &str, data: &[u8], client_modified: Timestamp) {
        self.with_inner(|inner| {
            inner.store(path, data.to_vec(), client_modified, None);
        });
    }

    pub(crate) fn put_symlink(&self, path: &str, target: &str) {
        self.with_inner(|inner| {
            let now = inner.now();
            inner.store(path, Vec::new(), now, Some(target.to_string()));
        });
    }

    pub(crate) fn put_folder(&self, path: &str) {
        self.with_inner(|inner| {
            inner.folders.insert(key(path));
        });
    }

    pub(crate) fn file(&self, path: &str) -> Option<Vec<u8>> {
        self.with_inner(|inner| inner.files.get(&key(path)).map(|f| f.data.clone()))
    }

    pub(crate) fn has_folder(&self, path: &str) -> bool {
        self.with_inner(|inner| inner.folders.contains(&key(path)))
    }

    pub(crate) fn calls(&self) -> Vec<Call> { self.with_inner(|inner| inner.calls.clone()) }

    pub(crate) fn connections(&self) -> Vec<SessionAuth> {
        self.with_inner(|inner| inner.connections.clone())
    }

    /// Number of recorded calls matching `pred`.
    pub(crate) fn count(&self, pred: impl Fn(&Call) -> bool) -> usize {
        self.with_inner(|inner| inner.calls.iter().filter(|call| pred(call)).count())
    }
}

impl MockInner {
    /// Historic version addressed by a `rev:` path.
    fn revision(&self, path: &str) -> Option<StoredFile> {
        let rev = path.strip_prefix("rev:")?;
        self.history
            .values()
            .flatten()
            .find(|file| file.rev == rev)
            .cloned()
    }

    fn now(&self) -> Timestamp { self.server_clock.unwrap_or_else(Timestamp::now) }

    fn next_id(&mut self) -> u64 {
        self.next_id += 1;
        self.next_id
    }

    fn take_failure(&mut self, op: Op) -> Option<Failure> {
        let pos = self.failures.iter().position(|(target, _)| *target == op)?;
        self.failures.remove(pos).map(|(_, failure)| failure)
    }

    fn check(&mut self, op: Op, path: &str) -> Result<()> {
        match self.take_failure(op) {
            Some(failure) => Err(failure.into_error(path)),
            None => Ok(()),
        }
    }

    fn store(
        &mut self,
        path: &str,
        data: Vec<u8>,
        client_modified: Timestamp,
        symlink_target: Option<String>,
    ) -> FileMetadata {
        let rev = format!("{:09x}", self.next_id());
        let stored = StoredFile {
            display: path.to_string(),
            data,
            rev,
            client_modified,
            server_modified: self.now(),
            symlink_target,
        };
        let md = stored.metadata();
        self.history.entry(key(path)).or_default().push(stored.clone());
        self.files.insert(key(path), stored);
        md
    }

    fn commit(&mut self, commit: &CommitInfo, data: Vec<u8>) -> Result<FileMetadata> {
        let existing = self.files.get(&key(&commit.path)).map(|f| f.rev.clone());
        let path = match (&commit.mode, existing) {
            (WriteMode::Overwrite, _) | (_, None) => commit.path.clone(),
            (WriteMode::Update(rev), Some(current)) if *rev == current => commit.path.clone(),
            (_, Some(_)) if commit.autorename => format!("{} (1)", commit.path),
            (_, Some(_)) => {
                return PathSnafu {
                    path:    commit.path.as_str(),
                    message: "path/conflict/file/",
                }
                .fail();
            }
        };
        Ok(self.store(&path, data, commit.client_modified, None))
    }

    fn verify(data: &[u8], hash: &str, path: &str) -> Result<()> {
        if content_hash(data) == hash {
            Ok(())
        } else {
            UploadCorruptedSnafu { path }.fail()
        }
    }

    fn delete_entry(&mut self, path: &str) -> BatchOutcome {
        let k = key(path);
        let removed_file = self.files.remove(&k).is_some();
        let removed_folder = self.folders.remove(&k);
        if removed_file || removed_folder {
            BatchOutcome::Success {
                metadata: Metadata::Deleted(DeletedMetadata {
                    name:         file_name(path),
                    path_lower:   k,
                    path_display: path.to_string(),
                }),
            }
        } else {
            BatchOutcome::Failure {
                error_summary: "path_lookup/not_found/".to_string(),
            }
        }
    }

    fn create_entry(&mut self, path: &str) -> BatchOutcome {
        if self.folders.insert(key(path)) {
            BatchOutcome::Success {
                metadata: Metadata::Folder(folder_metadata(path)),
            }
        } else {
            BatchOutcome::Failure {
                error_summary: "path/conflict/folder/".to_string(),
            }
        }
    }

    fn entries(&self, outcomes: Vec<BatchOutcome>) -> Vec<BatchEntry> {
        let mut entries: Vec<BatchEntry> = outcomes
            .into_iter()
            .enumerate()
            .map(|(index, outcome)| BatchEntry { index, outcome })
            .collect();
        if self.reverse_entries {
            entries.reverse();
        }
        entries
    }

    fn listing(&self, path: &str, recursive: bool) -> Vec<Metadata> {
        let prefix = if path.is_empty() || path == "/" {
            "/".to_string()
        } else {
            format!("{}/", key(path))
        };
        let direct = |candidate: &str| {
            candidate.starts_with(&prefix)
                && (recursive || !candidate[prefix.len()..].contains('/'))
        };
        let folders = self
            .folders
            .iter()
            .filter(|folder| direct(folder.as_str()))
            .map(|folder| Metadata::Folder(folder_metadata(folder)));
        let files = self
            .files
            .iter()
            .filter(|(k, _)| direct(k.as_str()))
            .map(|(_, file)| Metadata::File(file.metadata()));
        folders.chain(files).collect()
    }

    fn account(&self) -> FullAccount {
        FullAccount {
            account:        Account {
                account_id:        "dbid:mock".to_string(),
                display_name:      "Mock User".to_string(),
                email:             "mock@example.com".to_string(),
                abbreviated_name:  "MU".to_string(),
                email_verified:    true,
                disabled:          false,
                profile_photo_url: None,
            },
            account_type:   AccountType::Basic,
            root_info:      self.root_info.clone().unwrap_or(RootInfo::User {
                root_namespace_id: "1".to_string(),
                home_namespace_id: "1".to_string(),
            }),
            country:        None,
            locale:         "en".to_string(),
            team:           None,
            team_member_id: None,
        }
    }
}

#[async_trait]
impl StorageApi for MockApi {
    async fn get_metadata(&self, path: &str) -> Result<Metadata> {
        self.with_inner(|inner| {
            inner.calls.push(Call::GetMetadata(path.to_string()));
            inner.check(Op::GetMetadata, path)?;
            if let Some(file) = inner.revision(path) {
                return Ok(Metadata::File(file.metadata()));
            }
            let k = key(path);
            if let Some(file) = inner.files.get(&k) {
                return Ok(Metadata::File(file.metadata()));
            }
            if inner.folders.contains(&k) {
                return Ok(Metadata::Folder(folder_metadata(path)));
            }
            NotFoundSnafu { path }.fail()
        })
    }

    async fn upload(
        &self,
        commit: &CommitInfo,
        content_hash: &str,
        data: Bytes,
    ) -> Result<FileMetadata> {
        self.with_inner(|inner| {
            inner.calls.push(Call::Upload {
                path: commit.path.clone(),
                len:  data.len(),
            });
            inner.check(Op::Upload, &commit.path)?;
            MockInner::verify(&data, content_hash, &commit.path)?;
            inner.commit(commit, data.to_vec())
        })
    }

    async fn upload_session_start(&self, content_hash: &str, data: Bytes) -> Result<String> {
        self.with_inner(|inner| {
            inner.calls.push(Call::SessionStart { len: data.len() });
            inner.check(Op::SessionStart, "")?;
            MockInner::verify(&data, content_hash, "")?;
            let session_id = format!("session-{}", inner.next_id());
            inner.sessions.insert(session_id.clone(), data.to_vec());
            Ok(session_id)
        })
    }

    async fn upload_session_append(
        &self,
        session_id: &str,
        offset: u64,
        content_hash: &str,
        data: Bytes,
    ) -> Result<()> {
        self.with_inner(|inner| {
            inner.calls.push(Call::SessionAppend {
                offset,
                len: data.len(),
            });
            let failure = inner.take_failure(Op::SessionAppend);
            let buffer = inner
                .sessions
                .get_mut(session_id)
                .ok_or_else(|| NotFoundSnafu { path: session_id }.build())?;
            let received = buffer.len() as u64;
            match failure {
                Some(Failure::ApplyThenIncorrectOffset) => {
                    buffer.extend_from_slice(&data);
                    return IncorrectOffsetSnafu {
                        correct_offset: buffer.len() as u64,
                    }
                    .fail();
                }
                Some(failure) => return Err(failure.into_error(session_id)),
                None => {}
            }
            if offset != received {
                return IncorrectOffsetSnafu {
                    correct_offset: received,
                }
                .fail();
            }
            MockInner::verify(&data, content_hash, session_id)?;
            buffer.extend_from_slice(&data);
            Ok(())
        })
    }

    async fn upload_session_finish(
        &self,
        session_id: &str,
        offset: u64,
        content_hash: &str,
        data: Bytes,
        commit: &CommitInfo,
    ) -> Result<FileMetadata> {
        self.with_inner(|inner| {
            inner.calls.push(Call::SessionFinish {
                offset,
                len: data.len(),
            });
            inner.check(Op::SessionFinish, &commit.path)?;
            let received = inner
                .sessions
                .get(session_id)
                .map(|buffer| buffer.len() as u64)
                .ok_or_else(|| NotFoundSnafu { path: session_id }.build())?;
            if offset != received {
                return IncorrectOffsetSnafu {
                    correct_offset: received,
                }
                .fail();
            }
            MockInner::verify(&data, content_hash, &commit.path)?;
            let mut buffer = inner.sessions.remove(session_id).unwrap_or_default();
            buffer.extend_from_slice(&data);
            inner.commit(commit, buffer)
        })
    }

    async fn download(&self, path: &str) -> Result<(FileMetadata, ByteStream)> {
        self.with_inner(|inner| {
            inner.calls.push(Call::Download(path.to_string()));
            inner.check(Op::Download, path)?;
            let file = inner
                .revision(path)
                .or_else(|| inner.files.get(&key(path)).cloned());
            let file = file.ok_or_else(|| NotFoundSnafu { path }.build())?;
            let mut md = file.metadata();
            if inner.corrupt_downloads > 0 {
                inner.corrupt_downloads -= 1;
                md.content_hash = Some(content_hash(b"something else"));
            }
            let pieces: Vec<Result<Bytes>> = file
                .data
                .chunks(3000)
                .map(|piece| Ok(Bytes::copy_from_slice(piece)))
                .collect();
            let body: ByteStream = Box::pin(stream::iter(pieces));
            Ok((md, body))
        })
    }

    async fn list_folder(&self, arg: &ListFolderArg) -> Result<PageResult<Metadata>> {
        self.with_inner(|inner| {
            inner.calls.push(Call::ListFolder(arg.path.clone()));
            inner.check(Op::ListFolder, &arg.path)?;
            if let Some(page) = inner.list_pages.pop_front() {
                return Ok(page);
            }
            let cursor = Cursor::new(format!("cursor-{}", inner.next_id()));
            Ok(PageResult {
                entries: inner.listing(&arg.path, arg.recursive),
                has_more: false,
                cursor,
            })
        })
    }

    async fn list_folder_continue(&self, cursor: &Cursor) -> Result<PageResult<Metadata>> {
        self.with_inner(|inner| {
            inner.calls.push(Call::ListFolderContinue(cursor.clone()));
            inner.check(Op::ListFolderContinue, "")?;
            Ok(inner.list_pages.pop_front().unwrap_or_else(|| PageResult {
                entries:  Vec::new(),
                has_more: false,
                cursor:   cursor.clone(),
            }))
        })
    }

    async fn get_latest_cursor(&self, arg: &ListFolderArg) -> Result<Cursor> {
        self.with_inner(|inner| {
            inner.calls.push(Call::LatestCursor(arg.path.clone()));
            Ok(Cursor::new(format!("latest-{}", inner.next_id())))
        })
    }

    async fn longpoll(&self, cursor: &Cursor, _timeout_secs: u64) -> Result<LongpollResult> {
        self.with_inner(|inner| {
            inner.calls.push(Call::Longpoll(cursor.clone()));
            inner.check(Op::Longpoll, "")?;
            Ok(inner.longpolls.pop_front().unwrap_or(LongpollResult {
                changes: false,
                backoff: None,
            }))
        })
    }

    async fn delete_batch(&self, entries: &[DeleteArg]) -> Result<BatchLaunch> {
        self.with_inner(|inner| {
            inner.calls.push(Call::DeleteBatch(entries.len()));
            inner.check(Op::DeleteBatch, "")?;
            if let Some(launch) = inner.delete_launches.pop_front() {
                return Ok(launch);
            }
            let outcomes = entries
                .iter()
                .map(|entry| inner.delete_entry(&entry.path))
                .collect();
            Ok(BatchLaunch::Complete {
                entries: inner.entries(outcomes),
            })
        })
    }

    async fn delete_batch_check(&self, job: &JobId) -> Result<BatchJobStatus> {
        self.with_inner(|inner| {
            inner.calls.push(Call::DeleteBatchCheck(job.clone()));
            Ok(inner
                .delete_statuses
                .pop_front()
                .unwrap_or(BatchJobStatus::InProgress))
        })
    }

    async fn create_folder_batch(&self, paths: &[String], _autorename: bool) -> Result<BatchLaunch> {
        self.with_inner(|inner| {
            inner.calls.push(Call::CreateFolderBatch(paths.len()));
            inner.check(Op::CreateFolderBatch, "")?;
            if let Some(launch) = inner.create_launches.pop_front() {
                return Ok(launch);
            }
            let outcomes = paths.iter().map(|path| inner.create_entry(path)).collect();
            Ok(BatchLaunch::Complete {
                entries: inner.entries(outcomes),
            })
        })
    }

    async fn create_folder_batch_check(&self, job: &JobId) -> Result<BatchJobStatus> {
        self.with_inner(|inner| {
            inner.calls.push(Call::CreateFolderBatchCheck(job.clone()));
            Ok(inner
                .create_statuses
                .pop_front()
                .unwrap_or(BatchJobStatus::InProgress))
        })
    }

    async fn delete(&self, arg: &DeleteArg) -> Result<Metadata> {
        self.with_inner(|inner| {
            inner.calls.push(Call::Delete(arg.path.clone()));
            match inner.delete_entry(&arg.path) {
                BatchOutcome::Success { metadata } => Ok(metadata),
                BatchOutcome::Failure { .. } => NotFoundSnafu {
                    path: arg.path.as_str(),
                }
                .fail(),
            }
        })
    }

    async fn move_entry(&self, from: &str, to: &str, _autorename: bool) -> Result<Metadata> {
        self.with_inner(|inner| {
            inner.calls.push(Call::Move {
                from: from.to_string(),
                to:   to.to_string(),
            });
            let mut file = inner
                .files
                .remove(&key(from))
                .ok_or_else(|| NotFoundSnafu { path: from }.build())?;
            file.display = to.to_string();
            let md = file.metadata();
            inner.files.insert(key(to), file);
            Ok(Metadata::File(md))
        })
    }

    async fn create_folder(&self, path: &str, _autorename: bool) -> Result<FolderMetadata> {
        self.with_inner(|inner| {
            inner.calls.push(Call::CreateFolder(path.to_string()));
            match inner.create_entry(path) {
                BatchOutcome::Success { .. } => Ok(folder_metadata(path)),
                BatchOutcome::Failure { error_summary } => PathSnafu {
                    path,
                    message: error_summary,
                }
                .fail(),
            }
        })
    }

    async fn list_revisions(&self, path: &str, limit: u32) -> Result<Vec<FileMetadata>> {
        self.with_inner(|inner| {
            inner.calls.push(Call::ListRevisions(path.to_string()));
            let history = inner
                .history
                .get(&key(path))
                .ok_or_else(|| NotFoundSnafu { path }.build())?;
            Ok(history
                .iter()
                .rev()
                .take(limit as usize)
                .map(StoredFile::metadata)
                .collect())
        })
    }

    async fn restore(&self, path: &str, rev: &str) -> Result<FileMetadata> {
        self.with_inner(|inner| {
            inner.calls.push(Call::Restore {
                path: path.to_string(),
                rev:  rev.to_string(),
            });
            let old = inner
                .history
                .get(&key(path))
                .and_then(|history| history.iter().find(|file| file.rev == rev))
                .cloned()
                .ok_or_else(|| NotFoundSnafu { path }.build())?;
            Ok(inner.store(path, old.data, old.client_modified, None))
        })
    }

    async fn create_shared_link(
        &self,
        path: &str,
        settings: &LinkSettings,
    ) -> Result<SharedLinkMetadata> {
        self.with_inner(|inner| {
            inner.calls.push(Call::CreateSharedLink(path.to_string()));
            Ok(SharedLinkMetadata {
                url:         format!("https://share.example.com/{}", key(path).trim_start_matches('/')),
                name:        file_name(path),
                path_lower:  Some(key(path)),
                expires:     settings.expires,
                permissions: LinkPermissions {
                    can_revoke:         true,
                    allow_download:     settings.allow_download.unwrap_or(true),
                    effective_audience: settings.audience,
                    link_access_level:  settings.access,
                    require_password:   settings.password.is_some(),
                },
            })
        })
    }

    async fn list_shared_links(
        &self,
        _path: Option<&str>,
        cursor: Option<&Cursor>,
    ) -> Result<PageResult<SharedLinkMetadata>> {
        self.with_inner(|inner| {
            inner.calls.push(Call::ListSharedLinks(cursor.cloned()));
            Ok(inner.link_pages.pop_front().unwrap_or_default())
        })
    }

    async fn revoke_shared_link(&self, url: &str) -> Result<()> {
        self.with_inner(|inner| {
            inner.calls.push(Call::RevokeSharedLink(url.to_string()));
            Ok(())
        })
    }

    async fn get_current_account(&self) -> Result<FullAccount> {
        self.with_inner(|inner| {
            inner.calls.push(Call::CurrentAccount);
            inner.check(Op::CurrentAccount, "")?;
            Ok(inner.account())
        })
    }

    async fn get_account(&self, account_id: &str) -> Result<Account> {
        self.with_inner(|inner| {
            inner.calls.push(Call::Account(account_id.to_string()));
            let mut account = inner.account().account;
            account.account_id = account_id.to_string();
            Ok(account)
        })
    }

    async fn get_space_usage(&self) -> Result<RawSpaceUsage> {
        self.with_inner(|inner| {
            inner.calls.push(Call::SpaceUsage);
            Ok(inner.space_usage.clone().unwrap_or(RawSpaceUsage {
                used:       0,
                allocation: SpaceAllocation::Individual { allocated: 0 },
            }))
        })
    }

    async fn revoke_token(&self) -> Result<()> {
        self.with_inner(|inner| {
            inner.calls.push(Call::RevokeToken);
            inner.check(Op::RevokeToken, "")
        })
    }
}

/// Connector that hands out the same [`MockApi`] for every session and
/// records how it was asked to authenticate.
#[derive(Debug, Clone, Default)]
pub(crate) struct MockConnector {
    pub(crate) api: MockApi,
}

impl ApiConnector for MockConnector {
    fn connect(&self, auth: &SessionAuth) -> Result<Arc<dyn StorageApi>> {
        self.api
            .with_inner(|inner| inner.connections.push(auth.clone()));
        Ok(Arc::new(self.api.clone()))
    }
}
