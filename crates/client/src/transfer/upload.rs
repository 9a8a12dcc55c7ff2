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
    future::Future,
    io::SeekFrom,
    path::{Path, PathBuf},
    time::SystemTime,
};

use bytes::Bytes;
use jiff::Timestamp;
use snafu::{ResultExt, ensure};
use tokio::{
    fs::{self, File},
    io::{AsyncReadExt, AsyncSeekExt},
};
use tracing::{debug, instrument};

use super::{report, report_done};
use crate::{
    api::StorageApi,
    config::clamp_chunk_size,
    error::{ChunkTooLargeSnafu, Error, FileIoSnafu, InvalidArgumentSnafu, PathSnafu, Result},
    hashing::content_hash,
    retry::RetryPolicy,
    types::{CommitInfo, FileMetadata, ProgressSink, WriteMode},
};

/// Per-call upload settings.
#[derive(Clone, Copy)]
pub(crate) struct UploadOptions<'a> {
    pub chunk_size: u64,
    pub autorename: bool,
    pub progress:   Option<&'a dyn ProgressSink>,
}

/// Local file with a read position that always equals the next offset the
/// server expects.
struct ChunkReader {
    file:     File,
    path:     PathBuf,
    position: u64,
}

impl ChunkReader {
    async fn read_chunk(&mut self, limit: u64) -> Result<Bytes> {
        let mut buf = Vec::with_capacity(usize::try_from(limit).unwrap_or_default());
        (&mut self.file)
            .take(limit)
            .read_to_end(&mut buf)
            .await
            .context(FileIoSnafu { path: &self.path })?;
        self.position += buf.len() as u64;
        Ok(Bytes::from(buf))
    }

    async fn seek_to(&mut self, offset: u64) -> Result<()> {
        self.file
            .seek(SeekFrom::Start(offset))
            .await
            .context(FileIoSnafu { path: &self.path })?;
        self.position = offset;
        Ok(())
    }

    /// Read up to `limit` bytes, hash them and hand them to `send` together
    /// with the offset they start at.
    ///
    /// On failure the read position moves to the server's corrected offset
    /// when one is reported, and back to where the chunk started otherwise.
    async fn send_chunk<T, F, Fut>(&mut self, limit: u64, send: F) -> Result<T>
    where
        F: FnOnce(u64, String, Bytes) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let start = self.position;
        let data = self.read_chunk(limit).await?;
        let hash = content_hash(&data);

        match send(start, hash, data).await {
            Ok(value) => Ok(value),
            Err(err) => {
                let rewind_to = match &err {
                    Error::IncorrectOffset { correct_offset, .. } => {
                        debug!(start, correct_offset, "server corrected upload offset");
                        *correct_offset
                    }
                    _ => start,
                };
                self.seek_to(rewind_to).await?;
                Err(err)
            }
        }
    }
}

fn modified_time(modified: SystemTime, path: &Path) -> Result<Timestamp> {
    // Whole seconds only, the server truncates anyway.
    Timestamp::try_from(modified)
        .and_then(|ts| Timestamp::from_second(ts.as_second()))
        .map_err(|e| {
            InvalidArgumentSnafu {
                message: format!("modification time of {} is out of range: {e}", path.display()),
            }
            .build()
        })
}

/// Upload `local` to `remote`.
///
/// Payloads up to one chunk go out in a single request. Larger ones open a
/// session, append full chunks while more than one chunk is left, and finish
/// with the remainder. Every chunk request runs under `retry`.
#[instrument(skip(api, retry, local, options), fields(local = %local.display()), err(Display))]
pub(crate) async fn upload_file(
    api: &dyn StorageApi,
    retry: &RetryPolicy,
    local: &Path,
    remote: &str,
    mode: WriteMode,
    options: UploadOptions<'_>,
) -> Result<FileMetadata> {
    if let WriteMode::Update(rev) = &mode {
        ensure!(
            !rev.is_empty(),
            InvalidArgumentSnafu {
                message: "update mode needs the revision being replaced",
            }
        );
    }

    let chunk_size = clamp_chunk_size(options.chunk_size);
    // Taken once, so a slow upload never sees its own writes.
    let stat = fs::symlink_metadata(local)
        .await
        .context(FileIoSnafu { path: local })?;
    ensure!(
        !stat.file_type().is_symlink(),
        PathSnafu {
            path:    local.display().to_string(),
            message: "refusing to upload through a symbolic link",
        }
    );
    let client_modified = modified_time(
        stat.modified().context(FileIoSnafu { path: local })?,
        local,
    )?;

    let file = File::open(local).await.context(FileIoSnafu { path: local })?;
    let size = file
        .metadata()
        .await
        .context(FileIoSnafu { path: local })?
        .len();
    let reader = ChunkReader {
        file,
        path: local.to_path_buf(),
        position: 0,
    };
    let commit = CommitInfo {
        path: remote.to_string(),
        mode,
        autorename: options.autorename,
        client_modified,
    };

    debug!(size, chunk_size, "starting upload");
    if size <= chunk_size {
        upload_single(api, retry, reader, chunk_size, &commit, options.progress).await
    } else {
        upload_chunked(api, retry, reader, size, chunk_size, &commit, options.progress).await
    }
}

async fn upload_single(
    api: &dyn StorageApi,
    retry: &RetryPolicy,
    mut reader: ChunkReader,
    chunk_size: u64,
    commit: &CommitInfo,
    progress: Option<&dyn ProgressSink>,
) -> Result<FileMetadata> {
    let data = reader.read_chunk(chunk_size).await?;
    let hash = content_hash(&data);
    let hash = hash.as_str();

    let metadata = retry
        .execute(move || api.upload(commit, hash, data.clone()))
        .await?;
    report(progress, reader.position);
    Ok(metadata)
}

async fn upload_chunked(
    api: &dyn StorageApi,
    retry: &RetryPolicy,
    reader: ChunkReader,
    size: u64,
    chunk_size: u64,
    commit: &CommitInfo,
    progress: Option<&dyn ProgressSink>,
) -> Result<FileMetadata> {
    let (mut reader, started) = retry
        .execute_with_context(reader, move |mut reader: ChunkReader| async move {
            let result = reader
                .send_chunk(chunk_size, move |_, hash, data| async move {
                    api.upload_session_start(&hash, data).await
                })
                .await;
            (reader, result)
        })
        .await;
    let session_id = started?;
    let session = session_id.as_str();
    debug!(session, "upload session started");
    report(progress, reader.position);

    while size.saturating_sub(reader.position) > chunk_size {
        let (next, appended) = retry
            .execute_with_context(reader, move |mut reader: ChunkReader| async move {
                let result = reader
                    .send_chunk(chunk_size, move |offset, hash, data| async move {
                        api.upload_session_append(session, offset, &hash, data)
                            .await
                    })
                    .await;
                (reader, result)
            })
            .await;
        reader = next;
        appended?;
        report(progress, reader.position);
    }

    let (_, finished) = finish_session(api, retry, reader, session, chunk_size, commit).await;
    let metadata = finished?;
    report_done(progress, size);
    Ok(metadata)
}

async fn finish_session(
    api: &dyn StorageApi,
    retry: &RetryPolicy,
    reader: ChunkReader,
    session: &str,
    chunk_size: u64,
    commit: &CommitInfo,
) -> (ChunkReader, Result<FileMetadata>) {
    retry
        .execute_with_context(reader, move |mut reader: ChunkReader| async move {
            // One byte past the limit is enough to tell the remainder is too big.
            let result = reader
                .send_chunk(chunk_size + 1, move |offset, hash, data| async move {
                    let len = data.len() as u64;
                    ensure!(
                        len <= chunk_size,
                        ChunkTooLargeSnafu {
                            size:  len,
                            limit: chunk_size,
                        }
                    );
                    api.upload_session_finish(session, offset, &hash, data, commit)
                        .await
                })
                .await;
            (reader, result)
        })
        .await
}
