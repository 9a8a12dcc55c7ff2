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

use std::{io, path::Path};

use filetime::FileTime;
use futures::StreamExt;
use jiff::Timestamp;
use snafu::{IntoError, ResultExt};
use tokio::fs::{self, OpenOptions};
use tracing::{debug, instrument, warn};

use super::{DOWNLOAD_CHUNK_SIZE, report};
use crate::{
    api::{ByteStream, StorageApi},
    error::{DataCorruptionSnafu, FileIoSnafu, PathSnafu, Result},
    hashing::HashingWriter,
    types::{FileMetadata, Metadata, ProgressSink},
};

/// Download `remote` into `local`.
///
/// `remote` is a path or a `rev:`-prefixed revision id. Symbolic links are
/// recreated locally without transferring any bytes. Regular files are
/// streamed through the content hasher and removed again when the stream
/// breaks or the digest does not match the declared one.
#[instrument(skip(api, local, progress), fields(local = %local.display()), err(Display))]
pub(crate) async fn download_file(
    api: &dyn StorageApi,
    remote: &str,
    local: &Path,
    progress: Option<&dyn ProgressSink>,
) -> Result<FileMetadata> {
    let metadata = match api.get_metadata(remote).await? {
        Metadata::File(file) => file,
        _ => {
            return PathSnafu {
                path:    remote,
                message: "path/not_file/",
            }
            .fail();
        }
    };

    let metadata = if let Some(target) = &metadata.symlink_target {
        debug!(link_target = %target, "recreating symbolic link");
        remove_existing(local).await?;
        create_symlink(target, local).await?;
        metadata
    } else {
        let (metadata, body) = api.download(remote).await?;
        if let Some(parent) = local.parent() {
            fs::create_dir_all(parent)
                .await
                .context(FileIoSnafu { path: parent })?;
        }
        match write_verified(body, local, metadata.content_hash.as_deref(), progress).await {
            Ok(()) => metadata,
            Err(err) => {
                discard(local).await;
                return Err(err);
            }
        }
    };

    let mtime = [metadata.client_modified, metadata.server_modified, Timestamp::now()]
        .into_iter()
        .min()
        .unwrap_or(metadata.server_modified);
    filetime::set_symlink_file_times(local, FileTime::now(), file_time(mtime))
        .context(FileIoSnafu { path: local })?;

    Ok(metadata)
}

async fn write_verified(
    mut body: ByteStream,
    local: &Path,
    expected: Option<&str>,
    progress: Option<&dyn ProgressSink>,
) -> Result<()> {
    remove_existing(local).await?;
    // `create_new` refuses to open through a symlink left at the path.
    let file = OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(local)
        .await
        .context(FileIoSnafu { path: local })?;

    let mut writer = HashingWriter::new(file);
    while let Some(bytes) = body.next().await {
        let bytes = bytes?;
        for piece in bytes.chunks(DOWNLOAD_CHUNK_SIZE) {
            writer
                .write_chunk(piece)
                .await
                .context(FileIoSnafu { path: local })?;
            report(progress, writer.position());
        }
    }
    let (file, actual) = writer.finish().await.context(FileIoSnafu { path: local })?;
    file.sync_all().await.context(FileIoSnafu { path: local })?;

    match expected {
        Some(expected) if expected != actual => {
            warn!(expected, %actual, "downloaded content does not match declared hash");
            DataCorruptionSnafu {
                path: local.display().to_string(),
                expected,
                actual,
            }
            .fail()
        }
        _ => Ok(()),
    }
}

async fn remove_existing(local: &Path) -> Result<()> {
    match fs::remove_file(local).await {
        Err(err) if err.kind() != io::ErrorKind::NotFound => {
            Err(FileIoSnafu { path: local }.into_error(err))
        }
        _ => Ok(()),
    }
}

async fn discard(local: &Path) {
    if let Err(err) = fs::remove_file(local).await {
        if err.kind() != io::ErrorKind::NotFound {
            warn!(error = %err, "failed to remove partial download");
        }
    }
}

#[cfg(unix)]
async fn create_symlink(target: &str, local: &Path) -> Result<()> {
    fs::symlink(target, local)
        .await
        .context(FileIoSnafu { path: local })
}

#[cfg(not(unix))]
async fn create_symlink(_target: &str, local: &Path) -> Result<()> {
    Err(FileIoSnafu { path: local }.into_error(io::Error::new(
        io::ErrorKind::Unsupported,
        "symbolic links are not supported on this platform",
    )))
}

fn file_time(ts: Timestamp) -> FileTime {
    let nanos = u32::try_from(ts.subsec_nanosecond()).unwrap_or(0);
    FileTime::from_unix_time(ts.as_second(), nanos)
}
