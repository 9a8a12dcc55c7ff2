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

//! Bulk deletes and folder creation.
//!
//! Items are submitted in consecutive chunks. A chunk the server defers to a
//! job is polled until it settles, with a poll interval that grows with the
//! chunk length. Per-item results are put back in input order, and a failed
//! item becomes an `Err` in its slot instead of failing the whole call.

use std::time::Duration;

use futures::{FutureExt, future::BoxFuture};
use tracing::{debug, instrument, warn};

use crate::{
    api::{
        BatchEntry, BatchFailure, BatchJobStatus, BatchLaunch, BatchOutcome, JobId, StorageApi,
        error_from_summary,
    },
    config::clamp_batch_size,
    error::{ApiSnafu, Error, ErrorKind, Result, TooManyOperationsSnafu},
    types::{DeleteArg, Metadata},
};

/// Delay before the first status check of a deferred job.
const FIRST_POLL_DELAY: Duration = Duration::from_millis(500);

const DELETE_ENDPOINT: &str = "files/delete_batch";
const CREATE_FOLDER_ENDPOINT: &str = "files/create_folder_batch";

/// Result of one item of a batch.
pub type ItemResult = Result<Metadata>;

/// How a submitted chunk ended.
enum Settled {
    Complete(Vec<BatchEntry>),
    Failed(BatchFailure),
}

/// Interval between status checks: a tenth of a second per ten items,
/// rounded, never below one tenth.
fn poll_interval(len: usize) -> Duration {
    let tenths = ((len + 5) / 10).max(1);
    Duration::from_millis(100 * tenths as u64)
}

/// Wait for `launch` to settle, polling deferred jobs through `check`.
async fn settle<F, Fut>(launch: BatchLaunch, len: usize, mut check: F) -> Result<Settled>
where
    F: FnMut(JobId) -> Fut,
    Fut: Future<Output = Result<BatchJobStatus>>,
{
    let job = match launch {
        BatchLaunch::Complete { entries } => return Ok(Settled::Complete(entries)),
        BatchLaunch::AsyncJob { async_job_id } => async_job_id,
    };

    debug!(%job, len, "batch deferred to job");
    tokio::time::sleep(FIRST_POLL_DELAY).await;
    let interval = poll_interval(len);
    loop {
        match check(job.clone()).await? {
            BatchJobStatus::InProgress => tokio::time::sleep(interval).await,
            BatchJobStatus::Complete { entries } => return Ok(Settled::Complete(entries)),
            BatchJobStatus::Failed { reason } => return Ok(Settled::Failed(reason)),
        }
    }
}

/// Map `entries` back onto `paths` by index.
fn reassemble(endpoint: &str, paths: &[&str], entries: Vec<BatchEntry>) -> Vec<ItemResult> {
    let mut slots: Vec<Option<ItemResult>> = paths.iter().map(|_| None).collect();
    for BatchEntry { index, outcome } in entries {
        let Some(slot) = slots.get_mut(index) else {
            warn!(endpoint, index, "batch result for unknown index");
            continue;
        };
        *slot = Some(match outcome {
            BatchOutcome::Success { metadata } => Ok(metadata),
            BatchOutcome::Failure { error_summary } => Err(error_from_summary(
                endpoint,
                409,
                Some(paths[index]),
                &error_summary,
            )),
        });
    }

    slots
        .into_iter()
        .zip(paths)
        .map(|(slot, path)| {
            slot.unwrap_or_else(|| {
                Err(ApiSnafu {
                    endpoint,
                    status: 200u16,
                    summary: format!("no result returned for {path}"),
                }
                .build())
            })
        })
        .collect()
}

/// Every item of a chunk failed together.
fn fail_all(endpoint: &str, len: usize, reason: &BatchFailure) -> Vec<ItemResult> {
    (0..len)
        .map(|_| {
            Err(ApiSnafu {
                endpoint,
                status: 200u16,
                summary: reason.to_string(),
            }
            .build())
        })
        .collect()
}

/// Delete `entries` in chunks of at most `batch_size`.
///
/// A capacity failure stops the whole operation.
#[instrument(skip(api, entries), fields(count = entries.len()), err(Display))]
pub(crate) async fn remove_batch(
    api: &dyn StorageApi,
    entries: &[DeleteArg],
    batch_size: usize,
) -> Result<Vec<ItemResult>> {
    let batch_size = clamp_batch_size(batch_size);
    let mut results = Vec::with_capacity(entries.len());

    for chunk in entries.chunks(batch_size) {
        debug!(len = chunk.len(), "submitting delete batch");
        let launch = api.delete_batch(chunk).await?;
        let settled = settle(launch, chunk.len(), move |job| async move {
            api.delete_batch_check(&job).await
        })
        .await?;

        match settled {
            Settled::Complete(done) => {
                let paths: Vec<&str> = chunk.iter().map(|entry| entry.path.as_str()).collect();
                results.extend(reassemble(DELETE_ENDPOINT, &paths, done));
            }
            Settled::Failed(reason) if reason.is_capacity() => {
                return TooManyOperationsSnafu {
                    message: reason.to_string(),
                }
                .fail();
            }
            Settled::Failed(reason) => {
                warn!(%reason, "delete batch job failed");
                results.extend(fail_all(DELETE_ENDPOINT, chunk.len(), &reason));
            }
        }
    }

    Ok(results)
}

/// Create the folders in `paths` in chunks of at most `batch_size`.
///
/// A chunk rejected for capacity is resubmitted in halves. A single folder
/// that still exceeds capacity is a hard failure.
#[instrument(skip(api, paths), fields(count = paths.len()), err(Display))]
pub(crate) async fn make_dir_batch(
    api: &dyn StorageApi,
    paths: &[String],
    batch_size: usize,
    autorename: bool,
) -> Result<Vec<ItemResult>> {
    create_chunks(api, paths, clamp_batch_size(batch_size), autorename).await
}

fn create_chunks<'a>(
    api: &'a dyn StorageApi,
    paths: &'a [String],
    batch_size: usize,
    autorename: bool,
) -> BoxFuture<'a, Result<Vec<ItemResult>>> {
    async move {
        let mut results = Vec::with_capacity(paths.len());
        for chunk in paths.chunks(batch_size) {
            results.extend(create_chunk(api, chunk, autorename).await?);
        }
        Ok(results)
    }
    .boxed()
}

async fn create_chunk(
    api: &dyn StorageApi,
    chunk: &[String],
    autorename: bool,
) -> Result<Vec<ItemResult>> {
    debug!(len = chunk.len(), "submitting create folder batch");
    let settled = match api.create_folder_batch(chunk, autorename).await {
        Ok(launch) => {
            settle(launch, chunk.len(), move |job| async move {
                api.create_folder_batch_check(&job).await
            })
            .await?
        }
        Err(err) if err.kind() == ErrorKind::Capacity => Settled::Failed(capacity_reason(&err)),
        Err(err) => return Err(err),
    };

    match settled {
        Settled::Complete(done) => {
            let paths: Vec<&str> = chunk.iter().map(String::as_str).collect();
            Ok(reassemble(CREATE_FOLDER_ENDPOINT, &paths, done))
        }
        Settled::Failed(reason) if reason.is_capacity() => {
            if chunk.len() <= 1 {
                return TooManyOperationsSnafu {
                    message: reason.to_string(),
                }
                .fail();
            }
            let half = chunk.len().div_ceil(2);
            warn!(%reason, len = chunk.len(), half, "create folder batch over capacity, splitting");
            create_chunks(api, chunk, half, autorename).await
        }
        Settled::Failed(reason) => {
            warn!(%reason, "create folder batch job failed");
            Ok(fail_all(CREATE_FOLDER_ENDPOINT, chunk.len(), &reason))
        }
    }
}

fn capacity_reason(err: &Error) -> BatchFailure {
    match err.message() {
        Some(message) if message.contains("too_many_files") => BatchFailure::TooManyFiles,
        _ => BatchFailure::TooManyWriteOperations,
    }
}
