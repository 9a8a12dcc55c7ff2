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

//! Paginated listings and long-poll change notification.

use std::{ops::RangeInclusive, sync::Arc, time::Duration};

use futures::{StreamExt, TryStreamExt, stream::BoxStream};
use snafu::ensure;
use tokio::{sync::Mutex, time::Instant};
use tracing::{debug, instrument};

use crate::{
    api::{ListFolderArg, StorageApi},
    error::{InvalidArgumentSnafu, Result},
    retry::RetryPolicy,
    types::{Cursor, Metadata, PageResult},
};

/// Long-poll timeouts the server accepts, in seconds.
pub const LONGPOLL_TIMEOUT_RANGE: RangeInclusive<u64> = 30..=480;

/// Added on top of every backoff the server asks for.
const BACKOFF_MARGIN: Duration = Duration::from_secs(5);

/// Lazy sequence of pages. Each pull performs at most one request.
pub type PageStream<'a, T> = BoxStream<'a, Result<PageResult<T>>>;

/// Build a page stream from `fetch`.
///
/// `fetch` is called with `first` for the first page and with the previous
/// page's cursor afterwards. The stream ends after a page without
/// `has_more` or after the first error.
pub fn page_stream<'a, T, F, Fut>(first: Option<Cursor>, fetch: F) -> PageStream<'a, T>
where
    T: Send + 'a,
    F: FnMut(Option<Cursor>) -> Fut + Send + 'a,
    Fut: Future<Output = Result<PageResult<T>>> + Send + 'a,
{
    futures::stream::try_unfold((fetch, Some(first)), |(mut fetch, next)| async move {
        let Some(cursor) = next else {
            return Ok(None);
        };
        let page = fetch(cursor).await?;
        let next = page.has_more.then(|| Some(page.cursor.clone()));
        Ok(Some((page, (fetch, next))))
    })
    .boxed()
}

/// Drain `pages` into one result.
pub async fn collect_pages<T>(pages: PageStream<'_, T>) -> Result<PageResult<T>> {
    let pages: Vec<PageResult<T>> = pages.try_collect().await?;
    Ok(PageResult::flatten(pages).unwrap_or_default())
}

/// Pages of a folder listing, each fetched under `retry`.
pub(crate) fn folder_pages(
    api: Arc<dyn StorageApi>,
    retry: RetryPolicy,
    arg: ListFolderArg,
) -> PageStream<'static, Metadata> {
    metadata_pages(api, retry, Some(arg), None)
}

/// Pages of changes recorded since `cursor`.
pub(crate) fn change_pages(
    api: Arc<dyn StorageApi>,
    retry: RetryPolicy,
    cursor: Cursor,
) -> PageStream<'static, Metadata> {
    metadata_pages(api, retry, None, Some(cursor))
}

fn metadata_pages(
    api: Arc<dyn StorageApi>,
    retry: RetryPolicy,
    arg: Option<ListFolderArg>,
    first: Option<Cursor>,
) -> PageStream<'static, Metadata> {
    page_stream(first, move |cursor: Option<Cursor>| {
        let api = Arc::clone(&api);
        let retry = retry.clone();
        let arg = arg.clone();
        async move {
            match (cursor, arg) {
                (Some(cursor), _) => {
                    retry
                        .execute(|| api.list_folder_continue(&cursor))
                        .await
                }
                (None, Some(arg)) => retry.execute(|| api.list_folder(&arg)).await,
                (None, None) => Ok(PageResult::default()),
            }
        }
    })
}

/// Cooldown window requested by the server on long-poll, shared by every
/// clone of a client.
#[derive(Debug, Clone, Default)]
pub struct BackoffState {
    until: Arc<Mutex<Option<Instant>>>,
}

impl BackoffState {
    #[must_use]
    pub fn new() -> Self { Self::default() }

    /// Time left until long-polling is allowed again.
    pub async fn remaining(&self) -> Option<Duration> {
        let until = *self.until.lock().await;
        until
            .map(|deadline| deadline.saturating_duration_since(Instant::now()))
            .filter(|left| !left.is_zero())
    }
}

/// Block until the server reports changes after `cursor` or `timeout_secs`
/// pass. Returns whether changes are pending.
///
/// Any backoff requested by a previous call is slept out first. The window is
/// read and updated under one lock, so concurrent callers queue behind it.
#[instrument(skip(api, backoff), err(Display))]
pub(crate) async fn wait_for_changes(
    api: &dyn StorageApi,
    backoff: &BackoffState,
    cursor: &Cursor,
    timeout_secs: u64,
) -> Result<bool> {
    ensure!(
        LONGPOLL_TIMEOUT_RANGE.contains(&timeout_secs),
        InvalidArgumentSnafu {
            message: format!(
                "long-poll timeout must be within {}..={} seconds, got {timeout_secs}",
                LONGPOLL_TIMEOUT_RANGE.start(),
                LONGPOLL_TIMEOUT_RANGE.end()
            ),
        }
    );

    let mut until = backoff.until.lock().await;
    if let Some(deadline) = (*until).filter(|deadline| *deadline > Instant::now()) {
        debug!(wait = ?(deadline - Instant::now()), "sleeping out server backoff");
        tokio::time::sleep_until(deadline).await;
    }

    let result = api.longpoll(cursor, timeout_secs).await?;
    *until = result.backoff.map(|secs| {
        debug!(secs, "server requested long-poll backoff");
        Instant::now() + Duration::from_secs(secs) + BACKOFF_MARGIN
    });
    Ok(result.changes)
}
