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

use std::{path::Path, sync::Arc};

use futures::TryStreamExt;
use snafu::OptionExt;
use tokio::sync::Mutex;
use tracing::{debug, info, instrument};

use crate::{
    account::{Account, FullAccount, LinkSettings, RootInfo, SharedLinkMetadata, SpaceUsage},
    api::{ApiConnector, HttpConnector, ListFolderArg, SessionAuth, StorageApi},
    batch::{self, ItemResult},
    config::ClientConfig,
    credentials::{CredentialStore, TokenType},
    error::{AuthSnafu, ErrorKind, NotLinkedSnafu, Result},
    pagination::{self, BackoffState, PageStream},
    retry::RetryPolicy,
    transfer::{self, UploadOptions},
    types::{
        Cursor, DeleteArg, FileMetadata, FolderMetadata, Metadata, PageResult, ProgressSink,
        WriteMode,
    },
};

/// Authenticated connection state, created lazily on first use.
#[derive(Default)]
struct Session {
    /// Session without a path root, for account and token calls.
    base:          Option<Arc<dyn StorageApi>>,
    /// Session resolving paths against the selected root namespace.
    rooted:        Option<Arc<dyn StorageApi>>,
    auth:          Option<SessionAuth>,
    namespace_id:  Option<String>,
    is_team_space: bool,
    account:       Option<FullAccount>,
}

impl Session {
    fn apis(&self) -> Option<(Arc<dyn StorageApi>, Arc<dyn StorageApi>)> {
        Some((Arc::clone(self.base.as_ref()?), Arc::clone(self.rooted.as_ref()?)))
    }

    fn reset(&mut self) {
        self.base = None;
        self.rooted = None;
        self.auth = None;
        self.account = None;
    }
}

/// Client for a remote storage account.
///
/// Every remote operation runs under the stale-token retry policy. Transfers
/// additionally retry integrity failures per chunk, and listings retry
/// connection failures per page.
///
/// Cloning is cheap and the clone shares the session and the long-poll
/// backoff window. Use [`fork`](Self::fork) for a client with a session of
/// its own.
#[derive(Clone)]
pub struct StorageClient {
    config:      Arc<ClientConfig>,
    connector:   Arc<dyn ApiConnector>,
    credentials: Arc<dyn CredentialStore>,
    session:     Arc<Mutex<Session>>,
    backoff:     BackoffState,
}

impl StorageClient {
    /// Create a client talking HTTP to the endpoints in `config`.
    #[must_use]
    pub fn new(config: ClientConfig, credentials: Arc<dyn CredentialStore>) -> Self {
        let config = Arc::new(config);
        let connector = Arc::new(HttpConnector::new(Arc::clone(&config)));
        Self::from_parts(config, connector, credentials)
    }

    /// Create a client on top of a custom connector.
    #[must_use]
    pub fn with_connector(
        config: ClientConfig,
        connector: Arc<dyn ApiConnector>,
        credentials: Arc<dyn CredentialStore>,
    ) -> Self {
        Self::from_parts(Arc::new(config), connector, credentials)
    }

    fn from_parts(
        config: Arc<ClientConfig>,
        connector: Arc<dyn ApiConnector>,
        credentials: Arc<dyn CredentialStore>,
    ) -> Self {
        Self {
            config,
            connector,
            credentials,
            session: Arc::default(),
            backoff: BackoffState::new(),
        }
    }

    #[must_use]
    pub fn config(&self) -> &ClientConfig { &self.config }

    /// A client with its own session that shares the connection pool, the
    /// credential store and the backoff window with this one.
    #[must_use]
    pub fn fork(&self, config_name: impl Into<String>) -> Self {
        let config = ClientConfig {
            config_name: config_name.into(),
            ..(*self.config).clone()
        };
        Self {
            config:      Arc::new(config),
            connector:   Arc::clone(&self.connector),
            credentials: Arc::clone(&self.credentials),
            session:     Arc::default(),
            backoff:     self.backoff.clone(),
        }
    }

    /// The same client with a long-poll backoff window of its own.
    #[must_use]
    pub fn with_independent_backoff(mut self) -> Self {
        self.backoff = BackoffState::new();
        self
    }

    // ---- policies ----

    fn bad_input_policy(&self) -> RetryPolicy {
        RetryPolicy::builder()
            .kind(ErrorKind::BadInput)
            .max_retries(self.config.bad_input_retries)
            .backoff(self.config.bad_input_backoff)
            .message_filter(self.config.bad_input_message.clone())
            .build()
    }

    fn transfer_policy(&self) -> RetryPolicy {
        RetryPolicy::builder()
            .kind(ErrorKind::DataCorruption)
            .max_retries(self.config.max_transfer_retries)
            .build()
    }

    fn list_policy(&self) -> RetryPolicy {
        RetryPolicy::builder()
            .kind(ErrorKind::Connection)
            .max_retries(self.config.max_list_folder_retries)
            .backoff(self.config.list_folder_retry_backoff)
            .build()
    }

    /// Run `op` under the stale-token policy. A stale-token failure that
    /// outlives the budget becomes an authentication failure.
    async fn guarded<T, F, Fut>(&self, op: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let policy = self.bad_input_policy();
        policy.execute(op).await.map_err(|err| {
            if policy.should_retry(&err) {
                AuthSnafu {
                    message: err.to_string(),
                }
                .build()
            } else {
                err
            }
        })
    }

    // ---- session ----

    /// Base and rooted sessions, built from stored credentials on first use.
    async fn apis(&self) -> Result<(Arc<dyn StorageApi>, Arc<dyn StorageApi>)> {
        let mut session = self.session.lock().await;
        if let Some(apis) = session.apis() {
            return Ok(apis);
        }

        let token = self.credentials.token().await?.context(NotLinkedSnafu)?;
        let token_type = self
            .credentials
            .token_type()
            .await?
            .unwrap_or(TokenType::Legacy);
        self.connect(&mut session, token, token_type)?;
        session.apis().context(NotLinkedSnafu)
    }

    async fn api(&self) -> Result<Arc<dyn StorageApi>> { Ok(self.apis().await?.1) }

    async fn base_api(&self) -> Result<Arc<dyn StorageApi>> { Ok(self.apis().await?.0) }

    fn connect(&self, session: &mut Session, token: String, token_type: TokenType) -> Result<()> {
        let auth = SessionAuth {
            token,
            token_type,
            path_root: None,
        };
        let base = self.connector.connect(&auth)?;
        let rooted = match &session.namespace_id {
            Some(namespace_id) => self.connector.connect(&SessionAuth {
                path_root: Some(namespace_id.clone()),
                ..auth.clone()
            })?,
            None => Arc::clone(&base),
        };
        debug!(config = %self.config.config_name, ?auth, "session established");
        session.base = Some(base);
        session.rooted = Some(rooted);
        session.auth = Some(auth);
        Ok(())
    }

    /// Whether a session exists or credentials are available to build one.
    pub async fn is_linked(&self) -> Result<bool> {
        if self.session.lock().await.base.is_some() {
            return Ok(true);
        }
        Ok(self.credentials.token().await?.is_some())
    }

    /// Link an account with `token`.
    ///
    /// The token is only stored once the account could be fetched and the
    /// path root set up with it.
    #[instrument(skip_all, fields(config = %self.config.config_name), err(Display))]
    pub async fn link(&self, token: &str, token_type: TokenType) -> Result<FullAccount> {
        {
            let mut session = self.session.lock().await;
            session.reset();
            session.namespace_id = None;
            self.connect(&mut session, token.to_string(), token_type)?;
        }

        if let Err(err) = self.update_path_root(None).await {
            self.session.lock().await.reset();
            return Err(err);
        }
        self.credentials.save(token, token_type).await?;

        let account = self.account_info().await?;
        info!(account_id = %account.account.account_id, "account linked");
        Ok(account)
    }

    /// Revoke the token and forget the stored credentials.
    #[instrument(skip(self), fields(config = %self.config.config_name), err(Display))]
    pub async fn unlink(&self) -> Result<()> {
        let base = self.base_api().await?;
        self.session.lock().await.reset();

        self.guarded(|| base.revoke_token()).await?;
        self.credentials.delete().await?;
        info!("account unlinked");
        Ok(())
    }

    /// Namespace paths are currently resolved against.
    pub async fn namespace_id(&self) -> Option<String> {
        self.session.lock().await.namespace_id.clone()
    }

    pub async fn is_team_space(&self) -> bool { self.session.lock().await.is_team_space }

    /// Switch the session to the root namespace in `root_info`, or to the one
    /// the server reports for the linked account.
    #[instrument(skip(self), fields(config = %self.config.config_name), err(Display))]
    pub async fn update_path_root(&self, root_info: Option<RootInfo>) -> Result<()> {
        let root_info = match root_info {
            Some(root_info) => root_info,
            None => self.get_account_info().await?.root_info,
        };
        self.apis().await?;

        let mut session = self.session.lock().await;
        let auth = session.auth.clone().context(NotLinkedSnafu)?;
        let namespace_id = root_info.root_namespace_id().to_string();
        session.rooted = Some(self.connector.connect(&SessionAuth {
            path_root: Some(namespace_id.clone()),
            ..auth
        })?);
        session.namespace_id = Some(namespace_id);
        session.is_team_space = root_info.is_team_space();

        debug!(
            namespace_id = root_info.root_namespace_id(),
            team_space = root_info.is_team_space(),
            home_path = root_info.home_path(),
            "path root updated"
        );
        Ok(())
    }

    // ---- account ----

    /// The linked account, fetched once and cached afterwards.
    pub async fn account_info(&self) -> Result<FullAccount> {
        if let Some(account) = self.session.lock().await.account.clone() {
            return Ok(account);
        }
        self.get_account_info().await
    }

    /// Fetch the linked account and refresh the cache.
    #[instrument(skip(self), fields(config = %self.config.config_name), err(Display))]
    pub async fn get_account_info(&self) -> Result<FullAccount> {
        let base = self.base_api().await?;
        let account = self.guarded(|| base.get_current_account()).await?;

        let mut session = self.session.lock().await;
        if session.namespace_id.is_none() {
            let home = match &account.root_info {
                RootInfo::User {
                    home_namespace_id, ..
                }
                | RootInfo::Team {
                    home_namespace_id, ..
                } => home_namespace_id.clone(),
            };
            session.namespace_id = Some(home);
        }
        session.account = Some(account.clone());
        Ok(account)
    }

    #[instrument(skip(self), fields(config = %self.config.config_name), err(Display))]
    pub async fn get_account(&self, account_id: &str) -> Result<Account> {
        let base = self.base_api().await?;
        self.guarded(|| base.get_account(account_id)).await
    }

    #[instrument(skip(self), fields(config = %self.config.config_name), err(Display))]
    pub async fn get_space_usage(&self) -> Result<SpaceUsage> {
        let base = self.base_api().await?;
        let raw = self.guarded(|| base.get_space_usage()).await?;
        Ok(raw.into())
    }

    // ---- files ----

    /// Metadata at `path`, or `None` when nothing is there.
    #[instrument(skip(self), fields(config = %self.config.config_name), err(Display))]
    pub async fn get_metadata(&self, path: &str) -> Result<Option<Metadata>> {
        let api = self.api().await?;
        match self.guarded(|| api.get_metadata(path)).await {
            Ok(metadata) => Ok(Some(metadata)),
            Err(err) if err.is_absent() => Ok(None),
            Err(err) => Err(err),
        }
    }

    #[instrument(skip(self), fields(config = %self.config.config_name), err(Display))]
    pub async fn list_revisions(&self, path: &str, limit: u32) -> Result<Vec<FileMetadata>> {
        let api = self.api().await?;
        self.guarded(|| api.list_revisions(path, limit)).await
    }

    #[instrument(skip(self), fields(config = %self.config.config_name), err(Display))]
    pub async fn restore(&self, path: &str, rev: &str) -> Result<FileMetadata> {
        let api = self.api().await?;
        self.guarded(|| api.restore(path, rev)).await
    }

    /// Download `remote` (a path or a `rev:` id) to `local`.
    #[instrument(skip(self, progress), fields(config = %self.config.config_name), err(Display))]
    pub async fn download(
        &self,
        remote: &str,
        local: &Path,
        progress: Option<&dyn ProgressSink>,
    ) -> Result<FileMetadata> {
        let api = self.api().await?;
        let api = &*api;
        let integrity = &self.transfer_policy();

        self.guarded(move || async move {
            integrity
                .execute(move || transfer::download_file(api, remote, local, progress))
                .await
        })
        .await
    }

    /// Upload `local` to `remote`.
    #[instrument(skip(self, progress), fields(config = %self.config.config_name), err(Display))]
    pub async fn upload(
        &self,
        local: &Path,
        remote: &str,
        mode: WriteMode,
        autorename: bool,
        progress: Option<&dyn ProgressSink>,
    ) -> Result<FileMetadata> {
        let api = self.api().await?;
        let api = &*api;
        let integrity = &self.transfer_policy();
        let mode = &mode;
        let options = UploadOptions {
            chunk_size: self.config.chunk_size(),
            autorename,
            progress,
        };

        self.guarded(move || async move {
            transfer::upload_file(api, integrity, local, remote, mode.clone(), options).await
        })
        .await
    }

    /// Delete `path`, optionally only if it is still at `parent_rev`.
    #[instrument(skip(self), fields(config = %self.config.config_name), err(Display))]
    pub async fn remove(&self, path: &str, parent_rev: Option<&str>) -> Result<Metadata> {
        let api = self.api().await?;
        let arg = DeleteArg {
            path:       path.to_string(),
            parent_rev: parent_rev.map(str::to_string),
        };
        self.guarded(|| api.delete(&arg)).await
    }

    /// Delete many entries. Results line up with `entries`.
    ///
    /// `batch_size` defaults to the configured one.
    #[instrument(skip(self, entries), fields(config = %self.config.config_name, count = entries.len()), err(Display))]
    pub async fn remove_batch(
        &self,
        entries: &[DeleteArg],
        batch_size: Option<usize>,
    ) -> Result<Vec<ItemResult>> {
        let api = self.api().await?;
        let api = &*api;
        let batch_size = batch_size.unwrap_or_else(|| self.config.effective_batch_size());
        self.guarded(move || batch::remove_batch(api, entries, batch_size))
            .await
    }

    #[instrument(skip(self), fields(config = %self.config.config_name), err(Display))]
    pub async fn move_item(&self, from: &str, to: &str, autorename: bool) -> Result<Metadata> {
        let api = self.api().await?;
        self.guarded(|| api.move_entry(from, to, autorename)).await
    }

    #[instrument(skip(self), fields(config = %self.config.config_name), err(Display))]
    pub async fn make_dir(&self, path: &str, autorename: bool) -> Result<FolderMetadata> {
        let api = self.api().await?;
        self.guarded(|| api.create_folder(path, autorename)).await
    }

    /// Create many folders. Results line up with `paths`.
    #[instrument(skip(self, paths), fields(config = %self.config.config_name, count = paths.len()), err(Display))]
    pub async fn make_dir_batch(
        &self,
        paths: &[String],
        autorename: bool,
        batch_size: Option<usize>,
    ) -> Result<Vec<ItemResult>> {
        let api = self.api().await?;
        let api = &*api;
        let batch_size = batch_size.unwrap_or_else(|| self.config.effective_batch_size());
        self.guarded(move || batch::make_dir_batch(api, paths, batch_size, autorename))
            .await
    }

    // ---- listing ----

    /// Cursor for the current state of `path` and everything below it.
    #[instrument(skip(self), fields(config = %self.config.config_name), err(Display))]
    pub async fn get_latest_cursor(&self, path: &str) -> Result<Cursor> {
        let api = self.api().await?;
        let arg = root_as_empty(
            ListFolderArg::builder()
                .path(path)
                .recursive(true)
                .include_deleted(true)
                .build(),
        );
        self.guarded(|| api.get_latest_cursor(&arg)).await
    }

    /// List a folder, draining every page into one result.
    #[instrument(skip(self), fields(config = %self.config.config_name), err(Display))]
    pub async fn list_folder(&self, arg: ListFolderArg) -> Result<PageResult<Metadata>> {
        let api = self.api().await?;
        let arg = &root_as_empty(arg);
        let api = &api;
        self.guarded(move || {
            pagination::collect_pages(pagination::folder_pages(
                Arc::clone(api),
                self.list_policy(),
                arg.clone(),
            ))
        })
        .await
    }

    /// List a folder one page per pull.
    pub async fn list_folder_stream(
        &self,
        arg: ListFolderArg,
    ) -> Result<PageStream<'static, Metadata>> {
        let api = self.api().await?;
        Ok(pagination::folder_pages(api, self.list_policy(), root_as_empty(arg)))
    }

    /// Wait until changes after `cursor` are pending or `timeout_secs`
    /// (30 to 480) pass.
    #[instrument(skip(self), fields(config = %self.config.config_name), err(Display))]
    pub async fn wait_for_remote_changes(&self, cursor: &Cursor, timeout_secs: u64) -> Result<bool> {
        let api = self.api().await?;
        let api = &*api;
        let backoff = &self.backoff;
        self.guarded(move || pagination::wait_for_changes(api, backoff, cursor, timeout_secs))
            .await
    }

    /// All changes recorded after `cursor`, drained into one result.
    #[instrument(skip(self), fields(config = %self.config.config_name), err(Display))]
    pub async fn list_remote_changes(&self, cursor: &Cursor) -> Result<PageResult<Metadata>> {
        let api = self.api().await?;
        let api = &api;
        self.guarded(move || {
            pagination::collect_pages(pagination::change_pages(
                Arc::clone(api),
                self.list_policy(),
                cursor.clone(),
            ))
        })
        .await
    }

    /// Changes after `cursor`, one page per pull.
    pub async fn list_remote_changes_stream(
        &self,
        cursor: Cursor,
    ) -> Result<PageStream<'static, Metadata>> {
        let api = self.api().await?;
        Ok(pagination::change_pages(api, self.list_policy(), cursor))
    }

    // ---- sharing ----

    #[instrument(skip(self, settings), fields(config = %self.config.config_name), err(Display))]
    pub async fn create_shared_link(
        &self,
        path: &str,
        settings: &LinkSettings,
    ) -> Result<SharedLinkMetadata> {
        let api = self.api().await?;
        self.guarded(|| api.create_shared_link(path, settings)).await
    }

    #[instrument(skip(self), fields(config = %self.config.config_name), err(Display))]
    pub async fn revoke_shared_link(&self, url: &str) -> Result<()> {
        let api = self.api().await?;
        self.guarded(|| api.revoke_shared_link(url)).await
    }

    /// Shared links for `path`, or for the whole account without one.
    #[instrument(skip(self), fields(config = %self.config.config_name), err(Display))]
    pub async fn list_shared_links(&self, path: Option<&str>) -> Result<Vec<SharedLinkMetadata>> {
        let api = self.api().await?;
        let api = &*api;
        self.guarded(move || async move {
            let pages = pagination::page_stream(None, move |cursor: Option<Cursor>| async move {
                api.list_shared_links(path, cursor.as_ref()).await
            });
            let pages: Vec<PageResult<SharedLinkMetadata>> = pages.try_collect().await?;
            Ok(PageResult::flatten(pages)
                .map(|merged| merged.entries)
                .unwrap_or_default())
        })
        .await
    }
}

impl std::fmt::Debug for StorageClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StorageClient")
            .field("config_name", &self.config.config_name)
            .finish_non_exhaustive()
    }
}

/// The listing endpoints name the root folder `""`, not `"/"`.
fn root_as_empty(mut arg: ListFolderArg) -> ListFolderArg {
    if arg.path == "/" {
        arg.path.clear();
    }
    arg
}
