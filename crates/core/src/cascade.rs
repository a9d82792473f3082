//! Selection cascade for Account -> Database -> Table -> Page.
//!
//! The coordinator never performs I/O. [`Coordinator::plan`] turns the current
//! selection into [`Job`]s, and [`Coordinator::apply`] commits a [`JobOutcome`]
//! only when its generation is still the one the slot is waiting for. Every
//! other outcome is stale and dropped.

use std::path::PathBuf;
use std::sync::Arc;

use tracing::{debug, error, warn};

use crate::cache::QueryCache;
use crate::pagination::{PageLimit, PageQuery};
use crate::source::{Account, Database, Mode, ResultSet, SourceError};
use crate::storage::Token;

pub const DEFAULT_CACHE_CAPACITY: usize = 256;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum SourceKey {
    Remote {
        token: Token,
        account_id: String,
        database_id: String,
    },
    Local {
        file_id: u64,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum FetchKey {
    Accounts {
        token: Token,
    },
    Databases {
        token: Token,
        account_id: String,
    },
    Tables {
        source: SourceKey,
    },
    Rows {
        source: SourceKey,
        query: PageQuery,
    },
}

impl FetchKey {
    fn is_remote(&self) -> bool {
        match self {
            Self::Accounts { .. } | Self::Databases { .. } => true,
            Self::Tables { source } | Self::Rows { source, .. } => {
                matches!(source, SourceKey::Remote { .. })
            }
        }
    }

    fn local_file_id(&self) -> Option<u64> {
        match self {
            Self::Tables {
                source: SourceKey::Local { file_id },
            }
            | Self::Rows {
                source: SourceKey::Local { file_id },
                ..
            } => Some(*file_id),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Payload {
    Accounts(Vec<Account>),
    Databases(Vec<Database>),
    Tables(Vec<String>),
    Rows(ResultSet),
}

#[derive(Debug, Clone, PartialEq)]
pub enum JobKind {
    Fetch(FetchKey),
    OpenLocal(PathBuf),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Job {
    pub generation: u64,
    pub kind: JobKind,
}

#[derive(Debug, Clone, PartialEq)]
pub enum JobResult {
    Fetched(Payload),
    Opened { file_name: String },
}

#[derive(Debug, Clone, PartialEq)]
pub struct JobOutcome {
    pub generation: u64,
    pub result: Result<JobResult, SourceError>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Applied {
    Committed,
    Failed,
    Stale,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Level {
    Accounts,
    Databases,
    Tables,
    Rows,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LevelStatus {
    Idle,
    Loading,
    Ready,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadedFile {
    pub id: u64,
    pub name: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SlotId {
    Accounts,
    Databases,
    RemoteTables,
    RemoteRows,
    LocalTables,
    LocalRows,
}

impl SlotId {
    const ALL: [Self; 6] = [
        Self::Accounts,
        Self::Databases,
        Self::RemoteTables,
        Self::RemoteRows,
        Self::LocalTables,
        Self::LocalRows,
    ];
}

#[derive(Debug, Default)]
struct Slot {
    key: Option<FetchKey>,
    data: Option<Arc<Payload>>,
    pending: Option<u64>,
    error: Option<String>,
}

impl Slot {
    fn reset(&mut self) {
        *self = Self::default();
    }

    fn is_settled_on(&self, key: &FetchKey) -> bool {
        self.key.as_ref() == Some(key)
            && (self.data.is_some() || self.pending.is_some() || self.error.is_some())
    }

    fn status(&self) -> LevelStatus {
        if self.pending.is_some() {
            LevelStatus::Loading
        } else if self.error.is_some() {
            LevelStatus::Failed
        } else if self.data.is_some() {
            LevelStatus::Ready
        } else {
            LevelStatus::Idle
        }
    }
}

#[derive(Debug, Clone, Default)]
struct Browse {
    table: Option<String>,
    limit: PageLimit,
    page: u32,
}

impl Browse {
    fn new() -> Self {
        Self {
            table: None,
            limit: PageLimit::default(),
            page: 1,
        }
    }

    fn clear_table(&mut self) {
        self.table = None;
        self.page = 1;
    }

    fn page_query(&self) -> Option<PageQuery> {
        self.table
            .as_ref()
            .map(|table| PageQuery::new(table.clone(), self.limit, self.page))
    }
}

#[derive(Debug, Default)]
struct Slots {
    accounts: Slot,
    databases: Slot,
    remote_tables: Slot,
    remote_rows: Slot,
    local_tables: Slot,
    local_rows: Slot,
}

#[derive(Debug)]
pub struct Coordinator {
    token: Option<Token>,
    mode: Mode,
    account_id: Option<String>,
    database_id: Option<String>,
    remote: Browse,
    local: Browse,
    loaded_file: Option<LoadedFile>,
    opening: Option<u64>,
    slots: Slots,
    cache: QueryCache<FetchKey, Payload>,
    queued: Vec<Job>,
    next_generation: u64,
    alert: Option<String>,
}

impl Coordinator {
    #[must_use]
    pub fn new(token: Option<Token>, mode: Mode) -> Self {
        Self::with_cache_capacity(token, mode, DEFAULT_CACHE_CAPACITY)
    }

    #[must_use]
    pub fn with_cache_capacity(token: Option<Token>, mode: Mode, capacity: usize) -> Self {
        Self {
            token,
            mode,
            account_id: None,
            database_id: None,
            remote: Browse::new(),
            local: Browse::new(),
            loaded_file: None,
            opening: None,
            slots: Slots::default(),
            cache: QueryCache::new(capacity),
            queued: Vec::new(),
            next_generation: 1,
            alert: None,
        }
    }

    #[must_use]
    pub fn token(&self) -> Option<&Token> {
        self.token.as_ref()
    }

    #[must_use]
    pub fn mode(&self) -> Mode {
        self.mode
    }

    #[must_use]
    pub fn selected_account(&self) -> Option<&str> {
        self.account_id.as_deref()
    }

    #[must_use]
    pub fn selected_database(&self) -> Option<&str> {
        self.database_id.as_deref()
    }

    #[must_use]
    pub fn selected_table(&self) -> Option<&str> {
        self.browse().table.as_deref()
    }

    #[must_use]
    pub fn limit(&self) -> PageLimit {
        self.browse().limit
    }

    #[must_use]
    pub fn page(&self) -> u32 {
        self.browse().page
    }

    #[must_use]
    pub fn loaded_file(&self) -> Option<&LoadedFile> {
        self.loaded_file.as_ref()
    }

    #[must_use]
    pub fn is_opening_file(&self) -> bool {
        self.opening.is_some()
    }

    #[must_use]
    pub fn accounts(&self) -> &[Account] {
        match self.slots.accounts.data.as_deref() {
            Some(Payload::Accounts(accounts)) => accounts,
            _ => &[],
        }
    }

    #[must_use]
    pub fn databases(&self) -> &[Database] {
        match self.slots.databases.data.as_deref() {
            Some(Payload::Databases(databases)) => databases,
            _ => &[],
        }
    }

    #[must_use]
    pub fn tables(&self) -> &[String] {
        match self.slot(self.tables_slot()).data.as_deref() {
            Some(Payload::Tables(tables)) => tables,
            _ => &[],
        }
    }

    #[must_use]
    pub fn rows(&self) -> Option<&ResultSet> {
        match self.slot(self.rows_slot()).data.as_deref() {
            Some(Payload::Rows(rows)) => Some(rows),
            _ => None,
        }
    }

    #[must_use]
    pub fn status(&self, level: Level) -> LevelStatus {
        self.slot(self.level_slot(level)).status()
    }

    #[must_use]
    pub fn error(&self, level: Level) -> Option<&str> {
        self.slot(self.level_slot(level)).error.as_deref()
    }

    #[must_use]
    pub fn alert(&self) -> Option<&str> {
        self.alert.as_deref()
    }

    pub fn take_alert(&mut self) -> Option<String> {
        self.alert.take()
    }

    #[must_use]
    pub fn cache_hits(&self) -> u64 {
        self.cache.hits()
    }

    pub fn set_token(&mut self, token: Token) {
        if self.token.as_ref() == Some(&token) {
            return;
        }
        self.token = Some(token);
        self.reset_remote_cascade();
    }

    pub fn clear_token(&mut self) {
        self.token = None;
        self.reset_remote_cascade();
    }

    pub fn set_mode(&mut self, mode: Mode) {
        self.mode = mode;
    }

    pub fn select_account(&mut self, account_id: impl Into<String>) {
        let account_id = account_id.into();
        if self.account_id.as_deref() == Some(account_id.as_str()) {
            return;
        }
        self.account_id = Some(account_id);
        self.database_id = None;
        self.remote.clear_table();
    }

    pub fn select_database(&mut self, database_id: impl Into<String>) {
        let database_id = database_id.into();
        if self.database_id.as_deref() == Some(database_id.as_str()) {
            return;
        }
        self.database_id = Some(database_id);
        self.remote.clear_table();
    }

    pub fn select_table(&mut self, table: impl Into<String>) {
        let table = table.into();
        let browse = self.browse_mut();
        if browse.table.as_deref() == Some(table.as_str()) {
            return;
        }
        browse.table = Some(table);
        browse.page = 1;
    }

    pub fn cycle_account(&mut self, forward: bool) {
        let next = cycle(
            self.accounts().iter().map(|account| account.id.as_str()),
            self.selected_account(),
            forward,
        );
        if let Some(account_id) = next {
            self.select_account(account_id);
        }
    }

    pub fn cycle_database(&mut self, forward: bool) {
        let next = cycle(
            self.databases().iter().map(|database| database.uuid.as_str()),
            self.selected_database(),
            forward,
        );
        if let Some(database_id) = next {
            self.select_database(database_id);
        }
    }

    pub fn cycle_table(&mut self, forward: bool) {
        let next = cycle(
            self.tables().iter().map(String::as_str),
            self.selected_table(),
            forward,
        );
        if let Some(table) = next {
            self.select_table(table);
        }
    }

    pub fn set_limit(&mut self, limit: PageLimit) {
        self.browse_mut().limit = limit;
    }

    /// Applies one page size to both the remote and the local branch.
    pub fn set_default_limit(&mut self, limit: PageLimit) {
        self.remote.limit = limit;
        self.local.limit = limit;
    }

    pub fn set_page(&mut self, page: u32) {
        self.browse_mut().page = page.max(1);
    }

    pub fn next_page(&mut self) {
        let page = self.page().saturating_add(1);
        self.set_page(page);
    }

    pub fn previous_page(&mut self) {
        let page = self.page().saturating_sub(1);
        self.set_page(page);
    }

    /// Queues an open of a local database file. The current file stays loaded
    /// until the new one opens successfully.
    pub fn open_local(&mut self, path: impl Into<PathBuf>) {
        let generation = self.allocate_generation();
        self.opening = Some(generation);
        self.queued.push(Job {
            generation,
            kind: JobKind::OpenLocal(path.into()),
        });
    }

    /// Re-issues the active row fetch even when the cache already holds it.
    pub fn refresh_rows(&mut self) {
        let Some(key) = self.rows_key() else {
            return;
        };
        let generation = self.allocate_generation();
        let slot = self.slot_mut(self.rows_slot());
        slot.key = Some(key.clone());
        slot.pending = Some(generation);
        slot.error = None;
        self.queued.push(Job {
            generation,
            kind: JobKind::Fetch(key),
        });
    }

    pub fn plan(&mut self) -> Vec<Job> {
        let mut jobs = std::mem::take(&mut self.queued);
        match self.mode {
            Mode::Remote => {
                let accounts = self
                    .token
                    .clone()
                    .map(|token| FetchKey::Accounts { token });
                self.reconcile(SlotId::Accounts, accounts, &mut jobs);

                let databases = match (&self.token, &self.account_id) {
                    (Some(token), Some(account_id)) => Some(FetchKey::Databases {
                        token: token.clone(),
                        account_id: account_id.clone(),
                    }),
                    _ => None,
                };
                self.reconcile(SlotId::Databases, databases, &mut jobs);

                let tables = self
                    .remote_source()
                    .map(|source| FetchKey::Tables { source });
                self.reconcile(SlotId::RemoteTables, tables, &mut jobs);

                let rows = self.rows_key();
                self.reconcile(SlotId::RemoteRows, rows, &mut jobs);
            }
            Mode::Local => {
                let tables = self
                    .local_source()
                    .map(|source| FetchKey::Tables { source });
                self.reconcile(SlotId::LocalTables, tables, &mut jobs);

                let rows = self.rows_key();
                self.reconcile(SlotId::LocalRows, rows, &mut jobs);
            }
        }
        jobs
    }

    pub fn apply(&mut self, outcome: JobOutcome) -> Applied {
        let generation = outcome.generation;
        if self.opening == Some(generation) {
            return self.apply_open(outcome);
        }

        let Some(slot_id) = SlotId::ALL
            .into_iter()
            .find(|id| self.slot(*id).pending == Some(generation))
        else {
            debug!(generation, "discarding stale fetch result");
            return Applied::Stale;
        };

        match outcome.result {
            Ok(JobResult::Fetched(payload)) => {
                let payload = Arc::new(payload);
                let slot = self.slot_mut(slot_id);
                slot.pending = None;
                slot.error = None;
                slot.data = Some(Arc::clone(&payload));
                if let Some(key) = slot.key.clone() {
                    self.cache.insert(key, payload);
                }
                self.after_commit(slot_id);
                Applied::Committed
            }
            Ok(JobResult::Opened { .. }) => {
                warn!(generation, "open result delivered to a fetch slot");
                Applied::Stale
            }
            Err(source_error) => {
                warn!(generation, error = %source_error, "fetch failed");
                let slot = self.slot_mut(slot_id);
                slot.pending = None;
                slot.data = None;
                slot.error = Some(source_error.message().to_string());
                self.raise_alert(source_error.message());
                Applied::Failed
            }
        }
    }

    fn apply_open(&mut self, outcome: JobOutcome) -> Applied {
        self.opening = None;
        match outcome.result {
            Ok(JobResult::Opened { file_name }) => {
                let file_id = outcome.generation;
                self.loaded_file = Some(LoadedFile {
                    id: file_id,
                    name: file_name,
                });
                self.local.clear_table();
                self.slots.local_tables.reset();
                self.slots.local_rows.reset();
                self.cache
                    .retain(|key| key.local_file_id().map_or(true, |id| id == file_id));
                Applied::Committed
            }
            Ok(JobResult::Fetched(_)) => {
                warn!(generation = outcome.generation, "fetch result delivered to open slot");
                Applied::Stale
            }
            Err(source_error) => {
                error!(error = %source_error, "failed to open local database");
                self.raise_alert(&format!(
                    "Failed to open database file: {}",
                    source_error.message()
                ));
                Applied::Failed
            }
        }
    }

    fn reconcile(&mut self, slot_id: SlotId, desired: Option<FetchKey>, jobs: &mut Vec<Job>) {
        let Some(desired) = desired else {
            self.slot_mut(slot_id).reset();
            return;
        };

        if self.slot(slot_id).is_settled_on(&desired) {
            return;
        }

        if let Some(cached) = self.cache.get(&desired) {
            debug!(?slot_id, "serving fetch from cache");
            let slot = self.slot_mut(slot_id);
            slot.key = Some(desired);
            slot.data = Some(cached);
            slot.pending = None;
            slot.error = None;
            self.after_commit(slot_id);
            return;
        }

        let generation = self.allocate_generation();
        let slot = self.slot_mut(slot_id);
        slot.key = Some(desired.clone());
        slot.data = None;
        slot.pending = Some(generation);
        slot.error = None;
        jobs.push(Job {
            generation,
            kind: JobKind::Fetch(desired),
        });
    }

    fn after_commit(&mut self, slot_id: SlotId) {
        match slot_id {
            SlotId::Accounts => {
                if self.account_id.is_none() {
                    self.account_id = self.accounts().first().map(|account| account.id.clone());
                }
            }
            SlotId::Databases => {
                if self.database_id.is_none() {
                    self.database_id = self
                        .databases()
                        .first()
                        .map(|database| database.uuid.clone());
                }
            }
            SlotId::RemoteTables | SlotId::LocalTables => {
                let first = match self.slot(slot_id).data.as_deref() {
                    Some(Payload::Tables(tables)) => tables.first().cloned(),
                    _ => None,
                };
                let browse = if slot_id == SlotId::RemoteTables {
                    &mut self.remote
                } else {
                    &mut self.local
                };
                if browse.table.is_none() {
                    browse.table = first;
                }
            }
            SlotId::RemoteRows | SlotId::LocalRows => {}
        }
    }

    fn reset_remote_cascade(&mut self) {
        self.account_id = None;
        self.database_id = None;
        self.remote.clear_table();
        self.slots.accounts.reset();
        self.slots.databases.reset();
        self.slots.remote_tables.reset();
        self.slots.remote_rows.reset();
        self.cache.retain(|key| !key.is_remote());
    }

    fn raise_alert(&mut self, message: &str) {
        if self.alert.is_none() {
            self.alert = Some(message.to_string());
        }
    }

    fn allocate_generation(&mut self) -> u64 {
        let generation = self.next_generation;
        self.next_generation += 1;
        generation
    }

    fn remote_source(&self) -> Option<SourceKey> {
        match (&self.token, &self.account_id, &self.database_id) {
            (Some(token), Some(account_id), Some(database_id)) => Some(SourceKey::Remote {
                token: token.clone(),
                account_id: account_id.clone(),
                database_id: database_id.clone(),
            }),
            _ => None,
        }
    }

    fn local_source(&self) -> Option<SourceKey> {
        self.loaded_file
            .as_ref()
            .map(|file| SourceKey::Local { file_id: file.id })
    }

    fn rows_key(&self) -> Option<FetchKey> {
        let source = match self.mode {
            Mode::Remote => self.remote_source(),
            Mode::Local => self.local_source(),
        }?;
        let query = self.browse().page_query()?;
        Some(FetchKey::Rows { source, query })
    }

    fn browse(&self) -> &Browse {
        match self.mode {
            Mode::Remote => &self.remote,
            Mode::Local => &self.local,
        }
    }

    fn browse_mut(&mut self) -> &mut Browse {
        match self.mode {
            Mode::Remote => &mut self.remote,
            Mode::Local => &mut self.local,
        }
    }

    fn tables_slot(&self) -> SlotId {
        match self.mode {
            Mode::Remote => SlotId::RemoteTables,
            Mode::Local => SlotId::LocalTables,
        }
    }

    fn rows_slot(&self) -> SlotId {
        match self.mode {
            Mode::Remote => SlotId::RemoteRows,
            Mode::Local => SlotId::LocalRows,
        }
    }

    fn level_slot(&self, level: Level) -> SlotId {
        match level {
            Level::Accounts => SlotId::Accounts,
            Level::Databases => SlotId::Databases,
            Level::Tables => self.tables_slot(),
            Level::Rows => self.rows_slot(),
        }
    }

    fn slot(&self, id: SlotId) -> &Slot {
        match id {
            SlotId::Accounts => &self.slots.accounts,
            SlotId::Databases => &self.slots.databases,
            SlotId::RemoteTables => &self.slots.remote_tables,
            SlotId::RemoteRows => &self.slots.remote_rows,
            SlotId::LocalTables => &self.slots.local_tables,
            SlotId::LocalRows => &self.slots.local_rows,
        }
    }

    fn slot_mut(&mut self, id: SlotId) -> &mut Slot {
        match id {
            SlotId::Accounts => &mut self.slots.accounts,
            SlotId::Databases => &mut self.slots.databases,
            SlotId::RemoteTables => &mut self.slots.remote_tables,
            SlotId::RemoteRows => &mut self.slots.remote_rows,
            SlotId::LocalTables => &mut self.slots.local_tables,
            SlotId::LocalRows => &mut self.slots.local_rows,
        }
    }
}

fn cycle<'a>(
    items: impl Iterator<Item = &'a str>,
    current: Option<&str>,
    forward: bool,
) -> Option<String> {
    let items = items.collect::<Vec<_>>();
    if items.is_empty() {
        return None;
    }
    let position = current.and_then(|current| items.iter().position(|item| *item == current));
    let index = match (position, forward) {
        (None, _) => 0,
        (Some(index), true) => (index + 1) % items.len(),
        (Some(index), false) => (index + items.len() - 1) % items.len(),
    };
    Some(items[index].to_string())
}
