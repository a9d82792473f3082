use std::collections::BTreeMap;
use std::path::Path;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use tokio::runtime::Handle;
use tokio::sync::mpsc::UnboundedSender;
use tracing::debug;

use crate::cascade::{FetchKey, Job, JobKind, JobOutcome, JobResult, Payload, SourceKey};
use crate::source::{LocalOpener, RemoteDirectory, SourceError, TableSource};

pub const DEFAULT_LOCAL_DELAY: Duration = Duration::from_millis(150);

/// Opened engines keyed by file id. An outgoing engine stays reachable until a
/// query names a newer file, which means the newer open has been committed.
#[derive(Default)]
struct LocalInstances {
    latest_open: u64,
    loaded: BTreeMap<u64, Arc<dyn TableSource>>,
}

/// Runs cascade jobs against the remote directory and the loaded local engine.
pub struct FetchExecutor {
    directory: Arc<dyn RemoteDirectory>,
    opener: Arc<dyn LocalOpener>,
    local: Mutex<LocalInstances>,
    local_delay: Duration,
}

impl FetchExecutor {
    #[must_use]
    pub fn new(directory: Arc<dyn RemoteDirectory>, opener: Arc<dyn LocalOpener>) -> Self {
        Self {
            directory,
            opener,
            local: Mutex::new(LocalInstances::default()),
            local_delay: DEFAULT_LOCAL_DELAY,
        }
    }

    #[must_use]
    pub fn with_local_delay(mut self, delay: Duration) -> Self {
        self.local_delay = delay;
        self
    }

    #[must_use]
    pub fn local_delay(&self) -> Duration {
        self.local_delay
    }

    pub fn spawn(self: &Arc<Self>, job: Job, runtime: &Handle, outcomes: &UnboundedSender<JobOutcome>) {
        if let JobKind::OpenLocal(_) = &job.kind {
            self.note_open(job.generation);
        }
        let executor = Arc::clone(self);
        let outcomes = outcomes.clone();
        runtime.spawn(async move {
            let outcome = executor.run(job).await;
            if outcomes.send(outcome).is_err() {
                debug!("outcome receiver dropped");
            }
        });
    }

    pub async fn run(&self, job: Job) -> JobOutcome {
        let generation = job.generation;
        debug!(generation, kind = ?job.kind, "running job");
        let result = match job.kind {
            JobKind::OpenLocal(path) => self.open_local(generation, &path).await,
            JobKind::Fetch(key) => self.fetch(key).await.map(JobResult::Fetched),
        };
        JobOutcome { generation, result }
    }

    async fn open_local(&self, generation: u64, path: &Path) -> Result<JobResult, SourceError> {
        self.note_open(generation);
        tokio::time::sleep(self.local_delay).await;
        let instance = self.opener.open(path).await?;

        let mut local = self.local.lock().unwrap_or_else(PoisonError::into_inner);
        if local.latest_open != generation {
            return Err(SourceError::new("superseded by a newer file"));
        }
        local.loaded.insert(generation, instance);
        let file_name = path.file_name().map_or_else(
            || path.display().to_string(),
            |name| name.to_string_lossy().into_owned(),
        );
        Ok(JobResult::Opened { file_name })
    }

    async fn fetch(&self, key: FetchKey) -> Result<Payload, SourceError> {
        match key {
            FetchKey::Accounts { token } => self
                .directory
                .list_accounts(&token)
                .await
                .map(Payload::Accounts),
            FetchKey::Databases { token, account_id } => self
                .directory
                .list_databases(&token, &account_id)
                .await
                .map(Payload::Databases),
            FetchKey::Tables { source } => {
                let source = self.resolve(&source).await?;
                source.list_tables().await.map(Payload::Tables)
            }
            FetchKey::Rows { source, query } => {
                let source = self.resolve(&source).await?;
                source.select_page(&query).await.map(Payload::Rows)
            }
        }
    }

    async fn resolve(&self, source: &SourceKey) -> Result<Arc<dyn TableSource>, SourceError> {
        match source {
            SourceKey::Remote {
                token,
                account_id,
                database_id,
            } => Ok(self.directory.table_source(token, account_id, database_id)),
            SourceKey::Local { file_id } => {
                tokio::time::sleep(self.local_delay).await;
                let mut local = self.local.lock().unwrap_or_else(PoisonError::into_inner);
                local.loaded.retain(|loaded_id, _| loaded_id >= file_id);
                local
                    .loaded
                    .get(file_id)
                    .map(Arc::clone)
                    .ok_or_else(|| SourceError::new("local database is no longer loaded"))
            }
        }
    }

    fn note_open(&self, generation: u64) {
        let mut local = self.local.lock().unwrap_or_else(PoisonError::into_inner);
        local.latest_open = local.latest_open.max(generation);
    }
}

#[cfg(test)]
mod tests {
    use std::path::{Path, PathBuf};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    use async_trait::async_trait;

    use super::FetchExecutor;
    use crate::cascade::{
        Coordinator, FetchKey, Job, JobKind, JobOutcome, JobResult, Payload, SourceKey,
    };
    use crate::pagination::{PageLimit, PageQuery};
    use crate::source::{
        Account, Database, LocalOpener, Mode, RemoteDirectory, ResultSet, Scalar, SourceError,
        TableSource,
    };
    use crate::storage::Token;

    #[derive(Debug, Default)]
    struct FakeDirectory {
        account_calls: AtomicUsize,
    }

    struct FakeTables {
        names: Vec<String>,
    }

    #[async_trait]
    impl TableSource for FakeTables {
        async fn list_tables(&self) -> Result<Vec<String>, SourceError> {
            Ok(self.names.clone())
        }

        async fn select_page(&self, query: &PageQuery) -> Result<ResultSet, SourceError> {
            Ok(ResultSet {
                columns: vec!["offset".to_string()],
                rows: vec![vec![Scalar::Integer(
                    i64::try_from(query.offset()).unwrap_or_default(),
                )]],
            })
        }
    }

    #[async_trait]
    impl RemoteDirectory for FakeDirectory {
        async fn list_accounts(&self, _token: &Token) -> Result<Vec<Account>, SourceError> {
            self.account_calls.fetch_add(1, Ordering::SeqCst);
            Ok(vec![Account {
                id: "a1".to_string(),
                name: "Acme".to_string(),
            }])
        }

        async fn list_databases(
            &self,
            _token: &Token,
            account_id: &str,
        ) -> Result<Vec<Database>, SourceError> {
            Ok(vec![Database {
                uuid: format!("{account_id}-db"),
                name: "main".to_string(),
            }])
        }

        fn table_source(
            &self,
            _token: &Token,
            _account_id: &str,
            database_id: &str,
        ) -> Arc<dyn TableSource> {
            Arc::new(FakeTables {
                names: vec![format!("{database_id}-orders")],
            })
        }
    }

    struct FakeOpener;

    #[async_trait]
    impl LocalOpener for FakeOpener {
        async fn open(&self, path: &Path) -> Result<Arc<dyn TableSource>, SourceError> {
            if path.extension().is_some_and(|ext| ext == "db") {
                Ok(Arc::new(FakeTables {
                    names: vec![path.display().to_string()],
                }))
            } else {
                Err(SourceError::new("not a database file"))
            }
        }
    }

    fn executor() -> (FetchExecutor, Arc<FakeDirectory>) {
        let directory = Arc::new(FakeDirectory::default());
        let executor = FetchExecutor::new(directory.clone(), Arc::new(FakeOpener))
            .with_local_delay(Duration::ZERO);
        (executor, directory)
    }

    fn open_job(generation: u64, path: &str) -> Job {
        Job {
            generation,
            kind: JobKind::OpenLocal(PathBuf::from(path)),
        }
    }

    fn local_tables_job(generation: u64, file_id: u64) -> Job {
        Job {
            generation,
            kind: JobKind::Fetch(FetchKey::Tables {
                source: SourceKey::Local { file_id },
            }),
        }
    }

    #[tokio::test]
    async fn remote_rows_pass_page_window_to_source() {
        let (executor, _) = executor();
        let outcome = executor
            .run(Job {
                generation: 4,
                kind: JobKind::Fetch(FetchKey::Rows {
                    source: SourceKey::Remote {
                        token: Token::parse("t").expect("token"),
                        account_id: "a1".to_string(),
                        database_id: "db".to_string(),
                    },
                    query: PageQuery::new("orders", PageLimit::Hundred, 4),
                }),
            })
            .await;

        assert_eq!(outcome.generation, 4);
        let Ok(JobResult::Fetched(Payload::Rows(rows))) = outcome.result else {
            panic!("expected rows");
        };
        assert_eq!(rows.rows[0][0], Scalar::Integer(300));
    }

    #[tokio::test]
    async fn local_queries_use_the_opened_instance() {
        let (executor, _) = executor();
        let opened = executor.run(open_job(1, "data/test.db")).await;
        assert_eq!(
            opened.result,
            Ok(JobResult::Opened {
                file_name: "test.db".to_string()
            })
        );

        let listed = executor.run(local_tables_job(2, 1)).await;
        assert_eq!(
            listed.result,
            Ok(JobResult::Fetched(Payload::Tables(vec![
                "data/test.db".to_string()
            ])))
        );
    }

    #[tokio::test]
    async fn failed_open_keeps_previous_instance() {
        let (executor, _) = executor();
        executor.run(open_job(1, "good.db")).await;
        let failed = executor.run(open_job(2, "notes.txt")).await;
        assert!(failed.result.is_err());

        let listed = executor.run(local_tables_job(3, 1)).await;
        assert!(listed.result.is_ok());
    }

    #[tokio::test]
    async fn older_open_never_replaces_newer_one() {
        let (executor, _) = executor();
        executor.run(open_job(5, "new.db")).await;
        let stale = executor.run(open_job(3, "old.db")).await;
        assert!(stale.result.is_err());

        let listed = executor.run(local_tables_job(6, 5)).await;
        assert_eq!(
            listed.result,
            Ok(JobResult::Fetched(Payload::Tables(vec!["new.db".to_string()])))
        );
    }

    #[tokio::test]
    async fn previous_file_stays_queryable_until_newer_file_is_used() {
        let (executor, _) = executor();
        executor.run(open_job(1, "a.db")).await;
        executor.run(open_job(2, "b.db")).await;

        let old = executor.run(local_tables_job(3, 1)).await;
        assert_eq!(
            old.result,
            Ok(JobResult::Fetched(Payload::Tables(vec!["a.db".to_string()])))
        );

        let new = executor.run(local_tables_job(4, 2)).await;
        assert_eq!(
            new.result,
            Ok(JobResult::Fetched(Payload::Tables(vec!["b.db".to_string()])))
        );
        assert!(executor.run(local_tables_job(5, 1)).await.result.is_err());
    }

    #[tokio::test]
    async fn paging_during_an_uncommitted_open_raises_no_alert() {
        let (executor, _) = executor();
        let mut coordinator = Coordinator::new(None, Mode::Local);
        coordinator.open_local("a.db");
        loop {
            let jobs = coordinator.plan();
            if jobs.is_empty() {
                break;
            }
            for job in jobs {
                let outcome = executor.run(job).await;
                coordinator.apply(outcome);
            }
        }
        assert_eq!(coordinator.selected_table(), Some("a.db"));

        coordinator.open_local("b.db");
        let open = coordinator.plan();
        assert_eq!(open.len(), 1);
        let opened = executor.run(open[0].clone()).await;

        coordinator.next_page();
        for job in coordinator.plan() {
            let outcome = executor.run(job).await;
            assert!(outcome.result.is_ok());
            coordinator.apply(outcome);
        }
        assert!(coordinator.alert().is_none());
        assert_eq!(coordinator.page(), 2);

        coordinator.apply(opened);
        assert_eq!(
            coordinator.loaded_file().map(|file| file.name.as_str()),
            Some("b.db")
        );
        assert!(coordinator.alert().is_none());
    }

    #[tokio::test]
    async fn local_query_without_loaded_file_fails() {
        let (executor, _) = executor();
        let outcome = executor.run(local_tables_job(1, 99)).await;
        assert!(outcome.result.is_err());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn spawned_jobs_drive_coordinator_to_rows_with_cache_reuse() {
        let (executor, directory) = executor();
        let executor = Arc::new(executor);
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel::<JobOutcome>();
        let runtime = tokio::runtime::Handle::current();
        let mut coordinator =
            Coordinator::new(Some(Token::parse("t").expect("token")), Mode::Remote);

        let mut in_flight = 0_usize;
        loop {
            for job in coordinator.plan() {
                executor.spawn(job, &runtime, &tx);
                in_flight += 1;
            }
            if in_flight == 0 {
                break;
            }
            let outcome = rx.recv().await.expect("executor should report");
            in_flight -= 1;
            coordinator.apply(outcome);
        }

        assert_eq!(coordinator.selected_account(), Some("a1"));
        assert_eq!(coordinator.selected_database(), Some("a1-db"));
        assert_eq!(coordinator.selected_table(), Some("a1-db-orders"));
        assert!(coordinator.rows().is_some());

        assert!(coordinator.plan().is_empty());
        assert_eq!(directory.account_calls.load(Ordering::SeqCst), 1);
    }
}
