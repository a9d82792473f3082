use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use d1v_core::cascade::{Coordinator, JobOutcome, Level, LevelStatus};
use d1v_core::fetch::FetchExecutor;
use d1v_core::pagination::PageQuery;
use d1v_core::source::{
    Account, Database, LocalOpener, Mode, RemoteDirectory, ResultSet, Scalar, SourceError,
    TableSource,
};
use d1v_core::storage::Token;
use tokio::runtime::Handle;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};

const SLOW: Duration = Duration::from_millis(200);

struct NamedTables {
    name: String,
}

#[async_trait]
impl TableSource for NamedTables {
    async fn list_tables(&self) -> Result<Vec<String>, SourceError> {
        if self.name.starts_with("slow") {
            tokio::time::sleep(SLOW).await;
        }
        Ok(vec![format!("{}_items", self.name)])
    }

    async fn select_page(&self, query: &PageQuery) -> Result<ResultSet, SourceError> {
        Ok(ResultSet {
            columns: vec!["table".to_string()],
            rows: vec![vec![Scalar::Text(query.table.clone())]],
        })
    }
}

struct Directory;

#[async_trait]
impl RemoteDirectory for Directory {
    async fn list_accounts(&self, _token: &Token) -> Result<Vec<Account>, SourceError> {
        Ok(vec![Account {
            id: "acct".to_string(),
            name: "Acme".to_string(),
        }])
    }

    async fn list_databases(
        &self,
        _token: &Token,
        _account_id: &str,
    ) -> Result<Vec<Database>, SourceError> {
        Ok(["slow", "fast"]
            .into_iter()
            .map(|name| Database {
                uuid: name.to_string(),
                name: name.to_string(),
            })
            .collect())
    }

    fn table_source(
        &self,
        _token: &Token,
        _account_id: &str,
        database_id: &str,
    ) -> Arc<dyn TableSource> {
        Arc::new(NamedTables {
            name: database_id.to_string(),
        })
    }
}

struct Opener;

#[async_trait]
impl LocalOpener for Opener {
    async fn open(&self, path: &Path) -> Result<Arc<dyn TableSource>, SourceError> {
        let name = path
            .file_stem()
            .map(|stem| stem.to_string_lossy().into_owned())
            .unwrap_or_default();
        if name.starts_with("slow") {
            tokio::time::sleep(SLOW).await;
        }
        Ok(Arc::new(NamedTables {
            name: format!("file_{name}"),
        }))
    }
}

struct Harness {
    coordinator: Coordinator,
    executor: Arc<FetchExecutor>,
    tx: UnboundedSender<JobOutcome>,
    rx: UnboundedReceiver<JobOutcome>,
    in_flight: usize,
}

impl Harness {
    fn new(coordinator: Coordinator) -> Self {
        let executor = FetchExecutor::new(Arc::new(Directory), Arc::new(Opener))
            .with_local_delay(Duration::ZERO);
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            coordinator,
            executor: Arc::new(executor),
            tx,
            rx,
            in_flight: 0,
        }
    }

    fn dispatch(&mut self) {
        let runtime = Handle::current();
        for job in self.coordinator.plan() {
            self.executor.spawn(job, &runtime, &self.tx);
            self.in_flight += 1;
        }
    }

    async fn settle(&mut self) {
        self.dispatch();
        while self.in_flight > 0 {
            let outcome = self.rx.recv().await.expect("executor reports every job");
            self.in_flight -= 1;
            self.coordinator.apply(outcome);
            self.dispatch();
        }
    }

    async fn settle_until(&mut self, done: impl Fn(&Coordinator) -> bool) {
        self.dispatch();
        while !done(&self.coordinator) {
            let outcome = self.rx.recv().await.expect("executor reports every job");
            self.in_flight -= 1;
            self.coordinator.apply(outcome);
            self.dispatch();
        }
    }
}

fn token() -> Token {
    Token::parse("integration-token").expect("token")
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn slow_table_list_for_previous_database_is_discarded() {
    let mut harness = Harness::new(Coordinator::new(Some(token()), Mode::Remote));
    harness
        .settle_until(|coordinator| coordinator.status(Level::Tables) == LevelStatus::Loading)
        .await;
    assert_eq!(harness.coordinator.selected_database(), Some("slow"));

    harness.coordinator.select_database("fast");
    harness.settle().await;

    assert_eq!(harness.coordinator.selected_database(), Some("fast"));
    assert_eq!(harness.coordinator.tables(), ["fast_items".to_string()]);
    assert_eq!(harness.coordinator.selected_table(), Some("fast_items"));
    let rows = harness.coordinator.rows().expect("rows");
    assert_eq!(rows.rows[0][0], Scalar::Text("fast_items".to_string()));
    assert!(harness.coordinator.alert().is_none());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn newer_file_wins_over_slower_earlier_open() {
    let mut harness = Harness::new(Coordinator::new(None, Mode::Local));
    harness.coordinator.open_local("data/slow.db");
    harness.dispatch();
    harness.coordinator.open_local("data/fast.db");
    harness.settle().await;

    let loaded = harness.coordinator.loaded_file().expect("loaded file");
    assert_eq!(loaded.name, "fast.db");
    assert!(!harness.coordinator.is_opening_file());
    assert_eq!(harness.coordinator.tables(), ["file_fast_items".to_string()]);
    assert!(harness.coordinator.alert().is_none());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn returning_to_a_database_reuses_cached_results() {
    let mut harness = Harness::new(Coordinator::new(Some(token()), Mode::Remote));
    harness.settle().await;
    assert_eq!(harness.coordinator.selected_database(), Some("slow"));

    harness.coordinator.select_database("fast");
    harness.settle().await;
    let hits_before = harness.coordinator.cache_hits();

    harness.coordinator.select_database("slow");
    harness.settle().await;

    assert!(harness.coordinator.cache_hits() > hits_before);
    assert_eq!(harness.coordinator.tables(), ["slow_items".to_string()]);
    assert_eq!(harness.coordinator.status(Level::Rows), LevelStatus::Ready);
}
