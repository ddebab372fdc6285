//! Integration tests for the readiness controller

use riaktive_core_readiness::{
    ProvisionCaches, Properties, Provisioner, ReadinessController, ReadinessPlan, ReadinessState,
    Step, ProvisionError,
};
use serde_json::json;
use std::io::Write;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

type Log = Arc<Mutex<Vec<String>>>;

/// Store double that records every call in a shared log
struct RecordingStore {
    log: Log,
    properties: Mutex<Properties>,
    fail_writes: AtomicBool,
}

impl RecordingStore {
    fn new(log: &Log) -> Arc<Self> {
        Arc::new(Self {
            log: log.clone(),
            properties: Mutex::new(Properties::new()),
            fail_writes: AtomicBool::new(false),
        })
    }

    fn with_properties(log: &Log, properties: serde_json::Value) -> Arc<Self> {
        let store = Self::new(log);
        *store.properties.lock().unwrap() = serde_json::from_value(properties).unwrap();
        store
    }

    fn record(&self, entry: String) {
        self.log.lock().unwrap().push(entry);
    }
}

#[async_trait::async_trait]
impl Provisioner for RecordingStore {
    async fn fetch_schema(&self, name: &str) -> anyhow::Result<Option<String>> {
        self.record(format!("fetch_schema:{name}"));
        Ok(None)
    }

    async fn store_schema(&self, name: &str, _content: &str) -> anyhow::Result<()> {
        self.record(format!("store_schema:{name}"));
        Ok(())
    }

    async fn fetch_index(&self, name: &str) -> anyhow::Result<Option<String>> {
        self.record(format!("fetch_index:{name}"));
        Ok(None)
    }

    async fn store_index(&self, name: &str, _schema: &str) -> anyhow::Result<()> {
        self.record(format!("store_index:{name}"));
        Ok(())
    }

    async fn read_properties(&self, bucket: &str) -> anyhow::Result<Properties> {
        self.record(format!("read_properties:{bucket}"));
        Ok(self.properties.lock().unwrap().clone())
    }

    async fn write_properties(&self, bucket: &str, changes: &Properties) -> anyhow::Result<()> {
        if self.fail_writes.load(Ordering::SeqCst) {
            anyhow::bail!("write rejected");
        }
        let keys: Vec<&str> = changes.keys().map(String::as_str).collect();
        self.record(format!("write_properties:{bucket}:{}", keys.join(",")));
        self.properties
            .lock()
            .unwrap()
            .extend(changes.iter().map(|(k, v)| (k.clone(), v.clone())));
        Ok(())
    }
}

fn spawn(
    bucket: &str,
    plan: ReadinessPlan,
    store: Arc<RecordingStore>,
    caches: ProvisionCaches,
    log: &Log,
) -> ReadinessController<u32> {
    let dispatched = log.clone();
    ReadinessController::spawn(bucket, plan, store, caches, move |op: u32| {
        dispatched.lock().unwrap().push(format!("dispatch:{op}"));
    })
}

fn schema_file() -> tempfile::NamedTempFile {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    file.write_all(b"<schema name=\"foo\"/>").unwrap();
    file
}

fn allow_mult() -> Properties {
    serde_json::from_value(json!({"allow_mult": true})).unwrap()
}

fn entries(log: &Log) -> Vec<String> {
    log.lock().unwrap().clone()
}

#[tokio::test(start_paused = true)]
async fn test_schema_then_index_then_properties_then_queue() {
    let log = Log::default();
    let store = RecordingStore::new(&log);
    let file = schema_file();
    let plan = ReadinessPlan {
        schema: Some("foo".into()),
        schema_path: Some(file.path().to_path_buf()),
        search_index: Some("foo_index".into()),
        properties: allow_mult(),
    };

    let started = tokio::time::Instant::now();
    let controller = spawn("users", plan, store, ProvisionCaches::default(), &log);
    for op in 1..=3 {
        controller.operate(op).unwrap();
    }

    controller.wait_ready().await.unwrap();
    assert!(started.elapsed() >= Duration::from_secs(10));
    assert_eq!(controller.state(), ReadinessState::Ready);
    assert_eq!(
        entries(&log),
        vec![
            "fetch_schema:foo",
            "store_schema:foo",
            "fetch_index:foo_index",
            "store_index:foo_index",
            "read_properties:users",
            "write_properties:users:allow_mult,search_index",
            "dispatch:1",
            "dispatch:2",
            "dispatch:3",
        ]
    );
}

#[tokio::test(start_paused = true)]
async fn test_schema_without_path_issues_no_create_calls() {
    let log = Log::default();
    let store = RecordingStore::new(&log);
    let plan = ReadinessPlan {
        schema: Some("foo".into()),
        properties: allow_mult(),
        ..Default::default()
    };

    let controller = spawn("users", plan, store, ProvisionCaches::default(), &log);
    controller.operate(7).unwrap();
    controller.wait_ready().await.unwrap();

    assert_eq!(
        entries(&log),
        vec![
            "read_properties:users",
            "write_properties:users:allow_mult",
            "dispatch:7",
        ]
    );
}

#[tokio::test(start_paused = true)]
async fn test_matching_properties_skip_the_write() {
    let log = Log::default();
    let store = RecordingStore::with_properties(&log, json!({"allow_mult": true, "n_val": 3}));

    let controller = spawn(
        "users",
        ReadinessPlan {
            properties: allow_mult(),
            ..Default::default()
        },
        store,
        ProvisionCaches::default(),
        &log,
    );
    controller.wait_ready().await.unwrap();

    assert_eq!(entries(&log), vec!["read_properties:users"]);
}

#[tokio::test(start_paused = true)]
async fn test_ready_dispatches_directly() {
    let log = Log::default();
    let store = RecordingStore::new(&log);
    let controller = spawn(
        "plain",
        ReadinessPlan::default(),
        store,
        ProvisionCaches::default(),
        &log,
    );
    controller.wait_ready().await.unwrap();

    controller.operate(1).unwrap();
    controller.operate(2).unwrap();
    tokio::time::sleep(Duration::from_millis(1)).await;

    assert_eq!(
        entries(&log),
        vec!["read_properties:plain", "dispatch:1", "dispatch:2"]
    );
}

#[tokio::test(start_paused = true)]
async fn test_failure_is_surfaced_and_retry_recovers() {
    let log = Log::default();
    let store = RecordingStore::new(&log);
    store.fail_writes.store(true, Ordering::SeqCst);

    let controller = spawn(
        "users",
        ReadinessPlan {
            properties: allow_mult(),
            ..Default::default()
        },
        store.clone(),
        ProvisionCaches::default(),
        &log,
    );
    controller.operate(1).unwrap();

    let err = controller.wait_ready().await.unwrap_err();
    match err.as_ref() {
        ProvisionError::Step { resource, step, .. } => {
            assert_eq!(resource, "users");
            assert_eq!(*step, Step::Properties);
        }
        other => panic!("unexpected error: {other}"),
    }
    assert_eq!(controller.state(), ReadinessState::Creating);
    assert!(!entries(&log).iter().any(|e| e.starts_with("dispatch")));

    store.fail_writes.store(false, Ordering::SeqCst);
    controller.retry();

    let mut status = controller.subscribe();
    status.wait_for(|s| s.state.is_ready()).await.unwrap();
    assert!(controller.status().last_error.is_none());
    assert_eq!(entries(&log).last().map(String::as_str), Some("dispatch:1"));
}

#[tokio::test(start_paused = true)]
async fn test_missing_schema_file_stalls_in_checking_schema() {
    let log = Log::default();
    let store = RecordingStore::new(&log);
    let dir = tempfile::tempdir().unwrap();
    let plan = ReadinessPlan {
        schema: Some("foo".into()),
        schema_path: Some(dir.path().join("missing.xml")),
        ..Default::default()
    };

    let controller = spawn("users", plan, store, ProvisionCaches::default(), &log);
    let err = controller.wait_ready().await.unwrap_err();

    assert!(matches!(
        err.as_ref(),
        ProvisionError::Step {
            step: Step::Schema,
            ..
        }
    ));
    assert_eq!(controller.state(), ReadinessState::CheckingSchema);
    assert!(entries(&log).is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_shared_caches_provision_each_name_once() {
    let log = Log::default();
    let store = RecordingStore::new(&log);
    let caches = ProvisionCaches::new(Duration::from_secs(1));
    let file = schema_file();

    let plan = |bucket: &str| ReadinessPlan {
        schema: Some("foo".into()),
        schema_path: Some(file.path().to_path_buf()),
        search_index: Some("foo_index".into()),
        properties: serde_json::from_value(json!({"bucket": bucket})).unwrap(),
    };

    let first = spawn("a", plan("a"), store.clone(), caches.clone(), &log);
    let second = spawn("b", plan("b"), store, caches.clone(), &log);
    first.wait_ready().await.unwrap();
    second.wait_ready().await.unwrap();

    let log = entries(&log);
    assert_eq!(log.iter().filter(|e| *e == "store_schema:foo").count(), 1);
    assert_eq!(log.iter().filter(|e| *e == "store_index:foo_index").count(), 1);
    assert!(caches.schemas.contains("foo").await);
    assert!(caches.indexes.contains("foo_index").await);
}
