//! In-memory stand-ins for the remote services, shared by the unit tests.

use std::{collections::HashMap, future::Future, sync::Arc, time::Duration};

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use serde_json::{json, Value};
use shared::{
    domain::{Identity, UserId},
    error::{ErrorCode, RemoteError},
};
use tokio::sync::{broadcast, Barrier, Mutex, Semaphore};
use uuid::Uuid;

use crate::services::{
    AuthChange, AuthChangeKind, AuthProvider, BlobStore, Clipboard, FileUpload, FunctionInvoker,
    RecordQuery, RecordStore, RemoteResult, Services, UploadOptions,
};

pub fn identity(n: u128) -> Identity {
    Identity::new(UserId(Uuid::from_u128(n)), format!("student{n}@example.com"))
}

pub fn remote_error(message: &str) -> RemoteError {
    RemoteError::new(ErrorCode::Internal, message)
}

/// Polls `check` until it holds, failing the test after two seconds.
pub async fn eventually<F, Fut>(mut check: F)
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    let waited = tokio::time::timeout(Duration::from_secs(2), async {
        while !check().await {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await;
    assert!(waited.is_ok(), "condition not reached in time");
}

/// Holds callers until the test releases them.
#[derive(Clone)]
pub struct Gate(Arc<Semaphore>);

impl Gate {
    pub fn closed() -> Self {
        Self(Arc::new(Semaphore::new(0)))
    }

    pub fn release(&self) {
        self.0.add_permits(1);
    }

    async fn pass(&self) {
        if let Ok(permit) = self.0.acquire().await {
            permit.forget();
        }
    }
}

pub struct FakeAuth {
    pub session: Mutex<RemoteResult<Option<Identity>>>,
    pub send_result: Mutex<RemoteResult<()>>,
    pub sign_out_result: Mutex<RemoteResult<()>>,
    pub sent_to: Mutex<Vec<String>>,
    pub sign_out_calls: Mutex<u32>,
    pub send_gate: Mutex<Option<Gate>>,
    changes: broadcast::Sender<AuthChange>,
}

impl FakeAuth {
    pub fn new() -> Arc<Self> {
        Self::with_session(None)
    }

    pub fn with_session(identity: Option<Identity>) -> Arc<Self> {
        let (changes, _) = broadcast::channel(16);
        Arc::new(Self {
            session: Mutex::new(Ok(identity)),
            send_result: Mutex::new(Ok(())),
            sign_out_result: Mutex::new(Ok(())),
            sent_to: Mutex::new(Vec::new()),
            sign_out_calls: Mutex::new(0),
            send_gate: Mutex::new(None),
            changes,
        })
    }

    /// Pushes a change the way a real provider does after sign-in or sign-out.
    pub async fn emit(&self, kind: AuthChangeKind, identity: Option<Identity>) {
        *self.session.lock().await = Ok(identity.clone());
        let _ = self.changes.send(AuthChange { kind, identity });
    }
}

#[async_trait]
impl AuthProvider for FakeAuth {
    async fn current_session(&self) -> RemoteResult<Option<Identity>> {
        self.session.lock().await.clone()
    }

    async fn send_magic_link(&self, email: &str) -> RemoteResult<()> {
        self.sent_to.lock().await.push(email.to_string());
        let gate = self.send_gate.lock().await.clone();
        if let Some(gate) = gate {
            gate.pass().await;
        }
        self.send_result.lock().await.clone()
    }

    async fn sign_out(&self) -> RemoteResult<()> {
        *self.sign_out_calls.lock().await += 1;
        let result = self.sign_out_result.lock().await.clone();
        if result.is_ok() {
            self.emit(AuthChangeKind::SignedOut, None).await;
        }
        result
    }

    fn subscribe(&self) -> broadcast::Receiver<AuthChange> {
        self.changes.subscribe()
    }
}

#[derive(Default)]
pub struct FakeRecords {
    pub rows: Mutex<HashMap<String, RemoteResult<Vec<Value>>>>,
    pub queries: Mutex<Vec<RecordQuery>>,
    pub inserts: Mutex<Vec<(String, Value)>>,
    pub insert_error: Mutex<Option<RemoteError>>,
    pub select_gates: Mutex<HashMap<String, Gate>>,
    /// When set, every select waits here before answering.
    pub select_barrier: Mutex<Option<Arc<Barrier>>>,
}

impl FakeRecords {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub async fn set_rows(&self, table: &str, rows: Vec<Value>) {
        self.rows.lock().await.insert(table.to_string(), Ok(rows));
    }

    pub async fn fail_table(&self, table: &str, message: &str) {
        self.rows
            .lock()
            .await
            .insert(table.to_string(), Err(remote_error(message)));
    }

    pub async fn gate_table(&self, table: &str) -> Gate {
        let gate = Gate::closed();
        self.select_gates
            .lock()
            .await
            .insert(table.to_string(), gate.clone());
        gate
    }

    pub async fn queried_tables(&self) -> Vec<String> {
        self.queries
            .lock()
            .await
            .iter()
            .map(|query| query.table.clone())
            .collect()
    }
}

#[async_trait]
impl RecordStore for FakeRecords {
    async fn select(&self, query: &RecordQuery) -> RemoteResult<Vec<Value>> {
        self.queries.lock().await.push(query.clone());
        let barrier = self.select_barrier.lock().await.clone();
        if let Some(barrier) = barrier {
            barrier.wait().await;
        }
        let gate = self.select_gates.lock().await.get(&query.table).cloned();
        if let Some(gate) = gate {
            gate.pass().await;
        }
        self.rows
            .lock()
            .await
            .get(&query.table)
            .cloned()
            .unwrap_or_else(|| Ok(Vec::new()))
    }

    async fn insert(&self, table: &str, row: Value) -> RemoteResult<()> {
        if let Some(err) = self.insert_error.lock().await.clone() {
            return Err(err);
        }
        self.inserts.lock().await.push((table.to_string(), row));
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedUpload {
    pub path: String,
    pub file_name: String,
    pub upsert: bool,
}

#[derive(Default)]
pub struct FakeBlobs {
    pub uploads: Mutex<Vec<RecordedUpload>>,
    /// File names whose upload fails.
    pub failing: Mutex<Vec<String>>,
    pub upload_barrier: Mutex<Option<Arc<Barrier>>>,
}

impl FakeBlobs {
    pub const PUBLIC_BASE: &'static str = "https://files.test/public";

    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }
}

#[async_trait]
impl BlobStore for FakeBlobs {
    async fn upload(
        &self,
        path: &str,
        file: &FileUpload,
        options: UploadOptions,
    ) -> RemoteResult<String> {
        let barrier = self.upload_barrier.lock().await.clone();
        if let Some(barrier) = barrier {
            barrier.wait().await;
        }
        self.uploads.lock().await.push(RecordedUpload {
            path: path.to_string(),
            file_name: file.file_name.clone(),
            upsert: options.upsert,
        });
        if self.failing.lock().await.contains(&file.file_name) {
            return Err(RemoteError::new(ErrorCode::Forbidden, "upload rejected"));
        }
        Ok(path.to_string())
    }

    fn public_url(&self, stored_path: &str) -> String {
        format!("{}/{stored_path}", Self::PUBLIC_BASE)
    }
}

pub struct FakeFunctions {
    pub response: Mutex<RemoteResult<Value>>,
    pub calls: Mutex<Vec<(String, Value)>>,
    pub gate: Mutex<Option<Gate>>,
}

impl FakeFunctions {
    pub fn new() -> Arc<Self> {
        Self::responding(json!({ "digest": "All caught up." }))
    }

    pub fn responding(response: Value) -> Arc<Self> {
        Arc::new(Self {
            response: Mutex::new(Ok(response)),
            calls: Mutex::new(Vec::new()),
            gate: Mutex::new(None),
        })
    }
}

#[async_trait]
impl FunctionInvoker for FakeFunctions {
    async fn invoke(&self, name: &str, body: Value) -> RemoteResult<Value> {
        self.calls.lock().await.push((name.to_string(), body));
        let gate = self.gate.lock().await.clone();
        if let Some(gate) = gate {
            gate.pass().await;
        }
        self.response.lock().await.clone()
    }
}

#[derive(Default)]
pub struct FakeClipboard {
    pub written: Mutex<Vec<String>>,
    pub fail: bool,
}

#[async_trait]
impl Clipboard for FakeClipboard {
    async fn write_text(&self, text: &str) -> Result<()> {
        if self.fail {
            return Err(anyhow!("clipboard denied"));
        }
        self.written.lock().await.push(text.to_string());
        Ok(())
    }
}

pub struct Fakes {
    pub auth: Arc<FakeAuth>,
    pub records: Arc<FakeRecords>,
    pub blobs: Arc<FakeBlobs>,
    pub functions: Arc<FakeFunctions>,
}

impl Fakes {
    pub fn new() -> Self {
        Self {
            auth: FakeAuth::new(),
            records: FakeRecords::new(),
            blobs: FakeBlobs::new(),
            functions: FakeFunctions::new(),
        }
    }

    pub fn services(&self) -> Services {
        Services::new(
            Arc::clone(&self.auth) as Arc<dyn AuthProvider>,
            Arc::clone(&self.records) as Arc<dyn RecordStore>,
            Arc::clone(&self.blobs) as Arc<dyn BlobStore>,
            Arc::clone(&self.functions) as Arc<dyn FunctionInvoker>,
        )
    }
}
