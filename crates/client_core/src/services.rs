//! Seams to the hosted auth, row, blob and function services.

use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use serde_json::Value;
use shared::{domain::Identity, error::RemoteError};
use tokio::sync::broadcast;

pub type RemoteResult<T> = std::result::Result<T, RemoteError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthChangeKind {
    SignedIn,
    SignedOut,
    TokenRefreshed,
    UserUpdated,
}

/// Notification pushed by the auth provider; `identity` replaces whatever the
/// receiver held before.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthChange {
    pub kind: AuthChangeKind,
    pub identity: Option<Identity>,
}

#[async_trait]
pub trait AuthProvider: Send + Sync {
    async fn current_session(&self) -> RemoteResult<Option<Identity>>;
    async fn send_magic_link(&self, email: &str) -> RemoteResult<()>;
    async fn sign_out(&self) -> RemoteResult<()>;
    fn subscribe(&self) -> broadcast::Receiver<AuthChange>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortDirection {
    Ascending,
    Descending,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordQuery {
    pub table: String,
    pub eq: Option<(String, String)>,
    pub order: Option<(String, SortDirection)>,
    pub limit: Option<usize>,
}

impl RecordQuery {
    pub fn table(table: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            eq: None,
            order: None,
            limit: None,
        }
    }

    pub fn eq(mut self, column: impl Into<String>, value: impl ToString) -> Self {
        self.eq = Some((column.into(), value.to_string()));
        self
    }

    pub fn order(mut self, column: impl Into<String>, direction: SortDirection) -> Self {
        self.order = Some((column.into(), direction));
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }
}

#[async_trait]
pub trait RecordStore: Send + Sync {
    async fn select(&self, query: &RecordQuery) -> RemoteResult<Vec<Value>>;
    async fn insert(&self, table: &str, row: Value) -> RemoteResult<()>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileUpload {
    pub file_name: String,
    pub content_type: Option<String>,
    pub bytes: Vec<u8>,
}

impl FileUpload {
    pub fn new(file_name: impl Into<String>, bytes: Vec<u8>) -> Self {
        Self {
            file_name: file_name.into(),
            content_type: None,
            bytes,
        }
    }

    pub fn with_content_type(mut self, content_type: impl Into<String>) -> Self {
        self.content_type = Some(content_type.into());
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct UploadOptions {
    pub upsert: bool,
}

#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Stores `file` under `path` and returns the stored path.
    async fn upload(
        &self,
        path: &str,
        file: &FileUpload,
        options: UploadOptions,
    ) -> RemoteResult<String>;
    fn public_url(&self, stored_path: &str) -> String;
}

#[async_trait]
pub trait FunctionInvoker: Send + Sync {
    async fn invoke(&self, name: &str, body: Value) -> RemoteResult<Value>;
}

#[async_trait]
pub trait Clipboard: Send + Sync {
    async fn write_text(&self, text: &str) -> Result<()>;
}

/// Clipboard used when the host offers none; every write fails.
pub struct MissingClipboard;

#[async_trait]
impl Clipboard for MissingClipboard {
    async fn write_text(&self, _text: &str) -> Result<()> {
        Err(anyhow::anyhow!("clipboard is unavailable"))
    }
}

/// Remote collaborators, present only when endpoint and key are configured.
#[derive(Clone)]
pub struct Services {
    pub auth: Arc<dyn AuthProvider>,
    pub records: Arc<dyn RecordStore>,
    pub blobs: Arc<dyn BlobStore>,
    pub functions: Arc<dyn FunctionInvoker>,
    pub digest_function: String,
}

impl Services {
    pub fn new(
        auth: Arc<dyn AuthProvider>,
        records: Arc<dyn RecordStore>,
        blobs: Arc<dyn BlobStore>,
        functions: Arc<dyn FunctionInvoker>,
    ) -> Self {
        Self {
            auth,
            records,
            blobs,
            functions,
            digest_function: crate::config::DEFAULT_DIGEST_FUNCTION.to_string(),
        }
    }

    pub fn with_digest_function(mut self, name: impl Into<String>) -> Self {
        self.digest_function = name.into();
        self
    }
}
