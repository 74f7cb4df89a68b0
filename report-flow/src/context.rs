use dashmap::DashMap;
use serde::{Serialize, de::DeserializeOwned};
use serde_json::Value;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use crate::error::{FlowError, Result};
use crate::progress::{NoopProgress, ProgressSink};

/// State shared by every task of one workflow run.
///
/// Values are stored as JSON so tasks only agree on keys and types, not on a
/// common struct. The context also carries the run's cancellation token and
/// progress sink; clones share all three.
#[derive(Clone)]
pub struct Context {
    data: Arc<DashMap<String, Value>>,
    cancellation: CancellationToken,
    progress: Arc<dyn ProgressSink>,
}

impl Context {
    pub fn new() -> Self {
        Self {
            data: Arc::new(DashMap::new()),
            cancellation: CancellationToken::new(),
            progress: Arc::new(NoopProgress),
        }
    }

    pub fn with_progress(mut self, progress: Arc<dyn ProgressSink>) -> Self {
        self.progress = progress;
        self
    }

    pub fn with_cancellation(mut self, cancellation: CancellationToken) -> Self {
        self.cancellation = cancellation;
        self
    }

    pub fn set(&self, key: impl Into<String>, value: impl Serialize) -> Result<()> {
        let value = serde_json::to_value(value)?;
        self.data.insert(key.into(), value);
        Ok(())
    }

    pub fn get<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        self.data
            .get(key)
            .and_then(|v| serde_json::from_value(v.clone()).ok())
    }

    /// Like [`Context::get`] but a missing or mistyped value is an error.
    pub fn require<T: DeserializeOwned>(&self, key: &str) -> Result<T> {
        let value = self
            .data
            .get(key)
            .map(|v| v.value().clone())
            .ok_or_else(|| FlowError::ContextError(format!("{key} not found in context")))?;
        serde_json::from_value(value)
            .map_err(|e| FlowError::ContextError(format!("{key} has unexpected shape: {e}")))
    }

    pub fn contains(&self, key: &str) -> bool {
        self.data.contains_key(key)
    }

    pub fn remove(&self, key: &str) -> Option<Value> {
        self.data.remove(key).map(|(_, v)| v)
    }

    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancellation
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancellation.is_cancelled()
    }

    pub fn progress_sink(&self) -> Arc<dyn ProgressSink> {
        self.progress.clone()
    }

    pub async fn report(&self, percent: u8, status: &str) {
        self.progress.progress(percent.min(100), status).await;
    }

    pub async fn heartbeat(&self, status: &str) {
        self.progress.heartbeat(status).await;
    }
}

impl Default for Context {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for Context {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Context")
            .field("keys", &self.data.len())
            .field("cancelled", &self.cancellation.is_cancelled())
            .finish()
    }
}
