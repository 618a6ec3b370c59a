//! In-memory gateway used by the coordinator tests.

use std::collections::{BTreeMap, HashSet};
use std::sync::{Arc, Mutex};

use serde_json::Value;
use tokio::sync::{OwnedRwLockWriteGuard, RwLock};

use super::{GatewayError, GatewayResult, RemoteGateway};
use crate::path::RecordPath;

#[derive(Debug, Default)]
struct Inner {
    records: BTreeMap<String, Value>,
    uploads: BTreeMap<String, Vec<u8>>,
    /// Every successful mutation, in order: `"set a"`, `"upload p"`.
    log: Vec<String>,
    failing: HashSet<String>,
    fail_everything: bool,
    get_calls: usize,
}

/// A remote store held in memory, with injectable failures.
#[derive(Debug, Default)]
pub(crate) struct MemoryGateway {
    inner: Mutex<Inner>,
    /// Calls wait here while a test holds the write side.
    gate: Arc<RwLock<()>>,
}

impl MemoryGateway {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    fn with<T>(&self, f: impl FnOnce(&mut Inner) -> T) -> T {
        f(&mut self.inner.lock().expect("memory gateway lock"))
    }

    /// Make every call touching `target` fail with a transport error.
    pub(crate) fn fail_on(&self, target: &str) {
        self.with(|i| i.failing.insert(target.to_string()));
    }

    pub(crate) fn recover(&self, target: &str) {
        self.with(|i| i.failing.remove(target));
    }

    pub(crate) fn fail_everything(&self, fail: bool) {
        self.with(|i| i.fail_everything = fail);
    }

    pub(crate) fn stored(&self, path: &str) -> Option<Value> {
        self.with(|i| i.records.get(path).cloned())
    }

    pub(crate) fn insert(&self, path: &str, value: Value) {
        self.with(|i| i.records.insert(path.to_string(), value));
    }

    pub(crate) fn remove(&self, path: &str) {
        self.with(|i| i.records.remove(path));
    }

    pub(crate) fn uploaded(&self, remote_path: &str) -> Option<Vec<u8>> {
        self.with(|i| i.uploads.get(remote_path).cloned())
    }

    pub(crate) fn log(&self) -> Vec<String> {
        self.with(|i| i.log.clone())
    }

    pub(crate) fn get_calls(&self) -> usize {
        self.with(|i| i.get_calls)
    }

    /// Block every call until the returned guard is dropped.
    pub(crate) async fn hold(&self) -> OwnedRwLockWriteGuard<()> {
        Arc::clone(&self.gate).write_owned().await
    }

    pub(crate) fn url_for(remote_path: &str) -> String {
        format!("https://files.test/{remote_path}")
    }

    fn check(inner: &Inner, target: &str) -> GatewayResult<()> {
        if inner.fail_everything || inner.failing.contains(target) {
            Err(GatewayError::Transport(format!("injected failure for {target}")))
        } else {
            Ok(())
        }
    }
}

#[async_trait::async_trait]
impl RemoteGateway for MemoryGateway {
    async fn get(&self, path: &RecordPath) -> GatewayResult<Option<Value>> {
        let _open = self.gate.read().await;
        self.with(|i| {
            i.get_calls += 1;
            Self::check(i, path.as_str())?;
            Ok(i.records.get(path.as_str()).cloned())
        })
    }

    async fn set(&self, path: &RecordPath, value: &Value) -> GatewayResult<()> {
        let _open = self.gate.read().await;
        self.with(|i| {
            Self::check(i, path.as_str())?;
            i.records.insert(path.to_string(), value.clone());
            i.log.push(format!("set {path}"));
            Ok(())
        })
    }

    async fn delete(&self, path: &RecordPath) -> GatewayResult<()> {
        let _open = self.gate.read().await;
        self.with(|i| {
            Self::check(i, path.as_str())?;
            i.records.remove(path.as_str());
            i.log.push(format!("delete {path}"));
            Ok(())
        })
    }

    async fn list(&self, prefix: &RecordPath) -> GatewayResult<Vec<Value>> {
        let _open = self.gate.read().await;
        self.with(|i| {
            Self::check(i, prefix.as_str())?;
            let nested = format!("{prefix}/");
            Ok(i.records
                .iter()
                .filter(|(k, _)| k.starts_with(&nested))
                .map(|(_, v)| v.clone())
                .collect())
        })
    }

    async fn upload(&self, remote_path: &str, bytes: Vec<u8>) -> GatewayResult<String> {
        let _open = self.gate.read().await;
        self.with(|i| {
            Self::check(i, remote_path)?;
            i.uploads.insert(remote_path.to_string(), bytes);
            i.log.push(format!("upload {remote_path}"));
            Ok(Self::url_for(remote_path))
        })
    }
}
