//! Shared per-session status.
//!
//! The router is the only writer during normal operation; the session writes
//! on lifecycle changes. Readers always get a complete clone.

use std::sync::Arc;

use tokio::sync::RwLock;

use crate::types::{DeviceKind, DeviceStatus, PumpInfo};

/// Owned [`DeviceStatus`] behind an async lock.
#[derive(Clone)]
pub struct StatusStore {
    inner: Arc<RwLock<DeviceStatus>>,
}

impl StatusStore {
    /// Creates a store holding the disconnected defaults.
    #[must_use]
    pub fn new(kind: DeviceKind, port: impl Into<String>) -> Self {
        Self {
            inner: Arc::new(RwLock::new(DeviceStatus::new(kind, port))),
        }
    }

    /// Returns a consistent copy of the status.
    pub async fn snapshot(&self) -> DeviceStatus {
        self.inner.read().await.clone()
    }

    /// Reads part of the status without cloning all of it.
    pub async fn read<R>(&self, f: impl FnOnce(&DeviceStatus) -> R) -> R {
        f(&*self.inner.read().await)
    }

    /// Applies `f` under exclusive access.
    pub async fn update<R>(&self, f: impl FnOnce(&mut DeviceStatus) -> R) -> R {
        f(&mut *self.inner.write().await)
    }

    /// Returns to disconnected defaults.
    pub async fn reset(&self) {
        self.inner.write().await.reset();
    }

    /// Adds or replaces a single pump without touching the others.
    pub async fn merge_pump(&self, id: u32, info: PumpInfo) {
        self.inner.write().await.pumps.insert(id, info);
    }
}
