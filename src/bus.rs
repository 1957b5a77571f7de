//! Boundary to the device-enumeration collaborator.
//!
//! The collaborator polls the hardware on its own threads and pushes
//! normalized change notifications into the sender handed over at
//! subscription time. The engine never polls.

use thiserror::Error;
use tokio::sync::mpsc;
use tracing::debug;

use crate::input::{Source, SourceEvent};

// Bus errors
#[derive(Debug, Error)]
pub enum BusError {
    #[error("device not available: {0}")]
    DeviceUnavailable(String),

    #[error("failed to subscribe to device {0}: {1}")]
    SubscriptionFailed(String, String),
}

/// Subscribe/unsubscribe-per-device interface of the device collaborator.
///
/// `subscribe` wires the device's polling loop to `events` and returns a
/// [`DeviceHook`] carrying the device's source table. Dropping the hook
/// unsubscribes, on every exit path.
pub trait DeviceBus: Send + Sync {
    fn subscribe(
        &self,
        device: &str,
        events: mpsc::Sender<SourceEvent>,
    ) -> Result<DeviceHook, BusError>;
}

/// Owned subscription token for one device.
///
/// Carries the device's channel descriptors and releases the subscription
/// when dropped, so lifecycle rollback cannot leak a listener.
pub struct DeviceHook {
    pub device: String,
    pub sources: Vec<Source>,
    release: Option<Box<dyn FnOnce() + Send>>,
}

impl DeviceHook {
    pub fn new(
        device: impl Into<String>,
        sources: Vec<Source>,
        release: impl FnOnce() + Send + 'static,
    ) -> Self {
        Self {
            device: device.into(),
            sources,
            release: Some(Box::new(release)),
        }
    }

    /// Hook without a release action, for buses that track nothing per
    /// subscriber.
    pub fn untracked(device: impl Into<String>, sources: Vec<Source>) -> Self {
        Self {
            device: device.into(),
            sources,
            release: None,
        }
    }
}

impl Drop for DeviceHook {
    fn drop(&mut self) {
        if let Some(release) = self.release.take() {
            debug!("Releasing device subscription: {}", self.device);
            release();
        }
    }
}

impl std::fmt::Debug for DeviceHook {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeviceHook")
            .field("device", &self.device)
            .field("sources", &self.sources.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;

    #[test]
    fn test_hook_releases_on_drop() {
        let released = Arc::new(AtomicBool::new(false));
        let flag = released.clone();
        let hook = DeviceHook::new("wheel", Vec::new(), move || {
            flag.store(true, Ordering::SeqCst);
        });
        assert!(!released.load(Ordering::SeqCst));
        drop(hook);
        assert!(released.load(Ordering::SeqCst));
    }
}
