use std::collections::HashMap;
use tracing::{debug, trace};

use crate::input::source::{Source, SourceEvent, SourceId};

// One cache slot: the channel itself plus the tick of its last real change
#[derive(Debug, Clone)]
struct Slot {
    source: Source,
    last_change: u64,
}

/// Live values of every subscribed channel, stamped with a monotone change
/// sequence.
///
/// The stamp only advances when a refresh moves the value by more than the
/// change epsilon, so the evaluator can pick the most recently *moved*
/// source for last-writer-wins axes. A stamp of 0 means the channel has
/// never reported a change since it was installed.
#[derive(Debug, Default)]
pub struct SourceCache {
    slots: HashMap<SourceId, Slot>,
    clock: u64,
}

impl SourceCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Installs the source table of a freshly subscribed device.
    pub fn install_device(&mut self, device: &str, sources: Vec<Source>) {
        debug!("Installing {} sources for device {}", sources.len(), device);
        for source in sources {
            let id = SourceId::new(device, source.index);
            self.slots.insert(id, Slot {
                source,
                last_change: 0,
            });
        }
    }

    /// Drops every slot belonging to a device.
    pub fn remove_device(&mut self, device: &str) {
        self.slots.retain(|id, _| id.device != device);
    }

    /// Runs one change notification through the owning channel's deadzone.
    ///
    /// Returns true when the applied value actually moved. Events for
    /// channels no subscribed device owns are dropped: a binding that
    /// references a missing device simply contributes no value.
    pub fn apply(&mut self, event: &SourceEvent) -> bool {
        let id = event.source_id();
        let Some(slot) = self.slots.get_mut(&id) else {
            trace!("Dropping event for unknown source {}", id);
            return false;
        };

        let (applied, changed) = slot.source.refresh(event.value);
        if changed {
            self.clock += 1;
            slot.last_change = self.clock;
            trace!("Source {} -> {:.4} (tick {})", id, applied, self.clock);
        }
        changed
    }

    /// Last settled value of a channel, None when its device is missing.
    pub fn value(&self, id: &SourceId) -> Option<f64> {
        self.slots.get(id).map(|slot| slot.source.value)
    }

    /// Change stamp of a channel; 0 means it has never reported.
    pub fn last_change(&self, id: &SourceId) -> Option<u64> {
        self.slots.get(id).map(|slot| slot.last_change)
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }
}
