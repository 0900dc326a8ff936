//! Virtual tuner pool shared by all sessions.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::provider::TunerStatusReporter;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TunerStatus {
    Idle,
    Streaming,
    Filtered,
    #[serde(rename = "No Reply")]
    NoReply,
    Scanning,
}

impl fmt::Display for TunerStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            TunerStatus::Idle => "Idle",
            TunerStatus::Streaming => "Streaming",
            TunerStatus::Filtered => "Filtered",
            TunerStatus::NoReply => "No Reply",
            TunerStatus::Scanning => "Scanning",
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TunerSlot {
    pub index: usize,
    pub status: TunerStatus,
    pub channel_number: Option<String>,
    pub instance: Option<String>,
}

impl TunerSlot {
    fn idle(index: usize) -> Self {
        Self {
            index,
            status: TunerStatus::Idle,
            channel_number: None,
            instance: None,
        }
    }

    fn is_bound(&self) -> bool {
        self.status != TunerStatus::Idle
    }
}

/// Fixed set of tuner slots per namespace. Slot counts never change after
/// construction.
pub struct TunerPool {
    slots: Mutex<HashMap<String, Vec<TunerSlot>>>,
    reporter: Arc<dyn TunerStatusReporter>,
}

impl TunerPool {
    pub fn new<I, S>(tuner_counts: I, reporter: Arc<dyn TunerStatusReporter>) -> Self
    where
        I: IntoIterator<Item = (S, usize)>,
        S: Into<String>,
    {
        let slots = tuner_counts
            .into_iter()
            .map(|(namespace, count)| (namespace.into(), (0..count).map(TunerSlot::idle).collect()))
            .collect();
        Self {
            slots: Mutex::new(slots),
            reporter,
        }
    }

    /// Bind the first idle slot of `namespace` in index order.
    pub fn allocate(&self, namespace: &str, instance: &str, channel_number: &str) -> Option<usize> {
        let index = {
            let mut table = self.slots.lock();
            let slots = table.get_mut(namespace)?;
            let slot = slots.iter_mut().find(|slot| !slot.is_bound())?;
            slot.status = TunerStatus::Streaming;
            slot.channel_number = Some(channel_number.to_string());
            slot.instance = Some(instance.to_string());
            slot.index
        };
        info!(namespace, slot = index, instance, channel = channel_number, "Tuner allocated");
        self.reporter
            .report_tuner_status(namespace, index, TunerStatus::Streaming);
        Some(index)
    }

    /// Like [`allocate`](Self::allocate) but the slot is released when the
    /// returned lease is dropped.
    pub fn lease(
        self: &Arc<Self>,
        namespace: &str,
        instance: &str,
        channel_number: &str,
    ) -> Option<TunerLease> {
        self.allocate(namespace, instance, channel_number)
            .map(|index| TunerLease {
                pool: Arc::clone(self),
                namespace: namespace.to_string(),
                index,
            })
    }

    pub fn release(&self, namespace: &str, index: usize) {
        let released = {
            let mut table = self.slots.lock();
            match table.get_mut(namespace).and_then(|slots| slots.get_mut(index)) {
                Some(slot) => {
                    let was_bound = slot.is_bound();
                    *slot = TunerSlot::idle(index);
                    was_bound
                }
                None => {
                    warn!(namespace, slot = index, "Release of unknown tuner slot");
                    return;
                }
            }
        };
        if released {
            info!(namespace, slot = index, "Tuner released");
            self.reporter
                .report_tuner_status(namespace, index, TunerStatus::Idle);
        }
    }

    /// Update the visible status of a bound slot. Idle slots are left alone;
    /// use [`release`](Self::release) to unbind. Returns whether anything
    /// changed.
    pub fn set_status(&self, namespace: &str, index: usize, status: TunerStatus) -> bool {
        if status == TunerStatus::Idle {
            self.release(namespace, index);
            return true;
        }
        let changed = {
            let mut table = self.slots.lock();
            match table.get_mut(namespace).and_then(|slots| slots.get_mut(index)) {
                Some(slot) if slot.is_bound() && slot.status != status => {
                    slot.status = status;
                    true
                }
                _ => false,
            }
        };
        if changed {
            debug!(namespace, slot = index, %status, "Tuner status changed");
            self.reporter.report_tuner_status(namespace, index, status);
        }
        changed
    }

    pub fn snapshot(&self, namespace: &str) -> Vec<TunerSlot> {
        self.slots
            .lock()
            .get(namespace)
            .cloned()
            .unwrap_or_default()
    }

    pub fn tuner_count(&self, namespace: &str) -> usize {
        self.slots.lock().get(namespace).map_or(0, Vec::len)
    }

    /// Among duplicate instances of a channel, pick the one with the fewest
    /// bound slots. Ties go to the earliest candidate.
    pub fn least_loaded_instance<'a>(&self, namespace: &str, candidates: &'a [String]) -> Option<&'a str> {
        let table = self.slots.lock();
        let slots = table.get(namespace);
        candidates
            .iter()
            .enumerate()
            .min_by_key(|(position, instance)| {
                let load = slots.map_or(0, |slots| {
                    slots
                        .iter()
                        .filter(|slot| slot.instance.as_deref() == Some(instance.as_str()))
                        .count()
                });
                (load, *position)
            })
            .map(|(_, instance)| instance.as_str())
    }
}

impl fmt::Debug for TunerPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TunerPool")
            .field("slots", &*self.slots.lock())
            .finish()
    }
}

/// A bound tuner slot, released on drop.
#[derive(Debug)]
pub struct TunerLease {
    pool: Arc<TunerPool>,
    namespace: String,
    index: usize,
}

impl TunerLease {
    pub fn index(&self) -> usize {
        self.index
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    pub fn set_status(&self, status: TunerStatus) -> bool {
        self.pool.set_status(&self.namespace, self.index, status)
    }
}

impl Drop for TunerLease {
    fn drop(&mut self) {
        self.pool.release(&self.namespace, self.index);
    }
}
