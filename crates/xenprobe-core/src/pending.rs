//! Pending echo requests awaiting a reply.

use crate::signal::{signal, Signal, Trigger};
use std::collections::HashMap;
use tokio::sync::RwLock;
use xenprobe_net::ProbeReply;

/// Table of outstanding echo requests keyed by sequence number.
///
/// The probe runner registers every sequence number before the probe starts
/// and then waits on the returned signals. The output dispatcher resolves
/// entries as reply lines arrive. The lock is only held to touch the map;
/// nobody waits for a reply while holding it.
#[derive(Debug, Default)]
pub struct PendingProbes {
    table: RwLock<HashMap<u32, Trigger<ProbeReply>>>,
}

impl PendingProbes {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `seq` and get the signal its reply will arrive on.
    ///
    /// Registering a sequence number twice replaces the earlier entry, whose
    /// signal then resolves to `None`.
    pub async fn register(&self, seq: u32) -> Signal<ProbeReply> {
        let (trigger, signal) = signal();
        self.table.write().await.insert(seq, trigger);
        signal
    }

    /// Resolve the entry for `reply.seq`.
    ///
    /// Returns false if the sequence number was never registered, was
    /// already answered or nobody waits for it anymore. The first reply for
    /// a sequence number wins.
    pub async fn resolve(&self, reply: ProbeReply) -> bool {
        let trigger = self.table.write().await.remove(&reply.seq);
        match trigger {
            Some(trigger) => trigger.fire(reply),
            None => {
                tracing::trace!(seq = reply.seq, "Reply for unknown or answered request");
                false
            }
        }
    }

    /// Number of requests still waiting for a reply.
    pub async fn outstanding(&self) -> usize {
        self.table.read().await.len()
    }

    /// Drop every outstanding entry; their signals resolve to `None`.
    pub async fn close(&self) -> usize {
        let mut table = self.table.write().await;
        let dropped = table.len();
        table.clear();
        dropped
    }
}
