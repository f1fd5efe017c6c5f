// crates/core/src/registry.rs
//! At most one live update channel per remote job.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use dashmap::mapref::entry::Entry;
use dashmap::{DashMap, DashSet};
use tokio_util::sync::CancellationToken;

use crate::channel::ChannelKind;

struct ActiveChannel {
    kind: ChannelKind,
    lease: u64,
    cancel: CancellationToken,
}

/// Proof of ownership of a registry slot.
///
/// Releasing through a stale lease (one whose slot was closed and claimed
/// again since) leaves the newer owner alone.
#[derive(Debug, Clone)]
pub struct Lease {
    pub job_id: String,
    /// Channel the owner starts with.
    pub kind: ChannelKind,
    id: u64,
    cancel: CancellationToken,
}

impl Lease {
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }
}

/// Active channels keyed by remote job id.
pub struct ChannelRegistry {
    active: DashMap<String, ActiveChannel>,
    /// Jobs whose push transport failed once; they are only ever polled.
    polled: DashSet<String>,
    next_lease: AtomicU64,
    root: CancellationToken,
    closed: AtomicBool,
}

impl ChannelRegistry {
    pub fn new() -> Self {
        Self {
            active: DashMap::new(),
            polled: DashSet::new(),
            next_lease: AtomicU64::new(1),
            root: CancellationToken::new(),
            closed: AtomicBool::new(false),
        }
    }

    /// Claim the slot for `job_id`. `None` when a channel already owns it or
    /// the registry has been shut down. A push claim for a job that was
    /// downgraded before comes back as a poll lease.
    pub fn claim(&self, job_id: &str, kind: ChannelKind) -> Option<Lease> {
        if self.closed.load(Ordering::Acquire) {
            return None;
        }
        let kind = if self.polled.contains(job_id) {
            ChannelKind::Poll
        } else {
            kind
        };
        match self.active.entry(job_id.to_string()) {
            Entry::Occupied(_) => None,
            Entry::Vacant(slot) => {
                let id = self.next_lease.fetch_add(1, Ordering::Relaxed);
                let cancel = self.root.child_token();
                slot.insert(ActiveChannel {
                    kind,
                    lease: id,
                    cancel: cancel.clone(),
                });
                tracing::debug!(job_id, %kind, "channel opened");
                Some(Lease {
                    job_id: job_id.to_string(),
                    kind,
                    id,
                    cancel,
                })
            }
        }
    }

    /// Hand an owned slot from push to poll. Returns false when the lease no
    /// longer owns the slot.
    pub fn downgrade(&self, lease: &Lease) -> bool {
        match self.active.get_mut(&lease.job_id) {
            Some(mut entry) if entry.lease == lease.id => {
                self.polled.insert(lease.job_id.clone());
                if entry.kind == ChannelKind::Push {
                    entry.kind = ChannelKind::Poll;
                    tracing::info!(job_id = %lease.job_id, "falling back to polling");
                }
                true
            }
            _ => false,
        }
    }

    /// Free the slot if `lease` still owns it.
    pub fn release(&self, lease: &Lease) {
        let removed = self
            .active
            .remove_if(&lease.job_id, |_, entry| entry.lease == lease.id);
        if removed.is_some() {
            tracing::debug!(job_id = %lease.job_id, "channel closed");
        }
    }

    /// Cancel and forget whatever channel follows `job_id`.
    pub fn close(&self, job_id: &str) -> bool {
        match self.active.remove(job_id) {
            Some((_, entry)) => {
                entry.cancel.cancel();
                true
            }
            None => false,
        }
    }

    /// Cancel every channel and refuse new claims.
    pub fn close_all(&self) {
        self.closed.store(true, Ordering::Release);
        self.root.cancel();
        self.active.clear();
    }

    pub fn kind(&self, job_id: &str) -> Option<ChannelKind> {
        self.active.get(job_id).map(|entry| entry.kind)
    }

    pub fn is_active(&self, job_id: &str) -> bool {
        self.active.contains_key(job_id)
    }

    pub fn len(&self) -> usize {
        self.active.len()
    }

    pub fn is_empty(&self) -> bool {
        self.active.is_empty()
    }
}

impl Default for ChannelRegistry {
    fn default() -> Self {
        Self::new()
    }
}
