//! Pending-write queue.
//!
//! State machine per write: queued → in_flight → (removed on confirm/echo)
//!                                             ↘ queued (offline, retry later)
//!                                             ↘ failed (rejected, or out of attempts)
//!
//! Writes are kept in creation order. Ordering is FIFO per site: only the
//! oldest non-failed write of a site (its head) may be dispatched, and only
//! while no other write of that site is in flight.

use std::collections::HashSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::FieldOpsError;
use crate::types::{SiteField, SitePatch};

/// Why a write stopped being retried.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "reason", rename_all = "snake_case")]
pub enum FailureReason {
    Rejected(String),
    RetriesExhausted,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum WriteState {
    Queued,
    InFlight,
    Failed { reason: FailureReason },
}

/// A local edit not yet confirmed by the remote store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PendingWrite {
    pub id: String,
    pub target_id: String,
    pub patch: SitePatch,
    pub created_at: DateTime<Utc>,
    /// Dispatch attempts so far.
    pub attempt: u32,
    pub state: WriteState,
}

impl PendingWrite {
    pub fn is_failed(&self) -> bool {
        matches!(self.state, WriteState::Failed { .. })
    }

    /// The error to surface for a failed write.
    pub fn failure(&self) -> Option<FieldOpsError> {
        match &self.state {
            WriteState::Failed {
                reason: FailureReason::Rejected(reason),
            } => Some(FieldOpsError::Rejected(reason.clone())),
            WriteState::Failed {
                reason: FailureReason::RetriesExhausted,
            } => Some(FieldOpsError::RetriesExhausted {
                site_id: self.target_id.clone(),
                attempts: self.attempt,
            }),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct PendingQueue {
    writes: Vec<PendingWrite>,
}

impl PendingQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuild from persisted writes. Anything that was in flight when the
    /// process stopped is queued again.
    pub fn restore(mut writes: Vec<PendingWrite>) -> Self {
        for write in &mut writes {
            if write.state == WriteState::InFlight {
                write.state = WriteState::Queued;
            }
        }
        Self { writes }
    }

    pub fn push(&mut self, target_id: &str, patch: SitePatch, now: DateTime<Utc>) -> String {
        let id = uuid::Uuid::new_v4().to_string();
        self.writes.push(PendingWrite {
            id: id.clone(),
            target_id: target_id.to_string(),
            patch,
            created_at: now,
            attempt: 0,
            state: WriteState::Queued,
        });
        id
    }

    pub fn get(&self, write_id: &str) -> Option<&PendingWrite> {
        self.writes.iter().find(|w| w.id == write_id)
    }

    pub fn remove(&mut self, write_id: &str) -> Option<PendingWrite> {
        let index = self.writes.iter().position(|w| w.id == write_id)?;
        Some(self.writes.remove(index))
    }

    /// Oldest non-failed write for a site.
    pub fn head_for(&self, site_id: &str) -> Option<&PendingWrite> {
        self.writes
            .iter()
            .find(|w| w.target_id == site_id && !w.is_failed())
    }

    /// Sites whose head write is waiting to be dispatched, in queue order.
    pub fn dispatchable_sites(&self) -> Vec<String> {
        let mut seen = HashSet::new();
        let mut sites = Vec::new();
        for write in self.writes.iter().filter(|w| !w.is_failed()) {
            if !seen.insert(write.target_id.as_str()) {
                continue;
            }
            if write.state == WriteState::Queued {
                sites.push(write.target_id.clone());
            }
        }
        sites
    }

    /// Claim a site's head for dispatch: marks it in flight and counts the attempt.
    ///
    /// Returns `None` when the site has no head or its head is already in flight.
    pub fn claim_head(&mut self, site_id: &str) -> Option<PendingWrite> {
        let write = self
            .writes
            .iter_mut()
            .find(|w| w.target_id == site_id && !w.is_failed())?;
        if write.state != WriteState::Queued {
            return None;
        }
        write.state = WriteState::InFlight;
        write.attempt += 1;
        Some(write.clone())
    }

    /// Put an in-flight write back in the queue.
    pub fn requeue(&mut self, write_id: &str) {
        if let Some(write) = self.writes.iter_mut().find(|w| w.id == write_id) {
            if write.state == WriteState::InFlight {
                write.state = WriteState::Queued;
            }
        }
    }

    pub fn fail(&mut self, write_id: &str, reason: FailureReason) -> Option<PendingWrite> {
        let write = self.writes.iter_mut().find(|w| w.id == write_id)?;
        write.state = WriteState::Failed { reason };
        Some(write.clone())
    }

    /// Re-arm a failed write. It moves behind every other write of its site so
    /// an older value never overwrites a newer one.
    pub fn retry(&mut self, write_id: &str) -> Option<PendingWrite> {
        let index = self
            .writes
            .iter()
            .position(|w| w.id == write_id && w.is_failed())?;
        let mut write = self.writes.remove(index);
        write.state = WriteState::Queued;
        write.attempt = 0;
        self.writes.push(write.clone());
        Some(write)
    }

    /// Fields of a site covered by writes that are still live.
    pub fn covered_fields(&self, site_id: &str) -> HashSet<SiteField> {
        self.writes
            .iter()
            .filter(|w| w.target_id == site_id && !w.is_failed())
            .flat_map(|w| w.patch.fields())
            .collect()
    }

    /// Any write for the site the remote store has not accepted, failed
    /// ones included.
    pub fn has_unconfirmed(&self, site_id: &str) -> bool {
        self.writes.iter().any(|w| w.target_id == site_id)
    }

    pub fn has_failed(&self, site_id: &str) -> bool {
        self.writes
            .iter()
            .any(|w| w.target_id == site_id && w.is_failed())
    }

    pub fn pending(&self) -> Vec<PendingWrite> {
        self.writes.iter().filter(|w| !w.is_failed()).cloned().collect()
    }

    pub fn failed(&self) -> Vec<PendingWrite> {
        self.writes.iter().filter(|w| w.is_failed()).cloned().collect()
    }

    pub fn all(&self) -> &[PendingWrite] {
        &self.writes
    }

    pub fn len(&self) -> usize {
        self.writes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.writes.is_empty()
    }
}
