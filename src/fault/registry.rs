//! Active fault registry.
//!
//! Owns every fault that has not yet been resolved. The detector inserts,
//! the diagnosis loop claims, the recovery loop resolves. Callers only ever
//! see snapshot copies, never a live view of the map. Resolved faults move to
//! a capped archive, oldest evicted first.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use super::{Fault, FaultId, FaultKey, FaultStatus};
use crate::error::HealingError;

/// Resolved faults kept when no cap is given.
pub const DEFAULT_ARCHIVE_CAP: usize = 1000;

/// Thread-safe map of active faults.
///
/// `RwLock` lets status readers proceed concurrently; every status change
/// happens under the write lock so transitions are totally ordered per fault.
#[derive(Clone)]
pub struct FaultRegistry {
    faults: Arc<RwLock<HashMap<FaultId, Fault>>>,
    resolved: Arc<RwLock<VecDeque<Fault>>>,
    archive_cap: usize,
}

impl Default for FaultRegistry {
    fn default() -> Self {
        Self::with_archive_cap(DEFAULT_ARCHIVE_CAP)
    }
}

impl FaultRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_archive_cap(archive_cap: usize) -> Self {
        Self {
            faults: Arc::new(RwLock::new(HashMap::new())),
            resolved: Arc::new(RwLock::new(VecDeque::new())),
            archive_cap: archive_cap.max(1),
        }
    }

    pub async fn insert(&self, fault: Fault) {
        let id = fault.id.clone();
        let mut faults = self.faults.write().await;
        faults.insert(id.clone(), fault);
        debug!(fault_id = %id, "Fault registered");
    }

    pub async fn get(&self, id: &FaultId) -> Option<Fault> {
        self.faults.read().await.get(id).cloned()
    }

    pub async fn remove(&self, id: &FaultId) -> Option<Fault> {
        self.faults.write().await.remove(id)
    }

    pub async fn len(&self) -> usize {
        self.faults.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.faults.read().await.is_empty()
    }

    /// Copy of every active fault.
    pub async fn snapshot(&self) -> HashMap<FaultId, Fault> {
        self.faults.read().await.clone()
    }

    /// Component/type pairs that currently have an active fault.
    pub async fn active_keys(&self) -> HashSet<FaultKey> {
        self.faults.read().await.values().map(Fault::key).collect()
    }

    /// Apply `f` to a fault in place. Returns `None` if the fault is gone.
    pub async fn update<F, R>(&self, id: &FaultId, f: F) -> Option<R>
    where
        F: FnOnce(&mut Fault) -> R,
    {
        let mut faults = self.faults.write().await;
        faults.get_mut(id).map(f)
    }

    /// Advance a fault's status.
    ///
    /// # Errors
    /// `FaultNotFound` for unknown ids, `InvalidTransition` for any move that
    /// is not strictly forward.
    pub async fn transition(
        &self,
        id: &FaultId,
        to: FaultStatus,
        at: DateTime<Utc>,
    ) -> Result<Fault, HealingError> {
        let mut faults = self.faults.write().await;
        let fault = faults
            .get_mut(id)
            .ok_or_else(|| HealingError::FaultNotFound(id.clone()))?;

        let from = fault.status;
        if let Err(e) = fault.advance(to, at) {
            warn!(fault_id = %id, from = %from, to = %to, "Rejected fault status regression");
            return Err(e);
        }

        info!(
            fault_id = %id,
            component = %fault.component,
            fault_type = %fault.fault_type,
            old_status = %from,
            new_status = %to,
            "Fault status updated"
        );
        Ok(fault.clone())
    }

    /// Mark a fault RESOLVED, take it out of the active set and archive it.
    ///
    /// # Errors
    /// `FaultNotFound` for unknown ids, `InvalidTransition` if the fault is
    /// already resolved.
    pub async fn resolve(&self, id: &FaultId, at: DateTime<Utc>) -> Result<Fault, HealingError> {
        let mut faults = self.faults.write().await;
        let mut fault = faults
            .remove(id)
            .ok_or_else(|| HealingError::FaultNotFound(id.clone()))?;
        let from = fault.status;
        if let Err(e) = fault.advance(FaultStatus::Resolved, at) {
            warn!(fault_id = %id, from = %from, "Rejected fault resolution");
            faults.insert(id.clone(), fault);
            return Err(e);
        }

        let mut resolved = self.resolved.write().await;
        resolved.push_back(fault.clone());
        while resolved.len() > self.archive_cap {
            resolved.pop_front();
        }
        info!(
            fault_id = %id,
            component = %fault.component,
            fault_type = %fault.fault_type,
            old_status = %from,
            "Fault resolved and archived"
        );
        Ok(fault)
    }

    /// Most recent `limit` resolved faults, oldest first.
    pub async fn resolved(&self, limit: usize) -> Vec<Fault> {
        let resolved = self.resolved.read().await;
        let skip = resolved.len().saturating_sub(limit);
        resolved.iter().skip(skip).cloned().collect()
    }

    pub async fn resolved_len(&self) -> usize {
        self.resolved.read().await.len()
    }

    /// Move every DETECTED fault to DIAGNOSING and return the claimed copies.
    ///
    /// Claiming under a single write lock is what guarantees each fault is
    /// diagnosed exactly once.
    pub async fn claim_detected(&self, at: DateTime<Utc>) -> Vec<Fault> {
        let mut faults = self.faults.write().await;
        let mut claimed = Vec::new();
        for fault in faults.values_mut() {
            if fault.status == FaultStatus::Detected
                && fault.advance(FaultStatus::Diagnosing, at).is_ok()
            {
                claimed.push(fault.clone());
            }
        }
        // Oldest first
        claimed.sort_by_key(|f| f.detected_at);
        claimed
    }

    /// Faults matching `pred`, oldest detection first.
    pub async fn filter<P>(&self, pred: P) -> Vec<Fault>
    where
        P: Fn(&Fault) -> bool,
    {
        let faults = self.faults.read().await;
        let mut matched: Vec<Fault> = faults.values().filter(|f| pred(f)).cloned().collect();
        matched.sort_by_key(|f| f.detected_at);
        matched
    }
}
