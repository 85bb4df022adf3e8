// crates/partid-inventory/src/registry.rs
//
// Job-scoped inventories. Each job's ledger sits behind its own mutex, so
// commits for one job serialize while other jobs proceed independently.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, RwLock};

use partid_core::{AssignmentResult, CandidateScore, EntryKey, PartIdError};

use crate::bom::BomSnapshot;
use crate::ledger::{InventoryLedger, LedgerReport};

/// Candidate lists with exhausted entries removed, plus the capacity of the
/// entries that survived, all read from one view of the ledger.
#[derive(Debug, Clone, Default)]
pub struct Reservation {
    pub lists: Vec<Vec<CandidateScore>>,
    pub capacity: BTreeMap<EntryKey, u32>,
    /// Candidates dropped because their capacity is used up.
    pub exhausted: usize,
}

/// Counters for one job.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobStats {
    pub job_id: String,
    pub commits: u64,
    pub conflicts: u64,
    pub negative_events: u64,
    pub total_remaining: u64,
}

#[derive(Debug)]
pub struct JobInventory {
    job_id: String,
    ledger: Mutex<InventoryLedger>,
    commits: AtomicU64,
    conflicts: AtomicU64,
    negative_events: AtomicU64,
}

impl JobInventory {
    pub fn new(bom: &BomSnapshot) -> Result<Self, PartIdError> {
        Ok(Self {
            job_id: bom.job_id.clone(),
            ledger: Mutex::new(InventoryLedger::from_bom(bom)?),
            commits: AtomicU64::new(0),
            conflicts: AtomicU64::new(0),
            negative_events: AtomicU64::new(0),
        })
    }

    pub fn job_id(&self) -> &str {
        &self.job_id
    }

    pub async fn remaining(&self, key: &EntryKey) -> u32 {
        self.ledger.lock().await.remaining(key)
    }

    /// Drop candidates with no remaining capacity. Does not mutate the ledger.
    pub async fn reserve_candidates(&self, candidates: &[CandidateScore]) -> Reservation {
        let lists = vec![candidates.to_vec()];
        self.reserve_batch(&lists).await
    }

    /// `reserve_candidates` for every observation of a batch at once.
    pub async fn reserve_batch(&self, lists: &[Vec<CandidateScore>]) -> Reservation {
        let ledger = self.ledger.lock().await;
        let mut reservation = Reservation::default();
        for list in lists {
            let mut kept = Vec::with_capacity(list.len());
            for c in list {
                let remaining = ledger.remaining(&c.key);
                if remaining == 0 {
                    tracing::trace!(
                        job = %self.job_id,
                        "{}",
                        PartIdError::InventoryExhausted { key: c.key.clone() }
                    );
                    reservation.exhausted += 1;
                    continue;
                }
                reservation.capacity.insert(c.key.clone(), remaining);
                kept.push(c.clone());
            }
            reservation.lists.push(kept);
        }
        reservation
    }

    /// Apply an assignment to the ledger, all-or-nothing.
    pub async fn commit(&self, result: &AssignmentResult) -> Result<(), PartIdError> {
        let needed = result.multiplicity();
        let mut ledger = self.ledger.lock().await;
        match ledger.commit(&needed) {
            Ok(()) => {
                self.commits.fetch_add(1, Ordering::Relaxed);
                let violations = ledger.audit();
                if !violations.is_empty() {
                    self.negative_events
                        .fetch_add(violations.len() as u64, Ordering::Relaxed);
                    tracing::error!(
                        job = %self.job_id,
                        keys = ?violations,
                        "Ledger audit failed after commit"
                    );
                }
                tracing::debug!(
                    job = %self.job_id,
                    image = %result.image_id,
                    assigned = result.assignments.len(),
                    "Assignment committed"
                );
                Ok(())
            }
            Err(e) => {
                self.conflicts.fetch_add(1, Ordering::Relaxed);
                tracing::warn!(job = %self.job_id, error = %e, "Commit refused");
                Err(e)
            }
        }
    }

    pub async fn report(&self) -> LedgerReport {
        self.ledger.lock().await.report()
    }

    /// Audit the ledger now; returns the number of inconsistent keys.
    pub async fn audit(&self) -> usize {
        self.ledger.lock().await.audit().len()
    }

    pub fn bom_negative_events(&self) -> u64 {
        self.negative_events.load(Ordering::Relaxed)
    }

    pub async fn stats(&self) -> JobStats {
        let total_remaining = self.ledger.lock().await.total_remaining();
        JobStats {
            job_id: self.job_id.clone(),
            commits: self.commits.load(Ordering::Relaxed),
            conflicts: self.conflicts.load(Ordering::Relaxed),
            negative_events: self.bom_negative_events(),
            total_remaining,
        }
    }
}

/// All open jobs.
#[derive(Debug, Default)]
pub struct InventoryRegistry {
    jobs: RwLock<HashMap<String, Arc<JobInventory>>>,
    closed_negative_events: AtomicU64,
    conflicts_total: AtomicU64,
}

impl InventoryRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Open a job from its BOM. Fails if the job id is already open.
    pub async fn open_job(&self, bom: &BomSnapshot) -> Result<Arc<JobInventory>, PartIdError> {
        let job = Arc::new(JobInventory::new(bom)?);
        let mut jobs = self.jobs.write().await;
        if jobs.contains_key(&bom.job_id) {
            return Err(PartIdError::InvalidState(format!(
                "job {} is already open",
                bom.job_id
            )));
        }
        jobs.insert(bom.job_id.clone(), job.clone());
        tracing::info!(job = %bom.job_id, lines = bom.lines.len(), "Job opened");
        Ok(job)
    }

    /// Close a job, returning its final ledger.
    pub async fn close_job(&self, job_id: &str) -> Result<LedgerReport, PartIdError> {
        let job = self
            .jobs
            .write()
            .await
            .remove(job_id)
            .ok_or_else(|| PartIdError::NotFound(format!("job {}", job_id)))?;
        self.closed_negative_events
            .fetch_add(job.bom_negative_events(), Ordering::Relaxed);
        self.conflicts_total
            .fetch_add(job.conflicts.load(Ordering::Relaxed), Ordering::Relaxed);
        let report = job.report().await;
        tracing::info!(job = %job_id, "Job closed");
        Ok(report)
    }

    pub async fn get(&self, job_id: &str) -> Result<Arc<JobInventory>, PartIdError> {
        self.jobs
            .read()
            .await
            .get(job_id)
            .cloned()
            .ok_or_else(|| PartIdError::NotFound(format!("job {}", job_id)))
    }

    pub async fn job_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.jobs.read().await.keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Negative-inventory events across open and closed jobs. Expected 0.
    pub async fn bom_negative_events(&self) -> u64 {
        let open: u64 = self
            .jobs
            .read()
            .await
            .values()
            .map(|j| j.bom_negative_events())
            .sum();
        open + self.closed_negative_events.load(Ordering::Relaxed)
    }

    /// Commit conflicts across open and closed jobs.
    pub async fn commit_conflicts(&self) -> u64 {
        let open: u64 = self
            .jobs
            .read()
            .await
            .values()
            .map(|j| j.conflicts.load(Ordering::Relaxed))
            .sum();
        open + self.conflicts_total.load(Ordering::Relaxed)
    }
}
