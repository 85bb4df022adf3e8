// crates/partid-inventory/src/ledger.rs
//
// Per-job capacity bookkeeping.
//
// Counts are unsigned and `commit` verifies every key before touching any,
// so a remaining count can never go below zero. The audit re-checks
// `committed + remaining == expected` for every key after each commit.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use partid_core::{EntryKey, PartIdError};

use crate::bom::BomSnapshot;

#[derive(Debug, Clone)]
pub struct InventoryLedger {
    job_id: String,
    expected: BTreeMap<EntryKey, u32>,
    remaining: BTreeMap<EntryKey, u32>,
    committed: BTreeMap<EntryKey, u32>,
}

/// One key's row in a ledger report.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerLine {
    pub key: EntryKey,
    pub expected: u32,
    pub committed: u32,
    pub remaining: u32,
}

/// Full ledger state for reporting.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerReport {
    pub job_id: String,
    pub lines: Vec<LedgerLine>,
}

impl InventoryLedger {
    pub fn from_bom(bom: &BomSnapshot) -> Result<Self, PartIdError> {
        let expected = bom.expected()?;
        Ok(Self {
            job_id: bom.job_id.clone(),
            remaining: expected.clone(),
            committed: expected.keys().map(|k| (k.clone(), 0)).collect(),
            expected,
        })
    }

    pub fn job_id(&self) -> &str {
        &self.job_id
    }

    /// Remaining capacity; 0 for keys not in the BOM.
    pub fn remaining(&self, key: &EntryKey) -> u32 {
        self.remaining.get(key).copied().unwrap_or(0)
    }

    /// Check that every `needed` count is available without changing anything.
    pub fn verify(&self, needed: &BTreeMap<EntryKey, u32>) -> Result<(), PartIdError> {
        for (key, &n) in needed {
            let available = self.remaining(key);
            if n > available {
                return Err(PartIdError::CommitConflict {
                    job_id: self.job_id.clone(),
                    key: key.clone(),
                    needed: n,
                    available,
                });
            }
        }
        Ok(())
    }

    /// Verify all, then decrement all. On error nothing has changed.
    pub fn commit(&mut self, needed: &BTreeMap<EntryKey, u32>) -> Result<(), PartIdError> {
        self.verify(needed)?;
        for (key, &n) in needed {
            if n == 0 {
                continue;
            }
            if let Some(slot) = self.remaining.get_mut(key) {
                *slot -= n;
            }
            if let Some(slot) = self.committed.get_mut(key) {
                *slot += n;
            }
        }
        Ok(())
    }

    /// Keys whose `committed + remaining` no longer equals `expected`.
    pub fn audit(&self) -> Vec<EntryKey> {
        self.expected
            .iter()
            .filter(|(key, &expected)| {
                let committed = self.committed.get(*key).copied().unwrap_or(0) as u64;
                let remaining = self.remaining.get(*key).copied().unwrap_or(0) as u64;
                committed + remaining != expected as u64
            })
            .map(|(key, _)| key.clone())
            .collect()
    }

    pub fn report(&self) -> LedgerReport {
        LedgerReport {
            job_id: self.job_id.clone(),
            lines: self
                .expected
                .iter()
                .map(|(key, &expected)| LedgerLine {
                    key: key.clone(),
                    expected,
                    committed: self.committed.get(key).copied().unwrap_or(0),
                    remaining: self.remaining(key),
                })
                .collect(),
        }
    }

    /// Total remaining capacity across all keys.
    pub fn total_remaining(&self) -> u64 {
        self.remaining.values().map(|&v| v as u64).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bom::BomLine;

    fn ledger() -> InventoryLedger {
        InventoryLedger::from_bom(&BomSnapshot::new(
            "job-1",
            vec![BomLine::new("A", "std", 1), BomLine::new("B", "std", 2)],
        ))
        .unwrap()
    }

    fn need(pairs: &[(&str, u32)]) -> BTreeMap<EntryKey, u32> {
        pairs
            .iter()
            .map(|(id, n)| (EntryKey::new(*id, "std"), *n))
            .collect()
    }

    #[test]
    fn test_commit_decrements() {
        let mut l = ledger();
        l.commit(&need(&[("A", 1), ("B", 1)])).unwrap();
        assert_eq!(l.remaining(&EntryKey::new("A", "std")), 0);
        assert_eq!(l.remaining(&EntryKey::new("B", "std")), 1);
        assert!(l.audit().is_empty());
    }

    #[test]
    fn test_short_commit_changes_nothing() {
        let mut l = ledger();
        let err = l.commit(&need(&[("B", 1), ("A", 2)])).unwrap_err();
        match err {
            PartIdError::CommitConflict {
                needed, available, ..
            } => {
                assert_eq!(needed, 2);
                assert_eq!(available, 1);
            }
            other => panic!("unexpected error: {other}"),
        }
        // B was verified first but must not have been decremented.
        assert_eq!(l.remaining(&EntryKey::new("B", "std")), 2);
        assert_eq!(l.total_remaining(), 3);
    }

    #[test]
    fn test_unknown_key_has_zero_capacity() {
        let mut l = ledger();
        assert_eq!(l.remaining(&EntryKey::new("Z", "std")), 0);
        assert!(l.commit(&need(&[("Z", 1)])).is_err());
    }

    #[test]
    fn test_report_lines() {
        let mut l = ledger();
        l.commit(&need(&[("B", 2)])).unwrap();
        let report = l.report();
        let b = report.lines.iter().find(|x| x.key.entry_id == "B").unwrap();
        assert_eq!((b.expected, b.committed, b.remaining), (2, 2, 0));
    }
}
