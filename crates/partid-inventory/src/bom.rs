// crates/partid-inventory/src/bom.rs

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use partid_core::{EntryKey, PartIdError};

/// One bill-of-materials line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BomLine {
    pub entry_id: String,
    pub variant_id: String,
    pub expected_quantity: u32,
}

impl BomLine {
    pub fn new(entry_id: impl Into<String>, variant_id: impl Into<String>, qty: u32) -> Self {
        Self {
            entry_id: entry_id.into(),
            variant_id: variant_id.into(),
            expected_quantity: qty,
        }
    }

    pub fn key(&self) -> EntryKey {
        EntryKey::new(self.entry_id.clone(), self.variant_id.clone())
    }
}

/// Expected inventory for one job, as delivered by the Inventory Store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BomSnapshot {
    pub job_id: String,
    pub lines: Vec<BomLine>,
    #[serde(default = "Utc::now")]
    pub taken_at: DateTime<Utc>,
}

impl BomSnapshot {
    pub fn new(job_id: impl Into<String>, lines: Vec<BomLine>) -> Self {
        Self {
            job_id: job_id.into(),
            lines,
            taken_at: Utc::now(),
        }
    }

    /// Expected quantity per key. Duplicate lines are summed.
    pub fn expected(&self) -> Result<BTreeMap<EntryKey, u32>, PartIdError> {
        if self.job_id.is_empty() {
            return Err(PartIdError::InvalidState("BOM has an empty job id".to_string()));
        }
        let mut expected: BTreeMap<EntryKey, u32> = BTreeMap::new();
        for line in &self.lines {
            let slot = expected.entry(line.key()).or_insert(0);
            *slot = slot.checked_add(line.expected_quantity).ok_or_else(|| {
                PartIdError::InvalidState(format!("BOM quantity overflow for {}", line.key()))
            })?;
        }
        Ok(expected)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_duplicate_lines_summed() {
        let bom = BomSnapshot::new(
            "job-1",
            vec![
                BomLine::new("A", "std", 1),
                BomLine::new("B", "std", 2),
                BomLine::new("A", "std", 3),
            ],
        );
        let expected = bom.expected().unwrap();
        assert_eq!(expected[&EntryKey::new("A", "std")], 4);
        assert_eq!(expected.len(), 2);
    }

    #[test]
    fn test_empty_job_id_rejected() {
        assert!(BomSnapshot::new("", vec![]).expected().is_err());
    }

    #[test]
    fn test_taken_at_defaults_when_absent() {
        let bom: BomSnapshot =
            serde_json::from_str(r#"{"job_id":"j","lines":[{"entry_id":"A","variant_id":"std","expected_quantity":2}]}"#)
                .unwrap();
        assert_eq!(bom.lines[0].expected_quantity, 2);
    }
}
