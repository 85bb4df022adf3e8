// crates/partid-engine/src/provenance.rs
//
// Bounded FIFO of per-query modality winners, so QA feedback that arrives
// with only (query_id, resolved, correct) can be tagged with agreement.

use std::collections::{HashMap, VecDeque};

use partid_core::{EntryKey, ModalityAgreement};

#[derive(Debug, Clone, PartialEq)]
pub struct Provenance {
    pub visual_top: Option<EntryKey>,
    pub text_top: Option<EntryKey>,
}

impl Provenance {
    /// Agreement of each modality's top-1 with `resolved`.
    ///
    /// `None` when the query had no text hint: the text modality said nothing.
    pub fn agreement(&self, resolved: &EntryKey) -> Option<ModalityAgreement> {
        let text_top = self.text_top.as_ref()?;
        Some(ModalityAgreement {
            text_agreed: text_top == resolved,
            visual_agreed: self.visual_top.as_ref() == Some(resolved),
        })
    }
}

#[derive(Debug)]
pub struct ProvenanceCache {
    capacity: usize,
    entries: HashMap<String, Provenance>,
    order: VecDeque<String>,
}

impl ProvenanceCache {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            entries: HashMap::new(),
            order: VecDeque::new(),
        }
    }

    pub fn insert(&mut self, query_id: String, provenance: Provenance) {
        if self.capacity == 0 {
            return;
        }
        if self.entries.insert(query_id.clone(), provenance).is_none() {
            self.order.push_back(query_id);
        }
        while self.order.len() > self.capacity {
            if let Some(oldest) = self.order.pop_front() {
                self.entries.remove(&oldest);
            }
        }
    }

    pub fn get(&self, query_id: &str) -> Option<&Provenance> {
        self.entries.get(query_id)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
