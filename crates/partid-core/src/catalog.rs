// crates/partid-core/src/catalog.rs
//
// Catalog entry identity and the per-entry embedding record.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::embedding::Embedding;
use crate::error::PartIdError;

/// Identity of a catalog entry: the part and its variant.
///
/// Ordering is lexicographic on `(entry_id, variant_id)` and is what every
/// deterministic tie-break in the engine falls back to.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct EntryKey {
    pub entry_id: String,
    pub variant_id: String,
}

impl EntryKey {
    pub fn new(entry_id: impl Into<String>, variant_id: impl Into<String>) -> Self {
        Self {
            entry_id: entry_id.into(),
            variant_id: variant_id.into(),
        }
    }
}

impl fmt::Display for EntryKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.entry_id, self.variant_id)
    }
}

/// Which embedding of a catalog entry a search runs against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Modality {
    /// Rendered or photographed appearance of the part.
    Visual,
    /// Name/description text of the part.
    Text,
    /// Semantic tag vector (category, material, function).
    Tag,
}

impl Modality {
    pub const ALL: [Modality; 3] = [Modality::Visual, Modality::Text, Modality::Tag];
}

impl fmt::Display for Modality {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Modality::Visual => write!(f, "visual"),
            Modality::Text => write!(f, "text"),
            Modality::Tag => write!(f, "tag"),
        }
    }
}

/// A catalog entry: one known part variant with its three embeddings.
///
/// Entries are replaced wholesale on update; nothing mutates one in place.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CatalogEntry {
    pub key: EntryKey,
    pub visual: Embedding,
    pub text: Embedding,
    pub tags: Embedding,
    /// When upstream embeddings were last refreshed.
    #[serde(default = "Utc::now")]
    pub updated_at: DateTime<Utc>,
}

impl CatalogEntry {
    pub fn new(key: EntryKey, visual: Embedding, text: Embedding, tags: Embedding) -> Self {
        Self {
            key,
            visual,
            text,
            tags,
            updated_at: Utc::now(),
        }
    }

    /// The vector for one modality.
    pub fn vector(&self, modality: Modality) -> &[f32] {
        match modality {
            Modality::Visual => self.visual.as_slice(),
            Modality::Text => self.text.as_slice(),
            Modality::Tag => self.tags.as_slice(),
        }
    }

    /// Reject the entry unless all three vectors have the store dimension.
    pub fn check_dimension(&self, expected: usize) -> Result<(), PartIdError> {
        for modality in Modality::ALL {
            let got = self.vector(modality).len();
            if got != expected {
                return Err(PartIdError::DimensionMismatch { expected, got });
            }
        }
        Ok(())
    }
}

/// Usage clock of one catalog entry, checkpointed so pruning by age
/// survives a restart.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntryUsage {
    pub key: EntryKey,
    pub inserted_at_ms: i64,
    /// `None` if never matched.
    #[serde(default)]
    pub last_matched_ms: Option<i64>,
    #[serde(default)]
    pub match_count: u64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedding::hash_embedding;

    #[test]
    fn test_entry_key_display_and_order() {
        let a = EntryKey::new("bolt", "m4");
        let b = EntryKey::new("bolt", "m6");
        let c = EntryKey::new("nut", "m4");
        assert_eq!(a.to_string(), "bolt/m4");
        assert!(a < b);
        assert!(b < c);
    }

    #[test]
    fn test_vector_by_modality() {
        let entry = CatalogEntry::new(
            EntryKey::new("bolt", "m4"),
            hash_embedding("v", 8),
            hash_embedding("t", 8),
            hash_embedding("g", 8),
        );
        assert_eq!(entry.vector(Modality::Visual), hash_embedding("v", 8).as_slice());
        assert_eq!(entry.vector(Modality::Text), hash_embedding("t", 8).as_slice());
        assert_eq!(entry.vector(Modality::Tag), hash_embedding("g", 8).as_slice());
    }

    #[test]
    fn test_check_dimension_rejects_mixed_lengths() {
        let entry = CatalogEntry::new(
            EntryKey::new("bolt", "m4"),
            hash_embedding("v", 8),
            hash_embedding("t", 8),
            hash_embedding("g", 4),
        );
        assert!(entry.check_dimension(8).is_err());
    }

    #[test]
    fn test_modality_serde_snake_case() {
        let json = serde_json::to_string(&Modality::Visual).unwrap();
        assert_eq!(json, "\"visual\"");
    }
}
