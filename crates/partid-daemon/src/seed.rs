// crates/partid-daemon/src/seed.rs
//
// Startup catalog seeding from a JSON file of catalog entries.

use std::fs;

use partid_core::{CatalogEntry, PartIdError};
use partid_engine::IdentificationEngine;

/// Read a JSON array of catalog entries.
pub fn load_seed(path: &str) -> Result<Vec<CatalogEntry>, PartIdError> {
    let contents = fs::read_to_string(path)
        .map_err(|e| PartIdError::Config(format!("cannot read seed {}: {}", path, e)))?;
    let entries: Vec<CatalogEntry> = serde_json::from_str(&contents)?;
    Ok(entries)
}

/// Upsert the seed file into the engine as one batch and rebuild the index.
///
/// Entries already in the catalog are replaced.
pub async fn apply_seed(engine: &IdentificationEngine, path: &str) -> Result<usize, PartIdError> {
    let entries = load_seed(path)?;
    if entries.is_empty() {
        tracing::warn!("Catalog seed {} is empty", path);
        return Ok(0);
    }
    let written = engine.upsert_entries(entries)?;
    engine.rebuild_index().await?;
    tracing::info!("Seeded {} catalog entries from {}", written, path);
    Ok(written)
}

#[cfg(test)]
mod tests {
    use super::*;
    use partid_core::{hash_embedding, EntryKey};
    use partid_engine::EngineConfig;

    fn seed_file(entries: &[CatalogEntry]) -> String {
        let path = std::env::temp_dir().join(format!(
            "partid_seed_{}_{}.json",
            std::process::id(),
            entries.len()
        ));
        fs::write(&path, serde_json::to_string(entries).unwrap()).unwrap();
        path.to_string_lossy().to_string()
    }

    #[tokio::test]
    async fn test_apply_seed() {
        let dim = 8;
        let entries: Vec<CatalogEntry> = ["gear", "shaft", "washer"]
            .iter()
            .map(|id| {
                CatalogEntry::new(
                    EntryKey::new(*id, "std"),
                    hash_embedding(&format!("{id}-v"), dim),
                    hash_embedding(&format!("{id}-t"), dim),
                    hash_embedding(&format!("{id}-g"), dim),
                )
            })
            .collect();
        let path = seed_file(&entries);

        let engine = IdentificationEngine::new(EngineConfig::with_dimension(dim)).unwrap();
        assert_eq!(apply_seed(&engine, &path).await.unwrap(), 3);
        let stats = engine.catalog_stats();
        assert_eq!(stats.live, 3);
        assert_eq!(stats.delta, 0);
        let _ = fs::remove_file(path);
    }

    #[test]
    fn test_missing_seed_is_config_error() {
        let err = load_seed("/nonexistent/partid-seed.json").unwrap_err();
        assert!(matches!(err, PartIdError::Config(_)));
    }
}
