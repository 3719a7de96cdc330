use crate::error::{DriftlessError, Result};
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use std::fs::File;
use std::io::{BufReader, BufWriter, Write};
use std::path::Path;

use super::CacheEntry;

/// Write all live entries to a gzip-compressed JSON snapshot.
///
/// Writes to a sibling `.tmp` file first and renames into place, so a crash
/// mid-write leaves the previous snapshot intact.
pub fn save(entries: &[CacheEntry], path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let tmp_path = path.with_extension("tmp");
    {
        let file = File::create(&tmp_path)?;
        let encoder = GzEncoder::new(BufWriter::new(file), Compression::fast());
        let mut writer = BufWriter::new(encoder);
        serde_json::to_writer(&mut writer, entries)?;
        writer.flush()?;
    }
    std::fs::rename(&tmp_path, path)
        .map_err(|e| DriftlessError::Snapshot(format!("rename failed: {}", e)))?;

    Ok(())
}

/// Load a snapshot, dropping entries that expired while the process was down.
pub fn load(path: &Path) -> Result<Vec<CacheEntry>> {
    let file = File::open(path)?;
    let decoder = GzDecoder::new(BufReader::new(file));
    let entries: Vec<CacheEntry> = serde_json::from_reader(decoder)?;

    let now = chrono::Utc::now();
    let total = entries.len();
    let live: Vec<CacheEntry> = entries.into_iter().filter(|e| e.expires_at > now).collect();

    if live.len() < total {
        tracing::debug!(
            "[cache] snapshot load dropped {} expired of {} entries",
            total - live.len(),
            total
        );
    }

    Ok(live)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{ResultKind, Translation};
    use chrono::{Duration, Utc};
    use tempfile::TempDir;

    fn entry(fp: &str, expires_in_secs: i64) -> CacheEntry {
        let now = Utc::now();
        CacheEntry {
            fingerprint: fp.to_string(),
            value: Translation::new("hola", 0.9),
            kind: ResultKind::Text,
            created_at: now,
            expires_at: now + Duration::seconds(expires_in_secs),
            last_accessed_at: now,
            hit_count: 0,
        }
    }

    #[test]
    fn test_roundtrip() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("cache_snapshot.json.gz");

        let entries = vec![entry("a", 3600), entry("b", 3600)];
        save(&entries, &path).unwrap();

        let loaded = load(&path).unwrap();
        assert_eq!(loaded.len(), 2);
        assert_eq!(loaded[0].value.text, "hola");
    }

    #[test]
    fn test_load_drops_expired() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("cache_snapshot.json.gz");

        let entries = vec![entry("live", 3600), entry("stale", -10)];
        save(&entries, &path).unwrap();

        let loaded = load(&path).unwrap();
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0].fingerprint, "live");
    }

    #[test]
    fn test_save_replaces_previous() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("cache_snapshot.json.gz");

        save(&[entry("first", 3600)], &path).unwrap();
        save(&[entry("second", 3600), entry("third", 3600)], &path).unwrap();

        let loaded = load(&path).unwrap();
        assert_eq!(loaded.len(), 2);
    }
}
