use std::path::{Path, PathBuf};

use anyhow::Context;
use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::submissions::Fingerprint;

/// What the client remembers about an image it has already sent through the
/// describe stage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SeenImage {
    pub file_name: String,
    pub description: String,
    pub first_seen: String,
    pub last_seen: String,
    #[serde(default)]
    pub submissions: u64,
}

/// Advisory on-disk map from fingerprint to [`SeenImage`].
///
/// Writes merge with whatever is on disk at flush time, so two processes
/// sharing a file do not drop each other's keys. The caption service stays
/// the authority on duplicates; this only feeds UI hints.
#[derive(Debug, Clone)]
pub struct SeenImageCache {
    path: PathBuf,
    payload: Option<Map<String, Value>>,
    dirty_keys: Vec<String>,
    removed_keys: Vec<String>,
    cleared: bool,
}

impl SeenImageCache {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            payload: None,
            dirty_keys: Vec::new(),
            removed_keys: Vec::new(),
            cleared: false,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn lookup(&mut self, fingerprint: &Fingerprint) -> Option<SeenImage> {
        let payload = self.ensure_loaded();
        payload
            .get(fingerprint.as_str())
            .cloned()
            .and_then(|value| serde_json::from_value(value).ok())
    }

    pub fn remember(
        &mut self,
        fingerprint: &Fingerprint,
        file_name: &str,
        description: &str,
    ) -> anyhow::Result<SeenImage> {
        let now = now_utc_iso();
        let entry = match self.lookup(fingerprint) {
            Some(existing) => SeenImage {
                file_name: file_name.to_string(),
                description: description.to_string(),
                first_seen: existing.first_seen,
                last_seen: now,
                submissions: existing.submissions.saturating_add(1),
            },
            None => SeenImage {
                file_name: file_name.to_string(),
                description: description.to_string(),
                first_seen: now.clone(),
                last_seen: now,
                submissions: 1,
            },
        };

        let key = fingerprint.as_str().to_string();
        let snapshot = serde_json::to_value(&entry)?;
        self.ensure_loaded().insert(key.clone(), snapshot);
        self.removed_keys.retain(|existing| existing != &key);
        if !self.dirty_keys.contains(&key) {
            self.dirty_keys.push(key);
        }
        self.flush()?;
        Ok(entry)
    }

    pub fn forget(&mut self, fingerprint: &Fingerprint) -> anyhow::Result<bool> {
        let key = fingerprint.as_str().to_string();
        let existed = self.ensure_loaded().remove(&key).is_some();
        if !existed {
            return Ok(false);
        }
        self.dirty_keys.retain(|existing| existing != &key);
        if !self.removed_keys.contains(&key) {
            self.removed_keys.push(key);
        }
        self.flush()?;
        Ok(true)
    }

    pub fn clear(&mut self) -> anyhow::Result<()> {
        self.payload = Some(Map::new());
        self.dirty_keys.clear();
        self.removed_keys.clear();
        self.cleared = true;
        self.flush()
    }

    pub fn flush(&mut self) -> anyhow::Result<()> {
        let pending = self.cleared || !self.dirty_keys.is_empty() || !self.removed_keys.is_empty();
        if self.payload.is_none() || !pending {
            return Ok(());
        }

        let mut on_disk = if self.cleared {
            Map::new()
        } else {
            read_json_object(&self.path).unwrap_or_default()
        };
        for key in &self.removed_keys {
            on_disk.remove(key);
        }
        if let Some(payload) = &self.payload {
            for key in &self.dirty_keys {
                if let Some(value) = payload.get(key) {
                    on_disk.insert(key.clone(), value.clone());
                }
            }
        }
        write_json_object(&self.path, &on_disk)?;
        self.payload = Some(on_disk);
        self.dirty_keys.clear();
        self.removed_keys.clear();
        self.cleared = false;
        Ok(())
    }

    fn ensure_loaded(&mut self) -> &mut Map<String, Value> {
        let path = &self.path;
        self.payload
            .get_or_insert_with(|| read_json_object(path).unwrap_or_default())
    }
}

fn read_json_object(path: &Path) -> Option<Map<String, Value>> {
    let raw = std::fs::read_to_string(path).ok()?;
    let parsed: Value = serde_json::from_str(&raw).ok()?;
    parsed.as_object().cloned()
}

fn write_json_object(path: &Path, payload: &Map<String, Value>) -> anyhow::Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("failed creating {}", parent.display()))?;
    }
    std::fs::write(
        path,
        serde_json::to_string_pretty(&Value::Object(payload.clone()))?,
    )
    .with_context(|| format!("failed writing {}", path.display()))?;
    Ok(())
}

fn now_utc_iso() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Micros, false)
}

#[cfg(test)]
mod tests {
    use super::SeenImageCache;
    use crate::submissions::fingerprint;

    #[test]
    fn remember_then_lookup() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let mut cache = SeenImageCache::new(temp.path().join("seen.json"));
        let id = fingerprint(b"image-x");

        assert_eq!(cache.lookup(&id), None);
        let stored = cache.remember(&id, "x.png", "D1")?;
        assert_eq!(stored.submissions, 1);

        let found = cache.lookup(&id).unwrap();
        assert_eq!(found.file_name, "x.png");
        assert_eq!(found.description, "D1");
        Ok(())
    }

    #[test]
    fn remember_again_keeps_first_seen_and_counts() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let mut cache = SeenImageCache::new(temp.path().join("seen.json"));
        let id = fingerprint(b"image-x");

        let first = cache.remember(&id, "x.png", "D1")?;
        let second = cache.remember(&id, "x-copy.png", "D1")?;
        assert_eq!(second.first_seen, first.first_seen);
        assert_eq!(second.submissions, 2);
        assert_eq!(second.file_name, "x-copy.png");
        Ok(())
    }

    #[test]
    fn writers_sharing_a_file_merge_keys() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let path = temp.path().join("seen.json");
        let mut cache_a = SeenImageCache::new(&path);
        let mut cache_b = SeenImageCache::new(&path);
        let (a, b, c) = (fingerprint(b"a"), fingerprint(b"b"), fingerprint(b"c"));

        cache_a.remember(&a, "a.png", "A")?;
        cache_b.remember(&b, "b.png", "B")?;
        cache_a.remember(&c, "c.png", "C")?;

        let mut reloaded = SeenImageCache::new(path);
        assert!(reloaded.lookup(&a).is_some());
        assert!(reloaded.lookup(&b).is_some());
        assert!(reloaded.lookup(&c).is_some());
        Ok(())
    }

    #[test]
    fn forget_removes_only_that_key() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let path = temp.path().join("seen.json");
        let mut cache = SeenImageCache::new(&path);
        let (a, b) = (fingerprint(b"a"), fingerprint(b"b"));
        cache.remember(&a, "a.png", "A")?;
        cache.remember(&b, "b.png", "B")?;

        assert!(cache.forget(&a)?);
        assert!(!cache.forget(&a)?);

        let mut reloaded = SeenImageCache::new(path);
        assert_eq!(reloaded.lookup(&a), None);
        assert!(reloaded.lookup(&b).is_some());
        Ok(())
    }

    #[test]
    fn clear_empties_file() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let path = temp.path().join("seen.json");
        let mut cache = SeenImageCache::new(&path);
        let a = fingerprint(b"a");
        cache.remember(&a, "a.png", "A")?;
        cache.clear()?;

        let mut reloaded = SeenImageCache::new(path);
        assert_eq!(reloaded.lookup(&a), None);
        Ok(())
    }

    #[test]
    fn corrupt_file_reads_as_empty() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let path = temp.path().join("seen.json");
        std::fs::write(&path, "not json")?;
        let mut cache = SeenImageCache::new(&path);
        let a = fingerprint(b"a");
        assert_eq!(cache.lookup(&a), None);
        cache.remember(&a, "a.png", "A")?;
        assert!(cache.lookup(&a).is_some());
        Ok(())
    }
}
