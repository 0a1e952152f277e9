use std::collections::{HashMap, HashSet};
use std::fs::File;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};

use sha2::Digest;
use tootles_model::ResourceKey;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct KeyDigest([u8; 16]);

impl KeyDigest {
    pub fn from_key(key: &ResourceKey) -> Self {
        let digest = sha2::Sha256::digest(key.as_str().as_bytes());
        let mut out = [0u8; 16];
        out.copy_from_slice(&digest[..16]);
        Self(out)
    }
}

/// Persisted last-access times of disk entries, so LRU order survives a
/// restart. Creation time lives in the entry metadata itself.
#[derive(Debug)]
pub struct AccessIndex {
    path: PathBuf,
    entries: HashMap<KeyDigest, u64>,
    dirty: bool,
    last_flushed_ms: u64,
}

impl AccessIndex {
    const MAGIC: [u8; 8] = *b"TOOTACC1";
    const VERSION: u32 = 1;
    const RECORD_LEN: usize = 16 + 8;

    pub fn load_or_default(path: PathBuf, now_ms: u64) -> Self {
        let entries = match load_file(&path) {
            Ok(entries) => entries,
            Err(err) => {
                tracing::warn!(
                    path = %path.display(),
                    "ignoring unreadable access index: {err}"
                );
                HashMap::new()
            }
        };
        Self {
            path,
            entries,
            dirty: false,
            last_flushed_ms: now_ms,
        }
    }

    pub fn touch(&mut self, digest: KeyDigest, now_ms: u64) {
        let slot = self.entries.entry(digest).or_insert(now_ms);
        *slot = (*slot).max(now_ms);
        self.dirty = true;
    }

    pub fn insert_on_write(&mut self, digest: KeyDigest, now_ms: u64) {
        self.entries.insert(digest, now_ms);
        self.dirty = true;
    }

    pub fn last_access_ms(&self, digest: &KeyDigest) -> Option<u64> {
        self.entries.get(digest).copied()
    }

    pub fn remove(&mut self, digest: &KeyDigest) -> bool {
        let removed = self.entries.remove(digest).is_some();
        if removed {
            self.dirty = true;
        }
        removed
    }

    pub fn prune_not_in_set(&mut self, present: &HashSet<KeyDigest>) -> usize {
        let before = self.entries.len();
        self.entries.retain(|k, _| present.contains(k));
        let removed = before.saturating_sub(self.entries.len());
        if removed > 0 {
            self.dirty = true;
        }
        removed
    }

    pub fn clear(&mut self) {
        self.entries.clear();
        self.dirty = true;
    }

    pub fn should_flush(
        &self,
        now_ms: u64,
        flush_interval_ms: u64,
        under_pressure: bool,
    ) -> bool {
        if !self.dirty {
            return false;
        }
        if under_pressure {
            return true;
        }
        now_ms.saturating_sub(self.last_flushed_ms) >= flush_interval_ms.max(1)
    }

    pub fn prepare_flush(&mut self, now_ms: u64) -> Option<(PathBuf, Vec<u8>)> {
        if !self.dirty {
            return None;
        }
        let bytes = self.serialize();
        self.dirty = false;
        self.last_flushed_ms = now_ms;
        Some((self.path.clone(), bytes))
    }

    pub fn mark_dirty(&mut self) {
        self.dirty = true;
    }

    fn serialize(&self) -> Vec<u8> {
        let mut out =
            Vec::with_capacity(16 + self.entries.len() * Self::RECORD_LEN);
        out.extend_from_slice(&Self::MAGIC);
        out.extend_from_slice(&Self::VERSION.to_le_bytes());
        out.extend_from_slice(&(self.entries.len() as u32).to_le_bytes());
        for (digest, last_access_ms) in self.entries.iter() {
            out.extend_from_slice(&digest.0);
            out.extend_from_slice(&last_access_ms.to_le_bytes());
        }
        out
    }
}

fn load_file(path: &Path) -> anyhow::Result<HashMap<KeyDigest, u64>> {
    let mut file = match File::open(path) {
        Ok(f) => f,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Ok(HashMap::new());
        }
        Err(e) => return Err(e.into()),
    };

    let mut buf = Vec::new();
    file.read_to_end(&mut buf)?;

    if buf.len() < 8 + 4 + 4 {
        return Ok(HashMap::new());
    }

    let mut cursor = 0usize;
    let magic: [u8; 8] = buf[cursor..cursor + 8].try_into()?;
    cursor += 8;
    if magic != AccessIndex::MAGIC {
        return Ok(HashMap::new());
    }

    let version = u32::from_le_bytes(buf[cursor..cursor + 4].try_into()?);
    cursor += 4;
    if version != AccessIndex::VERSION {
        return Ok(HashMap::new());
    }

    let count = u32::from_le_bytes(buf[cursor..cursor + 4].try_into()?);
    cursor += 4;

    let mut out = HashMap::with_capacity(count as usize);
    for _ in 0..count {
        if cursor + AccessIndex::RECORD_LEN > buf.len() {
            break;
        }
        let digest: [u8; 16] = buf[cursor..cursor + 16].try_into()?;
        cursor += 16;
        let last_access_ms =
            u64::from_le_bytes(buf[cursor..cursor + 8].try_into()?);
        cursor += 8;
        out.insert(KeyDigest(digest), last_access_ms);
    }
    Ok(out)
}

/// Atomically replace the snapshot at `path` (write to a sibling, rename).
pub fn write_snapshot_sync(path: &Path, bytes: &[u8]) -> anyhow::Result<()> {
    let parent = path
        .parent()
        .ok_or_else(|| anyhow::anyhow!("index path has no parent"))?;
    std::fs::create_dir_all(parent)?;

    let tmp_path = path.with_extension("tmp");
    {
        let mut f = File::create(&tmp_path)?;
        f.write_all(bytes)?;
        f.sync_all()?;
    }
    std::fs::rename(tmp_path, path)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::{AccessIndex, KeyDigest, write_snapshot_sync};
    use tempfile::tempdir;
    use tootles_model::ResourceKey;

    #[test]
    fn snapshot_survives_reload() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("access.bin");
        let (_, key) = ResourceKey::parse_url("https://x.test/a.png").unwrap();
        let digest = KeyDigest::from_key(&key);

        let mut index = AccessIndex::load_or_default(path.clone(), 0);
        index.insert_on_write(digest, 5);
        index.touch(digest, 42);
        let (snapshot_path, bytes) = index.prepare_flush(50).unwrap();
        write_snapshot_sync(&snapshot_path, &bytes).unwrap();
        assert!(index.prepare_flush(60).is_none());

        let reloaded = AccessIndex::load_or_default(path, 100);
        assert_eq!(reloaded.last_access_ms(&digest), Some(42));
    }

    #[test]
    fn garbage_file_loads_empty() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("access.bin");
        std::fs::write(&path, b"definitely not an index").unwrap();
        let index = AccessIndex::load_or_default(path, 0);
        let (_, key) = ResourceKey::parse_url("https://x.test/a.png").unwrap();
        assert_eq!(index.last_access_ms(&KeyDigest::from_key(&key)), None);
    }
}
