use std::fs::{self, File};
use std::io::{self, ErrorKind, Write};
use std::path::{Path, PathBuf};

const TEMP_SUFFIX: &str = ".tmp";

/// Bucket is a flat namespace of small durable records, one file per key.
///
/// A `put()` is visible either entirely or not at all after a crash: the value is written to a
/// temp file, synced, then renamed over the key, and the directory is synced so the rename
/// itself is durable.
pub(crate) struct Bucket {
    dir: PathBuf,
}

impl Bucket {
    /// Opens (creating if needed) the bucket `name` under `root`. Leftover temp files from a crash
    /// mid-`put()` are removed.
    pub(crate) fn open(root: &Path, name: &str) -> io::Result<Self> {
        let dir = root.join(name);
        fs::create_dir_all(&dir)?;
        sync_dir(root)?;

        let bucket = Bucket { dir };
        for entry in fs::read_dir(&bucket.dir)? {
            let path = entry?.path();
            let is_temp = path
                .file_name()
                .and_then(|name| name.to_str())
                .map_or(false, |name| name.ends_with(TEMP_SUFFIX));
            if is_temp {
                fs::remove_file(&path)?;
            }
        }

        Ok(bucket)
    }

    pub(crate) fn put(&self, key: &str, value: &[u8]) -> io::Result<()> {
        let temp_path = self.dir.join(format!("{}{}", key, TEMP_SUFFIX));

        let mut file = File::create(&temp_path)?;
        file.write_all(value)?;
        file.sync_all()?;
        fs::rename(&temp_path, self.dir.join(key))?;

        self.sync()
    }

    pub(crate) fn get(&self, key: &str) -> io::Result<Option<Vec<u8>>> {
        match fs::read(self.dir.join(key)) {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Deleting a missing key is not an error. Deletes are only durable after `sync()`.
    pub(crate) fn delete(&self, key: &str) -> io::Result<()> {
        match fs::remove_file(self.dir.join(key)) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e),
        }
    }

    /// All committed keys, in no particular order.
    pub(crate) fn keys(&self) -> io::Result<Vec<String>> {
        let mut keys = Vec::new();
        for entry in fs::read_dir(&self.dir)? {
            let entry = entry?;
            if let Some(name) = entry.file_name().to_str() {
                if !name.ends_with(TEMP_SUFFIX) {
                    keys.push(name.to_string());
                }
            }
        }

        Ok(keys)
    }

    pub(crate) fn sync(&self) -> io::Result<()> {
        sync_dir(&self.dir)
    }
}

#[cfg(unix)]
fn sync_dir(dir: &Path) -> io::Result<()> {
    File::open(dir)?.sync_all()
}

#[cfg(not(unix))]
fn sync_dir(_: &Path) -> io::Result<()> {
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn put_get_overwrite() {
        let dir = tempdir().unwrap();
        let bucket = Bucket::open(dir.path(), "meta").unwrap();

        assert_eq!(bucket.get("hard_state").unwrap(), None);

        bucket.put("hard_state", b"one").unwrap();
        bucket.put("hard_state", b"two").unwrap();
        assert_eq!(bucket.get("hard_state").unwrap(), Some(b"two".to_vec()));
    }

    #[test]
    fn delete_is_idempotent() {
        let dir = tempdir().unwrap();
        let bucket = Bucket::open(dir.path(), "entries").unwrap();

        bucket.put("1", b"x").unwrap();
        bucket.delete("1").unwrap();
        bucket.delete("1").unwrap();
        bucket.sync().unwrap();

        assert_eq!(bucket.get("1").unwrap(), None);
        assert!(bucket.keys().unwrap().is_empty());
    }

    #[test]
    fn reopen_discards_partial_writes() {
        let dir = tempdir().unwrap();
        {
            let bucket = Bucket::open(dir.path(), "entries").unwrap();
            bucket.put("1", b"x").unwrap();
        }

        // Simulate a crash between creating the temp file and renaming it.
        fs::write(dir.path().join("entries").join("2.tmp"), b"half").unwrap();

        let bucket = Bucket::open(dir.path(), "entries").unwrap();
        assert_eq!(bucket.keys().unwrap(), vec!["1".to_string()]);
        assert!(!dir.path().join("entries").join("2.tmp").exists());
    }
}
