// Local key-value persistence for the client SDK.
//
// The SDK keeps a small namespace of JSON-string values per user:
//   events:<user_id>  - most recent locally-delivered events (local mode)
//   event_queue       - pending flush buffer, restored on startup
//
// The file store maps each key to one file in a directory and writes via
// temp-file + rename so a crash mid-write never corrupts a snapshot.

use crate::error::TransportError;
use std::collections::HashMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

/// Key-value namespace with UTF-8 JSON string values
pub trait KeyValueStore: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<String>, TransportError>;
    fn set(&self, key: &str, value: &str) -> Result<(), TransportError>;
    fn remove(&self, key: &str) -> Result<(), TransportError>;
}

/// File-backed store: one file per key under a data directory
pub struct FileStore {
    dir: PathBuf,
}

impl FileStore {
    /// Create the store, creating the directory if needed
    pub fn new(dir: impl Into<PathBuf>) -> Result<Self, std::io::Error> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    /// Keys contain ':' which is not filename-safe everywhere
    fn path_for(&self, key: &str) -> PathBuf {
        let name: String = key
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() || c == '_' || c == '-' { c } else { '_' })
            .collect();
        self.dir.join(format!("{}.json", name))
    }

    fn write_atomic(path: &Path, value: &str) -> Result<(), std::io::Error> {
        let tmp = path.with_extension("json.tmp");
        {
            let mut file = fs::File::create(&tmp)?;
            file.write_all(value.as_bytes())?;
            file.flush()?;
        }
        fs::rename(&tmp, path)
    }
}

impl KeyValueStore for FileStore {
    fn get(&self, key: &str) -> Result<Option<String>, TransportError> {
        match fs::read_to_string(self.path_for(key)) {
            Ok(contents) => Ok(Some(contents)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn set(&self, key: &str, value: &str) -> Result<(), TransportError> {
        Self::write_atomic(&self.path_for(key), value).map_err(Into::into)
    }

    fn remove(&self, key: &str) -> Result<(), TransportError> {
        match fs::remove_file(self.path_for(key)) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

/// In-memory store for tests and ephemeral clients
#[derive(Default)]
pub struct MemoryStore {
    map: Mutex<HashMap<String, String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl KeyValueStore for MemoryStore {
    fn get(&self, key: &str) -> Result<Option<String>, TransportError> {
        Ok(self.map.lock().unwrap().get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<(), TransportError> {
        self.map.lock().unwrap().insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), TransportError> {
        self.map.lock().unwrap().remove(key);
        Ok(())
    }
}
