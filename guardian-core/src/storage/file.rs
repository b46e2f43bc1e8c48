use std::{
    fs,
    io::{ErrorKind, Write},
    path::{Path, PathBuf},
};

use crate::error::{GuardianError, GuardianResult};

use super::RecordStorage;

/// Record storage backed by one file per record in a directory.
///
/// Writes go to `{name}.tmp`, are synced, then renamed over `{name}.json` so
/// a crash never leaves a half-written record behind.
#[derive(Debug, Clone)]
pub struct FileRecordStorage {
    root: PathBuf,
}

impl FileRecordStorage {
    /// Opens storage rooted at `root`, creating the directory if needed.
    ///
    /// # Errors
    /// Returns [`GuardianError::Storage`] if the directory cannot be created.
    pub fn open(root: impl Into<PathBuf>) -> GuardianResult<Self> {
        let root = root.into();
        fs::create_dir_all(&root).map_err(|e| io_error("create", &root, &e))?;
        Ok(Self { root })
    }

    /// Directory the records live in.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn record_path(&self, name: &str) -> GuardianResult<PathBuf> {
        if name.is_empty() || name.contains(['/', '\\']) || name.starts_with('.') {
            return Err(GuardianError::Storage(format!("invalid record name {name:?}")));
        }
        Ok(self.root.join(format!("{name}.json")))
    }
}

impl RecordStorage for FileRecordStorage {
    fn get(&self, name: &str) -> GuardianResult<Option<Vec<u8>>> {
        let path = self.record_path(name)?;
        match fs::read(&path) {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(io_error("read", &path, &e)),
        }
    }

    fn put(&self, name: &str, bytes: &[u8]) -> GuardianResult<()> {
        let path = self.record_path(name)?;
        let tmp = self.root.join(format!("{name}.tmp"));

        let mut file = fs::File::create(&tmp).map_err(|e| io_error("create", &tmp, &e))?;
        file.write_all(bytes)
            .and_then(|()| file.sync_all())
            .map_err(|e| io_error("write", &tmp, &e))?;
        drop(file);

        fs::rename(&tmp, &path).map_err(|e| io_error("rename", &path, &e))
    }
}

fn io_error(action: &str, path: &Path, error: &std::io::Error) -> GuardianError {
    GuardianError::Storage(format!("failed to {action} {}: {error}", path.display()))
}
