//! File access for the module tree
//!
//! Every read-modify-write of a module file runs under `FileLocks::with_file`:
//! an in-process mutex per path, plus an advisory lock file so two mender
//! processes never interleave writes to the same module.

use crate::error::{MendError, Result};
use crate::util::hash_str;
use fs2::FileExt;
use std::collections::HashMap;
use std::fs::{self, File, OpenOptions};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

const LOCK_TIMEOUT_SECS: u64 = 5;
const LOCK_RETRY_MS: u64 = 50;

#[derive(Debug)]
pub struct FileLocks {
    lock_dir: PathBuf,
    in_process: Mutex<HashMap<PathBuf, Arc<Mutex<()>>>>,
}

impl Default for FileLocks {
    fn default() -> Self {
        Self::new(std::env::temp_dir().join("api-mender-locks"))
    }
}

struct AdvisoryLock {
    file: File,
}

impl Drop for AdvisoryLock {
    fn drop(&mut self) {
        let _ = FileExt::unlock(&self.file);
    }
}

impl FileLocks {
    pub fn new(lock_dir: impl Into<PathBuf>) -> Self {
        Self {
            lock_dir: lock_dir.into(),
            in_process: Mutex::new(HashMap::new()),
        }
    }

    fn path_mutex(&self, path: &Path) -> Arc<Mutex<()>> {
        let mut map = self.in_process.lock().unwrap_or_else(PoisonError::into_inner);
        map.entry(path.to_path_buf())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    fn advisory(&self, path: &Path) -> Result<AdvisoryLock> {
        fs::create_dir_all(&self.lock_dir).map_err(|e| MendError::io(&self.lock_dir, e))?;
        let key = path.canonicalize().unwrap_or_else(|_| path.to_path_buf());
        let lock_path = self
            .lock_dir
            .join(format!("{}.lock", hash_str(&key.to_string_lossy())));
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&lock_path)
            .map_err(|e| MendError::io(&lock_path, e))?;

        let start = Instant::now();
        loop {
            match FileExt::try_lock_exclusive(&file) {
                Ok(()) => return Ok(AdvisoryLock { file }),
                Err(err) if err.kind() == ErrorKind::WouldBlock => {
                    if start.elapsed() >= Duration::from_secs(LOCK_TIMEOUT_SECS) {
                        return Err(MendError::Lock(path.to_path_buf()));
                    }
                    std::thread::sleep(Duration::from_millis(LOCK_RETRY_MS));
                }
                Err(err) => return Err(MendError::io(&lock_path, err)),
            }
        }
    }

    /// Drop the mutex for `path` once nobody else holds or waits on it.
    fn release(&self, path: &Path) {
        let mut map = self.in_process.lock().unwrap_or_else(PoisonError::into_inner);
        if map.get(path).is_some_and(|m| Arc::strong_count(m) == 1) {
            map.remove(path);
        }
    }

    /// Run `f` while holding both locks for `path`.
    pub fn with_file<T>(&self, path: &Path, f: impl FnOnce() -> Result<T>) -> Result<T> {
        let mutex = self.path_mutex(path);
        let result = {
            let _guard = mutex.lock().unwrap_or_else(PoisonError::into_inner);
            self.advisory(path).and_then(|_advisory| f())
        };
        drop(mutex);
        self.release(path);
        result
    }
}

/// Read a module file, rejecting non-UTF-8 content.
pub fn read_source(path: &Path) -> Result<String> {
    let bytes = fs::read(path).map_err(|e| MendError::io(path, e))?;
    String::from_utf8(bytes).map_err(|source| MendError::Decode {
        path: path.to_path_buf(),
        source,
    })
}

/// Replace `path` with `content` via a temp file in the same directory.
///
/// The original file's permissions are carried over. A failed rename
/// leaves the original untouched.
pub fn write_atomic(path: &Path, content: &str) -> Result<()> {
    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| "module".to_string());
    let tmp_path = path.with_file_name(format!(".{}.mender-tmp", file_name));

    fs::write(&tmp_path, content).map_err(|e| MendError::io(&tmp_path, e))?;

    if let Ok(meta) = fs::metadata(path) {
        let _ = fs::set_permissions(&tmp_path, meta.permissions());
    }

    if let Err(err) = fs::rename(&tmp_path, path) {
        let _ = fs::remove_file(&tmp_path);
        return Err(MendError::io(path, err));
    }
    Ok(())
}
