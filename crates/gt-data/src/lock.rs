use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};

use fs2::FileExt;
use gt_types::{DataError, GtResult};
use tracing::{debug, warn};

/// Scoped exclusive lock on a path, held for the lifetime of the guard.
///
/// Advisory (`flock`-style) so it serializes both threads of this process
/// and other processes sharing the filesystem. At most one guard per path
/// exists at a time.
#[derive(Debug)]
pub struct DatasetLock {
    file: File,
    path: PathBuf,
}

impl DatasetLock {
    /// Block until the lock is held.
    pub fn acquire(path: impl AsRef<Path>) -> GtResult<Self> {
        let path = path.as_ref().to_path_buf();
        let file = Self::open(&path)?;

        debug!("Waiting for lock {}", path.display());
        file.lock_exclusive().map_err(|e| lock_error(&path, e))?;
        debug!("Acquired lock {}", path.display());

        Ok(Self { file, path })
    }

    /// Take the lock only if nobody else holds it.
    pub fn try_acquire(path: impl AsRef<Path>) -> GtResult<Option<Self>> {
        let path = path.as_ref().to_path_buf();
        let file = Self::open(&path)?;

        match file.try_lock_exclusive() {
            Ok(()) => Ok(Some(Self { file, path })),
            Err(e) if e.raw_os_error() == fs2::lock_contended_error().raw_os_error() => Ok(None),
            Err(e) => Err(lock_error(&path, e)),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn open(path: &Path) -> GtResult<File> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)
            .map_err(|e| lock_error(path, e))
    }
}

impl Drop for DatasetLock {
    fn drop(&mut self) {
        match FileExt::unlock(&self.file) {
            Ok(()) => debug!("Released lock {}", self.path.display()),
            Err(e) => warn!("Failed to release lock {}: {}", self.path.display(), e),
        }
    }
}

fn lock_error(path: &Path, source: std::io::Error) -> gt_types::GtError {
    DataError::Lock {
        path: path.display().to_string(),
        source,
    }
    .into()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crossbeam_channel::bounded;
    use std::sync::{Arc, Mutex};
    use std::thread;
    use std::time::Duration;

    #[test]
    fn second_acquirer_waits_for_release() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("data.lock");
        let events = Arc::new(Mutex::new(Vec::new()));
        let (held_tx, held_rx) = bounded::<()>(1);

        let first = {
            let path = path.clone();
            let events = Arc::clone(&events);
            thread::spawn(move || {
                let guard = DatasetLock::acquire(&path).unwrap();
                events.lock().unwrap().push("first acquired");
                held_tx.send(()).unwrap();
                thread::sleep(Duration::from_millis(200));
                events.lock().unwrap().push("first released");
                drop(guard);
            })
        };

        held_rx.recv().unwrap();
        let second = {
            let path = path.clone();
            let events = Arc::clone(&events);
            thread::spawn(move || {
                let _guard = DatasetLock::acquire(&path).unwrap();
                events.lock().unwrap().push("second acquired");
            })
        };

        first.join().unwrap();
        second.join().unwrap();

        let events = events.lock().unwrap();
        assert_eq!(
            *events,
            vec!["first acquired", "first released", "second acquired"]
        );
    }

    #[test]
    fn try_acquire_reports_contention() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("data.lock");

        let guard = DatasetLock::acquire(&path).unwrap();
        assert_eq!(guard.path(), path.as_path());
        assert!(DatasetLock::try_acquire(&path).unwrap().is_none());

        drop(guard);
        let again = DatasetLock::try_acquire(&path).unwrap();
        assert!(again.is_some());
    }

    #[test]
    fn guard_released_on_panic() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("data.lock");

        let worker_path = path.clone();
        let result = thread::spawn(move || {
            let _guard = DatasetLock::acquire(&worker_path).unwrap();
            panic!("download failed");
        })
        .join();
        assert!(result.is_err());

        assert!(DatasetLock::try_acquire(&path).unwrap().is_some());
    }
}
