use std::fs::OpenOptions;
use std::io::Write;
use std::path::PathBuf;

use fs2::FileExt;

/// Advisory file lock that makes sure only one process on the host runs the
/// background loops. Losing the race is not an error; the process keeps
/// serving the API without them.
pub struct BackgroundLock {
    file: std::fs::File,
    path: PathBuf,
}

impl BackgroundLock {
    /// Non-blocking acquire. Returns None when another process holds the
    /// lock or the lock file cannot be created.
    pub fn try_acquire(path_override: Option<&str>) -> Option<Self> {
        let path = match path_override {
            Some(path) => PathBuf::from(path),
            None => std::env::temp_dir().join("armada_background_tasks.lock"),
        };
        let mut file = match OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .truncate(false)
            .open(&path)
        {
            Ok(file) => file,
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "background lock init failed");
                return None;
            }
        };
        if file.try_lock_exclusive().is_err() {
            return None;
        }
        // Record the holder for operators poking around /tmp.
        let _ = file.set_len(0);
        let _ = write!(file, "{}", std::process::id());
        let _ = file.flush();
        tracing::info!(path = %path.display(), "background task lock acquired");
        Some(Self { file, path })
    }

    pub fn path(&self) -> &std::path::Path {
        &self.path
    }
}

impl Drop for BackgroundLock {
    fn drop(&mut self) {
        if let Err(e) = fs2::FileExt::unlock(&self.file) {
            tracing::debug!(error = %e, "background lock release failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn second_acquire_in_same_process_fails_until_release() {
        let dir = std::env::temp_dir();
        let path = dir.join(format!("armada-lock-test-{}.lock", std::process::id()));
        let path_str = path.to_str().unwrap().to_string();

        let first = BackgroundLock::try_acquire(Some(&path_str));
        assert!(first.is_some());
        // flock is per file handle, so a second handle must be refused.
        assert!(BackgroundLock::try_acquire(Some(&path_str)).is_none());

        drop(first);
        let reacquired = BackgroundLock::try_acquire(Some(&path_str));
        assert!(reacquired.is_some());
        drop(reacquired);
        let _ = std::fs::remove_file(path);
    }

    #[test]
    fn lock_file_records_the_owner_pid() {
        let path = std::env::temp_dir().join(format!("armada-pid-test-{}.lock", std::process::id()));
        let path_str = path.to_str().unwrap().to_string();
        let lock = BackgroundLock::try_acquire(Some(&path_str)).unwrap();
        let content = std::fs::read_to_string(lock.path()).unwrap();
        assert_eq!(content, std::process::id().to_string());
        drop(lock);
        let _ = std::fs::remove_file(path);
    }
}
