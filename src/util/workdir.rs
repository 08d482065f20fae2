use std::path::{Path, PathBuf};

use crate::error::Result;
use crate::util::paths::create_private_dir;

/// A working directory removed when the guard drops, on every exit path.
pub struct WorkDir {
    path: PathBuf,
    keep: bool,
}

impl WorkDir {
    pub fn create(base: &Path, prefix: &str, stamp: &str) -> Result<Self> {
        let path = create_private_dir(base, prefix, stamp)?;
        Ok(Self { path, keep: false })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Leaves the directory in place for inspection.
    pub fn persist(mut self) -> PathBuf {
        self.keep = true;
        self.path.clone()
    }
}

impl Drop for WorkDir {
    fn drop(&mut self) {
        if self.keep {
            return;
        }
        if let Err(err) = std::fs::remove_dir_all(&self.path) {
            if err.kind() != std::io::ErrorKind::NotFound {
                tracing::warn!("remove {}: {}", self.path.display(), err);
            }
        }
    }
}

/// Removes a single file when dropped unless disarmed.
pub struct FileGuard {
    path: PathBuf,
    armed: bool,
}

impl FileGuard {
    pub fn new(path: PathBuf) -> Self {
        Self { path, armed: true }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn disarm(mut self) -> PathBuf {
        self.armed = false;
        self.path.clone()
    }
}

impl Drop for FileGuard {
    fn drop(&mut self) {
        if self.armed {
            let _ = std::fs::remove_file(&self.path);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn removed_on_drop() {
        let base = TempDir::new().expect("tempdir");
        let path = {
            let work = WorkDir::create(base.path(), "work", "1").expect("create");
            std::fs::write(work.path().join("f"), "x").expect("write");
            work.path().to_path_buf()
        };
        assert!(!path.exists());
    }

    #[test]
    fn persisted_dir_survives() {
        let base = TempDir::new().expect("tempdir");
        let work = WorkDir::create(base.path(), "restore", "1").expect("create");
        let path = work.persist();
        assert!(path.exists());
    }

    #[test]
    fn file_guard_disarm_keeps_file() {
        let base = TempDir::new().expect("tempdir");
        let a = base.path().join("a");
        let b = base.path().join("b");
        std::fs::write(&a, "a").unwrap();
        std::fs::write(&b, "b").unwrap();
        drop(FileGuard::new(a.clone()));
        let kept = FileGuard::new(b.clone()).disarm();
        assert!(!a.exists());
        assert!(kept.exists());
    }
}
