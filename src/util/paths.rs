use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};

use crate::error::{Result, VaultError};

pub fn is_safe_name(name: &str) -> bool {
    if name.is_empty() || name == "." || name == ".." {
        return false;
    }
    name.chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_' || c == '.')
}

pub fn ensure_dir(path: &Path) -> Result<()> {
    if path.exists() {
        let meta = fs::metadata(path)
            .map_err(|e| VaultError::message(format!("stat {}: {}", path.display(), e)))?;
        if !meta.is_dir() {
            return Err(VaultError::message(format!(
                "{} is not a directory",
                path.display()
            )));
        }
        return Ok(());
    }
    fs::create_dir_all(path)
        .map_err(|e| VaultError::message(format!("create {}: {}", path.display(), e)))
}

/// Creates `<base>/<prefix>_<stamp>` with mode 0700.
pub fn create_private_dir(base: &Path, prefix: &str, stamp: &str) -> Result<PathBuf> {
    ensure_dir(base)?;
    let mut candidate = base.join(format!("{}_{}", prefix, stamp));
    if candidate.exists() {
        candidate = base.join(format!("{}_{}_{}", prefix, stamp, std::process::id()));
    }
    fs::create_dir_all(&candidate)
        .map_err(|e| VaultError::message(format!("create {}: {}", candidate.display(), e)))?;
    let mut perms = fs::metadata(&candidate)
        .map_err(|e| VaultError::message(format!("stat {}: {}", candidate.display(), e)))?
        .permissions();
    perms.set_mode(0o700);
    fs::set_permissions(&candidate, perms)
        .map_err(|e| VaultError::message(format!("chmod {}: {}", candidate.display(), e)))?;
    Ok(candidate)
}

pub fn list_entries(path: &Path) -> Result<Vec<String>> {
    let mut out = Vec::new();
    for entry in fs::read_dir(path)
        .map_err(|e| VaultError::message(format!("read {}: {}", path.display(), e)))?
    {
        let entry =
            entry.map_err(|e| VaultError::message(format!("read {}: {}", path.display(), e)))?;
        let name = entry.file_name().to_string_lossy().to_string();
        if name == "." || name == ".." {
            continue;
        }
        out.push(name);
    }
    out.sort();
    Ok(out)
}

/// Copies `src` to `dest` and carries over the modification time, so that size and
/// mtime comparisons against the copy stay meaningful.
pub fn copy_preserving_mtime(src: &Path, dest: &Path) -> Result<()> {
    if let Some(parent) = dest.parent() {
        fs::create_dir_all(parent)
            .map_err(|e| VaultError::message(format!("create {}: {}", parent.display(), e)))?;
    }
    fs::copy(src, dest).map_err(|e| {
        VaultError::message(format!("copy {} to {}: {}", src.display(), dest.display(), e))
    })?;
    let modified = fs::metadata(src)
        .and_then(|m| m.modified())
        .map_err(|e| VaultError::message(format!("stat {}: {}", src.display(), e)))?;
    let file = fs::File::options()
        .write(true)
        .open(dest)
        .map_err(|e| VaultError::message(format!("open {}: {}", dest.display(), e)))?;
    file.set_modified(modified)
        .map_err(|e| VaultError::message(format!("touch {}: {}", dest.display(), e)))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn safe_names() {
        assert!(is_safe_name("db-data"));
        assert!(is_safe_name("stack_app.v2"));
        assert!(!is_safe_name(".."));
        assert!(!is_safe_name("a/b"));
        assert!(!is_safe_name(""));
    }

    #[test]
    fn private_dir_is_unique_and_0700() {
        let dir = TempDir::new().expect("tempdir");
        let first = create_private_dir(dir.path(), "work", "20250101_000000").expect("first");
        let second = create_private_dir(dir.path(), "work", "20250101_000000").expect("second");
        assert_ne!(first, second);
        let mode = fs::metadata(&first).expect("stat").permissions().mode() & 0o777;
        assert_eq!(mode, 0o700);
    }

    #[test]
    fn copy_keeps_mtime() {
        let dir = TempDir::new().expect("tempdir");
        let src = dir.path().join("a");
        fs::write(&src, "x=1\n").expect("write");
        let dest = dir.path().join("nested/b");
        copy_preserving_mtime(&src, &dest).expect("copy");
        let a = fs::metadata(&src).unwrap().modified().unwrap();
        let b = fs::metadata(&dest).unwrap().modified().unwrap();
        assert_eq!(a, b);
    }
}
