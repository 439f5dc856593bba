use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, OnceLock};

fn registry() -> &'static Mutex<Vec<PathBuf>> {
    static LIVE: OnceLock<Mutex<Vec<PathBuf>>> = OnceLock::new();
    LIVE.get_or_init(|| Mutex::new(Vec::new()))
}

/// Session-scoped directory for extracted background frames. Removed on
/// drop; survivors are swept by [`cleanup_all`] at process exit.
#[derive(Debug)]
pub struct ScratchDir {
    path: PathBuf,
}

impl ScratchDir {
    /// Create (or wipe and recreate) the scratch directory for `label`.
    pub fn recreate(label: &str) -> io::Result<Self> {
        let path = std::env::temp_dir().join(format!(
            "audiovis-{}-{}",
            label,
            std::process::id()
        ));
        if path.exists() {
            std::fs::remove_dir_all(&path)?;
        }
        std::fs::create_dir_all(&path)?;

        let mut live = registry().lock().unwrap_or_else(|e| e.into_inner());
        if !live.contains(&path) {
            live.push(path.clone());
        }
        log::debug!("Scratch directory ready: {}", path.display());
        Ok(Self { path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Sorted file listing; lexical order is temporal order for extracted frames.
    pub fn sorted_files(&self) -> io::Result<Vec<PathBuf>> {
        let mut files = Vec::new();
        for entry in std::fs::read_dir(&self.path)? {
            let entry = entry?;
            if entry.file_type()?.is_file() {
                files.push(entry.path());
            }
        }
        files.sort();
        Ok(files)
    }
}

impl Drop for ScratchDir {
    fn drop(&mut self) {
        remove(&self.path);
        let mut live = registry().lock().unwrap_or_else(|e| e.into_inner());
        live.retain(|p| p != &self.path);
    }
}

fn remove(path: &Path) {
    if path.exists() {
        if let Err(err) = std::fs::remove_dir_all(path) {
            log::warn!("Failed to remove scratch directory {}: {}", path.display(), err);
        }
    }
}

/// Remove every scratch directory still registered. Call on process exit.
pub fn cleanup_all() {
    let mut live = registry().lock().unwrap_or_else(|e| e.into_inner());
    for path in live.drain(..) {
        remove(&path);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recreate_wipes_previous_contents() {
        let first = ScratchDir::recreate("test-wipe").unwrap();
        std::fs::write(first.path().join("stale.jpg"), b"x").unwrap();
        let path = first.path().to_path_buf();
        std::mem::forget(first);

        let second = ScratchDir::recreate("test-wipe").unwrap();
        assert_eq!(second.path(), path.as_path());
        assert!(second.sorted_files().unwrap().is_empty());
    }

    #[test]
    fn drop_removes_directory() {
        let dir = ScratchDir::recreate("test-drop").unwrap();
        let path = dir.path().to_path_buf();
        assert!(path.is_dir());
        drop(dir);
        assert!(!path.exists());
    }

    #[test]
    fn listing_is_sorted() {
        let dir = ScratchDir::recreate("test-sorted").unwrap();
        for name in ["frame000003.jpg", "frame000001.jpg", "frame000002.jpg"] {
            std::fs::write(dir.path().join(name), b"x").unwrap();
        }
        let names: Vec<_> = dir
            .sorted_files()
            .unwrap()
            .iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, ["frame000001.jpg", "frame000002.jpg", "frame000003.jpg"]);
    }
}
