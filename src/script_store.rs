//! Local copies of downloaded script files. The filesystem is the
//! source of truth: a script is "downloaded" when its files exist
//! under the store root, and "up to date" when the bytes match the
//! freshly fetched remote content. No checksums are stored.

use std::io;
use std::path::{Component, Path, PathBuf};

use tokio::fs;

#[derive(Clone)]
pub struct ScriptStore {
    root: PathBuf,
}

impl ScriptStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Maps a repo-relative path under the store root. Absolute paths
    /// and parent-directory components are rejected so a descriptor
    /// can never write outside the scripts directory.
    pub fn resolve(&self, rel_path: &str) -> io::Result<PathBuf> {
        let rel = Path::new(rel_path);
        if rel.is_absolute()
            || rel
                .components()
                .any(|c| !matches!(c, Component::Normal(_)))
        {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("invalid script path: {rel_path}"),
            ));
        }
        Ok(self.root.join(rel))
    }

    pub async fn save(&self, rel_path: &str, content: &str) -> io::Result<PathBuf> {
        let path = self.resolve(rel_path)?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await?;
        }
        fs::write(&path, content).await?;
        Ok(path)
    }

    pub async fn read(&self, rel_path: &str) -> io::Result<Option<String>> {
        let path = self.resolve(rel_path)?;
        match fs::read_to_string(&path).await {
            Ok(content) => Ok(Some(content)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e),
        }
    }

    pub async fn exists(&self, rel_path: &str) -> bool {
        match self.resolve(rel_path) {
            Ok(path) => fs::try_exists(&path).await.unwrap_or(false),
            Err(_) => false,
        }
    }

    pub async fn delete(&self, rel_path: &str) -> io::Result<bool> {
        let path = self.resolve(rel_path)?;
        match fs::remove_file(&path).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> (tempfile::TempDir, ScriptStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = ScriptStore::new(dir.path());
        (dir, store)
    }

    #[tokio::test]
    async fn save_read_delete_round_trip() {
        let (_dir, store) = store();
        store.save("ct/homarr.sh", "#!/bin/bash\n").await.unwrap();
        assert!(store.exists("ct/homarr.sh").await);
        assert_eq!(
            store.read("ct/homarr.sh").await.unwrap().as_deref(),
            Some("#!/bin/bash\n")
        );
        assert!(store.delete("ct/homarr.sh").await.unwrap());
        assert!(!store.exists("ct/homarr.sh").await);
    }

    #[tokio::test]
    async fn missing_file_reads_as_none() {
        let (_dir, store) = store();
        assert_eq!(store.read("ct/absent.sh").await.unwrap(), None);
        assert!(!store.delete("ct/absent.sh").await.unwrap());
    }

    #[test]
    fn path_traversal_is_rejected() {
        let store = ScriptStore::new("/tmp/scripts");
        assert!(store.resolve("../etc/passwd").is_err());
        assert!(store.resolve("/etc/passwd").is_err());
        assert!(store.resolve("ct/../../x.sh").is_err());
        assert!(store.resolve("ct/app.sh").is_ok());
    }
}
