// vault-tasks/src/vault.rs

use async_trait::async_trait;
use parking_lot::RwLock;
use std::{
    collections::{BTreeMap, BTreeSet},
    io::ErrorKind,
    path::{Path, PathBuf},
    time::UNIX_EPOCH,
};
use walkdir::WalkDir;

use crate::{
    error::{Result, TaskError},
    task::DocumentId,
};

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DocumentMeta {
    pub id: DocumentId,
    /// Last modification, milliseconds since the Unix epoch.
    pub modified_ms: i64,
}

/// Whole-document storage the engine reads from and writes back to.
#[async_trait]
pub trait Vault: Send + Sync {
    async fn read(&self, id: &DocumentId) -> Result<String>;
    /// Overwrites the full text of an existing or new document.
    async fn write(&self, id: &DocumentId, text: &str) -> Result<()>;
    /// Creates the document with `initial` unless it already exists; returns its text.
    async fn create(&self, id: &DocumentId, initial: &str) -> Result<String>;
    /// Documents of the note corpus, with modification times.
    async fn list(&self) -> Result<Vec<DocumentMeta>>;
}

/// A directory of Markdown notes on disk.
#[derive(Clone, Debug)]
pub struct FsVault {
    root: PathBuf,
    extensions: Vec<String>,
}

impl FsVault {
    pub fn new(root: impl Into<PathBuf>, extensions: Vec<String>) -> Self {
        Self { root: root.into(), extensions }
    }
    pub fn root(&self) -> &Path { &self.root }

    pub fn path_of(&self, id: &DocumentId) -> PathBuf {
        id.as_str().split('/').fold(self.root.clone(), |p, seg| p.join(seg))
    }

    /// Maps an absolute path under the root back to a document id.
    pub fn id_of(&self, path: &Path) -> Option<DocumentId> {
        let rel = path.strip_prefix(&self.root).ok()?;
        let parts: Vec<String> = rel.components().map(|c| c.as_os_str().to_string_lossy().into_owned()).collect();
        if parts.is_empty() { return None; }
        Some(DocumentId::new(parts.join("/")))
    }

    pub fn tracks(&self, id: &DocumentId) -> bool {
        let hidden = id.as_str().split('/').any(|seg| seg.starts_with('.'));
        !hidden && id.extension().is_some_and(|ext| self.extensions.iter().any(|e| e.eq_ignore_ascii_case(ext)))
    }
}

fn millis(meta: &std::fs::Metadata) -> i64 {
    meta.modified()
        .ok()
        .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}

#[async_trait]
impl Vault for FsVault {
    async fn read(&self, id: &DocumentId) -> Result<String> {
        match tokio::fs::read_to_string(self.path_of(id)).await {
            Ok(text) => Ok(text),
            Err(e) if e.kind() == ErrorKind::NotFound => Err(TaskError::NotFound(id.clone())),
            Err(source) => Err(TaskError::Unreadable { id: id.clone(), source }),
        }
    }

    async fn write(&self, id: &DocumentId, text: &str) -> Result<()> {
        let path = self.path_of(id);
        let res = async {
            if let Some(dir) = path.parent() { tokio::fs::create_dir_all(dir).await?; }
            tokio::fs::write(&path, text).await
        }
        .await;
        res.map_err(|source| TaskError::WriteFailure { id: id.clone(), source })
    }

    async fn create(&self, id: &DocumentId, initial: &str) -> Result<String> {
        match self.read(id).await {
            Ok(existing) => Ok(existing),
            Err(TaskError::NotFound(_)) => {
                self.write(id, initial).await?;
                Ok(initial.to_string())
            }
            Err(e) => Err(e),
        }
    }

    async fn list(&self) -> Result<Vec<DocumentMeta>> {
        let mut out = Vec::new();
        let walker = WalkDir::new(&self.root)
            .follow_links(false)
            .into_iter()
            .filter_entry(|e| e.depth() == 0 || !e.file_name().to_string_lossy().starts_with('.'));
        for entry in walker {
            let Ok(entry) = entry else { continue };
            if !entry.file_type().is_file() { continue; }
            let Some(id) = self.id_of(entry.path()) else { continue };
            if !self.tracks(&id) { continue; }
            let modified_ms = entry.metadata().map(|m| millis(&m)).unwrap_or(0);
            out.push(DocumentMeta { id, modified_ms });
        }
        Ok(out)
    }
}

/// In-process vault with a logical clock for modification times.
/// Reads or writes can be made to fail per document.
#[derive(Default)]
pub struct MemoryVault {
    docs: RwLock<BTreeMap<DocumentId, (String, i64)>>,
    clock: RwLock<i64>,
    failing_reads: RwLock<BTreeSet<DocumentId>>,
    failing_writes: RwLock<BTreeSet<DocumentId>>,
}

impl MemoryVault {
    pub fn new() -> Self { Self::default() }

    pub fn with_documents<I, S>(docs: I) -> Self
    where
        I: IntoIterator<Item = (S, S)>,
        S: Into<String>,
    {
        let v = Self::new();
        for (id, text) in docs {
            v.put(&DocumentId::new(id), text.into());
        }
        v
    }

    fn tick(&self) -> i64 {
        let mut c = self.clock.write();
        *c += 1;
        *c
    }

    pub fn put(&self, id: &DocumentId, text: String) {
        let at = self.tick();
        self.docs.write().insert(id.clone(), (text, at));
    }

    pub fn get(&self, id: &DocumentId) -> Option<String> {
        self.docs.read().get(id).map(|(t, _)| t.clone())
    }

    pub fn remove(&self, id: &DocumentId) -> Option<String> {
        self.docs.write().remove(id).map(|(t, _)| t)
    }

    pub fn fail_reads(&self, id: &DocumentId, fail: bool) {
        let mut set = self.failing_reads.write();
        if fail { set.insert(id.clone()); } else { set.remove(id); }
    }

    pub fn fail_writes(&self, id: &DocumentId, fail: bool) {
        let mut set = self.failing_writes.write();
        if fail { set.insert(id.clone()); } else { set.remove(id); }
    }
}

#[async_trait]
impl Vault for MemoryVault {
    async fn read(&self, id: &DocumentId) -> Result<String> {
        if self.failing_reads.read().contains(id) {
            return Err(TaskError::Unreadable { id: id.clone(), source: std::io::Error::other("injected read failure") });
        }
        self.get(id).ok_or_else(|| TaskError::NotFound(id.clone()))
    }

    async fn write(&self, id: &DocumentId, text: &str) -> Result<()> {
        if self.failing_writes.read().contains(id) {
            return Err(TaskError::WriteFailure { id: id.clone(), source: std::io::Error::other("injected write failure") });
        }
        self.put(id, text.to_string());
        Ok(())
    }

    async fn create(&self, id: &DocumentId, initial: &str) -> Result<String> {
        if let Some(existing) = self.get(id) { return Ok(existing); }
        self.write(id, initial).await?;
        Ok(initial.to_string())
    }

    async fn list(&self) -> Result<Vec<DocumentMeta>> {
        Ok(self
            .docs
            .read()
            .iter()
            .map(|(id, (_, at))| DocumentMeta { id: id.clone(), modified_ms: *at })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn md() -> Vec<String> { vec!["md".into()] }

    #[tokio::test]
    async fn fs_vault_lists_tracked_documents_only() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        std::fs::create_dir_all(root.join("sub")).unwrap();
        std::fs::create_dir_all(root.join(".obsidian")).unwrap();
        std::fs::write(root.join("a.md"), "- [ ] a").unwrap();
        std::fs::write(root.join("sub/b.MD"), "- [ ] b").unwrap();
        std::fs::write(root.join("c.txt"), "- [ ] c").unwrap();
        std::fs::write(root.join(".obsidian/d.md"), "- [ ] d").unwrap();

        let v = FsVault::new(root, md());
        let mut ids: Vec<String> = v.list().await.unwrap().into_iter().map(|m| m.id.to_string()).collect();
        ids.sort();
        assert_eq!(ids, ["a.md", "sub/b.MD"]);
    }

    #[tokio::test]
    async fn fs_vault_read_write_create() {
        let dir = tempfile::tempdir().unwrap();
        let v = FsVault::new(dir.path(), md());
        let id = DocumentId::new("nested/Tasks.md");

        assert!(matches!(v.read(&id).await, Err(TaskError::NotFound(_))));
        assert_eq!(v.create(&id, "# Tasks\n").await.unwrap(), "# Tasks\n");
        assert_eq!(v.create(&id, "ignored").await.unwrap(), "# Tasks\n");
        v.write(&id, "changed").await.unwrap();
        assert_eq!(v.read(&id).await.unwrap(), "changed");
        assert_eq!(v.id_of(&dir.path().join("nested").join("Tasks.md")), Some(id));
    }

    #[tokio::test]
    async fn fs_vault_writes_never_leave_the_root() {
        let parent = tempfile::tempdir().unwrap();
        let root = parent.path().join("vault");
        let v = FsVault::new(&root, md());
        let id = DocumentId::new("../escape.md");

        assert_eq!(v.path_of(&id), root.join("escape.md"));
        v.write(&id, "- [ ] x").await.unwrap();
        assert!(root.join("escape.md").exists());
        assert!(!parent.path().join("escape.md").exists());
    }

    #[tokio::test]
    async fn memory_vault_advances_modification_order() {
        let v = MemoryVault::with_documents([("a.md", "1"), ("b.md", "2")]);
        v.write(&"a.md".into(), "3").await.unwrap();
        let metas = v.list().await.unwrap();
        let a = metas.iter().find(|m| m.id.as_str() == "a.md").unwrap();
        let b = metas.iter().find(|m| m.id.as_str() == "b.md").unwrap();
        assert!(a.modified_ms > b.modified_ms);
    }

    #[tokio::test]
    async fn memory_vault_injected_failures() {
        let v = MemoryVault::with_documents([("a.md", "x")]);
        let id = DocumentId::new("a.md");
        v.fail_reads(&id, true);
        assert!(matches!(v.read(&id).await, Err(TaskError::Unreadable { .. })));
        v.fail_reads(&id, false);
        v.fail_writes(&id, true);
        assert!(matches!(v.write(&id, "y").await, Err(TaskError::WriteFailure { .. })));
        assert_eq!(v.read(&id).await.unwrap(), "x");
    }
}
