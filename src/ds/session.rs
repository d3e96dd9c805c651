//! Session bookkeeping (spec §4.2) plus the per-session folder tree (spec
//! §1's "local per-session namespace used purely for display/navigation").
//!
//! Sessions live in a `whirlwind::ShardMap<SessionId, Session>` — the
//! teacher's root `Cargo.toml` declares `whirlwind` but never wires it into
//! any module; a concurrent session table is exactly the bucketed-map-
//! without-custom-bucket-design use case the spec leaves unconstrained, so
//! we give it its first real caller here.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use whirlwind::ShardMap;

pub type SessionId = u64;

/// A directory node in a session's folder tree. Files are leaves tracked
/// purely by name; the tree has no on-disk representation (spec Non-goals).
#[derive(Debug, Default)]
struct FolderNode {
    files: Vec<String>,
    children: HashMap<String, FolderNode>,
}

impl FolderNode {
    fn child_mut(&mut self, name: &str) -> Option<&mut FolderNode> {
        self.children.get_mut(name)
    }

    fn resolve_mut<'a>(&'a mut self, path: &[String]) -> Option<&'a mut FolderNode> {
        let mut node = self;
        for segment in path {
            node = node.child_mut(segment)?;
        }
        Some(node)
    }
}

pub struct FolderTree {
    root: Mutex<FolderNode>,
    cwd: Mutex<Vec<String>>,
}

impl FolderTree {
    fn new() -> Self {
        Self { root: Mutex::new(FolderNode::default()), cwd: Mutex::new(Vec::new()) }
    }

    pub fn create_dir(&self, name: &str) {
        let mut root = self.root.lock().unwrap();
        let cwd = self.cwd.lock().unwrap().clone();
        if let Some(node) = root.resolve_mut(&cwd) {
            node.children.entry(name.to_string()).or_default();
        }
    }

    pub fn add_file(&self, filename: &str) {
        let mut root = self.root.lock().unwrap();
        let cwd = self.cwd.lock().unwrap().clone();
        if let Some(node) = root.resolve_mut(&cwd) {
            node.files.push(filename.to_string());
        }
    }

    pub fn remove_file(&self, filename: &str) {
        let mut root = self.root.lock().unwrap();
        let cwd = self.cwd.lock().unwrap().clone();
        if let Some(node) = root.resolve_mut(&cwd) {
            node.files.retain(|f| f != filename);
        }
    }

    /// Lists the current directory, or an explicit `path` when given,
    /// splitting on `/`.
    pub fn view(&self, path: Option<&str>) -> Option<(Vec<String>, Vec<String>)> {
        let mut root = self.root.lock().unwrap();
        let target: Vec<String> = match path {
            Some(p) => p.split('/').filter(|s| !s.is_empty()).map(str::to_string).collect(),
            None => self.cwd.lock().unwrap().clone(),
        };
        let node = root.resolve_mut(&target)?;
        let mut dirs: Vec<String> = node.children.keys().cloned().collect();
        dirs.sort();
        Some((dirs, node.files.clone()))
    }

    /// `OPEN [-c] <dir>`: descends into `dir`, creating it first if `-c`
    /// was given and it is missing.
    pub fn open(&self, dir: &str, create: bool) -> bool {
        let mut root = self.root.lock().unwrap();
        let cwd = self.cwd.lock().unwrap().clone();
        let Some(node) = root.resolve_mut(&cwd) else { return false };
        if !node.children.contains_key(dir) {
            if create {
                node.children.insert(dir.to_string(), FolderNode::default());
            } else {
                return false;
            }
        }
        self.cwd.lock().unwrap().push(dir.to_string());
        true
    }

    pub fn open_parent(&self) -> bool {
        let mut cwd = self.cwd.lock().unwrap();
        cwd.pop().is_some()
    }

    pub fn move_file(&self, filename: &str, dir: &str) -> bool {
        self.remove_file(filename);
        let mut root = self.root.lock().unwrap();
        let cwd = self.cwd.lock().unwrap().clone();
        let Some(node) = root.resolve_mut(&cwd) else { return false };
        let Some(target) = node.child_mut(dir) else { return false };
        target.files.push(filename.to_string());
        true
    }

    pub fn upmove_file(&self, filename: &str) -> bool {
        if self.cwd.lock().unwrap().is_empty() {
            return false;
        }
        self.remove_file(filename);
        let mut root = self.root.lock().unwrap();
        let mut parent_path = self.cwd.lock().unwrap().clone();
        parent_path.pop();
        let Some(parent) = root.resolve_mut(&parent_path) else { return false };
        parent.files.push(filename.to_string());
        true
    }
}

pub struct Session {
    pub username: String,
    pub folders: FolderTree,
}

impl Session {
    fn new(username: String) -> Self {
        Self { username, folders: FolderTree::new() }
    }
}

pub struct SessionTable {
    sessions: ShardMap<SessionId, std::sync::Arc<Session>>,
    next_id: AtomicU64,
}

impl SessionTable {
    pub fn new() -> Self {
        Self { sessions: ShardMap::new(), next_id: AtomicU64::new(1) }
    }

    pub async fn create(&self, username: String) -> (SessionId, std::sync::Arc<Session>) {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let session = std::sync::Arc::new(Session::new(username));
        self.sessions.insert(id, session.clone()).await;
        (id, session)
    }

    pub async fn get(&self, id: SessionId) -> Option<std::sync::Arc<Session>> {
        self.sessions.get(&id).await
    }

    pub async fn remove(&self, id: SessionId) {
        self.sessions.remove(&id).await;
    }
}

impl Default for SessionTable {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn create_and_lookup_session() {
        let table = SessionTable::new();
        let (id, session) = table.create("alice".to_string()).await;
        assert_eq!(session.username, "alice");
        let fetched = table.get(id).await.unwrap();
        assert_eq!(fetched.username, "alice");
        table.remove(id).await;
        assert!(table.get(id).await.is_none());
    }

    #[test]
    fn folder_tree_create_open_move() {
        let tree = FolderTree::new();
        tree.add_file("root.txt");
        tree.create_dir("work");
        assert!(tree.open("work", false));
        tree.add_file("inner.txt");
        assert!(tree.open_parent());
        assert!(tree.move_file("root.txt", "work"));
        let (dirs, files) = tree.view(Some("work")).unwrap();
        assert!(dirs.is_empty());
        assert!(files.contains(&"root.txt".to_string()));
        assert!(files.contains(&"inner.txt".to_string()));
    }
}
