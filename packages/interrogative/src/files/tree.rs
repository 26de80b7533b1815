use std::cmp::Ordering;
use std::collections::HashMap;
use std::path::{Path, PathBuf};

use serde::Serialize;
use tracing::debug;

use super::metadata::{self, FileMetadata};
use super::node::{NodeType, split_name};

/// One entry of the workspace tree.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct TreeNode {
    pub path: PathBuf,
    pub name: String,
    #[serde(rename = "type")]
    pub node_type: NodeType,
    pub extension: String,
    pub size: u64,
    #[serde(flatten)]
    pub metadata: Option<FileMetadata>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub children: Option<Vec<TreeNode>>,
}

/// Result of a full scan: the tree plus a flat index of every scanned path.
#[derive(Clone, Debug, Default)]
pub struct TreeSnapshot {
    pub root: Option<TreeNode>,
    pub paths: HashMap<PathBuf, NodeType>,
}

impl TreeSnapshot {
    pub fn node_type(&self, path: &Path) -> Option<NodeType> {
        self.paths.get(path).copied()
    }

    /// Every scanned directory, the root included.
    pub fn directories(&self) -> impl Iterator<Item = &Path> {
        self.paths
            .iter()
            .filter(|(_, t)| t.is_dir())
            .map(|(p, _)| p.as_path())
    }
}

#[derive(Clone, Debug)]
pub struct TreeScanner {
    exclusions: Vec<String>,
    depth: usize,
}

impl TreeScanner {
    pub fn new(exclusions: Vec<String>, depth: usize) -> Self {
        Self { exclusions, depth }
    }

    pub fn is_excluded(&self, name: &str) -> bool {
        self.exclusions.iter().any(|e| e == name)
    }

    /// True if any component of `path` below `root` is excluded.
    pub fn is_excluded_path(&self, root: &Path, path: &Path) -> bool {
        path.strip_prefix(root)
            .unwrap_or(path)
            .components()
            .any(|c| self.is_excluded(&c.as_os_str().to_string_lossy()))
    }

    /// Blocking recursive scan. Unreadable entries are skipped.
    pub fn scan(&self, root: &Path) -> TreeSnapshot {
        let mut paths = HashMap::new();
        let root_node = self.scan_entry(root, 0, &mut paths);
        debug!(root = %root.display(), entries = paths.len(), "Scanned workspace tree");
        TreeSnapshot {
            root: root_node,
            paths,
        }
    }

    fn scan_entry(
        &self,
        path: &Path,
        depth: usize,
        paths: &mut HashMap<PathBuf, NodeType>,
    ) -> Option<TreeNode> {
        let meta = std::fs::symlink_metadata(path).ok()?;
        let node_type = NodeType::from_file_type(meta.file_type());
        let (name, extension) = split_name(path);
        paths.insert(path.to_path_buf(), node_type);

        let children = if node_type.is_dir() {
            let mut children = Vec::new();
            if depth < self.depth {
                if let Ok(entries) = std::fs::read_dir(path) {
                    for entry in entries.flatten() {
                        if self.is_excluded(&entry.file_name().to_string_lossy()) {
                            continue;
                        }
                        if let Some(child) = self.scan_entry(&entry.path(), depth + 1, paths) {
                            children.push(child);
                        }
                    }
                }
            }
            children.sort_by(tree_order);
            Some(children)
        } else {
            None
        };

        let metadata = (!node_type.is_dir()).then(|| metadata::resolve(&name, &extension));

        Some(TreeNode {
            path: path.to_path_buf(),
            name,
            node_type,
            extension,
            size: meta.len(),
            metadata,
            children,
        })
    }
}

/// Directories first, then byte-wise by name.
fn tree_order(a: &TreeNode, b: &TreeNode) -> Ordering {
    match (a.node_type.is_dir(), b.node_type.is_dir()) {
        (true, false) => Ordering::Less,
        (false, true) => Ordering::Greater,
        _ => a.name.as_bytes().cmp(b.name.as_bytes()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn names(node: &TreeNode) -> Vec<&str> {
        node.children
            .as_ref()
            .unwrap()
            .iter()
            .map(|c| c.name.as_str())
            .collect()
    }

    #[test]
    fn test_directories_first_then_bytewise() {
        let tmp = tempfile::tempdir().unwrap();
        let root = tmp.path();
        fs::write(root.join("b.txt"), "").unwrap();
        fs::write(root.join("B.txt"), "").unwrap();
        fs::write(root.join("a.txt"), "").unwrap();
        fs::create_dir(root.join("zeta")).unwrap();
        fs::create_dir(root.join("Alpha")).unwrap();
        fs::write(root.join("zeta").join("y"), "").unwrap();
        fs::create_dir(root.join("zeta").join("x")).unwrap();

        let snapshot = TreeScanner::new(vec![], 10).scan(root);
        let tree = snapshot.root.unwrap();

        assert_eq!(names(&tree), vec!["Alpha", "zeta", "B.txt", "a.txt", "b.txt"]);
        let zeta = &tree.children.as_ref().unwrap()[1];
        assert_eq!(names(zeta), vec!["x", "y"]);
    }

    #[test]
    fn test_exclusions_and_paths_index() {
        let tmp = tempfile::tempdir().unwrap();
        let root = tmp.path();
        fs::create_dir_all(root.join(".git/refs")).unwrap();
        fs::create_dir_all(root.join("node_modules/pkg")).unwrap();
        fs::write(root.join("main.rs"), "fn main() {}").unwrap();

        let scanner = TreeScanner::new(vec![".git".into(), "node_modules".into()], 10);
        let snapshot = scanner.scan(root);

        assert_eq!(names(snapshot.root.as_ref().unwrap()), vec!["main.rs"]);
        assert_eq!(snapshot.node_type(&root.join("main.rs")), Some(NodeType::File));
        assert_eq!(snapshot.node_type(root), Some(NodeType::Directory));
        assert!(snapshot.node_type(&root.join(".git")).is_none());
        assert!(scanner.is_excluded_path(root, &root.join("node_modules/pkg/index.js")));
        assert!(!scanner.is_excluded_path(root, &root.join("src/git.rs")));
    }

    #[test]
    fn test_depth_limit() {
        let tmp = tempfile::tempdir().unwrap();
        let root = tmp.path();
        fs::create_dir_all(root.join("a/b/c")).unwrap();

        let snapshot = TreeScanner::new(vec![], 1).scan(root);
        let tree = snapshot.root.as_ref().unwrap();
        let a = &tree.children.as_ref().unwrap()[0];

        assert_eq!(a.name, "a");
        assert!(a.children.as_ref().unwrap().is_empty());
        assert!(snapshot.node_type(&root.join("a/b")).is_none());
    }

    #[test]
    fn test_files_carry_metadata() {
        let tmp = tempfile::tempdir().unwrap();
        fs::write(tmp.path().join("style.css"), "body {}").unwrap();

        let snapshot = TreeScanner::new(vec![], 10).scan(tmp.path());
        let json = serde_json::to_value(snapshot.root.unwrap()).unwrap();
        let file = &json["children"][0];

        assert_eq!(file["type"], "file");
        assert_eq!(file["size"], 7);
        assert_eq!(file["icon"], "mdi-language-css3");
        assert!(json.get("icon").is_none());
    }
}
