use std::fs::{FileType, Metadata};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::metadata::{self, FileMetadata};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum NodeType {
    File,
    Directory,
    BlockDevice,
    CharacterDevice,
    Fifo,
    Socket,
    Symlink,
    Unknown,
}

impl NodeType {
    pub fn from_file_type(ft: FileType) -> Self {
        if ft.is_dir() {
            return NodeType::Directory;
        }
        if ft.is_file() {
            return NodeType::File;
        }
        if ft.is_symlink() {
            return NodeType::Symlink;
        }
        #[cfg(unix)]
        {
            use std::os::unix::fs::FileTypeExt;
            if ft.is_block_device() {
                return NodeType::BlockDevice;
            }
            if ft.is_char_device() {
                return NodeType::CharacterDevice;
            }
            if ft.is_fifo() {
                return NodeType::Fifo;
            }
            if ft.is_socket() {
                return NodeType::Socket;
            }
        }
        NodeType::Unknown
    }

    pub fn is_dir(self) -> bool {
        self == NodeType::Directory
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileStat {
    pub size: u64,
    /// Milliseconds since the Unix epoch
    pub mtime: i64,
    pub mode: u32,
}

impl FileStat {
    pub fn from_metadata(meta: &Metadata) -> Self {
        let mtime = meta
            .modified()
            .map(|t| DateTime::<Utc>::from(t).timestamp_millis())
            .unwrap_or(0);
        #[cfg(unix)]
        let mode = {
            use std::os::unix::fs::PermissionsExt;
            meta.permissions().mode()
        };
        #[cfg(not(unix))]
        let mode = if meta.permissions().readonly() { 0o444 } else { 0o644 };

        Self {
            size: meta.len(),
            mtime,
            mode,
        }
    }
}

/// A path opened for interactive editing.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct FileNode {
    pub path: PathBuf,
    pub name: String,
    pub extension: String,
    #[serde(rename = "type")]
    pub node_type: NodeType,
    /// Text, or lowercase hex when `binary`. `None` for directories.
    pub contents: Option<String>,
    pub binary: bool,
    pub stat: FileStat,
    pub focus: bool,
    pub saving: bool,
    pub closeable: bool,
    #[serde(flatten)]
    pub metadata: FileMetadata,
}

impl FileNode {
    pub fn new(path: &Path, meta: &Metadata) -> Self {
        let (name, extension) = split_name(path);
        let metadata = metadata::resolve(&name, &extension);
        Self {
            path: path.to_path_buf(),
            name,
            extension,
            node_type: NodeType::from_file_type(meta.file_type()),
            contents: None,
            binary: false,
            stat: FileStat::from_metadata(meta),
            focus: false,
            saving: false,
            closeable: true,
            metadata,
        }
    }

    /// Replace contents from raw bytes, classifying and encoding them.
    pub fn set_contents(&mut self, data: &[u8]) {
        self.binary = is_binary(data);
        self.contents = Some(encode_contents(data, self.binary));
    }

    /// Bytes to write back to disk for the current contents.
    pub fn disk_bytes(&self) -> Result<Vec<u8>, hex::FromHexError> {
        let contents = self.contents.as_deref().unwrap_or_default();
        if self.binary {
            hex::decode(contents)
        } else {
            Ok(contents.as_bytes().to_vec())
        }
    }
}

/// Any byte above 127 marks the content as binary.
pub fn is_binary(data: &[u8]) -> bool {
    data.iter().any(|b| *b > 127)
}

pub fn encode_contents(data: &[u8], binary: bool) -> String {
    if binary {
        hex::encode(data)
    } else {
        // Pure ASCII is always valid UTF-8
        String::from_utf8_lossy(data).into_owned()
    }
}

/// Final path component and its extension (without the dot, empty if none).
pub fn split_name(path: &Path) -> (String, String) {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string());
    let extension = path
        .extension()
        .map(|e| e.to_string_lossy().into_owned())
        .unwrap_or_default();
    (name, extension)
}
