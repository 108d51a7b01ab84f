//! 文档存储

use anyhow::{Context, Result};
use async_trait::async_trait;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::path::PathBuf;
use tokio::sync::RwLock;
use tracing::debug;

/// 文档存储接口，返回可用于读取的路径或句柄
#[async_trait]
pub trait DocumentStore: Send + Sync {
    async fn store(&self, file_name: &str, content_type: &str, content: &[u8]) -> Result<String>;
}

fn content_key(file_name: &str, content: &[u8]) -> String {
    let digest = format!("{:x}", Sha256::digest(content));
    match file_name.rsplit_once('.') {
        Some((_, ext)) if !ext.is_empty() && ext.chars().all(|c| c.is_ascii_alphanumeric()) => {
            format!("{}.{}", digest, ext.to_ascii_lowercase())
        }
        _ => digest,
    }
}

/// 本地文件系统存储，文件按内容哈希命名
pub struct FileDocumentStore {
    root: PathBuf,
}

impl FileDocumentStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

#[async_trait]
impl DocumentStore for FileDocumentStore {
    async fn store(&self, file_name: &str, content_type: &str, content: &[u8]) -> Result<String> {
        tokio::fs::create_dir_all(&self.root)
            .await
            .with_context(|| format!("creating document root {}", self.root.display()))?;

        let path = self.root.join(content_key(file_name, content));
        tokio::fs::write(&path, content)
            .await
            .with_context(|| format!("writing document {}", path.display()))?;

        debug!(file_name, content_type, path = %path.display(), "Document stored");
        Ok(path.to_string_lossy().into_owned())
    }
}

/// 内存存储
#[derive(Default)]
pub struct MemoryDocumentStore {
    documents: RwLock<HashMap<String, Vec<u8>>>,
}

impl MemoryDocumentStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn get(&self, handle: &str) -> Option<Vec<u8>> {
        self.documents.read().await.get(handle).cloned()
    }

    pub async fn len(&self) -> usize {
        self.documents.read().await.len()
    }
}

#[async_trait]
impl DocumentStore for MemoryDocumentStore {
    async fn store(&self, file_name: &str, _content_type: &str, content: &[u8]) -> Result<String> {
        let handle = format!("mem://{}", content_key(file_name, content));
        self.documents
            .write()
            .await
            .insert(handle.clone(), content.to_vec());
        Ok(handle)
    }
}
