//! Durable chunk storage for the receiver.
//!
//! Chunks are keyed by (file key, chunk index). The receiver's drain task
//! is the only writer for a key; finalize reads the chunks back in index
//! order and deletes them.

use std::collections::HashMap;
use std::future::Future;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::pin::Pin;

use bytes::Bytes;
use tokio::sync::Mutex;
use tracing::debug;

use crate::TransferError;

pub type StoreFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

pub trait ChunkStore: Send + Sync {
    fn put<'a>(
        &'a self,
        key: &'a str,
        index: u32,
        data: Bytes,
    ) -> StoreFuture<'a, Result<(), TransferError>>;

    fn get<'a>(&'a self, key: &'a str, index: u32) -> StoreFuture<'a, Result<Bytes, TransferError>>;

    /// Removes every chunk stored under `key`. Missing keys are not an error.
    fn delete_file<'a>(&'a self, key: &'a str) -> StoreFuture<'a, Result<(), TransferError>>;

    /// Number of chunks currently stored under `key`.
    fn chunk_count<'a>(&'a self, key: &'a str) -> StoreFuture<'a, Result<usize, TransferError>>;
}

/// One directory per file key (hex-encoded), one file per chunk.
#[derive(Debug, Clone)]
pub struct FsChunkStore {
    root: PathBuf,
}

impl FsChunkStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn file_dir(&self, key: &str) -> PathBuf {
        self.root.join(hex::encode(key.as_bytes()))
    }

    fn chunk_path(&self, key: &str, index: u32) -> PathBuf {
        self.file_dir(key).join(format!("{index:010}.chunk"))
    }
}

impl ChunkStore for FsChunkStore {
    fn put<'a>(
        &'a self,
        key: &'a str,
        index: u32,
        data: Bytes,
    ) -> StoreFuture<'a, Result<(), TransferError>> {
        Box::pin(async move {
            tokio::fs::create_dir_all(self.file_dir(key)).await?;
            tokio::fs::write(self.chunk_path(key, index), &data).await?;
            Ok(())
        })
    }

    fn get<'a>(&'a self, key: &'a str, index: u32) -> StoreFuture<'a, Result<Bytes, TransferError>> {
        Box::pin(async move {
            match tokio::fs::read(self.chunk_path(key, index)).await {
                Ok(data) => Ok(Bytes::from(data)),
                Err(e) if e.kind() == ErrorKind::NotFound => Err(TransferError::Store(format!(
                    "chunk {index} of {key} missing"
                ))),
                Err(e) => Err(e.into()),
            }
        })
    }

    fn delete_file<'a>(&'a self, key: &'a str) -> StoreFuture<'a, Result<(), TransferError>> {
        Box::pin(async move {
            match tokio::fs::remove_dir_all(self.file_dir(key)).await {
                Ok(()) => {
                    debug!(key, "stored chunks deleted");
                    Ok(())
                }
                Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
                Err(e) => Err(e.into()),
            }
        })
    }

    fn chunk_count<'a>(&'a self, key: &'a str) -> StoreFuture<'a, Result<usize, TransferError>> {
        Box::pin(async move {
            let mut entries = match tokio::fs::read_dir(self.file_dir(key)).await {
                Ok(entries) => entries,
                Err(e) if e.kind() == ErrorKind::NotFound => return Ok(0),
                Err(e) => return Err(e.into()),
            };
            let mut count = 0;
            while entries.next_entry().await?.is_some() {
                count += 1;
            }
            Ok(count)
        })
    }
}

/// In-memory store, for tests and small transfers.
#[derive(Debug, Default)]
pub struct MemoryChunkStore {
    chunks: Mutex<HashMap<String, HashMap<u32, Bytes>>>,
}

impl MemoryChunkStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ChunkStore for MemoryChunkStore {
    fn put<'a>(
        &'a self,
        key: &'a str,
        index: u32,
        data: Bytes,
    ) -> StoreFuture<'a, Result<(), TransferError>> {
        Box::pin(async move {
            self.chunks
                .lock()
                .await
                .entry(key.to_string())
                .or_default()
                .insert(index, data);
            Ok(())
        })
    }

    fn get<'a>(&'a self, key: &'a str, index: u32) -> StoreFuture<'a, Result<Bytes, TransferError>> {
        Box::pin(async move {
            self.chunks
                .lock()
                .await
                .get(key)
                .and_then(|file| file.get(&index))
                .cloned()
                .ok_or_else(|| TransferError::Store(format!("chunk {index} of {key} missing")))
        })
    }

    fn delete_file<'a>(&'a self, key: &'a str) -> StoreFuture<'a, Result<(), TransferError>> {
        Box::pin(async move {
            self.chunks.lock().await.remove(key);
            Ok(())
        })
    }

    fn chunk_count<'a>(&'a self, key: &'a str) -> StoreFuture<'a, Result<usize, TransferError>> {
        Box::pin(async move { Ok(self.chunks.lock().await.get(key).map_or(0, HashMap::len)) })
    }
}
